//! Channel mode records.
//!
//! A channel carries a bitset of argumentless modes plus a key and a
//! limit. Stored create/enforce mode strings are "simple" modes: no
//! ban lists and no member prefixes, which travel separately.

use std::fmt;

use crate::KEYLEN;

/// `+i` invite only.
pub const MODE_INVITEONLY: u32 = 0x001;
/// `+m` moderated.
pub const MODE_MODERATED: u32 = 0x002;
/// `+n` no external messages.
pub const MODE_NOEXTERNAL: u32 = 0x004;
/// `+p` private.
pub const MODE_PRIVATE: u32 = 0x008;
/// `+s` secret.
pub const MODE_SECRET: u32 = 0x010;
/// `+t` topic lock.
pub const MODE_TOPICLOCK: u32 = 0x020;
/// `+r` registered users only.
pub const MODE_REGONLY: u32 = 0x040;
/// `+S` TLS users only.
pub const MODE_SSLONLY: u32 = 0x080;
/// `+k` key, tracked as a bit alongside the argument.
pub const MODE_KEY: u32 = 0x100;
/// `+l` limit, tracked as a bit alongside the argument.
pub const MODE_LIMIT: u32 = 0x200;

/// Map a simple mode letter to its bit. Returns `None` for unknown letters
/// and for the parameterized `k`/`l`, which the parser special-cases.
pub fn simple_mode_bit(c: char) -> Option<u32> {
    Some(match c {
        'i' => MODE_INVITEONLY,
        'm' => MODE_MODERATED,
        'n' => MODE_NOEXTERNAL,
        'p' => MODE_PRIVATE,
        's' => MODE_SECRET,
        't' => MODE_TOPICLOCK,
        'r' => MODE_REGONLY,
        'S' => MODE_SSLONLY,
        _ => return None,
    })
}

/// The letter for each simple bit, in emission order.
const SIMPLE_LETTERS: &[(u32, char)] = &[
    (MODE_INVITEONLY, 'i'),
    (MODE_MODERATED, 'm'),
    (MODE_NOEXTERNAL, 'n'),
    (MODE_PRIVATE, 'p'),
    (MODE_SECRET, 's'),
    (MODE_TOPICLOCK, 't'),
    (MODE_REGONLY, 'r'),
    (MODE_SSLONLY, 'S'),
];

/// A channel's mode record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelModes {
    /// Bitset over the `MODE_*` constants.
    pub bits: u32,
    /// `+k` argument, at most [`KEYLEN`] bytes.
    pub key: Option<String>,
    /// `+l` argument.
    pub limit: Option<u32>,
}

impl ChannelModes {
    /// Parse a stored simple-mode string like `+ntk sekrit` or `+ntl 30`.
    ///
    /// Unknown letters are ignored; a `-` section removes. Arguments are
    /// consumed in order by `k` and `l`.
    pub fn parse(modestr: &str, args: &[&str]) -> Self {
        let mut modes = ChannelModes::default();
        modes.apply_str(modestr, args);
        modes
    }

    /// Apply a simple-mode string to this record.
    pub fn apply_str(&mut self, modestr: &str, args: &[&str]) {
        let mut adding = true;
        let mut argi = 0;

        for c in modestr.chars() {
            match c {
                '+' => adding = true,
                '-' => adding = false,
                'k' => {
                    if adding {
                        if let Some(&key) = args.get(argi) {
                            argi += 1;
                            let mut key = key.to_string();
                            key.truncate(KEYLEN);
                            self.key = Some(key);
                            self.bits |= MODE_KEY;
                        }
                    } else {
                        // -k may or may not carry the old key on the wire.
                        if args.get(argi).is_some() {
                            argi += 1;
                        }
                        self.key = None;
                        self.bits &= !MODE_KEY;
                    }
                }
                'l' => {
                    if adding {
                        if let Some(&lim) = args.get(argi) {
                            argi += 1;
                            if let Ok(n) = lim.parse::<u32>() {
                                self.limit = Some(n);
                                self.bits |= MODE_LIMIT;
                            }
                        }
                    } else {
                        self.limit = None;
                        self.bits &= !MODE_LIMIT;
                    }
                }
                c => {
                    if let Some(bit) = simple_mode_bit(c) {
                        if adding {
                            self.bits |= bit;
                        } else {
                            self.bits &= !bit;
                        }
                    }
                }
            }
        }
    }

    /// True when no modes are recorded.
    pub fn is_empty(&self) -> bool {
        self.bits == 0 && self.key.is_none() && self.limit.is_none()
    }

    /// Union in another record; its key and limit win when present.
    pub fn merge(&mut self, other: &ChannelModes) {
        self.bits |= other.bits;
        if other.key.is_some() {
            self.key = other.key.clone();
        }
        if other.limit.is_some() {
            self.limit = other.limit;
        }
    }

    /// Compute the `+` delta that brings `current` up to this record.
    ///
    /// Used by enforced-mode re-assertion: only modes we require and the
    /// channel lacks (or carries with the wrong argument) are emitted.
    /// Returns `None` when nothing is missing.
    pub fn missing_from(&self, current: &ChannelModes) -> Option<ModeDelta> {
        let mut letters = String::new();
        let mut args: Vec<String> = Vec::new();

        for &(bit, c) in SIMPLE_LETTERS {
            if self.bits & bit != 0 && current.bits & bit == 0 {
                letters.push(c);
            }
        }

        if let Some(key) = &self.key {
            if current.key.as_deref() != Some(key.as_str()) {
                letters.push('k');
                args.push(key.clone());
            }
        }
        if let Some(limit) = self.limit {
            if current.limit != Some(limit) {
                letters.push('l');
                args.push(limit.to_string());
            }
        }

        if letters.is_empty() {
            None
        } else {
            Some(ModeDelta {
                adding: true,
                letters,
                args,
            })
        }
    }
}

impl fmt::Display for ChannelModes {
    /// Wire form: `+ntk key` style. Empty record renders as `+`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+")?;
        for &(bit, c) in SIMPLE_LETTERS {
            if self.bits & bit != 0 {
                write!(f, "{}", c)?;
            }
        }
        if self.key.is_some() {
            write!(f, "k")?;
        }
        if self.limit.is_some() {
            write!(f, "l")?;
        }
        if let Some(key) = &self.key {
            write!(f, " {}", key)?;
        }
        if let Some(limit) = self.limit {
            write!(f, " {}", limit)?;
        }
        Ok(())
    }
}

/// A one-direction batch of simple-mode changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeDelta {
    /// True for `+`, false for `-`.
    pub adding: bool,
    /// Mode letters in emission order.
    pub letters: String,
    /// Arguments for `k`/`l` in letter order.
    pub args: Vec<String>,
}

impl fmt::Display for ModeDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}",
            if self.adding { '+' } else { '-' },
            self.letters
        )?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_render() {
        let modes = ChannelModes::parse("+ntk", &["sekrit"]);
        assert_eq!(modes.bits & MODE_NOEXTERNAL, MODE_NOEXTERNAL);
        assert_eq!(modes.bits & MODE_TOPICLOCK, MODE_TOPICLOCK);
        assert_eq!(modes.key.as_deref(), Some("sekrit"));
        assert_eq!(modes.to_string(), "+ntk sekrit");
    }

    #[test]
    fn minus_removes() {
        let mut modes = ChannelModes::parse("+ntsk", &["pw"]);
        modes.apply_str("-sk", &["pw"]);
        assert_eq!(modes.to_string(), "+nt");
    }

    #[test]
    fn key_is_truncated() {
        let modes = ChannelModes::parse("+k", &["AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"]);
        assert_eq!(modes.key.as_deref().map(str::len), Some(KEYLEN));
    }

    #[test]
    fn missing_from_emits_only_the_gap() {
        let enforced = ChannelModes::parse("+ntm", &[]);
        let current = ChannelModes::parse("+nt", &[]);
        let delta = enforced.missing_from(&current).unwrap();
        assert_eq!(delta.to_string(), "+m");

        assert!(enforced.missing_from(&enforced.clone()).is_none());
    }

    #[test]
    fn missing_from_reasserts_wrong_key() {
        let enforced = ChannelModes::parse("+k", &["right"]);
        let current = ChannelModes::parse("+k", &["wrong"]);
        let delta = enforced.missing_from(&current).unwrap();
        assert_eq!(delta.to_string(), "+k right");
    }

    #[test]
    fn merge_unions() {
        let mut a = ChannelModes::parse("+nt", &[]);
        let b = ChannelModes::parse("+ml", &["25"]);
        a.merge(&b);
        assert_eq!(a.to_string(), "+mntl 25");
    }
}
