//! Localised message catalogue.
//!
//! Every user-facing service reply goes through a numeric message id so
//! translations can be swapped per account. The English table below is
//! authoritative; translation files provide overrides per language code.
//! Lookup falls back translated -> default language -> English.
//!
//! Translations are only accepted when their printf-style specifier
//! sequence matches the English base exactly. That check is a safety
//! property: the runtime formatter consumes arguments positionally, so a
//! translation with reordered or retyped specifiers would render garbage
//! or worse.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;

use tracing::warn;

/// Message identifiers. The discriminant is the wire-stable numeric id
/// used in translation files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MsgId {
    Successful = 1,
    SuccessfulOn = 2,
    NeedMoreParams = 3,
    IsDisabled = 4,
    NoAccess = 5,
    NotLoggedIn = 6,
    AlreadyLoggedIn = 7,
    RateLimited = 8,
    UseShortcut = 9,
    NoHelp = 10,
    HelpIndex = 11,
    Ignored = 12,

    UserRegisterDisabled = 100,
    UserInvalidUsername = 101,
    UserInvalidPassword = 102,
    UserInvalidEmail = 103,
    UserAlreadyExists = 104,
    UserRegisterThrottled = 105,
    UserRegistered = 106,
    UserNotActivated = 107,
    UserActivated = 108,
    UserBadToken = 109,
    UserLoginFailed = 110,
    UserLoggedIn = 111,
    UserLoggedOut = 112,
    UserMaxLogins = 113,
    UserSuspended = 114,
    UserNotFound = 115,
    UserResetSent = 116,
    UserResetPending = 117,
    UserResetDone = 118,
    UserEmailChanged = 119,
    UserEmailBannedDomain = 120,
    UserQueryOption = 121,
    UserNoEmail = 122,

    NickAlreadyRegistered = 150,
    NickNotRegistered = 151,
    NickRegistered = 152,
    NickDropped = 153,
    NickTooMany = 154,
    NickNotYours = 155,
    NickInUseWarn = 156,

    ChanNotRegistered = 200,
    ChanAlreadyRegistered = 201,
    ChanRegistered = 202,
    ChanRegisterThrottled = 203,
    ChanNotOpped = 204,
    ChanNotOnChannel = 205,
    ChanSuspended = 206,
    ChanNoAccess = 207,
    ChanAccessAdded = 208,
    ChanAccessRemoved = 209,
    ChanAccessChanged = 210,
    ChanAccessList = 211,
    ChanAccessExists = 212,
    ChanAccessNotFound = 213,
    ChanBanAdded = 214,
    ChanBanRemoved = 215,
    ChanBanExists = 216,
    ChanBanNotFound = 217,
    ChanBanHigher = 218,
    ChanBanListFull = 219,
    ChanUnbanRefused = 220,
    ChanDropped = 221,
    ChanOwnerTokenSent = 222,
    ChanQueryOption = 223,
    ChanTopicSet = 224,
    ChanInvited = 225,
    ChanKeyIs = 226,
    ChanCleared = 227,
    ChanNotInChannel = 228,
    ChanUserSuspended = 229,
    ChanTakenOver = 230,

    BanAdded = 300,
    BanRemoved = 301,
    BanExists = 302,
    BanNotFound = 303,
    BanTooManyMatches = 304,
    BanBadMask = 305,
    BanBadRegex = 306,
    BanNoPermBan = 307,
    BanSynced = 308,

    MemoSent = 350,
    MemoNoMemos = 351,
    MemoNotFound = 352,
    MemoDeleted = 353,
    MemoTargetFull = 354,
    MemoTargetRefuses = 355,
    MemoUnread = 356,

    JupeAdded = 400,
    JupeRemoved = 401,
    JupePending = 402,
    JupeAlready = 403,

    AlisHeader = 450,
    AlisEnd = 451,
    AlisBadOption = 452,

    GlobalWelcomeSet = 475,
    GlobalWelcomeDeleted = 476,
    GlobalWelcomeNotFound = 477,

    OperLoggedIn = 500,
    OperLoggedOut = 501,
    OperLoginFailed = 502,
}

/// English base table. Index 0 of the fallback chain.
static BASE: &[(MsgId, &str)] = &[
    (MsgId::Successful, "%s successful"),
    (MsgId::SuccessfulOn, "%s successful on %s"),
    (MsgId::NeedMoreParams, "Insufficient parameters to %s::%s"),
    (MsgId::IsDisabled, "%s::%s is disabled"),
    (MsgId::NoAccess, "No access to %s::%s"),
    (MsgId::NotLoggedIn, "Login required for %s::%s"),
    (MsgId::AlreadyLoggedIn, "You are already logged in"),
    (MsgId::RateLimited, "Temporarily unable to answer query, please try again shortly"),
    (MsgId::UseShortcut, "Please use %s@%s to talk to this service"),
    (MsgId::NoHelp, "No help available on %s"),
    (MsgId::HelpIndex, "Available commands: %s"),
    (MsgId::Ignored, "You are being ignored"),
    (MsgId::UserRegisterDisabled, "Registration is disabled"),
    (MsgId::UserInvalidUsername, "Username %s is invalid"),
    (MsgId::UserInvalidPassword, "Invalid password"),
    (MsgId::UserInvalidEmail, "Email %s is invalid"),
    (MsgId::UserAlreadyExists, "Username %s is already registered"),
    (MsgId::UserRegisterThrottled, "Registration is currently throttled, please try later"),
    (MsgId::UserRegistered, "Username %s registered"),
    (MsgId::UserNotActivated, "Account %s has not been activated, check your email"),
    (MsgId::UserActivated, "Account %s activated, you may now LOGIN"),
    (MsgId::UserBadToken, "Invalid token"),
    (MsgId::UserLoginFailed, "Invalid username or password"),
    (MsgId::UserLoggedIn, "Login successful"),
    (MsgId::UserLoggedOut, "Logout successful"),
    (MsgId::UserMaxLogins, "Maximum of %d logins reached for %s"),
    (MsgId::UserSuspended, "Account %s is suspended: %s"),
    (MsgId::UserNotFound, "Username %s is not registered"),
    (MsgId::UserResetSent, "A token has been emailed to the address on file"),
    (MsgId::UserResetPending, "A token was already issued recently, please wait"),
    (MsgId::UserResetDone, "Password for %s has been reset"),
    (MsgId::UserEmailChanged, "Email address for %s updated"),
    (MsgId::UserEmailBannedDomain, "Email domain %s is not accepted here"),
    (MsgId::UserQueryOption, "%s is set to: %s"),
    (MsgId::UserNoEmail, "Account %s has no email address on file"),
    (MsgId::NickAlreadyRegistered, "Nickname %s is already registered"),
    (MsgId::NickNotRegistered, "Nickname %s is not registered"),
    (MsgId::NickRegistered, "Nickname %s registered to %s"),
    (MsgId::NickDropped, "Nickname %s dropped"),
    (MsgId::NickTooMany, "You may register at most %d nicknames"),
    (MsgId::NickNotYours, "Nickname %s is not registered to you"),
    (MsgId::NickInUseWarn, "The nickname %s is registered; please choose another"),
    (MsgId::ChanNotRegistered, "Channel %s is not registered"),
    (MsgId::ChanAlreadyRegistered, "Channel %s is already registered"),
    (MsgId::ChanRegistered, "Channel %s registered"),
    (MsgId::ChanRegisterThrottled, "Channel registration is currently throttled, please try later"),
    (MsgId::ChanNotOpped, "You must be opped on %s"),
    (MsgId::ChanNotOnChannel, "You are not on %s"),
    (MsgId::ChanSuspended, "Channel %s is suspended: %s"),
    (MsgId::ChanNoAccess, "Insufficient access on %s"),
    (MsgId::ChanAccessAdded, "Added %s to %s with level %d"),
    (MsgId::ChanAccessRemoved, "Removed %s from %s"),
    (MsgId::ChanAccessChanged, "Changed %s on %s to level %d"),
    (MsgId::ChanAccessList, "Access list for %s:"),
    (MsgId::ChanAccessExists, "%s already has access to %s"),
    (MsgId::ChanAccessNotFound, "%s has no access to %s"),
    (MsgId::ChanBanAdded, "Added ban %s on %s"),
    (MsgId::ChanBanRemoved, "Removed ban %s on %s"),
    (MsgId::ChanBanExists, "Ban %s already set on %s"),
    (MsgId::ChanBanNotFound, "Ban %s not found on %s"),
    (MsgId::ChanBanHigher, "Ban %s is set at a higher level"),
    (MsgId::ChanBanListFull, "Ban list for %s is full"),
    (MsgId::ChanUnbanRefused, "A ban at or above your level was set against you on %s"),
    (MsgId::ChanDropped, "Channel %s dropped"),
    (MsgId::ChanOwnerTokenSent, "A confirmation token has been emailed to you"),
    (MsgId::ChanQueryOption, "%s::%s is set to: %s"),
    (MsgId::ChanTopicSet, "Topic on %s set"),
    (MsgId::ChanInvited, "Inviting you to %s"),
    (MsgId::ChanKeyIs, "Key for %s is: %s"),
    (MsgId::ChanCleared, "Cleared %s on %s"),
    (MsgId::ChanNotInChannel, "%s is not on %s"),
    (MsgId::ChanUserSuspended, "%s is suspended on %s"),
    (MsgId::ChanTakenOver, "Channel %s taken over"),
    (MsgId::BanAdded, "Added %s on %s"),
    (MsgId::BanRemoved, "Removed %s on %s"),
    (MsgId::BanExists, "%s is already banned"),
    (MsgId::BanNotFound, "No such ban %s"),
    (MsgId::BanTooManyMatches, "Mask %s matches %d users, refusing"),
    (MsgId::BanBadMask, "Mask %s is invalid"),
    (MsgId::BanBadRegex, "Regex %s is invalid"),
    (MsgId::BanNoPermBan, "You may not set permanent bans"),
    (MsgId::BanSynced, "Ban sync issued to %s"),
    (MsgId::MemoSent, "Memo sent to %s"),
    (MsgId::MemoNoMemos, "You have no memos"),
    (MsgId::MemoNotFound, "No memo %d"),
    (MsgId::MemoDeleted, "Memo %d deleted"),
    (MsgId::MemoTargetFull, "%s cannot receive more memos"),
    (MsgId::MemoTargetRefuses, "%s is not accepting memos"),
    (MsgId::MemoUnread, "You have %d unread memos"),
    (MsgId::JupeAdded, "Jupe for %s applied"),
    (MsgId::JupeRemoved, "Jupe for %s removed"),
    (MsgId::JupePending, "Vote recorded for %s, score %d of %d"),
    (MsgId::JupeAlready, "%s is already juped"),
    (MsgId::AlisHeader, "Returning maximum of %d channel names matching %s"),
    (MsgId::AlisEnd, "End of output"),
    (MsgId::AlisBadOption, "Invalid option %s"),
    (MsgId::GlobalWelcomeSet, "Welcome message %d set"),
    (MsgId::GlobalWelcomeDeleted, "Welcome message %d deleted"),
    (MsgId::GlobalWelcomeNotFound, "No welcome message %d"),
    (MsgId::OperLoggedIn, "Oper login successful"),
    (MsgId::OperLoggedOut, "Oper logout successful"),
    (MsgId::OperLoginFailed, "Oper login failed"),
];

/// A formatter argument. The validator guarantees translations consume
/// these in the same order and with the same types as the English base.
#[derive(Debug, Clone)]
pub enum LangArg<'a> {
    S(&'a str),
    N(i64),
    C(char),
}

/// Specifier types recognised by the parity checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct FmtSpec {
    kind: FmtKind,
    unsigned: bool,
    long: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum FmtKind {
    #[default]
    String,
    Char,
    Integer,
    Hex,
}

/// Walk a format string collecting its specifier sequence.
///
/// Returns `None` when the string contains a specifier we do not model;
/// such strings are rejected rather than guessed at.
fn fmt_parse(data: &str) -> Option<Vec<FmtSpec>> {
    let mut out = Vec::new();
    let mut parsing = false;
    let mut cur = FmtSpec::default();

    for c in data.chars() {
        if !parsing {
            if c == '%' {
                parsing = true;
                cur = FmtSpec::default();
            }
            continue;
        }

        match c {
            '%' => parsing = false,
            's' => {
                cur.kind = FmtKind::String;
                out.push(cur);
                parsing = false;
            }
            'l' => {
                cur.long = cur.long.saturating_add(1);
            }
            'd' | 'i' => {
                cur.kind = FmtKind::Integer;
                out.push(cur);
                parsing = false;
            }
            'u' => {
                cur.kind = FmtKind::Integer;
                cur.unsigned = true;
                out.push(cur);
                parsing = false;
            }
            'c' => {
                cur.kind = FmtKind::Char;
                out.push(cur);
                parsing = false;
            }
            'x' | 'X' => {
                cur.kind = FmtKind::Hex;
                cur.unsigned = true;
                out.push(cur);
                parsing = false;
            }
            '.' | '+' | '-' | '#' | '0'..='9' => {
                // Width and precision only make sense before length flags.
                if cur.long != 0 {
                    return None;
                }
            }
            _ => return None,
        }
    }

    Some(out)
}

/// Check that a translation's specifier sequence matches the base.
pub fn fmt_check(filename: &str, original: &str, translation: &str) -> bool {
    let Some(base) = fmt_parse(original) else {
        warn!(file = %filename, string = %original, "error parsing base format string");
        return false;
    };
    let Some(xlat) = fmt_parse(translation) else {
        warn!(file = %filename, string = %translation, "error parsing translated format string");
        return false;
    };

    if base != xlat {
        warn!(file = %filename, string = %translation, "translation format strings differ");
        return false;
    }
    true
}

/// Render a template against positional arguments.
///
/// Unknown specifiers emit nothing; missing arguments render as `*`.
/// Both cases are unreachable for strings that passed [`fmt_check`].
pub fn fmt_args(template: &str, args: &[LangArg<'_>]) -> String {
    let mut out = String::with_capacity(template.len() + 32);
    let mut argi = 0;
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }

        // Consume flags, width and length up to the conversion.
        let mut conv = None;
        for c in chars.by_ref() {
            match c {
                '%' => {
                    out.push('%');
                    break;
                }
                'l' | '.' | '+' | '-' | '#' | '0'..='9' => continue,
                other => {
                    conv = Some(other);
                    break;
                }
            }
        }

        let Some(conv) = conv else { continue };
        let arg = args.get(argi);
        argi += 1;
        match (conv, arg) {
            ('s', Some(LangArg::S(s))) => out.push_str(s),
            ('d' | 'i' | 'u', Some(LangArg::N(n))) => {
                let _ = write!(out, "{}", n);
            }
            ('x', Some(LangArg::N(n))) => {
                let _ = write!(out, "{:x}", n);
            }
            ('X', Some(LangArg::N(n))) => {
                let _ = write!(out, "{:X}", n);
            }
            ('c', Some(LangArg::C(c))) => out.push(*c),
            // Type mismatch or missing argument.
            (_, Some(LangArg::S(s))) => out.push_str(s),
            (_, Some(LangArg::N(n))) => {
                let _ = write!(out, "{}", n);
            }
            (_, Some(LangArg::C(c))) => out.push(*c),
            (_, None) => out.push('*'),
        }
    }

    out
}

/// The loaded catalogue: English base plus per-language overrides.
pub struct Catalogue {
    base: HashMap<u16, &'static str>,
    translations: HashMap<String, HashMap<u16, String>>,
    default_lang: String,
}

impl Catalogue {
    /// Build the catalogue with only the English base loaded.
    pub fn new(default_lang: &str) -> Self {
        Self {
            base: BASE.iter().map(|&(id, s)| (id as u16, s)).collect(),
            translations: HashMap::new(),
            default_lang: default_lang.to_string(),
        }
    }

    /// Load every `<code>.lang` file under `dir`.
    ///
    /// File format: one `<numeric id><space><template>` per line, `#`
    /// comments. Lines failing the parity check are dropped, everything
    /// else loads; a missing directory just means no translations.
    pub fn load_dir(&mut self, dir: impl AsRef<Path>) {
        let Ok(entries) = std::fs::read_dir(dir.as_ref()) else {
            return;
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("lang") {
                continue;
            }
            let Some(code) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match std::fs::read_to_string(&path) {
                Ok(raw) => self.load_translation(code, &path.display().to_string(), &raw),
                Err(e) => warn!(file = %path.display(), error = %e, "unreadable language file"),
            }
        }
    }

    /// Parse one translation file's contents.
    pub fn load_translation(&mut self, code: &str, filename: &str, raw: &str) {
        let mut table = HashMap::new();
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((id_str, text)) = line.split_once(' ') else {
                continue;
            };
            let Ok(id) = id_str.parse::<u16>() else {
                continue;
            };
            let Some(base) = self.base.get(&id) else {
                warn!(file = %filename, id, "translation for unknown message id");
                continue;
            };
            if !fmt_check(filename, base, text) {
                continue;
            }
            table.insert(id, text.to_string());
        }

        if !table.is_empty() {
            self.translations.insert(code.to_string(), table);
        }
    }

    /// Drop all translations, for rehash.
    pub fn clear_translations(&mut self) {
        self.translations.clear();
    }

    /// Language codes currently loaded, for INFO output.
    pub fn languages(&self) -> Vec<String> {
        self.translations.keys().cloned().collect()
    }

    /// Resolve a message template: requested language, then the default
    /// language, then the English base.
    pub fn text(&self, lang: &str, id: MsgId) -> &str {
        let key = id as u16;
        if let Some(s) = self.translations.get(lang).and_then(|t| t.get(&key)) {
            return s;
        }
        if let Some(s) = self
            .translations
            .get(&self.default_lang)
            .and_then(|t| t.get(&key))
        {
            return s;
        }
        self.base.get(&key).copied().unwrap_or("")
    }

    /// Resolve and render in one step.
    pub fn render(&self, lang: &str, id: MsgId, args: &[LangArg<'_>]) -> String {
        fmt_args(self.text(lang, id), args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_table_has_no_duplicates() {
        let mut seen = std::collections::HashSet::new();
        for &(id, _) in BASE {
            assert!(seen.insert(id as u16), "duplicate id {}", id as u16);
        }
    }

    #[test]
    fn parity_accepts_reworded_translation() {
        assert!(fmt_check(
            "t",
            "Added %s to %s with level %d",
            "%s wurde auf %s mit Stufe %d eingetragen"
        ));
    }

    #[test]
    fn parity_rejects_reordered_or_retyped_specifiers() {
        // Reordering is a mismatch: arguments are consumed positionally.
        assert!(!fmt_check("t", "Added %s to %s with level %d", "Niveau %d: %s auf %s"));
        assert!(!fmt_check("t", "Added %s to %s with level %d", "%s %d %d"));
        assert!(!fmt_check("t", "count %d", "count %s"));
        assert!(!fmt_check("t", "count %lu", "count %u"));
        assert!(!fmt_check("t", "count %u", "count %d"));
    }

    #[test]
    fn parity_handles_escaped_percent() {
        assert!(fmt_check("t", "100%% of %s", "%s bekommt 100%%"));
    }

    #[test]
    fn parity_rejects_width_after_length() {
        assert!(!fmt_check("t", "%l5d", "%l5d"));
    }

    #[test]
    fn formatting_substitutes_in_order() {
        let out = fmt_args(
            "Added %s to %s with level %d",
            &[LangArg::S("bob"), LangArg::S("#test"), LangArg::N(50)],
        );
        assert_eq!(out, "Added bob to #test with level 50");
    }

    #[test]
    fn formatting_hex_and_char() {
        assert_eq!(fmt_args("%x/%c", &[LangArg::N(255), LangArg::C('y')]), "ff/y");
    }

    #[test]
    fn fallback_chain() {
        let mut cat = Catalogue::new("de");
        cat.load_translation("de", "de.lang", "5 Kein Zugriff auf %s::%s\n");
        cat.load_translation("fr", "fr.lang", "6 Connexion requise pour %s::%s\n");

        // fr has id 6 but not 5: id 5 falls back to default (de).
        assert_eq!(cat.text("fr", MsgId::NoAccess), "Kein Zugriff auf %s::%s");
        // Neither has NeedMoreParams: falls back to English.
        assert_eq!(
            cat.text("fr", MsgId::NeedMoreParams),
            "Insufficient parameters to %s::%s"
        );
        assert_eq!(
            cat.text("fr", MsgId::NotLoggedIn),
            "Connexion requise pour %s::%s"
        );
    }

    #[test]
    fn bad_translations_are_dropped() {
        let mut cat = Catalogue::new("en");
        cat.load_translation("xx", "xx.lang", "5 Mangled %d only\n");
        assert_eq!(cat.text("xx", MsgId::NoAccess), "No access to %s::%s");
    }
}
