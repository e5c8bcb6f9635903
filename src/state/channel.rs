//! Live channel state as reconstructed from the uplink.
//!
//! A membership record is shared between the user's channel map and the
//! channel's member map; both sides hold the same `Arc`, giving O(1)
//! unlink from either direction and making the symmetry invariant
//! checkable with a pointer comparison.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;
use svs_proto::{irc_eq, irc_to_lower, ChannelModes, CHANNELLEN};

/// Member is opped.
pub const CHFL_OPPED: u32 = 0x1;
/// Member is voiced.
pub const CHFL_VOICED: u32 = 0x2;
/// Member was deopped by enforcement and must not be re-opped.
pub const CHFL_DEOP: u32 = 0x4;

/// A user's presence in one channel.
#[derive(Debug)]
pub struct Membership {
    /// Folded channel name.
    pub channel: String,
    /// User table key (UID or folded nick).
    pub user_key: String,
    flags: AtomicU32,
}

impl Membership {
    pub fn new(channel: &str, user_key: &str, flags: u32) -> Arc<Self> {
        Arc::new(Self {
            channel: irc_to_lower(channel),
            user_key: user_key.to_string(),
            flags: AtomicU32::new(flags),
        })
    }

    pub fn flags(&self) -> u32 {
        self.flags.load(Ordering::Relaxed)
    }

    pub fn is_opped(&self) -> bool {
        self.flags() & CHFL_OPPED != 0
    }

    pub fn is_voiced(&self) -> bool {
        self.flags() & CHFL_VOICED != 0
    }

    pub fn set(&self, flag: u32) {
        self.flags.fetch_or(flag, Ordering::Relaxed);
    }

    pub fn clear(&self, flag: u32) {
        self.flags.fetch_and(!flag, Ordering::Relaxed);
    }

    pub fn reset(&self, flags: u32) {
        self.flags.store(flags, Ordering::Relaxed);
    }
}

/// Channel topic with attribution.
#[derive(Debug, Clone)]
pub struct Topic {
    pub text: String,
    pub setter: String,
    pub ts: u64,
}

/// A live channel.
#[derive(Debug)]
pub struct Channel {
    /// Display-case name.
    pub name: String,
    pub topic: Option<Topic>,
    /// Channel TS; all conflict arbitration keys off this.
    pub ts: u64,
    /// Members by user table key.
    pub members: HashMap<String, Arc<Membership>>,
    /// Service ids of our services sitting in the channel.
    pub services: HashSet<&'static str>,
    pub bans: Vec<String>,
    pub excepts: Vec<String>,
    pub invites: Vec<String>,
    pub modes: ChannelModes,
}

impl Channel {
    pub fn new(name: &str, ts: u64) -> Self {
        Self {
            name: name.to_string(),
            topic: None,
            ts,
            members: HashMap::new(),
            services: HashSet::new(),
            bans: Vec::new(),
            excepts: Vec::new(),
            invites: Vec::new(),
            modes: ChannelModes::default(),
        }
    }

    /// True when a mask is already on the given list, fold-insensitively.
    pub fn has_mask(list: &[String], mask: &str) -> bool {
        list.iter().any(|m| irc_eq(m, mask))
    }

    /// Add a mask unless already present. Returns whether it was added.
    pub fn add_mask(list: &mut Vec<String>, mask: &str) -> bool {
        if Self::has_mask(list, mask) {
            return false;
        }
        list.push(mask.to_string());
        true
    }

    /// Remove a mask fold-insensitively. Returns whether it was present.
    pub fn del_mask(list: &mut Vec<String>, mask: &str) -> bool {
        let before = list.len();
        list.retain(|m| !irc_eq(m, mask));
        before != list.len()
    }

    /// Wipe prefixes of all members, for lower-TS SJOIN.
    pub fn strip_prefixes(&self) {
        for member in self.members.values() {
            member.reset(0);
        }
    }

    /// Total occupants including services.
    pub fn occupancy(&self) -> usize {
        self.members.len() + self.services.len()
    }
}

pub type ChannelRef = Arc<RwLock<Channel>>;

/// The channel table, keyed by folded name.
pub struct ChannelTable {
    pub channels: dashmap::DashMap<String, ChannelRef>,
}

impl ChannelTable {
    pub fn new() -> Self {
        Self {
            channels: dashmap::DashMap::new(),
        }
    }

    /// Find an existing channel.
    pub fn find(&self, name: &str) -> Option<ChannelRef> {
        self.channels
            .get(&irc_to_lower(name))
            .map(|c| c.value().clone())
    }

    /// Find or create. Over-long names are refused, matching what the
    /// uplink should never send.
    pub fn get_or_create(&self, name: &str, ts: u64) -> Option<ChannelRef> {
        if name.len() > CHANNELLEN || !name.starts_with('#') {
            return None;
        }
        Some(
            self.channels
                .entry(irc_to_lower(name))
                .or_insert_with(|| Arc::new(RwLock::new(Channel::new(name, ts))))
                .value()
                .clone(),
        )
    }

    /// Drop a channel once it has no occupants.
    pub fn destroy_if_empty(&self, name: &str) {
        let key = irc_to_lower(name);
        self.channels
            .remove_if(&key, |_, c| c.read().occupancy() == 0);
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl Default for ChannelTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_list_is_fold_unique() {
        let mut list = Vec::new();
        assert!(Channel::add_mask(&mut list, "*!*@Evil.Example"));
        assert!(!Channel::add_mask(&mut list, "*!*@evil.example"));
        assert!(Channel::del_mask(&mut list, "*!*@EVIL.EXAMPLE"));
        assert!(list.is_empty());
    }

    #[test]
    fn membership_flags() {
        let member = Membership::new("#Test", "36CAAAAAA", CHFL_OPPED);
        assert!(member.is_opped());
        member.set(CHFL_VOICED);
        member.clear(CHFL_OPPED);
        assert!(member.is_voiced());
        assert!(!member.is_opped());
        assert_eq!(member.channel, "#test");
    }

    #[test]
    fn get_or_create_validates_names() {
        let table = ChannelTable::new();
        assert!(table.get_or_create("#ok", 5).is_some());
        assert!(table.get_or_create("nohash", 5).is_none());
        let long = format!("#{}", "a".repeat(CHANNELLEN + 1));
        assert!(table.get_or_create(&long, 5).is_none());
    }

    #[test]
    fn destroy_only_when_empty() {
        let table = ChannelTable::new();
        let chan = table.get_or_create("#x", 5).unwrap();
        chan.write()
            .members
            .insert("k".into(), Membership::new("#x", "k", 0));

        table.destroy_if_empty("#x");
        assert!(table.find("#x").is_some());

        chan.write().members.clear();
        table.destroy_if_empty("#x");
        assert!(table.find("#x").is_none());
    }
}
