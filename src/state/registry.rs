//! Registered entities: accounts, nicknames, channels.
//!
//! These mirror the database tables and are the authoritative runtime
//! copy; rows are written through as operations happen and last-activity
//! is batched out by the DBSYNC writeback. Records carry a dirty bit
//! rather than writing on every touch.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use svs_proto::ChannelModes;

/// Access level bands. See `LEVEL_*` for what each unlocks.
pub const LEVEL_OWNER: u16 = 200;
pub const LEVEL_MANAGER: u16 = 190;
pub const LEVEL_USERLIST: u16 = 150;
pub const LEVEL_CLEAR: u16 = 140;
pub const LEVEL_SUSPEND: u16 = 100;
pub const LEVEL_OP: u16 = 50;
pub const LEVEL_REGULAR: u16 = 10;
pub const LEVEL_BASE: u16 = 1;

/// Account flag bits, as persisted.
pub const US_PRIVATE: u32 = 0x001;
pub const US_NEVERLOGGEDIN: u32 = 0x002;
pub const US_NOACCESS: u32 = 0x004;
pub const US_NOMEMOS: u32 = 0x008;

/// Registered-channel flag bits, as persisted.
pub const CF_NOOPS: u32 = 0x001;
pub const CF_AUTOJOIN: u32 = 0x002;
pub const CF_WARNOVERRIDE: u32 = 0x004;
pub const CF_RESTRICTOPS: u32 = 0x008;
pub const CF_NOVOICES: u32 = 0x010;
pub const CF_NOVOICECMD: u32 = 0x020;
pub const CF_NOUSERBANS: u32 = 0x040;

/// Registered-nick flag bits.
pub const NF_WARN: u32 = 0x001;

/// Member-access flag bits.
pub const MF_AUTOOP: u8 = 0x1;
pub const MF_AUTOVOICE: u8 = 0x2;

/// A suspension with optional timed expiry (0 = indefinite).
#[derive(Debug, Clone)]
pub struct Suspension {
    pub by: String,
    pub reason: String,
    /// Epoch second the suspension lapses, 0 for never.
    pub expires: u64,
}

impl Suspension {
    pub fn expired(&self, now: u64) -> bool {
        self.expires != 0 && self.expires <= now
    }
}

/// A registered account.
#[derive(Debug)]
pub struct RegAccount {
    /// Database row id.
    pub id: i64,
    /// Display-case name.
    pub name: String,
    pub pass_hash: String,
    pub email: Option<String>,
    pub suspend: Option<Suspension>,
    pub reg_time: u64,
    pub last_time: u64,
    pub flags: u32,
    pub language: String,
    /// Activation token while `US_NEVERLOGGEDIN` holds.
    pub verify_token: Option<String>,
    /// Table keys of live user-clients logged in to this account.
    pub sessions: Vec<String>,
    /// Folded channel names this account holds access on.
    pub channels: HashSet<String>,
    /// Folded nicknames registered to this account.
    pub nicks: HashSet<String>,
    /// Last-activity needs flushing by DBSYNC.
    pub dirty: bool,
}

impl RegAccount {
    pub fn is_suspended(&self) -> bool {
        self.suspend.is_some()
    }

    pub fn touch(&mut self, now: u64) {
        self.last_time = now;
        self.dirty = true;
    }
}

/// A registered nickname.
#[derive(Debug, Clone)]
pub struct RegNick {
    pub name: String,
    /// Folded account name.
    pub account: String,
    pub reg_time: u64,
    pub last_time: u64,
    pub flags: u32,
}

/// One account's access on one channel.
#[derive(Debug, Clone)]
pub struct MemberAccess {
    /// Display-case account name.
    pub account: String,
    /// 1..=200.
    pub level: u16,
    pub flags: u8,
    /// 0 when not suspended; otherwise the level the suspension was set
    /// at, which the suspender must outrank to lift it.
    pub suspend: u16,
    /// Who last modified this entry.
    pub lastmod: String,
    /// Channel `bants` value cached when a ban was bypassed on join.
    pub bants: u64,
}

impl MemberAccess {
    pub fn is_suspended(&self) -> bool {
        self.suspend != 0
    }

    /// Effective level: zero while suspended.
    pub fn effective(&self) -> u16 {
        if self.is_suspended() {
            0
        } else {
            self.level
        }
    }
}

/// A stored channel ban.
#[derive(Debug, Clone)]
pub struct StoredBan {
    /// Collapsed wildcard mask; unique per channel under folding.
    pub mask: String,
    pub reason: String,
    /// Account name of the setter.
    pub setter: String,
    /// Access at or above this level passes the ban.
    pub level: u16,
    /// Epoch expiry, 0 for permanent.
    pub expires: u64,
}

/// A registered channel.
#[derive(Debug)]
pub struct RegChannel {
    /// Display-case name.
    pub name: String,
    pub topic: Option<String>,
    pub url: Option<String>,
    pub suspend: Option<Suspension>,
    /// Applied when we create the channel ourselves.
    pub createmodes: ChannelModes,
    /// Continuously re-asserted.
    pub enforcemodes: ChannelModes,
    pub flags: u32,
    /// Stored channel TS the service joins with.
    pub ts: u64,
    pub reg_time: u64,
    pub last_time: u64,
    /// Bumped on every stored-ban mutation; access records cache it to
    /// decide whether UNBAN is safe.
    pub bants: u64,
    /// Access records by folded account name. Never empty: removing the
    /// last record destroys the channel.
    pub members: HashMap<String, MemberAccess>,
    /// Stored bans, unique per collapsed mask.
    pub bans: Vec<StoredBan>,
    /// Runtime: the service is holding the channel open.
    pub inhabit: bool,
    /// Runtime: needs writeback.
    pub dirty: bool,
}

impl RegChannel {
    pub fn is_suspended(&self) -> bool {
        self.suspend.is_some()
    }

    pub fn touch(&mut self, now: u64) {
        self.last_time = now;
        self.dirty = true;
    }

    /// Invalidate every cached `bants` by moving the channel's counter.
    pub fn bump_bants(&mut self) {
        self.bants = self.bants.wrapping_add(1);
    }

    /// The effective access level an account holds here.
    pub fn access_level(&self, folded_account: &str) -> u16 {
        self.members
            .get(folded_account)
            .map(|m| m.effective())
            .unwrap_or(0)
    }

    /// Find a stored ban by mask, fold-insensitively.
    pub fn find_ban(&self, mask: &str) -> Option<usize> {
        self.bans.iter().position(|b| svs_proto::irc_eq(&b.mask, mask))
    }

    /// Promote the highest remaining access holder to owner, preferring
    /// unsuspended entries. This is the only way a new owner appears.
    /// No-op when an owner already exists or the channel is empty.
    pub fn promote_owner(&mut self) {
        if self.members.values().any(|m| m.level == LEVEL_OWNER) {
            return;
        }
        let best = self
            .members
            .iter()
            .max_by_key(|(_, m)| (!m.is_suspended(), m.level))
            .map(|(k, _)| k.clone());
        if let Some(key) = best {
            if let Some(member) = self.members.get_mut(&key) {
                member.level = LEVEL_OWNER;
            }
        }
    }
}

pub type AccountRef = Arc<RwLock<RegAccount>>;
pub type RegChanRef = Arc<RwLock<RegChannel>>;

/// The three registries, all keyed by folded name.
pub struct Registry {
    pub accounts: dashmap::DashMap<String, AccountRef>,
    pub nicks: dashmap::DashMap<String, RegNick>,
    pub channels: dashmap::DashMap<String, RegChanRef>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            accounts: dashmap::DashMap::new(),
            nicks: dashmap::DashMap::new(),
            channels: dashmap::DashMap::new(),
        }
    }

    pub fn find_account(&self, name: &str) -> Option<AccountRef> {
        self.accounts
            .get(&svs_proto::irc_to_lower(name))
            .map(|a| a.value().clone())
    }

    pub fn find_channel(&self, name: &str) -> Option<RegChanRef> {
        self.channels
            .get(&svs_proto::irc_to_lower(name))
            .map(|c| c.value().clone())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(account: &str, level: u16, suspend: u16) -> MemberAccess {
        MemberAccess {
            account: account.to_string(),
            level,
            flags: 0,
            suspend,
            lastmod: "test".into(),
            bants: 0,
        }
    }

    fn reg_channel() -> RegChannel {
        RegChannel {
            name: "#test".into(),
            topic: None,
            url: None,
            suspend: None,
            createmodes: ChannelModes::default(),
            enforcemodes: ChannelModes::default(),
            flags: 0,
            ts: 1,
            reg_time: 0,
            last_time: 0,
            bants: 1,
            members: HashMap::new(),
            bans: Vec::new(),
            inhabit: false,
            dirty: false,
        }
    }

    #[test]
    fn promotion_prefers_unsuspended() {
        let mut chan = reg_channel();
        chan.members.insert("high".into(), member("high", 190, 50));
        chan.members.insert("low".into(), member("low", 150, 0));
        chan.promote_owner();

        assert_eq!(chan.members["low"].level, LEVEL_OWNER);
        assert_eq!(chan.members["high"].level, 190);
    }

    #[test]
    fn promotion_takes_highest_when_all_suspended() {
        let mut chan = reg_channel();
        chan.members.insert("a".into(), member("a", 190, 100));
        chan.members.insert("b".into(), member("b", 150, 100));
        chan.promote_owner();
        assert_eq!(chan.members["a"].level, LEVEL_OWNER);
    }

    #[test]
    fn promotion_noop_with_owner_present() {
        let mut chan = reg_channel();
        chan.members.insert("o".into(), member("o", LEVEL_OWNER, 0));
        chan.members.insert("m".into(), member("m", 190, 0));
        chan.promote_owner();
        assert_eq!(
            chan.members.values().filter(|m| m.level == LEVEL_OWNER).count(),
            1
        );
    }

    #[test]
    fn suspended_access_is_zero() {
        let m = member("x", 100, 100);
        assert_eq!(m.effective(), 0);
        let mut chan = reg_channel();
        chan.members.insert("x".into(), m);
        assert_eq!(chan.access_level("x"), 0);
    }

    #[test]
    fn suspension_expiry() {
        let s = Suspension {
            by: "oper".into(),
            reason: "spam".into(),
            expires: 100,
        };
        assert!(!s.expired(99));
        assert!(s.expired(100));
        let forever = Suspension {
            expires: 0,
            ..s.clone()
        };
        assert!(!forever.expired(u64::MAX));
    }
}
