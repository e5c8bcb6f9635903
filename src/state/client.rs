//! Clients: users and servers introduced by the uplink.
//!
//! A client is exactly one of server, user, or service. Services are our
//! own and live in the service registry; this module holds the remote
//! side. Users are indexed by folded nick and, when the uplink speaks
//! TS6, by UID. The table key of a user is its UID when it has one,
//! otherwise its folded nick; memberships and account sessions store
//! that key.
//!
//! Exit is two-phase: a client is marked dead and queued, indices are
//! dropped immediately, and the record itself is reaped at the top of
//! the next tick.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use svs_proto::irc_to_lower;

use super::channel::Membership;

/// User mode bits we track from the uplink.
pub const UMODE_INVISIBLE: u32 = 0x001;
pub const UMODE_OPER: u32 = 0x002;
pub const UMODE_ADMIN: u32 = 0x004;
pub const UMODE_SERVICE: u32 = 0x008;

/// A user introduced by NICK (pre-TS6) or UID.
#[derive(Debug)]
pub struct User {
    pub nick: String,
    pub username: String,
    pub host: String,
    /// IP string when the uplink supplied one (UID form).
    pub ip: Option<String>,
    /// Name of the server this user is on.
    pub servername: String,
    /// Composite `nick!user@host`, kept current across nick changes.
    pub mask: String,
    pub umodes: u32,
    pub ts: u64,
    pub uid: Option<String>,
    pub info: String,
    /// Folded name of the account this user is logged in to.
    pub account: Option<String>,
    /// Oper session attached by OLOGIN.
    pub oper: Option<OperSession>,
    /// Memberships, keyed by folded channel name. The same `Arc` lives
    /// in the channel's member table.
    pub channels: HashMap<String, Arc<Membership>>,
    /// Per-user command flood accounting.
    pub flood: FloodCounter,
    /// Marked by exit; a dead user ignores further messages.
    pub dead: bool,
}

impl User {
    /// The key this user is stored under in the client table.
    pub fn key(&self) -> String {
        match &self.uid {
            Some(uid) => uid.clone(),
            None => irc_to_lower(&self.nick),
        }
    }

    /// `user@host`, as matched against oper masks.
    pub fn userhost(&self) -> String {
        format!("{}@{}", self.username, self.host)
    }

    /// Rebuild the composite mask after a nick change.
    pub fn update_mask(&mut self) {
        self.mask = format!("{}!{}@{}", self.nick, self.username, self.host);
    }

    /// True when an oper session with all of `privs` is attached.
    pub fn has_priv(&self, privs: u64) -> bool {
        self.oper.as_ref().is_some_and(|o| o.privs & privs == privs)
    }
}

/// An authenticated oper attached to a user or DCC session.
#[derive(Debug, Clone)]
pub struct OperSession {
    /// Name from the operator block.
    pub name: String,
    /// Privilege bits, see [`crate::services::privs`].
    pub privs: u64,
    /// Subscribed watch flags.
    pub watchflags: u64,
}

/// Sliding-window flood accounting.
#[derive(Debug, Default)]
pub struct FloodCounter {
    pub count: u32,
    /// Scheduler second the current window started.
    pub window_start: u64,
}

impl FloodCounter {
    /// Reset the window if it has lapsed, then charge `cost`. Returns the
    /// count within the current window after charging.
    pub fn charge(&mut self, now: u64, window: u64, cost: u32) -> u32 {
        if now > self.window_start + window {
            self.window_start = now;
            self.count = 0;
        }
        self.count = self.count.saturating_add(cost);
        self.count
    }
}

/// A server on the network.
#[derive(Debug)]
pub struct Server {
    pub name: String,
    pub sid: Option<String>,
    pub info: String,
    pub hops: u32,
    /// Folded name of the server this one is linked behind; `None` for
    /// our direct uplink.
    pub uplink: Option<String>,
    /// Table keys of users on this server.
    pub users: HashSet<String>,
    /// Folded names of servers directly behind this one.
    pub servers: HashSet<String>,
    /// End-of-burst seen for this server.
    pub eob: bool,
}

pub type UserRef = Arc<RwLock<User>>;
pub type ServerRef = Arc<RwLock<Server>>;

/// The client tables.
pub struct ClientTable {
    /// Users by folded nick.
    pub by_nick: dashmap::DashMap<String, UserRef>,
    /// Users by UID, TS6 uplinks only.
    pub by_uid: dashmap::DashMap<String, UserRef>,
    /// Servers by folded name.
    pub servers: dashmap::DashMap<String, ServerRef>,
    /// Server SIDs to folded names.
    pub sids: dashmap::DashMap<String, String>,
    /// Dead records awaiting the next reap point.
    pub exit_queue: parking_lot::Mutex<Vec<UserRef>>,
}

impl ClientTable {
    pub fn new() -> Self {
        Self {
            by_nick: dashmap::DashMap::new(),
            by_uid: dashmap::DashMap::new(),
            servers: dashmap::DashMap::new(),
            sids: dashmap::DashMap::new(),
            exit_queue: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Insert a freshly introduced user into the indices.
    pub fn insert_user(&self, user: User) -> UserRef {
        let nick_key = irc_to_lower(&user.nick);
        let uid = user.uid.clone();
        let server_key = irc_to_lower(&user.servername);
        let table_key = user.key();

        let user_ref = Arc::new(RwLock::new(user));
        self.by_nick.insert(nick_key, user_ref.clone());
        if let Some(uid) = uid {
            self.by_uid.insert(uid, user_ref.clone());
        }
        if let Some(server) = self.servers.get(&server_key) {
            server.write().users.insert(table_key);
        }
        user_ref
    }

    /// Look a user up by UID or nick, as sources appear on the wire.
    pub fn find_user(&self, token: &str) -> Option<UserRef> {
        if let Some(user) = self.by_uid.get(token) {
            return Some(user.value().clone());
        }
        self.by_nick
            .get(&irc_to_lower(token))
            .map(|u| u.value().clone())
    }

    /// Look a user up by table key.
    pub fn by_key(&self, key: &str) -> Option<UserRef> {
        if let Some(user) = self.by_uid.get(key) {
            return Some(user.value().clone());
        }
        self.by_nick.get(key).map(|u| u.value().clone())
    }

    /// Look a server up by name or SID.
    pub fn find_server(&self, token: &str) -> Option<ServerRef> {
        if let Some(name) = self.sids.get(token) {
            return self.servers.get(name.value()).map(|s| s.value().clone());
        }
        self.servers
            .get(&irc_to_lower(token))
            .map(|s| s.value().clone())
    }

    /// Re-index a user after a nick change.
    pub fn rename_user(&self, user_ref: &UserRef, new_nick: &str) {
        let old_key = irc_to_lower(&user_ref.read().nick);
        let new_key = irc_to_lower(new_nick);
        if old_key != new_key {
            self.by_nick.remove(&old_key);
        }

        {
            let mut user = user_ref.write();
            user.nick = new_nick.to_string();
            user.update_mask();
        }
        self.by_nick.insert(new_key, user_ref.clone());
    }

    /// Mark a user dead and drop it from all indices. The membership
    /// teardown is the caller's job, since it needs the channel table.
    pub fn unlink_user(&self, user_ref: &UserRef) {
        let (nick_key, uid, server_key, table_key) = {
            let mut user = user_ref.write();
            if user.dead {
                return;
            }
            user.dead = true;
            (
                irc_to_lower(&user.nick),
                user.uid.clone(),
                irc_to_lower(&user.servername),
                user.key(),
            )
        };

        self.by_nick
            .remove_if(&nick_key, |_, v| Arc::ptr_eq(v, user_ref));
        if let Some(uid) = uid {
            self.by_uid.remove(&uid);
        }
        if let Some(server) = self.servers.get(&server_key) {
            server.write().users.remove(&table_key);
        }
        self.exit_queue.lock().push(user_ref.clone());
    }

    /// Release records queued by [`Self::unlink_user`].
    pub fn reap(&self) {
        self.exit_queue.lock().clear();
    }

    /// Count of live users, for stats and ban match counting.
    pub fn user_count(&self) -> usize {
        self.by_nick.len()
    }
}

impl Default for ClientTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_user(nick: &str, uid: Option<&str>) -> User {
        User {
            nick: nick.to_string(),
            username: "u".into(),
            host: "h".into(),
            ip: None,
            servername: "irc.example.net".into(),
            mask: format!("{}!u@h", nick),
            umodes: 0,
            ts: 1000,
            uid: uid.map(String::from),
            info: "test".into(),
            account: None,
            oper: None,
            channels: HashMap::new(),
            flood: FloodCounter::default(),
            dead: false,
        }
    }

    #[test]
    fn user_found_by_uid_and_nick() {
        let table = ClientTable::new();
        table.insert_user(test_user("Bob[1]", Some("36CAAAAAA")));

        assert!(table.find_user("36CAAAAAA").is_some());
        assert!(table.find_user("bob{1}").is_some());
        assert!(table.find_user("nobody").is_none());
    }

    #[test]
    fn unlink_is_idempotent_and_reaps() {
        let table = ClientTable::new();
        let user = table.insert_user(test_user("bob", Some("36CAAAAAB")));

        table.unlink_user(&user);
        table.unlink_user(&user);
        assert!(table.find_user("bob").is_none());
        assert_eq!(table.exit_queue.lock().len(), 1);

        table.reap();
        assert!(table.exit_queue.lock().is_empty());
    }

    #[test]
    fn rename_reindexes() {
        let table = ClientTable::new();
        let user = table.insert_user(test_user("bob", None));
        table.rename_user(&user, "robert");

        assert!(table.find_user("bob").is_none());
        let found = table.find_user("ROBERT").unwrap();
        assert_eq!(found.read().mask, "robert!u@h");
    }

    #[test]
    fn flood_window_resets() {
        let mut flood = FloodCounter::default();
        assert_eq!(flood.charge(0, 60, 1), 1);
        assert_eq!(flood.charge(30, 60, 1), 2);
        // Window lapsed.
        assert_eq!(flood.charge(100, 60, 1), 1);
    }
}
