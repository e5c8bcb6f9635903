//! The Network - central shared state for the services daemon.
//!
//! One `Arc<Network>` is threaded through the whole system: the link
//! task, the service dispatcher, hook listeners, scheduled events and
//! the oper control channel all see the same context. Nothing lives in
//! statics.
//!
//! Mutation discipline: all uplink-driven state changes happen on the
//! link task, in arrival order. Sweepers touch registries through the
//! same locks. When taking more than one lock, take channel locks before
//! user locks and never iterate a table while holding a record lock.

pub mod channel;
pub mod client;
pub mod registry;

pub use channel::{Channel, ChannelRef, ChannelTable, Membership, Topic, CHFL_DEOP, CHFL_OPPED, CHFL_VOICED};
pub use client::{ClientTable, FloodCounter, OperSession, Server, ServerRef, User, UserRef, UMODE_INVISIBLE, UMODE_OPER};
pub use registry::*;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use svs_proto::UidSuffix;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::Config;
use crate::db::Database;
use crate::event::Scheduler;
use crate::hook::HookBus;
use crate::lang::Catalogue;
use crate::services::Service;

/// Link engine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Handshake,
    Bursting,
    Registered,
}

/// What we know about the connected uplink.
#[derive(Debug, Clone)]
pub struct Uplink {
    pub name: String,
    pub sid: Option<String>,
    /// Uplink advertised topic-burst capability.
    pub tb: bool,
    /// Uplink supports forced nick changes (RSFNC).
    pub rsfnc: bool,
}

/// Mutable link status.
pub struct LinkInfo {
    pub state: LinkState,
    pub uplink: Option<Uplink>,
    /// Connect block currently in use; `.connect` repoints this.
    pub connect_name: Option<String>,
}

/// Per-host rate window for registrations.
#[derive(Debug, Default, Clone)]
pub struct HostEntry {
    pub uregister_count: u32,
    pub uregister_expire: u64,
    pub cregister_count: u32,
    pub cregister_expire: u64,
}

/// A globally ignored host mask.
#[derive(Debug, Clone)]
pub struct IgnoreEntry {
    pub mask: String,
    pub oper: String,
    pub reason: String,
}

/// An oper control channel session, addressable for watch delivery.
pub struct DccSession {
    pub id: u64,
    pub addr: String,
    pub oper: RwLock<Option<OperSession>>,
    pub chat: std::sync::atomic::AtomicBool,
    pub tx: mpsc::UnboundedSender<String>,
}

/// Running counters reported by `.status` and STATS.
#[derive(Debug, Default)]
pub struct Stats {
    pub start_time: AtomicU64,
    pub lines_in: AtomicU64,
    pub lines_out: AtomicU64,
    pub bursts: AtomicU64,
}

/// Our own identity on the network.
#[derive(Debug, Clone)]
pub struct Me {
    pub name: String,
    pub sid: Option<String>,
    pub info: String,
}

/// The shared context.
pub struct Network {
    pub config: RwLock<Arc<Config>>,
    /// Path the config was loaded from, for rehash.
    pub config_path: String,
    pub db: Database,
    pub scheduler: Scheduler,
    pub hooks: HookBus,
    pub langs: RwLock<Catalogue>,

    /// Live IRC state from the uplink.
    pub clients: ClientTable,
    pub channels: ChannelTable,

    /// Registered accounts, nicks and channels.
    pub registry: Registry,

    /// Our virtual service clients, in registration order.
    pub services: RwLock<Vec<Arc<Service>>>,

    pub link: RwLock<LinkInfo>,
    out_tx: mpsc::UnboundedSender<String>,

    pub me: Me,
    uid_counter: AtomicU64,

    /// Host-keyed registration rate windows.
    pub hosts: dashmap::DashMap<String, HostEntry>,
    /// Global ignore masks.
    pub ignores: dashmap::DashMap<String, IgnoreEntry>,
    /// Active jupes: folded server name to reason.
    pub jupes: dashmap::DashMap<String, String>,
    /// Server-wide bans keyed by `type:mask`.
    pub operbans: dashmap::DashMap<String, crate::services::banserv::OperBan>,
    /// Compiled regex bans, evaluated on every new client.
    pub regex_bans: parking_lot::RwLock<Vec<crate::services::banserv::RegexBan>>,
    /// Numbered welcome messages sent to connecting clients.
    pub welcome: parking_lot::RwLock<Vec<(i64, String)>>,
    /// Oper control channel sessions by id.
    pub dcc_sessions: dashmap::DashMap<u64, Arc<DccSession>>,
    /// Oper control channel command table, kept sorted by name.
    pub dcc_commands: RwLock<Vec<crate::dcc::DccCommand>>,

    /// Mailbox-table handlers for the DB-hook dispatcher.
    pub db_hooks: crate::db::hooks::DbHooks,

    pub stats: Stats,
}

impl Network {
    /// Build the context. `out_rx` is handed to the link writer; tests
    /// keep it and assert on the emitted lines.
    pub fn new(
        config: Config,
        config_path: String,
        db: Database,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        let me = Me {
            name: config.serverinfo.name.clone(),
            sid: config.serverinfo.sid.clone(),
            info: config.serverinfo.description.clone(),
        };
        let mut langs = Catalogue::new(&config.serverinfo.default_language);
        langs.load_dir(&config.serverinfo.langdir);

        let net = Arc::new(Self {
            config: RwLock::new(Arc::new(config)),
            config_path,
            db,
            scheduler: Scheduler::new(),
            hooks: HookBus::new(),
            langs: RwLock::new(langs),
            clients: ClientTable::new(),
            channels: ChannelTable::new(),
            registry: Registry::new(),
            services: RwLock::new(Vec::new()),
            link: RwLock::new(LinkInfo {
                state: LinkState::Disconnected,
                uplink: None,
                connect_name: None,
            }),
            out_tx,
            me,
            uid_counter: AtomicU64::new(0),
            hosts: dashmap::DashMap::new(),
            ignores: dashmap::DashMap::new(),
            jupes: dashmap::DashMap::new(),
            operbans: dashmap::DashMap::new(),
            regex_bans: parking_lot::RwLock::new(Vec::new()),
            welcome: parking_lot::RwLock::new(Vec::new()),
            dcc_sessions: dashmap::DashMap::new(),
            dcc_commands: RwLock::new(Vec::new()),
            db_hooks: crate::db::hooks::DbHooks::new(),
            stats: Stats::default(),
        });
        net.stats
            .start_time
            .store(Self::epoch(), Ordering::Relaxed);
        (net, out_rx)
    }

    /// Wall-clock seconds, the timestamp domain of TS and the database.
    pub fn epoch() -> u64 {
        chrono::Utc::now().timestamp().max(0) as u64
    }

    /// Snapshot of the current config.
    pub fn conf(&self) -> Arc<Config> {
        self.config.read().clone()
    }

    /// Queue one line to the uplink. A dead link drops traffic; the
    /// burst after reconnect rebuilds anything that mattered.
    pub fn send(&self, line: impl Into<String>) {
        let line = line.into();
        debug!(target: "svsd::wire", out = %line);
        self.stats.lines_out.fetch_add(1, Ordering::Relaxed);
        let _ = self.out_tx.send(line);
    }

    /// Allocate the next service UID under our SID. `None` when we run
    /// without a SID (legacy uplink).
    pub fn next_uid(&self) -> Option<String> {
        let sid = self.me.sid.as_ref()?;
        let n = self.uid_counter.fetch_add(1, Ordering::Relaxed);
        Some(format!("{}{}", sid, UidSuffix::new(n).encode()))
    }

    /// True once the uplink finished bursting.
    pub fn is_registered(&self) -> bool {
        self.link.read().state == LinkState::Registered
    }

    /// Find one of our services by nick or UID, as PRIVMSG targets come
    /// off the wire (`svc`, `svc@server`, or UID).
    pub fn find_service(&self, target: &str) -> Option<Arc<Service>> {
        let bare = target.split('@').next().unwrap_or(target);
        let services = self.services.read();
        services
            .iter()
            .find(|s| {
                svs_proto::irc_eq(&s.nick, bare)
                    || s.uid.read().as_deref().is_some_and(|uid| uid == bare)
            })
            .cloned()
    }

    /// Find a service by its internal id.
    pub fn service_by_id(&self, id: &str) -> Option<Arc<Service>> {
        self.services.read().iter().find(|s| s.id == id).cloned()
    }

    /// Whether a shortcut target (`svc@server`) names us.
    pub fn target_is_ours(&self, target: &str) -> bool {
        match target.split_once('@') {
            Some((_, server)) => svs_proto::irc_eq(server, &self.me.name),
            None => true,
        }
    }

    /// Log a user out of its account, cutting both sides of the edge.
    pub fn logout_user(&self, user_ref: &UserRef) {
        let (key, account) = {
            let mut user = user_ref.write();
            let account = user.account.take();
            (user.key(), account)
        };
        if let Some(account) = account {
            if let Some(acc) = self.registry.find_account(&account) {
                acc.write().sessions.retain(|s| s != &key);
            }
        }
    }

    /// Exit a user: unlink account session, memberships and indices.
    /// Channels left empty are destroyed.
    pub fn exit_user(&self, user_ref: &UserRef) {
        self.logout_user(user_ref);

        let memberships: Vec<(String, Arc<Membership>)> = {
            let mut user = user_ref.write();
            user.channels.drain().collect()
        };
        for (chname, membership) in memberships {
            if let Some(chan) = self.channels.find(&chname) {
                chan.write().members.remove(&membership.user_key);
            }
            self.channels.destroy_if_empty(&chname);
        }

        self.clients.unlink_user(user_ref);
    }

    /// Exit a server and recursively everything behind it. Returns the
    /// folded names of all removed servers, depth first.
    pub fn exit_server(&self, name: &str) -> Vec<String> {
        let mut removed = Vec::new();
        let key = svs_proto::irc_to_lower(name);

        let Some((_, server)) = self.clients.servers.remove(&key) else {
            return removed;
        };

        let (sid, users, children) = {
            let server = server.read();
            (
                server.sid.clone(),
                server.users.iter().cloned().collect::<Vec<_>>(),
                server.servers.iter().cloned().collect::<Vec<_>>(),
            )
        };

        if let Some(sid) = sid {
            self.clients.sids.remove(&sid);
        }

        for child in children {
            removed.extend(self.exit_server(&child));
        }

        for user_key in users {
            if let Some(user) = self.clients.by_key(&user_key) {
                self.exit_user(&user);
            }
        }

        info!(server = %name, "server removed");
        removed.push(key);
        removed
    }

    /// Count live users matching a `user@host` wildcard, for the kline
    /// match-count guard.
    pub fn count_userhost_matches(&self, mask: &str) -> u32 {
        let mut count = 0;
        for entry in self.clients.by_nick.iter() {
            let user = entry.value().read();
            if svs_proto::match_mask(mask, &user.userhost()) {
                count += 1;
            }
        }
        count
    }
}
