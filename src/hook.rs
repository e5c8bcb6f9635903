//! Hook bus.
//!
//! Numbered hook points with ordered listener chains. Listeners run in
//! registration order; a listener returning [`HookResult::Veto`] stops
//! the chain. Registration happens once at init, dispatch happens on the
//! link task, so the listener lists are append-only after startup.

use std::sync::Arc;

use crate::state::Network;

/// Hook points. The numeric values are stable so watch output and logs
/// can reference them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum HookId {
    /// A channel's TS was lowered by SJOIN; registries re-assert state.
    ChannelLowerTs = 0,
    /// A user joined a channel (burst or live).
    ChannelJoin = 1,
    /// A simple mode change was applied to a channel.
    ChannelModeSimple = 2,
    /// A full mode parse finished, with batched op/voice/ban targets.
    ChannelModeFull = 3,
    /// A channel topic changed.
    ChannelTopic = 4,
    /// A new user was introduced by the uplink.
    NewClient = 5,
    /// A server was removed; fired once per server behind the split.
    ServerExit = 6,
    /// A server was introduced.
    ServerIntro = 7,
    /// A user logged in to an account.
    UserLogin = 8,
    /// The uplink finished its burst.
    EndOfBurst = 9,
    /// Periodic or operator-requested database writeback.
    DbSync = 10,
}

const HOOK_COUNT: usize = 11;

/// Listener outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookResult {
    Continue,
    Veto,
}

/// Event payloads handed to listeners.
#[derive(Debug)]
pub enum HookData {
    Channel {
        name: String,
    },
    ChannelTs {
        name: String,
        old_ts: u64,
        new_ts: u64,
    },
    Member {
        channel: String,
        uid: String,
    },
    ModeBatch {
        channel: String,
        opped: Vec<String>,
        voiced: Vec<String>,
        banned: Vec<String>,
    },
    Client {
        uid: String,
    },
    Server {
        name: String,
    },
    Login {
        uid: String,
        account: String,
    },
    Empty,
}

pub type HookFn = fn(&Arc<Network>, &HookData) -> HookResult;

/// The registered listener chains.
pub struct HookBus {
    chains: Vec<parking_lot::RwLock<Vec<HookFn>>>,
}

impl HookBus {
    pub fn new() -> Self {
        let mut chains = Vec::with_capacity(HOOK_COUNT);
        for _ in 0..HOOK_COUNT {
            chains.push(parking_lot::RwLock::new(Vec::new()));
        }
        Self { chains }
    }

    /// Append a listener to a hook's chain.
    pub fn add(&self, id: HookId, func: HookFn) {
        self.chains[id as usize].write().push(func);
    }

    /// Run a hook chain. Returns `Veto` when any listener vetoed.
    pub fn call(&self, net: &Arc<Network>, id: HookId, data: &HookData) -> HookResult {
        let chain = self.chains[id as usize].read();
        for func in chain.iter() {
            if func(net, data) == HookResult::Veto {
                return HookResult::Veto;
            }
        }
        HookResult::Continue
    }
}

impl Default for HookBus {
    fn default() -> Self {
        Self::new()
    }
}
