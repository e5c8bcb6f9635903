//! The channel registry and access engine.
//!
//! Registered channels carry per-account access levels, stored bans with
//! levels, enforced modes and a stored topic. The service enforces all
//! of it from the link engine's hooks: join handling evaluates stored
//! bans and auto-status, mode hooks re-assert enforced modes and strip
//! forbidden status, the topic hook re-asserts stored topics, and the
//! lower-TS hook re-establishes everything after a netsplit rewind.
//!
//! The `bants` counter makes UNBAN safe without walking ban levels: a
//! member's cached value equal to the channel's means a ban at or above
//! their level was set against them and nothing has been removed since.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use svs_proto::{collapse, irc_to_lower, make_usermask, match_mask, ChannelModes};
use tracing::{info, warn};

use crate::hook::{HookData, HookId, HookResult};
use crate::lang::{LangArg, MsgId};
use crate::link::modebuild::{Dir, KickBuild, ModeBuild};
use crate::state::{
    MemberAccess, Network, RegChanRef, RegChannel, StoredBan, Suspension, CF_AUTOJOIN, CF_NOOPS,
    CF_NOUSERBANS, CF_NOVOICECMD, CF_NOVOICES, CF_RESTRICTOPS, CF_WARNOVERRIDE, CHFL_DEOP,
    CHFL_OPPED, CHFL_VOICED, LEVEL_BASE, LEVEL_CLEAR, LEVEL_MANAGER, LEVEL_OP, LEVEL_OWNER,
    LEVEL_REGULAR, LEVEL_SUSPEND, LEVEL_USERLIST,
};
use crate::watch;

use super::{privs, CmdCtx, CommandSpec, Service, ServiceHandler};

pub struct ChanServ {
    register_window: parking_lot::Mutex<(u64, u32)>,
}

static COMMANDS: &[CommandSpec] = &[
    CommandSpec { name: "ADDBAN", min_args: 4, flood: 1, need_login: true, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "ADDUSER", min_args: 3, flood: 1, need_login: true, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "CDROP", min_args: 1, flood: 1, need_login: false, oper_only: true, oper_priv: privs::CHAN_ADMIN },
    CommandSpec { name: "CLEARALLBANS", min_args: 1, flood: 2, need_login: true, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "CLEARMODES", min_args: 1, flood: 2, need_login: true, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "CLEAROPS", min_args: 1, flood: 2, need_login: true, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "CSUSPEND", min_args: 3, flood: 1, need_login: false, oper_only: true, oper_priv: privs::CHAN_ADMIN },
    CommandSpec { name: "CUNSUSPEND", min_args: 1, flood: 1, need_login: false, oper_only: true, oper_priv: privs::CHAN_ADMIN },
    CommandSpec { name: "DELBAN", min_args: 2, flood: 1, need_login: true, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "DELOWNER", min_args: 1, flood: 2, need_login: true, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "DELUSER", min_args: 2, flood: 1, need_login: true, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "DEOP", min_args: 1, flood: 1, need_login: true, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "DEVOICE", min_args: 1, flood: 1, need_login: true, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "GETKEY", min_args: 1, flood: 1, need_login: true, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "INFO", min_args: 1, flood: 2, need_login: false, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "INVITE", min_args: 1, flood: 1, need_login: true, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "LISTBANS", min_args: 1, flood: 3, need_login: true, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "LISTUSERS", min_args: 1, flood: 3, need_login: true, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "MODBAN", min_args: 3, flood: 1, need_login: true, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "MODUSER", min_args: 3, flood: 1, need_login: true, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "OP", min_args: 1, flood: 1, need_login: true, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "REGISTER", min_args: 1, flood: 5, need_login: true, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "SET", min_args: 2, flood: 1, need_login: true, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "SUSPEND", min_args: 2, flood: 1, need_login: true, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "TOPIC", min_args: 2, flood: 1, need_login: true, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "UNBAN", min_args: 1, flood: 1, need_login: true, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "UNSUSPEND", min_args: 2, flood: 1, need_login: true, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "VOICE", min_args: 1, flood: 1, need_login: true, oper_only: false, oper_priv: 0 },
];

/// Create and register the service, its hooks and its events.
pub fn init(net: &Arc<Network>, help_root: &str) -> Arc<Service> {
    let conf = net.conf();
    let cs = &conf.services.chanserv;
    let handler = Arc::new(ChanServ {
        register_window: parking_lot::Mutex::new((0, 0)),
    });
    let svc = Service::build("chanserv", &cs.identity, handler, help_root);
    super::register(net, svc.clone());

    net.hooks.add(HookId::ChannelJoin, h_join);
    net.hooks.add(HookId::ChannelModeFull, h_mode_full);
    net.hooks.add(HookId::ChannelModeSimple, h_mode_simple);
    net.hooks.add(HookId::ChannelLowerTs, h_lower_ts);
    net.hooks.add(HookId::ChannelTopic, h_topic);
    net.hooks.add(HookId::UserLogin, h_login);
    net.hooks.add(HookId::EndOfBurst, h_eob);

    net.scheduler.add("chanserv_expire", e_expire, 900);
    if cs.expireban_frequency > 0 {
        net.scheduler.add("chanserv_expirebans", e_expire_bans, cs.expireban_frequency);
    }
    if cs.enforcetopic_frequency > 0 {
        net.scheduler.add("chanserv_enforce", e_enforce, cs.enforcetopic_frequency);
    }
    net.scheduler.add("chanserv_partinhabit", e_part_inhabit, 300);

    svc
}

/// Load registered channels, access lists and stored bans at startup.
pub async fn load(net: &Arc<Network>) -> Result<(), crate::db::DbError> {
    let rows = net.db.channels().load_all().await?;
    let count = rows.len();
    for row in rows {
        let suspend = row.suspender.as_ref().map(|by| Suspension {
            by: by.clone(),
            reason: row.suspend_reason.clone().unwrap_or_default(),
            expires: row.suspend_time.max(0) as u64,
        });
        let reg = RegChannel {
            name: row.chname.clone(),
            topic: row.topic,
            url: row.url,
            suspend,
            createmodes: parse_stored_modes(row.createmodes.as_deref()),
            enforcemodes: parse_stored_modes(row.enforcemodes.as_deref()),
            flags: row.flags as u32,
            ts: row.tsinfo.max(0) as u64,
            reg_time: row.reg_time.max(0) as u64,
            last_time: row.last_time.max(0) as u64,
            bants: 1,
            members: HashMap::new(),
            bans: Vec::new(),
            inhabit: false,
            dirty: false,
        };
        net.registry.channels.insert(
            irc_to_lower(&row.chname),
            Arc::new(parking_lot::RwLock::new(reg)),
        );
    }

    for member in net.db.channels().load_all_members().await? {
        let chan_key = irc_to_lower(&member.chname);
        let account_key = irc_to_lower(&member.username);
        if let Some(reg) = net.registry.channels.get(&chan_key) {
            reg.write().members.insert(
                account_key.clone(),
                MemberAccess {
                    account: member.username.clone(),
                    level: member.level.clamp(0, i64::from(LEVEL_OWNER)) as u16,
                    flags: member.flags as u8,
                    suspend: member.suspend.clamp(0, i64::from(LEVEL_OWNER)) as u16,
                    lastmod: member.lastmod.unwrap_or_default(),
                    bants: 0,
                },
            );
        }
        if let Some(account) = net.registry.accounts.get(&account_key) {
            account.write().channels.insert(chan_key);
        }
    }

    for ban in net.db.channels().load_all_bans().await? {
        if let Some(reg) = net.registry.channels.get(&irc_to_lower(&ban.chname)) {
            reg.write().bans.push(StoredBan {
                mask: ban.mask,
                reason: ban.reason,
                setter: ban.username,
                level: ban.level.clamp(0, i64::from(LEVEL_OWNER)) as u16,
                expires: ban.hold.max(0) as u64,
            });
        }
    }

    info!(channels = count, "channel registry loaded");
    Ok(())
}

fn parse_stored_modes(raw: Option<&str>) -> ChannelModes {
    let Some(raw) = raw else {
        return ChannelModes::default();
    };
    let mut parts = raw.split_whitespace();
    let modestr = parts.next().unwrap_or("");
    let args: Vec<&str> = parts.collect();
    ChannelModes::parse(modestr, &args)
}

// --- wire helpers --------------------------------------------------------

/// Header for a modebuild against a live channel.
fn mode_header(net: &Arc<Network>, svc: &Arc<Service>, chan_name: &str, chan_ts: u64) -> String {
    match &net.me.sid {
        Some(_) => format!(":{} TMODE {} {}", svc.source_token(net), chan_ts, chan_name),
        None => format!(":{} MODE {}", svc.source_token(net), chan_name),
    }
}

/// Emit a batched set of mode lines.
fn send_lines(net: &Arc<Network>, lines: Vec<String>) {
    for line in lines {
        net.send(line);
    }
}

/// Clear a lapsed channel suspension: the channel gets a fresh activity
/// window and the cleared state is written through. Callable from hook
/// context; the write lands off the hook path.
fn lift_expired_suspend(net: &Arc<Network>, reg_ref: &RegChanRef) {
    let now = Network::epoch();
    let name = {
        let mut reg = reg_ref.write();
        reg.suspend = None;
        reg.last_time = now;
        // Written through below; nothing left for DBSYNC to flush.
        reg.dirty = false;
        reg.name.clone()
    };

    let db = net.db.clone();
    tokio::spawn(async move {
        let _ = db.channels().set_suspend(&name, None, None, 0).await;
        let _ = db
            .channels()
            .flush_activity(&[(name, now as i64)])
            .await;
    });
}

/// Join the service into a channel to hold its TS open.
fn enable_inhabit(net: &Arc<Network>, svc: &Arc<Service>, reg_ref: &RegChanRef, autojoin: bool) {
    let (name, ts, modes) = {
        let mut reg = reg_ref.write();
        reg.inhabit = !autojoin;
        let mut modes = reg.enforcemodes.clone();
        if modes.is_empty() {
            modes = reg.createmodes.clone();
        }
        (reg.name.clone(), reg.ts, modes)
    };
    super::service_join(net, svc, &name, ts, &modes);
}

// --- hook listeners ------------------------------------------------------

/// Join enforcement: stored bans, activity, status policy, autojoin,
/// auto-status.
fn h_join(net: &Arc<Network>, data: &HookData) -> HookResult {
    let HookData::Member { channel, uid } = data else {
        return HookResult::Continue;
    };
    let Some(svc) = net.service_by_id("chanserv") else {
        return HookResult::Continue;
    };
    let Some(reg_ref) = net.registry.channels.get(channel).map(|r| r.value().clone()) else {
        return HookResult::Continue;
    };
    let Some(chan_ref) = net.channels.find(channel) else {
        return HookResult::Continue;
    };
    let Some(user_ref) = net.clients.by_key(uid) else {
        return HookResult::Continue;
    };

    // Lazily clear expired suspensions; a suspended channel enforces
    // nothing.
    let now = Network::epoch();
    if reg_ref.read().suspend.as_ref().is_some_and(|s| s.expired(now)) {
        lift_expired_suspend(net, &reg_ref);
    }
    if reg_ref.read().suspend.is_some() {
        return HookResult::Continue;
    }

    let (user_mask, account) = {
        let user = user_ref.read();
        (user.mask.clone(), user.account.clone())
    };

    // The member's unsuspended access, if any.
    let access = account.as_deref().and_then(|acc| {
        let reg = reg_ref.read();
        reg.members
            .get(acc)
            .filter(|m| !m.is_suspended())
            .map(|m| m.level)
    });

    let (chan_name, chan_ts) = {
        let chan = chan_ref.read();
        (chan.name.clone(), chan.ts)
    };
    let mut build = ModeBuild::start(mode_header(net, &svc, &chan_name, chan_ts));

    // Step 1: stored bans in order. A bypassed ban does not stop the
    // walk; a channel exception ends it with nothing enforced.
    let mut enforceable: Option<StoredBan> = None;
    let mut bypassed = false;
    {
        let reg = reg_ref.read();
        for ban in reg.bans.iter() {
            if ban.expires != 0 && ban.expires <= now {
                continue;
            }
            if !match_mask(&ban.mask, &user_mask) {
                continue;
            }
            if access.is_some_and(|level| level >= ban.level) {
                bypassed = true;
                continue;
            }
            let exempt = {
                let chan = chan_ref.read();
                chan.excepts.iter().any(|e| match_mask(e, &user_mask))
            };
            if exempt {
                break;
            }
            enforceable = Some(ban.clone());
            break;
        }
    }

    // Either outcome pins the member's view of the ban list.
    if (bypassed || enforceable.is_some()) && access.is_some() {
        if let Some(acc) = account.as_deref() {
            let mut reg = reg_ref.write();
            let bants = reg.bants;
            if let Some(member) = reg.members.get_mut(acc) {
                member.bants = bants;
            }
        }
    }

    if let Some(ban) = enforceable {
        let last_user = {
            let mut chan = chan_ref.write();
            let member = chan.members.get(uid).cloned();
            if let Some(member) = &member {
                if member.is_opped() {
                    build.add(Dir::Del, 'o', Some(uid));
                }
            }
            if !crate::state::Channel::has_mask(&chan.bans, &ban.mask) {
                chan.bans.push(ban.mask.clone());
                build.add(Dir::Add, 'b', Some(&ban.mask));
            }
            chan.members.len() == 1
        };

        if last_user {
            enable_inhabit(net, &svc, &reg_ref, false);
        }

        let mut kicks = KickBuild::start(&svc.source_token(net), &chan_name, &ban.reason);
        kicks.add(uid);

        // Take the member out of our state; the kick does it on the
        // network.
        chan_ref.write().members.remove(uid);
        user_ref.write().channels.remove(channel);

        send_lines(net, build.finish());
        send_lines(net, kicks.finish());
        return HookResult::Veto;
    }

    // Step 2: access holders keep the channel alive.
    if access.is_some() {
        reg_ref.write().touch(now);
    }

    let flags = reg_ref.read().flags;
    let membership = chan_ref.read().members.get(uid).cloned();
    let Some(membership) = membership else {
        return HookResult::Continue;
    };

    let mut stripped_op = false;

    // Step 3: status policy.
    if membership.is_opped()
        && (flags & CF_NOOPS != 0
            || (flags & CF_RESTRICTOPS != 0 && access.unwrap_or(0) < LEVEL_OP))
    {
        if chan_ref.read().members.len() == 1 {
            enable_inhabit(net, &svc, &reg_ref, false);
        }
        build.add(Dir::Del, 'o', Some(uid));
        membership.clear(CHFL_OPPED);
        membership.set(CHFL_DEOP);
        stripped_op = true;

        if flags & CF_WARNOVERRIDE != 0 {
            watch::send(net, watch::WATCH_CHANSERV, &user_mask, &format!("deopped on {}", chan_name));
        }
    }

    if membership.is_voiced() && flags & CF_NOVOICES != 0 {
        build.add(Dir::Del, 'v', Some(uid));
        membership.clear(CHFL_VOICED);
    }

    // Step 4: autojoin puts the service in the channel.
    if flags & CF_AUTOJOIN != 0 && !chan_ref.read().services.contains("chanserv") {
        enable_inhabit(net, &svc, &reg_ref, true);
    }

    // Step 5: auto-status for access holders.
    if !stripped_op {
        if let (Some(acc), Some(level)) = (account.as_deref(), access) {
            let member_flags = reg_ref
                .read()
                .members
                .get(acc)
                .map(|m| m.flags)
                .unwrap_or(0);
            if member_flags & crate::state::MF_AUTOOP != 0
                && level >= LEVEL_OP
                && flags & CF_NOOPS == 0
                && !membership.is_opped()
            {
                build.add(Dir::Add, 'o', Some(uid));
                membership.clear(CHFL_DEOP);
                membership.set(CHFL_OPPED);
            } else if member_flags & crate::state::MF_AUTOVOICE != 0
                && !membership.is_voiced()
                && flags & CF_NOVOICES == 0
            {
                build.add(Dir::Add, 'v', Some(uid));
                membership.set(CHFL_VOICED);
            }
        }
    }

    send_lines(net, build.finish());
    HookResult::Continue
}

/// Enforcement against batched op/voice grants from the wire.
fn h_mode_full(net: &Arc<Network>, data: &HookData) -> HookResult {
    let HookData::ModeBatch {
        channel,
        opped,
        voiced,
        ..
    } = data
    else {
        return HookResult::Continue;
    };
    let Some(svc) = net.service_by_id("chanserv") else {
        return HookResult::Continue;
    };
    let Some(reg_ref) = net.registry.channels.get(channel).map(|r| r.value().clone()) else {
        return HookResult::Continue;
    };
    let Some(chan_ref) = net.channels.find(channel) else {
        return HookResult::Continue;
    };

    let reg = reg_ref.read();
    if reg.suspend.is_some() {
        return HookResult::Continue;
    }
    let flags = reg.flags;
    drop(reg);

    let (chan_name, chan_ts) = {
        let chan = chan_ref.read();
        (chan.name.clone(), chan.ts)
    };
    let mut build = ModeBuild::start(mode_header(net, &svc, &chan_name, chan_ts));

    for uid in opped {
        let level = member_level(net, &reg_ref, uid);
        let strip = flags & CF_NOOPS != 0
            || (flags & CF_RESTRICTOPS != 0 && level < LEVEL_OP);
        if strip {
            if let Some(member) = chan_ref.read().members.get(uid) {
                build.add(Dir::Del, 'o', Some(uid));
                member.clear(CHFL_OPPED);
                member.set(CHFL_DEOP);
            }
        }
    }

    if flags & CF_NOVOICES != 0 {
        for uid in voiced {
            if let Some(member) = chan_ref.read().members.get(uid) {
                build.add(Dir::Del, 'v', Some(uid));
                member.clear(CHFL_VOICED);
            }
        }
    }

    send_lines(net, build.finish());
    HookResult::Continue
}

/// The effective access level of the user behind a membership key.
fn member_level(net: &Arc<Network>, reg_ref: &RegChanRef, uid: &str) -> u16 {
    let Some(user_ref) = net.clients.by_key(uid) else {
        return 0;
    };
    let account = user_ref.read().account.clone();
    let Some(account) = account else {
        return 0;
    };
    reg_ref.read().access_level(&account)
}

/// Merge enforced modes back in after a simple mode change.
fn h_mode_simple(net: &Arc<Network>, data: &HookData) -> HookResult {
    let HookData::Channel { name } = data else {
        return HookResult::Continue;
    };
    enforce_modes(net, name);
    HookResult::Continue
}

fn enforce_modes(net: &Arc<Network>, name: &str) {
    let Some(svc) = net.service_by_id("chanserv") else {
        return;
    };
    let Some(reg_ref) = net.registry.channels.get(name).map(|r| r.value().clone()) else {
        return;
    };
    let Some(chan_ref) = net.channels.find(name) else {
        return;
    };

    let reg = reg_ref.read();
    if reg.suspend.is_some() || reg.enforcemodes.is_empty() {
        return;
    }
    let enforce = reg.enforcemodes.clone();
    drop(reg);

    let delta = {
        let mut chan = chan_ref.write();
        let delta = enforce.missing_from(&chan.modes);
        if delta.is_some() {
            chan.modes.merge(&enforce);
        }
        delta
    };

    if let Some(delta) = delta {
        let (chan_name, chan_ts) = {
            let chan = chan_ref.read();
            (chan.name.clone(), chan.ts)
        };
        net.send(format!(
            "{} {}",
            mode_header(net, &svc, &chan_name, chan_ts),
            delta
        ));
    }
}

/// A netsplit rejoin rewound the channel TS: re-assert and remember it.
fn h_lower_ts(net: &Arc<Network>, data: &HookData) -> HookResult {
    let HookData::ChannelTs { name, new_ts, .. } = data else {
        return HookResult::Continue;
    };
    let Some(reg_ref) = net.registry.channels.get(name).map(|r| r.value().clone()) else {
        return HookResult::Continue;
    };

    let display_name = {
        let mut reg = reg_ref.write();
        reg.ts = *new_ts;
        reg.dirty = true;
        reg.name.clone()
    };

    // Stored TS is part of the takeover defence; persist it promptly.
    let db = net.db.clone();
    let ts = *new_ts as i64;
    tokio::spawn(async move {
        if let Err(e) = db.channels().update_tsinfo(&display_name, ts).await {
            warn!(error = %e, "tsinfo writeback failed");
        }
    });

    enforce_modes(net, name);
    enforce_topic(net, name);
    HookResult::Continue
}

/// Topic changed on the wire; re-assert the stored one when configured
/// for immediate enforcement.
fn h_topic(net: &Arc<Network>, data: &HookData) -> HookResult {
    let HookData::Channel { name } = data else {
        return HookResult::Continue;
    };
    if net.conf().services.chanserv.enforcetopic_frequency == 0 {
        enforce_topic(net, name);
    }
    HookResult::Continue
}

fn enforce_topic(net: &Arc<Network>, name: &str) {
    let Some(svc) = net.service_by_id("chanserv") else {
        return;
    };
    let Some(reg_ref) = net.registry.channels.get(name).map(|r| r.value().clone()) else {
        return;
    };
    let Some(chan_ref) = net.channels.find(name) else {
        return;
    };

    let stored = {
        let reg = reg_ref.read();
        if reg.suspend.is_some() {
            return;
        }
        reg.topic.clone()
    };
    let Some(stored) = stored else {
        return;
    };

    let (chan_name, differs, present) = {
        let chan = chan_ref.read();
        let differs = chan.topic.as_ref().map(|t| t.text.as_str()) != Some(stored.as_str());
        (chan.name.clone(), differs, chan.services.contains("chanserv"))
    };
    if !differs || !present {
        return;
    }

    net.send(format!(
        ":{} TOPIC {} :{}",
        svc.source_token(net),
        chan_name,
        stored
    ));
    if let Some(chan_ref) = net.channels.find(name) {
        chan_ref.write().topic = Some(crate::state::Topic {
            text: stored,
            setter: svc.nick.clone(),
            ts: Network::epoch(),
        });
    }
}

/// A user logged in: touch channels they hold access on and hand out
/// auto-status where they are present.
fn h_login(net: &Arc<Network>, data: &HookData) -> HookResult {
    let HookData::Login { uid, account } = data else {
        return HookResult::Continue;
    };
    let Some(svc) = net.service_by_id("chanserv") else {
        return HookResult::Continue;
    };
    let Some(user_ref) = net.clients.by_key(uid) else {
        return HookResult::Continue;
    };

    let now = Network::epoch();
    let channels: Vec<String> = user_ref.read().channels.keys().cloned().collect();

    for chan_key in channels {
        let Some(reg_ref) = net.registry.channels.get(&chan_key).map(|r| r.value().clone())
        else {
            continue;
        };
        if reg_ref.read().suspend.as_ref().is_some_and(|s| s.expired(now)) {
            lift_expired_suspend(net, &reg_ref);
        }
        if reg_ref.read().suspend.is_some() {
            continue;
        }

        let (level, member_flags) = {
            let reg = reg_ref.read();
            match reg.members.get(account).filter(|m| !m.is_suspended()) {
                Some(m) => (m.level, m.flags),
                None => continue,
            }
        };

        reg_ref.write().touch(now);

        let Some(chan_ref) = net.channels.find(&chan_key) else {
            continue;
        };
        let membership = chan_ref.read().members.get(uid).cloned();
        let Some(membership) = membership else {
            continue;
        };
        let flags = reg_ref.read().flags;
        let (chan_name, chan_ts) = {
            let chan = chan_ref.read();
            (chan.name.clone(), chan.ts)
        };
        let mut build = ModeBuild::start(mode_header(net, &svc, &chan_name, chan_ts));

        if member_flags & crate::state::MF_AUTOOP != 0
            && level >= LEVEL_OP
            && flags & CF_NOOPS == 0
            && !membership.is_opped()
        {
            build.add(Dir::Add, 'o', Some(uid));
            membership.set(CHFL_OPPED);
        } else if member_flags & crate::state::MF_AUTOVOICE != 0
            && !membership.is_voiced()
            && flags & CF_NOVOICES == 0
        {
            build.add(Dir::Add, 'v', Some(uid));
            membership.set(CHFL_VOICED);
        }

        send_lines(net, build.finish());
    }
    HookResult::Continue
}

/// Burst finished: put the service in its channels, topics included
/// when the uplink can take a burst topic.
fn h_eob(net: &Arc<Network>, _data: &HookData) -> HookResult {
    let Some(svc) = net.service_by_id("chanserv") else {
        return HookResult::Continue;
    };
    let tb = net.link.read().uplink.as_ref().map(|u| u.tb).unwrap_or(false);

    let regs: Vec<RegChanRef> = net
        .registry
        .channels
        .iter()
        .map(|r| r.value().clone())
        .collect();

    for reg_ref in regs {
        let (name, flags, suspended, ts, topic) = {
            let reg = reg_ref.read();
            (
                reg.name.clone(),
                reg.flags,
                reg.suspend.is_some(),
                reg.ts,
                reg.topic.clone(),
            )
        };
        if suspended || flags & CF_AUTOJOIN == 0 {
            continue;
        }
        let present = net
            .channels
            .find(&name)
            .map(|c| c.read().services.contains("chanserv"))
            .unwrap_or(false);
        if present {
            continue;
        }

        enable_inhabit(net, &svc, &reg_ref, true);

        if tb {
            if let Some(topic) = topic {
                net.send(format!(
                    ":{} TB {} {} {} :{}",
                    net.me.sid.as_deref().unwrap_or(&net.me.name),
                    name,
                    ts,
                    svc.nick,
                    topic
                ));
            }
        }
    }
    HookResult::Continue
}

// --- events --------------------------------------------------------------

/// Channel expiry with the age bonus and the presence check.
fn e_expire(net: Arc<Network>) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        let conf = net.conf();
        let cs = conf.services.chanserv.clone();
        let now = Network::epoch();

        let mut doomed: Vec<String> = Vec::new();
        for entry in net.registry.channels.iter() {
            let key = entry.key().clone();
            let reg_ref = entry.value().clone();

            // A lapsed suspension lifts with a fresh activity window;
            // this channel is not a candidate until the next scan.
            if reg_ref.read().suspend.as_ref().is_some_and(|s| s.expired(now)) {
                lift_expired_suspend(&net, &reg_ref);
                continue;
            }

            let expire = {
                let reg = reg_ref.read();
                if reg.suspend.is_some() {
                    cs.expire_suspended_time != 0
                        && reg.last_time + cs.expire_suspended_time <= now
                } else if cs.expire_time == 0 {
                    false
                } else {
                    let bonus = super::userserv::expire_bonus(
                        now.saturating_sub(reg.reg_time),
                        cs.expire_bonus_regtime,
                        cs.expire_bonus_per_time,
                        cs.expire_bonus,
                        cs.expire_bonus_max,
                    );
                    reg.last_time + cs.expire_time + bonus <= now
                }
            };
            if !expire {
                continue;
            }

            // An access holder sitting in the channel saves it.
            let holder_present = net.channels.find(&key).is_some_and(|chan_ref| {
                let chan = chan_ref.read();
                let reg = reg_ref.read();
                chan.members.keys().any(|uid| {
                    net.clients
                        .by_key(uid)
                        .and_then(|u| u.read().account.clone())
                        .is_some_and(|acc| reg.members.contains_key(&acc))
                })
            });
            if holder_present {
                reg_ref.write().touch(now);
                continue;
            }

            doomed.push(key);
        }

        for key in doomed {
            info!(channel = %key, "channel expired");
            destroy_channel(&net, &key).await;
        }
    })
}

/// Reap expired stored bans; every removal bumps `bants`.
fn e_expire_bans(net: Arc<Network>) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        let now = Network::epoch();
        let regs: Vec<RegChanRef> = net
            .registry
            .channels
            .iter()
            .map(|r| r.value().clone())
            .collect();

        for reg_ref in regs {
            let removed: Vec<StoredBan> = {
                let mut reg = reg_ref.write();
                let before = reg.bans.len();
                let (dead, keep): (Vec<StoredBan>, Vec<StoredBan>) = reg
                    .bans
                    .drain(..)
                    .partition(|b| b.expires != 0 && b.expires <= now);
                reg.bans = keep;
                if reg.bans.len() != before {
                    reg.bump_bants();
                }
                dead
            };

            if removed.is_empty() {
                continue;
            }
            let name = reg_ref.read().name.clone();
            for ban in removed {
                let _ = net.db.channels().delete_ban(&name, &ban.mask).await;
            }
        }
    })
}

/// Periodic topic and mode enforcement scan.
fn e_enforce(net: Arc<Network>) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        let keys: Vec<String> = net
            .registry
            .channels
            .iter()
            .map(|r| r.key().clone())
            .collect();
        for key in keys {
            enforce_topic(&net, &key);
            enforce_modes(&net, &key);
        }
    })
}

/// Part inhabited channels that no longer need holding, and autojoin
/// channels that emptied when the policy says not to stay.
fn e_part_inhabit(net: Arc<Network>) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        let Some(svc) = net.service_by_id("chanserv") else {
            return;
        };
        let autojoin_empty = net.conf().services.chanserv.autojoin_empty;

        let channels: Vec<String> = svc.channels.read().iter().cloned().collect();
        for key in channels {
            let Some(reg_ref) = net.registry.channels.get(&key).map(|r| r.value().clone())
            else {
                continue;
            };
            let occupied = net
                .channels
                .find(&key)
                .map(|c| !c.read().members.is_empty())
                .unwrap_or(false);

            let (inhabit, autojoin, name) = {
                let reg = reg_ref.read();
                (reg.inhabit, reg.flags & CF_AUTOJOIN != 0, reg.name.clone())
            };

            if inhabit && occupied {
                // Someone came back; the TS is safe now.
                reg_ref.write().inhabit = false;
                if !autojoin {
                    super::service_part(&net, &svc, &name, "");
                }
            } else if autojoin && !occupied && !autojoin_empty && !inhabit {
                super::service_part(&net, &svc, &name, "");
            }
        }
    })
}

/// Flush dirty last-activity stamps in one transaction, with the
/// bounded retry the writeback contract allows.
pub async fn flush_dirty(net: &Arc<Network>) {
    let mut updates: Vec<(String, i64)> = Vec::new();
    for entry in net.registry.channels.iter() {
        let mut reg = entry.value().write();
        if reg.dirty {
            reg.dirty = false;
            updates.push((reg.name.clone(), reg.last_time as i64));
        }
    }

    let result = net
        .db
        .with_retry(|pool| {
            let updates = updates.clone();
            async move {
                crate::db::ChannelRepository::new(&pool)
                    .flush_activity(&updates)
                    .await
            }
        })
        .await;
    if let Err(e) = result {
        warn!(error = %e, "channel activity flush failed");
    }
}

// --- cross-registry surgery ----------------------------------------------

/// Remove one account's access from a channel, maintaining the owner
/// and non-empty invariants. Called by DELUSER, DELOWNER and account
/// drops.
pub async fn remove_access_of(net: &Arc<Network>, chan_key: &str, account_key: &str) {
    let Some(reg_ref) = net.registry.channels.get(chan_key).map(|r| r.value().clone()) else {
        return;
    };

    let (display_chan, removed, empty) = {
        let mut reg = reg_ref.write();
        let removed = reg.members.remove(account_key);
        let empty = reg.members.is_empty();
        if !empty {
            reg.promote_owner();
        }
        (reg.name.clone(), removed, empty)
    };

    let Some(removed) = removed else {
        return;
    };

    if let Some(account) = net.registry.accounts.get(account_key) {
        account.write().channels.remove(chan_key);
    }
    let _ = net
        .db
        .channels()
        .delete_member(&display_chan, &removed.account)
        .await;

    if empty {
        destroy_channel(net, chan_key).await;
    } else {
        // Promotion may have changed a row; write the new owner through.
        let owner = {
            let reg = reg_ref.read();
            reg.members
                .values()
                .find(|m| m.level == LEVEL_OWNER)
                .cloned()
        };
        if let Some(owner) = owner {
            let _ = net
                .db
                .channels()
                .upsert_member(
                    &display_chan,
                    &owner.account,
                    &owner.lastmod,
                    i64::from(owner.level),
                    i64::from(owner.flags),
                    i64::from(owner.suspend),
                )
                .await;
        }
    }
}

/// Tear down a registered channel completely.
pub async fn destroy_channel(net: &Arc<Network>, chan_key: &str) {
    let Some((_, reg_ref)) = net.registry.channels.remove(chan_key) else {
        return;
    };
    let (display_name, members) = {
        let reg = reg_ref.read();
        (
            reg.name.clone(),
            reg.members.keys().cloned().collect::<Vec<_>>(),
        )
    };
    for account_key in members {
        if let Some(account) = net.registry.accounts.get(&account_key) {
            account.write().channels.remove(chan_key);
        }
    }
    let _ = net.db.channels().delete(&display_name).await;

    if let Some(svc) = net.service_by_id("chanserv") {
        if svc.channels.read().contains(chan_key) {
            super::service_part(net, &svc, &display_name, "");
        }
    }
}

/// Admin takeover: rewind the TS below the current one, clear modes and
/// bans, and re-establish the service with full control.
pub async fn takeover(net: &Arc<Network>, chan_key: &str) -> bool {
    let Some(svc) = net.service_by_id("chanserv") else {
        return false;
    };
    let Some(reg_ref) = net.registry.channels.get(chan_key).map(|r| r.value().clone()) else {
        return false;
    };

    let live_ts = net
        .channels
        .find(chan_key)
        .map(|c| c.read().ts)
        .unwrap_or_else(Network::epoch);
    let new_ts = live_ts.saturating_sub(1).max(1);

    let (name, modes) = {
        let mut reg = reg_ref.write();
        reg.ts = new_ts;
        reg.dirty = true;
        let mut modes = reg.enforcemodes.clone();
        if modes.is_empty() {
            modes = reg.createmodes.clone();
        }
        (reg.name.clone(), modes)
    };

    // Joining at the lower TS wipes modes, bans and prefixes on the
    // network; our local SJOIN mirror does the same.
    super::service_join(net, &svc, &name, new_ts, &modes);
    let _ = net.db.channels().update_tsinfo(&name, new_ts as i64).await;
    true
}

// --- command implementation ----------------------------------------------

/// Verified caller context for a channel command.
struct Verified {
    reg: RegChanRef,
    level: u16,
    account_key: String,
    account_display: String,
}

impl ChanServ {
    /// Resolve the caller's access on a channel, at or above
    /// `min_level`, refusing suspended channels and members.
    fn verify(
        &self,
        net: &Arc<Network>,
        svc: &Arc<Service>,
        ctx: &CmdCtx,
        chname: &str,
        min_level: u16,
    ) -> Option<Verified> {
        let chan_key = irc_to_lower(chname);
        let Some(reg_ref) = net.registry.channels.get(&chan_key).map(|r| r.value().clone())
        else {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanNotRegistered, &[LangArg::S(chname)]);
            return None;
        };

        let now = Network::epoch();
        if reg_ref.read().suspend.as_ref().is_some_and(|s| s.expired(now)) {
            lift_expired_suspend(net, &reg_ref);
        }
        if let Some(suspend) = reg_ref.read().suspend.clone() {
            svc.msg(
                net,
                &ctx.user,
                &ctx.lang,
                MsgId::ChanSuspended,
                &[LangArg::S(chname), LangArg::S(&suspend.reason)],
            );
            return None;
        }

        let account_key = ctx.account.clone()?;
        let member = reg_ref.read().members.get(&account_key).cloned();
        let Some(member) = member.filter(|m| !m.is_suspended() && m.level >= min_level) else {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanNoAccess, &[LangArg::S(chname)]);
            return None;
        };

        Some(Verified {
            reg: reg_ref,
            level: member.level,
            account_key,
            account_display: member.account,
        })
    }

    /// Both registration rate windows, counting the attempt.
    fn register_throttled(&self, net: &Arc<Network>, host: &str) -> bool {
        let conf = net.conf();
        let cs = &conf.services.chanserv;
        let now = Network::epoch();

        {
            let mut window = self.register_window.lock();
            if now > window.0 + cs.register_time {
                *window = (now, 0);
            }
            window.1 += 1;
            if window.1 > cs.register_amount {
                return true;
            }
        }

        let mut entry = net.hosts.entry(host.to_string()).or_default();
        if now > entry.cregister_expire {
            entry.cregister_expire = now + cs.hregister_time;
            entry.cregister_count = 0;
        }
        entry.cregister_count += 1;
        entry.cregister_count > cs.hregister_amount
    }
}

#[async_trait]
impl ServiceHandler for ChanServ {
    fn commands(&self) -> &'static [CommandSpec] {
        COMMANDS
    }

    async fn handle(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        match ctx.cmd.as_str() {
            "REGISTER" => self.cmd_register(net, svc, ctx).await,
            "SET" => self.cmd_set(net, svc, ctx).await,
            "ADDUSER" => self.cmd_adduser(net, svc, ctx).await,
            "DELUSER" => self.cmd_deluser(net, svc, ctx).await,
            "MODUSER" => self.cmd_moduser(net, svc, ctx).await,
            "LISTUSERS" => self.cmd_listusers(net, svc, ctx),
            "SUSPEND" => self.cmd_member_suspend(net, svc, ctx, true).await,
            "UNSUSPEND" => self.cmd_member_suspend(net, svc, ctx, false).await,
            "ADDBAN" => self.cmd_addban(net, svc, ctx).await,
            "DELBAN" => self.cmd_delban(net, svc, ctx).await,
            "MODBAN" => self.cmd_modban(net, svc, ctx).await,
            "LISTBANS" => self.cmd_listbans(net, svc, ctx),
            "UNBAN" => self.cmd_unban(net, svc, ctx),
            "OP" | "DEOP" | "VOICE" | "DEVOICE" => self.cmd_status(net, svc, ctx),
            "INVITE" => self.cmd_invite(net, svc, ctx),
            "GETKEY" => self.cmd_getkey(net, svc, ctx),
            "TOPIC" => self.cmd_topic(net, svc, ctx).await,
            "CLEARMODES" => self.cmd_clearmodes(net, svc, ctx),
            "CLEAROPS" => self.cmd_clearops(net, svc, ctx),
            "CLEARALLBANS" => self.cmd_clearallbans(net, svc, ctx),
            "DELOWNER" => self.cmd_delowner(net, svc, ctx).await,
            "INFO" => self.cmd_info(net, svc, ctx),
            "CSUSPEND" => self.cmd_admin_suspend(net, svc, ctx, true).await,
            "CUNSUSPEND" => self.cmd_admin_suspend(net, svc, ctx, false).await,
            "CDROP" => self.cmd_cdrop(net, svc, ctx).await,
            _ => 1,
        }
    }
}

impl ChanServ {
    async fn cmd_register(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let chname = ctx.arg(0).to_string();
        let chan_key = irc_to_lower(&chname);

        if net.registry.channels.contains_key(&chan_key) {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanAlreadyRegistered, &[LangArg::S(&chname)]);
            return 1;
        }

        // Caller must be opped in the live channel.
        let Some(chan_ref) = net.channels.find(&chan_key) else {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanNotOnChannel, &[LangArg::S(&chname)]);
            return 1;
        };
        let (uid, host) = {
            let user = ctx.user.read();
            (user.key(), user.host.clone())
        };
        let opped = chan_ref
            .read()
            .members
            .get(&uid)
            .map(|m| m.is_opped())
            .unwrap_or(false);
        if !opped {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanNotOpped, &[LangArg::S(&chname)]);
            return 1;
        }

        if self.register_throttled(net, &host) {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanRegisterThrottled, &[]);
            return 2;
        }

        let account_key = ctx.account.clone().unwrap_or_default();
        let account_display = net
            .registry
            .find_account(&account_key)
            .map(|a| a.read().name.clone())
            .unwrap_or_else(|| account_key.clone());

        let (display_name, ts) = {
            let chan = chan_ref.read();
            (chan.name.clone(), chan.ts)
        };
        let now = Network::epoch();
        let createmodes = ChannelModes::parse("+nt", &[]);

        if let Err(e) = net
            .db
            .channels()
            .insert(&display_name, &account_display, ts as i64, &createmodes.to_string(), now as i64)
            .await
        {
            warn!(error = %e, channel = %display_name, "channel insert failed");
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanAlreadyRegistered, &[LangArg::S(&chname)]);
            return 1;
        }

        let mut members = HashMap::new();
        members.insert(
            account_key.clone(),
            MemberAccess {
                account: account_display.clone(),
                level: LEVEL_OWNER,
                flags: 0,
                suspend: 0,
                lastmod: account_display.clone(),
                bants: 0,
            },
        );
        let reg = RegChannel {
            name: display_name.clone(),
            topic: None,
            url: None,
            suspend: None,
            createmodes,
            enforcemodes: ChannelModes::default(),
            flags: 0,
            ts,
            reg_time: now,
            last_time: now,
            bants: 1,
            members,
            bans: Vec::new(),
            inhabit: false,
            dirty: false,
        };
        net.registry
            .channels
            .insert(chan_key.clone(), Arc::new(parking_lot::RwLock::new(reg)));
        if let Some(account) = net.registry.accounts.get(&account_key) {
            account.write().channels.insert(chan_key);
        }

        svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanRegistered, &[LangArg::S(&display_name)]);
        let mask = ctx.user.read().mask.clone();
        watch::send(net, watch::WATCH_CHANSERV, &mask, &format!("REGISTER {}", display_name));
        info!(channel = %display_name, owner = %account_display, "channel registered");
        3
    }

    async fn cmd_set(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let chname = ctx.arg(0).to_string();
        let Some(v) = self.verify(net, svc, ctx, &chname, LEVEL_MANAGER) else {
            return 1;
        };
        let option = ctx.arg(1).to_ascii_uppercase();
        let value = ctx.rest(2);
        let on = matches!(value.to_ascii_uppercase().as_str(), "ON" | "YES" | "1");

        let flag = match option.as_str() {
            "NOOPS" => Some(CF_NOOPS),
            "AUTOJOIN" => Some(CF_AUTOJOIN),
            "WARNOVERRIDE" => Some(CF_WARNOVERRIDE),
            "RESTRICTOPS" => Some(CF_RESTRICTOPS),
            "NOVOICES" => Some(CF_NOVOICES),
            "NOVOICECMD" => Some(CF_NOVOICECMD),
            "NOUSERBANS" => Some(CF_NOUSERBANS),
            _ => None,
        };

        {
            let mut reg = v.reg.write();
            match option.as_str() {
                "URL" => reg.url = (!value.is_empty()).then(|| value.clone()),
                "TOPIC" => reg.topic = (!value.is_empty()).then(|| value.clone()),
                "CREATEMODES" => {
                    let parts: Vec<&str> = value.split_whitespace().collect();
                    reg.createmodes = if parts.is_empty() {
                        ChannelModes::default()
                    } else {
                        ChannelModes::parse(parts[0], &parts[1..])
                    };
                }
                "ENFORCEMODES" => {
                    let parts: Vec<&str> = value.split_whitespace().collect();
                    reg.enforcemodes = if parts.is_empty() {
                        ChannelModes::default()
                    } else {
                        ChannelModes::parse(parts[0], &parts[1..])
                    };
                }
                _ => {
                    let Some(flag) = flag else {
                        drop(reg);
                        svc.msg(net, &ctx.user, &ctx.lang, MsgId::NoAccess, &[LangArg::S(&svc.nick), LangArg::S(&option)]);
                        return 1;
                    };
                    if on {
                        reg.flags |= flag;
                    } else {
                        reg.flags &= !flag;
                    }
                }
            }
        }

        // Write the whole settable surface back in one statement.
        let (name, topic, url, create, enforce, flags) = {
            let reg = v.reg.read();
            (
                reg.name.clone(),
                reg.topic.clone(),
                reg.url.clone(),
                reg.createmodes.to_string(),
                reg.enforcemodes.to_string(),
                i64::from(reg.flags),
            )
        };
        let _ = net
            .db
            .channels()
            .update_settings(&name, topic.as_deref(), url.as_deref(), &create, &enforce, flags)
            .await;

        // Newly enforced modes take effect immediately.
        if option == "ENFORCEMODES" {
            enforce_modes(net, &irc_to_lower(&chname));
        }
        if option == "TOPIC" {
            enforce_topic(net, &irc_to_lower(&chname));
        }

        let shown = if flag.is_some() {
            if on { "ON".to_string() } else { "OFF".to_string() }
        } else {
            value
        };
        svc.msg(
            net,
            &ctx.user,
            &ctx.lang,
            MsgId::ChanQueryOption,
            &[LangArg::S(&name), LangArg::S(&option), LangArg::S(&shown)],
        );
        1
    }

    async fn cmd_adduser(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let chname = ctx.arg(0).to_string();
        let Some(v) = self.verify(net, svc, ctx, &chname, LEVEL_USERLIST) else {
            return 1;
        };
        let target = ctx.arg(1).to_string();
        let Ok(level) = ctx.arg(2).parse::<u16>() else {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::NeedMoreParams, &[LangArg::S(&svc.nick), LangArg::S("ADDUSER")]);
            return 1;
        };

        if level < LEVEL_BASE || level >= v.level {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanNoAccess, &[LangArg::S(&chname)]);
            return 1;
        }

        let Some(target_ref) = net.registry.find_account(&target) else {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserNotFound, &[LangArg::S(&target)]);
            return 1;
        };
        let (target_key, target_display, refuses) = {
            let acc = target_ref.read();
            (
                irc_to_lower(&acc.name),
                acc.name.clone(),
                acc.flags & crate::state::US_NOACCESS != 0,
            )
        };
        if refuses {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanAccessExists, &[LangArg::S(&target_display), LangArg::S(&chname)]);
            return 1;
        }

        {
            let mut reg = v.reg.write();
            if reg.members.contains_key(&target_key) {
                drop(reg);
                svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanAccessExists, &[LangArg::S(&target_display), LangArg::S(&chname)]);
                return 1;
            }
            reg.members.insert(
                target_key.clone(),
                MemberAccess {
                    account: target_display.clone(),
                    level,
                    flags: 0,
                    suspend: 0,
                    lastmod: v.account_display.clone(),
                    bants: 0,
                },
            );
        }
        target_ref.write().channels.insert(irc_to_lower(&chname));

        let display_chan = v.reg.read().name.clone();
        let _ = net
            .db
            .channels()
            .upsert_member(&display_chan, &target_display, &v.account_display, i64::from(level), 0, 0)
            .await;

        svc.msg(
            net,
            &ctx.user,
            &ctx.lang,
            MsgId::ChanAccessAdded,
            &[LangArg::S(&target_display), LangArg::S(&display_chan), LangArg::N(i64::from(level))],
        );
        1
    }

    async fn cmd_deluser(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let chname = ctx.arg(0).to_string();
        let Some(v) = self.verify(net, svc, ctx, &chname, LEVEL_USERLIST) else {
            return 1;
        };
        let target_key = irc_to_lower(ctx.arg(1));

        let target = v.reg.read().members.get(&target_key).cloned();
        let Some(target) = target else {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanAccessNotFound, &[LangArg::S(ctx.arg(1)), LangArg::S(&chname)]);
            return 1;
        };
        if target.level >= v.level {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanNoAccess, &[LangArg::S(&chname)]);
            return 1;
        }

        remove_access_of(net, &irc_to_lower(&chname), &target_key).await;
        svc.msg(
            net,
            &ctx.user,
            &ctx.lang,
            MsgId::ChanAccessRemoved,
            &[LangArg::S(&target.account), LangArg::S(&chname)],
        );
        1
    }

    async fn cmd_moduser(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let chname = ctx.arg(0).to_string();
        let Some(v) = self.verify(net, svc, ctx, &chname, LEVEL_USERLIST) else {
            return 1;
        };
        let target_key = irc_to_lower(ctx.arg(1));
        let arg = ctx.arg(2).to_ascii_uppercase();

        let target = v.reg.read().members.get(&target_key).cloned();
        let Some(target) = target else {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanAccessNotFound, &[LangArg::S(ctx.arg(1)), LangArg::S(&chname)]);
            return 1;
        };
        if target.level >= v.level && target_key != v.account_key {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanNoAccess, &[LangArg::S(&chname)]);
            return 1;
        }

        // Resolve a numeric level up front so errors never hold the lock.
        let new_level = match arg.as_str() {
            "AUTOOP" | "AUTOVOICE" | "NONE" => None,
            level_str => {
                let parsed = level_str.parse::<u16>().ok().filter(|&level| {
                    level >= LEVEL_BASE && level < v.level && target_key != v.account_key
                });
                let Some(level) = parsed else {
                    svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanNoAccess, &[LangArg::S(&chname)]);
                    return 1;
                };
                Some(level)
            }
        };

        let updated = {
            let mut reg = v.reg.write();
            let Some(member) = reg.members.get_mut(&target_key) else {
                return 1;
            };
            match (arg.as_str(), new_level) {
                ("AUTOOP", _) => {
                    member.flags ^= crate::state::MF_AUTOOP;
                    member.flags &= !crate::state::MF_AUTOVOICE;
                }
                ("AUTOVOICE", _) => {
                    member.flags ^= crate::state::MF_AUTOVOICE;
                    member.flags &= !crate::state::MF_AUTOOP;
                }
                ("NONE", _) => member.flags = 0,
                (_, Some(level)) => member.level = level,
                (_, None) => {}
            }
            member.lastmod = v.account_display.clone();
            member.clone()
        };

        let display_chan = v.reg.read().name.clone();
        let _ = net
            .db
            .channels()
            .upsert_member(
                &display_chan,
                &updated.account,
                &updated.lastmod,
                i64::from(updated.level),
                i64::from(updated.flags),
                i64::from(updated.suspend),
            )
            .await;
        svc.msg(
            net,
            &ctx.user,
            &ctx.lang,
            MsgId::ChanAccessChanged,
            &[LangArg::S(&updated.account), LangArg::S(&display_chan), LangArg::N(i64::from(updated.level))],
        );
        1
    }

    fn cmd_listusers(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let chname = ctx.arg(0).to_string();
        let Some(v) = self.verify(net, svc, ctx, &chname, LEVEL_REGULAR) else {
            return 1;
        };

        svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanAccessList, &[LangArg::S(&chname)]);
        let mut members: Vec<MemberAccess> = v.reg.read().members.values().cloned().collect();
        members.sort_by(|a, b| b.level.cmp(&a.level));
        for member in members {
            let suspended = if member.is_suspended() {
                format!(" [suspended {}]", member.suspend)
            } else {
                String::new()
            };
            svc.notice(
                net,
                &ctx.user,
                &format!("  {} {}{} [mod: {}]", member.account, member.level, suspended, member.lastmod),
            );
        }
        3
    }

    async fn cmd_member_suspend(
        &self,
        net: &Arc<Network>,
        svc: &Arc<Service>,
        ctx: &mut CmdCtx,
        on: bool,
    ) -> u16 {
        let chname = ctx.arg(0).to_string();
        let Some(v) = self.verify(net, svc, ctx, &chname, LEVEL_SUSPEND) else {
            return 1;
        };
        let target_key = irc_to_lower(ctx.arg(1));

        // Validate against a snapshot so refusals never hold the lock.
        let target = v.reg.read().members.get(&target_key).cloned();
        let Some(target) = target else {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanAccessNotFound, &[LangArg::S(ctx.arg(1)), LangArg::S(&chname)]);
            return 1;
        };
        if target.level >= v.level || (!on && target.suspend > v.level) {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanNoAccess, &[LangArg::S(&chname)]);
            return 1;
        }

        let updated = {
            let mut reg = v.reg.write();
            let Some(member) = reg.members.get_mut(&target_key) else {
                return 1;
            };
            // Lifting needs at least the level the suspension was set at.
            member.suspend = if on { v.level } else { 0 };
            member.lastmod = v.account_display.clone();
            member.clone()
        };

        let display_chan = v.reg.read().name.clone();
        let _ = net
            .db
            .channels()
            .upsert_member(
                &display_chan,
                &updated.account,
                &updated.lastmod,
                i64::from(updated.level),
                i64::from(updated.flags),
                i64::from(updated.suspend),
            )
            .await;
        svc.msg(
            net,
            &ctx.user,
            &ctx.lang,
            MsgId::ChanUserSuspended,
            &[LangArg::S(&updated.account), LangArg::S(&display_chan)],
        );
        1
    }

    async fn cmd_addban(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let chname = ctx.arg(0).to_string();
        let Some(v) = self.verify(net, svc, ctx, &chname, LEVEL_REGULAR) else {
            return 1;
        };

        if v.reg.read().flags & CF_NOUSERBANS != 0 && v.level < LEVEL_CLEAR {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanNoAccess, &[LangArg::S(&chname)]);
            return 1;
        }

        let mask = collapse(&make_usermask(ctx.arg(1)));
        let Ok(level) = ctx.arg(2).parse::<u16>() else {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::NeedMoreParams, &[LangArg::S(&svc.nick), LangArg::S("ADDBAN")]);
            return 1;
        };
        // Optional leading duration before the reason.
        let (expires, reason) = match svs_proto::parse_duration(ctx.arg(3)) {
            Some(secs) if secs > 0 && ctx.args.len() > 4 => {
                (Network::epoch() + secs, ctx.rest(4))
            }
            _ => (0, ctx.rest(3)),
        };

        if level > v.level {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanBanHigher, &[LangArg::S(&mask)]);
            return 1;
        }

        let max_bans = net.conf().services.chanserv.max_bans;
        {
            let mut reg = v.reg.write();
            if reg.bans.len() >= max_bans as usize {
                drop(reg);
                svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanBanListFull, &[LangArg::S(&chname)]);
                return 1;
            }
            if reg.find_ban(&mask).is_some() {
                drop(reg);
                svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanBanExists, &[LangArg::S(&mask), LangArg::S(&chname)]);
                return 1;
            }
            reg.bans.push(StoredBan {
                mask: mask.clone(),
                reason: reason.clone(),
                setter: v.account_display.clone(),
                level,
                expires,
            });
        }

        let display_chan = v.reg.read().name.clone();
        let _ = net
            .db
            .channels()
            .upsert_ban(&display_chan, &mask, &reason, &v.account_display, i64::from(level), expires as i64)
            .await;

        // Enforce against current members below the ban level; members
        // with sufficient access get the ban cached instead.
        if let Some(chan_ref) = net.channels.find(&irc_to_lower(&chname)) {
            let (chan_name, chan_ts) = {
                let chan = chan_ref.read();
                (chan.name.clone(), chan.ts)
            };
            let mut build = ModeBuild::start(mode_header(net, svc, &chan_name, chan_ts));
            let mut kicks = KickBuild::start(&svc.source_token(net), &chan_name, &reason);
            let mut mask_set = false;
            let mut victims: Vec<String> = Vec::new();

            let members: Vec<(String, Arc<crate::state::Membership>)> = chan_ref
                .read()
                .members
                .iter()
                .map(|(k, m)| (k.clone(), m.clone()))
                .collect();

            for (uid, membership) in members {
                let Some(user_ref) = net.clients.by_key(&uid) else {
                    continue;
                };
                let (user_mask, account) = {
                    let user = user_ref.read();
                    (user.mask.clone(), user.account.clone())
                };
                if !match_mask(&mask, &user_mask) {
                    continue;
                }
                let exempt = chan_ref
                    .read()
                    .excepts
                    .iter()
                    .any(|e| match_mask(e, &user_mask));
                if exempt {
                    continue;
                }

                if let Some(acc) = account.as_deref() {
                    let mut reg = v.reg.write();
                    let bants = reg.bants;
                    if let Some(member) = reg.members.get_mut(acc) {
                        if member.effective() >= level {
                            continue;
                        }
                        member.bants = bants;
                    }
                }

                if membership.is_opped() {
                    build.add(Dir::Del, 'o', Some(&uid));
                }
                if !mask_set {
                    let mut chan = chan_ref.write();
                    if crate::state::Channel::add_mask(&mut chan.bans, &mask) {
                        build.add(Dir::Add, 'b', Some(&mask));
                    }
                    mask_set = true;
                }
                if chan_ref.read().members.len() == 1 {
                    enable_inhabit(net, svc, &v.reg, false);
                }
                kicks.add(&uid);
                victims.push(uid);
            }

            for uid in victims {
                chan_ref.write().members.remove(&uid);
                if let Some(user_ref) = net.clients.by_key(&uid) {
                    user_ref.write().channels.remove(&irc_to_lower(&chname));
                }
            }

            send_lines(net, build.finish());
            if !kicks.is_empty() {
                send_lines(net, kicks.finish());
            }
        }

        svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanBanAdded, &[LangArg::S(&mask), LangArg::S(&chname)]);
        2
    }

    async fn cmd_delban(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let chname = ctx.arg(0).to_string();
        let Some(v) = self.verify(net, svc, ctx, &chname, LEVEL_REGULAR) else {
            return 1;
        };
        let mask = collapse(&make_usermask(ctx.arg(1)));

        let removed = {
            let mut reg = v.reg.write();
            let Some(idx) = reg.find_ban(&mask) else {
                drop(reg);
                svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanBanNotFound, &[LangArg::S(&mask), LangArg::S(&chname)]);
                return 1;
            };
            if reg.bans[idx].level > v.level {
                drop(reg);
                svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanBanHigher, &[LangArg::S(&mask)]);
                return 1;
            }
            let removed = reg.bans.remove(idx);
            reg.bump_bants();
            removed
        };

        let display_chan = v.reg.read().name.clone();
        let _ = net.db.channels().delete_ban(&display_chan, &removed.mask).await;

        // Lift the live ban too, when present.
        if let Some(chan_ref) = net.channels.find(&irc_to_lower(&chname)) {
            let present = {
                let mut chan = chan_ref.write();
                crate::state::Channel::del_mask(&mut chan.bans, &removed.mask)
            };
            if present {
                let (chan_name, chan_ts) = {
                    let chan = chan_ref.read();
                    (chan.name.clone(), chan.ts)
                };
                let mut build = ModeBuild::start(mode_header(net, svc, &chan_name, chan_ts));
                build.add(Dir::Del, 'b', Some(&removed.mask));
                send_lines(net, build.finish());
            }
        }

        svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanBanRemoved, &[LangArg::S(&removed.mask), LangArg::S(&chname)]);
        1
    }

    async fn cmd_modban(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let chname = ctx.arg(0).to_string();
        let Some(v) = self.verify(net, svc, ctx, &chname, LEVEL_REGULAR) else {
            return 1;
        };
        let mask = collapse(&make_usermask(ctx.arg(1)));
        let Ok(level) = ctx.arg(2).parse::<u16>() else {
            return 1;
        };
        if level > v.level {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanBanHigher, &[LangArg::S(&mask)]);
            return 1;
        }

        let found = {
            let mut reg = v.reg.write();
            match reg.find_ban(&mask) {
                Some(idx) => {
                    if reg.bans[idx].level > v.level {
                        None
                    } else {
                        reg.bans[idx].level = level;
                        reg.bans[idx].setter = v.account_display.clone();
                        let ban = reg.bans[idx].clone();
                        reg.bump_bants();
                        Some(ban)
                    }
                }
                None => {
                    drop(reg);
                    svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanBanNotFound, &[LangArg::S(&mask), LangArg::S(&chname)]);
                    return 1;
                }
            }
        };

        let Some(ban) = found else {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanBanHigher, &[LangArg::S(&mask)]);
            return 1;
        };

        let display_chan = v.reg.read().name.clone();
        let _ = net
            .db
            .channels()
            .upsert_ban(&display_chan, &ban.mask, &ban.reason, &ban.setter, i64::from(ban.level), ban.expires as i64)
            .await;
        svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanBanAdded, &[LangArg::S(&ban.mask), LangArg::S(&chname)]);
        1
    }

    fn cmd_listbans(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let chname = ctx.arg(0).to_string();
        let Some(v) = self.verify(net, svc, ctx, &chname, LEVEL_REGULAR) else {
            return 1;
        };

        svc.notice(net, &ctx.user, &format!("Ban list for {}:", chname));
        let now = Network::epoch();
        for ban in v.reg.read().bans.iter() {
            let hold = if ban.expires == 0 {
                "perm".to_string()
            } else {
                svs_proto::format_duration(ban.expires.saturating_sub(now))
            };
            svc.notice(
                net,
                &ctx.user,
                &format!("  {} {} ({}) [mod: {}] :{}", ban.mask, ban.level, hold, ban.setter, ban.reason),
            );
        }
        3
    }

    /// Self-unban: clear live bans matching the caller by mask or CIDR.
    fn cmd_unban(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let chname = ctx.arg(0).to_string();
        let Some(v) = self.verify(net, svc, ctx, &chname, LEVEL_OP) else {
            return 1;
        };

        // The bants cache: a ban at or above our level was set against
        // us and nothing was removed since.
        let cached = {
            let reg = v.reg.read();
            reg.members
                .get(&v.account_key)
                .map(|m| m.bants == reg.bants)
                .unwrap_or(false)
        };
        if cached {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanUnbanRefused, &[LangArg::S(&chname)]);
            return 1;
        }

        let Some(chan_ref) = net.channels.find(&irc_to_lower(&chname)) else {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanNotOnChannel, &[LangArg::S(&chname)]);
            return 1;
        };

        let (user_mask, ip_mask) = {
            let user = ctx.user.read();
            let ip_mask = user
                .ip
                .as_ref()
                .map(|ip| format!("{}!{}@{}", user.nick, user.username, ip));
            (user.mask.clone(), ip_mask)
        };

        let matching: Vec<String> = {
            let chan = chan_ref.read();
            chan.bans
                .iter()
                .filter(|ban| {
                    if match_mask(ban, &user_mask) {
                        return true;
                    }
                    if let (Some(ip_mask), Some(host_part)) =
                        (ip_mask.as_deref(), ban.rsplit_once('@').map(|(_, h)| h))
                    {
                        if host_part.contains('/') {
                            let ip = ip_mask.rsplit_once('@').map(|(_, i)| i).unwrap_or("");
                            return svs_proto::cidr_match(host_part, ip);
                        }
                    }
                    false
                })
                .cloned()
                .collect()
        };

        if matching.is_empty() {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanBanNotFound, &[LangArg::S("*"), LangArg::S(&chname)]);
            return 1;
        }

        let (chan_name, chan_ts) = {
            let chan = chan_ref.read();
            (chan.name.clone(), chan.ts)
        };
        let mut build = ModeBuild::start(mode_header(net, svc, &chan_name, chan_ts));
        {
            let mut chan = chan_ref.write();
            for mask in &matching {
                crate::state::Channel::del_mask(&mut chan.bans, mask);
                build.add(Dir::Del, 'b', Some(mask));
            }
        }
        send_lines(net, build.finish());
        svc.msg(net, &ctx.user, &ctx.lang, MsgId::Successful, &[LangArg::S("UNBAN")]);
        1
    }

    /// OP/DEOP/VOICE/DEVOICE on self or a named member.
    fn cmd_status(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let chname = ctx.arg(0).to_string();
        let Some(v) = self.verify(net, svc, ctx, &chname, LEVEL_OP) else {
            return 1;
        };
        let flags = v.reg.read().flags;

        let giving = matches!(ctx.cmd.as_str(), "OP" | "VOICE");
        let voice = matches!(ctx.cmd.as_str(), "VOICE" | "DEVOICE");

        if voice && flags & CF_NOVOICECMD != 0 {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::IsDisabled, &[LangArg::S(&svc.nick), LangArg::S(&ctx.cmd)]);
            return 1;
        }
        if giving && !voice && flags & CF_NOOPS != 0 {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::IsDisabled, &[LangArg::S(&svc.nick), LangArg::S(&ctx.cmd)]);
            return 1;
        }
        if giving && voice && flags & CF_NOVOICES != 0 {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::IsDisabled, &[LangArg::S(&svc.nick), LangArg::S(&ctx.cmd)]);
            return 1;
        }

        let target_ref = if ctx.args.len() > 1 {
            match super::find_target(net, ctx.arg(1)) {
                Some(user) => user,
                None => {
                    svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanNotInChannel, &[LangArg::S(ctx.arg(1)), LangArg::S(&chname)]);
                    return 1;
                }
            }
        } else {
            ctx.user.clone()
        };

        let Some(chan_ref) = net.channels.find(&irc_to_lower(&chname)) else {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanNotOnChannel, &[LangArg::S(&chname)]);
            return 1;
        };
        let target_key = target_ref.read().key();
        let membership = chan_ref.read().members.get(&target_key).cloned();
        let Some(membership) = membership else {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanNotInChannel, &[LangArg::S(ctx.arg(1)), LangArg::S(&chname)]);
            return 1;
        };

        let (chan_name, chan_ts) = {
            let chan = chan_ref.read();
            (chan.name.clone(), chan.ts)
        };
        let mut build = ModeBuild::start(mode_header(net, svc, &chan_name, chan_ts));
        match (giving, voice) {
            (true, false) => {
                build.add(Dir::Add, 'o', Some(&target_key));
                membership.clear(CHFL_DEOP);
                membership.set(CHFL_OPPED);
            }
            (false, false) => {
                build.add(Dir::Del, 'o', Some(&target_key));
                membership.clear(CHFL_OPPED);
            }
            (true, true) => {
                build.add(Dir::Add, 'v', Some(&target_key));
                membership.set(CHFL_VOICED);
            }
            (false, true) => {
                build.add(Dir::Del, 'v', Some(&target_key));
                membership.clear(CHFL_VOICED);
            }
        }
        send_lines(net, build.finish());
        svc.msg(net, &ctx.user, &ctx.lang, MsgId::SuccessfulOn, &[LangArg::S(&ctx.cmd), LangArg::S(&chan_name)]);
        1
    }

    fn cmd_invite(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let chname = ctx.arg(0).to_string();
        let Some(_v) = self.verify(net, svc, ctx, &chname, LEVEL_OP) else {
            return 1;
        };
        let Some(chan_ref) = net.channels.find(&irc_to_lower(&chname)) else {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanNotOnChannel, &[LangArg::S(&chname)]);
            return 1;
        };
        let present = chan_ref.read().services.contains("chanserv");
        if !present {
            // We can only invite from inside.
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanNotOnChannel, &[LangArg::S(&chname)]);
            return 1;
        }

        let target = {
            let user = ctx.user.read();
            user.uid.clone().unwrap_or_else(|| user.nick.clone())
        };
        let chan_name = chan_ref.read().name.clone();
        net.send(format!(
            ":{} INVITE {} {}",
            svc.source_token(net),
            target,
            chan_name
        ));
        svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanInvited, &[LangArg::S(&chan_name)]);
        1
    }

    fn cmd_getkey(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let chname = ctx.arg(0).to_string();
        let Some(_v) = self.verify(net, svc, ctx, &chname, LEVEL_OP) else {
            return 1;
        };
        let Some(chan_ref) = net.channels.find(&irc_to_lower(&chname)) else {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanNotOnChannel, &[LangArg::S(&chname)]);
            return 1;
        };
        let key = chan_ref.read().modes.key.clone();
        match key {
            Some(key) => {
                svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanKeyIs, &[LangArg::S(&chname), LangArg::S(&key)]);
            }
            None => {
                svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanKeyIs, &[LangArg::S(&chname), LangArg::S("(none)")]);
            }
        }
        1
    }

    async fn cmd_topic(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let chname = ctx.arg(0).to_string();
        let Some(_v) = self.verify(net, svc, ctx, &chname, LEVEL_OP) else {
            return 1;
        };
        let topic = ctx.rest(1);
        let Some(chan_ref) = net.channels.find(&irc_to_lower(&chname)) else {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanNotOnChannel, &[LangArg::S(&chname)]);
            return 1;
        };
        let present = chan_ref.read().services.contains("chanserv");
        if !present {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanNotOnChannel, &[LangArg::S(&chname)]);
            return 1;
        }

        let chan_name = chan_ref.read().name.clone();
        net.send(format!(
            ":{} TOPIC {} :{}",
            svc.source_token(net),
            chan_name,
            topic
        ));
        chan_ref.write().topic = Some(crate::state::Topic {
            text: topic,
            setter: svc.nick.clone(),
            ts: Network::epoch(),
        });
        svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanTopicSet, &[LangArg::S(&chan_name)]);
        1
    }

    fn cmd_clearmodes(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let chname = ctx.arg(0).to_string();
        let Some(_v) = self.verify(net, svc, ctx, &chname, LEVEL_CLEAR) else {
            return 1;
        };
        let Some(chan_ref) = net.channels.find(&irc_to_lower(&chname)) else {
            return 1;
        };

        let (chan_name, chan_ts, current) = {
            let chan = chan_ref.read();
            (chan.name.clone(), chan.ts, chan.modes.clone())
        };
        let mut build = ModeBuild::start(mode_header(net, svc, &chan_name, chan_ts));
        for c in current.to_string().trim_start_matches('+').chars() {
            match c {
                ' ' => break,
                'k' => build.add(Dir::Del, 'k', current.key.as_deref()),
                'l' => build.add(Dir::Del, 'l', None),
                other => build.add(Dir::Del, other, None),
            }
        }
        chan_ref.write().modes = ChannelModes::default();
        send_lines(net, build.finish());
        svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanCleared, &[LangArg::S("modes"), LangArg::S(&chname)]);
        2
    }

    fn cmd_clearops(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let chname = ctx.arg(0).to_string();
        let Some(_v) = self.verify(net, svc, ctx, &chname, LEVEL_CLEAR) else {
            return 1;
        };
        let Some(chan_ref) = net.channels.find(&irc_to_lower(&chname)) else {
            return 1;
        };

        let (chan_name, chan_ts) = {
            let chan = chan_ref.read();
            (chan.name.clone(), chan.ts)
        };
        let mut build = ModeBuild::start(mode_header(net, svc, &chan_name, chan_ts));
        for (uid, member) in chan_ref.read().members.iter() {
            if member.is_opped() {
                build.add(Dir::Del, 'o', Some(uid));
                member.clear(CHFL_OPPED);
            }
        }
        send_lines(net, build.finish());
        svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanCleared, &[LangArg::S("ops"), LangArg::S(&chname)]);
        2
    }

    fn cmd_clearallbans(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let chname = ctx.arg(0).to_string();
        let Some(_v) = self.verify(net, svc, ctx, &chname, LEVEL_CLEAR) else {
            return 1;
        };
        let Some(chan_ref) = net.channels.find(&irc_to_lower(&chname)) else {
            return 1;
        };

        let (chan_name, chan_ts, bans) = {
            let mut chan = chan_ref.write();
            let bans: Vec<String> = chan.bans.drain(..).collect();
            (chan.name.clone(), chan.ts, bans)
        };
        let mut build = ModeBuild::start(mode_header(net, svc, &chan_name, chan_ts));
        for mask in &bans {
            build.add(Dir::Del, 'b', Some(mask));
        }
        send_lines(net, build.finish());
        svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanCleared, &[LangArg::S("bans"), LangArg::S(&chname)]);
        2
    }

    /// Owner resignation, optionally gated on an emailed token.
    async fn cmd_delowner(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let chname = ctx.arg(0).to_string();
        let Some(v) = self.verify(net, svc, ctx, &chname, LEVEL_OWNER) else {
            return 1;
        };

        let conf = net.conf();
        if conf.services.chanserv.email_delowner {
            let account_ref = net.registry.find_account(&v.account_key);
            let email = account_ref.as_ref().and_then(|a| a.read().email.clone());
            let display = v.account_display.clone();
            let now = Network::epoch();
            let reset_duration = conf.services.userserv.reset_duration;

            match ctx.args.get(1) {
                None => {
                    let Some(email) = email else {
                        svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserNoEmail, &[LangArg::S(&display)]);
                        return 1;
                    };
                    if let Ok(Some(row)) = net.db.accounts().get_resetpass(&display).await {
                        if now <= row.time.max(0) as u64 + reset_duration {
                            svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserResetPending, &[]);
                            return 1;
                        }
                    }
                    let token = super::userserv::make_token();
                    let _ = net
                        .db
                        .accounts()
                        .put_resetpass(&display, &token, now as i64)
                        .await;
                    crate::email::send(
                        net,
                        &email,
                        "Channel owner resignation",
                        &format!(
                            "To resign ownership of {}, send the service:\n    DELOWNER {} {}\n",
                            chname, chname, token
                        ),
                    );
                    svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanOwnerTokenSent, &[]);
                    return 2;
                }
                Some(token) => {
                    let row = net.db.accounts().get_resetpass(&display).await.ok().flatten();
                    let valid = row
                        .filter(|r| now <= r.time.max(0) as u64 + reset_duration)
                        .map(|r| super::userserv::token_eq(&r.token, token))
                        .unwrap_or(false);
                    if !valid {
                        svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserBadToken, &[]);
                        return 2;
                    }
                    let _ = net.db.accounts().delete_resetpass(&display).await;
                }
            }
        }

        let chan_key = irc_to_lower(&chname);
        remove_access_of(net, &chan_key, &v.account_key).await;
        watch::send(
            net,
            watch::WATCH_CHANSERV,
            &v.account_display,
            &format!("DELOWNER {}", chname),
        );
        svc.msg(net, &ctx.user, &ctx.lang, MsgId::Successful, &[LangArg::S("DELOWNER")]);
        2
    }

    fn cmd_info(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let chname = ctx.arg(0).to_string();
        let chan_key = irc_to_lower(&chname);
        let Some(reg_ref) = net.registry.channels.get(&chan_key).map(|r| r.value().clone())
        else {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanNotRegistered, &[LangArg::S(&chname)]);
            return 1;
        };

        let reg = reg_ref.read();
        let owner = reg
            .members
            .values()
            .find(|m| m.level == LEVEL_OWNER)
            .map(|m| m.account.clone())
            .unwrap_or_default();
        svc.notice(net, &ctx.user, &format!("[{}] owner: {}", reg.name, owner));
        if let Some(url) = &reg.url {
            svc.notice(net, &ctx.user, &format!("[{}] url: {}", reg.name, url));
        }
        if let Some(suspend) = &reg.suspend {
            svc.notice(
                net,
                &ctx.user,
                &format!("[{}] SUSPENDED by {}: {}", reg.name, suspend.by, suspend.reason),
            );
        }
        2
    }

    async fn cmd_admin_suspend(
        &self,
        net: &Arc<Network>,
        svc: &Arc<Service>,
        ctx: &mut CmdCtx,
        on: bool,
    ) -> u16 {
        let chname = ctx.arg(0).to_string();
        let chan_key = irc_to_lower(&chname);
        let Some(reg_ref) = net.registry.channels.get(&chan_key).map(|r| r.value().clone())
        else {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanNotRegistered, &[LangArg::S(&chname)]);
            return 1;
        };
        let oper_name = ctx.oper.as_ref().map(|o| o.name.clone()).unwrap_or_default();

        let display_name = reg_ref.read().name.clone();
        if on {
            let duration = svs_proto::parse_duration(ctx.arg(1)).unwrap_or(0);
            let reason = ctx.rest(2);
            let expires = if duration == 0 { 0 } else { Network::epoch() + duration };
            reg_ref.write().suspend = Some(Suspension {
                by: oper_name.clone(),
                reason: reason.clone(),
                expires,
            });
            let _ = net
                .db
                .channels()
                .set_suspend(&display_name, Some(&oper_name), Some(&reason), expires as i64)
                .await;
            watch::send(net, watch::WATCH_CHANSERV, &oper_name, &format!("CSUSPEND {}: {}", display_name, reason));
        } else {
            reg_ref.write().suspend = None;
            let _ = net.db.channels().set_suspend(&display_name, None, None, 0).await;
            watch::send(net, watch::WATCH_CHANSERV, &oper_name, &format!("CUNSUSPEND {}", display_name));
        }
        svc.msg(net, &ctx.user, &ctx.lang, MsgId::Successful, &[LangArg::S(&ctx.cmd)]);
        1
    }

    async fn cmd_cdrop(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let chname = ctx.arg(0).to_string();
        let chan_key = irc_to_lower(&chname);
        if !net.registry.channels.contains_key(&chan_key) {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanNotRegistered, &[LangArg::S(&chname)]);
            return 1;
        }
        let oper_name = ctx.oper.as_ref().map(|o| o.name.clone()).unwrap_or_default();
        destroy_channel(net, &chan_key).await;
        watch::send(net, watch::WATCH_CHANSERV, &oper_name, &format!("CDROP {}", chname));
        svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanDropped, &[LangArg::S(&chname)]);
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_mode_parsing_round_trips() {
        let modes = parse_stored_modes(Some("+ntk sekrit"));
        assert_eq!(modes.to_string(), "+ntk sekrit");
        assert!(parse_stored_modes(None).is_empty());
        assert!(parse_stored_modes(Some("")).is_empty());
    }
}
