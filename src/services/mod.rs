//! The service fabric.
//!
//! Every virtual client is a [`Service`]: an identity on the network, a
//! lexicographically sorted command table, flood accounting, a help
//! cache and a handler. Dispatch checks, in order: ignore masks, flood
//! windows, the shortcut rule, HELP, OLOGIN/OLOGOUT, then a binary
//! search of the table with privilege, login and argument checks before
//! the handler runs and returns its flood cost.
//!
//! A service may be configured to merge into another at init: its
//! sorted command entries are spliced into the parent's table (which is
//! re-sorted and re-checked), its help indices are appended, and it
//! disappears from the service list until an unmerge during help reload.

pub mod alis;
pub mod banserv;
pub mod chanserv;
pub mod global;
pub mod jupeserv;
pub mod memoserv;
pub mod nickserv;
pub mod operbot;
pub mod operserv;
pub mod userserv;
pub mod watchserv;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use svs_proto::{irc_eq, irc_to_lower, ChannelModes};
use tracing::{info, warn};

use crate::cache::HelpCache;
use crate::config::ServiceIdentity;
use crate::lang::{LangArg, MsgId};
use crate::state::{FloodCounter, Network, OperSession, UserRef};
use crate::watch;

/// Operator privilege bits, set from the `flags` list of an operator
/// block and checked by commands and the oper control channel.
pub mod privs {
    /// Everything; implies all other bits.
    pub const ADMIN: u64 = 1 << 0;
    /// May use the oper control channel.
    pub const DCC: u64 = 1 << 1;
    /// `.connect` and server routing.
    pub const ROUTE: u64 = 1 << 2;
    /// Rehash, DBSYNC, DIE.
    pub const MAINTAIN: u64 = 1 << 3;
    /// Manage global ignore masks.
    pub const IGNORE: u64 = 1 << 4;

    pub const BAN_KLINE: u64 = 1 << 8;
    pub const BAN_XLINE: u64 = 1 << 9;
    pub const BAN_RESV: u64 = 1 << 10;
    /// May set permanent bans.
    pub const BAN_PERM: u64 = 1 << 11;
    /// Exempt from the match-count refusal.
    pub const BAN_NOMAX: u64 = 1 << 12;
    pub const BAN_REGEXP: u64 = 1 << 13;
    pub const BAN_SYNC: u64 = 1 << 14;

    /// Account registry administration (suspend, drop, info on others).
    pub const USER_ADMIN: u64 = 1 << 16;
    /// Channel registry administration.
    pub const CHAN_ADMIN: u64 = 1 << 17;
    /// Takeover and service channel management.
    pub const OPER_TAKEOVER: u64 = 1 << 18;
    /// Operbot channel management.
    pub const OPERBOT: u64 = 1 << 19;
    /// Global welcome management.
    pub const GLOBAL: u64 = 1 << 20;
    /// Jupe administration (bypass voting).
    pub const JUPE_ADMIN: u64 = 1 << 21;

    /// Map config flag names onto bits. Unknown names are reported.
    pub fn from_names(names: &[String]) -> u64 {
        let mut bits = 0;
        for name in names {
            bits |= match name.to_ascii_lowercase().as_str() {
                "admin" => ADMIN,
                "dcc" => DCC,
                "route" => ROUTE,
                "maintain" => MAINTAIN,
                "ignore" => IGNORE,
                "kline" => BAN_KLINE,
                "xline" => BAN_XLINE,
                "resv" => BAN_RESV,
                "permban" => BAN_PERM,
                "nomax" => BAN_NOMAX,
                "regexpban" => BAN_REGEXP,
                "bansync" => BAN_SYNC,
                "useradmin" => USER_ADMIN,
                "chanadmin" => CHAN_ADMIN,
                "takeover" => OPER_TAKEOVER,
                "operbot" => OPERBOT,
                "global" => GLOBAL,
                "jupe" => JUPE_ADMIN,
                other => {
                    tracing::warn!(flag = %other, "unknown operator flag");
                    0
                }
            };
        }
        if bits & ADMIN != 0 {
            bits = u64::MAX;
        }
        bits
    }
}

/// A command's static metadata. Tables must be sorted by `name`;
/// [`register`] and merging assert it.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub name: &'static str,
    pub min_args: usize,
    /// Base flood cost charged on top of the handler's return.
    pub flood: u16,
    pub need_login: bool,
    pub oper_only: bool,
    /// Required privilege bits beyond `oper_only`, 0 for none.
    pub oper_priv: u64,
}

/// Context handed to a command handler.
pub struct CmdCtx {
    pub user: UserRef,
    /// Uppercased command name.
    pub cmd: String,
    /// Arguments after the command word.
    pub args: Vec<String>,
    /// Caller's language code.
    pub lang: String,
    /// Folded account name when logged in.
    pub account: Option<String>,
    /// Oper session snapshot when present.
    pub oper: Option<OperSession>,
}

impl CmdCtx {
    pub fn arg(&self, idx: usize) -> &str {
        self.args.get(idx).map(String::as_str).unwrap_or("")
    }

    /// Join arguments from `idx` onward, for reasons and topics.
    pub fn rest(&self, idx: usize) -> String {
        self.args[idx.min(self.args.len())..].join(" ")
    }
}

/// A service's command implementation.
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    /// The sorted command table.
    fn commands(&self) -> &'static [CommandSpec];

    /// Execute a validated command; returns the flood cost.
    async fn handle(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16;
}

/// A table entry; `owner` survives merging so absorbed commands still
/// run their original handler.
#[derive(Clone)]
pub struct CommandEntry {
    pub spec: CommandSpec,
    pub owner: Arc<dyn ServiceHandler>,
}

/// A virtual service client.
pub struct Service {
    pub id: &'static str,
    pub nick: String,
    pub username: String,
    pub host: String,
    pub realname: String,
    /// Current UID; changes on re-introduction.
    pub uid: RwLock<Option<String>>,
    pub identity: ServiceIdentity,

    commands: RwLock<Vec<CommandEntry>>,
    handler: Arc<dyn ServiceHandler>,
    pub help: RwLock<HelpCache>,

    /// Service-wide flood accumulator.
    pub flood: Mutex<FloodCounter>,
    /// Commands silently dropped by flood protection.
    pub ignored_count: AtomicU64,
    /// Per-command usage counters for `.service` stats.
    pub usage: dashmap::DashMap<&'static str, u64>,

    /// Channels the service currently sits in (folded names).
    pub channels: RwLock<std::collections::HashSet<String>>,
    /// Services merged into this one, kept for unmerge.
    pub absorbed: RwLock<Vec<Arc<Service>>>,
}

impl Service {
    /// Build a service from its config identity and handler.
    pub fn build(
        id: &'static str,
        identity: &ServiceIdentity,
        handler: Arc<dyn ServiceHandler>,
        help_root: &str,
    ) -> Arc<Self> {
        let table: Vec<CommandEntry> = handler
            .commands()
            .iter()
            .map(|spec| CommandEntry {
                spec: *spec,
                owner: handler.clone(),
            })
            .collect();
        assert_sorted(id, &table);

        Arc::new(Self {
            id,
            nick: identity.nick.clone(),
            username: identity.username.clone(),
            host: identity.host.clone(),
            realname: identity.realname.clone(),
            uid: RwLock::new(None),
            identity: identity.clone(),
            commands: RwLock::new(table),
            handler,
            help: RwLock::new(HelpCache::load(help_root, id)),
            flood: Mutex::new(FloodCounter::default()),
            ignored_count: AtomicU64::new(0),
            usage: dashmap::DashMap::new(),
            channels: RwLock::new(Default::default()),
            absorbed: RwLock::new(Vec::new()),
        })
    }

    /// The token we put in `:source` position: UID on TS6, nick else.
    pub fn source_token(&self, _net: &Network) -> String {
        match self.uid.read().as_ref() {
            Some(uid) => uid.clone(),
            None => self.nick.clone(),
        }
    }

    /// Send a notice to a user from this service.
    pub fn notice(&self, net: &Network, user: &UserRef, text: &str) {
        let target = {
            let user = user.read();
            user.uid.clone().unwrap_or_else(|| user.nick.clone())
        };
        net.send(format!(
            ":{} NOTICE {} :{}",
            self.source_token(net),
            target,
            text
        ));
    }

    /// Send a localized message.
    pub fn msg(&self, net: &Network, user: &UserRef, lang: &str, id: MsgId, args: &[LangArg<'_>]) {
        let text = net.langs.read().render(lang, id, args);
        self.notice(net, user, &text);
    }

    /// Binary-search the command table.
    pub fn find_command(&self, name: &str) -> Option<CommandEntry> {
        let table = self.commands.read();
        table
            .binary_search_by(|entry| entry.spec.name.cmp(&name))
            .ok()
            .map(|idx| table[idx].clone())
    }

    /// Names of visible commands, for the short HELP form.
    pub fn command_names(&self, is_oper: bool) -> Vec<&'static str> {
        self.commands
            .read()
            .iter()
            .filter(|e| is_oper || !e.spec.oper_only)
            .map(|e| e.spec.name)
            .collect()
    }

    /// Forget channel presence, for link teardown.
    pub fn clear_presence(&self) {
        self.channels.write().clear();
    }

    /// Splice a child service's table and help into ours.
    fn absorb(&self, child: &Arc<Service>) {
        {
            let mut table = self.commands.write();
            let child_table = child.commands.read();
            table.extend(child_table.iter().cloned());
            table.sort_by(|a, b| a.spec.name.cmp(b.spec.name));
        }
        assert_sorted(self.id, &self.commands.read());
        self.help.write().absorb(&child.help.read());
        self.absorbed.write().push(child.clone());
        info!(parent = %self.id, child = %child.id, "service merged");
    }

    /// Restore the pre-merge table, returning the children.
    fn restore(&self) -> Vec<Arc<Service>> {
        let children: Vec<Arc<Service>> = self.absorbed.write().drain(..).collect();
        if children.is_empty() {
            return children;
        }

        let table: Vec<CommandEntry> = self
            .handler
            .commands()
            .iter()
            .map(|spec| CommandEntry {
                spec: *spec,
                owner: self.handler.clone(),
            })
            .collect();
        *self.commands.write() = table;
        children
    }
}

/// Panic on an unsorted or duplicated table; a build-time mistake.
fn assert_sorted(id: &str, table: &[CommandEntry]) {
    for pair in table.windows(2) {
        assert!(
            pair[0].spec.name < pair[1].spec.name,
            "{}: command table not sorted at {}",
            id,
            pair[1].spec.name
        );
    }
}

/// Register a service into the network's list.
pub fn register(net: &Arc<Network>, svc: Arc<Service>) {
    net.services.write().push(svc);
}

/// Merge `child_id` into `parent_id` per its config.
pub fn merge_service(net: &Arc<Network>, child_id: &str, parent_id: &str) {
    let (Some(child), Some(parent)) = (net.service_by_id(child_id), net.service_by_id(parent_id))
    else {
        warn!(child = %child_id, parent = %parent_id, "merge target missing");
        return;
    };
    parent.absorb(&child);
    net.services.write().retain(|s| s.id != child_id);
}

/// Undo every merge, reload help caches, and re-merge. Used by rehash.
pub fn reload_help(net: &Arc<Network>) {
    // Unmerge: put children back on the list.
    let parents: Vec<Arc<Service>> = net.services.read().clone();
    for parent in &parents {
        for child in parent.restore() {
            net.services.write().push(child);
        }
    }

    for svc in net.services.read().iter() {
        svc.help.write().reload();
    }

    // Re-merge per current config.
    let conf = net.conf();
    if let Some(parent) = conf.services.jupeserv.merge_into.as_deref() {
        if net.service_by_id("jupeserv").is_some() {
            merge_service(net, "jupeserv", parent);
        }
    }
    if let Some(parent) = conf.services.watchserv.merge_into.as_deref() {
        if net.service_by_id("watchserv").is_some() {
            merge_service(net, "watchserv", parent);
        }
    }
}

// --- wire presence -------------------------------------------------------

/// Introduce every service to a freshly registered uplink.
pub fn introduce_all(net: &Arc<Network>) {
    let services: Vec<Arc<Service>> = net.services.read().clone();
    for svc in services {
        introduce(net, &svc);
    }
}

/// Introduce one service. Services are born at TS 1 so they win every
/// nick fight short of another TS 1, which is fatal by design.
pub fn introduce(net: &Arc<Network>, svc: &Arc<Service>) {
    match &net.me.sid {
        Some(sid) => {
            let uid = net.next_uid().unwrap_or_default();
            *svc.uid.write() = Some(uid.clone());
            net.send(format!(
                ":{} UID {} 1 1 +iDS {} {} 0 {} :{}",
                sid, svc.nick, svc.username, svc.host, uid, svc.realname
            ));
        }
        None => {
            net.send(format!(
                "NICK {} 1 1 +iDS {} {} {} :{}",
                svc.nick, svc.username, svc.host, net.me.name, svc.realname
            ));
        }
    }
}

/// Re-introduce a killed service and put it back in its channels.
pub fn reintroduce(net: &Arc<Network>, svc: &Arc<Service>) {
    introduce(net, svc);
    let channels: Vec<String> = svc.channels.read().iter().cloned().collect();
    for chan in channels {
        rejoin_channel(net, svc, &chan);
    }
}

/// Join a service to a channel with an explicit TS and simple modes.
///
/// Mirrors the TS rules locally: joining with a lower TS resets prefix
/// state exactly as our own SJOIN would on the uplink.
pub fn service_join(
    net: &Arc<Network>,
    svc: &Arc<Service>,
    chan_name: &str,
    ts: u64,
    modes: &ChannelModes,
) {
    let Some(chan_ref) = net.channels.get_or_create(chan_name, ts) else {
        return;
    };

    {
        let mut chan = chan_ref.write();
        if ts < chan.ts {
            chan.ts = ts;
            chan.strip_prefixes();
            chan.bans.clear();
            chan.excepts.clear();
            chan.invites.clear();
            chan.modes = modes.clone();
        } else if !modes.is_empty() {
            chan.modes.merge(modes);
        }
        chan.services.insert(svc.id);
    }
    svc.channels.write().insert(irc_to_lower(chan_name));

    let mode_str = modes.to_string();
    let source = match &net.me.sid {
        Some(sid) => sid.clone(),
        None => net.me.name.clone(),
    };
    net.send(format!(
        ":{} SJOIN {} {} {} :@{}",
        source,
        ts,
        chan_name,
        mode_str,
        svc.source_token(net)
    ));
}

/// Rejoin using the registered channel's stored TS when known.
pub fn rejoin_channel(net: &Arc<Network>, svc: &Arc<Service>, chan_name: &str) {
    let (ts, modes) = match net.registry.find_channel(chan_name) {
        Some(reg) => {
            let reg = reg.read();
            let mut modes = reg.enforcemodes.clone();
            if modes.is_empty() {
                modes = reg.createmodes.clone();
            }
            (reg.ts, modes)
        }
        None => (
            net.channels
                .find(chan_name)
                .map(|c| c.read().ts)
                .unwrap_or_else(Network::epoch),
            ChannelModes::default(),
        ),
    };
    service_join(net, svc, chan_name, ts, &modes);
}

/// Part a service from a channel.
pub fn service_part(net: &Arc<Network>, svc: &Arc<Service>, chan_name: &str, reason: &str) {
    let key = irc_to_lower(chan_name);
    if let Some(chan_ref) = net.channels.find(&key) {
        chan_ref.write().services.remove(svc.id);
    }
    svc.channels.write().remove(&key);
    net.send(format!(
        ":{} PART {} :{}",
        svc.source_token(net),
        chan_name,
        reason
    ));
    net.channels.destroy_if_empty(&key);
}

// --- dispatch ------------------------------------------------------------

/// The full dispatch path for one PRIVMSG to a service.
pub async fn dispatch(
    net: &Arc<Network>,
    svc: &Arc<Service>,
    user_ref: &UserRef,
    text: &str,
    shortcut_used: bool,
) {
    let words: Vec<String> = text.split_whitespace().map(String::from).collect();
    if words.is_empty() {
        return;
    }
    let cmd = words[0].to_uppercase();
    let args: Vec<String> = words[1..].to_vec();

    // Ignored hosts are dropped outright, except that an oper trying to
    // log in past an ignore gets through when a conf block matches.
    let (mask, userhost, servername) = {
        let user = user_ref.read();
        (user.mask.clone(), user.userhost(), user.servername.clone())
    };
    let ignored = net.ignores.iter().any(|e| {
        svs_proto::match_mask(&e.value().mask, &mask)
            || svs_proto::match_mask(&e.value().mask, &userhost)
    });
    if ignored {
        let oper_exempt = cmd == "OLOGIN"
            && net
                .conf()
                .find_oper(args.first().map(String::as_str).unwrap_or(""), &userhost)
                .is_some();
        if !oper_exempt {
            svc.ignored_count.fetch_add(1, Ordering::Relaxed);
            return;
        }
    }

    // Window reset plus a read of the accumulated count; the command's
    // real cost lands after the handler runs.
    let now = net.scheduler.now();
    let flood_count = {
        let mut user = user_ref.write();
        user.flood.charge(now, svc.identity.flood_window, 0)
    };

    let lang = caller_lang(net, user_ref);

    if flood_count > svc.identity.flood_max_ignore {
        svc.ignored_count.fetch_add(1, Ordering::Relaxed);
        return;
    }
    if flood_count > svc.identity.flood_max {
        svc.msg(net, user_ref, &lang, MsgId::RateLimited, &[]);
        return;
    }

    // Shortcut-required services refuse the bare form.
    if svc.identity.require_shortcut && !shortcut_used {
        svc.msg(
            net,
            user_ref,
            &lang,
            MsgId::UseShortcut,
            &[LangArg::S(&svc.nick), LangArg::S(&net.me.name)],
        );
        return;
    }

    let oper = user_ref.read().oper.clone();

    if cmd == "HELP" {
        render_help(net, svc, user_ref, &lang, args.first().map(String::as_str));
        return;
    }

    if cmd == "OLOGIN" {
        oper_login(net, svc, user_ref, &lang, &args, &userhost, &servername);
        return;
    }
    if cmd == "OLOGOUT" {
        oper_logout(net, svc, user_ref, &lang);
        return;
    }

    let Some(entry) = svc.find_command(&cmd) else {
        svc.msg(
            net,
            user_ref,
            &lang,
            MsgId::NoAccess,
            &[LangArg::S(&svc.nick), LangArg::S(&cmd)],
        );
        return;
    };

    if entry.spec.oper_only && oper.is_none() {
        svc.msg(
            net,
            user_ref,
            &lang,
            MsgId::NoAccess,
            &[LangArg::S(&svc.nick), LangArg::S(&cmd)],
        );
        return;
    }
    if entry.spec.oper_priv != 0
        && !oper
            .as_ref()
            .is_some_and(|o| o.privs & entry.spec.oper_priv == entry.spec.oper_priv)
    {
        svc.msg(
            net,
            user_ref,
            &lang,
            MsgId::NoAccess,
            &[LangArg::S(&svc.nick), LangArg::S(&cmd)],
        );
        return;
    }

    let account = user_ref.read().account.clone();
    if entry.spec.need_login && account.is_none() {
        svc.msg(
            net,
            user_ref,
            &lang,
            MsgId::NotLoggedIn,
            &[LangArg::S(&svc.nick), LangArg::S(&cmd)],
        );
        return;
    }

    if args.len() < entry.spec.min_args {
        svc.msg(
            net,
            user_ref,
            &lang,
            MsgId::NeedMoreParams,
            &[LangArg::S(&svc.nick), LangArg::S(&cmd)],
        );
        return;
    }

    *svc.usage.entry(entry.spec.name).or_insert(0) += 1;

    let mut ctx = CmdCtx {
        user: user_ref.clone(),
        cmd,
        args,
        lang,
        account,
        oper,
    };
    let cost = entry.owner.handle(net, svc, &mut ctx).await;

    let total = u32::from(cost) + u32::from(entry.spec.flood);
    {
        let mut user = ctx.user.write();
        user.flood.count = user.flood.count.saturating_add(total);
    }
    svc.flood
        .lock()
        .charge(now, svc.identity.flood_window, total);
}

/// Resolve the language of the calling user.
pub fn caller_lang(net: &Arc<Network>, user_ref: &UserRef) -> String {
    let account = user_ref.read().account.clone();
    account
        .and_then(|a| net.registry.find_account(&a))
        .map(|a| a.read().language.clone())
        .unwrap_or_else(|| net.conf().serverinfo.default_language.clone())
}

fn render_help(
    net: &Arc<Network>,
    svc: &Arc<Service>,
    user_ref: &UserRef,
    lang: &str,
    topic: Option<&str>,
) {
    let default_lang = net.conf().serverinfo.default_language.clone();
    let is_oper = user_ref.read().oper.is_some();

    let block = {
        let help = svc.help.read();
        match topic {
            Some(topic) => help.topic(lang, &default_lang, topic),
            None => help.index(lang, &default_lang, is_oper),
        }
    };

    if block.is_empty() {
        match topic {
            Some(topic) => {
                svc.msg(net, user_ref, lang, MsgId::NoHelp, &[LangArg::S(topic)]);
            }
            None => {
                // Short-help mode: list visible commands instead.
                let names = svc.command_names(is_oper).join(" ");
                svc.msg(net, user_ref, lang, MsgId::HelpIndex, &[LangArg::S(&names)]);
            }
        }
        return;
    }

    for line in block.iter() {
        svc.notice(net, user_ref, line);
    }
}

#[allow(clippy::too_many_arguments)]
fn oper_login(
    net: &Arc<Network>,
    svc: &Arc<Service>,
    user_ref: &UserRef,
    lang: &str,
    args: &[String],
    userhost: &str,
    servername: &str,
) {
    let name = args.first().map(String::as_str).unwrap_or("");
    let pass = args.get(1).map(String::as_str).unwrap_or("");

    let conf = net.conf();
    let block = conf
        .find_oper(name, userhost)
        .filter(|o| o.server_matches(servername))
        .filter(|o| o.verify_password(pass));

    let Some(block) = block else {
        svc.msg(net, user_ref, lang, MsgId::OperLoginFailed, &[]);
        let mask = user_ref.read().mask.clone();
        watch::send(net, watch::WATCH_AUTH, &mask, &format!("failed OLOGIN as {}", name));
        return;
    };

    let session = OperSession {
        name: block.name.clone(),
        privs: privs::from_names(&block.flags),
        watchflags: watch::flags_from_names(&block.watch),
    };
    user_ref.write().oper = Some(session);

    svc.msg(net, user_ref, lang, MsgId::OperLoggedIn, &[]);
    let mask = user_ref.read().mask.clone();
    watch::send(net, watch::WATCH_AUTH, &mask, &format!("OLOGIN as {}", block.name));
}

fn oper_logout(net: &Arc<Network>, svc: &Arc<Service>, user_ref: &UserRef, lang: &str) {
    let had = {
        let mut user = user_ref.write();
        user.oper.take()
    };
    if let Some(session) = had {
        let mask = user_ref.read().mask.clone();
        watch::send(net, watch::WATCH_AUTH, &mask, &format!("OLOGOUT from {}", session.name));
    }
    svc.msg(net, user_ref, lang, MsgId::OperLoggedOut, &[]);
}

/// Look up a target user by nick for service commands; `None` covers
/// both unknown nicks and services.
pub fn find_target(net: &Arc<Network>, nick: &str) -> Option<UserRef> {
    if net.services.read().iter().any(|s| irc_eq(&s.nick, nick)) {
        return None;
    }
    net.clients.find_user(nick)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullHandler;

    #[async_trait]
    impl ServiceHandler for NullHandler {
        fn commands(&self) -> &'static [CommandSpec] {
            static TABLE: &[CommandSpec] = &[
                CommandSpec {
                    name: "ALPHA",
                    min_args: 0,
                    flood: 1,
                    need_login: false,
                    oper_only: false,
                    oper_priv: 0,
                },
                CommandSpec {
                    name: "BRAVO",
                    min_args: 0,
                    flood: 1,
                    need_login: false,
                    oper_only: true,
                    oper_priv: 0,
                },
                CommandSpec {
                    name: "CHARLIE",
                    min_args: 0,
                    flood: 1,
                    need_login: false,
                    oper_only: false,
                    oper_priv: 0,
                },
            ];
            TABLE
        }

        async fn handle(&self, _: &Arc<Network>, _: &Arc<Service>, _: &mut CmdCtx) -> u16 {
            0
        }
    }

    fn test_service() -> Arc<Service> {
        let identity = crate::config::ServiceIdentity {
            nick: "TESTSERV".into(),
            username: "svc".into(),
            host: "svc.int".into(),
            realname: "test".into(),
            flood_max: 5,
            flood_max_ignore: 15,
            flood_window: 60,
            require_shortcut: false,
        };
        Service::build("testserv", &identity, Arc::new(NullHandler), "/nonexistent")
    }

    #[test]
    fn binary_search_finds_commands() {
        let svc = test_service();
        assert!(svc.find_command("ALPHA").is_some());
        assert!(svc.find_command("CHARLIE").is_some());
        assert!(svc.find_command("DELTA").is_none());
    }

    #[test]
    fn command_names_filter_oper_only() {
        let svc = test_service();
        assert_eq!(svc.command_names(false), vec!["ALPHA", "CHARLIE"]);
        assert_eq!(svc.command_names(true), vec!["ALPHA", "BRAVO", "CHARLIE"]);
    }

    #[test]
    fn merge_keeps_table_sorted_and_restores() {
        let parent = test_service();
        let identity = crate::config::ServiceIdentity {
            nick: "OTHER".into(),
            ..parent.identity.clone()
        };

        struct OtherHandler;
        #[async_trait]
        impl ServiceHandler for OtherHandler {
            fn commands(&self) -> &'static [CommandSpec] {
                static TABLE: &[CommandSpec] = &[CommandSpec {
                    name: "BETA",
                    min_args: 0,
                    flood: 1,
                    need_login: false,
                    oper_only: false,
                    oper_priv: 0,
                }];
                TABLE
            }
            async fn handle(&self, _: &Arc<Network>, _: &Arc<Service>, _: &mut CmdCtx) -> u16 {
                0
            }
        }

        let child = Service::build("other", &identity, Arc::new(OtherHandler), "/nonexistent");
        parent.absorb(&child);
        assert_eq!(
            parent.command_names(true),
            vec!["ALPHA", "BETA", "BRAVO", "CHARLIE"]
        );
        assert!(parent.find_command("BETA").is_some());

        let children = parent.restore();
        assert_eq!(children.len(), 1);
        assert!(parent.find_command("BETA").is_none());
    }

    #[test]
    fn admin_flag_implies_all() {
        let bits = privs::from_names(&["admin".to_string()]);
        assert_eq!(bits & privs::BAN_KLINE, privs::BAN_KLINE);
        assert_eq!(bits & privs::JUPE_ADMIN, privs::JUPE_ADMIN);
    }
}
