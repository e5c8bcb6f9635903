//! The network ban service.
//!
//! Klines, xlines and resvs with timed or permanent holds, regex bans
//! auto-applied to new clients, and SYNC replay to one or all servers.
//! A removal never deletes its row outright: the row flips to a removal
//! marker with its own hold so repeated syncs keep broadcasting the
//! unban until the marker is reaped.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use regex::Regex;
use tracing::{info, warn};

use crate::db::OperBanRow;
use crate::hook::{HookData, HookId, HookResult};
use crate::lang::{LangArg, MsgId};
use crate::state::Network;
use crate::watch;

use super::{privs, CmdCtx, CommandSpec, Service, ServiceHandler};

/// Anchored `nick!user@host#gecos` shape every regex ban must have.
const REGEX_SHAPE: &str = r"^\^.+!.+@.+#.+\$$";

/// An active mask ban (or pending removal marker).
#[derive(Debug, Clone)]
pub struct OperBan {
    /// 'K', 'X' or 'R'.
    pub ban_type: char,
    pub mask: String,
    pub reason: String,
    pub operreason: Option<String>,
    pub oper: String,
    /// Epoch expiry, 0 for permanent.
    pub hold: u64,
    /// True when this row marks a pending removal.
    pub remove: bool,
    pub flags: u32,
    pub create_time: u64,
}

impl OperBan {
    fn key(&self) -> String {
        ban_key(self.ban_type, &self.mask)
    }

    fn active(&self, now: u64) -> bool {
        !self.remove && (self.hold == 0 || self.hold > now)
    }
}

fn ban_key(ban_type: char, mask: &str) -> String {
    format!("{}:{}", ban_type, svs_proto::irc_to_lower(mask))
}

/// A compiled regex ban with its negations.
#[derive(Debug)]
pub struct RegexBan {
    pub id: i64,
    pub raw: String,
    pub re: Regex,
    pub reason: String,
    pub hold: u64,
    pub oper: String,
    pub negations: Vec<(i64, Regex)>,
}

pub struct BanServ;

static COMMANDS: &[CommandSpec] = &[
    CommandSpec { name: "ADDREGEXP", min_args: 2, flood: 2, need_login: false, oper_only: true, oper_priv: privs::BAN_REGEXP },
    CommandSpec { name: "DELREGEXP", min_args: 1, flood: 1, need_login: false, oper_only: true, oper_priv: privs::BAN_REGEXP },
    CommandSpec { name: "FINDKLINE", min_args: 1, flood: 2, need_login: false, oper_only: true, oper_priv: privs::BAN_KLINE },
    CommandSpec { name: "KLINE", min_args: 2, flood: 1, need_login: false, oper_only: true, oper_priv: privs::BAN_KLINE },
    CommandSpec { name: "LISTREGEXP", min_args: 0, flood: 2, need_login: false, oper_only: true, oper_priv: privs::BAN_REGEXP },
    CommandSpec { name: "RESV", min_args: 2, flood: 1, need_login: false, oper_only: true, oper_priv: privs::BAN_RESV },
    CommandSpec { name: "SYNC", min_args: 1, flood: 3, need_login: false, oper_only: true, oper_priv: privs::BAN_SYNC },
    CommandSpec { name: "UNKLINE", min_args: 1, flood: 1, need_login: false, oper_only: true, oper_priv: privs::BAN_KLINE },
    CommandSpec { name: "UNRESV", min_args: 1, flood: 1, need_login: false, oper_only: true, oper_priv: privs::BAN_RESV },
    CommandSpec { name: "UNXLINE", min_args: 1, flood: 1, need_login: false, oper_only: true, oper_priv: privs::BAN_XLINE },
    CommandSpec { name: "XLINE", min_args: 2, flood: 1, need_login: false, oper_only: true, oper_priv: privs::BAN_XLINE },
];

pub fn init(net: &Arc<Network>, help_root: &str) -> Arc<Service> {
    let conf = net.conf();
    let svc = Service::build("banserv", &conf.services.banserv.identity, Arc::new(BanServ), help_root);
    super::register(net, svc.clone());

    net.hooks.add(HookId::NewClient, h_new_client);

    net.scheduler.add("banserv_expire", e_expire, 3600);
    if conf.services.banserv.autosync_frequency > 0 {
        net.scheduler.add("banserv_autosync", e_autosync, conf.services.banserv.autosync_frequency);
    }

    crate::dcc::register_command(
        net,
        crate::dcc::DccCommand {
            name: "sync",
            privs: super::privs::BAN_SYNC,
            handler: dcc_sync,
        },
    );

    svc
}

/// `.sync [target]` from the oper control channel.
fn dcc_sync(net: &Arc<Network>, session: &Arc<crate::state::DccSession>, args: &[&str]) {
    let Some(svc) = net.service_by_id("banserv") else {
        return;
    };
    let target = args.first().copied().unwrap_or("*");
    sync_to(net, &svc, target, None);
    let _ = session.tx.send(format!("Ban sync issued to {}", target));
}

/// Load bans and regex bans from the store at startup.
pub async fn load(net: &Arc<Network>) -> Result<(), crate::db::DbError> {
    for row in net.db.bans().load_all().await? {
        let ban = OperBan {
            ban_type: row.r#type.chars().next().unwrap_or('K'),
            mask: row.mask,
            reason: row.reason,
            operreason: row.operreason,
            oper: row.oper,
            hold: row.hold.max(0) as u64,
            remove: row.remove != 0,
            flags: row.flags as u32,
            create_time: row.create_time.max(0) as u64,
        };
        net.operbans.insert(ban.key(), ban);
    }

    let mut compiled = Vec::new();
    for row in net.db.bans().load_regexes().await? {
        match Regex::new(&row.regex) {
            Ok(re) => {
                let negations = row
                    .negations
                    .iter()
                    .filter_map(|(id, neg)| Regex::new(neg).ok().map(|re| (*id, re)))
                    .collect();
                compiled.push(RegexBan {
                    id: row.id,
                    raw: row.regex,
                    re,
                    reason: row.reason,
                    hold: row.hold.max(0) as u64,
                    oper: row.oper,
                    negations,
                });
            }
            Err(e) => warn!(regex = %row.regex, error = %e, "stored regex no longer compiles"),
        }
    }
    let count = compiled.len();
    *net.regex_bans.write() = compiled;

    info!(bans = net.operbans.len(), regexes = count, "ban tables loaded");
    Ok(())
}

/// The wire form of one ban against a target server mask.
fn ban_line(source: &str, target: &str, ban: &OperBan, now: u64) -> String {
    let duration = if ban.hold == 0 {
        0
    } else {
        ban.hold.saturating_sub(now)
    };
    match (ban.ban_type, ban.remove) {
        ('K', false) => {
            let (user, host) = ban.mask.split_once('@').unwrap_or(("*", ban.mask.as_str()));
            format!(":{} ENCAP {} KLINE {} {} {} :{}", source, target, duration, user, host, ban.reason)
        }
        ('K', true) => {
            let (user, host) = ban.mask.split_once('@').unwrap_or(("*", ban.mask.as_str()));
            format!(":{} ENCAP {} UNKLINE {} {}", source, target, user, host)
        }
        ('X', false) => format!(":{} ENCAP {} XLINE {} {} 2 :{}", source, target, duration, ban.mask, ban.reason),
        ('X', true) => format!(":{} ENCAP {} UNXLINE {}", source, target, ban.mask),
        ('R', false) => format!(":{} ENCAP {} RESV {} {} 0 :{}", source, target, duration, ban.mask, ban.reason),
        (_, true) => format!(":{} ENCAP {} UNRESV {}", source, target, ban.mask),
        _ => unreachable!(),
    }
}

/// Replay all bans to a target server mask: temporary, then permanent,
/// then removal markers.
fn sync_to(net: &Arc<Network>, svc: &Arc<Service>, target: &str, types: Option<char>) {
    let source = svc.source_token(net);
    let now = Network::epoch();

    let mut temp = Vec::new();
    let mut perm = Vec::new();
    let mut removals = Vec::new();
    for entry in net.operbans.iter() {
        let ban = entry.value();
        if let Some(t) = types {
            if ban.ban_type != t {
                continue;
            }
        }
        if ban.remove {
            if ban.hold > now {
                removals.push(ban.clone());
            }
        } else if ban.hold == 0 {
            perm.push(ban.clone());
        } else if ban.hold > now {
            temp.push(ban.clone());
        }
    }

    for ban in temp.iter().chain(perm.iter()).chain(removals.iter()) {
        net.send(ban_line(&source, target, ban, now));
    }
}

/// Auto-kline evaluation for a freshly introduced client.
fn h_new_client(net: &Arc<Network>, data: &HookData) -> HookResult {
    let HookData::Client { uid } = data else {
        return HookResult::Continue;
    };
    let Some(user_ref) = net.clients.by_key(uid) else {
        return HookResult::Continue;
    };
    let Some(svc) = net.service_by_id("banserv") else {
        return HookResult::Continue;
    };

    let (subject, host, servername) = {
        let user = user_ref.read();
        (
            format!("{}#{}", user.mask, user.info),
            user.host.clone(),
            user.servername.clone(),
        )
    };

    let regex_time = net.conf().services.banserv.regexp_time;
    let bans = net.regex_bans.read();
    for ban in bans.iter() {
        if !ban.re.is_match(&subject) {
            continue;
        }
        if ban.negations.iter().any(|(_, neg)| neg.is_match(&subject)) {
            continue;
        }

        net.send(format!(
            ":{} ENCAP {} KLINE {} * {} :{}",
            svc.source_token(net),
            servername,
            regex_time,
            host,
            ban.reason
        ));
        watch::send(
            net,
            watch::WATCH_BANSERV,
            &svc.nick,
            &format!("regex kline on {} ({})", subject, ban.raw),
        );
        break;
    }
    HookResult::Continue
}

// --- events --------------------------------------------------------------

/// Reap rows whose hold lapsed, in memory and in the store.
fn e_expire(net: Arc<Network>) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        let now = Network::epoch();
        net.operbans
            .retain(|_, ban| ban.hold == 0 || ban.hold > now);
        match net.db.bans().reap_expired(now as i64).await {
            Ok(n) if n > 0 => info!(removed = n, "expired oper bans reaped"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "oper ban reap failed"),
        }
    })
}

/// Periodic broadcast of everything to every server.
fn e_autosync(net: Arc<Network>) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        if !net.is_registered() {
            return;
        }
        let Some(svc) = net.service_by_id("banserv") else {
            return;
        };
        sync_to(&net, &svc, "*", None);
    })
}

// --- command implementation ----------------------------------------------

/// Split `[duration] rest...` at the front of the argument list.
fn split_duration(args: &[String]) -> (u64, usize) {
    match args.first().and_then(|a| svs_proto::parse_duration(a)) {
        Some(secs) if args.len() > 1 => (secs, 1),
        _ => (0, 0),
    }
}

#[async_trait]
impl ServiceHandler for BanServ {
    fn commands(&self) -> &'static [CommandSpec] {
        COMMANDS
    }

    async fn handle(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        match ctx.cmd.as_str() {
            "KLINE" => self.cmd_ban(net, svc, ctx, 'K').await,
            "XLINE" => self.cmd_ban(net, svc, ctx, 'X').await,
            "RESV" => self.cmd_ban(net, svc, ctx, 'R').await,
            "UNKLINE" => self.cmd_unban(net, svc, ctx, 'K').await,
            "UNXLINE" => self.cmd_unban(net, svc, ctx, 'X').await,
            "UNRESV" => self.cmd_unban(net, svc, ctx, 'R').await,
            "SYNC" => self.cmd_sync(net, svc, ctx),
            "FINDKLINE" => self.cmd_find(net, svc, ctx),
            "ADDREGEXP" => self.cmd_addregexp(net, svc, ctx).await,
            "DELREGEXP" => self.cmd_delregexp(net, svc, ctx).await,
            "LISTREGEXP" => self.cmd_listregexp(net, svc, ctx),
            _ => 1,
        }
    }
}

impl BanServ {
    async fn cmd_ban(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx, ban_type: char) -> u16 {
        let conf = net.conf();
        let bs = &conf.services.banserv;
        let oper = ctx.oper.clone().unwrap_or_else(|| unreachable!("oper_only"));

        let (duration, skip) = split_duration(&ctx.args);
        if ctx.args.len() < skip + 2 {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::NeedMoreParams, &[LangArg::S(&svc.nick), LangArg::S(&ctx.cmd)]);
            return 1;
        }
        let mask = ctx.arg(skip).to_string();
        let reason = ctx.rest(skip + 1);

        if duration == 0 && oper.privs & privs::BAN_PERM == 0 {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::BanNoPermBan, &[]);
            return 1;
        }

        // Shape checks and the match-count guard per type.
        let matches = match ban_type {
            'K' => {
                if !mask.contains('@') || mask.contains('!') {
                    svc.msg(net, &ctx.user, &ctx.lang, MsgId::BanBadMask, &[LangArg::S(&mask)]);
                    return 1;
                }
                Some(net.count_userhost_matches(&mask))
            }
            'X' => Some(count_gecos_matches(net, &mask)),
            _ => None,
        };
        if let Some(count) = matches {
            let limit = if ban_type == 'K' { bs.max_kline_matches } else { bs.max_xline_matches };
            if count > limit && oper.privs & privs::BAN_NOMAX == 0 {
                svc.msg(
                    net,
                    &ctx.user,
                    &ctx.lang,
                    MsgId::BanTooManyMatches,
                    &[LangArg::S(&mask), LangArg::N(i64::from(count))],
                );
                return 1;
            }
        }

        let now = Network::epoch();
        let key = ban_key(ban_type, &mask);
        if net.operbans.get(&key).is_some_and(|b| b.active(now)) {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::BanExists, &[LangArg::S(&mask)]);
            return 1;
        }

        let ban = OperBan {
            ban_type,
            mask: mask.clone(),
            reason: reason.clone(),
            operreason: None,
            oper: oper.name.clone(),
            hold: if duration == 0 { 0 } else { now + duration },
            remove: false,
            flags: 0,
            create_time: now,
        };

        let row = OperBanRow {
            r#type: ban_type.to_string(),
            mask: mask.clone(),
            reason: reason.clone(),
            operreason: None,
            oper: oper.name.clone(),
            hold: ban.hold as i64,
            remove: 0,
            flags: 0,
            create_time: now as i64,
        };
        if let Err(e) = net.db.bans().upsert(&row).await {
            warn!(error = %e, "oper ban insert failed");
            return 1;
        }

        let source = svc.source_token(net);
        net.send(ban_line(&source, "*", &ban, now));
        net.operbans.insert(key, ban);

        watch::send(net, watch::WATCH_BANSERV, &oper.name, &format!("{} {} :{}", ctx.cmd, mask, reason));
        svc.msg(net, &ctx.user, &ctx.lang, MsgId::BanAdded, &[LangArg::S(&mask), LangArg::S("*")]);
        2
    }

    async fn cmd_unban(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx, ban_type: char) -> u16 {
        let mask = ctx.arg(0).to_string();
        let oper = ctx.oper.as_ref().map(|o| o.name.clone()).unwrap_or_default();
        let key = ban_key(ban_type, &mask);
        let unban_time = net.conf().services.banserv.unban_time;
        let now = Network::epoch();

        let Some(mut entry) = net.operbans.get_mut(&key) else {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::BanNotFound, &[LangArg::S(&mask)]);
            return 1;
        };
        if entry.remove {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::BanNotFound, &[LangArg::S(&mask)]);
            return 1;
        }
        entry.remove = true;
        entry.hold = now + unban_time;
        let ban = entry.clone();
        drop(entry);

        let _ = net
            .db
            .bans()
            .mark_removed(&ban_type.to_string(), &mask, (now + unban_time) as i64)
            .await;

        let source = svc.source_token(net);
        net.send(ban_line(&source, "*", &ban, now));
        watch::send(net, watch::WATCH_BANSERV, &oper, &format!("{} {}", ctx.cmd, mask));
        svc.msg(net, &ctx.user, &ctx.lang, MsgId::BanRemoved, &[LangArg::S(&mask), LangArg::S("*")]);
        1
    }

    fn cmd_sync(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let target = ctx.arg(0).to_string();
        let types = match ctx.arg(1).to_ascii_lowercase().as_str() {
            "klines" => Some('K'),
            "xlines" => Some('X'),
            "resvs" => Some('R'),
            _ => None,
        };

        // The target must glob-match at least one linked server.
        let pattern = glob::Pattern::new(&target.to_lowercase()).ok();
        let matched = target == "*"
            || net.clients.servers.iter().any(|entry| {
                pattern
                    .as_ref()
                    .is_some_and(|p| p.matches(&entry.value().read().name.to_lowercase()))
            });
        if !matched {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::BanNotFound, &[LangArg::S(&target)]);
            return 1;
        }

        sync_to(net, svc, &target, types);
        svc.msg(net, &ctx.user, &ctx.lang, MsgId::BanSynced, &[LangArg::S(&target)]);
        3
    }

    fn cmd_find(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let pattern = ctx.arg(0).to_string();
        let now = Network::epoch();
        let mut shown = 0;

        for entry in net.operbans.iter() {
            let ban = entry.value();
            if ban.ban_type != 'K' || !ban.active(now) {
                continue;
            }
            if !svs_proto::match_mask(&pattern, &ban.mask) {
                continue;
            }
            let hold = if ban.hold == 0 {
                "perm".to_string()
            } else {
                svs_proto::format_duration(ban.hold.saturating_sub(now))
            };
            svc.notice(
                net,
                &ctx.user,
                &format!("  {} ({}) [{}] :{}", ban.mask, hold, ban.oper, ban.reason),
            );
            shown += 1;
            if shown >= 50 {
                break;
            }
        }
        if shown == 0 {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::BanNotFound, &[LangArg::S(&pattern)]);
        }
        2
    }

    async fn cmd_addregexp(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let conf = net.conf();
        let bs = &conf.services.banserv;
        let oper = ctx.oper.as_ref().map(|o| o.name.clone()).unwrap_or_default();

        let (duration, skip) = split_duration(&ctx.args);
        if ctx.args.len() < skip + 2 {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::NeedMoreParams, &[LangArg::S(&svc.nick), LangArg::S("ADDREGEXP")]);
            return 1;
        }
        let raw = ctx.arg(skip).to_string();
        let reason = ctx.rest(skip + 1);

        // The validator regex pins the nick!user@host#gecos shape.
        let shape = Regex::new(REGEX_SHAPE).expect("validator regex");
        if !shape.is_match(&raw) {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::BanBadRegex, &[LangArg::S(&raw)]);
            return 1;
        }
        let Ok(re) = Regex::new(&raw) else {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::BanBadRegex, &[LangArg::S(&raw)]);
            return 1;
        };

        // Match-count guard against the live user set.
        let mut count = 0u32;
        for entry in net.clients.by_nick.iter() {
            let user = entry.value().read();
            if re.is_match(&format!("{}#{}", user.mask, user.info)) {
                count += 1;
            }
        }
        let nomax = ctx.oper.as_ref().is_some_and(|o| o.privs & privs::BAN_NOMAX != 0);
        if count > bs.max_regexp_matches && !nomax {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::BanTooManyMatches, &[LangArg::S(&raw), LangArg::N(i64::from(count))]);
            return 1;
        }

        let now = Network::epoch();
        let hold = if duration == 0 { 0 } else { now + duration };
        let id = match net
            .db
            .bans()
            .insert_regex(&raw, &reason, hold as i64, now as i64, &oper)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "regex ban insert failed");
                return 1;
            }
        };

        net.regex_bans.write().push(RegexBan {
            id,
            raw: raw.clone(),
            re,
            reason,
            hold,
            oper: oper.clone(),
            negations: Vec::new(),
        });

        watch::send(net, watch::WATCH_BANSERV, &oper, &format!("ADDREGEXP {}", raw));
        svc.msg(net, &ctx.user, &ctx.lang, MsgId::BanAdded, &[LangArg::S(&raw), LangArg::S("*")]);
        2
    }

    async fn cmd_delregexp(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let raw = ctx.arg(0).to_string();
        let oper = ctx.oper.as_ref().map(|o| o.name.clone()).unwrap_or_default();

        let id = {
            let mut bans = net.regex_bans.write();
            match bans.iter().position(|b| b.raw == raw) {
                Some(idx) => Some(bans.remove(idx).id),
                None => None,
            }
        };
        let Some(id) = id else {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::BanNotFound, &[LangArg::S(&raw)]);
            return 1;
        };

        let _ = net.db.bans().delete_regex(id).await;
        watch::send(net, watch::WATCH_BANSERV, &oper, &format!("DELREGEXP {}", raw));
        svc.msg(net, &ctx.user, &ctx.lang, MsgId::BanRemoved, &[LangArg::S(&raw), LangArg::S("*")]);
        1
    }

    fn cmd_listregexp(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let now = Network::epoch();
        for ban in net.regex_bans.read().iter() {
            let hold = if ban.hold == 0 {
                "perm".to_string()
            } else {
                svs_proto::format_duration(ban.hold.saturating_sub(now))
            };
            svc.notice(
                net,
                &ctx.user,
                &format!("  #{} {} ({}) [{}] :{}", ban.id, ban.raw, hold, ban.oper, ban.reason),
            );
        }
        2
    }
}

/// Count live users whose `nick!user@host#gecos` matches a wildcard.
fn count_gecos_matches(net: &Arc<Network>, mask: &str) -> u32 {
    let mut count = 0;
    for entry in net.clients.by_nick.iter() {
        let user = entry.value().read();
        if svs_proto::match_mask(mask, &user.info) {
            count += 1;
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regex_shape_validator() {
        let shape = Regex::new(REGEX_SHAPE).unwrap();
        assert!(shape.is_match(r"^.*!spam@.*#.*$"));
        assert!(shape.is_match(r"^evil.*!.+@host\.example#gecos$"));
        // Unanchored or missing segments fail.
        assert!(!shape.is_match(r".*!spam@.*#.*$"));
        assert!(!shape.is_match(r"^.*!spam@.*$"));
        assert!(!shape.is_match(r"^.*spam.*$"));
    }

    #[test]
    fn duration_splitting() {
        let args: Vec<String> = vec!["60".into(), "x@y".into(), "why".into()];
        assert_eq!(split_duration(&args), (3600, 1));
        let args: Vec<String> = vec!["x@y".into(), "why".into()];
        assert_eq!(split_duration(&args), (0, 0));
    }

    #[test]
    fn ban_lines_have_encap_shape() {
        // Smoke-test the wire forms without a Network.
        let ban = OperBan {
            ban_type: 'K',
            mask: "spam@evil.example".into(),
            reason: "spam".into(),
            operreason: None,
            oper: "lee".into(),
            hold: 0,
            remove: false,
            flags: 0,
            create_time: 0,
        };
        // ban_line needs a Network only for nothing today; shape is
        // exercised through the integration tests.
        assert_eq!(ban.key(), "K:spam@evil.example");
        assert!(ban.active(100));
    }
}
