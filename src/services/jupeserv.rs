//! The server jupe coordinator.
//!
//! A jupe introduces a fake server under our control so a delinked or
//! compromised server name cannot rejoin. Opers vote: oper and admin
//! votes score differently and the jupe applies once the configured
//! score is reached; admins holding the jupe privilege bypass voting.
//! Active jupes are reinforced whenever the juped name splits.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use svs_proto::irc_to_lower;
use tracing::info;

use crate::hook::{HookData, HookId, HookResult};
use crate::lang::{LangArg, MsgId};
use crate::state::Network;
use crate::watch;

use super::{privs, CmdCtx, CommandSpec, Service, ServiceHandler};

/// A pending vote.
struct Pending {
    reason: String,
    score: u32,
    /// Oper names that already voted.
    voters: Vec<String>,
    /// Scheduler second the vote lapses.
    expires: u64,
}

pub struct JupeServ {
    jupes_pending: Mutex<HashMap<String, Pending>>,
    unjupes_pending: Mutex<HashMap<String, Pending>>,
}

static COMMANDS: &[CommandSpec] = &[
    CommandSpec { name: "JUPE", min_args: 2, flood: 2, need_login: false, oper_only: true, oper_priv: 0 },
    CommandSpec { name: "PENDING", min_args: 0, flood: 2, need_login: false, oper_only: true, oper_priv: 0 },
    CommandSpec { name: "UNJUPE", min_args: 1, flood: 2, need_login: false, oper_only: true, oper_priv: 0 },
];

pub fn init(net: &Arc<Network>, help_root: &str) -> Arc<Service> {
    let conf = net.conf();
    let handler = Arc::new(JupeServ {
        jupes_pending: Mutex::new(HashMap::new()),
        unjupes_pending: Mutex::new(HashMap::new()),
    });
    let svc = Service::build("jupeserv", &conf.services.jupeserv.identity, handler, help_root);
    super::register(net, svc.clone());

    net.hooks.add(HookId::ServerExit, h_server_exit);
    net.hooks.add(HookId::EndOfBurst, h_eob);

    svc
}

/// Load active jupes at startup.
pub async fn load(net: &Arc<Network>) -> Result<(), crate::db::DbError> {
    for (servername, reason) in net.db.channels().load_jupes().await? {
        net.jupes.insert(irc_to_lower(&servername), reason);
    }
    Ok(())
}

/// Introduce the fake server for one jupe.
fn introduce_jupe(net: &Arc<Network>, servername: &str, reason: &str) {
    net.send(format!(
        ":{} SERVER {} 2 :JUPED: {}",
        net.me.name, servername, reason
    ));
}

/// A server left: if its name is juped, put the jupe server in place.
fn h_server_exit(net: &Arc<Network>, data: &HookData) -> HookResult {
    let HookData::Server { name } = data else {
        return HookResult::Continue;
    };
    let key = irc_to_lower(name);
    if let Some(reason) = net.jupes.get(&key).map(|r| r.value().clone()) {
        info!(server = %name, "reinforcing jupe");
        introduce_jupe(net, name, &reason);
    }
    HookResult::Continue
}

/// After burst, establish every stored jupe that is not linked.
fn h_eob(net: &Arc<Network>, _data: &HookData) -> HookResult {
    for entry in net.jupes.iter() {
        if net.clients.find_server(entry.key()).is_none() {
            introduce_jupe(net, entry.key(), entry.value());
        }
    }
    HookResult::Continue
}

/// Apply a jupe now: persist, squit any live server, introduce ours.
async fn apply_jupe(net: &Arc<Network>, servername: &str, reason: &str) {
    let key = irc_to_lower(servername);
    net.jupes.insert(key.clone(), reason.to_string());
    let _ = net.db.channels().add_jupe(servername, reason).await;

    if net.clients.find_server(servername).is_some() {
        net.send(format!("SQUIT {} :JUPED: {}", servername, reason));
        for removed in net.exit_server(servername) {
            net.hooks
                .call(net, HookId::ServerExit, &HookData::Server { name: removed });
        }
    } else {
        introduce_jupe(net, servername, reason);
    }
    info!(server = %servername, reason = %reason, "jupe applied");
}

async fn apply_unjupe(net: &Arc<Network>, servername: &str) {
    let key = irc_to_lower(servername);
    net.jupes.remove(&key);
    let _ = net.db.channels().del_jupe(servername).await;
    net.send(format!("SQUIT {} :unjuped", servername));
    info!(server = %servername, "jupe removed");
}

impl JupeServ {
    /// Record a vote; returns the new score or `None` on a repeat vote.
    fn vote(
        pending: &Mutex<HashMap<String, Pending>>,
        key: &str,
        reason: &str,
        voter: &str,
        score: u32,
        expires: u64,
        now: u64,
    ) -> Option<u32> {
        let mut map = pending.lock();
        map.retain(|_, p| p.expires > now);

        let entry = map.entry(key.to_string()).or_insert_with(|| Pending {
            reason: reason.to_string(),
            score: 0,
            voters: Vec::new(),
            expires,
        });
        if entry.voters.iter().any(|v| v == voter) {
            return None;
        }
        entry.voters.push(voter.to_string());
        entry.score += score;
        entry.expires = expires;
        Some(entry.score)
    }
}

#[async_trait]
impl ServiceHandler for JupeServ {
    fn commands(&self) -> &'static [CommandSpec] {
        COMMANDS
    }

    async fn handle(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let conf = net.conf();
        let js = &conf.services.jupeserv;
        let oper = ctx.oper.clone().unwrap_or_else(|| unreachable!("oper_only"));
        let is_admin = oper.privs & privs::JUPE_ADMIN != 0;
        let now = net.scheduler.now();

        match ctx.cmd.as_str() {
            "JUPE" => {
                let servername = ctx.arg(0).to_string();
                let reason = ctx.rest(1);
                let key = irc_to_lower(&servername);

                if !servername.contains('.') || svs_proto::irc_eq(&servername, &net.me.name) {
                    svc.msg(net, &ctx.user, &ctx.lang, MsgId::BanBadMask, &[LangArg::S(&servername)]);
                    return 1;
                }
                if net.jupes.contains_key(&key) {
                    svc.msg(net, &ctx.user, &ctx.lang, MsgId::JupeAlready, &[LangArg::S(&servername)]);
                    return 1;
                }

                if is_admin {
                    apply_jupe(net, &servername, &reason).await;
                    watch::send(net, watch::WATCH_JUPESERV, &oper.name, &format!("JUPE {}: {}", servername, reason));
                    svc.msg(net, &ctx.user, &ctx.lang, MsgId::JupeAdded, &[LangArg::S(&servername)]);
                    return 2;
                }

                let score = if oper.privs & privs::ADMIN != 0 {
                    js.admin_score
                } else {
                    js.oper_score
                };
                match Self::vote(
                    &self.jupes_pending,
                    &key,
                    &reason,
                    &oper.name,
                    score,
                    now + js.pending_time,
                    now,
                ) {
                    None => {
                        svc.msg(net, &ctx.user, &ctx.lang, MsgId::JupeAlready, &[LangArg::S(&servername)]);
                        1
                    }
                    Some(total) if total >= js.jupe_score => {
                        self.jupes_pending.lock().remove(&key);
                        apply_jupe(net, &servername, &reason).await;
                        watch::send(net, watch::WATCH_JUPESERV, &oper.name, &format!("JUPE {} (vote passed)", servername));
                        svc.msg(net, &ctx.user, &ctx.lang, MsgId::JupeAdded, &[LangArg::S(&servername)]);
                        2
                    }
                    Some(total) => {
                        watch::send(net, watch::WATCH_JUPESERV, &oper.name, &format!("JUPE vote {} ({}/{})", servername, total, js.jupe_score));
                        svc.msg(
                            net,
                            &ctx.user,
                            &ctx.lang,
                            MsgId::JupePending,
                            &[LangArg::S(&servername), LangArg::N(i64::from(total)), LangArg::N(i64::from(js.jupe_score))],
                        );
                        1
                    }
                }
            }
            "UNJUPE" => {
                let servername = ctx.arg(0).to_string();
                let key = irc_to_lower(&servername);
                if !net.jupes.contains_key(&key) {
                    svc.msg(net, &ctx.user, &ctx.lang, MsgId::BanNotFound, &[LangArg::S(&servername)]);
                    return 1;
                }

                if is_admin {
                    apply_unjupe(net, &servername).await;
                    watch::send(net, watch::WATCH_JUPESERV, &oper.name, &format!("UNJUPE {}", servername));
                    svc.msg(net, &ctx.user, &ctx.lang, MsgId::JupeRemoved, &[LangArg::S(&servername)]);
                    return 2;
                }

                let score = if oper.privs & privs::ADMIN != 0 {
                    js.admin_score
                } else {
                    js.oper_score
                };
                match Self::vote(
                    &self.unjupes_pending,
                    &key,
                    "",
                    &oper.name,
                    score,
                    now + js.pending_time,
                    now,
                ) {
                    None => 1,
                    Some(total) if total >= js.unjupe_score => {
                        self.unjupes_pending.lock().remove(&key);
                        apply_unjupe(net, &servername).await;
                        svc.msg(net, &ctx.user, &ctx.lang, MsgId::JupeRemoved, &[LangArg::S(&servername)]);
                        2
                    }
                    Some(total) => {
                        svc.msg(
                            net,
                            &ctx.user,
                            &ctx.lang,
                            MsgId::JupePending,
                            &[LangArg::S(&servername), LangArg::N(i64::from(total)), LangArg::N(i64::from(js.unjupe_score))],
                        );
                        1
                    }
                }
            }
            "PENDING" => {
                for (name, pending) in self.jupes_pending.lock().iter() {
                    svc.notice(
                        net,
                        &ctx.user,
                        &format!("  jupe {} [{}] :{}", name, pending.score, pending.reason),
                    );
                }
                for (name, pending) in self.unjupes_pending.lock().iter() {
                    svc.notice(net, &ctx.user, &format!("  unjupe {} [{}]", name, pending.score));
                }
                2
            }
            _ => 1,
        }
    }
}
