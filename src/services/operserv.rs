//! The oper helper service.
//!
//! Takeover recovery, persisted service-channel presence (OSJOIN),
//! explicit database writeback, rehash, shutdown, and the global ignore
//! list.

use std::sync::Arc;

use async_trait::async_trait;
use svs_proto::irc_to_lower;
use tracing::{error, info};

use crate::db::ServiceChanTable;
use crate::hook::{HookData, HookId, HookResult};
use crate::lang::{LangArg, MsgId};
use crate::state::{IgnoreEntry, Network};
use crate::watch;

use super::{privs, CmdCtx, CommandSpec, Service, ServiceHandler};

pub struct OperServ;

static COMMANDS: &[CommandSpec] = &[
    CommandSpec { name: "DBSYNC", min_args: 0, flood: 2, need_login: false, oper_only: true, oper_priv: privs::MAINTAIN },
    CommandSpec { name: "DIE", min_args: 1, flood: 0, need_login: false, oper_only: true, oper_priv: privs::MAINTAIN },
    CommandSpec { name: "IGNORE", min_args: 2, flood: 1, need_login: false, oper_only: true, oper_priv: privs::IGNORE },
    CommandSpec { name: "LISTIGNORES", min_args: 0, flood: 2, need_login: false, oper_only: true, oper_priv: privs::IGNORE },
    CommandSpec { name: "LISTOPERS", min_args: 0, flood: 2, need_login: false, oper_only: true, oper_priv: 0 },
    CommandSpec { name: "OSJOIN", min_args: 1, flood: 1, need_login: false, oper_only: true, oper_priv: privs::OPER_TAKEOVER },
    CommandSpec { name: "OSPART", min_args: 1, flood: 1, need_login: false, oper_only: true, oper_priv: privs::OPER_TAKEOVER },
    CommandSpec { name: "REHASH", min_args: 0, flood: 2, need_login: false, oper_only: true, oper_priv: privs::MAINTAIN },
    CommandSpec { name: "TAKEOVER", min_args: 1, flood: 2, need_login: false, oper_only: true, oper_priv: privs::OPER_TAKEOVER },
    CommandSpec { name: "UNIGNORE", min_args: 1, flood: 1, need_login: false, oper_only: true, oper_priv: privs::IGNORE },
];

pub fn init(net: &Arc<Network>, help_root: &str) -> Arc<Service> {
    let conf = net.conf();
    let svc = Service::build("operserv", &conf.services.operserv.identity, Arc::new(OperServ), help_root);
    super::register(net, svc.clone());

    net.hooks.add(HookId::EndOfBurst, h_eob);
    net.scheduler.add("operserv_dbsync", e_dbsync, 900);

    svc
}

/// Load persisted presence and the ignore list at startup.
pub async fn load(net: &Arc<Network>) -> Result<(), crate::db::DbError> {
    for (hostname, oper, reason) in net.db.channels().load_ignores().await? {
        net.ignores.insert(
            irc_to_lower(&hostname),
            IgnoreEntry {
                mask: hostname,
                oper,
                reason,
            },
        );
    }
    Ok(())
}

/// Rejoin persisted OSJOIN channels after burst.
fn h_eob(net: &Arc<Network>, _data: &HookData) -> HookResult {
    let Some(svc) = net.service_by_id("operserv") else {
        return HookResult::Continue;
    };
    let net = net.clone();
    tokio::spawn(async move {
        if let Ok(rows) = net.db.channels().load_service_channels(ServiceChanTable::Operserv).await {
            for (chname, tsinfo) in rows {
                super::service_join(
                    &net,
                    &svc,
                    &chname,
                    tsinfo.max(1) as u64,
                    &svs_proto::ChannelModes::default(),
                );
            }
        }
    });
    HookResult::Continue
}

/// The consolidated writeback: flush every dirty record in batched
/// transactions, then let listeners extend it.
pub async fn run_dbsync(net: &Arc<Network>) {
    super::userserv::flush_dirty(net).await;
    super::chanserv::flush_dirty(net).await;
    net.hooks.call(net, HookId::DbSync, &crate::hook::HookData::Empty);
    info!("database writeback complete");
}

fn e_dbsync(net: Arc<Network>) -> futures_util::future::BoxFuture<'static, ()> {
    Box::pin(async move {
        run_dbsync(&net).await;
    })
}

#[async_trait]
impl ServiceHandler for OperServ {
    fn commands(&self) -> &'static [CommandSpec] {
        COMMANDS
    }

    async fn handle(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let oper_name = ctx.oper.as_ref().map(|o| o.name.clone()).unwrap_or_default();
        match ctx.cmd.as_str() {
            "TAKEOVER" => {
                let chname = ctx.arg(0).to_string();
                if crate::services::chanserv::takeover(net, &irc_to_lower(&chname)).await {
                    watch::send(net, watch::WATCH_OPERSERV, &oper_name, &format!("TAKEOVER {}", chname));
                    svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanTakenOver, &[LangArg::S(&chname)]);
                } else {
                    svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanNotRegistered, &[LangArg::S(&chname)]);
                }
                2
            }
            "OSJOIN" => {
                let chname = ctx.arg(0).to_string();
                let ts = net
                    .channels
                    .find(&chname)
                    .map(|c| c.read().ts)
                    .unwrap_or_else(Network::epoch);
                super::service_join(net, svc, &chname, ts, &svs_proto::ChannelModes::default());
                let _ = net
                    .db
                    .channels()
                    .add_service_channel(ServiceChanTable::Operserv, &chname, ts as i64, &oper_name)
                    .await;
                svc.msg(net, &ctx.user, &ctx.lang, MsgId::SuccessfulOn, &[LangArg::S("OSJOIN"), LangArg::S(&chname)]);
                1
            }
            "OSPART" => {
                let chname = ctx.arg(0).to_string();
                super::service_part(net, svc, &chname, "");
                let _ = net
                    .db
                    .channels()
                    .del_service_channel(ServiceChanTable::Operserv, &chname)
                    .await;
                svc.msg(net, &ctx.user, &ctx.lang, MsgId::SuccessfulOn, &[LangArg::S("OSPART"), LangArg::S(&chname)]);
                1
            }
            "DBSYNC" => {
                run_dbsync(net).await;
                svc.msg(net, &ctx.user, &ctx.lang, MsgId::Successful, &[LangArg::S("DBSYNC")]);
                2
            }
            "REHASH" => {
                if ctx.arg(0).eq_ignore_ascii_case("help") {
                    super::reload_help(net);
                    svc.msg(net, &ctx.user, &ctx.lang, MsgId::Successful, &[LangArg::S("REHASH HELP")]);
                    return 2;
                }
                match crate::rehash(net) {
                    Ok(()) => {
                        watch::send(net, watch::WATCH_OPERSERV, &oper_name, "REHASH");
                        svc.msg(net, &ctx.user, &ctx.lang, MsgId::Successful, &[LangArg::S("REHASH")]);
                    }
                    Err(e) => {
                        error!(error = %e, "rehash failed");
                        svc.notice(net, &ctx.user, &format!("Rehash failed: {}", e));
                    }
                }
                2
            }
            "DIE" => {
                let reason = ctx.rest(0);
                error!(oper = %oper_name, reason = %reason, "shutdown requested");
                net.send(format!(
                    ":{} WALLOPS :services terminating: {}",
                    svc.source_token(net),
                    reason
                ));
                net.db.close().await;
                std::process::exit(1);
            }
            "IGNORE" => {
                let mask = ctx.arg(0).to_string();
                let reason = ctx.rest(1);
                let key = irc_to_lower(&mask);
                if net.ignores.contains_key(&key) {
                    svc.msg(net, &ctx.user, &ctx.lang, MsgId::BanExists, &[LangArg::S(&mask)]);
                    return 1;
                }
                net.ignores.insert(
                    key,
                    IgnoreEntry {
                        mask: mask.clone(),
                        oper: oper_name.clone(),
                        reason: reason.clone(),
                    },
                );
                let _ = net.db.channels().add_ignore(&mask, &oper_name, &reason).await;
                watch::send(net, watch::WATCH_OPERSERV, &oper_name, &format!("IGNORE {}", mask));
                svc.msg(net, &ctx.user, &ctx.lang, MsgId::Successful, &[LangArg::S("IGNORE")]);
                1
            }
            "UNIGNORE" => {
                let mask = ctx.arg(0).to_string();
                if net.ignores.remove(&irc_to_lower(&mask)).is_none() {
                    svc.msg(net, &ctx.user, &ctx.lang, MsgId::BanNotFound, &[LangArg::S(&mask)]);
                    return 1;
                }
                let _ = net.db.channels().del_ignore(&mask).await;
                svc.msg(net, &ctx.user, &ctx.lang, MsgId::Successful, &[LangArg::S("UNIGNORE")]);
                1
            }
            "LISTIGNORES" => {
                for entry in net.ignores.iter() {
                    svc.notice(
                        net,
                        &ctx.user,
                        &format!("  {} [{}] :{}", entry.value().mask, entry.value().oper, entry.value().reason),
                    );
                }
                2
            }
            "LISTOPERS" => {
                for entry in net.clients.by_nick.iter() {
                    let user = entry.value().read();
                    if let Some(oper) = &user.oper {
                        svc.notice(net, &ctx.user, &format!("  {} as {}", user.mask, oper.name));
                    }
                }
                2
            }
            _ => 1,
        }
    }
}
