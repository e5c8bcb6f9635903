//! The network notice service.
//!
//! Broadcasts notices to every server and keeps the numbered welcome
//! messages shown to clients as they connect.

use std::sync::Arc;

use async_trait::async_trait;

use crate::hook::{HookData, HookId, HookResult};
use crate::lang::{LangArg, MsgId};
use crate::state::Network;
use crate::watch;

use super::{privs, CmdCtx, CommandSpec, Service, ServiceHandler};

pub struct Global;

static COMMANDS: &[CommandSpec] = &[
    CommandSpec { name: "ADDWELCOME", min_args: 2, flood: 1, need_login: false, oper_only: true, oper_priv: privs::GLOBAL },
    CommandSpec { name: "DELWELCOME", min_args: 1, flood: 1, need_login: false, oper_only: true, oper_priv: privs::GLOBAL },
    CommandSpec { name: "LISTWELCOME", min_args: 0, flood: 2, need_login: false, oper_only: true, oper_priv: privs::GLOBAL },
    CommandSpec { name: "NETMSG", min_args: 1, flood: 3, need_login: false, oper_only: true, oper_priv: privs::GLOBAL },
];

pub fn init(net: &Arc<Network>, help_root: &str) -> Arc<Service> {
    let conf = net.conf();
    let svc = Service::build("global", &conf.services.global.identity, Arc::new(Global), help_root);
    super::register(net, svc.clone());

    net.hooks.add(HookId::NewClient, h_new_client);
    svc
}

/// Load welcome messages at startup.
pub async fn load(net: &Arc<Network>) -> Result<(), crate::db::DbError> {
    let rows = net.db.channels().load_welcome().await?;
    *net.welcome.write() = rows;
    Ok(())
}

/// Send welcome messages to newly introduced users.
fn h_new_client(net: &Arc<Network>, data: &HookData) -> HookResult {
    let HookData::Client { uid } = data else {
        return HookResult::Continue;
    };
    // Welcomes only make sense once the network is settled; bursts
    // replay thousands of old clients.
    if !net.is_registered() {
        return HookResult::Continue;
    }
    let Some(user_ref) = net.clients.by_key(uid) else {
        return HookResult::Continue;
    };
    let Some(svc) = net.service_by_id("global") else {
        return HookResult::Continue;
    };

    for (_, text) in net.welcome.read().iter() {
        svc.notice(net, &user_ref, text);
    }
    HookResult::Continue
}

#[async_trait]
impl ServiceHandler for Global {
    fn commands(&self) -> &'static [CommandSpec] {
        COMMANDS
    }

    async fn handle(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let oper_name = ctx.oper.as_ref().map(|o| o.name.clone()).unwrap_or_default();
        match ctx.cmd.as_str() {
            "NETMSG" => {
                let text = ctx.rest(0);
                net.send(format!(
                    ":{} WALLOPS :[NETWORK] {}",
                    svc.source_token(net),
                    text
                ));
                watch::send(net, watch::WATCH_GLOBAL, &oper_name, &format!("NETMSG {}", text));
                svc.msg(net, &ctx.user, &ctx.lang, MsgId::Successful, &[LangArg::S("NETMSG")]);
                3
            }
            "ADDWELCOME" => {
                let Ok(id) = ctx.arg(0).parse::<i64>() else {
                    svc.msg(net, &ctx.user, &ctx.lang, MsgId::NeedMoreParams, &[LangArg::S(&svc.nick), LangArg::S("ADDWELCOME")]);
                    return 1;
                };
                let text = ctx.rest(1);
                let _ = net.db.channels().set_welcome(id, &text).await;
                {
                    let mut welcome = net.welcome.write();
                    welcome.retain(|(slot, _)| *slot != id);
                    welcome.push((id, text));
                    welcome.sort_by_key(|(slot, _)| *slot);
                }
                svc.msg(net, &ctx.user, &ctx.lang, MsgId::GlobalWelcomeSet, &[LangArg::N(id)]);
                1
            }
            "DELWELCOME" => {
                let Ok(id) = ctx.arg(0).parse::<i64>() else {
                    return 1;
                };
                let existed = net.db.channels().del_welcome(id).await.unwrap_or(false);
                if !existed {
                    svc.msg(net, &ctx.user, &ctx.lang, MsgId::GlobalWelcomeNotFound, &[LangArg::N(id)]);
                    return 1;
                }
                net.welcome.write().retain(|(slot, _)| *slot != id);
                svc.msg(net, &ctx.user, &ctx.lang, MsgId::GlobalWelcomeDeleted, &[LangArg::N(id)]);
                1
            }
            "LISTWELCOME" => {
                for (id, text) in net.welcome.read().iter() {
                    svc.notice(net, &ctx.user, &format!("  {}: {}", id, text));
                }
                2
            }
            _ => 1,
        }
    }
}
