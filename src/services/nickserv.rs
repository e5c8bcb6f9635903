//! The nickname registry service.
//!
//! Nicknames bind to accounts. Registration takes the caller's current
//! nick; a warn flag notifies strangers using a registered nick that it
//! is taken. Nicknames ride along with account expiry rather than
//! expiring on their own.

use std::sync::Arc;

use async_trait::async_trait;
use svs_proto::irc_to_lower;
use tracing::info;

use crate::hook::{HookData, HookId, HookResult};
use crate::lang::{LangArg, MsgId};
use crate::state::{Network, RegNick, NF_WARN};
use crate::watch;

use super::{CmdCtx, CommandSpec, Service, ServiceHandler};

pub struct NickServ;

static COMMANDS: &[CommandSpec] = &[
    CommandSpec { name: "DROP", min_args: 1, flood: 1, need_login: true, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "INFO", min_args: 1, flood: 2, need_login: false, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "REGISTER", min_args: 0, flood: 3, need_login: true, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "SET", min_args: 2, flood: 1, need_login: true, oper_only: false, oper_priv: 0 },
];

pub fn init(net: &Arc<Network>, help_root: &str) -> Arc<Service> {
    let conf = net.conf();
    let svc = Service::build("nickserv", &conf.services.nickserv.identity, Arc::new(NickServ), help_root);
    super::register(net, svc.clone());

    net.hooks.add(HookId::NewClient, h_new_client);
    svc
}

/// Warn strangers that the nick they introduced is registered.
fn h_new_client(net: &Arc<Network>, data: &HookData) -> HookResult {
    let HookData::Client { uid } = data else {
        return HookResult::Continue;
    };
    let Some(user_ref) = net.clients.by_key(uid) else {
        return HookResult::Continue;
    };

    let (nick_key, account) = {
        let user = user_ref.read();
        (irc_to_lower(&user.nick), user.account.clone())
    };
    let Some(reg) = net.registry.nicks.get(&nick_key).map(|n| n.value().clone()) else {
        return HookResult::Continue;
    };
    if reg.flags & NF_WARN == 0 {
        return HookResult::Continue;
    }
    if account.as_deref() == Some(reg.account.as_str()) {
        return HookResult::Continue;
    }

    if let Some(svc) = net.service_by_id("nickserv") {
        let text = net
            .langs
            .read()
            .render("en", MsgId::NickInUseWarn, &[LangArg::S(&reg.name)]);
        svc.notice(net, &user_ref, &text);
    }
    HookResult::Continue
}

#[async_trait]
impl ServiceHandler for NickServ {
    fn commands(&self) -> &'static [CommandSpec] {
        COMMANDS
    }

    async fn handle(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        match ctx.cmd.as_str() {
            "REGISTER" => self.cmd_register(net, svc, ctx).await,
            "DROP" => self.cmd_drop(net, svc, ctx).await,
            "INFO" => self.cmd_info(net, svc, ctx),
            "SET" => self.cmd_set(net, svc, ctx).await,
            _ => 1,
        }
    }
}

impl NickServ {
    async fn cmd_register(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let (nick, nick_key) = {
            let user = ctx.user.read();
            (user.nick.clone(), irc_to_lower(&user.nick))
        };
        if net.registry.nicks.contains_key(&nick_key) {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::NickAlreadyRegistered, &[LangArg::S(&nick)]);
            return 1;
        }

        let account_key = ctx.account.clone().unwrap_or_default();
        let Some(account_ref) = net.registry.find_account(&account_key) else {
            return 1;
        };
        let max_nicks = net.conf().services.nickserv.max_nicks;
        let (display_account, nick_count) = {
            let account = account_ref.read();
            (account.name.clone(), account.nicks.len())
        };
        if nick_count >= max_nicks as usize {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::NickTooMany, &[LangArg::N(i64::from(max_nicks))]);
            return 1;
        }

        let now = Network::epoch();
        if net
            .db
            .accounts()
            .insert_nick(&nick, &display_account, now as i64)
            .await
            .is_err()
        {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::NickAlreadyRegistered, &[LangArg::S(&nick)]);
            return 1;
        }

        net.registry.nicks.insert(
            nick_key.clone(),
            RegNick {
                name: nick.clone(),
                account: account_key.clone(),
                reg_time: now,
                last_time: now,
                flags: 0,
            },
        );
        account_ref.write().nicks.insert(nick_key);

        svc.msg(
            net,
            &ctx.user,
            &ctx.lang,
            MsgId::NickRegistered,
            &[LangArg::S(&nick), LangArg::S(&display_account)],
        );
        watch::send(net, watch::WATCH_NICKSERV, &display_account, &format!("nick REGISTER {}", nick));
        info!(nick = %nick, account = %display_account, "nickname registered");
        1
    }

    async fn cmd_drop(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let nick = ctx.arg(0).to_string();
        let nick_key = irc_to_lower(&nick);
        let account_key = ctx.account.clone().unwrap_or_default();
        let is_admin = ctx
            .oper
            .as_ref()
            .is_some_and(|o| o.privs & super::privs::USER_ADMIN != 0);

        let Some(reg) = net.registry.nicks.get(&nick_key).map(|n| n.value().clone()) else {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::NickNotRegistered, &[LangArg::S(&nick)]);
            return 1;
        };
        if reg.account != account_key && !is_admin {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::NickNotYours, &[LangArg::S(&nick)]);
            return 1;
        }

        net.registry.nicks.remove(&nick_key);
        if let Some(account_ref) = net.registry.accounts.get(&reg.account) {
            account_ref.write().nicks.remove(&nick_key);
        }
        let _ = net.db.accounts().delete_nick(&reg.name).await;

        svc.msg(net, &ctx.user, &ctx.lang, MsgId::NickDropped, &[LangArg::S(&reg.name)]);
        1
    }

    fn cmd_info(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let nick = ctx.arg(0).to_string();
        let Some(reg) = net.registry.nicks.get(&irc_to_lower(&nick)).map(|n| n.value().clone())
        else {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::NickNotRegistered, &[LangArg::S(&nick)]);
            return 1;
        };
        let owner = net
            .registry
            .accounts
            .get(&reg.account)
            .map(|a| a.read().name.clone())
            .unwrap_or_else(|| reg.account.clone());
        svc.notice(net, &ctx.user, &format!("[{}] registered to {}", reg.name, owner));
        if reg.flags & NF_WARN != 0 {
            svc.notice(net, &ctx.user, &format!("[{}] warn is ON", reg.name));
        }
        2
    }

    async fn cmd_set(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let option = ctx.arg(0).to_ascii_uppercase();
        if option != "WARN" {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::NoAccess, &[LangArg::S(&svc.nick), LangArg::S(&option)]);
            return 1;
        }
        let on = matches!(ctx.arg(1).to_ascii_uppercase().as_str(), "ON" | "YES" | "1");

        let nick_key = irc_to_lower(&ctx.user.read().nick.clone());
        let account_key = ctx.account.clone().unwrap_or_default();

        let Some(mut reg) = net.registry.nicks.get_mut(&nick_key) else {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::NickNotRegistered, &[LangArg::S(&nick_key)]);
            return 1;
        };
        if reg.account != account_key {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::NickNotYours, &[LangArg::S(&reg.name.clone())]);
            return 1;
        }
        if on {
            reg.flags |= NF_WARN;
        } else {
            reg.flags &= !NF_WARN;
        }
        let (name, flags) = (reg.name.clone(), reg.flags);
        drop(reg);

        let _ = net.db.accounts().set_nick_flags(&name, i64::from(flags)).await;
        svc.msg(
            net,
            &ctx.user,
            &ctx.lang,
            MsgId::UserQueryOption,
            &[LangArg::S("WARN"), LangArg::S(if on { "ON" } else { "OFF" })],
        );
        1
    }
}
