//! The memo store.
//!
//! Memos go to accounts, not nicks; a login reports the unread count.
//! Targets can refuse memos with the account NOMEMOS flag, and every
//! account has a bounded mailbox.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::hook::{HookData, HookId, HookResult};
use crate::lang::{LangArg, MsgId};
use crate::state::{Network, US_NOMEMOS};

use super::{CmdCtx, CommandSpec, Service, ServiceHandler};

pub struct MemoServ;

static COMMANDS: &[CommandSpec] = &[
    CommandSpec { name: "DELETE", min_args: 1, flood: 1, need_login: true, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "LIST", min_args: 0, flood: 2, need_login: true, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "READ", min_args: 1, flood: 1, need_login: true, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "SEND", min_args: 2, flood: 3, need_login: true, oper_only: false, oper_priv: 0 },
];

pub fn init(net: &Arc<Network>, help_root: &str) -> Arc<Service> {
    let conf = net.conf();
    let svc = Service::build("memoserv", &conf.services.memoserv.identity, Arc::new(MemoServ), help_root);
    super::register(net, svc.clone());

    net.hooks.add(HookId::UserLogin, h_login);
    svc
}

/// Report the unread count on login. The count needs the store, so the
/// lookup runs off the hook path.
fn h_login(net: &Arc<Network>, data: &HookData) -> HookResult {
    let HookData::Login { uid, account } = data else {
        return HookResult::Continue;
    };
    let Some(account_ref) = net.registry.find_account(account) else {
        return HookResult::Continue;
    };
    let account_id = account_ref.read().id;
    let uid = uid.clone();
    let net = net.clone();

    tokio::spawn(async move {
        let unread = net.db.memos().count_unread(account_id).await.unwrap_or(0);
        if unread == 0 {
            return;
        }
        let (Some(svc), Some(user_ref)) = (net.service_by_id("memoserv"), net.clients.by_key(&uid))
        else {
            return;
        };
        let lang = super::caller_lang(&net, &user_ref);
        svc.msg(&net, &user_ref, &lang, MsgId::MemoUnread, &[LangArg::N(unread)]);
    });
    HookResult::Continue
}

#[async_trait]
impl ServiceHandler for MemoServ {
    fn commands(&self) -> &'static [CommandSpec] {
        COMMANDS
    }

    async fn handle(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let account_key = ctx.account.clone().unwrap_or_default();
        let Some(account_ref) = net.registry.find_account(&account_key) else {
            return 1;
        };
        let (my_id, my_name) = {
            let account = account_ref.read();
            (account.id, account.name.clone())
        };

        match ctx.cmd.as_str() {
            "SEND" => {
                let target = ctx.arg(0).to_string();
                let text = ctx.rest(1);

                let Some(target_ref) = net.registry.find_account(&target) else {
                    svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserNotFound, &[LangArg::S(&target)]);
                    return 1;
                };
                let (target_id, target_name, refuses) = {
                    let acc = target_ref.read();
                    (acc.id, acc.name.clone(), acc.flags & US_NOMEMOS != 0)
                };
                if refuses {
                    svc.msg(net, &ctx.user, &ctx.lang, MsgId::MemoTargetRefuses, &[LangArg::S(&target_name)]);
                    return 1;
                }

                let max_memos = net.conf().services.memoserv.max_memos;
                let count = net.db.memos().count(target_id).await.unwrap_or(0);
                if count >= i64::from(max_memos) {
                    svc.msg(net, &ctx.user, &ctx.lang, MsgId::MemoTargetFull, &[LangArg::S(&target_name)]);
                    return 1;
                }

                let now = Network::epoch();
                if let Err(e) = net
                    .db
                    .memos()
                    .insert(target_id, &my_name, my_id, now as i64, &text)
                    .await
                {
                    warn!(error = %e, "memo insert failed");
                    return 1;
                }

                // Tell every live session of the target right away.
                let sessions = target_ref.read().sessions.clone();
                for key in sessions {
                    if let Some(user_ref) = net.clients.by_key(&key) {
                        let lang = super::caller_lang(net, &user_ref);
                        let text = net.langs.read().render(&lang, MsgId::MemoUnread, &[LangArg::N(1)]);
                        svc.notice(net, &user_ref, &text);
                    }
                }

                svc.msg(net, &ctx.user, &ctx.lang, MsgId::MemoSent, &[LangArg::S(&target_name)]);
                2
            }
            "LIST" => {
                let memos = net.db.memos().list_for(my_id).await.unwrap_or_default();
                if memos.is_empty() {
                    svc.msg(net, &ctx.user, &ctx.lang, MsgId::MemoNoMemos, &[]);
                    return 1;
                }
                for memo in memos {
                    let unread = if memo.flags & crate::db::MEMO_READ == 0 { "*" } else { " " };
                    svc.notice(
                        net,
                        &ctx.user,
                        &format!("{}{} from {}: {}", unread, memo.id, memo.source, memo.text),
                    );
                }
                2
            }
            "READ" => {
                let Ok(memo_id) = ctx.arg(0).parse::<i64>() else {
                    return 1;
                };
                let Ok(Some(memo)) = net.db.memos().get(my_id, memo_id).await else {
                    svc.msg(net, &ctx.user, &ctx.lang, MsgId::MemoNotFound, &[LangArg::N(memo_id)]);
                    return 1;
                };
                svc.notice(
                    net,
                    &ctx.user,
                    &format!("Memo {} from {}: {}", memo.id, memo.source, memo.text),
                );
                let _ = net.db.memos().mark_read(memo.id).await;
                1
            }
            "DELETE" => {
                if ctx.arg(0).eq_ignore_ascii_case("all") {
                    let removed = net.db.memos().delete_all(my_id).await.unwrap_or(0);
                    svc.msg(net, &ctx.user, &ctx.lang, MsgId::MemoDeleted, &[LangArg::N(removed as i64)]);
                    return 1;
                }
                let Ok(memo_id) = ctx.arg(0).parse::<i64>() else {
                    return 1;
                };
                if net.db.memos().delete(my_id, memo_id).await.unwrap_or(false) {
                    svc.msg(net, &ctx.user, &ctx.lang, MsgId::MemoDeleted, &[LangArg::N(memo_id)]);
                } else {
                    svc.msg(net, &ctx.user, &ctx.lang, MsgId::MemoNotFound, &[LangArg::N(memo_id)]);
                }
                1
            }
            _ => 1,
        }
    }
}
