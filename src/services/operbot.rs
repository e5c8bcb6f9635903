//! The oper channel helper.
//!
//! A small bot opers subscribe channels to: it sits in them, invites
//! opers in and ops them on request. Channel membership is persisted in
//! its own table.

use std::sync::Arc;

use async_trait::async_trait;
use svs_proto::irc_to_lower;

use crate::db::ServiceChanTable;
use crate::hook::{HookData, HookId, HookResult};
use crate::lang::{LangArg, MsgId};
use crate::link::modebuild::{Dir, ModeBuild};
use crate::state::{Network, CHFL_OPPED};
use crate::watch;

use super::{privs, CmdCtx, CommandSpec, Service, ServiceHandler};

pub struct OperBot;

static COMMANDS: &[CommandSpec] = &[
    CommandSpec { name: "BADD", min_args: 1, flood: 1, need_login: false, oper_only: true, oper_priv: privs::OPERBOT },
    CommandSpec { name: "BDEL", min_args: 1, flood: 1, need_login: false, oper_only: true, oper_priv: privs::OPERBOT },
    CommandSpec { name: "INVITE", min_args: 1, flood: 1, need_login: false, oper_only: true, oper_priv: 0 },
    CommandSpec { name: "OP", min_args: 1, flood: 1, need_login: false, oper_only: true, oper_priv: 0 },
];

pub fn init(net: &Arc<Network>, help_root: &str) -> Arc<Service> {
    let conf = net.conf();
    let svc = Service::build("operbot", &conf.services.operbot.identity, Arc::new(OperBot), help_root);
    super::register(net, svc.clone());

    net.hooks.add(HookId::EndOfBurst, h_eob);
    svc
}

fn h_eob(net: &Arc<Network>, _data: &HookData) -> HookResult {
    let Some(svc) = net.service_by_id("operbot") else {
        return HookResult::Continue;
    };
    let net = net.clone();
    tokio::spawn(async move {
        if let Ok(rows) = net.db.channels().load_service_channels(ServiceChanTable::Operbot).await {
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

#[async_trait]
impl ServiceHandler for OperBot {
    fn commands(&self) -> &'static [CommandSpec] {
        COMMANDS
    }

    async fn handle(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let chname = ctx.arg(0).to_string();
        let chan_key = irc_to_lower(&chname);
        let oper_name = ctx.oper.as_ref().map(|o| o.name.clone()).unwrap_or_default();

        match ctx.cmd.as_str() {
            "BADD" => {
                let ts = net
                    .channels
                    .find(&chan_key)
                    .map(|c| c.read().ts)
                    .unwrap_or_else(Network::epoch);
                super::service_join(net, svc, &chname, ts, &svs_proto::ChannelModes::default());
                let _ = net
                    .db
                    .channels()
                    .add_service_channel(ServiceChanTable::Operbot, &chname, ts as i64, &oper_name)
                    .await;
                watch::send(net, watch::WATCH_OPERBOT, &oper_name, &format!("BADD {}", chname));
                svc.msg(net, &ctx.user, &ctx.lang, MsgId::SuccessfulOn, &[LangArg::S("BADD"), LangArg::S(&chname)]);
                1
            }
            "BDEL" => {
                super::service_part(net, svc, &chname, "");
                let _ = net
                    .db
                    .channels()
                    .del_service_channel(ServiceChanTable::Operbot, &chname)
                    .await;
                watch::send(net, watch::WATCH_OPERBOT, &oper_name, &format!("BDEL {}", chname));
                svc.msg(net, &ctx.user, &ctx.lang, MsgId::SuccessfulOn, &[LangArg::S("BDEL"), LangArg::S(&chname)]);
                1
            }
            "INVITE" => {
                if !svc.channels.read().contains(&chan_key) {
                    svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanNotOnChannel, &[LangArg::S(&chname)]);
                    return 1;
                }
                let target = {
                    let user = ctx.user.read();
                    user.uid.clone().unwrap_or_else(|| user.nick.clone())
                };
                net.send(format!(":{} INVITE {} {}", svc.source_token(net), target, chname));
                svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanInvited, &[LangArg::S(&chname)]);
                1
            }
            "OP" => {
                if !svc.channels.read().contains(&chan_key) {
                    svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanNotOnChannel, &[LangArg::S(&chname)]);
                    return 1;
                }
                let Some(chan_ref) = net.channels.find(&chan_key) else {
                    svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanNotOnChannel, &[LangArg::S(&chname)]);
                    return 1;
                };
                let uid = ctx.user.read().key();
                let membership = chan_ref.read().members.get(&uid).cloned();
                let Some(membership) = membership else {
                    svc.msg(net, &ctx.user, &ctx.lang, MsgId::ChanNotInChannel, &[LangArg::S(&uid), LangArg::S(&chname)]);
                    return 1;
                };

                let (chan_name, chan_ts) = {
                    let chan = chan_ref.read();
                    (chan.name.clone(), chan.ts)
                };
                let header = match &net.me.sid {
                    Some(_) => format!(":{} TMODE {} {}", svc.source_token(net), chan_ts, chan_name),
                    None => format!(":{} MODE {}", svc.source_token(net), chan_name),
                };
                let mut build = ModeBuild::start(header);
                build.add(Dir::Add, 'o', Some(&uid));
                membership.set(CHFL_OPPED);
                for line in build.finish() {
                    net.send(line);
                }
                svc.msg(net, &ctx.user, &ctx.lang, MsgId::SuccessfulOn, &[LangArg::S("OP"), LangArg::S(&chan_name)]);
                1
            }
            _ => 1,
        }
    }
}
