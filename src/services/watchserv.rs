//! The watch subscription service.
//!
//! Lets logged-in opers pick which audit streams reach them over IRC.
//! Usually merged into the oper helper's command surface.

use std::sync::Arc;

use async_trait::async_trait;

use crate::lang::{LangArg, MsgId};
use crate::state::Network;
use crate::watch;

use super::{CmdCtx, CommandSpec, Service, ServiceHandler};

pub struct WatchServ;

static COMMANDS: &[CommandSpec] = &[
    CommandSpec { name: "WATCH", min_args: 0, flood: 1, need_login: false, oper_only: true, oper_priv: 0 },
];

pub fn init(net: &Arc<Network>, help_root: &str) -> Arc<Service> {
    let conf = net.conf();
    let svc = Service::build("watchserv", &conf.services.watchserv.identity, Arc::new(WatchServ), help_root);
    super::register(net, svc.clone());
    svc
}

#[async_trait]
impl ServiceHandler for WatchServ {
    fn commands(&self) -> &'static [CommandSpec] {
        COMMANDS
    }

    async fn handle(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        if ctx.cmd != "WATCH" {
            return 1;
        }

        if ctx.args.is_empty() {
            let mask = ctx.oper.as_ref().map(|o| o.watchflags).unwrap_or(0);
            let shown = watch::names_from_flags(mask);
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserQueryOption, &[LangArg::S("WATCH"), LangArg::S(&shown)]);
            return 1;
        }

        let mask = watch::flags_from_names(&ctx.args);
        {
            let mut user = ctx.user.write();
            if let Some(oper) = user.oper.as_mut() {
                oper.watchflags = mask;
            }
        }
        let shown = watch::names_from_flags(mask);
        svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserQueryOption, &[LangArg::S("WATCH"), LangArg::S(&shown)]);
        1
    }
}
