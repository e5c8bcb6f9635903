//! The channel directory service.
//!
//! LIST searches the live channel set by mask with optional filters on
//! member counts, modes and topics, capped at a configured number of
//! results. Secret and private channels stay hidden.

use std::sync::Arc;

use async_trait::async_trait;
use svs_proto::{match_mask, MODE_PRIVATE, MODE_SECRET};

use crate::lang::{LangArg, MsgId};
use crate::state::Network;

use super::{CmdCtx, CommandSpec, Service, ServiceHandler};

pub struct Alis;

static COMMANDS: &[CommandSpec] = &[
    CommandSpec { name: "LIST", min_args: 1, flood: 4, need_login: false, oper_only: false, oper_priv: 0 },
];

/// Parsed LIST options.
#[derive(Default)]
struct ListOptions {
    min: usize,
    max: usize,
    topic: Option<String>,
    show_modes: bool,
}

pub fn init(net: &Arc<Network>, help_root: &str) -> Arc<Service> {
    let conf = net.conf();
    let svc = Service::build("alis", &conf.services.alis.identity, Arc::new(Alis), help_root);
    super::register(net, svc.clone());
    svc
}

fn parse_options(args: &[String]) -> Result<ListOptions, String> {
    let mut opts = ListOptions::default();
    let mut it = args.iter();
    while let Some(opt) = it.next() {
        match opt.to_ascii_lowercase().as_str() {
            "-min" => {
                opts.min = it
                    .next()
                    .and_then(|v| v.parse().ok())
                    .ok_or_else(|| opt.clone())?;
            }
            "-max" => {
                opts.max = it
                    .next()
                    .and_then(|v| v.parse().ok())
                    .ok_or_else(|| opt.clone())?;
            }
            "-topic" => {
                opts.topic = Some(it.next().ok_or_else(|| opt.clone())?.clone());
            }
            "-showmodes" => opts.show_modes = true,
            other => return Err(other.to_string()),
        }
    }
    Ok(opts)
}

#[async_trait]
impl ServiceHandler for Alis {
    fn commands(&self) -> &'static [CommandSpec] {
        COMMANDS
    }

    async fn handle(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        if ctx.cmd != "LIST" {
            return 1;
        }
        let mask = ctx.arg(0).to_string();
        let opts = match parse_options(&ctx.args[1..]) {
            Ok(opts) => opts,
            Err(bad) => {
                svc.msg(net, &ctx.user, &ctx.lang, MsgId::AlisBadOption, &[LangArg::S(&bad)]);
                return 1;
            }
        };

        let cap = net.conf().services.alis.max_matches as usize;
        svc.msg(
            net,
            &ctx.user,
            &ctx.lang,
            MsgId::AlisHeader,
            &[LangArg::N(cap as i64), LangArg::S(&mask)],
        );

        let mut shown = 0usize;
        for entry in net.channels.channels.iter() {
            if shown >= cap {
                break;
            }
            let chan = entry.value().read();

            if chan.modes.bits & (MODE_SECRET | MODE_PRIVATE) != 0 {
                continue;
            }
            if !match_mask(&mask, &chan.name) {
                continue;
            }
            let members = chan.members.len();
            if members < opts.min || (opts.max > 0 && members > opts.max) {
                continue;
            }
            let topic = chan.topic.as_ref().map(|t| t.text.clone()).unwrap_or_default();
            if let Some(filter) = &opts.topic {
                if !match_mask(&format!("*{}*", filter), &topic) {
                    continue;
                }
            }

            let line = if opts.show_modes {
                format!("{} {} [{}] :{}", chan.name, members, chan.modes, topic)
            } else {
                format!("{} {} :{}", chan.name, members, topic)
            };
            svc.notice(net, &ctx.user, &line);
            shown += 1;
        }

        svc.msg(net, &ctx.user, &ctx.lang, MsgId::AlisEnd, &[]);
        4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_parsing() {
        let args: Vec<String> = vec!["-min".into(), "3".into(), "-showmodes".into()];
        let opts = parse_options(&args).unwrap();
        assert_eq!(opts.min, 3);
        assert!(opts.show_modes);

        let args: Vec<String> = vec!["-bogus".into()];
        assert!(parse_options(&args).is_err());

        let args: Vec<String> = vec!["-min".into()];
        assert!(parse_options(&args).is_err());
    }
}
