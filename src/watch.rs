//! Audit watch streams.
//!
//! Every audit-worthy action calls [`send`] with a flag. Subscribers are
//! logged-in opers, on IRC or on the oper control channel, whose
//! watchflags mask overlaps the flag; IRC subscribers get a service
//! notice, control-channel subscribers a framed line.

use std::sync::Arc;

use crate::state::Network;

pub const WATCH_AUTH: u64 = 1 << 0;
pub const WATCH_USERSERV: u64 = 1 << 1;
pub const WATCH_CHANSERV: u64 = 1 << 2;
pub const WATCH_NICKSERV: u64 = 1 << 3;
pub const WATCH_BANSERV: u64 = 1 << 4;
pub const WATCH_OPERSERV: u64 = 1 << 5;
pub const WATCH_JUPESERV: u64 = 1 << 6;
pub const WATCH_GLOBAL: u64 = 1 << 7;
pub const WATCH_OPERBOT: u64 = 1 << 8;

/// Name table for subscriptions and display.
pub const FLAG_NAMES: &[(&str, u64)] = &[
    ("auth", WATCH_AUTH),
    ("userserv", WATCH_USERSERV),
    ("chanserv", WATCH_CHANSERV),
    ("nickserv", WATCH_NICKSERV),
    ("banserv", WATCH_BANSERV),
    ("operserv", WATCH_OPERSERV),
    ("jupeserv", WATCH_JUPESERV),
    ("global", WATCH_GLOBAL),
    ("operbot", WATCH_OPERBOT),
];

/// Parse flag names into a mask. `all` subscribes to everything.
pub fn flags_from_names(names: &[String]) -> u64 {
    let mut mask = 0;
    for name in names {
        if name.eq_ignore_ascii_case("all") {
            return u64::MAX;
        }
        if let Some((_, bit)) = FLAG_NAMES
            .iter()
            .find(|(flag, _)| flag.eq_ignore_ascii_case(name))
        {
            mask |= bit;
        }
    }
    mask
}

/// Render a mask back to names, for `.watch` output.
pub fn names_from_flags(mask: u64) -> String {
    let names: Vec<&str> = FLAG_NAMES
        .iter()
        .filter(|(_, bit)| mask & bit != 0)
        .map(|(name, _)| *name)
        .collect();
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(" ")
    }
}

/// The flag's display tag in delivered lines.
fn tag(flag: u64) -> &'static str {
    FLAG_NAMES
        .iter()
        .find(|(_, bit)| *bit == flag)
        .map(|(name, _)| *name)
        .unwrap_or("watch")
}

/// Deliver an audit line to every subscribed oper.
pub fn send(net: &Arc<Network>, flag: u64, actor: &str, message: &str) {
    let line = format!("#{}# {}: {}", tag(flag), actor, message);

    // IRC opers: a notice from operserv (or the first service we have).
    let Some(svc) = net
        .service_by_id("operserv")
        .or_else(|| net.services.read().first().cloned())
    else {
        return;
    };

    let subscribers: Vec<crate::state::UserRef> = net
        .clients
        .by_nick
        .iter()
        .filter(|entry| {
            entry
                .value()
                .read()
                .oper
                .as_ref()
                .is_some_and(|o| o.watchflags & flag != 0)
        })
        .map(|entry| entry.value().clone())
        .collect();
    for user in subscribers {
        svc.notice(net, &user, &line);
    }

    // Control-channel sessions.
    for session in net.dcc_sessions.iter() {
        let subscribed = session
            .value()
            .oper
            .read()
            .as_ref()
            .is_some_and(|o| o.watchflags & flag != 0);
        if subscribed {
            let _ = session.value().tx.send(line.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_round_trip() {
        let mask = flags_from_names(&["auth".into(), "banserv".into()]);
        assert_eq!(mask, WATCH_AUTH | WATCH_BANSERV);
        assert_eq!(names_from_flags(mask), "auth banserv");
    }

    #[test]
    fn all_is_everything() {
        assert_eq!(flags_from_names(&["ALL".into()]), u64::MAX);
        assert_eq!(flags_from_names(&["bogus".into()]), 0);
        assert_eq!(names_from_flags(0), "none");
    }
}
