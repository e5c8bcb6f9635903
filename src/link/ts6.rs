//! Uplink message handlers.
//!
//! One handler per verb, dispatched case-insensitively; unknown verbs
//! are silently ignored. Handlers run on the link task in arrival order
//! and are the only writers of live client/channel state, together with
//! the hook listeners they invoke synchronously.

use std::collections::HashMap;
use std::sync::Arc;

use svs_proto::{irc_to_lower, ParsedLine};
use tracing::{debug, info, warn};

use crate::error::FatalError;
use crate::hook::{HookData, HookId};
use crate::state::{
    Channel, FloodCounter, LinkState, Membership, Network, Server, Uplink, User, UserRef,
    CHFL_OPPED, CHFL_VOICED,
};

use super::modes;

/// Outcome of one inbound line.
pub enum LinkFault {
    /// Close the link with an ERROR and reconnect.
    Drop(String),
    /// Broadcast and exit the process.
    Fatal(FatalError),
}

pub type DispatchResult = Result<(), LinkFault>;

/// Parse and dispatch one raw line.
pub async fn dispatch(net: &Arc<Network>, raw: &str) -> DispatchResult {
    let Ok(line) = ParsedLine::parse(raw) else {
        // Garbage framing is not worth killing the link over.
        debug!(line = %raw, "unparsable line ignored");
        return Ok(());
    };

    net.stats
        .lines_in
        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

    match line.verb.to_ascii_uppercase().as_str() {
        "PING" => handle_ping(net, &line),
        "PONG" => Ok(()),
        "PASS" => handle_pass(net, &line),
        "CAPAB" => handle_capab(net, &line),
        "SERVER" => handle_server(net, &line),
        "SID" => handle_sid(net, &line),
        "SQUIT" => handle_squit(net, &line),
        "NICK" => handle_nick(net, &line),
        "UID" => handle_uid(net, &line),
        "QUIT" => handle_quit(net, &line),
        "KILL" => handle_kill(net, &line),
        "SJOIN" => handle_sjoin(net, &line),
        "JOIN" => handle_join(net, &line),
        "PART" => handle_part(net, &line),
        "KICK" => handle_kick(net, &line),
        "MODE" => handle_mode(net, &line),
        "TMODE" => handle_tmode(net, &line),
        "BMASK" => handle_bmask(net, &line),
        "TOPIC" => handle_topic(net, &line),
        "TB" => handle_tb(net, &line),
        "ENCAP" => handle_encap(net, &line),
        "PRIVMSG" => handle_privmsg(net, &line).await,
        "EOB" => {
            finish_burst(net);
            Ok(())
        }
        "ERROR" => Err(LinkFault::Drop(line.param(0).to_string())),
        // NOTICE, WALLOPS, AWAY and anything else: silently ignored.
        _ => Ok(()),
    }
}

/// End-of-burst processing, shared by the EOB verb and the traditional
/// burst-terminating PING.
fn finish_burst(net: &Arc<Network>) {
    let mut link = net.link.write();
    if link.state != LinkState::Bursting {
        return;
    }
    link.state = LinkState::Registered;
    drop(link);

    if let Some(uplink) = net.link.read().uplink.clone() {
        if let Some(server) = net.clients.find_server(&uplink.name) {
            server.write().eob = true;
        }
    }

    net.stats
        .bursts
        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    info!("uplink burst complete");
    net.hooks.call(net, HookId::EndOfBurst, &HookData::Empty);
}

fn handle_ping(net: &Arc<Network>, line: &ParsedLine<'_>) -> DispatchResult {
    finish_burst(net);

    let token = line.param(0);
    match &net.me.sid {
        Some(sid) => net.send(format!(":{} PONG {} :{}", sid, net.me.name, token)),
        None => net.send(format!(":{} PONG {} :{}", net.me.name, net.me.name, token)),
    }
    Ok(())
}

fn handle_pass(net: &Arc<Network>, line: &ParsedLine<'_>) -> DispatchResult {
    // PASS <password> TS <ver> :<sid>
    let conf = net.conf();
    let link = net.link.read();
    let block = conf.pick_connect(link.connect_name.as_deref());
    drop(link);

    let Some(block) = block else {
        return Err(LinkFault::Drop("no connect block".into()));
    };
    if block.password != line.param(0) {
        warn!("uplink sent wrong link password");
        return Err(LinkFault::Drop("link password mismatch".into()));
    }

    if line.params.len() >= 4 && line.param(1).eq_ignore_ascii_case("TS") {
        let sid = line.param(3).to_string();
        let mut link = net.link.write();
        match link.uplink.as_mut() {
            Some(uplink) => uplink.sid = Some(sid),
            None => {
                link.uplink = Some(Uplink {
                    name: String::new(),
                    sid: Some(sid),
                    tb: false,
                    rsfnc: false,
                })
            }
        }
    }
    Ok(())
}

fn handle_capab(net: &Arc<Network>, line: &ParsedLine<'_>) -> DispatchResult {
    let caps = line.param(0);
    let tb = caps.split_whitespace().any(|c| c == "TB" || c == "TBURST");
    let rsfnc = caps.split_whitespace().any(|c| c == "RSFNC");
    let mut link = net.link.write();
    match link.uplink.as_mut() {
        Some(uplink) => {
            uplink.tb = tb;
            uplink.rsfnc = rsfnc;
        }
        None => {
            link.uplink = Some(Uplink {
                name: String::new(),
                sid: None,
                tb,
                rsfnc,
            })
        }
    }
    Ok(())
}

fn handle_server(net: &Arc<Network>, line: &ParsedLine<'_>) -> DispatchResult {
    let name = line.param(0);
    let hops: u32 = line.param(1).parse().unwrap_or(1);
    let info = line.param(2).to_string();

    if line.source.is_none() {
        // Our direct uplink finishing the handshake.
        let sid = {
            let mut link = net.link.write();
            let sid = link.uplink.as_ref().and_then(|u| u.sid.clone());
            let tb = link.uplink.as_ref().map(|u| u.tb).unwrap_or(false);
            let rsfnc = link.uplink.as_ref().map(|u| u.rsfnc).unwrap_or(false);
            link.uplink = Some(Uplink {
                name: name.to_string(),
                sid: sid.clone(),
                tb,
                rsfnc,
            });
            link.state = LinkState::Bursting;
            sid
        };

        let server = Server {
            name: name.to_string(),
            sid: sid.clone(),
            info,
            hops,
            uplink: None,
            users: Default::default(),
            servers: Default::default(),
            eob: false,
        };
        net.clients
            .servers
            .insert(irc_to_lower(name), Arc::new(parking_lot::RwLock::new(server)));
        if let Some(sid) = sid {
            net.clients.sids.insert(sid, irc_to_lower(name));
        }

        info!(server = %name, "uplink registered, receiving burst");
        crate::services::introduce_all(net);
        net.hooks.call(
            net,
            HookId::ServerIntro,
            &HookData::Server {
                name: name.to_string(),
            },
        );
        return Ok(());
    }

    // A server somewhere behind the uplink.
    introduce_remote_server(net, line.source.unwrap_or(""), name, None, hops, info);
    Ok(())
}

fn handle_sid(net: &Arc<Network>, line: &ParsedLine<'_>) -> DispatchResult {
    // :<source sid> SID <name> <hops> <sid> :<info>
    let name = line.param(0);
    let hops: u32 = line.param(1).parse().unwrap_or(1);
    let sid = line.param(2);
    let info = line.param(3).to_string();
    introduce_remote_server(net, line.source.unwrap_or(""), name, Some(sid), hops, info);
    Ok(())
}

fn introduce_remote_server(
    net: &Arc<Network>,
    source: &str,
    name: &str,
    sid: Option<&str>,
    hops: u32,
    info: String,
) {
    let parent_key = net
        .clients
        .find_server(source)
        .map(|s| irc_to_lower(&s.read().name));

    let server = Server {
        name: name.to_string(),
        sid: sid.map(String::from),
        info,
        hops,
        uplink: parent_key.clone(),
        users: Default::default(),
        servers: Default::default(),
        eob: false,
    };
    let key = irc_to_lower(name);
    net.clients
        .servers
        .insert(key.clone(), Arc::new(parking_lot::RwLock::new(server)));
    if let Some(sid) = sid {
        net.clients.sids.insert(sid.to_string(), key.clone());
    }
    if let Some(parent) = parent_key.and_then(|k| net.clients.servers.get(&k).map(|s| s.value().clone())) {
        parent.write().servers.insert(key);
    }

    net.hooks.call(
        net,
        HookId::ServerIntro,
        &HookData::Server {
            name: name.to_string(),
        },
    );
}

fn handle_squit(net: &Arc<Network>, line: &ParsedLine<'_>) -> DispatchResult {
    let target = line.param(0);
    let Some(server) = net.clients.find_server(target) else {
        return Ok(());
    };
    let name = server.read().name.clone();

    for removed in net.exit_server(&name) {
        net.hooks
            .call(net, HookId::ServerExit, &HookData::Server { name: removed });
    }
    Ok(())
}

/// Shared tail of NICK/UID introduction: collision, indexing, hooks.
fn introduce_user(net: &Arc<Network>, user: User) -> DispatchResult {
    // Nick collision against one of our services?
    if let Some(service) = net.find_service(&user.nick) {
        if user.ts <= 1 {
            return Err(LinkFault::Fatal(FatalError::ServicesFight(
                user.nick.clone(),
            )));
        }
        // Defend the nick: kill the newcomer.
        let target = user.uid.clone().unwrap_or_else(|| user.nick.clone());
        net.send(format!(
            ":{} KILL {} :{} (nick collision with service)",
            service.source_token(net),
            target,
            net.me.name
        ));
        return Ok(());
    }

    // Collision against an existing user.
    if let Some(existing) = net.clients.find_user(&user.nick) {
        let existing_ts = existing.read().ts;
        if user.ts < existing_ts {
            info!(nick = %user.nick, "nick collision, older introduction wins");
            net.exit_user(&existing);
        } else {
            debug!(nick = %user.nick, "nick collision, dropping introduction");
            return Ok(());
        }
    }

    let uid = user.uid.clone();
    let user_ref = net.clients.insert_user(user);
    let key = uid.unwrap_or_else(|| irc_to_lower(&user_ref.read().nick));
    net.hooks
        .call(net, HookId::NewClient, &HookData::Client { uid: key });
    Ok(())
}

fn parse_umodes(modes: &str) -> u32 {
    let mut bits = 0;
    for c in modes.chars() {
        match c {
            'i' => bits |= crate::state::UMODE_INVISIBLE,
            'o' => bits |= crate::state::UMODE_OPER,
            'a' => bits |= crate::state::client::UMODE_ADMIN,
            'S' => bits |= crate::state::client::UMODE_SERVICE,
            _ => {}
        }
    }
    bits
}

fn handle_nick(net: &Arc<Network>, line: &ParsedLine<'_>) -> DispatchResult {
    if line.params.len() >= 8 {
        // Pre-TS6 introduction:
        // NICK <nick> <hops> <ts> +<modes> <user> <host> <server> :<info>
        let user = User {
            nick: line.param(0).to_string(),
            username: line.param(4).to_string(),
            host: line.param(5).to_string(),
            ip: None,
            servername: line.param(6).to_string(),
            mask: format!("{}!{}@{}", line.param(0), line.param(4), line.param(5)),
            umodes: parse_umodes(line.param(3)),
            ts: line.param(2).parse().unwrap_or(0),
            uid: None,
            info: line.param(7).to_string(),
            account: None,
            oper: None,
            channels: HashMap::new(),
            flood: FloodCounter::default(),
            dead: false,
        };
        return introduce_user(net, user);
    }

    // Nick change: :<source> NICK <new> [<ts>]
    let Some(source) = line.source else {
        return Ok(());
    };
    let Some(user_ref) = net.clients.find_user(source) else {
        return Ok(());
    };
    let new_nick = line.param(0);

    if let Some(existing) = net.clients.find_user(new_nick) {
        if !Arc::ptr_eq(&existing, &user_ref) {
            // The uplink resolved a collision in favour of this change.
            net.exit_user(&existing);
        }
    }

    net.clients.rename_user(&user_ref, new_nick);
    if let Ok(ts) = line.param(1).parse::<u64>() {
        user_ref.write().ts = ts;
    }
    Ok(())
}

fn handle_uid(net: &Arc<Network>, line: &ParsedLine<'_>) -> DispatchResult {
    // :<sid> UID <nick> <hops> <ts> +<modes> <user> <host> <ip> <uid> :<info>
    if line.params.len() < 9 {
        return Ok(());
    }
    let source_server = line
        .source
        .and_then(|s| net.clients.find_server(s))
        .map(|s| s.read().name.clone())
        .unwrap_or_default();

    let ip = line.param(6);
    let user = User {
        nick: line.param(0).to_string(),
        username: line.param(4).to_string(),
        host: line.param(5).to_string(),
        ip: (ip != "0" && !ip.is_empty()).then(|| ip.to_string()),
        servername: source_server,
        mask: format!("{}!{}@{}", line.param(0), line.param(4), line.param(5)),
        umodes: parse_umodes(line.param(3)),
        ts: line.param(2).parse().unwrap_or(0),
        uid: Some(line.param(7).to_string()),
        info: line.param(8).to_string(),
        account: None,
        oper: None,
        channels: HashMap::new(),
        flood: FloodCounter::default(),
        dead: false,
    };
    introduce_user(net, user)
}

fn handle_quit(net: &Arc<Network>, line: &ParsedLine<'_>) -> DispatchResult {
    if let Some(user) = line.source.and_then(|s| net.clients.find_user(s)) {
        net.exit_user(&user);
    }
    Ok(())
}

fn handle_kill(net: &Arc<Network>, line: &ParsedLine<'_>) -> DispatchResult {
    let target = line.param(0);

    // A KILL against one of our services triggers a full re-introduction.
    if let Some(service) = net.find_service(target) {
        warn!(service = %service.nick, "service killed, re-introducing");
        crate::services::reintroduce(net, &service);
        return Ok(());
    }

    if let Some(user) = net.clients.find_user(target) {
        net.exit_user(&user);
    }
    Ok(())
}

fn handle_sjoin(net: &Arc<Network>, line: &ParsedLine<'_>) -> DispatchResult {
    // :<sid> SJOIN <ts> <chan> <modes> [margs] :<prefixed members>
    if line.params.len() < 3 {
        return Ok(());
    }
    let ts: u64 = line.param(0).parse().unwrap_or(0);
    let name = line.param(1);
    let Some(chan_ref) = net.channels.get_or_create(name, ts) else {
        return Ok(());
    };

    let member_list = line.params.last().copied().unwrap_or("");
    let mode_str = line.param(2);
    let mode_args: Vec<&str> = if line.params.len() > 4 {
        line.params[3..line.params.len() - 1].to_vec()
    } else {
        Vec::new()
    };

    let mut lower_ts = false;
    let mut drop_prefixes = false;
    let old_ts;
    {
        let mut chan = chan_ref.write();
        old_ts = chan.ts;
        if ts < chan.ts {
            // Incoming wins wholesale.
            lower_ts = true;
            chan.ts = ts;
            chan.strip_prefixes();
            chan.bans.clear();
            chan.excepts.clear();
            chan.invites.clear();
            chan.modes = svs_proto::ChannelModes::parse(mode_str, &mode_args);
        } else if ts > chan.ts {
            drop_prefixes = true;
        } else {
            // Equal TS: union of modes; our key/limit win when present.
            let incoming = svs_proto::ChannelModes::parse(mode_str, &mode_args);
            let ours = chan.modes.clone();
            chan.modes.merge(&incoming);
            if ours.key.is_some() {
                chan.modes.key = ours.key;
            }
            if ours.limit.is_some() {
                chan.modes.limit = ours.limit;
            }
        }
    }

    let mut joined: Vec<String> = Vec::new();
    for token in member_list.split_whitespace() {
        let mut flags = 0;
        let mut rest = token;
        loop {
            match rest.as_bytes().first() {
                Some(b'@') => {
                    flags |= CHFL_OPPED;
                    rest = &rest[1..];
                }
                Some(b'+') => {
                    flags |= CHFL_VOICED;
                    rest = &rest[1..];
                }
                _ => break,
            }
        }
        if drop_prefixes {
            flags = 0;
        }

        let Some(user_ref) = net.clients.find_user(rest) else {
            continue;
        };
        let key = user_ref.read().key();
        let chan_key = irc_to_lower(name);

        let mut chan = chan_ref.write();
        match chan.members.get(&key) {
            Some(existing) => {
                // Equal-TS merge: an already-present prefix wins.
                if existing.flags() == 0 && flags != 0 {
                    existing.reset(flags);
                }
            }
            None => {
                let membership = Membership::new(&chan_key, &key, flags);
                chan.members.insert(key.clone(), membership.clone());
                user_ref.write().channels.insert(chan_key.clone(), membership);
                joined.push(key);
            }
        }
    }

    if lower_ts {
        net.hooks.call(
            net,
            HookId::ChannelLowerTs,
            &HookData::ChannelTs {
                name: irc_to_lower(name),
                old_ts,
                new_ts: ts,
            },
        );
    }

    for key in joined {
        net.hooks.call(
            net,
            HookId::ChannelJoin,
            &HookData::Member {
                channel: irc_to_lower(name),
                uid: key,
            },
        );
    }
    Ok(())
}

fn handle_join(net: &Arc<Network>, line: &ParsedLine<'_>) -> DispatchResult {
    let Some(source) = line.source else {
        return Ok(());
    };
    let Some(user_ref) = net.clients.find_user(source) else {
        return Ok(());
    };

    // TS6: :<uid> JOIN <ts> <chan> +   Legacy: :<nick> JOIN <chan>
    let (ts, name) = if line.params.len() >= 2 {
        (line.param(0).parse().unwrap_or(0), line.param(1))
    } else {
        (Network::epoch(), line.param(0))
    };
    if name == "0" {
        return Ok(());
    }

    let Some(chan_ref) = net.channels.get_or_create(name, ts) else {
        return Ok(());
    };
    let key = user_ref.read().key();
    let chan_key = irc_to_lower(name);
    {
        let mut chan = chan_ref.write();
        if chan.members.contains_key(&key) {
            return Ok(());
        }
        let membership = Membership::new(&chan_key, &key, 0);
        chan.members.insert(key.clone(), membership.clone());
        user_ref.write().channels.insert(chan_key.clone(), membership);
    }

    net.hooks.call(
        net,
        HookId::ChannelJoin,
        &HookData::Member {
            channel: chan_key,
            uid: key,
        },
    );
    Ok(())
}

fn remove_member(net: &Arc<Network>, chan_name: &str, user_token: &str) {
    let Some(user_ref) = net.clients.find_user(user_token) else {
        return;
    };
    let chan_key = irc_to_lower(chan_name);
    let key = user_ref.read().key();
    if let Some(chan_ref) = net.channels.find(&chan_key) {
        chan_ref.write().members.remove(&key);
    }
    user_ref.write().channels.remove(&chan_key);
    net.channels.destroy_if_empty(&chan_key);
}

fn handle_part(net: &Arc<Network>, line: &ParsedLine<'_>) -> DispatchResult {
    if let Some(source) = line.source {
        remove_member(net, line.param(0), source);
    }
    Ok(())
}

fn handle_kick(net: &Arc<Network>, line: &ParsedLine<'_>) -> DispatchResult {
    let chan = line.param(0);
    let target = line.param(1);

    if let Some(service) = net.find_service(target) {
        // Someone kicked a service; it comes straight back.
        crate::services::rejoin_channel(net, &service, chan);
        return Ok(());
    }

    remove_member(net, chan, target);
    Ok(())
}

fn handle_mode(net: &Arc<Network>, line: &ParsedLine<'_>) -> DispatchResult {
    let target = line.param(0);
    if !target.starts_with('#') || line.params.len() < 2 {
        // User mode changes are not our business.
        return Ok(());
    }
    let Some(chan_ref) = net.channels.find(target) else {
        return Ok(());
    };
    let args: Vec<&str> = line.params[1..].to_vec();
    modes::apply_and_hook(net, &chan_ref, &args);
    Ok(())
}

fn handle_tmode(net: &Arc<Network>, line: &ParsedLine<'_>) -> DispatchResult {
    // :<src> TMODE <ts> <chan> <modes> [args]
    if line.params.len() < 3 {
        return Ok(());
    }
    let ts: u64 = line.param(0).parse().unwrap_or(0);
    let Some(chan_ref) = net.channels.find(line.param(1)) else {
        return Ok(());
    };
    if ts > chan_ref.read().ts {
        return Ok(());
    }
    let args: Vec<&str> = line.params[2..].to_vec();
    modes::apply_and_hook(net, &chan_ref, &args);
    Ok(())
}

fn handle_bmask(net: &Arc<Network>, line: &ParsedLine<'_>) -> DispatchResult {
    // :<sid> BMASK <ts> <chan> <type> :<masks>
    let ts: u64 = line.param(0).parse().unwrap_or(0);
    let Some(chan_ref) = net.channels.find(line.param(1)) else {
        return Ok(());
    };
    let mut chan = chan_ref.write();
    if ts > chan.ts {
        return Ok(());
    }

    let masks = line.param(3);
    for mask in masks.split_whitespace() {
        match line.param(2) {
            "b" => {
                Channel::add_mask(&mut chan.bans, mask);
            }
            "e" => {
                Channel::add_mask(&mut chan.excepts, mask);
            }
            "I" => {
                Channel::add_mask(&mut chan.invites, mask);
            }
            _ => {}
        }
    }
    Ok(())
}

fn handle_topic(net: &Arc<Network>, line: &ParsedLine<'_>) -> DispatchResult {
    let Some(chan_ref) = net.channels.find(line.param(0)) else {
        return Ok(());
    };
    let setter = line
        .source
        .and_then(|s| net.clients.find_user(s))
        .map(|u| u.read().nick.clone())
        .or_else(|| line.source.map(String::from))
        .unwrap_or_default();

    let text = line.params.last().copied().unwrap_or("");
    {
        let mut chan = chan_ref.write();
        if text.is_empty() {
            chan.topic = None;
        } else {
            chan.topic = Some(crate::state::Topic {
                text: text.to_string(),
                setter,
                ts: Network::epoch(),
            });
        }
    }

    net.hooks.call(
        net,
        HookId::ChannelTopic,
        &HookData::Channel {
            name: irc_to_lower(line.param(0)),
        },
    );
    Ok(())
}

fn handle_tb(net: &Arc<Network>, line: &ParsedLine<'_>) -> DispatchResult {
    // :<sid> TB <chan> <topicts> [<setter>] :<topic>
    let Some(chan_ref) = net.channels.find(line.param(0)) else {
        return Ok(());
    };
    let topic_ts: u64 = line.param(1).parse().unwrap_or(0);
    let (setter, text) = if line.params.len() >= 4 {
        (line.param(2).to_string(), line.param(3))
    } else {
        (String::new(), line.param(2))
    };

    {
        let mut chan = chan_ref.write();
        // Burst topics only replace nothing, or a newer topic.
        let accept = match &chan.topic {
            None => true,
            Some(existing) => topic_ts < existing.ts,
        };
        if !accept || text.is_empty() {
            return Ok(());
        }
        chan.topic = Some(crate::state::Topic {
            text: text.to_string(),
            setter,
            ts: topic_ts,
        });
    }

    net.hooks.call(
        net,
        HookId::ChannelTopic,
        &HookData::Channel {
            name: irc_to_lower(line.param(0)),
        },
    );
    Ok(())
}

fn handle_encap(net: &Arc<Network>, line: &ParsedLine<'_>) -> DispatchResult {
    // :<src> ENCAP <targetmask> <subcommand> <args...>
    match line.param(1).to_ascii_uppercase().as_str() {
        "SU" => {
            let Some(user_ref) = net.clients.find_user(line.param(2)) else {
                return Ok(());
            };
            let account = line.param(3);
            if account.is_empty() {
                net.logout_user(&user_ref);
            } else {
                bind_session(net, &user_ref, account);
            }
        }
        "LOGIN" => {
            // Burst form: :<uid> ENCAP * LOGIN <account>
            if let Some(user_ref) = line.source.and_then(|s| net.clients.find_user(s)) {
                bind_session(net, &user_ref, line.param(2));
            }
        }
        _ => {}
    }
    Ok(())
}

/// Attach an account session from the wire, keeping both edges.
fn bind_session(net: &Arc<Network>, user_ref: &UserRef, account: &str) {
    let folded = irc_to_lower(account);
    let key = user_ref.read().key();
    if let Some(acc) = net.registry.find_account(&folded) {
        let mut acc = acc.write();
        if !acc.sessions.contains(&key) {
            acc.sessions.push(key);
        }
        user_ref.write().account = Some(folded);
    }
}

async fn handle_privmsg(net: &Arc<Network>, line: &ParsedLine<'_>) -> DispatchResult {
    let Some(source) = line.source else {
        return Ok(());
    };
    let Some(user_ref) = net.clients.find_user(source) else {
        return Ok(());
    };
    let target = line.param(0);
    if !net.target_is_ours(target) {
        return Ok(());
    }
    let Some(service) = net.find_service(target) else {
        return Ok(());
    };
    let shortcut_used = target.contains('@');
    let text = line.param(1).to_string();

    crate::services::dispatch(net, &service, &user_ref, &text, shortcut_used).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn umode_parsing() {
        let bits = parse_umodes("+iow");
        assert!(bits & crate::state::UMODE_INVISIBLE != 0);
        assert!(bits & crate::state::UMODE_OPER != 0);
    }
}
