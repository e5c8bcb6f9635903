//! The oper control channel.
//!
//! A line-framed TCP listener for operators. Sessions start locked to
//! `.login <name> <pass>`; once authenticated the session carries a
//! copy of the oper block's privilege mask and may subscribe to watch
//! streams. Services register their own commands into the same table at
//! init, so the surface grows with the daemon.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use svs_proto::LineCodec;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{info, warn};

use crate::services::privs;
use crate::state::{DccSession, Network, OperSession};
use crate::watch;

/// A control-channel command handler. Handlers run on the session task;
/// long work gets spawned.
pub type DccHandler = fn(&Arc<Network>, &Arc<DccSession>, &[&str]);

/// One entry in the shared command table.
pub struct DccCommand {
    /// Name without the leading dot.
    pub name: &'static str,
    /// Required privilege bits; 0 means any authenticated oper.
    pub privs: u64,
    pub handler: DccHandler,
}

/// Insert a command keeping the table sorted.
pub fn register_command(net: &Arc<Network>, command: DccCommand) {
    let mut table = net.dcc_commands.write();
    match table.binary_search_by(|c| c.name.cmp(command.name)) {
        Ok(_) => warn!(command = %command.name, "duplicate dcc command ignored"),
        Err(idx) => table.insert(idx, command),
    }
}

/// Register the built-in command set.
pub fn init(net: &Arc<Network>) {
    for command in [
        DccCommand { name: "boot", privs: privs::ADMIN, handler: c_boot },
        DccCommand { name: "chat", privs: 0, handler: c_chat },
        DccCommand { name: "connect", privs: privs::ROUTE, handler: c_connect },
        DccCommand { name: "events", privs: 0, handler: c_events },
        DccCommand { name: "help", privs: 0, handler: c_help },
        DccCommand { name: "quit", privs: 0, handler: c_quit },
        DccCommand { name: "rehash", privs: privs::MAINTAIN, handler: c_rehash },
        DccCommand { name: "service", privs: 0, handler: c_service },
        DccCommand { name: "stats", privs: 0, handler: c_stats },
        DccCommand { name: "status", privs: 0, handler: c_status },
        DccCommand { name: "watch", privs: 0, handler: c_watch },
    ] {
        register_command(net, command);
    }
}

/// Start the listener when configured.
pub fn spawn_listener(net: Arc<Network>) {
    let conf = net.conf();
    if !conf.dcc.enabled {
        return;
    }
    let addr = format!("{}:{}", conf.dcc.listen, conf.dcc.port);

    tokio::spawn(async move {
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                warn!(addr = %addr, error = %e, "control channel bind failed");
                return;
            }
        };
        info!(addr = %addr, "control channel listening");

        let counter = AtomicU64::new(1);
        loop {
            let Ok((stream, peer)) = listener.accept().await else {
                continue;
            };
            let id = counter.fetch_add(1, Ordering::Relaxed);
            let net = net.clone();
            tokio::spawn(async move {
                run_session(net, id, peer.to_string(), stream).await;
            });
        }
    });
}

async fn run_session(net: Arc<Network>, id: u64, addr: String, stream: tokio::net::TcpStream) {
    let framed = Framed::new(stream, LineCodec::new());
    let (mut sink, mut reader) = framed.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let session = Arc::new(DccSession {
        id,
        addr: addr.clone(),
        oper: parking_lot::RwLock::new(None),
        chat: std::sync::atomic::AtomicBool::new(false),
        tx,
    });
    net.dcc_sessions.insert(id, session.clone());
    let _ = session.tx.send("Welcome. Authenticate with .login <name> <pass>".into());

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(line) => {
                        if sink.send(line).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = reader.next() => {
                match inbound {
                    Some(Ok(line)) => {
                        if !handle_line(&net, &session, line.trim()) {
                            // Flush the farewell before closing.
                            while let Ok(line) = rx.try_recv() {
                                if sink.send(line).await.is_err() {
                                    break;
                                }
                            }
                            break;
                        }
                    }
                    Some(Err(_)) | None => break,
                }
            }
        }
    }

    net.dcc_sessions.remove(&id);
    info!(session = id, addr = %addr, "control channel session closed");
}

/// Process one command line. Returns false to close the session.
fn handle_line(net: &Arc<Network>, session: &Arc<DccSession>, line: &str) -> bool {
    let Some(line) = line.strip_prefix('.') else {
        // Chat broadcast for subscribed sessions, noise otherwise.
        if session.chat.load(Ordering::Relaxed) && session.oper.read().is_some() {
            broadcast_chat(net, session, line);
        }
        return true;
    };

    let words: Vec<&str> = line.split_whitespace().collect();
    let Some(&cmd) = words.first() else {
        return true;
    };
    let cmd = cmd.to_ascii_lowercase();
    let args = &words[1..];

    if cmd == "login" {
        c_login(net, session, args);
        return true;
    }

    let authed = session.oper.read().clone();
    let Some(oper) = authed else {
        let _ = session.tx.send("Authenticate first: .login <name> <pass>".into());
        return true;
    };

    let handler = {
        let table = net.dcc_commands.read();
        match table.binary_search_by(|c| c.name.cmp(cmd.as_str())) {
            Ok(idx) => {
                let entry = &table[idx];
                if entry.privs != 0 && oper.privs & entry.privs != entry.privs {
                    None
                } else {
                    Some(entry.handler)
                }
            }
            Err(_) => None,
        }
    };

    match handler {
        Some(handler) => {
            handler(net, session, args);
            cmd != "quit"
        }
        None => {
            let _ = session.tx.send(format!("Unknown or unauthorized command: .{}", cmd));
            true
        }
    }
}

fn broadcast_chat(net: &Arc<Network>, from: &Arc<DccSession>, text: &str) {
    let name = from
        .oper
        .read()
        .as_ref()
        .map(|o| o.name.clone())
        .unwrap_or_default();
    for entry in net.dcc_sessions.iter() {
        let other = entry.value();
        if other.id != from.id
            && other.chat.load(Ordering::Relaxed)
            && other.oper.read().is_some()
        {
            let _ = other.tx.send(format!("<{}> {}", name, text));
        }
    }
}

// --- built-in commands ---------------------------------------------------

fn c_login(net: &Arc<Network>, session: &Arc<DccSession>, args: &[&str]) {
    let name = args.first().copied().unwrap_or("");
    let pass = args.get(1).copied().unwrap_or("");

    let conf = net.conf();
    let block = conf
        .operator
        .iter()
        .find(|o| o.name == name)
        .filter(|o| o.verify_password(pass));

    let Some(block) = block else {
        let _ = session.tx.send("Login failed".into());
        watch::send(net, watch::WATCH_AUTH, &session.addr, &format!("failed .login as {}", name));
        return;
    };

    let oper_privs = privs::from_names(&block.flags);
    if oper_privs & privs::DCC == 0 {
        let _ = session.tx.send("Login failed".into());
        return;
    }

    *session.oper.write() = Some(OperSession {
        name: block.name.clone(),
        privs: oper_privs,
        watchflags: watch::flags_from_names(&block.watch),
    });
    let _ = session.tx.send(format!("Logged in as {}", block.name));
    watch::send(net, watch::WATCH_AUTH, &session.addr, &format!(".login as {}", block.name));
}

fn c_quit(_net: &Arc<Network>, session: &Arc<DccSession>, _args: &[&str]) {
    let _ = session.tx.send("Goodbye".into());
}

fn c_help(net: &Arc<Network>, session: &Arc<DccSession>, _args: &[&str]) {
    let names: Vec<&'static str> = net.dcc_commands.read().iter().map(|c| c.name).collect();
    let _ = session.tx.send(format!("Commands: .login .{}", names.join(" .")));
}

fn c_status(net: &Arc<Network>, session: &Arc<DccSession>, _args: &[&str]) {
    let uptime = net.scheduler.now();
    let uplink = match net.link.read().uplink.as_ref() {
        Some(u) => format!(
            "{}{}{}",
            u.name,
            if u.tb { " +tb" } else { "" },
            if u.rsfnc { " +rsfnc" } else { "" }
        ),
        None => "(none)".to_string(),
    };
    let _ = session.tx.send(format!(
        "up {} | uplink {} | users {} | channels {} | accounts {} | registered channels {}",
        svs_proto::format_duration(uptime),
        uplink,
        net.clients.user_count(),
        net.channels.len(),
        net.registry.accounts.len(),
        net.registry.channels.len(),
    ));
}

fn c_stats(net: &Arc<Network>, session: &Arc<DccSession>, _args: &[&str]) {
    let _ = session.tx.send(format!(
        "lines in {} out {} | bursts {} | servers {} | oper bans {} | jupes {}",
        net.stats.lines_in.load(Ordering::Relaxed),
        net.stats.lines_out.load(Ordering::Relaxed),
        net.stats.bursts.load(Ordering::Relaxed),
        net.clients.servers.len(),
        net.operbans.len(),
        net.jupes.len(),
    ));
}

fn c_service(net: &Arc<Network>, session: &Arc<DccSession>, args: &[&str]) {
    match args.first() {
        None => {
            for svc in net.services.read().iter() {
                let _ = session.tx.send(format!(
                    "{} ({}) ignored {}",
                    svc.nick,
                    svc.id,
                    svc.ignored_count.load(Ordering::Relaxed)
                ));
            }
        }
        Some(id) => {
            let Some(svc) = net.service_by_id(id) else {
                let _ = session.tx.send(format!("No such service: {}", id));
                return;
            };
            let mut usage: Vec<(String, u64)> = svc
                .usage
                .iter()
                .map(|e| (e.key().to_string(), *e.value()))
                .collect();
            usage.sort();
            for (name, count) in usage {
                let _ = session.tx.send(format!("  {} {}", name, count));
            }
        }
    }
}

fn c_connect(net: &Arc<Network>, session: &Arc<DccSession>, args: &[&str]) {
    let Some(&name) = args.first() else {
        let _ = session.tx.send("Usage: .connect <name>".into());
        return;
    };
    if net.conf().connect.iter().all(|c| c.name != name) {
        let _ = session.tx.send(format!("No connect block named {}", name));
        return;
    }
    net.link.write().connect_name = Some(name.to_string());
    let _ = session
        .tx
        .send(format!("Will connect to {} on next link cycle", name));
}

fn c_rehash(net: &Arc<Network>, session: &Arc<DccSession>, args: &[&str]) {
    if args.first().is_some_and(|a| a.eq_ignore_ascii_case("help")) {
        crate::services::reload_help(net);
        let _ = session.tx.send("Help caches reloaded".into());
        return;
    }
    match crate::rehash(net) {
        Ok(()) => {
            let _ = session.tx.send("Config reloaded".into());
        }
        Err(e) => {
            let _ = session.tx.send(format!("Rehash failed: {}", e));
        }
    }
}

fn c_boot(net: &Arc<Network>, session: &Arc<DccSession>, args: &[&str]) {
    let Some(&target) = args.first() else {
        let _ = session.tx.send("Usage: .boot <oper>".into());
        return;
    };

    let mut booted = 0;
    for entry in net.dcc_sessions.iter() {
        let other = entry.value();
        let matches = other.oper.read().as_ref().is_some_and(|o| o.name == target);
        if matches {
            *other.oper.write() = None;
            let _ = other.tx.send(format!("Logged out by {}", session.addr));
            booted += 1;
        }
    }
    for entry in net.clients.by_nick.iter() {
        let user_ref = entry.value().clone();
        let matches = user_ref.read().oper.as_ref().is_some_and(|o| o.name == target);
        if matches {
            user_ref.write().oper = None;
            booted += 1;
        }
    }
    let _ = session.tx.send(format!("Booted {} session(s) of {}", booted, target));
    watch::send(net, watch::WATCH_AUTH, &session.addr, &format!(".boot {}", target));
}

fn c_events(net: &Arc<Network>, session: &Arc<DccSession>, _args: &[&str]) {
    for (name, frequency, next_in) in net.scheduler.list() {
        let _ = session
            .tx
            .send(format!("  {} every {}s, next in {}s", name, frequency, next_in));
    }
}

fn c_chat(_net: &Arc<Network>, session: &Arc<DccSession>, args: &[&str]) {
    let on = args.first().is_some_and(|a| a.eq_ignore_ascii_case("on"));
    session.chat.store(on, Ordering::Relaxed);
    let _ = session.tx.send(format!("Chat {}", if on { "on" } else { "off" }));
}

fn c_watch(_net: &Arc<Network>, session: &Arc<DccSession>, args: &[&str]) {
    let names: Vec<String> = args.iter().map(|s| s.to_string()).collect();
    let mask = watch::flags_from_names(&names);

    let mut oper = session.oper.write();
    if let Some(oper) = oper.as_mut() {
        oper.watchflags = mask;
        let _ = session
            .tx
            .send(format!("Watching: {}", watch::names_from_flags(mask)));
    }
}
