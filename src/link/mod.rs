//! The uplink connection.
//!
//! One link at a time: DISCONNECTED -> CONNECTING -> HANDSHAKE ->
//! BURSTING -> REGISTERED, falling back to DISCONNECTED on any fatal
//! parse or I/O error with an unconditional reconnect timer. The reader
//! half of this task is the only place inbound lines are processed, in
//! arrival order; the writer half drains the outbound queue.

pub mod modebuild;
pub mod modes;
pub mod ts6;

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use svs_proto::LineCodec;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{error, info, warn};

use crate::error::{FatalError, LinkError};
use crate::state::{LinkState, Network};
use ts6::LinkFault;

/// Run the uplink connection loop until a fatal error.
pub async fn run(
    net: Arc<Network>,
    mut out_rx: mpsc::UnboundedReceiver<String>,
) -> Result<(), FatalError> {
    loop {
        let (host, port, ping_time, reconnect_time) = {
            let conf = net.conf();
            let link = net.link.read();
            match conf.pick_connect(link.connect_name.as_deref()) {
                Some(block) => (
                    block.host.clone(),
                    block.port,
                    block.ping_time,
                    block.reconnect_time,
                ),
                None => {
                    error!("no usable connect block");
                    return Ok(());
                }
            }
        };

        net.link.write().state = LinkState::Connecting;
        info!(host = %host, port, "connecting to uplink");

        match TcpStream::connect((host.as_str(), port)).await {
            Ok(stream) => {
                if let Err(fault) = run_link(&net, stream, &mut out_rx, ping_time).await {
                    match fault {
                        LinkFault::Drop(reason) => {
                            warn!(reason = %reason, "link dropped");
                        }
                        LinkFault::Fatal(e) => return Err(e),
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "connect failed");
            }
        }

        teardown(&net);
        info!(seconds = reconnect_time, "reconnecting after delay");
        tokio::time::sleep(Duration::from_secs(reconnect_time)).await;
    }
}

/// Drive one established connection until it dies.
async fn run_link(
    net: &Arc<Network>,
    stream: TcpStream,
    out_rx: &mut mpsc::UnboundedReceiver<String>,
    ping_time: u64,
) -> Result<(), LinkFault> {
    let framed = Framed::new(stream, LineCodec::new());
    let (mut sink, mut reader) = framed.split();

    send_handshake(net);
    net.link.write().state = LinkState::Handshake;

    let idle = Duration::from_secs(ping_time.max(30));

    loop {
        // Reap clients exited during the previous round.
        net.clients.reap();

        tokio::select! {
            outbound = out_rx.recv() => {
                match outbound {
                    Some(line) => {
                        if let Err(e) = sink.send(line).await {
                            return Err(LinkFault::Drop(LinkError::Proto(e).to_string()));
                        }
                        // Drain whatever else is queued before reading.
                        while let Ok(line) = out_rx.try_recv() {
                            if let Err(e) = sink.send(line).await {
                                return Err(LinkFault::Drop(LinkError::Proto(e).to_string()));
                            }
                        }
                    }
                    None => return Err(LinkFault::Drop("outbound queue closed".into())),
                }
            }
            inbound = tokio::time::timeout(idle, reader.next()) => {
                match inbound {
                    Err(_) => return Err(LinkFault::Drop(LinkError::PingTimeout.to_string())),
                    Ok(None) => return Err(LinkFault::Drop(LinkError::Eof.to_string())),
                    Ok(Some(Err(e))) => {
                        // Oversized lines are skipped, not fatal.
                        if matches!(e, svs_proto::ProtoError::LineTooLong { .. }) {
                            warn!(error = %e, "oversized line from uplink");
                            continue;
                        }
                        return Err(LinkFault::Drop(LinkError::Proto(e).to_string()));
                    }
                    Ok(Some(Ok(line))) => {
                        ts6::dispatch(net, &line).await?;
                    }
                }
            }
        }
    }
}

/// PASS, CAPAB and SERVER, in that order.
fn send_handshake(net: &Arc<Network>) {
    let conf = net.conf();
    let link = net.link.read();
    let Some(block) = conf.pick_connect(link.connect_name.as_deref()) else {
        return;
    };
    drop(link);

    match &net.me.sid {
        Some(sid) => net.send(format!("PASS {} TS 6 :{}", block.password, sid)),
        None => net.send(format!("PASS {} :TS", block.password)),
    }
    net.send("CAPAB :QS EX IE ENCAP TB SERVICES");
    net.send(format!("SERVER {} 1 :{}", net.me.name, net.me.info));
}

/// Forget everything the dead link told us.
fn teardown(net: &Arc<Network>) {
    {
        let mut link = net.link.write();
        link.state = LinkState::Disconnected;
        link.uplink = None;
    }

    // Dropping the uplink server exits every remote user and server.
    let roots: Vec<String> = net
        .clients
        .servers
        .iter()
        .filter(|entry| entry.value().read().uplink.is_none())
        .map(|entry| entry.key().clone())
        .collect();
    for root in roots {
        net.exit_server(&root);
    }
    net.clients.reap();

    // Channels without remote members are gone too; services re-burst.
    net.channels.channels.clear();
    for service in net.services.read().iter() {
        service.clear_presence();
    }
}
