//! Outbound email.
//!
//! The daemon only ever asks "send body Y to address X"; everything else
//! is the sendmail-compatible program's problem. The child is spawned
//! detached and the caller gets control back immediately, so a slow MTA
//! cannot stall the main loop. Failures are reported to the requester by
//! the calling flow, which leaves its token row in place for retry.

use std::process::Stdio;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::state::Network;

/// Fire-and-forget send. Returns false only when email is disabled or
/// the program could not be spawned at all.
pub fn send(net: &Arc<Network>, to: &str, subject: &str, body: &str) -> bool {
    let conf = net.conf();
    if !conf.email.enabled {
        return false;
    }

    let message = format!(
        "From: {} <{}>\r\nTo: {}\r\nSubject: {}\r\n\r\n{}\r\n",
        conf.email.from_name, conf.email.from_address, to, subject, body
    );

    let mut child = match tokio::process::Command::new(&conf.email.program)
        .arg("-t")
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            warn!(program = %conf.email.program, error = %e, "failed to spawn mailer");
            return false;
        }
    };

    let to = to.to_string();
    tokio::spawn(async move {
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(message.as_bytes()).await {
                warn!(error = %e, "failed writing to mailer");
                return;
            }
            drop(stdin);
        }
        match child.wait().await {
            Ok(status) if status.success() => {
                info!(to = %to, "email handed to mailer");
            }
            Ok(status) => {
                warn!(to = %to, status = %status, "mailer exited nonzero");
            }
            Err(e) => {
                warn!(error = %e, "mailer wait failed");
            }
        }
    });
    true
}
