//! Test harness.
//!
//! Builds a full Network over a throwaway on-disk SQLite database and
//! feeds it raw uplink lines. Outbound traffic is captured from the
//! writer queue so tests can assert on exactly what would hit the wire.

#![allow(dead_code)]

use std::sync::Arc;

use svsd::config::Config;
use svsd::db::Database;
use svsd::link::ts6;
use svsd::state::Network;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

pub struct TestNet {
    pub net: Arc<Network>,
    pub out: UnboundedReceiver<String>,
    _dir: TempDir,
}

/// Config used by every test net. Flood limits are opened up so a test
/// can issue long command sequences without tripping the window.
fn test_config(extra: &str) -> String {
    format!(
        r#"
[serverinfo]
name = "services.test.net"
sid = "36C"
description = "test services"

[database]
path = "OVERRIDDEN"

[[connect]]
name = "hub"
host = "127.0.0.1"
port = 6667
password = "linkpass"

[[operator]]
name = "oper1"
password = "secret"
encrypted = false
flags = ["admin"]
watch = ["all"]

[services.userserv.identity]
nick = "USERSERV"
flood_max = 400
flood_max_ignore = 600

[services.chanserv.identity]
nick = "CHANSERV"
flood_max = 400
flood_max_ignore = 600

[services.banserv.identity]
nick = "BANSERV"
flood_max = 400
flood_max_ignore = 600

{}
"#,
        extra
    )
}

impl TestNet {
    /// Build a network with optional extra config TOML appended.
    pub async fn build(extra: &str) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let db_path = dir.path().join("svsd-test.db");

        let mut config: Config = toml::from_str(&test_config(extra)).expect("test config");
        config.database.path = db_path.to_string_lossy().into_owned();
        config.validate().expect("valid test config");

        let db = Database::new(&config.database.path).await.expect("database");
        let (net, out) = Network::new(config, String::new(), db);
        svsd::init_services(&net).await.expect("service init");

        Self {
            net,
            out,
            _dir: dir,
        }
    }

    /// Feed one raw line into the dispatcher.
    pub async fn feed(&self, line: &str) {
        let _ = ts6::dispatch(&self.net, line).await;
    }

    /// Run the uplink handshake and finish the burst.
    pub async fn link(&self) {
        self.feed("PASS linkpass TS 6 :1AB").await;
        self.feed("CAPAB :QS EX IE ENCAP TB").await;
        self.feed("SERVER irc.hub.test 1 :test hub").await;
        self.feed("PING :irc.hub.test").await;
    }

    /// Introduce a TS6 user from the hub.
    pub async fn introduce(&self, nick: &str, user: &str, host: &str, ip: &str, uid: &str) {
        self.feed(&format!(
            ":1AB UID {} 1 1000 +i {} {} {} {} :test user",
            nick, user, host, ip, uid
        ))
        .await;
    }

    /// PRIVMSG a service as the given UID.
    pub async fn privmsg(&self, uid: &str, service: &str, text: &str) {
        self.feed(&format!(":{} PRIVMSG {} :{}", uid, service, text))
            .await;
    }

    /// Drain captured outbound lines.
    pub fn drain(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = self.out.try_recv() {
            lines.push(line);
        }
        lines
    }

    /// Drain and keep only lines containing the needle.
    pub fn drain_matching(&mut self, needle: &str) -> Vec<String> {
        self.drain()
            .into_iter()
            .filter(|l| l.contains(needle))
            .collect()
    }

    /// True when any outbound line contains the needle.
    pub fn sent(&mut self, needle: &str) -> bool {
        !self.drain_matching(needle).is_empty()
    }
}
