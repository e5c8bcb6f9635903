//! svsd - TS6 IRC network services daemon.
//!
//! Links to one uplink as a pseudo-server and runs the virtual service
//! clients (account, nickname and channel registries, ban manager, oper
//! helper, notices, jupes, directory, memos) over a shared [`state::Network`]
//! context. The binary in `main.rs` is a thin wrapper; everything it
//! wires together lives here so the integration tests can drive the
//! same machinery against an in-memory database.

pub mod cache;
pub mod config;
pub mod db;
pub mod dcc;
pub mod email;
pub mod error;
pub mod event;
pub mod hook;
pub mod lang;
pub mod link;
pub mod services;
pub mod state;
pub mod watch;

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::state::Network;

/// Reload the configuration file and swap it in. Identity blocks stay
/// fixed: the uplink already knows who we are.
pub fn rehash(net: &Arc<Network>) -> Result<(), crate::config::ConfigError> {
    let config = Config::load(&net.config_path)?;
    config.validate()?;

    {
        let mut langs = net.langs.write();
        langs.clear_translations();
        langs.load_dir(&config.serverinfo.langdir);
    }
    *net.config.write() = Arc::new(config);
    info!("configuration reloaded");
    Ok(())
}

/// Wire every service into the context: handlers, hooks, events,
/// registry loads and configured merges.
pub async fn init_services(net: &Arc<Network>) -> Result<(), crate::db::DbError> {
    let conf = net.conf();
    let help_root = format!("{}/help", conf.serverinfo.langdir);

    services::userserv::init(net, &help_root);
    if conf.services.nickserv.enabled {
        services::nickserv::init(net, &help_root);
    }
    services::chanserv::init(net, &help_root);
    services::banserv::init(net, &help_root);
    services::operserv::init(net, &help_root);
    if conf.services.operbot.enabled {
        services::operbot::init(net, &help_root);
    }
    services::global::init(net, &help_root);
    if conf.services.jupeserv.enabled {
        services::jupeserv::init(net, &help_root);
    }
    services::alis::init(net, &help_root);
    services::memoserv::init(net, &help_root);
    services::watchserv::init(net, &help_root);

    // Bring the registries into memory before anything can dispatch.
    services::userserv::load(net).await?;
    services::chanserv::load(net).await?;
    services::banserv::load(net).await?;
    services::operserv::load(net).await?;
    services::global::load(net).await?;
    if conf.services.jupeserv.enabled {
        services::jupeserv::load(net).await?;
    }

    // Configured merges collapse command surfaces into their parent.
    if let Some(parent) = conf.services.jupeserv.merge_into.as_deref() {
        if conf.services.jupeserv.enabled {
            services::merge_service(net, "jupeserv", parent);
        }
    }
    if let Some(parent) = conf.services.watchserv.merge_into.as_deref() {
        services::merge_service(net, "watchserv", parent);
    }

    Ok(())
}

/// The periodic mailbox scan, registered by the binary at startup.
pub fn e_dbhook_scan(net: Arc<Network>) -> futures_util::future::BoxFuture<'static, ()> {
    Box::pin(async move {
        if let Err(e) = crate::db::hooks::scan(&net).await {
            tracing::warn!(error = %e, "mailbox scan failed");
        }
    })
}
