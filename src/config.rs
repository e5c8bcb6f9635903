//! Configuration loading and management.
//!
//! The config file is TOML with one table per block: `serverinfo`,
//! `database`, `email`, `admin`, `[[connect]]`, `[[operator]]` and a
//! `[services.*]` table per virtual service. Most of it is reloadable at
//! runtime through `.rehash` / `OPERSERV REHASH`; the serverinfo block is
//! not, since the uplink already knows who we are.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Our identity on the network.
    pub serverinfo: ServerInfoConfig,
    /// SQLite database location.
    pub database: DatabaseConfig,
    /// Outbound email settings.
    #[serde(default)]
    pub email: EmailConfig,
    /// Administrative contact, shown by `.status` and ADMIN queries.
    #[serde(default)]
    pub admin: AdminConfig,
    /// Uplink definitions; one is active at a time.
    #[serde(default)]
    pub connect: Vec<ConnectBlock>,
    /// Operator definitions for OLOGIN and `.login`.
    #[serde(default)]
    pub operator: Vec<OperBlock>,
    /// Oper control channel listener.
    #[serde(default)]
    pub dcc: DccConfig,
    /// Per-service blocks.
    #[serde(default)]
    pub services: ServicesConfig,
}

impl Config {
    /// Load and parse a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw)?;
        Ok(config)
    }

    /// Validate cross-field requirements that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.serverinfo.name.is_empty() || !self.serverinfo.name.contains('.') {
            return Err(ConfigError::Invalid(
                "serverinfo.name must be a dotted server name".into(),
            ));
        }
        if let Some(sid) = &self.serverinfo.sid {
            let ok = sid.len() == 3
                && sid.as_bytes()[0].is_ascii_digit()
                && sid.bytes().all(|b| b.is_ascii_digit() || b.is_ascii_uppercase());
            if !ok {
                return Err(ConfigError::Invalid(
                    "serverinfo.sid must be a digit followed by two [0-9A-Z]".into(),
                ));
            }
        }
        if self.connect.is_empty() {
            return Err(ConfigError::Invalid("no connect blocks defined".into()));
        }
        for oper in &self.operator {
            if oper.name.is_empty() {
                return Err(ConfigError::Invalid("operator with empty name".into()));
            }
        }
        Ok(())
    }

    /// The connect block to use next: the named one, else the first
    /// autoconn block, else the first block.
    pub fn pick_connect(&self, name: Option<&str>) -> Option<&ConnectBlock> {
        if let Some(name) = name {
            return self.connect.iter().find(|c| c.name == name);
        }
        self.connect
            .iter()
            .find(|c| c.autoconn)
            .or_else(|| self.connect.first())
    }

    /// Find an operator block matching name and `user@host` under glob rules.
    pub fn find_oper(&self, name: &str, userhost: &str) -> Option<&OperBlock> {
        self.operator
            .iter()
            .find(|o| o.name == name && o.mask_matches(userhost))
    }
}

/// Our pseudo-server identity.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfoConfig {
    /// Server name, e.g. `services.example.net`.
    pub name: String,
    /// TS6 SID. When absent we speak the legacy pre-TS6 forms.
    #[serde(default)]
    pub sid: Option<String>,
    /// Info string sent in SERVER.
    #[serde(default = "default_description")]
    pub description: String,
    /// Default language code for new accounts.
    #[serde(default = "default_language")]
    pub default_language: String,
    /// Directory holding per-language translation and help files.
    #[serde(default = "default_langdir")]
    pub langdir: String,
}

fn default_description() -> String {
    "network services".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_langdir() -> String {
    "langs".to_string()
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file, or `:memory:`.
    pub path: String,
}

/// Outbound email configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    /// Master switch; when off, flows that need email refuse politely.
    #[serde(default)]
    pub enabled: bool,
    /// Sendmail-compatible program to spawn.
    #[serde(default = "default_sendmail")]
    pub program: String,
    /// From address on generated mail.
    #[serde(default)]
    pub from_address: String,
    /// Display name on generated mail.
    #[serde(default)]
    pub from_name: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            program: default_sendmail(),
            from_address: String::new(),
            from_name: String::new(),
        }
    }
}

fn default_sendmail() -> String {
    "/usr/sbin/sendmail".to_string()
}

/// Administrative contact block.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AdminConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub email: String,
}

/// An uplink definition.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectBlock {
    /// Name used by `.connect` and logs.
    pub name: String,
    /// Host or address to connect to.
    pub host: String,
    /// Port on the uplink.
    pub port: u16,
    /// Link password, sent in PASS and expected back.
    pub password: String,
    /// Optional local address to bind.
    #[serde(default)]
    pub vhost: Option<String>,
    /// Connect automatically at startup and after errors.
    #[serde(default = "default_true")]
    pub autoconn: bool,
    /// Seconds of silence before the link is declared dead.
    #[serde(default = "default_ping_time")]
    pub ping_time: u64,
    /// Seconds to wait before reconnecting.
    #[serde(default = "default_reconnect_time")]
    pub reconnect_time: u64,
}

fn default_true() -> bool {
    true
}

fn default_ping_time() -> u64 {
    300
}

fn default_reconnect_time() -> u64 {
    30
}

/// An operator definition.
#[derive(Debug, Clone, Deserialize)]
pub struct OperBlock {
    /// Login name.
    pub name: String,
    /// Password, bcrypt when `encrypted`, plaintext otherwise.
    pub password: String,
    /// Whether `password` is a bcrypt hash.
    #[serde(default = "default_true")]
    pub encrypted: bool,
    /// `user@host` glob the IRC user must match for OLOGIN.
    #[serde(default = "default_mask")]
    pub mask: String,
    /// Server name glob the user must be on, `*` for any.
    #[serde(default = "default_mask_star")]
    pub server: String,
    /// Privilege flag names; see [`crate::services::privs`].
    #[serde(default)]
    pub flags: Vec<String>,
    /// Default watchflags subscription names.
    #[serde(default)]
    pub watch: Vec<String>,
}

fn default_mask() -> String {
    "*@*".to_string()
}

fn default_mask_star() -> String {
    "*".to_string()
}

impl OperBlock {
    /// Verify a password attempt against this block.
    pub fn verify_password(&self, attempt: &str) -> bool {
        if self.encrypted {
            bcrypt::verify(attempt, &self.password).unwrap_or(false)
        } else {
            self.password == attempt
        }
    }

    /// Match the caller's `user@host` against our mask glob.
    pub fn mask_matches(&self, userhost: &str) -> bool {
        svs_proto::match_mask(&self.mask, userhost)
    }

    /// Match the caller's server against our server glob.
    pub fn server_matches(&self, server: &str) -> bool {
        svs_proto::match_mask(&self.server, server)
    }
}

/// Oper control channel listener.
#[derive(Debug, Clone, Deserialize)]
pub struct DccConfig {
    /// Enable the listener.
    #[serde(default)]
    pub enabled: bool,
    /// Bind address.
    #[serde(default = "default_dcc_addr")]
    pub listen: String,
    /// Bind port.
    #[serde(default = "default_dcc_port")]
    pub port: u16,
}

impl Default for DccConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_dcc_addr(),
            port: default_dcc_port(),
        }
    }
}

fn default_dcc_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_dcc_port() -> u16 {
    4321
}

/// Identity and flood settings shared by every service block.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceIdentity {
    /// Nick the service appears under.
    pub nick: String,
    /// Username part of the service mask.
    #[serde(default = "default_service_user")]
    pub username: String,
    /// Host part of the service mask.
    #[serde(default = "default_service_host")]
    pub host: String,
    /// Info string.
    #[serde(default = "default_service_realname")]
    pub realname: String,
    /// Per-user command count per flood window before warnings.
    #[serde(default = "default_flood_max")]
    pub flood_max: u32,
    /// Per-user count per window past which commands drop silently.
    #[serde(default = "default_flood_max_ignore")]
    pub flood_max_ignore: u32,
    /// Flood window in seconds.
    #[serde(default = "default_flood_window")]
    pub flood_window: u64,
    /// Refuse direct PRIVMSG, demanding the `/msg svc@server` shortcut.
    #[serde(default)]
    pub require_shortcut: bool,
}

fn default_service_user() -> String {
    "services".to_string()
}

fn default_service_host() -> String {
    "services.int".to_string()
}

fn default_service_realname() -> String {
    "network service".to_string()
}

fn default_flood_max() -> u32 {
    25
}

fn default_flood_max_ignore() -> u32 {
    50
}

fn default_flood_window() -> u64 {
    60
}

fn identity(nick: &str, realname: &str) -> ServiceIdentity {
    ServiceIdentity {
        nick: nick.to_string(),
        username: default_service_user(),
        host: default_service_host(),
        realname: realname.to_string(),
        flood_max: default_flood_max(),
        flood_max_ignore: default_flood_max_ignore(),
        flood_window: default_flood_window(),
        require_shortcut: false,
    }
}

/// All per-service blocks, each optional with sensible defaults.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServicesConfig {
    #[serde(default)]
    pub userserv: UserservConfig,
    #[serde(default)]
    pub nickserv: NickservConfig,
    #[serde(default)]
    pub chanserv: ChanservConfig,
    #[serde(default)]
    pub banserv: BanservConfig,
    #[serde(default)]
    pub operserv: OperservConfig,
    #[serde(default)]
    pub operbot: OperbotConfig,
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub jupeserv: JupeservConfig,
    #[serde(default)]
    pub alis: AlisConfig,
    #[serde(default)]
    pub memoserv: MemoservConfig,
    #[serde(default)]
    pub watchserv: WatchservConfig,
}

/// Account registry settings.
#[derive(Debug, Clone, Deserialize)]
pub struct UserservConfig {
    #[serde(default = "userserv_identity")]
    pub identity: ServiceIdentity,
    /// Registrations allowed per `register_time` window, process wide.
    #[serde(default = "default_register_amount")]
    pub register_amount: u32,
    /// Process-wide registration window, seconds.
    #[serde(default = "default_register_time")]
    pub register_time: u64,
    /// Registrations allowed per host per `hregister_time` window.
    #[serde(default = "default_hregister_amount")]
    pub hregister_amount: u32,
    /// Per-host registration window, seconds.
    #[serde(default = "default_hregister_time")]
    pub hregister_time: u64,
    /// Require an email address at REGISTER.
    #[serde(default)]
    pub require_email: bool,
    /// Send verification tokens and hold accounts unusable until ACTIVATE.
    #[serde(default)]
    pub email_verification: bool,
    /// Concurrent login sessions per account.
    #[serde(default = "default_max_logins")]
    pub max_logins: u32,
    /// Inactivity expiry for active accounts, seconds. 0 disables.
    #[serde(default = "default_uexpire_time")]
    pub expire_time: u64,
    /// Inactivity expiry for suspended accounts, seconds. 0 disables.
    #[serde(default = "default_uexpire_suspended")]
    pub expire_suspended_time: u64,
    /// Expiry for never-activated accounts, seconds.
    #[serde(default = "default_uexpire_unverified")]
    pub expire_unverified_time: u64,
    /// Account age before the expiry bonus starts accruing.
    #[serde(default = "default_bonus_regtime")]
    pub expire_bonus_regtime: u64,
    /// Each full `per_time` of age past the threshold adds `bonus`.
    #[serde(default = "default_bonus_per_time")]
    pub expire_bonus_per_time: u64,
    /// Bonus step, seconds.
    #[serde(default = "default_bonus_step")]
    pub expire_bonus: u64,
    /// Bonus cap, seconds.
    #[serde(default = "default_bonus_max")]
    pub expire_bonus_max: u64,
    /// Minimum wait between reset-token requests, and token lifetime.
    #[serde(default = "default_reset_duration")]
    pub reset_duration: u64,
}

impl Default for UserservConfig {
    fn default() -> Self {
        toml::from_str("").expect("defaults")
    }
}

fn userserv_identity() -> ServiceIdentity {
    identity("USERSERV", "account registry")
}

fn default_register_amount() -> u32 {
    5
}

fn default_register_time() -> u64 {
    60
}

fn default_hregister_amount() -> u32 {
    1
}

fn default_hregister_time() -> u64 {
    86_400
}

fn default_max_logins() -> u32 {
    5
}

fn default_uexpire_time() -> u64 {
    35 * 86_400
}

fn default_uexpire_suspended() -> u64 {
    14 * 86_400
}

fn default_uexpire_unverified() -> u64 {
    86_400
}

fn default_bonus_regtime() -> u64 {
    40 * 86_400
}

fn default_bonus_per_time() -> u64 {
    30 * 86_400
}

fn default_bonus_step() -> u64 {
    5 * 86_400
}

fn default_bonus_max() -> u64 {
    30 * 86_400
}

fn default_reset_duration() -> u64 {
    86_400
}

/// Nickname registry settings.
#[derive(Debug, Clone, Deserialize)]
pub struct NickservConfig {
    #[serde(default = "nickserv_identity")]
    pub identity: ServiceIdentity,
    /// Whether the service runs at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Nicknames one account may register.
    #[serde(default = "default_max_nicks")]
    pub max_nicks: u32,
}

impl Default for NickservConfig {
    fn default() -> Self {
        toml::from_str("").expect("defaults")
    }
}

fn nickserv_identity() -> ServiceIdentity {
    identity("NICKSERV", "nickname registry")
}

fn default_max_nicks() -> u32 {
    2
}

/// Channel registry settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ChanservConfig {
    #[serde(default = "chanserv_identity")]
    pub identity: ServiceIdentity,
    /// Registrations per window, process wide.
    #[serde(default = "default_register_amount")]
    pub register_amount: u32,
    #[serde(default = "default_register_time")]
    pub register_time: u64,
    /// Registrations per host per window.
    #[serde(default = "default_hregister_amount")]
    pub hregister_amount: u32,
    #[serde(default = "default_hregister_time")]
    pub hregister_time: u64,
    /// Inactivity expiry for active channels, seconds. 0 disables.
    #[serde(default = "default_cexpire_time")]
    pub expire_time: u64,
    /// Inactivity expiry for suspended channels.
    #[serde(default = "default_cexpire_suspended")]
    pub expire_suspended_time: u64,
    /// Expiry bonus controls, as for accounts.
    #[serde(default = "default_bonus_regtime")]
    pub expire_bonus_regtime: u64,
    #[serde(default = "default_bonus_per_time")]
    pub expire_bonus_per_time: u64,
    #[serde(default = "default_bonus_step")]
    pub expire_bonus: u64,
    #[serde(default = "default_bonus_max")]
    pub expire_bonus_max: u64,
    /// Seconds between topic/ban enforcement scans; 0 enforces topics
    /// immediately on each TOPIC hook.
    #[serde(default = "default_enforce_frequency")]
    pub enforcetopic_frequency: u64,
    /// Seconds between stored-ban expiry scans.
    #[serde(default = "default_expireban_frequency")]
    pub expireban_frequency: u64,
    /// Keep the service in empty AUTOJOIN channels.
    #[serde(default)]
    pub autojoin_empty: bool,
    /// DELOWNER requires an emailed token first.
    #[serde(default)]
    pub email_delowner: bool,
    /// Stored bans per channel.
    #[serde(default = "default_max_bans")]
    pub max_bans: u32,
}

impl Default for ChanservConfig {
    fn default() -> Self {
        toml::from_str("").expect("defaults")
    }
}

fn chanserv_identity() -> ServiceIdentity {
    identity("CHANSERV", "channel registry")
}

fn default_cexpire_time() -> u64 {
    35 * 86_400
}

fn default_cexpire_suspended() -> u64 {
    14 * 86_400
}

fn default_enforce_frequency() -> u64 {
    900
}

fn default_expireban_frequency() -> u64 {
    900
}

fn default_max_bans() -> u32 {
    50
}

/// Server-wide ban manager settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BanservConfig {
    #[serde(default = "banserv_identity")]
    pub identity: ServiceIdentity,
    /// KLINE refusal threshold without the nomax privilege.
    #[serde(default = "default_max_kline_matches")]
    pub max_kline_matches: u32,
    /// XLINE refusal threshold.
    #[serde(default = "default_max_xline_matches")]
    pub max_xline_matches: u32,
    /// Regex-ban refusal threshold.
    #[serde(default = "default_max_regexp_matches")]
    pub max_regexp_matches: u32,
    /// Duration of auto-klines set by regex bans, seconds.
    #[serde(default = "default_regexp_time")]
    pub regexp_time: u64,
    /// Seconds between automatic SYNC broadcasts. 0 disables.
    #[serde(default = "default_autosync_frequency")]
    pub autosync_frequency: u64,
    /// Seconds an unban marker is kept before the row is reaped.
    #[serde(default = "default_unban_time")]
    pub unban_time: u64,
}

impl Default for BanservConfig {
    fn default() -> Self {
        toml::from_str("").expect("defaults")
    }
}

fn banserv_identity() -> ServiceIdentity {
    identity("BANSERV", "network ban service")
}

fn default_max_kline_matches() -> u32 {
    200
}

fn default_max_xline_matches() -> u32 {
    200
}

fn default_max_regexp_matches() -> u32 {
    200
}

fn default_regexp_time() -> u64 {
    86_400
}

fn default_autosync_frequency() -> u64 {
    0
}

fn default_unban_time() -> u64 {
    2 * 86_400
}

/// Oper helper settings.
#[derive(Debug, Clone, Deserialize)]
pub struct OperservConfig {
    #[serde(default = "operserv_identity")]
    pub identity: ServiceIdentity,
}

impl Default for OperservConfig {
    fn default() -> Self {
        toml::from_str("").expect("defaults")
    }
}

fn operserv_identity() -> ServiceIdentity {
    identity("OPERSERV", "oper services")
}

/// Operbot settings.
#[derive(Debug, Clone, Deserialize)]
pub struct OperbotConfig {
    #[serde(default = "operbot_identity")]
    pub identity: ServiceIdentity,
    #[serde(default)]
    pub enabled: bool,
}

impl Default for OperbotConfig {
    fn default() -> Self {
        toml::from_str("").expect("defaults")
    }
}

fn operbot_identity() -> ServiceIdentity {
    identity("OPERBOT", "oper channel helper")
}

/// Network notice settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GlobalConfig {
    #[serde(default = "global_identity")]
    pub identity: ServiceIdentity,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        toml::from_str("").expect("defaults")
    }
}

fn global_identity() -> ServiceIdentity {
    identity("GLOBAL", "network notices")
}

/// Jupe coordination settings.
#[derive(Debug, Clone, Deserialize)]
pub struct JupeservConfig {
    #[serde(default = "jupeserv_identity")]
    pub identity: ServiceIdentity,
    #[serde(default)]
    pub enabled: bool,
    /// Merge the command surface into this service id at init.
    #[serde(default)]
    pub merge_into: Option<String>,
    /// Score added by an oper vote.
    #[serde(default = "default_oper_score")]
    pub oper_score: u32,
    /// Score added by an admin vote.
    #[serde(default = "default_admin_score")]
    pub admin_score: u32,
    /// Score a pending jupe must reach.
    #[serde(default = "default_jupe_score")]
    pub jupe_score: u32,
    /// Score a pending unjupe must reach.
    #[serde(default = "default_unjupe_score")]
    pub unjupe_score: u32,
    /// Seconds a pending vote survives without reinforcement.
    #[serde(default = "default_pending_time")]
    pub pending_time: u64,
}

impl Default for JupeservConfig {
    fn default() -> Self {
        toml::from_str("").expect("defaults")
    }
}

fn jupeserv_identity() -> ServiceIdentity {
    identity("JUPESERV", "server jupe service")
}

fn default_oper_score() -> u32 {
    3
}

fn default_admin_score() -> u32 {
    15
}

fn default_jupe_score() -> u32 {
    15
}

fn default_unjupe_score() -> u32 {
    15
}

fn default_pending_time() -> u64 {
    1_800
}

/// Channel list search settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AlisConfig {
    #[serde(default = "alis_identity")]
    pub identity: ServiceIdentity,
    /// Output cap per LIST.
    #[serde(default = "default_alis_max")]
    pub max_matches: u32,
}

impl Default for AlisConfig {
    fn default() -> Self {
        toml::from_str("").expect("defaults")
    }
}

fn alis_identity() -> ServiceIdentity {
    identity("ALIS", "channel directory")
}

fn default_alis_max() -> u32 {
    60
}

/// Memo store settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MemoservConfig {
    #[serde(default = "memoserv_identity")]
    pub identity: ServiceIdentity,
    /// Stored memos per account.
    #[serde(default = "default_max_memos")]
    pub max_memos: u32,
}

impl Default for MemoservConfig {
    fn default() -> Self {
        toml::from_str("").expect("defaults")
    }
}

fn memoserv_identity() -> ServiceIdentity {
    identity("MEMOSERV", "memo store")
}

fn default_max_memos() -> u32 {
    50
}

/// Watch/audit stream settings.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchservConfig {
    #[serde(default = "watchserv_identity")]
    pub identity: ServiceIdentity,
    /// Merge the command surface into this service id at init.
    #[serde(default)]
    pub merge_into: Option<String>,
}

impl Default for WatchservConfig {
    fn default() -> Self {
        toml::from_str("").expect("defaults")
    }
}

fn watchserv_identity() -> ServiceIdentity {
    identity("WATCHSERV", "audit streams")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses() {
        let raw = r#"
            [serverinfo]
            name = "services.example.net"
            sid = "36C"

            [database]
            path = ":memory:"

            [[connect]]
            name = "hub"
            host = "127.0.0.1"
            port = 6667
            password = "linkpass"
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        config.validate().unwrap();
        assert_eq!(config.serverinfo.sid.as_deref(), Some("36C"));
        assert_eq!(config.services.userserv.identity.nick, "USERSERV");
        assert_eq!(config.services.chanserv.max_bans, 50);
    }

    #[test]
    fn bad_sid_is_rejected() {
        let raw = r#"
            [serverinfo]
            name = "services.example.net"
            sid = "abc"

            [database]
            path = ":memory:"

            [[connect]]
            name = "hub"
            host = "127.0.0.1"
            port = 6667
            password = "x"
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn oper_block_password_plain_and_hashed() {
        let oper = OperBlock {
            name: "lee".into(),
            password: "letmein".into(),
            encrypted: false,
            mask: "*@staff.example".into(),
            server: "*".into(),
            flags: vec!["admin".into()],
            watch: vec![],
        };
        assert!(oper.verify_password("letmein"));
        assert!(!oper.verify_password("wrong"));
        assert!(oper.mask_matches("lee@staff.example"));
        assert!(!oper.mask_matches("lee@elsewhere.example"));
    }

    #[test]
    fn pick_connect_prefers_autoconn() {
        let raw = r#"
            [serverinfo]
            name = "services.example.net"

            [database]
            path = ":memory:"

            [[connect]]
            name = "cold"
            host = "a"
            port = 1
            password = "x"
            autoconn = false

            [[connect]]
            name = "hot"
            host = "b"
            port = 2
            password = "x"
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.pick_connect(None).unwrap().name, "hot");
        assert_eq!(config.pick_connect(Some("cold")).unwrap().name, "cold");
    }
}
