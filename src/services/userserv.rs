//! The account registry service.
//!
//! Registration with optional email verification, login sessions pinned
//! to the uplink with ENCAP SU, two-phase resetpass/resetemail token
//! flows, suspension, and inactivity expiry with an age bonus. Accounts
//! live in memory; rows are written through as they change and
//! last-activity is flushed in batches by DBSYNC.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use subtle::ConstantTimeEq;
use svs_proto::irc_to_lower;
use tracing::{info, warn};

use crate::db::hooks::{ScheduledWrites, SyncRow};
use crate::hook::{HookData, HookId};
use crate::lang::{LangArg, MsgId};
use crate::state::{
    Network, RegAccount, Suspension, UserRef, US_NEVERLOGGEDIN, US_NOACCESS, US_NOMEMOS, US_PRIVATE,
};
use crate::watch;

use super::{CmdCtx, CommandSpec, Service, ServiceHandler};

/// Longest acceptable account name.
const USERNAME_MAX: usize = 16;
/// Longest acceptable password.
const PASSWORD_MAX: usize = 50;

pub struct UserServ {
    /// Process-wide registration window: (window start, count).
    register_window: Mutex<(u64, u32)>,
}

static COMMANDS: &[CommandSpec] = &[
    CommandSpec { name: "ACTIVATE", min_args: 2, flood: 1, need_login: false, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "DROP", min_args: 1, flood: 1, need_login: false, oper_only: true, oper_priv: super::privs::USER_ADMIN },
    CommandSpec { name: "INFO", min_args: 0, flood: 2, need_login: false, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "LOGIN", min_args: 2, flood: 1, need_login: false, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "LOGOUT", min_args: 0, flood: 1, need_login: false, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "REGISTER", min_args: 2, flood: 5, need_login: false, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "RESETEMAIL", min_args: 1, flood: 5, need_login: false, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "RESETPASS", min_args: 1, flood: 5, need_login: false, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "SET", min_args: 2, flood: 1, need_login: true, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "SETEMAIL", min_args: 2, flood: 2, need_login: true, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "SETPASS", min_args: 2, flood: 2, need_login: true, oper_only: false, oper_priv: 0 },
    CommandSpec { name: "SUSPEND", min_args: 3, flood: 1, need_login: false, oper_only: true, oper_priv: super::privs::USER_ADMIN },
    CommandSpec { name: "UNSUSPEND", min_args: 1, flood: 1, need_login: false, oper_only: true, oper_priv: super::privs::USER_ADMIN },
];

/// Create and register the service, its events and mailbox hooks.
pub fn init(net: &Arc<Network>, help_root: &str) -> Arc<Service> {
    let conf = net.conf();
    let handler = Arc::new(UserServ {
        register_window: Mutex::new((0, 0)),
    });
    let svc = Service::build("userserv", &conf.services.userserv.identity, handler, help_root);
    super::register(net, svc.clone());

    net.scheduler.add("userserv_expire", e_expire, 900);
    net.scheduler.add("userserv_expire_reset", e_expire_resets, 3600);

    net.db_hooks.register("REGISTER", dbh_register);
    net.db_hooks.register("SETPASS", dbh_setpass);
    net.db_hooks.register("SETEMAIL", dbh_setemail);

    crate::dcc::register_command(
        net,
        crate::dcc::DccCommand {
            name: "userinfo",
            privs: super::privs::USER_ADMIN,
            handler: dcc_userinfo,
        },
    );

    svc
}

/// `.userinfo <account>` from the oper control channel.
fn dcc_userinfo(net: &Arc<Network>, session: &Arc<crate::state::DccSession>, args: &[&str]) {
    let Some(&name) = args.first() else {
        let _ = session.tx.send("Usage: .userinfo <account>".into());
        return;
    };
    let Some(account_ref) = net.registry.find_account(name) else {
        let _ = session.tx.send(format!("No such account: {}", name));
        return;
    };
    let account = account_ref.read();
    let _ = session.tx.send(format!(
        "{} registered {} last {} sessions {} channels {} flags {:#x}{}",
        account.name,
        account.reg_time,
        account.last_time,
        account.sessions.len(),
        account.channels.len(),
        account.flags,
        match &account.suspend {
            Some(s) => format!(" SUSPENDED by {}: {}", s.by, s.reason),
            None => String::new(),
        }
    ));
}

/// Load all accounts and nicknames from the store at startup.
pub async fn load(net: &Arc<Network>) -> Result<(), crate::db::DbError> {
    let rows = net.db.accounts().load_all().await?;
    let count = rows.len();
    for row in rows {
        let suspend = row.suspender.as_ref().map(|by| Suspension {
            by: by.clone(),
            reason: row.suspend_reason.clone().unwrap_or_default(),
            expires: row.suspend_time.max(0) as u64,
        });
        let account = RegAccount {
            id: row.id,
            name: row.username.clone(),
            pass_hash: row.password,
            email: row.email,
            suspend,
            reg_time: row.reg_time.max(0) as u64,
            last_time: row.last_time.max(0) as u64,
            flags: row.flags as u32,
            language: row.language,
            verify_token: row.verify_token,
            sessions: Vec::new(),
            channels: HashSet::new(),
            nicks: HashSet::new(),
            dirty: false,
        };
        net.registry.accounts.insert(
            irc_to_lower(&row.username),
            Arc::new(parking_lot::RwLock::new(account)),
        );
    }

    for nick in net.db.accounts().load_all_nicks().await? {
        let folded_account = irc_to_lower(&nick.username);
        if let Some(account) = net.registry.accounts.get(&folded_account) {
            account.write().nicks.insert(irc_to_lower(&nick.nickname));
        }
        net.registry.nicks.insert(
            irc_to_lower(&nick.nickname),
            crate::state::RegNick {
                name: nick.nickname,
                account: folded_account,
                reg_time: nick.reg_time.max(0) as u64,
                last_time: nick.last_time.max(0) as u64,
                flags: nick.flags as u32,
            },
        );
    }

    info!(accounts = count, "account registry loaded");
    Ok(())
}

/// Generate a one-shot token.
pub fn make_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect()
}

/// Constant-time token comparison.
pub fn token_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && a.as_bytes().ct_eq(b.as_bytes()).unwrap_u8() == 1
}

fn valid_username(name: &str) -> bool {
    if name.is_empty() || name.len() > USERNAME_MAX {
        return false;
    }
    let first = name.as_bytes()[0];
    if first.is_ascii_digit() || first == b'-' {
        return false;
    }
    name.bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

fn valid_email(email: &str) -> bool {
    let Some((local, host)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || host.is_empty() || email.len() > 254 {
        return false;
    }
    let Some((_, tld)) = host.rsplit_once('.') else {
        return false;
    };
    !tld.is_empty()
        && email
            .bytes()
            .all(|b| b.is_ascii_graphic() && b != b'"' && b != b'\'' && b != b',')
}

/// The expiry bonus: once an account is older than the threshold, each
/// full bonus period of age adds a step. A max of 0 means no cap.
pub fn expire_bonus(age: u64, threshold: u64, per_time: u64, step: u64, max: u64) -> u64 {
    if per_time == 0 || step == 0 || age < threshold {
        return 0;
    }
    let bonus = (age / per_time) * step;
    if max != 0 {
        bonus.min(max)
    } else {
        bonus
    }
}

#[async_trait]
impl ServiceHandler for UserServ {
    fn commands(&self) -> &'static [CommandSpec] {
        COMMANDS
    }

    async fn handle(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        match ctx.cmd.as_str() {
            "REGISTER" => self.cmd_register(net, svc, ctx).await,
            "ACTIVATE" => self.cmd_activate(net, svc, ctx).await,
            "LOGIN" => self.cmd_login(net, svc, ctx).await,
            "LOGOUT" => self.cmd_logout(net, svc, ctx),
            "RESETPASS" => self.cmd_resetpass(net, svc, ctx).await,
            "RESETEMAIL" => self.cmd_resetemail(net, svc, ctx).await,
            "SET" => self.cmd_set(net, svc, ctx).await,
            "SETPASS" => self.cmd_setpass(net, svc, ctx).await,
            "SETEMAIL" => self.cmd_setemail(net, svc, ctx).await,
            "INFO" => self.cmd_info(net, svc, ctx),
            "SUSPEND" => self.cmd_suspend(net, svc, ctx, true).await,
            "UNSUSPEND" => self.cmd_suspend(net, svc, ctx, false).await,
            "DROP" => self.cmd_drop(net, svc, ctx).await,
            _ => 1,
        }
    }
}

impl UserServ {
    /// Check both registration rate windows; counts the attempt.
    fn register_throttled(&self, net: &Arc<Network>, host: &str) -> bool {
        let conf = net.conf();
        let us = &conf.services.userserv;
        let now = Network::epoch();

        {
            let mut window = self.register_window.lock();
            if now > window.0 + us.register_time {
                *window = (now, 0);
            }
            window.1 += 1;
            if window.1 > us.register_amount {
                return true;
            }
        }

        let mut entry = net.hosts.entry(host.to_string()).or_default();
        if now > entry.uregister_expire {
            entry.uregister_expire = now + us.hregister_time;
            entry.uregister_count = 0;
        }
        entry.uregister_count += 1;
        entry.uregister_count > us.hregister_amount
    }

    async fn cmd_register(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let conf = net.conf();
        let us = &conf.services.userserv;

        if ctx.account.is_some() {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::AlreadyLoggedIn, &[]);
            return 1;
        }

        let name = ctx.arg(0).to_string();
        let pass = ctx.arg(1).to_string();
        let email = ctx.args.get(2).cloned();

        if !valid_username(&name) {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserInvalidUsername, &[LangArg::S(&name)]);
            return 1;
        }
        if pass.is_empty() || pass.len() > PASSWORD_MAX {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserInvalidPassword, &[]);
            return 1;
        }
        if net.registry.find_account(&name).is_some() {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserAlreadyExists, &[LangArg::S(&name)]);
            return 1;
        }

        if us.require_email || us.email_verification {
            if email.is_none() {
                svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserInvalidEmail, &[LangArg::S("(none)")]);
                return 1;
            }
        }
        if let Some(email) = &email {
            if !valid_email(email) {
                svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserInvalidEmail, &[LangArg::S(email)]);
                return 1;
            }
            let domain = email.rsplit_once('@').map(|(_, d)| d).unwrap_or("");
            if net.db.accounts().email_domain_banned(domain).await.unwrap_or(false) {
                svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserEmailBannedDomain, &[LangArg::S(domain)]);
                return 1;
            }
        }

        let host = ctx.user.read().host.clone();
        if self.register_throttled(net, &host) {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserRegisterThrottled, &[]);
            return 2;
        }

        let Ok(hash) = bcrypt::hash(&pass, bcrypt::DEFAULT_COST) else {
            warn!("bcrypt failure during registration");
            return 1;
        };

        let verify = us.email_verification.then(make_token);
        let mut flags = 0u32;
        if verify.is_some() {
            flags |= US_NEVERLOGGEDIN;
        }

        let now = Network::epoch();
        let id = match net
            .db
            .accounts()
            .insert(
                &name,
                &hash,
                email.as_deref(),
                now as i64,
                i64::from(flags),
                verify.as_deref(),
                &conf.serverinfo.default_language,
            )
            .await
        {
            Ok(id) => id,
            Err(crate::db::DbError::Duplicate) => {
                svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserAlreadyExists, &[LangArg::S(&name)]);
                return 1;
            }
            Err(e) => {
                warn!(error = %e, "account insert failed");
                return 1;
            }
        };

        let account = RegAccount {
            id,
            name: name.clone(),
            pass_hash: hash,
            email: email.clone(),
            suspend: None,
            reg_time: now,
            last_time: now,
            flags,
            language: conf.serverinfo.default_language.clone(),
            verify_token: verify.clone(),
            sessions: Vec::new(),
            channels: HashSet::new(),
            nicks: HashSet::new(),
            dirty: false,
        };
        net.registry
            .accounts
            .insert(irc_to_lower(&name), Arc::new(parking_lot::RwLock::new(account)));

        if let (Some(token), Some(email)) = (&verify, &email) {
            crate::email::send(
                net,
                email,
                "Account activation",
                &format!(
                    "To activate your account, send the service:\n    ACTIVATE {} {}\n",
                    name, token
                ),
            );
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserNotActivated, &[LangArg::S(&name)]);
        } else {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserRegistered, &[LangArg::S(&name)]);
        }

        let mask = ctx.user.read().mask.clone();
        watch::send(net, watch::WATCH_USERSERV, &mask, &format!("REGISTER {}", name));
        info!(account = %name, "account registered");
        3
    }

    async fn cmd_activate(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let name = ctx.arg(0).to_string();
        let token = ctx.arg(1).to_string();

        let Some(account_ref) = net.registry.find_account(&name) else {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserNotFound, &[LangArg::S(&name)]);
            return 1;
        };

        let ok = {
            let account = account_ref.read();
            account.flags & US_NEVERLOGGEDIN != 0
                && account
                    .verify_token
                    .as_deref()
                    .is_some_and(|t| token_eq(t, &token))
        };
        if !ok {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserBadToken, &[]);
            return 1;
        }

        {
            let mut account = account_ref.write();
            account.flags &= !US_NEVERLOGGEDIN;
            account.verify_token = None;
        }
        let flags = i64::from(account_ref.read().flags);
        let _ = net.db.accounts().set_flags(&name, flags).await;
        let _ = net.db.accounts().clear_verify_token(&name).await;

        svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserActivated, &[LangArg::S(&name)]);
        1
    }

    async fn cmd_login(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        if ctx.account.is_some() {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::AlreadyLoggedIn, &[]);
            return 1;
        }

        let name = ctx.arg(0).to_string();
        let pass = ctx.arg(1).to_string();
        let conf = net.conf();
        let max_logins = conf.services.userserv.max_logins;

        let Some(account_ref) = net.registry.find_account(&name) else {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserLoginFailed, &[]);
            return 1;
        };

        // Lazily clear an expired suspension before judging it.
        let now = Network::epoch();
        if account_ref
            .read()
            .suspend
            .as_ref()
            .is_some_and(|s| s.expired(now))
        {
            lift_expired_suspend(net, &account_ref).await;
        }

        enum Refusal {
            Suspended(String),
            NotActivated,
            MaxLogins,
            None,
        }

        let (hash, display_name, refusal) = {
            let account = account_ref.read();
            let refusal = if let Some(suspend) = &account.suspend {
                Refusal::Suspended(suspend.reason.clone())
            } else if account.flags & US_NEVERLOGGEDIN != 0 {
                Refusal::NotActivated
            } else if account.sessions.len() >= max_logins as usize {
                Refusal::MaxLogins
            } else {
                Refusal::None
            };
            (account.pass_hash.clone(), account.name.clone(), refusal)
        };

        if !bcrypt::verify(&pass, &hash).unwrap_or(false) {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserLoginFailed, &[]);
            return 2;
        }

        match refusal {
            Refusal::Suspended(reason) => {
                svc.msg(
                    net,
                    &ctx.user,
                    &ctx.lang,
                    MsgId::UserSuspended,
                    &[LangArg::S(&display_name), LangArg::S(&reason)],
                );
                return 1;
            }
            Refusal::NotActivated => {
                svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserNotActivated, &[LangArg::S(&display_name)]);
                return 1;
            }
            Refusal::MaxLogins => {
                svc.msg(
                    net,
                    &ctx.user,
                    &ctx.lang,
                    MsgId::UserMaxLogins,
                    &[LangArg::N(i64::from(max_logins)), LangArg::S(&display_name)],
                );
                return 1;
            }
            Refusal::None => {}
        }

        let folded = irc_to_lower(&display_name);
        let (key, uid_token) = {
            let user = ctx.user.read();
            (
                user.key(),
                user.uid.clone().unwrap_or_else(|| user.nick.clone()),
            )
        };
        {
            let mut account = account_ref.write();
            account.sessions.push(key);
            account.touch(now);
        }
        ctx.user.write().account = Some(folded.clone());
        ctx.account = Some(folded.clone());

        // Pin the account identity to the UID network-wide.
        let source = match &net.me.sid {
            Some(sid) => sid.clone(),
            None => net.me.name.clone(),
        };
        net.send(format!(":{} ENCAP * SU {} {}", source, uid_token, display_name));

        svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserLoggedIn, &[]);
        net.hooks.call(
            net,
            HookId::UserLogin,
            &HookData::Login {
                uid: ctx.user.read().key(),
                account: folded,
            },
        );
        1
    }

    fn cmd_logout(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        if ctx.account.is_none() {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::NotLoggedIn, &[LangArg::S(&svc.nick), LangArg::S("LOGOUT")]);
            return 1;
        }
        let uid_token = {
            let user = ctx.user.read();
            user.uid.clone().unwrap_or_else(|| user.nick.clone())
        };
        net.logout_user(&ctx.user);
        ctx.account = None;

        let source = match &net.me.sid {
            Some(sid) => sid.clone(),
            None => net.me.name.clone(),
        };
        net.send(format!(":{} ENCAP * SU {}", source, uid_token));
        svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserLoggedOut, &[]);
        1
    }

    async fn cmd_resetpass(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let name = ctx.arg(0).to_string();
        let conf = net.conf();
        let reset_duration = conf.services.userserv.reset_duration;

        let Some(account_ref) = net.registry.find_account(&name) else {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserNotFound, &[LangArg::S(&name)]);
            return 1;
        };
        let (display_name, email, suspended) = {
            let account = account_ref.read();
            (account.name.clone(), account.email.clone(), account.is_suspended())
        };
        if suspended {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserSuspended, &[LangArg::S(&display_name), LangArg::S("")]);
            return 1;
        }

        let now = Network::epoch();

        if ctx.args.len() >= 3 {
            // Phase 2: RESETPASS <user> <token> <newpass>
            let token = ctx.arg(1).to_string();
            let newpass = ctx.arg(2).to_string();

            let row = net.db.accounts().get_resetpass(&display_name).await.ok().flatten();
            let valid = row
                .as_ref()
                .filter(|r| now <= r.time.max(0) as u64 + reset_duration)
                .map(|r| token_eq(&r.token, &token))
                .unwrap_or(false);
            if !valid {
                svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserBadToken, &[]);
                return 2;
            }
            if newpass.is_empty() || newpass.len() > PASSWORD_MAX {
                svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserInvalidPassword, &[]);
                return 1;
            }

            let Ok(hash) = bcrypt::hash(&newpass, bcrypt::DEFAULT_COST) else {
                return 1;
            };
            let _ = net.db.accounts().set_password(&display_name, &hash).await;
            let _ = net.db.accounts().delete_resetpass(&display_name).await;
            account_ref.write().pass_hash = hash;

            svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserResetDone, &[LangArg::S(&display_name)]);
            let mask = ctx.user.read().mask.clone();
            watch::send(net, watch::WATCH_USERSERV, &mask, &format!("RESETPASS {}", display_name));
            return 2;
        }

        // Phase 1: issue a token, unless one is still fresh.
        let Some(email) = email else {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserNoEmail, &[LangArg::S(&display_name)]);
            return 1;
        };
        if let Ok(Some(row)) = net.db.accounts().get_resetpass(&display_name).await {
            if now <= row.time.max(0) as u64 + reset_duration {
                svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserResetPending, &[]);
                return 1;
            }
        }

        let token = make_token();
        if net
            .db
            .accounts()
            .put_resetpass(&display_name, &token, now as i64)
            .await
            .is_err()
        {
            return 1;
        }
        let sent = crate::email::send(
            net,
            &email,
            "Password reset",
            &format!(
                "To reset your password, send the service:\n    RESETPASS {} {} <newpassword>\n",
                display_name, token
            ),
        );
        if sent {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserResetSent, &[]);
        } else {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::IsDisabled, &[LangArg::S(&svc.nick), LangArg::S("RESETPASS")]);
        }
        2
    }

    async fn cmd_resetemail(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let conf = net.conf();
        let reset_duration = conf.services.userserv.reset_duration;
        let now = Network::epoch();

        let sub = ctx.arg(0).to_ascii_uppercase();
        match sub.as_str() {
            "CONFIRM" => {
                // Phase 2a: verify the first token, mail one to the new
                // address.
                let Some(account) = ctx.account.clone() else {
                    svc.msg(net, &ctx.user, &ctx.lang, MsgId::NotLoggedIn, &[LangArg::S(&svc.nick), LangArg::S("RESETEMAIL")]);
                    return 1;
                };
                let token = ctx.arg(1).to_string();
                let Some(account_ref) = net.registry.find_account(&account) else {
                    return 1;
                };
                let display_name = account_ref.read().name.clone();

                let row = net.db.accounts().get_resetemail(&display_name).await.ok().flatten();
                let Some(row) = row.filter(|r| {
                    now <= r.time.max(0) as u64 + reset_duration && token_eq(&r.token, &token)
                }) else {
                    svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserBadToken, &[]);
                    return 2;
                };
                let Some(new_email) = row.email.clone() else {
                    return 1;
                };

                let second = make_token();
                let _ = net
                    .db
                    .accounts()
                    .put_resetemail(&display_name, &second, now as i64, Some(&new_email))
                    .await;
                crate::email::send(
                    net,
                    &new_email,
                    "Email change confirmation",
                    &format!(
                        "To confirm this address, send the service:\n    RESETEMAIL AUTH {}\n",
                        second
                    ),
                );
                svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserResetSent, &[]);
                2
            }
            "AUTH" => {
                // Phase 2b: commit, from a logged-in session only.
                let Some(account) = ctx.account.clone() else {
                    svc.msg(net, &ctx.user, &ctx.lang, MsgId::NotLoggedIn, &[LangArg::S(&svc.nick), LangArg::S("RESETEMAIL")]);
                    return 1;
                };
                let token = ctx.arg(1).to_string();
                let Some(account_ref) = net.registry.find_account(&account) else {
                    return 1;
                };
                let display_name = account_ref.read().name.clone();

                let row = net.db.accounts().get_resetemail(&display_name).await.ok().flatten();
                let Some(row) = row.filter(|r| {
                    now <= r.time.max(0) as u64 + reset_duration && token_eq(&r.token, &token)
                }) else {
                    svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserBadToken, &[]);
                    return 2;
                };

                let _ = net
                    .db
                    .accounts()
                    .set_email(&display_name, row.email.as_deref())
                    .await;
                let _ = net.db.accounts().delete_resetemail(&display_name).await;
                account_ref.write().email = row.email.clone();

                svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserEmailChanged, &[LangArg::S(&display_name)]);
                let mask = ctx.user.read().mask.clone();
                watch::send(net, watch::WATCH_USERSERV, &mask, &format!("RESETEMAIL {}", display_name));
                2
            }
            _ => {
                // Phase 1: RESETEMAIL <newemail>, token to the current
                // address.
                let Some(account) = ctx.account.clone() else {
                    svc.msg(net, &ctx.user, &ctx.lang, MsgId::NotLoggedIn, &[LangArg::S(&svc.nick), LangArg::S("RESETEMAIL")]);
                    return 1;
                };
                let new_email = ctx.arg(0).to_string();
                if !valid_email(&new_email) {
                    svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserInvalidEmail, &[LangArg::S(&new_email)]);
                    return 1;
                }
                let Some(account_ref) = net.registry.find_account(&account) else {
                    return 1;
                };
                let (display_name, current_email) = {
                    let account = account_ref.read();
                    (account.name.clone(), account.email.clone())
                };
                let Some(current_email) = current_email else {
                    svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserNoEmail, &[LangArg::S(&display_name)]);
                    return 1;
                };

                if let Ok(Some(row)) = net.db.accounts().get_resetemail(&display_name).await {
                    if now <= row.time.max(0) as u64 + reset_duration {
                        svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserResetPending, &[]);
                        return 1;
                    }
                }

                let token = make_token();
                let _ = net
                    .db
                    .accounts()
                    .put_resetemail(&display_name, &token, now as i64, Some(&new_email))
                    .await;
                crate::email::send(
                    net,
                    &current_email,
                    "Email change requested",
                    &format!(
                        "To continue changing your address, send the service:\n    RESETEMAIL CONFIRM {}\n",
                        token
                    ),
                );
                svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserResetSent, &[]);
                2
            }
        }
    }

    async fn cmd_set(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let account = ctx.account.clone().unwrap_or_default();
        let Some(account_ref) = net.registry.find_account(&account) else {
            return 1;
        };
        let option = ctx.arg(0).to_ascii_uppercase();
        let value = ctx.arg(1).to_string();
        let on = matches!(value.to_ascii_uppercase().as_str(), "ON" | "YES" | "1");

        let display_name = account_ref.read().name.clone();

        let flag = match option.as_str() {
            "PRIVATE" => Some(US_PRIVATE),
            "NOACCESS" => Some(US_NOACCESS),
            "NOMEMOS" => Some(US_NOMEMOS),
            "LANGUAGE" => {
                let lang = value.to_lowercase();
                account_ref.write().language = lang.clone();
                let _ = net.db.accounts().set_language(&display_name, &lang).await;
                svc.msg(net, &ctx.user, &lang, MsgId::UserQueryOption, &[LangArg::S("LANGUAGE"), LangArg::S(&lang)]);
                return 1;
            }
            _ => None,
        };

        let Some(flag) = flag else {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::NoAccess, &[LangArg::S(&svc.nick), LangArg::S(&option)]);
            return 1;
        };

        let flags = {
            let mut acc = account_ref.write();
            if on {
                acc.flags |= flag;
            } else {
                acc.flags &= !flag;
            }
            acc.flags
        };
        let _ = net.db.accounts().set_flags(&display_name, i64::from(flags)).await;
        svc.msg(
            net,
            &ctx.user,
            &ctx.lang,
            MsgId::UserQueryOption,
            &[LangArg::S(&option), LangArg::S(if on { "ON" } else { "OFF" })],
        );
        1
    }

    async fn cmd_setpass(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let account = ctx.account.clone().unwrap_or_default();
        let Some(account_ref) = net.registry.find_account(&account) else {
            return 1;
        };
        let old = ctx.arg(0).to_string();
        let new = ctx.arg(1).to_string();

        let (display_name, hash) = {
            let acc = account_ref.read();
            (acc.name.clone(), acc.pass_hash.clone())
        };
        if !bcrypt::verify(&old, &hash).unwrap_or(false) {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserInvalidPassword, &[]);
            return 2;
        }
        if new.is_empty() || new.len() > PASSWORD_MAX {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserInvalidPassword, &[]);
            return 1;
        }
        let Ok(new_hash) = bcrypt::hash(&new, bcrypt::DEFAULT_COST) else {
            return 1;
        };
        let _ = net.db.accounts().set_password(&display_name, &new_hash).await;
        account_ref.write().pass_hash = new_hash;
        svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserResetDone, &[LangArg::S(&display_name)]);
        1
    }

    async fn cmd_setemail(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let account = ctx.account.clone().unwrap_or_default();
        let Some(account_ref) = net.registry.find_account(&account) else {
            return 1;
        };
        let pass = ctx.arg(0).to_string();
        let email = ctx.arg(1).to_string();

        let (display_name, hash) = {
            let acc = account_ref.read();
            (acc.name.clone(), acc.pass_hash.clone())
        };
        if !bcrypt::verify(&pass, &hash).unwrap_or(false) {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserInvalidPassword, &[]);
            return 2;
        }
        if !valid_email(&email) {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserInvalidEmail, &[LangArg::S(&email)]);
            return 1;
        }
        let _ = net.db.accounts().set_email(&display_name, Some(&email)).await;
        account_ref.write().email = Some(email);
        svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserEmailChanged, &[LangArg::S(&display_name)]);
        1
    }

    fn cmd_info(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let target = if ctx.args.is_empty() {
            ctx.account.clone().unwrap_or_default()
        } else {
            ctx.arg(0).to_string()
        };
        let Some(account_ref) = net.registry.find_account(&target) else {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserNotFound, &[LangArg::S(&target)]);
            return 1;
        };

        let is_oper = ctx.oper.is_some();
        let is_self = ctx
            .account
            .as_deref()
            .is_some_and(|a| a == irc_to_lower(&target));

        let account = account_ref.read();
        if account.flags & US_PRIVATE != 0 && !is_oper && !is_self {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserNotFound, &[LangArg::S(&target)]);
            return 1;
        }

        svc.notice(net, &ctx.user, &format!("[{}] registered {}", account.name, format_time(account.reg_time)));
        svc.notice(net, &ctx.user, &format!("[{}] last seen {}", account.name, format_time(account.last_time)));
        if is_oper || is_self {
            if let Some(email) = &account.email {
                svc.notice(net, &ctx.user, &format!("[{}] email: {}", account.name, email));
            }
            if !account.nicks.is_empty() {
                let nicks: Vec<&str> = account.nicks.iter().map(String::as_str).collect();
                svc.notice(net, &ctx.user, &format!("[{}] nicknames: {}", account.name, nicks.join(" ")));
            }
        }
        if let Some(suspend) = &account.suspend {
            svc.notice(
                net,
                &ctx.user,
                &format!("[{}] SUSPENDED by {}: {}", account.name, suspend.by, suspend.reason),
            );
        }
        2
    }

    async fn cmd_suspend(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx, on: bool) -> u16 {
        let name = ctx.arg(0).to_string();
        let Some(account_ref) = net.registry.find_account(&name) else {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserNotFound, &[LangArg::S(&name)]);
            return 1;
        };
        let display_name = account_ref.read().name.clone();
        let oper_name = ctx.oper.as_ref().map(|o| o.name.clone()).unwrap_or_default();

        if on {
            let duration = svs_proto::parse_duration(ctx.arg(1)).unwrap_or(0);
            let reason = ctx.rest(2);
            let expires = if duration == 0 { 0 } else { Network::epoch() + duration };

            account_ref.write().suspend = Some(Suspension {
                by: oper_name.clone(),
                reason: reason.clone(),
                expires,
            });
            // Cut every live session loose.
            let sessions: Vec<String> = account_ref.read().sessions.clone();
            for key in sessions {
                if let Some(user) = net.clients.by_key(&key) {
                    net.logout_user(&user);
                }
            }
            let _ = net
                .db
                .accounts()
                .set_suspend(&display_name, Some(&oper_name), Some(&reason), expires as i64)
                .await;
            watch::send(net, watch::WATCH_USERSERV, &oper_name, &format!("SUSPEND {}: {}", display_name, reason));
        } else {
            account_ref.write().suspend = None;
            let _ = net.db.accounts().set_suspend(&display_name, None, None, 0).await;
            watch::send(net, watch::WATCH_USERSERV, &oper_name, &format!("UNSUSPEND {}", display_name));
        }
        svc.msg(net, &ctx.user, &ctx.lang, MsgId::Successful, &[LangArg::S(&ctx.cmd)]);
        1
    }

    async fn cmd_drop(&self, net: &Arc<Network>, svc: &Arc<Service>, ctx: &mut CmdCtx) -> u16 {
        let name = ctx.arg(0).to_string();
        if net.registry.find_account(&name).is_none() {
            svc.msg(net, &ctx.user, &ctx.lang, MsgId::UserNotFound, &[LangArg::S(&name)]);
            return 1;
        }
        let oper_name = ctx.oper.as_ref().map(|o| o.name.clone()).unwrap_or_default();
        drop_account(net, &name).await;
        watch::send(net, watch::WATCH_USERSERV, &oper_name, &format!("DROP {}", name));
        svc.msg(net, &ctx.user, &ctx.lang, MsgId::Successful, &[LangArg::S("DROP")]);
        1
    }
}

fn format_time(epoch: u64) -> String {
    chrono::DateTime::from_timestamp(epoch as i64, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| epoch.to_string())
}

/// Remove an account entirely: sessions, nicknames, channel access,
/// database rows. Channel-side removal promotes owners or destroys the
/// channel as the invariants demand.
pub async fn drop_account(net: &Arc<Network>, name: &str) {
    let folded = irc_to_lower(name);
    let Some((_, account_ref)) = net.registry.accounts.remove(&folded) else {
        return;
    };

    let (display_name, sessions, nicks, channels) = {
        let account = account_ref.read();
        (
            account.name.clone(),
            account.sessions.clone(),
            account.nicks.iter().cloned().collect::<Vec<_>>(),
            account.channels.iter().cloned().collect::<Vec<_>>(),
        )
    };

    for key in sessions {
        if let Some(user) = net.clients.by_key(&key) {
            user.write().account = None;
        }
    }
    for nick in nicks {
        net.registry.nicks.remove(&nick);
        let _ = net.db.accounts().delete_nick(&nick).await;
    }
    for chan in channels {
        super::chanserv::remove_access_of(net, &chan, &folded).await;
    }

    let _ = net.db.accounts().delete(&display_name).await;
    info!(account = %display_name, "account dropped");
}

// --- scheduled events ----------------------------------------------------

/// Clear a lapsed suspension: the account gets a fresh activity window
/// and the cleared state is written through, as one unit.
async fn lift_expired_suspend(net: &Arc<Network>, account_ref: &crate::state::AccountRef) {
    let now = Network::epoch();
    let name = {
        let mut account = account_ref.write();
        account.suspend = None;
        account.last_time = now;
        // Written through below; nothing left for DBSYNC to flush.
        account.dirty = false;
        account.name.clone()
    };
    let _ = net.db.accounts().set_suspend(&name, None, None, 0).await;
    let _ = net
        .db
        .accounts()
        .flush_activity(&[(name, now as i64)])
        .await;
}

/// One pass of the account expiry scan.
pub async fn run_expiry(net: &Arc<Network>) {
    let conf = net.conf();
    let us = conf.services.userserv.clone();
    let now = Network::epoch();

    let mut lifted: Vec<crate::state::AccountRef> = Vec::new();
    let mut doomed: Vec<String> = Vec::new();
    for entry in net.registry.accounts.iter() {
        let account = entry.value().read();

        if account.flags & US_NEVERLOGGEDIN != 0 {
            if us.expire_unverified_time != 0
                && account.reg_time + us.expire_unverified_time <= now
            {
                doomed.push(entry.key().clone());
            }
            continue;
        }

        if let Some(suspend) = &account.suspend {
            if suspend.expired(now) {
                lifted.push(entry.value().clone());
                continue;
            }
            if us.expire_suspended_time != 0
                && account.last_time + us.expire_suspended_time <= now
            {
                doomed.push(entry.key().clone());
            }
            continue;
        }

        if us.expire_time == 0 || !account.sessions.is_empty() {
            continue;
        }
        let bonus = expire_bonus(
            now.saturating_sub(account.reg_time),
            us.expire_bonus_regtime,
            us.expire_bonus_per_time,
            us.expire_bonus,
            us.expire_bonus_max,
        );
        if account.last_time + us.expire_time + bonus <= now {
            doomed.push(entry.key().clone());
        }
    }

    for account_ref in lifted {
        lift_expired_suspend(net, &account_ref).await;
    }

    for name in doomed {
        info!(account = %name, "account expired");
        drop_account(net, &name).await;
    }
}

fn e_expire(net: Arc<Network>) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        run_expiry(&net).await;
    })
}

fn e_expire_resets(net: Arc<Network>) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        let reset_duration = net.conf().services.userserv.reset_duration;
        let cutoff = Network::epoch().saturating_sub(reset_duration);
        match net.db.accounts().expire_resets(cutoff as i64).await {
            Ok(n) if n > 0 => info!(removed = n, "expired reset tokens reaped"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "reset token sweep failed"),
        }
    })
}

/// Flush dirty last-activity stamps in one transaction, with the
/// bounded retry the writeback contract allows.
pub async fn flush_dirty(net: &Arc<Network>) {
    let mut updates: Vec<(String, i64)> = Vec::new();
    for entry in net.registry.accounts.iter() {
        let mut account = entry.value().write();
        if account.dirty {
            account.dirty = false;
            updates.push((account.name.clone(), account.last_time as i64));
        }
    }

    let result = net
        .db
        .with_retry(|pool| {
            let updates = updates.clone();
            async move {
                crate::db::AccountRepository::new(&pool)
                    .flush_activity(&updates)
                    .await
            }
        })
        .await;
    if let Err(e) = result {
        warn!(error = %e, "account activity flush failed");
    }
}

// --- mailbox handlers ----------------------------------------------------

/// `REGISTER <user> <bcrypt-hash> [email]` from an external producer.
fn dbh_register(net: &Arc<Network>, row: &SyncRow, writes: &mut ScheduledWrites) -> bool {
    let fields: Vec<&str> = row.data.split_whitespace().collect();
    if fields.len() < 2 {
        return true;
    }
    let (name, hash) = (fields[0], fields[1]);
    let email = fields.get(2).map(|s| s.to_string());

    if !valid_username(name) || net.registry.find_account(name).is_some() {
        return true;
    }

    let now = Network::epoch();
    let conf = net.conf();
    let account = RegAccount {
        id: 0,
        name: name.to_string(),
        pass_hash: hash.to_string(),
        email: email.clone(),
        suspend: None,
        reg_time: now,
        last_time: now,
        flags: 0,
        language: conf.serverinfo.default_language.clone(),
        verify_token: None,
        sessions: Vec::new(),
        channels: HashSet::new(),
        nicks: HashSet::new(),
        dirty: false,
    };
    net.registry
        .accounts
        .insert(irc_to_lower(name), Arc::new(parking_lot::RwLock::new(account)));

    writes.push(
        "INSERT INTO users (username, password, email, reg_time, last_time, flags, language) \
         VALUES (?, ?, ?, ?, ?, 0, ?)",
        vec![
            name.to_string(),
            hash.to_string(),
            email.unwrap_or_default(),
            now.to_string(),
            now.to_string(),
            conf.serverinfo.default_language.clone(),
        ],
    );
    info!(account = %name, "account registered via mailbox");
    true
}

/// `SETPASS <user> <bcrypt-hash>`.
fn dbh_setpass(net: &Arc<Network>, row: &SyncRow, writes: &mut ScheduledWrites) -> bool {
    let fields: Vec<&str> = row.data.split_whitespace().collect();
    if fields.len() != 2 {
        return true;
    }
    let Some(account_ref) = net.registry.find_account(fields[0]) else {
        return true;
    };
    let display_name = {
        let mut account = account_ref.write();
        account.pass_hash = fields[1].to_string();
        account.name.clone()
    };
    writes.push(
        "UPDATE users SET password = ? WHERE username = ?",
        vec![fields[1].to_string(), display_name],
    );
    true
}

/// `SETEMAIL <user> <email>`.
fn dbh_setemail(net: &Arc<Network>, row: &SyncRow, writes: &mut ScheduledWrites) -> bool {
    let fields: Vec<&str> = row.data.split_whitespace().collect();
    if fields.len() != 2 || !valid_email(fields[1]) {
        return true;
    }
    let Some(account_ref) = net.registry.find_account(fields[0]) else {
        return true;
    };
    let display_name = {
        let mut account = account_ref.write();
        account.email = Some(fields[1].to_string());
        account.name.clone()
    };
    writes.push(
        "UPDATE users SET email = ? WHERE username = ?",
        vec![fields[1].to_string(), display_name],
    );
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_validation() {
        assert!(valid_username("alice"));
        assert!(valid_username("a_lice-2"));
        assert!(!valid_username("2alice"));
        assert!(!valid_username("-alice"));
        assert!(!valid_username("al ice"));
        assert!(!valid_username(""));
        assert!(!valid_username(&"a".repeat(USERNAME_MAX + 1)));
    }

    #[test]
    fn email_validation() {
        assert!(valid_email("alice@example.org"));
        assert!(!valid_email("alice"));
        assert!(!valid_email("@example.org"));
        assert!(!valid_email("alice@"));
        assert!(!valid_email("alice@example"));
        assert!(!valid_email("al ice@example.org"));
    }

    #[test]
    fn bonus_gated_and_capped() {
        // Below the age threshold: nothing.
        assert_eq!(expire_bonus(10, 100, 30, 5, 50), 0);
        // Above: (age / per) * step.
        assert_eq!(expire_bonus(120, 100, 30, 5, 50), 20);
        // Cap applies.
        assert_eq!(expire_bonus(100_000, 100, 30, 5, 50), 50);
        // A cap of 0 means uncapped, not zero.
        assert_eq!(expire_bonus(300, 100, 30, 5, 0), 50);
        // Disabled knobs mean zero.
        assert_eq!(expire_bonus(1000, 0, 0, 5, 50), 0);
    }

    #[test]
    fn token_compare_is_exact() {
        let token = make_token();
        assert_eq!(token.len(), 12);
        assert!(token_eq(&token, &token.clone()));
        assert!(!token_eq(&token, "wrong-length"));
        assert!(!token_eq("abcdefghijkl", "abcdefghijkm"));
    }
}
