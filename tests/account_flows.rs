//! Account registry flows: registration with activation, login binding,
//! session limits, and the reset-token state machine.

mod common;

use common::TestNet;

#[tokio::test]
async fn register_activate_login_binds_account() {
    let mut t = TestNet::build("[services.userserv]\nemail_verification = true\n").await;
    t.link().await;
    t.introduce("Alice", "alice", "a.host", "10.0.0.2", "1ABAAAAAA").await;
    t.drain();

    t.privmsg("1ABAAAAAA", "USERSERV", "REGISTER alice hunter2 alice@example.org").await;
    assert!(t.sent("has not been activated"));

    // Unactivated accounts cannot log in.
    t.privmsg("1ABAAAAAA", "USERSERV", "LOGIN alice hunter2").await;
    assert!(t.sent("has not been activated"));
    assert!(t.net.clients.find_user("1ABAAAAAA").unwrap().read().account.is_none());

    // The emailed token is the one on the account record.
    let token = {
        let account = t.net.registry.find_account("alice").unwrap();
        let token = account.read().verify_token.clone();
        token.expect("activation token present")
    };

    t.privmsg("1ABAAAAAA", "USERSERV", &format!("ACTIVATE alice {}", token)).await;
    assert!(t.sent("activated"));

    t.privmsg("1ABAAAAAA", "USERSERV", "LOGIN alice hunter2").await;
    let lines = t.drain();
    assert!(
        lines.iter().any(|l| l.contains("ENCAP * SU 1ABAAAAAA alice")),
        "expected SU binding, got {:?}",
        lines
    );

    // Both sides of the session edge exist.
    let user = t.net.clients.find_user("1ABAAAAAA").unwrap();
    assert_eq!(user.read().account.as_deref(), Some("alice"));
    let account = t.net.registry.find_account("alice").unwrap();
    assert_eq!(account.read().sessions, vec!["1ABAAAAAA".to_string()]);
}

#[tokio::test]
async fn bad_activation_token_is_refused() {
    let mut t = TestNet::build("[services.userserv]\nemail_verification = true\n").await;
    t.link().await;
    t.introduce("Bob", "bob", "b.host", "10.0.0.3", "1ABAAAAAB").await;
    t.drain();

    t.privmsg("1ABAAAAAB", "USERSERV", "REGISTER bob passw0rd bob@example.org").await;
    t.privmsg("1ABAAAAAB", "USERSERV", "ACTIVATE bob WRONGTOKEN00").await;
    assert!(t.sent("Invalid token"));

    let account = t.net.registry.find_account("bob").unwrap();
    assert!(account.read().verify_token.is_some());
}

#[tokio::test]
async fn max_logins_is_enforced() {
    let mut t = TestNet::build("[services.userserv]\nmax_logins = 2\n").await;
    t.link().await;
    for (nick, uid) in [("C1", "1ABAAAAAA"), ("C2", "1ABAAAAAB"), ("C3", "1ABAAAAAC")] {
        t.introduce(nick, "c", "c.host", "10.0.0.4", uid).await;
    }
    t.drain();

    t.privmsg("1ABAAAAAA", "USERSERV", "REGISTER carol hunter2").await;
    t.privmsg("1ABAAAAAA", "USERSERV", "LOGIN carol hunter2").await;
    t.privmsg("1ABAAAAAB", "USERSERV", "LOGIN carol hunter2").await;
    t.drain();

    t.privmsg("1ABAAAAAC", "USERSERV", "LOGIN carol hunter2").await;
    assert!(t.sent("Maximum of 2 logins"));

    let account = t.net.registry.find_account("carol").unwrap();
    assert_eq!(account.read().sessions.len(), 2);
}

#[tokio::test]
async fn logout_cuts_both_sides_and_emits_su_clear() {
    let mut t = TestNet::build("").await;
    t.link().await;
    t.introduce("Dana", "dana", "d.host", "10.0.0.5", "1ABAAAAAD").await;
    t.drain();

    t.privmsg("1ABAAAAAD", "USERSERV", "REGISTER dana hunter2").await;
    t.privmsg("1ABAAAAAD", "USERSERV", "LOGIN dana hunter2").await;
    t.drain();

    t.privmsg("1ABAAAAAD", "USERSERV", "LOGOUT").await;
    let lines = t.drain();
    assert!(lines.iter().any(|l| l.ends_with("ENCAP * SU 1ABAAAAAD")));

    let account = t.net.registry.find_account("dana").unwrap();
    assert!(account.read().sessions.is_empty());
}

#[tokio::test]
async fn quit_drops_the_login_session() {
    let t = TestNet::build("").await;
    t.link().await;
    t.introduce("Erin", "erin", "e.host", "10.0.0.6", "1ABAAAAAE").await;

    t.privmsg("1ABAAAAAE", "USERSERV", "REGISTER erin hunter2").await;
    t.privmsg("1ABAAAAAE", "USERSERV", "LOGIN erin hunter2").await;
    t.feed(":1ABAAAAAE QUIT :bye").await;

    let account = t.net.registry.find_account("erin").unwrap();
    assert!(account.read().sessions.is_empty());
}

#[tokio::test]
async fn resetpass_uses_only_the_latest_token() {
    let mut t = TestNet::build("").await;
    t.link().await;
    t.introduce("Faye", "faye", "f.host", "10.0.0.7", "1ABAAAAAF").await;
    t.drain();

    t.privmsg("1ABAAAAAF", "USERSERV", "REGISTER faye hunter2 faye@example.org").await;

    // Two tokens issued back to back: only the later one is live.
    let now = chrono::Utc::now().timestamp();
    t.net.db.accounts().put_resetpass("faye", "TOKENONE0000", now).await.unwrap();
    t.net.db.accounts().put_resetpass("faye", "TOKENTWO0000", now).await.unwrap();
    t.drain();

    t.privmsg("1ABAAAAAF", "USERSERV", "RESETPASS faye TOKENONE0000 newpass").await;
    assert!(t.sent("Invalid token"));
    // The stale-token failure must leave no side effects.
    t.privmsg("1ABAAAAAF", "USERSERV", "LOGIN faye hunter2").await;
    assert!(t.sent("Login successful"));
    t.privmsg("1ABAAAAAF", "USERSERV", "LOGOUT").await;
    t.drain();

    t.privmsg("1ABAAAAAF", "USERSERV", "RESETPASS faye TOKENTWO0000 newpass").await;
    assert!(t.sent("has been reset"));

    t.privmsg("1ABAAAAAF", "USERSERV", "LOGIN faye newpass").await;
    assert!(t.sent("Login successful"));
}

#[tokio::test]
async fn repeat_reset_requests_are_refused_within_the_window() {
    let mut t = TestNet::build("").await;
    t.link().await;
    t.introduce("Gil", "gil", "g.host", "10.0.0.8", "1ABAAAAAG").await;
    t.drain();

    t.privmsg("1ABAAAAAG", "USERSERV", "REGISTER gil hunter2 gil@example.org").await;

    let now = chrono::Utc::now().timestamp();
    t.net.db.accounts().put_resetpass("gil", "FRESHTOKEN00", now).await.unwrap();
    t.drain();

    t.privmsg("1ABAAAAAG", "USERSERV", "RESETPASS gil").await;
    assert!(t.sent("already issued"));
}

#[test]
fn expiry_bonus_cap_of_zero_means_uncapped() {
    use svsd::services::userserv::expire_bonus;

    // A configured maximum of 0 disables the cap rather than the bonus.
    assert_eq!(expire_bonus(300, 100, 30, 5, 0), 50);
    assert_eq!(expire_bonus(100_000, 100, 30, 5, 0), 16_665);
    // A non-zero maximum still caps.
    assert_eq!(expire_bonus(300, 100, 30, 5, 20), 20);
    // The age threshold still gates either way.
    assert_eq!(expire_bonus(10, 100, 30, 5, 0), 0);
}

#[tokio::test]
async fn lapsed_suspension_grants_a_fresh_activity_window() {
    let t = TestNet::build("").await;
    t.link().await;
    t.introduce("Ivy", "ivy", "i.host", "10.0.0.12", "1ABAAAAAK").await;
    t.privmsg("1ABAAAAAK", "USERSERV", "REGISTER ivy hunter2").await;

    // Age the account far past every window, with a suspension that has
    // already lapsed.
    let now = svsd::state::Network::epoch();
    let stale = now - 400 * 86_400;
    {
        let account = t.net.registry.find_account("ivy").unwrap();
        let mut account = account.write();
        account.reg_time = stale;
        account.last_time = stale;
        account.suspend = Some(svsd::state::Suspension {
            by: "oper".into(),
            reason: "old trouble".into(),
            expires: now - 10,
        });
    }

    // The sweep lifts the suspension and grants a fresh window instead
    // of handing the account straight to the inactivity rule.
    svsd::services::userserv::run_expiry(&t.net).await;
    {
        let account = t
            .net
            .registry
            .find_account("ivy")
            .expect("account survives the sweep that lifts the suspension");
        let account = account.read();
        assert!(account.suspend.is_none());
        assert!(
            account.last_time >= now,
            "lifting must reset the activity window, got {}",
            account.last_time
        );
    }

    // With the fresh window the next sweep leaves it alone too.
    svsd::services::userserv::run_expiry(&t.net).await;
    assert!(t.net.registry.find_account("ivy").is_some());
}

#[tokio::test]
async fn suspension_refuses_login_until_lifted() {
    let mut t = TestNet::build("").await;
    t.link().await;
    t.introduce("Hugo", "hugo", "h.host", "10.0.0.9", "1ABAAAAAH").await;
    t.introduce("Op", "op", "staff.example", "10.0.0.10", "1ABAAAAAI").await;
    t.drain();

    t.privmsg("1ABAAAAAH", "USERSERV", "REGISTER hugo hunter2").await;

    t.privmsg("1ABAAAAAI", "USERSERV", "OLOGIN oper1 secret").await;
    t.privmsg("1ABAAAAAI", "USERSERV", "SUSPEND hugo 0 being bad").await;
    t.drain();

    t.privmsg("1ABAAAAAH", "USERSERV", "LOGIN hugo hunter2").await;
    assert!(t.sent("suspended"));

    t.privmsg("1ABAAAAAI", "USERSERV", "UNSUSPEND hugo").await;
    t.drain();
    t.privmsg("1ABAAAAAH", "USERSERV", "LOGIN hugo hunter2").await;
    assert!(t.sent("Login successful"));
}
