//! Channel access engine: registration, owner lifecycle, ban
//! enforcement against access holders, and the bants UNBAN cache.

mod common;

use common::TestNet;
use svsd::state::LEVEL_OWNER;

/// Register an account, log its user in, and return nothing. The user
/// must already be introduced.
async fn register_login(t: &TestNet, uid: &str, account: &str) {
    t.privmsg(uid, "USERSERV", &format!("REGISTER {} hunter2", account)).await;
    t.privmsg(uid, "USERSERV", &format!("LOGIN {} hunter2", account)).await;
}

/// Introduce alice, register+login, op her into `chan` and register it.
async fn registered_channel(t: &TestNet, chan: &str) {
    t.introduce("Alice", "alice", "a.host", "10.0.0.2", "1ABAAAAAA").await;
    register_login(t, "1ABAAAAAA", "alice").await;
    t.feed(&format!(":1AB SJOIN 1000 {} +nt :@1ABAAAAAA", chan)).await;
    t.privmsg("1ABAAAAAA", "CHANSERV", &format!("REGISTER {}", chan)).await;
}

#[tokio::test]
async fn register_requires_ops_and_creates_owner() {
    let mut t = TestNet::build("").await;
    t.link().await;
    t.introduce("Alice", "alice", "a.host", "10.0.0.2", "1ABAAAAAA").await;
    register_login(&t, "1ABAAAAAA", "alice").await;

    // Not opped: refused.
    t.feed(":1AB SJOIN 1000 #no +nt :1ABAAAAAA").await;
    t.drain();
    t.privmsg("1ABAAAAAA", "CHANSERV", "REGISTER #no").await;
    assert!(t.sent("must be opped"));
    assert!(t.net.registry.find_channel("#no").is_none());

    // Opped: owner access at 200.
    t.feed(":1AB SJOIN 1000 #yes +nt :@1ABAAAAAA").await;
    t.privmsg("1ABAAAAAA", "CHANSERV", "REGISTER #yes").await;
    let reg = t.net.registry.find_channel("#yes").unwrap();
    let reg = reg.read();
    assert_eq!(reg.members["alice"].level, LEVEL_OWNER);
    assert_eq!(
        reg.members.values().filter(|m| m.level == LEVEL_OWNER).count(),
        1
    );
}

#[tokio::test]
async fn delowner_on_sole_owner_destroys_the_channel() {
    let mut t = TestNet::build("").await;
    t.link().await;
    registered_channel(&t, "#solo").await;
    t.drain();

    t.privmsg("1ABAAAAAA", "CHANSERV", "DELOWNER #solo").await;
    assert!(t.net.registry.find_channel("#solo").is_none());
    // The account no longer references the channel.
    let account = t.net.registry.find_account("alice").unwrap();
    assert!(account.read().channels.is_empty());
}

#[tokio::test]
async fn delowner_with_members_promotes_the_next_best() {
    let t = TestNet::build("").await;
    t.link().await;
    registered_channel(&t, "#heir").await;

    t.introduce("Bob", "bob", "b.host", "10.0.0.3", "1ABAAAAAB").await;
    register_login(&t, "1ABAAAAAB", "bob").await;
    t.privmsg("1ABAAAAAA", "CHANSERV", "ADDUSER #heir bob 150").await;

    t.privmsg("1ABAAAAAA", "CHANSERV", "DELOWNER #heir").await;

    let reg = t.net.registry.find_channel("#heir").unwrap();
    let reg = reg.read();
    assert_eq!(reg.members["bob"].level, LEVEL_OWNER);
    assert!(!reg.members.contains_key("alice"));
}

#[tokio::test]
async fn ban_is_inert_against_sufficient_access() {
    let mut t = TestNet::build("").await;
    t.link().await;
    registered_channel(&t, "#a").await;

    t.introduce("Bob", "bob", "evil.example", "10.0.0.3", "1ABAAAAAB").await;
    register_login(&t, "1ABAAAAAB", "bob").await;
    t.privmsg("1ABAAAAAA", "CHANSERV", "ADDUSER #a bob 100").await;
    t.privmsg("1ABAAAAAA", "CHANSERV", "ADDBAN #a *!*@evil.example 50 stay out").await;
    t.drain();

    // Bob outranks the ban: no kick.
    t.feed(":1AB SJOIN 1000 #a + :1ABAAAAAB").await;
    assert!(t.drain_matching("KICK #a").is_empty());
    {
        let chan = t.net.channels.find("#a").unwrap();
        assert!(chan.read().members.contains_key("1ABAAAAAB"));
    }

    // Suspended, his access counts for nothing and the ban applies.
    t.feed(":1ABAAAAAB PART #a").await;
    t.privmsg("1ABAAAAAA", "CHANSERV", "SUSPEND #a bob").await;
    t.drain();
    t.feed(":1AB SJOIN 1000 #a + :1ABAAAAAB").await;

    let lines = t.drain();
    assert!(
        lines.iter().any(|l| l.contains("KICK #a 1ABAAAAAB")),
        "expected kick, got {:?}",
        lines
    );
    assert!(lines.iter().any(|l| l.contains("+b") && l.contains("*!*@evil.example")));
    let chan = t.net.channels.find("#a").unwrap();
    assert!(!chan.read().members.contains_key("1ABAAAAAB"));
}

#[tokio::test]
async fn unban_allowed_after_own_level_ban_refused_after_higher() {
    let mut t = TestNet::build("").await;
    t.link().await;
    registered_channel(&t, "#b").await;

    // carol: level 50, host matching the ban she sets.
    t.introduce("Carol", "carol", "spam.example", "10.0.0.4", "1ABAAAAAC").await;
    register_login(&t, "1ABAAAAAC", "carol").await;
    t.privmsg("1ABAAAAAA", "CHANSERV", "ADDUSER #b carol 50").await;
    t.feed(":1AB SJOIN 1000 #b + :1ABAAAAAC").await;

    t.privmsg("1ABAAAAAC", "CHANSERV", "ADDBAN #b *!*@spam.example 40 no spam").await;
    t.drain();

    // A strangers joins into the ban, putting the mask on the live list.
    t.introduce("Spammer", "x", "spam.example", "10.0.0.5", "1ABAAAAAD").await;
    t.feed(":1AB SJOIN 1000 #b + :1ABAAAAAD").await;
    let lines = t.drain();
    assert!(lines.iter().any(|l| l.contains("KICK #b 1ABAAAAAD")));

    // Carol's cache is unset: the self-unban goes through.
    t.privmsg("1ABAAAAAC", "CHANSERV", "UNBAN #b").await;
    let lines = t.drain();
    assert!(
        lines.iter().any(|l| l.contains("-b") && l.contains("*!*@spam.example")),
        "expected unban, got {:?}",
        lines
    );

    // erin: level 50; dave at 100 bans her level-80. The ADDBAN caches
    // her bants, so her UNBAN is refused.
    t.introduce("Erin", "erin", "bad.example", "10.0.0.6", "1ABAAAAAE").await;
    register_login(&t, "1ABAAAAAE", "erin").await;
    t.introduce("Dave", "dave", "d.host", "10.0.0.7", "1ABAAAAAF").await;
    register_login(&t, "1ABAAAAAF", "dave").await;
    t.privmsg("1ABAAAAAA", "CHANSERV", "ADDUSER #b erin 50").await;
    t.privmsg("1ABAAAAAA", "CHANSERV", "ADDUSER #b dave 100").await;
    t.feed(":1AB SJOIN 1000 #b + :1ABAAAAAE").await;

    t.privmsg("1ABAAAAAF", "CHANSERV", "ADDBAN #b *!*@bad.example 80 keep out").await;
    let lines = t.drain();
    assert!(lines.iter().any(|l| l.contains("KICK #b 1ABAAAAAE")));

    t.privmsg("1ABAAAAAE", "CHANSERV", "UNBAN #b").await;
    assert!(t.sent("at or above your level"));

    // A DELBAN bumps bants and the cache goes stale.
    t.privmsg("1ABAAAAAF", "CHANSERV", "DELBAN #b *!*@bad.example").await;
    t.drain();
    t.privmsg("1ABAAAAAE", "CHANSERV", "UNBAN #b").await;
    let lines = t.drain();
    assert!(
        !lines.iter().any(|l| l.contains("at or above your level")),
        "unban should no longer be cache-refused: {:?}",
        lines
    );
}

#[tokio::test]
async fn noops_strips_wire_granted_ops() {
    let mut t = TestNet::build("").await;
    t.link().await;
    registered_channel(&t, "#no-ops").await;

    t.privmsg("1ABAAAAAA", "CHANSERV", "SET #no-ops NOOPS ON").await;
    t.introduce("Bob", "bob", "b.host", "10.0.0.3", "1ABAAAAAB").await;
    t.drain();

    // Joining opped gets the op stripped.
    t.feed(":1AB SJOIN 1000 #no-ops + :@1ABAAAAAB").await;
    let lines = t.drain();
    assert!(
        lines.iter().any(|l| l.contains("-o") && l.contains("1ABAAAAAB")),
        "expected deop, got {:?}",
        lines
    );
    let chan = t.net.channels.find("#no-ops").unwrap();
    assert!(!chan.read().members["1ABAAAAAB"].is_opped());

    // A wire MODE +o is reverted too.
    t.feed(":1ABAAAAAB TMODE 1000 #no-ops +o 1ABAAAAAB").await;
    let lines = t.drain();
    assert!(lines.iter().any(|l| l.contains("-o") && l.contains("1ABAAAAAB")));
}

#[tokio::test]
async fn enforced_modes_are_reasserted() {
    let mut t = TestNet::build("").await;
    t.link().await;
    registered_channel(&t, "#modes").await;

    t.privmsg("1ABAAAAAA", "CHANSERV", "SET #modes ENFORCEMODES +nt").await;
    t.drain();

    // Someone drops +t on the wire; the delta comes straight back.
    t.feed(":1ABAAAAAA TMODE 1000 #modes -t").await;
    let lines = t.drain();
    assert!(
        lines.iter().any(|l| l.contains("+t")),
        "expected re-assertion, got {:?}",
        lines
    );
    let chan = t.net.channels.find("#modes").unwrap();
    assert_eq!(chan.read().modes.to_string(), "+nt");
}

#[tokio::test]
async fn stored_topic_is_enforced_on_change() {
    let mut t = TestNet::build("[services.chanserv]\nenforcetopic_frequency = 0\n").await;
    t.link().await;
    registered_channel(&t, "#topic").await;

    t.privmsg("1ABAAAAAA", "CHANSERV", "SET #topic AUTOJOIN ON").await;
    // Autojoin happens on the next join; trigger one.
    t.introduce("Bob", "bob", "b.host", "10.0.0.3", "1ABAAAAAB").await;
    t.feed(":1AB SJOIN 1000 #topic + :1ABAAAAAB").await;
    t.privmsg("1ABAAAAAA", "CHANSERV", "SET #topic TOPIC welcome home").await;
    t.drain();

    t.feed(":1ABAAAAAB TOPIC #topic :graffiti").await;
    let lines = t.drain();
    assert!(
        lines.iter().any(|l| l.contains("TOPIC #topic :welcome home")),
        "expected topic re-assertion, got {:?}",
        lines
    );
}

#[tokio::test]
async fn takeover_rewinds_ts_and_rejoins() {
    let mut t = TestNet::build("").await;
    t.link().await;
    registered_channel(&t, "#seized").await;

    t.introduce("Op", "op", "staff.example", "10.0.0.10", "1ABAAAAAI").await;
    t.privmsg("1ABAAAAAI", "OPERSERV", "OLOGIN oper1 secret").await;
    t.drain();

    t.privmsg("1ABAAAAAI", "OPERSERV", "TAKEOVER #seized").await;
    let lines = t.drain();
    assert!(
        lines.iter().any(|l| l.contains("SJOIN 999 #seized")),
        "expected lower-TS SJOIN, got {:?}",
        lines
    );
    let reg = t.net.registry.find_channel("#seized").unwrap();
    assert_eq!(reg.read().ts, 999);
}
