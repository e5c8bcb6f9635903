//! Network ban engine: oper login, kline emission, regex auto-klines
//! and SYNC replay.

mod common;

use common::TestNet;

async fn opered(t: &TestNet) {
    t.introduce("Op", "op", "staff.example", "10.0.0.10", "1ABAAAAAI").await;
    t.privmsg("1ABAAAAAI", "BANSERV", "OLOGIN oper1 secret").await;
}

#[tokio::test]
async fn ologin_attaches_an_oper_session() {
    let mut t = TestNet::build("").await;
    t.link().await;
    t.introduce("Op", "op", "staff.example", "10.0.0.10", "1ABAAAAAI").await;
    t.drain();

    t.privmsg("1ABAAAAAI", "BANSERV", "OLOGIN oper1 wrongpass").await;
    assert!(t.sent("Oper login failed"));

    t.privmsg("1ABAAAAAI", "BANSERV", "OLOGIN oper1 secret").await;
    assert!(t.sent("Oper login successful"));
    let user = t.net.clients.find_user("1ABAAAAAI").unwrap();
    assert!(user.read().oper.is_some());

    t.privmsg("1ABAAAAAI", "BANSERV", "OLOGOUT").await;
    let user = t.net.clients.find_user("1ABAAAAAI").unwrap();
    assert!(user.read().oper.is_none());
}

#[tokio::test]
async fn kline_is_broadcast_and_stored() {
    let mut t = TestNet::build("").await;
    t.link().await;
    opered(&t).await;
    t.drain();

    t.privmsg("1ABAAAAAI", "BANSERV", "KLINE 60 spam@evil.example get out").await;
    let lines = t.drain();
    assert!(
        lines
            .iter()
            .any(|l| l.contains("ENCAP * KLINE 3600 spam evil.example :get out")),
        "expected kline broadcast, got {:?}",
        lines
    );
    assert!(t.net.operbans.contains_key("K:spam@evil.example"));

    // FINDKLINE sees it.
    t.privmsg("1ABAAAAAI", "BANSERV", "FINDKLINE spam@*").await;
    assert!(t.sent("spam@evil.example"));

    // UNKLINE flips the row to a removal marker and broadcasts.
    t.privmsg("1ABAAAAAI", "BANSERV", "UNKLINE spam@evil.example").await;
    let lines = t.drain();
    assert!(lines.iter().any(|l| l.contains("ENCAP * UNKLINE spam evil.example")));
    let marker = t.net.operbans.get("K:spam@evil.example").unwrap();
    assert!(marker.value().remove);
}

#[tokio::test]
async fn regex_ban_shape_is_validated() {
    let mut t = TestNet::build("").await;
    t.link().await;
    opered(&t).await;
    t.drain();

    t.privmsg("1ABAAAAAI", "BANSERV", "ADDREGEXP .*!spam@.* junk").await;
    assert!(t.sent("is invalid"));
    assert!(t.net.regex_bans.read().is_empty());
}

#[tokio::test]
async fn regex_ban_auto_klines_matching_new_clients() {
    let mut t = TestNet::build("[services.banserv]\nregexp_time = 3600\n").await;
    t.link().await;
    opered(&t).await;
    t.drain();

    t.privmsg("1ABAAAAAI", "BANSERV", "ADDREGEXP ^.*!spam@.*#.*$ spam").await;
    assert_eq!(t.net.regex_bans.read().len(), 1);
    t.drain();

    // A matching client draws a kline of its host at its server.
    t.feed(":1AB UID Bobby 1 2000 +i spam bad.host 10.0.0.9 1ABAAAAAB :some gecos").await;
    let lines = t.drain();
    assert!(
        lines
            .iter()
            .any(|l| l.contains("ENCAP irc.hub.test KLINE 3600 * bad.host :spam")),
        "expected auto-kline, got {:?}",
        lines
    );

    // A non-matching client does not.
    t.feed(":1AB UID Clean 1 2000 +i clean ok.host 10.0.0.8 1ABAAAAAC :some gecos").await;
    assert!(t.drain_matching("KLINE").is_empty());
}

#[tokio::test]
async fn sync_replays_bans_to_a_target() {
    let mut t = TestNet::build("").await;
    t.link().await;
    opered(&t).await;

    t.privmsg("1ABAAAAAI", "BANSERV", "KLINE 60 a@tmp.example temp one").await;
    t.privmsg("1ABAAAAAI", "BANSERV", "XLINE 60 badgecos* gecos ban").await;
    t.drain();

    t.privmsg("1ABAAAAAI", "BANSERV", "SYNC irc.hub.test").await;
    let lines = t.drain();
    assert!(lines.iter().any(|l| l.contains("ENCAP irc.hub.test KLINE") && l.contains("tmp.example")));
    assert!(lines.iter().any(|l| l.contains("ENCAP irc.hub.test XLINE") && l.contains("badgecos*")));

    // Unknown targets are refused.
    t.privmsg("1ABAAAAAI", "BANSERV", "SYNC nowhere.example").await;
    assert!(t.sent("No such ban"));
}

#[tokio::test]
async fn permanent_bans_need_the_privilege() {
    let mut t = TestNet::build(
        r#"
[[operator]]
name = "junior"
password = "secret2"
encrypted = false
flags = ["kline"]
"#,
    )
    .await;
    t.link().await;
    t.introduce("Jr", "jr", "staff.example", "10.0.0.11", "1ABAAAAAJ").await;
    t.privmsg("1ABAAAAAJ", "BANSERV", "OLOGIN junior secret2").await;
    t.drain();

    // No duration means permanent, which junior may not set.
    t.privmsg("1ABAAAAAJ", "BANSERV", "KLINE noperm@evil.example bad").await;
    assert!(t.sent("permanent"));
    assert!(!t.net.operbans.contains_key("K:noperm@evil.example"));

    // A temporary one is fine.
    t.privmsg("1ABAAAAAJ", "BANSERV", "KLINE 60 ok@evil.example bad").await;
    assert!(t.net.operbans.contains_key("K:ok@evil.example"));
}
