//! Link engine state reconstruction: SJOIN TS rules, BMASK, nick
//! collisions, SQUIT recursion and the membership symmetry invariant.

mod common;

use common::TestNet;
use svsd::link::ts6::{self, LinkFault};
use svsd::state::CHFL_OPPED;

#[tokio::test]
async fn sjoin_lower_ts_wipes_prefixes_and_replaces_modes() {
    let mut t = TestNet::build("").await;
    t.link().await;
    t.drain();

    t.introduce("Old", "o", "old.host", "10.0.0.1", "1ABAAAAAZ").await;
    t.feed(":1AB SJOIN 1000 #x +nt :@1ABAAAAAZ").await;

    {
        let chan = t.net.channels.find("#x").unwrap();
        let chan = chan.read();
        assert_eq!(chan.ts, 1000);
        assert!(chan.members["1ABAAAAAZ"].is_opped());
    }

    t.introduce("Alice", "a", "a.host", "10.0.0.2", "1ABAAAAAA").await;
    t.introduce("Bob", "b", "b.host", "10.0.0.3", "1ABAAAAAB").await;
    t.feed(":1AB SJOIN 500 #x +mnt :@1ABAAAAAA +1ABAAAAAB").await;

    let chan = t.net.channels.find("#x").unwrap();
    let chan = chan.read();
    assert_eq!(chan.ts, 500);
    assert_eq!(chan.modes.to_string(), "+mnt");
    assert!(chan.members["1ABAAAAAA"].is_opped());
    assert!(chan.members["1ABAAAAAB"].is_voiced());
    // The pre-rewind member lost all status.
    assert_eq!(chan.members["1ABAAAAAZ"].flags(), 0);
}

#[tokio::test]
async fn sjoin_higher_ts_drops_incoming_prefixes() {
    let t = TestNet::build("").await;
    t.link().await;

    t.introduce("Alice", "a", "a.host", "10.0.0.2", "1ABAAAAAA").await;
    t.introduce("Bob", "b", "b.host", "10.0.0.3", "1ABAAAAAB").await;
    t.feed(":1AB SJOIN 500 #y +nt :@1ABAAAAAA").await;
    t.feed(":1AB SJOIN 900 #y +s :@1ABAAAAAB").await;

    let chan = t.net.channels.find("#y").unwrap();
    let chan = chan.read();
    assert_eq!(chan.ts, 500);
    // Our modes survive, the late joiner arrives unprefixed.
    assert_eq!(chan.modes.to_string(), "+nt");
    assert!(chan.members["1ABAAAAAA"].is_opped());
    assert_eq!(chan.members["1ABAAAAAB"].flags(), 0);
}

#[tokio::test]
async fn sjoin_equal_ts_merges_modes_and_keeps_prefixes() {
    let t = TestNet::build("").await;
    t.link().await;

    t.introduce("Alice", "a", "a.host", "10.0.0.2", "1ABAAAAAA").await;
    t.feed(":1AB SJOIN 700 #z +nt :@1ABAAAAAA").await;
    // Same TS from the other side of a split: union of modes, the
    // already-present prefix wins.
    t.feed(":1AB SJOIN 700 #z +mi :1ABAAAAAA").await;

    let chan = t.net.channels.find("#z").unwrap();
    let chan = chan.read();
    assert_eq!(chan.ts, 700);
    assert_eq!(chan.modes.to_string(), "+imnt");
    assert!(chan.members["1ABAAAAAA"].is_opped());
}

#[tokio::test]
async fn bmask_respects_ts_rule() {
    let t = TestNet::build("").await;
    t.link().await;

    t.introduce("Alice", "a", "a.host", "10.0.0.2", "1ABAAAAAA").await;
    t.feed(":1AB SJOIN 700 #b +nt :@1ABAAAAAA").await;

    t.feed(":1AB BMASK 700 #b b :*!*@spam.example *!*@junk.example").await;
    t.feed(":1AB BMASK 900 #b b :*!*@late.example").await;
    t.feed(":1AB BMASK 700 #b e :*!*@friend.example").await;

    let chan = t.net.channels.find("#b").unwrap();
    let chan = chan.read();
    assert_eq!(chan.bans.len(), 2);
    assert_eq!(chan.excepts.len(), 1);
    assert!(!chan.bans.iter().any(|m| m.contains("late")));
}

#[tokio::test]
async fn membership_record_is_shared_between_both_sides() {
    let t = TestNet::build("").await;
    t.link().await;

    t.introduce("Alice", "a", "a.host", "10.0.0.2", "1ABAAAAAA").await;
    t.feed(":1AB SJOIN 700 #sym +nt :@1ABAAAAAA").await;

    let chan = t.net.channels.find("#sym").unwrap();
    let user = t.net.clients.find_user("1ABAAAAAA").unwrap();

    let from_chan = chan.read().members["1ABAAAAAA"].clone();
    let from_user = user.read().channels["#sym"].clone();
    assert!(std::sync::Arc::ptr_eq(&from_chan, &from_user));
    assert_eq!(from_chan.channel, "#sym");
    assert_eq!(from_chan.user_key, "1ABAAAAAA");
}

#[tokio::test]
async fn nick_collision_lower_ts_wins() {
    let t = TestNet::build("").await;
    t.link().await;

    t.feed(":1AB UID Dup 1 2000 +i u1 h1 10.0.0.1 1ABAAAAAA :one").await;
    // Higher TS loses: introduction dropped.
    t.feed(":1AB UID Dup 1 3000 +i u2 h2 10.0.0.2 1ABAAAAAB :two").await;
    assert!(t.net.clients.find_user("1ABAAAAAA").is_some());
    assert!(t.net.clients.find_user("1ABAAAAAB").is_none());

    // Strictly lower TS wins: existing user exits.
    t.feed(":1AB UID Dup 1 1000 +i u3 h3 10.0.0.3 1ABAAAAAC :three").await;
    assert!(t.net.clients.find_user("1ABAAAAAA").is_none());
    let winner = t.net.clients.find_user("Dup").unwrap();
    assert_eq!(winner.read().uid.as_deref(), Some("1ABAAAAAC"));
}

#[tokio::test]
async fn collision_with_service_at_ts_one_is_fatal() {
    let t = TestNet::build("").await;
    t.link().await;

    let result = ts6::dispatch(
        &t.net,
        ":1AB UID CHANSERV 1 1 +i u h 10.0.0.1 1ABAAAAAD :impostor",
    )
    .await;
    assert!(matches!(result, Err(LinkFault::Fatal(_))));
}

#[tokio::test]
async fn collision_with_service_above_ts_one_draws_a_kill() {
    let mut t = TestNet::build("").await;
    t.link().await;
    t.drain();

    t.feed(":1AB UID CHANSERV 1 5000 +i u h 10.0.0.1 1ABAAAAAD :impostor").await;
    let kills = t.drain_matching("KILL 1ABAAAAAD");
    assert_eq!(kills.len(), 1);
    assert!(t.net.clients.find_user("1ABAAAAAD").is_none());
}

#[tokio::test]
async fn squit_removes_servers_and_users_recursively() {
    let t = TestNet::build("").await;
    t.link().await;

    t.feed(":1AB SID leaf.test.net 2 2AB :leaf").await;
    t.feed(":2AB UID Remote 2 1000 +i r r.host 10.0.0.9 2ABAAAAAA :remote").await;
    t.feed(":2AB SID deeper.test.net 3 3AB :deeper").await;
    assert!(t.net.clients.find_server("leaf.test.net").is_some());
    assert!(t.net.clients.find_user("2ABAAAAAA").is_some());

    t.feed("SQUIT leaf.test.net :split").await;
    assert!(t.net.clients.find_server("leaf.test.net").is_none());
    assert!(t.net.clients.find_server("deeper.test.net").is_none());
    assert!(t.net.clients.find_user("2ABAAAAAA").is_none());
}

#[tokio::test]
async fn part_and_quit_clean_both_sides() {
    let t = TestNet::build("").await;
    t.link().await;

    t.introduce("Alice", "a", "a.host", "10.0.0.2", "1ABAAAAAA").await;
    t.introduce("Bob", "b", "b.host", "10.0.0.3", "1ABAAAAAB").await;
    t.feed(":1AB SJOIN 700 #pq +nt :@1ABAAAAAA 1ABAAAAAB").await;

    t.feed(":1ABAAAAAA PART #pq").await;
    {
        let chan = t.net.channels.find("#pq").unwrap();
        assert!(!chan.read().members.contains_key("1ABAAAAAA"));
        let user = t.net.clients.find_user("1ABAAAAAA").unwrap();
        assert!(user.read().channels.is_empty());
    }

    t.feed(":1ABAAAAAB QUIT :gone").await;
    assert!(t.net.clients.find_user("1ABAAAAAB").is_none());
    // Last member gone: channel destroyed.
    assert!(t.net.channels.find("#pq").is_none());
}

#[tokio::test]
async fn mode_changes_update_member_flags() {
    let t = TestNet::build("").await;
    t.link().await;

    t.introduce("Alice", "a", "a.host", "10.0.0.2", "1ABAAAAAA").await;
    t.feed(":1AB SJOIN 700 #m +nt :@1ABAAAAAA").await;

    t.feed(":1ABAAAAAA TMODE 700 #m -o+v 1ABAAAAAA 1ABAAAAAA").await;
    {
        let chan = t.net.channels.find("#m").unwrap();
        let chan = chan.read();
        let member = &chan.members["1ABAAAAAA"];
        assert!(!member.is_opped());
        assert!(member.is_voiced());
    }

    // A TMODE with a newer TS is dropped.
    t.feed(":1ABAAAAAA TMODE 900 #m +o 1ABAAAAAA").await;
    let chan = t.net.channels.find("#m").unwrap();
    assert_eq!(chan.read().members["1ABAAAAAA"].flags() & CHFL_OPPED, 0);
}
