//! Multi-client scenarios against a shared in-memory store.

use spinsync::{
    EngineBuilder, EngineHandle, MemoryKeyStore, MemoryStore, NoOpReason, Outcome, Phase,
    SessionConfig, SessionIdentityResolver, SessionKey, DEFAULT_ROSTER, DEFAULT_SESSION_KEY,
    DEFAULT_STARTUP_TIMEOUT,
};
use spinsync_testing::{settle, wait_for, Fault, FlakyStore};
use std::collections::HashSet;
use std::sync::Arc;

fn config(roster: &[&str]) -> SessionConfig {
    SessionConfig {
        roster: roster.iter().map(|s| s.to_string()).collect(),
        ..SessionConfig::default()
    }
}

async fn client(store: &FlakyStore, key: &str, roster: &[&str]) -> EngineHandle {
    let handle = EngineBuilder::new(Arc::new(store.clone()))
        .with_config(config(roster))
        .with_session_key(SessionKey::new(key))
        .build()
        .start();
    wait_for(&handle, |p| p.phase == Phase::Ready)
        .await
        .expect("client never became ready");
    handle
}

#[tokio::test]
async fn fresh_session_draws_every_item_exactly_once() {
    let roster = ["a", "b", "c", "d", "e"];
    let store = FlakyStore::new(Arc::new(MemoryStore::new()));
    let handle = client(&store, "scenario-a", &roster).await;

    let mut seen = HashSet::new();
    for _ in 0..roster.len() {
        let outcome = handle.request_draw().await.unwrap();
        let selection = outcome.selection().expect("draw while items remain");
        assert!(seen.insert(selection.identifier.clone()), "drawn twice");
    }
    assert_eq!(seen.len(), roster.len());

    wait_for(&handle, |p| p.drawn_set.len() == roster.len())
        .await
        .unwrap();
    settle().await;
    let writes_before = store.write_count();

    assert_eq!(
        handle.request_draw().await.unwrap(),
        Outcome::NoOp(NoOpReason::NothingToDraw)
    );
    settle().await;
    assert_eq!(store.write_count(), writes_before, "no-op draw must not push");

    let p = handle.projection();
    assert_eq!(p.roster, roster);
    assert!(p.remaining().is_empty());
    handle.shutdown().await;
}

#[tokio::test]
async fn second_client_sees_draw_but_cannot_undo_it() {
    let store = FlakyStore::new(Arc::new(MemoryStore::new()));
    let first = client(&store, "scenario-b", &["a", "b", "c"]).await;
    let second = client(&store, "scenario-b", &["a", "b", "c"]).await;

    let drawn = first
        .request_draw()
        .await
        .unwrap()
        .selection()
        .cloned()
        .unwrap();

    let mirrored = wait_for(&second, |p| p.drawn_set.len() == 1).await.unwrap();
    assert_eq!(mirrored.drawn_set, vec![drawn.identifier.clone()]);
    assert_eq!(mirrored.current_selection, Some(drawn));
    assert!(!mirrored.can_undo);
    assert_eq!(
        second.request_undo().await.unwrap(),
        Outcome::NoOp(NoOpReason::NothingToUndo)
    );

    // The drawing client keeps its own undo despite the echo.
    settle().await;
    assert!(first.projection().can_undo);

    first.shutdown().await;
    second.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unresponsive_store_falls_back_to_default_roster() {
    let store = FlakyStore::new(Arc::new(MemoryStore::new()));
    store.set_read_fault(Fault::Hang);

    let handle = EngineBuilder::new(Arc::new(store.clone())).build().start();
    assert!(handle.projection().is_awaiting_remote());

    let ready = handle.wait_until_ready().await.unwrap();
    assert_eq!(ready.roster, DEFAULT_ROSTER);
    assert!(ready.drawn_set.is_empty());
    assert_eq!(ready.current_selection, None);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn hanging_subscription_falls_back_after_timeout() {
    let memory = MemoryStore::new();
    let store = FlakyStore::new(Arc::new(memory.clone()));
    store.set_subscribe_fault(Fault::Hang);

    let started = tokio::time::Instant::now();
    let handle = EngineBuilder::new(Arc::new(store.clone()))
        .with_config(config(&["a", "b"]))
        .with_session_key(SessionKey::new("no-subscription"))
        .build()
        .start();

    let ready = handle.wait_until_ready().await.unwrap();
    assert!(started.elapsed() >= DEFAULT_STARTUP_TIMEOUT);
    assert_eq!(ready.phase, Phase::Ready);
    assert_eq!(ready.roster, vec!["a", "b"]);
    assert!(ready.drawn_set.is_empty());
    // Initialization itself went through before the subscription stalled.
    assert!(memory.document(&SessionKey::new("no-subscription")).is_some());
    handle.shutdown().await;
}

#[test]
fn clients_without_a_parameter_share_the_default_key() {
    let one = SessionIdentityResolver::new(Arc::new(MemoryKeyStore::default())).resolve(None);
    let two = SessionIdentityResolver::new(Arc::new(MemoryKeyStore::default())).resolve(None);
    assert_eq!(one, two);
    assert_eq!(one.as_str(), DEFAULT_SESSION_KEY);
}

#[tokio::test]
async fn undo_and_reset_propagate() {
    let store = FlakyStore::new(Arc::new(MemoryStore::new()));
    let first = client(&store, "propagate", &["a", "b", "c"]).await;
    let second = client(&store, "propagate", &["a", "b", "c"]).await;

    first.request_draw().await.unwrap();
    first.request_draw().await.unwrap();
    wait_for(&second, |p| p.drawn_set.len() == 2).await.unwrap();

    assert_eq!(first.request_undo().await.unwrap(), Outcome::Undone);
    let undone = wait_for(&second, |p| p.drawn_set.len() == 1).await.unwrap();
    assert_eq!(undone.drawn_set, vec!["a"]);
    assert_eq!(undone.current_selection, None);
    assert_eq!(first.projection().current_selection, None);

    assert_eq!(second.request_reset().await.unwrap(), Outcome::Reset);
    let reset = wait_for(&first, |p| p.drawn_set.is_empty()).await.unwrap();
    assert_eq!(reset.current_selection, None);
    assert_eq!(reset.roster, vec!["a", "b", "c"]);
    assert!(!reset.can_undo);

    first.shutdown().await;
    second.shutdown().await;
}

#[tokio::test]
async fn late_joiner_adopts_existing_session() {
    let memory = MemoryStore::new();
    let store = FlakyStore::new(Arc::new(memory.clone()));
    let first = client(&store, "late", &["a", "b", "c"]).await;
    first.request_draw().await.unwrap();
    wait_for(&first, |p| p.revision == 1).await.unwrap();
    settle().await;
    let writes = store.write_count();

    // A joiner configured with a different roster still adopts the session.
    let joiner = client(&store, "late", &["x", "y"]).await;
    let p = joiner.projection();
    assert_eq!(p.roster, vec!["a", "b", "c"]);
    assert_eq!(p.drawn_set, vec!["a"]);
    assert_eq!(store.write_count(), writes, "joining must not rewrite the session");

    first.shutdown().await;
    joiner.shutdown().await;
}

#[tokio::test]
async fn failed_push_keeps_local_projection() {
    let memory = MemoryStore::new();
    let store = FlakyStore::new(Arc::new(memory.clone()));
    let handle = client(&store, "offline", &["a", "b"]).await;

    store.set_write_fault(Fault::Fail);
    let outcome = handle.request_draw().await.unwrap();
    assert!(outcome.selection().is_some());
    settle().await;

    assert_eq!(handle.projection().drawn_set, vec!["a"]);
    let stored = memory.document(&SessionKey::new("offline")).unwrap();
    assert!(stored.drawn_set.is_empty());
    handle.shutdown().await;
}

#[tokio::test]
async fn last_write_wins_and_foreign_push_clears_undo() {
    let memory = MemoryStore::new();
    let slow = FlakyStore::new(Arc::new(memory.clone()));
    let fast = FlakyStore::new(Arc::new(memory.clone()));
    let first = client(&slow, "race", &["a", "b", "c"]).await;
    let second = client(&fast, "race", &["a", "b", "c"]).await;

    // First client's write stays in flight while the second one draws.
    slow.pause();
    first.request_draw().await.unwrap();
    assert!(first.projection().can_undo);
    second.request_draw().await.unwrap();

    let overwritten = wait_for(&first, |p| !p.can_undo).await.unwrap();
    assert_eq!(overwritten.drawn_set, vec!["a"]);

    // The delayed write lands last and wins everywhere.
    slow.resume();
    let key = SessionKey::new("race");
    let first_id = first.client_id();
    wait_for(&second, |p| p.drawn_set == vec!["a"]).await.unwrap();
    for _ in 0..100 {
        if memory.document(&key).and_then(|d| d.writer) == Some(first_id) {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert_eq!(memory.document(&key).unwrap().writer, Some(first_id));
    assert_eq!(first.projection().drawn_set, second.projection().drawn_set);

    first.shutdown().await;
    second.shutdown().await;
}

#[tokio::test]
async fn subscription_failure_still_reaches_ready() {
    let store = FlakyStore::new(Arc::new(MemoryStore::new()));
    store.set_subscribe_fault(Fault::Fail);
    let handle = client(&store, "no-push", &["a", "b"]).await;
    assert_eq!(handle.projection().roster, vec!["a", "b"]);
    assert!(handle.request_draw().await.unwrap().selection().is_some());
    handle.shutdown().await;
}
