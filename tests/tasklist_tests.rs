//! Tasklist claim semantics: priority ordering across competing agents
//! and the claim/release law.

use ainulindale::event_bus::EventBus;
use ainulindale::plugins::tasklist::{TaskPriority, TaskStatus, TaskStore};
use std::sync::Arc;

fn store() -> TaskStore {
    TaskStore::new("board", "1,0", Arc::new(EventBus::new()))
}

#[tokio::test]
async fn test_two_agents_claim_by_priority() {
    let store = store();
    store.add("T1", None, TaskPriority::Normal).await;
    store.add("T2", None, TaskPriority::High).await;
    store.add("T3", None, TaskPriority::Critical).await;

    // Two agents claim one after the other within the same tick.
    let first = store.claim("agent-a").await.unwrap();
    let second = store.claim("agent-b").await.unwrap();
    assert_eq!(first.title, "T3");
    assert_eq!(second.title, "T2");
    assert_eq!(first.claimed_by.as_deref(), Some("agent-a"));
    assert_eq!(second.claimed_by.as_deref(), Some("agent-b"));

    // Only T1 remains pending; each claimed task has exactly one owner.
    let pending = store.list(Some(TaskStatus::Pending));
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].title, "T1");
}

#[tokio::test]
async fn test_claim_release_restores_pre_claim_state() {
    let store = store();
    store.add("keep", None, TaskPriority::Low).await;
    let before = store.list(None);

    let claimed = store.claim("agent-a").await.unwrap();
    store.release(&claimed.id).await.unwrap();

    let after = store.list(None);
    assert_eq!(before.len(), after.len());
    for (b, a) in before.iter().zip(after.iter()) {
        assert_eq!(b.id, a.id);
        assert_eq!(b.status, a.status);
        assert_eq!(b.claimed_by, a.claimed_by);
        assert_eq!(b.result, a.result);
        assert_eq!(b.error, a.error);
    }
}

#[tokio::test]
async fn test_claim_exhaustion_returns_none() {
    let store = store();
    store.add("only", None, TaskPriority::Critical).await;
    assert!(store.claim("agent-a").await.is_some());
    assert!(store.claim("agent-b").await.is_none());
    assert!(store.claim("agent-a").await.is_none());
}
