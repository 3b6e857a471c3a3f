mod common;

use std::time::Duration;

use chrono::Utc;
use common::*;
use leader_election::{ElectionOutcome, ElectionPhase, LockStore, MemoryLockStore};
use tokio::time::{Instant, sleep, timeout};
use tracing_test::traced_test;

fn new_leader(observer: &str, leader: &str) -> Event {
    Event::NewLeader {
        observer: observer.to_owned(),
        leader: leader.to_owned(),
    }
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_single_leader_among_contenders() {
    let shared = MemoryLockStore::new();
    let tracker = Tracker::default();
    let mut running: Vec<_> = ["a", "b", "c"]
        .into_iter()
        .map(|id| spawn(id, TestStore::sharing(&shared), &tracker))
        .collect();

    sleep(Duration::from_secs(40)).await;
    assert_eq!(running.iter().filter(|r| r.is_leader()).count(), 1);

    // hand leadership around until everyone has had it once
    while !running.is_empty() {
        let idx = running
            .iter()
            .position(|r| r.is_leader())
            .expect("someone should be leading");
        let leader = running.remove(idx);
        assert_eq!(leader.stop().await, ElectionOutcome::Cancelled);
        assert!(tracker.leader().is_none());

        sleep(RETRY + Duration::from_secs(1)).await;
        assert!(running.iter().filter(|r| r.is_leader()).count() <= 1);
        if !running.is_empty() {
            assert_eq!(running.iter().filter(|r| r.is_leader()).count(), 1);
        }
    }

    let started = tracker
        .events()
        .into_iter()
        .filter(|e| matches!(e, Event::Started(_)))
        .count();
    assert_eq!(started, 3);
    assert_eq!(stored(&shared).await.leader_transitions, 2);
    assert!(logs_contain("acquired lease"));
}

#[tokio::test(start_paused = true)]
async fn test_takeover_after_leader_is_killed() {
    let shared = MemoryLockStore::new();
    let tracker = Tracker::default();
    let mut a = spawn("a", TestStore::sharing(&shared), &tracker);
    a.wait_leading(RETRY).await;
    let mut b = spawn("b", TestStore::sharing(&shared), &tracker);
    sleep(Duration::from_secs(5)).await;
    assert!(!b.is_leader());

    // no release write, no stop callback
    a.handle.abort();
    tracker.kill("a");
    let killed = Instant::now();

    b.wait_leading(LEASE * 2).await;
    let elapsed = killed.elapsed();
    assert!(elapsed >= LEASE - RETRY, "took over too early: {elapsed:?}");
    assert!(elapsed <= LEASE + RETRY * 2, "took over too late: {elapsed:?}");

    let record = stored(&shared).await;
    assert_eq!(record.holder_identity, "b");
    assert_eq!(record.leader_transitions, 1);
    assert_eq!(tracker.count(&new_leader("b", "a")), 1);
    b.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_renewal_keeps_holder_and_counter() {
    let shared = MemoryLockStore::new();
    let tracker = Tracker::default();
    let store = TestStore::sharing(&shared);
    let mut a = spawn("a", store.clone(), &tracker);
    a.wait_leading(RETRY).await;
    let first = stored(&shared).await;

    sleep(Duration::from_secs(30)).await;
    let record = stored(&shared).await;
    assert_eq!(record.holder_identity, "a");
    assert_eq!(record.leader_transitions, 0);
    assert_eq!(record.acquire_time, first.acquire_time);
    assert!(record.renew_time >= first.renew_time);
    // one create plus a renewal every retry period
    assert!(store.writes() >= 14, "only {} writes", store.writes());
    assert_eq!(tracker.count(&Event::Started("a".into())), 1);

    a.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stale_token_does_not_step_down() {
    let shared = MemoryLockStore::new();
    let tracker = Tracker::default();
    let mut a = spawn("a", TestStore::sharing(&shared), &tracker);
    a.wait_leading(RETRY).await;

    // bump the token without changing the holder
    let current = shared.get(&key()).await.unwrap();
    shared
        .update(&key(), &current.record.renewed(LEASE, Utc::now()), &current.token)
        .await
        .unwrap();

    sleep(RENEW * 2).await;
    assert!(a.is_leader());
    assert_eq!(tracker.count(&Event::Stopped("a".into())), 0);
    assert_eq!(stored(&shared).await.holder_identity, "a");
    a.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_steps_down_when_record_is_taken() {
    let shared = MemoryLockStore::new();
    let tracker = Tracker::default();
    let mut a = spawn("a", TestStore::sharing(&shared), &tracker);
    a.wait_leading(RETRY).await;

    let current = shared.get(&key()).await.unwrap();
    let taken = current.record.taken_over_by("z", LEASE, Utc::now());
    shared.update(&key(), &taken, &current.token).await.unwrap();

    let outcome = timeout(RETRY * 2, &mut a.handle).await.unwrap().unwrap();
    assert_eq!(outcome, ElectionOutcome::LeadershipLost);
    assert_eq!(
        tracker.events(),
        vec![
            Event::Started("a".into()),
            Event::Stopped("a".into()),
            new_leader("a", "z"),
        ]
    );

    // the conflicting write never overwrote the new holder
    let record = stored(&shared).await;
    assert_eq!(record.holder_identity, "z");
    assert_eq!(record.leader_transitions, 1);

    let status = a.status.borrow().clone();
    assert_eq!(status.phase, ElectionPhase::Idle);
    assert_eq!(status.leader.as_deref(), Some("z"));
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_abdicates_at_renew_deadline_and_stops_writing() {
    let shared = MemoryLockStore::new();
    let tracker = Tracker::default();
    let store = TestStore::sharing(&shared);
    let mut a = spawn("a", store.clone(), &tracker);
    a.wait_leading(RETRY).await;
    // first renewal lands at RETRY
    sleep(RETRY + Duration::from_secs(1)).await;

    store.fail_updates(true);
    let failing_since = Instant::now();
    let outcome = timeout(RENEW + RETRY, &mut a.handle).await.unwrap().unwrap();
    assert_eq!(outcome, ElectionOutcome::LeadershipLost);
    assert!(failing_since.elapsed() <= RENEW);
    assert_eq!(tracker.count(&Event::Stopped("a".into())), 1);
    assert!(tracker.leader().is_none());
    assert!(logs_contain("failed to renew lease before the renew deadline"));

    let writes = store.writes();
    sleep(LEASE * 2).await;
    assert_eq!(store.writes(), writes);

    // a fresh run resumes the claim once the store recovers
    store.fail_updates(false);
    let first = stored(&shared).await;
    let mut again = spawn("a", store.clone(), &tracker);
    again.wait_leading(RETRY).await;
    let record = stored(&shared).await;
    assert_eq!(record.acquire_time, first.acquire_time);
    assert_eq!(record.leader_transitions, 0);
    again.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_release_on_cancel_hands_over_within_retry_period() {
    let shared = MemoryLockStore::new();
    let tracker = Tracker::default();
    let mut a = spawn("a", TestStore::sharing(&shared), &tracker);
    a.wait_leading(RETRY).await;

    sleep(Duration::from_secs(1)).await;
    let mut b = spawn("b", TestStore::sharing(&shared), &tracker);
    timeout(RETRY, b.status.wait_for(|s| s.leader.as_deref() == Some("a")))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(b.status.borrow().phase, ElectionPhase::Acquiring);
    assert_eq!(tracker.count(&new_leader("b", "a")), 1);

    sleep(Duration::from_secs(6)).await;
    assert!(!b.is_leader());
    assert_eq!(tracker.count(&new_leader("b", "a")), 1);

    assert_eq!(a.stop().await, ElectionOutcome::Cancelled);
    let released = Instant::now();
    assert!(stored(&shared).await.is_vacant());

    b.wait_leading(RETRY + Duration::from_millis(100)).await;
    assert!(released.elapsed() <= RETRY);

    let record = stored(&shared).await;
    assert_eq!(record.holder_identity, "b");
    assert_eq!(record.leader_transitions, 1);
    assert_eq!(tracker.count(&new_leader("b", "b")), 0);
    b.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_acquiring_writes_nothing() {
    let shared = MemoryLockStore::new();
    let tracker = Tracker::default();
    let mut a = spawn("a", TestStore::sharing(&shared), &tracker);
    a.wait_leading(RETRY).await;

    let b_store = TestStore::sharing(&shared);
    let b = spawn("b", b_store.clone(), &tracker);
    sleep(Duration::from_secs(7)).await;

    assert_eq!(b.stop().await, ElectionOutcome::Cancelled);
    assert_eq!(b_store.writes(), 0);
    assert_eq!(tracker.count(&Event::Started("b".into())), 0);
    assert_eq!(tracker.count(&Event::Stopped("b".into())), 0);
    assert!(a.is_leader());
    a.stop().await;
}
