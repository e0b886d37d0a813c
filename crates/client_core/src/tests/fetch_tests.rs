use std::sync::atomic::{AtomicUsize, Ordering};

use super::*;
use crate::freshness::{ManualClock, APPLICATIONS_WINDOW};
use chrono::{Duration, TimeZone};
use shared::error::{ApiException, ErrorCode};
use tokio::sync::oneshot;

type Reply = Result<Vec<String>, ClientError>;

/// Answers immediately with a scripted result.
struct StaticSource {
    calls: AtomicUsize,
    reply: Mutex<Reply>,
}

impl StaticSource {
    fn ok(records: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            reply: Mutex::new(Ok(records.iter().map(|r| r.to_string()).collect())),
        })
    }

    fn reply_with(&self, reply: Reply) {
        *self.reply.lock().expect("lock") = reply;
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CollectionSource for StaticSource {
    type Record = String;

    async fn fetch_collection(&self, _owner_key: &str) -> Reply {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply.lock().expect("lock").clone()
    }
}

/// Holds every request open until the test resolves it.
#[derive(Default)]
struct GatedSource {
    calls: Mutex<Vec<(String, Option<oneshot::Sender<Reply>>)>>,
}

impl GatedSource {
    fn calls(&self) -> usize {
        self.calls.lock().expect("lock").len()
    }

    fn owner_of(&self, index: usize) -> String {
        self.calls.lock().expect("lock")[index].0.clone()
    }

    fn resolve(&self, index: usize, reply: Reply) {
        let sender = self.calls.lock().expect("lock")[index]
            .1
            .take()
            .expect("unresolved call");
        let _ = sender.send(reply);
    }

    async fn wait_for_calls(&self, expected: usize) {
        for _ in 0..1_000 {
            if self.calls() >= expected {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("expected {expected} calls, saw {}", self.calls());
    }
}

#[async_trait]
impl CollectionSource for GatedSource {
    type Record = String;

    async fn fetch_collection(&self, owner_key: &str) -> Reply {
        let (tx, rx) = oneshot::channel();
        self.calls
            .lock()
            .expect("lock")
            .push((owner_key.to_string(), Some(tx)));
        rx.await
            .unwrap_or_else(|_| Err(ClientError::Transport("gate dropped".into())))
    }
}

/// Panics instead of answering.
struct PanickingSource;

#[async_trait]
impl CollectionSource for PanickingSource {
    type Record = String;

    async fn fetch_collection(&self, owner_key: &str) -> Reply {
        panic!("source blew up for {owner_key}");
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).single().expect("time")
}

fn records(items: &[&str]) -> Vec<String> {
    items.iter().map(|r| r.to_string()).collect()
}

fn server_error() -> ClientError {
    ClientError::Remote(ApiException::new(ErrorCode::Internal, "boom"))
}

fn controller<S: CollectionSource>(
    source: Arc<S>,
    clock: Arc<ManualClock>,
) -> FetchController<S> {
    FetchController::new(
        "applications",
        source,
        FreshnessPolicy::new(APPLICATIONS_WINDOW),
        clock,
    )
}

async fn settle_tasks() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn first_fetch_populates_state() {
    let clock = Arc::new(ManualClock::new(t0()));
    let source = StaticSource::ok(&["a", "b"]);
    let apps = controller(source.clone(), clock.clone());

    assert!(apps.is_stale());
    let fetched = apps.fetch("acme", false).await.expect("fetch");
    assert_eq!(fetched, records(&["a", "b"]));

    let state = apps.snapshot();
    assert_eq!(state.collection, records(&["a", "b"]));
    assert!(!state.loading);
    assert!(state.error.is_none());
    assert_eq!(state.last_fetched, Some(t0()));
    assert_eq!(source.calls(), 1);
    assert_eq!(apps.owner_key().as_deref(), Some("acme"));
}

#[tokio::test]
async fn fresh_cache_is_served_without_contacting_source() {
    let clock = Arc::new(ManualClock::new(t0()));
    let source = StaticSource::ok(&["a"]);
    let apps = controller(source.clone(), clock.clone());
    apps.fetch("acme", false).await.expect("fetch");

    clock.advance(Duration::minutes(4));
    source.reply_with(Ok(records(&["changed"])));
    let cached = apps.fetch("acme", false).await.expect("fetch");
    assert_eq!(cached, records(&["a"]));
    assert_eq!(source.calls(), 1);
    assert_eq!(apps.snapshot().last_fetched, Some(t0()));
}

#[tokio::test]
async fn stale_cache_is_refetched() {
    let clock = Arc::new(ManualClock::new(t0()));
    let source = StaticSource::ok(&["a"]);
    let apps = controller(source.clone(), clock.clone());
    apps.fetch("acme", false).await.expect("fetch");

    clock.advance(Duration::minutes(6));
    assert!(apps.is_stale());
    source.reply_with(Ok(records(&["b"])));
    let fetched = apps.fetch("acme", false).await.expect("fetch");
    assert_eq!(fetched, records(&["b"]));
    assert_eq!(source.calls(), 2);
    assert_eq!(
        apps.snapshot().last_fetched,
        Some(t0() + Duration::minutes(6))
    );
    assert!(!apps.is_stale());
}

#[tokio::test]
async fn force_bypasses_freshness() {
    let clock = Arc::new(ManualClock::new(t0()));
    let source = StaticSource::ok(&["a"]);
    let apps = controller(source.clone(), clock.clone());
    apps.fetch("acme", false).await.expect("fetch");

    clock.advance(Duration::seconds(10));
    source.reply_with(Ok(records(&["b"])));
    let fetched = apps.fetch("acme", true).await.expect("fetch");
    assert_eq!(fetched, records(&["b"]));
    assert_eq!(source.calls(), 2);
    assert_eq!(
        apps.snapshot().last_fetched,
        Some(t0() + Duration::seconds(10))
    );
}

#[tokio::test]
async fn failure_keeps_collection_and_timestamp() {
    let clock = Arc::new(ManualClock::new(t0()));
    let source = StaticSource::ok(&["a"]);
    let apps = controller(source.clone(), clock.clone());
    apps.fetch("acme", false).await.expect("fetch");

    clock.advance(Duration::minutes(6));
    source.reply_with(Err(server_error()));
    let err = apps.fetch("acme", false).await.expect_err("should fail");
    assert_eq!(err.remote_code(), Some(ErrorCode::Internal));

    let state = apps.snapshot();
    assert_eq!(state.collection, records(&["a"]));
    assert_eq!(state.last_fetched, Some(t0()));
    assert!(!state.loading);
    assert!(state.error.is_some());

    source.reply_with(Ok(records(&["b"])));
    apps.fetch("acme", false).await.expect("retry");
    let state = apps.snapshot();
    assert!(state.error.is_none());
    assert_eq!(state.collection, records(&["b"]));
}

#[tokio::test]
async fn blank_owner_key_is_a_no_op() {
    let clock = Arc::new(ManualClock::new(t0()));
    let source = StaticSource::ok(&["a"]);
    let apps = controller(source.clone(), clock);

    assert!(apps.fetch("", false).await.expect("fetch").is_empty());
    assert!(apps.fetch("   ", true).await.expect("fetch").is_empty());
    assert_eq!(source.calls(), 0);
    assert_eq!(apps.owner_key(), None);
    let state = apps.snapshot();
    assert!(!state.loading);
    assert!(state.last_fetched.is_none());
}

#[tokio::test]
async fn loading_is_visible_while_in_flight() {
    let clock = Arc::new(ManualClock::new(t0()));
    let source = Arc::new(GatedSource::default());
    let apps = controller(source.clone(), clock);

    let task = tokio::spawn({
        let apps = apps.clone();
        async move { apps.fetch("acme", false).await }
    });
    source.wait_for_calls(1).await;
    assert!(apps.snapshot().loading);

    source.resolve(0, Ok(records(&["a"])));
    task.await.expect("join").expect("fetch");
    assert!(!apps.snapshot().loading);
}

#[tokio::test]
async fn concurrent_fetches_share_one_request() {
    let clock = Arc::new(ManualClock::new(t0()));
    let source = Arc::new(GatedSource::default());
    let apps = controller(source.clone(), clock);

    let first = tokio::spawn({
        let apps = apps.clone();
        async move { apps.fetch("acme", false).await }
    });
    source.wait_for_calls(1).await;
    let second = tokio::spawn({
        let apps = apps.clone();
        async move { apps.fetch("acme", false).await }
    });
    settle_tasks().await;
    assert_eq!(source.calls(), 1);

    source.resolve(0, Ok(records(&["a"])));
    assert_eq!(first.await.expect("join").expect("fetch"), records(&["a"]));
    assert_eq!(second.await.expect("join").expect("fetch"), records(&["a"]));
    assert_eq!(source.calls(), 1);
    assert!(!apps.snapshot().loading);
}

#[tokio::test]
async fn forced_fetches_apply_in_completion_order() {
    let clock = Arc::new(ManualClock::new(t0()));
    let source = Arc::new(GatedSource::default());
    let apps = controller(source.clone(), clock.clone());

    let older = tokio::spawn({
        let apps = apps.clone();
        async move { apps.fetch("acme", true).await }
    });
    source.wait_for_calls(1).await;
    let newer = tokio::spawn({
        let apps = apps.clone();
        async move { apps.fetch("acme", true).await }
    });
    source.wait_for_calls(2).await;

    clock.advance(Duration::seconds(1));
    source.resolve(1, Ok(records(&["newer"])));
    newer.await.expect("join").expect("fetch");
    let state = apps.snapshot();
    assert_eq!(state.collection, records(&["newer"]));
    assert!(state.loading, "older request is still pending");

    clock.advance(Duration::seconds(1));
    source.resolve(0, Ok(records(&["older"])));
    older.await.expect("join").expect("fetch");
    let state = apps.snapshot();
    assert_eq!(state.collection, records(&["older"]));
    assert!(!state.loading);
    assert_eq!(state.last_fetched, Some(t0() + Duration::seconds(2)));
}

#[tokio::test]
async fn owner_switch_discards_in_flight_result() {
    let clock = Arc::new(ManualClock::new(t0()));
    let source = Arc::new(GatedSource::default());
    let apps = controller(source.clone(), clock);

    let acme = tokio::spawn({
        let apps = apps.clone();
        async move { apps.fetch("acme", false).await }
    });
    source.wait_for_calls(1).await;
    let globex = tokio::spawn({
        let apps = apps.clone();
        async move { apps.fetch("globex", false).await }
    });
    source.wait_for_calls(2).await;
    assert_eq!(source.owner_of(0), "acme");
    assert_eq!(source.owner_of(1), "globex");

    source.resolve(0, Ok(records(&["acme-app"])));
    let returned = acme.await.expect("join").expect("fetch");
    assert_eq!(returned, records(&["acme-app"]));
    let state = apps.snapshot();
    assert!(state.collection.is_empty());
    assert!(state.last_fetched.is_none());
    assert!(state.loading, "globex request is still pending");

    source.resolve(1, Ok(records(&["globex-app"])));
    globex.await.expect("join").expect("fetch");
    let state = apps.snapshot();
    assert_eq!(state.collection, records(&["globex-app"]));
    assert!(!state.loading);
    assert_eq!(apps.owner_key().as_deref(), Some("globex"));
}

#[tokio::test]
async fn selecting_a_new_owner_resets_state() {
    let clock = Arc::new(ManualClock::new(t0()));
    let source = StaticSource::ok(&["a"]);
    let apps = controller(source.clone(), clock);
    apps.fetch("acme", false).await.expect("fetch");

    apps.select_owner("acme");
    assert_eq!(apps.snapshot().collection, records(&["a"]));

    apps.select_owner("globex");
    let state = apps.snapshot();
    assert!(state.collection.is_empty());
    assert!(state.last_fetched.is_none());
    assert!(apps.is_stale());
}

#[tokio::test]
async fn dropping_an_in_flight_fetch_settles_loading() {
    let clock = Arc::new(ManualClock::new(t0()));
    let source = Arc::new(GatedSource::default());
    let apps = controller(source.clone(), clock);

    let task = tokio::spawn({
        let apps = apps.clone();
        async move { apps.fetch("acme", false).await }
    });
    source.wait_for_calls(1).await;
    assert!(apps.snapshot().loading);

    task.abort();
    assert!(task.await.expect_err("aborted").is_cancelled());
    let state = apps.snapshot();
    assert!(!state.loading);
    assert!(state.error.is_none());
    assert!(state.last_fetched.is_none());

    // Nothing is left in flight, so the next call dispatches again.
    let retry = tokio::spawn({
        let apps = apps.clone();
        async move { apps.fetch("acme", false).await }
    });
    source.wait_for_calls(2).await;
    source.resolve(1, Ok(records(&["a"])));
    assert_eq!(retry.await.expect("join").expect("fetch"), records(&["a"]));
}

#[tokio::test]
async fn joined_request_is_applied_after_dispatcher_is_dropped() {
    let clock = Arc::new(ManualClock::new(t0()));
    let source = Arc::new(GatedSource::default());
    let apps = controller(source.clone(), clock);

    let first = tokio::spawn({
        let apps = apps.clone();
        async move { apps.fetch("acme", false).await }
    });
    source.wait_for_calls(1).await;
    let second = tokio::spawn({
        let apps = apps.clone();
        async move { apps.fetch("acme", false).await }
    });
    settle_tasks().await;

    first.abort();
    assert!(first.await.expect_err("aborted").is_cancelled());
    assert!(apps.snapshot().loading, "second caller still waits on the request");

    source.resolve(0, Ok(records(&["a"])));
    assert_eq!(second.await.expect("join").expect("fetch"), records(&["a"]));
    let state = apps.snapshot();
    assert_eq!(state.collection, records(&["a"]));
    assert_eq!(state.last_fetched, Some(t0()));
    assert!(!state.loading);
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn panicking_source_settles_loading() {
    let clock = Arc::new(ManualClock::new(t0()));
    let apps = controller(Arc::new(PanickingSource), clock);

    let task = tokio::spawn({
        let apps = apps.clone();
        async move { apps.fetch("acme", false).await }
    });
    assert!(task.await.expect_err("panicked").is_panic());

    let state = apps.snapshot();
    assert!(!state.loading);
    assert!(state.collection.is_empty());
    assert!(state.last_fetched.is_none());
    assert_eq!(apps.owner_key().as_deref(), Some("acme"));
}

#[tokio::test]
async fn last_fetched_never_moves_backwards() {
    let clock = Arc::new(ManualClock::new(t0()));
    let source = StaticSource::ok(&["a"]);
    let apps = controller(source.clone(), clock.clone());
    apps.fetch("acme", false).await.expect("fetch");

    clock.set(t0() - Duration::minutes(30));
    apps.fetch("acme", true).await.expect("fetch");
    assert_eq!(apps.snapshot().last_fetched, Some(t0()));
}

#[tokio::test]
async fn invalidate_forces_next_fetch_but_keeps_records() {
    let clock = Arc::new(ManualClock::new(t0()));
    let source = StaticSource::ok(&["a"]);
    let apps = controller(source.clone(), clock);
    apps.fetch("acme", false).await.expect("fetch");

    apps.invalidate();
    assert!(apps.is_stale());
    assert_eq!(apps.snapshot().collection, records(&["a"]));

    apps.fetch("acme", false).await.expect("fetch");
    assert_eq!(source.calls(), 2);
}
