use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use litehttp::{
    CustomFilter, Engine, EngineBuilder, Error, FailureKind, Filter, FilterChain, HeaderMap,
    MetricsFilter, Request, Response, Result, StatusCode, Transport, TransportResponse,
};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct GateState {
    permits: usize,
    in_flight: usize,
    peak: usize,
    calls: Vec<String>,
}

/// Answers every request with its own URL. URLs containing `/block` wait
/// for a permit first.
#[derive(Clone, Default)]
struct Gate {
    state: Arc<(Mutex<GateState>, Condvar)>,
}

impl Gate {
    fn release(&self, permits: usize) {
        let (lock, cvar) = &*self.state;
        lock.lock().unwrap().permits += permits;
        cvar.notify_all();
    }

    fn in_flight(&self) -> usize {
        self.state.0.lock().unwrap().in_flight
    }

    fn peak(&self) -> usize {
        self.state.0.lock().unwrap().peak
    }

    fn calls(&self) -> Vec<String> {
        self.state.0.lock().unwrap().calls.clone()
    }
}

impl Transport for Gate {
    fn execute(&self, request: &Request) -> Result<TransportResponse> {
        let url = request.url().to_string();
        let (lock, cvar) = &*self.state;
        let mut state = lock.lock().unwrap();
        state.calls.push(url.clone());
        state.in_flight += 1;
        state.peak = state.peak.max(state.in_flight);

        if url.contains("/block") {
            let deadline = Instant::now() + WAIT;
            while state.permits == 0 && Instant::now() < deadline {
                state = cvar.wait_timeout(state, Duration::from_millis(20)).unwrap().0;
            }
            state.permits = state.permits.saturating_sub(1);
        }
        state.in_flight -= 1;
        drop(state);

        if url.contains("/fail") {
            return Err(Error::protocol("unexpected end of stream"));
        }
        Ok(TransportResponse::from_bytes(StatusCode::OK, HeaderMap::new(), url))
    }

    fn name(&self) -> &str {
        "Gate"
    }
}

fn request(path: &str) -> Request {
    Request::builder()
        .url(&format!("http://test.local{}", path))
        .unwrap()
        .build()
        .unwrap()
}

fn engine(gate: &Gate) -> Engine {
    EngineBuilder::new().transport(gate.clone()).build().unwrap()
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn collector() -> (mpsc::Sender<Response>, mpsc::Receiver<Response>) {
    mpsc::channel()
}

#[test]
fn running_set_never_exceeds_cap() {
    let gate = Gate::default();
    let engine = engine(&gate);
    let (tx, rx) = collector();

    for i in 0..15 {
        let tx = tx.clone();
        engine.submit(request(&format!("/block/{}", i)), move |response| {
            tx.send(response).unwrap();
        });
    }

    assert_eq!(engine.running_count(), 10);
    assert_eq!(engine.waiting_count(), 5);
    assert!(wait_until(|| gate.in_flight() == 10));

    gate.release(100);
    for _ in 0..15 {
        let response = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(response.status(), Some(StatusCode::OK));
    }
    assert!(gate.peak() <= 10);
    assert!(wait_until(|| engine.running_count() == 0));
    assert_eq!(engine.waiting_count(), 0);
}

#[test]
fn waiting_tasks_start_in_arrival_order() {
    let gate = Gate::default();
    let engine = engine(&gate);
    let (tx, rx) = collector();

    for i in 0..10 {
        engine.submit(request(&format!("/block/{}", i)), |_| {});
    }
    assert!(wait_until(|| gate.in_flight() == 10));

    for path in ["/a", "/b", "/c"] {
        let tx = tx.clone();
        engine.submit(request(path), move |response| {
            tx.send(response).unwrap();
        });
    }
    assert_eq!(engine.waiting_count(), 3);

    // One slot frees up and is passed along the queue one task at a time.
    gate.release(1);
    let served: Vec<String> = (0..3)
        .map(|_| rx.recv_timeout(WAIT).unwrap().url().to_string())
        .collect();
    assert_eq!(
        served,
        vec!["http://test.local/a", "http://test.local/b", "http://test.local/c"]
    );

    let tail: Vec<String> = gate.calls().into_iter().skip(10).collect();
    assert_eq!(tail, served);
    gate.release(100);
}

#[test]
fn enqueue_twice_runs_once() {
    let gate = Gate::default();
    let engine = engine(&gate);
    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = collector();

    let counter = Arc::clone(&calls);
    let handle = engine.new_task(request("/once"), move |response| {
        counter.fetch_add(1, Ordering::SeqCst);
        tx.send(response).unwrap();
    });
    assert!(!handle.is_enqueued());
    engine.enqueue(&handle);
    engine.enqueue(&handle);
    assert!(handle.is_enqueued());

    rx.recv_timeout(WAIT).unwrap();
    assert!(wait_until(|| engine.running_count() == 0));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(gate.calls(), vec!["http://test.local/once"]);
}

#[test]
fn cancel_before_dispatch_runs_nothing() {
    let gate = Gate::default();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    let engine = EngineBuilder::new()
        .transport(gate.clone())
        .filter(CustomFilter::new(
            move |_: &mut Request| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            |_: &mut Response| {},
            "Counter",
        ))
        .build()
        .unwrap();
    let (tx, rx) = collector();

    let handle = engine.new_task(request("/never"), move |response| {
        tx.send(response).unwrap();
    });
    engine.cancel(&handle);
    engine.enqueue(&handle);

    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    assert_eq!(seen.load(Ordering::SeqCst), 0);
    assert!(gate.calls().is_empty());
    assert_eq!(engine.running_count(), 0);
}

#[test]
fn cancel_while_waiting_drops_task_from_queue() {
    let gate = Gate::default();
    let engine = engine(&gate);
    let (tx, rx) = collector();

    for i in 0..10 {
        engine.submit(request(&format!("/block/{}", i)), |_| {});
    }
    let handle = engine.submit(request("/late"), move |response| {
        tx.send(response).unwrap();
    });
    assert_eq!(engine.waiting_count(), 1);

    engine.cancel(&handle);
    assert!(handle.is_canceled());
    assert_eq!(engine.waiting_count(), 0);

    gate.release(100);
    assert!(wait_until(|| engine.running_count() == 0));
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    assert!(!gate.calls().iter().any(|url| url.contains("/late")));
}

struct CancelOnRequest;

impl Filter for CancelOnRequest {
    fn on_request(&self, chain: &mut FilterChain, request: &mut Request) -> bool {
        if request.url().to_string().contains("/cancel") {
            chain.task().cancel();
        }
        false
    }

    fn name(&self) -> &str {
        "CancelOnRequest"
    }
}

#[test]
fn cancel_mid_chain_skips_transport_and_callback() {
    let gate = Gate::default();
    let engine = EngineBuilder::new()
        .transport(gate.clone())
        .filter(CancelOnRequest)
        .build()
        .unwrap();
    let (tx, rx) = collector();

    let canceled_tx = tx.clone();
    engine.submit(request("/cancel"), move |response| {
        canceled_tx.send(response).unwrap();
    });
    engine.submit(request("/fine"), move |response| {
        tx.send(response).unwrap();
    });

    let response = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(response.url(), "http://test.local/fine");
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    assert_eq!(gate.calls(), vec!["http://test.local/fine"]);
    assert!(wait_until(|| engine.running_count() == 0));
}

#[test]
fn transport_failure_still_completes_task() {
    let gate = Gate::default();
    let metrics = MetricsFilter::new();
    let engine = EngineBuilder::new()
        .transport(gate.clone())
        .filter(metrics.clone())
        .build()
        .unwrap();
    let (tx, rx) = collector();

    engine.submit(request("/fail"), move |response| {
        tx.send(response).unwrap();
    });

    let response = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(response.status(), None);
    assert_eq!(response.failure(), Some(FailureKind::Protocol));
    assert_eq!(response.message(), "request on protocol error,http://test.local/fail");

    let snapshot = metrics.metrics();
    assert_eq!(snapshot.request_count, 1);
    assert_eq!(snapshot.failure_count, 1);
}

struct PanicOnRequest;

impl Filter for PanicOnRequest {
    fn on_request(&self, _chain: &mut FilterChain, request: &mut Request) -> bool {
        if request.url().to_string().contains("/panic") {
            panic!("filter blew up");
        }
        false
    }
}

#[test]
fn panicking_filter_frees_its_slot() {
    let gate = Gate::default();
    let engine = EngineBuilder::new()
        .transport(gate.clone())
        .filter(PanicOnRequest)
        .build()
        .unwrap();
    let (tx, rx) = collector();

    for i in 0..12 {
        let tx = tx.clone();
        engine.submit(request(&format!("/panic/{}", i)), move |response| {
            tx.send(response).unwrap();
        });
    }
    engine.submit(request("/after"), move |response| {
        tx.send(response).unwrap();
    });

    let response = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(response.url(), "http://test.local/after");
    assert!(wait_until(|| engine.running_count() == 0));
}

#[tokio::test]
async fn execute_through_panicking_filter_returns_error() {
    let gate = Gate::default();
    let engine = EngineBuilder::new()
        .transport(gate.clone())
        .filter(PanicOnRequest)
        .build()
        .unwrap();

    let outcome = tokio::time::timeout(WAIT, engine.execute(request("/panic")))
        .await
        .expect("execute should not hang");
    assert!(outcome.is_err());
    assert!(gate.calls().is_empty());
    assert!(wait_until(|| engine.running_count() == 0));
}

/// Claims every request without ever producing a response
struct Swallow;

impl Filter for Swallow {
    fn on_request(&self, _chain: &mut FilterChain, _request: &mut Request) -> bool {
        true
    }

    fn name(&self) -> &str {
        "Swallow"
    }
}

#[tokio::test]
async fn execute_errors_when_chain_yields_no_response() {
    let gate = Gate::default();
    let engine = EngineBuilder::new()
        .transport(gate.clone())
        .filter(Swallow)
        .build()
        .unwrap();

    let outcome = tokio::time::timeout(WAIT, engine.execute(request("/swallowed")))
        .await
        .expect("execute should not hang");
    assert!(matches!(outcome, Err(Error::Custom(_))));
    assert!(gate.calls().is_empty());
}

#[test]
fn dropping_engine_discards_waiting_callbacks() {
    let gate = Gate::default();
    let engine = engine(&gate);
    let (tx, rx) = collector();

    for i in 0..10 {
        engine.submit(request(&format!("/block/{}", i)), |_| {});
    }
    engine.submit(request("/queued"), move |response| {
        tx.send(response).unwrap();
    });
    assert_eq!(engine.waiting_count(), 1);

    drop(engine);
    gate.release(100);
    assert!(rx.recv_timeout(Duration::from_millis(500)).is_err());
}

#[tokio::test]
async fn execute_returns_buffered_body() {
    let gate = Gate::default();
    let engine = engine(&gate);

    let response = engine.execute(request("/hello")).await.unwrap();
    assert!(response.is_success());
    assert_eq!(response.text().unwrap(), "http://test.local/hello");
    assert_eq!(engine.buffer_pool().idle_count(), 1);
}

#[tokio::test]
async fn cache_answers_repeated_gets() {
    let gate = Gate::default();
    let engine = EngineBuilder::new()
        .transport(gate.clone())
        .cache(Duration::from_secs(60))
        .build()
        .unwrap();

    let first = engine.execute(request("/cached")).await.unwrap();
    assert!(!first.is_from_cache());
    assert_eq!(first.text().unwrap(), "http://test.local/cached");

    let second = engine.execute(request("/cached")).await.unwrap();
    assert!(second.is_from_cache());
    assert_eq!(second.text().unwrap(), "http://test.local/cached");

    assert_eq!(gate.calls().len(), 1);
}
