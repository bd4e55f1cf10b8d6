use chainstats_backend::config::SchedulerConfig;
use chainstats_backend::scheduler::{FailureKind, RateLimitedScheduler, Retryable};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, Instant};

#[derive(Debug)]
struct TestError {
    transient: bool,
}

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.transient {
            write!(f, "upstream returned 503")
        } else {
            write!(f, "upstream returned 404")
        }
    }
}

impl Retryable for TestError {
    fn is_transient(&self) -> bool {
        self.transient
    }
}

fn config(max_per_minute: u32, spacing_ms: u64, max_attempts: u32) -> SchedulerConfig {
    SchedulerConfig {
        max_per_minute,
        min_spacing: Duration::from_millis(spacing_ms),
        max_attempts,
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
    }
}

#[tokio::test(start_paused = true)]
async fn test_sliding_window_budget_is_never_exceeded() {
    let scheduler = Arc::new(RateLimitedScheduler::new("budget", config(5, 0, 1)));
    let dispatched = Arc::new(Mutex::new(Vec::new()));
    let start = Instant::now();

    let mut handles = Vec::new();
    for i in 0..12 {
        let scheduler = Arc::clone(&scheduler);
        let dispatched = Arc::clone(&dispatched);
        handles.push(tokio::spawn(async move {
            scheduler
                .enqueue(&format!("task {}", i), || {
                    dispatched.lock().unwrap().push(Instant::now());
                    async { Ok::<_, TestError>(()) }
                })
                .await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    let times = dispatched.lock().unwrap().clone();
    assert_eq!(times.len(), 12);
    for &t in &times {
        let in_window = times.iter().filter(|&&u| u >= t && u < t + Duration::from_secs(60)).count();
        assert!(in_window <= 5, "{} dispatches inside one 60s window", in_window);
    }
    // 12 tasks at 5/min need two full window rotations
    assert!(Instant::now() - start >= Duration::from_secs(120));
    assert_eq!(scheduler.stats().dispatched, 12);
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_follows_enqueue_order_with_spacing() {
    let scheduler = RateLimitedScheduler::new("fifo", config(100, 250, 1));
    let order = Mutex::new(Vec::new());
    let times = Mutex::new(Vec::new());

    let tasks = (0..6).map(|i| {
        let order = &order;
        let times = &times;
        scheduler.enqueue("ordered", move || {
            order.lock().unwrap().push(i);
            times.lock().unwrap().push(Instant::now());
            async { Ok::<_, TestError>(()) }
        })
    });
    let results = futures::future::join_all(tasks).await;
    assert!(results.iter().all(|r| r.is_ok()));

    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
    let times = times.lock().unwrap();
    for pair in times.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(250));
    }
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried_until_success() {
    let scheduler = RateLimitedScheduler::new("retry", config(60, 0, 4));
    let attempts = AtomicU32::new(0);

    let result = scheduler
        .enqueue("flaky", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(TestError { transient: true })
                } else {
                    Ok(n)
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), 3);
    let stats = scheduler.stats();
    assert_eq!(stats.retried, 2);
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.dispatched, 3);
}

#[tokio::test(start_paused = true)]
async fn test_fatal_failure_is_not_retried() {
    let scheduler = RateLimitedScheduler::new("fatal", config(60, 0, 4));
    let attempts = AtomicU32::new(0);

    let failure = scheduler
        .enqueue("missing", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(TestError { transient: false }) }
        })
        .await
        .unwrap_err();

    assert_eq!(failure.kind, FailureKind::Fatal);
    assert_eq!(failure.attempts, 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert!(failure.to_string().contains("missing"));
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_resolve_to_failure_value() {
    let scheduler = RateLimitedScheduler::new("exhausted", config(60, 0, 3));
    let start = Instant::now();

    let failure = scheduler
        .enqueue("always 503", || async { Err::<(), _>(TestError { transient: true }) })
        .await
        .unwrap_err();

    assert_eq!(failure.kind, FailureKind::Exhausted);
    assert_eq!(failure.attempts, 3);
    // two backoffs of 1s and 2s, each jittered by at least 0.75
    assert!(Instant::now() - start >= Duration::from_millis(2250));
    assert_eq!(scheduler.stats().failed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_batch_continues_after_a_failed_task() {
    let scheduler = RateLimitedScheduler::new("batch", config(60, 10, 2));
    let mut succeeded = Vec::new();
    let mut failed = Vec::new();

    for chain in ["a", "b", "c"] {
        let result = scheduler
            .enqueue(chain, || async move {
                if chain == "b" {
                    Err(TestError { transient: true })
                } else {
                    Ok(chain)
                }
            })
            .await;
        match result {
            Ok(chain) => succeeded.push(chain),
            Err(failure) => failed.push(failure.label),
        }
    }

    assert_eq!(succeeded, vec!["a", "c"]);
    assert_eq!(failed, vec!["b".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_retry_is_dispatched_ahead_of_waiting_fresh_task() {
    let scheduler = Arc::new(RateLimitedScheduler::new("priority", config(2, 0, 2)));
    let order = Arc::new(Mutex::new(Vec::new()));

    let spawn_task = |label: &'static str, fail_first: bool| {
        let scheduler = Arc::clone(&scheduler);
        let order = Arc::clone(&order);
        tokio::spawn(async move {
            let attempts = AtomicU32::new(0);
            scheduler
                .enqueue(label, || {
                    let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    order.lock().unwrap().push(format!("{} #{}", label, n));
                    async move {
                        if fail_first && n == 1 {
                            Err(TestError { transient: true })
                        } else {
                            Ok(())
                        }
                    }
                })
                .await
        })
    };

    // "a" fails and backs off while "b" fills the 2/min budget
    let a = spawn_task("a", true);
    tokio::time::sleep(Duration::from_millis(10)).await;
    let b = spawn_task("b", false);
    tokio::time::sleep(Duration::from_millis(10)).await;
    // "c" is enqueued before the retry of "a" but waits for the window
    let c = spawn_task("c", false);
    tokio::time::sleep(Duration::from_millis(10)).await;

    for handle in [a, b, c] {
        assert!(handle.await.unwrap().is_ok());
    }

    assert_eq!(
        *order.lock().unwrap(),
        vec!["a #1".to_string(), "b #1".to_string(), "a #2".to_string(), "c #1".to_string()]
    );
    assert_eq!(scheduler.stats().retried, 1);
    assert_eq!(scheduler.stats().dispatched, 4);
}
