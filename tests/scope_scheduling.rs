//! Scope scheduling under virtual time: delayed execution, deterministic
//! interleaving, structured cancellation, launch modes, timed races.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use coroscope::test_utils::init_logging;
use coroscope::{
    trace_test, trace_test_ok, Error, ErrorKind, FailureHandlers, InlineDispatcher, JobState,
    LaunchOptions, Scope, TestScope,
};

fn init_test(name: &str) {
    init_logging();
    trace_test!(name);
}

#[test]
fn delayed_block_runs_only_after_time_advances() {
    init_test("delayed_block_runs_only_after_time_advances");
    let harness = TestScope::new();
    let flag = Arc::new(AtomicBool::new(false));

    {
        let flag = Arc::clone(&flag);
        harness
            .scope()
            .launch(move |ctx| async move {
                ctx.sleep(Duration::from_secs(1)).await?;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .expect("launch");
    }

    assert!(!flag.load(Ordering::SeqCst));
    harness.advance_time_by(Duration::from_secs(1));
    assert!(flag.load(Ordering::SeqCst));
    trace_test_ok!("delayed_block_runs_only_after_time_advances");
}

#[test]
fn interleaving_is_deterministic() {
    init_test("interleaving_is_deterministic");
    let harness = TestScope::new();
    let log: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));

    {
        let log = Arc::clone(&log);
        harness
            .scope()
            .launch(move |ctx| async move {
                log.lock().unwrap().push(1);
                ctx.sleep(Duration::from_millis(100)).await?;
                log.lock().unwrap().push(2);
                Ok(())
            })
            .expect("launch first");
    }
    {
        let log = Arc::clone(&log);
        harness
            .scope()
            .launch(move |ctx| async move {
                log.lock().unwrap().push(3);
                ctx.sleep(Duration::from_millis(50)).await?;
                log.lock().unwrap().push(4);
                Ok(())
            })
            .expect("launch second");
    }

    harness.advance_time_by(Duration::from_millis(150));
    assert_eq!(*log.lock().unwrap(), vec![1, 3, 4, 2]);
    trace_test_ok!("interleaving_is_deterministic");
}

#[test]
fn cancelling_the_scope_is_observed_at_the_next_suspension() {
    init_test("cancelling_the_scope_is_observed_at_the_next_suspension");
    let harness = TestScope::new();
    let observed = Arc::new(AtomicBool::new(false));

    let child = {
        let observed = Arc::clone(&observed);
        harness
            .scope()
            .launch(move |ctx| async move {
                match ctx.sleep(Duration::from_millis(1000)).await {
                    Err(e) if e.is_cancelled() => {
                        observed.store(true, Ordering::SeqCst);
                        Err(e)
                    }
                    other => other,
                }
            })
            .expect("launch")
    };

    harness.scope().cancel();
    harness.advance_time_by(Duration::from_millis(100));

    assert!(observed.load(Ordering::SeqCst));
    assert_eq!(child.state(), JobState::Cancelled);
    trace_test_ok!("cancelling_the_scope_is_observed_at_the_next_suspension");
}

#[test]
fn spawn_delivers_the_result() {
    init_test("spawn_delivers_the_result");
    let harness = TestScope::new();
    let ctx = harness.context();

    let deferred = harness
        .scope()
        .spawn(|ctx| async move {
            ctx.sleep(Duration::from_millis(10)).await?;
            Ok(6 * 7)
        })
        .expect("spawn");

    harness.advance_time_by(Duration::from_millis(20));
    let value = harness.block_on(deferred.join(&ctx)).expect("join");
    assert_eq!(value, 42);
    trace_test_ok!("spawn_delivers_the_result");
}

#[test]
fn spawn_failure_re_raises_on_join() {
    init_test("spawn_failure_re_raises_on_join");
    let harness = TestScope::new();
    let ctx = harness.context();

    let deferred: coroscope::Deferred<u32> = harness
        .scope()
        .spawn(|_ctx| async move { Err(Error::msg("compute failed")) })
        .expect("spawn");

    harness.run_until_idle();
    assert!(deferred.failure().is_some());
    let err = harness.block_on(deferred.join(&ctx)).unwrap_err();
    assert_eq!(err.context(), Some("compute failed"));
    trace_test_ok!("spawn_failure_re_raises_on_join");
}

#[test]
fn lazy_task_waits_for_start() {
    init_test("lazy_task_waits_for_start");
    let harness = TestScope::new();
    let ran = Arc::new(AtomicBool::new(false));

    let job = {
        let ran = Arc::clone(&ran);
        harness
            .scope()
            .launch_with(LaunchOptions::lazy(), move |_ctx| async move {
                ran.store(true, Ordering::SeqCst);
                Ok(())
            })
            .expect("launch lazy")
    };

    harness.run_until_idle();
    assert!(!ran.load(Ordering::SeqCst));
    assert!(job.is_active());

    assert!(job.start());
    assert!(!job.start());
    harness.run_until_idle();
    assert!(ran.load(Ordering::SeqCst));
    assert!(job.is_completed());
    trace_test_ok!("lazy_task_waits_for_start");
}

#[test]
fn lazy_deferred_starts_on_first_join() {
    init_test("lazy_deferred_starts_on_first_join");
    let harness = TestScope::new();
    let ctx = harness.context();

    let deferred = harness
        .scope()
        .spawn_with(LaunchOptions::lazy(), |_ctx| async move { Ok(5u32) })
        .expect("spawn lazy");

    assert!(deferred.try_result().is_none());
    let value = harness.block_on(deferred.join(&ctx)).expect("join");
    assert_eq!(value, 5);
    trace_test_ok!("lazy_deferred_starts_on_first_join");
}

#[test]
fn panic_becomes_a_fault_and_reaches_the_handler_chain() {
    init_test("panic_becomes_a_fault_and_reaches_the_handler_chain");
    let handlers = FailureHandlers::new();
    let reported = Arc::new(Mutex::new(Vec::new()));
    let _guard = {
        let reported = Arc::clone(&reported);
        handlers.install(move |tag, error| {
            reported
                .lock()
                .unwrap()
                .push((tag.map(|t| t.name.clone()), format!("{error}")));
        })
    };

    let clock = Arc::new(coroscope::VirtualClock::new());
    let dispatcher = coroscope::TestDispatcher::new();
    let scope = Scope::builder()
        .name("panicky")
        .dispatcher(Arc::new(dispatcher.clone()))
        .time_source(clock)
        .failure_handlers(handlers)
        .build();

    let job = scope
        .launch(|_ctx| async move {
            panic!("user block bug");
        })
        .expect("launch");
    dispatcher.drain();

    assert_eq!(job.state(), JobState::Faulted);
    let failure = job.failure().expect("failure recorded");
    assert_eq!(failure.kind(), ErrorKind::Panic);
    let reported = reported.lock().unwrap();
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].0.as_deref(), Some("panicky"));
    assert!(reported[0].1.contains("user block bug"));
    trace_test_ok!("panic_becomes_a_fault_and_reaches_the_handler_chain");
}

#[test]
fn disposed_scope_rejects_new_work() {
    init_test("disposed_scope_rejects_new_work");
    let harness = TestScope::new();
    harness.scope().dispose();
    let err = harness
        .scope()
        .launch(|_ctx| async { Ok(()) })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ScopeDisposed);
    trace_test_ok!("disposed_scope_rejects_new_work");
}

#[test]
fn with_context_runs_elsewhere_and_returns_the_value() {
    init_test("with_context_runs_elsewhere_and_returns_the_value");
    let harness = TestScope::new();
    let ctx = harness.context();

    let value = harness.block_on(harness.scope().with_context(
        &ctx,
        Arc::new(InlineDispatcher::new()),
        |_ctx| async move { Ok(21 * 2) },
    ));
    assert_eq!(value.expect("with_context"), 42);
    trace_test_ok!("with_context_runs_elsewhere_and_returns_the_value");
}

#[test]
fn timed_race_raises_timeout_when_the_deadline_wins() {
    init_test("timed_race_raises_timeout_when_the_deadline_wins");
    let harness = TestScope::new();
    let ctx = harness.context();

    let job = harness
        .scope()
        .spawn(move |ctx| async move {
            let slow = ctx
                .timeout(Duration::from_millis(100), |inner| async move {
                    inner.sleep(Duration::from_secs(5)).await?;
                    Ok(1u32)
                })
                .await;
            match slow {
                Err(e) if e.is_timeout() => {}
                other => return Err(Error::msg(format!("expected timeout, got {other:?}"))),
            }

            let fast = ctx
                .timeout(Duration::from_millis(100), |inner| async move {
                    inner.sleep(Duration::from_millis(10)).await?;
                    Ok(2u32)
                })
                .await?;
            Ok(fast)
        })
        .expect("spawn");

    harness.advance_time_by(Duration::from_secs(6));
    let value = harness.block_on(job.join(&ctx)).expect("join");
    assert_eq!(value, 2);
    trace_test_ok!("timed_race_raises_timeout_when_the_deadline_wins");
}

#[test]
fn scope_counters_and_events_track_task_lifecycles() {
    init_test("scope_counters_and_events_track_task_lifecycles");
    let harness = TestScope::new();
    let started = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));
    {
        let started = Arc::clone(&started);
        harness.scope().on_job_started(move |_| {
            started.fetch_add(1, Ordering::SeqCst);
        });
        let completed = Arc::clone(&completed);
        harness.scope().on_job_completed(move |_| {
            completed.fetch_add(1, Ordering::SeqCst);
        });
    }

    for delay_ms in [10u64, 20, 30] {
        harness
            .scope()
            .launch(move |ctx| async move {
                ctx.sleep(Duration::from_millis(delay_ms)).await?;
                Ok(())
            })
            .expect("launch");
    }

    assert_eq!(started.load(Ordering::SeqCst), 3);
    assert_eq!(harness.scope().active_jobs(), 3);
    assert!(!harness.is_idle());

    assert!(harness.run_until_idle());
    assert_eq!(completed.load(Ordering::SeqCst), 3);
    assert_eq!(harness.scope().active_jobs(), 0);
    trace_test_ok!("scope_counters_and_events_track_task_lifecycles");
}

#[test]
fn join_all_waits_for_every_child() {
    init_test("join_all_waits_for_every_child");
    let harness = TestScope::new();
    let ctx = harness.context();
    let done = Arc::new(AtomicUsize::new(0));

    for delay_ms in [5u64, 15, 25] {
        let done = Arc::clone(&done);
        harness
            .scope()
            .launch(move |ctx| async move {
                ctx.sleep(Duration::from_millis(delay_ms)).await?;
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .expect("launch");
    }

    harness.block_on(harness.scope().join_all(&ctx)).expect("join_all");
    assert_eq!(done.load(Ordering::SeqCst), 3);
    trace_test_ok!("join_all_waits_for_every_child");
}

#[test]
fn join_all_timeout_reports_unfinished_children() {
    init_test("join_all_timeout_reports_unfinished_children");
    let harness = TestScope::new();
    let ctx = harness.context();

    harness
        .scope()
        .launch(|ctx| async move {
            ctx.sleep(Duration::from_secs(60)).await?;
            Ok(())
        })
        .expect("launch");

    let all_done = harness.block_on(
        harness
            .scope()
            .join_all_timeout(&ctx, Duration::from_millis(50)),
    );
    assert_eq!(all_done.expect("join_all_timeout"), false);
    trace_test_ok!("join_all_timeout_reports_unfinished_children");
}
