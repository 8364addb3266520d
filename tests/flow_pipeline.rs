//! Cold-flow pipeline semantics: operators, failure recovery, and
//! virtual-time rate shaping.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use coroscope::test_utils::init_logging;
use coroscope::{flow, flow_of, merge, trace_test, trace_test_ok, Error, Flow, TestScope};

fn init_test(name: &str) {
    init_logging();
    trace_test!(name);
}

#[test]
fn zip_pairs_in_lockstep_and_terminates() {
    init_test("zip_pairs_in_lockstep_and_terminates");
    let harness = TestScope::new();
    let ctx = harness.context();

    let numbers = flow_of([1, 2, 3]);
    let letters = flow_of(["A", "B", "C"]);
    let pairs = harness
        .block_on(numbers.zip(letters).collect_values(&ctx))
        .expect("collect");
    assert_eq!(pairs, vec![(1, "A"), (2, "B"), (3, "C")]);
    trace_test_ok!("zip_pairs_in_lockstep_and_terminates");
}

#[test]
fn zip_ends_when_the_shorter_side_ends() {
    init_test("zip_ends_when_the_shorter_side_ends");
    let harness = TestScope::new();
    let ctx = harness.context();

    let pairs = harness
        .block_on(flow_of([1, 2, 3, 4]).zip(flow_of(["x"])).collect_values(&ctx))
        .expect("collect");
    assert_eq!(pairs, vec![(1, "x")]);
    trace_test_ok!("zip_ends_when_the_shorter_side_ends");
}

#[test]
fn map_filter_fold_compose() {
    init_test("map_filter_fold_compose");
    let harness = TestScope::new();
    let ctx = harness.context();

    let sum = harness
        .block_on(
            flow_of([1u32, 2, 3, 4, 5])
                .filter(|v| v % 2 == 0)
                .map(|v| v * 10)
                .fold(&ctx, 0u32, |acc, v| acc + v),
        )
        .expect("fold");
    assert_eq!(sum, 60);
    trace_test_ok!("map_filter_fold_compose");
}

#[test]
fn scan_emits_init_then_accumulations() {
    init_test("scan_emits_init_then_accumulations");
    let harness = TestScope::new();
    let ctx = harness.context();

    let sums = harness
        .block_on(flow_of([1u32, 2, 3]).scan(0u32, |acc, v| acc + v).collect_values(&ctx))
        .expect("collect");
    assert_eq!(sums, vec![0, 1, 3, 6]);
    trace_test_ok!("scan_emits_init_then_accumulations");
}

#[test]
fn take_zero_is_empty_without_touching_upstream() {
    init_test("take_zero_is_empty_without_touching_upstream");
    let harness = TestScope::new();
    let ctx = harness.context();

    let produced = Arc::new(AtomicU32::new(0));
    let upstream = {
        let produced = Arc::clone(&produced);
        flow(move |collector, _ctx| {
            let produced = Arc::clone(&produced);
            async move {
                produced.fetch_add(1, Ordering::SeqCst);
                collector.emit(1).await?;
                Ok(())
            }
        })
    };

    let values = harness
        .block_on(upstream.take(0).collect_values(&ctx))
        .expect("collect");
    assert!(values.is_empty());
    assert_eq!(produced.load(Ordering::SeqCst), 0);
    trace_test_ok!("take_zero_is_empty_without_touching_upstream");
}

#[test]
fn take_skip_and_friends_select_the_window() {
    init_test("take_skip_and_friends_select_the_window");
    let harness = TestScope::new();
    let ctx = harness.context();

    let window = harness
        .block_on(
            flow_of([1u32, 2, 3, 4, 5, 6, 7, 8])
                .skip(2)
                .take(4)
                .collect_values(&ctx),
        )
        .expect("collect");
    assert_eq!(window, vec![3, 4, 5, 6]);

    let while_small = harness
        .block_on(
            flow_of([1u32, 2, 9, 1])
                .take_while(|v| *v < 5)
                .collect_values(&ctx),
        )
        .expect("collect");
    assert_eq!(while_small, vec![1, 2]);

    let after_small = harness
        .block_on(
            flow_of([1u32, 2, 9, 1])
                .skip_while(|v| *v < 5)
                .collect_values(&ctx),
        )
        .expect("collect");
    assert_eq!(after_small, vec![9, 1]);
    trace_test_ok!("take_skip_and_friends_select_the_window");
}

#[test]
fn distinct_until_changed_never_repeats_adjacent_values() {
    init_test("distinct_until_changed_never_repeats_adjacent_values");
    let harness = TestScope::new();
    let ctx = harness.context();

    let distinct = harness
        .block_on(
            flow_of([1u32, 1, 2, 2, 2, 1, 3, 3])
                .distinct_until_changed()
                .collect_values(&ctx),
        )
        .expect("collect");
    assert_eq!(distinct, vec![1, 2, 1, 3]);
    for pair in distinct.windows(2) {
        assert_ne!(pair[0], pair[1]);
    }
    trace_test_ok!("distinct_until_changed_never_repeats_adjacent_values");
}

#[test]
fn combine_waits_for_both_then_fires_per_emission() {
    init_test("combine_waits_for_both_then_fires_per_emission");
    let harness = TestScope::new();
    let ctx = harness.context();

    let left = flow(|collector, ctx| async move {
        collector.emit(1u32).await?;
        ctx.sleep(Duration::from_millis(30)).await?;
        collector.emit(2).await?;
        Ok(())
    });
    let right = flow(|collector, ctx| async move {
        ctx.sleep(Duration::from_millis(10)).await?;
        collector.emit(10u32).await?;
        ctx.sleep(Duration::from_millis(50)).await?;
        collector.emit(20).await?;
        Ok(())
    });

    let combined = harness
        .block_on(
            left.combine(right, |l, r| l + r).collect_values(&ctx),
        )
        .expect("collect");
    // (1,10) fires when the right side first emits; (2,10) when the left
    // side updates; the right side's 20 arrives after the left ended.
    assert_eq!(combined, vec![11, 12]);
    trace_test_ok!("combine_waits_for_both_then_fires_per_emission");
}

#[test]
fn merge_interleaves_and_preserves_per_source_order() {
    init_test("merge_interleaves_and_preserves_per_source_order");
    let harness = TestScope::new();
    let ctx = harness.context();

    let evens = flow_of([0u32, 2, 4]);
    let odds = flow_of([1u32, 3, 5]);
    let mut merged = harness
        .block_on(merge(vec![evens, odds]).collect_values(&ctx))
        .expect("collect");

    let even_positions: Vec<_> = merged.iter().filter(|v| *v % 2 == 0).copied().collect();
    let odd_positions: Vec<_> = merged.iter().filter(|v| *v % 2 == 1).copied().collect();
    assert_eq!(even_positions, vec![0, 2, 4]);
    assert_eq!(odd_positions, vec![1, 3, 5]);
    merged.sort_unstable();
    assert_eq!(merged, vec![0, 1, 2, 3, 4, 5]);
    trace_test_ok!("merge_interleaves_and_preserves_per_source_order");
}

#[test]
fn flat_map_concat_drains_each_inner_flow_in_turn() {
    init_test("flat_map_concat_drains_each_inner_flow_in_turn");
    let harness = TestScope::new();
    let ctx = harness.context();

    let values = harness
        .block_on(
            flow_of([1u32, 2, 3])
                .flat_map_concat(|v| flow_of([v * 10, v * 10 + 1]))
                .collect_values(&ctx),
        )
        .expect("collect");
    assert_eq!(values, vec![10, 11, 20, 21, 30, 31]);
    trace_test_ok!("flat_map_concat_drains_each_inner_flow_in_turn");
}

#[test]
fn flat_map_merge_interleaves_inner_flows() {
    init_test("flat_map_merge_interleaves_inner_flows");
    let harness = TestScope::new();
    let ctx = harness.context();

    let mut values = harness
        .block_on(
            flow_of([1u32, 2, 3, 4])
                .flat_map_merge(2, |v| flow_of([v, v + 100]))
                .collect_values(&ctx),
        )
        .expect("collect");
    values.sort_unstable();
    assert_eq!(values, vec![1, 2, 3, 4, 101, 102, 103, 104]);
    trace_test_ok!("flat_map_merge_interleaves_inner_flows");
}

#[test]
fn buffer_decouples_and_conflate_keeps_the_latest() {
    init_test("buffer_decouples_and_conflate_keeps_the_latest");
    let harness = TestScope::new();
    let ctx = harness.context();

    let buffered = harness
        .block_on(flow_of([1u32, 2, 3, 4]).buffer(2).collect_values(&ctx))
        .expect("collect");
    assert_eq!(buffered, vec![1, 2, 3, 4]);

    // A burst producer against a conflating consumer: only the newest
    // value of each burst survives.
    let conflated = harness
        .block_on(flow_of([1u32, 2, 3, 4, 5]).conflate().collect_values(&ctx))
        .expect("collect");
    assert_eq!(conflated, vec![5]);
    trace_test_ok!("buffer_decouples_and_conflate_keeps_the_latest");
}

#[test]
fn debounce_emits_only_after_quiet_time() {
    init_test("debounce_emits_only_after_quiet_time");
    let harness = TestScope::new();
    let ctx = harness.context();

    // Bursts at t=0,20,40; quiet until 140; a lone value at 200.
    let source = flow(|collector, ctx| async move {
        collector.emit(1u32).await?;
        ctx.sleep(Duration::from_millis(20)).await?;
        collector.emit(2).await?;
        ctx.sleep(Duration::from_millis(20)).await?;
        collector.emit(3).await?;
        ctx.sleep(Duration::from_millis(160)).await?;
        collector.emit(4).await?;
        Ok(())
    });

    let emitted = Arc::new(Mutex::new(Vec::new()));
    {
        let emitted = Arc::clone(&emitted);
        let debounced = source.debounce(Duration::from_millis(100));
        harness
            .scope()
            .launch(move |ctx| async move {
                debounced
                    .collect(&ctx, |v| emitted.lock().unwrap().push((v, ctx.now())))
                    .await
            })
            .expect("launch collector");
    }

    harness.advance_time_by(Duration::from_millis(150));
    // Only the burst's last value, 100ms after it arrived at t=40.
    assert_eq!(
        emitted.lock().unwrap().clone(),
        vec![(3, coroscope::Time::from_millis(140))]
    );

    harness.advance_time_by(Duration::from_millis(400));
    let final_values: Vec<u32> = emitted.lock().unwrap().iter().map(|(v, _)| *v).collect();
    assert_eq!(final_values, vec![3, 4]);
    trace_test_ok!("debounce_emits_only_after_quiet_time");
}

#[test]
fn sample_skips_ticks_without_fresh_elements() {
    init_test("sample_skips_ticks_without_fresh_elements");
    let harness = TestScope::new();

    let source = flow(|collector, ctx| async move {
        collector.emit(1u32).await?;
        ctx.sleep(Duration::from_millis(30)).await?;
        collector.emit(2).await?;
        // Quiet for several ticks, then one more element.
        ctx.sleep(Duration::from_millis(170)).await?;
        collector.emit(3).await?;
        ctx.sleep(Duration::from_millis(40)).await?;
        Ok(())
    });

    let emitted: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let emitted = Arc::clone(&emitted);
        let sampled = source.sample(Duration::from_millis(50));
        harness
            .scope()
            .launch(move |ctx| async move {
                sampled
                    .collect(&ctx, |v| emitted.lock().unwrap().push(v))
                    .await
            })
            .expect("launch collector");
    }

    assert!(harness.run_until_idle());
    assert_eq!(*emitted.lock().unwrap(), vec![2, 3]);
    trace_test_ok!("sample_skips_ticks_without_fresh_elements");
}

#[test]
fn catch_switches_to_the_fallback_flow() {
    init_test("catch_switches_to_the_fallback_flow");
    let harness = TestScope::new();
    let ctx = harness.context();

    let source: Flow<u32> = flow(|collector, _ctx| async move {
        collector.emit(1).await?;
        Err(Error::msg("upstream broke"))
    });

    let values = harness
        .block_on(
            source
                .catch(|error| {
                    assert_eq!(error.context(), Some("upstream broke"));
                    flow_of([98u32, 99])
                })
                .collect_values(&ctx),
        )
        .expect("collect");
    assert_eq!(values, vec![1, 98, 99]);
    trace_test_ok!("catch_switches_to_the_fallback_flow");
}

#[test]
fn retry_restarts_the_producer_with_backoff() {
    init_test("retry_restarts_the_producer_with_backoff");
    let harness = TestScope::new();
    let attempts = Arc::new(AtomicU32::new(0));

    let source = {
        let attempts = Arc::clone(&attempts);
        flow(move |collector, _ctx| {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                collector.emit(attempt).await?;
                if attempt < 3 {
                    return Err(Error::msg("flaky"));
                }
                Ok(())
            }
        })
    };

    let collected: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let collected = Arc::clone(&collected);
        let retried = source.retry(3);
        harness
            .scope()
            .launch(move |ctx| async move {
                retried
                    .collect(&ctx, |v| collected.lock().unwrap().push(v))
                    .await
            })
            .expect("launch collector");
    }

    // Backoff: 100ms after the first failure, 200ms after the second.
    assert!(harness.run_until_idle());
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(*collected.lock().unwrap(), vec![1, 2, 3]);
    trace_test_ok!("retry_restarts_the_producer_with_backoff");
}

#[test]
fn retry_gives_up_after_the_attempt_budget() {
    init_test("retry_gives_up_after_the_attempt_budget");
    let harness = TestScope::new();
    let attempts = Arc::new(AtomicU32::new(0));

    let source: Flow<u32> = {
        let attempts = Arc::clone(&attempts);
        flow(move |_collector, _ctx| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async move { Err(Error::msg("always broken")) }
        })
    };

    let outcome: Arc<Mutex<Option<Error>>> = Arc::new(Mutex::new(None));
    {
        let outcome = Arc::clone(&outcome);
        let retried = source.retry(2);
        harness
            .scope()
            .launch(move |ctx| async move {
                if let Err(error) = retried.collect(&ctx, |_| {}).await {
                    *outcome.lock().unwrap() = Some(error);
                }
                Ok(())
            })
            .expect("launch collector");
    }

    assert!(harness.run_until_idle());
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(
        outcome.lock().unwrap().as_ref().and_then(|e| e.context()),
        Some("always broken")
    );
    trace_test_ok!("retry_gives_up_after_the_attempt_budget");
}

#[test]
fn lifecycle_hooks_fire_in_the_right_places() {
    init_test("lifecycle_hooks_fire_in_the_right_places");
    let harness = TestScope::new();
    let ctx = harness.context();
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let observed = {
        let log = Arc::clone(&log);
        let log_start = Arc::clone(&log);
        let log_each = Arc::clone(&log);
        let log_done = Arc::clone(&log);
        flow_of([1u32, 2])
            .on_start(move || log_start.lock().unwrap().push("start".into()))
            .on_each(move |v| log_each.lock().unwrap().push(format!("each-{v}")))
            .on_completion(move |err| {
                assert!(err.is_none());
                log_done.lock().unwrap().push("done".into());
            })
    };
    harness
        .block_on(observed.collect(&ctx, |_| {}))
        .expect("collect");
    assert_eq!(
        *log.lock().unwrap(),
        vec!["start", "each-1", "each-2", "done"]
    );

    let empty_hits = Arc::new(AtomicU32::new(0));
    {
        let empty_hits = Arc::clone(&empty_hits);
        let empty_flow = coroscope::flow::empty::<u32>()
            .on_empty(move || {
                empty_hits.fetch_add(1, Ordering::SeqCst);
            });
        harness
            .block_on(empty_flow.collect(&ctx, |_| {}))
            .expect("collect");
    }
    assert_eq!(empty_hits.load(Ordering::SeqCst), 1);

    let completion_error: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    {
        let completion_error = Arc::clone(&completion_error);
        let failing: Flow<u32> = flow(|_collector, _ctx| async move {
            Err(Error::msg("terminal error"))
        });
        let watched = failing.on_completion(move |err| {
            *completion_error.lock().unwrap() =
                err.and_then(|e| e.context().map(String::from));
        });
        let result = harness.block_on(watched.collect(&ctx, |_| {}));
        assert!(result.is_err());
    }
    assert_eq!(
        completion_error.lock().unwrap().as_deref(),
        Some("terminal error")
    );
    trace_test_ok!("lifecycle_hooks_fire_in_the_right_places");
}

#[test]
fn collection_is_cancelled_with_the_task() {
    init_test("collection_is_cancelled_with_the_task");
    let harness = TestScope::new();
    let seen: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));

    let endless = flow(|collector, ctx| async move {
        let mut i = 0u32;
        loop {
            collector.emit(i).await?;
            i += 1;
            ctx.sleep(Duration::from_millis(10)).await?;
        }
    });

    {
        let seen = Arc::clone(&seen);
        harness
            .scope()
            .launch(move |ctx| async move {
                endless
                    .collect(&ctx, |v| seen.lock().unwrap().push(v))
                    .await
            })
            .expect("launch collector");
    }

    harness.advance_time_by(Duration::from_millis(35));
    harness.scope().cancel();
    harness.advance_time_by(Duration::from_millis(50));

    let count_at_cancel = seen.lock().unwrap().len();
    assert!(count_at_cancel >= 3);
    harness.advance_time_by(Duration::from_millis(50));
    assert_eq!(seen.lock().unwrap().len(), count_at_cancel);
    trace_test_ok!("collection_is_cancelled_with_the_task");
}
