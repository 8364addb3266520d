//! Hot holder semantics: broadcast fan-out, disposal, state replay.

use std::sync::{Arc, Mutex};

use coroscope::test_utils::init_logging;
use coroscope::{trace_test, trace_test_ok, SharedFlow, StateFlow, TestScope};

fn init_test(name: &str) {
    init_logging();
    trace_test!(name);
}

#[test]
fn broadcast_reaches_live_subscribers_only() {
    init_test("broadcast_reaches_live_subscribers_only");
    let events: SharedFlow<String> = SharedFlow::new();
    let s1_seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let s2_seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let s1 = {
        let seen = Arc::clone(&s1_seen);
        events.subscribe(move |v| seen.lock().unwrap().push(v))
    };
    let _s2 = {
        let seen = Arc::clone(&s2_seen);
        events.subscribe(move |v| seen.lock().unwrap().push(v))
    };

    events.emit("Event 1".to_string());
    s1.dispose();
    events.emit("Event 2".to_string());

    assert_eq!(*s1_seen.lock().unwrap(), vec!["Event 1".to_string()]);
    assert_eq!(
        *s2_seen.lock().unwrap(),
        vec!["Event 1".to_string(), "Event 2".to_string()]
    );
    trace_test_ok!("broadcast_reaches_live_subscribers_only");
}

#[test]
fn state_flow_replays_the_current_value_on_subscribe() {
    init_test("state_flow_replays_the_current_value_on_subscribe");
    let state = StateFlow::new(5u32);
    state.set(6);

    let seen: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
    let _sub = {
        let seen = Arc::clone(&seen);
        state.subscribe(move |v| seen.lock().unwrap().push(v))
    };
    state.set(7);

    // Only the latest value is replayed; earlier emissions are gone.
    assert_eq!(*seen.lock().unwrap(), vec![6, 7]);
    trace_test_ok!("state_flow_replays_the_current_value_on_subscribe");
}

#[test]
fn concurrent_updates_serialize_and_emit_in_order() {
    init_test("concurrent_updates_serialize_and_emit_in_order");
    let state = StateFlow::new(0u64);
    let emissions: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
    let _sub = {
        let emissions = Arc::clone(&emissions);
        state.subscribe(move |v| emissions.lock().unwrap().push(v))
    };

    let mut handles = Vec::new();
    for _ in 0..4 {
        let state = state.clone();
        handles.push(std::thread::spawn(move || {
            for _ in 0..50 {
                state.update(|v| v + 1);
            }
        }));
    }
    for handle in handles {
        handle.join().expect("updater panicked");
    }

    assert_eq!(state.value(), 200);
    let emissions = emissions.lock().unwrap();
    // The initial replay plus one emission per update, strictly
    // increasing because updates hold the set lock through emission.
    assert_eq!(emissions.len(), 201);
    for pair in emissions.windows(2) {
        assert!(pair[0] < pair[1]);
    }
    trace_test_ok!("concurrent_updates_serialize_and_emit_in_order");
}

#[test]
fn shared_flow_as_flow_sees_only_emissions_while_collecting() {
    init_test("shared_flow_as_flow_sees_only_emissions_while_collecting");
    let harness = TestScope::new();
    let events: SharedFlow<u32> = SharedFlow::new();
    let collected: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));

    events.emit(1); // before any collector: lost

    {
        let collected = Arc::clone(&collected);
        let as_flow = events.as_flow();
        harness
            .scope()
            .launch(move |ctx| async move {
                as_flow
                    .take(2)
                    .collect(&ctx, |v| collected.lock().unwrap().push(v))
                    .await
            })
            .expect("launch collector");
    }

    events.emit(2);
    harness.dispatcher().drain();
    events.emit(3);
    harness.dispatcher().drain();
    events.emit(4); // after take(2) finished: ignored
    harness.dispatcher().drain();

    assert!(harness.run_until_idle());
    assert_eq!(*collected.lock().unwrap(), vec![2, 3]);
    trace_test_ok!("shared_flow_as_flow_sees_only_emissions_while_collecting");
}

#[test]
fn state_flow_as_flow_yields_current_then_updates() {
    init_test("state_flow_as_flow_yields_current_then_updates");
    let harness = TestScope::new();
    let state = StateFlow::new(10u32);
    let collected: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));

    {
        let collected = Arc::clone(&collected);
        let as_flow = state.as_flow();
        harness
            .scope()
            .launch(move |ctx| async move {
                as_flow
                    .take(3)
                    .collect(&ctx, |v| collected.lock().unwrap().push(v))
                    .await
            })
            .expect("launch collector");
    }

    state.set(11);
    harness.dispatcher().drain();
    state.set(12);
    harness.dispatcher().drain();

    assert!(harness.run_until_idle());
    assert_eq!(*collected.lock().unwrap(), vec![10, 11, 12]);
    trace_test_ok!("state_flow_as_flow_yields_current_then_updates");
}

#[test]
fn subscriber_count_tracks_subscriptions() {
    init_test("subscriber_count_tracks_subscriptions");
    let events: SharedFlow<u32> = SharedFlow::new();
    assert_eq!(events.subscriber_count(), 0);
    let a = events.subscribe(|_| {});
    let b = events.subscribe(|_| {});
    assert_eq!(events.subscriber_count(), 2);
    drop(a);
    assert_eq!(events.subscriber_count(), 1);
    b.dispose();
    assert_eq!(events.subscriber_count(), 0);
    trace_test_ok!("subscriber_count_tracks_subscriptions");
}
