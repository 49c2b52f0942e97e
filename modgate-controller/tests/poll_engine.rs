//! Poll engine behaviour against the in-memory transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use modgate_controller::{
    ChangeDetection, Controller, ControllerConfig, CycleOutcome, MockTransport, Operation,
    PollExit, PollState, Tag, TagValue, TransportCall, UpdatePolicy,
};

fn config(max_attempts: u32) -> ControllerConfig {
    ControllerConfig {
        polling: Duration::ZERO,
        read_period: Duration::ZERO,
        error_settle: Duration::ZERO,
        max_attempts,
    }
}

fn setup(max_attempts: u32, tags: Vec<Tag>) -> (Controller, MockTransport) {
    let mock = MockTransport::new();
    let mut controller = Controller::new(config(max_attempts), mock.clone()).unwrap();
    for tag in tags {
        controller.add_tag(tag).unwrap();
    }
    mock.clear_calls();
    (controller, mock)
}

/// Change detection that counts accepted updates.
#[derive(Debug, Default)]
struct CountingPolicy {
    updates: AtomicUsize,
}

impl UpdatePolicy for CountingPolicy {
    fn apply(
        &self,
        tag: &Tag,
        last: &mut Option<TagValue>,
        fresh: TagValue,
        request: u64,
    ) -> bool {
        let updated = ChangeDetection.apply(tag, last, fresh, request);
        if updated {
            self.updates.fetch_add(1, Ordering::SeqCst);
        }
        updated
    }
}

#[test]
fn test_exhausted_budget_closes_transport_last() {
    let (controller, mock) = setup(3, vec![Tag::new("a", 1, Operation::READ_UINT)]);
    mock.fail_reads(true);

    let exit = controller.poll();

    assert_eq!(exit, PollExit::AttemptsExhausted { attempts: 3 });
    assert_eq!(controller.state(), PollState::Stopped);
    assert_eq!(mock.count(TransportCall::Open), 3);
    assert_eq!(mock.count(TransportCall::ReadU16(1)), 4);
    assert_eq!(mock.calls().last(), Some(&TransportCall::Close));
    assert_eq!(controller.errors(), 4);
    assert_eq!(controller.requests(), 4);
    assert!(controller.is_closed());
}

#[test]
fn test_attempts_never_exceed_budget() {
    let max_attempts = 4;

    // Each pattern scripts (open fails, read fails) per cycle.
    let patterns: [&[(bool, bool)]; 4] = [
        &[(false, true)],
        &[(false, true), (false, true), (false, false)],
        &[(true, true), (false, true), (true, false)],
        &[(false, true), (false, true), (false, true), (true, true)],
    ];

    for pattern in patterns {
        let (controller, mock) = setup(max_attempts, vec![Tag::new("a", 1, Operation::READ_UINT)]);
        let mut engine = controller.engine().unwrap();

        for &(open_fails, read_fails) in pattern.iter().cycle().take(200) {
            if engine.stop_reason().is_some() {
                break;
            }
            mock.fail_open(open_fails);
            mock.fail_reads(read_fails);

            engine.run_cycle();
            assert!(engine.fail_attempts() <= max_attempts);
            assert_eq!(controller.fail_attempts(), engine.fail_attempts());
        }
    }
}

#[test]
fn test_successful_read_resets_attempts() {
    let (controller, mock) = setup(10, vec![Tag::new("a", 1, Operation::READ_UINT)]);
    let mut engine = controller.engine().unwrap();

    mock.fail_reads(true);
    for _ in 0..4 {
        engine.run_cycle();
    }
    assert_eq!(engine.fail_attempts(), 3);

    mock.fail_reads(false);
    assert_eq!(engine.run_cycle(), CycleOutcome::Completed { reads: 1 });
    assert_eq!(engine.fail_attempts(), 0);
    assert_eq!(controller.fail_attempts(), 0);
}

#[test]
fn test_error_closes_once_then_reopens_before_reading() {
    let (controller, mock) = setup(
        5,
        vec![
            Tag::new("a", 1, Operation::READ_UINT),
            Tag::new("b", 2, Operation::READ_UINT),
        ],
    );
    let mut engine = controller.engine().unwrap();

    mock.fail_next_reads(1);
    engine.run_cycle();
    engine.run_cycle();

    assert_eq!(
        mock.calls(),
        vec![
            TransportCall::ReadU16(1),
            TransportCall::Close,
            TransportCall::Open,
            TransportCall::ReadU16(1),
            TransportCall::ReadU16(2),
        ]
    );
}

#[test]
fn test_open_failures_do_not_consume_budget() {
    let (controller, mock) = setup(2, vec![Tag::new("a", 1, Operation::READ_UINT)]);
    mock.fail_reads(true);
    mock.fail_open(true);

    let controller = Arc::new(controller);
    let poller = {
        let controller = Arc::clone(&controller);
        thread::spawn(move || controller.poll())
    };

    thread::sleep(Duration::from_millis(50));
    assert_eq!(controller.fail_attempts(), 0);
    assert_eq!(controller.state(), PollState::AwaitingReconnect);

    controller.close();
    let exit = poller.join().unwrap();

    assert_eq!(exit, PollExit::Shutdown);
    assert_eq!(mock.calls().last(), Some(&TransportCall::Close));
}

#[test]
fn test_identical_readings_update_once() {
    let policy = Arc::new(CountingPolicy::default());
    let tag = Tag::new("a", 1, Operation::READ_UINT).with_policy(policy.clone());
    let (controller, mock) = setup(3, vec![tag]);
    let mut engine = controller.engine().unwrap();

    mock.set_u16(1, 42);
    engine.run_cycle();
    assert_eq!(policy.updates.load(Ordering::SeqCst), 1);

    engine.run_cycle();
    assert_eq!(policy.updates.load(Ordering::SeqCst), 1);

    mock.set_u16(1, 43);
    engine.run_cycle();
    assert_eq!(policy.updates.load(Ordering::SeqCst), 2);
    assert_eq!(controller.value("a"), Some(TagValue::Unsigned(43)));
}

#[test]
fn test_float_write_observed_after_one_cycle() {
    let tag = Tag::new("setpoint", 40, Operation::parse("read_float,write_float").unwrap());
    let (controller, mock) = setup(3, vec![tag]);

    let tag = controller.find_tag("setpoint").unwrap();
    controller.write_tag(tag, 21.5).unwrap();

    // Writes do not touch the last value.
    assert_eq!(controller.value("setpoint"), None);

    controller.engine().unwrap().run_cycle();

    assert_eq!(controller.value("setpoint"), Some(TagValue::Float(21.5)));
    assert_eq!(
        mock.calls(),
        vec![
            TransportCall::WriteF32(40, 21.5),
            TransportCall::ReadF32(40)
        ]
    );
}

#[test]
fn test_write_dispatch_follows_write_bits() {
    let (controller, mock) = setup(
        3,
        vec![
            Tag::new("u", 1, Operation::READ_FLOAT | Operation::WRITE_UINT),
            Tag::new("f", 2, Operation::READ_UINT | Operation::WRITE_FLOAT),
        ],
    );

    controller
        .write_tag(controller.find_tag("u").unwrap(), 7.5)
        .unwrap();
    controller
        .write_tag(controller.find_tag("f").unwrap(), 7.5)
        .unwrap();

    assert_eq!(
        mock.calls(),
        vec![
            TransportCall::WriteU16(1, 7),
            TransportCall::WriteF32(2, 7.5)
        ]
    );
}

#[test]
fn test_write_error_is_returned_without_retry() {
    let (controller, mock) = setup(3, vec![Tag::new("u", 1, Operation::WRITE_UINT)]);
    mock.fail_writes(true);

    let tag = controller.find_tag("u").unwrap();
    assert!(controller.write_tag(tag, 1.0).is_err());
    assert_eq!(mock.count(TransportCall::WriteU16(1, 1)), 1);
    assert_eq!(controller.errors(), 0);
}

#[test]
fn test_find_tag_absent() {
    let (controller, _) = setup(3, vec![Tag::new("a", 1, Operation::READ_UINT)]);
    assert!(controller.find_tag("nonexistent").is_none());

    let (empty, _) = setup(3, vec![]);
    assert!(empty.find_tag("nonexistent").is_none());
}

#[test]
fn test_writes_never_overlap_polling() {
    let mock = MockTransport::new().with_latency(Duration::from_millis(2));
    let mut controller = Controller::new(config(5), mock.clone()).unwrap();
    controller
        .add_tag(Tag::new("a", 1, Operation::READ_UINT | Operation::WRITE_UINT))
        .unwrap();
    controller
        .add_tag(Tag::new("b", 2, Operation::READ_FLOAT | Operation::WRITE_FLOAT))
        .unwrap();
    let controller = Arc::new(controller);

    let poller = {
        let controller = Arc::clone(&controller);
        thread::spawn(move || controller.poll())
    };

    let writers: Vec<_> = (0..4)
        .map(|i| {
            let controller = Arc::clone(&controller);
            thread::spawn(move || {
                for n in 0..10 {
                    let name = if (i + n) % 2 == 0 { "a" } else { "b" };
                    let tag = controller.find_tag(name).unwrap();
                    controller.write_tag(tag, f64::from(n)).unwrap();
                    let _ = controller.tags();
                }
            })
        })
        .collect();

    for writer in writers {
        writer.join().unwrap();
    }
    controller.close();
    assert_eq!(poller.join().unwrap(), PollExit::Shutdown);

    assert!(!mock.overlapped());
    assert_eq!(mock.count(TransportCall::Open), 1);
}
