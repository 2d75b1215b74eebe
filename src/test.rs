use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

use crate::guard::{GuardOutcome, TimeoutGuard};
use crate::handle::{ConnectionHandle, HandleSlot};
use crate::message::{Disposition, Message, StatusCode};
use crate::operation::{OperationState, Probe};
use crate::params::{ConnectionParameters, Protocol};
use crate::reporter::{Channel, ChannelReporter, Report};
use crate::stopper::Stopper;
use crate::transport::memory::{MemoryHub, MemorySession};
use crate::transport::DeviceSession;

const TIMEOUT: Duration = Duration::from_secs(1);

fn params() -> ConnectionParameters {
    ConnectionParameters::new("hub1", "dev1", "key1", Protocol::Https)
}

fn setup() -> (MemoryHub, Probe<MemoryHub>, UnboundedReceiver<Report>) {
    let hub = MemoryHub::new("hub1");
    hub.register_device("dev1", "key1");
    let (reporter, reports) = ChannelReporter::new();
    let probe = Probe::new(hub.clone(), reporter).with_timeout(TIMEOUT);
    (hub, probe, reports)
}

fn send_report(text: &str) -> Report {
    Report { channel: Channel::Send, text: text.into() }
}

fn receive_report(text: &str) -> Report {
    Report { channel: Channel::Receive, text: text.into() }
}

#[tokio::test(start_paused = true)]
async fn test_send_reports_acknowledgement() {
    let (hub, probe, mut reports) = setup();

    let task = probe.send(params(), "hello");

    assert_eq!(
        send_report("IoT Hub responded to message 'hello' with status OK"),
        reports.recv().await.unwrap()
    );
    assert_eq!(1, hub.telemetry("dev1").len());
    assert_eq!("hello", hub.telemetry("dev1")[0].body_as_text());

    task.join().await.unwrap();
    assert!(reports.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_send_reports_rejection_status_as_text() {
    let (hub, probe, mut reports) = setup();
    hub.set_ack_status(StatusCode::Throttled);

    let _task = probe.send(params(), "hello");

    assert_eq!(
        send_report("IoT Hub responded to message 'hello' with status THROTTLED"),
        reports.recv().await.unwrap()
    );
}

#[tokio::test(start_paused = true)]
async fn test_open_failure_reports_once_and_sends_nothing() {
    let (hub, probe, mut reports) = setup();
    let wrong_key = ConnectionParameters::new("hub1", "dev1", "nope", Protocol::Https);

    let mut task = probe.send(wrong_key, "hello");

    assert_eq!(OperationState::OpenFailed, task.wait_for_state(|s| s.is_terminal()).await.unwrap());
    let report = reports.recv().await.unwrap();
    assert_eq!(Channel::Send, report.channel);
    assert!(report.text.contains("Invalid key for device dev1"), "{}", &report.text);

    assert!(task.handle().is_none());
    task.join().await.unwrap();

    assert!(reports.try_recv().is_err());
    assert_eq!(0, hub.sessions_opened("dev1"));
    assert!(hub.telemetry("dev1").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_open_failure_on_receive_reports_on_receive_channel() {
    let (hub, probe, mut reports) = setup();
    hub.set_offline(true);

    let task = probe.receive(params());

    let report = reports.recv().await.unwrap();
    assert_eq!(Channel::Receive, report.channel);
    assert!(report.text.contains("network unreachable"), "{}", &report.text);

    task.join().await.unwrap();
    assert!(reports.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_malformed_credentials_fail_open() {
    let (_hub, probe, mut reports) = setup();
    let no_device = ConnectionParameters::new("hub1", "", "key1", Protocol::Https);

    let _task = probe.send(no_device, "hello");

    let report = reports.recv().await.unwrap();
    assert!(report.text.contains("Missing DeviceId"), "{}", &report.text);
}

#[tokio::test(start_paused = true)]
async fn test_send_dispatch_failure_is_reported_and_guard_still_closes() {
    let (hub, probe, mut reports) = setup();
    hub.set_fail_sends(true);

    let mut task = probe.send(params(), "hello");

    let report = reports.recv().await.unwrap();
    assert_eq!(Channel::Send, report.channel);
    assert!(report.text.starts_with("Send failed:"), "{}", &report.text);
    assert!(task.handle().is_some());

    task.wait_for_state(|s| s == OperationState::Closed).await.unwrap();
    task.join().await.unwrap();
    assert_eq!(1, hub.sessions_closed("dev1"));
    assert!(reports.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_guard_closes_within_timeout_exactly_once() {
    let (hub, probe, _reports) = setup();
    let started = Instant::now();

    let mut task = probe.send(params(), "hello");
    task.wait_for_state(|s| s == OperationState::Closed).await.unwrap();

    let elapsed = started.elapsed();
    assert!(elapsed >= TIMEOUT, "{:?}", elapsed);
    assert!(elapsed < TIMEOUT + Duration::from_millis(50), "{:?}", elapsed);

    let handle = task.handle().unwrap();
    task.join().await.unwrap();

    assert!(handle.is_closed());
    assert_eq!(1, hub.sessions_opened("dev1"));
    assert_eq!(1, hub.sessions_closed("dev1"));
}

#[tokio::test(start_paused = true)]
async fn test_state_progression_for_send() {
    let (_hub, probe, mut reports) = setup();

    let mut task = probe.send(params(), "hello");
    assert_eq!(
        OperationState::CallbackReceived,
        task.wait_for_state(|s| s == OperationState::CallbackReceived).await.unwrap()
    );
    reports.recv().await.unwrap();
    assert_eq!(
        OperationState::Closed,
        task.wait_for_state(|s| s == OperationState::Closed).await.unwrap()
    );
}

#[tokio::test(start_paused = true)]
async fn test_acknowledgement_after_close_is_reported_not_fatal() {
    let (hub, probe, mut reports) = setup();
    hub.set_ack_delay(TIMEOUT * 5);

    let task = probe.send(params(), "late");
    task.join().await.unwrap();

    assert_eq!(
        send_report("IoT Hub responded to message 'late' with status MESSAGE_CANCELLED_ONCLOSE"),
        reports.recv().await.unwrap()
    );
    assert!(reports.try_recv().is_err());
    assert!(hub.telemetry("dev1").is_empty());

    // the hub's own timer for the cancelled message runs out harmlessly
    tokio::time::sleep(TIMEOUT * 5).await;
    assert!(reports.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_stop_reports_acknowledgement_cancelled_by_close() {
    let (hub, probe, mut reports) = setup();
    hub.set_ack_delay(TIMEOUT * 5);

    let mut task = probe.send(params(), "pending");
    task.wait_for_state(|s| s == OperationState::AwaitingCallback).await.unwrap();
    task.stop().await.unwrap();

    assert_eq!(
        send_report("IoT Hub responded to message 'pending' with status MESSAGE_CANCELLED_ONCLOSE"),
        reports.try_recv().unwrap()
    );

    tokio::time::sleep(TIMEOUT * 10).await;
    assert!(reports.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_stop_reports_every_completed_delivery() {
    let (hub, probe, mut reports) = setup();

    let mut task = probe.receive(params());
    task.wait_for_state(|s| s == OperationState::AwaitingCallback).await.unwrap();

    for text in ["one", "two", "three"] {
        hub.send_to_device("dev1", Message::new(text)).unwrap();
    }
    while hub.dispositions("dev1").len() < 3 {
        tokio::task::yield_now().await;
    }
    task.stop().await.unwrap();

    assert_eq!(receive_report("one"), reports.try_recv().unwrap());
    assert_eq!(receive_report("two"), reports.try_recv().unwrap());
    assert_eq!(receive_report("three"), reports.try_recv().unwrap());
    assert!(reports.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_receive_reports_each_delivery_in_order() {
    let (hub, probe, mut reports) = setup();

    let mut task = probe.receive(params());
    task.wait_for_state(|s| s == OperationState::AwaitingCallback).await.unwrap();

    for text in ["one", "two", "three"] {
        hub.send_to_device("dev1", Message::new(text)).unwrap();
    }

    assert_eq!(receive_report("one"), reports.recv().await.unwrap());
    assert_eq!(receive_report("two"), reports.recv().await.unwrap());
    assert_eq!(receive_report("three"), reports.recv().await.unwrap());
    assert_eq!(OperationState::CallbackReceived, task.state());

    task.stop().await.unwrap();

    assert!(reports.try_recv().is_err());
    assert_eq!(vec![Disposition::Complete; 3], hub.dispositions("dev1"));
    assert_eq!(1, hub.sessions_closed("dev1"));
}

#[tokio::test(start_paused = true)]
async fn test_receive_picks_up_messages_queued_before_listening() {
    let (hub, probe, mut reports) = setup();
    hub.send_to_device("dev1", Message::new("early")).unwrap();

    let _task = probe.receive(params());

    assert_eq!(receive_report("early"), reports.recv().await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_queued_messages_are_delivered_before_later_ones() {
    let (hub, _probe, _reports) = setup();
    let handle = ConnectionHandle::open(&hub, &params()).await.unwrap();

    let injector = {
        let hub = hub.clone();
        tokio::spawn(async move {
            for i in 0..200 {
                hub.send_to_device("dev1", Message::new(i.to_string())).unwrap();
            }
        })
    };

    let (delivered, mut deliveries) = tokio::sync::mpsc::unbounded_channel();
    handle
        .session()
        .set_message_callback(Box::new(move |message: Message| {
            let _ = delivered.send(message.body_as_text());
            Disposition::Complete
        }))
        .unwrap();
    injector.await.unwrap();

    for i in 0..200 {
        assert_eq!(i.to_string(), deliveries.recv().await.unwrap());
    }
    handle.close();
}

#[tokio::test(start_paused = true)]
async fn test_receive_stops_reporting_after_timeout() {
    let (hub, probe, mut reports) = setup();

    let task = probe.receive(params());
    task.join().await.unwrap();

    hub.send_to_device("dev1", Message::new("too late")).unwrap();
    tokio::time::sleep(TIMEOUT).await;

    assert!(reports.try_recv().is_err());
    assert!(hub.dispositions("dev1").is_empty());

    // the message waits for the next listener
    let _task = probe.receive(params());
    assert_eq!(receive_report("too late"), reports.recv().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_receive_without_protocol_defaults_to_https() {
    let (_hub, probe, _reports) = setup();
    let params = ConnectionParameters::from_fields("hub1", "dev1", "key1", None);

    let mut task = probe.receive(params);
    task.wait_for_state(|s| s == OperationState::AwaitingCallback).await.unwrap();

    assert_eq!(Protocol::Https, task.handle().unwrap().session().protocol());
    task.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_before_timeout() {
    let (hub, probe, _reports) = setup();
    let started = Instant::now();

    let mut task = probe.receive(params());
    task.wait_for_state(|s| s == OperationState::AwaitingCallback).await.unwrap();
    let handle = task.handle().unwrap();
    task.stop().await.unwrap();

    assert!(started.elapsed() < TIMEOUT);
    assert!(handle.is_closed());
    assert_eq!(1, hub.sessions_closed("dev1"));
}

#[tokio::test(start_paused = true)]
async fn test_guard_fired_before_open_leaves_client_open() {
    let (hub, probe, _reports) = setup();
    hub.set_open_delay(TIMEOUT * 2);

    let mut task = probe.receive(params());
    task.wait_for_state(|s| s == OperationState::AwaitingCallback).await.unwrap();

    // the guard read an empty slot when it fired
    assert!(!task.handle().unwrap().is_closed());
    assert_eq!(0, hub.sessions_closed("dev1"));

    task.stop().await.unwrap();
    assert_eq!(1, hub.sessions_closed("dev1"));
}

#[tokio::test]
async fn test_close_twice_is_a_no_op() {
    let (hub, _probe, _reports) = setup();

    let handle = ConnectionHandle::open(&hub, &params()).await.unwrap();
    assert!(handle.close());
    assert!(!handle.close());
    assert!(handle.is_closed());
    assert_eq!(1, hub.sessions_closed("dev1"));
}

#[tokio::test]
async fn test_closing_empty_slot_is_a_no_op() {
    let slot = HandleSlot::<MemorySession>::new();
    assert!(!slot.close());
    assert!(slot.get().is_none());
}

#[tokio::test]
async fn test_close_failure_is_swallowed() {
    let (hub, _probe, mut reports) = setup();
    hub.set_fail_close(true);

    let handle = ConnectionHandle::open(&hub, &params()).await.unwrap();
    assert!(handle.close());
    assert!(handle.is_closed());
    assert!(reports.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_close_tears_down_once() {
    let (hub, _probe, _reports) = setup();
    let handle = ConnectionHandle::open(&hub, &params()).await.unwrap();

    let closers = (0..16)
        .map(|_| {
            let handle = handle.clone();
            tokio::spawn(async move { handle.close() })
        })
        .collect::<Vec<_>>();

    let mut teardowns = 0;
    for closer in closers {
        if closer.await.unwrap() {
            teardowns += 1;
        }
    }

    assert_eq!(1, teardowns);
    assert_eq!(1, hub.sessions_closed("dev1"));
}

#[tokio::test]
async fn test_slot_fills_once() {
    let (hub, _probe, _reports) = setup();
    let slot = HandleSlot::new();

    slot.fill(ConnectionHandle::open(&hub, &params()).await.unwrap()).unwrap();
    let second = ConnectionHandle::open(&hub, &params()).await.unwrap();
    assert!(slot.fill(second).is_err());
}

#[tokio::test(start_paused = true)]
async fn test_guard_reads_slot_at_fire_time() {
    let (hub, _probe, _reports) = setup();
    let slot = HandleSlot::new();

    let guard = TimeoutGuard::arm(slot.clone(), TIMEOUT);

    tokio::time::sleep(TIMEOUT / 2).await;
    let handle = ConnectionHandle::open(&hub, &params()).await.unwrap();
    slot.fill(handle.clone()).unwrap();
    assert!(!handle.is_closed());

    assert_eq!(GuardOutcome::Expired { closed: true }, guard.outcome().await.unwrap());
    assert!(handle.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_guard_with_empty_slot_does_nothing() {
    let slot = HandleSlot::<MemorySession>::new();
    let guard = TimeoutGuard::arm(slot, TIMEOUT);
    assert_eq!(GuardOutcome::Expired { closed: false }, guard.outcome().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_guard_on_already_closed_handle_does_nothing() {
    let (hub, _probe, _reports) = setup();
    let slot = HandleSlot::new();
    let handle = ConnectionHandle::open(&hub, &params()).await.unwrap();
    slot.fill(handle.clone()).unwrap();
    handle.close();

    let guard = TimeoutGuard::arm(slot, TIMEOUT);
    assert_eq!(GuardOutcome::Expired { closed: false }, guard.outcome().await.unwrap());
    assert_eq!(1, hub.sessions_closed("dev1"));
}

#[tokio::test(start_paused = true)]
async fn test_stopped_guard_never_closes() {
    let (hub, _probe, _reports) = setup();
    let slot = HandleSlot::new();
    let handle = ConnectionHandle::open(&hub, &params()).await.unwrap();
    slot.fill(handle.clone()).unwrap();

    let guard = TimeoutGuard::arm(slot, TIMEOUT);
    guard.stop().await.unwrap();

    tokio::time::sleep(TIMEOUT * 2).await;
    assert!(!handle.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_dropped_guard_still_fires() {
    let (hub, _probe, _reports) = setup();
    let slot = HandleSlot::new();
    let handle = ConnectionHandle::open(&hub, &params()).await.unwrap();
    slot.fill(handle.clone()).unwrap();

    drop(TimeoutGuard::arm(slot, TIMEOUT));

    tokio::time::sleep(TIMEOUT * 2).await;
    assert!(handle.is_closed());
}
