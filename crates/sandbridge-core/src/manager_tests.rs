use super::*;
use crate::testing::RecordingTransport;
use std::sync::Barrier;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

fn unbuffered() -> BridgeConfig {
    BridgeConfig {
        buffer_until_handshake: false,
        ..BridgeConfig::default()
    }
}

fn manager() -> ClientManager {
    ClientManager::new(unbuffered())
}

fn register(manager: &ClientManager, id: &str) -> Arc<RecordingTransport> {
    let transport = RecordingTransport::new();
    manager.register_client(id, transport.clone()).unwrap();
    transport
}

fn counter() -> (Arc<AtomicUsize>, impl Fn(&SandboxMessage) + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let inner = count.clone();
    (count, move |_: &SandboxMessage| {
        inner.fetch_add(1, Ordering::SeqCst);
    })
}

fn done() -> SandboxMessage {
    SandboxMessage::Done {
        compilation_error: false,
    }
}

fn tracked(manager: &ClientManager, id: &str) -> usize {
    manager.tracked_listener_ids(id).map_or(0, |ids| ids.len())
}

// --- Listener placement ---------------------------------------------------

#[test]
fn test_client_listener_added_before_client_exists() {
    let manager = manager();
    manager.add_listener(|_| {}, Some("client-id"));
    assert_eq!(manager.pending_listener_ids("client-id").len(), 1);

    register(&manager, "client-id");
    manager.run();

    assert_eq!(tracked(&manager, "client-id"), 1);
    assert!(manager.global_listener_ids().is_empty());
    assert!(manager.pending_listener_ids("client-id").is_empty());
    assert_eq!(manager.client_ids(), vec!["client-id"]);
    assert_eq!(manager.listener_count("client-id"), Some(1));
}

#[test]
fn test_global_listener_added_before_client_exists() {
    let manager = manager();
    manager.add_listener(|_| {}, None);

    register(&manager, "client-id");
    manager.run();

    assert_eq!(tracked(&manager, "client-id"), 1);
    assert_eq!(manager.global_listener_ids().len(), 1);
    assert_eq!(manager.listener_count("client-id"), Some(1));
}

#[test]
fn test_client_listener_added_after_client_exists() {
    let manager = manager();
    register(&manager, "client-id");
    manager.run();
    assert_eq!(tracked(&manager, "client-id"), 0);

    manager.add_listener(|_| {}, Some("client-id"));

    assert!(manager.global_listener_ids().is_empty());
    assert!(manager.pending_client_ids().is_empty());
    assert_eq!(manager.listener_count("client-id"), Some(1));
    assert_eq!(tracked(&manager, "client-id"), 1);
}

#[test]
fn test_global_listener_added_after_client_exists() {
    let manager = manager();
    register(&manager, "client-id");
    manager.run();

    manager.listen(|_| {});

    assert_eq!(manager.global_listener_ids().len(), 1);
    assert_eq!(manager.listener_count("client-id"), Some(1));
    assert_eq!(tracked(&manager, "client-id"), 1);
}

#[test]
fn test_client_listener_then_global_listener() {
    let manager = manager();
    manager.add_listener(|_| {}, Some("client-id"));
    register(&manager, "client-id");
    manager.run();

    assert_eq!(tracked(&manager, "client-id"), 1);
    assert!(manager.global_listener_ids().is_empty());
    assert_eq!(manager.listener_count("client-id"), Some(1));

    manager.listen(|_| {});

    assert_eq!(manager.global_listener_ids().len(), 1);
    assert_eq!(manager.listener_count("client-id"), Some(2));
}

#[test]
fn test_listener_only_reaches_assigned_client() {
    let manager = manager();
    register(&manager, "client-1");
    register(&manager, "client-2");
    manager.run();

    assert_eq!(manager.listener_count("client-1"), Some(0));
    assert_eq!(manager.listener_count("client-2"), Some(0));

    manager.add_listener(|_| {}, Some("client-1"));
    assert_eq!(manager.listener_count("client-1"), Some(1));
    assert_eq!(manager.listener_count("client-2"), Some(0));

    manager.add_listener(|_| {}, Some("client-2"));
    assert_eq!(manager.listener_count("client-1"), Some(1));
    assert_eq!(manager.listener_count("client-2"), Some(1));
}

#[test]
fn test_existing_client_listener_is_attached_once() {
    let manager = manager();
    register(&manager, "x");
    let (count, callback) = counter();

    manager.add_listener(callback, Some("x"));

    assert_eq!(manager.listener_count("x"), Some(1));
    assert!(manager.global_listener_ids().is_empty());
    assert!(manager.pending_client_ids().is_empty());

    manager.receive("x", &done()).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

// --- Standing listeners ---------------------------------------------------

#[test]
fn test_standing_listener_attaches_to_every_new_client() {
    let manager = manager();
    let (count, callback) = counter();
    let sub = manager.listen(callback);
    assert_eq!(sub.scope(), &SubscriptionScope::Global);

    for id in ["a", "b", "c"] {
        register(&manager, id);
    }
    for id in ["a", "b", "c"] {
        assert_eq!(manager.listener_count(id), Some(1));
        manager.receive(id, &done()).unwrap();
    }
    assert_eq!(count.load(Ordering::SeqCst), 3);
    assert_eq!(manager.global_listener_ids(), vec![sub.id()]);

    sub.unsubscribe();

    for id in ["a", "b", "c"] {
        assert_eq!(manager.listener_count(id), Some(0));
        assert_eq!(tracked(&manager, id), 0);
    }
    assert!(manager.global_listener_ids().is_empty());
}

#[test]
fn test_global_unsubscribe_leaves_other_globals() {
    let manager = manager();
    register(&manager, "client-1");
    register(&manager, "client-2");
    manager.run();

    manager.listen(|_| {});
    manager.listen(|_| {});
    let sub = manager.listen(|_| {});

    assert_eq!(manager.listener_count("client-1"), Some(3));
    assert_eq!(manager.listener_count("client-2"), Some(3));

    sub.unsubscribe();

    assert_eq!(manager.listener_count("client-1"), Some(2));
    assert_eq!(manager.listener_count("client-2"), Some(2));
    assert_eq!(manager.global_listener_ids().len(), 2);
}

#[test]
fn test_global_unsubscribe_excludes_future_clients() {
    let manager = manager();
    register(&manager, "a");
    let (count, callback) = counter();
    let sub = manager.listen(callback);

    sub.unsubscribe();
    register(&manager, "b");

    assert_eq!(manager.listener_count("a"), Some(0));
    assert_eq!(manager.listener_count("b"), Some(0));
    manager.receive("b", &done()).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

// --- Deferred per-client listeners ----------------------------------------

#[test]
fn test_deferred_listener_waits_for_its_client() {
    let manager = manager();
    let (count, callback) = counter();
    manager.add_listener(callback, Some("A"));

    assert_eq!(manager.pending_listener_ids("A").len(), 1);
    assert!(manager.client_ids().is_empty());

    register(&manager, "B");
    assert_eq!(manager.listener_count("B"), Some(0));
    assert_eq!(manager.pending_listener_ids("A").len(), 1);

    register(&manager, "A");
    assert_eq!(manager.listener_count("A"), Some(1));
    assert!(manager.pending_listener_ids("A").is_empty());
    assert!(manager.pending_client_ids().is_empty());

    manager.receive("A", &done()).unwrap();
    manager.receive("B", &done()).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_deferred_listener_revoked_before_flush() {
    let manager = manager();
    let sub = manager.add_listener(|_| {}, Some("A"));
    assert!(sub.is_active());

    sub.unsubscribe();
    assert!(!sub.is_active());
    assert!(manager.pending_client_ids().is_empty());

    register(&manager, "A");
    assert_eq!(manager.listener_count("A"), Some(0));
}

#[test]
fn test_deferred_listener_is_consumed_once() {
    let manager = manager();
    manager.add_listener(|_| {}, Some("A"));

    register(&manager, "A");
    assert!(manager.unregister_client("A"));
    register(&manager, "A");

    assert_eq!(manager.listener_count("A"), Some(0));
}

#[test]
fn test_pending_limit_evicts_oldest() {
    let manager = ClientManager::new(BridgeConfig {
        max_pending_per_client: 1,
        ..unbuffered()
    });
    let (first_count, first) = counter();
    let (second_count, second) = counter();

    let oldest = manager.add_listener(first, Some("A"));
    let newest = manager.add_listener(second, Some("A"));

    assert!(!oldest.is_active());
    assert!(newest.is_active());
    assert_eq!(oldest.evicted(), None);
    assert_eq!(newest.evicted(), Some(oldest.id()));
    assert_eq!(manager.pending_listener_ids("A"), vec![newest.id()]);

    register(&manager, "A");
    manager.receive("A", &done()).unwrap();
    assert_eq!(first_count.load(Ordering::SeqCst), 0);
    assert_eq!(second_count.load(Ordering::SeqCst), 1);

    // Revoking the evicted registration is harmless.
    oldest.unsubscribe();
    assert_eq!(manager.listener_count("A"), Some(1));
}

// --- Teardown -------------------------------------------------------------

#[test]
fn test_unregister_removes_only_that_clients_listeners() {
    let manager = manager();
    let t1 = register(&manager, "client-1");
    let t2 = register(&manager, "client-2");

    manager.listen(|_| {});
    manager.listen(|_| {});
    manager.listen(|_| {});
    manager.run();

    assert_eq!(manager.listener_count("client-1"), Some(3));
    assert_eq!(manager.listener_count("client-2"), Some(3));

    let client_2 = manager.client("client-2").unwrap();
    assert!(manager.unregister_client("client-2"));

    assert_eq!(manager.listener_count("client-1"), Some(3));
    assert!(manager.client("client-2").is_none());
    assert_eq!(manager.client_ids(), vec!["client-1"]);
    assert_eq!(manager.global_listener_ids().len(), 3);
    assert!(manager.tracked_listener_ids("client-2").is_none());
    assert_eq!(client_2.channel().listener_count(), 0);
    assert!(t2.is_closed());
    assert!(!t1.is_closed());
}

#[test]
fn test_unregister_mixed_attachments() {
    let manager = manager();
    register(&manager, "A");
    register(&manager, "B");

    manager.listen(|_| {});
    manager.add_listener(|_| {}, Some("A"));
    manager.add_listener(|_| {}, Some("B"));
    let global_before = manager.global_listener_ids();

    assert_eq!(manager.listener_count("A"), Some(2));
    assert_eq!(manager.listener_count("B"), Some(2));

    manager.unregister_client("B");

    assert_eq!(manager.listener_count("A"), Some(2));
    assert_eq!(tracked(&manager, "A"), 2);
    assert_eq!(manager.global_listener_ids(), global_before);
}

#[test]
fn test_unregister_unknown_client() {
    let manager = manager();
    assert!(!manager.unregister_client("ghost"));
}

#[test]
fn test_unsubscribe_after_client_teardown_is_noop() {
    let manager = manager();
    register(&manager, "A");
    register(&manager, "B");
    let sub = manager.add_listener(|_| {}, Some("A"));
    let global = manager.listen(|_| {});

    manager.unregister_client("A");
    sub.unsubscribe();
    sub.unsubscribe();

    assert!(!sub.is_active());
    assert!(global.is_active());
    assert_eq!(manager.listener_count("B"), Some(1));
}

#[test]
fn test_unsubscribe_after_manager_dropped() {
    let manager = manager();
    register(&manager, "A");
    let sub = manager.listen(|_| {});
    assert!(sub.is_active());

    drop(manager);

    assert!(!sub.is_active());
    sub.unsubscribe();
}

#[test]
fn test_drop_unregisters_all_clients() {
    let manager = manager();
    let a = register(&manager, "a");
    let b = register(&manager, "b");

    drop(manager);

    assert!(a.is_closed());
    assert!(b.is_closed());
}

#[test]
fn test_shutdown_keeps_queued_listeners() {
    let manager = manager();
    register(&manager, "a");
    manager.listen(|_| {});
    manager.add_listener(|_| {}, Some("later"));
    manager.run();

    manager.shutdown();

    assert!(manager.client_ids().is_empty());
    assert_eq!(manager.status(), ManagerStatus::Idle);
    assert_eq!(manager.global_listener_ids().len(), 1);

    let transport = register(&manager, "later");
    assert_eq!(manager.listener_count("later"), Some(2));
    // Idle again, so nothing is replayed.
    assert!(transport.posted().is_empty());
}

#[test]
fn test_unregister_all() {
    let manager = manager();
    register(&manager, "a");
    register(&manager, "b");
    assert_eq!(manager.unregister_all(), 2);
    assert!(manager.client_ids().is_empty());
}

// --- Registration errors --------------------------------------------------

#[test]
fn test_duplicate_registration_fails() {
    let manager = manager();
    register(&manager, "A");
    manager.add_listener(|_| {}, Some("A"));
    manager.listen(|_| {});

    let result = manager.register_client("A", RecordingTransport::new());
    assert!(matches!(result, Err(ClientError::DuplicateClient(id)) if id == "A"));

    assert_eq!(manager.listener_count("A"), Some(2));
    assert_eq!(tracked(&manager, "A"), 2);
}

#[test]
fn test_tracker_matches_visible_listeners() {
    let manager = manager();
    manager.add_listener(|_| {}, Some("A"));
    manager.listen(|_| {});
    register(&manager, "A");
    manager.add_listener(|_| {}, Some("A"));

    let client = manager.client("A").unwrap();
    assert_eq!(tracked(&manager, "A"), client.channel().listener_count());
    assert_eq!(
        client.channel().total_listener_count(),
        client.channel().listener_count() + 1
    );
}

// --- Run and dispatch -----------------------------------------------------

#[test]
fn test_run_broadcasts_to_every_client() {
    let manager = manager();
    let a = register(&manager, "a");
    let b = register(&manager, "b");
    manager.update_setup(SandboxSetup::new().with_file("/index.js", "1").with_entry("/index.js"));
    assert_eq!(manager.status(), ManagerStatus::Idle);

    let report = manager.run();

    assert_eq!(manager.status(), ManagerStatus::Running);
    assert_eq!(report.dispatched, 2);
    assert!(report.failed.is_empty());
    for transport in [&a, &b] {
        let posted = transport.posted();
        assert_eq!(posted.len(), 1);
        let HostMessage::Compile(request) = &posted[0] else {
            panic!("expected compile request, got {:?}", posted[0]);
        };
        assert_eq!(request.request_id, report.request_id);
        assert_eq!(request.setup.entry.as_deref(), Some("/index.js"));
    }
}

#[test]
fn test_each_run_has_a_new_request_id() {
    let manager = manager();
    register(&manager, "a");
    let first = manager.run();
    let second = manager.run();
    assert_ne!(first.request_id, second.request_id);
}

#[test]
fn test_run_reports_failures_without_retry() {
    let manager = manager();
    let good = register(&manager, "good");
    let bad = register(&manager, "bad");
    bad.fail_posts();

    let report = manager.run();

    assert_eq!(report.dispatched, 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "bad");
    assert_eq!(good.posted().len(), 1);
}

#[test]
fn test_run_with_no_clients() {
    let manager = manager();
    let report = manager.run();
    assert_eq!(report.dispatched, 0);
    assert_eq!(manager.status(), ManagerStatus::Running);
}

#[test]
fn test_late_client_receives_last_request() {
    let manager = manager();
    register(&manager, "early");
    let report = manager.run();

    let late = register(&manager, "late");

    let posted = late.posted();
    assert_eq!(posted.len(), 1);
    assert!(matches!(&posted[0], HostMessage::Compile(req) if req.request_id == report.request_id));
}

/// Transport that parks inside its first `post` until released.
struct ParkingTransport {
    gate: Barrier,
    parked: AtomicBool,
}

impl Transport for ParkingTransport {
    fn post(&self, _message: &HostMessage) -> Result<(), ChannelError> {
        if !self.parked.swap(true, Ordering::SeqCst) {
            // entered, then released
            self.gate.wait();
            self.gate.wait();
        }
        Ok(())
    }
}

#[test]
fn test_late_client_waits_for_in_flight_run() {
    let manager = Arc::new(manager());
    let early = Arc::new(ParkingTransport {
        gate: Barrier::new(2),
        parked: AtomicBool::new(false),
    });
    manager.register_client("early", early.clone()).unwrap();

    // The run parks while posting to "early".
    let runner = {
        let manager = manager.clone();
        std::thread::spawn(move || manager.run())
    };
    early.gate.wait();

    let late = RecordingTransport::new();
    let registering = {
        let manager = manager.clone();
        let late = late.clone();
        std::thread::spawn(move || manager.register_client("late", late).map(|_| ()))
    };
    std::thread::sleep(Duration::from_millis(50));
    assert!(manager.client("late").is_none());

    early.gate.wait();
    let report = runner.join().unwrap();
    registering.join().unwrap().unwrap();

    let posted = late.posted();
    assert_eq!(posted.len(), 1);
    assert!(matches!(&posted[0], HostMessage::Compile(req) if req.request_id == report.request_id));
}

#[test]
fn test_late_client_without_replay() {
    let manager = ClientManager::new(BridgeConfig {
        run_on_register: false,
        ..unbuffered()
    });
    manager.run();
    let late = register(&manager, "late");
    assert!(late.posted().is_empty());
}

#[test]
fn test_no_replay_before_run() {
    let manager = manager();
    let transport = register(&manager, "a");
    assert!(transport.posted().is_empty());
}

#[test]
fn test_dispatch_to_one_client() {
    let manager = manager();
    let a = register(&manager, "a");
    let b = register(&manager, "b");

    assert_eq!(manager.dispatch(HostMessage::Refresh, Some("a")).unwrap(), 1);
    assert_eq!(a.posted_kinds(), vec!["refresh"]);
    assert!(b.posted().is_empty());
}

#[test]
fn test_dispatch_to_all_clients() {
    let manager = manager();
    let a = register(&manager, "a");
    let b = register(&manager, "b");
    b.fail_posts();

    assert_eq!(manager.dispatch(HostMessage::Refresh, None).unwrap(), 1);
    assert_eq!(a.posted_kinds(), vec!["refresh"]);
}

#[test]
fn test_dispatch_errors() {
    let manager = manager();
    let result = manager.dispatch(HostMessage::Refresh, Some("ghost"));
    assert!(matches!(result, Err(ClientError::NotFound(_))));

    let transport = register(&manager, "a");
    transport.fail_posts();
    let result = manager.dispatch(HostMessage::Refresh, Some("a"));
    assert!(matches!(result, Err(ClientError::Channel { client_id, .. }) if client_id == "a"));
}

#[test]
fn test_receive_unknown_client() {
    let manager = manager();
    let result = manager.receive("ghost", &done());
    assert!(matches!(result, Err(ClientError::NotFound(_))));
}

#[test]
fn test_run_waits_for_handshake() {
    let manager = ClientManager::default();
    let transport = register(&manager, "a");

    let report = manager.run();
    assert_eq!(report.dispatched, 1);
    assert!(transport.posted().is_empty());

    manager.receive("a", &SandboxMessage::Initialized).unwrap();
    assert_eq!(transport.posted_kinds(), vec!["compile"]);
}

// --- Reentrancy -----------------------------------------------------------

#[test]
fn test_listener_adds_listener_during_delivery() {
    let manager = Arc::new(manager());
    register(&manager, "a");

    let weak = Arc::downgrade(&manager);
    manager.listen(move |message| {
        if matches!(message, SandboxMessage::Done { .. }) {
            if let Some(manager) = weak.upgrade() {
                manager.add_listener(|_| {}, Some("a"));
            }
        }
    });

    manager.receive("a", &done()).unwrap();
    assert_eq!(manager.listener_count("a"), Some(2));
    assert_eq!(tracked(&manager, "a"), 2);
}

#[test]
fn test_listener_unregisters_its_client_during_delivery() {
    let manager = Arc::new(manager());
    register(&manager, "a");
    register(&manager, "b");

    let weak = Arc::downgrade(&manager);
    manager.add_listener(
        move |_| {
            if let Some(manager) = weak.upgrade() {
                manager.unregister_client("a");
            }
        },
        Some("a"),
    );
    let (count, callback) = counter();
    manager.listen(callback);

    manager.receive("a", &done()).unwrap();

    assert_eq!(manager.client_ids(), vec!["b"]);
    // Snapshot delivery: the standing listener still saw the message.
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_listener_revokes_itself_during_delivery() {
    let manager = manager();
    register(&manager, "a");
    let slot: Arc<parking_lot::Mutex<Option<Subscription>>> = Arc::default();
    let (count, _) = counter();

    let sub = {
        let slot = slot.clone();
        let count = count.clone();
        manager.listen(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = slot.lock().as_ref() {
                sub.unsubscribe();
            }
        })
    };
    *slot.lock() = Some(sub);

    manager.receive("a", &done()).unwrap();
    manager.receive("a", &done()).unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(manager.listener_count("a"), Some(0));
    assert!(manager.global_listener_ids().is_empty());
}
