mod common;

use std::time::Duration;

use crossbeam_channel::unbounded;

use replay_capture_core::models::device::{DeviceRole, Direction, Selection};
use replay_capture_core::registry::{DeviceRegistry, RegistryChange};
use replay_capture_core::traits::audio_backend::DeviceNotification;

use common::{device, wait_until, MockBackend};

const TIMEOUT: Duration = Duration::from_secs(2);

fn effective_changes(registry: &DeviceRegistry) -> crossbeam_channel::Receiver<(Direction, Option<String>)> {
    let (tx, rx) = unbounded();
    registry.subscribe(move |change| {
        if let RegistryChange::EffectiveDeviceChanged { direction, device } = change {
            let _ = tx.send((*direction, device.as_ref().map(|d| d.id.clone())));
        }
    });
    rx
}

#[test]
fn seeds_from_initial_enumeration_and_defaults() {
    let backend = MockBackend::new();
    backend.seed_device(device("mic", Direction::Input, 1));
    backend.seed_device(device("spk", Direction::Output, 2));
    backend.seed_default(Direction::Input, "mic");
    backend.seed_default(Direction::Output, "spk");

    let registry = DeviceRegistry::start(backend.as_ref(), true).unwrap();

    let snapshot = registry.snapshot();
    assert_eq!(snapshot.effective_input.as_ref().map(|d| d.id.as_str()), Some("mic"));
    assert_eq!(snapshot.effective_output.as_ref().map(|d| d.id.as_str()), Some("spk"));
    assert_eq!(snapshot.input_devices.len(), 1);
    assert_eq!(snapshot.output_devices.len(), 1);
}

#[test]
fn default_change_flows_to_effective_device() {
    let backend = MockBackend::new();
    backend.seed_device(device("a", Direction::Input, 1));
    backend.seed_device(device("b", Direction::Input, 1));
    backend.seed_default(Direction::Input, "a");

    let registry = DeviceRegistry::start(backend.as_ref(), true).unwrap();
    let changes = effective_changes(&registry);

    backend.change_default(Direction::Input, Some("b"));

    let (direction, id) = changes.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(direction, Direction::Input);
    assert_eq!(id.as_deref(), Some("b"));
}

#[test]
fn non_console_default_changes_are_filtered() {
    let backend = MockBackend::new();
    backend.seed_device(device("a", Direction::Input, 1));
    backend.seed_device(device("b", Direction::Input, 1));
    backend.seed_default(Direction::Input, "a");

    let registry = DeviceRegistry::start(backend.as_ref(), true).unwrap();

    backend.send_notification(DeviceNotification::DefaultChanged {
        direction: Direction::Input,
        role: DeviceRole::Communications,
        id: Some("b".into()),
    });

    assert!(wait_until(TIMEOUT, || {
        // Communications role ignored: effective input stays on "a".
        registry.effective_device(Direction::Input).map(|d| d.id) == Some("a".into())
    }));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(
        registry.effective_device(Direction::Input).map(|d| d.id),
        Some("a".into())
    );
}

#[test]
fn removed_default_with_follow_default_waits_for_new_default() {
    // Scenario: default output X with FollowDefault; X removed while
    // default; effective becomes null; DefaultChanged(Output, Y) arrives;
    // effective becomes Y.
    let backend = MockBackend::new();
    backend.seed_device(device("x", Direction::Output, 2));
    backend.seed_device(device("y", Direction::Output, 2));
    backend.seed_default(Direction::Output, "x");

    let registry = DeviceRegistry::start(backend.as_ref(), true).unwrap();
    let changes = effective_changes(&registry);

    backend.remove_device("x");
    let (_, id) = changes.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(id, None);

    backend.change_default(Direction::Output, Some("y"));
    let (_, id) = changes.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(id.as_deref(), Some("y"));
}

#[test]
fn removed_explicit_selection_falls_back_to_default() {
    let backend = MockBackend::new();
    backend.seed_device(device("def", Direction::Input, 1));
    backend.seed_device(device("usb", Direction::Input, 1));
    backend.seed_default(Direction::Input, "def");

    let registry = DeviceRegistry::start(backend.as_ref(), true).unwrap();
    registry.select_device(Direction::Input, "usb");

    assert!(wait_until(TIMEOUT, || {
        registry.effective_device(Direction::Input).map(|d| d.id) == Some("usb".into())
    }));

    backend.remove_device("usb");
    assert!(wait_until(TIMEOUT, || {
        registry.effective_device(Direction::Input).map(|d| d.id) == Some("def".into())
    }));
}

#[test]
fn removed_explicit_default_adopts_next_announced_default() {
    let backend = MockBackend::new();
    backend.seed_device(device("a", Direction::Input, 1));
    backend.seed_device(device("b", Direction::Input, 1));
    backend.seed_default(Direction::Input, "a");

    let registry = DeviceRegistry::start(backend.as_ref(), true).unwrap();
    registry.select_device(Direction::Input, "a");

    backend.remove_device("a");
    assert!(wait_until(TIMEOUT, || {
        registry.effective_device(Direction::Input).is_none()
    }));
    // "b" is active but nothing substitutes until the platform speaks.
    assert!(registry.effective_device(Direction::Input).is_none());

    backend.change_default(Direction::Input, Some("b"));
    assert!(wait_until(TIMEOUT, || {
        registry.effective_device(Direction::Input).map(|d| d.id) == Some("b".into())
    }));
}

#[test]
fn added_device_is_adopted_when_direction_is_empty() {
    let backend = MockBackend::new();
    let registry = DeviceRegistry::start(backend.as_ref(), true).unwrap();
    registry.set_selection(Direction::Input, Selection::None);

    backend.add_device(device("first", Direction::Input, 1));
    assert!(wait_until(TIMEOUT, || {
        registry.effective_device(Direction::Input).map(|d| d.id) == Some("first".into())
    }));
}

#[test]
fn subscriber_panic_does_not_wedge_the_reducer() {
    let backend = MockBackend::new();
    backend.seed_device(device("a", Direction::Input, 1));
    backend.seed_default(Direction::Input, "a");

    let registry = DeviceRegistry::start(backend.as_ref(), true).unwrap();
    registry.subscribe(|_| panic!("bad subscriber"));
    let changes = effective_changes(&registry);

    backend.add_device(device("b", Direction::Input, 1));
    backend.change_default(Direction::Input, Some("b"));

    // Later events still flow past the faulting subscriber.
    let (_, id) = changes.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(id.as_deref(), Some("b"));
}

#[test]
fn duplicate_default_announcements_are_distinct_filtered() {
    let backend = MockBackend::new();
    backend.seed_device(device("a", Direction::Input, 1));
    backend.seed_default(Direction::Input, "a");

    let registry = DeviceRegistry::start(backend.as_ref(), true).unwrap();
    let changes = effective_changes(&registry);

    backend.change_default(Direction::Input, Some("a"));
    backend.change_default(Direction::Input, Some("a"));

    assert!(changes.recv_timeout(Duration::from_millis(300)).is_err());
}

#[test]
fn events_are_applied_in_arrival_order() {
    let backend = MockBackend::new();
    backend.seed_default(Direction::Input, "a");
    let registry = DeviceRegistry::start(backend.as_ref(), true).unwrap();
    registry.set_selection(Direction::Input, Selection::FollowDefault);
    let changes = effective_changes(&registry);

    // add a, flip default a → b → a; observers must see the same order.
    backend.add_device(device("a", Direction::Input, 1));
    backend.add_device(device("b", Direction::Input, 1));
    backend.change_default(Direction::Input, Some("b"));
    backend.change_default(Direction::Input, Some("a"));

    let mut seen = Vec::new();
    while let Ok((_, id)) = changes.recv_timeout(Duration::from_millis(300)) {
        seen.push(id);
    }
    assert_eq!(
        seen,
        vec![
            Some("a".to_string()),
            Some("b".to_string()),
            Some("a".to_string())
        ]
    );
}
