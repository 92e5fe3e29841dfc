use std::collections::BTreeMap;

use crate::models::device::{DeviceInfo, DeviceRole, DeviceState, Direction, Selection};
use crate::traits::audio_backend::DeviceNotification;

/// One queued registry event. Every mutation of registry state flows
/// through this union, in arrival order, on the reducer thread.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    DeviceAdded(DeviceInfo),
    DeviceRemoved { id: String },
    DeviceStateChanged { device: DeviceInfo, state: DeviceState },
    DefaultChanged {
        direction: Direction,
        role: DeviceRole,
        id: Option<String>,
    },
    SelectionChanged { direction: Direction, selection: Selection },
}

impl From<DeviceNotification> for RegistryEvent {
    fn from(notification: DeviceNotification) -> Self {
        match notification {
            DeviceNotification::Added(device) => Self::DeviceAdded(device),
            DeviceNotification::Removed { id } => Self::DeviceRemoved { id },
            DeviceNotification::StateChanged { device, state } => {
                Self::DeviceStateChanged { device, state }
            }
            DeviceNotification::DefaultChanged { direction, role, id } => {
                Self::DefaultChanged { direction, role, id }
            }
        }
    }
}

/// Downstream notification emitted when a derived value actually changed.
#[derive(Debug, Clone)]
pub enum RegistryChange {
    /// The resolved device for a direction is different from the last one
    /// observers saw (distinct by id).
    EffectiveDeviceChanged {
        direction: Direction,
        device: Option<DeviceInfo>,
    },
    DeviceAdded(DeviceInfo),
    DeviceRemoved {
        direction: Direction,
        id: String,
        was_default: bool,
    },
}

#[derive(Debug, Default)]
struct DirectionState {
    /// Active endpoints only, keyed by id. Deterministic iteration order
    /// backs the "any other active device" fallback.
    devices: BTreeMap<String, DeviceInfo>,
    default_id: Option<String>,
    selection: Selection,
    /// Set when the explicitly selected device was removed while it was the
    /// default: the next Console default-changed for this direction decides
    /// the replacement. Until then the direction resolves to no device.
    pending_default_adopt: Option<String>,
    /// Last effective device observers were told about, for
    /// distinct-until-changed comparison.
    effective: Option<DeviceInfo>,
}

/// Mutable registry state plus the reducer that folds events into it.
///
/// Pure state machine: no threads, no channels, no platform calls. The
/// registry front end owns exactly one of these behind its serialized
/// reducer; tests drive it directly.
#[derive(Debug)]
pub struct RegistryState {
    input: DirectionState,
    output: DirectionState,
    /// When enabled, an added device is adopted for a selection-less
    /// direction and a removed selection falls back to another device.
    auto_switch: bool,
}

impl RegistryState {
    pub fn new(auto_switch: bool) -> Self {
        Self {
            input: DirectionState::default(),
            output: DirectionState::default(),
            auto_switch,
        }
    }

    /// Install the initial enumeration and defaults, then resolve both
    /// directions. Returns the changes (normally the first effective-device
    /// values) exactly like a reduced event would.
    pub fn seed(
        &mut self,
        devices: Vec<DeviceInfo>,
        default_input: Option<String>,
        default_output: Option<String>,
    ) -> Vec<RegistryChange> {
        for device in devices {
            let state = self.direction_mut(device.direction);
            state.devices.insert(device.id.clone(), device);
        }
        self.input.default_id = default_input;
        self.output.default_id = default_output;

        let mut changes = Vec::new();
        self.recompute(Direction::Input, &mut changes);
        self.recompute(Direction::Output, &mut changes);
        changes
    }

    /// Apply one event and synchronously recompute the affected effective
    /// devices before the next event can be processed.
    pub fn apply(&mut self, event: RegistryEvent) -> Vec<RegistryChange> {
        let mut changes = Vec::new();
        match event {
            RegistryEvent::DeviceAdded(device) => {
                self.insert_device(device, &mut changes);
            }
            RegistryEvent::DeviceRemoved { id } => {
                self.remove_device(&id, &mut changes);
            }
            RegistryEvent::DeviceStateChanged { device, state } => {
                // Fold onto the add/remove paths: membership tracks
                // Active-ness, nothing else.
                if state.is_active() {
                    let device = DeviceInfo {
                        state: DeviceState::Active,
                        ..device
                    };
                    self.insert_device(device, &mut changes);
                } else {
                    self.remove_device(&device.id, &mut changes);
                }
            }
            RegistryEvent::DefaultChanged { direction, role, id } => {
                if role != DeviceRole::Console {
                    log::debug!("ignoring {role:?} default change for {direction:?}");
                    return changes;
                }
                self.change_default(direction, id, &mut changes);
            }
            RegistryEvent::SelectionChanged { direction, selection } => {
                self.direction_mut(direction).selection = selection;
                self.recompute(direction, &mut changes);
            }
        }
        changes
    }

    pub fn effective_device(&self, direction: Direction) -> Option<&DeviceInfo> {
        self.direction(direction).effective.as_ref()
    }

    pub fn active_devices(&self, direction: Direction) -> Vec<DeviceInfo> {
        self.direction(direction).devices.values().cloned().collect()
    }

    pub fn default_device_id(&self, direction: Direction) -> Option<&str> {
        self.direction(direction).default_id.as_deref()
    }

    pub fn selection(&self, direction: Direction) -> &Selection {
        &self.direction(direction).selection
    }

    fn insert_device(&mut self, device: DeviceInfo, changes: &mut Vec<RegistryChange>) {
        let direction = device.direction;
        let auto_switch = self.auto_switch;
        let state = self.direction_mut(direction);

        if state.devices.contains_key(&device.id) {
            return;
        }

        log::debug!("device added ({direction:?}): '{}'", device.id);
        state.devices.insert(device.id.clone(), device.clone());

        if auto_switch && state.selection.is_none() {
            log::info!(
                "adopting first available {direction:?} device '{}'",
                device.id
            );
            state.selection = Selection::Explicit(device.id.clone());
        }

        changes.push(RegistryChange::DeviceAdded(device));
        self.recompute(direction, changes);
    }

    fn remove_device(&mut self, id: &str, changes: &mut Vec<RegistryChange>) {
        let Some(direction) = self.direction_of(id) else {
            return;
        };
        let auto_switch = self.auto_switch;
        let state = self.direction_mut(direction);

        // Remove first, then resolve: a removed id must never resolve again
        // until it is re-added.
        state.devices.remove(id);
        let was_default = state.default_id.as_deref() == Some(id);
        log::debug!("device removed ({direction:?}): '{id}' (was_default: {was_default})");

        if auto_switch && state.selection.explicit_id() == Some(id) {
            if was_default {
                // The replacement default is not known yet. Defer: the next
                // Console default-changed for this direction decides.
                state.pending_default_adopt = Some(id.to_string());
            } else {
                state.selection = Self::fallback_selection(state);
                log::info!(
                    "selected {direction:?} device removed, falling back to {:?}",
                    state.selection
                );
            }
        }

        changes.push(RegistryChange::DeviceRemoved {
            direction,
            id: id.to_string(),
            was_default,
        });
        self.recompute(direction, changes);
    }

    fn change_default(
        &mut self,
        direction: Direction,
        id: Option<String>,
        changes: &mut Vec<RegistryChange>,
    ) {
        let state = self.direction_mut(direction);
        state.default_id = id.clone();

        // One-shot adoption armed by the removal of a selected default.
        if let Some(pending) = state.pending_default_adopt.take() {
            if state.selection.explicit_id() == Some(pending.as_str()) {
                state.selection = match id {
                    Some(new_default) => Selection::Explicit(new_default),
                    None => Selection::None,
                };
                log::info!(
                    "adopted new default for {direction:?} after removal of '{pending}'"
                );
            }
        }

        self.recompute(direction, changes);
    }

    /// Fallback order when an explicit, non-default selection disappears:
    /// current default if active, else any other active device, else none.
    fn fallback_selection(state: &DirectionState) -> Selection {
        if let Some(default_id) = &state.default_id {
            if state.devices.contains_key(default_id) {
                return Selection::Explicit(default_id.clone());
            }
        }
        match state.devices.keys().next() {
            Some(id) => Selection::Explicit(id.clone()),
            None => Selection::None,
        }
    }

    /// Resolve and, when the result differs from the last observed value,
    /// record an `EffectiveDeviceChanged`.
    fn recompute(&mut self, direction: Direction, changes: &mut Vec<RegistryChange>) {
        let state = self.direction_mut(direction);
        let resolved = Self::resolve(state);

        let changed = match (&state.effective, &resolved) {
            (None, None) => false,
            (Some(old), Some(new)) => old.id != new.id,
            _ => true,
        };
        if !changed {
            return;
        }

        state.effective = resolved.clone();
        changes.push(RegistryChange::EffectiveDeviceChanged {
            direction,
            device: resolved,
        });
    }

    /// Pure resolution of (active devices, default id, selection).
    fn resolve(state: &DirectionState) -> Option<DeviceInfo> {
        match &state.selection {
            Selection::None => None,
            Selection::FollowDefault => state
                .default_id
                .as_ref()
                .and_then(|id| state.devices.get(id))
                .cloned(),
            Selection::Explicit(id) => state.devices.get(id).cloned(),
        }
    }

    fn direction(&self, direction: Direction) -> &DirectionState {
        match direction {
            Direction::Input => &self.input,
            Direction::Output => &self.output,
        }
    }

    fn direction_mut(&mut self, direction: Direction) -> &mut DirectionState {
        match direction {
            Direction::Input => &mut self.input,
            Direction::Output => &mut self.output,
        }
    }

    fn direction_of(&self, id: &str) -> Option<Direction> {
        if self.input.devices.contains_key(id) {
            Some(Direction::Input)
        } else if self.output.devices.contains_key(id) {
            Some(Direction::Output)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str, direction: Direction) -> DeviceInfo {
        DeviceInfo {
            id: id.into(),
            direction,
            name: format!("Device {id}"),
            state: DeviceState::Active,
            channels: 2,
        }
    }

    fn effective_id(state: &RegistryState, direction: Direction) -> Option<String> {
        state.effective_device(direction).map(|d| d.id.clone())
    }

    fn default_changed(direction: Direction, id: Option<&str>) -> RegistryEvent {
        RegistryEvent::DefaultChanged {
            direction,
            role: DeviceRole::Console,
            id: id.map(String::from),
        }
    }

    #[test]
    fn follow_default_tracks_default_changes() {
        let mut state = RegistryState::new(true);
        state.seed(
            vec![device("A", Direction::Input), device("B", Direction::Input)],
            Some("A".into()),
            None,
        );

        assert_eq!(effective_id(&state, Direction::Input), Some("A".into()));

        let changes = state.apply(default_changed(Direction::Input, Some("B")));
        assert_eq!(effective_id(&state, Direction::Input), Some("B".into()));
        assert!(matches!(
            changes.as_slice(),
            [RegistryChange::EffectiveDeviceChanged { device: Some(d), .. }] if d.id == "B"
        ));
    }

    #[test]
    fn non_console_roles_are_ignored() {
        let mut state = RegistryState::new(true);
        state.seed(
            vec![device("A", Direction::Input), device("B", Direction::Input)],
            Some("A".into()),
            None,
        );

        let changes = state.apply(RegistryEvent::DefaultChanged {
            direction: Direction::Input,
            role: DeviceRole::Communications,
            id: Some("B".into()),
        });
        assert!(changes.is_empty());
        assert_eq!(effective_id(&state, Direction::Input), Some("A".into()));
    }

    #[test]
    fn removing_non_default_explicit_selection_falls_back_to_default() {
        let mut state = RegistryState::new(true);
        state.seed(
            vec![
                device("default", Direction::Input),
                device("usb", Direction::Input),
            ],
            Some("default".into()),
            None,
        );
        state.apply(RegistryEvent::SelectionChanged {
            direction: Direction::Input,
            selection: Selection::Explicit("usb".into()),
        });
        assert_eq!(effective_id(&state, Direction::Input), Some("usb".into()));

        state.apply(RegistryEvent::DeviceRemoved { id: "usb".into() });
        assert_eq!(effective_id(&state, Direction::Input), Some("default".into()));
        assert_eq!(
            state.selection(Direction::Input),
            &Selection::Explicit("default".into())
        );
    }

    #[test]
    fn removing_selection_with_inactive_default_falls_back_to_any_other() {
        let mut state = RegistryState::new(true);
        state.seed(
            vec![
                device("usb", Direction::Input),
                device("spare", Direction::Input),
            ],
            Some("gone".into()), // default not in the active set
            None,
        );
        state.apply(RegistryEvent::SelectionChanged {
            direction: Direction::Input,
            selection: Selection::Explicit("usb".into()),
        });

        state.apply(RegistryEvent::DeviceRemoved { id: "usb".into() });
        assert_eq!(effective_id(&state, Direction::Input), Some("spare".into()));
    }

    #[test]
    fn removing_last_device_resolves_to_none() {
        let mut state = RegistryState::new(true);
        state.seed(vec![device("only", Direction::Input)], None, None);
        state.apply(RegistryEvent::SelectionChanged {
            direction: Direction::Input,
            selection: Selection::Explicit("only".into()),
        });

        state.apply(RegistryEvent::DeviceRemoved { id: "only".into() });
        assert_eq!(effective_id(&state, Direction::Input), None);
        assert_eq!(state.selection(Direction::Input), &Selection::None);
    }

    #[test]
    fn removing_selected_default_defers_until_next_default_change() {
        let mut state = RegistryState::new(true);
        state.seed(
            vec![device("A", Direction::Input), device("B", Direction::Input)],
            Some("A".into()),
            None,
        );
        state.apply(RegistryEvent::SelectionChanged {
            direction: Direction::Input,
            selection: Selection::Explicit("A".into()),
        });

        state.apply(RegistryEvent::DeviceRemoved { id: "A".into() });
        // No substitute until the platform announces the new default, even
        // though B is active.
        assert_eq!(effective_id(&state, Direction::Input), None);

        state.apply(default_changed(Direction::Input, Some("B")));
        assert_eq!(effective_id(&state, Direction::Input), Some("B".into()));
        assert_eq!(
            state.selection(Direction::Input),
            &Selection::Explicit("B".into())
        );
    }

    #[test]
    fn follow_default_output_survives_default_removal_then_adopts() {
        let mut state = RegistryState::new(true);
        state.seed(
            vec![device("X", Direction::Output), device("Y", Direction::Output)],
            None,
            Some("X".into()),
        );
        assert_eq!(effective_id(&state, Direction::Output), Some("X".into()));

        state.apply(RegistryEvent::DeviceRemoved { id: "X".into() });
        assert_eq!(effective_id(&state, Direction::Output), None);

        state.apply(default_changed(Direction::Output, Some("Y")));
        assert_eq!(effective_id(&state, Direction::Output), Some("Y".into()));
    }

    #[test]
    fn first_added_device_is_adopted_when_nothing_selected() {
        let mut state = RegistryState::new(true);
        state.apply(RegistryEvent::SelectionChanged {
            direction: Direction::Input,
            selection: Selection::None,
        });

        state.apply(RegistryEvent::DeviceAdded(device("new", Direction::Input)));
        assert_eq!(
            state.selection(Direction::Input),
            &Selection::Explicit("new".into())
        );
        assert_eq!(effective_id(&state, Direction::Input), Some("new".into()));
    }

    #[test]
    fn added_device_is_not_adopted_without_auto_switch() {
        let mut state = RegistryState::new(false);
        state.apply(RegistryEvent::SelectionChanged {
            direction: Direction::Input,
            selection: Selection::None,
        });

        state.apply(RegistryEvent::DeviceAdded(device("new", Direction::Input)));
        assert_eq!(state.selection(Direction::Input), &Selection::None);
        assert_eq!(effective_id(&state, Direction::Input), None);
    }

    #[test]
    fn duplicate_add_is_deduplicated() {
        let mut state = RegistryState::new(true);
        state.apply(RegistryEvent::DeviceAdded(device("A", Direction::Input)));
        let changes = state.apply(RegistryEvent::DeviceAdded(device("A", Direction::Input)));

        assert!(changes.is_empty());
        assert_eq!(state.active_devices(Direction::Input).len(), 1);
    }

    #[test]
    fn state_change_folds_into_membership() {
        let mut state = RegistryState::new(true);
        let dev = device("hp", Direction::Output);

        state.apply(RegistryEvent::DeviceStateChanged {
            device: dev.clone(),
            state: DeviceState::Active,
        });
        assert_eq!(state.active_devices(Direction::Output).len(), 1);

        state.apply(RegistryEvent::DeviceStateChanged {
            device: dev,
            state: DeviceState::Unplugged,
        });
        assert!(state.active_devices(Direction::Output).is_empty());
    }

    #[test]
    fn removed_id_never_resolves_until_readded() {
        let mut state = RegistryState::new(true);
        state.seed(
            vec![device("A", Direction::Input)],
            Some("A".into()),
            None,
        );
        assert_eq!(effective_id(&state, Direction::Input), Some("A".into()));

        state.apply(RegistryEvent::DeviceRemoved { id: "A".into() });
        // Default id still points at A, but A is out of the active set.
        assert_eq!(state.default_device_id(Direction::Input), Some("A"));
        assert_eq!(effective_id(&state, Direction::Input), None);

        state.apply(RegistryEvent::DeviceAdded(device("A", Direction::Input)));
        assert_eq!(effective_id(&state, Direction::Input), Some("A".into()));
    }

    #[test]
    fn distinct_until_changed_suppresses_no_op_recomputes() {
        let mut state = RegistryState::new(true);
        state.seed(
            vec![device("A", Direction::Input), device("B", Direction::Input)],
            Some("A".into()),
            None,
        );

        // Unrelated removal leaves the effective input untouched.
        let changes = state.apply(RegistryEvent::DeviceRemoved { id: "B".into() });
        assert!(changes
            .iter()
            .all(|c| !matches!(c, RegistryChange::EffectiveDeviceChanged { .. })));
    }

    #[test]
    fn directions_are_independent() {
        let mut state = RegistryState::new(true);
        state.seed(
            vec![device("mic", Direction::Input), device("spk", Direction::Output)],
            Some("mic".into()),
            Some("spk".into()),
        );

        state.apply(RegistryEvent::DeviceRemoved { id: "spk".into() });
        assert_eq!(effective_id(&state, Direction::Input), Some("mic".into()));
        assert_eq!(effective_id(&state, Direction::Output), None);
    }
}
