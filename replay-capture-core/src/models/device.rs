use serde::{Deserialize, Serialize};

/// Direction of an audio endpoint relative to the machine.
///
/// `Output` devices can still act as capture sources via loopback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

/// Lifecycle state reported by the platform for an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceState {
    Active,
    Disabled,
    NotPresent,
    Unplugged,
}

impl DeviceState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Role attached to a default-device notification.
///
/// Only `Console` notifications affect the registry's default tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceRole {
    Console,
    Multimedia,
    Communications,
}

/// An audio endpoint as known to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Opaque platform identifier. Stable for the lifetime of the endpoint.
    pub id: String,
    pub direction: Direction,
    pub name: String,
    pub state: DeviceState,
    /// Native channel count of the endpoint's mix format.
    pub channels: u16,
}

impl DeviceInfo {
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }
}

/// Per-direction user device selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Selection {
    /// No device wanted for this direction.
    None,
    /// Track whatever the platform currently reports as default.
    #[default]
    FollowDefault,
    /// A specific endpoint by id.
    Explicit(String),
}

impl Selection {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// The explicitly selected id, if any.
    pub fn explicit_id(&self) -> Option<&str> {
        match self {
            Self::Explicit(id) => Some(id),
            _ => None,
        }
    }
}
