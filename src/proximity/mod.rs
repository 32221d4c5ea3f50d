//! Trusted-device proximity tracking.
//!
//! Raw signal samples come in, debounced proximity edges come out. The
//! tracker is owned by the coordinator and only touched from its task.

pub mod device;
pub mod error;
pub mod tracker;

pub use device::TrustedDevice;
pub use error::ProximityError;
pub use tracker::ProximityTracker;

use crate::types::{DeviceId, TransitionEvent};

/// An edge produced by the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProximitySignal {
    /// A device went `Away → Near`
    DeviceNear(DeviceId),
    /// A device went `Near → Away`
    DeviceAway(DeviceId),
    /// Every trusted device is now away
    AllDevicesAway,
}

impl ProximitySignal {
    /// Converts the signal into a coordinator event.
    ///
    /// `DeviceAway` is informational and maps to nothing; the aggregate edge
    /// carries the meaning.
    pub fn into_event(self) -> Option<TransitionEvent> {
        match self {
            ProximitySignal::DeviceNear(id) => Some(TransitionEvent::DeviceNear(id)),
            ProximitySignal::DeviceAway(_) => None,
            ProximitySignal::AllDevicesAway => Some(TransitionEvent::AllDevicesAway),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_event() {
        let id = DeviceId::new("AA:BB");
        assert_eq!(
            ProximitySignal::DeviceNear(id.clone()).into_event(),
            Some(TransitionEvent::DeviceNear(id.clone()))
        );
        assert_eq!(ProximitySignal::DeviceAway(id).into_event(), None);
        assert_eq!(
            ProximitySignal::AllDevicesAway.into_event(),
            Some(TransitionEvent::AllDevicesAway)
        );
    }
}
