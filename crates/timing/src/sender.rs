//! Outbound seam for performance entries.

use bitflags::bitflags;
use serde_json::{Map, Value};

/// A performance entry as delivered to consumers.
pub type PerformanceEntry = Map<String, Value>;

bitflags! {
    /// Consumers an entry is addressed to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventTypes: u8 {
        /// Host platform observer
        const PLATFORM = 1;
        /// Background scripting runtime
        const BTS = 1 << 1;
        /// Main-thread scripting engine
        const MTS = 1 << 2;
        const ALL = Self::PLATFORM.bits() | Self::BTS.bits() | Self::MTS.bits();
    }
}

/// Receiver of performance entries.
pub trait PerformanceEventSender: Send + Sync {
    fn on_performance_event(&self, entry: PerformanceEntry, event_types: EventTypes);

    /// Toggle delivery to the main-thread scripting engine.
    fn set_enable_main_thread_callback(&self, _enable: bool) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_bits() {
        assert_eq!(EventTypes::PLATFORM.bits(), 1);
        assert_eq!(EventTypes::BTS.bits(), 2);
        assert_eq!(EventTypes::MTS.bits(), 4);
        assert_eq!(EventTypes::ALL.bits(), 7);
        assert!((EventTypes::PLATFORM | EventTypes::MTS).contains(EventTypes::MTS));
        assert!(!EventTypes::PLATFORM.contains(EventTypes::BTS));
    }
}
