//! Network change notifications consumed by the resolver.
//!
//! The platform-specific watcher is out of scope; embedders observe the OS
//! and forward events to `HostResolver::on_*` methods.

/// Link type of the default network (subset of Chromium's `ConnectionType`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionType {
    #[default]
    Unknown,
    Ethernet,
    Wifi,
    Cellular,
    Bluetooth,
    /// No connectivity at all.
    None,
}

impl ConnectionType {
    pub fn is_offline(self) -> bool {
        self == ConnectionType::None
    }

    pub fn is_wireless(self) -> bool {
        matches!(self, ConnectionType::Wifi | ConnectionType::Cellular | ConnectionType::Bluetooth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline() {
        assert!(ConnectionType::None.is_offline());
        assert!(!ConnectionType::Unknown.is_offline());
        assert!(!ConnectionType::Wifi.is_offline());
    }

    #[test]
    fn test_wireless() {
        assert!(ConnectionType::Wifi.is_wireless());
        assert!(!ConnectionType::Ethernet.is_wireless());
        assert_eq!(ConnectionType::default(), ConnectionType::Unknown);
    }
}
