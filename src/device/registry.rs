use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Broad class of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    Multifunction,
    Scanner,
    Printer,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Multifunction => write!(f, "Multifunction"),
            DeviceKind::Scanner => write!(f, "Scanner"),
            DeviceKind::Printer => write!(f, "Printer"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Capability {
    Scan,
    Print,
    Copy,
    Fax,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Scan => write!(f, "Scan"),
            Capability::Print => write!(f, "Print"),
            Capability::Copy => write!(f, "Copy"),
            Capability::Fax => write!(f, "Fax"),
        }
    }
}

impl DeviceKind {
    /// Capabilities a device of this kind is assumed to have.
    pub fn default_capabilities(&self) -> BTreeSet<Capability> {
        match self {
            DeviceKind::Multifunction => [
                Capability::Scan,
                Capability::Print,
                Capability::Copy,
                Capability::Fax,
            ]
            .into(),
            DeviceKind::Scanner => [Capability::Scan].into(),
            DeviceKind::Printer => [Capability::Print].into(),
        }
    }
}

/// Registry entry for one known device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub kind: DeviceKind,
    pub model: String,
    pub capabilities: BTreeSet<Capability>,
}

impl DeviceInfo {
    pub fn new(name: impl Into<String>, kind: DeviceKind, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            model: model.into(),
            capabilities: kind.default_capabilities(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceStatus {
    NotFound,
    Ready,
    Busy,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::NotFound => write!(f, "Not Found"),
            DeviceStatus::Ready => write!(f, "Ready"),
            DeviceStatus::Busy => write!(f, "Busy"),
        }
    }
}

/// Device→capability lookup consumed by the orchestrator.
pub trait DeviceCatalog: Send + Sync {
    fn lookup(&self, device: &str) -> Option<DeviceInfo>;
}

/// Static lookup of known device names.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: BTreeMap<String, DeviceInfo>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `info`, returning `true` when the name was not known before.
    ///
    /// A multifunction entry is never downgraded to a single-function one.
    pub fn register(&mut self, info: DeviceInfo) -> bool {
        match self.devices.get_mut(&info.name) {
            Some(existing) => {
                if existing.kind != DeviceKind::Multifunction {
                    *existing = info;
                }
                false
            }
            None => {
                self.devices.insert(info.name.clone(), info);
                true
            }
        }
    }

    /// Entry registered under `device`.
    pub fn get(&self, device: &str) -> Option<&DeviceInfo> {
        self.devices.get(device)
    }

    pub fn contains(&self, device: &str) -> bool {
        self.devices.contains_key(device)
    }

    /// `None` for unknown devices.
    pub fn kind_of(&self, device: &str) -> Option<DeviceKind> {
        self.get(device).map(|d| d.kind)
    }

    /// Model string, or `"Unknown"`.
    pub fn model_of(&self, device: &str) -> &str {
        self.get(device).map(|d| d.model.as_str()).unwrap_or("Unknown")
    }

    /// Empty for unknown devices.
    pub fn capabilities_of(&self, device: &str) -> BTreeSet<Capability> {
        self.get(device)
            .map(|d| d.capabilities.clone())
            .unwrap_or_default()
    }

    /// Whether a registered device has `capability`; unknown devices cannot.
    pub fn can(&self, device: &str, capability: Capability) -> bool {
        self.get(device)
            .is_some_and(|d| d.capabilities.contains(&capability))
    }

    /// Names of multifunction devices, in name order.
    pub fn multifunction_devices(&self) -> Vec<&str> {
        self.names_where(|d| d.kind == DeviceKind::Multifunction)
    }

    /// Names of devices that can scan, in name order.
    pub fn scan_devices(&self) -> Vec<&str> {
        self.names_where(|d| d.capabilities.contains(&Capability::Scan))
    }

    /// Names of devices that can print, in name order.
    pub fn print_devices(&self) -> Vec<&str> {
        self.names_where(|d| d.capabilities.contains(&Capability::Print))
    }

    /// Availability as far as the registry knows; busy state is tracked by
    /// the process pool.
    pub fn status_of(&self, device: &str) -> DeviceStatus {
        if self.contains(device) {
            DeviceStatus::Ready
        } else {
            DeviceStatus::NotFound
        }
    }

    /// Entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = &DeviceInfo> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    fn names_where(&self, pred: impl Fn(&DeviceInfo) -> bool) -> Vec<&str> {
        self.devices
            .values()
            .filter(|d| pred(d))
            .map(|d| d.name.as_str())
            .collect()
    }
}

impl DeviceCatalog for DeviceRegistry {
    fn lookup(&self, device: &str) -> Option<DeviceInfo> {
        self.get(device).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> DeviceRegistry {
        let mut r = DeviceRegistry::new();
        r.register(DeviceInfo::new("mfc", DeviceKind::Multifunction, "Brother MFC-J3940DW"));
        r.register(DeviceInfo::new("scanner", DeviceKind::Scanner, "Unknown"));
        r.register(DeviceInfo::new("laser", DeviceKind::Printer, "Unknown"));
        r
    }

    #[test]
    fn multifunction_has_all_capabilities() {
        let r = registry();
        assert!(r.can("mfc", Capability::Scan));
        assert!(r.can("mfc", Capability::Print));
        assert!(r.can("mfc", Capability::Copy));
        assert!(r.can("mfc", Capability::Fax));
        assert!(!r.can("laser", Capability::Scan));
        assert!(!r.can("ghost", Capability::Print));
    }

    #[test]
    fn listing_by_capability() {
        let r = registry();
        assert_eq!(r.multifunction_devices(), vec!["mfc"]);
        assert_eq!(r.scan_devices(), vec!["mfc", "scanner"]);
        assert_eq!(r.print_devices(), vec!["laser", "mfc"]);
    }

    #[test]
    fn multifunction_is_never_downgraded() {
        let mut r = registry();
        let fresh = r.register(DeviceInfo::new("mfc", DeviceKind::Printer, "Generic"));
        assert!(!fresh);
        assert_eq!(r.kind_of("mfc"), Some(DeviceKind::Multifunction));
        assert_eq!(r.model_of("mfc"), "Brother MFC-J3940DW");
    }

    #[test]
    fn single_function_entry_can_be_upgraded() {
        let mut r = registry();
        r.register(DeviceInfo::new("scanner", DeviceKind::Multifunction, "Brother MFC-J3940DW"));
        assert_eq!(r.kind_of("scanner"), Some(DeviceKind::Multifunction));
    }

    #[test]
    fn unknown_device_lookups() {
        let r = registry();
        assert_eq!(r.model_of("ghost"), "Unknown");
        assert!(r.capabilities_of("ghost").is_empty());
        assert_eq!(r.status_of("ghost"), DeviceStatus::NotFound);
        assert_eq!(r.status_of("mfc"), DeviceStatus::Ready);
        assert!(r.lookup("ghost").is_none());
    }
}
