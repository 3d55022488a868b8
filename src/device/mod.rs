mod listing;
mod registry;
mod settings;

pub use listing::{
    Confidence, DEFAULT_MODEL_HINT, DetectedDevice, ListingParser, PrinterListing, ScannerListing,
};
pub use registry::{Capability, DeviceCatalog, DeviceInfo, DeviceKind, DeviceRegistry, DeviceStatus};
pub use settings::{
    ColorMode, DeviceSettings, MediaSize, PrintSettings, ScanFormat, ScanSettings, Sides,
};
