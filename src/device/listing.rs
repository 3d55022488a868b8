//! Parsers for device listings printed by `scanimage -L` and `lpstat -p`.
//!
//! Classification from free text is heuristic, so every detected device
//! carries a [`Confidence`]. Only a line that mentions the configured model
//! hint is trusted as a multifunction device.

use serde::{Deserialize, Serialize};

use super::registry::{DeviceInfo, DeviceKind};

pub const DEFAULT_MODEL_HINT: &str = "Brother MFC-J3940DW";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Confidence {
    Low,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedDevice {
    pub name: String,
    pub kind: DeviceKind,
    pub model: String,
    pub confidence: Confidence,
}

impl DetectedDevice {
    pub fn into_info(self) -> DeviceInfo {
        DeviceInfo::new(self.name, self.kind, self.model)
    }
}

pub trait ListingParser: Send + Sync {
    fn parse(&self, listing: &str) -> Vec<DetectedDevice>;
}

/// Parses lines like ``device `brother4:net1;dev0' is a Brother MFC-J3940DW scanner``.
#[derive(Debug, Clone)]
pub struct ScannerListing {
    model_hint: String,
}

impl ScannerListing {
    pub fn new(model_hint: impl Into<String>) -> Self {
        Self {
            model_hint: model_hint.into(),
        }
    }
}

impl Default for ScannerListing {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL_HINT)
    }
}

impl ListingParser for ScannerListing {
    fn parse(&self, listing: &str) -> Vec<DetectedDevice> {
        listing
            .lines()
            .filter(|line| line.contains("device"))
            .filter_map(|line| {
                let name = backtick_quoted(line)?;
                Some(classify(name, line, &self.model_hint, DeviceKind::Scanner))
            })
            .collect()
    }
}

/// Parses lines like `printer MFC-J3940DW is idle.  enabled since ...`.
#[derive(Debug, Clone)]
pub struct PrinterListing {
    model_hint: String,
}

impl PrinterListing {
    pub fn new(model_hint: impl Into<String>) -> Self {
        Self {
            model_hint: model_hint.into(),
        }
    }
}

impl Default for PrinterListing {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL_HINT)
    }
}

impl ListingParser for PrinterListing {
    fn parse(&self, listing: &str) -> Vec<DetectedDevice> {
        listing
            .lines()
            .filter(|line| line.starts_with("printer"))
            .filter_map(|line| {
                let name = line.split_whitespace().nth(1)?;
                Some(classify(name, line, &self.model_hint, DeviceKind::Printer))
            })
            .collect()
    }
}

fn backtick_quoted(line: &str) -> Option<&str> {
    let start = line.find('`')? + 1;
    let len = line[start..].find('\'')?;
    (len > 0).then(|| &line[start..start + len])
}

fn classify(name: &str, line: &str, hint: &str, fallback: DeviceKind) -> DetectedDevice {
    let matches_hint = !hint.is_empty() && line.to_lowercase().contains(&hint.to_lowercase());
    if matches_hint {
        DetectedDevice {
            name: name.to_string(),
            kind: DeviceKind::Multifunction,
            model: hint.to_string(),
            confidence: Confidence::High,
        }
    } else {
        DetectedDevice {
            name: name.to_string(),
            kind: fallback,
            model: "Unknown".to_string(),
            confidence: Confidence::Low,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCANIMAGE: &str = "\
device `brother4:net1;dev0' is a Brother MFC-J3940DW USB scanner
device `v4l:/dev/video0' is a Noname Integrated Camera virtual device
No scanners were identified. If you were expecting something different,
";

    const LPSTAT: &str = "\
printer MFC-J3940DW is idle.  enabled since Mon 01 Jan 2024 09:00:00 AM
\tBrother MFC-J3940DW, using driver-less IPP
printer Office_Laser now printing Office_Laser-42.  enabled since Mon 01 Jan 2024
";

    #[test]
    fn scanner_listing_extracts_quoted_names() {
        let found = ScannerListing::default().parse(SCANIMAGE);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].name, "brother4:net1;dev0");
        assert_eq!(found[0].kind, DeviceKind::Multifunction);
        assert_eq!(found[0].confidence, Confidence::High);
        assert_eq!(found[1].name, "v4l:/dev/video0");
        assert_eq!(found[1].kind, DeviceKind::Scanner);
        assert_eq!(found[1].confidence, Confidence::Low);
    }

    #[test]
    fn printer_listing_uses_second_word() {
        let found = PrinterListing::default().parse(LPSTAT);
        let names: Vec<_> = found.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["MFC-J3940DW", "Office_Laser"]);
        // The model only appears on the continuation line, so the printer
        // line itself is not enough evidence.
        assert!(found.iter().all(|d| d.kind == DeviceKind::Printer));
    }

    #[test]
    fn hint_matching_is_case_insensitive() {
        let parser = PrinterListing::new("office_laser");
        let found = parser.parse(LPSTAT);
        assert_eq!(found[1].kind, DeviceKind::Multifunction);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let found = ScannerListing::default().parse("device without quotes\ndevice `' empty\n");
        assert!(found.is_empty());
        assert!(PrinterListing::default().parse("printer\n").is_empty());
    }

    #[test]
    fn detected_device_converts_to_registry_entry() {
        let info = ScannerListing::default().parse(SCANIMAGE).remove(0).into_info();
        assert_eq!(info.kind, DeviceKind::Multifunction);
        assert_eq!(info.capabilities.len(), 4);
    }
}
