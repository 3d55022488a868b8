//! Per-device scan and print settings.
//!
//! Settings are typed; string input (CLI flags, the legacy key/value
//! configuration map) is parsed through `FromStr`, and anything outside the
//! supported values fails with [`DocflowError::InvalidSettings`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DocflowError, Result};

/// Output image format of one capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanFormat {
    #[default]
    Jpeg,
    Png,
    Pdf,
}

impl ScanFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanFormat::Jpeg => "jpeg",
            ScanFormat::Png => "png",
            ScanFormat::Pdf => "pdf",
        }
    }
}

impl FromStr for ScanFormat {
    type Err = DocflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(ScanFormat::Jpeg),
            "png" => Ok(ScanFormat::Png),
            "pdf" => Ok(ScanFormat::Pdf),
            other => Err(DocflowError::InvalidSettings(format!(
                "unsupported scan format: {other}"
            ))),
        }
    }
}

/// SANE colour mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ColorMode {
    #[default]
    Color,
    Gray,
    Lineart,
}

impl ColorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColorMode::Color => "Color",
            ColorMode::Gray => "Gray",
            ColorMode::Lineart => "Lineart",
        }
    }
}

impl FromStr for ColorMode {
    type Err = DocflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "color" | "colour" => Ok(ColorMode::Color),
            "gray" | "grey" => Ok(ColorMode::Gray),
            "lineart" => Ok(ColorMode::Lineart),
            _ => Err(DocflowError::InvalidSettings(format!(
                "unsupported colour mode: {s}"
            ))),
        }
    }
}

/// Paper size passed to the print command as `media=<SIZE>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MediaSize {
    A3,
    #[default]
    A4,
    A5,
    B5,
    Letter,
    Legal,
}

impl MediaSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaSize::A3 => "A3",
            MediaSize::A4 => "A4",
            MediaSize::A5 => "A5",
            MediaSize::B5 => "B5",
            MediaSize::Letter => "Letter",
            MediaSize::Legal => "Legal",
        }
    }
}

impl FromStr for MediaSize {
    type Err = DocflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "A3" => Ok(MediaSize::A3),
            "A4" => Ok(MediaSize::A4),
            "A5" => Ok(MediaSize::A5),
            "B5" => Ok(MediaSize::B5),
            "LETTER" => Ok(MediaSize::Letter),
            "LEGAL" => Ok(MediaSize::Legal),
            _ => Err(DocflowError::InvalidSettings(format!(
                "unsupported media size: {s}"
            ))),
        }
    }
}

/// Duplex policy passed to the print command as `sides=<...>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Sides {
    OneSided,
    #[default]
    TwoSidedLongEdge,
    TwoSidedShortEdge,
}

impl Sides {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sides::OneSided => "one-sided",
            Sides::TwoSidedLongEdge => "two-sided-long-edge",
            Sides::TwoSidedShortEdge => "two-sided-short-edge",
        }
    }
}

impl FromStr for Sides {
    type Err = DocflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "one-sided" => Ok(Sides::OneSided),
            "two-sided-long-edge" => Ok(Sides::TwoSidedLongEdge),
            "two-sided-short-edge" => Ok(Sides::TwoSidedShortEdge),
            _ => Err(DocflowError::InvalidSettings(format!(
                "unsupported sides value: {s}"
            ))),
        }
    }
}

macro_rules! display_as_str {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

display_as_str!(ScanFormat, ColorMode, MediaSize, Sides);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSettings {
    pub dpi: u32,
    pub format: ScanFormat,
    pub color_mode: ColorMode,
    pub duplex: bool,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            dpi: 300,
            format: ScanFormat::default(),
            color_mode: ColorMode::default(),
            duplex: false,
        }
    }
}

impl ScanSettings {
    pub fn validate(&self) -> Result<()> {
        if self.dpi == 0 {
            return Err(DocflowError::InvalidSettings(
                "scan resolution must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintSettings {
    pub copies: u32,
    pub media: MediaSize,
    pub sides: Sides,
}

impl Default for PrintSettings {
    fn default() -> Self {
        Self {
            copies: 1,
            media: MediaSize::default(),
            sides: Sides::default(),
        }
    }
}

impl PrintSettings {
    pub fn validate(&self) -> Result<()> {
        if self.copies == 0 {
            return Err(DocflowError::InvalidSettings(
                "copy count must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Everything the command builder needs to know about one device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub scan: ScanSettings,
    pub print: PrintSettings,
}

impl DeviceSettings {
    /// Applies the flat key/value configuration used by device databases
    /// (`scan_resolution`, `scan_mode`, `print_media`, ...).
    ///
    /// The update is all-or-nothing: on error `self` is left untouched.
    /// Unknown keys are ignored.
    pub fn apply_map(&mut self, map: &BTreeMap<String, String>) -> Result<()> {
        let mut next = self.clone();
        for (key, value) in map {
            match key.as_str() {
                "scan_resolution" => next.scan.dpi = parse_positive(key, value)?,
                "scan_mode" => next.scan.color_mode = value.parse()?,
                "scan_format" => next.scan.format = value.parse()?,
                "scan_source" => {
                    next.scan.duplex = match value.as_str() {
                        "ADF" => false,
                        "ADF Duplex" => true,
                        _ => {
                            return Err(DocflowError::InvalidSettings(format!(
                                "unsupported scan source: {value}"
                            )));
                        }
                    }
                }
                "print_media" => next.print.media = value.parse()?,
                "print_sides" => next.print.sides = value.parse()?,
                "print_copies" => next.print.copies = parse_positive(key, value)?,
                _ => {}
            }
        }
        next.scan.validate()?;
        next.print.validate()?;
        *self = next;
        Ok(())
    }

    /// Inverse of [`apply_map`](Self::apply_map).
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let source = if self.scan.duplex { "ADF Duplex" } else { "ADF" };
        [
            ("scan_resolution", self.scan.dpi.to_string()),
            ("scan_mode", self.scan.color_mode.to_string()),
            ("scan_format", self.scan.format.to_string()),
            ("scan_source", source.to_string()),
            ("print_media", self.print.media.to_string()),
            ("print_sides", self.print.sides.to_string()),
            ("print_copies", self.print.copies.to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }
}

fn parse_positive(key: &str, value: &str) -> Result<u32> {
    match value.trim().parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(DocflowError::InvalidSettings(format!(
            "{key} must be a positive integer, got {value:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_match_device_database_defaults() {
        let s = DeviceSettings::default();
        assert_eq!(s.scan.dpi, 300);
        assert_eq!(s.scan.format, ScanFormat::Jpeg);
        assert_eq!(s.scan.color_mode, ColorMode::Color);
        assert!(!s.scan.duplex);
        assert_eq!(s.print.copies, 1);
        assert_eq!(s.print.media, MediaSize::A4);
        assert_eq!(s.print.sides, Sides::TwoSidedLongEdge);
    }

    #[test]
    fn apply_map_updates_every_key() {
        let mut s = DeviceSettings::default();
        s.apply_map(&map(&[
            ("scan_resolution", "600"),
            ("scan_mode", "Gray"),
            ("scan_format", "png"),
            ("scan_source", "ADF Duplex"),
            ("print_media", "A3"),
            ("print_sides", "one-sided"),
            ("print_copies", "2"),
        ]))
        .unwrap();

        assert_eq!(s.scan.dpi, 600);
        assert_eq!(s.scan.color_mode, ColorMode::Gray);
        assert_eq!(s.scan.format, ScanFormat::Png);
        assert!(s.scan.duplex);
        assert_eq!(s.print.media, MediaSize::A3);
        assert_eq!(s.print.sides, Sides::OneSided);
        assert_eq!(s.print.copies, 2);
    }

    #[test]
    fn apply_map_is_all_or_nothing() {
        let mut s = DeviceSettings::default();
        let err = s
            .apply_map(&map(&[("scan_resolution", "600"), ("print_sides", "Duplex")]))
            .unwrap_err();
        assert!(matches!(err, DocflowError::InvalidSettings(_)));
        assert_eq!(s, DeviceSettings::default());
    }

    #[test]
    fn zero_values_are_rejected() {
        let mut s = DeviceSettings::default();
        assert!(s.apply_map(&map(&[("print_copies", "0")])).is_err());
        assert!(s.apply_map(&map(&[("scan_resolution", "-3")])).is_err());
    }

    #[test]
    fn to_map_roundtrips_through_apply_map() {
        let mut original = DeviceSettings::default();
        original.scan.duplex = true;
        original.print.media = MediaSize::Letter;

        let mut restored = DeviceSettings::default();
        restored.apply_map(&original.to_map()).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn enum_parsing_is_forgiving_about_case() {
        assert_eq!("color".parse::<ColorMode>().unwrap(), ColorMode::Color);
        assert_eq!("jpg".parse::<ScanFormat>().unwrap(), ScanFormat::Jpeg);
        assert_eq!("a3".parse::<MediaSize>().unwrap(), MediaSize::A3);
        assert!("tabloid".parse::<MediaSize>().is_err());
    }
}
