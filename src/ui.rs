//! Terminal rendering of device events.
//!
//! Batch scans get one `indicatif` bar per device; everything else is a
//! single coloured line. With `--json` each event is printed as one JSON
//! object per line instead.

use std::collections::HashMap;
use std::time::Duration;

use console::Style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::device::{DeviceInfo, DeviceStatus};
use crate::events::DeviceEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Success,
    Failure,
    Progress,
    Info,
}

/// Plain-text summary of an event and how it should be coloured.
pub fn describe(event: &DeviceEvent) -> (Tone, String) {
    match event {
        DeviceEvent::DeviceDiscovered { device, kind } => {
            (Tone::Info, format!("[{device}] discovered ({kind})"))
        }
        DeviceEvent::ScanStarted {
            device,
            batch: Some(batch),
            total,
        } => (
            Tone::Progress,
            format!("[{device}] batch {batch} started: {total} page(s)"),
        ),
        DeviceEvent::ScanStarted { device, .. } => (Tone::Progress, format!("[{device}] scanning")),
        DeviceEvent::ScanProgress {
            device,
            current,
            total,
            path,
            ..
        } => (
            Tone::Progress,
            format!("[{device}] page {current}/{total} -> {}", path.display()),
        ),
        DeviceEvent::ScanCompleted { device, path } => {
            (Tone::Success, format!("[{device}] scanned {}", path.display()))
        }
        DeviceEvent::ScanError { device, error, .. } => {
            (Tone::Failure, format!("[{device}] scan failed: {error}"))
        }
        DeviceEvent::BatchScanCompleted {
            device,
            batch,
            paths,
        } => (
            Tone::Success,
            format!("[{device}] batch {batch} completed: {} page(s)", paths.len()),
        ),
        DeviceEvent::PrintStarted { device, job_name } => {
            (Tone::Progress, format!("[{device}] printing {job_name}"))
        }
        DeviceEvent::PrintCompleted {
            device,
            job_name,
            job_id,
        } => {
            let id = job_id.map_or_else(|| "no job id".to_string(), |id| format!("job {id}"));
            (Tone::Success, format!("[{device}] printed {job_name} ({id})"))
        }
        DeviceEvent::PrintError { device, error, .. } => {
            (Tone::Failure, format!("[{device}] print failed: {error}"))
        }
        DeviceEvent::PrintJobsReceived { device, jobs } if jobs.is_empty() => {
            (Tone::Info, format!("[{device}] print queue empty"))
        }
        DeviceEvent::PrintJobsReceived { device, jobs } => {
            let listed: Vec<String> = jobs
                .iter()
                .map(|j| format!("{} ({}, {})", j.id, j.user, j.details))
                .collect();
            (
                Tone::Info,
                format!("[{device}] {} queued: {}", jobs.len(), listed.join("; ")),
            )
        }
        DeviceEvent::PrintJobCancelled { device, job_id } => {
            (Tone::Success, format!("[{device}] cancelled job {job_id}"))
        }
        DeviceEvent::PrinterPaused { device } => (Tone::Info, format!("[{device}] printer paused")),
        DeviceEvent::PrinterResumed { device } => (Tone::Info, format!("[{device}] printer resumed")),
        DeviceEvent::UploadStarted { device, path } => {
            (Tone::Progress, format!("[{device}] uploading {}", path.display()))
        }
        DeviceEvent::UploadCompleted { device, path, url } => (
            Tone::Success,
            format!("[{device}] uploaded {} -> {url}", path.display()),
        ),
        DeviceEvent::UploadError { device, path, error } => (
            Tone::Failure,
            format!("[{device}] upload of {} failed: {error}", path.display()),
        ),
    }
}

/// Renders events as they arrive.
pub struct EventPrinter {
    json: bool,
    multi: MultiProgress,
    bars: HashMap<String, ProgressBar>,
    green: Style,
    red: Style,
    yellow: Style,
    dim: Style,
}

impl EventPrinter {
    pub fn new(json: bool) -> Self {
        Self {
            json,
            multi: MultiProgress::new(),
            bars: HashMap::new(),
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
        }
    }

    pub fn show(&mut self, event: &DeviceEvent) {
        if self.json {
            match serde_json::to_string(event) {
                Ok(line) => println!("{line}"),
                Err(e) => eprintln!("cannot serialize event: {e}"),
            }
            return;
        }

        match event {
            DeviceEvent::ScanStarted {
                device,
                batch: Some(_),
                total,
            } => self.start_bar(device, *total),
            DeviceEvent::ScanProgress {
                device, current, ..
            } => {
                if let Some(bar) = self.bars.get(device) {
                    bar.set_position(u64::from(*current));
                }
            }
            DeviceEvent::BatchScanCompleted { device, .. } => {
                if let Some(bar) = self.bars.remove(device) {
                    bar.finish_and_clear();
                }
            }
            DeviceEvent::ScanError {
                device,
                batch: Some(_),
                ..
            } => {
                if let Some(bar) = self.bars.remove(device) {
                    bar.abandon();
                }
            }
            _ => {}
        }

        // Per-page lines would fight with the bar.
        if matches!(event, DeviceEvent::ScanProgress { device, .. } if self.bars.contains_key(device)) {
            return;
        }
        let (tone, text) = describe(event);
        let line = match tone {
            Tone::Success => format!("  {} {text}", self.green.apply_to("✓")),
            Tone::Failure => format!("  {} {text}", self.red.apply_to("✗")),
            Tone::Progress => format!("  {} {text}", self.yellow.apply_to("…")),
            Tone::Info => format!("  {} {text}", self.dim.apply_to("•")),
        };
        self.println(&line);
    }

    /// Device table for the `devices` command.
    pub fn show_devices(&self, devices: &[(DeviceInfo, DeviceStatus)]) {
        if self.json {
            for (info, status) in devices {
                let value = serde_json::json!({
                    "name": info.name,
                    "kind": info.kind,
                    "model": info.model,
                    "capabilities": info.capabilities,
                    "status": status,
                });
                println!("{value}");
            }
            return;
        }
        if devices.is_empty() {
            println!("  {} no devices found", self.yellow.apply_to("!"));
            return;
        }
        for (info, status) in devices {
            let caps: Vec<String> = info.capabilities.iter().map(|c| c.to_string()).collect();
            let status_style = match status {
                DeviceStatus::Ready => &self.green,
                DeviceStatus::Busy => &self.yellow,
                DeviceStatus::NotFound => &self.red,
            };
            println!(
                "  {} {} ({}, {}) [{}]",
                status_style.apply_to(status.to_string()),
                info.name,
                info.kind,
                info.model,
                caps.join(", ")
            );
        }
    }

    /// Clears any bars still on screen.
    pub fn finish(&mut self) {
        for (_, bar) in self.bars.drain() {
            bar.abandon();
        }
    }

    fn start_bar(&mut self, device: &str, total: u32) {
        let bar = self.multi.add(ProgressBar::new(u64::from(total)));
        if let Ok(style) =
            ProgressStyle::default_bar().template("{spinner:.cyan} {prefix} [{bar:30.cyan/blue}] {pos}/{len} pages")
        {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.set_prefix(device.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));
        if let Some(old) = self.bars.insert(device.to_string(), bar) {
            old.abandon();
        }
    }

    fn println(&self, line: &str) {
        if self.bars.is_empty() || self.multi.println(line).is_err() {
            println!("{line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchId;
    use crate::error::DocflowError;
    use crate::print::QueuedJob;
    use std::path::PathBuf;
    use std::sync::Arc;

    #[test]
    fn describe_progress_and_completion() {
        let batch = BatchId::new();
        let (tone, text) = describe(&DeviceEvent::ScanProgress {
            device: "dev1".into(),
            batch: batch.clone(),
            current: 2,
            total: 3,
            path: PathBuf::from("p2.jpeg"),
        });
        assert_eq!(tone, Tone::Progress);
        assert_eq!(text, "[dev1] page 2/3 -> p2.jpeg");

        let (tone, text) = describe(&DeviceEvent::BatchScanCompleted {
            device: "dev1".into(),
            batch: batch.clone(),
            paths: vec![PathBuf::from("a"), PathBuf::from("b")],
        });
        assert_eq!(tone, Tone::Success);
        assert_eq!(text, format!("[dev1] batch {batch} completed: 2 page(s)"));
    }

    #[test]
    fn describe_print_without_job_id() {
        let (_, text) = describe(&DeviceEvent::PrintCompleted {
            device: "mfc".into(),
            job_name: "sheet.pdf".into(),
            job_id: None,
        });
        assert_eq!(text, "[mfc] printed sheet.pdf (no job id)");
    }

    #[test]
    fn describe_print_queue() {
        let (_, empty) = describe(&DeviceEvent::PrintJobsReceived {
            device: "mfc".into(),
            jobs: Vec::new(),
        });
        assert_eq!(empty, "[mfc] print queue empty");

        let (tone, text) = describe(&DeviceEvent::PrintJobsReceived {
            device: "mfc".into(),
            jobs: vec![QueuedJob {
                id: 7,
                destination: "mfc".into(),
                user: "alice".into(),
                details: "1024".into(),
            }],
        });
        assert_eq!(tone, Tone::Info);
        assert_eq!(text, "[mfc] 1 queued: 7 (alice, 1024)");
    }

    #[test]
    fn describe_errors_as_failures() {
        let (tone, text) = describe(&DeviceEvent::UploadError {
            device: "dev1".into(),
            path: PathBuf::from("/tmp/x.jpg"),
            error: Arc::new(DocflowError::Busy("dev1".into())),
        });
        assert_eq!(tone, Tone::Failure);
        assert!(text.contains("/tmp/x.jpg"));
        assert!(text.contains("upload already in flight"));
    }

    #[test]
    fn printer_tracks_batch_bars() {
        let mut printer = EventPrinter::new(false);
        let batch = BatchId::new();
        printer.show(&DeviceEvent::ScanStarted {
            device: "dev1".into(),
            batch: Some(batch.clone()),
            total: 2,
        });
        assert!(printer.bars.contains_key("dev1"));
        printer.show(&DeviceEvent::BatchScanCompleted {
            device: "dev1".into(),
            batch,
            paths: vec![],
        });
        assert!(printer.bars.is_empty());
        printer.finish();
    }
}
