//! Configuration loaded from `docflow.toml`.
//!
//! Missing keys fall back to defaults. `DOCFLOW_UPLOAD_SERVER` and
//! `DOCFLOW_SIMULATE` take precedence over the file; command-line flags
//! take precedence over both.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::process::OperationKind;

pub const CONFIG_FILE: &str = "docflow.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DocflowConfig {
    /// Base URL of the remote file store.
    #[serde(default = "default_upload_server")]
    pub upload_server: String,

    /// Root directory for batch scan output.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Interval of the batch timer that requests the next page.
    #[serde(default = "default_batch_tick_ms")]
    pub batch_tick_ms: u64,

    /// How long a terminated process gets before it is killed.
    #[serde(default = "default_terminate_grace_ms")]
    pub terminate_grace_ms: u64,

    /// Buffer size of the event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    #[serde(default)]
    pub programs: ProgramConfig,

    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// External programs invoked per operation kind.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProgramConfig {
    /// Page capture (`scanimage`).
    #[serde(default = "default_scan_program")]
    pub scan: String,
    /// Job submission (`lp`).
    #[serde(default = "default_print_program")]
    pub print: String,
    /// File transport (`curl`).
    #[serde(default = "default_upload_program")]
    pub upload: String,
}

/// Per-kind simulation toggles.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SimulationConfig {
    #[serde(default)]
    pub scan: bool,
    #[serde(default)]
    pub print: bool,
    #[serde(default)]
    pub upload: bool,
    /// Simulated run time of each operation.
    #[serde(default = "default_sim_delay_ms")]
    pub delay_ms: u64,
}

/// Upload server used by the deployed scan stations.
fn default_upload_server() -> String {
    "http://117.72.74.246:18000".to_string()
}

/// Relative to the working directory.
fn default_output_dir() -> PathBuf {
    PathBuf::from("scans")
}

/// One page request per second.
fn default_batch_tick_ms() -> u64 {
    1000
}

/// Time between SIGTERM and SIGKILL.
fn default_terminate_grace_ms() -> u64 {
    5000
}

/// Slow subscribers lag past this many events.
fn default_event_capacity() -> usize {
    256
}

/// SANE command-line frontend.
fn default_scan_program() -> String {
    "scanimage".to_string()
}

/// CUPS job submission.
fn default_print_program() -> String {
    "lp".to_string()
}

/// Multipart POST transport.
fn default_upload_program() -> String {
    "curl".to_string()
}

/// Half a second per simulated operation.
fn default_sim_delay_ms() -> u64 {
    500
}

impl Default for ProgramConfig {
    fn default() -> Self {
        Self {
            scan: default_scan_program(),
            print: default_print_program(),
            upload: default_upload_program(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            scan: false,
            print: false,
            upload: false,
            delay_ms: default_sim_delay_ms(),
        }
    }
}

impl SimulationConfig {
    /// Queue commands follow the print toggle.
    pub fn enabled(&self, kind: OperationKind) -> bool {
        match kind {
            OperationKind::Scan => self.scan,
            OperationKind::Print | OperationKind::Queue => self.print,
            OperationKind::Upload => self.upload,
        }
    }

    pub fn enable(&mut self, kind: OperationKind) {
        match kind {
            OperationKind::Scan => self.scan = true,
            OperationKind::Print | OperationKind::Queue => self.print = true,
            OperationKind::Upload => self.upload = true,
        }
    }

    pub fn enable_all(&mut self) {
        for kind in OperationKind::ALL {
            self.enable(kind);
        }
    }

    /// Applies a `DOCFLOW_SIMULATE`-style list: `all`, or kind names
    /// separated by commas.
    pub fn enable_from_list(&mut self, list: &str) -> Result<()> {
        for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match item.to_ascii_lowercase().as_str() {
                "all" => self.enable_all(),
                "scan" => self.enable(OperationKind::Scan),
                "print" => self.enable(OperationKind::Print),
                "upload" => self.enable(OperationKind::Upload),
                other => anyhow::bail!("unknown simulation kind '{other}'"),
            }
        }
        Ok(())
    }
}

impl Default for DocflowConfig {
    fn default() -> Self {
        Self {
            upload_server: default_upload_server(),
            output_dir: default_output_dir(),
            batch_tick_ms: default_batch_tick_ms(),
            terminate_grace_ms: default_terminate_grace_ms(),
            event_capacity: default_event_capacity(),
            programs: ProgramConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl DocflowConfig {
    /// Loads `docflow.toml` from the current directory, falling back to
    /// defaults when the file is absent.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(Path::new(CONFIG_FILE))?;
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Loads and validates `path`; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str::<DocflowConfig>(&contents)
                .with_context(|| format!("parsing {}", path.display()))?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Environment overrides, read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(server) = lookup("DOCFLOW_UPLOAD_SERVER")
            && !server.is_empty()
        {
            self.upload_server = server;
        }
        if let Some(list) = lookup("DOCFLOW_SIMULATE") {
            self.simulation
                .enable_from_list(&list)
                .context("invalid DOCFLOW_SIMULATE")?;
        }
        Ok(())
    }

    /// Rejects values the orchestrator cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.batch_tick_ms == 0 {
            anyhow::bail!("batch_tick_ms must be greater than zero");
        }
        if self.event_capacity == 0 {
            anyhow::bail!("event_capacity must be greater than zero");
        }
        Ok(())
    }

    /// Period of the shared batch timer.
    pub fn batch_tick(&self) -> Duration {
        Duration::from_millis(self.batch_tick_ms)
    }

    /// Grace period between terminate and kill on release.
    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }
}
