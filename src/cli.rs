//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use docflow::batch::BatchLabels;
use docflow::config::DocflowConfig;
use docflow::device::{MediaSize, Sides};
use docflow::process::OperationKind;
use docflow::upload::DEFAULT_PARENT;

/// docflow: batch scan, print and upload for multi-function devices.
#[derive(Debug, Parser)]
#[command(name = "docflow", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose logging (overridden by DOCFLOW_LOG).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Print events as JSON lines.
    #[arg(long, global = true, default_value_t = false)]
    pub json: bool,

    /// Simulate an operation kind instead of running its program.
    #[arg(long, global = true, value_enum)]
    pub simulate: Vec<SimulateArg>,

    /// Base URL of the file store.
    #[arg(long, global = true)]
    pub upload_server: Option<String>,

    /// Root directory for scanned pages.
    #[arg(long, global = true)]
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SimulateArg {
    Scan,
    Print,
    Upload,
    All,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List scanners and printers.
    Devices,

    /// Scan one page.
    Scan {
        device: String,

        /// Where to write the page.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Scan a multi-page batch from the document feeder.
    Batch {
        device: String,

        #[arg(long)]
        pages: u32,

        #[arg(long, requires_all = ["class_name", "subject"])]
        exam_type: Option<String>,

        #[arg(long = "class", requires = "exam_type")]
        class_name: Option<String>,

        #[arg(long, requires = "exam_type")]
        subject: Option<String>,
    },

    /// Print a file.
    Print {
        device: String,
        file: PathBuf,

        #[arg(long)]
        copies: Option<u32>,

        /// A3, A4, A5, B5, Letter or Legal.
        #[arg(long)]
        media: Option<MediaSize>,

        /// one-sided, two-sided-long-edge or two-sided-short-edge.
        #[arg(long)]
        sides: Option<Sides>,

        #[arg(long)]
        job_name: Option<String>,
    },

    /// List jobs waiting on a print destination.
    Jobs { device: String },

    /// Remove a job from a print destination's queue.
    CancelJob { device: String, job_id: u32 },

    /// Hold new jobs on a print destination.
    Pause { device: String },

    /// Release a paused print destination.
    Resume { device: String },

    /// Upload a file to the file store.
    Upload {
        device: String,
        file: PathBuf,

        #[arg(long, default_value = DEFAULT_PARENT)]
        parent: String,
    },

    /// Simulated end-to-end run: batch scan, print the first page, upload
    /// every page.
    Demo {
        #[arg(long, default_value_t = 3)]
        pages: u32,
    },
}

impl Cli {
    /// Command-line flags take precedence over file and environment.
    pub fn apply_to(&self, config: &mut DocflowConfig) {
        for sim in &self.simulate {
            match sim {
                SimulateArg::Scan => config.simulation.enable(OperationKind::Scan),
                SimulateArg::Print => config.simulation.enable(OperationKind::Print),
                SimulateArg::Upload => config.simulation.enable(OperationKind::Upload),
                SimulateArg::All => config.simulation.enable_all(),
            }
        }
        if matches!(self.command, Command::Demo { .. }) {
            config.simulation.enable_all();
        }
        if let Some(server) = &self.upload_server {
            config.upload_server = server.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
    }
}

impl Command {
    /// Labels of a `batch` command, when given.
    pub fn batch_labels(&self) -> Option<BatchLabels> {
        match self {
            Command::Batch {
                exam_type: Some(exam),
                class_name: Some(class),
                subject: Some(subject),
                ..
            } => Some(BatchLabels::new(exam, class, subject)),
            _ => None,
        }
    }
}
