mod cli;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

use cli::{Cli, Command};
use docflow::config::DocflowConfig;
use docflow::device::{DeviceInfo, DeviceKind, ListingParser, PrinterListing, ScannerListing};
use docflow::events::DeviceEvent;
use docflow::logging;
use docflow::process::OperationKind;
use docflow::ui::EventPrinter;
use docflow::upload::DEFAULT_PARENT;
use docflow::Orchestrator;

const SIMULATED_DEVICE: &str = "sim-mfc";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let mut config = DocflowConfig::load()?;
    cli.apply_to(&mut config);

    let orchestrator = Orchestrator::new(&config);
    let mut printer = EventPrinter::new(cli.json);
    let outcome = run(&cli.command, &orchestrator, &mut printer).await;

    orchestrator.shutdown().await;
    printer.finish();
    outcome
}

async fn run(command: &Command, orch: &Orchestrator, printer: &mut EventPrinter) -> Result<()> {
    let mut events = orch.subscribe();
    match command {
        Command::Devices => list_devices(orch, printer).await,

        Command::Scan { device, output } => {
            orch.start_scan(device, output.clone()).await?;
            wait_for(&mut events, printer, device, |e| {
                matches!(e, DeviceEvent::ScanCompleted { .. } | DeviceEvent::ScanError { .. })
            })
            .await
            .map(drop)
        }

        Command::Batch { device, pages, .. } => {
            orch.start_batch_scan(device, *pages, command.batch_labels())
                .await?;
            wait_for(&mut events, printer, device, is_batch_end).await.map(drop)
        }

        Command::Print {
            device,
            file,
            copies,
            media,
            sides,
            job_name,
        } => {
            let mut settings = orch.settings(device).await.print;
            if let Some(copies) = copies {
                settings.copies = *copies;
            }
            if let Some(media) = media {
                settings.media = *media;
            }
            if let Some(sides) = sides {
                settings.sides = *sides;
            }
            orch.configure_print(device, settings).await?;
            orch.print_file(device, file, job_name.as_deref()).await?;
            wait_for(&mut events, printer, device, |e| {
                matches!(e, DeviceEvent::PrintCompleted { .. } | DeviceEvent::PrintError { .. })
            })
            .await
            .map(drop)
        }

        Command::Jobs { device } => {
            orch.list_print_jobs(device).await?;
            wait_for(&mut events, printer, device, is_queue_end).await.map(drop)
        }

        Command::CancelJob { device, job_id } => {
            orch.cancel_print_job(device, *job_id).await?;
            wait_for(&mut events, printer, device, is_queue_end).await.map(drop)
        }

        Command::Pause { device } => {
            orch.pause_printer(device).await?;
            wait_for(&mut events, printer, device, is_queue_end).await.map(drop)
        }

        Command::Resume { device } => {
            orch.resume_printer(device).await?;
            wait_for(&mut events, printer, device, is_queue_end).await.map(drop)
        }

        Command::Upload {
            device,
            file,
            parent,
        } => {
            orch.upload_file(device, file, parent).await?;
            wait_for(&mut events, printer, device, is_upload_end).await.map(drop)
        }

        Command::Demo { pages } => demo(orch, printer, &mut events, *pages).await,
    }
}

/// Registers what `scanimage -L` and `lpstat -p` report, or a synthetic
/// device when scanning or printing is simulated.
async fn list_devices(orch: &Orchestrator, printer: &mut EventPrinter) -> Result<()> {
    if orch.is_simulated(OperationKind::Scan) || orch.is_simulated(OperationKind::Print) {
        orch.register_device(DeviceInfo::new(
            SIMULATED_DEVICE,
            DeviceKind::Multifunction,
            "Simulated MFC",
        ))
        .await;
    }
    if !orch.is_simulated(OperationKind::Scan) {
        ingest(orch, &ScannerListing::default(), "scanimage", &["-L"]).await;
    }
    if !orch.is_simulated(OperationKind::Print) {
        ingest(orch, &PrinterListing::default(), "lpstat", &["-p"]).await;
    }

    let mut rows = Vec::new();
    for info in orch.devices().await {
        let status = orch.device_status(&info.name).await;
        rows.push((info, status));
    }
    printer.show_devices(&rows);
    Ok(())
}

async fn ingest(orch: &Orchestrator, parser: &dyn ListingParser, program: &str, args: &[&str]) {
    match tokio::process::Command::new(program).args(args).output().await {
        Ok(output) => {
            let listing = String::from_utf8_lossy(&output.stdout);
            let added = orch.ingest_listing(parser, &listing).await;
            info!(program, found = added.len(), "device listing parsed");
        }
        Err(e) => warn!(program, error = %e, "device listing unavailable"),
    }
}

/// Batch-scans on a simulated device, prints the first page and uploads
/// every page.
async fn demo(
    orch: &Orchestrator,
    printer: &mut EventPrinter,
    events: &mut broadcast::Receiver<DeviceEvent>,
    pages: u32,
) -> Result<()> {
    orch.register_device(DeviceInfo::new(
        SIMULATED_DEVICE,
        DeviceKind::Multifunction,
        "Simulated MFC",
    ))
    .await;

    orch.start_batch_scan(SIMULATED_DEVICE, pages, None).await?;
    let paths: Vec<PathBuf> = match wait_for(events, printer, SIMULATED_DEVICE, is_batch_end).await? {
        DeviceEvent::BatchScanCompleted { paths, .. } => paths,
        other => bail!("batch ended with {other:?}"),
    };

    let first = paths.first().context("batch produced no pages")?;
    orch.print_file(SIMULATED_DEVICE, first, None).await?;
    wait_for(events, printer, SIMULATED_DEVICE, |e| {
        matches!(e, DeviceEvent::PrintCompleted { .. } | DeviceEvent::PrintError { .. })
    })
    .await?;

    // One upload in flight per device.
    for path in &paths {
        orch.upload_file(SIMULATED_DEVICE, path, DEFAULT_PARENT).await?;
        wait_for(events, printer, SIMULATED_DEVICE, is_upload_end).await?;
    }
    Ok(())
}

fn is_batch_end(e: &DeviceEvent) -> bool {
    matches!(e, DeviceEvent::BatchScanCompleted { .. } | DeviceEvent::ScanError { .. })
}

fn is_queue_end(e: &DeviceEvent) -> bool {
    matches!(
        e,
        DeviceEvent::PrintJobsReceived { .. }
            | DeviceEvent::PrintJobCancelled { .. }
            | DeviceEvent::PrinterPaused { .. }
            | DeviceEvent::PrinterResumed { .. }
            | DeviceEvent::PrintError { .. }
    )
}

fn is_upload_end(e: &DeviceEvent) -> bool {
    matches!(e, DeviceEvent::UploadCompleted { .. } | DeviceEvent::UploadError { .. })
}

/// Shows events until `done` matches one for `device`; an error event ends
/// the wait with an error.
async fn wait_for(
    events: &mut broadcast::Receiver<DeviceEvent>,
    printer: &mut EventPrinter,
    device: &str,
    done: impl Fn(&DeviceEvent) -> bool,
) -> Result<DeviceEvent> {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(n)) => {
                warn!(skipped = n, "event display fell behind");
                continue;
            }
            Err(RecvError::Closed) => bail!("event channel closed"),
        };
        printer.show(&event);
        if event.device() != device || !done(&event) {
            continue;
        }
        if let Some(error) = event.error() {
            bail!("{error}");
        }
        return Ok(event);
    }
}
