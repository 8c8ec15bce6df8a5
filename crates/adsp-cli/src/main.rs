//! `adsp-console` — bring-up console for the Intel audio DSP.
//!
//! Loads firmware through an external loader, then attaches to the DSP BAR
//! and runs the console loop: decode the winstream log to stdout and answer
//! firmware IPC requests until Ctrl-C.
//!
//! ```text
//! USAGE:
//!   adsp-console --device 0000:00:1f.3 --fw fw.bin --romext ext.bin --loader ./load
//!   adsp-console --device 0000:00:1f.3 --log-only          Attach without loading
//!   adsp-console --load-only --fw fw.bin --romext ext.bin --loader ./load
//! ```

use adsp_chip::windows::{HostWindow, WindowLayout, FW_STATUS_OFFSET};
use adsp_console::prelude::*;
use adsp_console::{load_firmware, CommandLoader, LoadOptions};
use anyhow::{bail, Context, Result};
use clap::Parser;
use clap_num::maybe_hex;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "adsp-console", about = "Intel audio DSP bring-up console", version)]
struct Cli {
    /// PCIe address of the DSP (e.g. 0000:00:1f.3).
    #[arg(long)]
    device: Option<String>,

    /// BAR index holding the DSP register space.
    #[arg(long, default_value_t = 4)]
    bar: usize,

    /// Firmware image to load.
    #[arg(long)]
    fw: Option<PathBuf>,

    /// ROM image(s), in load order (repeatable).
    #[arg(long)]
    rom: Vec<PathBuf>,

    /// ROM extension image.
    #[arg(long)]
    romext: Option<PathBuf>,

    /// External loader executable that pushes the images onto the device.
    #[arg(long)]
    loader: Option<PathBuf>,

    /// Skip firmware loading; just attach to the running firmware.
    #[arg(long, conflicts_with = "load_only")]
    log_only: bool,

    /// Load firmware and exit without running the console.
    #[arg(long)]
    load_only: bool,

    /// Start from the live end of the log instead of replaying history.
    #[arg(long)]
    no_log_history: bool,

    /// Route decoded firmware log text through the structured logger.
    #[arg(long)]
    trace_logger: bool,

    /// Treat a firmware load timeout as success (flaky FPGA links).
    #[arg(long)]
    ignore_load_errors: bool,

    /// Read shared memory one byte at a time (slow interconnects).
    #[arg(long)]
    slow_read: bool,

    /// Override the IPC register block offset within the BAR.
    #[arg(long, value_parser = maybe_hex::<usize>)]
    ipc_base: Option<usize>,

    /// Override the offset of host window 0.
    #[arg(long, value_parser = maybe_hex::<usize>)]
    window_base: Option<usize>,

    /// Override the distance between consecutive host windows.
    #[arg(long, value_parser = maybe_hex::<usize>)]
    window_stride: Option<usize>,

    /// Override the host window size.
    #[arg(long, value_parser = maybe_hex::<usize>)]
    window_size: Option<usize>,
}

impl Cli {
    fn layout(&self) -> WindowLayout {
        let mut layout = WindowLayout::ACE_FPGA;
        if let Some(v) = self.ipc_base {
            layout.ipc_base = v;
        }
        if let Some(v) = self.window_base {
            layout.window_base = v;
        }
        if let Some(v) = self.window_stride {
            layout.window_stride = v;
        }
        if let Some(v) = self.window_size {
            layout.window_size = v;
        }
        layout
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    // Validate the whole configuration before touching hardware
    if !cli.log_only {
        if cli.fw.is_none() {
            bail!("firmware loading requested but --fw is missing (use --log-only to skip)");
        }
        if cli.romext.is_none() {
            bail!("firmware loading requested but --romext is missing");
        }
        if cli.loader.is_none() {
            bail!("firmware loading requested but --loader is missing");
        }
    }
    if !cli.load_only && cli.device.is_none() {
        bail!("--device is required to run the console");
    }

    if !cli.log_only {
        let images = FirmwareImages::from_files(
            &cli.rom,
            cli.romext.as_deref().context("--romext is missing")?,
            cli.fw.as_deref().context("--fw is missing")?,
        )?;
        let mut loader = CommandLoader::new(cli.loader.clone().context("--loader is missing")?);
        let opts = LoadOptions {
            ignore_errors: cli.ignore_load_errors,
        };
        load_firmware(&mut loader, &images, opts)?;
    }

    if cli.load_only {
        return Ok(());
    }

    run_console(&cli)
}

fn run_console(cli: &Cli) -> Result<()> {
    let device = cli.device.as_deref().context("--device is missing")?;
    let layout = cli.layout();
    let strategy = if cli.slow_read {
        ReadStrategy::ByteWise
    } else {
        ReadStrategy::Bulk
    };

    let bar: Arc<dyn SharedMemory> = Arc::new(
        MappedBar::new(device, cli.bar, strategy)
            .with_context(|| format!("cannot map BAR {} of {device}", cli.bar))?,
    );

    let window = |w: HostWindow| -> adsp_console::Result<ByteWindow> {
        ByteWindow::new(Arc::clone(&bar), layout.window_offset(w), layout.window_size)
    };

    // Firmware status word lives at the start of window 0
    let mut status_map = RegisterMap::new(window(HostWindow::Status)?);
    status_map.declare("FW_STATUS", FW_STATUS_OFFSET)?;
    let status = status_map.freeze();
    tracing::info!("firmware status {:#010x}", status.read("FW_STATUS")?);

    let ipc_window = ByteWindow::new(Arc::clone(&bar), layout.ipc_base, 0x200)?;
    let mut doorbell = RegisterMap::new(ipc_window);
    doorbell.declare("HIPCTDR", adsp_chip::ipc::HIPCTDR)?;
    doorbell.declare("HIPCTDA", adsp_chip::ipc::HIPCTDA)?;
    doorbell.declare("HIPCTDD", adsp_chip::ipc::HIPCTDD)?;
    doorbell.declare("HIPCIDR", adsp_chip::ipc::HIPCIDR)?;
    doorbell.declare("HIPCIDA", adsp_chip::ipc::HIPCIDA)?;
    doorbell.declare("HIPCIDD", adsp_chip::ipc::HIPCIDD)?;
    doorbell.declare("HIPCCST", adsp_chip::ipc::HIPCCST)?;
    doorbell.declare("HIPCCSR", adsp_chip::ipc::HIPCCSR)?;
    doorbell.declare("HIPCCTL", adsp_chip::ipc::HIPCCTL)?;
    doorbell.declare("HIPCCAP", adsp_chip::ipc::HIPCCAP)?;

    let ipc = IpcResponder::new(doorbell.freeze()).with_host_windows(HostWindows {
        status: window(HostWindow::Status)?,
        inbox: window(HostWindow::Inbox)?,
    });
    ipc.init()?;

    let history = if cli.no_log_history {
        HistoryPolicy::Discard
    } else {
        HistoryPolicy::Replay
    };
    let winstream = Winstream::new(window(HostWindow::Log)?, history);

    let sink = if cli.trace_logger {
        LogSink::Logger
    } else {
        LogSink::Stdout
    };

    let mut console = Console::new(winstream, sink).with_ipc(ipc);

    let stop = console.stop_flag();
    ctrlc::set_handler(move || {
        stop.store(true, Ordering::Relaxed);
    })
    .context("cannot install Ctrl-C handler")?;

    tracing::info!("console attached to {device} BAR {}", cli.bar);
    console.run()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_overrides_apply() {
        let cli = Cli::parse_from([
            "adsp-console",
            "--device",
            "0000:00:1f.3",
            "--log-only",
            "--ipc-base",
            "0x1000",
            "--window-stride",
            "0x4000",
        ]);
        let layout = cli.layout();
        assert_eq!(layout.ipc_base, 0x1000);
        assert_eq!(layout.window_stride, 0x4000);
        assert_eq!(layout.window_base, WindowLayout::ACE_FPGA.window_base);
    }

    #[test]
    fn log_only_and_load_only_conflict() {
        assert!(Cli::try_parse_from(["adsp-console", "--log-only", "--load-only"]).is_err());
    }

    #[test]
    fn hex_and_decimal_both_accepted() {
        let cli = Cli::parse_from(["adsp-console", "--window-base", "1572864"]);
        assert_eq!(cli.layout().window_base, 0x0018_0000);
    }
}
