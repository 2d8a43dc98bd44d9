//! # Train Sign Application Entry Point
//!
//! This binary wires the library together: configuration, the panel refresh
//! thread, the departures source, the Wi-Fi link and the main loop.
//! It supports both production mode (DMD panels over SPI) and development
//! mode (`--stdout`, the frame is drawn in the terminal).

use anyhow::Context;
use std::env;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use train_sign_lib::app::App;
use train_sign_lib::clock::Clock;
use train_sign_lib::config::Config;
use train_sign_lib::connectivity::{Link, NmcliLink, ProcessRestart, Supervisor, UnmanagedLink};
use train_sign_lib::departures::{Fetcher, HttpDepartureSource};
use train_sign_lib::panel::TerminalPanel;
use train_sign_lib::refresh::{RefreshDriver, SharedFrame};
use train_sign_lib::state_machine::DisplayStateMachine;
use train_sign_lib::surface::{MatrixSurface, PANEL_HEIGHT};
use train_sign_lib::timer::{SystemTimer, Timer};

/// Terminal redraw cadence in development mode.
const TERMINAL_REFRESH: Duration = Duration::from_millis(50);

/// Redraw the frame in the terminal.
fn terminal_refresh(frame: Arc<SharedFrame>) -> anyhow::Result<RefreshDriver> {
    RefreshDriver::start(frame, TerminalPanel::new(io::stdout()), TERMINAL_REFRESH)
        .context("starting terminal refresh thread")
}

/// Scan the DMD chain over spidev with the control lines on a GPIO chip.
#[cfg(all(target_os = "linux", feature = "hardware"))]
fn panel_refresh(config: &Config, frame: Arc<SharedFrame>) -> anyhow::Result<RefreshDriver> {
    use linux_embedded_hal::gpio_cdev::{Chip, LineRequestFlags};
    use linux_embedded_hal::spidev::{SpiModeFlags, Spidev, SpidevOptions};
    use linux_embedded_hal::{CdevPin, SpidevBus};
    use train_sign_lib::panel::{DmdPanel, DmdPins};

    let hw = &config.hardware;
    tracing::info!(
        "DMD on {} ({} Hz), {}: nOE={} A={} B={} latch={}",
        hw.spi_device,
        hw.spi_hz,
        hw.gpio_chip,
        hw.oe_pin,
        hw.a_pin,
        hw.b_pin,
        hw.latch_pin
    );

    let mut spi = Spidev::open(&hw.spi_device).context("opening SPI device")?;
    let options = SpidevOptions::new()
        .bits_per_word(8)
        .max_speed_hz(hw.spi_hz)
        .mode(SpiModeFlags::SPI_MODE_0)
        .build();
    spi.configure(&options).context("configuring SPI")?;

    let mut chip = Chip::new(&hw.gpio_chip).context("opening GPIO chip")?;
    let mut output = |offset: u32, name: &str| -> anyhow::Result<CdevPin> {
        let handle = chip
            .get_line(offset)
            .with_context(|| format!("GPIO line {offset} ({name})"))?
            .request(LineRequestFlags::OUTPUT, 0, "train-sign")
            .with_context(|| format!("requesting GPIO {offset} ({name})"))?;
        CdevPin::new(handle).with_context(|| format!("GPIO {offset} ({name})"))
    };
    let pins = DmdPins {
        n_oe: output(hw.oe_pin, "nOE")?,
        a: output(hw.a_pin, "A")?,
        b: output(hw.b_pin, "B")?,
        latch: output(hw.latch_pin, "latch")?,
    };

    let panel = DmdPanel::new(SpidevBus(spi), pins, config.display.width());
    RefreshDriver::start(frame, panel, config.refresh_interval()).context("starting DMD refresh thread")
}

#[cfg(not(all(target_os = "linux", feature = "hardware")))]
fn panel_refresh(_config: &Config, frame: Arc<SharedFrame>) -> anyhow::Result<RefreshDriver> {
    tracing::warn!("DMD support not enabled. Rebuild on Linux with --features hardware for panel output");
    tracing::warn!("drawing to the terminal instead");
    terminal_refresh(frame)
}

/// Build the application around `link` and run it forever.
fn run_app<L: Link>(
    config: &Config,
    surface: MatrixSurface,
    source: HttpDepartureSource,
    link: L,
) -> anyhow::Result<()> {
    let timer = SystemTimer::new();
    let mut app = App {
        surface,
        machine: DisplayStateMachine::new(config.labels()),
        fetcher: Fetcher::new(source, config.fetch_interval()).with_retry(config.retry_interval()),
        supervisor: Supervisor::new(config.supervisor_policy(), ProcessRestart, timer.now_ms()),
        link,
        clock: Clock::from_mode(config.clock.source),
        timer,
        loop_pause_ms: config.display.loop_pause_ms,
    };

    app.startup();
    app.run();
    Ok(())
}

/// Main application entry point.
fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Development mode: draw to the terminal, leave the network alone
    let args: Vec<String> = env::args().collect();
    let development_mode = args.iter().any(|arg| arg == "--stdout");
    let config = match args.iter().position(|arg| arg == "--config") {
        Some(i) => {
            let path = args
                .get(i + 1)
                .ok_or_else(|| anyhow::anyhow!("--config needs a file path"))?;
            Config::load_from_path(path)
        }
        None => Config::load(),
    };

    let frame = Arc::new(SharedFrame::new(config.display.width(), PANEL_HEIGHT));
    let _refresh = if development_mode {
        terminal_refresh(Arc::clone(&frame))?
    } else {
        panel_refresh(&config, Arc::clone(&frame))?
    };

    let source = HttpDepartureSource::new(
        &config.api.base_url,
        &config.station.code,
        &config.api.key,
        config.api.limit,
        config.request_timeout(),
    )
    .context("setting up departures source")?;
    tracing::info!("departures from {}", source.url());

    let surface = MatrixSurface::new(frame);

    if development_mode || !config.network.managed {
        tracing::info!("network link not managed by the sign");
        run_app(&config, surface, source, UnmanagedLink)
    } else {
        let link = NmcliLink::new(
            &config.network.interface,
            &config.network.ssid,
            &config.network.password,
            &config.network.dns,
            &config.check_host(),
        );
        run_app(&config, surface, source, link)
    }
}
