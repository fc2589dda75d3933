mod app;
mod handler;
mod tui;
mod ui;

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use inboxiq_core::Config;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use app::App;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = Config::path()?;
    let (config, config_error) = match Config::load_from(&config_path) {
        Ok(config) => (config, None),
        Err(e) => (Config::new(), Some(e)),
    };

    // Keep the guard alive so buffered log lines are flushed on exit
    let _log_guard = init_logging(&config)?;
    if let Some(e) = config_error {
        warn!(error = %e, path = %config_path.display(), "ignoring unreadable config file");
    }
    info!(version = env!("CARGO_PKG_VERSION"), "starting inboxiq");

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let result = run(&mut terminal, config, config_path).await;
    tui::restore()?;

    if let Err(e) = &result {
        warn!(error = %e, "exited with error");
    }
    result
}

async fn run(terminal: &mut tui::Tui, config: Config, config_path: PathBuf) -> Result<()> {
    let mut events = tui::EventHandler::new();
    let mut app = App::new(config, config_path, events.sender(), events.connection_sender());

    while !app.should_quit {
        terminal.draw(|frame| ui::render(&mut app, frame))?;

        match events.next().await {
            Some(event) => handler::handle_event(&mut app, event),
            None => break,
        }
    }

    app.shutdown();
    Ok(())
}

/// Logs go to `<data_local_dir>/inboxiq/inboxiq.log`; the terminal belongs
/// to the UI.
fn init_logging(config: &Config) -> Result<WorkerGuard> {
    let log_dir = dirs::data_local_dir()
        .ok_or_else(|| anyhow!("Could not determine data directory"))?
        .join("inboxiq");
    std::fs::create_dir_all(&log_dir)?;

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(&log_dir, "inboxiq.log"));

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_filter.as_deref().unwrap_or("info")))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();

    Ok(guard)
}
