mod app;
mod theme;
mod ui;

use std::{
    error::Error,
    fs::OpenOptions,
    io,
    sync::{Arc, Mutex},
    time::Duration,
};

use clap::Parser;
use crossterm::{
    event::EventStream,
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::StreamExt;
use pulseboard_client::ApiClient;
use pulseboard_monitor::config::{load_config, Args, Config};
use ratatui::{backend::CrosstermBackend, Terminal};
use tracing::warn;
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

use crate::app::App;
use crate::ui::render_ui;

const REDRAW_INTERVAL: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = load_config(Args::parse(), |key| std::env::var(key).ok())?;
    init_logging(&config);

    let client = Arc::new(ApiClient::new(&config.api_url, config.request_timeout)?);
    let mut app = App::new(config, client);
    app.start();
    let mut live_rx = app.live_receiver();
    let mut live_open = true;

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    let mut events = EventStream::new();
    let mut redraw = tokio::time::interval(REDRAW_INTERVAL);

    loop {
        terminal.draw(|frame| render_ui(frame, &app))?;
        tokio::select! {
            _ = redraw.tick() => {}
            changed = live_rx.changed(), if live_open => {
                if changed.is_err() {
                    live_open = false;
                }
                app.on_live_update().await;
            }
            Some(joined) = app.next_completion(), if app.has_pending_requests() => {
                app.on_completion(joined);
            }
            maybe_event = events.next() => {
                match maybe_event {
                    Some(Ok(event)) => {
                        if app.handle_event(event) {
                            break;
                        }
                    }
                    Some(Err(err)) => warn!("terminal_event_error: {err}"),
                    None => break,
                }
            }
        }
    }

    app.shutdown().await;
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

/// Logs are discarded unless a file or stdout is requested, since the
/// dashboard owns the terminal.
fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let writer = if let Some(path) = config.log_file.as_ref() {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => BoxMakeWriter::new(Mutex::new(file)),
            Err(err) => {
                eprintln!("log_file_error: {err}");
                BoxMakeWriter::new(io::sink)
            }
        }
    } else if config.log_stdout {
        BoxMakeWriter::new(io::stdout)
    } else {
        BoxMakeWriter::new(io::sink)
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.log_file.is_none())
        .with_writer(writer)
        .try_init();
}
