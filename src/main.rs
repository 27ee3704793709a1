mod app;
mod config;
mod connection;
mod events;
mod midi;
mod ui;

use anyhow::{Context, Result};
use app::App;
use clap::Parser;
use config::Config;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io;
use std::time::Duration;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> Result<()> {
    let config = Config::parse();

    // CLI mode
    if config.list_ports {
        init_stderr_logging(&config);
        return list_ports_and_exit(&config);
    }

    let _log_guard = init_file_logging(&config)?;
    info!("stompsync {} starting", env!("CARGO_PKG_VERSION"));

    // Create app before touching the terminal so MIDI errors print normally
    let backend = config.open_backend()?;
    let mut app = App::new(backend, config.manager_options())?;
    app.initialize();

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run the app
    let result = run_app(&mut terminal, &mut app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    app.shutdown();
    info!("stompsync stopped");

    if let Err(e) = result {
        error!("Application error: {}", e);
        eprintln!("Application error: {}", e);
        return Err(e.into());
    }

    Ok(())
}

/// CLI mode: list all MIDI endpoints as JSON and exit
fn list_ports_and_exit(config: &Config) -> Result<()> {
    let backend = config.open_backend()?;
    let endpoints = backend.enumerate()?;
    println!("{}", serde_json::to_string_pretty(&endpoints)?);
    Ok(())
}

fn env_filter(config: &Config) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
}

fn init_stderr_logging(config: &Config) {
    tracing_subscriber::registry()
        .with(env_filter(config))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

/// The terminal belongs to the UI, so logs go to a file
fn init_file_logging(config: &Config) -> Result<WorkerGuard> {
    let path = config.log_path();
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| std::path::PathBuf::from("."));
    let file_name = path
        .file_name()
        .context("Log file path has no file name")?;

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(env_filter(config))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_names(true),
        )
        .init();

    Ok(guard)
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
) -> io::Result<()> {
    loop {
        // Process any pending MIDI events
        app.process_events();

        // Draw UI
        terminal.draw(|f| ui::render(f, app))?;

        // Handle keyboard input with timeout
        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                match key.code {
                    KeyCode::Char('q') => {
                        app.quit();
                    }
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                        app.quit();
                    }
                    KeyCode::Char('R') | KeyCode::Char('r') => {
                        app.handle_refresh();
                    }
                    KeyCode::Up | KeyCode::Char('k') => {
                        app.handle_key_up();
                    }
                    KeyCode::Down | KeyCode::Char('j') => {
                        app.handle_key_down();
                    }
                    KeyCode::Tab => {
                        app.handle_tab();
                    }
                    KeyCode::Char(' ') | KeyCode::Enter => {
                        app.handle_space();
                    }
                    KeyCode::Char('i') => {
                        app.handle_identity_request();
                    }
                    KeyCode::Char('?') => {
                        app.toggle_help();
                    }
                    _ => {}
                }
            }
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}
