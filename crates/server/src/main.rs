mod config;
mod connection;
mod events;
mod producers;
mod server;
mod transport;
mod tui;

use std::io;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;

use config::ServerConfig;
use events::{ServerCommand, ServerEvent};
use server::{ServerLink, VisualServer};
use tui::{LogLevel, TuiState};

#[derive(Parser)]
#[command(name = "visual-server")]
#[command(about = "Packet-level visual effect server")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = visual::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = visual::DEFAULT_TICK_RATE)]
    tick_rate: u32,

    #[arg(short, long, default_value_t = 32)]
    max_viewers: usize,

    #[arg(long, default_value_t = 30, help = "Seconds without packets before a viewer is dropped")]
    timeout: u64,

    #[arg(long, default_value_t = 20, help = "Ticks between tab list refreshes")]
    tab_refresh: u64,

    #[arg(long, help = "Tab list header, {online} and {max} are substituted")]
    tab_header: Option<String>,

    #[arg(long, help = "Tab list footer, {name} and {ping} are substituted")]
    tab_footer: Option<String>,

    #[arg(long)]
    headless: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let defaults = ServerConfig::default();
    let config = ServerConfig {
        bind: args.bind,
        port: args.port,
        tick_rate: args.tick_rate,
        max_viewers: args.max_viewers,
        viewer_timeout_secs: args.timeout,
        tab_refresh_ticks: args.tab_refresh,
        tab_header: args.tab_header.unwrap_or(defaults.tab_header.clone()),
        tab_footer: args.tab_footer.unwrap_or(defaults.tab_footer.clone()),
        ..defaults
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    if args.headless {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
        runtime.block_on(run_headless(config))?;
        log::info!("Server shutting down");
    } else {
        let (server, mut link) = runtime.block_on(VisualServer::bind(config))?;
        let server_task = runtime.spawn(server.run());

        let result = run_with_tui(&mut link);

        link.running.store(false, Ordering::SeqCst);
        let _ = link.commands.send(ServerCommand::Shutdown);
        runtime.block_on(server_task)?;
        result?;
    }

    Ok(())
}

async fn run_headless(config: ServerConfig) -> Result<()> {
    let (server, link) = VisualServer::bind(config).await?;
    let ServerLink {
        mut events,
        running,
        ..
    } = link;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            running.store(false, Ordering::SeqCst);
        }
    });
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log_event(&event);
        }
    });

    server.run().await;
    Ok(())
}

fn log_event(event: &ServerEvent) {
    let Some((level, text)) = event.describe() else {
        return;
    };
    match level {
        LogLevel::Info => log::info!("{}", text),
        LogLevel::Warn => log::warn!("{}", text),
        LogLevel::Error => log::error!("{}", text),
    }
}

fn run_with_tui(link: &mut ServerLink) -> io::Result<()> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut tui_state = TuiState::new();

    while link.running.load(Ordering::SeqCst) {
        while let Ok(event) = link.events.try_recv() {
            if let Some((level, text)) = event.describe() {
                tui_state.log(level, text);
            }
        }

        if let Some(viewer) = tui_state.take_pending_kick() {
            let _ = link.commands.send(ServerCommand::Kick(viewer));
        }

        let status = link.status.borrow().clone();

        if event::poll(Duration::from_millis(16))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => {
                            link.running.store(false, Ordering::SeqCst);
                        }
                        KeyCode::Tab | KeyCode::BackTab => tui_state.next_tab(),
                        KeyCode::PageUp => tui_state.scroll_up(),
                        KeyCode::PageDown => tui_state.scroll_down(),
                        KeyCode::End => tui_state.scroll_to_bottom(),
                        KeyCode::Up => {
                            if tui_state.active_tab() == tui::Tab::Viewers {
                                tui_state.select_prev();
                            }
                        }
                        KeyCode::Down => {
                            if tui_state.active_tab() == tui::Tab::Viewers {
                                tui_state.select_next(status.viewers.len());
                            }
                        }
                        KeyCode::Char('k') | KeyCode::Char('K') => {
                            if tui_state.active_tab() == tui::Tab::Viewers {
                                tui_state.request_kick(&status.viewers);
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        terminal.draw(|frame| {
            tui::render(frame, &tui_state, &status);
        })?;
    }

    tui_state.log_info("Shutting down...");

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)?;

    Ok(())
}
