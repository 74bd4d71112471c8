//! Runtime loop: owns the terminal, the scheduler, and shutdown.
//!
//! The scheduler runs on the tokio runtime while this loop renders store
//! snapshots; neither ever waits on the other. A broadcast channel carries
//! shutdown to every in-flight probe task, which records its cancellation
//! and appends its bucket before exiting, so the final frame reflects the
//! full timeline.

use std::io;
use std::sync::Arc;

use crossterm::event::{Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Duration, MissedTickBehavior};

use crate::config::Config;
use crate::endpoint::CheckKind;
use crate::error::AppError;
use crate::probe::{detect_icmp_capability, Prober};
use crate::scheduler::Scheduler;
use crate::timeline::{aggregates, TimelineStore};
use crate::ui::{render, view};

/// Minimum delay between steady-state redraws (4 Hz ceiling).
const MIN_RENDER_PERIOD: Duration = Duration::from_millis(250);
/// Slack granted to the scheduler to drain after shutdown fires.
const SHUTDOWN_SLACK: Duration = Duration::from_millis(500);

/// How the run ended; decides the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppExit {
    /// User pressed `q`; exit 0.
    Quit,
    /// Interrupt (ctrl-c / SIGINT); exit 130.
    Interrupted,
}

/// Run the monitor until quit or interrupt.
pub async fn run(cfg: Config) -> Result<AppExit, AppError> {
    let mut notices = Vec::new();

    // Capability is probed exactly once; a denial disables the check for the
    // whole run and surfaces as a single global notice, never per endpoint.
    let icmp_wanted = cfg
        .endpoints
        .iter()
        .any(|e| e.checks.contains(&CheckKind::Icmp))
        && !cfg.disabled_checks.contains(&CheckKind::Icmp);
    let icmp_available = !icmp_wanted || detect_icmp_capability();
    if icmp_wanted && !icmp_available {
        notices.push("ICMP unavailable (insufficient privileges)".to_string());
    }

    let prober = Arc::new(Prober::new(&cfg, icmp_available)?);

    let (term_width, _) = crossterm::terminal::size().map_err(AppError::Terminal)?;
    let window = (cfg.graph_width.max(term_width)).max(1) as usize;
    let store = Arc::new(TimelineStore::new(
        window,
        cfg.endpoints.iter().map(|e| e.id.clone()),
    ));

    let (shutdown_tx, _) = broadcast::channel(1);
    let scheduler_handle = Scheduler::new(
        &cfg,
        Arc::clone(&prober),
        Arc::clone(&store),
        shutdown_tx.clone(),
    )
    .spawn();

    // Terminal events come from a dedicated blocking reader thread.
    let mut events = spawn_event_reader();

    // SIGINT outside of raw mode (e.g. kill -INT) still lands here; inside
    // raw mode ctrl-c arrives as a key event instead.
    let mut interrupt = {
        let (tx, rx) = mpsc::channel::<()>(1);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(()).await;
            }
        });
        rx
    };

    let mut terminal = setup_terminal()?;
    let _restore = TerminalRestore;

    let run_result = ui_loop(
        &mut terminal,
        &cfg,
        &store,
        &notices,
        &mut events,
        &mut interrupt,
    )
    .await;

    // Stop probing, let in-flight tasks record their cancellation, then put
    // one last frame up before the terminal is restored.
    let _ = shutdown_tx.send(());
    let _ = tokio::time::timeout(cfg.timeout + SHUTDOWN_SLACK, scheduler_handle).await;

    let exit = run_result?;
    draw_frame(&mut terminal, &cfg, &store, &notices)?;

    restore_terminal(&mut terminal)?;
    std::mem::forget(_restore);

    // Window statistics go to the log, not the (now restored) terminal.
    let snap = store.snapshot();
    for endpoint in &cfg.endpoints {
        let stats = aggregates(snap.buckets(&endpoint.id), endpoint.primary_override);
        tracing::info!(
            endpoint = %endpoint.label,
            loss_pct = format!("{:.1}", stats.packet_loss_pct),
            mean_ms = ?stats.latency_mean,
            "window stats"
        );
    }
    tracing::info!(?exit, "monitor stopped");
    Ok(exit)
}

async fn ui_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    cfg: &Config,
    store: &TimelineStore,
    notices: &[String],
    events: &mut mpsc::UnboundedReceiver<Event>,
    interrupt: &mut mpsc::Receiver<()>,
) -> Result<AppExit, AppError> {
    let mut render_timer = tokio::time::interval(cfg.interval.max(MIN_RENDER_PERIOD));
    render_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut last_drawn_version = u64::MAX;
    let mut events_open = true;

    loop {
        tokio::select! {
            _ = render_timer.tick() => {}
            maybe_event = events.recv(), if events_open => {
                match maybe_event {
                    Some(Event::Key(key)) => {
                        if is_interrupt_key(&key) {
                            return Ok(AppExit::Interrupted);
                        }
                        if is_quit_key(&key) {
                            return Ok(AppExit::Quit);
                        }
                    }
                    Some(Event::Resize(width, _)) => {
                        if cfg.graph_width == 0 {
                            store.resize(width.max(1) as usize);
                        }
                        // Column layout depends on width; always redraw.
                        last_drawn_version = u64::MAX;
                    }
                    Some(_) => {}
                    // Reader thread gone; keep rendering on the timer.
                    None => events_open = false,
                }
            }
            _ = interrupt.recv() => return Ok(AppExit::Interrupted),
        }

        let version = store.version();
        if version != last_drawn_version {
            draw_frame(terminal, cfg, store, notices)?;
            last_drawn_version = version;
        }
    }
}

fn is_quit_key(key: &KeyEvent) -> bool {
    matches!(key.code, KeyCode::Char('q') | KeyCode::Esc)
}

fn is_interrupt_key(key: &KeyEvent) -> bool {
    key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL)
}

fn draw_frame(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    cfg: &Config,
    store: &TimelineStore,
    notices: &[String],
) -> Result<(), AppError> {
    let color_enabled = std::env::var_os("NO_COLOR").is_none();
    terminal
        .draw(|frame| {
            let model = view::build(
                &cfg.endpoints,
                &store.snapshot(),
                notices,
                frame.area().width,
            );
            render::draw(frame, &model, color_enabled);
        })
        .map_err(AppError::Terminal)?;
    Ok(())
}

fn spawn_event_reader() -> mpsc::UnboundedReceiver<Event> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || loop {
        match crossterm::event::read() {
            Ok(event) => {
                if tx.send(event).is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    });
    rx
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>, AppError> {
    enable_raw_mode().map_err(AppError::Terminal)?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).map_err(AppError::Terminal)?;
    Terminal::new(CrosstermBackend::new(stdout)).map_err(AppError::Terminal)
}

fn restore_terminal(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
) -> Result<(), AppError> {
    disable_raw_mode().map_err(AppError::Terminal)?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen).map_err(AppError::Terminal)?;
    terminal.show_cursor().map_err(AppError::Terminal)?;
    Ok(())
}

/// Last-resort restore if the loop errors out before the explicit path runs.
struct TerminalRestore;

impl Drop for TerminalRestore {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
    }
}
