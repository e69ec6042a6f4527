//! Fixed-rate single-line rendering of the monitor state.

use std::io::{self, Stdout};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use ratatui::backend::{Backend, CrosstermBackend};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::Paragraph;
use ratatui::{Terminal, TerminalOptions, Viewport};
use relay_proto::{Action, RecordingStatus};
use time::OffsetDateTime;
use tracing::{debug, warn};

use super::state::{ControllerInput, MonitorState, SharedMonitor};

const SPINNER: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Where rendered frames go. The loop never stops because a draw failed.
pub trait PanelSink {
    fn draw(&mut self, view: &PanelView) -> io::Result<()>;
}

/// Everything one rendered line needs, computed under the monitor lock.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelView {
    pub alive: Duration,
    pub run: Duration,
    pub controller: ControllerInput,
    pub status: RecordingStatus,
    pub reward: f64,
    pub episode: u64,
    pub tick: u64,
}

impl PanelView {
    pub fn at(state: &MonitorState, now: OffsetDateTime, tick: u64) -> Self {
        Self {
            alive: elapsed_since(state.spawn_time, now),
            run: elapsed_since(state.start_time, now),
            controller: state.controller_input,
            status: state.obs_status,
            reward: state.reward,
            episode: state.episode,
            tick,
        }
    }
}

/// Whole seconds from `from` to `now`; a timestamp in the future reads as zero.
fn elapsed_since(from: OffsetDateTime, now: OffsetDateTime) -> Duration {
    let secs = (now - from).whole_seconds();
    Duration::from_secs(secs.max(0) as u64)
}

pub fn format_clock(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

fn action_glyph(action: Action) -> &'static str {
    match action {
        Action::Up => "↑",
        Action::Left => "←",
        Action::Down => "↓",
        Action::Right => "→",
        Action::Jump => "!",
        Action::Attack => "✀",
    }
}

fn status_span(status: RecordingStatus) -> Span<'static> {
    match status {
        RecordingStatus::Recording => Span::styled("●", Style::default().fg(Color::Red)),
        RecordingStatus::Idle => Span::styled(
            "*",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::DIM),
        ),
        RecordingStatus::Disconnected => {
            Span::styled("*", Style::default().add_modifier(Modifier::DIM))
        }
        RecordingStatus::Unknown => Span::styled("?", Style::default().fg(Color::Yellow)),
    }
}

pub fn panel_line(view: &PanelView) -> Line<'static> {
    let pressed = Style::default().fg(Color::Red).add_modifier(Modifier::BOLD);
    let released = Style::default().add_modifier(Modifier::DIM);
    let label = Style::default().add_modifier(Modifier::DIM);

    let mut spans = vec![
        Span::styled(format_clock(view.alive), Style::default().fg(Color::Magenta)),
        Span::raw(" "),
        Span::styled(format_clock(view.run), Style::default().fg(Color::Blue)),
        Span::raw("  "),
    ];
    spans.extend(view.controller.iter().map(|(action, is_pressed)| {
        Span::styled(
            action_glyph(action),
            if is_pressed { pressed } else { released },
        )
    }));
    spans.extend([
        Span::raw("  "),
        Span::styled("ep ", label),
        Span::raw(view.episode.to_string()),
        Span::styled(" reward ", label),
        Span::raw(format!("{:.2}", view.reward)),
        Span::raw("  "),
        status_span(view.status),
        Span::raw(" "),
        Span::raw(SPINNER[(view.tick % SPINNER.len() as u64) as usize]),
    ]);
    Line::from(spans)
}

/// Draws into a one-line inline viewport.
pub struct TerminalSink<B: Backend> {
    terminal: Terminal<B>,
}

impl TerminalSink<CrosstermBackend<Stdout>> {
    pub fn stdout() -> io::Result<Self> {
        Self::new(CrosstermBackend::new(io::stdout()))
    }
}

impl<B: Backend> TerminalSink<B> {
    pub fn new(backend: B) -> io::Result<Self> {
        let terminal = Terminal::with_options(
            backend,
            TerminalOptions {
                viewport: Viewport::Inline(1),
            },
        )?;
        Ok(Self { terminal })
    }

    pub fn backend(&self) -> &B {
        self.terminal.backend()
    }
}

impl<B: Backend> PanelSink for TerminalSink<B> {
    fn draw(&mut self, view: &PanelView) -> io::Result<()> {
        let line = panel_line(view);
        self.terminal
            .draw(|frame| frame.render_widget(Paragraph::new(line), frame.area()))
            .map(|_| ())
    }
}

/// Render `monitor` into `sink` every `interval` until `shutdown` is set.
/// Returns the number of frames attempted.
pub fn run_render_loop<S>(
    monitor: &SharedMonitor,
    sink: &mut S,
    interval: Duration,
    shutdown: &AtomicBool,
) -> u64
where
    S: PanelSink + ?Sized,
{
    let ticker = crossbeam_channel::tick(interval);
    let mut tick = 0u64;
    let mut failures = 0u64;
    while !shutdown.load(Ordering::Acquire) {
        let now = OffsetDateTime::now_utc();
        let view = monitor.read(|state| PanelView::at(state, now, tick));
        if let Err(err) = sink.draw(&view) {
            failures += 1;
            // One bad terminal write tends to repeat every tick.
            if failures == 1 || failures % 100 == 0 {
                warn!(target: "relay::render", error = %err, failures, "panel draw failed");
            }
        }
        tick += 1;
        let _ = ticker.recv();
    }
    debug!(target: "relay::render", frames = tick, failures, "render loop finished");
    tick
}
