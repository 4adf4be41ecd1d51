use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::prelude::*;
use ratatui::widgets::Paragraph;
use std::io::{self, stdout};
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{error, info, warn};

use super::{PracticeMode, TerminalSurface};
use crate::audio::graph::MAX_DELAY_MS;
use crate::audio::{AudioGraphManager, AudioPlatform, DafSettings, PulsePlatform};
use crate::config::Config;
use crate::error::RecordingError;
use crate::metronome::{ClickPlayer, ClickVoice, MetronomeScheduler, MetronomeState, BPM_RANGE};
use crate::recording::{format_elapsed, ArtifactRegistry, RecordingSession, RecordingState};
use crate::visualizer::{refresh_period, render_loop, BarRenderer, Canvas};

type Tui = Terminal<CrosstermBackend<io::Stdout>>;

const DELAY_STEP_MS: u32 = 25;
const GAIN_STEP: f32 = 0.1;
const BPM_STEP: u32 = 5;
const CLICK_LATENCY_MS: u32 = 20;

/// What a finished terminal session hands back to the caller.
pub struct PracticeOutcome {
    /// Config with the delay, gain and tempo as last tuned
    pub config: Config,
    /// Time spent actually practicing (DAF running, metronome ticking,
    /// recording not paused)
    pub practiced: Duration,
}

pub async fn run(config: Config, mode: PracticeMode) -> Result<PracticeOutcome> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let mut config = config;
    let platform = Arc::new(PulsePlatform::default());
    let result = match mode {
        PracticeMode::Daf => run_daf(&mut terminal, &mut config, platform).await,
        PracticeMode::Record => run_record(&mut terminal, &config, platform).await,
        PracticeMode::Metronome => run_metronome(&mut terminal, &mut config, platform.as_ref()).await,
    };

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result.map(|practiced| PracticeOutcome { config, practiced })
}

/// Why one pass of the DAF render loop ended.
#[derive(Debug, Clone, Copy, PartialEq)]
enum DafExit {
    Quit,
    Resized,
    GraphStopped,
}

async fn run_daf(terminal: &mut Tui, config: &mut Config, platform: Arc<PulsePlatform>) -> Result<Duration> {
    let mut daf = AudioGraphManager::new(
        platform,
        config.audio.sample_rate,
        config.audio.block_size,
        config.audio.device.clone(),
    );
    let settings = DafSettings::new(config.daf.delay_ms, config.daf.gain)?;
    if let Err(e) = daf.start(settings).await {
        error!("Could not start delayed feedback: {}", e);
        show_error(terminal, e.user_message())?;
        return Ok(Duration::ZERO);
    }
    let started = Instant::now();

    let mut renderer = BarRenderer::new(
        config.visualizer.bars,
        config.visualizer.color_scheme,
        config.visualizer.mirror,
    );
    let mut canvas = Canvas::new(0, 0);
    let mut notice: Option<String> = None;
    let mut failure = None;

    loop {
        let area = bars_area(screen(terminal)?);
        let (w, h) = TerminalSurface::canvas_size(area);
        canvas.resize(w, h);

        let mut exit = DafExit::GraphStopped;
        render_loop(daf.analyser_tap(), &mut canvas, &mut renderer, config.visualizer.fps, |canvas, renderer| {
            match daf_frame(terminal, &mut daf, canvas, renderer, &mut notice) {
                Ok(None) => ControlFlow::Continue(()),
                Ok(Some(reason)) => {
                    exit = reason;
                    ControlFlow::Break(())
                }
                Err(e) => {
                    failure = Some(e);
                    exit = DafExit::Quit;
                    ControlFlow::Break(())
                }
            }
        })
        .await;

        match exit {
            DafExit::Resized => continue,
            DafExit::Quit => break,
            DafExit::GraphStopped => {
                match daf.take_error() {
                    Some(e) => {
                        error!("Delayed feedback lost the microphone: {}", e);
                        show_error(terminal, e.user_message())?;
                    }
                    None => warn!("Delayed feedback stopped unexpectedly"),
                }
                break;
            }
        }
    }

    let practiced = started.elapsed();
    config.daf.delay_ms = daf.current_delay_ms();
    config.daf.gain = daf.current_gain();
    config.visualizer.color_scheme = renderer.color_scheme;
    daf.stop();

    match failure {
        Some(e) => Err(e),
        None => Ok(practiced),
    }
}

/// Present one DAF frame and apply pending keys.
fn daf_frame<P: AudioPlatform>(
    terminal: &mut Tui,
    daf: &mut AudioGraphManager<P>,
    canvas: &Canvas,
    renderer: &mut BarRenderer,
    notice: &mut Option<String>,
) -> Result<Option<DafExit>> {
    let area = screen(terminal)?;
    if TerminalSurface::canvas_size(bars_area(area)) != (canvas.width, canvas.height) {
        return Ok(Some(DafExit::Resized));
    }

    let status = format!(
        " DAF | delay: {} ms | gain: {:.1} | input {} ",
        daf.current_delay_ms(),
        daf.current_gain(),
        level_meter(daf.input_level(), 10)
    );
    let help = format!(
        " [↑↓] delay [+-] gain [c]olor: {} [q]uit {}",
        renderer.color_scheme.name(),
        notice.as_deref().unwrap_or("")
    );
    terminal.draw(|frame| {
        let area = frame.area();
        TerminalSurface::blit(canvas, bars_area(area), frame.buffer_mut());
        render_line(frame, area, 0, &status, Color::Gray);
        render_line(frame, area, area.height.saturating_sub(1), &help, Color::DarkGray);
    })?;

    while let Some(key) = poll_key(Duration::ZERO)? {
        if is_quit(&key) {
            return Ok(Some(DafExit::Quit));
        }
        let change = match key.code {
            KeyCode::Up => daf.set_delay(step_delay(daf.current_delay_ms(), true)),
            KeyCode::Down => daf.set_delay(step_delay(daf.current_delay_ms(), false)),
            KeyCode::Char('+') | KeyCode::Char('=') => daf.set_gain(step_gain(daf.current_gain(), GAIN_STEP)),
            KeyCode::Char('-') => daf.set_gain(step_gain(daf.current_gain(), -GAIN_STEP)),
            KeyCode::Char('c') => {
                renderer.color_scheme = renderer.color_scheme.next();
                Ok(())
            }
            _ => Ok(()),
        };
        *notice = change.err().map(|e| format!("| {}", e));
    }

    Ok(None)
}

async fn run_metronome(terminal: &mut Tui, config: &mut Config, platform: &PulsePlatform) -> Result<Duration> {
    let mut metronome = MetronomeScheduler::new();
    let mut notice = String::new();

    let click = if config.metronome.click {
        let sample_rate = config.audio.sample_rate;
        match platform.open_output(sample_rate, CLICK_LATENCY_MS) {
            Ok(sink) => {
                let voice = ClickVoice::new(sample_rate, config.metronome.click_volume);
                Some(ClickPlayer::spawn(sink, voice, metronome.subscribe_beats())?)
            }
            Err(e) => {
                warn!("Click output unavailable: {}", e);
                notice = e.user_message().to_string();
                None
            }
        }
    } else {
        None
    };

    metronome.start(config.metronome.bpm, config.metronome.beats_per_measure)?;
    let mut running_since = Some(Instant::now());
    let mut practiced = Duration::ZERO;

    let mut refresh = tokio::time::interval(refresh_period(config.visualizer.fps));
    'session: loop {
        refresh.tick().await;
        let state = metronome.state();
        terminal.draw(|frame| draw_metronome(frame, &state, &notice))?;

        while let Some(key) = poll_key(Duration::ZERO)? {
            if is_quit(&key) {
                break 'session;
            }
            match key.code {
                KeyCode::Char(' ') => {
                    if let Some(since) = running_since.take() {
                        metronome.stop();
                        practiced += since.elapsed();
                    } else {
                        metronome.start(config.metronome.bpm, config.metronome.beats_per_measure)?;
                        running_since = Some(Instant::now());
                    }
                }
                KeyCode::Up | KeyCode::Down => {
                    let bpm = if key.code == KeyCode::Up {
                        config.metronome.bpm + BPM_STEP
                    } else {
                        config.metronome.bpm.saturating_sub(BPM_STEP)
                    };
                    let bpm = bpm.clamp(*BPM_RANGE.start(), *BPM_RANGE.end());
                    metronome.set_bpm(bpm)?;
                    config.metronome.bpm = bpm;
                }
                _ => {}
            }
        }
    }

    if let Some(since) = running_since {
        practiced += since.elapsed();
    }
    metronome.stop();
    // Dropping the scheduler closes the beat channel, which ends the click thread
    drop(metronome);
    if let Some(player) = click {
        tokio::task::spawn_blocking(move || player.join()).await?;
    }

    Ok(practiced)
}

async fn run_record(terminal: &mut Tui, config: &Config, platform: Arc<PulsePlatform>) -> Result<Duration> {
    let mut session = RecordingSession::new(
        platform,
        ArtifactRegistry::new(),
        config.audio.sample_rate,
        config.audio.block_size,
        config.audio.device.clone(),
    );
    let output_dir = config.recording.resolved_output_dir();
    let mut notice = String::from("Press space to start recording");
    let mut practiced = Duration::ZERO;

    let mut refresh = tokio::time::interval(refresh_period(config.visualizer.fps));
    'session: loop {
        refresh.tick().await;
        if let Some(e) = session.take_error() {
            error!("Recording lost the microphone: {}", e);
            notice = e.user_message().to_string();
        }
        let (state, elapsed) = (session.state(), session.elapsed_secs());
        terminal.draw(|frame| draw_recording(frame, state, elapsed, &notice))?;

        while let Some(key) = poll_key(Duration::ZERO)? {
            if is_quit(&key) {
                break 'session;
            }
            match key.code {
                KeyCode::Char(' ') => match session.state() {
                    RecordingState::Idle => match session.start().await {
                        Ok(()) => notice.clear(),
                        Err(e) => {
                            error!("Could not start recording: {}", e);
                            notice = e.user_message();
                        }
                    },
                    RecordingState::Recording => session.pause(),
                    RecordingState::Paused => session.resume(),
                },
                KeyCode::Char('s') => {
                    notice = match save_take(&mut session, &output_dir) {
                        Ok(Some((path, duration))) => {
                            practiced += duration;
                            format!("Saved {} ({})", path.display(), format_elapsed(duration.as_secs()))
                        }
                        Ok(None) => "Nothing to save".to_string(),
                        Err(e) => {
                            error!("Could not save recording: {}", e);
                            e.user_message()
                        }
                    };
                }
                KeyCode::Char('r') => {
                    session.reset();
                    notice = "Recording discarded".to_string();
                }
                _ => {}
            }
        }
    }

    if session.state() != RecordingState::Idle {
        practiced += Duration::from_secs(session.elapsed_secs());
    }
    session.reset();

    Ok(practiced)
}

/// Stop the current take and write it to `dir`.
fn save_take<P: AudioPlatform>(
    session: &mut RecordingSession<P>,
    dir: &std::path::Path,
) -> Result<Option<(PathBuf, Duration)>, RecordingError> {
    let Some(artifact) = session.stop()? else {
        return Ok(None);
    };
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let path = dir.join(format!("echoloop-{}.wav", stamp));
    artifact.save(&path)?;
    info!("Saved recording to {}", path.display());
    Ok(Some((path, artifact.duration)))
}

/// Show a capture failure until any key is pressed.
fn show_error(terminal: &mut Tui, message: &str) -> Result<()> {
    loop {
        terminal.draw(|frame| {
            let area = frame.area();
            let text = vec![
                Line::from(message.to_string()).style(Style::default().fg(Color::LightRed)),
                Line::from(""),
                Line::from("Press any key to exit").style(Style::default().fg(Color::DarkGray)),
            ];
            let body = centered(area, text.len() as u16);
            frame.render_widget(Paragraph::new(text).alignment(Alignment::Center), body);
        })?;
        if poll_key(Duration::from_millis(250))?.is_some() {
            return Ok(());
        }
    }
}

fn draw_metronome(frame: &mut Frame, state: &MetronomeState, notice: &str) {
    let area = frame.area();
    let status = format!(
        " METRONOME | {} bpm | {} beats per measure | {} ",
        state.bpm,
        state.beats_per_measure,
        if state.is_running { "running" } else { "stopped" }
    );
    render_line(frame, area, 0, &status, Color::Gray);

    let beats: Vec<Span> = (0..state.beats_per_measure)
        .map(|i| {
            let current = state.is_running && i == state.current_beat_index;
            let (symbol, color) = match (current, i == 0) {
                (true, true) => ("●", Color::LightRed),
                (true, false) => ("●", Color::LightGreen),
                (false, _) => ("○", Color::DarkGray),
            };
            Span::styled(format!(" {} ", symbol), Style::default().fg(color))
        })
        .collect();
    let text = vec![
        Line::from(beats),
        Line::from(""),
        Line::from(format!("beat {}", state.current_beat_index + 1)),
    ];
    let body = centered(area, text.len() as u16);
    frame.render_widget(Paragraph::new(text).alignment(Alignment::Center), body);

    let help = format!(" [space] start/stop [↑↓] tempo [q]uit {}", notice);
    render_line(frame, area, area.height.saturating_sub(1), &help, Color::DarkGray);
}

fn draw_recording(frame: &mut Frame, state: RecordingState, elapsed: u64, notice: &str) {
    let area = frame.area();
    let (label, color) = match state {
        RecordingState::Idle => ("ready", Color::DarkGray),
        RecordingState::Recording => ("● recording", Color::LightRed),
        RecordingState::Paused => ("paused", Color::Yellow),
    };
    render_line(frame, area, 0, " RECORD ", Color::Gray);

    let text = vec![
        Line::from(label).style(Style::default().fg(color)),
        Line::from(""),
        Line::from(format_elapsed(elapsed)).style(Style::default().add_modifier(Modifier::BOLD)),
        Line::from(""),
        Line::from(notice.to_string()).style(Style::default().fg(Color::Gray)),
    ];
    let body = centered(area, text.len() as u16);
    frame.render_widget(Paragraph::new(text).alignment(Alignment::Center), body);

    let help = " [space] start/pause/resume [s]top and save [r]eset [q]uit ";
    render_line(frame, area, area.height.saturating_sub(1), help, Color::DarkGray);
}

/// Write a single line of text straight into the buffer at row `y`.
fn render_line(frame: &mut Frame, area: Rect, y: u16, text: &str, color: Color) {
    for (i, ch) in text.chars().enumerate() {
        if i < area.width as usize {
            let cell = frame.buffer_mut().cell_mut((area.x + i as u16, area.y + y));
            if let Some(cell) = cell {
                cell.set_char(ch);
                cell.set_fg(color);
            }
        }
    }
}

fn screen(terminal: &Tui) -> Result<Rect> {
    let size = terminal.size()?;
    Ok(Rect::new(0, 0, size.width, size.height))
}

/// Everything between the status line and the help line.
fn bars_area(area: Rect) -> Rect {
    Rect::new(area.x, area.y + 1, area.width, area.height.saturating_sub(2))
}

fn centered(area: Rect, lines: u16) -> Rect {
    let height = lines.min(area.height);
    Rect::new(area.x, area.y + (area.height - height) / 2, area.width, height)
}

fn level_meter(level: f32, width: usize) -> String {
    // Speech RMS rarely exceeds 0.3
    let filled = ((level * 3.0).clamp(0.0, 1.0) * width as f32).round() as usize;
    format!("{}{}", "▮".repeat(filled), "▯".repeat(width - filled))
}

/// Step the delay one notch, staying in range.
fn step_delay(delay_ms: u32, up: bool) -> u32 {
    if up {
        (delay_ms + DELAY_STEP_MS).min(MAX_DELAY_MS)
    } else {
        delay_ms.saturating_sub(DELAY_STEP_MS)
    }
}

/// Step the gain by `delta`, snapping to one decimal and staying in range.
fn step_gain(gain: f32, delta: f32) -> f32 {
    ((gain + delta) * 10.0).round().clamp(0.0, 20.0) / 10.0
}

fn poll_key(timeout: Duration) -> Result<Option<KeyEvent>> {
    if event::poll(timeout)? {
        if let Event::Key(key) = event::read()? {
            if key.kind == KeyEventKind::Press {
                return Ok(Some(key));
            }
        }
    }
    Ok(None)
}

fn is_quit(key: &KeyEvent) -> bool {
    matches!(
        key,
        KeyEvent {
            code: KeyCode::Char('q'),
            ..
        } | KeyEvent {
            code: KeyCode::Char('c'),
            modifiers: KeyModifiers::CONTROL,
            ..
        }
    )
}
