mod clipboard;
mod help;
mod state;

use crate::cli::{build_relay_config, open_store, Cli};
use crate::model::{CommandRecord, RelayEvent, RelayRequest};
use crate::relay::ProcessRelay;
use crate::store::CommandStore;
use crate::view::{Field, ViewController};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use help::draw_help;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Position, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Tabs},
    Terminal,
};
use state::{format_clock, push_wrapped_status_kv, Focus, UiState};
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

const SCROLL_STEP: u16 = 10;

pub async fn run(args: Cli) -> Result<()> {
    let (event_tx, event_rx) = mpsc::unbounded_channel::<RelayEvent>();
    let (req_tx, req_rx) = mpsc::unbounded_channel::<RelayRequest>();

    let store = open_store(&args)?;
    let buffer_lines = args.buffer_lines;

    // The TUI owns the controller on its own thread; the relay stays on Tokio.
    let ui_handle =
        std::thread::spawn(move || run_threaded(store, buffer_lines, event_rx, req_tx));

    let res = ProcessRelay::new(build_relay_config(&args))
        .run(req_rx, event_tx)
        .await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }

    res
}

/// Run the TUI loop on a dedicated thread.
pub fn run_threaded(
    store: CommandStore,
    buffer_lines: usize,
    mut event_rx: UnboundedReceiver<RelayEvent>,
    req_tx: UnboundedSender<RelayRequest>,
) -> Result<()> {
    let mut vc = ViewController::new(store, req_tx, buffer_lines)?;
    let cleared = vc.reset_run_state()?;
    if cleared > 0 {
        tracing::info!(cleared, "cleared stale run state from previous session");
    }

    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = match Terminal::new(backend).context("create terminal") {
        Ok(t) => t,
        Err(e) => {
            vc.shutdown();
            restore_terminal();
            return Err(e);
        }
    };
    terminal.clear().ok();

    let mut state = UiState::default();
    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    loop {
        while let Ok(ev) = event_rx.try_recv() {
            state.track_event(&ev);
            if let Err(e) = vc.handle_event(ev) {
                tracing::warn!("failed to apply relay event: {e:#}");
                vc.show_banner(format!("Store update failed: {e:#}"));
            }
        }
        vc.expire_banner(Instant::now());
        state.clamp_selection(vc.records().len());

        if last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| draw(f.area(), f, &vc, &state)).ok();
            last_tick = Instant::now();
        }

        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                if handle_key(&mut vc, &mut state, k) {
                    break;
                }
                // Redraw right away so typing feels immediate.
                terminal.draw(|f| draw(f.area(), f, &vc, &state)).ok();
                last_tick = Instant::now();
            }
        }
    }

    restore_terminal();
    Ok(())
}

fn restore_terminal() {
    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
}

/// Apply one key press. Returns true when the UI should exit.
fn handle_key(vc: &mut ViewController, state: &mut UiState, k: KeyEvent) -> bool {
    if k.modifiers.contains(KeyModifiers::CONTROL) && k.code == KeyCode::Char('c') {
        vc.shutdown();
        return true;
    }

    match state.focus {
        Focus::Form(field) => {
            handle_form_key(vc, state, field, k);
            false
        }
        Focus::List => handle_list_key(vc, state, k),
    }
}

fn handle_form_key(vc: &mut ViewController, state: &mut UiState, field: Field, k: KeyEvent) {
    match k.code {
        KeyCode::Esc => {
            vc.form.blur(field);
            state.focus = Focus::List;
        }
        KeyCode::Tab | KeyCode::Down => {
            vc.form.blur(field);
            state.focus = Focus::Form(field.next());
        }
        KeyCode::BackTab | KeyCode::Up => {
            vc.form.blur(field);
            state.focus = Focus::Form(field.prev());
        }
        KeyCode::Backspace => vc.form.backspace(field),
        KeyCode::Enter => match vc.submit() {
            Ok(Some(id)) => {
                state.focus = Focus::List;
                if let Some(idx) = vc.records().iter().position(|r| r.id == Some(id)) {
                    state.selected = idx;
                    state.output_scroll = 0;
                }
                vc.show_banner("Command saved");
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("save failed: {e:#}");
                vc.show_banner(format!("Save failed: {e:#}"));
            }
        },
        KeyCode::Char(c) if !k.modifiers.contains(KeyModifiers::CONTROL) => {
            vc.form.push_char(field, c);
        }
        _ => {}
    }
}

fn handle_list_key(vc: &mut ViewController, state: &mut UiState, k: KeyEvent) -> bool {
    let selected = state.selected_id(vc.records());
    match k.code {
        KeyCode::Char('q') => {
            vc.shutdown();
            return true;
        }
        KeyCode::Char('?') => {
            state.tab = (state.tab + 1) % 2;
        }
        KeyCode::Char('a') | KeyCode::Tab => {
            state.tab = 0;
            state.focus = Focus::Form(Field::Name);
        }
        KeyCode::Esc => {
            if state.tab != 0 {
                state.tab = 0;
            } else {
                vc.dismiss_banner();
            }
        }
        KeyCode::Down | KeyCode::Char('j') => state.select_next(vc.records().len()),
        KeyCode::Up | KeyCode::Char('k') => state.select_prev(),
        KeyCode::PageUp => state.scroll_up(SCROLL_STEP),
        KeyCode::PageDown => state.scroll_down(SCROLL_STEP),
        KeyCode::Enter | KeyCode::Char('r') => {
            if let Some(id) = selected {
                match vc.run(id) {
                    Ok(true) => state.output_scroll = 0,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(id, "run failed: {e:#}");
                        vc.show_banner(format!("Run failed: {e:#}"));
                    }
                }
            }
        }
        KeyCode::Char('x') => {
            if let Some(id) = selected {
                vc.kill(id);
            }
        }
        KeyCode::Char('d') => {
            if let Some(id) = selected {
                if let Err(e) = vc.delete(id) {
                    tracing::warn!(id, "delete failed: {e:#}");
                    vc.show_banner(format!("Delete failed: {e:#}"));
                }
                state.started.remove(&id);
                state.clamp_selection(vc.records().len());
            }
        }
        KeyCode::Char('y') => {
            if let Some(buf) = selected.and_then(|id| vc.buffer(id)) {
                match clipboard::copy_to_clipboard(buf.text()) {
                    Ok(()) => vc.show_banner("Output copied to clipboard"),
                    Err(e) => vc.show_banner(format!("Copy failed: {e:#}")),
                }
            } else {
                vc.show_banner("Nothing to copy");
            }
        }
        _ => {}
    }
    false
}

/// Make raw process output safe to draw: tabs become spaces, carriage returns
/// and other control bytes are dropped.
fn sanitize_output(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\n' => out.push('\n'),
            '\t' => out.push_str("    "),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

fn draw(area: Rect, f: &mut ratatui::Frame, vc: &ViewController, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)].as_ref())
        .split(area);

    let tabs = Tabs::new(vec![Line::from("Commands"), Line::from("Help")])
        .select(state.tab)
        .block(Block::default().borders(Borders::ALL).title("cmd-deck"))
        .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, chunks[0]);

    match state.tab {
        0 => draw_commands(chunks[1], f, vc, state),
        _ => draw_help(chunks[1], f),
    }
}

fn draw_commands(area: Rect, f: &mut ratatui::Frame, vc: &ViewController, state: &UiState) {
    let main = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(3), // Add form
                Constraint::Min(0),    // List + output
                Constraint::Length(3), // Status row
            ]
            .as_ref(),
        )
        .split(area);

    draw_form(main[0], f, vc, state);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(35), Constraint::Percentage(65)].as_ref())
        .split(main[1]);
    draw_list(body[0], f, vc, state);

    let right = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(6), Constraint::Min(0)].as_ref())
        .split(body[1]);
    let record = vc.records().get(state.selected);
    draw_details(right[0], f, record, state);
    draw_output(right[1], f, vc, record, state);

    draw_status(main[2], f, vc, state);
}

fn draw_form(area: Rect, f: &mut ratatui::Frame, vc: &ViewController, state: &UiState) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints(
            [
                Constraint::Percentage(22),
                Constraint::Percentage(28),
                Constraint::Percentage(38),
                Constraint::Min(10),
            ]
            .as_ref(),
        )
        .split(area);

    let add_style = if matches!(state.focus, Focus::Form(_)) {
        Style::default().fg(Color::Green)
    } else {
        Style::default().fg(Color::Gray)
    };
    let add = Paragraph::new(Line::from(Span::styled("enter", add_style)))
        .block(Block::default().borders(Borders::ALL).title("Add"));
    f.render_widget(add, cols[3]);

    for (field, col) in Field::ALL.into_iter().zip(cols.iter()) {
        let focused = state.focus == Focus::Form(field);
        let (title, border) = match vc.form.error(field) {
            Some(err) => (
                format!("{}: {}", field.label(), err),
                Style::default().fg(Color::Red),
            ),
            None if focused => (field.label().to_string(), Style::default().fg(Color::Yellow)),
            None => (field.label().to_string(), Style::default()),
        };
        let value = vc.form.value(field);
        let p = Paragraph::new(value.to_string()).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(border)
                .title(title),
        );
        f.render_widget(p, *col);

        if focused {
            let max_x = col.x + col.width.saturating_sub(2);
            let x = (col.x + 1 + value.chars().count() as u16).min(max_x);
            f.set_cursor_position(Position::new(x, col.y + 1));
        }
    }
}

fn draw_list(area: Rect, f: &mut ratatui::Frame, vc: &ViewController, state: &UiState) {
    let items: Vec<ListItem> = vc
        .records()
        .iter()
        .map(|r| {
            let line = match r.run_state.pid() {
                Some(pid) => Line::from(vec![
                    Span::styled("● ", Style::default().fg(Color::Green)),
                    Span::raw(r.display_name().to_string()),
                    Span::styled(format!("  pid {pid}"), Style::default().fg(Color::Gray)),
                ]),
                None => Line::from(vec![
                    Span::raw("  "),
                    Span::raw(r.display_name().to_string()),
                ]),
            };
            ListItem::new(line)
        })
        .collect();

    let title = if items.is_empty() {
        "Commands (press a to add)".to_string()
    } else {
        format!("Commands ({})", items.len())
    };
    let border = if state.focus == Focus::List {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default()
    };
    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(border)
                .title(title),
        )
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));

    let mut ls = ListState::default();
    if !vc.records().is_empty() {
        ls.select(Some(state.selected));
    }
    f.render_stateful_widget(list, area, &mut ls);
}

fn draw_details(
    area: Rect,
    f: &mut ratatui::Frame,
    record: Option<&CommandRecord>,
    state: &UiState,
) {
    let mut lines: Vec<Line<'static>> = Vec::new();
    if let Some(r) = record {
        push_wrapped_status_kv(&mut lines, "Command", &r.cmd, area.width);
        push_wrapped_status_kv(&mut lines, "Path", &r.path, area.width);
        match r.run_state.pid() {
            Some(pid) => {
                let started = r
                    .id
                    .and_then(|id| state.started.get(&id))
                    .map(|t| format!(" (since {})", format_clock(*t)))
                    .unwrap_or_default();
                push_wrapped_status_kv(
                    &mut lines,
                    "PID",
                    &format!("{pid}{started}"),
                    area.width,
                );
            }
            None => push_wrapped_status_kv(&mut lines, "Status", "not running", area.width),
        }
    } else {
        lines.push(Line::from("No command selected"));
    }

    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Details"));
    f.render_widget(p, area);
}

fn draw_output(
    area: Rect,
    f: &mut ratatui::Frame,
    vc: &ViewController,
    record: Option<&CommandRecord>,
    state: &UiState,
) {
    let text = record
        .and_then(|r| r.id)
        .and_then(|id| vc.buffer(id))
        .map(|b| sanitize_output(&b.text()))
        .unwrap_or_default();

    let total = text.lines().count() as u16;
    let visible = area.height.saturating_sub(2);
    let offset = total
        .saturating_sub(visible)
        .saturating_sub(state.output_scroll);

    let title = if state.output_scroll > 0 {
        format!("Output (scrolled {})", state.output_scroll)
    } else {
        "Output".to_string()
    };
    let p = Paragraph::new(text)
        .scroll((offset, 0))
        .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(p, area);
}

fn draw_status(area: Rect, f: &mut ratatui::Frame, vc: &ViewController, state: &UiState) {
    let line = match vc.banner() {
        Some(b) => Line::from(Span::styled(
            b.to_string(),
            Style::default().fg(Color::Yellow),
        )),
        None => match state.focus {
            Focus::List => Line::from(
                "enter run · x kill · d delete · a add · y copy · ? help · q quit",
            ),
            Focus::Form(_) => Line::from("tab next field · enter add · esc back"),
        },
    };
    let p = Paragraph::new(line).block(Block::default().borders(Borders::ALL));
    f.render_widget(p, area);
}
