use crate::model::{CommandId, CommandRecord, RelayEvent};
use crate::view::Field;
use ratatui::{
    style::Color,
    style::Style,
    text::{Line, Span},
};
use std::collections::HashMap;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    List,
    Form(Field),
}

pub struct UiState {
    pub tab: usize,
    pub focus: Focus,
    pub selected: usize,
    /// Lines scrolled back from the tail of the output panel; 0 follows new output.
    pub output_scroll: u16,
    /// When each live command's process first reported output, local time.
    pub started: HashMap<CommandId, OffsetDateTime>,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            tab: 0,
            focus: Focus::List,
            selected: 0,
            output_scroll: 0,
            started: HashMap::new(),
        }
    }
}

impl UiState {
    pub fn selected_id(&self, records: &[CommandRecord]) -> Option<CommandId> {
        records.get(self.selected).and_then(|r| r.id)
    }

    pub fn select_next(&mut self, len: usize) {
        if len > 0 && self.selected + 1 < len {
            self.selected += 1;
            self.output_scroll = 0;
        }
    }

    pub fn select_prev(&mut self) {
        if self.selected > 0 {
            self.selected -= 1;
            self.output_scroll = 0;
        }
    }

    /// Keep the selection inside the list after deletes.
    pub fn clamp_selection(&mut self, len: usize) {
        if len == 0 {
            self.selected = 0;
        } else if self.selected >= len {
            self.selected = len - 1;
        }
    }

    pub fn scroll_up(&mut self, by: u16) {
        self.output_scroll = self.output_scroll.saturating_add(by);
    }

    pub fn scroll_down(&mut self, by: u16) {
        self.output_scroll = self.output_scroll.saturating_sub(by);
    }

    /// Record start times from relay traffic before the controller consumes it.
    pub fn track_event(&mut self, ev: &RelayEvent) {
        match ev {
            RelayEvent::Output(m) if m.run_state.is_running() => {
                self.started.entry(m.id).or_insert_with(now_local);
            }
            RelayEvent::Output(m) => {
                self.started.remove(&m.id);
            }
            RelayEvent::Terminal { id } => {
                self.started.remove(id);
            }
            RelayEvent::KillRequested(_) => {}
        }
    }
}

fn now_local() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

pub fn format_clock(t: OffsetDateTime) -> String {
    t.format(time::macros::format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_else(|_| "--:--:--".into())
}

pub fn push_wrapped_status_kv(
    out: &mut Vec<Line<'static>>,
    label: &str,
    value: &str,
    area_width: u16,
) {
    let value = value.trim();
    if value.is_empty() {
        return;
    }

    // Borders plus one column of padding each side.
    let usable_width = area_width.saturating_sub(4).max(1);
    let label_text = format!("{label}:");
    let label_width = label_text.chars().count() as u16;

    let value_chars: Vec<char> = value.chars().collect();
    let mut remaining = value_chars.as_slice();
    let mut first = true;

    while !remaining.is_empty() {
        let line_width = if first {
            usable_width.saturating_sub(label_width + 1).max(1)
        } else {
            usable_width.saturating_sub(2).max(1)
        };

        let take = (remaining.len() as u16).min(line_width) as usize;
        let (line_chars, rest) = remaining.split_at(take);
        let line_text: String = line_chars.iter().collect();

        if first {
            out.push(Line::from(vec![
                Span::styled(label_text.clone(), Style::default().fg(Color::Gray)),
                Span::raw(" "),
                Span::raw(line_text),
            ]));
            first = false;
        } else {
            out.push(Line::from(vec![Span::raw("  "), Span::raw(line_text)]));
        }

        remaining = rest;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CommandMessage, RunState};

    #[test]
    fn selection_stays_in_bounds() {
        let mut s = UiState::default();
        s.select_prev();
        assert_eq!(s.selected, 0);
        s.select_next(2);
        s.select_next(2);
        assert_eq!(s.selected, 1);
        s.clamp_selection(1);
        assert_eq!(s.selected, 0);
        s.clamp_selection(0);
        assert_eq!(s.selected, 0);
    }

    #[test]
    fn scroll_resets_on_selection_change() {
        let mut s = UiState::default();
        s.scroll_up(5);
        s.scroll_down(2);
        assert_eq!(s.output_scroll, 3);
        s.select_next(3);
        assert_eq!(s.output_scroll, 0);
    }

    #[test]
    fn start_time_follows_run_state() {
        let mut s = UiState::default();
        let mut m = CommandMessage {
            run_state: RunState::Running { pid: 3 },
            msg: "x\n".into(),
            id: 4,
            cmd: "x".into(),
            name: String::new(),
            path: "/tmp".into(),
            disabled: true,
        };
        s.track_event(&RelayEvent::Output(m.clone()));
        let first = s.started[&4];
        s.track_event(&RelayEvent::Output(m.clone()));
        assert_eq!(s.started[&4], first);

        m.run_state = RunState::NotRunning;
        s.track_event(&RelayEvent::Output(m));
        assert!(!s.started.contains_key(&4));
    }

    #[test]
    fn wrapped_kv_splits_long_values() {
        let mut out = Vec::new();
        push_wrapped_status_kv(&mut out, "Path", &"a".repeat(30), 20);
        assert!(out.len() > 1);
        push_wrapped_status_kv(&mut out, "Empty", "   ", 20);
        let before = out.len();
        push_wrapped_status_kv(&mut out, "Empty", "", 20);
        assert_eq!(out.len(), before);
    }
}
