use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

fn key_line(key: &str, pad: usize, what: &str) -> Line<'static> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(key.to_string(), Style::default().fg(Color::Magenta)),
        Span::raw(" ".repeat(pad)),
        Span::raw(what.to_string()),
    ])
}

pub fn draw_help(area: Rect, f: &mut Frame) {
    let p = Paragraph::new(vec![
        Line::from("Keybinds:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("q", Style::default().fg(Color::Magenta)),
            Span::raw(" / "),
            Span::styled("Ctrl-C", Style::default().fg(Color::Magenta)),
            Span::raw("  Quit (running commands are terminated)"),
        ]),
        key_line("?", 11, "Toggle this help"),
        key_line("esc", 9, "Back to commands"),
        Line::from(""),
        Line::from("Command list:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("↑/↓", Style::default().fg(Color::Magenta)),
            Span::raw(" or "),
            Span::styled("j/k", Style::default().fg(Color::Magenta)),
            Span::raw("  Select"),
        ]),
        key_line("enter/r", 5, "Run selected"),
        key_line("x", 11, "Kill selected (with its child processes)"),
        key_line("d", 11, "Delete selected (kills it first if running)"),
        key_line("y", 11, "Copy selected output to clipboard"),
        key_line("pgup/pgdn", 3, "Scroll output"),
        key_line("a/tab", 7, "Add a command"),
        key_line("esc", 9, "Dismiss message"),
        Line::from(""),
        Line::from("Add form:"),
        key_line("tab/↓", 7, "Next field"),
        key_line("shift-tab/↑", 1, "Previous field"),
        key_line("enter", 7, "Add"),
        key_line("esc", 9, "Back to the list"),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(p, area);
}
