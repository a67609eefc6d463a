use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

fn key_line(key: &'static str, pad: usize, what: &'static str) -> Line<'static> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(key, Style::default().fg(Color::Magenta)),
        Span::raw(format!("{}{what}", " ".repeat(pad))),
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
            Span::raw("  Quit"),
        ]),
        key_line("tab", 9, "Switch tabs"),
        key_line("?", 11, "Show this help"),
        Line::from(""),
        Line::from("Explorer tab:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("↑/↓", Style::default().fg(Color::Magenta)),
            Span::raw(" or "),
            Span::styled("j/k", Style::default().fg(Color::Magenta)),
            Span::raw("  Move entity cursor"),
        ]),
        key_line("enter", 7, "Pick entity (start, then end; pick again to unselect)"),
        key_line("click", 7, "Pick entity on the map, or add a custom entity"),
        key_line("b", 11, "Run BFS from start"),
        key_line("d", 11, "Run DFS from start"),
        key_line("s", 11, "Run shortest path from start to end"),
        key_line("i", 11, "Check bipartite"),
        key_line("p", 11, "Pause/Resume playback"),
        key_line("+/-", 9, "Faster/slower playback"),
        key_line("c", 11, "Clear selection"),
        key_line("r", 11, "Reset to an empty canvas"),
        key_line("m", 11, "Load map data (M: major roads only)"),
        key_line("1/2/3", 7, "Convert to adjacency matrix / adjacency list / edge list"),
        key_line("w", 11, "Save graph on the service"),
        key_line("g", 11, "List saved graphs"),
        Line::from(""),
        Line::from("Saved graphs tab:"),
        key_line("enter", 7, "Load selected graph"),
        key_line("g", 11, "Refresh list"),
        Line::from(""),
        Line::from("History tab:"),
        key_line("e", 11, "Export selected as JSON"),
        key_line("c", 11, "Export selected as CSV"),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(p, area);
}
