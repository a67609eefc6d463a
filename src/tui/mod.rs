mod export;
mod help;
mod map;
mod state;

use crate::cli::Cli;
use crate::model::{AlgorithmKind, AppEvent, PlaybackState, RepresentationFormat};
use crate::orchestrator::{self, DatasetSource, UiCommand};
use anyhow::{Context, Result};
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind,
        KeyModifiers, MouseButton, MouseEventKind,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Margin, Rect},
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Tabs},
    Terminal,
};
use state::{Prompt, UiState};
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

const TAB_EXPLORER: usize = 0;
const TAB_SAVED: usize = 1;
const TAB_HISTORY: usize = 2;
const TAB_HELP: usize = 3;
const TAB_COUNT: usize = 4;

const INTERVAL_STEP_MS: u64 = 100;
const INTERVAL_MIN_MS: u64 = 100;
const INTERVAL_MAX_MS: u64 = 3_000;

pub async fn run(args: Cli) -> Result<()> {
    // Unbounded channels avoid backpressure and task switching in the hot path.
    let (event_tx, event_rx) = mpsc::unbounded_channel::<AppEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();
    let highlights = crate::render::SharedHighlights::new();

    // Start on an empty canvas unless a dataset was requested.
    if DatasetSource::from_args(&args).is_none() {
        let _ = cmd_tx.send(UiCommand::LoadDataset(DatasetSource::Empty));
    }

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_args = args.clone();
    let ui_highlights = highlights.clone();
    let ui_handle =
        std::thread::spawn(move || run_threaded(ui_args, ui_highlights, event_rx, cmd_tx));

    let res = orchestrator::run_controller(&args, highlights, event_tx, cmd_rx).await;

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

/// Screen regions of the explorer tab.
struct ExplorerAreas {
    map: Rect,
    entities: Rect,
    session: Rect,
    steps: Rect,
}

fn split_screen(area: Rect) -> [Rect; 3] {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(3),
                Constraint::Min(0),
                Constraint::Length(1),
            ]
            .as_ref(),
        )
        .split(area);
    [chunks[0], chunks[1], chunks[2]]
}

fn explorer_areas(body: Rect) -> ExplorerAreas {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(10), Constraint::Length(10)].as_ref())
        .split(body);
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(30), Constraint::Length(36)].as_ref())
        .split(rows[0]);
    let side = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(5), Constraint::Length(8)].as_ref())
        .split(cols[1]);
    ExplorerAreas {
        map: cols[0],
        entities: side[0],
        session: side[1],
        steps: rows[1],
    }
}

/// Run the TUI loop on a dedicated thread.
pub fn run_threaded(
    args: Cli,
    highlights: crate::render::SharedHighlights,
    mut event_rx: UnboundedReceiver<AppEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    // UiState is owned by the UI thread only; no cross-thread mutation.
    let mut state = UiState {
        highlights,
        auto_save: args.auto_save,
        interval_ms: args.interval_ms,
        ..Default::default()
    };
    state.history = crate::storage::load_recent(50).unwrap_or_default();

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        // Drain events without blocking to keep UI responsive; unbounded channel avoids backpressure.
        while let Ok(ev) = event_rx.try_recv() {
            state.apply_event(ev);
        }

        if last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| draw(f.area(), f, &state)).ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if !event::poll(Duration::from_millis(10)).unwrap_or(false) {
            continue;
        }
        match event::read() {
            Ok(Event::Key(k)) => {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                if state.prompt.is_some() {
                    handle_prompt_key(&mut state, &cmd_tx, k.code);
                    continue;
                }
                match (k.modifiers, k.code) {
                    (_, KeyCode::Char('q')) | (KeyModifiers::CONTROL, KeyCode::Char('c')) => {
                        let _ = cmd_tx.send(UiCommand::Quit);
                        break Ok(());
                    }
                    (_, KeyCode::Tab) => {
                        state.tab = (state.tab + 1) % TAB_COUNT;
                    }
                    (_, KeyCode::Char('?')) => {
                        state.tab = TAB_HELP;
                    }
                    _ => handle_tab_key(&mut state, &cmd_tx, k.code),
                }
            }
            Ok(Event::Mouse(m)) => {
                if state.tab == TAB_EXPLORER
                    && matches!(m.kind, MouseEventKind::Down(MouseButton::Left))
                {
                    if let Ok(size) = terminal.size() {
                        let [_, body, _] = split_screen(Rect::new(0, 0, size.width, size.height));
                        handle_map_click(&state, &cmd_tx, explorer_areas(body).map, m.column, m.row);
                    }
                }
            }
            _ => {}
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, DisableMouseCapture, LeaveAlternateScreen).ok();
    res
}

fn handle_prompt_key(state: &mut UiState, cmd_tx: &UnboundedSender<UiCommand>, code: KeyCode) {
    let Some(Prompt::SaveGraphName(buf)) = state.prompt.as_mut() else {
        return;
    };
    match code {
        KeyCode::Esc => state.prompt = None,
        KeyCode::Backspace => {
            buf.pop();
        }
        KeyCode::Enter => {
            let name = buf.trim().to_string();
            state.prompt = None;
            if name.is_empty() {
                state.info = "Save cancelled: empty name".into();
            } else {
                state.info = format!("Saving graph {name}…");
                let _ = cmd_tx.send(UiCommand::SaveGraph(name));
            }
        }
        KeyCode::Char(c) => buf.push(c),
        _ => {}
    }
}

fn handle_tab_key(state: &mut UiState, cmd_tx: &UnboundedSender<UiCommand>, code: KeyCode) {
    match state.tab {
        TAB_EXPLORER => handle_explorer_key(state, cmd_tx, code),
        TAB_SAVED => match code {
            KeyCode::Up | KeyCode::Char('k') => {
                state.saved_selected = state.saved_selected.saturating_sub(1);
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if state.saved_selected + 1 < state.saved_graphs.len() {
                    state.saved_selected += 1;
                }
            }
            KeyCode::Enter => {
                if let Some(g) = state.saved_graphs.get(state.saved_selected) {
                    let _ = cmd_tx.send(UiCommand::LoadDataset(DatasetSource::Saved(
                        g.filename.clone(),
                    )));
                    state.tab = TAB_EXPLORER;
                }
            }
            KeyCode::Char('g') => {
                let _ = cmd_tx.send(UiCommand::ListSavedGraphs);
            }
            _ => {}
        },
        TAB_HISTORY => match code {
            KeyCode::Up | KeyCode::Char('k') => {
                state.history_selected = state.history_selected.saturating_sub(1);
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if state.history_selected + 1 < state.history.len() {
                    state.history_selected += 1;
                }
            }
            KeyCode::Char('e') | KeyCode::Char('c') => {
                if let Some(r) = state.history.get(state.history_selected) {
                    let res = if code == KeyCode::Char('e') {
                        export::export_record_json(r)
                    } else {
                        export::export_record_csv(r)
                    };
                    match res {
                        Ok(p) => {
                            state.info = format!("Exported: {}", p.display());
                            state.last_exported_path = Some(p.display().to_string());
                        }
                        Err(e) => state.info = format!("Export failed: {e:#}"),
                    }
                }
            }
            _ => {}
        },
        _ => {}
    }
}

fn handle_explorer_key(state: &mut UiState, cmd_tx: &UnboundedSender<UiCommand>, code: KeyCode) {
    let run = |kind: AlgorithmKind| {
        let _ = cmd_tx.send(UiCommand::Run(kind));
    };
    match code {
        KeyCode::Up | KeyCode::Char('k') => state.move_cursor(-1),
        KeyCode::Down | KeyCode::Char('j') => state.move_cursor(1),
        KeyCode::PageUp => state.move_cursor(-10),
        KeyCode::PageDown => state.move_cursor(10),
        KeyCode::Enter | KeyCode::Char(' ') => {
            if let Some(id) = state.cursor_entity() {
                let _ = cmd_tx.send(UiCommand::Pick(id.to_string()));
            }
        }
        KeyCode::Char('b') => run(AlgorithmKind::Bfs),
        KeyCode::Char('d') => run(AlgorithmKind::Dfs),
        KeyCode::Char('s') => run(AlgorithmKind::ShortestPath),
        KeyCode::Char('i') => run(AlgorithmKind::Bipartite),
        KeyCode::Char('p') => {
            let _ = cmd_tx.send(UiCommand::TogglePause);
        }
        KeyCode::Char('+') | KeyCode::Char('=') => {
            let ms = state
                .interval_ms
                .saturating_sub(INTERVAL_STEP_MS)
                .max(INTERVAL_MIN_MS);
            let _ = cmd_tx.send(UiCommand::SetInterval(ms));
        }
        KeyCode::Char('-') => {
            let ms = (state.interval_ms + INTERVAL_STEP_MS).min(INTERVAL_MAX_MS);
            let _ = cmd_tx.send(UiCommand::SetInterval(ms));
        }
        KeyCode::Char('c') => {
            let _ = cmd_tx.send(UiCommand::ClearSelection);
        }
        KeyCode::Char('r') => {
            let _ = cmd_tx.send(UiCommand::ClearDataset);
            let _ = cmd_tx.send(UiCommand::LoadDataset(DatasetSource::Empty));
        }
        KeyCode::Char('m') | KeyCode::Char('M') => {
            let _ = cmd_tx.send(UiCommand::LoadDataset(DatasetSource::MapData {
                major_roads_only: code == KeyCode::Char('M'),
            }));
        }
        KeyCode::Char(c @ '1'..='3') => {
            let format = match c {
                '1' => RepresentationFormat::AdjacencyMatrix,
                '2' => RepresentationFormat::AdjacencyList,
                _ => RepresentationFormat::EdgeList,
            };
            let _ = cmd_tx.send(UiCommand::ConvertRepresentation(format));
        }
        KeyCode::Char('w') => {
            state.prompt = Some(Prompt::SaveGraphName(String::new()));
        }
        KeyCode::Char('g') => {
            let _ = cmd_tx.send(UiCommand::ListSavedGraphs);
            state.tab = TAB_SAVED;
        }
        _ => {}
    }
}

/// Picks the entity under the click, or adds a custom entity at that spot.
fn handle_map_click(
    state: &UiState,
    cmd_tx: &UnboundedSender<UiCommand>,
    map_area: Rect,
    col: u16,
    row: u16,
) {
    let inner = map_area.inner(Margin {
        horizontal: 1,
        vertical: 1,
    });
    let view = map::MapView::fit(state.dataset.as_ref());
    let Some((lat, lon)) = view.to_geo(inner, col, row) else {
        return;
    };
    let hit = state
        .dataset
        .as_ref()
        .and_then(|d| view.entity_near(d, inner, lat, lon));
    let cmd = match hit {
        Some(id) => UiCommand::Pick(id.to_string()),
        None => UiCommand::AddEntity { lat, lon },
    };
    let _ = cmd_tx.send(cmd);
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let [header, body, status] = split_screen(area);

    let tabs = Tabs::new(vec![
        Line::from("Explorer"),
        Line::from("Saved graphs"),
        Line::from("History"),
        Line::from("Help"),
    ])
    .select(state.tab)
    .block(Block::default().borders(Borders::ALL).title("mapgraph"))
    .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, header);

    match state.tab {
        TAB_EXPLORER => draw_explorer(body, f, state),
        TAB_SAVED => draw_saved(body, f, state),
        TAB_HISTORY => draw_history(body, f, state),
        _ => help::draw_help(body, f),
    }

    draw_status(status, f, state);
}

fn draw_status(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let line = match &state.prompt {
        Some(Prompt::SaveGraphName(buf)) => Line::from(vec![
            Span::styled("Save graph as: ", Style::default().fg(Color::Yellow)),
            Span::raw(format!("{buf}_")),
            Span::styled("  (enter to save, esc to cancel)", Style::default().fg(Color::Gray)),
        ]),
        None => {
            let color = if state.info_is_error {
                Color::Red
            } else {
                Color::Gray
            };
            Line::from(Span::styled(state.info.clone(), Style::default().fg(color)))
        }
    };
    f.render_widget(Paragraph::new(line), area);
}

fn draw_explorer(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let areas = explorer_areas(area);
    map::draw_map(areas.map, f, state);
    draw_entities(areas.entities, f, state);
    draw_session(areas.session, f, state);
    draw_steps(areas.steps, f, state);
}

fn draw_entities(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let highlights = state.highlights.snapshot();
    let items: Vec<ListItem> = state
        .dataset
        .as_ref()
        .map(|d| {
            d.entities
                .iter()
                .map(|e| {
                    let token = highlights
                        .entity_color(&e.id)
                        .unwrap_or(crate::render::ColorToken::Default);
                    let mut spans = vec![
                        Span::styled("● ", Style::default().fg(map::token_color(token))),
                        Span::raw(e.label.clone().unwrap_or_else(|| e.id.clone())),
                    ];
                    if state.start.as_deref() == Some(e.id.as_str()) {
                        spans.push(Span::styled(" [start]", Style::default().fg(Color::Yellow)));
                    } else if state.end.as_deref() == Some(e.id.as_str()) {
                        spans.push(Span::styled(" [end]", Style::default().fg(Color::Green)));
                    }
                    ListItem::new(Line::from(spans))
                })
                .collect()
        })
        .unwrap_or_default();

    let title = format!("Entities ({})", state.entity_count());
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(Style::default().fg(Color::Black).bg(Color::Cyan));
    let mut list_state = ListState::default();
    if state.entity_count() > 0 {
        list_state.select(Some(state.cursor));
    }
    f.render_stateful_widget(list, area, &mut list_state);
}

fn draw_session(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let label = |id: &Option<String>| id.clone().unwrap_or_else(|| "-".into());
    let playback_color = match state.playback {
        PlaybackState::Running => Color::Green,
        PlaybackState::Paused => Color::Yellow,
        PlaybackState::Finished => Color::Cyan,
        PlaybackState::Idle => Color::Gray,
    };
    let algo = state
        .running_kind
        .map(|k| k.label().to_string())
        .unwrap_or_else(|| "-".into());
    let lines = vec![
        Line::from(vec![
            Span::styled("Start: ", Style::default().fg(Color::Gray)),
            Span::raw(label(&state.start)),
        ]),
        Line::from(vec![
            Span::styled("End:   ", Style::default().fg(Color::Gray)),
            Span::raw(label(&state.end)),
        ]),
        Line::from(vec![
            Span::styled("Algo:  ", Style::default().fg(Color::Gray)),
            Span::raw(algo),
        ]),
        Line::from(vec![
            Span::styled("State: ", Style::default().fg(Color::Gray)),
            Span::styled(state.playback.label(), Style::default().fg(playback_color)),
            Span::raw(format!("  {}/{}", state.current_step, state.total_steps)),
        ]),
        Line::from(vec![
            Span::styled("Speed: ", Style::default().fg(Color::Gray)),
            Span::raw(format!("{} ms", state.interval_ms)),
            Span::styled(
                if state.auto_save { "  auto-save" } else { "" },
                Style::default().fg(Color::Gray),
            ),
        ]),
    ];
    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Session"));
    f.render_widget(p, area);
}

fn draw_steps(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let visible = area.height.saturating_sub(2) as usize;
    let skip = state.step_log.len().saturating_sub(visible);
    let lines: Vec<Line> = state
        .step_log
        .iter()
        .skip(skip)
        .map(|l| Line::from(l.as_str()))
        .collect();
    let title = if state.malformed_steps > 0 {
        format!("Steps ({} malformed skipped)", state.malformed_steps)
    } else {
        "Steps".to_string()
    };
    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(p, area);
}

fn draw_saved(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let items: Vec<ListItem> = state
        .saved_graphs
        .iter()
        .map(|g| {
            ListItem::new(Line::from(vec![
                Span::styled(
                    format!("{:<28}", if g.name.is_empty() { &g.filename } else { &g.name }),
                    Style::default().fg(Color::Cyan),
                ),
                Span::raw(format!(
                    " {} nodes, {} edges  {}",
                    g.node_count,
                    g.edge_count,
                    g.saved_at.as_deref().unwrap_or("")
                )),
            ]))
        })
        .collect();
    let title = if state.saved_graphs.is_empty() {
        "Saved graphs (press g to refresh)".to_string()
    } else {
        format!("Saved graphs ({})", state.saved_graphs.len())
    };
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(Style::default().fg(Color::Black).bg(Color::Cyan));
    let mut list_state = ListState::default();
    if !state.saved_graphs.is_empty() {
        list_state.select(Some(state.saved_selected));
    }
    f.render_stateful_widget(list, area, &mut list_state);
}

fn draw_history(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(45), Constraint::Percentage(55)].as_ref())
        .split(area);

    let items: Vec<ListItem> = state
        .history
        .iter()
        .map(|r| {
            ListItem::new(Line::from(vec![
                Span::styled(
                    format!("{:<20}", r.timestamp_utc),
                    Style::default().fg(Color::Gray),
                ),
                Span::raw(format!(
                    " {:<16} {} steps",
                    r.algorithm.label(),
                    r.steps.len()
                )),
            ]))
        })
        .collect();
    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("History ({})", state.history.len())),
        )
        .highlight_style(Style::default().fg(Color::Black).bg(Color::Cyan));
    let mut list_state = ListState::default();
    if !state.history.is_empty() {
        list_state.select(Some(state.history_selected));
    }
    f.render_stateful_widget(list, cols[0], &mut list_state);

    let mut detail: Vec<Line> = match state.history.get(state.history_selected) {
        Some(r) => crate::text_summary::build_text_summary(r)
            .lines
            .into_iter()
            .map(Line::from)
            .collect(),
        None => vec![Line::from("No runs yet.")],
    };
    if let Some(p) = &state.last_exported_path {
        detail.push(Line::from(""));
        detail.push(Line::from(Span::styled(
            format!("Last export: {p}"),
            Style::default().fg(Color::Gray),
        )));
    }
    let p = Paragraph::new(detail).block(Block::default().borders(Borders::ALL).title("Run"));
    f.render_widget(p, cols[1]);
}
