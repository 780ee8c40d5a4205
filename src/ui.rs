use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use geopoint_editor::{
    coords, csv_codec, BindingState, DetailForm, EditorConfig, EditorSession,
    GeoPoint, HeadlessSurface, SortKey,
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction as LayoutDirection, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Browse,
    Filter,
    /// Editing the detail form; `creating` means the form makes a new point
    Edit { creating: bool },
}

const FORM_FIELDS: [&str; 3] = ["Name", "Lat [°]", "Lon [°]"];

pub struct App {
    pub session: EditorSession<HeadlessSurface>,
    pub config: EditorConfig,
    /// Snapshot of the live filtered view, refreshed whenever the store says it changed
    pub rows: Vec<GeoPoint>,
    pub state: TableState,
    pub show_detail: bool,
    pub mode: InputMode,
    pub filter_input: String,
    pub form: DetailForm,
    pub form_field: usize,
    pub status: String,
    dirty: Arc<AtomicBool>,
}

impl App {
    pub fn new(mut session: EditorSession<HeadlessSurface>, config: EditorConfig) -> Self {
        let dirty = Arc::new(AtomicBool::new(true));
        let flag = dirty.clone();
        session.subscribe(move |_| flag.store(true, Ordering::SeqCst));

        let mut app = Self {
            session,
            config,
            rows: Vec::new(),
            state: TableState::default(),
            show_detail: false,
            mode: InputMode::Browse,
            filter_input: String::new(),
            form: DetailForm::default(),
            form_field: 0,
            status: String::new(),
            dirty,
        };
        app.refresh();
        app
    }

    /// Re-read the filtered view if the store emitted anything since last time
    pub fn refresh(&mut self) {
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return;
        }

        let selected_id = self.selected_point().map(|p| p.id);
        self.rows = self.session.filtered();

        let index = selected_id
            .and_then(|id| self.rows.iter().position(|p| p.id == id))
            .or(if self.rows.is_empty() { None } else { Some(0) })
            .map(|i| i.min(self.rows.len().saturating_sub(1)));
        self.state.select(index);
    }

    pub fn selected_point(&self) -> Option<&GeoPoint> {
        self.state.selected().and_then(|i| self.rows.get(i))
    }

    // ------------------------------------------------------------------------
    // Actions
    // ------------------------------------------------------------------------

    pub fn toggle_detail(&mut self) {
        let Some(point) = self.selected_point().cloned() else {
            return;
        };
        let Some(handle) = self.session.markers().marker_for(point.id) else {
            return;
        };

        let result = if self.session.markers().state(point.id) == BindingState::Selected {
            self.show_detail = false;
            self.session.close_detail(handle)
        } else {
            self.show_detail = true;
            self.session.open_detail(handle)
        };
        if let Err(err) = result {
            self.status = format!("⚠ {}", err);
        }
    }

    pub fn sort(&mut self, key: SortKey) {
        let direction = self.session.sort(key);
        self.status = format!("Sorted by {} {}", key.as_str(), direction.symbol());
    }

    pub fn apply_filter(&mut self) {
        let pattern = self.filter_input.clone();
        self.session.set_filter(&pattern);
        self.mode = InputMode::Browse;
    }

    pub fn clear_filter(&mut self) {
        self.filter_input.clear();
        self.session.set_filter("");
    }

    pub fn delete_selected(&mut self) {
        if let Some(id) = self.selected_point().map(|p| p.id) {
            if let Some(removed) = self.session.delete_point(id) {
                self.status = format!("Deleted {}", display_name(&removed));
            }
        }
    }

    pub fn delete_filtered(&mut self) {
        let removed = self.session.remove_all_filtered();
        self.status = format!("Deleted {} points", removed);
    }

    pub fn begin_edit(&mut self) {
        if let Some(point) = self.selected_point() {
            self.form = DetailForm::from_point(point);
            self.form_field = 0;
            self.mode = InputMode::Edit { creating: false };
        }
    }

    /// New point form, pre-filled with the map center
    pub fn begin_create(&mut self) {
        self.form = DetailForm {
            name: String::new(),
            lat: self.config.map.center_lat.to_string(),
            lon: self.config.map.center_lon.to_string(),
        };
        self.form_field = 0;
        self.mode = InputMode::Edit { creating: true };
    }

    pub fn commit_form(&mut self) {
        let InputMode::Edit { creating } = self.mode else {
            return;
        };

        let result = if creating {
            match (
                coords::parse_coordinate(&self.form.lat),
                coords::parse_coordinate(&self.form.lon),
            ) {
                (Ok(lat), Ok(lon)) => self.session.create_point(&self.form.name, lat, lon),
                (Err(err), _) | (_, Err(err)) => Err(err),
            }
        } else {
            match self.selected_point().map(|p| p.id) {
                Some(id) => self.session.edit_point(id, &self.form),
                None => return,
            }
        };

        match result {
            Ok(point) => {
                self.status =
                    format!("Saved {} ({}, {})", display_name(&point), point.lat, point.lon);
                self.mode = InputMode::Browse;
            }
            // Form stays open so the user can fix the field
            Err(err) => self.status = format!("⚠ {}", err),
        }
    }

    pub fn export(&mut self) {
        let path = Path::new(&self.config.export_filename);
        self.status = match csv_codec::write_file(path, self.session.store().points()) {
            Ok(()) => format!(
                "Exported {} points to {}",
                self.session.store().len(),
                path.display()
            ),
            Err(err) => format!("⚠ Export failed: {:#}", err),
        };
    }

    fn form_field_mut(&mut self) -> &mut String {
        match self.form_field {
            0 => &mut self.form.name,
            1 => &mut self.form.lat,
            _ => &mut self.form.lon,
        }
    }

    // ------------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------------

    pub fn next(&mut self) {
        let len = self.rows.len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(i) if i >= len - 1 => 0,
            Some(i) => i + 1,
            None => 0,
        };
        self.state.select(Some(i));
    }

    pub fn previous(&mut self) {
        let len = self.rows.len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        self.state.select(Some(i));
    }

    pub fn page_down(&mut self) {
        let len = self.rows.len();
        if len == 0 {
            return;
        }
        let i = self.state.selected().map_or(0, |i| (i + 20).min(len - 1));
        self.state.select(Some(i));
    }

    pub fn page_up(&mut self) {
        let i = self.state.selected().map_or(0, |i| i.saturating_sub(20));
        self.state.select(Some(i));
    }

    /// Returns false when the user asked to quit
    pub fn handle_key(&mut self, key: KeyEvent) -> bool {
        match self.mode {
            InputMode::Browse => match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return false,
                KeyCode::Enter => self.toggle_detail(),
                KeyCode::Char('1') => self.sort(SortKey::Name),
                KeyCode::Char('2') => self.sort(SortKey::Lat),
                KeyCode::Char('3') => self.sort(SortKey::Lon),
                KeyCode::Char('/') => self.mode = InputMode::Filter,
                KeyCode::Char('c') => self.clear_filter(),
                KeyCode::Char('e') => self.begin_edit(),
                KeyCode::Char('a') => self.begin_create(),
                KeyCode::Char('d') => self.delete_selected(),
                KeyCode::Char('D') => self.delete_filtered(),
                KeyCode::Char('w') => self.export(),
                KeyCode::Down | KeyCode::Char('j') => self.next(),
                KeyCode::Up | KeyCode::Char('k') => self.previous(),
                KeyCode::PageDown => self.page_down(),
                KeyCode::PageUp => self.page_up(),
                KeyCode::Home => self.state.select(Some(0)),
                KeyCode::End => {
                    if !self.rows.is_empty() {
                        self.state.select(Some(self.rows.len() - 1));
                    }
                }
                _ => {}
            },
            InputMode::Filter => match key.code {
                KeyCode::Enter => self.apply_filter(),
                KeyCode::Esc => self.mode = InputMode::Browse,
                KeyCode::Backspace => {
                    self.filter_input.pop();
                }
                KeyCode::Char(c) => self.filter_input.push(c),
                _ => {}
            },
            InputMode::Edit { .. } => match key.code {
                KeyCode::Enter => self.commit_form(),
                KeyCode::Esc => self.mode = InputMode::Browse,
                KeyCode::Tab | KeyCode::Down => self.form_field = (self.form_field + 1) % 3,
                KeyCode::BackTab | KeyCode::Up => self.form_field = (self.form_field + 2) % 3,
                KeyCode::Backspace => {
                    self.form_field_mut().pop();
                }
                KeyCode::Char(c) => self.form_field_mut().push(c),
                _ => {}
            },
        }

        self.refresh();
        true
    }
}

fn display_name(point: &GeoPoint) -> &str {
    if point.name.is_empty() {
        "(unnamed)"
    } else {
        &point.name
    }
}

pub fn run_ui(app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run the app
    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("Error: {:?}", err);
    }

    Ok(())
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
) -> io::Result<()> {
    loop {
        // Finished name lookups land between key presses
        if app.session.poll_enrichments() > 0 {
            app.refresh();
        }

        terminal.draw(|f| ui(f, app))?;

        if !event::poll(Duration::from_millis(250))? {
            continue;
        }
        if let Event::Key(key) = event::read()? {
            if !app.handle_key(key) {
                return Ok(());
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(LayoutDirection::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(0),    // Content area
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    let editing = matches!(app.mode, InputMode::Edit { .. });
    if app.show_detail || editing {
        let content_chunks = Layout::default()
            .direction(LayoutDirection::Horizontal)
            .constraints([
                Constraint::Percentage(60), // Point list
                Constraint::Percentage(40), // Detail panel
            ])
            .split(chunks[1]);

        render_table(f, content_chunks[0], app);
        render_detail_panel(f, content_chunks[1], app);
    } else {
        render_table(f, chunks[1], app);
    }

    render_status_bar(f, chunks[2], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let store = app.session.store();

    let mut spans = vec![
        Span::styled(
            "Geo Points",
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED),
        ),
        Span::raw("  |  "),
        Span::styled(
            format!("Total: {}", store.len()),
            Style::default().fg(Color::White),
        ),
        Span::raw("  |  "),
        Span::styled(
            format!("Shown: {}", app.rows.len()),
            Style::default().fg(Color::Green),
        ),
    ];

    let pending = app.session.pending_lookups();
    if pending > 0 {
        spans.push(Span::raw("  |  "));
        spans.push(Span::styled(
            format!("⟳ {} lookups", pending),
            Style::default().fg(Color::Magenta),
        ));
    }

    let header = Paragraph::new(vec![Line::from(spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)),
    );

    f.render_widget(header, area);
}

fn column_title(app: &App, label: &str, key: SortKey) -> String {
    match app.session.store().sort_directions().last(key) {
        Some(direction) => format!("{} {}", label, direction.symbol()),
        None => label.to_string(),
    }
}

fn render_table(f: &mut Frame, area: Rect, app: &mut App) {
    let titles = [
        column_title(app, "Name", SortKey::Name),
        column_title(app, "Lat", SortKey::Lat),
        column_title(app, "Lon", SortKey::Lon),
        "Marker".to_string(),
    ];
    let header_cells = titles.into_iter().map(|h| {
        Cell::from(h).style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
    });

    let header = Row::new(header_cells)
        .style(Style::default().bg(Color::DarkGray))
        .height(1);

    let markers = app.session.markers();
    let rows = app.rows.iter().map(|point| {
        let (state, color) = match markers.state(point.id) {
            BindingState::Selected => ("open", Color::Green),
            BindingState::Bound => ("on map", Color::White),
            BindingState::Unbound => ("-", Color::Red),
        };

        let cells = vec![
            Cell::from(truncate(display_name(point), 36)),
            Cell::from(format!("{:.6}", point.lat)),
            Cell::from(format!("{:.6}", point.lon)),
            Cell::from(state).style(Style::default().fg(color)),
        ];

        Row::new(cells).height(1)
    });

    let title = if app.session.store().filter_pattern().is_empty() {
        " Points ".to_string()
    } else {
        format!(" Points matching \"{}\" ", app.session.store().filter_pattern())
    };

    let table = Table::new(
        rows,
        [
            Constraint::Min(20),
            Constraint::Length(14),
            Constraint::Length(14),
            Constraint::Length(8),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(title),
    )
    .highlight_style(
        Style::default()
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.state);
}

fn render_detail_panel(f: &mut Frame, area: Rect, app: &App) {
    let label = Style::default().fg(Color::Cyan);
    let mut lines = vec![Line::from("")];

    match app.mode {
        InputMode::Edit { creating } => {
            lines.push(Line::from(Span::styled(
                if creating { "  New point" } else { "  Edit point" },
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
            )));
            lines.push(Line::from(""));
            let values = [&app.form.name, &app.form.lat, &app.form.lon];
            for (i, (field, value)) in FORM_FIELDS.iter().zip(values).enumerate() {
                let style = if i == app.form_field {
                    Style::default().fg(Color::Black).bg(Color::Yellow)
                } else {
                    Style::default().fg(Color::White)
                };
                lines.push(Line::from(vec![
                    Span::styled(format!("  {:<9}", field), label),
                    Span::styled(format!(" {} ", value), style),
                ]));
            }
            lines.push(Line::from(""));
            lines.push(Line::from("  Enter save · Tab next field · Esc cancel"));
        }
        _ => match app.selected_point() {
            Some(point) => {
                let marker = app.session.markers().marker_for(point.id);
                let detail = marker.and_then(|m| app.session.surface().detail(m));

                lines.push(Line::from(vec![
                    Span::styled("  Name   ", label),
                    Span::raw(display_name(point).to_string()),
                ]));
                lines.push(Line::from(vec![
                    Span::styled("  Lat    ", label),
                    Span::raw(format!("{:.6}°", point.lat)),
                ]));
                lines.push(Line::from(vec![
                    Span::styled("  Lon    ", label),
                    Span::raw(format!("{:.6}°", point.lon)),
                ]));
                lines.push(Line::from(vec![
                    Span::styled("  Marker ", label),
                    Span::raw(marker.map_or("-".to_string(), |m| m.to_string())),
                ]));
                lines.push(Line::from(vec![
                    Span::styled("  Added  ", label),
                    Span::raw(point.created_at.format("%Y-%m-%d %H:%M:%S").to_string()),
                ]));
                if detail.is_some() {
                    lines.push(Line::from(""));
                    lines.push(Line::from(Span::styled(
                        format!("  ◯ highlight {} m", app.config.highlight_radius_m),
                        Style::default().fg(Color::Green),
                    )));
                }
            }
            None => lines.push(Line::from("  No point selected")),
        },
    }

    let panel = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan))
            .title(" Detail "),
    );
    f.render_widget(panel, area);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let key = Style::default().fg(Color::Yellow);

    let spans = match app.mode {
        InputMode::Filter => vec![
            Span::styled(" Filter: ", Style::default().fg(Color::Green)),
            Span::raw(format!("{}▏", app.filter_input)),
            Span::raw("  ("),
            Span::styled("Enter", key),
            Span::raw(" apply, "),
            Span::styled("Esc", key),
            Span::raw(" cancel)"),
        ],
        _ => {
            let selected = app.state.selected().map(|i| i + 1).unwrap_or(0);
            let mut spans = vec![Span::styled(
                format!(" Row: {}/{} ", selected, app.rows.len()),
                Style::default().fg(Color::Cyan),
            )];
            if !app.status.is_empty() {
                spans.push(Span::raw(" | "));
                spans.push(Span::styled(app.status.clone(), Style::default().fg(Color::Green)));
            }
            spans.push(Span::raw(" | "));
            spans.push(Span::styled("1/2/3", key));
            spans.push(Span::raw(" Sort | "));
            spans.push(Span::styled("/", key));
            spans.push(Span::raw(" Filter | "));
            spans.push(Span::styled("a/e", key));
            spans.push(Span::raw(" Add/Edit | "));
            spans.push(Span::styled("d/D", key));
            spans.push(Span::raw(" Delete | "));
            spans.push(Span::styled("w", key));
            spans.push(Span::raw(" Export | "));
            spans.push(Span::styled("q", Style::default().fg(Color::Red)));
            spans.push(Span::raw(" Quit"));
            spans
        }
    };

    let status_bar = Paragraph::new(vec![Line::from(spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}
