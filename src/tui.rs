use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
};
use std::collections::HashMap;
use std::io::stdout;
use std::time::Duration;

use crate::error::Error;
use crate::jsearch::{JobSource, DEFAULT_COUNTRY};
use crate::models::{EmploymentType, ExperienceLevel, JobDetail, JobSummary};
use crate::pager::{PagerState, SearchPager, SearchQuery};
use crate::saved::SavedJobs;

pub struct Browser<'a> {
    pub pager: &'a SearchPager,
    pub source: &'a dyn JobSource,
    /// `None` when signed out; saving is disabled then.
    pub saved: Option<&'a SavedJobs>,
}

struct AppState {
    view: PagerState,
    flags: HashMap<String, bool>,
    selected: usize,
    scroll_offset: u16,
    detail: Option<JobDetail>,
    message: Option<String>,
}

impl AppState {
    fn new() -> Self {
        Self {
            view: PagerState::default(),
            flags: HashMap::new(),
            selected: 0,
            scroll_offset: 0,
            detail: None,
            message: None,
        }
    }

    fn current_job(&self) -> Option<&JobSummary> {
        self.view.items.get(self.selected)
    }

    fn next(&mut self) {
        if !self.view.items.is_empty() && self.selected < self.view.items.len() - 1 {
            self.selected += 1;
            self.scroll_offset = 0;
        }
    }

    fn prev(&mut self) {
        if self.selected > 0 {
            self.selected -= 1;
            self.scroll_offset = 0;
        }
    }

    fn at_last_row(&self) -> bool {
        !self.view.items.is_empty() && self.selected + 1 >= self.view.items.len()
    }

    fn scroll_down(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_add(3);
    }

    fn scroll_up(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_sub(3);
    }
}

fn cycle<T: Copy + PartialEq>(current: Option<T>, all: &[T]) -> Option<T> {
    match current {
        None => all.first().copied(),
        Some(value) => {
            let idx = all.iter().position(|v| *v == value).unwrap_or(0);
            all.get(idx + 1).copied()
        }
    }
}

impl Browser<'_> {
    pub async fn run(&self, query: SearchQuery) -> Result<()> {
        let mut state = AppState::new();
        if let Err(e) = self.pager.search(query).await {
            state.message = Some(format!("Search failed: {} (r to retry)", e));
        }
        self.sync(&mut state).await;

        // Setup terminal
        enable_raw_mode()?;
        stdout().execute(EnterAlternateScreen)?;
        let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

        let result = self.run_loop(&mut terminal, &mut state).await;

        // Restore terminal
        disable_raw_mode()?;
        stdout().execute(LeaveAlternateScreen)?;

        result
    }

    async fn sync(&self, state: &mut AppState) {
        state.view = self.pager.state().await;
        if state.selected >= state.view.items.len() {
            state.selected = state.view.items.len().saturating_sub(1);
        }
        if let Some(saved) = self.saved {
            state.flags = saved.state().await.flags;
        }
    }

    /// Check the selected row's saved state the first time it comes into view.
    async fn check_selected(&self, state: &mut AppState) {
        let (Some(saved), Some(job)) = (self.saved, state.current_job()) else {
            return;
        };
        if state.flags.contains_key(&job.id) {
            return;
        }
        let job_id = job.id.clone();
        if let Err(e) = saved.is_saved(&job_id).await {
            state.message = Some(format!("Could not check saved state: {}", e));
        }
    }

    async fn run_loop(
        &self,
        terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
        state: &mut AppState,
    ) -> Result<()> {
        let mut list_state = ListState::default();
        list_state.select(Some(0));
        self.check_selected(state).await;
        self.sync(state).await;

        loop {
            terminal.draw(|frame| draw(frame, state, &mut list_state))?;

            if !event::poll(Duration::from_millis(250))? {
                continue;
            }
            let Event::Key(key) = event::read()? else { continue };
            if key.kind != KeyEventKind::Press {
                continue;
            }

            let prev_selected = state.selected;
            let mut query = state.view.query.clone().unwrap_or_default();
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => break,
                KeyCode::Down | KeyCode::Char('j') => state.next(),
                KeyCode::Up | KeyCode::Char('k') => state.prev(),
                KeyCode::Char('J') | KeyCode::PageDown => state.scroll_down(),
                KeyCode::Char('K') | KeyCode::PageUp => state.scroll_up(),
                KeyCode::Enter => {
                    if let Some(job) = state.current_job() {
                        let job_id = job.id.clone();
                        match self.source.job_details(&job_id, DEFAULT_COUNTRY).await {
                            Ok(detail) => state.detail = Some(detail),
                            Err(e) => state.message = Some(format!("Failed to load job details: {}", e)),
                        }
                    }
                }
                KeyCode::Char('s') => self.toggle_saved(state).await,
                KeyCode::Char('r') => {
                    state.selected = 0;
                    state.message = self.pager.refresh().await.err().map(|e| format!("Refresh failed: {}", e));
                }
                KeyCode::Char('f') => {
                    query.employment_type = cycle(query.employment_type, &EmploymentType::ALL);
                    state.selected = 0;
                    state.message = self.pager.search(query).await.err().map(|e| format!("Search failed: {}", e));
                }
                KeyCode::Char('e') => {
                    query.experience = cycle(query.experience, &ExperienceLevel::ALL);
                    state.selected = 0;
                    state.message = self.pager.search(query).await.err().map(|e| format!("Search failed: {}", e));
                }
                _ => {}
            }

            if state.at_last_row() && state.view.has_more {
                if let Err(e) = self.pager.load_more().await {
                    state.message = Some(format!("Loading more failed: {}", e));
                }
            }
            if state.selected != prev_selected {
                state.detail = None;
            }
            self.sync(state).await;
            list_state.select(Some(state.selected));
            self.check_selected(state).await;
            self.sync(state).await;
        }
        Ok(())
    }

    async fn toggle_saved(&self, state: &mut AppState) {
        let Some(saved) = self.saved else {
            state.message = Some("Sign in with 'jobify login' to save jobs".to_string());
            return;
        };
        let Some(job) = state.current_job().cloned() else { return };

        let is_saved = state.flags.get(&job.id).copied().unwrap_or(false);
        let result = if is_saved {
            saved.unsave(&job.id).await.map(|_| "Removed from saved jobs")
        } else {
            saved.save(&job).await.map(|_| "Saved")
        };
        state.message = Some(match result {
            Ok(done) => done.to_string(),
            Err(Error::Unauthenticated) => {
                saved.clear().await;
                "Session expired. Run 'jobify login' to save jobs again".to_string()
            }
            Err(e) => format!("Could not update saved jobs: {}", e),
        });
    }
}

fn draw(frame: &mut Frame, state: &AppState, list_state: &mut ListState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(1), Constraint::Length(1)])
        .split(frame.area());

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(40),
            Constraint::Percentage(60),
        ])
        .split(rows[0]);

    // Left panel: results
    let mut items: Vec<ListItem> = state
        .view
        .items
        .iter()
        .map(|job| {
            let marker = match state.flags.get(&job.id) {
                Some(true) => "*",
                Some(false) => " ",
                None => "?",
            };
            ListItem::new(format!("{} {} | {}", marker, truncate(&job.title, 32), job.employer_name))
        })
        .collect();
    if state.view.is_loading_more {
        items.push(ListItem::new("  loading more..."));
    }

    let query = state.view.query.as_ref();
    let title = format!(
        " {} ({}{}) ",
        query.map(|q| q.normalized_text()).unwrap_or("jobs"),
        state.view.items.len(),
        if state.view.has_more { "+" } else { "" }
    );
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, chunks[0], list_state);

    // Right panel: job detail
    let detail = build_detail(state);
    let detail_widget = Paragraph::new(detail)
        .block(Block::default().borders(Borders::ALL).title(" Detail "))
        .wrap(Wrap { trim: false })
        .scroll((state.scroll_offset, 0));

    frame.render_widget(detail_widget, chunks[1]);

    let filters = format!(
        " type: {}  experience: {}  {}",
        query.and_then(|q| q.employment_type).map(|t| t.as_str()).unwrap_or("any"),
        query.and_then(|q| q.experience).map(|e| e.as_str()).unwrap_or("any"),
        state.message.as_deref().or(state.view.error.as_deref()).unwrap_or(""),
    );
    frame.render_widget(Paragraph::new(filters).style(Style::default().fg(Color::Yellow)), rows[1]);

    let help = Paragraph::new(
        " j/k:navigate  J/K:scroll  enter:details  s:save/unsave  f:type e:experience  r:refresh  q:quit"
    )
    .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(help, rows[2]);
}

fn build_detail(state: &AppState) -> Text<'_> {
    if state.view.is_loading {
        return Text::raw("Searching...");
    }
    let Some(job) = state.current_job() else {
        return Text::raw("No jobs found");
    };

    let mut lines: Vec<Line> = Vec::new();

    lines.push(Line::from(Span::styled(
        &job.title,
        Style::default().add_modifier(Modifier::BOLD),
    )));
    lines.push(Line::from(format!("at {}", job.employer_name)));
    lines.push(Line::from(format!("Type: {}", job.employment_type)));
    lines.push(Line::from(format!("Posted: {}", job.posted_at.format("%B %-d, %Y"))));

    let location = match &state.detail {
        Some(detail) if detail.summary.id == job.id => detail.location(),
        _ => job.location(),
    };
    if let Some(location) = location {
        lines.push(Line::from(format!("Location: {}", location)));
    }

    match state.flags.get(&job.id) {
        Some(true) => lines.push(Line::from(Span::styled("Saved", Style::default().fg(Color::Green)))),
        Some(false) => {}
        None => lines.push(Line::from(Span::styled("Saved: ?", Style::default().fg(Color::DarkGray)))),
    }
    lines.push(Line::from(""));

    let Some(detail) = state.detail.as_ref().filter(|d| d.summary.id == job.id) else {
        lines.push(Line::from(Span::styled(
            "(enter to load the full description)",
            Style::default().fg(Color::DarkGray),
        )));
        return Text::from(lines);
    };

    if let Some(link) = &detail.apply_link {
        lines.push(Line::from(format!("Apply: {}", link)));
        lines.push(Line::from(""));
    }

    if detail.highlights.is_empty() {
        lines.push(Line::from(Span::styled("(no highlights listed)", Style::default().fg(Color::DarkGray))));
        lines.push(Line::from(""));
    }

    let sections = [
        ("QUALIFICATIONS", &detail.highlights.qualifications),
        ("RESPONSIBILITIES", &detail.highlights.responsibilities),
        ("BENEFITS", &detail.highlights.benefits),
    ];
    for (label, entries) in sections {
        if entries.is_empty() {
            continue;
        }
        lines.push(Line::from(Span::styled(label, Style::default().fg(Color::Cyan))));
        for entry in entries {
            lines.push(Line::from(format!("  - {}", entry)));
        }
        lines.push(Line::from(""));
    }

    lines.push(Line::from(Span::styled(
        "Description",
        Style::default().add_modifier(Modifier::BOLD),
    )));
    for line in detail.description.lines() {
        lines.push(Line::from(line.to_string()));
    }

    Text::from(lines)
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
