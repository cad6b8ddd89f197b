use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph},
};
use ratatui_image::{Resize, StatefulImage, picker::Picker, protocol::StatefulProtocol};

use crate::backend::bookmarks::Bookmarks;
use crate::backend::session::{Session, Spread};

#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub enum AppState {
    #[default]
    Idle,
    Loading,
    Reading,
}

pub struct App {
    pub state: AppState,
    pub message: String,
    pub title: String,
    pub status: String,
    /// Path or URL being typed after pressing `o`.
    pub input: Option<String>,
    pub picker: Option<Picker>,
    pub pages: Vec<StatefulProtocol>,
    /// Selected row while the bookmark list is shown.
    pub bookmark_cursor: Option<usize>,
    pub bookmark_labels: Vec<String>,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    pub fn new() -> Self {
        let picker = Picker::from_query_stdio().ok();

        Self {
            state: AppState::Idle,
            message: "Press o to open a directory, archive or URL".to_string(),
            title: "Comic Reader".to_string(),
            status: String::new(),
            input: None,
            picker,
            pages: Vec::new(),
            bookmark_cursor: None,
            bookmark_labels: Vec::new(),
        }
    }

    pub fn list_bookmarks(&mut self, bookmarks: &Bookmarks) {
        self.bookmark_labels = bookmarks.list().iter().map(|b| b.label()).collect();
    }

    pub fn set_loading(&mut self, message: &str) {
        self.state = AppState::Loading;
        self.message = message.to_string();
    }

    pub fn show_error(&mut self, message: String) {
        log::error!("{}", message);
        self.message = message;
        if self.pages.is_empty() {
            self.state = AppState::Idle;
        } else {
            self.state = AppState::Reading;
        }
    }

    pub fn show(&mut self, session: &Session, spread: Spread) {
        self.pages.clear();
        if let Some(ref picker) = self.picker {
            self.pages.push(picker.new_resize_protocol((*spread.left).clone()));
            if let Some(right) = spread.right {
                self.pages.push(picker.new_resize_protocol((*right).clone()));
            }
        }
        self.state = AppState::Reading;
        self.message.clear();
        self.update_status(session);
    }

    pub fn update_status(&mut self, session: &Session) {
        let Some(archive) = session.archive() else {
            self.title = "Comic Reader".to_string();
            self.status.clear();
            return;
        };

        let position = session.position();
        let total = archive
            .len()
            .map_or_else(|| "?".to_string(), |len| len.to_string());
        let name = archive.name(position).unwrap_or_default();
        let marked = if session.jumpmarks().has(position) {
            " [marked]"
        } else {
            ""
        };

        self.title = archive.archive_name().to_string();
        self.status = format!(
            "Page {}/{}{} | {} | {} cached",
            position + 1,
            total,
            marked,
            name,
            session.cache().len()
        );
    }
}

pub fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(3)])
        .split(f.area());

    let block = Block::default()
        .borders(Borders::ALL)
        .title(app.title.clone())
        .border_style(Style::default().fg(Color::Cyan));
    let inner = block.inner(chunks[0]);
    f.render_widget(block, chunks[0]);

    match app.state {
        _ if app.bookmark_cursor.is_some() => draw_bookmarks(f, inner, app),
        AppState::Reading if !app.pages.is_empty() => draw_pages(f, inner, app),
        _ => draw_message(f, inner, app),
    }

    draw_footer(f, chunks[1], app);
}

fn draw_pages(f: &mut Frame, area: Rect, app: &mut App) {
    let count = app.pages.len() as u32;
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints((0..count).map(|_| Constraint::Ratio(1, count)))
        .split(area);

    for (state, column) in app.pages.iter_mut().zip(columns.iter()) {
        let image = StatefulImage::new().resize(Resize::Fit(None));
        f.render_stateful_widget(image, *column, state);
    }
}

fn draw_bookmarks(f: &mut Frame, area: Rect, app: &App) {
    if app.bookmark_labels.is_empty() {
        let paragraph = Paragraph::new("No bookmarks yet, press b while reading")
            .style(Style::default().fg(Color::Gray))
            .alignment(Alignment::Center);
        f.render_widget(paragraph, area);
        return;
    }

    let items: Vec<ListItem> = app
        .bookmark_labels
        .iter()
        .map(|label| ListItem::new(label.as_str()))
        .collect();
    let list = List::new(items)
        .block(Block::default().title("Bookmarks"))
        .highlight_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
        .highlight_symbol("> ");

    let mut state = ListState::default().with_selected(app.bookmark_cursor);
    f.render_stateful_widget(list, area, &mut state);
}

fn draw_message(f: &mut Frame, area: Rect, app: &App) {
    let center = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(45),
            Constraint::Length(1),
            Constraint::Percentage(45),
        ])
        .split(area);

    let style = match app.state {
        AppState::Loading => Style::default().fg(Color::Yellow),
        _ => Style::default().fg(Color::Gray),
    };
    let text = if app.message.is_empty() && app.picker.is_none() {
        "This terminal can't display images"
    } else {
        app.message.as_str()
    };
    let paragraph = Paragraph::new(Line::from(Span::styled(text, style))).alignment(Alignment::Center);
    f.render_widget(paragraph, center[1]);
}

fn draw_footer(f: &mut Frame, area: Rect, app: &App) {
    let line = if let Some(ref input) = app.input {
        Line::from(vec![
            Span::styled("Open: ", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw(input.clone()),
            Span::styled("_", Style::default().fg(Color::Cyan)),
        ])
    } else if app.state == AppState::Reading {
        let mut spans = vec![Span::raw(app.status.clone())];
        if !app.message.is_empty() {
            spans.push(Span::styled(
                format!(" | {}", app.message),
                Style::default().fg(Color::Red),
            ));
        }
        Line::from(spans)
    } else {
        Line::from(Span::styled(
            "o: open  ←/→: page  Home/End  m: mark  [/]: cycle marks  r: return  b/B: bookmarks  q: quit",
            Style::default().fg(Color::DarkGray),
        ))
    };

    let footer = Paragraph::new(line).block(Block::default().borders(Borders::ALL));
    f.render_widget(footer, area);
}
