mod backend;
mod ui;

use backend::bookmarks::Bookmarks;
use backend::config::Config;
use backend::error::{ErrorKind, Result as BackendResult};
use backend::jumpmarks::CycleDirection;
use backend::session::{Session, Spread};
use ui::ui::{App, ui};

use crossterm::{
    event::{Event, EventStream, KeyCode},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use futures::StreamExt;
use ratatui::{Terminal, backend::CrosstermBackend};
use std::{error::Error, fs, io, path::PathBuf, time::Instant};

fn init_logging() {
    let log_dir = dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("comic-tui");
    fs::create_dir_all(&log_dir).ok();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    // The terminal belongs to the UI, so logs go to a file.
    if let Ok(file) = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("comic-tui.log"))
    {
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn Error>> {
    init_logging();

    let target = std::env::args().nth(1);
    let mut session = Session::new(Config::load()).with_bookmarks(Bookmarks::load());

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new();

    if let Some(target) = target {
        open_target(&mut terminal, &mut app, &mut session, &target).await?;
    }

    let res = run_app(&mut terminal, &mut app, &mut session).await;

    session.close();

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        eprintln!("{err}");
    }
    Ok(())
}

async fn open_target(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    session: &mut Session,
    target: &str,
) -> io::Result<()> {
    app.set_loading(&format!("Opening {}...", target));
    terminal.draw(|f| ui(f, app))?;

    match session.open(target).await {
        Ok(spread) => app.show(session, spread),
        Err(e) => {
            app.pages.clear();
            app.update_status(session);
            app.show_error(format!("Couldn't open {}: {}", target, e));
        }
    }
    Ok(())
}

fn apply(app: &mut App, session: &Session, result: BackendResult<Option<Spread>>) {
    match result {
        Ok(Some(spread)) => app.show(session, spread),
        Ok(None) => {}
        Err(e) if e.kind() == ErrorKind::Timeout => {
            app.show_error(format!("{} (still downloading, try again)", e))
        }
        Err(e) => app.show_error(e.to_string()),
    }
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    session: &mut Session,
) -> io::Result<()> {
    let mut event_stream = EventStream::new();
    let mut trim_timer = tokio::time::interval(session.config.trim_interval());
    // The first tick fires immediately.
    trim_timer.tick().await;

    loop {
        terminal.draw(|f| ui(f, app))?;

        tokio::select! {
            _ = trim_timer.tick() => {
                session.trim_cache(Instant::now());
                app.update_status(session);
            }

            Some(Ok(event)) = event_stream.next() => {
                let Event::Key(key) = event else {
                    continue;
                };

                if app.input.is_some() {
                    if let Some(target) = handle_input_key(app, key.code) {
                        open_target(terminal, app, session, &target).await?;
                    }
                    continue;
                }

                if app.bookmark_cursor.is_some() {
                    if let Some(index) = handle_bookmark_key(app, session, key.code) {
                        app.set_loading("Opening bookmark...");
                        terminal.draw(|f| ui(f, app))?;
                        let result = session.open_bookmark(index).await.map(Some);
                        if !session.is_open() {
                            app.pages.clear();
                            app.update_status(session);
                        }
                        apply(app, session, result);
                    }
                    continue;
                }

                if key.code == KeyCode::Char('q') {
                    return Ok(());
                }
                handle_reader_input(app, session, key.code).await;
            }
        }
    }
}

/// Edits the open prompt. Returns the target once Enter is pressed.
fn handle_input_key(app: &mut App, key: KeyCode) -> Option<String> {
    let input = app.input.as_mut()?;
    match key {
        KeyCode::Char(c) => input.push(c),
        KeyCode::Backspace => {
            input.pop();
        }
        KeyCode::Esc => app.input = None,
        KeyCode::Enter => {
            let target = app.input.take().unwrap_or_default();
            if !target.trim().is_empty() {
                return Some(target);
            }
        }
        _ => {}
    }
    None
}

/// Moves through the bookmark list. Returns the bookmark to open once Enter
/// is pressed.
fn handle_bookmark_key(app: &mut App, session: &mut Session, key: KeyCode) -> Option<usize> {
    let cursor = app.bookmark_cursor?;
    let len = session.bookmarks().len();
    match key {
        KeyCode::Up | KeyCode::Char('k') => {
            app.bookmark_cursor = Some(cursor.saturating_sub(1));
        }
        KeyCode::Down | KeyCode::Char('j') => {
            app.bookmark_cursor = Some((cursor + 1).min(len.saturating_sub(1)));
        }
        KeyCode::Char('d') => {
            session.remove_bookmark(cursor);
            app.bookmark_cursor = Some(cursor.min(len.saturating_sub(2)));
            app.list_bookmarks(session.bookmarks());
        }
        KeyCode::Enter if cursor < len => {
            app.bookmark_cursor = None;
            return Some(cursor);
        }
        KeyCode::Esc | KeyCode::Char('B') => app.bookmark_cursor = None,
        _ => {}
    }
    None
}

async fn handle_reader_input(app: &mut App, session: &mut Session, key: KeyCode) {
    match key {
        KeyCode::Char('o') => {
            app.input = Some(String::new());
        }
        KeyCode::Char('B') => {
            app.list_bookmarks(session.bookmarks());
            app.bookmark_cursor = Some(0);
        }
        _ if !session.is_open() => {}
        KeyCode::Char('b') => match session.add_bookmark() {
            Ok(bookmark) => app.message = format!("Bookmarked {}", bookmark.label()),
            Err(e) => app.show_error(e.to_string()),
        },
        KeyCode::Right | KeyCode::Char(' ') | KeyCode::PageDown => {
            let result = session.next_page().await;
            apply(app, session, result);
        }
        KeyCode::Left | KeyCode::Backspace | KeyCode::PageUp => {
            let result = session.prev_page().await;
            apply(app, session, result);
        }
        KeyCode::Home => {
            let result = session.set_page(0).await.map(Some);
            apply(app, session, result);
        }
        KeyCode::End => {
            let result = session.last_page().await;
            apply(app, session, result);
        }
        KeyCode::Char('m') => {
            session.toggle_jumpmark();
            app.update_status(session);
        }
        KeyCode::Char(']') => {
            let result = session.cycle_jumpmarks(CycleDirection::Forward).await;
            apply(app, session, result);
        }
        KeyCode::Char('[') => {
            let result = session.cycle_jumpmarks(CycleDirection::Backward).await;
            apply(app, session, result);
        }
        KeyCode::Char('r') => {
            let result = session.return_from_cycling().await;
            apply(app, session, result);
        }
        _ => {}
    }
}
