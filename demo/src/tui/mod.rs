//! Terminal front end of the demo.

mod app;
mod input;
mod view;

use std::{
    io::{self, Stdout},
    time::Duration,
};

pub use app::App;
use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};

/// Wall-clock time between redraws.
const FRAME: Duration = Duration::from_millis(100);

/// Raw-mode alternate screen, restored when dropped so that a failed draw
/// does not leave the shell unusable.
struct Screen {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl Screen {
    fn enter() -> io::Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        Ok(Self { terminal: Terminal::new(CrosstermBackend::new(stdout))? })
    }
}

impl Drop for Screen {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}

/// Steps the simulation and redraws it until the user quits.
pub fn run(mut app: App) -> io::Result<()> {
    let mut screen = Screen::enter()?;

    while !app.should_quit() {
        app.advance();
        screen.terminal.draw(|frame| view::render(frame, &app))?;

        if !event::poll(FRAME)? {
            continue;
        }
        match event::read()? {
            Event::Key(key) if key.kind == KeyEventKind::Press => {
                input::handle_event(&mut app, Event::Key(key));
            }
            _ => {}
        }
    }
    Ok(())
}
