//! Input handling for the TUI.

use crossterm::event::{Event, KeyCode, KeyEvent, KeyModifiers};

use super::app::App;

/// Applies a key press to the app. Returns `true` if the key is bound.
pub fn handle_event(app: &mut App, event: Event) -> bool {
    match event {
        Event::Key(key) => handle_key(app, key),
        _ => false,
    }
}

fn handle_key(app: &mut App, key: KeyEvent) -> bool {
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.quit();
            true
        }
        KeyCode::Char('q') | KeyCode::Esc => {
            app.quit();
            true
        }
        KeyCode::Char(' ') => {
            app.toggle_pause();
            true
        }
        KeyCode::Char('+') => {
            app.faster();
            true
        }
        KeyCode::Char('-') => {
            app.slower();
            true
        }
        KeyCode::Char(digit @ '1'..='6') => {
            app.toggle_power(usize::from(digit as u8 - b'0'));
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use meshturn::{NodeId, Simulation, Timings};
    use rstest::rstest;

    use super::*;

    fn app() -> App {
        let mut sim = Simulation::new((1..=2).map(NodeId::new), Timings::default(), 7);
        sim.power_on(NodeId::new(1)).unwrap();
        App::new(sim, 4)
    }

    fn press(app: &mut App, code: KeyCode, modifiers: KeyModifiers) -> bool {
        handle_event(app, Event::Key(KeyEvent::new(code, modifiers)))
    }

    #[rstest]
    #[case::q(KeyCode::Char('q'), KeyModifiers::NONE)]
    #[case::esc(KeyCode::Esc, KeyModifiers::NONE)]
    #[case::ctrl_c(KeyCode::Char('c'), KeyModifiers::CONTROL)]
    fn test_quit_keys(#[case] code: KeyCode, #[case] modifiers: KeyModifiers) {
        let mut app = app();
        assert!(press(&mut app, code, modifiers));
        assert!(app.should_quit());
    }

    #[test]
    fn test_digit_toggles_power() {
        let mut app = app();
        assert!(press(&mut app, KeyCode::Char('2'), KeyModifiers::NONE));
        assert!(app.sim().is_powered(NodeId::new(2)));
    }

    #[test]
    fn test_speed_keys() {
        let mut app = app();
        press(&mut app, KeyCode::Char('+'), KeyModifiers::NONE);
        assert_eq!(app.speed(), 8);
        press(&mut app, KeyCode::Char('-'), KeyModifiers::NONE);
        press(&mut app, KeyCode::Char('-'), KeyModifiers::NONE);
        assert_eq!(app.speed(), 2);
    }

    #[test]
    fn test_unbound_key() {
        let mut app = app();
        assert!(!press(&mut app, KeyCode::Char('x'), KeyModifiers::NONE));
        assert!(!app.should_quit());
    }
}
