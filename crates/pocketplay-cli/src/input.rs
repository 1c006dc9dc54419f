//! Terminal key translation.
//!
//! Turns crossterm key presses into the core's [`InputEvent`]s. Releases
//! and repeats are dropped so one press maps to one action.

use crossterm::event::{ KeyCode, KeyEvent, KeyEventKind, KeyModifiers };

use pocketplay_core::input::{ InputEvent, Key };


/// Converts a terminal key event, if the player cares about it.
pub fn to_input_event( key: KeyEvent ) -> Option<InputEvent> {
    if key.kind != KeyEventKind::Press {
        return None;
    }

    let key = match key.code {
        // Ctrl+C still quits while the terminal is in raw mode
        KeyCode::Char( 'c' ) if key.modifiers.contains( KeyModifiers::CONTROL ) => Key::Escape,
        KeyCode::Char( ' ' ) => Key::Space,
        KeyCode::Char( c ) => Key::Char( c ),
        KeyCode::Enter => Key::Enter,
        KeyCode::Esc => Key::Escape,
        KeyCode::Left => Key::Left,
        KeyCode::Right => Key::Right,
        KeyCode::Up => Key::Up,
        KeyCode::Down => Key::Down,
        _ => return None,
    };

    Some( InputEvent::Key( key ) )
}


#[cfg( test )]
mod tests {
    use super::*;
    use crossterm::event::KeyEventState;


    fn press( code: KeyCode ) -> KeyEvent {
        KeyEvent::new( code, KeyModifiers::NONE )
    }


    #[test]
    fn test_basic_keys() {
        assert_eq!( to_input_event( press( KeyCode::Char( ' ' ) ) ), Some( InputEvent::Key( Key::Space ) ) );
        assert_eq!( to_input_event( press( KeyCode::Enter ) ), Some( InputEvent::Key( Key::Enter ) ) );
        assert_eq!( to_input_event( press( KeyCode::Char( 'q' ) ) ), Some( InputEvent::Key( Key::Char( 'q' ) ) ) );
        assert_eq!( to_input_event( press( KeyCode::Tab ) ), None );
    }


    #[test]
    fn test_ctrl_c_quits() {
        let event = KeyEvent::new( KeyCode::Char( 'c' ), KeyModifiers::CONTROL );
        assert_eq!( to_input_event( event ), Some( InputEvent::Key( Key::Escape ) ) );
    }


    #[test]
    fn test_release_is_ignored() {
        let event = KeyEvent {
            code: KeyCode::Left,
            modifiers: KeyModifiers::NONE,
            kind: KeyEventKind::Release,
            state: KeyEventState::NONE,
        };
        assert_eq!( to_input_event( event ), None );
    }
}
