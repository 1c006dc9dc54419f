//! Input to action mapping
//!
//! Keyboard keys, gamepad buttons and hat motion are first reduced to a
//! [`Trigger`], then looked up in a routing table keyed by the current
//! [`InputMode`]. Button numbers differ between handheld models and come
//! from a [`ButtonProfile`].

use crate::engine::PlaybackEngine;


/// Volume change applied by one up/down press in the player screen.
pub const VOLUME_STEP: f32 = 0.1;


/// Which screen the input is routed to.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub enum InputMode {
    #[default]
    Player,
    Browser,
}


/// Keys the player reacts to. Everything else arrives as `Char`.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum Key {
    Space,
    Enter,
    Escape,
    Left,
    Right,
    Up,
    Down,
    Char( char ),
}


#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum HatDirection {
    Centered,
    Up,
    Down,
    Left,
    Right,
}


/// A raw input event from the terminal or a gamepad.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum InputEvent {
    Key( Key ),
    Button( u8 ),
    Hat( HatDirection ),
}


/// Semantic action produced by the mapper.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum Action {
    TogglePlayPause,
    NextTrack,
    PreviousTrack,
    VolumeUp,
    VolumeDown,
    CycleRepeat,
    SelectItem,
    NavUp,
    NavDown,
    NavLeft,
    NavRight,
    PlayCurrentDirectory,
    TogglePlaylist,
    Quit,
}


/// Device-independent meaning of a key or button.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum Trigger {
    Confirm,
    Right,
    Left,
    Up,
    Down,
    Quit,
    ToggleView,
    SecondaryY,
    SecondaryX,
    Start,
    DpadButtonUp,
    DpadButtonDown,
}


impl Trigger {
    pub const ALL: [Trigger; 12] = [
        Trigger::Confirm,
        Trigger::Right,
        Trigger::Left,
        Trigger::Up,
        Trigger::Down,
        Trigger::Quit,
        Trigger::ToggleView,
        Trigger::SecondaryY,
        Trigger::SecondaryX,
        Trigger::Start,
        Trigger::DpadButtonUp,
        Trigger::DpadButtonDown,
    ];
}


/// `(trigger, player screen, browser screen)`
const ROUTES: &[( Trigger, Option<Action>, Option<Action> )] = &[
    ( Trigger::Confirm, Some( Action::TogglePlayPause ), Some( Action::SelectItem ) ),
    ( Trigger::Right, Some( Action::NextTrack ), Some( Action::NavRight ) ),
    ( Trigger::Left, Some( Action::PreviousTrack ), Some( Action::NavLeft ) ),
    ( Trigger::Up, Some( Action::VolumeUp ), Some( Action::NavUp ) ),
    ( Trigger::Down, Some( Action::VolumeDown ), Some( Action::NavDown ) ),
    ( Trigger::Quit, Some( Action::Quit ), Some( Action::Quit ) ),
    ( Trigger::ToggleView, Some( Action::TogglePlaylist ), Some( Action::TogglePlaylist ) ),
    ( Trigger::SecondaryY, Some( Action::PreviousTrack ), Some( Action::PlayCurrentDirectory ) ),
    ( Trigger::SecondaryX, Some( Action::NextTrack ), None ),
    ( Trigger::Start, Some( Action::CycleRepeat ), None ),
    ( Trigger::DpadButtonUp, Some( Action::NextTrack ), Some( Action::NavUp ) ),
    ( Trigger::DpadButtonDown, Some( Action::PreviousTrack ), Some( Action::NavDown ) ),
];


/// Gamepad button numbers for one handheld model.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub struct ButtonProfile {
    pub name: &'static str,
    pub b: u8,
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub start: u8,
    pub select: u8,
    pub dpad_up: u8,
    pub dpad_down: u8,
}


impl ButtonProfile {
    pub const R36T_MAX: ButtonProfile = ButtonProfile {
        name: "r36t-max",
        b: 1,
        a: 0,
        x: 2,
        y: 3,
        start: 9,
        select: 8,
        dpad_up: 14,
        dpad_down: 15,
    };

    pub const R36T: ButtonProfile = ButtonProfile {
        name: "r36t",
        b: 0,
        a: 1,
        x: 3,
        y: 4,
        start: 10,
        select: 8,
        dpad_up: 14,
        dpad_down: 15,
    };

    pub const R36S_ULTRA: ButtonProfile = ButtonProfile {
        name: "r36s-ultra",
        b: 0,
        a: 1,
        x: 3,
        y: 4,
        start: 10,
        select: 8,
        dpad_up: 13,
        dpad_down: 14,
    };

    pub const ALL: [ButtonProfile; 3] = [ Self::R36T_MAX, Self::R36T, Self::R36S_ULTRA ];


    /// Looks a profile up by name. Spaces and case are ignored, so
    /// `"R36T Max"` finds `r36t-max`.
    pub fn by_name( name: &str ) -> Option<ButtonProfile> {
        let wanted = name.trim().to_lowercase().replace( ' ', "-" );
        Self::ALL.into_iter().find( |p| p.name == wanted )
    }


    fn trigger_for( &self, button: u8 ) -> Option<Trigger> {
        // Select wins over any profile button sharing its number
        if button == self.select {
            return Some( Trigger::Quit );
        }

        [
            ( self.b, Trigger::Confirm ),
            ( self.a, Trigger::ToggleView ),
            ( self.y, Trigger::SecondaryY ),
            ( self.x, Trigger::SecondaryX ),
            ( self.dpad_up, Trigger::DpadButtonUp ),
            ( self.dpad_down, Trigger::DpadButtonDown ),
            ( self.start, Trigger::Start ),
        ]
        .into_iter()
        .find( |( number, _ )| *number == button )
        .map( |( _, trigger )| trigger )
    }
}


impl Default for ButtonProfile {
    fn default() -> Self {
        Self::R36T_MAX
    }
}


/// Result of dispatching an event.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub struct Dispatched {
    pub action: Action,
    /// True when the engine already carried the action out
    pub applied: bool,
}


/// Translates raw events into actions for the active button profile.
#[derive( Debug, Clone, Default )]
pub struct InputMapper {
    profile: ButtonProfile,
}


impl InputMapper {
    pub fn new( profile: ButtonProfile ) -> Self {
        Self { profile }
    }


    pub fn profile( &self ) -> &ButtonProfile {
        &self.profile
    }


    /// Reduces an event to its trigger, if it has one.
    pub fn trigger( &self, event: InputEvent ) -> Option<Trigger> {
        match event {
            InputEvent::Key( key ) => match key {
                Key::Space | Key::Enter => Some( Trigger::Confirm ),
                Key::Right => Some( Trigger::Right ),
                Key::Left => Some( Trigger::Left ),
                Key::Up => Some( Trigger::Up ),
                Key::Down => Some( Trigger::Down ),
                Key::Escape => Some( Trigger::Quit ),
                Key::Char( c ) => match c.to_ascii_lowercase() {
                    'q' => Some( Trigger::Quit ),
                    'p' => Some( Trigger::ToggleView ),
                    'y' => Some( Trigger::SecondaryY ),
                    'x' => Some( Trigger::SecondaryX ),
                    'r' => Some( Trigger::Start ),
                    _ => None,
                },
            },
            InputEvent::Button( button ) => self.profile.trigger_for( button ),
            InputEvent::Hat( direction ) => match direction {
                HatDirection::Up => Some( Trigger::Up ),
                HatDirection::Down => Some( Trigger::Down ),
                HatDirection::Left => Some( Trigger::Left ),
                HatDirection::Right => Some( Trigger::Right ),
                HatDirection::Centered => None,
            },
        }
    }


    /// Maps an event to an action without side effects.
    pub fn map( &self, event: InputEvent, mode: InputMode ) -> Option<Action> {
        let trigger = self.trigger( event )?;
        route( trigger, mode )
    }


    /// Maps an event and carries out transport actions on `engine`.
    ///
    /// The action is returned either way so the caller can react to it
    /// (screen changes, button feedback).
    pub fn dispatch( &self, event: InputEvent, mode: InputMode, engine: &mut PlaybackEngine ) -> Option<Dispatched> {
        let action = self.map( event, mode )?;
        tracing::debug!( "Input {:?} in {:?} mode -> {:?}", event, mode, action );

        let applied = apply( action, engine );
        Some( Dispatched { action, applied } )
    }
}


/// Looks up the routing table.
pub fn route( trigger: Trigger, mode: InputMode ) -> Option<Action> {
    ROUTES
        .iter()
        .find( |( t, _, _ )| *t == trigger )
        .and_then( |( _, player, browser )| match mode {
            InputMode::Player => *player,
            InputMode::Browser => *browser,
        })
}


/// Runs a transport action against the engine. Returns false for actions the
/// engine does not handle.
fn apply( action: Action, engine: &mut PlaybackEngine ) -> bool {
    match action {
        Action::TogglePlayPause => engine.toggle_play_pause(),
        Action::NextTrack => engine.next(),
        Action::PreviousTrack => engine.previous(),
        Action::VolumeUp => engine.adjust_volume( VOLUME_STEP ),
        Action::VolumeDown => engine.adjust_volume( -VOLUME_STEP ),
        Action::CycleRepeat => {
            engine.cycle_repeat_mode();
        }
        _ => return false,
    }
    true
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::engine::PlaybackState;
    use crate::playlist::RepeatMode;
    use crate::testing::engine_with;
    use std::path::PathBuf;


    #[test]
    fn test_routing_table_is_total_and_unique() {
        for trigger in Trigger::ALL {
            let count = ROUTES.iter().filter( |( t, _, _ )| *t == trigger ).count();
            assert_eq!( count, 1, "{:?}", trigger );
        }
        assert_eq!( ROUTES.len(), Trigger::ALL.len() );
    }


    #[test]
    fn test_player_mode_keyboard() {
        let mapper = InputMapper::default();
        let player = InputMode::Player;

        assert_eq!( mapper.map( InputEvent::Key( Key::Space ), player ), Some( Action::TogglePlayPause ) );
        assert_eq!( mapper.map( InputEvent::Key( Key::Right ), player ), Some( Action::NextTrack ) );
        assert_eq!( mapper.map( InputEvent::Key( Key::Left ), player ), Some( Action::PreviousTrack ) );
        assert_eq!( mapper.map( InputEvent::Key( Key::Up ), player ), Some( Action::VolumeUp ) );
        assert_eq!( mapper.map( InputEvent::Key( Key::Char( 'Q' ) ), player ), Some( Action::Quit ) );
        assert_eq!( mapper.map( InputEvent::Key( Key::Char( 'p' ) ), player ), Some( Action::TogglePlaylist ) );
        assert_eq!( mapper.map( InputEvent::Key( Key::Char( 'z' ) ), player ), None );
    }


    #[test]
    fn test_browser_mode_routes() {
        let mapper = InputMapper::default();
        let browser = InputMode::Browser;

        assert_eq!( mapper.map( InputEvent::Key( Key::Enter ), browser ), Some( Action::SelectItem ) );
        assert_eq!( mapper.map( InputEvent::Key( Key::Right ), browser ), Some( Action::NavRight ) );
        assert_eq!( mapper.map( InputEvent::Key( Key::Char( 'y' ) ), browser ), Some( Action::PlayCurrentDirectory ) );
        assert_eq!( mapper.map( InputEvent::Key( Key::Char( 'x' ) ), browser ), None );
        assert_eq!( mapper.map( InputEvent::Button( 9 ), browser ), None );
    }


    #[test]
    fn test_buttons_follow_profile() {
        let max = InputMapper::new( ButtonProfile::R36T_MAX );
        let ultra = InputMapper::new( ButtonProfile::R36S_ULTRA );
        let player = InputMode::Player;

        assert_eq!( max.map( InputEvent::Button( 1 ), player ), Some( Action::TogglePlayPause ) );
        assert_eq!( ultra.map( InputEvent::Button( 1 ), player ), Some( Action::TogglePlaylist ) );
        assert_eq!( max.map( InputEvent::Button( 14 ), player ), Some( Action::NextTrack ) );
        assert_eq!( ultra.map( InputEvent::Button( 14 ), player ), Some( Action::PreviousTrack ) );
        assert_eq!( ultra.map( InputEvent::Button( 8 ), player ), Some( Action::Quit ) );
        assert_eq!( max.map( InputEvent::Button( 42 ), player ), None );
    }


    #[test]
    fn test_hat_centered_is_unmapped() {
        let mapper = InputMapper::default();
        assert_eq!( mapper.map( InputEvent::Hat( HatDirection::Centered ), InputMode::Player ), None );
        assert_eq!( mapper.map( InputEvent::Hat( HatDirection::Down ), InputMode::Browser ), Some( Action::NavDown ) );
    }


    #[test]
    fn test_profile_lookup() {
        assert_eq!( ButtonProfile::by_name( "R36T Max" ), Some( ButtonProfile::R36T_MAX ) );
        assert_eq!( ButtonProfile::by_name( "r36s-ultra" ), Some( ButtonProfile::R36S_ULTRA ) );
        assert_eq!( ButtonProfile::by_name( "gameboy" ), None );
    }


    #[test]
    fn test_map_is_deterministic() {
        let mapper = InputMapper::default();
        let events = [
            InputEvent::Key( Key::Space ),
            InputEvent::Button( 3 ),
            InputEvent::Hat( HatDirection::Left ),
        ];
        for event in events {
            for mode in [ InputMode::Player, InputMode::Browser ] {
                assert_eq!( mapper.map( event, mode ), mapper.map( event, mode ) );
            }
        }
    }


    #[test]
    fn test_dispatch_applies_and_returns_tag() {
        let mapper = InputMapper::default();
        let ( mut engine, _fake ) = engine_with( 50 );
        let tracks = vec![ PathBuf::from( "/m/a.mp3" ), PathBuf::from( "/m/b.mp3" ) ];
        engine.load_playlist( tracks, 0 ).unwrap();

        let result = mapper.dispatch( InputEvent::Key( Key::Right ), InputMode::Player, &mut engine );
        assert_eq!( result, Some( Dispatched { action: Action::NextTrack, applied: true } ) );
        assert_eq!( engine.playlist().current_index(), Some( 1 ) );
        assert_eq!( engine.state(), PlaybackState::Playing );

        let result = mapper.dispatch( InputEvent::Key( Key::Char( 'r' ) ), InputMode::Player, &mut engine );
        assert_eq!( result.map( |d| d.action ), Some( Action::CycleRepeat ) );
        assert_eq!( engine.repeat_mode(), RepeatMode::All );
    }


    #[test]
    fn test_dispatch_leaves_navigation_to_caller() {
        let mapper = InputMapper::default();
        let ( mut engine, _fake ) = engine_with( 50 );

        let result = mapper.dispatch( InputEvent::Key( Key::Up ), InputMode::Browser, &mut engine );
        assert_eq!( result, Some( Dispatched { action: Action::NavUp, applied: false } ) );
        assert_eq!( engine.volume(), 0.5 );
    }
}
