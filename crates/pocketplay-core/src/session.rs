//! Session orchestration
//!
//! [`Session`] is the single owner of the playback engine, the browser and
//! the input mapper. The frontend feeds it the events collected since the
//! previous frame; the session routes them, ticks the engine once and
//! handles the screensaver and display power.

use std::path::PathBuf;
use std::time::{ Duration, Instant };

use crate::browser::{ EntryKind, LibraryBrowser };
use crate::display::DisplayPower;
use crate::engine::PlaybackEngine;
use crate::input::{ Action, InputEvent, InputMapper, InputMode };
use crate::remote::RemoteAdmin;


/// Idle times after which the screen is blanked and then powered off.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub struct IdleTimeouts {
    pub screensaver: Duration,
    pub display_off: Duration,
}


impl Default for IdleTimeouts {
    fn default() -> Self {
        Self {
            screensaver: Duration::from_secs( 30 ),
            display_off: Duration::from_secs( 35 ),
        }
    }
}


/// Whether the frontend should keep running.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum Flow {
    Continue,
    Quit,
}


/// On-screen button to flash after a track skip.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum ButtonCue {
    Previous,
    Next,
}


pub struct Session {
    engine: PlaybackEngine,
    browser: LibraryBrowser,
    mapper: InputMapper,
    /// Present only where the panel can actually be powered down
    display: Option<Box<dyn DisplayPower>>,
    timeouts: IdleTimeouts,
    mode: InputMode,
    screensaver_active: bool,
    display_off: bool,
    last_input: Instant,
    cue: Option<ButtonCue>,
}


impl Session {
    pub fn new(
        engine: PlaybackEngine,
        browser: LibraryBrowser,
        mapper: InputMapper,
        display: Option<Box<dyn DisplayPower>>,
        timeouts: IdleTimeouts,
        now: Instant,
    ) -> Self {
        Self {
            engine,
            browser,
            mapper,
            display,
            timeouts,
            mode: InputMode::Player,
            screensaver_active: false,
            display_off: false,
            last_input: now,
            cue: None,
        }
    }


    /// Runs one loop iteration: every pending event, one engine tick, then
    /// the idle checks.
    pub fn frame<I>( &mut self, events: I, now: Instant ) -> Flow
    where
        I: IntoIterator<Item = InputEvent>,
    {
        for event in events {
            if self.handle_event( event, now ) == Flow::Quit {
                return Flow::Quit;
            }
        }

        if self.engine.on_tick() {
            self.cue = Some( ButtonCue::Next );
        }
        self.check_idle( now );
        Flow::Continue
    }


    fn handle_event( &mut self, event: InputEvent, now: Instant ) -> Flow {
        if self.mapper.map( event, self.mode ).is_none() {
            return Flow::Continue;
        }

        let was_asleep = self.screensaver_active;
        self.wake( now );
        if was_asleep {
            // The press that wakes the screen does nothing else
            return Flow::Continue;
        }

        let Some( dispatched ) = self.mapper.dispatch( event, self.mode, &mut self.engine ) else {
            return Flow::Continue;
        };

        match dispatched.action {
            Action::NextTrack => self.cue = Some( ButtonCue::Next ),
            Action::PreviousTrack => self.cue = Some( ButtonCue::Previous ),
            _ if dispatched.applied => {}
            other => return self.apply( other ),
        }
        Flow::Continue
    }


    /// Screen and browser actions the engine does not handle.
    fn apply( &mut self, action: Action ) -> Flow {
        match action {
            Action::Quit => {
                tracing::info!( "Quit requested" );
                return Flow::Quit;
            }
            Action::TogglePlaylist => {
                self.mode = match self.mode {
                    InputMode::Player => InputMode::Browser,
                    InputMode::Browser => InputMode::Player,
                };
                tracing::debug!( "Switched to {:?} screen", self.mode );
            }
            Action::NavUp => self.browser.select_previous(),
            Action::NavDown | Action::NavRight => self.browser.select_next(),
            Action::NavLeft => {
                self.browser.go_up();
            }
            Action::SelectItem => self.select_item(),
            Action::PlayCurrentDirectory => self.play_directory( None ),
            _ => {}
        }
        Flow::Continue
    }


    fn select_item( &mut self ) {
        let Some( entry ) = self.browser.selected_entry().cloned() else {
            return;
        };

        match entry.kind {
            EntryKind::Dir => {
                if let Err( e ) = self.browser.set_directory( entry.path ) {
                    tracing::warn!( "{}", e );
                }
            }
            EntryKind::File => self.play_directory( Some( entry.path ) ),
        }
    }


    /// Replaces the playlist with the browsed directory's files, starting at
    /// `start` (or the first file), and returns to the player screen.
    fn play_directory( &mut self, start: Option<PathBuf> ) {
        let tracks = self.browser.playable_paths();
        if tracks.is_empty() {
            tracing::info!( "No tracks in {:?}", self.browser.current_dir() );
            return;
        }

        let index = start
            .and_then( |path| tracks.iter().position( |t| *t == path ) )
            .unwrap_or( 0 );

        if let Err( e ) = self.engine.load_playlist( tracks, index ) {
            tracing::error!( "Could not load directory playlist: {}", e );
            return;
        }
        tracing::info!( "Playing directory {:?} from track {}", self.browser.current_dir(), index );
        self.engine.play();
        self.mode = InputMode::Player;
    }


    fn check_idle( &mut self, now: Instant ) {
        let idle = now.saturating_duration_since( self.last_input );

        if !self.screensaver_active && idle >= self.timeouts.screensaver {
            tracing::debug!( "Screensaver on after {:?} idle", idle );
            self.screensaver_active = true;
        }

        if !self.display_off && idle >= self.timeouts.display_off {
            if let Some( display ) = self.display.as_mut() {
                display.off();
                self.display_off = true;
            }
        }
    }


    /// Resets the idle timer, leaving the screensaver and powering the
    /// display back on if needed.
    pub fn wake( &mut self, now: Instant ) {
        self.last_input = now;
        self.screensaver_active = false;

        if self.display_off {
            if let Some( display ) = self.display.as_mut() {
                display.on();
            }
            self.display_off = false;
        }
    }


    /// Skip cue raised since the last call, if any.
    pub fn take_cue( &mut self ) -> Option<ButtonCue> {
        self.cue.take()
    }


    pub fn mode( &self ) -> InputMode {
        self.mode
    }


    pub fn set_mode( &mut self, mode: InputMode ) {
        self.mode = mode;
    }


    pub fn screensaver_active( &self ) -> bool {
        self.screensaver_active
    }


    pub fn display_off( &self ) -> bool {
        self.display_off
    }


    pub fn engine( &self ) -> &PlaybackEngine {
        &self.engine
    }


    pub fn engine_mut( &mut self ) -> &mut PlaybackEngine {
        &mut self.engine
    }


    pub fn browser( &self ) -> &LibraryBrowser {
        &self.browser
    }


    /// Tears down in order: remote services, audio, then the display is
    /// switched back on whatever state it was left in.
    pub fn shutdown( mut self, remote: Option<RemoteAdmin>, timeout: Duration ) {
        if let Some( remote ) = remote {
            remote.stop( timeout );
        }

        self.engine.stop();

        if let Some( display ) = self.display.as_mut() {
            display.on();
        }
        self.display_off = false;
        tracing::info!( "Session closed" );
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::engine::PlaybackState;
    use crate::input::{ HatDirection, Key };
    use crate::playlist::RepeatMode;
    use crate::testing::{ engine_with, FakeOutput };
    use std::cell::RefCell;
    use std::fs;
    use std::rc::Rc;
    use tempfile::TempDir;


    #[derive( Clone, Default )]
    struct FakeDisplay {
        calls: Rc<RefCell<Vec<&'static str>>>,
    }


    impl DisplayPower for FakeDisplay {
        fn on( &mut self ) {
            self.calls.borrow_mut().push( "on" );
        }


        fn off( &mut self ) {
            self.calls.borrow_mut().push( "off" );
        }
    }


    struct Fixture {
        session: Session,
        output: FakeOutput,
        display: FakeDisplay,
        start: Instant,
        dir: TempDir,
    }


    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        fs::create_dir( dir.path().join( "album" ) ).unwrap();
        fs::write( dir.path().join( "album/01.mp3" ), b"" ).unwrap();
        fs::write( dir.path().join( "album/02.mp3" ), b"" ).unwrap();
        fs::write( dir.path().join( "album/03.mp3" ), b"" ).unwrap();

        let ( engine, output ) = engine_with( 50 );
        let browser = LibraryBrowser::new( dir.path() ).unwrap();
        let display = FakeDisplay::default();
        let start = Instant::now();
        let session = Session::new(
            engine,
            browser,
            InputMapper::default(),
            Some( Box::new( display.clone() ) ),
            IdleTimeouts::default(),
            start,
        );

        Fixture { session, output, display, start, dir }
    }


    const NO_INPUT: [InputEvent; 0] = [];


    fn key( key: Key ) -> InputEvent {
        InputEvent::Key( key )
    }


    #[test]
    fn test_toggle_view_flips_mode() {
        let mut f = fixture();
        f.session.frame( [ key( Key::Char( 'p' ) ) ], f.start );
        assert_eq!( f.session.mode(), InputMode::Browser );
        f.session.frame( [ key( Key::Char( 'p' ) ) ], f.start );
        assert_eq!( f.session.mode(), InputMode::Player );
    }


    #[test]
    fn test_select_file_plays_directory_from_it() {
        let mut f = fixture();
        let now = f.start;
        f.session.frame( [ key( Key::Char( 'p' ) ) ], now );

        // ".." then "album"
        f.session.frame( [ key( Key::Down ), key( Key::Enter ) ], now );
        assert!( f.session.browser().current_dir().ends_with( "album" ) );

        // "..", 01, 02
        f.session.frame( [ key( Key::Down ), key( Key::Right ), key( Key::Space ) ], now );
        assert_eq!( f.session.mode(), InputMode::Player );
        assert_eq!( f.session.engine().state(), PlaybackState::Playing );
        assert_eq!( f.session.engine().playlist().len(), 3 );
        assert_eq!( f.session.engine().playlist().current_index(), Some( 1 ) );
        assert_eq!( f.output.started(), vec![ f.dir.path().join( "album/02.mp3" ) ] );
    }


    #[test]
    fn test_play_current_directory_starts_at_first() {
        let mut f = fixture();
        let now = f.start;
        f.session.frame( [ key( Key::Char( 'p' ) ), key( Key::Down ), key( Key::Enter ) ], now );
        f.session.frame( [ key( Key::Char( 'y' ) ) ], now );

        assert_eq!( f.session.mode(), InputMode::Player );
        assert_eq!( f.session.engine().playlist().current_index(), Some( 0 ) );
        assert_eq!( f.session.engine().state(), PlaybackState::Playing );
    }


    #[test]
    fn test_nav_left_goes_to_parent() {
        let mut f = fixture();
        let now = f.start;
        f.session.frame( [ key( Key::Char( 'p' ) ), key( Key::Down ), key( Key::Enter ) ], now );
        f.session.frame( [ InputEvent::Hat( HatDirection::Left ) ], now );
        assert_eq!( f.session.browser().current_dir(), f.dir.path() );
    }


    #[test]
    fn test_skip_raises_cue() {
        let mut f = fixture();
        f.session.frame( [ key( Key::Right ) ], f.start );
        assert_eq!( f.session.take_cue(), Some( ButtonCue::Next ) );
        assert_eq!( f.session.take_cue(), None );
    }


    #[test]
    fn test_finished_track_raises_next_cue() {
        let mut f = fixture();
        let now = f.start;
        f.session.frame( [ key( Key::Char( 'p' ) ), key( Key::Down ), key( Key::Enter ) ], now );
        f.session.frame( [ key( Key::Char( 'y' ) ) ], now );
        assert_eq!( f.session.take_cue(), None );

        f.output.finish_track();
        f.session.frame( NO_INPUT, now );
        assert_eq!( f.session.engine().playlist().current_index(), Some( 1 ) );
        assert_eq!( f.session.take_cue(), Some( ButtonCue::Next ) );

        // Replaying the same track is not a skip
        f.session.engine_mut().set_repeat_mode( RepeatMode::One );
        f.output.finish_track();
        f.session.frame( NO_INPUT, now );
        assert_eq!( f.session.take_cue(), None );
    }


    #[test]
    fn test_quit() {
        let mut f = fixture();
        assert_eq!( f.session.frame( [ key( Key::Escape ) ], f.start ), Flow::Quit );
        assert_eq!( f.session.frame( [ InputEvent::Button( 8 ) ], f.start ), Flow::Quit );
    }


    #[test]
    fn test_idle_timeouts_and_wake_consumes_event() {
        let mut f = fixture();

        f.session.frame( NO_INPUT, f.start + Duration::from_secs( 29 ) );
        assert!( !f.session.screensaver_active() );

        f.session.frame( NO_INPUT, f.start + Duration::from_secs( 30 ) );
        assert!( f.session.screensaver_active() );
        assert!( !f.session.display_off() );

        f.session.frame( NO_INPUT, f.start + Duration::from_secs( 35 ) );
        assert!( f.session.display_off() );
        assert_eq!( *f.display.calls.borrow(), vec![ "off" ] );

        // The waking press must not toggle the view
        let later = f.start + Duration::from_secs( 40 );
        f.session.frame( [ key( Key::Char( 'p' ) ) ], later );
        assert!( !f.session.screensaver_active() );
        assert!( !f.session.display_off() );
        assert_eq!( f.session.mode(), InputMode::Player );
        assert_eq!( *f.display.calls.borrow(), vec![ "off", "on" ] );

        f.session.frame( [ key( Key::Char( 'p' ) ) ], later );
        assert_eq!( f.session.mode(), InputMode::Browser );
    }


    #[test]
    fn test_unmapped_event_does_not_reset_idle() {
        let mut f = fixture();
        f.session.frame( [ key( Key::Char( 'z' ) ) ], f.start + Duration::from_secs( 20 ) );
        f.session.frame( NO_INPUT, f.start + Duration::from_secs( 30 ) );
        assert!( f.session.screensaver_active() );
    }


    #[test]
    fn test_no_display_means_no_power_off() {
        let ( engine, _output ) = engine_with( 50 );
        let dir = TempDir::new().unwrap();
        let browser = LibraryBrowser::new( dir.path() ).unwrap();
        let start = Instant::now();
        let mut session = Session::new( engine, browser, InputMapper::default(), None, IdleTimeouts::default(), start );

        session.frame( NO_INPUT, start + Duration::from_secs( 60 ) );
        assert!( session.screensaver_active() );
        assert!( !session.display_off() );
    }


    #[test]
    fn test_shutdown_stops_audio_and_turns_display_on() {
        let mut f = fixture();
        f.session.engine_mut().load_playlist( vec![ PathBuf::from( "/m/a.mp3" ) ], 0 ).unwrap();
        f.session.frame( [ key( Key::Space ) ], f.start );
        assert!( f.output.is_playing_now() );

        let display = f.display.clone();
        f.session.shutdown( None, Duration::from_millis( 100 ) );
        assert!( !f.output.is_playing_now() );
        assert_eq!( *display.calls.borrow(), vec![ "on" ] );
    }
}
