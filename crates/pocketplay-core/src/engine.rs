//! Playback engine
//!
//! The engine owns the playlist, the transport state and the repeat policy,
//! and drives an [`AudioOutput`]. Every call is synchronous: by the time a
//! method returns the new state is observable. Device failures are logged
//! and leave the state as it was.

use std::path::PathBuf;
use std::sync::Arc;

use crate::metadata::Track;
use crate::output::{ AudioOutput, TrackHandle, MAX_GAIN };
use crate::playlist::{ Playlist, PlaylistError, RepeatMode };
use crate::volume::SystemVolume;


/// Current playback state.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}


impl PlaybackState {
    pub fn label( &self ) -> &'static str {
        match self {
            PlaybackState::Stopped => "Stopped",
            PlaybackState::Playing => "Playing",
            PlaybackState::Paused => "Paused",
        }
    }
}


/// Core transport state machine.
pub struct PlaybackEngine {
    output: Box<dyn AudioOutput>,
    system_volume: Arc<dyn SystemVolume>,
    playlist: Playlist,
    state: PlaybackState,
    repeat: RepeatMode,
    /// Output gain mirror of the system volume, `0..=MAX_GAIN`
    gain: u8,
    loaded: Option<TrackHandle>,
}


impl PlaybackEngine {
    /// Creates an engine with an empty playlist.
    ///
    /// A muted system volume is raised to `default_percent` so a fresh start
    /// is audible.
    pub fn new(
        mut output: Box<dyn AudioOutput>,
        system_volume: Arc<dyn SystemVolume>,
        default_percent: u8,
    ) -> Self {
        let mut percent = system_volume.get();
        if percent == 0 {
            percent = default_percent.min( 100 );
            system_volume.set( percent );
        }

        let gain = gain_for( percent as f32 / 100.0 );
        output.set_volume( gain );

        Self {
            output,
            system_volume,
            playlist: Playlist::new(),
            state: PlaybackState::Stopped,
            repeat: RepeatMode::None,
            gain,
            loaded: None,
        }
    }


    /// Stops playback and replaces the playlist.
    pub fn load_playlist( &mut self, tracks: Vec<PathBuf>, start_index: usize ) -> Result<(), PlaylistError> {
        if !tracks.is_empty() && start_index >= tracks.len() {
            return Err( PlaylistError::InvalidIndex { index: start_index, len: tracks.len() } );
        }

        self.stop();
        self.playlist.replace( tracks, start_index )?;
        tracing::info!( "Playlist loaded: {} tracks, starting at {}", self.playlist.len(), start_index );
        Ok(())
    }


    /// Play from stopped, pause while playing, resume while paused.
    pub fn toggle_play_pause( &mut self ) {
        if self.playlist.is_empty() {
            return;
        }

        match self.state {
            PlaybackState::Playing => {
                self.output.pause();
                self.state = PlaybackState::Paused;
                tracing::info!( "Paused" );
            }
            PlaybackState::Paused => {
                self.output.resume();
                self.state = PlaybackState::Playing;
                tracing::info!( "Resumed" );
            }
            PlaybackState::Stopped => {
                self.play_current();
            }
        }
    }


    /// Starts the track under the cursor from the beginning.
    pub fn play( &mut self ) {
        self.play_current();
    }


    /// Advances (wrapping) and starts the new track.
    pub fn next( &mut self ) {
        self.step( Playlist::advance );
    }


    /// Steps back (wrapping) and starts the new track.
    pub fn previous( &mut self ) {
        self.step( Playlist::retreat );
    }


    fn step( &mut self, mv: fn( &mut Playlist ) -> Option<&PathBuf> ) {
        let Some( from ) = self.playlist.current_index() else {
            return;
        };

        mv( &mut self.playlist );
        if !self.play_current() {
            // The cursor only moves when the new track actually started
            let _ = self.playlist.jump_to( from );
        }
    }


    /// Loads and starts the track under the cursor.
    ///
    /// Returns false (and changes nothing) if the device refused it.
    fn play_current( &mut self ) -> bool {
        let Some( path ) = self.playlist.current().cloned() else {
            return false;
        };

        let handle = match self.output.load_track( &path ) {
            Ok( handle ) => handle,
            Err( e ) => {
                tracing::error!( "Failed to load {:?}: {}", path, e );
                return false;
            }
        };

        if let Err( e ) = self.output.play( &handle ) {
            tracing::error!( "Failed to play {:?}: {}", path, e );
            return false;
        }

        self.output.set_volume( self.gain );
        self.loaded = Some( handle );
        self.state = PlaybackState::Playing;
        true
    }


    /// Halts output and returns to `Stopped`.
    pub fn stop( &mut self ) {
        self.output.stop();
        self.loaded = None;
        if self.state != PlaybackState::Stopped {
            tracing::info!( "Stopped" );
        }
        self.state = PlaybackState::Stopped;
    }


    /// Steps the repeat mode through `None → All → One`.
    pub fn cycle_repeat_mode( &mut self ) -> RepeatMode {
        self.set_repeat_mode( self.repeat.cycle() );
        self.repeat
    }


    pub fn set_repeat_mode( &mut self, mode: RepeatMode ) {
        self.repeat = mode;
        tracing::info!( "Repeat mode: {}", mode.label() );
    }


    pub fn repeat_mode( &self ) -> RepeatMode {
        self.repeat
    }


    /// Sets the volume (clamped to 0.0–1.0) on the system mixer and the output.
    pub fn set_volume( &mut self, volume: f32 ) {
        let volume = if volume.is_nan() { 0.0 } else { volume.clamp( 0.0, 1.0 ) };

        self.system_volume.set( ( volume * 100.0 ).round() as u8 );
        self.gain = gain_for( volume );
        self.output.set_volume( self.gain );
    }


    /// Nudges the volume by `delta` relative to the system reading.
    pub fn adjust_volume( &mut self, delta: f32 ) {
        self.set_volume( self.volume() + delta );
    }


    /// Volume as reported by the system mixer, 0.0–1.0.
    pub fn volume( &self ) -> f32 {
        self.system_volume.get().min( 100 ) as f32 / 100.0
    }


    /// Output gain last pushed to the device.
    pub fn gain( &self ) -> u8 {
        self.gain
    }


    /// Checks for a naturally finished track and applies the repeat policy.
    ///
    /// Call once per loop iteration, after input has been handled. Returns
    /// true when playback moved on to the next track.
    pub fn on_tick( &mut self ) -> bool {
        if self.state != PlaybackState::Playing || self.output.is_playing() {
            return false;
        }

        tracing::debug!( "Track finished, repeat mode {:?}", self.repeat );

        let from = self.playlist.current_index();
        let started = match self.repeat {
            RepeatMode::One => self.play_current(),
            RepeatMode::All => {
                self.playlist.advance();
                self.play_current()
            }
            RepeatMode::None if self.playlist.is_last() => {
                self.stop();
                return false;
            }
            RepeatMode::None => {
                self.playlist.advance();
                self.play_current()
            }
        };

        if !started {
            // Nothing is coming out of the device any more
            if let Some( from ) = from {
                let _ = self.playlist.jump_to( from );
            }
            self.stop();
            return false;
        }

        self.repeat != RepeatMode::One
    }


    pub fn state( &self ) -> PlaybackState {
        self.state
    }


    pub fn playlist( &self ) -> &Playlist {
        &self.playlist
    }


    /// The track under the cursor, with its tags resolved.
    pub fn current_track( &self ) -> Option<Track> {
        self.playlist.current().map( |path| Track::resolve( path ) )
    }


    /// Short status line, e.g. `Playing / Repeat all`.
    pub fn status_text( &self ) -> String {
        format!( "{} / {}", self.state.label(), self.repeat.label() )
    }
}


impl Drop for PlaybackEngine {
    fn drop( &mut self ) {
        self.output.stop();
    }
}


fn gain_for( volume: f32 ) -> u8 {
    ( volume.clamp( 0.0, 1.0 ) * MAX_GAIN as f32 ) as u8
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::testing::{ engine_with, FakeOutput };
    use crate::volume::MemoryVolume;


    fn tracks( n: usize ) -> Vec<PathBuf> {
        ( 0..n ).map( |i| PathBuf::from( format!( "/music/{:02}.mp3", i ) ) ).collect()
    }


    #[test]
    fn test_toggle_sequence_from_stopped() {
        let ( mut engine, fake ) = engine_with( 50 );
        engine.load_playlist( tracks( 2 ), 0 ).unwrap();

        engine.toggle_play_pause();
        assert_eq!( engine.state(), PlaybackState::Playing );
        engine.toggle_play_pause();
        assert_eq!( engine.state(), PlaybackState::Paused );
        engine.toggle_play_pause();
        assert_eq!( engine.state(), PlaybackState::Playing );

        // Resume must not reload the track
        assert_eq!( fake.loads(), 1 );
    }


    #[test]
    fn test_toggle_on_empty_playlist_is_noop() {
        let ( mut engine, fake ) = engine_with( 50 );
        engine.toggle_play_pause();
        engine.next();
        engine.previous();
        assert_eq!( engine.state(), PlaybackState::Stopped );
        assert_eq!( fake.loads(), 0 );
    }


    #[test]
    fn test_next_previous_wrap_and_clear_pause() {
        let ( mut engine, _fake ) = engine_with( 50 );
        engine.load_playlist( tracks( 3 ), 2 ).unwrap();
        engine.toggle_play_pause();
        engine.toggle_play_pause();
        assert_eq!( engine.state(), PlaybackState::Paused );

        engine.next();
        assert_eq!( engine.playlist().current_index(), Some( 0 ) );
        assert_eq!( engine.state(), PlaybackState::Playing );

        engine.previous();
        assert_eq!( engine.playlist().current_index(), Some( 2 ) );
    }


    #[test]
    fn test_failed_load_keeps_index_and_state() {
        let ( mut engine, fake ) = engine_with( 50 );
        engine.load_playlist( tracks( 3 ), 0 ).unwrap();
        engine.toggle_play_pause();

        fake.fail_loads_of( "/music/01.mp3" );
        engine.next();

        assert_eq!( engine.playlist().current_index(), Some( 0 ) );
        assert_eq!( engine.state(), PlaybackState::Playing );
    }


    #[test]
    fn test_failed_auto_advance_keeps_index() {
        let ( mut engine, fake ) = engine_with( 50 );
        engine.load_playlist( tracks( 3 ), 0 ).unwrap();
        engine.set_repeat_mode( RepeatMode::All );
        engine.toggle_play_pause();

        fake.fail_loads_of( "/music/01.mp3" );
        fake.finish_track();
        assert!( !engine.on_tick() );

        assert_eq!( engine.playlist().current_index(), Some( 0 ) );
        assert_eq!( engine.state(), PlaybackState::Stopped );
    }


    #[test]
    fn test_load_playlist_rejects_bad_index() {
        let ( mut engine, _fake ) = engine_with( 50 );
        let err = engine.load_playlist( tracks( 2 ), 2 ).unwrap_err();
        assert_eq!( err, PlaylistError::InvalidIndex { index: 2, len: 2 } );
    }


    #[test]
    fn test_load_playlist_stops_playback() {
        let ( mut engine, fake ) = engine_with( 50 );
        engine.load_playlist( tracks( 2 ), 0 ).unwrap();
        engine.toggle_play_pause();

        engine.load_playlist( tracks( 4 ), 3 ).unwrap();
        assert_eq!( engine.state(), PlaybackState::Stopped );
        assert_eq!( engine.playlist().current_index(), Some( 3 ) );
        assert!( !fake.is_playing_now() );
    }


    #[test]
    fn test_completion_repeat_none_stops_at_end() {
        let ( mut engine, fake ) = engine_with( 50 );
        engine.load_playlist( tracks( 2 ), 0 ).unwrap();
        engine.toggle_play_pause();

        fake.finish_track();
        engine.on_tick();
        assert_eq!( engine.playlist().current_index(), Some( 1 ) );
        assert_eq!( engine.state(), PlaybackState::Playing );

        fake.finish_track();
        engine.on_tick();
        assert_eq!( engine.playlist().current_index(), Some( 1 ) );
        assert_eq!( engine.state(), PlaybackState::Stopped );
    }


    #[test]
    fn test_completion_repeat_all_wraps() {
        let ( mut engine, fake ) = engine_with( 50 );
        engine.load_playlist( tracks( 2 ), 1 ).unwrap();
        engine.set_repeat_mode( RepeatMode::All );
        engine.toggle_play_pause();

        fake.finish_track();
        engine.on_tick();
        assert_eq!( engine.playlist().current_index(), Some( 0 ) );
        assert_eq!( engine.state(), PlaybackState::Playing );
    }


    #[test]
    fn test_completion_repeat_one_replays() {
        let ( mut engine, fake ) = engine_with( 50 );
        engine.load_playlist( tracks( 3 ), 1 ).unwrap();
        engine.set_repeat_mode( RepeatMode::One );
        engine.toggle_play_pause();

        fake.finish_track();
        engine.on_tick();
        assert_eq!( engine.playlist().current_index(), Some( 1 ) );
        assert_eq!( fake.loads(), 2 );
    }


    #[test]
    fn test_paused_track_is_not_treated_as_finished() {
        let ( mut engine, fake ) = engine_with( 50 );
        engine.load_playlist( tracks( 2 ), 0 ).unwrap();
        engine.toggle_play_pause();
        engine.toggle_play_pause();

        fake.finish_track();
        engine.on_tick();
        assert_eq!( engine.state(), PlaybackState::Paused );
        assert_eq!( engine.playlist().current_index(), Some( 0 ) );
    }


    #[test]
    fn test_repeat_cycle_three_calls() {
        let ( mut engine, _fake ) = engine_with( 50 );
        engine.cycle_repeat_mode();
        engine.cycle_repeat_mode();
        assert_eq!( engine.cycle_repeat_mode(), RepeatMode::None );
    }


    #[test]
    fn test_volume_clamps() {
        let ( mut engine, fake ) = engine_with( 50 );

        engine.set_volume( -0.5 );
        assert_eq!( engine.volume(), 0.0 );
        assert_eq!( fake.gain(), 0 );

        engine.set_volume( 1.7 );
        assert_eq!( engine.volume(), 1.0 );
        assert_eq!( fake.gain(), MAX_GAIN );
    }


    #[test]
    fn test_adjust_volume_steps_from_system_reading() {
        let ( mut engine, _fake ) = engine_with( 40 );
        engine.adjust_volume( 0.1 );
        assert_eq!( engine.volume(), 0.5 );
        engine.adjust_volume( -0.1 );
        engine.adjust_volume( -0.1 );
        assert_eq!( engine.volume(), 0.3 );
    }


    #[test]
    fn test_muted_system_volume_is_raised_on_start() {
        let volume = Arc::new( MemoryVolume::new( 0 ) );
        let engine = PlaybackEngine::new( Box::new( FakeOutput::default() ), volume.clone(), 40 );
        assert_eq!( volume.get(), 40 );
        assert_eq!( engine.gain(), 51 );
    }


    #[test]
    fn test_status_text() {
        let ( mut engine, _fake ) = engine_with( 50 );
        engine.load_playlist( tracks( 1 ), 0 ).unwrap();
        engine.toggle_play_pause();
        engine.set_repeat_mode( RepeatMode::All );
        assert_eq!( engine.status_text(), "Playing / Repeat all" );
    }
}
