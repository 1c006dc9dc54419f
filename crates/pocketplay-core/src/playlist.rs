//! Playlist and repeat policy
//!
//! The playlist is an ordered list of track paths with a cursor. It is
//! replaced wholesale when the user plays a directory or picks a file;
//! navigation wraps in both directions.

use std::path::PathBuf;

use thiserror::Error;


/// Errors that can occur with playlist operations.
#[derive( Debug, Error, PartialEq, Eq )]
pub enum PlaylistError {
    #[error( "Index {index} is out of bounds for a playlist of {len} tracks" )]
    InvalidIndex { index: usize, len: usize },
}


/// What happens when a track finishes on its own.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub enum RepeatMode {
    #[default]
    None,
    All,
    One,
}


impl RepeatMode {
    /// Next mode in the `None → All → One → None` cycle.
    pub fn cycle( self ) -> Self {
        match self {
            RepeatMode::None => RepeatMode::All,
            RepeatMode::All => RepeatMode::One,
            RepeatMode::One => RepeatMode::None,
        }
    }


    pub fn label( &self ) -> &'static str {
        match self {
            RepeatMode::None => "No repeat",
            RepeatMode::All => "Repeat all",
            RepeatMode::One => "Repeat this one",
        }
    }
}


/// Ordered tracks plus the index of the current one.
#[derive( Debug, Default, Clone )]
pub struct Playlist {
    tracks: Vec<PathBuf>,
    current_index: usize,
}


impl Playlist {
    /// Creates a new empty playlist.
    pub fn new() -> Self {
        Self::default()
    }


    /// Replaces the whole playlist and positions the cursor.
    ///
    /// An empty list is always accepted; otherwise `start_index` must be in range.
    pub fn replace( &mut self, tracks: Vec<PathBuf>, start_index: usize ) -> Result<(), PlaylistError> {
        if !tracks.is_empty() && start_index >= tracks.len() {
            return Err( PlaylistError::InvalidIndex { index: start_index, len: tracks.len() } );
        }

        self.current_index = if tracks.is_empty() { 0 } else { start_index };
        self.tracks = tracks;
        Ok(())
    }


    /// Gets the current track.
    pub fn current( &self ) -> Option<&PathBuf> {
        self.tracks.get( self.current_index )
    }


    /// Moves to the next track, wrapping to the first.
    pub fn advance( &mut self ) -> Option<&PathBuf> {
        if self.tracks.is_empty() {
            return None;
        }
        self.current_index = ( self.current_index + 1 ) % self.tracks.len();
        self.current()
    }


    /// Moves to the previous track, wrapping to the last.
    pub fn retreat( &mut self ) -> Option<&PathBuf> {
        if self.tracks.is_empty() {
            return None;
        }
        self.current_index = ( self.current_index + self.tracks.len() - 1 ) % self.tracks.len();
        self.current()
    }


    /// Repositions the cursor without touching the contents.
    pub fn jump_to( &mut self, index: usize ) -> Result<(), PlaylistError> {
        if index >= self.tracks.len() {
            return Err( PlaylistError::InvalidIndex { index, len: self.tracks.len() } );
        }
        self.current_index = index;
        Ok(())
    }


    /// True when the cursor is on the final track.
    pub fn is_last( &self ) -> bool {
        !self.tracks.is_empty() && self.current_index == self.tracks.len() - 1
    }


    /// Gets all tracks in the playlist.
    pub fn tracks( &self ) -> &[PathBuf] {
        &self.tracks
    }


    pub fn len( &self ) -> usize {
        self.tracks.len()
    }


    pub fn is_empty( &self ) -> bool {
        self.tracks.is_empty()
    }


    /// Current index, or None for an empty playlist.
    pub fn current_index( &self ) -> Option<usize> {
        if self.tracks.is_empty() { None } else { Some( self.current_index ) }
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    fn playlist_of( n: usize ) -> Playlist {
        let mut playlist = Playlist::new();
        let tracks = ( 0..n ).map( |i| PathBuf::from( format!( "/music/{}.mp3", i ) ) ).collect();
        playlist.replace( tracks, 0 ).unwrap();
        playlist
    }


    #[test]
    fn test_advance_then_retreat_is_identity() {
        let mut playlist = playlist_of( 4 );
        for start in 0..4 {
            playlist.jump_to( start ).unwrap();
            playlist.advance();
            playlist.retreat();
            assert_eq!( playlist.current_index(), Some( start ) );

            playlist.retreat();
            playlist.advance();
            assert_eq!( playlist.current_index(), Some( start ) );
        }
    }


    #[test]
    fn test_wraps_at_both_ends() {
        let mut playlist = playlist_of( 3 );
        playlist.jump_to( 2 ).unwrap();
        assert!( playlist.is_last() );
        playlist.advance();
        assert_eq!( playlist.current_index(), Some( 0 ) );
        playlist.retreat();
        assert_eq!( playlist.current_index(), Some( 2 ) );
    }


    #[test]
    fn test_replace_rejects_out_of_bounds_index() {
        let mut playlist = playlist_of( 2 );
        let err = playlist.replace( vec![ PathBuf::from( "a.mp3" ) ], 1 ).unwrap_err();
        assert_eq!( err, PlaylistError::InvalidIndex { index: 1, len: 1 } );
        // Rejected replacement leaves the old contents alone
        assert_eq!( playlist.len(), 2 );
    }


    #[test]
    fn test_replace_with_empty_is_accepted() {
        let mut playlist = playlist_of( 2 );
        playlist.replace( Vec::new(), 5 ).unwrap();
        assert!( playlist.is_empty() );
        assert_eq!( playlist.current_index(), None );
        assert!( playlist.advance().is_none() );
    }


    #[test]
    fn test_repeat_cycle_returns_after_three() {
        let mode = RepeatMode::None;
        assert_eq!( mode.cycle(), RepeatMode::All );
        assert_eq!( mode.cycle().cycle(), RepeatMode::One );
        assert_eq!( mode.cycle().cycle().cycle(), RepeatMode::None );
    }
}
