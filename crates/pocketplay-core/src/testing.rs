//! Test doubles shared by the unit tests.

use std::cell::RefCell;
use std::collections::HashSet;
use std::path::{ Path, PathBuf };
use std::rc::Rc;
use std::sync::Arc;

use crate::decoder::DecoderError;
use crate::engine::PlaybackEngine;
use crate::output::{ AudioOutput, OutputError, TrackHandle, MAX_GAIN };
use crate::volume::MemoryVolume;


#[derive( Debug, Default )]
struct FakeState {
    next_id: u64,
    loads: usize,
    failing: HashSet<PathBuf>,
    playing: bool,
    paused: bool,
    finished: bool,
    gain: u8,
    started: Vec<PathBuf>,
}


/// Records what the engine asks of the device. Clones share state.
#[derive( Debug, Clone, Default )]
pub struct FakeOutput {
    state: Rc<RefCell<FakeState>>,
}


impl FakeOutput {
    pub fn loads( &self ) -> usize {
        self.state.borrow().loads
    }


    pub fn fail_loads_of( &self, path: &str ) {
        self.state.borrow_mut().failing.insert( PathBuf::from( path ) );
    }


    /// Simulates the current track running out.
    pub fn finish_track( &self ) {
        self.state.borrow_mut().finished = true;
    }


    pub fn is_playing_now( &self ) -> bool {
        let state = self.state.borrow();
        state.playing && !state.finished
    }


    pub fn is_paused( &self ) -> bool {
        self.state.borrow().paused
    }


    pub fn gain( &self ) -> u8 {
        self.state.borrow().gain
    }


    pub fn started( &self ) -> Vec<PathBuf> {
        self.state.borrow().started.clone()
    }
}


impl AudioOutput for FakeOutput {
    fn load_track( &mut self, path: &Path ) -> Result<TrackHandle, OutputError> {
        let mut state = self.state.borrow_mut();
        if state.failing.contains( path ) {
            return Err( OutputError::Load {
                path: path.to_path_buf(),
                source: DecoderError::UnsupportedFormat,
            });
        }
        state.loads += 1;
        state.next_id += 1;
        Ok( TrackHandle::new( state.next_id, path.to_path_buf() ) )
    }


    fn play( &mut self, handle: &TrackHandle ) -> Result<(), OutputError> {
        let mut state = self.state.borrow_mut();
        state.playing = true;
        state.paused = false;
        state.finished = false;
        state.started.push( handle.path().to_path_buf() );
        Ok(())
    }


    fn pause( &mut self ) {
        self.state.borrow_mut().paused = true;
    }


    fn resume( &mut self ) {
        self.state.borrow_mut().paused = false;
    }


    fn stop( &mut self ) {
        let mut state = self.state.borrow_mut();
        state.playing = false;
        state.paused = false;
    }


    fn is_playing( &self ) -> bool {
        self.is_playing_now()
    }


    fn set_volume( &mut self, gain: u8 ) {
        self.state.borrow_mut().gain = gain.min( MAX_GAIN );
    }
}


/// An engine over a [`FakeOutput`] with the system volume at `percent`.
pub fn engine_with( percent: u8 ) -> ( PlaybackEngine, FakeOutput ) {
    let fake = FakeOutput::default();
    let engine = PlaybackEngine::new(
        Box::new( fake.clone() ),
        Arc::new( MemoryVolume::new( percent ) ),
        40,
    );
    ( engine, fake )
}


/// A tiny mono 16-bit WAV file whose RIFF `INFO` list carries `title`.
pub fn wav_with_title( title: &str ) -> Vec<u8> {
    let mut name = title.as_bytes().to_vec();
    name.push( 0 );
    if name.len() % 2 == 1 {
        name.push( 0 );
    }

    let mut fmt = Vec::new();
    fmt.extend_from_slice( &1u16.to_le_bytes() );       // PCM
    fmt.extend_from_slice( &1u16.to_le_bytes() );       // channels
    fmt.extend_from_slice( &8000u32.to_le_bytes() );    // sample rate
    fmt.extend_from_slice( &16000u32.to_le_bytes() );   // byte rate
    fmt.extend_from_slice( &2u16.to_le_bytes() );       // block align
    fmt.extend_from_slice( &16u16.to_le_bytes() );      // bits per sample

    let mut info = b"INFO".to_vec();
    info.extend_from_slice( b"INAM" );
    info.extend_from_slice( &( name.len() as u32 ).to_le_bytes() );
    info.extend_from_slice( &name );

    let samples = [ 0u8; 8 ];

    let mut body = b"WAVE".to_vec();
    for ( id, chunk ) in [ ( b"fmt ", fmt.as_slice() ), ( b"LIST", info.as_slice() ), ( b"data", samples.as_slice() ) ] {
        body.extend_from_slice( id );
        body.extend_from_slice( &( chunk.len() as u32 ).to_le_bytes() );
        body.extend_from_slice( chunk );
    }

    let mut wav = b"RIFF".to_vec();
    wav.extend_from_slice( &( body.len() as u32 ).to_le_bytes() );
    wav.extend_from_slice( &body );
    wav
}
