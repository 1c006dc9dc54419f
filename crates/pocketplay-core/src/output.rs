//! Audio output capability and the cpal stream behind it
//!
//! The playback engine only sees the [`AudioOutput`] trait. The types in this
//! module implement the device side: a shared sample buffer fed by a decode
//! thread and drained by the cpal callback.

use std::collections::VecDeque;
use std::path::{ Path, PathBuf };
use std::sync::atomic::{ AtomicBool, AtomicU32, Ordering };
use std::sync::{ Arc, Mutex };

use cpal::traits::{ DeviceTrait, HostTrait, StreamTrait };
use thiserror::Error;

use crate::decoder::DecoderError;


/// Maximum output gain accepted by [`AudioOutput::set_volume`].
pub const MAX_GAIN: u8 = 128;


/// Errors that can occur with audio output.
#[derive( Debug, Error )]
pub enum OutputError {
    #[error( "Failed to load {path:?}: {source}" )]
    Load { path: PathBuf, source: DecoderError },

    #[error( "No output device available" )]
    NoDevice,

    #[error( "Failed to get default stream config: {0}" )]
    StreamConfig( String ),

    #[error( "Failed to build output stream: {0}" )]
    BuildStream( String ),

    #[error( "Failed to play stream: {0}" )]
    PlayStream( String ),

    #[error( "Failed to create resampler: {0}" )]
    Resampler( String ),
}


/// A track loaded into the output and ready to start.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct TrackHandle {
    pub(crate) id: u64,
    pub(crate) path: PathBuf,
}


impl TrackHandle {
    pub fn new( id: u64, path: PathBuf ) -> Self {
        Self { id, path }
    }


    pub fn path( &self ) -> &Path {
        &self.path
    }
}


/// The audio device as seen by the playback engine.
///
/// Implementations are driven from the playback loop only, so they need not
/// be `Send`.
pub trait AudioOutput {
    /// Prepares a track for playback without interrupting the current one.
    fn load_track( &mut self, path: &Path ) -> Result<TrackHandle, OutputError>;

    /// Starts a loaded track, replacing whatever was playing.
    fn play( &mut self, handle: &TrackHandle ) -> Result<(), OutputError>;

    fn pause( &mut self );

    fn resume( &mut self );

    fn stop( &mut self );

    /// True while a started track has not yet finished or been stopped.
    fn is_playing( &self ) -> bool;

    /// Output gain, `0..=MAX_GAIN`.
    fn set_volume( &mut self, gain: u8 );
}


/// Shared sample buffer between producer (decoder) and consumer (audio callback).
/// Handles channel conversion between source and output.
pub struct SampleBuffer {
    buffer: Mutex<VecDeque<f32>>,
    capacity: usize,
    paused: AtomicBool,
    /// Linear gain stored as f32 bits
    volume: AtomicU32,
    source_channels: u16,
    output_channels: u16,
}


impl SampleBuffer {
    /// Creates a new sample buffer with the given capacity and channel configuration.
    pub fn new( capacity: usize, source_channels: u16, output_channels: u16 ) -> Self {
        Self {
            buffer: Mutex::new( VecDeque::with_capacity( capacity ) ),
            capacity,
            paused: AtomicBool::new( false ),
            volume: AtomicU32::new( 1.0_f32.to_bits() ),
            source_channels,
            output_channels,
        }
    }


    fn lock( &self ) -> std::sync::MutexGuard<'_, VecDeque<f32>> {
        // A panicked audio callback must not take the decode thread down with it
        self.buffer.lock().unwrap_or_else( |poisoned| poisoned.into_inner() )
    }


    /// Pushes samples to the buffer. Returns number of samples actually pushed.
    pub fn push( &self, samples: &[f32] ) -> usize {
        let mut buf = self.lock();
        let available = self.capacity.saturating_sub( buf.len() );
        let to_push = samples.len().min( available );
        buf.extend( samples[ ..to_push ].iter().copied() );
        to_push
    }


    /// Pops samples into the output slice, converting channel layout.
    /// Returns the number of output samples actually written.
    pub fn pop( &self, output: &mut [f32] ) -> usize {
        if self.paused.load( Ordering::Relaxed ) {
            output.fill( 0.0 );
            return 0;
        }

        let volume = f32::from_bits( self.volume.load( Ordering::Relaxed ) );
        let mut buf = self.lock();
        let src_ch = self.source_channels.max( 1 ) as usize;
        let out_ch = self.output_channels.max( 1 ) as usize;

        let written = if src_ch == out_ch {
            let to_pop = output.len().min( buf.len() );
            for ( slot, sample ) in output.iter_mut().zip( buf.drain( ..to_pop ) ) {
                *slot = sample;
            }
            to_pop
        } else {
            let frames = ( output.len() / out_ch ).min( buf.len() / src_ch );
            let mut frame = Vec::with_capacity( src_ch );

            for i in 0..frames {
                frame.clear();
                frame.extend( buf.drain( ..src_ch ) );

                for ch in 0..out_ch {
                    output[ i * out_ch + ch ] = if src_ch == 2 && out_ch == 1 {
                        ( frame[ 0 ] + frame[ 1 ] ) * 0.5
                    } else {
                        // Duplicate the last source channel into extra outputs
                        frame[ ch.min( src_ch - 1 ) ]
                    };
                }
            }
            frames * out_ch
        };

        output[ written.. ].fill( 0.0 );

        if volume != 1.0 {
            for sample in output[ ..written ].iter_mut() {
                *sample *= volume;
            }
        }

        written
    }


    /// Returns true if the buffer is empty.
    pub fn is_empty( &self ) -> bool {
        self.lock().is_empty()
    }


    /// Returns the number of samples currently in the buffer.
    pub fn len( &self ) -> usize {
        self.lock().len()
    }


    /// Clears the buffer.
    pub fn clear( &self ) {
        self.lock().clear();
    }


    pub fn set_paused( &self, paused: bool ) {
        self.paused.store( paused, Ordering::Relaxed );
    }


    pub fn is_paused( &self ) -> bool {
        self.paused.load( Ordering::Relaxed )
    }


    /// Sets the linear gain (0.0 = mute, 1.0 = unity).
    pub fn set_volume( &self, volume: f32 ) {
        self.volume.store( volume.to_bits(), Ordering::Relaxed );
    }
}


/// An open cpal stream draining a [`SampleBuffer`].
///
/// Not Send/Sync because of `cpal::Stream`; keep it on the playback loop thread.
pub struct CpalStream {
    stream: cpal::Stream,
    sample_rate: u32,
}


impl CpalStream {
    /// Opens the default output device for the given source format.
    ///
    /// Returns the stream and the buffer the decode thread should fill.
    pub fn open(
        source_sample_rate: u32,
        source_channels: u16,
    ) -> Result<( Self, Arc<SampleBuffer> ), OutputError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or( OutputError::NoDevice )?;

        tracing::debug!( "Using output device: {:?}", device.name() );

        let supported_configs: Vec<_> = device
            .supported_output_configs()
            .map_err( |e| OutputError::StreamConfig( e.to_string() ) )?
            .collect();

        let supports_rate = |c: &cpal::SupportedStreamConfigRange| {
            c.min_sample_rate().0 <= source_sample_rate
                && c.max_sample_rate().0 >= source_sample_rate
        };

        // Prefer exact channel count, then any layout at the source rate, then the default
        let config = if let Some( range ) = supported_configs
            .iter()
            .find( |c| c.channels() == source_channels && supports_rate( *c ) )
            .or_else( || supported_configs.iter().find( |c| supports_rate( *c ) ) )
        {
            range.clone()
                .with_sample_rate( cpal::SampleRate( source_sample_rate ) )
                .config()
        } else {
            let default_config = device
                .default_output_config()
                .map_err( |e| OutputError::StreamConfig( e.to_string() ) )?;
            tracing::info!(
                "Device has no {} Hz mode, resampling to {} Hz",
                source_sample_rate,
                default_config.sample_rate().0
            );
            default_config.config()
        };

        // About 500ms of audio
        let buffer_capacity = ( source_sample_rate as usize ) * ( source_channels as usize ) / 2;
        let sample_buffer = Arc::new( SampleBuffer::new(
            buffer_capacity,
            source_channels,
            config.channels,
        ));
        let callback_buffer = Arc::clone( &sample_buffer );

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    callback_buffer.pop( data );
                },
                |err| {
                    tracing::error!( "Audio output error: {}", err );
                },
                None,
            )
            .map_err( |e| OutputError::BuildStream( e.to_string() ) )?;

        Ok((
            Self {
                stream,
                sample_rate: config.sample_rate.0,
            },
            sample_buffer,
        ))
    }


    /// Starts audio output.
    pub fn play( &self ) -> Result<(), OutputError> {
        self.stream
            .play()
            .map_err( |e| OutputError::PlayStream( e.to_string() ) )
    }


    /// Gets the actual device sample rate.
    pub fn sample_rate( &self ) -> u32 {
        self.sample_rate
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_pop_mono_to_stereo_duplicates() {
        let buf = SampleBuffer::new( 16, 1, 2 );
        buf.push( &[ 0.25, 0.5 ] );

        let mut out = [ 9.0; 6 ];
        let written = buf.pop( &mut out );

        assert_eq!( written, 4 );
        assert_eq!( out, [ 0.25, 0.25, 0.5, 0.5, 0.0, 0.0 ] );
    }


    #[test]
    fn test_pop_applies_gain_and_silences_when_paused() {
        let buf = SampleBuffer::new( 16, 2, 2 );
        buf.push( &[ 1.0, 1.0 ] );
        buf.set_volume( 0.5 );

        buf.set_paused( true );
        let mut out = [ 1.0; 2 ];
        assert_eq!( buf.pop( &mut out ), 0 );
        assert_eq!( out, [ 0.0, 0.0 ] );

        buf.set_paused( false );
        assert_eq!( buf.pop( &mut out ), 2 );
        assert_eq!( out, [ 0.5, 0.5 ] );
        assert!( buf.is_empty() );
    }


    #[test]
    fn test_push_respects_capacity() {
        let buf = SampleBuffer::new( 3, 1, 1 );
        assert_eq!( buf.push( &[ 0.1, 0.2, 0.3, 0.4 ] ), 3 );
        assert_eq!( buf.len(), 3 );
    }
}
