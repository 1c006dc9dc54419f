//! Device-backed audio output
//!
//! [`DeviceOutput`] implements [`AudioOutput`] on top of the Symphonia
//! decoder, a rubato resampler and a cpal stream. Each started track gets
//! its own decode thread which fills the shared sample buffer.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{ AtomicBool, Ordering };
use std::thread;
use std::time::Duration;

use rubato::{ FastFixedOut, PolynomialDegree, Resampler };

use crate::decoder::Decoder;
use crate::output::{ AudioOutput, CpalStream, OutputError, SampleBuffer, TrackHandle, MAX_GAIN };


/// Converts planar samples back to interleaved format.
/// [[L0, L1, ...], [R0, R1, ...]] → [L0, R0, L1, R1, ...]
fn interleave( channels: &[Vec<f32>] ) -> Vec<f32> {
    if channels.is_empty() || channels[ 0 ].is_empty() {
        return Vec::new();
    }
    let frames = channels[ 0 ].len();
    let mut out = Vec::with_capacity( frames * channels.len() );
    for f in 0..frames {
        for ch in channels {
            out.push( ch[ f ] );
        }
    }
    out
}


/// State of the track currently going out to the device.
struct Playback {
    stop_flag: Arc<AtomicBool>,
    sample_buffer: Arc<SampleBuffer>,
    // Dropping the stream closes the device
    _stream: CpalStream,
    thread: Option<thread::JoinHandle<()>>,
    /// Set by the decode thread once EOF is reached and the buffer drained
    finished: Arc<AtomicBool>,
}


impl Playback {
    fn halt( mut self ) {
        self.stop_flag.store( true, Ordering::Relaxed );
        self.sample_buffer.clear();
        if let Some( thread ) = self.thread.take() {
            let _ = thread.join();
        }
    }
}


/// Audio output driving the system's default device.
pub struct DeviceOutput {
    next_id: u64,
    pending: Option<( u64, Decoder )>,
    playback: Option<Playback>,
    gain: u8,
}


impl DeviceOutput {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            pending: None,
            playback: None,
            gain: MAX_GAIN,
        }
    }


    fn linear_gain( &self ) -> f32 {
        self.gain as f32 / MAX_GAIN as f32
    }


    fn take_decoder( &mut self, handle: &TrackHandle ) -> Result<Decoder, OutputError> {
        match self.pending.take() {
            Some(( id, decoder )) if id == handle.id => Ok( decoder ),
            _ => Decoder::open( handle.path() ).map_err( |source| OutputError::Load {
                path: handle.path().to_path_buf(),
                source,
            }),
        }
    }


    /// The decode loop that runs in a separate thread.
    fn decode_loop(
        mut decoder: Decoder,
        sample_buffer: Arc<SampleBuffer>,
        stop_flag: Arc<AtomicBool>,
        mut resampler: Option<FastFixedOut<f32>>,
        finished: Arc<AtomicBool>,
    ) {
        let channels = decoder.channels();
        let mut resample_input: Vec<Vec<f32>> = ( 0..channels ).map( |_| Vec::new() ).collect();

        // Keep about 50ms decoded ahead of the device
        let target_buffer = ( decoder.sample_rate() as usize * channels ) / 20;

        let push_all = |samples: &[f32]| {
            let mut offset = 0;
            while offset < samples.len() && !stop_flag.load( Ordering::Relaxed ) {
                let pushed = sample_buffer.push( &samples[ offset.. ] );
                offset += pushed;
                if pushed == 0 {
                    thread::sleep( Duration::from_millis( 5 ) );
                }
            }
        };

        loop {
            if stop_flag.load( Ordering::Relaxed ) {
                tracing::debug!( "Decode loop: stop signal received" );
                return;
            }

            if sample_buffer.is_paused() || sample_buffer.len() > target_buffer {
                thread::sleep( Duration::from_millis( 5 ) );
                continue;
            }

            match decoder.decode_next() {
                Ok( Some( samples ) ) => {
                    let Some( resampler ) = resampler.as_mut() else {
                        push_all( &samples );
                        continue;
                    };

                    for frame in samples.chunks( channels ) {
                        for ( ch, sample ) in frame.iter().enumerate() {
                            resample_input[ ch ].push( *sample );
                        }
                    }

                    while resample_input[ 0 ].len() >= resampler.input_frames_next() {
                        let needed = resampler.input_frames_next();
                        let chunk: Vec<Vec<f32>> = resample_input
                            .iter_mut()
                            .map( |ch| ch.drain( ..needed ).collect() )
                            .collect();

                        match resampler.process( &chunk, None ) {
                            Ok( resampled ) => push_all( &interleave( &resampled ) ),
                            Err( e ) => {
                                tracing::error!( "Resample error: {}", e );
                                break;
                            }
                        }
                    }
                }
                Ok( None ) => {
                    if let Some( resampler ) = resampler.as_mut() {
                        if !resample_input[ 0 ].is_empty() {
                            match resampler.process_partial( Some( &resample_input ), None ) {
                                Ok( resampled ) => push_all( &interleave( &resampled ) ),
                                Err( e ) => tracing::error!( "Final resample error: {}", e ),
                            }
                        }
                    }

                    tracing::debug!( "Decode loop: reached end of file" );
                    while !sample_buffer.is_empty() && !stop_flag.load( Ordering::Relaxed ) {
                        thread::sleep( Duration::from_millis( 10 ) );
                    }
                    break;
                }
                Err( e ) => {
                    tracing::error!( "Decode error: {}", e );
                    break;
                }
            }
        }

        finished.store( true, Ordering::Relaxed );
    }
}


impl Default for DeviceOutput {
    fn default() -> Self {
        Self::new()
    }
}


impl AudioOutput for DeviceOutput {
    fn load_track( &mut self, path: &Path ) -> Result<TrackHandle, OutputError> {
        let decoder = Decoder::open( path ).map_err( |source| OutputError::Load {
            path: path.to_path_buf(),
            source,
        })?;

        let id = self.next_id;
        self.next_id += 1;
        self.pending = Some(( id, decoder ));

        Ok( TrackHandle::new( id, path.to_path_buf() ) )
    }


    fn play( &mut self, handle: &TrackHandle ) -> Result<(), OutputError> {
        let decoder = self.take_decoder( handle )?;
        let source_rate = decoder.sample_rate();
        let channels = decoder.channels() as u16;

        // Build the new stream before touching the old one so a failure leaves it running
        let ( stream, sample_buffer ) = CpalStream::open( source_rate, channels )?;
        sample_buffer.set_volume( self.linear_gain() );

        let target_rate = stream.sample_rate();
        let resampler = if source_rate != target_rate {
            tracing::info!( "Resampling: {} Hz → {} Hz", source_rate, target_rate );
            let resampler = FastFixedOut::<f32>::new(
                target_rate as f64 / source_rate as f64,
                2.0,
                PolynomialDegree::Cubic,
                1024,
                channels as usize,
            ).map_err( |e| OutputError::Resampler( e.to_string() ) )?;
            Some( resampler )
        } else {
            None
        };

        stream.play()?;

        if let Some( previous ) = self.playback.take() {
            previous.halt();
        }

        let stop_flag = Arc::new( AtomicBool::new( false ) );
        let finished = Arc::new( AtomicBool::new( false ) );

        let thread = {
            let sample_buffer = Arc::clone( &sample_buffer );
            let stop_flag = Arc::clone( &stop_flag );
            let finished = Arc::clone( &finished );
            thread::spawn( move || {
                Self::decode_loop( decoder, sample_buffer, stop_flag, resampler, finished );
            })
        };

        tracing::info!( "Playing: {:?}", handle.path() );

        self.playback = Some( Playback {
            stop_flag,
            sample_buffer,
            _stream: stream,
            thread: Some( thread ),
            finished,
        });

        Ok(())
    }


    fn pause( &mut self ) {
        if let Some( playback ) = &self.playback {
            playback.sample_buffer.set_paused( true );
        }
    }


    fn resume( &mut self ) {
        if let Some( playback ) = &self.playback {
            playback.sample_buffer.set_paused( false );
        }
    }


    fn stop( &mut self ) {
        self.pending = None;
        if let Some( playback ) = self.playback.take() {
            playback.halt();
            tracing::debug!( "Output stopped" );
        }
    }


    fn is_playing( &self ) -> bool {
        self.playback
            .as_ref()
            .map( |p| !p.finished.load( Ordering::Relaxed ) )
            .unwrap_or( false )
    }


    fn set_volume( &mut self, gain: u8 ) {
        self.gain = gain.min( MAX_GAIN );
        if let Some( playback ) = &self.playback {
            playback.sample_buffer.set_volume( self.linear_gain() );
        }
    }
}


impl Drop for DeviceOutput {
    fn drop( &mut self ) {
        self.stop();
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_interleave() {
        let planar = vec![ vec![ 1.0, 2.0 ], vec![ 3.0, 4.0 ] ];
        assert_eq!( interleave( &planar ), vec![ 1.0, 3.0, 2.0, 4.0 ] );
    }


    #[test]
    fn test_load_missing_file_fails() {
        let mut output = DeviceOutput::new();
        let err = output.load_track( Path::new( "/nonexistent/track.mp3" ) ).unwrap_err();
        assert!( matches!( err, OutputError::Load { .. } ) );
        assert!( !output.is_playing() );
    }
}
