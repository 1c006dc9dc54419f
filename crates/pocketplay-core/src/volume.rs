//! Host system volume
//!
//! The system mixer is the source of truth for the player's volume. Reading
//! it can be slow (spawning `amixer` on Linux), so [`CachedVolume`] serves a
//! cached value and refreshes it on a background thread at most once per
//! poll interval.

use std::process::Command;
use std::sync::atomic::{ AtomicBool, AtomicU8, Ordering };
use std::sync::{ Arc, Mutex };
use std::thread;
use std::time::{ Duration, Instant };


/// Default minimum interval between live mixer queries.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs( 2 );


/// Host volume as a percentage. Both operations are best-effort.
pub trait SystemVolume: Send + Sync {
    /// Current volume, 0–100. Must not block the caller.
    fn get( &self ) -> u8;

    /// Sets the volume, 0–100. Values above 100 are clamped.
    fn set( &self, percent: u8 );
}


/// A platform mixer that can be queried and written synchronously.
pub trait VolumeBackend: Send + Sync + 'static {
    fn read( &self ) -> Option<u8>;

    fn write( &self, percent: u8 ) -> bool;
}


/// ALSA mixer accessed through the `amixer` command line tool.
#[derive( Debug, Clone )]
pub struct AlsaMixer {
    control: String,
}


impl AlsaMixer {
    /// Mixer controls tried in order when looking for a usable one.
    pub const CONTROLS: &'static [&'static str] = &[ "Master", "PCM", "Headphone", "Speaker", "Digital" ];


    /// Finds the first control `amixer` knows about.
    pub fn detect() -> Option<Self> {
        let control = Self::CONTROLS.iter().find( |control| {
            Command::new( "amixer" )
                .args( [ "get", **control ] )
                .output()
                .map( |out| out.status.success() )
                .unwrap_or( false )
        })?;

        tracing::info!( "Using ALSA mixer control: {}", control );
        Some( Self { control: control.to_string() } )
    }
}


impl VolumeBackend for AlsaMixer {
    fn read( &self ) -> Option<u8> {
        let out = Command::new( "amixer" )
            .args( [ "get", self.control.as_str() ] )
            .output()
            .ok()?;
        parse_amixer_percent( &String::from_utf8_lossy( &out.stdout ) )
    }


    fn write( &self, percent: u8 ) -> bool {
        Command::new( "amixer" )
            .arg( "set" )
            .arg( &self.control )
            .arg( format!( "{}%", percent ) )
            .output()
            .map( |out| out.status.success() )
            .unwrap_or( false )
    }
}


/// Extracts the first `[NN%]` figure from `amixer get` output.
fn parse_amixer_percent( output: &str ) -> Option<u8> {
    output.split( '[' )
        .skip( 1 )
        .find_map( |part| part.split_once( "%]" ) )
        .and_then( |( digits, _ )| digits.parse::<u8>().ok() )
        .map( |p| p.min( 100 ) )
}


/// In-process volume store for platforms without a mixer integration.
#[derive( Debug )]
pub struct MemoryVolume {
    percent: AtomicU8,
}


impl MemoryVolume {
    pub fn new( percent: u8 ) -> Self {
        Self { percent: AtomicU8::new( percent.min( 100 ) ) }
    }
}


impl VolumeBackend for MemoryVolume {
    fn read( &self ) -> Option<u8> {
        Some( self.percent.load( Ordering::Relaxed ) )
    }


    fn write( &self, percent: u8 ) -> bool {
        self.percent.store( percent.min( 100 ), Ordering::Relaxed );
        true
    }
}


impl SystemVolume for MemoryVolume {
    fn get( &self ) -> u8 {
        self.percent.load( Ordering::Relaxed )
    }


    fn set( &self, percent: u8 ) {
        VolumeBackend::write( self, percent );
    }
}


struct Shared<B> {
    backend: B,
    cached: AtomicU8,
    refreshing: AtomicBool,
    last_check: Mutex<Instant>,
    interval: Duration,
}


/// Rate-limited, non-blocking view over a [`VolumeBackend`].
pub struct CachedVolume<B: VolumeBackend> {
    shared: Arc<Shared<B>>,
}


impl<B: VolumeBackend> CachedVolume<B> {
    /// Wraps `backend`, taking one synchronous reading to seed the cache.
    pub fn new( backend: B, interval: Duration ) -> Self {
        let initial = backend.read().unwrap_or( 50 );
        Self {
            shared: Arc::new( Shared {
                backend,
                cached: AtomicU8::new( initial ),
                refreshing: AtomicBool::new( false ),
                last_check: Mutex::new( Instant::now() ),
                interval,
            }),
        }
    }


    fn refresh_due( &self ) -> bool {
        let mut last = self.shared.last_check
            .lock()
            .unwrap_or_else( |poisoned| poisoned.into_inner() );
        if last.elapsed() < self.shared.interval {
            return false;
        }
        *last = Instant::now();
        true
    }
}


impl<B: VolumeBackend> SystemVolume for CachedVolume<B> {
    fn get( &self ) -> u8 {
        if self.refresh_due() && !self.shared.refreshing.swap( true, Ordering::AcqRel ) {
            let shared = Arc::clone( &self.shared );
            thread::spawn( move || {
                if let Some( percent ) = shared.backend.read() {
                    shared.cached.store( percent, Ordering::Relaxed );
                }
                shared.refreshing.store( false, Ordering::Release );
            });
        }

        self.shared.cached.load( Ordering::Relaxed )
    }


    fn set( &self, percent: u8 ) {
        let percent = percent.min( 100 );
        self.shared.cached.store( percent, Ordering::Relaxed );

        let shared = Arc::clone( &self.shared );
        thread::spawn( move || {
            if !shared.backend.write( percent ) {
                tracing::debug!( "System volume write to {}% failed", percent );
            }
        });
    }
}


/// Picks the mixer for the current platform.
pub fn system_volume( interval: Duration ) -> Arc<dyn SystemVolume> {
    if cfg!( target_os = "linux" ) {
        if let Some( mixer ) = AlsaMixer::detect() {
            return Arc::new( CachedVolume::new( mixer, interval ) );
        }
        tracing::warn!( "No ALSA mixer control found, volume is local only" );
    }
    Arc::new( MemoryVolume::new( 50 ) )
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;


    struct CountingBackend {
        reads: Arc<AtomicUsize>,
        value: AtomicU8,
    }


    impl VolumeBackend for CountingBackend {
        fn read( &self ) -> Option<u8> {
            self.reads.fetch_add( 1, Ordering::SeqCst );
            Some( self.value.load( Ordering::SeqCst ) )
        }


        fn write( &self, percent: u8 ) -> bool {
            self.value.store( percent, Ordering::SeqCst );
            true
        }
    }


    fn counting( value: u8 ) -> ( CountingBackend, Arc<AtomicUsize> ) {
        let reads = Arc::new( AtomicUsize::new( 0 ) );
        let backend = CountingBackend { reads: Arc::clone( &reads ), value: AtomicU8::new( value ) };
        ( backend, reads )
    }


    #[test]
    fn test_parse_amixer_percent() {
        let out = "Simple mixer control 'Master',0\n  Mono: Playback 42 [66%] [-12.00dB] [on]\n";
        assert_eq!( parse_amixer_percent( out ), Some( 66 ) );
        assert_eq!( parse_amixer_percent( "no figures here" ), None );
    }


    #[test]
    fn test_cached_volume_serves_cache_within_interval() {
        let ( backend, reads ) = counting( 30 );
        let volume = CachedVolume::new( backend, Duration::from_secs( 3600 ) );

        assert_eq!( volume.get(), 30 );
        assert_eq!( volume.get(), 30 );
        assert_eq!( reads.load( Ordering::SeqCst ), 1 );
    }


    #[test]
    fn test_cached_volume_refreshes_in_background() {
        let ( backend, reads ) = counting( 30 );
        let volume = CachedVolume::new( backend, Duration::ZERO );

        volume.get();
        let deadline = Instant::now() + Duration::from_secs( 2 );
        while reads.load( Ordering::SeqCst ) < 2 && Instant::now() < deadline {
            thread::sleep( Duration::from_millis( 5 ) );
        }
        assert!( reads.load( Ordering::SeqCst ) >= 2 );
    }


    #[test]
    fn test_cached_volume_set_updates_cache_immediately() {
        let ( backend, _reads ) = counting( 30 );
        let volume = CachedVolume::new( backend, Duration::from_secs( 3600 ) );

        volume.set( 150 );
        assert_eq!( volume.get(), 100 );
    }
}
