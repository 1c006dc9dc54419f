//! Physical display power
//!
//! Only the handheld builds can switch the panel off. Everything here is
//! best-effort: a missing sysfs node is logged and otherwise ignored.

use std::fs;
use std::path::{ Path, PathBuf };


/// Turns the physical display on and off.
pub trait DisplayPower {
    fn on( &mut self );

    fn off( &mut self );
}


/// True on the ARM Linux handhelds where the backlight is reachable.
pub fn supports_power_control() -> bool {
    cfg!( target_os = "linux" ) && matches!( std::env::consts::ARCH, "aarch64" | "arm" )
}


/// Backlight control through sysfs, with a framebuffer blank fallback.
#[derive( Debug, Clone )]
pub struct Backlight {
    brightness: PathBuf,
    max_brightness: PathBuf,
    fb_blank: PathBuf,
}


impl Backlight {
    /// Brightness used when `max_brightness` cannot be read.
    const FALLBACK_MAX: &'static str = "128";


    pub fn new() -> Self {
        Self::with_paths(
            "/sys/class/backlight/backlight/brightness",
            "/sys/class/backlight/backlight/max_brightness",
            "/sys/class/graphics/fb0/blank",
        )
    }


    pub fn with_paths(
        brightness: impl Into<PathBuf>,
        max_brightness: impl Into<PathBuf>,
        fb_blank: impl Into<PathBuf>,
    ) -> Self {
        Self {
            brightness: brightness.into(),
            max_brightness: max_brightness.into(),
            fb_blank: fb_blank.into(),
        }
    }


    fn write( &self, path: &Path, value: &str ) -> bool {
        match fs::write( path, value ) {
            Ok(()) => true,
            Err( e ) => {
                tracing::warn!( "Could not write {:?}: {}", path, e );
                false
            }
        }
    }


    fn switch( &self, on: bool ) {
        if self.brightness.exists() {
            let value = if on {
                fs::read_to_string( &self.max_brightness )
                    .map( |s| s.trim().to_string() )
                    .unwrap_or_else( |_| Self::FALLBACK_MAX.to_string() )
            } else {
                "0".to_string()
            };

            if self.write( &self.brightness, &value ) {
                tracing::info!( "Display {}: brightness={}", if on { "on" } else { "off" }, value );
            }
            return;
        }

        if self.fb_blank.exists() {
            if self.write( &self.fb_blank, if on { "0" } else { "1" } ) {
                tracing::info!( "Display {}: fb0 {}", if on { "on" } else { "off" }, if on { "unblank" } else { "blank" } );
            }
            return;
        }

        tracing::warn!( "No way to switch the display {}", if on { "on" } else { "off" } );
    }
}


impl Default for Backlight {
    fn default() -> Self {
        Self::new()
    }
}


impl DisplayPower for Backlight {
    fn on( &mut self ) {
        self.switch( true );
    }


    fn off( &mut self ) {
        self.switch( false );
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use tempfile::TempDir;


    #[test]
    fn test_brightness_uses_max_value() {
        let dir = TempDir::new().unwrap();
        let brightness = dir.path().join( "brightness" );
        let max = dir.path().join( "max_brightness" );
        fs::write( &brightness, "100" ).unwrap();
        fs::write( &max, "255\n" ).unwrap();

        let mut backlight = Backlight::with_paths( &brightness, &max, dir.path().join( "blank" ) );
        backlight.off();
        assert_eq!( fs::read_to_string( &brightness ).unwrap(), "0" );
        backlight.on();
        assert_eq!( fs::read_to_string( &brightness ).unwrap(), "255" );
    }


    #[test]
    fn test_missing_max_brightness_falls_back() {
        let dir = TempDir::new().unwrap();
        let brightness = dir.path().join( "brightness" );
        fs::write( &brightness, "0" ).unwrap();

        let mut backlight = Backlight::with_paths( &brightness, dir.path().join( "nope" ), dir.path().join( "blank" ) );
        backlight.on();
        assert_eq!( fs::read_to_string( &brightness ).unwrap(), "128" );
    }


    #[test]
    fn test_framebuffer_fallback() {
        let dir = TempDir::new().unwrap();
        let blank = dir.path().join( "blank" );
        fs::write( &blank, "0" ).unwrap();

        let mut backlight = Backlight::with_paths( dir.path().join( "none" ), dir.path().join( "none_max" ), &blank );
        backlight.off();
        assert_eq!( fs::read_to_string( &blank ).unwrap(), "1" );
        backlight.on();
        assert_eq!( fs::read_to_string( &blank ).unwrap(), "0" );
    }


    #[test]
    fn test_nothing_available_is_harmless() {
        let dir = TempDir::new().unwrap();
        let mut backlight = Backlight::with_paths( dir.path().join( "a" ), dir.path().join( "b" ), dir.path().join( "c" ) );
        backlight.off();
        backlight.on();
        assert!( !dir.path().join( "a" ).exists() );
    }
}
