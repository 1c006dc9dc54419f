//! Application settings management
//!
//! Settings live in `settings.json` under the user's config directory. Any
//! field missing from the file takes its default, and command-line flags
//! override whatever was loaded.

use std::fs;
use std::path::{ Path, PathBuf };
use std::time::Duration;

use serde::{ Deserialize, Serialize };

use pocketplay_core::input::ButtonProfile;
use pocketplay_core::remote::RemoteConfig;
use pocketplay_core::session::IdleTimeouts;
use pocketplay_core::volume::DEFAULT_POLL_INTERVAL;

use crate::cli::Args;


/// Application settings.
#[derive( Debug, Clone, PartialEq, Eq, Serialize, Deserialize )]
#[serde( default )]
pub struct Settings {
    /// Port of the FTP service
    pub ftp_port: u16,

    /// Port of the line command console
    pub line_port: u16,

    /// Address both remote services bind to
    pub bind_address: String,

    /// Start the remote services at all
    pub remote_enabled: bool,

    /// Directory served remotely; the working directory when unset
    pub remote_root: Option<PathBuf>,

    /// Directories scanned for the startup playlist, in order
    pub music_dirs: Vec<PathBuf>,

    /// Gamepad button layout
    pub profile: String,

    pub screensaver_secs: u64,

    pub display_off_secs: u64,

    /// Minimum seconds between system mixer queries
    pub volume_poll_secs: u64,

    /// Volume (percent) applied at startup when the system reports mute
    pub default_volume: u8,
}


impl Default for Settings {
    fn default() -> Self {
        Self {
            ftp_port: 2121,
            line_port: 2323,
            bind_address: "0.0.0.0".to_string(),
            remote_enabled: true,
            remote_root: None,
            music_dirs: vec![ PathBuf::from( "music" ), PathBuf::from( "/storage/roms/music" ) ],
            profile: ButtonProfile::R36T_MAX.name.to_string(),
            screensaver_secs: 30,
            display_off_secs: 35,
            volume_poll_secs: DEFAULT_POLL_INTERVAL.as_secs(),
            default_volume: 40,
        }
    }
}


impl Settings {
    /// Returns the path to the settings file.
    pub fn settings_path() -> Option<PathBuf> {
        dirs::config_dir().map( |p| p.join( "pocketplay" ).join( "settings.json" ) )
    }


    /// Loads settings from disk, writing the defaults on first run.
    pub fn load() -> Self {
        let Some( path ) = Self::settings_path() else {
            return Self::default();
        };

        if !path.exists() {
            let settings = Self::default();
            settings.save_to( &path );
            return settings;
        }

        Self::load_from( &path )
    }


    /// Loads settings from `path`, falling back to defaults on any error.
    pub fn load_from( path: &Path ) -> Self {
        match fs::read_to_string( path ) {
            Ok( contents ) => serde_json::from_str( &contents ).unwrap_or_else( |e| {
                tracing::warn!( "Invalid settings in {:?}: {}", path, e );
                Self::default()
            }),
            Err( e ) => {
                tracing::warn!( "Failed to read settings: {}", e );
                Self::default()
            }
        }
    }


    /// Saves settings to `path`.
    pub fn save_to( &self, path: &Path ) {
        // Create parent directory if needed
        if let Some( parent ) = path.parent() {
            if !parent.exists() {
                if let Err( e ) = fs::create_dir_all( parent ) {
                    tracing::warn!( "Failed to create settings directory: {}", e );
                    return;
                }
            }
        }

        match serde_json::to_string_pretty( self ) {
            Ok( json ) => {
                if let Err( e ) = fs::write( path, json ) {
                    tracing::warn!( "Failed to save settings: {}", e );
                }
            }
            Err( e ) => {
                tracing::warn!( "Failed to serialize settings: {}", e );
            }
        }
    }


    /// Applies command-line overrides.
    pub fn apply_args( &mut self, args: &Args ) {
        if let Some( profile ) = &args.profile {
            self.profile = profile.clone();
        }
        if let Some( port ) = args.ftp_port {
            self.ftp_port = port;
        }
        if let Some( port ) = args.line_port {
            self.line_port = port;
        }
        if args.no_remote {
            self.remote_enabled = false;
        }
    }


    /// The configured button profile, or the default for an unknown name.
    pub fn button_profile( &self ) -> ButtonProfile {
        ButtonProfile::by_name( &self.profile ).unwrap_or_else( || {
            tracing::warn!( "Unknown button profile {:?}, using {}", self.profile, ButtonProfile::default().name );
            ButtonProfile::default()
        })
    }


    /// Idle timeouts; the display never powers off before the screensaver starts.
    pub fn idle_timeouts( &self ) -> IdleTimeouts {
        let screensaver = Duration::from_secs( self.screensaver_secs );
        let display_off = Duration::from_secs( self.display_off_secs ).max( screensaver );
        IdleTimeouts { screensaver, display_off }
    }


    pub fn volume_poll_interval( &self ) -> Duration {
        Duration::from_secs( self.volume_poll_secs )
    }


    pub fn remote_config( &self ) -> RemoteConfig {
        RemoteConfig {
            bind_address: self.bind_address.clone(),
            ftp_port: self.ftp_port,
            line_port: self.line_port,
            root: self.remote_root.clone().unwrap_or_else( || PathBuf::from( "." ) ),
        }
    }


    /// First configured music directory that exists.
    pub fn first_music_dir( &self ) -> Option<PathBuf> {
        self.music_dirs.iter().find( |d| d.is_dir() ).cloned()
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::TempDir;


    #[test]
    fn test_missing_fields_take_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join( "settings.json" );
        fs::write( &path, r#"{ "ftp_port": 2200, "profile": "r36t" }"# ).unwrap();

        let settings = Settings::load_from( &path );
        assert_eq!( settings.ftp_port, 2200 );
        assert_eq!( settings.button_profile(), ButtonProfile::R36T );
        assert_eq!( settings.line_port, 2323 );
        assert_eq!( settings.default_volume, 40 );
        assert_eq!( settings.volume_poll_interval(), DEFAULT_POLL_INTERVAL );
    }


    #[test]
    fn test_invalid_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join( "settings.json" );
        fs::write( &path, "not json" ).unwrap();
        assert_eq!( Settings::load_from( &path ), Settings::default() );
    }


    #[test]
    fn test_save_creates_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join( "nested" ).join( "settings.json" );

        let mut settings = Settings::default();
        settings.remote_enabled = false;
        settings.save_to( &path );

        assert_eq!( Settings::load_from( &path ), settings );
    }


    #[test]
    fn test_args_override() {
        let args = Args::parse_from( [ "pocketplay", "--ftp-port", "3000", "--no-remote", "--profile", "r36s-ultra" ] );
        let mut settings = Settings::default();
        settings.apply_args( &args );

        assert_eq!( settings.ftp_port, 3000 );
        assert!( !settings.remote_enabled );
        assert_eq!( settings.button_profile(), ButtonProfile::R36S_ULTRA );
    }


    #[test]
    fn test_display_off_not_before_screensaver() {
        let settings = Settings { screensaver_secs: 60, display_off_secs: 10, ..Settings::default() };
        let timeouts = settings.idle_timeouts();
        assert_eq!( timeouts.display_off, Duration::from_secs( 60 ) );
    }
}
