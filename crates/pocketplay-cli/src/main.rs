//! pocketplay - terminal music player for handheld consoles

mod cli;
mod gamepad;
mod input;
mod settings;
mod ui;

use std::fs::{ self, OpenOptions };
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{ Duration, Instant };

use anyhow::{ Context, Result };
use clap::Parser;
use crossterm::{
    event::{ self, Event },
    terminal::{ disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen },
    ExecutableCommand,
};
use ratatui::prelude::*;
use tracing_subscriber::EnvFilter;

use cli::Args;
use gamepad::Gamepads;
use settings::Settings;
use ui::View;

use pocketplay_core::browser::scan_music_dirs;
use pocketplay_core::display::supports_power_control;
use pocketplay_core::input::InputEvent;
use pocketplay_core::remote::DEFAULT_STOP_TIMEOUT;
use pocketplay_core::session::Flow;
use pocketplay_core::volume::system_volume;
use pocketplay_core::{
    Backlight, DeviceOutput, DisplayPower, InputMapper, InputMode, LibraryBrowser,
    PlaybackEngine, RemoteAdmin, Session,
};


/// Pause between frames when no input is pending.
const FRAME_INTERVAL: Duration = Duration::from_millis( 33 );


/// Sends logs to a file; the terminal belongs to the UI.
fn init_logging() -> Result<Option<PathBuf>> {
    let Some( dir ) = dirs::data_local_dir().map( |d| d.join( "pocketplay" ) ) else {
        return Ok( None );
    };
    fs::create_dir_all( &dir ).with_context( || format!( "creating log directory {:?}", dir ) )?;

    let log_path = dir.join( "pocketplay.log" );
    let log_file = OpenOptions::new()
        .create( true )
        .append( true )
        .open( &log_path )
        .with_context( || format!( "opening log file {:?}", log_path ) )?;

    let filter = EnvFilter::try_from_env( "POCKETPLAY_LOG" ).unwrap_or_else( |_| EnvFilter::new( "info" ) );
    tracing_subscriber::fmt()
        .with_writer( Mutex::new( log_file ) )
        .with_ansi( false )
        .with_env_filter( filter )
        .init();

    Ok( Some( log_path ) )
}


/// Builds the session from settings and arguments.
fn build_session( args: &Args, settings: &Settings ) -> Result<Session> {
    let volume = system_volume( settings.volume_poll_interval() );
    let mut engine = PlaybackEngine::new( Box::new( DeviceOutput::new() ), volume, settings.default_volume );

    let tracks = scan_music_dirs( &settings.music_dirs );
    tracing::info!( "Found {} tracks in music directories", tracks.len() );
    if !tracks.is_empty() {
        engine.load_playlist( tracks, 0 )?;
    }

    let start_dir = match args.path.clone().or_else( || settings.first_music_dir() ) {
        Some( dir ) => dir,
        None => std::env::current_dir().context( "reading working directory" )?,
    };
    let browser = LibraryBrowser::new( start_dir.clone() )
        .with_context( || format!( "opening {:?}", start_dir ) )?;

    let display: Option<Box<dyn DisplayPower>> = if supports_power_control() {
        Some( Box::new( Backlight::new() ) )
    } else {
        None
    };

    let mapper = InputMapper::new( settings.button_profile() );
    tracing::info!( "Button profile: {}", mapper.profile().name );

    let mut session = Session::new( engine, browser, mapper, display, settings.idle_timeouts(), Instant::now() );
    if args.browse {
        session.set_mode( InputMode::Browser );
    }

    Ok( session )
}


fn start_remote( settings: &Settings ) -> Option<RemoteAdmin> {
    if !settings.remote_enabled {
        tracing::info!( "Remote services disabled" );
        return None;
    }

    match RemoteAdmin::start( &settings.remote_config() ) {
        Ok( remote ) => Some( remote ),
        Err( e ) => {
            tracing::error!( "Failed to start remote services: {}", e );
            None
        }
    }
}


fn remote_status( remote: Option<&RemoteAdmin> ) -> String {
    let Some( remote ) = remote else {
        return String::new();
    };

    let mut parts = Vec::new();
    if let Some( addr ) = remote.ftp_addr() {
        parts.push( format!( "FTP:{}", addr.port() ) );
    }
    if let Some( addr ) = remote.line_addr() {
        parts.push( format!( "Line:{}", addr.port() ) );
    }
    parts.join( " " )
}


/// Collects every key event already waiting, blocking up to one frame for
/// the first, then whatever the gamepads sent meanwhile.
fn pending_events( gamepads: &Gamepads ) -> Result<Vec<InputEvent>> {
    let mut events = Vec::new();
    let mut timeout = FRAME_INTERVAL;

    while event::poll( timeout )? {
        if let Event::Key( key ) = event::read()? {
            events.extend( input::to_input_event( key ) );
        }
        timeout = Duration::ZERO;
    }

    events.extend( gamepads.drain() );
    Ok( events )
}


fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    io::stdout().execute( EnterAlternateScreen )?;
    Ok( Terminal::new( CrosstermBackend::new( io::stdout() ) )? )
}


fn restore_terminal() -> Result<()> {
    disable_raw_mode()?;
    io::stdout().execute( LeaveAlternateScreen )?;
    Ok(())
}


fn run<B, E>( terminal: &mut Terminal<B>, session: &mut Session, view: &mut View, mut next_events: E ) -> Result<()>
where
    B: Backend,
    E: FnMut() -> Result<Vec<InputEvent>>,
{
    loop {
        let events = next_events()?;
        let now = Instant::now();

        if session.frame( events, now ) == Flow::Quit {
            return Ok(());
        }

        view.update( session, now );
        terminal.draw( |frame| ui::draw( frame, session, view ) )?;
    }
}


/// Runs the UI, then shuts the session down whether or not the terminal
/// could be set up or the loop failed.
fn run_session<B, E>(
    setup: impl FnOnce() -> Result<Terminal<B>>,
    restore: impl FnOnce() -> Result<()>,
    mut session: Session,
    remote: Option<RemoteAdmin>,
    view: &mut View,
    next_events: E,
) -> Result<()>
where
    B: Backend,
    E: FnMut() -> Result<Vec<InputEvent>>,
{
    let result = setup().and_then( |mut terminal| run( &mut terminal, &mut session, view, next_events ) );
    let restored = restore();

    session.shutdown( remote, DEFAULT_STOP_TIMEOUT );

    if let Err( e ) = &result {
        tracing::error!( "Exiting after error: {:#}", e );
    }
    result.and( restored )
}


fn main() -> Result<()> {
    let args = Args::parse();

    let log_path = init_logging()?;
    tracing::info!( "pocketplay starting, log file {:?}", log_path );

    let mut settings = Settings::load();
    settings.apply_args( &args );

    let session = build_session( &args, &settings )?;
    let gamepads = Gamepads::open();
    let remote = start_remote( &settings );
    let mut view = View::new( remote_status( remote.as_ref() ) );

    run_session( setup_terminal, restore_terminal, session, remote, &mut view, || pending_events( &gamepads ) )
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::net::TcpStream;
    use std::sync::Arc;
    use pocketplay_core::input::{ ButtonProfile, Key };
    use pocketplay_core::remote::RemoteConfig;
    use pocketplay_core::session::IdleTimeouts;
    use pocketplay_core::volume::MemoryVolume;
    use ratatui::backend::TestBackend;
    use tempfile::TempDir;


    fn session( dir: &TempDir ) -> Session {
        let engine = PlaybackEngine::new( Box::new( DeviceOutput::new() ), Arc::new( MemoryVolume::new( 50 ) ), 40 );
        let browser = LibraryBrowser::new( dir.path() ).unwrap();
        let mapper = InputMapper::new( ButtonProfile::default() );
        Session::new( engine, browser, mapper, None, IdleTimeouts::default(), Instant::now() )
    }


    fn remote( dir: &TempDir ) -> RemoteAdmin {
        let config = RemoteConfig {
            bind_address: "127.0.0.1".to_string(),
            ftp_port: 0,
            line_port: 0,
            root: dir.path().to_path_buf(),
        };
        RemoteAdmin::start( &config ).unwrap()
    }


    #[test]
    fn test_failed_terminal_setup_still_shuts_down() {
        let dir = TempDir::new().unwrap();
        let remote = remote( &dir );
        let line_addr = remote.line_addr().unwrap();
        let restored = Cell::new( false );

        let result = run_session(
            || -> Result<Terminal<TestBackend>> { Err( anyhow::anyhow!( "no tty" ) ) },
            || {
                restored.set( true );
                Ok(())
            },
            session( &dir ),
            Some( remote ),
            &mut View::new( String::new() ),
            || Ok( Vec::new() ),
        );

        assert!( result.is_err() );
        assert!( restored.get() );
        assert!( TcpStream::connect( line_addr ).is_err() );
    }


    #[test]
    fn test_quit_key_ends_the_loop() {
        let dir = TempDir::new().unwrap();
        let mut frames = 0;

        let result = run_session(
            || Ok( Terminal::new( TestBackend::new( 60, 20 ) )? ),
            || Ok(()),
            session( &dir ),
            None,
            &mut View::new( String::new() ),
            || {
                frames += 1;
                if frames < 3 {
                    Ok( Vec::new() )
                } else {
                    Ok( vec![ InputEvent::Key( Key::Char( 'q' ) ) ] )
                }
            },
        );

        assert!( result.is_ok() );
        assert_eq!( frames, 3 );
    }
}
