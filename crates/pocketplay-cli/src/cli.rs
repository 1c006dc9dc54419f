//! Command-line argument parsing for pocketplay.

use std::path::PathBuf;

use clap::Parser;


/// pocketplay - a music player for handheld consoles.
#[derive( Parser, Debug )]
#[command( name = "pocketplay" )]
#[command( version, about, long_about = None )]
pub struct Args {
    /// Directory to open in the browser on startup.
    #[arg( short, long )]
    pub path: Option<PathBuf>,

    /// Gamepad button profile (r36t-max, r36t, r36s-ultra).
    #[arg( long )]
    pub profile: Option<String>,

    /// Port for the FTP service.
    #[arg( long )]
    pub ftp_port: Option<u16>,

    /// Port for the line command console.
    #[arg( long )]
    pub line_port: Option<u16>,

    /// Do not start the remote services.
    #[arg( long )]
    pub no_remote: bool,

    /// Start in the browser screen.
    #[arg( short, long )]
    pub browse: bool,
}
