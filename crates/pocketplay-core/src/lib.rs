//! pocketplay core - playback session for a handheld music player
//!
//! This crate provides the playback engine and its audio device, the input
//! mapping for keyboards and handheld gamepads, the library browser, and the
//! remote administration services that run alongside playback.

pub mod browser;
pub mod decoder;
pub mod device;
pub mod display;
pub mod engine;
pub mod input;
pub mod metadata;
pub mod output;
pub mod playlist;
pub mod remote;
pub mod session;
pub mod volume;

#[cfg( test )]
mod testing;

pub use browser::{ BrowserEntry, BrowserError, EntryKind, LibraryBrowser };
pub use device::DeviceOutput;
pub use display::{ Backlight, DisplayPower };
pub use engine::{ PlaybackEngine, PlaybackState };
pub use input::{ Action, ButtonProfile, InputEvent, InputMapper, InputMode };
pub use metadata::Track;
pub use output::{ AudioOutput, OutputError };
pub use playlist::{ Playlist, PlaylistError, RepeatMode };
pub use remote::{ RemoteAdmin, RemoteConfig };
pub use session::{ Flow, IdleTimeouts, Session };
pub use volume::SystemVolume;
