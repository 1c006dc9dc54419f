//! Library browser
//!
//! Lists one directory at a time: a `..` entry when there is a parent,
//! then sub-directories, then mp3 files. File entries are named after
//! their title tag so the browser reads like a track list.

use std::fs;
use std::path::{ Path, PathBuf };

use thiserror::Error;

use crate::metadata;


/// The only extension the player lists and plays.
const TRACK_EXTENSION: &str = ".mp3";


/// Errors that can occur while browsing.
#[derive( Debug, Error )]
pub enum BrowserError {
    #[error( "Not a directory: {0:?}" )]
    NotADirectory( PathBuf ),
}


#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum EntryKind {
    Dir,
    File,
}


/// A file or directory entry in the browser.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct BrowserEntry {
    pub name: String,
    pub kind: EntryKind,
    pub path: PathBuf,
}


impl BrowserEntry {
    pub fn is_dir( &self ) -> bool {
        self.kind == EntryKind::Dir
    }
}


/// Directory cursor plus its listing.
#[derive( Debug )]
pub struct LibraryBrowser {
    current_dir: PathBuf,
    entries: Vec<BrowserEntry>,
    selected: usize,
}


impl LibraryBrowser {
    /// Creates a browser positioned at `path`.
    pub fn new( path: impl Into<PathBuf> ) -> Result<Self, BrowserError> {
        let mut browser = Self {
            current_dir: PathBuf::new(),
            entries: Vec::new(),
            selected: 0,
        };
        browser.set_directory( path )?;
        Ok( browser )
    }


    /// Moves the cursor to `path` and rebuilds the listing.
    ///
    /// The cursor is left alone if `path` is not a directory.
    pub fn set_directory( &mut self, path: impl Into<PathBuf> ) -> Result<(), BrowserError> {
        let path = path.into();
        if !path.is_dir() {
            return Err( BrowserError::NotADirectory( path ) );
        }

        self.current_dir = path;
        self.refresh();
        Ok(())
    }


    /// Re-reads the current directory.
    pub fn refresh( &mut self ) {
        self.entries.clear();
        self.selected = 0;

        if let Some( parent ) = self.current_dir.parent() {
            self.entries.push( BrowserEntry {
                name: "..".to_string(),
                kind: EntryKind::Dir,
                path: parent.to_path_buf(),
            });
        }

        let read_dir = match fs::read_dir( &self.current_dir ) {
            Ok( read_dir ) => read_dir,
            Err( e ) => {
                tracing::warn!( "Error listing {:?}: {}", self.current_dir, e );
                return;
            }
        };

        let mut dirs = Vec::new();
        let mut files = Vec::new();

        for entry in read_dir.flatten() {
            let path = entry.path();
            let file_name = entry.file_name().to_string_lossy().to_string();

            if path.is_dir() {
                dirs.push(( file_name, path ));
            } else if is_track_name( &file_name ) {
                files.push(( file_name, path ));
            }
        }

        dirs.sort();
        files.sort();

        self.entries.extend( dirs.into_iter().map( |( name, path )| BrowserEntry {
            name,
            kind: EntryKind::Dir,
            path,
        }));
        self.entries.extend( files.into_iter().map( |( _, path )| BrowserEntry {
            name: metadata::display_title( &path ),
            kind: EntryKind::File,
            path,
        }));
    }


    /// Goes up to the parent directory. Returns false at the filesystem root.
    pub fn go_up( &mut self ) -> bool {
        let Some( parent ) = self.current_dir.parent().map( Path::to_path_buf ) else {
            return false;
        };
        self.set_directory( parent ).is_ok()
    }


    pub fn entries( &self ) -> &[BrowserEntry] {
        &self.entries
    }


    /// Paths of every file entry, in listing order.
    pub fn playable_paths( &self ) -> Vec<PathBuf> {
        self.entries
            .iter()
            .filter( |e| e.kind == EntryKind::File )
            .map( |e| e.path.clone() )
            .collect()
    }


    /// Moves selection down, stopping at the last entry.
    pub fn select_next( &mut self ) {
        if self.selected + 1 < self.entries.len() {
            self.selected += 1;
        }
    }


    /// Moves selection up, stopping at the first entry.
    pub fn select_previous( &mut self ) {
        self.selected = self.selected.saturating_sub( 1 );
    }


    pub fn selected_entry( &self ) -> Option<&BrowserEntry> {
        self.entries.get( self.selected )
    }


    pub fn selected_index( &self ) -> usize {
        self.selected
    }


    pub fn current_dir( &self ) -> &Path {
        &self.current_dir
    }
}


fn is_track_name( name: &str ) -> bool {
    name.to_lowercase().ends_with( TRACK_EXTENSION )
}


/// Collects the mp3 files directly inside each existing directory of `dirs`.
///
/// Paths are made absolute and de-duplicated; order follows `dirs`, then
/// file name.
pub fn scan_music_dirs( dirs: &[PathBuf] ) -> Vec<PathBuf> {
    let mut tracks: Vec<PathBuf> = Vec::new();

    for dir in dirs.iter().filter( |d| d.is_dir() ) {
        let dir = std::path::absolute( dir ).unwrap_or_else( |_| dir.clone() );
        let Ok( read_dir ) = fs::read_dir( &dir ) else {
            tracing::warn!( "Could not scan {:?}", dir );
            continue;
        };

        let mut found: Vec<PathBuf> = read_dir
            .flatten()
            .map( |e| e.path() )
            .filter( |p| p.is_file() )
            .filter( |p| p.file_name().map( |n| is_track_name( &n.to_string_lossy() ) ).unwrap_or( false ) )
            .collect();
        found.sort();

        for path in found {
            if !tracks.contains( &path ) {
                tracks.push( path );
            }
        }
    }

    tracing::info!( "Found {} tracks in {:?}", tracks.len(), dirs );
    tracks
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::testing::wav_with_title;
    use tempfile::TempDir;


    fn library() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir( dir.path().join( "b_album" ) ).unwrap();
        fs::create_dir( dir.path().join( "a_album" ) ).unwrap();
        fs::write( dir.path().join( "02 second.mp3" ), b"" ).unwrap();
        fs::write( dir.path().join( "01 first.MP3" ), b"" ).unwrap();
        fs::write( dir.path().join( "cover.jpg" ), b"" ).unwrap();
        fs::write( dir.path().join( "notes.txt" ), b"" ).unwrap();
        dir
    }


    #[test]
    fn test_listing_order() {
        let dir = library();
        let browser = LibraryBrowser::new( dir.path() ).unwrap();

        let names: Vec<&str> = browser.entries().iter().map( |e| e.name.as_str() ).collect();
        // Untagged files fall back to their file name
        assert_eq!( names, vec![ "..", "a_album", "b_album", "01 first.MP3", "02 second.mp3" ] );
        assert_eq!( browser.entries()[ 0 ].path, dir.path().parent().unwrap() );
    }


    #[test]
    fn test_tagged_file_listed_by_title() {
        let dir = TempDir::new().unwrap();
        // The container is found by content, not by extension
        fs::write( dir.path().join( "03 third.mp3" ), wav_with_title( "Harbour Lights" ) ).unwrap();

        let browser = LibraryBrowser::new( dir.path() ).unwrap();
        let names: Vec<&str> = browser.entries().iter().map( |e| e.name.as_str() ).collect();
        assert_eq!( names, vec![ "..", "Harbour Lights" ] );
    }


    #[test]
    fn test_playable_paths_are_files_only() {
        let dir = library();
        let browser = LibraryBrowser::new( dir.path() ).unwrap();
        assert_eq!(
            browser.playable_paths(),
            vec![ dir.path().join( "01 first.MP3" ), dir.path().join( "02 second.mp3" ) ]
        );
    }


    #[test]
    fn test_set_directory_rejects_files() {
        let dir = library();
        let mut browser = LibraryBrowser::new( dir.path() ).unwrap();
        let err = browser.set_directory( dir.path().join( "notes.txt" ) ).unwrap_err();
        assert!( matches!( err, BrowserError::NotADirectory( _ ) ) );
        assert_eq!( browser.current_dir(), dir.path() );
    }


    #[test]
    fn test_selection_does_not_wrap_and_resets() {
        let dir = library();
        let mut browser = LibraryBrowser::new( dir.path() ).unwrap();

        browser.select_previous();
        assert_eq!( browser.selected_index(), 0 );
        for _ in 0..10 {
            browser.select_next();
        }
        assert_eq!( browser.selected_index(), 4 );

        browser.set_directory( dir.path().join( "a_album" ) ).unwrap();
        assert_eq!( browser.selected_index(), 0 );
        assert_eq!( browser.entries().len(), 1 );
    }


    #[test]
    fn test_go_up() {
        let dir = library();
        let mut browser = LibraryBrowser::new( dir.path().join( "a_album" ) ).unwrap();
        assert!( browser.go_up() );
        assert_eq!( browser.current_dir(), dir.path() );
    }


    #[test]
    fn test_root_has_no_parent_entry() {
        let browser = LibraryBrowser::new( "/" ).unwrap();
        assert!( browser.entries().iter().all( |e| e.name != ".." ) );
    }


    #[test]
    fn test_scan_music_dirs_skips_missing() {
        let dir = library();
        let tracks = scan_music_dirs( &[ dir.path().join( "missing" ), dir.path().to_path_buf() ] );
        assert_eq!( tracks.len(), 2 );
        assert!( tracks.iter().all( |p| p.is_absolute() ) );
    }
}
