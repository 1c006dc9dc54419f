//! Track metadata reading
//!
//! Reads display titles and embedded cover art from a file's tag container.
//! Everything here is a pure function of the file on disk.

use std::path::{ Path, PathBuf };

use symphonia::core::meta::{ MetadataRevision, StandardTagKey, StandardVisualKey };

use crate::decoder;


/// A playable track as shown by the player screen.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct Track {
    pub path: PathBuf,
    pub display_title: String,
    pub cover: Option<Vec<u8>>,
}


impl Track {
    /// Resolves title and cover art for the file at `path`.
    pub fn resolve( path: &Path ) -> Self {
        let mut tags = TagSnapshot::read( path );
        let display_title = tags.title.take().unwrap_or_else( || file_name( path ) );

        Self {
            path: path.to_path_buf(),
            display_title,
            cover: tags.cover,
        }
    }
}


/// Title and cover pulled from both the probe and container metadata.
#[derive( Debug, Default )]
struct TagSnapshot {
    title: Option<String>,
    cover: Option<Vec<u8>>,
}


impl TagSnapshot {
    fn read( path: &Path ) -> Self {
        let mut snapshot = Self::default();

        let mut probed = match decoder::probe( path ) {
            Ok( probed ) => probed,
            Err( e ) => {
                tracing::debug!( "No tags for {:?}: {}", path, e );
                return snapshot;
            }
        };

        // ID3v2 and friends arrive through the probe, container tags via the reader
        if let Some( log ) = probed.metadata.get() {
            if let Some( rev ) = log.current() {
                snapshot.absorb( rev );
            }
        }
        if let Some( rev ) = probed.format.metadata().current() {
            snapshot.absorb( rev );
        }

        snapshot
    }


    fn absorb( &mut self, rev: &MetadataRevision ) {
        if self.title.is_none() {
            self.title = rev.tags()
                .iter()
                .find( |tag| tag.std_key == Some( StandardTagKey::TrackTitle ) )
                .map( |tag| tag.value.to_string().trim_end_matches( '\0' ).to_string() )
                .filter( |title| !title.trim().is_empty() );
        }

        if self.cover.is_none() {
            let visuals = rev.visuals();
            let front = visuals
                .iter()
                .find( |v| v.usage == Some( StandardVisualKey::FrontCover ) )
                .or_else( || visuals.first() );
            self.cover = front.map( |v| v.data.to_vec() );
        }
    }
}


/// Reads the title tag, if the file has one.
pub fn read_title( path: &Path ) -> Option<String> {
    TagSnapshot::read( path ).title
}


/// Reads the embedded cover picture (front cover preferred).
pub fn read_cover( path: &Path ) -> Option<Vec<u8>> {
    TagSnapshot::read( path ).cover
}


/// Title for list and player display, falling back to the file name.
pub fn display_title( path: &Path ) -> String {
    read_title( path ).unwrap_or_else( || file_name( path ) )
}


fn file_name( path: &Path ) -> String {
    path.file_name()
        .map( |n| n.to_string_lossy().into_owned() )
        .unwrap_or_else( || path.display().to_string() )
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::testing::wav_with_title;


    #[test]
    fn test_display_title_falls_back_to_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "Untagged Song.mp3" );
        std::fs::write( &path, b"not really audio" ).unwrap();

        assert_eq!( display_title( &path ), "Untagged Song.mp3" );
        assert_eq!( read_cover( &path ), None );
    }


    #[test]
    fn test_title_comes_from_tags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "track01.wav" );
        std::fs::write( &path, wav_with_title( "Night Drive" ) ).unwrap();

        assert_eq!( read_title( &path ).as_deref(), Some( "Night Drive" ) );
        assert_eq!( display_title( &path ), "Night Drive" );

        let track = Track::resolve( &path );
        assert_eq!( track.display_title, "Night Drive" );
        assert!( track.cover.is_none() );
    }


    #[test]
    fn test_resolve_missing_file() {
        let track = Track::resolve( Path::new( "/nonexistent/dir/track.mp3" ) );
        assert_eq!( track.display_title, "track.mp3" );
        assert!( track.cover.is_none() );
    }
}
