//! Line command console
//!
//! A telnet-friendly text protocol: one command per line, a `> ` prompt
//! after every response. Each connection keeps its own working directory.

use std::io;
use std::net::SocketAddr;
use std::path::{ Component, Path, PathBuf };
use std::sync::Arc;

use tokio::io::{ AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader };
use tokio::net::TcpStream;

use super::{ spawn_service, RemoteError, ServiceHandle };


const GREETING: &[u8] = b"Welcome to pocketplay Telnet Server\r\nType 'help' for commands, 'exit' to disconnect.\r\n> ";
const PROMPT: &[u8] = b"\r\n> ";

/// `cat` never returns more than this many bytes of a file.
pub const CAT_LIMIT: usize = 2048;
const TRUNCATED_MARKER: &str = "\n... (truncated)";

/// Longest command line accepted, newline included.
pub const MAX_LINE: usize = 1024;
const LINE_TOO_LONG: &str = "Error: line too long";


/// What the connection should do after a command.
#[derive( Debug, Clone, PartialEq, Eq )]
pub enum Outcome {
    /// Blank line; just prompt again
    Prompt,
    Reply( String ),
    /// Send the text, then close
    Hangup( String ),
}


/// Per-connection command interpreter.
#[derive( Debug, Clone )]
pub struct LineSession {
    cwd: PathBuf,
}


impl LineSession {
    pub fn new( cwd: impl Into<PathBuf> ) -> Self {
        Self { cwd: cwd.into() }
    }


    pub fn cwd( &self ) -> &Path {
        &self.cwd
    }


    /// Runs one command line. Commands are case-insensitive.
    pub async fn execute( &mut self, line: &str ) -> Outcome {
        let mut parts = line.split_whitespace();
        let Some( command ) = parts.next() else {
            return Outcome::Prompt;
        };
        let command = command.to_lowercase();
        let arg = parts.next();

        let reply = match command.as_str() {
            "help" => "Commands: hello, status, ls, cd <dir>, cat <file>, exit".to_string(),
            "hello" => "Hello there!".to_string(),
            "status" => "Server is running smoothly.".to_string(),
            "ls" => self.list().await,
            "cd" => match arg {
                Some( target ) => self.change_dir( target ).await,
                None => "Usage: cd <directory>".to_string(),
            },
            "cat" => match arg {
                Some( target ) => self.cat( target ).await,
                None => "Usage: cat <file>".to_string(),
            },
            "exit" => return Outcome::Hangup( "Goodbye!".to_string() ),
            _ => format!( "Unknown command: {}", command ),
        };

        Outcome::Reply( reply )
    }


    async fn list( &self ) -> String {
        match read_names( &self.cwd ).await {
            Ok( mut names ) => {
                names.sort();
                names.join( "\n" )
            }
            Err( e ) => format!( "Error listing directory: {}", e ),
        }
    }


    async fn change_dir( &mut self, target: &str ) -> String {
        let path = normalize( &self.cwd.join( target ) );
        match tokio::fs::metadata( &path ).await {
            Ok( meta ) if meta.is_dir() => {
                let message = format!( "Changed directory to {}", path.display() );
                self.cwd = path;
                message
            }
            _ => format!( "Directory not found: {}", target ),
        }
    }


    async fn cat( &self, target: &str ) -> String {
        let path = normalize( &self.cwd.join( target ) );
        match tokio::fs::metadata( &path ).await {
            Ok( meta ) if meta.is_file() => {}
            _ => return format!( "File not found: {}", target ),
        }

        match read_head( &path ).await {
            Ok( mut bytes ) => {
                let clipped = bytes.len() > CAT_LIMIT;
                if clipped {
                    bytes.truncate( CAT_LIMIT );
                    bytes.truncate( char_boundary( &bytes ) );
                }
                let mut text = String::from_utf8_lossy( &bytes ).into_owned();
                if clipped {
                    text.push_str( TRUNCATED_MARKER );
                }
                text
            }
            Err( e ) => format!( "Error reading file: {}", e ),
        }
    }
}


async fn read_names( dir: &Path ) -> io::Result<Vec<String>> {
    let mut entries = tokio::fs::read_dir( dir ).await?;
    let mut names = Vec::new();
    while let Some( entry ) = entries.next_entry().await? {
        names.push( entry.file_name().to_string_lossy().into_owned() );
    }
    Ok( names )
}


/// Reads one byte past the limit so the caller can tell a clipped file.
async fn read_head( path: &Path ) -> io::Result<Vec<u8>> {
    let file = tokio::fs::File::open( path ).await?;
    let mut bytes = Vec::with_capacity( CAT_LIMIT + 1 );
    file.take( CAT_LIMIT as u64 + 1 ).read_to_end( &mut bytes ).await?;
    Ok( bytes )
}


/// Length of `bytes` without a multibyte character cut off at the end.
fn char_boundary( bytes: &[u8] ) -> usize {
    match std::str::from_utf8( bytes ) {
        // An error without a length is an incomplete sequence at the very end
        Err( e ) if e.error_len().is_none() => e.valid_up_to(),
        _ => bytes.len(),
    }
}


/// How a capped line read ended.
#[derive( Debug, PartialEq, Eq )]
enum LineRead {
    Eof,
    Line,
    TooLong,
}


/// Reads one line of at most [`MAX_LINE`] bytes into `buf`. An overlong
/// line is skipped up to its newline without being buffered.
async fn read_line_capped<R>( reader: &mut R, buf: &mut Vec<u8> ) -> io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    if ( &mut *reader ).take( MAX_LINE as u64 ).read_until( b'\n', buf ).await? == 0 {
        return Ok( LineRead::Eof );
    }
    if buf.last() == Some( &b'\n' ) || buf.len() < MAX_LINE {
        return Ok( LineRead::Line );
    }

    loop {
        buf.clear();
        if ( &mut *reader ).take( MAX_LINE as u64 ).read_until( b'\n', buf ).await? == 0
            || buf.last() == Some( &b'\n' )
        {
            buf.clear();
            return Ok( LineRead::TooLong );
        }
    }
}


/// Resolves `.` and `..` without touching the filesystem.
pub(crate) fn normalize( path: &Path ) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push( other ),
        }
    }
    out
}


async fn handle_client( stream: TcpStream, peer: SocketAddr, root: Arc<PathBuf> ) {
    let ( read_half, mut write_half ) = stream.into_split();
    let mut reader = BufReader::new( read_half );

    if write_half.write_all( GREETING ).await.is_err() {
        return;
    }

    let mut session = LineSession::new( root.as_path() );
    let mut buf = Vec::new();

    loop {
        let outcome = match read_line_capped( &mut reader, &mut buf ).await {
            Ok( LineRead::Eof ) => break,
            Ok( LineRead::Line ) => session.execute( &String::from_utf8_lossy( &buf ) ).await,
            Ok( LineRead::TooLong ) => {
                tracing::debug!( "[Line] Overlong line from {}", peer );
                Outcome::Reply( LINE_TOO_LONG.to_string() )
            }
            Err( e ) => {
                tracing::debug!( "[Line] Read error from {}: {}", peer, e );
                break;
            }
        };

        let ( response, close ) = match outcome {
            Outcome::Prompt => ( b"> ".to_vec(), false ),
            Outcome::Reply( text ) => ( [ text.as_bytes(), PROMPT ].concat(), false ),
            Outcome::Hangup( text ) => ( [ text.as_bytes(), PROMPT ].concat(), true ),
        };

        if write_half.write_all( &response ).await.is_err() || close {
            break;
        }
    }
}


/// Starts the console on `addr`. New connections start in `root`.
pub async fn serve( addr: &str, root: PathBuf ) -> Result<ServiceHandle, RemoteError> {
    let root = Arc::new( root );
    spawn_service( "Line", addr, move |stream, peer| handle_client( stream, peer, Arc::clone( &root ) ) ).await
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;


    fn reply( outcome: Outcome ) -> String {
        match outcome {
            Outcome::Reply( text ) => text,
            other => panic!( "expected a reply, got {:?}", other ),
        }
    }


    #[tokio::test]
    async fn test_fixed_texts() {
        let mut session = LineSession::new( "/" );
        assert_eq!( reply( session.execute( "HELP" ).await ), "Commands: hello, status, ls, cd <dir>, cat <file>, exit" );
        assert_eq!( reply( session.execute( "hello\r\n" ).await ), "Hello there!" );
        assert_eq!( reply( session.execute( "status" ).await ), "Server is running smoothly." );
        assert_eq!( reply( session.execute( "Dance now" ).await ), "Unknown command: dance" );
        assert_eq!( session.execute( "   \r\n" ).await, Outcome::Prompt );
        assert_eq!( session.execute( "exit" ).await, Outcome::Hangup( "Goodbye!".to_string() ) );
    }


    #[tokio::test]
    async fn test_cd_and_ls() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir( dir.path().join( "music" ) ).unwrap();
        std::fs::write( dir.path().join( "b.txt" ), "b" ).unwrap();
        std::fs::write( dir.path().join( "a.txt" ), "a" ).unwrap();

        let mut session = LineSession::new( dir.path() );
        assert_eq!( reply( session.execute( "ls" ).await ), "a.txt\nb.txt\nmusic" );

        assert_eq!( reply( session.execute( "cd" ).await ), "Usage: cd <directory>" );
        assert_eq!( reply( session.execute( "cd nowhere" ).await ), "Directory not found: nowhere" );
        assert_eq!( reply( session.execute( "cd a.txt" ).await ), "Directory not found: a.txt" );
        assert_eq!( session.cwd(), dir.path() );

        let expected = format!( "Changed directory to {}", dir.path().join( "music" ).display() );
        assert_eq!( reply( session.execute( "cd music" ).await ), expected );
        session.execute( "cd .." ).await;
        assert_eq!( session.cwd(), dir.path() );
    }


    #[tokio::test]
    async fn test_cat_limits_output() {
        let dir = TempDir::new().unwrap();
        std::fs::write( dir.path().join( "short.txt" ), "hi there" ).unwrap();
        std::fs::write( dir.path().join( "exact.txt" ), "x".repeat( CAT_LIMIT ) ).unwrap();
        std::fs::write( dir.path().join( "long.txt" ), "y".repeat( CAT_LIMIT + 10 ) ).unwrap();

        let mut session = LineSession::new( dir.path() );
        assert_eq!( reply( session.execute( "cat short.txt" ).await ), "hi there" );
        assert_eq!( reply( session.execute( "cat exact.txt" ).await ).len(), CAT_LIMIT );

        let long = reply( session.execute( "cat long.txt" ).await );
        assert!( long.ends_with( TRUNCATED_MARKER ) );
        assert_eq!( long.len(), CAT_LIMIT + TRUNCATED_MARKER.len() );

        assert_eq!( reply( session.execute( "cat" ).await ), "Usage: cat <file>" );
        assert_eq!( reply( session.execute( "cat missing.txt" ).await ), "File not found: missing.txt" );
    }


    #[tokio::test]
    async fn test_cat_does_not_split_characters() {
        let dir = TempDir::new().unwrap();
        // The two-byte character straddles the limit
        let content = format!( "{}é and more", "x".repeat( CAT_LIMIT - 1 ) );
        std::fs::write( dir.path().join( "accents.txt" ), content ).unwrap();

        let mut session = LineSession::new( dir.path() );
        let text = reply( session.execute( "cat accents.txt" ).await );
        assert!( !text.contains( char::REPLACEMENT_CHARACTER ) );
        assert_eq!( text, format!( "{}{}", "x".repeat( CAT_LIMIT - 1 ), TRUNCATED_MARKER ) );
    }


    #[tokio::test]
    async fn test_overlong_line_is_rejected() {
        let input = [ vec![ b'a'; MAX_LINE * 3 ], b"\nhello\n".to_vec() ].concat();
        let mut reader = BufReader::new( input.as_slice() );
        let mut buf = Vec::new();

        assert_eq!( read_line_capped( &mut reader, &mut buf ).await.unwrap(), LineRead::TooLong );
        assert_eq!( read_line_capped( &mut reader, &mut buf ).await.unwrap(), LineRead::Line );
        assert_eq!( buf, b"hello\n" );
        assert_eq!( read_line_capped( &mut reader, &mut buf ).await.unwrap(), LineRead::Eof );
    }


    #[tokio::test]
    async fn test_overlong_line_gets_error_reply() {
        let dir = TempDir::new().unwrap();
        let handle = serve( "127.0.0.1:0", dir.path().to_path_buf() ).await.unwrap();
        let mut client = BufReader::new( TcpStream::connect( handle.local_addr() ).await.unwrap() );

        let mut line = String::new();
        client.read_line( &mut line ).await.unwrap();
        client.read_line( &mut line ).await.unwrap();

        let flood = [ vec![ b'z'; MAX_LINE * 4 ], b"\nhello\n".to_vec() ].concat();
        client.get_mut().write_all( &flood ).await.unwrap();

        line.clear();
        client.read_line( &mut line ).await.unwrap();
        assert!( line.contains( LINE_TOO_LONG ) );
        line.clear();
        client.read_line( &mut line ).await.unwrap();
        assert!( line.contains( "Hello there!" ) );

        assert!( handle.stop( Duration::from_secs( 2 ) ).await );
    }


    #[test]
    fn test_normalize() {
        assert_eq!( normalize( Path::new( "/a/b/../c/./d" ) ), PathBuf::from( "/a/c/d" ) );
        assert_eq!( normalize( Path::new( "/../.." ) ), PathBuf::from( "/" ) );
    }


    #[tokio::test]
    async fn test_connections_have_independent_directories() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir( dir.path().join( "sub" ) ).unwrap();
        let handle = serve( "127.0.0.1:0", dir.path().to_path_buf() ).await.unwrap();

        let mut first = BufReader::new( TcpStream::connect( handle.local_addr() ).await.unwrap() );
        let mut second = BufReader::new( TcpStream::connect( handle.local_addr() ).await.unwrap() );

        // Greeting is two lines, the prompt has no newline
        let mut line = String::new();
        for client in [ &mut first, &mut second ] {
            client.read_line( &mut line ).await.unwrap();
            client.read_line( &mut line ).await.unwrap();
        }

        first.get_mut().write_all( b"cd sub\n" ).await.unwrap();
        line.clear();
        first.read_line( &mut line ).await.unwrap();
        assert!( line.contains( "Changed directory to" ) );

        second.get_mut().write_all( b"> ignored\nls\n" ).await.unwrap();
        // Skip to the `ls` reply: the first reply is the unknown-command line
        line.clear();
        second.read_line( &mut line ).await.unwrap();
        assert!( line.contains( "Unknown command: >" ) );
        line.clear();
        second.read_line( &mut line ).await.unwrap();
        assert!( line.contains( "sub" ) );

        second.get_mut().write_all( b"exit\n" ).await.unwrap();
        let mut rest = String::new();
        second.read_to_string( &mut rest ).await.unwrap();
        assert!( rest.contains( "Goodbye!" ) );

        assert!( handle.stop( Duration::from_secs( 2 ) ).await );
    }
}
