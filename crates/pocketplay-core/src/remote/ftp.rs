//! Anonymous FTP service
//!
//! Just enough of RFC 959 for desktop FTP clients to copy music on and off
//! the device: passive data connections, binary transfers, and the usual
//! file management commands. Every path a client names is resolved against
//! a virtual root; `..` never climbs above it.

use std::io;
use std::net::{ IpAddr, SocketAddr };
use std::path::{ Component, Path, PathBuf };
use std::sync::Arc;
use std::time::Duration;

use chrono::{ DateTime, Local };
use tokio::fs::OpenOptions;
use tokio::io::{ AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader };
use tokio::net::{ TcpListener, TcpStream };

use super::{ spawn_service, RemoteError, ServiceHandle };


pub const BANNER: &str = "220 pocketplay FTP server ready.";

/// How long a client gets to open the data connection after PASV/EPSV.
const DATA_ACCEPT_TIMEOUT: Duration = Duration::from_secs( 10 );


/// State of one control connection.
struct FtpSession {
    root: Arc<PathBuf>,
    /// Virtual working directory, always absolute and normalised
    cwd: String,
    logged_in: bool,
    passive: Option<TcpListener>,
    rename_from: Option<PathBuf>,
    local_ip: IpAddr,
}


impl FtpSession {
    fn new( root: Arc<PathBuf>, local_ip: IpAddr ) -> Self {
        Self {
            root,
            cwd: "/".to_string(),
            logged_in: false,
            passive: None,
            rename_from: None,
            local_ip,
        }
    }


    /// Maps a client path to `(virtual, real)`.
    fn resolve( &self, arg: &str ) -> ( String, PathBuf ) {
        let joined = if arg.starts_with( '/' ) {
            arg.to_string()
        } else {
            format!( "{}/{}", self.cwd, arg )
        };

        let mut parts: Vec<String> = Vec::new();
        for component in Path::new( &joined ).components() {
            match component {
                Component::Normal( part ) => parts.push( part.to_string_lossy().into_owned() ),
                Component::ParentDir => {
                    parts.pop();
                }
                _ => {}
            }
        }

        let virtual_path = format!( "/{}", parts.join( "/" ) );
        let real = parts.iter().fold( self.root.to_path_buf(), |path, part| path.join( part ) );
        ( virtual_path, real )
    }


    /// Runs one command. Returns false when the connection should close.
    async fn handle<W>( &mut self, out: &mut W, command: &str, arg: &str ) -> io::Result<bool>
    where
        W: AsyncWrite + Unpin,
    {
        match command {
            "USER" => {
                self.logged_in = false;
                reply( out, "331 Anonymous login okay, send any password." ).await?;
                return Ok( true );
            }
            "PASS" => {
                self.logged_in = true;
                reply( out, "230 Login successful." ).await?;
                return Ok( true );
            }
            "QUIT" => {
                reply( out, "221 Goodbye." ).await?;
                return Ok( false );
            }
            "SYST" => {
                reply( out, "215 UNIX Type: L8" ).await?;
                return Ok( true );
            }
            "FEAT" => {
                reply( out, "211-Features:\r\n EPSV\r\n PASV\r\n SIZE\r\n UTF8\r\n211 End" ).await?;
                return Ok( true );
            }
            "NOOP" => {
                reply( out, "200 NOOP ok." ).await?;
                return Ok( true );
            }
            _ => {}
        }

        if !self.logged_in {
            reply( out, "530 Please login with USER and PASS." ).await?;
            return Ok( true );
        }

        match command {
            "OPTS" => {
                if arg.to_ascii_uppercase().starts_with( "UTF8" ) {
                    reply( out, "200 Always in UTF8 mode." ).await?;
                } else {
                    reply( out, "501 Option not understood." ).await?;
                }
            }
            "PWD" | "XPWD" => {
                reply( out, &format!( "257 \"{}\" is the current directory", self.cwd ) ).await?;
            }
            "CWD" | "CDUP" => {
                let target = if command == "CDUP" { ".." } else { arg };
                let ( virtual_path, real ) = self.resolve( target );
                if is_dir( &real ).await {
                    self.cwd = virtual_path;
                    reply( out, "250 Directory successfully changed." ).await?;
                } else {
                    reply( out, "550 Failed to change directory." ).await?;
                }
            }
            "TYPE" => match arg.to_ascii_uppercase().as_str() {
                "A" | "A N" => reply( out, "200 Switching to ASCII mode." ).await?,
                "I" | "L 8" => reply( out, "200 Switching to Binary mode." ).await?,
                _ => reply( out, "504 Command not implemented for that parameter." ).await?,
            },
            "MODE" => simple_param( out, arg, "S" ).await?,
            "STRU" => simple_param( out, arg, "F" ).await?,
            "PASV" => self.enter_passive( out, false ).await?,
            "EPSV" => self.enter_passive( out, true ).await?,
            "LIST" | "NLST" => {
                // Clients often send `ls` style flags; they are ignored
                let target = if arg.starts_with( '-' ) { "" } else { arg };
                let ( _, real ) = self.resolve( target );
                match listing( &real, command == "LIST" ).await {
                    Ok( text ) => {
                        self.send_data( out, "150 Here comes the directory listing.", |mut data| async move {
                            data.write_all( text.as_bytes() ).await?;
                            data.shutdown().await
                        })
                        .await?;
                    }
                    Err( e ) => {
                        tracing::debug!( "[FTP] LIST {:?} failed: {}", real, e );
                        reply( out, "550 Failed to list directory." ).await?;
                    }
                }
            }
            "RETR" => {
                let ( _, real ) = self.resolve( arg );
                match open_file( &real ).await {
                    Ok(( mut file, size )) => {
                        let opening = format!( "150 Opening BINARY mode data connection for {} ({} bytes).", arg, size );
                        self.send_data( out, &opening, |mut data| async move {
                            tokio::io::copy( &mut file, &mut data ).await?;
                            data.shutdown().await
                        })
                        .await?;
                    }
                    Err( _ ) => reply( out, "550 Failed to open file." ).await?,
                }
            }
            "STOR" | "APPE" => {
                let ( _, real ) = self.resolve( arg );
                let parent_ok = match real.parent() {
                    Some( parent ) => is_dir( parent ).await,
                    None => false,
                };
                if !parent_ok || is_dir( &real ).await {
                    tracing::debug!( "[FTP] Cannot create {:?}", real );
                    reply( out, "553 Could not create file." ).await?;
                    return Ok( true );
                }

                // The file is only touched once the client has connected
                let append = command == "APPE";
                self.send_data( out, "150 Ok to send data.", move |mut data| async move {
                    let mut file = OpenOptions::new()
                        .write( true )
                        .create( true )
                        .append( append )
                        .truncate( !append )
                        .open( &real )
                        .await?;
                    tokio::io::copy( &mut data, &mut file ).await?;
                    file.flush().await
                })
                .await?;
            }
            "DELE" => {
                let ( _, real ) = self.resolve( arg );
                match tokio::fs::remove_file( &real ).await {
                    Ok(()) => reply( out, "250 Delete operation successful." ).await?,
                    Err( _ ) => reply( out, "550 Delete operation failed." ).await?,
                }
            }
            "MKD" | "XMKD" => {
                let ( virtual_path, real ) = self.resolve( arg );
                match tokio::fs::create_dir( &real ).await {
                    Ok(()) => reply( out, &format!( "257 \"{}\" created", virtual_path ) ).await?,
                    Err( _ ) => reply( out, "550 Create directory operation failed." ).await?,
                }
            }
            "RMD" | "XRMD" => {
                let ( virtual_path, real ) = self.resolve( arg );
                let removed = if virtual_path == "/" {
                    false
                } else {
                    tokio::fs::remove_dir( &real ).await.is_ok()
                };
                if removed {
                    reply( out, "250 Remove directory operation successful." ).await?;
                } else {
                    reply( out, "550 Remove directory operation failed." ).await?;
                }
            }
            "RNFR" => {
                let ( _, real ) = self.resolve( arg );
                if tokio::fs::metadata( &real ).await.is_ok() {
                    self.rename_from = Some( real );
                    reply( out, "350 Ready for RNTO." ).await?;
                } else {
                    reply( out, "550 RNFR command failed." ).await?;
                }
            }
            "RNTO" => {
                let Some( from ) = self.rename_from.take() else {
                    reply( out, "503 RNFR required first." ).await?;
                    return Ok( true );
                };
                let ( _, to ) = self.resolve( arg );
                match tokio::fs::rename( &from, &to ).await {
                    Ok(()) => reply( out, "250 Rename successful." ).await?,
                    Err( _ ) => reply( out, "550 Rename failed." ).await?,
                }
            }
            "SIZE" => {
                let ( _, real ) = self.resolve( arg );
                match tokio::fs::metadata( &real ).await {
                    Ok( meta ) if meta.is_file() => reply( out, &format!( "213 {}", meta.len() ) ).await?,
                    _ => reply( out, "550 Could not get file size." ).await?,
                }
            }
            _ => reply( out, "502 Command not implemented." ).await?,
        }

        Ok( true )
    }


    async fn enter_passive<W>( &mut self, out: &mut W, extended: bool ) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let listener = match TcpListener::bind(( self.local_ip, 0 )).await {
            Ok( listener ) => listener,
            Err( e ) => {
                tracing::warn!( "[FTP] Cannot open passive port: {}", e );
                return reply( out, "425 Can't open data connection." ).await;
            }
        };
        let port = listener.local_addr()?.port();

        let message = match ( extended, self.local_ip ) {
            ( true, _ ) => format!( "229 Entering Extended Passive Mode (|||{}|)", port ),
            ( false, IpAddr::V4( ip ) ) => {
                let [ a, b, c, d ] = ip.octets();
                format!( "227 Entering Passive Mode ({},{},{},{},{},{}).", a, b, c, d, port >> 8, port & 0xff )
            }
            ( false, IpAddr::V6( _ ) ) => {
                return reply( out, "522 Use EPSV for IPv6." ).await;
            }
        };

        self.passive = Some( listener );
        reply( out, &message ).await
    }


    /// Accepts the pending data connection and runs `transfer` on it,
    /// wrapping it in the 150/226 replies.
    async fn send_data<W, F, Fut>( &mut self, out: &mut W, opening: &str, transfer: F ) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
        F: FnOnce( TcpStream ) -> Fut,
        Fut: std::future::Future<Output = io::Result<()>>,
    {
        let Some( listener ) = self.passive.take() else {
            return reply( out, "425 Use PASV or EPSV first." ).await;
        };

        reply( out, opening ).await?;

        let data = match tokio::time::timeout( DATA_ACCEPT_TIMEOUT, listener.accept() ).await {
            Ok( Ok(( data, _ )) ) => data,
            _ => return reply( out, "425 Can't open data connection." ).await,
        };

        match transfer( data ).await {
            Ok(()) => reply( out, "226 Transfer complete." ).await,
            Err( e ) => {
                tracing::debug!( "[FTP] Transfer aborted: {}", e );
                reply( out, "426 Connection closed; transfer aborted." ).await
            }
        }
    }
}


async fn reply<W: AsyncWrite + Unpin>( out: &mut W, text: &str ) -> io::Result<()> {
    out.write_all( text.as_bytes() ).await?;
    out.write_all( b"\r\n" ).await?;
    out.flush().await
}


async fn simple_param<W: AsyncWrite + Unpin>( out: &mut W, arg: &str, supported: &str ) -> io::Result<()> {
    if arg.eq_ignore_ascii_case( supported ) {
        reply( out, &format!( "200 Mode set to {}.", supported ) ).await
    } else {
        reply( out, "504 Command not implemented for that parameter." ).await
    }
}


async fn is_dir( path: &Path ) -> bool {
    tokio::fs::metadata( path ).await.map( |m| m.is_dir() ).unwrap_or( false )
}


async fn open_file( path: &Path ) -> io::Result<( tokio::fs::File, u64 )> {
    let file = tokio::fs::File::open( path ).await?;
    let meta = file.metadata().await?;
    if !meta.is_file() {
        return Err( io::Error::new( io::ErrorKind::InvalidInput, "not a file" ) );
    }
    Ok(( file, meta.len() ))
}


/// Directory listing in `ls -l` form, or bare names for NLST.
async fn listing( dir: &Path, long: bool ) -> io::Result<String> {
    let mut entries = tokio::fs::read_dir( dir ).await?;
    let mut lines: Vec<( String, String )> = Vec::new();

    while let Some( entry ) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !long {
            lines.push(( name.clone(), name ));
            continue;
        }

        let Ok( meta ) = entry.metadata().await else {
            continue;
        };
        let modified: DateTime<Local> = meta
            .modified()
            .map( DateTime::from )
            .unwrap_or_else( |_| Local::now() );
        let line = format!(
            "{} 1 owner group {:>12} {} {}",
            if meta.is_dir() { "drwxr-xr-x" } else { "-rw-r--r--" },
            meta.len(),
            modified.format( "%b %d %H:%M" ),
            name,
        );
        lines.push(( name, line ));
    }

    lines.sort();
    Ok( lines.into_iter().map( |( _, line )| line + "\r\n" ).collect() )
}


async fn handle_client( stream: TcpStream, peer: SocketAddr, root: Arc<PathBuf> ) {
    let local_ip = match stream.local_addr() {
        Ok( addr ) => addr.ip(),
        Err( e ) => {
            tracing::warn!( "[FTP] No local address for {}: {}", peer, e );
            return;
        }
    };

    let ( read_half, mut write_half ) = stream.into_split();
    let mut reader = BufReader::new( read_half );
    let mut session = FtpSession::new( root, local_ip );

    if reply( &mut write_half, BANNER ).await.is_err() {
        return;
    }

    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line( &mut line ).await {
            Ok( 0 ) => break,
            Ok( _ ) => {}
            Err( e ) => {
                tracing::debug!( "[FTP] Read error from {}: {}", peer, e );
                break;
            }
        }

        let trimmed = line.trim_end_matches( [ '\r', '\n' ] );
        let ( command, arg ) = trimmed.split_once( ' ' ).unwrap_or(( trimmed, "" ));
        let command = command.to_ascii_uppercase();
        tracing::debug!( "[FTP] {} -> {} {}", peer, command, if command == "PASS" { "****" } else { arg } );

        match session.handle( &mut write_half, &command, arg.trim() ).await {
            Ok( true ) => {}
            Ok( false ) => break,
            Err( e ) => {
                tracing::debug!( "[FTP] Write error to {}: {}", peer, e );
                break;
            }
        }
    }
}


/// Starts the FTP service on `addr`, serving `root` to anonymous clients.
pub async fn serve( addr: &str, root: PathBuf ) -> Result<ServiceHandle, RemoteError> {
    let root = Arc::new( root );
    spawn_service( "FTP", addr, move |stream, peer| handle_client( stream, peer, Arc::clone( &root ) ) ).await
}


#[cfg( test )]
mod tests {
    use super::*;
    use tokio::io::{ AsyncReadExt, AsyncWriteExt };
    use tokio::net::tcp::{ OwnedReadHalf, OwnedWriteHalf };
    use tempfile::TempDir;


    struct Client {
        reader: BufReader<OwnedReadHalf>,
        writer: OwnedWriteHalf,
    }


    impl Client {
        async fn connect( addr: SocketAddr ) -> Self {
            let ( read_half, writer ) = TcpStream::connect( addr ).await.unwrap().into_split();
            let mut client = Self { reader: BufReader::new( read_half ), writer };
            assert_eq!( client.read_reply().await, BANNER );
            client
        }


        async fn read_reply( &mut self ) -> String {
            let mut line = String::new();
            self.reader.read_line( &mut line ).await.unwrap();
            line.trim_end().to_string()
        }


        async fn send( &mut self, command: &str ) -> String {
            self.writer.write_all( format!( "{}\r\n", command ).as_bytes() ).await.unwrap();
            self.read_reply().await
        }


        async fn login( &mut self ) {
            assert!( self.send( "USER anonymous" ).await.starts_with( "331" ) );
            assert!( self.send( "PASS guest" ).await.starts_with( "230" ) );
        }


        async fn passive( &mut self ) -> SocketAddr {
            let reply = self.send( "EPSV" ).await;
            assert!( reply.starts_with( "229" ), "{}", reply );
            let port: u16 = reply
                .rsplit( "|||" )
                .next()
                .and_then( |rest| rest.strip_suffix( "|)" ) )
                .unwrap()
                .parse()
                .unwrap();
            SocketAddr::from(( [ 127, 0, 0, 1 ], port ))
        }
    }


    async fn start( root: &TempDir ) -> ServiceHandle {
        serve( "127.0.0.1:0", root.path().to_path_buf() ).await.unwrap()
    }


    #[tokio::test]
    async fn test_requires_login() {
        let root = TempDir::new().unwrap();
        let handle = start( &root ).await;
        let mut client = Client::connect( handle.local_addr() ).await;

        assert!( client.send( "PWD" ).await.starts_with( "530" ) );
        client.login().await;
        assert_eq!( client.send( "PWD" ).await, "257 \"/\" is the current directory" );
        assert_eq!( client.send( "SYST" ).await, "215 UNIX Type: L8" );
        assert!( client.send( "BOGUS" ).await.starts_with( "502" ) );
        assert_eq!( client.send( "QUIT" ).await, "221 Goodbye." );

        handle.stop( Duration::from_secs( 2 ) ).await;
    }


    #[tokio::test]
    async fn test_paths_stay_inside_root() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir( root.path().join( "music" ) ).unwrap();
        let handle = start( &root ).await;
        let mut client = Client::connect( handle.local_addr() ).await;
        client.login().await;

        assert!( client.send( "CWD ../../.." ).await.starts_with( "250" ) );
        assert_eq!( client.send( "PWD" ).await, "257 \"/\" is the current directory" );

        assert!( client.send( "CWD music" ).await.starts_with( "250" ) );
        assert_eq!( client.send( "PWD" ).await, "257 \"/music\" is the current directory" );
        assert!( client.send( "CDUP" ).await.starts_with( "250" ) );
        assert!( client.send( "CWD nope" ).await.starts_with( "550" ) );
        assert!( client.send( "RMD /" ).await.starts_with( "550" ) );

        handle.stop( Duration::from_secs( 2 ) ).await;
    }


    #[tokio::test]
    async fn test_store_retrieve_and_manage() {
        let root = TempDir::new().unwrap();
        let handle = start( &root ).await;
        let mut client = Client::connect( handle.local_addr() ).await;
        client.login().await;

        assert!( client.send( "TYPE I" ).await.starts_with( "200" ) );
        assert_eq!( client.send( "MKD songs" ).await, "257 \"/songs\" created" );
        assert!( client.send( "CWD songs" ).await.starts_with( "250" ) );

        // Upload
        let data_addr = client.passive().await;
        client.writer.write_all( b"STOR track.mp3\r\n" ).await.unwrap();
        let mut data = TcpStream::connect( data_addr ).await.unwrap();
        assert!( client.read_reply().await.starts_with( "150" ) );
        data.write_all( b"ID3 fake audio" ).await.unwrap();
        drop( data );
        assert_eq!( client.read_reply().await, "226 Transfer complete." );
        assert_eq!( std::fs::read( root.path().join( "songs/track.mp3" ) ).unwrap(), b"ID3 fake audio" );
        assert_eq!( client.send( "SIZE track.mp3" ).await, "213 14" );

        // Download
        let data_addr = client.passive().await;
        client.writer.write_all( b"RETR track.mp3\r\n" ).await.unwrap();
        let mut data = TcpStream::connect( data_addr ).await.unwrap();
        assert!( client.read_reply().await.starts_with( "150" ) );
        let mut body = Vec::new();
        data.read_to_end( &mut body ).await.unwrap();
        assert_eq!( body, b"ID3 fake audio" );
        assert_eq!( client.read_reply().await, "226 Transfer complete." );

        // Listing
        let data_addr = client.passive().await;
        client.writer.write_all( b"LIST -la\r\n" ).await.unwrap();
        let mut data = TcpStream::connect( data_addr ).await.unwrap();
        assert!( client.read_reply().await.starts_with( "150" ) );
        let mut text = String::new();
        data.read_to_string( &mut text ).await.unwrap();
        assert!( text.starts_with( "-rw-r--r--" ) );
        assert!( text.trim_end().ends_with( "track.mp3" ) );
        assert_eq!( client.read_reply().await, "226 Transfer complete." );

        // Rename and delete
        assert!( client.send( "RNTO other.mp3" ).await.starts_with( "503" ) );
        assert!( client.send( "RNFR track.mp3" ).await.starts_with( "350" ) );
        assert!( client.send( "RNTO renamed.mp3" ).await.starts_with( "250" ) );
        assert!( root.path().join( "songs/renamed.mp3" ).exists() );
        assert!( client.send( "DELE renamed.mp3" ).await.starts_with( "250" ) );
        assert!( client.send( "CDUP" ).await.starts_with( "250" ) );
        assert!( client.send( "RMD songs" ).await.starts_with( "250" ) );
        assert!( !root.path().join( "songs" ).exists() );

        handle.stop( Duration::from_secs( 2 ) ).await;
    }


    #[tokio::test]
    async fn test_transfer_without_passive_is_refused() {
        let root = TempDir::new().unwrap();
        std::fs::write( root.path().join( "a.mp3" ), b"x" ).unwrap();
        let handle = start( &root ).await;
        let mut client = Client::connect( handle.local_addr() ).await;
        client.login().await;

        assert!( client.send( "RETR a.mp3" ).await.starts_with( "425" ) );
        assert!( client.send( "RETR ../../etc/passwd" ).await.starts_with( "550" ) );

        // A refused upload leaves the existing file alone
        assert!( client.send( "STOR a.mp3" ).await.starts_with( "425" ) );
        assert_eq!( std::fs::read( root.path().join( "a.mp3" ) ).unwrap(), b"x" );
        assert!( client.send( "STOR missing/b.mp3" ).await.starts_with( "553" ) );

        handle.stop( Duration::from_secs( 2 ) ).await;
    }
}
