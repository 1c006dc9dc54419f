//! Remote administration services
//!
//! Two optional TCP services run next to playback: a small anonymous FTP
//! server for moving music onto the device, and a line-oriented command
//! console. They run on their own tokio runtime and share nothing with the
//! playback loop except the filesystem.
//!
//! Each service is supervised by a [`ServiceHandle`]: one task accepts
//! connections, one task serves each client, and all of them end when the
//! handle's cancellation token fires.

pub mod ftp;
pub mod line;

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{ TcpListener, TcpStream };
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;


/// How long [`RemoteAdmin::stop`] waits for client tasks to wind down.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs( 2 );


/// Errors that can occur while starting remote services.
#[derive( Debug, Error )]
pub enum RemoteError {
    #[error( "Failed to start the remote runtime: {0}" )]
    Runtime( #[source] io::Error ),

    #[error( "Failed to bind {addr}: {source}" )]
    Bind { addr: String, source: io::Error },
}


/// Where and what the remote services serve.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct RemoteConfig {
    pub bind_address: String,
    pub ftp_port: u16,
    pub line_port: u16,
    /// Directory exposed over FTP and used as the console's starting point
    pub root: PathBuf,
}


impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            ftp_port: 2121,
            line_port: 2323,
            root: PathBuf::from( "." ),
        }
    }
}


/// A running listener plus the tasks serving its clients.
#[derive( Debug )]
pub struct ServiceHandle {
    name: &'static str,
    local_addr: SocketAddr,
    cancel: CancellationToken,
    tracker: TaskTracker,
}


impl ServiceHandle {
    /// Address the listener is bound to.
    pub fn local_addr( &self ) -> SocketAddr {
        self.local_addr
    }


    /// Stops accepting, drops every open connection and waits for the tasks
    /// to finish. Returns false if they did not finish within `timeout`.
    pub async fn stop( self, timeout: Duration ) -> bool {
        self.cancel.cancel();
        self.tracker.close();

        let finished = tokio::time::timeout( timeout, self.tracker.wait() ).await.is_ok();
        if finished {
            tracing::info!( "[{}] Stopped", self.name );
        } else {
            tracing::warn!( "[{}] Tasks still running after {:?}", self.name, timeout );
        }
        finished
    }
}


/// Binds `addr` and serves every accepted connection with `handler`.
///
/// A cancelled service drops the in-flight handler futures, which closes
/// their sockets.
pub(crate) async fn spawn_service<F, Fut>(
    name: &'static str,
    addr: &str,
    handler: F,
) -> Result<ServiceHandle, RemoteError>
where
    F: Fn( TcpStream, SocketAddr ) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind( addr ).await.map_err( |source| RemoteError::Bind {
        addr: addr.to_string(),
        source,
    })?;
    let local_addr = listener.local_addr().map_err( |source| RemoteError::Bind {
        addr: addr.to_string(),
        source,
    })?;

    tracing::info!( "[{}] Listening on {}", name, local_addr );

    let cancel = CancellationToken::new();
    let tracker = TaskTracker::new();

    let accept_cancel = cancel.clone();
    let accept_tracker = tracker.clone();
    tracker.spawn( async move {
        loop {
            tokio::select! {
                _ = accept_cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(( stream, peer )) => {
                        tracing::info!( "[{}] Connection from {}", name, peer );
                        let client_cancel = accept_cancel.clone();
                        let client = handler( stream, peer );
                        accept_tracker.spawn( async move {
                            tokio::select! {
                                _ = client_cancel.cancelled() => {}
                                _ = client => {}
                            }
                            tracing::debug!( "[{}] {} disconnected", name, peer );
                        });
                    }
                    Err( e ) => {
                        tracing::error!( "[{}] Failed to accept connection: {}", name, e );
                    }
                },
            }
        }
        tracing::debug!( "[{}] Listener closed", name );
    });

    Ok( ServiceHandle { name, local_addr, cancel, tracker } )
}


/// Owns the runtime the remote services run on.
pub struct RemoteAdmin {
    runtime: Runtime,
    ftp: Option<ServiceHandle>,
    line: Option<ServiceHandle>,
}


impl RemoteAdmin {
    /// Starts both services. A service whose port cannot be bound is logged
    /// and left out; only a runtime failure is an error.
    pub fn start( config: &RemoteConfig ) -> Result<Self, RemoteError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads( 2 )
            .thread_name( "pocketplay-remote" )
            .enable_all()
            .build()
            .map_err( RemoteError::Runtime )?;

        let root = std::path::absolute( &config.root ).unwrap_or_else( |_| config.root.clone() );
        let ftp_addr = format!( "{}:{}", config.bind_address, config.ftp_port );
        let line_addr = format!( "{}:{}", config.bind_address, config.line_port );

        let ( ftp, line ) = runtime.block_on( async {
            let ftp = ftp::serve( &ftp_addr, root.clone() ).await;
            let line = line::serve( &line_addr, root.clone() ).await;
            ( ftp, line )
        });

        let ftp = available( "FTP", ftp );
        let line = available( "Line", line );
        tracing::info!( "Remote services rooted at {:?}", root );

        Ok( Self { runtime, ftp, line } )
    }


    pub fn ftp_addr( &self ) -> Option<SocketAddr> {
        self.ftp.as_ref().map( ServiceHandle::local_addr )
    }


    pub fn line_addr( &self ) -> Option<SocketAddr> {
        self.line.as_ref().map( ServiceHandle::local_addr )
    }


    /// Stops both services, then the runtime, waiting at most about `timeout`.
    pub fn stop( mut self, timeout: Duration ) {
        let services: Vec<ServiceHandle> = self.ftp.take().into_iter().chain( self.line.take() ).collect();

        self.runtime.block_on( async {
            for service in services {
                service.stop( timeout ).await;
            }
        });
        self.runtime.shutdown_timeout( timeout );
    }
}


fn available( name: &str, result: Result<ServiceHandle, RemoteError> ) -> Option<ServiceHandle> {
    match result {
        Ok( handle ) => Some( handle ),
        Err( e ) => {
            tracing::error!( "[{}] {}. The service will not be available.", name, e );
            None
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::io::{ BufRead, BufReader, Write };
    use tempfile::TempDir;


    fn local_config( root: &TempDir ) -> RemoteConfig {
        RemoteConfig {
            bind_address: "127.0.0.1".to_string(),
            ftp_port: 0,
            line_port: 0,
            root: root.path().to_path_buf(),
        }
    }


    #[test]
    fn test_start_serves_both_and_stops() {
        let root = TempDir::new().unwrap();
        let admin = RemoteAdmin::start( &local_config( &root ) ).unwrap();

        let ftp = std::net::TcpStream::connect( admin.ftp_addr().unwrap() ).unwrap();
        let mut banner = String::new();
        BufReader::new( &ftp ).read_line( &mut banner ).unwrap();
        assert!( banner.starts_with( "220 " ) );

        let mut line = std::net::TcpStream::connect( admin.line_addr().unwrap() ).unwrap();
        let mut reader = BufReader::new( line.try_clone().unwrap() );
        let mut greeting = String::new();
        reader.read_line( &mut greeting ).unwrap();
        assert!( greeting.starts_with( "Welcome" ) );
        line.write_all( b"hello\n" ).unwrap();

        admin.stop( Duration::from_secs( 2 ) );
    }


    #[test]
    fn test_port_in_use_leaves_other_service_running() {
        let root = TempDir::new().unwrap();
        let taken = std::net::TcpListener::bind( "127.0.0.1:0" ).unwrap();

        let mut config = local_config( &root );
        config.ftp_port = taken.local_addr().unwrap().port();

        let admin = RemoteAdmin::start( &config ).unwrap();
        assert!( admin.ftp_addr().is_none() );
        assert!( admin.line_addr().is_some() );
        admin.stop( Duration::from_secs( 2 ) );
    }


    #[tokio::test]
    async fn test_stop_closes_open_connections() {
        use tokio::io::AsyncReadExt;

        let handle = spawn_service( "test", "127.0.0.1:0", |stream, _peer| async move {
            // Hold the connection open until cancelled
            let _stream = stream;
            std::future::pending::<()>().await;
        })
        .await
        .unwrap();

        let mut client = TcpStream::connect( handle.local_addr() ).await.unwrap();
        tokio::time::sleep( Duration::from_millis( 50 ) ).await;

        assert!( handle.stop( Duration::from_secs( 2 ) ).await );

        let mut buf = [ 0u8; 8 ];
        let read = client.read( &mut buf ).await;
        assert!( matches!( read, Ok( 0 ) | Err( _ ) ) );
    }
}
