//! An HTTP server which holds connections open.
//!
//! Linger is used to test how clients, proxies, and other intermediaries react
//! when a server is slow: when it times out, sends the response header early,
//! trickles keep-alive bytes, or when the client itself hangs up.
//! It isn't a web server; every request gets the same synthetic behaviour,
//! configured once at startup through a [`Config`].
//!
//! For each connection, a [`Lifecycle`] races a deadline, a keep-alive
//! interval, and the client closing the connection against each other.
//! See the [`lifecycle`] module for the details.
//!
//! # Examples
//!
//! ```no_run
//! # async fn example() -> Result<(), linger::Error> {
//! use linger::prelude::*;
//!
//! let config = Config::builder()
//!     .deadline(Duration::from_secs(30))
//!     .status(StatusCode::GATEWAY_TIMEOUT)
//!     .payload("gave up")
//!     .build()
//!     .expect("valid combination");
//! run(Arc::new(config)).await
//! # }
//! ```
#![deny(
    unreachable_pub,
    missing_docs,
    missing_debug_implementations,
    clippy::pedantic
)]
#![allow(
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::should_implement_trait
)]

pub mod config;
pub mod connection;
pub mod handler;
pub mod lifecycle;
pub mod parse;
pub mod prelude;

use prelude::{networking::*, threading::*, *};
use tokio::sync::mpsc;

/// A fatal server error.
///
/// Errors of individual connections never end up here;
/// they are logged and only end that connection.
#[derive(Debug)]
pub enum Error {
    /// Resolving or binding the address failed.
    Bind(String, io::Error),
    /// The transport is missing a primitive the simulator relies on (flushing).
    Capability,
}
impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bind(addr, err) => write!(f, "failed to bind to {addr}: {err}"),
            Self::Capability => {
                f.write_str("the transport's connections don't support flushing")
            }
        }
    }
}
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bind(_, err) => Some(err),
            Self::Capability => None,
        }
    }
}

/// Binds to [`Config::bind`] and serves connections forever.
///
/// # Errors
///
/// Returns [`Error::Bind`] if the address can't be resolved or bound,
/// and the errors of [`serve`].
pub async fn run(config: Arc<Config>) -> Result<(), Error> {
    let listener = bind(config.bind()).await?;
    match listener.local_addr() {
        Ok(addr) => info!("Starting HTTP server on {addr}"),
        Err(_) => info!("Starting HTTP server on {}", config.bind()),
    }
    serve(listener, config).await
}

/// Resolves and binds `addr`.
///
/// `:port` listens on all interfaces; IPv6 (which also accepts IPv4 on most systems)
/// is tried first, then IPv4.
async fn bind(addr: &str) -> Result<TcpListener, Error> {
    let bound = match addr.strip_prefix(':') {
        Some(port) => match TcpListener::bind(format!("[::]:{port}")).await {
            Ok(listener) => Ok(listener),
            Err(err) => {
                debug!("Failed to bind on IPv6 ({err}), using IPv4");
                TcpListener::bind(format!("0.0.0.0:{port}")).await
            }
        },
        None => TcpListener::bind(addr).await,
    };
    bound.map_err(|err| Error::Bind(addr.to_owned(), err))
}

/// Accepts connections on `listener`, spawning a task for each.
///
/// # Errors
///
/// Returns [`Error::Capability`] if a connection reports it can't be flushed.
pub async fn serve(listener: TcpListener, config: Arc<Config>) -> Result<(), Error> {
    let ids = Arc::new(handler::IdAllocator::new());
    let (fatal_sender, mut fatal) = mpsc::unbounded_channel();

    loop {
        let (stream, remote) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!("Failed to accept connection: {err}");
                    continue;
                }
            },
            Some(err) = fatal.recv() => return Err(err),
        };
        let config = Arc::clone(&config);
        let ids = Arc::clone(&ids);
        let fatal_sender = fatal_sender.clone();
        spawn(async move {
            if let Err(err) = handle_stream(stream, remote, &config, &ids).await {
                // The receiver is gone only if the server already stopped.
                let _ = fatal_sender.send(err);
            }
        });
    }
}

/// Reads the request head of `stream` and runs its lifecycle.
async fn handle_stream(
    mut stream: TcpStream,
    remote: SocketAddr,
    config: &Config,
    ids: &handler::IdAllocator,
) -> Result<(), Error> {
    if let Err(err) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY: {err}");
    }
    let (request, _) =
        match parse::request(&mut stream, parse::MAX_HEAD_LEN, parse::READ_TIMEOUT).await {
            Ok(request) => request,
            Err(err) => {
                warn!("Failed to read request from {remote}: {err}");
                return Ok(());
            }
        };

    let mut conn = TcpConnection::new(stream);
    handle_connection(
        config,
        ids,
        &mut conn,
        handler::RequestInfo::new(&request, remote),
    )
    .await?;
    if let Err(err) = conn.finish(config.status()).await {
        debug!("Failed to finish response to {remote}: {err}");
    }
    Ok(())
}
