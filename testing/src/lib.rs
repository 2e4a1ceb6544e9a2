//! Helpers for integration-testing Linger.
//!
//! Here, you can easily spin up a new simulator on a random non-used port
//! and send a request to it in under 5 lines.
//! See [`ServerBuilder`] on getting started.

#![deny(clippy::all, clippy::perf, clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]

use linger::prelude::{networking::*, *};
use tokio::task::JoinHandle;

macro_rules! impl_methods {
    ($($method: ident $name: ident),*) => {
        $(
            /// Make a request to `path` with the selected method.
            pub fn $method(&self, path: impl AsRef<str>) -> reqwest::RequestBuilder {
                let client = self.client().build().unwrap();
                client.request(reqwest::Method::$name, self.url(path))
            }
        )*
    };
}

/// A simulator returned by [`ServerBuilder::run`] to connect to.
///
/// The server is stopped when this is dropped.
#[derive(Debug)]
pub struct Server {
    task: JoinHandle<Result<(), linger::Error>>,
    port: u16,
}
impl Server {
    impl_methods!(get GET, post POST, put PUT, delete DELETE, head HEAD);

    /// Get a [`reqwest::ClientBuilder`] which doesn't reuse connections,
    /// so every request gets a lifecycle of its own.
    pub fn client(&self) -> reqwest::ClientBuilder {
        reqwest::Client::builder().pool_max_idle_per_host(0)
    }
    /// Builds a URL to the server with `path`.
    pub fn url(&self, path: impl AsRef<str>) -> reqwest::Url {
        let added_root = if path.as_ref().starts_with('/') {
            ""
        } else {
            "/"
        };
        let string = format!("http://localhost:{}{}{}", self.port(), added_root, path.as_ref());
        reqwest::Url::parse(&string).unwrap()
    }
    /// Gets the port of the TCP server.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }
    /// Gets the address of the TCP server.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(net::Ipv4Addr::LOCALHOST), self.port)
    }
    /// If the server has stopped, e.g. because of a fatal error.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Opens a raw connection and sends a `GET` request head for `path`.
    ///
    /// Use this to observe the bytes as they arrive, or to hang up mid-response.
    pub async fn raw_get(&self, path: &str) -> TcpStream {
        let mut stream = TcpStream::connect(self.addr()).await.unwrap();
        let head = format!("GET {path} HTTP/1.1\r\nhost: localhost:{}\r\n\r\n", self.port);
        stream.write_all(head.as_bytes()).await.unwrap();
        stream
    }
}
impl Drop for Server {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Reads from `stream` until the server closes it, or until `timeout`.
///
/// Returns the bytes and if the stream was closed (as opposed to timing out).
pub async fn read_until_closed(stream: &mut TcpStream, timeout: Duration) -> (Vec<u8>, bool) {
    let mut buffer = Vec::new();
    let closed = tokio::time::timeout(timeout, stream.read_to_end(&mut buffer))
        .await
        .is_ok();
    (buffer, closed)
}

/// Reads from `stream` for `duration`, returning what arrived in that time.
pub async fn read_for(stream: &mut TcpStream, duration: Duration) -> Vec<u8> {
    let mut buffer = Vec::new();
    let deadline = tokio::time::Instant::now() + duration;
    let mut chunk = [0; 1024];
    loop {
        match tokio::time::timeout_at(deadline, stream.read(&mut chunk)).await {
            Ok(Ok(0) | Err(_)) | Err(_) => return buffer,
            Ok(Ok(read)) => buffer.extend_from_slice(&chunk[..read]),
        }
    }
}

/// Splits a close-delimited response into the head and body.
#[must_use]
pub fn split_response(response: &[u8]) -> (&str, &[u8]) {
    let end = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map_or(response.len(), |pos| pos + 4);
    let head = str::from_utf8(&response[..end]).unwrap();
    (head, &response[end..])
}

/// A builder struct for starting a test [`Server`].
#[must_use = "run the server"]
#[derive(Debug)]
pub struct ServerBuilder {
    config: ConfigBuilder,
}
impl ServerBuilder {
    /// Creates a new builder with the default [`Config`].
    ///
    /// The configuration can be modified with [`Self::with_config`].
    pub fn new() -> Self {
        let _ = env_logger::Builder::new()
            .parse_filters("debug")
            .is_test(true)
            .parse_default_env()
            .try_init();
        Self {
            config: Config::builder(),
        }
    }
    /// Modifies the [`ConfigBuilder`] with `mutation`.
    pub fn with_config(mut self, mutation: impl FnOnce(ConfigBuilder) -> ConfigBuilder) -> Self {
        self.config = mutation(self.config);
        self
    }

    async fn test_port_availability(port: u16) -> io::Result<()> {
        match TcpStream::connect(SocketAddr::new(IpAddr::V4(net::Ipv4Addr::LOCALHOST), port)).await
        {
            Err(e) => match e.kind() {
                io::ErrorKind::ConnectionRefused => Ok(()),
                _ => panic!("Spurious IO error while checking port availability: {e:?}"),
            },
            Ok(_) => Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                "Something is listening on the port!",
            )),
        }
    }
    async fn get_port() -> u16 {
        use rand::prelude::*;
        let mut rng = rand::rng();
        let port_range = rand::distr::Uniform::new(4096, 61440).unwrap();

        loop {
            let port = port_range.sample(&mut rng);

            if Self::test_port_availability(port).await.is_err() {
                continue;
            }
            return port;
        }
    }

    /// Starts the simulator with the current configuration.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid.
    pub async fn run(self) -> Server {
        let config = self.config.build().expect("invalid test configuration");
        loop {
            let port = Self::get_port().await;
            let addr = SocketAddr::new(IpAddr::V4(net::Ipv4Addr::LOCALHOST), port);
            // Last check for collisions
            let listener = match TcpListener::bind(addr).await {
                Ok(listener) => listener,
                Err(err) => {
                    debug!("Port {port} was taken: {err}");
                    continue;
                }
            };
            debug!("Running on {port}");
            let config = Arc::new(config.clone());
            let task = tokio::spawn(serve(listener, config));
            return Server { task, port };
        }
    }
}
impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The testing prelude.
/// Also imports `linger::prelude::*`.
pub mod prelude {
    pub use super::{read_for, read_until_closed, split_response, Server, ServerBuilder};
    #[doc(hidden)]
    pub use linger::prelude::*;
    pub use reqwest;
}
