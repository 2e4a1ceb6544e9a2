//! ## **The Linger Prelude**
//!
//! The purpose of this module is to *simplify* and *make modules dependencies obvious*
//! in the development of the *Linger simulator*.
//!
//! Other niche preludes can be found as submodules, including
//! * a networking prelude
//! * and a threading prelude

// External commonly used dependencies
pub use bytes::{Bytes, BytesMut};
pub use http;
pub use http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode, Uri, Version};
pub use log::*;
pub use std::fmt::{self, Debug, Display, Formatter};
pub use std::io;
pub use std::net::{self, IpAddr, SocketAddr};
pub use std::str;
pub use std::sync::{self, Arc};
pub use std::time::Duration;
pub use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
pub use tokio::time::Instant;

// Modules
pub use crate::config;
pub use crate::connection;
pub use crate::handler;
pub use crate::lifecycle;
pub use crate::parse;

// Crate types
pub use crate::{run, serve, Error};
pub use config::{Config, ConfigBuilder, ConfigError, Mode};
pub use connection::{CloseReason, ConnectionHandle, TcpConnection};
pub use handler::{handle_connection, IdAllocator, Summary};
pub use lifecycle::{Event, Lifecycle, Outcome, Race, Timers};
pub use parse::chars;

/// ## **The Linger *Networking* Prelude**
///
/// The purpose of this module is to expose Tokio network types used in Linger.
pub mod networking {
    pub use tokio::net::{TcpListener, TcpStream};
}

/// ## **The Linger *Threading* Prelude**
///
/// The purpose of this module is to expose common threading types.
pub mod threading {
    pub use std::sync::atomic::{self, Ordering};
    pub use tokio::task::spawn;
}
