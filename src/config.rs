//! The process-wide, immutable [`Config`] of the simulator.
//!
//! A [`Config`] is created once at startup through a [`ConfigBuilder`],
//! which checks that the combination of options describes a valid HTTP response.
//! After that, it's shared between all connections in an [`Arc`] and never mutated.
//!
//! The [`command`] and [`from_matches`] functions are the command line surface,
//! used by the `linger` binary.

use crate::prelude::*;
use clap::{Arg, ArgAction, ArgMatches, ValueHint};

/// Which event sources the [`lifecycle`] races.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Race only the deadline against the client closing the connection.
    ///
    /// Nothing is written by the lifecycle. Use this to measure how long a
    /// connection stays open before the peer (or the deadline) ends it.
    CancellationOnly,
    /// Deadline, keep-alive ticks, early headers, and the final payload.
    #[default]
    Full,
}

/// An invalid combination of options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// A keep-alive interval was set but headers aren't sent early.
    /// Keep-alive bytes are body bytes, so the header has to come first.
    KeepAliveWithoutEarlyHeader,
    /// `204 No Content` can't carry a payload.
    NoContentWithPayload,
    /// `204 No Content` can't carry keep-alive bytes.
    NoContentWithKeepAlive,
    /// [`Mode::CancellationOnly`] never writes, so early headers, payloads,
    /// and keep-alive can't be used with it.
    CancellationOnlyWrites,
}
impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::KeepAliveWithoutEarlyHeader => {
                "a keep-alive interval requires early headers (--early-header)"
            }
            Self::NoContentWithPayload => "status 204 can't be combined with a payload",
            Self::NoContentWithKeepAlive => "status 204 can't be combined with keep-alive",
            Self::CancellationOnlyWrites => {
                "cancellation-only mode can't write early headers, payloads, or keep-alive bytes"
            }
        })
    }
}
impl std::error::Error for ConfigError {}

/// The validated configuration.
///
/// Read-only for the lifetime of the process.
/// Create one using [`Config::builder`].
#[derive(Debug, Clone)]
pub struct Config {
    bind: String,
    deadline: Option<Duration>,
    early_header: bool,
    status: StatusCode,
    payload: Bytes,
    keep_alive: Option<Duration>,
    keep_alive_payload: Bytes,
    mode: Mode,
}
impl Config {
    /// Starts building a [`Config`] with the default values.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// The address the listener binds to, as `host:port` or `:port`.
    /// It's resolved when binding.
    #[must_use]
    pub fn bind(&self) -> &str {
        &self.bind
    }
    /// Time after session start when the server ends the connection.
    /// [`None`] means never.
    #[must_use]
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }
    /// If the response header is written as soon as the connection starts.
    #[must_use]
    pub fn early_header(&self) -> bool {
        self.early_header
    }
    /// Status code of the response.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }
    /// Bytes written when the deadline is reached.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
    /// Interval between keep-alive writes. [`None`] disables them.
    #[must_use]
    pub fn keep_alive(&self) -> Option<Duration> {
        self.keep_alive
    }
    /// Bytes written on every keep-alive tick.
    #[must_use]
    pub fn keep_alive_payload(&self) -> &Bytes {
        &self.keep_alive_payload
    }
    /// Which event sources are raced.
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }
}
impl Default for Config {
    fn default() -> Self {
        let ConfigBuilder(config) = ConfigBuilder::default();
        config
    }
}

/// Builder for [`Config`]. Every setter is optional.
#[derive(Debug, Clone)]
#[must_use]
pub struct ConfigBuilder(Config);
impl ConfigBuilder {
    /// Sets the address to bind to. `:port` listens on all interfaces.
    pub fn bind(mut self, addr: impl Into<String>) -> Self {
        self.0.bind = addr.into();
        self
    }
    /// A zero `deadline` is the same as [`None`].
    pub fn deadline(mut self, deadline: impl Into<Option<Duration>>) -> Self {
        self.0.deadline = deadline.into().filter(|d| !d.is_zero());
        self
    }
    /// Write the header as soon as the connection starts.
    pub fn early_header(mut self, early: bool) -> Self {
        self.0.early_header = early;
        self
    }
    /// Sets the status code of the response.
    pub fn status(mut self, status: StatusCode) -> Self {
        self.0.status = status;
        self
    }
    /// Sets the body written at the deadline.
    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.0.payload = payload.into();
        self
    }
    /// A zero `interval` is the same as [`None`].
    pub fn keep_alive(mut self, interval: impl Into<Option<Duration>>) -> Self {
        self.0.keep_alive = interval.into().filter(|d| !d.is_zero());
        self
    }
    /// Sets the bytes written on every keep-alive tick.
    pub fn keep_alive_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.0.keep_alive_payload = payload.into();
        self
    }
    /// Sets which event sources are raced.
    pub fn mode(mut self, mode: Mode) -> Self {
        self.0.mode = mode;
        self
    }

    /// Validates the combination of options.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] describing the first invalid combination.
    pub fn build(self) -> Result<Config, ConfigError> {
        let config = self.0;
        if config.keep_alive.is_some() && !config.early_header {
            return Err(ConfigError::KeepAliveWithoutEarlyHeader);
        }
        if config.status == StatusCode::NO_CONTENT {
            if !config.payload.is_empty() {
                return Err(ConfigError::NoContentWithPayload);
            }
            if config.keep_alive.is_some() {
                return Err(ConfigError::NoContentWithKeepAlive);
            }
        }
        if config.mode == Mode::CancellationOnly
            && (config.early_header || !config.payload.is_empty() || config.keep_alive.is_some())
        {
            return Err(ConfigError::CancellationOnlyWrites);
        }
        Ok(config)
    }
}
impl Default for ConfigBuilder {
    fn default() -> Self {
        Self(Config {
            bind: String::from(":8080"),
            deadline: None,
            early_header: false,
            status: StatusCode::OK,
            payload: Bytes::new(),
            keep_alive: None,
            keep_alive_payload: Bytes::from_static(b" "),
            mode: Mode::Full,
        })
    }
}

/// Parses durations such as `100ms`, `1m30s`, and `0`.
/// `0` (with or without unit) means disabled.
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    humantime::parse_duration(s).map_err(|err| err.to_string())
}
fn parse_status(s: &str) -> Result<StatusCode, String> {
    let code: u16 = s.trim().parse().map_err(|_| format!("'{s}' isn't a number"))?;
    StatusCode::from_u16(code).map_err(|err| err.to_string())
}
/// Checks the shape of `host:port`. The host is resolved when binding.
fn parse_bind(s: &str) -> Result<String, String> {
    let (host, port) = s
        .rsplit_once(':')
        .ok_or_else(|| format!("'{s}' is missing a port"))?;
    port.parse::<u16>()
        .map_err(|_| format!("invalid port in '{s}'"))?;
    if host.contains(char::is_whitespace) {
        return Err(format!("invalid host in '{s}'"));
    }
    Ok(s.to_owned())
}

const ABOUT: &str = "\nHolds HTTP connections open to test how clients, proxies, \
and intermediaries react to server timeouts, early headers, keep-alive bytes, \
and client disconnects.\n\
\n\
Use the `LINGER_LOG` environment variable to set verbosity. \
Levels `trace`, `debug`, `info`, `warn`, `error`, and `off` are available.";

/// The command line interface of the `linger` binary.
pub fn command() -> clap::Command {
    clap::command!()
        .about(ABOUT)
        .arg(
            Arg::new("bind")
                .short('b')
                .long("bind")
                .help("Address to bind the server to. `:PORT` binds on all interfaces.")
                .value_name("ADDRESS")
                .value_hint(ValueHint::Other)
                .value_parser(parse_bind)
                .default_value(":8080"),
        )
        .arg(
            Arg::new("timeout")
                .short('t')
                .long("timeout")
                .help(
                    "Time after which the server responds and closes the connection. \
                    Don't set it to never respond (for intermediate timeout tests).",
                )
                .value_name("DURATION")
                .value_parser(parse_duration),
        )
        .arg(
            Arg::new("early-header")
                .short('e')
                .long("early-header")
                .action(ArgAction::SetTrue)
                .help("Write the response header as soon as the request arrives."),
        )
        .arg(
            Arg::new("status")
                .short('s')
                .long("status")
                .help("Status code of the response.")
                .value_name("CODE")
                .value_parser(parse_status)
                .default_value("200"),
        )
        .arg(
            Arg::new("payload")
                .short('p')
                .long("payload")
                .help("Body written when the timeout is reached.")
                .value_name("STRING"),
        )
        .arg(
            Arg::new("keep-alive-payload")
                .long("keep-alive-payload")
                .help("Bytes written on every keep-alive tick.")
                .value_name("STRING")
                .default_value(" "),
        )
        .arg(
            Arg::new("keep-alive-interval")
                .short('k')
                .long("keep-alive-interval")
                .help("Write the keep-alive payload with this interval. Requires --early-header.")
                .value_name("DURATION")
                .value_parser(parse_duration),
        )
        .arg(
            Arg::new("cancellation-only")
                .long("cancellation-only")
                .action(ArgAction::SetTrue)
                .help(
                    "Never write anything; only measure how long connections stay open \
                    until the client (or --timeout) closes them.",
                ),
        )
}

/// Builds a [`Config`] from the parsed [`command`].
///
/// # Errors
///
/// Returns the [`ConfigError`] from [`ConfigBuilder::build`].
pub fn from_matches(matches: &ArgMatches) -> Result<Config, ConfigError> {
    let mut builder = Config::builder()
        .deadline(matches.get_one::<Duration>("timeout").copied())
        .keep_alive(matches.get_one::<Duration>("keep-alive-interval").copied())
        .early_header(matches.get_flag("early-header"))
        .mode(if matches.get_flag("cancellation-only") {
            Mode::CancellationOnly
        } else {
            Mode::Full
        });
    if let Some(bind) = matches.get_one::<String>("bind") {
        builder = builder.bind(bind.clone());
    }
    if let Some(status) = matches.get_one::<StatusCode>("status") {
        builder = builder.status(*status);
    }
    if let Some(payload) = matches.get_one::<String>("payload") {
        builder = builder.payload(payload.clone());
    }
    if let Some(payload) = matches.get_one::<String>("keep-alive-payload") {
        builder = builder.keep_alive_payload(payload.clone());
    }
    builder.build()
}
