//! The per-connection lifecycle.
//!
//! A connection starts by (optionally) writing the response header early.
//! It then waits for the next [`Event`]: a keep-alive tick, the deadline, or
//! the client going away. Keep-alive ticks write the keep-alive payload and
//! loop back to waiting; the other two end the lifecycle with an [`Outcome`].
//!
//! The race between the event sources ([`Race`]) is kept apart from what
//! happens on each event ([`Lifecycle::step`]), so the transitions can be
//! driven by a fixed sequence of events in tests.
//!
//! When several sources are ready at once, which one wins is unspecified.

use crate::prelude::*;
use std::pin::Pin;
use tokio::time::{Interval, MissedTickBehavior, Sleep};

/// The next thing that happened to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The keep-alive interval elapsed.
    KeepAlive,
    /// The deadline elapsed.
    Deadline,
    /// The connection is gone.
    Closed(CloseReason),
}

/// A failed body write.
#[derive(Debug)]
pub enum WriteError {
    /// The write or the following flush returned an error.
    Io(io::Error),
    /// Fewer bytes than requested were written.
    Short {
        /// Bytes accepted by the connection.
        written: usize,
        /// Length of the payload.
        expected: usize,
    },
}
impl Display for WriteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => Display::fmt(err, f),
            Self::Short { written, expected } => {
                write!(f, "short write: {written} of {expected} bytes")
            }
        }
    }
}
impl From<io::Error> for WriteError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}
impl std::error::Error for WriteError {}

/// Why a lifecycle ended. Set exactly once per connection.
#[derive(Debug)]
pub enum Outcome {
    /// The deadline elapsed and the response (if any) was written.
    DeadlineReached,
    /// The client or transport closed the connection.
    ClientClosed(CloseReason),
    /// Writing the keep-alive payload failed.
    WriteErrorKeepAlive(WriteError),
    /// Writing the response at the deadline failed.
    WriteErrorResponse(WriteError),
}
impl Outcome {
    /// The kind of outcome, without the cause.
    #[must_use]
    pub fn category(&self) -> Category {
        match self {
            Self::DeadlineReached => Category::DeadlineReached,
            Self::ClientClosed(_) => Category::ClientClosed,
            Self::WriteErrorKeepAlive(_) => Category::WriteErrorKeepAlive,
            Self::WriteErrorResponse(_) => Category::WriteErrorResponse,
        }
    }
    /// If the outcome is one of the write errors.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::WriteErrorKeepAlive(_) | Self::WriteErrorResponse(_)
        )
    }
}
impl Display for Outcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeadlineReached => f.write_str("context deadline exceeded"),
            Self::ClientClosed(reason) => Display::fmt(reason, f),
            Self::WriteErrorKeepAlive(err) => write!(f, "failed to write keep-alive: {err}"),
            Self::WriteErrorResponse(err) => write!(f, "failed to write response: {err}"),
        }
    }
}

/// Payload-free tag of an [`Outcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// [`Outcome::DeadlineReached`]
    DeadlineReached,
    /// [`Outcome::ClientClosed`]
    ClientClosed,
    /// [`Outcome::WriteErrorKeepAlive`]
    WriteErrorKeepAlive,
    /// [`Outcome::WriteErrorResponse`]
    WriteErrorResponse,
}

/// A source of [`Event`]s for a connection.
#[allow(async_fn_in_trait)]
pub trait Race<C: ConnectionHandle> {
    /// Waits for whichever event source is ready first.
    async fn next(&mut self, conn: &mut C) -> Event;
}

/// The timers of a connection, raced against [`ConnectionHandle::closed`].
#[derive(Debug)]
pub struct Timers {
    keep_alive: Option<Interval>,
    deadline: Option<Pin<Box<Sleep>>>,
}
impl Timers {
    /// Creates the timers `config` enables, anchored at `start`.
    ///
    /// The first keep-alive tick is one interval after `start`.
    /// Late ticks are delayed, never sent in a burst.
    #[must_use]
    pub fn new(config: &Config, start: Instant) -> Self {
        let keep_alive = match config.mode() {
            Mode::Full => config.keep_alive(),
            Mode::CancellationOnly => None,
        }
        .map(|period| {
            let mut interval = tokio::time::interval_at(start + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let deadline = config
            .deadline()
            .map(|deadline| Box::pin(tokio::time::sleep_until(start + deadline)));
        Self {
            keep_alive,
            deadline,
        }
    }
}
impl<C: ConnectionHandle> Race<C> for Timers {
    async fn next(&mut self, conn: &mut C) -> Event {
        tokio::select! {
            () = tick(self.keep_alive.as_mut()) => Event::KeepAlive,
            () = expire(self.deadline.as_mut()) => Event::Deadline,
            reason = conn.closed() => Event::Closed(reason),
        }
    }
}

/// Never resolves if the keep-alive is disabled.
async fn tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
/// Never resolves if there's no deadline.
async fn expire(sleep: Option<&mut Pin<Box<Sleep>>>) {
    match sleep {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

/// The state of one connection's lifecycle.
#[derive(Debug)]
pub struct Lifecycle<'a> {
    config: &'a Config,
    header_written: bool,
    keep_alive_writes: usize,
}
impl<'a> Lifecycle<'a> {
    /// Creates the lifecycle of a connection, before the entry action.
    #[must_use]
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            header_written: false,
            keep_alive_writes: 0,
        }
    }

    /// If the response header has been written.
    #[must_use]
    pub fn header_written(&self) -> bool {
        self.header_written
    }
    /// How many keep-alive payloads have been written.
    #[must_use]
    pub fn keep_alive_writes(&self) -> usize {
        self.keep_alive_writes
    }

    /// The entry action: writes and flushes the header if it's sent early.
    ///
    /// # Errors
    ///
    /// Returns an [`Outcome`] if writing the header fails.
    pub async fn start(&mut self, conn: &mut impl ConnectionHandle) -> Result<(), Outcome> {
        if self.config.mode() == Mode::CancellationOnly || !self.config.early_header() {
            return Ok(());
        }
        let written = async {
            conn.write_header(self.config.status()).await?;
            conn.flush().await
        }
        .await;
        self.header_written = true;
        written.map_err(|err| Outcome::WriteErrorResponse(err.into()))
    }

    /// Reacts to `event`. Returns [`None`] if the lifecycle continues.
    pub async fn step(
        &mut self,
        conn: &mut impl ConnectionHandle,
        event: Event,
    ) -> Option<Outcome> {
        match event {
            Event::Closed(reason) => Some(Outcome::ClientClosed(reason)),
            Event::KeepAlive => {
                if self.config.mode() == Mode::CancellationOnly || self.config.keep_alive().is_none()
                {
                    return None;
                }
                let payload = self.config.keep_alive_payload();
                match write_fully(conn, payload).await {
                    Ok(()) => {
                        self.keep_alive_writes += 1;
                        trace!("Wrote keep-alive #{}", self.keep_alive_writes);
                        None
                    }
                    Err(err) => Some(Outcome::WriteErrorKeepAlive(err)),
                }
            }
            Event::Deadline => {
                if self.config.deadline().is_none() {
                    return None;
                }
                if self.config.mode() == Mode::CancellationOnly {
                    return Some(Outcome::DeadlineReached);
                }
                Some(match self.respond(conn).await {
                    Ok(()) => Outcome::DeadlineReached,
                    Err(err) => Outcome::WriteErrorResponse(err),
                })
            }
        }
    }

    async fn respond(&mut self, conn: &mut impl ConnectionHandle) -> Result<(), WriteError> {
        if !self.header_written {
            self.header_written = true;
            conn.write_header(self.config.status()).await?;
        }
        let payload = self.config.payload();
        if payload.is_empty() {
            conn.flush().await?;
            return Ok(());
        }
        write_fully(conn, payload).await
    }

    /// Runs the lifecycle to completion.
    pub async fn run<C: ConnectionHandle>(
        &mut self,
        conn: &mut C,
        race: &mut impl Race<C>,
    ) -> Outcome {
        if let Err(outcome) = self.start(conn).await {
            return outcome;
        }
        loop {
            let event = race.next(conn).await;
            trace!("Lifecycle event {event:?}");
            if let Some(outcome) = self.step(conn, event).await {
                return outcome;
            }
        }
    }
}

/// Writes all of `bytes` in one write and flushes.
/// A short write is an error; it's never retried.
async fn write_fully(conn: &mut impl ConnectionHandle, bytes: &[u8]) -> Result<(), WriteError> {
    let written = conn.write(bytes).await?;
    if written < bytes.len() {
        return Err(WriteError::Short {
            written,
            expected: bytes.len(),
        });
    }
    conn.flush().await?;
    Ok(())
}
