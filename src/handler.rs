//! The entry point of every connection.
//!
//! [`handle_connection`] allocates an id from the shared [`IdAllocator`],
//! runs the [`Lifecycle`] to completion, and logs how the connection ended.

use crate::prelude::{threading::*, *};
use atomic::AtomicU64;

/// Hands out connection ids, shared by all connections.
///
/// Ids are unique and increasing. Concurrent connections may get their ids in
/// a different order than they were accepted; they're only used in logs.
#[derive(Debug, Default)]
pub struct IdAllocator {
    last: AtomicU64,
}
impl IdAllocator {
    /// Creates an allocator which hasn't handed out any ids.
    pub fn new() -> Self {
        Self::default()
    }
    /// Gets the next id. The first is `1`.
    pub fn next(&self) -> u64 {
        // + 1 at the end because fetch returns the old value.
        self.last.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// The record logged when a connection ends.
#[derive(Debug)]
pub struct Summary {
    /// The connection id.
    pub id: u64,
    /// Why the connection ended.
    pub outcome: Outcome,
    /// For how long the connection was open.
    pub elapsed: Duration,
}

/// Information about the request, used for logging.
#[derive(Debug, Clone, Copy)]
pub struct RequestInfo<'a> {
    /// The request method.
    pub method: &'a Method,
    /// The request target, as sent by the client.
    pub target: &'a Uri,
    /// The address of the client.
    pub remote: SocketAddr,
}
impl<'a> RequestInfo<'a> {
    /// Borrows the fields from `request`.
    pub fn new<T>(request: &'a Request<T>, remote: SocketAddr) -> Self {
        Self {
            method: request.method(),
            target: request.uri(),
            remote,
        }
    }
}

/// Runs one connection, from the request head to the end of its lifecycle.
///
/// # Errors
///
/// Returns [`Error::Capability`] if `conn` can't flush. That's a broken transport,
/// not a problem with this connection, and should stop the server.
pub async fn handle_connection<C: ConnectionHandle>(
    config: &Config,
    ids: &IdAllocator,
    conn: &mut C,
    request: RequestInfo<'_>,
) -> Result<Summary, Error> {
    let start = Instant::now();
    let id = ids.next();
    info!(
        "[{id}] New {} request from {} to {}",
        request.method, request.remote, request.target
    );

    if !conn.can_flush() {
        error!("[{id}] The connection can't be flushed. Stopping.");
        return Err(Error::Capability);
    }

    let mut timers = Timers::new(config, start);
    let outcome = Lifecycle::new(config).run(conn, &mut timers).await;
    let elapsed = start.elapsed();

    if outcome.is_error() {
        warn!("[{id}] Connection closed! Reason: {outcome}. Was open for {elapsed:?}");
    } else {
        info!("[{id}] Connection closed! Reason: {outcome}. Was open for {elapsed:?}");
    }
    Ok(Summary {
        id,
        outcome,
        elapsed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{tests::MockConnection, Category};

    fn remote() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    #[test]
    fn ids_increase() {
        let ids = IdAllocator::new();
        assert_eq!(ids.next(), 1);
        assert_eq!(ids.next(), 2);
        assert_eq!(ids.next(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn ids_unique_under_contention() {
        let ids = Arc::new(IdAllocator::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let ids = Arc::clone(&ids);
            handles.push(spawn(async move {
                (0..1000).map(|_| ids.next()).collect::<Vec<_>>()
            }));
        }
        let mut all = Vec::new();
        for handle in handles {
            let ids = handle.await.unwrap();
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
            all.extend(ids);
        }
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 8000);
        assert_eq!(all.last(), Some(&8000));
    }

    #[tokio::test(start_paused = true)]
    async fn summary() {
        let config = Config::builder()
            .deadline(Duration::from_millis(100))
            .payload("done")
            .build()
            .unwrap();
        let ids = IdAllocator::new();
        let request = Request::get("/slow").body(()).unwrap();
        let mut conn = MockConnection::new();

        let summary = handle_connection(&config, &ids, &mut conn, RequestInfo::new(&request, remote()))
            .await
            .unwrap();
        assert_eq!(summary.id, 1);
        assert_eq!(summary.outcome.category(), Category::DeadlineReached);
        assert_eq!(summary.elapsed, Duration::from_millis(100));

        let mut conn = MockConnection::new()
            .closing_at(Duration::from_millis(20), CloseReason::Reset);
        let summary = handle_connection(&config, &ids, &mut conn, RequestInfo::new(&request, remote()))
            .await
            .unwrap();
        assert_eq!(summary.id, 2);
        assert!(matches!(
            summary.outcome,
            Outcome::ClientClosed(CloseReason::Reset)
        ));
    }

    #[tokio::test]
    async fn missing_flush_is_fatal() {
        let config = Config::default();
        let ids = IdAllocator::new();
        let request = Request::get("/").body(()).unwrap();
        let mut conn = MockConnection {
            no_flush: true,
            ..MockConnection::new()
        };
        let result =
            handle_connection(&config, &ids, &mut conn, RequestInfo::new(&request, remote())).await;
        assert!(matches!(result, Err(Error::Capability)));
        assert!(conn.ops.is_empty());
    }
}
