//! Session, interactive transaction, and batch (spec §4.6). `Session` is the long-lived
//! handle end users hold; `Transaction`/`Batch` are scoped helpers built on top of it,
//! each opening a fresh session and guaranteeing its disposal on every exit path, the
//! way `xitca-postgres`'s pool-acquisition helpers (`pool.rs`) hand out a guard that
//! releases on drop regardless of how the caller's future ends.
//!
//! Unlike `postgres/src/transaction.rs`'s `Transaction<C>`, which wraps a live
//! `Client` handle and needs its own `Drop`-based `ROLLBACK` safety net (its `State`
//! enum's `WantRollback`/`Finish`), a transaction here never outlives the callback that
//! opened it: `transaction()` always calls `COMMIT` or `ROLLBACK` itself before
//! returning, and the session's own `Drop` then closes the socket. Closing the socket
//! with any transaction still open makes the server roll it back (spec §3's Session
//! definition), so `Session::Drop` already *is* the safety net the teacher gets from a
//! separate guard type — there's nothing left for a second `Drop` impl to do.

use core::{future::Future, pin::Pin};

use tracing::debug;

use crate::{
    config::Config,
    error::Error,
    response::StatementResponse,
    row::Row,
    statement::{self, IntoParams, Transport},
    types::Param,
    ws::{self, WsHandle},
};

/// A handle to a single WebSocket connection and its statement interface (spec §4.6).
/// Sessions serialize frame order on the wire but accept concurrent statement calls;
/// the underlying [`WsHandle`] is what actually enforces that ordering.
pub struct Session {
    ws: WsHandle,
}

impl Session {
    /// Open a new session against `config`: connect, authenticate, and return once the
    /// connection is ready to accept statements.
    pub async fn connect(config: Config) -> Result<Self, Error> {
        let ws = ws::connect(config).await?;
        debug!("session connected");
        Ok(Self { ws })
    }

    /// `query(sql, ...params) -> statement-response` (spec §4.5) on this session's
    /// WebSocket transport.
    pub async fn query(&self, sql: impl Into<String>, params: impl IntoParams) -> Result<StatementResponse, Error> {
        statement::query(Transport::WebSocket(&self.ws), sql, params).await
    }

    /// `exec(sql, ...params) -> affected-count` (spec §4.5) on this session's WebSocket
    /// transport.
    pub async fn exec(&self, sql: impl Into<String>, params: impl IntoParams) -> Result<u64, Error> {
        statement::exec(Transport::WebSocket(&self.ws), sql, params).await
    }

    /// True iff the underlying socket is still in the open state.
    pub fn is_connected(&self) -> bool {
        self.ws.is_connected()
    }

    /// Close the socket with a normal closure code. Idempotent; also runs on `Drop`.
    pub fn close(&self) {
        self.ws.close();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        debug!("session disposed");
        self.ws.close();
    }
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Run an interactive transaction (spec §4.6): open a session, `BEGIN`, run `f` with
/// the session's statement interface, `COMMIT` on success or `ROLLBACK` on error, and
/// rethrow the callback's error unchanged. The session is disposed on every exit path.
///
/// `f` returns a boxed future rather than a plain `Fut: Future` type parameter because
/// the callback borrows `&Session` for a lifetime chosen at the call site, not at
/// `transaction`'s — the same higher-ranked-borrow problem connection-pool `with`
/// helpers hit, solved the same way: box the callback's future.
pub async fn transaction<T, F>(config: Config, f: F) -> Result<T, Error>
where
    F: for<'s> FnOnce(&'s Session) -> BoxFuture<'s, Result<T, Error>>,
{
    let session = Session::connect(config).await?;
    session.exec("BEGIN", ()).await?;

    match f(&session).await {
        Ok(value) => {
            session.exec("COMMIT", ()).await?;
            Ok(value)
        }
        Err(err) => {
            let _ = session.exec("ROLLBACK", ()).await;
            Err(err)
        }
    }
}

/// One item of a [`Batch`] (spec §4.6): either a `query`, collected fully into rows, or
/// an `exec`, reduced to its affected-row count.
pub enum BatchItem {
    Query(String, Vec<Param>),
    Exec(String, Vec<Param>),
}

/// The outcome of one [`BatchItem`], in the same order the items were submitted.
pub enum BatchResult {
    Rows(Vec<Row>),
    Affected(u64),
}

impl BatchResult {
    pub fn into_rows(self) -> Option<Vec<Row>> {
        match self {
            BatchResult::Rows(rows) => Some(rows),
            BatchResult::Affected(_) => None,
        }
    }

    pub fn into_affected(self) -> Option<u64> {
        match self {
            BatchResult::Affected(n) => Some(n),
            BatchResult::Rows(_) => None,
        }
    }
}

/// Fluent builder for [`batch`]'s array form: `Batch::new().query(..).exec(..).run(cfg)`.
#[derive(Default)]
pub struct Batch {
    items: Vec<BatchItem>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, sql: impl Into<String>, params: impl IntoParams) -> Self {
        self.items.push(BatchItem::Query(sql.into(), params.into_params()));
        self
    }

    pub fn exec(mut self, sql: impl Into<String>, params: impl IntoParams) -> Self {
        self.items.push(BatchItem::Exec(sql.into(), params.into_params()));
        self
    }

    /// Run the accumulated items in one transaction on a fresh session (spec §4.6).
    pub async fn run(self, config: Config) -> Result<Vec<BatchResult>, Error> {
        batch(config, self.items).await
    }
}

/// Array form of [`Batch`]: run `items` inside a transaction on a fresh session and
/// return their results in input order. An empty batch still performs `BEGIN`/`COMMIT`.
pub async fn batch(config: Config, items: Vec<BatchItem>) -> Result<Vec<BatchResult>, Error> {
    let session = Session::connect(config).await?;
    session.exec("BEGIN", ()).await?;

    match run_batch_items(&session, items).await {
        Ok(results) => {
            session.exec("COMMIT", ()).await?;
            Ok(results)
        }
        Err(err) => {
            let _ = session.exec("ROLLBACK", ()).await;
            Err(err)
        }
    }
}

async fn run_batch_items(session: &Session, items: Vec<BatchItem>) -> Result<Vec<BatchResult>, Error> {
    let mut results = Vec::with_capacity(items.len());
    for item in items {
        let result = match item {
            BatchItem::Query(sql, params) => {
                let mut response = statement::query(Transport::WebSocket(&session.ws), sql, params).await?;
                BatchResult::Rows(response.rows().collect().await?)
            }
            BatchItem::Exec(sql, params) => {
                let affected = statement::exec(Transport::WebSocket(&session.ws), sql, params).await?;
                BatchResult::Affected(affected)
            }
        };
        results.push(result);
    }
    Ok(results)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn batch_result_accessors() {
        let rows = BatchResult::Rows(vec![vec![Some("a".into())]]);
        assert_eq!(rows.into_rows(), Some(vec![vec![Some("a".into())]]));

        let affected = BatchResult::Affected(3);
        assert_eq!(affected.into_affected(), Some(3));
    }

    #[test]
    fn fluent_batch_builder_preserves_order() {
        let batch = Batch::new().query("SELECT 1", ()).exec("DELETE FROM t", ());
        assert_eq!(batch.items.len(), 2);
        assert!(matches!(batch.items[0], BatchItem::Query(..)));
        assert!(matches!(batch.items[1], BatchItem::Exec(..)));
    }
}
