//! Rows and the row stream. the lending-iterator shape `xitca-postgres` uses in
//! `iter.rs` isn't needed here: NDJSON/WebSocket rows decode into owned
//! `Vec<Option<String>>` values with no borrow back into a shared buffer, so a plain
//! boxed `Stream` is enough.

use core::pin::Pin;
use std::future::poll_fn;

use futures_core::Stream;

use crate::error::Error;

/// One row: an ordered vector of `string|null` values (spec §3).
pub type Row = Vec<Option<String>>;

/// A row stream is *restartable once*: it can be iterated element-by-element via
/// [`RowStream::next`], and a subsequent [`RowStream::collect`] drains whatever is
/// left. After the stream is drained (by either path) further reads are
/// end-of-stream, and `collect` called again returns an empty vector.
pub struct RowStream {
    inner: Option<Pin<Box<dyn Stream<Item = Result<Row, Error>> + Send>>>,
}

impl RowStream {
    pub(crate) fn new(inner: Pin<Box<dyn Stream<Item = Result<Row, Error>> + Send>>) -> Self {
        Self { inner: Some(inner) }
    }

    pub(crate) fn empty() -> Self {
        Self { inner: None }
    }

    /// Build a row stream from an already-materialized vector of rows (the HTTP
    /// transport's NDJSON parser has no partial-read boundary to preserve, so its rows
    /// are fully decoded up front; see [`crate::http`]).
    pub(crate) fn from_rows(rows: Vec<Result<Row, Error>>) -> Self {
        if rows.is_empty() {
            return Self::empty();
        }
        Self::new(Box::pin(VecStream(rows.into_iter())))
    }

    /// Pull the next row, or `None` at end of stream.
    pub async fn next(&mut self) -> Option<Result<Row, Error>> {
        let item = match self.inner.as_mut() {
            Some(stream) => poll_fn(|cx| stream.as_mut().poll_next(cx)).await,
            None => None,
        };
        if item.is_none() {
            self.inner = None;
        }
        item
    }

    /// Drain the remainder of the stream into a `Vec`. Idempotent: once the stream is
    /// drained, further calls return an empty vector.
    pub async fn collect(&mut self) -> Result<Vec<Row>, Error> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await {
            rows.push(row?);
        }
        Ok(rows)
    }

    /// Mark the stream drained without consuming it further, releasing the
    /// underlying resources (the `return`/`throw` cancellation path of spec §5).
    pub fn close(&mut self) {
        self.inner = None;
    }
}

/// Adapts an already-collected `Vec<Result<Row, Error>>` into a [`Stream`] without
/// pulling in a streams-combinator crate for something this small (same rationale as
/// the `frame` module's hand-rolled `Once` adapter).
struct VecStream(std::vec::IntoIter<Result<Row, Error>>);

impl Stream for VecStream {
    type Item = Result<Row, Error>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut core::task::Context<'_>) -> core::task::Poll<Option<Self::Item>> {
        core::task::Poll::Ready(self.get_mut().0.next())
    }
}
