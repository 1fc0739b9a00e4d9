//! Query queue & running-query state machine (spec §4.4). The FIFO itself is a plain
//! `VecDeque` — unlike `xitca-postgres`'s `util/queue.rs` `ArrayQueue<T, const N>` this
//! queue has no fixed capacity, since an arbitrary number of pipelined statements may
//! be in flight on one WebSocket connection at once. Per-query row delivery reuses the
//! "one-waiter row channel" design note almost for free by handing each query an
//! unbounded `tokio::sync::mpsc` channel: the channel itself absorbs bursts from a
//! slow consumer and there is never more than one receiver, matching the spec's SPSC
//! rendezvous description without hand-rolling a waiter list.

use core::{
    fmt,
    pin::Pin,
    task::{Context, Poll},
};
use std::collections::{HashMap, VecDeque};

use futures_core::Stream;
use tokio::sync::{mpsc, oneshot};

use crate::{
    column::Column,
    error::Error,
    response::StatementResponse,
    row::{Row, RowStream},
};

/// The four inbound frame kinds of spec §3, already classified by URN + shape by the
/// WebSocket connection layer before being handed to the queue.
pub enum InboundFrame {
    Description(Vec<Column>),
    DataRow(Row),
    Complete,
    Error {
        code: String,
        message: String,
        details: HashMap<String, String>,
    },
}

/// A reason an entire queue is aborted: a WebSocket-level error/close, or a protocol
/// violation. Kept as plain data (rather than a boxed [`Error`]) because it must be
/// turned into a *fresh* error for every aborted query.
#[derive(Clone)]
pub enum AbortReason {
    WebSocket {
        message: String,
        code: Option<u16>,
        reason: Option<String>,
    },
    Protocol(String),
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::WebSocket { message, .. } => write!(f, "websocket error: {message}"),
            AbortReason::Protocol(message) => write!(f, "protocol error: {message}"),
        }
    }
}

impl AbortReason {
    fn into_error(self) -> Error {
        match self {
            AbortReason::WebSocket { message, code, reason } => {
                crate::error::WebSocketError { message, code, reason }.into()
            }
            AbortReason::Protocol(message) => Error::protocol(message),
        }
    }
}

struct RunningQuery {
    tx_row: mpsc::UnboundedSender<Result<Row, Error>>,
    rows: Option<RowStream>,
    statement_tx: Option<oneshot::Sender<Result<StatementResponse, Error>>>,
}

/// FIFO of in-flight queries on one WebSocket connection.
#[derive(Default)]
pub struct QueryQueue {
    queue: VecDeque<RunningQuery>,
}

/// Caller-facing handle returned by [`QueryQueue::enqueue`]: await it once to get the
/// statement response (columns + row stream), exactly as the statement layer's
/// `enqueue-new-query` + `send-frames` sequence expects.
pub type PendingStatement = oneshot::Receiver<Result<StatementResponse, Error>>;

impl QueryQueue {
    pub fn new() -> Self {
        Self { queue: VecDeque::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Append a new running query to the tail of the queue (spec: "new queries are
    /// appended on enqueue").
    pub fn enqueue(&mut self) -> PendingStatement {
        let (statement_tx, statement_rx) = oneshot::channel();
        let (tx_row, rx_row) = mpsc::unbounded_channel();
        let rows = RowStream::new(Box::pin(RowReceiverStream(rx_row)));
        self.queue.push_back(RunningQuery {
            tx_row,
            rows: Some(rows),
            statement_tx: Some(statement_tx),
        });
        statement_rx
    }

    /// Apply one inbound frame, which always belongs to the query at the head of the
    /// queue. Returns an error if the queue is empty — the server replied to a query
    /// we never sent, itself a protocol violation the caller should treat as fatal.
    pub fn dispatch(&mut self, frame: InboundFrame) -> Result<(), Error> {
        match frame {
            InboundFrame::Description(columns) => self.on_description(columns),
            InboundFrame::DataRow(row) => self.on_datarow(row),
            InboundFrame::Complete => self.on_complete(),
            InboundFrame::Error { code, message, details } => self.on_error(code, message, details),
        }
    }

    fn head_mut(&mut self) -> Result<&mut RunningQuery, Error> {
        self.queue
            .front_mut()
            .ok_or_else(|| Error::protocol("inbound frame with no queued query"))
    }

    fn on_description(&mut self, columns: Vec<Column>) -> Result<(), Error> {
        let head = self.head_mut()?;
        if let (Some(tx), Some(rows)) = (head.statement_tx.take(), head.rows.take()) {
            let response = StatementResponse::new(columns, rows);
            let _ = tx.send(Ok(response));
        }
        Ok(())
    }

    fn on_datarow(&mut self, row: Row) -> Result<(), Error> {
        let head = self.head_mut()?;
        // description never arrived for this query yet: columns = ∅, resolve now
        // (spec §4.2 step 2 / §4.4 dispatch table "anything else ... resolve with
        // columns: ∅").
        if let (Some(tx), Some(rows)) = (head.statement_tx.take(), head.rows.take()) {
            let response = StatementResponse::new(Vec::new(), rows);
            let _ = tx.send(Ok(response));
        }
        let _ = head.tx_row.send(Ok(row));
        Ok(())
    }

    fn on_complete(&mut self) -> Result<(), Error> {
        let mut head = self.pop_front()?;
        if let (Some(tx), Some(rows)) = (head.statement_tx.take(), head.rows.take()) {
            // no description and no data row ever arrived: empty result.
            let response = StatementResponse::new(Vec::new(), rows);
            let _ = tx.send(Ok(response));
        }
        // dropping `head.tx_row` here closes the channel, which ends the row stream
        // for a consumer that already attached to it.
        Ok(())
    }

    fn on_error(&mut self, code: String, message: String, details: HashMap<String, String>) -> Result<(), Error> {
        let mut head = self.pop_front()?;
        // exactly one of these fires: either the statement promise itself is still
        // unresolved (no description/row seen yet) or a row stream is already
        // attached and waiting on a value.
        if let Some(tx) = head.statement_tx.take() {
            let _ = tx.send(Err(Error::db(code, message, details)));
        } else {
            let _ = head.tx_row.send(Err(Error::db(code, message, details)));
        }
        Ok(())
    }

    fn pop_front(&mut self) -> Result<RunningQuery, Error> {
        self.queue
            .pop_front()
            .ok_or_else(|| Error::protocol("inbound terminal frame with no queued query"))
    }

    /// Abort every queued query with a fatal error (protocol violation, or a
    /// transport-level WebSocket error/close). The queue is left empty afterwards.
    pub fn abort_all(&mut self, reason: AbortReason) {
        for mut query in self.queue.drain(..) {
            reject(&mut query, reason.clone().into_error());
        }
    }

    /// Reject only the most recently enqueued query (spec §4.3: "a send failure
    /// aborts the associated queued query", narrower than [`QueryQueue::abort_all`]'s
    /// transport-fatal case). Sound only because sends happen one at a time on a
    /// single connection task: the query whose frames just failed to send is always
    /// the one most recently pushed onto the tail.
    pub fn abort_tail(&mut self, reason: AbortReason) {
        if let Some(mut query) = self.queue.pop_back() {
            reject(&mut query, reason.into_error());
        }
    }
}

fn reject(query: &mut RunningQuery, err: Error) {
    if let Some(tx) = query.statement_tx.take() {
        let _ = tx.send(Err(err));
    } else {
        let _ = query.tx_row.send(Err(err));
    }
}

struct RowReceiverStream(mpsc::UnboundedReceiver<Result<Row, Error>>);

impl Stream for RowReceiverStream {
    type Item = Result<Row, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.0.poll_recv(cx)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn fifo_ordering_of_enqueue() {
        let mut q = QueryQueue::new();
        let _a = q.enqueue();
        let _b = q.enqueue();
        assert_eq!(q.len(), 2);
        q.dispatch(InboundFrame::Complete).unwrap();
        assert_eq!(q.len(), 1);
    }

    #[tokio::test]
    async fn description_then_datarow_then_complete() {
        let mut q = QueryQueue::new();
        let pending = q.enqueue();
        q.dispatch(InboundFrame::Description(vec![Column::new("c", 25)])).unwrap();
        q.dispatch(InboundFrame::DataRow(vec![Some("hello".into())])).unwrap();
        q.dispatch(InboundFrame::Complete).unwrap();

        let mut resp = pending.await.unwrap().unwrap();
        assert_eq!(resp.columns().len(), 1);
        let rows = resp.rows().collect().await.unwrap();
        assert_eq!(rows, vec![vec![Some("hello".into())]]);
    }

    #[tokio::test]
    async fn datarow_before_description_yields_empty_columns() {
        let mut q = QueryQueue::new();
        let pending = q.enqueue();
        q.dispatch(InboundFrame::DataRow(vec![Some("x".into())])).unwrap();
        q.dispatch(InboundFrame::Complete).unwrap();

        let mut resp = pending.await.unwrap().unwrap();
        assert!(resp.columns().is_empty());
        assert_eq!(resp.rows().collect().await.unwrap(), vec![vec![Some("x".into())]]);
    }

    #[tokio::test]
    async fn complete_with_no_rows_resolves_empty_response() {
        let mut q = QueryQueue::new();
        let pending = q.enqueue();
        q.dispatch(InboundFrame::Complete).unwrap();
        let mut resp = pending.await.unwrap().unwrap();
        assert!(resp.columns().is_empty());
        assert!(resp.rows().collect().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn error_before_description_rejects_statement_promise() {
        let mut q = QueryQueue::new();
        let pending = q.enqueue();
        q.dispatch(InboundFrame::Error {
            code: "42601".into(),
            message: "syntax error".into(),
            details: HashMap::new(),
        })
        .unwrap();
        assert!(pending.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn abort_all_rejects_every_queued_query() {
        let mut q = QueryQueue::new();
        let a = q.enqueue();
        let b = q.enqueue();
        q.abort_all(AbortReason::Protocol("binary message on read path".into()));
        assert!(a.await.unwrap().is_err());
        assert!(b.await.unwrap().is_err());
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn pipelined_queries_do_not_interleave_rows() {
        let mut q = QueryQueue::new();
        let p1 = q.enqueue();
        let p2 = q.enqueue();
        let p3 = q.enqueue();

        q.dispatch(InboundFrame::DataRow(vec![Some("query1".into())])).unwrap();
        q.dispatch(InboundFrame::Complete).unwrap();
        q.dispatch(InboundFrame::DataRow(vec![Some("query2".into())])).unwrap();
        q.dispatch(InboundFrame::Complete).unwrap();
        q.dispatch(InboundFrame::DataRow(vec![Some("query3".into())])).unwrap();
        q.dispatch(InboundFrame::Complete).unwrap();

        for (pending, expect) in [(p1, "query1"), (p2, "query2"), (p3, "query3")] {
            let mut resp = pending.await.unwrap().unwrap();
            let rows = resp.rows().collect().await.unwrap();
            assert_eq!(rows, vec![vec![Some(expect.into())]]);
        }
    }
}
