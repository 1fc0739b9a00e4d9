//! The WebSocket connection (spec §4.3): an authenticated, pipelined, bidirectional
//! transport shared by every statement on a session.
//!
//! Grounded in `xitca-postgres`'s Client/Driver split (`postgres/src/driver.rs`,
//! `postgres/src/driver/generic.rs`): a cheap, cloneable handle
//! ([`WsHandle`], their `DriverTx`) submits work over an unbounded `mpsc` channel to
//! a driver future that owns the socket and the query queue outright. Unlike the
//! teacher, which hands the driver future back to the caller to `tokio::spawn`
//! (it supports io_uring and other executors this crate doesn't), `connect` here
//! spawns its own driver task directly: the session layer only ever runs on tokio
//! (see `SPEC_FULL.md` ambient stack). Owning the socket inside the task rather than
//! the handle also sidesteps the self-referential lifetime `xitca_client::ws::WebSocket<'a>`
//! would otherwise impose (it borrows the `Client` that created it).

use core::{future::poll_fn, pin::Pin};

use bytes::Bytes;
use futures_core::Stream;
use futures_sink::Sink;
use http_ws::{CloseCode, CloseReason, Message};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};
use xitca_client::{
    ws::{WebSocket, WebSocketSink},
    Client,
};

use crate::{
    config::Config,
    error::Error,
    frame::{collect_stream, EncodedStatement, ExtendedData, ExtendedFrame, ParamFormat},
    http as ndjson,
    queue::{AbortReason, InboundFrame, PendingStatement, QueryQueue},
    response::StatementResponse,
    urn,
};

enum DriverMsg {
    Submit(Submit),
    Close,
}

struct Submit {
    frames: Vec<Message>,
    respond_to: oneshot::Sender<PendingStatement>,
}

/// Cheap, cloneable handle to a running WebSocket driver task.
#[derive(Clone)]
pub(crate) struct WsHandle {
    tx: mpsc::UnboundedSender<DriverMsg>,
}

impl WsHandle {
    /// Submit one statement's pre-encoded frames and await its response (spec
    /// §4.5's "enqueue-new-query + send-frames" on the WebSocket transport).
    pub(crate) async fn statement(&self, frames: Vec<Message>) -> Result<StatementResponse, Error> {
        let (respond_to, rx) = oneshot::channel();
        self.tx
            .send(DriverMsg::Submit(Submit { frames, respond_to }))
            .map_err(|_| Error::protocol("websocket connection is closed"))?;
        let pending: PendingStatement = rx.await.map_err(|_| Error::protocol("websocket driver task ended"))?;
        pending.await.map_err(|_| Error::protocol("websocket driver task ended"))?
    }

    /// `active` (spec §3 Session): true iff the driver task is still running, i.e.
    /// the underlying socket was last observed open.
    pub(crate) fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Close the socket with code 1000 / "Normal closure" (spec §4.3 `close()`).
    pub(crate) fn close(&self) {
        let _ = self.tx.send(DriverMsg::Close);
    }
}

/// Connect, authenticate, and spawn the driver task. Resolves once the socket is
/// open and the auth frame has been sent (spec §4.3 `connect()`).
pub(crate) async fn connect(config: Config) -> Result<WsHandle, Error> {
    let (tx, rx) = mpsc::unbounded_channel();
    let (ready_tx, ready_rx) = oneshot::channel();
    tokio::spawn(run(config, rx, ready_tx));
    ready_rx
        .await
        .map_err(|_| Error::protocol("websocket driver task ended before connecting"))??;
    Ok(WsHandle { tx })
}

/// Turn one statement's frame sequence into the two-message-per-frame wire shape
/// spec §4.3 requires, materializing any streamed extended parameter into a single
/// message (spec §5: WebSocket has no chunked-part equivalent to HTTP's multipart).
pub(crate) async fn encode_messages(statement: EncodedStatement) -> Result<Vec<Message>, Error> {
    let mut out = Vec::with_capacity(2 + statement.extended.len() * 2);

    out.push(Message::Text(Bytes::from_static(urn::DESCRIPTOR.as_bytes())));
    let descriptor = serde_json::to_vec(&statement.descriptor).map_err(Error::from)?;
    out.push(Message::Text(Bytes::from(descriptor)));

    for ExtendedFrame { format, data } in statement.extended {
        let urn = match format {
            ParamFormat::Text => urn::PARAM_TEXT,
            ParamFormat::Binary => urn::PARAM_BINARY,
        };
        out.push(Message::Text(Bytes::from_static(urn.as_bytes())));

        let bytes = match data {
            ExtendedData::Bytes(b) => b,
            ExtendedData::Stream(s) => Bytes::from(collect_stream(s, 0).await?),
        };
        out.push(match format {
            ParamFormat::Text => Message::Text(bytes),
            ParamFormat::Binary => Message::Binary(bytes),
        });
    }

    Ok(out)
}

async fn run(config: Config, mut rx: mpsc::UnboundedReceiver<DriverMsg>, ready_tx: oneshot::Sender<Result<(), Error>>) {
    let client = Client::new();

    let ws = match setup(&client, &config).await {
        Ok(ws) => {
            debug!("websocket session open");
            let _ = ready_tx.send(Ok(()));
            ws
        }
        Err(e) => {
            error!("websocket handshake failed: {e}");
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let (mut sink, mut stream) = ws.split();
    let mut queue = QueryQueue::new();
    let mut state = ReadState::ExpectingUrn;

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(DriverMsg::Submit(submit)) => {
                    let pending = queue.enqueue();
                    let _ = submit.respond_to.send(pending);
                    if let Err(e) = send_frames(&mut sink, submit.frames).await {
                        error!("websocket send failed, aborting queued statement: {e}");
                        queue.abort_tail(AbortReason::WebSocket {
                            message: e.to_string(),
                            code: None,
                            reason: None,
                        });
                    }
                }
                Some(DriverMsg::Close) | None => {
                    debug!("websocket session closing");
                    let _ = close_socket(&mut sink, CloseCode::Normal, "Normal closure").await;
                    return;
                }
            },
            msg = poll_fn(|cx| Pin::new(&mut stream).poll_next(cx)) => match msg {
                Some(Ok(message)) => {
                    if let Err(reason) = handle_inbound(&mut state, message, &mut sink, &mut queue).await {
                        error!("websocket protocol violation, aborting all queued statements: {reason}");
                        queue.abort_all(reason);
                        let _ = close_socket(&mut sink, CloseCode::Protocol, "protocol violation").await;
                        return;
                    }
                }
                Some(Err(e)) => {
                    error!("websocket transport error, aborting all queued statements: {e}");
                    queue.abort_all(AbortReason::WebSocket {
                        message: e.to_string(),
                        code: None,
                        reason: None,
                    });
                    return;
                }
                None => {
                    debug!("websocket connection closed by peer");
                    queue.abort_all(AbortReason::WebSocket {
                        message: "connection closed".into(),
                        code: None,
                        reason: None,
                    });
                    return;
                }
            },
        }
    }
}

async fn setup<'a>(client: &'a Client, config: &Config) -> Result<WebSocket<'a>, Error> {
    let mut url = format!("{}/db/websocket", config.ws_endpoint());
    if let Some(db) = config.dbname_ref() {
        url.push_str("?database=");
        url.push_str(db);
    }

    let mut req = client.ws(url.as_str());
    req.headers_mut().insert(
        http::header::SEC_WEBSOCKET_PROTOCOL,
        http::HeaderValue::from_static("prisma-postgres-1.0"),
    );
    let ws = req.send().await?;

    let (user, password) = config.basic_auth_pair();
    let auth = serde_json::json!({ "username": user, "password": password });
    let payload = serde_json::to_vec(&auth).map_err(Error::from)?;

    {
        let (mut sink, _) = ws.split();
        send(&mut sink, Message::Text(Bytes::from(payload))).await?;
    }

    Ok(ws)
}

async fn send(sink: &mut WebSocketSink<'_, '_>, msg: Message) -> Result<(), Error> {
    poll_fn(|cx| Pin::new(&mut *sink).poll_ready(cx)).await?;
    Pin::new(&mut *sink).start_send(msg)?;
    poll_fn(|cx| Pin::new(&mut *sink).poll_flush(cx)).await
}

async fn send_frames(sink: &mut WebSocketSink<'_, '_>, frames: Vec<Message>) -> Result<(), Error> {
    for frame in frames {
        send(sink, frame).await?;
    }
    Ok(())
}

async fn close_socket(sink: &mut WebSocketSink<'_, '_>, code: CloseCode, reason: &str) -> Result<(), Error> {
    let _ = send(sink, Message::Close(Some(CloseReason::from((code, reason.to_string()))))).await;
    poll_fn(|cx| Pin::new(&mut *sink).poll_close(cx)).await
}

/// `expecting-urn` / `expecting-payload` per spec §4.3. Not `Copy`: the cached URN
/// must own its bytes across the await point between the header message and the
/// payload message that follows it.
enum ReadState {
    ExpectingUrn,
    ExpectingPayload(String),
}

async fn handle_inbound(
    state: &mut ReadState,
    message: Message,
    sink: &mut WebSocketSink<'_, '_>,
    queue: &mut QueryQueue,
) -> Result<(), AbortReason> {
    match message {
        Message::Text(bytes) => match core::mem::replace(state, ReadState::ExpectingUrn) {
            ReadState::ExpectingUrn => {
                let urn = String::from_utf8(bytes.to_vec())
                    .map_err(|_| AbortReason::Protocol("urn header is not valid utf-8".into()))?;
                *state = ReadState::ExpectingPayload(urn);
                Ok(())
            }
            ReadState::ExpectingPayload(urn) => {
                let frame = classify(&urn, &bytes)?;
                queue.dispatch(frame).map_err(|e| AbortReason::Protocol(e.to_string()))
            }
        },
        Message::Binary(_) => Err(AbortReason::Protocol("binary message on websocket read path".into())),
        Message::Ping(payload) => {
            let _ = send(sink, Message::Pong(payload)).await;
            Ok(())
        }
        Message::Pong(_) | Message::Nop => Ok(()),
        Message::Close(reason) => {
            let (code, text) = reason
                .map(|r| (Some(u16::from(r.code)), r.description))
                .unwrap_or((None, None));
            Err(AbortReason::WebSocket {
                message: "connection closed".into(),
                code,
                reason: text,
            })
        }
        Message::Continuation(_) => Err(AbortReason::Protocol("fragmented message on websocket read path".into())),
    }
}

fn classify(urn: &str, payload: &[u8]) -> Result<InboundFrame, AbortReason> {
    let bad_json = |e: serde_json::Error| AbortReason::Protocol(format!("malformed {urn} payload: {e}"));

    match urn {
        urn::RESULT_DESCRIPTION => {
            let v: Value = serde_json::from_slice(payload).map_err(bad_json)?;
            let columns = ndjson::parse_columns(&v).map_err(|e| AbortReason::Protocol(e.to_string()))?;
            Ok(InboundFrame::Description(columns))
        }
        urn::RESULT_DATAROW => {
            let v: Value = serde_json::from_slice(payload).map_err(bad_json)?;
            let values = v
                .get("values")
                .ok_or_else(|| AbortReason::Protocol("datarow payload is missing values".into()))?;
            let row = ndjson::parse_row(values).map_err(|e| AbortReason::Protocol(e.to_string()))?;
            Ok(InboundFrame::DataRow(row))
        }
        urn::RESULT_COMPLETE => Ok(InboundFrame::Complete),
        urn::RESULT_ERROR => {
            let v: Value = serde_json::from_slice(payload).map_err(bad_json)?;
            let error = v
                .get("error")
                .ok_or_else(|| AbortReason::Protocol("error frame payload is missing error".into()))?;
            let (code, message, details) =
                ndjson::parse_db_error_parts(error).map_err(|e| AbortReason::Protocol(e.to_string()))?;
            Ok(InboundFrame::Error { code, message, details })
        }
        other => Err(AbortReason::Protocol(format!("unknown inbound urn: {other}"))),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn text(msg: &Message) -> &[u8] {
        match msg {
            Message::Text(b) => b,
            other => panic!("expected Message::Text, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn encode_messages_emits_descriptor_header_and_payload() {
        let statement = EncodedStatement {
            descriptor: serde_json::json!({"query": "SELECT 1"}),
            extended: Vec::new(),
        };
        let messages = encode_messages(statement).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(text(&messages[0]), urn::DESCRIPTOR.as_bytes());
        assert_eq!(text(&messages[1]), br#"{"query":"SELECT 1"}"#);
    }

    #[tokio::test]
    async fn encode_messages_appends_extended_frame_with_matching_wire_type() {
        let statement = EncodedStatement {
            descriptor: serde_json::json!({"query": "SELECT $1"}),
            extended: vec![ExtendedFrame {
                format: ParamFormat::Binary,
                data: ExtendedData::Bytes(Bytes::from_static(&[1, 2, 3])),
            }],
        };
        let messages = encode_messages(statement).await.unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(text(&messages[2]), urn::PARAM_BINARY.as_bytes());
        match &messages[3] {
            Message::Binary(b) => assert_eq!(&b[..], &[1, 2, 3]),
            other => panic!("expected Message::Binary, got {other:?}"),
        }
    }

    #[test]
    fn classify_description_and_datarow_and_complete() {
        let descr = classify(
            urn::RESULT_DESCRIPTION,
            br#"{"columns":[{"name":"id","typeOid":23}]}"#,
        )
        .unwrap();
        assert!(matches!(descr, InboundFrame::Description(cols) if cols.len() == 1));

        let row = classify(urn::RESULT_DATAROW, br#"{"values":["1"]}"#).unwrap();
        assert!(matches!(row, InboundFrame::DataRow(r) if r == vec![Some("1".into())]));

        let complete = classify(urn::RESULT_COMPLETE, b"").unwrap();
        assert!(matches!(complete, InboundFrame::Complete));
    }

    #[test]
    fn classify_error_frame() {
        let payload = br#"{"error":{"code":"42601","message":"syntax error"}}"#;
        let frame = classify(urn::RESULT_ERROR, payload).unwrap();
        match frame {
            InboundFrame::Error { code, message, .. } => {
                assert_eq!(code, "42601");
                assert_eq!(message, "syntax error");
            }
            _ => panic!("expected InboundFrame::Error"),
        }
    }

    #[test]
    fn classify_unknown_urn_is_protocol_violation() {
        let err = classify("urn:prisma:query:result:bogus", b"{}").unwrap_err();
        assert!(matches!(err, AbortReason::Protocol(_)));
    }

    #[test]
    fn read_state_transitions_urn_then_payload() {
        let mut state = ReadState::ExpectingUrn;
        assert!(matches!(state, ReadState::ExpectingUrn));
        state = ReadState::ExpectingPayload(urn::RESULT_COMPLETE.to_string());
        assert!(matches!(state, ReadState::ExpectingPayload(ref u) if u == urn::RESULT_COMPLETE));
    }
}
