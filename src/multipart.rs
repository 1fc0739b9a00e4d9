//! The HTTP transport's multipart/form-data request writer (spec §4.2). `http-multipart`
//! in this workspace only decodes an incoming multipart body (see its `Multipart<S>`
//! parser); there is no encoder to build on, so this is written from scratch, grounded
//! in that crate's own header/`Content-Disposition` naming (`header.rs`,
//! `content_disposition.rs`: `form-data; name="..."`) rather than literal reuse.

use core::{
    hash::{BuildHasher, Hasher},
    pin::Pin,
    task::{Context, Poll},
    time::{SystemTime, UNIX_EPOCH},
};
use std::collections::{hash_map::RandomState, VecDeque};

use bytes::{Bytes, BytesMut};
use futures_core::Stream;

use crate::{
    error::Error,
    frame::{EncodedStatement, ExtendedData, ExtendedFrame, ParamFormat},
    urn,
};

/// `----PPG<timestamp><random>`, chosen to be vanishingly unlikely to occur inside a
/// JSON or opaque-bytes payload.
pub fn new_boundary() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let random = RandomState::new().build_hasher().finish();
    format!("----PPG{millis}{random:016x}")
}

pub fn content_type_header(boundary: &str) -> String {
    format!("multipart/form-data; profile=\"{}\"; boundary={boundary}", urn::QUERY)
}

enum Segment {
    Bytes(Bytes),
    Stream(crate::frame::ByteStream),
}

/// A `Stream<Item = Result<Bytes, Error>>` suitable for use as a streaming request
/// body: one part for the query descriptor, one part per extended parameter frame, in
/// frame order, emitted as each segment becomes ready (streaming parameter bodies are
/// forwarded chunk-by-chunk rather than buffered whole, per spec §5).
pub struct MultipartBody {
    queue: VecDeque<Segment>,
}

impl MultipartBody {
    pub fn new(boundary: &str, statement: EncodedStatement) -> Result<Self, Error> {
        let mut queue = VecDeque::new();

        push_json_part(&mut queue, boundary, urn::DESCRIPTOR, &statement.descriptor)?;

        for ExtendedFrame { format, data } in statement.extended {
            let (urn, content_type) = match format {
                ParamFormat::Text => (
                    urn::PARAM_TEXT,
                    format!("text/plain; charset=utf-8; profile=\"{}\"", urn::PARAM_TEXT),
                ),
                ParamFormat::Binary => (
                    urn::PARAM_BINARY,
                    format!("application/octet-stream; profile=\"{}\"", urn::PARAM_BINARY),
                ),
            };
            push_header(&mut queue, boundary, urn, &content_type);
            match data {
                ExtendedData::Bytes(b) => queue.push_back(Segment::Bytes(b)),
                ExtendedData::Stream(s) => queue.push_back(Segment::Stream(s)),
            }
            queue.push_back(Segment::Bytes(Bytes::from_static(b"\r\n")));
        }

        queue.push_back(Segment::Bytes(Bytes::from(format!("--{boundary}--\r\n"))));

        Ok(Self { queue })
    }
}

fn push_header(queue: &mut VecDeque<Segment>, boundary: &str, urn: &str, content_type: &str) {
    let mut buf = BytesMut::new();
    buf.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    buf.extend_from_slice(format!("Content-Disposition: form-data; name=\"{urn}\"\r\n").as_bytes());
    buf.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
    queue.push_back(Segment::Bytes(buf.freeze()));
}

fn push_json_part(
    queue: &mut VecDeque<Segment>,
    boundary: &str,
    urn: &str,
    value: &serde_json::Value,
) -> Result<(), Error> {
    let content_type = format!("application/json; profile=\"{urn}\"");
    push_header(queue, boundary, urn, &content_type);
    let body = serde_json::to_vec(value).map_err(Error::from)?;
    queue.push_back(Segment::Bytes(Bytes::from(body)));
    queue.push_back(Segment::Bytes(Bytes::from_static(b"\r\n")));
    Ok(())
}

impl Stream for MultipartBody {
    type Item = Result<Bytes, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match this.queue.front_mut() {
                None => return Poll::Ready(None),
                Some(Segment::Bytes(_)) => {
                    let Some(Segment::Bytes(b)) = this.queue.pop_front() else {
                        unreachable!()
                    };
                    return Poll::Ready(Some(Ok(b)));
                }
                Some(Segment::Stream(s)) => match s.as_mut().poll_next(cx) {
                    Poll::Ready(Some(item)) => return Poll::Ready(Some(item)),
                    Poll::Ready(None) => {
                        this.queue.pop_front();
                        continue;
                    }
                    Poll::Pending => return Poll::Pending,
                },
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::frame::{encode_statement, RawParameter, StatementKind};

    async fn drain(mut body: MultipartBody) -> Vec<u8> {
        use std::future::poll_fn;
        let mut out = Vec::new();
        loop {
            match poll_fn(|cx| Pin::new(&mut body).poll_next(cx)).await {
                Some(chunk) => out.extend_from_slice(&chunk.unwrap()),
                None => break,
            }
        }
        out
    }

    #[tokio::test]
    async fn emits_descriptor_and_extended_parts_in_order() {
        let stmt = encode_statement(
            StatementKind::Query,
            "SELECT $1",
            vec![RawParameter::text("x".repeat(1500))],
        )
        .await
        .unwrap();
        let boundary = "----PPGtest";
        let body = MultipartBody::new(boundary, stmt).unwrap();
        let bytes = drain(body).await;
        let text = String::from_utf8(bytes).unwrap();

        assert!(text.starts_with("------PPGtest\r\n"));
        assert!(text.contains("name=\"urn:prisma:query:descriptor\""));
        assert!(text.contains("application/json"));
        assert!(text.contains("name=\"urn:prisma:query:param:text\""));
        assert!(text.contains("x".repeat(1500).as_str()));
        assert!(text.trim_end().ends_with("----PPGtest--"));

        let descriptor_pos = text.find("descriptor\"").unwrap();
        let param_pos = text.find("param:text\"").unwrap();
        assert!(descriptor_pos < param_pos);
    }

    #[tokio::test]
    async fn inline_only_statement_has_no_extended_part() {
        let stmt = encode_statement(StatementKind::Query, "SELECT $1", vec![RawParameter::text("hi")])
            .await
            .unwrap();
        let body = MultipartBody::new("----PPGtest", stmt).unwrap();
        let text = String::from_utf8(drain(body).await).unwrap();
        assert!(!text.contains("param:"));
    }

    #[test]
    fn boundary_has_expected_shape() {
        let b = new_boundary();
        assert!(b.starts_with("----PPG"));
    }
}
