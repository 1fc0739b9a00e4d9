//! Wire framing layer (spec §4.1): turns `(kind, sql, [raw_param])` into
//! `[QueryDescriptor, ExtendedParam0, ExtendedParam1, ...]`.
//!
//! Tagged unions are modeled as Rust enums with exhaustive matches rather than the
//! shape-tests the spec's language-neutral description hints at (`"query" in frame`,
//! `frame.type === "text"`), per the "tagged unions over duck typing" design note.

use core::pin::Pin;
use std::future::poll_fn;

use bytes::Bytes;
use futures_core::Stream;
use serde::Serialize;

use crate::error::{Error, ValidationError};

/// Payloads larger than this many bytes are carried in a follow-up extended frame
/// instead of being inlined into the query descriptor.
pub const INLINE_THRESHOLD: u64 = 1024;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParamFormat {
    Text,
    Binary,
}

/// A bounded byte stream with a declared, known length. Consumed exactly once.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, Error>> + Send>>;

/// Tagged union of the three raw parameter shapes spec §3 admits, plus `Null`.
pub enum RawParameter {
    Null,
    Text(String),
    Bytes(Bytes, ParamFormat),
    Stream { format: ParamFormat, len: u64, data: ByteStream },
}

impl RawParameter {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn bytes(value: impl Into<Bytes>, format: ParamFormat) -> Self {
        Self::Bytes(value.into(), format)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StatementKind {
    Query,
    Exec,
}

/// Inline or extended parameter descriptor, embedded in the query descriptor frame.
#[derive(Serialize)]
#[serde(untagged)]
enum ParamDescriptor {
    Inline {
        #[serde(rename = "type")]
        ty: &'static str,
        value: Option<String>,
    },
    Extended {
        #[serde(rename = "type")]
        ty: &'static str,
        #[serde(rename = "byteSize")]
        byte_size: u64,
    },
}

#[derive(Serialize)]
struct QueryDescriptor {
    #[serde(skip_serializing_if = "Option::is_none")]
    query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<Vec<ParamDescriptor>>,
}

/// One follow-up frame for an extended (non-inline) parameter.
pub struct ExtendedFrame {
    pub format: ParamFormat,
    pub data: ExtendedData,
}

pub enum ExtendedData {
    Bytes(Bytes),
    Stream(ByteStream),
}

/// The complete outbound frame sequence for one statement: a JSON query descriptor
/// followed by zero or more extended parameter frames, in descriptor order.
pub struct EncodedStatement {
    pub descriptor: serde_json::Value,
    pub extended: Vec<ExtendedFrame>,
}

/// Turn a statement's parameters into the descriptor + extended frame sequence.
pub async fn encode_statement(
    kind: StatementKind,
    sql: impl Into<String>,
    params: Vec<RawParameter>,
) -> Result<EncodedStatement, Error> {
    let mut descriptors = Vec::with_capacity(params.len());
    let mut extended = Vec::new();

    for param in params {
        let (descriptor, frame) = encode_param(param).await?;
        descriptors.push(descriptor);
        if let Some(frame) = frame {
            extended.push(frame);
        }
    }

    let sql = sql.into();
    let parameters = if descriptors.is_empty() { None } else { Some(descriptors) };

    let descriptor = match kind {
        StatementKind::Query => QueryDescriptor {
            query: Some(sql),
            exec: None,
            parameters,
        },
        StatementKind::Exec => QueryDescriptor {
            query: None,
            exec: Some(sql),
            parameters,
        },
    };

    let descriptor = serde_json::to_value(descriptor).map_err(Error::from)?;

    Ok(EncodedStatement { descriptor, extended })
}

async fn encode_param(param: RawParameter) -> Result<(ParamDescriptor, Option<ExtendedFrame>), Error> {
    match param {
        RawParameter::Null => Ok((
            ParamDescriptor::Inline {
                ty: "text",
                value: None,
            },
            None,
        )),
        RawParameter::Text(s) => {
            let len = s.len() as u64;
            if len <= INLINE_THRESHOLD {
                Ok((
                    ParamDescriptor::Inline {
                        ty: "text",
                        value: Some(s),
                    },
                    None,
                ))
            } else {
                let descriptor = ParamDescriptor::Extended {
                    ty: "text",
                    byte_size: len,
                };
                let frame = ExtendedFrame {
                    format: ParamFormat::Text,
                    data: ExtendedData::Bytes(Bytes::from(s.into_bytes())),
                };
                Ok((descriptor, Some(frame)))
            }
        }
        RawParameter::Bytes(b, ParamFormat::Text) => {
            let len = b.len() as u64;
            if len <= INLINE_THRESHOLD {
                let s = String::from_utf8(b.to_vec())
                    .map_err(|_| ValidationError::from("text-format byte parameter is not valid utf-8"))?;
                Ok((
                    ParamDescriptor::Inline {
                        ty: "text",
                        value: Some(s),
                    },
                    None,
                ))
            } else {
                let descriptor = ParamDescriptor::Extended {
                    ty: "text",
                    byte_size: len,
                };
                let frame = ExtendedFrame {
                    format: ParamFormat::Text,
                    data: ExtendedData::Bytes(b),
                };
                Ok((descriptor, Some(frame)))
            }
        }
        RawParameter::Bytes(b, ParamFormat::Binary) => {
            let len = b.len() as u64;
            if len <= INLINE_THRESHOLD {
                let value = base64_encode(&b);
                Ok((
                    ParamDescriptor::Inline {
                        ty: "binary",
                        value: Some(value),
                    },
                    None,
                ))
            } else {
                let descriptor = ParamDescriptor::Extended {
                    ty: "binary",
                    byte_size: len,
                };
                let frame = ExtendedFrame {
                    format: ParamFormat::Binary,
                    data: ExtendedData::Bytes(b),
                };
                Ok((descriptor, Some(frame)))
            }
        }
        RawParameter::Stream { format, len, data } => {
            if len <= INLINE_THRESHOLD {
                let bytes = collect_stream(data, len as usize).await?;
                match format {
                    ParamFormat::Text => {
                        let s = String::from_utf8(bytes)
                            .map_err(|_| ValidationError::from("text-format stream parameter is not valid utf-8"))?;
                        Ok((
                            ParamDescriptor::Inline {
                                ty: "text",
                                value: Some(s),
                            },
                            None,
                        ))
                    }
                    ParamFormat::Binary => {
                        let value = base64_encode(&bytes);
                        Ok((
                            ParamDescriptor::Inline {
                                ty: "binary",
                                value: Some(value),
                            },
                            None,
                        ))
                    }
                }
            } else {
                let ty = match format {
                    ParamFormat::Text => "text",
                    ParamFormat::Binary => "binary",
                };
                let descriptor = ParamDescriptor::Extended { ty, byte_size: len };
                let frame = ExtendedFrame {
                    format,
                    data: ExtendedData::Stream(data),
                };
                Ok((descriptor, Some(frame)))
            }
        }
    }
}

pub(crate) async fn collect_stream(mut stream: ByteStream, size_hint: usize) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::with_capacity(size_hint);
    loop {
        match poll_fn(|cx| stream.as_mut().poll_next(cx)).await {
            Some(chunk) => buf.extend_from_slice(&chunk?),
            None => break,
        }
    }
    Ok(buf)
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[cfg(test)]
mod test {
    use super::*;
    use futures_core::Stream as _;

    fn once_stream(bytes: Vec<u8>) -> ByteStream {
        Box::pin(futures_lite_once(bytes))
    }

    // a single-item stream without pulling in a streams-combinator crate; mirrors the
    // teacher's preference for hand-rolled adapters over extra dependencies for
    // something this small.
    fn futures_lite_once(bytes: Vec<u8>) -> impl Stream<Item = Result<Bytes, Error>> {
        struct Once(Option<Bytes>);
        impl Stream for Once {
            type Item = Result<Bytes, Error>;
            fn poll_next(
                mut self: Pin<&mut Self>,
                _cx: &mut core::task::Context<'_>,
            ) -> core::task::Poll<Option<Self::Item>> {
                core::task::Poll::Ready(self.0.take().map(Ok))
            }
        }
        Once(Some(Bytes::from(bytes)))
    }

    #[tokio::test]
    async fn inline_threshold_boundary() {
        let s = "x".repeat(1024);
        let enc = encode_statement(StatementKind::Query, "SELECT $1", vec![RawParameter::text(s)])
            .await
            .unwrap();
        assert!(enc.extended.is_empty());

        let s = "x".repeat(1025);
        let enc = encode_statement(StatementKind::Query, "SELECT $1", vec![RawParameter::text(s)])
            .await
            .unwrap();
        assert_eq!(enc.extended.len(), 1);
    }

    #[tokio::test]
    async fn null_is_inline_text_with_no_value() {
        let enc = encode_statement(StatementKind::Query, "SELECT $1", vec![RawParameter::Null])
            .await
            .unwrap();
        assert!(enc.extended.is_empty());
        let params = enc.descriptor.get("parameters").unwrap().as_array().unwrap();
        assert_eq!(params[0]["type"], "text");
        assert!(params[0]["value"].is_null());
    }

    #[tokio::test]
    async fn extended_ordering_matches_descriptor_order() {
        let params = vec![
            RawParameter::text("short"),
            RawParameter::bytes(Bytes::from_static(&[1, 2, 3]), ParamFormat::Binary),
            RawParameter::text("x".repeat(1500)),
        ];
        let enc = encode_statement(StatementKind::Query, "SELECT $1,$2,$3", params).await.unwrap();
        assert_eq!(enc.extended.len(), 1);
        assert_eq!(enc.extended[0].format, ParamFormat::Text);

        let descr = enc.descriptor.get("parameters").unwrap().as_array().unwrap();
        assert_eq!(descr[0]["value"], "short");
        assert_eq!(descr[1]["value"], "AQID");
        assert_eq!(descr[2]["byteSize"], 1500);
    }

    #[tokio::test]
    async fn base64_inlining_round_trips() {
        let input = vec![10u8, 20, 30, 255];
        let enc = encode_statement(
            StatementKind::Query,
            "SELECT $1",
            vec![RawParameter::bytes(Bytes::from(input.clone()), ParamFormat::Binary)],
        )
        .await
        .unwrap();
        let value = enc.descriptor["parameters"][0]["value"].as_str().unwrap();
        use base64::Engine;
        let decoded = base64::engine::general_purpose::STANDARD.decode(value).unwrap();
        assert_eq!(decoded, input);
    }

    #[tokio::test]
    async fn short_stream_is_inlined() {
        let data = once_stream(b"hi".to_vec());
        let enc = encode_statement(
            StatementKind::Query,
            "SELECT $1",
            vec![RawParameter::Stream {
                format: ParamFormat::Text,
                len: 2,
                data,
            }],
        )
        .await
        .unwrap();
        assert!(enc.extended.is_empty());
        assert_eq!(enc.descriptor["parameters"][0]["value"], "hi");
    }

    #[tokio::test]
    async fn invalid_utf8_byte_param_is_validation_error() {
        let bad = Bytes::from_static(&[0xff, 0xfe]);
        let err = encode_statement(
            StatementKind::Query,
            "SELECT $1",
            vec![RawParameter::bytes(bad, ParamFormat::Text)],
        )
        .await
        .unwrap_err();
        assert!(!err.is_fatal());
    }
}
