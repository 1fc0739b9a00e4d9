//! A serverless Postgres client speaking the HTTP (`multipart/form-data` in,
//! `application/x-ndjson` out) and WebSocket transports of a Prisma-style data proxy.
//!
//! The HTTP transport ([`HttpClient`]) is stateless: every statement is an independent
//! request and carries its own credentials. The WebSocket transport ([`Session`]) is
//! stateful: one authenticated connection serializes and pipelines every statement
//! submitted on it. [`transaction`] and [`Batch`]/[`batch`] are built on top of a
//! [`Session`] for the scoped, all-exit-paths-release usage spec §4.6 describes.

mod column;
mod config;
mod error;
mod frame;
mod http;
mod multipart;
mod queue;
mod response;
mod row;
mod session;
mod statement;
mod types;
mod urn;
mod ws;

pub use column::Column;
pub use config::Config;
pub use error::{DatabaseError, Error, HttpResponseError, ProtocolError, ValidationError, WebSocketError};
pub use response::StatementResponse;
pub use row::{Row, RowStream};
pub use session::{batch, transaction, Batch, BatchItem, BatchResult, Session};
pub use statement::IntoParams;
pub use types::{IntoParam, Param, ParserTable, Value};

use xitca_client::Client;

use crate::statement::Transport;

/// The stateless HTTP transport (spec §4.2, §5 "HTTP transport: stateless; each
/// statement is an independent request"): wraps a [`xitca_client::Client`] connection
/// pool and a [`Config`], and issues one `multipart/form-data` request per statement.
///
/// Unlike [`Session`], there's no handshake or connection state to hold between calls;
/// the wrapped [`Client`] exists purely to reuse the underlying connection pool across
/// statements rather than paying a fresh TCP/TLS handshake for each one.
pub struct HttpClient {
    client: Client,
    config: Config,
}

impl HttpClient {
    /// Build an HTTP client around `config`, with a freshly constructed connection
    /// pool.
    pub fn new(config: Config) -> Self {
        Self { client: Client::new(), config }
    }

    /// `query(sql, ...params) -> statement-response` (spec §4.5) over HTTP.
    pub async fn query(&self, sql: impl Into<String>, params: impl IntoParams) -> Result<StatementResponse, Error> {
        statement::query(
            Transport::Http {
                client: &self.client,
                config: &self.config,
            },
            sql,
            params,
        )
        .await
    }

    /// `exec(sql, ...params) -> affected-count` (spec §4.5) over HTTP.
    pub async fn exec(&self, sql: impl Into<String>, params: impl IntoParams) -> Result<u64, Error> {
        statement::exec(
            Transport::Http {
                client: &self.client,
                config: &self.config,
            },
            sql,
            params,
        )
        .await
    }
}
