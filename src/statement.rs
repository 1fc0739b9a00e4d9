//! The statement layer (spec §4.5): the single entry point both transports funnel
//! through. `statement()` encodes parameters, hands the resulting frames to whichever
//! transport a [`Transport`] selects, and `query`/`exec` are thin convenience wrappers
//! over it, exactly as `xitca-postgres`'s `Client::query`/`Client::execute` wrap its own
//! `_query`/`_execute` primitives in `lib.rs`.

use xitca_client::Client;

use crate::{
    config::Config,
    error::Error,
    frame::{encode_statement, RawParameter, StatementKind},
    http,
    response::StatementResponse,
    types::{IntoParam, Param},
    ws::{encode_messages, WsHandle},
};

/// Which wire the encoded frames get written to.
pub(crate) enum Transport<'a> {
    Http { client: &'a Client, config: &'a Config },
    WebSocket(&'a WsHandle),
}

/// Run one statement end to end: serialize params, encode frames, dispatch to the
/// selected transport.
pub(crate) async fn statement(
    transport: Transport<'_>,
    kind: StatementKind,
    sql: impl Into<String>,
    params: Vec<Param>,
) -> Result<StatementResponse, Error> {
    let raw: Vec<RawParameter> = params.into_iter().map(Param::into_raw).collect();
    let encoded = encode_statement(kind, sql, raw).await?;

    match transport {
        Transport::Http { client, config } => http::send_statement(client, config, encoded).await,
        Transport::WebSocket(handle) => {
            let frames = encode_messages(encoded).await?;
            handle.statement(frames).await
        }
    }
}

/// `query(sql, ...params) -> statement-response` (spec §4.5).
pub(crate) async fn query(
    transport: Transport<'_>,
    sql: impl Into<String>,
    params: impl IntoParams,
) -> Result<StatementResponse, Error> {
    statement(transport, StatementKind::Query, sql, params.into_params()).await
}

/// `exec(sql, ...params) -> affected-count` (spec §4.5).
pub(crate) async fn exec(transport: Transport<'_>, sql: impl Into<String>, params: impl IntoParams) -> Result<u64, Error> {
    let response = statement(transport, StatementKind::Exec, sql, params.into_params()).await?;
    response.affected_rows().await
}

/// Converts a parameter list passed at a call site into the `Vec<Param>` `statement()`
/// expects. Implemented for tuples up to a reasonable arity so callers can write
/// `query("SELECT $1,$2", (a, b))` rather than building a `Vec` by hand.
pub trait IntoParams {
    fn into_params(self) -> Vec<Param>;
}

impl IntoParams for () {
    fn into_params(self) -> Vec<Param> {
        Vec::new()
    }
}

impl IntoParams for Vec<Param> {
    fn into_params(self) -> Vec<Param> {
        self
    }
}

macro_rules! impl_into_params_tuple {
    ($($idx:tt $t:ident),+) => {
        impl<$($t: IntoParam),+> IntoParams for ($($t,)+) {
            fn into_params(self) -> Vec<Param> {
                vec![$(self.$idx.into_param()),+]
            }
        }
    };
}

impl_into_params_tuple!(0 A);
impl_into_params_tuple!(0 A, 1 B);
impl_into_params_tuple!(0 A, 1 B, 2 C);
impl_into_params_tuple!(0 A, 1 B, 2 C, 3 D);
impl_into_params_tuple!(0 A, 1 B, 2 C, 3 D, 4 E);
impl_into_params_tuple!(0 A, 1 B, 2 C, 3 D, 4 E, 5 F);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unit_params_is_empty() {
        assert!(().into_params().is_empty());
    }

    #[test]
    fn single_tuple_wraps_one_param() {
        let params = (5i32,).into_params();
        assert_eq!(params, vec![Param::Int(5)]);
    }

    #[test]
    fn multi_tuple_preserves_order() {
        let params = ("x", 1i32, true).into_params();
        assert_eq!(params, vec![Param::Text("x".into()), Param::Int(1), Param::Bool(true)]);
    }
}
