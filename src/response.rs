//! The statement response: columns plus a lazy row stream (spec §3 "Statement
//! response"). Grounded in `xitca-postgres`'s `driver/codec/response.rs` `IntoResponse`
//! pattern of pairing a columns descriptor with a row stream, simplified since this
//! protocol has no prepared-statement/portal layer to thread through.

use crate::{column::Column, error::Error, row::RowStream};

pub struct StatementResponse {
    columns: Vec<Column>,
    rows: RowStream,
}

impl StatementResponse {
    pub(crate) fn new(columns: Vec<Column>, rows: RowStream) -> Self {
        Self { columns, rows }
    }

    pub(crate) fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: RowStream::empty(),
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn rows(&mut self) -> &mut RowStream {
        &mut self.rows
    }

    pub fn into_rows(self) -> RowStream {
        self.rows
    }

    /// `exec`'s affected-row-count extraction (spec §4.5): reads exactly one row
    /// whose single value is a nonnegative decimal integer.
    pub async fn affected_rows(mut self) -> Result<u64, Error> {
        let row = self
            .rows
            .next()
            .await
            .ok_or_else(|| crate::error::ProtocolError::from("exec response is missing its affected-row row"))??;

        let value = row
            .into_iter()
            .next()
            .flatten()
            .ok_or_else(|| crate::error::ProtocolError::from("exec response row has no value"))?;

        value
            .parse::<u64>()
            .map_err(|_| crate::error::ProtocolError::from(format!("exec response value is not a nonnegative integer: {value}")).into())
    }
}
