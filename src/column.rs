//! Column descriptors. mirrors `xitca-postgres`'s `column.rs` shape but carries a raw
//! type oid instead of a resolved `Type`, since this protocol never advertises a type
//! catalog — only the integer oid travels on the wire (spec §3 `Column`).

use core::fmt;

/// One column of a statement response: `{name, oid}` per spec §3.
#[derive(Clone, PartialEq, Eq)]
pub struct Column {
    name: Box<str>,
    oid: u32,
}

impl Column {
    pub(crate) fn new(name: impl Into<Box<str>>, oid: u32) -> Self {
        Self { name: name.into(), oid }
    }

    /// Returns the name of the column.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the Postgres type oid of the column.
    pub fn oid(&self) -> u32 {
        self.oid
    }
}

impl fmt::Debug for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Column").field("name", &self.name).field("oid", &self.oid).finish()
    }
}
