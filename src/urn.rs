//! The frame URNs (spec §3): literal strings used both as WebSocket frame headers and
//! as multipart form field names.

pub const QUERY: &str = "urn:prisma:query";
pub const DESCRIPTOR: &str = "urn:prisma:query:descriptor";
pub const PARAM_TEXT: &str = "urn:prisma:query:param:text";
pub const PARAM_BINARY: &str = "urn:prisma:query:param:binary";
pub const RESULT_DESCRIPTION: &str = "urn:prisma:query:result:description";
pub const RESULT_DATAROW: &str = "urn:prisma:query:result:datarow";
pub const RESULT_COMPLETE: &str = "urn:prisma:query:result:complete";
pub const RESULT_ERROR: &str = "urn:prisma:query:result:error";
