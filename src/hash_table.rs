//! The bucket table and its entry chains.

pub(crate) mod bucket;
pub(crate) mod table;
