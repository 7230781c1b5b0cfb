//! Container tests over in-memory files

pub(crate) mod fixtures;
