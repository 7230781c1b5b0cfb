//! Low-level reading helpers for slide containers

pub mod byte_order;
pub mod seekable;
