//! Host bridge and builtin tools for the `adnify` terminal binary, exposed
//! as a library so the binary and its integration tests share one
//! implementation.

pub mod host;
pub mod tools;
