//! Types and Redis hand-off helpers shared by the snipbox worker, CLI and
//! sandbox library.

pub mod redis;
pub mod types;
