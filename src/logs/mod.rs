//! Per-entry output capture: framing, rotation, tail queries.

mod sink;

pub use sink::{tail, LogSink, StreamKind};
