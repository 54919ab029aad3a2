//! Local IPC: the newline-framed JSON protocol, the socket server, and
//! the thin client.

mod client;
mod protocol;
mod server;

pub use client::{exit_code, Client};
pub use protocol::{Action, Reply, Request, RequestOptions, TARGET_ALL};
pub use server::serve;
