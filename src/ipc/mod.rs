//! IPC module for bridge and popup communication

mod protocol;
mod server;

pub use server::{Server, ServerContext};
