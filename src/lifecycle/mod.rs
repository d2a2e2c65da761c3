//! Daemon lifecycle: signal-driven graceful shutdown

mod shutdown;

pub use shutdown::ShutdownSignal;
