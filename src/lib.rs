pub mod chain;
pub mod cli;
pub mod driver;
pub mod error;
pub mod hop;
pub mod logging;
pub mod registry;
pub mod rpc;
pub mod stats;
pub mod timetrace;
pub mod transport;
pub mod wire;

#[cfg(test)]
mod testing;

pub use error::{BenchError, TransportError, WireError};
