// crates/core/src/lib.rs
pub mod bus;
pub mod classify;
pub mod error;
pub mod event;
pub mod mirror;
pub mod pipeline;
pub mod progress;
pub mod reconnect;
pub mod store;
pub mod transport;
pub mod types;

#[cfg(test)]
mod test_support;

pub use bus::*;
pub use classify::*;
pub use error::*;
pub use event::*;
pub use mirror::*;
pub use pipeline::registry::{PipelineRegistry, RegistryError};
pub use pipeline::{JobContext, JobOutput, Pipeline, ProgressReporter};
pub use progress::*;
pub use reconnect::*;
pub use store::*;
pub use transport::{EventSink, SinkError, TransportAdapter};
pub use types::*;
