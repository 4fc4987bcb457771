//! Reference model for model-based testing.
//!
//! The model is a naive rendition of the connection lifecycle:
//! plain integers for channel and retry IDs, milliseconds for time, and no
//! logging or credentials. It serves as the oracle against which
//! [`chatwire_core::Connection`] is verified.
//!
//! Both sides must emit the same actions in the same order for every
//! [`Operation`]; the model is allowed to be slow and obvious, never clever.

mod connection;
pub mod operation;
mod world;

pub use connection::ModelConnection;
pub use operation::{ModelAction, Operation, OperationResult};
pub use world::{ModelWorld, ObservableState};
