//! Deterministic simulation harness for the chatwire client.
//!
//! Turmoil-based implementations of the `Environment` and `Transport` traits
//! plus a scripted backend, so reconnect timing, heartbeats and network
//! faults can be exercised reproducibly in virtual time.
//!
//! # Model-Based Testing
//!
//! The `model` module provides a reference implementation of the connection
//! lifecycle. Operations are applied to both the model and the real
//! [`chatwire_core::Connection`], and their actions and observable states are
//! compared.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod model;
pub mod real_world;
pub mod sim_env;
pub mod sim_server;
pub mod sim_transport;

pub use model::{
    ModelAction, ModelConnection, ModelWorld, ObservableState, Operation, OperationResult,
};
pub use real_world::RealWorld;
pub use sim_env::SimEnv;
pub use sim_server::{ServerBehavior, ServerStats, SimServer};
pub use sim_transport::SimTransport;
