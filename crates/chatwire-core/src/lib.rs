//! Chatwire core
//!
//! Runtime-independent pieces of the messaging client: the connection
//! lifecycle state machine, the per-kind listener registry, and the inbound
//! event dispatcher.
//!
//! # Architecture
//!
//! ```text
//!   façade ──commands──▶ Connection (state machine) ──actions──▶ driver I/O
//!                                                                   │
//!   subscribers ◀── ListenerRegistry ◀── Dispatcher ◀──events───────┘
//! ```
//!
//! Nothing in this crate performs I/O or spawns tasks. [`Connection`] takes
//! events and returns [`ConnectionAction`]s; the driver in `chatwire-client`
//! executes them. Time is passed in explicitly so the state machine can be
//! driven by a simulated clock.
//!
//! # Collaborators
//!
//! The surrounding application supplies three read-only collaborators:
//!
//! - [`TokenSource`]: current bearer credential
//! - [`NotificationSink`]: toast/notification surface
//! - [`RouteAwareness`]: current navigation path

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod connection;
pub mod dispatcher;
pub mod env;
mod error;
pub mod notify;
pub mod registry;
pub mod route;
pub mod session;

pub use chatwire_proto as proto;
pub use connection::{
    ChannelId, CloseReason, ConnectContext, Connection, ConnectionAction, ConnectionConfig,
    ConnectionState, RetryId,
};
pub use dispatcher::{DispatchReport, Dispatcher};
pub use env::Environment;
pub use error::{ConnectionError, SessionError};
pub use notify::{LogNotificationSink, NotificationSink};
pub use registry::{Delivery, Listener, ListenerId, ListenerRegistry, Subscription};
pub use route::{AuthRoutes, NoRoute, RouteAwareness};
pub use session::{BearerToken, SharedToken, TokenSource};
