//! Broker backends.
//!
//! Concrete implementations of the domain-level [`Broker`](crate::Broker)
//! trait, each exposed through a [`Connector`](crate::Connector). Networked
//! backends are hidden behind feature flags.
//!
//! Session and role code must not depend on backend-specific types.

pub(crate) mod memory;

#[cfg(feature = "transport_lapin")]
mod amqp;

pub use memory::{MemoryConnector, MemoryHub};

#[cfg(feature = "transport_lapin")]
pub use amqp::LapinConnector;
