//! Domain layer public interface.
//!
//! Abstractions here are independent of any broker client library.
//! Consumers import symbols via this module, not from individual files.

mod broker;

pub use broker::{
    //
    Address,
    Broker,
    BrokerPtr,
    Connector,
    Delivery,
    Inbox,
    MessageProperties,
    Publication,
    QueueSpec,
};
