//! AMQP protocol backends.
//!
//! Currently supports:
//! - lapin - AMQP 0-9-1 (RabbitMQ)

mod lapin;

pub use self::lapin::LapinConnector;
