//! Broker provider implementations.
//!
//! This module contains the concrete implementations of the
//! [`Broker`](crate::broker::Broker) trait.

pub mod aws;
pub mod memory;

pub use aws::AwsBroker;
pub use memory::InMemoryBroker;
