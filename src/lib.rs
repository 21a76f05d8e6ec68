//! Redis connection factory with sentinel support.
//!
//! Builds a single shared [`Client`](client::Client) from a [`RedisConfig`]:
//! either a direct client for one address or a failover client that asks a
//! set of sentinels for the current master. Dials are classified as sentinel
//! or data-node dials so each gets its own timeout and error counter, and a
//! hook counts the case where no sentinel can be reached at all.

pub mod client;
pub mod config;
pub mod dialer;
pub mod error;
pub mod factory;
pub mod instrument;
pub mod metrics;
pub mod resp;
pub mod sentinel;

pub mod logging;

pub use client::Client;
pub use config::{Config, RedisConfig};
pub use error::Error;
pub use factory::ConnectionFactory;
