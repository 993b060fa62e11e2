//! Broker client adapter: topic naming, bounded retry and the Kafka REST Proxy transport.

mod client;
mod config;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
mod rest_proxy;

pub use client::{BrokerClient, Transport};
pub use config::{
    BrokerConfig, ConfigError, RetryPolicy, SaslCredentials, SaslMechanism, SecurityProtocol,
};
pub use relay_types::{Broker, BrokerAck, TransportError};
pub use rest_proxy::RestProxyTransport;

#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockTransport, SentRecord};
