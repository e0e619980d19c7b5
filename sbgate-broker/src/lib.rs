//! Broker clients for sbgate
//!
//! Provides the administrative and messaging client traits the facades
//! are written against, plus two backends:
//! - `memory`: in-process broker for local development and tests
//! - `rest`: Azure Service Bus over its HTTPS REST surface

mod client;
pub mod connection;
mod error;
pub mod filter;
pub mod memory;
pub mod rest;
mod types;

pub use client::{AdminClient, MessageReceiver, MessageSender, MessagingClient};
pub use connection::{connect, BackendKind, BrokerClients, ClientSettings, ConnectionString};
pub use error::BrokerError;
pub use filter::{FilterError, SqlFilter};
pub use types::{
    OutgoingMessage, QueueOptions, ReceiveSource, ReceivedMessage, RuleOptions,
    SubscriptionOptions, TopicOptions, DEFAULT_RULE_NAME,
};
