//! sbgate - REST gateway for a message broker
//!
//! Exposes queue, topic and subscription management plus message send and
//! receive over HTTP. The broker is chosen by the connection string:
//! `memory://` runs an in-process broker, `sb://` or `https://` talks to an
//! Azure Service Bus namespace.

pub mod config;
pub mod router;
pub mod server;

pub use config::Config;
pub use router::{build_state, create_router};
pub use server::{shutdown_signal, Gateway};
