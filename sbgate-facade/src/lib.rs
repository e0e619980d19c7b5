//! Broker facades for sbgate
//!
//! Provides the two facades behind the HTTP surface:
//! - Management: create, delete and list queues, topics and subscriptions
//! - Transfer: send (immediate or scheduled), receive and complete
//!
//! Both normalize broker failures into a single [`Outcome`].

pub mod handlers;
pub mod management;
mod outcome;
pub mod retry;
pub mod transfer;

pub use handlers::{routes, FacadeState};
pub use management::ManagementFacade;
pub use outcome::{Existence, Outcome};
pub use retry::RetryPolicy;
pub use transfer::{ReceiveResult, TransferFacade};
