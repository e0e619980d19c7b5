//! Core types for sbgate
//!
//! This crate provides the error envelope, request identifiers and
//! parameter parsing shared by the facade and the binary.

pub mod error;
pub mod request_id;
pub mod timespan;

pub use error::{ApiError, ErrorCode};
pub use request_id::{RequestId, REQUEST_ID_HEADER};
pub use timespan::{parse_timespan, TimeSpanError};
