//! Normalized results of facade operations

use sbgate_broker::BrokerError;
use tracing::info;

/// Result of an existence check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Existence {
    Exists,
    Absent,
    /// The check itself failed; neither presence nor absence is known
    CheckFailed(String),
}

impl Existence {
    pub fn from_check(result: Result<bool, BrokerError>) -> Self {
        match result {
            Ok(true) => Self::Exists,
            Ok(false) => Self::Absent,
            Err(e) => {
                info!(error = %e, "Existence check failed");
                Self::CheckFailed(e.to_string())
            }
        }
    }
}

/// Tagged outcome shared by every management and send operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    AlreadyExists,
    NotFound,
    ParentMissing,
    RuleRejected(String),
    TransportError(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn from_broker_error(error: &BrokerError) -> Self {
        match error {
            BrokerError::NotFound(_) => Self::NotFound,
            BrokerError::AlreadyExists(_) => Self::AlreadyExists,
            BrokerError::InvalidFilter(e) => Self::RuleRejected(e.to_string()),
            other => Self::TransportError(other.to_string()),
        }
    }
}

impl From<Result<(), BrokerError>> for Outcome {
    fn from(result: Result<(), BrokerError>) -> Self {
        match result {
            Ok(()) => Self::Success,
            Err(e) => Self::from_broker_error(&e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sbgate_broker::SqlFilter;

    #[test]
    fn test_existence_from_check() {
        assert_eq!(Existence::from_check(Ok(true)), Existence::Exists);
        assert_eq!(Existence::from_check(Ok(false)), Existence::Absent);
        assert!(matches!(
            Existence::from_check(Err(BrokerError::Timeout("slow".into()))),
            Existence::CheckFailed(_)
        ));
    }

    #[test]
    fn test_outcome_from_broker_error() {
        assert_eq!(
            Outcome::from_broker_error(&BrokerError::NotFound("q".into())),
            Outcome::NotFound
        );
        assert_eq!(
            Outcome::from_broker_error(&BrokerError::AlreadyExists("q".into())),
            Outcome::AlreadyExists
        );
        let filter_error = SqlFilter::parse("a =").unwrap_err();
        assert!(matches!(
            Outcome::from_broker_error(&BrokerError::InvalidFilter(filter_error)),
            Outcome::RuleRejected(_)
        ));
        assert!(matches!(
            Outcome::from_broker_error(&BrokerError::Unauthorized("no".into())),
            Outcome::TransportError(_)
        ));
        assert_eq!(Outcome::from(Ok(())), Outcome::Success);
    }
}
