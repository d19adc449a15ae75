//! Confirmation of large reference-table copies.
//!
//! The planner never prompts. Tables that need an operator decision come back
//! as [`Decision::Confirm`](crate::planner::Decision::Confirm) and are resolved
//! through a [`Confirmer`].

use std::fmt;
use std::str::FromStr;

use crate::error::{MigrateError, Result};

/// What the operator is asked about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationRequest {
    pub database: String,
    pub table: String,
    /// Full-table row count; `None` if it could not be determined.
    pub row_count: Option<i64>,
    pub threshold: i64,
}

/// Decides whether a large table should be copied.
pub trait Confirmer: Send + Sync {
    /// Return `true` to copy the table in this run.
    fn confirm(&self, request: &ConfirmationRequest) -> Result<bool>;
}

/// Non-interactive confirmation policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmPolicy {
    AlwaysAccept,
    AlwaysDecline,
    /// Accept tables with at most this many rows.
    AcceptUpTo(i64),
}

impl Confirmer for ConfirmPolicy {
    fn confirm(&self, request: &ConfirmationRequest) -> Result<bool> {
        Ok(match self {
            ConfirmPolicy::AlwaysAccept => true,
            ConfirmPolicy::AlwaysDecline => false,
            ConfirmPolicy::AcceptUpTo(limit) => request.row_count.is_some_and(|n| n <= *limit),
        })
    }
}

impl FromStr for ConfirmPolicy {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always-accept" | "yes" => Ok(ConfirmPolicy::AlwaysAccept),
            "always-decline" | "no" => Ok(ConfirmPolicy::AlwaysDecline),
            other => {
                let limit = other
                    .strip_prefix("threshold:")
                    .and_then(|n| n.trim().parse::<i64>().ok())
                    .filter(|n| *n >= 0)
                    .ok_or_else(|| {
                        MigrateError::Config(format!(
                            "invalid confirmation policy '{}': expected always-accept, always-decline or threshold:N",
                            s
                        ))
                    })?;
                Ok(ConfirmPolicy::AcceptUpTo(limit))
            }
        }
    }
}

impl fmt::Display for ConfirmPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfirmPolicy::AlwaysAccept => f.write_str("always-accept"),
            ConfirmPolicy::AlwaysDecline => f.write_str("always-decline"),
            ConfirmPolicy::AcceptUpTo(n) => write!(f, "threshold:{}", n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(rows: i64) -> ConfirmationRequest {
        ConfirmationRequest {
            database: "shop".into(),
            table: "audit_log".into(),
            row_count: Some(rows),
            threshold: 400,
        }
    }

    #[test]
    fn test_parse_policies() {
        assert_eq!("always-accept".parse::<ConfirmPolicy>().unwrap(), ConfirmPolicy::AlwaysAccept);
        assert_eq!("Always-Decline".parse::<ConfirmPolicy>().unwrap(), ConfirmPolicy::AlwaysDecline);
        assert_eq!(
            "threshold:5000".parse::<ConfirmPolicy>().unwrap(),
            ConfirmPolicy::AcceptUpTo(5000)
        );
        assert!("threshold:-1".parse::<ConfirmPolicy>().is_err());
        assert!("maybe".parse::<ConfirmPolicy>().is_err());
    }

    #[test]
    fn test_threshold_policy_is_inclusive() {
        let policy = ConfirmPolicy::AcceptUpTo(500);
        assert!(policy.confirm(&request(500)).unwrap());
        assert!(!policy.confirm(&request(501)).unwrap());
    }

    #[test]
    fn test_threshold_policy_declines_unknown_count() {
        let mut req = request(1);
        req.row_count = None;
        assert!(!ConfirmPolicy::AcceptUpTo(500).confirm(&req).unwrap());
    }

    #[test]
    fn test_fixed_policies() {
        assert!(ConfirmPolicy::AlwaysAccept.confirm(&request(1_000_000)).unwrap());
        assert!(!ConfirmPolicy::AlwaysDecline.confirm(&request(401)).unwrap());
    }
}
