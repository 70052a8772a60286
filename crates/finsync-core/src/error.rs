//! Error types for finsync

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("{}", join_messages(.0))]
    Aggregate(Vec<Error>),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Task failed: {0}")]
    Task(String),
}

/// Coarse classification used by entrypoints to pick a response class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing input (400-class)
    Validation,
    /// Unknown user or table reference (404/401-class)
    NotFound,
    /// Everything else (500-class)
    Internal,
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream(msg.into())
    }

    /// Join sibling errors from a fan-out phase.
    ///
    /// Returns `None` when there is nothing to report, and unwraps a single
    /// error instead of nesting it.
    pub fn aggregate(mut errors: Vec<Error>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Aggregate(errors)),
        }
    }

    /// Prefix the message with where it happened, keeping the variant
    pub fn context(self, ctx: impl std::fmt::Display) -> Self {
        self.with_context(&ctx.to_string())
    }

    fn with_context(self, ctx: &str) -> Self {
        match self {
            Self::Validation(m) => Self::Validation(format!("{}: {}", ctx, m)),
            Self::NotFound(m) => Self::NotFound(format!("{}: {}", ctx, m)),
            Self::Upstream(m) => Self::Upstream(format!("{}: {}", ctx, m)),
            Self::Config(m) => Self::Config(format!("{}: {}", ctx, m)),
            Self::Task(m) => Self::Task(format!("{}: {}", ctx, m)),
            Self::Aggregate(errs) => {
                Self::Aggregate(errs.into_iter().map(|e| e.with_context(ctx)).collect())
            }
            Self::Http(e) => Self::Upstream(format!("{}: HTTP request error: {}", ctx, e)),
            Self::Json(e) => Self::Upstream(format!("{}: JSON error: {}", ctx, e)),
            Self::Io(e) => Self::Upstream(format!("{}: IO error: {}", ctx, e)),
            Self::Timeout(d) => Self::Upstream(format!("{}: timed out after {:?}", ctx, d)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            // An aggregate is only as specific as all of its members
            Self::Aggregate(errs) => {
                let mut kinds = errs.iter().map(Error::kind);
                match kinds.next() {
                    Some(first) if kinds.all(|k| k == first) => first,
                    _ => ErrorKind::Internal,
                }
            }
            _ => ErrorKind::Internal,
        }
    }

    /// Message safe to show to an end user.
    ///
    /// Internal errors never leak upstream response bodies.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::NotFound => self.to_string(),
            ErrorKind::Internal => "An internal error occurred".to_string(),
        }
    }

    /// Number of leaf errors (an aggregate counts its members)
    pub fn len(&self) -> usize {
        match self {
            Self::Aggregate(errs) => errs.iter().map(Error::len).sum(),
            _ => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn join_messages(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_empty_is_none() {
        assert!(Error::aggregate(vec![]).is_none());
    }

    #[test]
    fn test_aggregate_single_unwraps() {
        let err = Error::aggregate(vec![Error::validation("bad")]).unwrap();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_aggregate_joins_messages() {
        let err = Error::aggregate(vec![
            Error::upstream("account a"),
            Error::upstream("account b"),
        ])
        .unwrap();
        let msg = err.to_string();
        assert!(msg.contains("account a"));
        assert!(msg.contains("account b"));
        assert!(msg.contains("\n\n"));
        assert_eq!(err.len(), 2);
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(Error::validation("x").kind(), ErrorKind::Validation);
        assert_eq!(Error::not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(Error::upstream("x").kind(), ErrorKind::Internal);
        assert_eq!(
            Error::Timeout(Duration::from_secs(1)).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_mixed_aggregate_is_internal() {
        let err = Error::Aggregate(vec![Error::not_found("a"), Error::upstream("b")]);
        assert_eq!(err.kind(), ErrorKind::Internal);

        let err = Error::Aggregate(vec![Error::not_found("a"), Error::not_found("b")]);
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_public_message_hides_upstream_body() {
        let err = Error::upstream("notion said: {\"secret\": \"token\"}");
        assert_eq!(err.public_message(), "An internal error occurred");

        let err = Error::validation("invalid start date");
        assert!(err.public_message().contains("invalid start date"));
    }

    #[test]
    fn test_context_keeps_variant() {
        let err = Error::not_found("user 42").context("settings");
        assert!(matches!(err, Error::NotFound(ref m) if m == "settings: user 42"));

        let err = Error::Timeout(Duration::from_secs(2)).context("account acc-1");
        assert!(matches!(err, Error::Upstream(ref m) if m.starts_with("account acc-1")));
    }

    #[test]
    fn test_context_prefixes_every_aggregate_member() {
        let err = Error::Aggregate(vec![
            Error::upstream("insert Padaria failed"),
            Error::Aggregate(vec![Error::validation("bad row")]),
        ])
        .context(format!("user {}", "alice"));

        match err {
            Error::Aggregate(errs) => {
                assert!(matches!(&errs[0], Error::Upstream(m) if m == "user alice: insert Padaria failed"));
                match &errs[1] {
                    Error::Aggregate(inner) => assert!(
                        matches!(&inner[0], Error::Validation(m) if m == "user alice: bad row")
                    ),
                    other => panic!("expected nested aggregate, got {:?}", other),
                }
            }
            other => panic!("expected aggregate, got {:?}", other),
        }
    }
}
