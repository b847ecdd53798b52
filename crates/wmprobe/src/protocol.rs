//! Property-based query channel to the window manager under test
//!
//! A test writes `<kind>?<details>` as a UTF8_STRING property on one of its
//! windows. A manager built with testing support replaces it with
//! `<kind>=<result>`. Anything else is reported as an error.

use thiserror::Error;

use crate::backend::Geometry;
use crate::error::{HarnessError, TestFailure};
use crate::poll::PollPolicy;
use crate::session::Session;

/// Property used when none is configured
pub const DEFAULT_QUERY_PROPERTY: &str = "_METACITY_TESTING";

#[derive(Error, Debug)]
pub enum QueryError {
    /// The property still holds the question
    #[error("no result was set by the window manager")]
    NoResult,

    #[error("received an unexpected reply from the window manager: {0}")]
    Unexpected(String),

    #[error("received a result of {got} from the window manager, but wanted {wanted}")]
    WrongKind { got: char, wanted: char },

    #[error(transparent)]
    Harness(#[from] HarnessError),
}

impl From<QueryError> for TestFailure {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::Harness(e) => TestFailure::Harness(e),
            other => TestFailure::Assertion(other.to_string()),
        }
    }
}

/// A single question for the window manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerQuery {
    pub kind: char,
    pub details: String,
}

impl ManagerQuery {
    pub fn new(kind: char, details: impl Into<String>) -> Self {
        Self {
            kind,
            details: details.into(),
        }
    }

    /// Wire form written to the property
    pub fn encode(&self) -> Vec<u8> {
        format!("{}?{}", self.kind, self.details).into_bytes()
    }

    /// Parse a pending question; `None` for anything that is not one
    pub fn decode(raw: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(raw).ok()?;
        let mut chars = text.chars();
        let kind = chars.next()?;
        let rest = chars.as_str().strip_prefix('?')?;
        Some(Self::new(kind, rest))
    }

    /// Wire form of an answer to this question
    pub fn answer(&self, result: &str) -> Vec<u8> {
        format!("{}={}", self.kind, result).into_bytes()
    }
}

/// Interpret the property contents after the manager had its chance to answer
pub fn parse_reply(query: &ManagerQuery, raw: &[u8]) -> Result<String, QueryError> {
    let text = String::from_utf8_lossy(raw);
    let mut chars = text.chars();

    let (Some(kind), Some('=')) = (chars.next(), chars.next()) else {
        if raw == query.encode().as_slice() {
            return Err(QueryError::NoResult);
        }
        return Err(QueryError::Unexpected(text.to_string()));
    };

    if kind != query.kind {
        return Err(QueryError::WrongKind {
            got: kind,
            wanted: query.kind,
        });
    }

    Ok(chars.as_str().to_string())
}

/// Ask the manager running on `session` a question
///
/// Creates a dedicated window, writes the query to `property` and waits
/// (bounded by `policy`) for the manager to replace it.
pub fn query_manager(
    session: &Session,
    query: &ManagerQuery,
    property: &str,
    policy: &PollPolicy,
) -> Result<String, QueryError> {
    let display = session.display("query_manager")?;
    let window = display.create_window(Geometry::default())?;
    let request = query.encode();

    tracing::debug!(window = %window, property, query = %String::from_utf8_lossy(&request), "querying window manager");
    display.set_text_property(window, property, &request)?;

    let reply = policy.poll(|| {
        let current = display.text_property(window, property)?;
        Ok::<_, HarnessError>(current.filter(|value| *value != request))
    });

    let reply = match reply {
        Ok(Some(value)) => value,
        Ok(None) => request.clone(),
        Err(e) => {
            display.destroy_window(window).ok();
            return Err(e.into());
        }
    };

    if let Err(e) = display.destroy_window(window) {
        tracing::debug!(error = %e, "failed to destroy query window");
    }

    parse_reply(query, &reply)
}
