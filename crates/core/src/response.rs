//! The outcome of a `send_to_group` call.

/// What came back for an outstanding request: either the recipient's
/// handler fulfilled it, or it was rejected — by an explicit
/// `reject_request` call, a handler error, a dispatch failure, or a
/// timeout. Callers never see a raw `Err` for any of these; see
/// [`crate::error::Error`] for the (narrower) set of things that do raise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Fulfilled(String),
    Rejected(String),
}

impl Response {
    pub fn fulfilled(value: impl Into<String>) -> Self {
        Response::Fulfilled(value.into())
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Response::Rejected(reason.into())
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(self, Response::Fulfilled(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Response::Rejected(_))
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            Response::Fulfilled(v) => Some(v),
            Response::Rejected(_) => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Response::Rejected(r) => Some(r),
            Response::Fulfilled(_) => None,
        }
    }
}

/// Raised to callers awaiting a reply that never arrived in time.
pub const TIMEOUT_REASON: &str = "timed out waiting for a reply";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queries_match_variant() {
        let fulfilled = Response::fulfilled("pong");
        assert!(fulfilled.is_fulfilled());
        assert_eq!(fulfilled.value(), Some("pong"));
        assert_eq!(fulfilled.reason(), None);

        let rejected = Response::rejected("no");
        assert!(rejected.is_rejected());
        assert_eq!(rejected.reason(), Some("no"));
        assert_eq!(rejected.value(), None);
    }
}
