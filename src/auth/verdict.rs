//! Authentication verdicts

use std::fmt;

use super::credential::{AuthMethod, MethodSet};

/// Non-empty set of methods a client may continue with after partial success
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NextMethods(MethodSet);

impl NextMethods {
    /// Returns `None` for an empty set
    pub fn new(methods: MethodSet) -> Option<Self> {
        if methods.is_empty() {
            None
        } else {
            Some(Self(methods))
        }
    }

    pub fn single(method: AuthMethod) -> Self {
        Self(MethodSet::empty().with(method))
    }

    pub fn methods(&self) -> MethodSet {
        self.0
    }

    pub fn contains(&self, method: AuthMethod) -> bool {
        self.0.contains(method)
    }
}

impl fmt::Display for NextMethods {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Outcome of one authentication attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthVerdict {
    Rejected,
    Accepted,
    /// Credential accepted but another one is required
    AcceptedPartial(NextMethods),
}

impl AuthVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, AuthVerdict::Accepted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthVerdict::Rejected => "rejected",
            AuthVerdict::Accepted => "accepted",
            AuthVerdict::AcceptedPartial(_) => "accepted_partial",
        }
    }
}

impl fmt::Display for AuthVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthVerdict::AcceptedPartial(next) => write!(f, "accepted_partial({})", next),
            other => f.write_str(other.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_methods_rejects_empty() {
        assert!(NextMethods::new(MethodSet::empty()).is_none());
    }

    #[test]
    fn test_next_methods_keeps_members() {
        let next = NextMethods::new(MethodSet::empty().with(AuthMethod::Password)).unwrap();
        assert!(next.contains(AuthMethod::Password));
        assert!(!next.contains(AuthMethod::PublicKey));
        assert!(!next.methods().is_empty());
    }

    #[test]
    fn test_verdict_display() {
        assert_eq!(AuthVerdict::Rejected.to_string(), "rejected");
        assert_eq!(AuthVerdict::Accepted.to_string(), "accepted");
        let partial = AuthVerdict::AcceptedPartial(NextMethods::single(AuthMethod::Password));
        assert_eq!(partial.to_string(), "accepted_partial(password)");
        assert_eq!(partial.as_str(), "accepted_partial");
    }
}
