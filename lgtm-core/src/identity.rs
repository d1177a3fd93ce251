use std::fmt;

/// A forge account name as it appeared on the event.
///
/// The raw spelling is kept for display. Authorization checks go through
/// [`Login::normalized`] so that `@Alice` and `alice` are the same reviewer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Login(String);

impl Login {
    pub fn new(login: impl Into<String>) -> Self {
        Self(login.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lower-cased with any leading `@` removed.
    pub fn normalized(&self) -> String {
        normalize_login(&self.0)
    }

    /// True when both logins name the same account.
    pub fn same_account(&self, other: &Login) -> bool {
        self.normalized() == other.normalized()
    }
}

impl fmt::Display for Login {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Login {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Login {
    fn from(s: String) -> Self {
        Self(s)
    }
}

pub fn normalize_login(login: &str) -> String {
    login.trim().trim_start_matches('@').to_lowercase()
}
