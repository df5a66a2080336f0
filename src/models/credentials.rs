use std::fmt;

use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// Portal login credentials for one student.
///
/// The secret is wiped on drop and never printed by `Debug`.
#[derive(Clone)]
pub struct Credentials {
    identifier: String,
    secret: Zeroizing<String>,
}

impl Credentials {
    pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            secret: Zeroizing::new(secret.into()),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Whether both credentials name the same account with the same secret.
    /// The secret comparison runs in constant time.
    pub fn matches(&self, other: &Credentials) -> bool {
        self.identifier == other.identifier
            && bool::from(self.secret.as_bytes().ct_eq(other.secret.as_bytes()))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identifier", &self.identifier)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_requires_identifier_and_secret() {
        let a = Credentials::new("22951A0501", "pw");
        assert!(a.matches(&Credentials::new("22951A0501", "pw")));
        assert!(!a.matches(&Credentials::new("22951A0501", "pw2")));
        assert!(!a.matches(&Credentials::new("22951A0502", "pw")));
    }

    #[test]
    fn debug_never_prints_the_secret() {
        let rendered = format!("{:?}", Credentials::new("22951A0501", "topsecret"));
        assert!(rendered.contains("22951A0501"));
        assert!(!rendered.contains("topsecret"));
    }
}
