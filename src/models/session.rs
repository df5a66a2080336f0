use std::time::Instant;

use cookie::Cookie;
use cookie::time::{Duration, OffsetDateTime};

/// A single session cookie issued by the portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    pub name: String,
    pub value: String,
}

/// The set of cookies that authenticate requests for one portal session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionTokens(Vec<SessionToken>);

impl SessionTokens {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one `Set-Cookie` header value.
    ///
    /// Later values for the same name replace earlier ones. A cookie that is
    /// already expired (`Max-Age` <= 0, `Expires` in the past, an empty or
    /// `deleted` value) removes the token instead.
    pub fn apply_set_cookie(&mut self, header: &str) {
        let Ok(cookie) = Cookie::parse(header) else {
            return;
        };
        let name = cookie.name();

        self.0.retain(|token| token.name != name);
        if is_expired(&cookie, OffsetDateTime::now_utc()) {
            return;
        }
        self.0.push(SessionToken {
            name: name.to_string(),
            value: cookie.value().trim_matches('"').to_string(),
        });
    }

    /// Whether any token differs from `earlier`: a new name or a new value.
    pub fn issued_since(&self, earlier: &SessionTokens) -> bool {
        self.0.iter().any(|token| !earlier.0.contains(token))
    }

    /// Renders the tokens as a `Cookie` request header, if there are any.
    pub fn cookie_header(&self) -> Option<String> {
        if self.0.is_empty() {
            return None;
        }
        Some(
            self.0
                .iter()
                .map(|token| format!("{}={}", token.name, token.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

fn is_expired(cookie: &Cookie<'_>, now: OffsetDateTime) -> bool {
    let value = cookie.value().trim_matches('"');
    value.is_empty()
        || value == "deleted"
        || cookie.max_age().is_some_and(|age| age <= Duration::ZERO)
        || cookie.expires_datetime().is_some_and(|at| at <= now)
}

/// An authenticated portal session bound to one identifier.
///
/// Lives for a single fetch; it never holds the secret it was created from.
#[derive(Debug, Clone)]
pub struct PortalSession {
    /// The identifier this session was issued for.
    pub identifier: String,
    /// Cookies to attach to every request in this session.
    pub tokens: SessionTokens,
    /// When the login completed.
    pub acquired_at: Instant,
}

impl PortalSession {
    pub fn new(identifier: impl Into<String>, tokens: SessionTokens) -> Self {
        Self {
            identifier: identifier.into(),
            tokens,
            acquired_at: Instant::now(),
        }
    }
}
