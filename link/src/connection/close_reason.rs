use std::fmt;

/// WebSocket / application close codes that mean "your credentials are no good".
const AUTH_CLOSE_CODES: [u16; 5] = [1008, 4001, 4003, 4401, 4403];

/// Word sequences in a close message that name a credential problem. Matched
/// against whole words, so status digits, port numbers and phrases such as
/// "authentication service unavailable" do not count.
const AUTH_PHRASES: [&[&str]; 9] = [
    &["unauthorized"],
    &["unauthenticated"],
    &["token", "expired"],
    &["expired", "token"],
    &["invalid", "token"],
    &["token", "invalid"],
    &["token", "revoked"],
    &["authentication", "failed"],
    &["authentication", "required"],
];

/// Why the push connection closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// Human-readable description of why the connection closed.
    pub message: String,
    /// WebSocket close code, if available (e.g. 1000 = normal, 1006 = abnormal).
    pub code: Option<u16>,
    /// `false` when the server asked the client not to come back.
    pub allow_reconnect: bool,
}

impl CloseReason {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            allow_reconnect: true,
        }
    }

    pub fn with_code(message: impl Into<String>, code: u16) -> Self {
        Self {
            code: Some(code),
            ..Self::new(message)
        }
    }

    /// A close after which the client must not reconnect automatically.
    pub fn terminal(message: impl Into<String>) -> Self {
        Self {
            allow_reconnect: false,
            ..Self::new(message)
        }
    }

    /// Whether the close was caused by rejected or expired credentials.
    pub fn is_auth_failure(&self) -> bool {
        if self.code.is_some_and(|code| AUTH_CLOSE_CODES.contains(&code)) {
            return true;
        }
        match self.code {
            // Normal and going-away closes carry the server's reason in the text.
            None | Some(1000) | Some(1001) => mentions_auth_failure(&self.message),
            Some(_) => false,
        }
    }
}

fn mentions_auth_failure(message: &str) -> bool {
    let words: Vec<String> = message
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_ascii_lowercase)
        .collect();
    AUTH_PHRASES.iter().any(|phrase| {
        words
            .windows(phrase.len())
            .any(|window| window.iter().zip(phrase.iter()).all(|(w, p)| w == p))
    })
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.code {
            write!(f, "{} (code: {})", self.message, code)
        } else {
            write!(f, "{}", self.message)
        }
    }
}
