use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    /// Wrong email or password; holds the backend's wording unchanged.
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The backend refused the access token.
    #[error("Session invalid: {0}")]
    SessionInvalid(String),

    #[error("Token refresh failed: {0}")]
    TokenRefresh(String),

    #[error("Token refresh failed after {0} attempts")]
    RefreshExhausted(u32),

    #[error("Not logged in")]
    NotLoggedIn,

    /// Server-side revoke failed. The local session is cleared regardless.
    #[error("Sign-out revoke failed: {0}")]
    RevokeFailed(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Network unavailable")]
    NetworkUnavailable,
}

impl AuthError {
    /// Worth retrying: the backend was unreachable or failed server-side.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NetworkUnavailable => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Http(e) => {
                e.is_connect()
                    || e.is_timeout()
                    || e.status().is_some_and(|s| s.is_server_error())
            }
            _ => false,
        }
    }

    /// Only credential errors are shown to the user; the rest are logged.
    pub fn is_user_visible(&self) -> bool {
        matches!(self, Self::InvalidCredentials(_))
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidCredentials(message) => message.clone(),
            other => other.to_string(),
        }
    }

    /// The token is dead, as opposed to the backend being unreachable.
    pub fn is_stale_token(&self) -> bool {
        matches!(
            self,
            Self::SessionInvalid(_) | Self::TokenRefresh(_) | Self::RefreshExhausted(_)
        )
    }
}

pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> AuthError {
        AuthError::Status {
            status: code,
            message: String::new(),
        }
    }

    #[test]
    fn test_server_failures_are_transient() {
        assert!(AuthError::NetworkUnavailable.is_transient());
        assert!(status(502).is_transient());
        assert!(!status(400).is_transient());
        assert!(!AuthError::SessionInvalid("jwt expired".into()).is_transient());
    }

    #[test]
    fn test_only_credentials_reach_the_user() {
        let err = AuthError::InvalidCredentials("Invalid login credentials".into());
        assert!(err.is_user_visible());
        assert_eq!(err.user_message(), "Invalid login credentials");

        for hidden in [
            AuthError::NetworkUnavailable,
            AuthError::SessionInvalid("revoked".into()),
            AuthError::RevokeFailed("offline".into()),
        ] {
            assert!(!hidden.is_user_visible());
        }
    }

    #[test]
    fn test_stale_token_classification() {
        assert!(AuthError::SessionInvalid("jwt expired".into()).is_stale_token());
        assert!(AuthError::TokenRefresh("invalid_grant".into()).is_stale_token());
        assert!(AuthError::RefreshExhausted(3).is_stale_token());
        assert!(!AuthError::NetworkUnavailable.is_stale_token());
        assert!(!status(503).is_stale_token());
    }
}
