//! Shared-secret authorization for sync triggers and data mutations.
//!
//! Only the `x-sync-secret` header is ever consulted. Origin headers such as
//! `X-Forwarded-For` are caller controlled and play no part in a decision.

use serde::Serialize;
use std::fmt;
use subtle::ConstantTimeEq;

use crate::config::SyncConfig;

pub const SECRET_HEADER: &str = "x-sync-secret";

/// Credentials presented by one caller
#[derive(Debug, Clone, Default)]
pub struct SyncRequest {
    secret: Option<String>,
}

impl SyncRequest {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            secret: Some(secret.into()),
        }
    }

    /// Build from raw request headers, matching the header name case-insensitively
    pub fn from_headers<'a, I>(headers: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let secret = headers
            .into_iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(SECRET_HEADER))
            .map(|(_, value)| value.to_string());
        Self { secret }
    }

    fn presented_secret(&self) -> Option<&str> {
        self.secret.as_deref().filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    SecretNotConfigured,
    SecretRequired,
    InvalidSecret,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            DenyReason::SecretNotConfigured => "Sync secret key not configured on server",
            DenyReason::SecretRequired => "Sync secret key required",
            DenyReason::InvalidSecret => "Invalid sync secret key",
        };
        f.write_str(msg)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthDecision {
    pub allowed: bool,
    pub reason: Option<DenyReason>,
}

impl AuthDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn deny(reason: DenyReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }

    /// Turn a denial into an error, keeping allowed decisions as `Ok`
    pub fn into_result(self) -> crate::error::Result<()> {
        match self.reason {
            Some(reason) if !self.allowed => Err(crate::error::SyncError::Denied(reason)),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthGate {
    server_only: bool,
    secret: Option<String>,
}

impl AuthGate {
    pub fn new(server_only: bool, secret: Option<String>) -> Self {
        Self {
            server_only,
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.server_only, config.secret_key.clone())
    }

    /// May this caller start a sync?
    pub fn is_sync_allowed(&self, request: &SyncRequest) -> AuthDecision {
        if !self.server_only {
            return AuthDecision::allow();
        }
        self.check_secret(request)
    }

    /// May this caller create, update or delete stored data? Always needs the
    /// secret, whatever the server-only flag says.
    pub fn is_write_allowed(&self, request: &SyncRequest) -> AuthDecision {
        self.check_secret(request)
    }

    fn check_secret(&self, request: &SyncRequest) -> AuthDecision {
        let Some(expected) = self.secret.as_deref() else {
            return AuthDecision::deny(DenyReason::SecretNotConfigured);
        };
        let Some(presented) = request.presented_secret() else {
            return AuthDecision::deny(DenyReason::SecretRequired);
        };
        if bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
            AuthDecision::allow()
        } else {
            AuthDecision::deny(DenyReason::InvalidSecret)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_mode_allows_everyone_to_sync() {
        let gate = AuthGate::new(false, None);
        assert!(gate.is_sync_allowed(&SyncRequest::anonymous()).allowed);
    }

    #[test]
    fn server_only_without_configured_secret_denies() {
        let gate = AuthGate::new(true, None);
        let decision = gate.is_sync_allowed(&SyncRequest::with_secret("anything"));
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(DenyReason::SecretNotConfigured));
    }

    #[test]
    fn empty_configured_secret_counts_as_unset() {
        let gate = AuthGate::new(true, Some(String::new()));
        let decision = gate.is_sync_allowed(&SyncRequest::with_secret(""));
        assert_eq!(decision.reason, Some(DenyReason::SecretNotConfigured));
    }

    #[test]
    fn server_only_distinguishes_missing_and_wrong_secret() {
        let gate = AuthGate::new(true, Some("s3cret".to_string()));

        let missing = gate.is_sync_allowed(&SyncRequest::anonymous());
        assert_eq!(missing.reason, Some(DenyReason::SecretRequired));

        let wrong = gate.is_sync_allowed(&SyncRequest::with_secret("s3cre"));
        assert_eq!(wrong.reason, Some(DenyReason::InvalidSecret));

        let right = gate.is_sync_allowed(&SyncRequest::with_secret("s3cret"));
        assert!(right.allowed);
        assert_eq!(right.reason, None);
    }

    #[test]
    fn writes_need_the_secret_even_in_open_mode() {
        let gate = AuthGate::new(false, Some("s3cret".to_string()));
        assert!(!gate.is_write_allowed(&SyncRequest::anonymous()).allowed);
        assert!(!gate.is_write_allowed(&SyncRequest::with_secret("nope")).allowed);
        assert!(gate.is_write_allowed(&SyncRequest::with_secret("s3cret")).allowed);

        let unconfigured = AuthGate::new(false, None);
        assert_eq!(
            unconfigured
                .is_write_allowed(&SyncRequest::with_secret("s3cret"))
                .reason,
            Some(DenyReason::SecretNotConfigured)
        );
    }

    #[test]
    fn forwarded_headers_are_ignored() {
        let gate = AuthGate::new(true, Some("s3cret".to_string()));
        let request = SyncRequest::from_headers([
            ("X-Forwarded-For", "127.0.0.1"),
            ("X-Real-IP", "127.0.0.1"),
        ]);
        assert!(!gate.is_sync_allowed(&request).allowed);

        let request = SyncRequest::from_headers([("X-Sync-Secret", "s3cret")]);
        assert!(gate.is_sync_allowed(&request).allowed);
    }
}
