//! Login credentials for a mail session.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ProviderId;

/// Who a session logs in as, and through which provider.
///
/// The user address doubles as the envelope sender and the `From` header of
/// every message sent through the session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCredentials {
    /// Provider whose SMTP host the session connects to.
    pub provider_id: ProviderId,
    /// Login name, usually the mailbox address.
    pub user: String,
    /// Password or app-specific password.
    pub secret: String,
}

impl SessionCredentials {
    /// Creates credentials for `user` at `provider_id`.
    pub fn new(
        provider_id: impl Into<ProviderId>,
        user: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            user: user.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("provider_id", &self.provider_id)
            .field("user", &self.user)
            .field("secret", &"<redacted>")
            .finish()
    }
}
