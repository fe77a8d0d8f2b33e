//! Identity derivation and display-name normalization.
//!
//! The caller's token yields a stable [`UserKey`] used for access control; a
//! per-connection [`SessionId`] composes with it into the [`UserId`] that
//! participant maps are indexed by.

use serde::{Deserialize, Serialize};

use crate::models::id::{SessionId, UserId, UserKey};
use crate::{Error, Result};

/// Maximum display-name length in code points.
pub const MAX_DISPLAY_NAME_LEN: usize = 64;

/// Claims the authentication layer hands us. Token minting and validation
/// happen upstream; by the time a token reaches the core it is trusted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthToken {
    /// Verified email address, when the identity has one.
    pub email: Option<String>,
    /// Stable subject identifier for email-less accounts.
    pub subject: Option<String>,
    /// Guest id for anonymous callers.
    pub guest_id: Option<String>,
    /// Administrator claim minted by the auth layer.
    pub is_admin: bool,
    /// Display name carried in the token, if any.
    pub display_name: Option<String>,
}

/// Derive the stable user key: email if present, else the stable subject,
/// else a `guest:`-prefixed guest id.
pub fn derive_key(token: &AuthToken) -> Result<UserKey> {
    if let Some(email) = token.email.as_deref() {
        let email = email.trim().to_lowercase();
        if !email.is_empty() {
            return Ok(UserKey(email));
        }
    }
    if let Some(subject) = token.subject.as_deref() {
        let subject = subject.trim();
        if !subject.is_empty() {
            return Ok(UserKey(subject.to_string()));
        }
    }
    if let Some(guest) = token.guest_id.as_deref() {
        let guest = guest.trim();
        if !guest.is_empty() {
            return Ok(UserKey(format!("guest:{guest}")));
        }
    }
    Err(Error::InvalidInput(
        "Token carries no usable identity".to_string(),
    ))
}

/// Compose the session-scoped user id.
#[must_use]
pub fn compose_user_id(key: &UserKey, session: &SessionId) -> UserId {
    UserId::compose(key, session)
}

/// Normalize a display name for labeling: strip control characters, collapse
/// runs of whitespace, reject empty results and names longer than 64 code
/// points. Lookup normalization for DM resolution is a separate concern.
pub fn normalize_display_name(raw: &str) -> Result<String> {
    let stripped: String = raw.chars().filter(|c| !c.is_control()).collect();

    let collapsed = stripped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    if collapsed.is_empty() {
        return Err(Error::InvalidInput(
            "Display name cannot be empty".to_string(),
        ));
    }
    if collapsed.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(Error::InvalidInput(format!(
            "Display name must be at most {MAX_DISPLAY_NAME_LEN} characters"
        )));
    }
    Ok(collapsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_key_prefers_email() {
        let token = AuthToken {
            email: Some("  Alice@X.Y ".to_string()),
            subject: Some("u123".to_string()),
            ..Default::default()
        };
        assert_eq!(derive_key(&token).unwrap().as_str(), "alice@x.y");
    }

    #[test]
    fn test_derive_key_falls_back_to_subject() {
        let token = AuthToken {
            subject: Some("u123".to_string()),
            ..Default::default()
        };
        assert_eq!(derive_key(&token).unwrap().as_str(), "u123");
    }

    #[test]
    fn test_derive_key_guest_prefix() {
        let token = AuthToken {
            guest_id: Some("zz9".to_string()),
            ..Default::default()
        };
        let key = derive_key(&token).unwrap();
        assert_eq!(key.as_str(), "guest:zz9");
        assert!(key.is_guest());
    }

    #[test]
    fn test_derive_key_rejects_empty_token() {
        let token = AuthToken::default();
        assert!(derive_key(&token).is_err());
    }

    #[test]
    fn test_normalize_display_name() {
        assert_eq!(
            normalize_display_name("  Alice \t\n Smith ").unwrap(),
            "Alice Smith"
        );
        assert_eq!(normalize_display_name("Bob\u{0007}").unwrap(), "Bob");
    }

    #[test]
    fn test_normalize_rejects_empty() {
        assert!(normalize_display_name("   ").is_err());
        assert!(normalize_display_name("\u{0000}\u{0001}").is_err());
    }

    #[test]
    fn test_normalize_rejects_oversized() {
        let long: String = "x".repeat(MAX_DISPLAY_NAME_LEN + 1);
        assert!(normalize_display_name(&long).is_err());

        let exact: String = "x".repeat(MAX_DISPLAY_NAME_LEN);
        assert!(normalize_display_name(&exact).is_ok());
    }
}
