//! Account lookup for an inbound email.

use tracing::warn;

use crate::pipeline::types::Address;
use crate::store::{Database, User};

/// Maps a routing token, or failing that the sender address, to a user.
pub struct UserResolver;

impl UserResolver {
    /// Look the user up by routing key, then by sender email.
    ///
    /// Lookup failures count as "not found" and are never propagated.
    pub async fn resolve(db: &dyn Database, token: Option<&str>, sender: &Address) -> Option<User> {
        if let Some(token) = token.map(str::trim).filter(|t| !t.is_empty()) {
            match db.find_user_by_key(token).await {
                Ok(Some(user)) => return Some(user),
                Ok(None) => {}
                Err(e) => warn!(token, error = %e, "User lookup by key failed"),
            }
        }

        let email = sender.email().to_lowercase();
        match db.find_user_by_email(&email).await {
            Ok(user) => user,
            Err(e) => {
                warn!(sender = %email, error = %e, "User lookup by email failed");
                None
            }
        }
    }
}
