//! Password authentication.

use async_trait::async_trait;
use russh::client;

use crate::fleet::error::FleetError;
use crate::fleet::session::TrustHandler;

use super::traits::AuthStrategy;

/// Authenticates with a password supplied through per-call overrides.
///
/// The password never appears in errors or trace output.
pub struct PasswordAuth {
    password: String,
}

impl PasswordAuth {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
        }
    }
}

#[async_trait]
impl AuthStrategy for PasswordAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<TrustHandler>,
        username: &str,
    ) -> Result<bool, FleetError> {
        let result = handle
            .authenticate_password(username, &self.password)
            .await
            .map_err(|e| FleetError::Auth(format!("password exchange failed: {e}")))?;

        Ok(result.success())
    }

    fn name(&self) -> &'static str {
        "password"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name() {
        let auth = PasswordAuth::new("secret");
        assert_eq!(auth.name(), "password");
    }

    #[test]
    fn test_accepts_owned_and_borrowed_strings() {
        let from_str = PasswordAuth::new("pw");
        let from_string = PasswordAuth::new(String::from("pw"));
        assert_eq!(from_str.password, from_string.password);
    }
}
