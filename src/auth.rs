// src/auth.rs
//! Current-user capability consumed by the session store and the report gate.

use crate::config::ClientConfig;
use crate::error::AuthError;
use crate::models::{LoginResponse, UserProfile};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// Who is using the client. The store only needs an id and a token; the report gate needs the tier.
pub trait Identity: Send + Sync {
    fn user_id(&self) -> Option<String>;
    fn bearer_token(&self) -> Option<String>;
    fn is_pro(&self) -> bool;

    fn is_logged_in(&self) -> bool {
        self.user_id().is_some()
    }
}

/// Claims the gateway puts in its access tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user id
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub exp: Option<usize>,
}

/// Read the claims of an access token without verifying its signature.
/// The token is only used to recover the user id; the gateway verifies it on every call.
pub fn read_claims(token: &str) -> Result<Claims, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)?;
    Ok(data.claims)
}

#[derive(Debug, Clone, Default)]
pub struct AuthSession {
    access_token: Option<String>,
    user: Option<UserProfile>,
    user_id: Option<String>,
    is_pro: bool,
}

impl AuthSession {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn from_login(response: LoginResponse) -> Self {
        Self {
            user_id: Some(response.user.id.clone()),
            is_pro: response.user.is_pro,
            access_token: Some(response.access_token),
            user: Some(response.user),
        }
    }

    /// Restore a session from a stored token. The token subject wins over a configured user id.
    pub fn from_config(config: &ClientConfig) -> Self {
        let mut user_id = config.user_id.clone();

        if let Some(token) = &config.access_token {
            match read_claims(token) {
                Ok(claims) => user_id = Some(claims.sub),
                Err(e) => tracing::warn!("Ignoring unreadable access token: {}", e),
            }
        }

        Self {
            access_token: config.access_token.clone(),
            user: None,
            user_id,
            is_pro: config.is_pro,
        }
    }

    pub fn user(&self) -> Option<&UserProfile> {
        self.user.as_ref()
    }

    pub fn upgrade_to_pro(&mut self) {
        self.is_pro = true;
        if let Some(user) = self.user.as_mut() {
            user.is_pro = true;
        }
    }

    pub fn logout(&mut self) {
        *self = Self::anonymous();
    }
}

impl Identity for AuthSession {
    fn user_id(&self) -> Option<String> {
        self.user_id.clone()
    }

    fn bearer_token(&self) -> Option<String> {
        self.access_token.clone()
    }

    fn is_pro(&self) -> bool {
        self.is_pro
    }
}
