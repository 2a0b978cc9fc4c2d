use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{CatalogError, Result};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    ReadCatalog,
    /// Edits and cache rebuilds share this elevated check.
    EditCatalog,
}

/// Verified identity of the caller of an edit or rebuild.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthContext {
    pub subject: String,
    pub permissions: Vec<Permission>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthContext {
    /// Elevated operator: may edit and rebuild.
    pub fn admin(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            permissions: vec![Permission::ReadCatalog, Permission::EditCatalog],
            expires_at: None,
        }
    }

    pub fn anonymous() -> Self {
        Self {
            subject: "anonymous".to_string(),
            permissions: Vec::new(),
            expires_at: None,
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn require(&self, permission: Permission) -> Result<()> {
        if self.has_permission(permission) {
            Ok(())
        } else {
            Err(CatalogError::PermissionDenied(format!(
                "{} lacks {:?}",
                self.subject, permission
            )))
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    pub iat: usize,
    pub exp: usize,
}

/// Verifies HS256 bearer tokens. Issuing them is another service's job.
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &SecretString) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn verify(&self, token: &str) -> Result<AuthContext> {
        let token = token.strip_prefix("Bearer ").unwrap_or(token);
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| CatalogError::PermissionDenied(format!("invalid token: {}", e)))?;
        debug!(subject = %data.claims.sub, "verified operator token");

        Ok(AuthContext {
            subject: data.claims.sub,
            permissions: data.claims.permissions,
            expires_at: DateTime::from_timestamp(data.claims.exp as i64, 0),
        })
    }
}
