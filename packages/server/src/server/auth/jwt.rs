use anyhow::{Context, Result};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::common::{AuthUser, HelperId, Role, UserId};

/// JWT Claims issued by the upstream authentication layer
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String, // Subject (user id as string)
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helper_id: Option<Uuid>,
    pub exp: i64,
    pub iat: i64,
    pub iss: String,
    pub jti: String,
}

impl Claims {
    /// Identity the core authorizes against.
    pub fn into_auth_user(self) -> Result<AuthUser> {
        let user_id = UserId::parse(&self.sub).context("token subject is not a user id")?;
        Ok(AuthUser {
            user_id,
            role: self.role,
            helper_id: self.helper_id.map(HelperId::from_uuid),
        })
    }
}

/// Verifies identity tokens. `create_token` exists for local runs and tests;
/// production tokens come from the upstream auth service.
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
}

impl JwtService {
    pub fn new(secret: &str, issuer: String) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer,
        }
    }

    /// Create a token valid for 24 hours
    pub fn create_token(
        &self,
        user_id: UserId,
        role: Role,
        helper_id: Option<HelperId>,
    ) -> Result<String> {
        let now = chrono::Utc::now();
        let exp = now + chrono::Duration::hours(24);

        let claims = Claims {
            sub: user_id.to_string(),
            role,
            helper_id: helper_id.map(HelperId::into_uuid),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            iss: self.issuer.clone(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(Into::into)
    }

    /// Verify signature, expiry and issuer
    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.issuer]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(Into::into)
    }

    /// `verify_token` followed by claim conversion.
    pub fn authenticate(&self, token: &str) -> Result<AuthUser> {
        self.verify_token(token)?.into_auth_user()
    }
}
