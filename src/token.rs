use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use log::{debug, error};
use serde::{Deserialize, Serialize};

use crate::auth::SessionId;
use crate::time::Timestamp;
use crate::user::User;

/// Lifetime of a session token and its cookie.
pub const SESSION_SECS: i64 = 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub id: i64,
    pub email: String,
    pub is_superuser: bool,
    pub sid: String,
    pub iat: i64,
    pub exp: i64,
}

pub struct Keys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl Claims {
    pub fn new(user: &User, session_id: &SessionId, issued: Timestamp) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            is_superuser: user.is_superuser,
            sid: session_id.to_string(),
            iat: issued.as_i64(),
            exp: issued.plus_secs(SESSION_SECS).as_i64(),
        }
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.sid.parse().ok()
    }
}

impl Keys {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn sign(&self, claims: &Claims) -> Result<String, ()> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding).map_err(|e| {
            error!("couldn't sign session token: {e:?}");
        })
    }

    /// Checks signature and expiry.
    pub fn verify(&self, token: &str) -> Option<Claims> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!("rejecting session token: {e}");
            })
            .ok()
    }
}
