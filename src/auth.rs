use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use log::error;
use password_hash::{PasswordHash, SaltString};
use serde::Deserialize;
use uuid::Uuid;

use crate::cohort;

#[derive(Debug, Deserialize)]
pub struct LoginAttempt {
    email: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterAttempt {
    username: Option<String>,
    email: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FederatedAttempt {
    token: Option<String>,
}

pub struct Credentials {
    email: String,
    pass: String,
}

pub struct Registration {
    pub username: String,
    pub email: String,
    pub pass: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

fn present(field: Option<String>) -> cohort::Result<String> {
    match field {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(cohort::Error::MissingFields),
    }
}

/// Passwords are taken as typed, so only absent or empty ones are missing.
fn password(field: Option<String>) -> cohort::Result<String> {
    field
        .filter(|s| !s.is_empty())
        .ok_or(cohort::Error::MissingFields)
}

impl LoginAttempt {
    pub fn credentials(self) -> cohort::Result<Credentials> {
        Ok(Credentials {
            email: present(self.email)?.trim().to_string(),
            pass: password(self.password)?,
        })
    }
}

impl RegisterAttempt {
    pub fn registration(self) -> cohort::Result<Registration> {
        Ok(Registration {
            username: present(self.username)?.trim().to_string(),
            email: present(self.email)?.trim().to_string(),
            pass: password(self.password)?,
        })
    }
}

impl FederatedAttempt {
    pub fn token(self) -> cohort::Result<String> {
        present(self.token)
    }
}

impl Credentials {
    pub fn email(&self) -> &str { &self.email }
    pub fn pass(&self) -> &str { &self.pass }
}

pub fn hash_password(password: &str) -> Result<String, ()> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| {
        error!("couldn't gather salt: {e}");
    })?;

    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| {
        error!("couldn't encode salt: {e}");
    })?;

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|phc| phc.to_string())
        .map_err(|e| {
            error!("couldn't hash password: {e}");
        })
}

/// False for anything that isn't a PHC string, which covers federated accounts.
pub fn verify_password(pwhash: &str, password: &str) -> bool {
    match PasswordHash::new(pwhash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Burns the same argon2 work as a real check for an email with no account,
/// so response time doesn't reveal who is registered. Never matches.
pub fn verify_decoy(password: &str) -> bool {
    static DECOY: OnceLock<Option<String>> = OnceLock::new();

    if let Some(decoy) = DECOY.get_or_init(|| hash_password("").ok()) {
        verify_password(decoy, password);
    }
    false
}

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl FromStr for SessionId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::try_parse(s).map(Self).map_err(|_| ())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::user::FEDERATED_PWHASH;

    #[test]
    fn hash_then_verify() {
        let hash = hash_password("hunter2").unwrap();

        assert!(hash.starts_with("$argon2"));
        assert!(verify_password(&hash, "hunter2"));
        assert!(!verify_password(&hash, "hunter3"));
    }

    #[test]
    fn salts_differ() {
        assert_ne!(hash_password("p").unwrap(), hash_password("p").unwrap());
    }

    #[test]
    fn decoy_never_verifies() {
        assert!(!verify_decoy("p"));
        assert!(!verify_decoy(""));
    }

    #[test]
    fn federated_sentinel_never_verifies() {
        assert!(!verify_password(FEDERATED_PWHASH, ""));
        assert!(!verify_password(FEDERATED_PWHASH, FEDERATED_PWHASH));
    }

    #[test]
    fn missing_fields() {
        let attempt: LoginAttempt = serde_json::from_str(r#"{"email":"a@x.com"}"#).unwrap();
        assert!(matches!(
            attempt.credentials(),
            Err(cohort::Error::MissingFields)
        ));

        let attempt: RegisterAttempt =
            serde_json::from_str(r#"{"username":" ","email":"a@x.com","password":"p"}"#).unwrap();
        assert!(matches!(
            attempt.registration(),
            Err(cohort::Error::MissingFields)
        ));

        let attempt: FederatedAttempt = serde_json::from_str("{}").unwrap();
        assert!(matches!(attempt.token(), Err(cohort::Error::MissingFields)));
    }

    #[test]
    fn email_is_trimmed() {
        let attempt: LoginAttempt =
            serde_json::from_str(r#"{"email":" a@x.com ","password":" p "}"#).unwrap();
        let creds = attempt.credentials().unwrap();

        assert_eq!(creds.email(), "a@x.com");
        assert_eq!(creds.pass(), " p ");
    }

    #[test]
    fn blank_password_is_kept() {
        let attempt: LoginAttempt =
            serde_json::from_str(r#"{"email":"a@x.com","password":"   "}"#).unwrap();
        assert_eq!(attempt.credentials().unwrap().pass(), "   ");

        let attempt: RegisterAttempt =
            serde_json::from_str(r#"{"username":"a","email":"a@x.com","password":""}"#).unwrap();
        assert!(matches!(
            attempt.registration(),
            Err(cohort::Error::MissingFields)
        ));
    }

    #[test]
    fn session_id_parse() {
        let id = SessionId::new();
        assert_eq!(id.to_string().parse::<SessionId>(), Ok(id));
        assert_eq!("not-a-uuid".parse::<SessionId>(), Err(()));
    }
}
