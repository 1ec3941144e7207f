use log::{debug, error, warn};
use reqwest::StatusCode;
use serde::Deserialize;

const GOOGLE_TOKENINFO: &str = "https://oauth2.googleapis.com/tokeninfo";
const GOOGLE_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];

/// A third party's assertion of who the caller is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub email: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyError {
    /// The provider says no, or its answer doesn't check out.
    Rejected,
    /// We couldn't get an answer.
    Unavailable,
}

pub enum IdentityProvider {
    Google(Google),
    #[cfg(test)]
    Mock(crate::mock::MockIdentities),
}

pub struct Google {
    client: reqwest::Client,
    client_id: String,
}

/// Google's tokeninfo response. Every value arrives as a string.
#[derive(Debug, Deserialize, Default)]
pub struct TokenInfo {
    iss: Option<String>,
    aud: Option<String>,
    email: Option<String>,
    email_verified: Option<String>,
    name: Option<String>,
}

impl IdentityProvider {
    pub async fn verify(&self, token: &str) -> Result<Identity, VerifyError> {
        match self {
            Self::Google(google) => google.verify(token).await,
            #[cfg(test)]
            Self::Mock(mock) => mock.verify(token),
        }
    }
}

impl Google {
    pub fn new(client_id: String) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;

        Ok(Self { client, client_id })
    }

    async fn verify(&self, token: &str) -> Result<Identity, VerifyError> {
        let resp = self
            .client
            .get(GOOGLE_TOKENINFO)
            .query(&[("id_token", token)])
            .send()
            .await
            .map_err(|e| {
                error!("couldn't reach google tokeninfo: {e}");
                VerifyError::Unavailable
            })?;

        match resp.status() {
            StatusCode::OK => {}
            StatusCode::BAD_REQUEST => {
                debug!("google rejected identity token");
                return Err(VerifyError::Rejected);
            }
            status => {
                error!("unexpected status from google tokeninfo: {status}");
                return Err(VerifyError::Unavailable);
            }
        }

        let info: TokenInfo = resp.json().await.map_err(|e| {
            error!("couldn't parse google tokeninfo: {e}");
            VerifyError::Unavailable
        })?;

        info.check(&self.client_id)
    }
}

impl TokenInfo {
    /// Signature and expiry have been checked by the provider; this checks the
    /// token was issued by google, for us, about a verified address.
    pub fn check(self, client_id: &str) -> Result<Identity, VerifyError> {
        if self.aud.as_deref() != Some(client_id) {
            warn!("identity token for another audience: {:?}", self.aud);
            return Err(VerifyError::Rejected);
        }

        match self.iss.as_deref() {
            Some(iss) if GOOGLE_ISSUERS.contains(&iss) => {}
            iss => {
                warn!("identity token from unexpected issuer: {iss:?}");
                return Err(VerifyError::Rejected);
            }
        }

        if self.email_verified.as_deref() == Some("false") {
            warn!("identity token with unverified email");
            return Err(VerifyError::Rejected);
        }

        let email = match self.email {
            Some(email) if !email.is_empty() => email,
            _ => {
                warn!("identity token without an email");
                return Err(VerifyError::Rejected);
            }
        };

        Ok(Identity {
            email,
            name: self.name.filter(|n| !n.trim().is_empty()),
        })
    }
}
