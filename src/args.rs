use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use clap::Parser;
use warp::http::Uri;

/// Shortest JWT signing secret we'll start with, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// Whether cohort's clients connect to it over https.
    /// If so, the token cookie is sent as a secure cookie.
    #[arg(short, long, env = "COHORT_SECURE")]
    secure: bool,

    /// The address cohort should listen on. By default
    /// cohort will listen just on the IPv4 loopback.
    #[arg(short, long, env = "COHORT_ADDRESS")]
    address: Option<String>,

    /// The port cohort listens on.
    #[arg(short, long, env = "COHORT_PORT", default_value_t = 3001)]
    port: u16,

    /// Directory holding the sqlite database.
    #[arg(long, env = "COHORT_DATA_DIR", default_value = ".")]
    data_dir: PathBuf,

    /// Secret used to sign session tokens.
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    jwt_secret: String,

    /// OAuth client id google identity tokens must be issued for.
    #[arg(long, env = "GOOGLE_CLIENT_ID")]
    google_client_id: String,

    /// Accounts created with this email are superusers. May be repeated.
    #[arg(long = "superuser-email", env = "SUPERUSER_EMAILS", value_delimiter = ',')]
    superuser_emails: Vec<String>,

    /// The front end's origin, allowed to make credentialed requests.
    #[arg(long, env = "COHORT_CORS_ORIGIN", default_value = "http://localhost:3000")]
    cors_origin: String,
}

/// An http(s) origin exactly as the cors filter will parse it: nothing after
/// the authority.
fn is_origin(origin: &str) -> bool {
    let Some((scheme, rest)) = origin.split_once("://") else {
        return false;
    };
    if scheme != "http" && scheme != "https" {
        return false;
    }

    match origin.parse::<Uri>() {
        Ok(uri) => uri.authority().map(|a| a.as_str()) == Some(rest) && uri.host().is_some(),
        Err(_) => false,
    }
}

impl Args {
    pub fn addr(&self) -> Result<SocketAddr, AddrParseError> {
        self.address
            .as_deref()
            .unwrap_or("127.0.0.1")
            .parse()
            .map(|addr: IpAddr| (addr, self.port).into())
    }

    pub fn secure(&self) -> bool {
        self.secure
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn jwt_secret(&self) -> &[u8] {
        self.jwt_secret.as_bytes()
    }

    pub fn google_client_id(&self) -> &str {
        &self.google_client_id
    }

    pub fn superuser_emails(&self) -> Vec<String> {
        self.superuser_emails
            .iter()
            .map(|e| e.trim())
            .filter(|e| !e.is_empty())
            .map(Into::into)
            .collect()
    }

    pub fn cors_origin(&self) -> &str {
        &self.cors_origin
    }

    /// Checks what clap can't; run before anything starts.
    pub fn validate(&self) -> Result<(), String> {
        if self.jwt_secret.len() < MIN_SECRET_LEN {
            return Err(format!(
                "jwt secret must be at least {MIN_SECRET_LEN} bytes, got {}",
                self.jwt_secret.len()
            ));
        }

        if self.google_client_id.trim().is_empty() {
            return Err("google client id is empty".into());
        }

        if let Some(bad) = self.superuser_emails().iter().find(|e| !e.contains('@')) {
            return Err(format!("superuser email {bad:?} isn't an email address"));
        }

        if !is_origin(&self.cors_origin) {
            return Err(format!(
                "cors origin {:?} isn't scheme://host[:port]",
                self.cors_origin
            ));
        }

        self.addr()
            .map_err(|e| format!("invalid address {:?}: {e}", self.address))?;

        Ok(())
    }
}
