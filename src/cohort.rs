use std::{fmt, result, sync::Arc};

use log::{debug, error, info, trace, warn};
use warp::http;

use crate::auth::{self, Credentials, Registration, SessionId};
use crate::backend::{Backend, CreateError, FindError};
use crate::identity::{IdentityProvider, VerifyError};
use crate::time::Timestamp;
use crate::token::{Claims, Keys, SESSION_SECS};
use crate::upload::{Post, PostUpload, Video, VideoUpload};
use crate::user::{User, Whoami, FEDERATED_PWHASH};

pub struct Cohort {
    backend: Backend,
    keys: Keys,
    identity: IdentityProvider,
    superusers: Vec<String>,
}

/// A request whose session token checked out. Admin operations only exist on
/// `CohortAuthed<true>`, reachable through `require_superuser`.
pub struct CohortAuthed<const SUPERUSER: bool = false> {
    cohort: Arc<Cohort>,
    session_id: SessionId,
    user: User,
}

/// A freshly minted session: the signed token to hand out as a cookie, and who
/// it belongs to.
#[derive(Debug)]
pub struct Issued {
    pub token: String,
    pub user: User,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    MissingFields,
    InvalidCredentials,
    EmailTaken,
    NoToken,
    InvalidToken,
    UserNotFound,
    ForbiddenNotSuperuser,
    ExternalVerificationFailed,
    Internal,
}

pub type Result<T> = result::Result<T, Error>;

impl From<Error> for http::StatusCode {
    fn from(e: Error) -> Self {
        match e {
            Error::MissingFields => http::StatusCode::BAD_REQUEST,
            Error::InvalidCredentials
            | Error::NoToken
            | Error::InvalidToken
            | Error::UserNotFound => http::StatusCode::UNAUTHORIZED,
            Error::EmailTaken => http::StatusCode::CONFLICT,
            Error::ForbiddenNotSuperuser => http::StatusCode::FORBIDDEN,
            Error::ExternalVerificationFailed | Error::Internal => {
                http::StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::MissingFields => "Missing required fields",
            Self::InvalidCredentials => "Invalid credentials",
            Self::EmailTaken => "Email already registered",
            Self::NoToken => "No token provided",
            Self::InvalidToken => "Invalid token",
            Self::UserNotFound => "User not found",
            Self::ForbiddenNotSuperuser => "Superuser access required",
            Self::ExternalVerificationFailed => "Identity verification failed",
            Self::Internal => "Internal server error",
        };
        fmt.write_str(s)
    }
}

impl warp::reject::Reject for Error {}

fn now() -> Result<Timestamp> {
    Timestamp::now().map_err(|()| Error::Internal)
}

/// Runs password hashing off the async workers.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!("blocking task failed: {e:?}");
        Error::Internal
    })
}

fn username_for(email: &str, name: Option<String>) -> String {
    name.unwrap_or_else(|| {
        email
            .split_once('@')
            .map(|(local, _)| local)
            .unwrap_or(email)
            .to_string()
    })
}

impl Cohort {
    pub fn new(
        backend: Backend,
        keys: Keys,
        identity: IdentityProvider,
        superusers: Vec<String>,
    ) -> Self {
        Self {
            backend,
            keys,
            identity,
            superusers,
        }
    }

    fn is_superuser_email(&self, email: &str) -> bool {
        self.superusers.iter().any(|su| su == email)
    }

    async fn issue(&self, user: User) -> Result<Issued> {
        let session_id = SessionId::new();
        let now = now()?;
        let expires = now.plus_secs(SESSION_SECS);

        self.backend
            .create_session(&session_id, user.id, now, expires)
            .await
            .map_err(|()| Error::Internal)?;

        let token = self
            .keys
            .sign(&Claims::new(&user, &session_id, now))
            .map_err(|()| Error::Internal)?;

        debug!("{} session {session_id} issued, expires {expires}", user.email);
        Ok(Issued { token, user })
    }

    pub async fn login(&self, creds: Credentials) -> Result<Issued> {
        let email = creds.email();

        let user = match self.backend.find_user_by_email(email).await {
            Ok(user) => user,
            Err(FindError::NotFound) => {
                error!("rejecting non-existant user {email}");
                let pass = creds.pass().to_string();
                blocking(move || auth::verify_decoy(&pass)).await?;
                return Err(Error::InvalidCredentials);
            }
            Err(FindError::Internal) => return Err(Error::Internal),
        };

        let pwhash = user.pwhash.clone();
        let pass = creds.pass().to_string();
        if !blocking(move || auth::verify_password(&pwhash, &pass)).await? {
            if user.is_federated() {
                error!("password login for federated-only user {email}");
            } else {
                error!("wrong password for user {email}");
            }
            return Err(Error::InvalidCredentials);
        }

        info!("{email} login");
        self.issue(user).await
    }

    pub async fn register(&self, reg: Registration) -> Result<Issued> {
        let Registration {
            username,
            email,
            pass,
        } = reg;

        // the unique index on email decides duplicates, concurrent or not
        let pwhash = blocking(move || auth::hash_password(&pass))
            .await?
            .map_err(|()| Error::Internal)?;

        let is_superuser = self.is_superuser_email(&email);
        let user = self
            .backend
            .create_user(&username, &email, &pwhash, is_superuser)
            .await
            .map_err(|e| match e {
                CreateError::Duplicate => {
                    info!("{email} register: already exists");
                    Error::EmailTaken
                }
                CreateError::Internal => Error::Internal,
            })?;

        info!("{email} registered as user {} (superuser: {is_superuser})", user.id);
        self.issue(user).await
    }

    pub async fn login_federated(&self, id_token: &str) -> Result<Issued> {
        let identity = self.identity.verify(id_token).await.map_err(|e| match e {
            VerifyError::Rejected => Error::InvalidToken,
            VerifyError::Unavailable => Error::ExternalVerificationFailed,
        })?;
        let email = identity.email;

        let user = match self.backend.find_user_by_email(&email).await {
            Ok(user) => user,
            Err(FindError::NotFound) => {
                let username = username_for(&email, identity.name);
                let is_superuser = self.is_superuser_email(&email);

                match self
                    .backend
                    .create_user(&username, &email, FEDERATED_PWHASH, is_superuser)
                    .await
                {
                    Ok(user) => {
                        info!("{email} federated: created user {}", user.id);
                        user
                    }
                    Err(CreateError::Duplicate) => self
                        .backend
                        .find_user_by_email(&email)
                        .await
                        .map_err(|_| Error::Internal)?,
                    Err(CreateError::Internal) => return Err(Error::Internal),
                }
            }
            Err(FindError::Internal) => return Err(Error::Internal),
        };

        info!("{email} federated login");
        self.issue(user).await
    }

    pub async fn authenticate(self: &Arc<Self>, token: Option<&str>) -> Result<CohortAuthed> {
        let token = token.filter(|t| !t.is_empty()).ok_or(Error::NoToken)?;

        let claims = self.keys.verify(token).ok_or(Error::InvalidToken)?;
        let session_id = claims.session_id().ok_or_else(|| {
            warn!("signed token with malformed session id {:?}", claims.sid);
            Error::InvalidToken
        })?;

        let owner = self
            .backend
            .session_owner(&session_id, now()?)
            .await
            .map_err(|()| Error::Internal)?
            .ok_or_else(|| {
                info!("{} presented ended session {session_id}", claims.email);
                Error::InvalidToken
            })?;

        let user = self
            .backend
            .find_user_by_email(&claims.email)
            .await
            .map_err(|e| match e {
                FindError::NotFound => {
                    error!("no user found for session {session_id}");
                    Error::UserNotFound
                }
                FindError::Internal => Error::Internal,
            })?;

        if user.id != claims.id || user.id != owner {
            error!(
                "session {session_id} mismatch: token user {}, session user {owner}, \
                 stored user {}",
                claims.id, user.id,
            );
            return Err(Error::InvalidToken);
        }

        trace!("found user {} by session", user.email);
        Ok(CohortAuthed {
            cohort: Arc::clone(self),
            session_id,
            user,
        })
    }

    pub async fn purge_sessions(&self) -> Result<u64> {
        let purged = self
            .backend
            .purge_expired_sessions(now()?)
            .await
            .map_err(|()| Error::Internal)?;

        if purged > 0 {
            debug!("purged {purged} expired sessions");
        }
        Ok(purged)
    }
}

impl<const SUPERUSER: bool> CohortAuthed<SUPERUSER> {
    pub fn whoami(&self) -> Whoami {
        self.user.whoami()
    }

    /// Ends the session server-side; the token stops verifying immediately.
    pub async fn logout(&self) -> Result<()> {
        info!("{} logout, ending session {}", self.user.email, self.session_id);

        self.cohort
            .backend
            .delete_session(&self.session_id)
            .await
            .then_some(())
            .ok_or(Error::Internal)
    }
}

impl<const SUPERUSER: bool> fmt::Debug for CohortAuthed<SUPERUSER> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("CohortAuthed")
            .field("email", &self.user.email)
            .field("session_id", &self.session_id)
            .field("superuser", &SUPERUSER)
            .finish()
    }
}

impl CohortAuthed {
    pub fn require_superuser(self) -> Result<CohortAuthed<true>> {
        if self.user.is_superuser {
            Ok(CohortAuthed {
                cohort: self.cohort,
                session_id: self.session_id,
                user: self.user,
            })
        } else {
            error!("{} denied: not a superuser", self.user.email);
            Err(Error::ForbiddenNotSuperuser)
        }
    }
}

impl CohortAuthed<true> {
    pub async fn upload_video(&self, upload: VideoUpload) -> Result<Video> {
        let (title, file_path) = upload.fields()?;

        let video = self
            .cohort
            .backend
            .insert_video(&title, &file_path, self.user.id, now()?)
            .await
            .map_err(|()| Error::Internal)?;

        info!("{} uploaded video {}: {title}", self.user.email, video.id);
        Ok(video)
    }

    pub async fn upload_post(&self, upload: PostUpload) -> Result<Post> {
        let (title, content) = upload.fields()?;

        let post = self
            .cohort
            .backend
            .insert_post(&title, &content, self.user.id, now()?)
            .await
            .map_err(|()| Error::Internal)?;

        info!("{} created post {}: {title}", self.user.email, post.id);
        Ok(post)
    }
}
