use std::convert::Infallible;
use std::sync::Arc;

use cookie::{Cookie, SameSite};
use log::{error, warn};
use serde::{de::DeserializeOwned, Serialize};
use warp::http::{header, StatusCode};
use warp::{Filter, Rejection, Reply};

use crate::auth::{FederatedAttempt, LoginAttempt, RegisterAttempt};
use crate::cohort::{self, Cohort, CohortAuthed, Issued};
use crate::token::SESSION_SECS;
use crate::upload::{PostUpload, VideoUpload};
use crate::user::Whoami;

pub const TOKEN_COOKIE: &str = "token";

const BODY_LIMIT: u64 = 16 * 1024;

#[derive(Serialize)]
struct SessionReply<'a> {
    message: &'a str,
    #[serde(flatten)]
    user: Whoami,
}

#[derive(Serialize)]
struct Message<'a> {
    message: &'a str,
}

#[derive(Serialize)]
struct Created<'a, T> {
    message: &'a str,
    #[serde(flatten)]
    item: T,
}

#[derive(Serialize)]
struct ErrorReply {
    error: String,
}

fn cookie_base(value: &str, secure: bool) -> cookie::CookieBuilder<'_> {
    Cookie::build((TOKEN_COOKIE, value))
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .path("/")
}

pub fn session_cookie(token: &str, secure: bool) -> String {
    cookie_base(token, secure)
        .max_age(cookie::time::Duration::seconds(SESSION_SECS))
        .build()
        .to_string()
}

pub fn clearing_cookie(secure: bool) -> String {
    let mut cookie = cookie_base("", secure).build();
    cookie.make_removal();
    cookie.to_string()
}

fn with_cohort(
    cohort: &Arc<Cohort>,
) -> impl Filter<Extract = (Arc<Cohort>,), Error = Infallible> + Clone {
    let cohort = Arc::clone(cohort);
    warp::any().map(move || Arc::clone(&cohort))
}

fn json_body<T: DeserializeOwned + Send>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
{
    warp::body::content_length_limit(BODY_LIMIT).and(warp::body::json())
}

fn token_cookie() -> impl Filter<Extract = (Option<String>,), Error = Infallible> + Clone {
    warp::cookie::optional(TOKEN_COOKIE)
}

fn session(
    cohort: &Arc<Cohort>,
) -> impl Filter<Extract = (CohortAuthed,), Error = Rejection> + Clone {
    token_cookie()
        .and(with_cohort(cohort))
        .and_then(|token: Option<String>, cohort: Arc<Cohort>| async move {
            cohort
                .authenticate(token.as_deref())
                .await
                .map_err(warp::reject::custom)
        })
}

/// The one gate in front of every admin operation.
fn superuser(
    cohort: &Arc<Cohort>,
) -> impl Filter<Extract = (CohortAuthed<true>,), Error = Rejection> + Clone {
    session(cohort).and_then(|authed: CohortAuthed| async move {
        authed.require_superuser().map_err(warp::reject::custom)
    })
}

fn issued_reply(
    issued: Issued,
    message: &str,
    status: StatusCode,
    secure: bool,
) -> impl Reply {
    let body = warp::reply::json(&SessionReply {
        message,
        user: issued.user.whoami(),
    });

    warp::reply::with_header(
        warp::reply::with_status(body, status),
        header::SET_COOKIE,
        session_cookie(&issued.token, secure),
    )
}

pub fn auth(
    cohort: &Arc<Cohort>,
    secure: bool,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let login = warp::path!("api" / "auth" / "login")
        .and(warp::post())
        .and(json_body())
        .and(with_cohort(cohort))
        .and_then(move |attempt: LoginAttempt, cohort: Arc<Cohort>| async move {
            let creds = attempt.credentials().map_err(warp::reject::custom)?;
            let issued = cohort
                .login(creds)
                .await
                .map_err(warp::reject::custom)?;

            Ok::<_, Rejection>(issued_reply(issued, "Login successful", StatusCode::OK, secure))
        });

    let register = warp::path!("api" / "auth" / "register")
        .and(warp::post())
        .and(json_body())
        .and(with_cohort(cohort))
        .and_then(move |attempt: RegisterAttempt, cohort: Arc<Cohort>| async move {
            let reg = attempt.registration().map_err(warp::reject::custom)?;
            let issued = cohort
                .register(reg)
                .await
                .map_err(warp::reject::custom)?;

            Ok::<_, Rejection>(issued_reply(
                issued,
                "Registration successful",
                StatusCode::CREATED,
                secure,
            ))
        });

    let google = warp::path!("api" / "auth" / "google")
        .and(warp::post())
        .and(json_body())
        .and(with_cohort(cohort))
        .and_then(move |attempt: FederatedAttempt, cohort: Arc<Cohort>| async move {
            let id_token = attempt.token().map_err(warp::reject::custom)?;
            let issued = cohort
                .login_federated(&id_token)
                .await
                .map_err(warp::reject::custom)?;

            Ok::<_, Rejection>(issued_reply(
                issued,
                "Google login successful",
                StatusCode::OK,
                secure,
            ))
        });

    let me = warp::path!("api" / "auth" / "me")
        .and(warp::get())
        .and(session(cohort))
        .map(|authed: CohortAuthed| warp::reply::json(&authed.whoami()));

    let logout = warp::path!("api" / "auth" / "logout")
        .and(warp::post())
        .and(token_cookie())
        .and(with_cohort(cohort))
        .then(move |token: Option<String>, cohort: Arc<Cohort>| async move {
            // the cookie goes regardless; a live session is also ended
            if token.is_some() {
                match cohort.authenticate(token.as_deref()).await {
                    Ok(authed) => {
                        if let Err(e) = authed.logout().await {
                            error!("couldn't end session on logout: {e:?}");
                        }
                    }
                    Err(e) => warn!("logout with unusable token: {e:?}"),
                }
            }

            warp::reply::with_header(
                warp::reply::json(&Message {
                    message: "Logged out",
                }),
                header::SET_COOKIE,
                clearing_cookie(secure),
            )
        });

    login
        .or(register)
        .unify()
        .or(google)
        .unify()
        .or(me)
        .or(logout)
}

pub fn admin(
    cohort: &Arc<Cohort>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let video = warp::path!("api" / "admin" / "upload" / "video")
        .and(warp::post())
        .and(superuser(cohort))
        .and(json_body())
        .and_then(|authed: CohortAuthed<true>, upload: VideoUpload| async move {
            let video = authed
                .upload_video(upload)
                .await
                .map_err(warp::reject::custom)?;

            Ok::<_, Rejection>(warp::reply::with_status(
                warp::reply::json(&Created {
                    message: "Video uploaded",
                    item: Video { video },
                }),
                StatusCode::CREATED,
            ))
        });

    let post = warp::path!("api" / "admin" / "upload" / "post")
        .and(warp::post())
        .and(superuser(cohort))
        .and(json_body())
        .and_then(|authed: CohortAuthed<true>, upload: PostUpload| async move {
            let post = authed
                .upload_post(upload)
                .await
                .map_err(warp::reject::custom)?;

            Ok::<_, Rejection>(warp::reply::with_status(
                warp::reply::json(&Created {
                    message: "Post created",
                    item: Post { post },
                }),
                StatusCode::CREATED,
            ))
        });

    #[derive(Serialize)]
    struct Video {
        video: crate::upload::Video,
    }

    #[derive(Serialize)]
    struct Post {
        post: crate::upload::Post,
    }

    video.or(post)
}

pub fn routes(
    cohort: &Arc<Cohort>,
    secure: bool,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    auth(cohort, secure)
        .or(admin(cohort))
        .recover(handle_rejection)
}

fn error_reply(
    status: StatusCode,
    error: impl ToString,
) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(
        warp::reply::json(&ErrorReply {
            error: error.to_string(),
        }),
        status,
    )
}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    if let Some(e) = err.find::<cohort::Error>() {
        return Ok(error_reply((*e).into(), e));
    }

    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found")
    } else if err.find::<warp::filters::body::BodyDeserializeError>().is_some() {
        (StatusCode::BAD_REQUEST, "Invalid request body")
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large")
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        (StatusCode::UNSUPPORTED_MEDIA_TYPE, "Expected a json body")
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        (StatusCode::LENGTH_REQUIRED, "Content-Length required")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
    } else {
        error!("unhandled rejection: {err:?}");
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    };

    Ok(error_reply(status, message))
}
