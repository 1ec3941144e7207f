use std::path::{Path, PathBuf};

use log::{error, info};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{query, query_as, query_scalar, Pool, Sqlite};

use crate::auth::SessionId;
use crate::time::Timestamp;
use crate::upload::{Post, Video};
use crate::user::User;

type Result<T> = std::result::Result<T, ()>;

#[derive(Debug)]
pub enum FindError {
    NotFound,
    Internal,
}

#[derive(Debug)]
pub enum CreateError {
    Duplicate,
    Internal,
}

pub struct Backend(pub Pool<Sqlite>);

fn into_sql(path: &Path) -> PathBuf {
    path.join("cohort.sql")
}

impl Backend {
    pub async fn new(data_dir: &Path) -> std::result::Result<Self, sqlx::Error> {
        let db_path = into_sql(data_dir);

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        info!("Using {}", db_path.display());

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self(pool))
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db_err) = e else {
        return false;
    };

    // SQLITE_CONSTRAINT_UNIQUE, SQLITE_CONSTRAINT_PRIMARYKEY
    matches!(db_err.code().as_deref(), Some("2067") | Some("1555"))
        || db_err.message().contains("UNIQUE constraint failed")
}

impl Backend {
    pub async fn find_user_by_email(&self, email: &str) -> std::result::Result<User, FindError> {
        query_as::<_, User>(
            "
            SELECT id, username, email, pwhash, is_superuser
            FROM users
            WHERE email = ?
            ",
        )
        .bind(email)
        .fetch_one(&self.0)
        .await
        .map_err(|e| {
            if matches!(e, sqlx::Error::RowNotFound) {
                FindError::NotFound
            } else {
                error!("couldn't look up user {email}: {e:?}");
                FindError::Internal
            }
        })
    }

    /// `email` is unique; a concurrent creation for the same address loses with
    /// `CreateError::Duplicate`.
    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        pwhash: &str,
        is_superuser: bool,
    ) -> std::result::Result<User, CreateError> {
        query_as::<_, User>(
            "
            INSERT INTO users
            (username, email, pwhash, is_superuser)
            VALUES
            (?, ?, ?, ?)
            RETURNING id, username, email, pwhash, is_superuser
            ",
        )
        .bind(username)
        .bind(email)
        .bind(pwhash)
        .bind(is_superuser)
        .fetch_one(&self.0)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                CreateError::Duplicate
            } else {
                error!("couldn't create user {email}: {e:?}");
                CreateError::Internal
            }
        })
    }
}

impl Backend {
    pub async fn create_session(
        &self,
        session_id: &SessionId,
        user_id: i64,
        created: Timestamp,
        expires: Timestamp,
    ) -> Result<()> {
        query(
            "
            INSERT INTO sessions
            (id, user_id, created, expires)
            VALUES
            (?, ?, ?, ?)
            ",
        )
        .bind(session_id.to_string())
        .bind(user_id)
        .bind(created)
        .bind(expires)
        .execute(&self.0)
        .await
        .map(|_| ())
        .map_err(|e| {
            error!("couldn't create session for user {user_id}: {e:?}");
        })
    }

    /// The owning user's id, if the session exists and hasn't expired at `now`.
    pub async fn session_owner(
        &self,
        session_id: &SessionId,
        now: Timestamp,
    ) -> Result<Option<i64>> {
        query_scalar::<_, i64>(
            "
            SELECT user_id
            FROM sessions
            WHERE id = ? AND expires > ?
            ",
        )
        .bind(session_id.to_string())
        .bind(now)
        .fetch_optional(&self.0)
        .await
        .map_err(|e| {
            error!("couldn't query for session {session_id}: {e:?}");
        })
    }

    pub async fn delete_session(&self, session_id: &SessionId) -> bool {
        query("DELETE FROM sessions WHERE id = ?")
            .bind(session_id.to_string())
            .execute(&self.0)
            .await
            .map_err(|e| {
                error!("delete session: {e}");
                e
            })
            .is_ok()
    }

    pub async fn purge_expired_sessions(&self, now: Timestamp) -> Result<u64> {
        query("DELETE FROM sessions WHERE expires <= ?")
            .bind(now)
            .execute(&self.0)
            .await
            .map(|done| done.rows_affected())
            .map_err(|e| {
                error!("couldn't purge sessions: {e:?}");
            })
    }
}

impl Backend {
    pub async fn insert_video(
        &self,
        title: &str,
        file_path: &str,
        uploaded_by: i64,
        now: Timestamp,
    ) -> Result<Video> {
        query_as::<_, Video>(
            "
            INSERT INTO videos
            (title, file_path, uploaded_by, created)
            VALUES
            (?, ?, ?, ?)
            RETURNING id, title, file_path
            ",
        )
        .bind(title)
        .bind(file_path)
        .bind(uploaded_by)
        .bind(now)
        .fetch_one(&self.0)
        .await
        .map_err(|e| {
            error!("error inserting video: {e:?}");
        })
    }

    pub async fn insert_post(
        &self,
        title: &str,
        content: &str,
        author: i64,
        now: Timestamp,
    ) -> Result<Post> {
        query_as::<_, Post>(
            "
            INSERT INTO posts
            (title, content, author, created)
            VALUES
            (?, ?, ?, ?)
            RETURNING id, title, content
            ",
        )
        .bind(title)
        .bind(content)
        .bind(author)
        .bind(now)
        .fetch_one(&self.0)
        .await
        .map_err(|e| {
            error!("error inserting post: {e:?}");
        })
    }
}

#[cfg(test)]
pub mod test {
    use super::*;

    pub async fn create_db() -> Pool<Sqlite> {
        // a single connection, so every query sees the same in-memory database
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        sqlx::migrate!("./migrations").run(&db).await.unwrap();

        db
    }

    async fn backend() -> Backend {
        Backend(create_db().await)
    }

    #[tokio::test]
    async fn create_then_find() {
        let backend = backend().await;

        let created = backend
            .create_user("a", "a@x.com", "hash", false)
            .await
            .unwrap();
        let found = backend.find_user_by_email("a@x.com").await.unwrap();

        assert_eq!(created.id, found.id);
        assert_eq!(found.username, "a");
        assert_eq!(found.pwhash, "hash");
        assert!(!found.is_superuser);

        assert!(matches!(
            backend.find_user_by_email("b@x.com").await,
            Err(FindError::NotFound)
        ));
    }

    #[tokio::test]
    async fn ids_are_sequential() {
        let backend = backend().await;

        let a = backend.create_user("a", "a@x.com", "h", false).await.unwrap();
        let b = backend.create_user("b", "b@x.com", "h", true).await.unwrap();

        assert_eq!(b.id, a.id + 1);
        assert!(b.is_superuser);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let backend = backend().await;

        backend.create_user("a", "a@x.com", "h", false).await.unwrap();
        let again = backend.create_user("a2", "a@x.com", "h2", false).await;

        assert!(matches!(again, Err(CreateError::Duplicate)));

        let count: i64 = query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&backend.0)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn session_lifecycle() {
        let backend = backend().await;
        let user = backend.create_user("a", "a@x.com", "h", false).await.unwrap();
        let sid = SessionId::new();
        let t = Timestamp::from_i64(1000);

        backend
            .create_session(&sid, user.id, t, t.plus_secs(60))
            .await
            .unwrap();

        assert_eq!(backend.session_owner(&sid, t).await.unwrap(), Some(user.id));
        // expired
        assert_eq!(
            backend.session_owner(&sid, t.plus_secs(60)).await.unwrap(),
            None
        );

        assert!(backend.delete_session(&sid).await);
        assert_eq!(backend.session_owner(&sid, t).await.unwrap(), None);
    }

    #[tokio::test]
    async fn purge_only_expired() {
        let backend = backend().await;
        let user = backend.create_user("a", "a@x.com", "h", false).await.unwrap();
        let (old, live) = (SessionId::new(), SessionId::new());

        backend
            .create_session(&old, user.id, Timestamp::from_i64(0), Timestamp::from_i64(10))
            .await
            .unwrap();
        backend
            .create_session(&live, user.id, Timestamp::from_i64(0), Timestamp::from_i64(100))
            .await
            .unwrap();

        let purged = backend
            .purge_expired_sessions(Timestamp::from_i64(50))
            .await
            .unwrap();

        assert_eq!(purged, 1);
        assert_eq!(
            backend
                .session_owner(&live, Timestamp::from_i64(50))
                .await
                .unwrap(),
            Some(user.id)
        );
    }

    #[tokio::test]
    async fn uploads_get_ids() {
        let backend = backend().await;
        let user = backend.create_user("a", "a@x.com", "h", true).await.unwrap();
        let now = Timestamp::from_i64(5);

        let video = backend
            .insert_video("intro", "/videos/intro.mp4", user.id, now)
            .await
            .unwrap();
        let post = backend
            .insert_post("welcome", "hello cohort", user.id, now)
            .await
            .unwrap();

        assert_eq!(video.title, "intro");
        assert_eq!(video.file_path, "/videos/intro.mp4");
        assert_eq!(post.content, "hello cohort");
        assert!(video.id > 0 && post.id > 0);
    }
}
