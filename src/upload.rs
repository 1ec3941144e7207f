use serde::{Deserialize, Serialize};

use sqlx::FromRow;

use crate::cohort;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoUpload {
    pub title: Option<String>,
    pub file_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PostUpload {
    pub title: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    pub id: i64,
    pub title: String,
    pub file_path: String,
}

#[derive(Debug, Serialize, FromRow)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub content: String,
}

fn both(a: Option<String>, b: Option<String>) -> cohort::Result<(String, String)> {
    match (a, b) {
        (Some(a), Some(b)) if !a.trim().is_empty() && !b.trim().is_empty() => Ok((a, b)),
        _ => Err(cohort::Error::MissingFields),
    }
}

impl VideoUpload {
    /// (title, file path)
    pub fn fields(self) -> cohort::Result<(String, String)> {
        both(self.title, self.file_path)
    }
}

impl PostUpload {
    /// (title, content)
    pub fn fields(self) -> cohort::Result<(String, String)> {
        both(self.title, self.content)
    }
}
