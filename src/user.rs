use serde::Serialize;

/// Stored in place of a password hash for accounts created through a federated
/// login. Not a valid PHC string, so it never verifies.
pub const FEDERATED_PWHASH: &str = "!federated";

#[derive(Debug, Clone)]
#[derive(sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub pwhash: String,
    pub is_superuser: bool,
}

/// What the front end sees of a session's user.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Whoami {
    pub email: String,
    pub is_superuser: bool,
}

impl User {
    pub fn is_federated(&self) -> bool {
        self.pwhash == FEDERATED_PWHASH
    }

    pub fn whoami(&self) -> Whoami {
        Whoami {
            email: self.email.clone(),
            is_superuser: self.is_superuser,
        }
    }
}
