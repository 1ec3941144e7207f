use std::collections::HashMap;

use crate::identity::{Identity, VerifyError};

/// Stands in for google in tests: known tokens map to identities, anything
/// else is rejected.
#[derive(Default)]
pub struct MockIdentities {
    known: HashMap<String, Identity>,
    offline: bool,
}

impl MockIdentities {
    pub fn with(mut self, token: &str, email: &str, name: Option<&str>) -> Self {
        self.known.insert(
            token.into(),
            Identity {
                email: email.into(),
                name: name.map(Into::into),
            },
        );
        self
    }

    pub fn offline(mut self) -> Self {
        self.offline = true;
        self
    }

    pub fn verify(&self, token: &str) -> Result<Identity, VerifyError> {
        if self.offline {
            return Err(VerifyError::Unavailable);
        }
        self.known.get(token).cloned().ok_or(VerifyError::Rejected)
    }
}
