use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The authorising principal behind an operator action. Produced by the auth
/// extractor; recorded on every audit column and action row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditActor {
    pub id: Uuid,
    pub username: String,
}

impl AuditActor {
    pub fn new(id: Uuid, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
        }
    }

    /// Actor used when the system itself drives a transition (matcher,
    /// auto-withdraw), as opposed to a logged-in operator.
    pub fn system() -> Self {
        Self {
            id: Uuid::nil(),
            username: "system".to_string(),
        }
    }
}
