use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A clinical provider record, possibly not yet persisted.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    pub id: Option<Uuid>,
    pub person_id: Option<Uuid>,
    pub identifier: Option<String>,
    pub retired: bool,
}

impl Provider {
    pub fn for_person(person_id: Option<Uuid>) -> Self {
        Self {
            person_id,
            ..Default::default()
        }
    }
}
