use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A person, possibly not yet persisted: `id` is assigned by [PersonService](super::PersonService)
/// on first save.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: Option<Uuid>,
    pub name: Option<PersonName>,
    pub gender: Option<String>,
}

impl Person {
    pub fn given_name(&self) -> Option<&str> {
        self.name.as_ref().and_then(|name| name.given_name.as_deref())
    }

    pub fn family_name(&self) -> Option<&str> {
        self.name.as_ref().and_then(|name| name.family_name.as_deref())
    }

    /// The primary name, created blank if the person does not have one yet.
    pub fn name_mut(&mut self) -> &mut PersonName {
        self.name.get_or_insert_with(PersonName::default)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonName {
    pub given_name: Option<String>,
    pub family_name: Option<String>,
}
