use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use utoipa::ToSchema;
use uuid::{uuid, Uuid};

/// Name prefix of roles denoting a tiered access level.
pub const ROLE_PREFIX_PRIVILEGE_LEVEL: &str = "Privilege Level: ";

/// Name prefix of roles granting a discrete permission.
pub const ROLE_PREFIX_CAPABILITY: &str = "Application Role: ";

/// ID of the built-in system user which never shows up as an account.
pub const DAEMON_USER_ID: Uuid = uuid!("a4f30a1b-5eb9-11df-a648-37a07f9c90fb");

/// User property holding the default display locale.
pub const USER_PROPERTY_DEFAULT_LOCALE: &str = "defaultLocale";

/// User property holding the comma-joined proficient locales.
pub const USER_PROPERTY_PROFICIENT_LOCALES: &str = "proficientLocales";

/// A login user, possibly not yet persisted: `id` is assigned by
/// [UserService](super::UserService) on first save.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Option<Uuid>,
    pub person_id: Option<Uuid>,
    pub username: Option<String>,
    pub roles: BTreeSet<Role>,
    pub properties: BTreeMap<String, String>,
    pub retired: bool,
}

impl User {
    /// A new user linked to the given person.
    pub fn for_person(person_id: Option<Uuid>) -> Self {
        Self {
            person_id,
            ..Default::default()
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    /// First role, in role name order, which denotes a privilege level.
    pub fn privilege_level(&self) -> Option<&Role> {
        self.roles.iter().find(|role| role.is_privilege_level())
    }

    pub fn capabilities(&self) -> BTreeSet<&Role> {
        self.roles.iter().filter(|role| role.is_capability()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
pub struct Role {
    pub name: String,
    pub description: Option<String>,
}

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }

    pub fn is_privilege_level(&self) -> bool {
        self.name.starts_with(ROLE_PREFIX_PRIVILEGE_LEVEL)
    }

    pub fn is_capability(&self) -> bool {
        self.name.starts_with(ROLE_PREFIX_CAPABILITY)
    }
}
