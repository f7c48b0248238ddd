use crate::domain::{
    Person, PersonService, Provider, ProviderService, Role, User, UserService,
};
use error_ext::BoxError;
use secrecy::{ExposeSecret, SecretString};
use std::{collections::BTreeSet, error::Error as StdError};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Linkage of users or providers to the person of an [Account]. Once enabled it stays enabled.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    #[default]
    Disabled,
    Enabled,
}

impl Linkage {
    fn latch(&mut self, enabled: bool) {
        if enabled {
            *self = Linkage::Enabled;
        }
    }

    pub fn is_enabled(self) -> bool {
        self == Linkage::Enabled
    }
}

/// A user being edited as part of an [Account], together with the password and confirmation
/// entered for it.
#[derive(Debug, Default)]
pub struct UserDraft {
    pub user: User,
    pub password: Option<SecretString>,
    pub confirm_password: Option<SecretString>,
}

impl UserDraft {
    fn new(user: User) -> Self {
        Self {
            user,
            ..Default::default()
        }
    }
}

/// One person with the login users and provider records linked to it, edited as one unit and
/// persisted with [Account::save].
#[derive(Debug)]
pub struct Account<U, P, R> {
    person: Person,
    users: Vec<UserDraft>,
    providers: Vec<Provider>,
    user_linkage: Linkage,
    provider_linkage: Linkage,
    user_service: U,
    person_service: P,
    provider_service: R,
}

impl<U, P, R> Account<U, P, R>
where
    U: UserService,
    P: PersonService,
    R: ProviderService,
{
    pub fn new(person: Person, user_service: U, person_service: P, provider_service: R) -> Self {
        Self {
            person,
            users: vec![],
            providers: vec![],
            user_linkage: Linkage::default(),
            provider_linkage: Linkage::default(),
            user_service,
            person_service,
            provider_service,
        }
    }

    pub fn person(&self) -> &Person {
        &self.person
    }

    pub fn given_name(&self) -> Option<&str> {
        self.person.given_name()
    }

    pub fn set_given_name(&mut self, given_name: impl Into<String>) {
        self.person.name_mut().given_name = Some(given_name.into());
    }

    pub fn family_name(&self) -> Option<&str> {
        self.person.family_name()
    }

    pub fn set_family_name(&mut self, family_name: impl Into<String>) {
        self.person.name_mut().family_name = Some(family_name.into());
    }

    pub fn gender(&self) -> Option<&str> {
        self.person.gender.as_deref()
    }

    pub fn set_gender(&mut self, gender: impl Into<String>) {
        self.person.gender = Some(gender.into());
    }

    pub fn user_enabled(&self) -> bool {
        self.user_linkage.is_enabled()
    }

    /// Enable user linkage; `false` leaves an enabled linkage untouched.
    pub fn set_user_enabled(&mut self, enabled: bool) {
        self.user_linkage.latch(enabled);
    }

    pub fn provider_enabled(&self) -> bool {
        self.provider_linkage.is_enabled()
    }

    /// Enable provider linkage; `false` leaves an enabled linkage untouched.
    pub fn set_provider_enabled(&mut self, enabled: bool) {
        self.provider_linkage.latch(enabled);
    }

    /// Append `count` new user drafts for the person, if user linkage is enabled.
    pub fn create_required_users(&mut self, count: usize) {
        if self.user_linkage.is_enabled() {
            let person_id = self.person.id;
            self.users
                .extend((0..count).map(|_| UserDraft::new(User::for_person(person_id))));
        }
    }

    /// Append `count` new provider drafts for the person, if provider linkage is enabled.
    pub fn create_required_providers(&mut self, count: usize) {
        if self.provider_linkage.is_enabled() {
            let person_id = self.person.id;
            self.providers
                .extend((0..count).map(|_| Provider::for_person(person_id)));
        }
    }

    /// Add an already persisted user, e.g. when loading the account for a person.
    pub fn add_user(&mut self, user: User) {
        self.users.push(UserDraft::new(user));
    }

    /// Add an already persisted provider, e.g. when loading the account for a person.
    pub fn add_provider(&mut self, provider: Provider) {
        self.providers.push(provider);
    }

    pub fn users(&self) -> &[UserDraft] {
        &self.users
    }

    pub fn users_count(&self) -> usize {
        self.users.len()
    }

    pub fn user(&self, index: usize) -> Result<&User, AccountError> {
        self.draft(index).map(|draft| &draft.user)
    }

    pub fn providers(&self) -> &[Provider] {
        &self.providers
    }

    pub fn providers_count(&self) -> usize {
        self.providers.len()
    }

    pub fn username(&self, index: usize) -> Result<Option<&str>, AccountError> {
        self.draft(index).map(|draft| draft.user.username.as_deref())
    }

    pub fn set_usernames(&mut self, usernames: Vec<String>) -> Result<(), AccountError> {
        self.check_user_values(usernames.len())?;
        for (draft, username) in self.users.iter_mut().zip(usernames) {
            draft.user.username = Some(username);
        }
        Ok(())
    }

    pub fn password(&self, index: usize) -> Result<Option<&SecretString>, AccountError> {
        self.draft(index).map(|draft| draft.password.as_ref())
    }

    pub fn set_passwords(&mut self, passwords: Vec<SecretString>) -> Result<(), AccountError> {
        self.check_user_values(passwords.len())?;
        for (draft, password) in self.users.iter_mut().zip(passwords) {
            draft.password = Some(password);
        }
        Ok(())
    }

    pub fn confirm_password(&self, index: usize) -> Result<Option<&SecretString>, AccountError> {
        self.draft(index).map(|draft| draft.confirm_password.as_ref())
    }

    pub fn set_confirm_passwords(
        &mut self,
        confirm_passwords: Vec<SecretString>,
    ) -> Result<(), AccountError> {
        self.check_user_values(confirm_passwords.len())?;
        for (draft, confirm_password) in self.users.iter_mut().zip(confirm_passwords) {
            draft.confirm_password = Some(confirm_password);
        }
        Ok(())
    }

    pub fn privilege_level(&self, index: usize) -> Result<Option<&Role>, AccountError> {
        self.draft(index).map(|draft| draft.user.privilege_level())
    }

    /// Assign one privilege level role per user draft, replacing any privilege level the user
    /// already has. An unknown role name is skipped and leaves the user's privilege level as is.
    pub async fn set_privilege_levels(
        &mut self,
        privilege_levels: Vec<String>,
    ) -> Result<(), AccountError> {
        self.check_user_values(privilege_levels.len())?;

        let mut roles = Vec::with_capacity(privilege_levels.len());
        for name in privilege_levels {
            roles.push(self.resolve_role(&name).await?);
        }

        for (draft, role) in self.users.iter_mut().zip(roles) {
            if let Some(role) = role {
                draft.user.roles.retain(|role| !role.is_privilege_level());
                draft.user.roles.insert(role);
            }
        }
        Ok(())
    }

    pub fn capabilities(&self, index: usize) -> Result<BTreeSet<&Role>, AccountError> {
        self.draft(index).map(|draft| draft.user.capabilities())
    }

    /// Assign a set of capability roles per user draft, replacing the capabilities the user
    /// already has. Unknown role names are skipped; if any name of a draft is unknown, its
    /// existing capabilities are kept and the known ones are only added.
    pub async fn set_capabilities(
        &mut self,
        capabilities: Vec<Vec<String>>,
    ) -> Result<(), AccountError> {
        self.check_user_values(capabilities.len())?;

        let mut roles = Vec::with_capacity(capabilities.len());
        for names in capabilities {
            let mut user_roles = Vec::with_capacity(names.len());
            let mut all_known = true;
            for name in names {
                match self.resolve_role(&name).await? {
                    Some(role) => user_roles.push(role),
                    None => all_known = false,
                }
            }
            roles.push((user_roles, all_known));
        }

        for (draft, (user_roles, all_known)) in self.users.iter_mut().zip(roles) {
            if all_known {
                draft.user.roles.retain(|role| !role.is_capability());
            }
            draft.user.roles.extend(user_roles);
        }
        Ok(())
    }

    pub fn set_provider_identifiers(
        &mut self,
        identifiers: Vec<String>,
    ) -> Result<(), AccountError> {
        if identifiers.len() != self.providers.len() {
            return Err(AccountError::LengthMismatch {
                expected: self.providers.len(),
                actual: identifiers.len(),
            });
        }
        for (provider, identifier) in self.providers.iter_mut().zip(identifiers) {
            provider.identifier = Some(identifier);
        }
        Ok(())
    }

    /// Persist the person, then (if linked) each user and each provider. An existing user whose
    /// password and confirmation are both non-blank additionally gets its password changed,
    /// because saving only sets the password of a new user.
    #[instrument(skip(self), fields(person_id = ?self.person.id))]
    pub async fn save(&mut self) -> Result<(), AccountError> {
        self.person_service
            .save_person(&mut self.person)
            .await
            .map_err(AccountError::person_service)?;
        let person_id = self.person.id;
        debug!(?person_id, "saved person");

        if self.user_linkage.is_enabled() {
            for draft in &mut self.users {
                draft.user.person_id = person_id;
                let existing = draft.user.is_persisted();

                self.user_service
                    .save_user(&mut draft.user, draft.password.as_ref())
                    .await
                    .map_err(AccountError::user_service)?;

                if existing {
                    if let (Some(password), Some(confirm_password)) =
                        (&draft.password, &draft.confirm_password)
                    {
                        if !is_blank(password) && !is_blank(confirm_password) {
                            self.user_service
                                .change_password(&draft.user, password)
                                .await
                                .map_err(AccountError::user_service)?;
                            info!(user_id = ?draft.user.id, "changed password");
                        }
                    }
                }
            }
        }

        if self.provider_linkage.is_enabled() {
            for provider in &mut self.providers {
                provider.person_id = person_id;
                self.provider_service
                    .save_provider(provider)
                    .await
                    .map_err(AccountError::provider_service)?;
            }
        }

        info!(
            ?person_id,
            users = self.users.len(),
            providers = self.providers.len(),
            "saved account"
        );
        Ok(())
    }

    fn draft(&self, index: usize) -> Result<&UserDraft, AccountError> {
        self.users.get(index).ok_or(AccountError::IndexOutOfRange {
            index,
            len: self.users.len(),
        })
    }

    fn check_user_values(&self, actual: usize) -> Result<(), AccountError> {
        if actual == self.users.len() {
            Ok(())
        } else {
            Err(AccountError::LengthMismatch {
                expected: self.users.len(),
                actual,
            })
        }
    }

    async fn resolve_role(&self, name: &str) -> Result<Option<Role>, AccountError> {
        let role = self
            .user_service
            .role(name)
            .await
            .map_err(AccountError::user_service)?;
        if role.is_none() {
            warn!(role = name, "skipping unknown role");
        }
        Ok(role)
    }
}

fn is_blank(secret: &SecretString) -> bool {
    secret.expose_secret().trim().is_empty()
}

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("no user at index {index}, account has {len} users")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("expected {expected} values, one per draft, but got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("person service failed")]
    PersonService(#[source] BoxError),

    #[error("user service failed")]
    UserService(#[source] BoxError),

    #[error("provider service failed")]
    ProviderService(#[source] BoxError),
}

impl AccountError {
    pub fn person_service<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        AccountError::PersonService(error.into())
    }

    pub fn user_service<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        AccountError::UserService(error.into())
    }

    pub fn provider_service<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        AccountError::ProviderService(error.into())
    }
}
