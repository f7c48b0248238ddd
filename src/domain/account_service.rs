use crate::domain::{
    Account, AccountError, Person, PersonService, Provider, ProviderService, Role, User,
    UserService, DAEMON_USER_ID,
};
use futures::{future, TryStreamExt};
use std::collections::BTreeMap;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Entry point for loading and creating [Account]s.
#[derive(Debug, Clone)]
pub struct AccountService<U, P, R> {
    user_service: U,
    person_service: P,
    provider_service: R,
}

impl<U, P, R> AccountService<U, P, R>
where
    U: UserService,
    P: PersonService,
    R: ProviderService,
{
    pub fn new(user_service: U, person_service: P, provider_service: R) -> Self {
        Self {
            user_service,
            person_service,
            provider_service,
        }
    }

    pub fn new_account(&self, person: Person) -> Account<U, P, R> {
        Account::new(
            person,
            self.user_service.clone(),
            self.person_service.clone(),
            self.provider_service.clone(),
        )
    }

    /// One account per distinct person linked to a user or a provider, ordered by person ID. The
    /// daemon user is left out.
    #[instrument(skip(self))]
    pub async fn all_accounts(&self) -> Result<Vec<Account<U, P, R>>, AccountError> {
        let mut accounts = BTreeMap::<Uuid, Linked>::new();

        let users = self
            .user_service
            .users()
            .await
            .map_err(AccountError::user_service)?;
        for user in users {
            if user.id == Some(DAEMON_USER_ID) {
                continue;
            }
            if let Some(person_id) = user.person_id {
                accounts.entry(person_id).or_default().users.push(user);
            }
        }

        let providers = self
            .provider_service
            .providers()
            .await
            .map_err(AccountError::provider_service)?;
        for provider in providers {
            if let Some(person_id) = provider.person_id {
                accounts.entry(person_id).or_default().providers.push(provider);
            }
        }

        let mut all_accounts = Vec::with_capacity(accounts.len());
        for (person_id, linked) in accounts {
            let person = self
                .person_service
                .person(person_id)
                .await
                .map_err(AccountError::person_service)?;
            match person {
                Some(person) => all_accounts.push(linked.into_account(self.new_account(person))),
                None => warn!(%person_id, "skipping account for missing person"),
            }
        }

        debug!(count = all_accounts.len(), "loaded accounts");
        Ok(all_accounts)
    }

    /// The account for the given person, if any user or provider is linked to it.
    #[instrument(skip(self, person), fields(person_id = ?person.id))]
    pub async fn account_by_person(
        &self,
        person: Person,
    ) -> Result<Option<Account<U, P, R>>, AccountError> {
        let Some(person_id) = person.id else {
            return Ok(None);
        };

        let users = self
            .user_service
            .users_by_person(person_id, true)
            .await
            .map_err(AccountError::user_service)?;
        let providers = self
            .provider_service
            .providers_by_person(person_id, true)
            .await
            .map_err(AccountError::provider_service)?;

        if users.is_empty() && providers.is_empty() {
            return Ok(None);
        }

        let account = Linked { users, providers }.into_account(self.new_account(person));
        Ok(Some(account))
    }

    /// The account for the person with the given ID, see [AccountService::account_by_person].
    pub async fn account_by_person_id(
        &self,
        person_id: Uuid,
    ) -> Result<Option<Account<U, P, R>>, AccountError> {
        let person = self
            .person_service
            .person(person_id)
            .await
            .map_err(AccountError::person_service)?;
        match person {
            Some(person) => self.account_by_person(person).await,
            None => Ok(None),
        }
    }

    pub async fn all_capabilities(&self) -> Result<Vec<Role>, AccountError> {
        self.roles_matching(Role::is_capability).await
    }

    pub async fn all_privilege_levels(&self) -> Result<Vec<Role>, AccountError> {
        self.roles_matching(Role::is_privilege_level).await
    }

    async fn roles_matching(&self, p: fn(&Role) -> bool) -> Result<Vec<Role>, AccountError> {
        self.user_service
            .roles()
            .await
            .map_err(AccountError::user_service)?
            .try_filter(|role| future::ready(p(role)))
            .try_collect::<Vec<_>>()
            .await
            .map_err(AccountError::user_service)
    }
}

#[derive(Debug, Default)]
struct Linked {
    users: Vec<User>,
    providers: Vec<Provider>,
}

impl Linked {
    fn into_account<U, P, R>(self, mut account: Account<U, P, R>) -> Account<U, P, R>
    where
        U: UserService,
        P: PersonService,
        R: ProviderService,
    {
        account.set_user_enabled(!self.users.is_empty());
        account.set_provider_enabled(!self.providers.is_empty());
        self.users.into_iter().for_each(|user| account.add_user(user));
        self.providers
            .into_iter()
            .for_each(|provider| account.add_provider(provider));
        account
    }
}
