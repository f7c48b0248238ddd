use crate::domain::{
    Person, PersonService, Provider, ProviderService, Role, User, UserService,
};
use futures::{stream, Stream};
use secrecy::{ExposeSecret, SecretString};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};
use thiserror::Error;
use uuid::Uuid;

/// Service call recorded by [InMemoryServices].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    SavePerson {
        given_name: Option<String>,
    },
    SaveUser {
        username: Option<String>,
        password: Option<String>,
    },
    ChangePassword {
        username: Option<String>,
        password: String,
    },
    SaveProvider {
        identifier: Option<String>,
    },
}

#[derive(Debug, Error)]
#[error("service unavailable")]
pub struct Unavailable;

#[derive(Debug, Default)]
struct State {
    persons: BTreeMap<Uuid, Person>,
    users: Vec<User>,
    providers: Vec<Provider>,
    roles: Vec<Role>,
    calls: Vec<Call>,
    unavailable: bool,
}

/// In-memory implementation of all domain services recording every save.
#[derive(Debug, Clone, Default)]
pub struct InMemoryServices(Arc<Mutex<State>>);

impl InMemoryServices {
    pub fn with_roles(roles: impl IntoIterator<Item = Role>) -> Self {
        let services = Self::default();
        services.0.lock().unwrap().roles = roles.into_iter().collect();
        services
    }

    pub fn add_person(&self, person: Person) {
        let id = person.id.expect("person has ID");
        self.0.lock().unwrap().persons.insert(id, person);
    }

    pub fn add_user(&self, user: User) {
        self.0.lock().unwrap().users.push(user);
    }

    pub fn add_provider(&self, provider: Provider) {
        self.0.lock().unwrap().providers.push(provider);
    }

    pub fn set_unavailable(&self) {
        self.0.lock().unwrap().unavailable = true;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().calls.clone()
    }

    fn check(&self) -> Result<(), Unavailable> {
        if self.0.lock().unwrap().unavailable {
            Err(Unavailable)
        } else {
            Ok(())
        }
    }

    fn record(&self, call: Call) {
        self.0.lock().unwrap().calls.push(call);
    }
}

impl PersonService for InMemoryServices {
    type Error = Unavailable;

    async fn person(&self, id: Uuid) -> Result<Option<Person>, Unavailable> {
        self.check()?;
        Ok(self.0.lock().unwrap().persons.get(&id).cloned())
    }

    async fn save_person(&self, person: &mut Person) -> Result<(), Unavailable> {
        self.check()?;
        let id = *person.id.get_or_insert_with(Uuid::now_v7);
        self.record(Call::SavePerson {
            given_name: person.given_name().map(ToOwned::to_owned),
        });
        self.0.lock().unwrap().persons.insert(id, person.clone());
        Ok(())
    }
}

impl UserService for InMemoryServices {
    type Error = Unavailable;

    async fn role(&self, name: &str) -> Result<Option<Role>, Unavailable> {
        self.check()?;
        let state = self.0.lock().unwrap();
        Ok(state.roles.iter().find(|role| role.name == name).cloned())
    }

    async fn roles(
        &self,
    ) -> Result<impl Stream<Item = Result<Role, Unavailable>> + Send, Unavailable> {
        self.check()?;
        let roles = self.0.lock().unwrap().roles.clone();
        Ok(stream::iter(roles.into_iter().map(Ok)))
    }

    async fn user(&self, id: Uuid) -> Result<Option<User>, Unavailable> {
        self.check()?;
        let state = self.0.lock().unwrap();
        Ok(state.users.iter().find(|user| user.id == Some(id)).cloned())
    }

    async fn users(&self) -> Result<Vec<User>, Unavailable> {
        self.check()?;
        Ok(self.0.lock().unwrap().users.clone())
    }

    async fn users_by_person(
        &self,
        person_id: Uuid,
        include_retired: bool,
    ) -> Result<Vec<User>, Unavailable> {
        self.check()?;
        let state = self.0.lock().unwrap();
        let users = state
            .users
            .iter()
            .filter(|user| user.person_id == Some(person_id))
            .filter(|user| include_retired || !user.retired)
            .cloned()
            .collect();
        Ok(users)
    }

    async fn save_user(
        &self,
        user: &mut User,
        password: Option<&SecretString>,
    ) -> Result<(), Unavailable> {
        self.check()?;
        user.id.get_or_insert_with(Uuid::now_v7);
        self.record(Call::SaveUser {
            username: user.username.clone(),
            password: password.map(|p| p.expose_secret().to_owned()),
        });
        let mut state = self.0.lock().unwrap();
        state.users.retain(|u| u.id != user.id);
        state.users.push(user.clone());
        Ok(())
    }

    async fn change_password(
        &self,
        user: &User,
        password: &SecretString,
    ) -> Result<(), Unavailable> {
        self.check()?;
        self.record(Call::ChangePassword {
            username: user.username.clone(),
            password: password.expose_secret().to_owned(),
        });
        Ok(())
    }
}

impl ProviderService for InMemoryServices {
    type Error = Unavailable;

    async fn providers(&self) -> Result<Vec<Provider>, Unavailable> {
        self.check()?;
        Ok(self.0.lock().unwrap().providers.clone())
    }

    async fn providers_by_person(
        &self,
        person_id: Uuid,
        include_retired: bool,
    ) -> Result<Vec<Provider>, Unavailable> {
        self.check()?;
        let state = self.0.lock().unwrap();
        let providers = state
            .providers
            .iter()
            .filter(|provider| provider.person_id == Some(person_id))
            .filter(|provider| include_retired || !provider.retired)
            .cloned()
            .collect();
        Ok(providers)
    }

    async fn save_provider(&self, provider: &mut Provider) -> Result<(), Unavailable> {
        self.check()?;
        provider.id.get_or_insert_with(Uuid::now_v7);
        self.record(Call::SaveProvider {
            identifier: provider.identifier.clone(),
        });
        let mut state = self.0.lock().unwrap();
        state.providers.retain(|p| p.id != provider.id);
        state.providers.push(provider.clone());
        Ok(())
    }
}
