use crate::domain::{Role, User};
use futures::Stream;
use secrecy::SecretString;
use std::error::Error as StdError;
use uuid::Uuid;

#[trait_variant::make(Send)]
pub trait UserService
where
    Self: Clone + Send + Sync + 'static,
{
    type Error: StdError + Send + Sync + 'static;

    async fn role(&self, name: &str) -> Result<Option<Role>, Self::Error>;

    async fn roles(
        &self,
    ) -> Result<impl Stream<Item = Result<Role, Self::Error>> + Send, Self::Error>;

    async fn user(&self, id: Uuid) -> Result<Option<User>, Self::Error>;

    async fn users(&self) -> Result<Vec<User>, Self::Error>;

    async fn users_by_person(
        &self,
        person_id: Uuid,
        include_retired: bool,
    ) -> Result<Vec<User>, Self::Error>;

    /// Insert or update the given user, assigning its ID if not yet persisted. The password is
    /// only applied when a new user is inserted; use [UserService::change_password] for an
    /// existing one.
    async fn save_user(
        &self,
        user: &mut User,
        password: Option<&SecretString>,
    ) -> Result<(), Self::Error>;

    async fn change_password(&self, user: &User, password: &SecretString)
        -> Result<(), Self::Error>;
}
