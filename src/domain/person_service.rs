use crate::domain::Person;
use std::error::Error as StdError;
use uuid::Uuid;

#[trait_variant::make(Send)]
pub trait PersonService
where
    Self: Clone + Send + Sync + 'static,
{
    type Error: StdError + Send + Sync + 'static;

    async fn person(&self, id: Uuid) -> Result<Option<Person>, Self::Error>;

    /// Insert or update the given person, assigning its ID if not yet persisted.
    async fn save_person(&self, person: &mut Person) -> Result<(), Self::Error>;
}
