use crate::domain::Provider;
use std::error::Error as StdError;
use uuid::Uuid;

#[trait_variant::make(Send)]
pub trait ProviderService
where
    Self: Clone + Send + Sync + 'static,
{
    type Error: StdError + Send + Sync + 'static;

    async fn providers(&self) -> Result<Vec<Provider>, Self::Error>;

    async fn providers_by_person(
        &self,
        person_id: Uuid,
        include_retired: bool,
    ) -> Result<Vec<Provider>, Self::Error>;

    async fn save_provider(&self, provider: &mut Provider) -> Result<(), Self::Error>;
}
