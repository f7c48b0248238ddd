use crate::domain::{self, ProviderService};
use sqlx::{prelude::FromRow, PgPool};
use tracing::{debug, instrument};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PgProviderService {
    pool: PgPool,
}

impl PgProviderService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl ProviderService for PgProviderService {
    type Error = sqlx::Error;

    #[instrument(skip(self))]
    async fn providers(&self) -> Result<Vec<domain::Provider>, Self::Error> {
        let providers = sqlx::query_as::<_, Provider>("SELECT * FROM provider ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(providers.into_iter().map(domain::Provider::from).collect())
    }

    #[instrument(skip(self))]
    async fn providers_by_person(
        &self,
        person_id: Uuid,
        include_retired: bool,
    ) -> Result<Vec<domain::Provider>, Self::Error> {
        let providers = sqlx::query_as::<_, Provider>(
            "SELECT * FROM provider WHERE person_id = $1 AND ($2 OR NOT retired) ORDER BY id",
        )
        .bind(person_id)
        .bind(include_retired)
        .fetch_all(&self.pool)
        .await?;
        Ok(providers.into_iter().map(domain::Provider::from).collect())
    }

    #[instrument(skip(self, provider), fields(provider_id = ?provider.id))]
    async fn save_provider(&self, provider: &mut domain::Provider) -> Result<(), Self::Error> {
        let id = provider.id.unwrap_or_else(Uuid::now_v7);

        sqlx::query(
            "INSERT INTO provider (id, person_id, identifier, retired) VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO UPDATE
             SET person_id = EXCLUDED.person_id,
                 identifier = EXCLUDED.identifier,
                 retired = EXCLUDED.retired",
        )
        .bind(id)
        .bind(provider.person_id)
        .bind(provider.identifier.as_deref())
        .bind(provider.retired)
        .execute(&self.pool)
        .await?;

        provider.id = Some(id);
        debug!(%id, "saved provider");
        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct Provider {
    id: Uuid,
    person_id: Option<Uuid>,
    identifier: Option<String>,
    retired: bool,
}

impl From<Provider> for domain::Provider {
    fn from(
        Provider {
            id,
            person_id,
            identifier,
            retired,
        }: Provider,
    ) -> Self {
        domain::Provider {
            id: Some(id),
            person_id,
            identifier,
            retired,
        }
    }
}
