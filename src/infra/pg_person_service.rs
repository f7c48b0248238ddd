use crate::domain::{self, PersonName, PersonService};
use sqlx::{prelude::FromRow, PgPool, QueryBuilder};
use tracing::{debug, instrument};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PgPersonService {
    pool: PgPool,
}

impl PgPersonService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl PersonService for PgPersonService {
    type Error = sqlx::Error;

    #[instrument(skip(self))]
    async fn person(&self, id: Uuid) -> Result<Option<domain::Person>, Self::Error> {
        let person = QueryBuilder::new("SELECT * FROM person WHERE id = ")
            .push_bind(id)
            .build_query_as::<Person>()
            .fetch_optional(&self.pool)
            .await?;
        Ok(person.map(domain::Person::from))
    }

    #[instrument(skip(self, person), fields(person_id = ?person.id))]
    async fn save_person(&self, person: &mut domain::Person) -> Result<(), Self::Error> {
        let id = person.id.unwrap_or_else(Uuid::now_v7);

        sqlx::query(
            "INSERT INTO person (id, given_name, family_name, gender) VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO UPDATE
             SET given_name = EXCLUDED.given_name,
                 family_name = EXCLUDED.family_name,
                 gender = EXCLUDED.gender",
        )
        .bind(id)
        .bind(person.given_name())
        .bind(person.family_name())
        .bind(person.gender.as_deref())
        .execute(&self.pool)
        .await?;

        person.id = Some(id);
        debug!(%id, "saved person");
        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct Person {
    id: Uuid,
    given_name: Option<String>,
    family_name: Option<String>,
    gender: Option<String>,
}

impl From<Person> for domain::Person {
    fn from(
        Person {
            id,
            given_name,
            family_name,
            gender,
        }: Person,
    ) -> Self {
        let name = (given_name.is_some() || family_name.is_some()).then_some(PersonName {
            given_name,
            family_name,
        });
        domain::Person {
            id: Some(id),
            name,
            gender,
        }
    }
}
