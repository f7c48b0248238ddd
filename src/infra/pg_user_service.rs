use crate::domain::{self, UserService};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHasher, SaltString},
    Argon2,
};
use futures::{Stream, TryStreamExt};
use secrecy::{ExposeSecret, SecretString};
use sqlx::{prelude::FromRow, PgPool, Postgres, QueryBuilder, Transaction};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info, instrument};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PgUserService {
    pool: PgPool,
}

impl PgUserService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Attach roles and properties to the given user rows.
    async fn complete(&self, users: Vec<User>) -> Result<Vec<domain::User>, PgUserServiceError> {
        let ids = users.iter().map(|user| user.id).collect::<Vec<_>>();

        let mut roles = HashMap::<Uuid, Vec<domain::Role>>::new();
        let mut role_rows = sqlx::query_as::<_, UserRole>(
            "SELECT user_role.user_id, role.name, role.description
             FROM user_role JOIN role ON role.name = user_role.role_name
             WHERE user_role.user_id = ANY($1)",
        )
        .bind(ids.as_slice())
        .fetch(&self.pool);
        while let Some(UserRole {
            user_id,
            name,
            description,
        }) = role_rows.try_next().await?
        {
            roles
                .entry(user_id)
                .or_default()
                .push(domain::Role { name, description });
        }

        let mut properties = HashMap::<Uuid, Vec<(String, String)>>::new();
        let mut property_rows = sqlx::query_as::<_, UserProperty>(
            "SELECT user_id, name, value FROM user_property WHERE user_id = ANY($1)",
        )
        .bind(ids.as_slice())
        .fetch(&self.pool);
        while let Some(UserProperty {
            user_id,
            name,
            value,
        }) = property_rows.try_next().await?
        {
            properties.entry(user_id).or_default().push((name, value));
        }

        let users = users
            .into_iter()
            .map(|user| {
                let roles = roles.remove(&user.id).unwrap_or_default();
                let properties = properties.remove(&user.id).unwrap_or_default();
                domain::User {
                    id: Some(user.id),
                    person_id: user.person_id,
                    username: user.username,
                    roles: roles.into_iter().collect(),
                    properties: properties.into_iter().collect(),
                    retired: user.retired,
                }
            })
            .collect();
        Ok(users)
    }
}

impl UserService for PgUserService {
    type Error = PgUserServiceError;

    #[instrument(skip(self))]
    async fn role(&self, name: &str) -> Result<Option<domain::Role>, Self::Error> {
        let role = QueryBuilder::new("SELECT * FROM role WHERE name = ")
            .push_bind(name)
            .build_query_as::<Role>()
            .fetch_optional(&self.pool)
            .await?;
        Ok(role.map(domain::Role::from))
    }

    #[instrument(skip(self))]
    async fn roles(
        &self,
    ) -> Result<impl Stream<Item = Result<domain::Role, Self::Error>> + Send, Self::Error> {
        let roles = sqlx::query_as::<_, Role>("SELECT * FROM role ORDER BY name")
            .fetch(&self.pool)
            .map_ok(domain::Role::from)
            .map_err(PgUserServiceError::from);
        Ok(roles)
    }

    #[instrument(skip(self))]
    async fn user(&self, id: Uuid) -> Result<Option<domain::User>, Self::Error> {
        let user = QueryBuilder::new("SELECT * FROM app_user WHERE id = ")
            .push_bind(id)
            .build_query_as::<User>()
            .fetch_optional(&self.pool)
            .await?;
        let user = self.complete(user.into_iter().collect()).await?.pop();
        Ok(user)
    }

    #[instrument(skip(self))]
    async fn users(&self) -> Result<Vec<domain::User>, Self::Error> {
        let users = sqlx::query_as::<_, User>("SELECT * FROM app_user ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        self.complete(users).await
    }

    #[instrument(skip(self))]
    async fn users_by_person(
        &self,
        person_id: Uuid,
        include_retired: bool,
    ) -> Result<Vec<domain::User>, Self::Error> {
        let users = sqlx::query_as::<_, User>(
            "SELECT * FROM app_user WHERE person_id = $1 AND ($2 OR NOT retired) ORDER BY id",
        )
        .bind(person_id)
        .bind(include_retired)
        .fetch_all(&self.pool)
        .await?;
        self.complete(users).await
    }

    #[instrument(skip(self, user, password), fields(user_id = ?user.id))]
    async fn save_user(
        &self,
        user: &mut domain::User,
        password: Option<&SecretString>,
    ) -> Result<(), Self::Error> {
        // The password is only stored for a new user.
        let password_hash = match (user.id, password) {
            (None, Some(password)) if !password.expose_secret().trim().is_empty() => {
                Some(hash_password(password)?)
            }
            _ => None,
        };
        let id = user.id.unwrap_or_else(Uuid::now_v7);

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO app_user (id, person_id, username, password_hash, retired)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (id) DO UPDATE
             SET person_id = EXCLUDED.person_id,
                 username = EXCLUDED.username,
                 retired = EXCLUDED.retired",
        )
        .bind(id)
        .bind(user.person_id)
        .bind(user.username.as_deref())
        .bind(password_hash)
        .bind(user.retired)
        .execute(&mut *tx)
        .await?;

        replace_roles(id, user, &mut tx).await?;
        replace_properties(id, user, &mut tx).await?;

        tx.commit().await?;

        user.id = Some(id);
        debug!(%id, "saved user");
        Ok(())
    }

    #[instrument(skip(self, user, password), fields(user_id = ?user.id))]
    async fn change_password(
        &self,
        user: &domain::User,
        password: &SecretString,
    ) -> Result<(), Self::Error> {
        let id = user.id.ok_or(PgUserServiceError::NotPersisted)?;
        let password_hash = hash_password(password)?;

        QueryBuilder::new("UPDATE app_user SET password_hash = ")
            .push_bind(password_hash)
            .push(" WHERE id = ")
            .push_bind(id)
            .build()
            .execute(&self.pool)
            .await?;

        info!(%id, "changed password");
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum PgUserServiceError {
    #[error("database error")]
    Sqlx(#[from] sqlx::Error),

    #[error("cannot hash password: {0}")]
    HashPassword(argon2::password_hash::Error),

    #[error("user has not been saved yet")]
    NotPersisted,
}

fn hash_password(password: &SecretString) -> Result<String, PgUserServiceError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.expose_secret().as_bytes(), &salt)
        .map_err(PgUserServiceError::HashPassword)?;
    Ok(hash.to_string())
}

async fn replace_roles(
    id: Uuid,
    user: &domain::User,
    tx: &mut Transaction<'static, Postgres>,
) -> Result<(), sqlx::Error> {
    QueryBuilder::new("DELETE FROM user_role WHERE user_id = ")
        .push_bind(id)
        .build()
        .execute(&mut **tx)
        .await?;

    if !user.roles.is_empty() {
        QueryBuilder::new("INSERT INTO user_role (user_id, role_name) ")
            .push_values(&user.roles, |mut q, role| {
                q.push_bind(id).push_bind(role.name.clone());
            })
            .build()
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

async fn replace_properties(
    id: Uuid,
    user: &domain::User,
    tx: &mut Transaction<'static, Postgres>,
) -> Result<(), sqlx::Error> {
    QueryBuilder::new("DELETE FROM user_property WHERE user_id = ")
        .push_bind(id)
        .build()
        .execute(&mut **tx)
        .await?;

    if !user.properties.is_empty() {
        QueryBuilder::new("INSERT INTO user_property (user_id, name, value) ")
            .push_values(&user.properties, |mut q, (name, value)| {
                q.push_bind(id)
                    .push_bind(name.clone())
                    .push_bind(value.clone());
            })
            .build()
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

#[derive(Debug, FromRow)]
struct User {
    id: Uuid,
    person_id: Option<Uuid>,
    username: Option<String>,
    retired: bool,
}

#[derive(Debug, FromRow)]
struct Role {
    name: String,
    description: Option<String>,
}

impl From<Role> for domain::Role {
    fn from(Role { name, description }: Role) -> Self {
        domain::Role { name, description }
    }
}

#[derive(Debug, FromRow)]
struct UserRole {
    user_id: Uuid,
    name: String,
    description: Option<String>,
}

#[derive(Debug, FromRow)]
struct UserProperty {
    user_id: Uuid,
    name: String,
    value: String,
}
