use crate::{
    api::AppState,
    domain::{
        Account, AccountError, Person, PersonService, ProviderService, Role, UserDefaults,
        UserService,
    },
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use error_ext::{BoxError, StdErrorExt};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{error, instrument};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

#[derive(OpenApi)]
#[openapi(
    paths(
        list_accounts,
        create_account,
        get_account,
        update_account,
        list_capabilities,
        list_privilege_levels,
        get_user_defaults,
        update_user_defaults
    ),
    components(schemas(
        AccountForm,
        UserForm,
        ProviderForm,
        AccountView,
        UserView,
        ProviderView,
        Role,
        UserDefaultsForm,
        UserDefaultsView,
        LocaleOptionView
    ))
)]
pub struct ApiDoc;

pub fn app<U, P, R>() -> Router<AppState<U, P, R>>
where
    U: UserService,
    P: PersonService,
    R: ProviderService,
{
    Router::new()
        .route(
            "/accounts",
            get(list_accounts::<U, P, R>).post(create_account::<U, P, R>),
        )
        .route(
            "/accounts/:person_id",
            get(get_account::<U, P, R>).put(update_account::<U, P, R>),
        )
        .route("/roles/capabilities", get(list_capabilities::<U, P, R>))
        .route(
            "/roles/privilege-levels",
            get(list_privilege_levels::<U, P, R>),
        )
        .route(
            "/users/:user_id/defaults",
            get(get_user_defaults::<U, P, R>).put(update_user_defaults::<U, P, R>),
        )
}

// Accounts ========================================================================================

#[utoipa::path(
    get,
    path = "/accounts",
    responses(
        (status = 200, description = "All accounts", body = [AccountView]),
        (status = 500, description = "Internal error")
    )
)]
#[instrument(skip(app_state))]
async fn list_accounts<U, P, R>(
    State(app_state): State<AppState<U, P, R>>,
) -> Result<Json<Vec<AccountView>>, Error>
where
    U: UserService,
    P: PersonService,
    R: ProviderService,
{
    let accounts = app_state.account_service.all_accounts().await?;
    let accounts = accounts
        .iter()
        .map(AccountView::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(accounts))
}

#[utoipa::path(
    post,
    path = "/accounts",
    request_body = AccountForm,
    responses(
        (status = 201, description = "Account created", body = AccountView),
        (status = 422, description = "Invalid form"),
        (status = 500, description = "Internal error")
    )
)]
#[instrument(skip(app_state, form))]
async fn create_account<U, P, R>(
    State(app_state): State<AppState<U, P, R>>,
    Json(form): Json<AccountForm>,
) -> Result<(StatusCode, Json<AccountView>), Error>
where
    U: UserService,
    P: PersonService,
    R: ProviderService,
{
    let mut account = app_state.account_service.new_account(Person::default());
    bind(&mut account, form).await?;
    account.save().await?;
    Ok((StatusCode::CREATED, Json(AccountView::try_from(&account)?)))
}

#[utoipa::path(
    get,
    path = "/accounts/{person_id}",
    params(("person_id" = Uuid, Path, description = "ID of the person")),
    responses(
        (status = 200, description = "The account of the person", body = AccountView),
        (status = 404, description = "No account for the person"),
        (status = 500, description = "Internal error")
    )
)]
#[instrument(skip(app_state))]
async fn get_account<U, P, R>(
    State(app_state): State<AppState<U, P, R>>,
    Path(person_id): Path<Uuid>,
) -> Result<Json<AccountView>, Error>
where
    U: UserService,
    P: PersonService,
    R: ProviderService,
{
    let account = app_state
        .account_service
        .account_by_person_id(person_id)
        .await?
        .ok_or(Error::NotFound("account"))?;
    Ok(Json(AccountView::try_from(&account)?))
}

#[utoipa::path(
    put,
    path = "/accounts/{person_id}",
    params(("person_id" = Uuid, Path, description = "ID of the person")),
    request_body = AccountForm,
    responses(
        (status = 200, description = "Account updated", body = AccountView),
        (status = 404, description = "No account for the person"),
        (status = 422, description = "Invalid form"),
        (status = 500, description = "Internal error")
    )
)]
#[instrument(skip(app_state, form))]
async fn update_account<U, P, R>(
    State(app_state): State<AppState<U, P, R>>,
    Path(person_id): Path<Uuid>,
    Json(form): Json<AccountForm>,
) -> Result<Json<AccountView>, Error>
where
    U: UserService,
    P: PersonService,
    R: ProviderService,
{
    let mut account = app_state
        .account_service
        .account_by_person_id(person_id)
        .await?
        .ok_or(Error::NotFound("account"))?;
    bind(&mut account, form).await?;
    account.save().await?;
    Ok(Json(AccountView::try_from(&account)?))
}

/// Bind the submitted form to the account, appending drafts for additional users and providers.
async fn bind<U, P, R>(account: &mut Account<U, P, R>, form: AccountForm) -> Result<(), Error>
where
    U: UserService,
    P: PersonService,
    R: ProviderService,
{
    let AccountForm {
        given_name,
        family_name,
        gender,
        user_enabled,
        provider_enabled,
        users,
        providers,
    } = form;

    account.set_given_name(given_name);
    account.set_family_name(family_name);
    if let Some(gender) = gender {
        account.set_gender(gender);
    }
    account.set_user_enabled(user_enabled);
    account.set_provider_enabled(provider_enabled);

    if account.user_enabled() {
        let additional = users.len().saturating_sub(account.users_count());
        account.create_required_users(additional);

        let mut usernames = Vec::with_capacity(users.len());
        let mut passwords = Vec::with_capacity(users.len());
        let mut confirm_passwords = Vec::with_capacity(users.len());
        let mut privilege_levels = Vec::with_capacity(users.len());
        let mut capabilities = Vec::with_capacity(users.len());
        for (index, user) in users.into_iter().enumerate() {
            let password = user.password.unwrap_or_else(empty_secret);
            let confirm_password = user.confirm_password.unwrap_or_else(empty_secret);
            if password.expose_secret() != confirm_password.expose_secret() {
                return Err(Error::Invalid(format!(
                    "password confirmation of user {index} does not match"
                )));
            }
            usernames.push(user.username);
            passwords.push(password);
            confirm_passwords.push(confirm_password);
            privilege_levels.push(user.privilege_level);
            capabilities.push(user.capabilities);
        }

        account.set_usernames(usernames)?;
        account.set_passwords(passwords)?;
        account.set_confirm_passwords(confirm_passwords)?;
        account.set_privilege_levels(privilege_levels).await?;
        account.set_capabilities(capabilities).await?;
    }

    if account.provider_enabled() {
        let additional = providers.len().saturating_sub(account.providers_count());
        account.create_required_providers(additional);
        account.set_provider_identifiers(
            providers
                .into_iter()
                .map(|provider| provider.identifier)
                .collect(),
        )?;
    }

    Ok(())
}

fn empty_secret() -> SecretString {
    SecretString::new(String::new())
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AccountForm {
    given_name: String,
    family_name: String,
    gender: Option<String>,
    #[serde(default)]
    user_enabled: bool,
    #[serde(default)]
    provider_enabled: bool,
    #[serde(default)]
    users: Vec<UserForm>,
    #[serde(default)]
    providers: Vec<ProviderForm>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UserForm {
    username: String,
    #[schema(value_type = Option<String>, format = Password)]
    password: Option<SecretString>,
    #[schema(value_type = Option<String>, format = Password)]
    confirm_password: Option<SecretString>,
    privilege_level: String,
    #[serde(default)]
    capabilities: Vec<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProviderForm {
    identifier: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AccountView {
    person_id: Option<Uuid>,
    given_name: Option<String>,
    family_name: Option<String>,
    gender: Option<String>,
    user_enabled: bool,
    provider_enabled: bool,
    users: Vec<UserView>,
    providers: Vec<ProviderView>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserView {
    id: Option<Uuid>,
    username: Option<String>,
    privilege_level: Option<String>,
    capabilities: Vec<String>,
    retired: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProviderView {
    id: Option<Uuid>,
    identifier: Option<String>,
    retired: bool,
}

impl<U, P, R> TryFrom<&Account<U, P, R>> for AccountView
where
    U: UserService,
    P: PersonService,
    R: ProviderService,
{
    type Error = AccountError;

    fn try_from(account: &Account<U, P, R>) -> Result<Self, Self::Error> {
        let users = account
            .users()
            .iter()
            .enumerate()
            .map(|(index, draft)| {
                let user = &draft.user;
                Ok(UserView {
                    id: user.id,
                    username: account.username(index)?.map(ToOwned::to_owned),
                    privilege_level: account
                        .privilege_level(index)?
                        .map(|role| role.name.clone()),
                    capabilities: account
                        .capabilities(index)?
                        .into_iter()
                        .map(|role| role.name.clone())
                        .collect(),
                    retired: user.retired,
                })
            })
            .collect::<Result<Vec<_>, AccountError>>()?;

        let providers = account
            .providers()
            .iter()
            .map(|provider| ProviderView {
                id: provider.id,
                identifier: provider.identifier.clone(),
                retired: provider.retired,
            })
            .collect();

        Ok(AccountView {
            person_id: account.person().id,
            given_name: account.given_name().map(ToOwned::to_owned),
            family_name: account.family_name().map(ToOwned::to_owned),
            gender: account.gender().map(ToOwned::to_owned),
            user_enabled: account.user_enabled(),
            provider_enabled: account.provider_enabled(),
            users,
            providers,
        })
    }
}

// Roles ===========================================================================================

#[utoipa::path(
    get,
    path = "/roles/capabilities",
    responses(
        (status = 200, description = "All capability roles", body = [Role]),
        (status = 500, description = "Internal error")
    )
)]
async fn list_capabilities<U, P, R>(
    State(app_state): State<AppState<U, P, R>>,
) -> Result<Json<Vec<Role>>, Error>
where
    U: UserService,
    P: PersonService,
    R: ProviderService,
{
    let roles = app_state.account_service.all_capabilities().await?;
    Ok(Json(roles))
}

#[utoipa::path(
    get,
    path = "/roles/privilege-levels",
    responses(
        (status = 200, description = "All privilege level roles", body = [Role]),
        (status = 500, description = "Internal error")
    )
)]
async fn list_privilege_levels<U, P, R>(
    State(app_state): State<AppState<U, P, R>>,
) -> Result<Json<Vec<Role>>, Error>
where
    U: UserService,
    P: PersonService,
    R: ProviderService,
{
    let roles = app_state.account_service.all_privilege_levels().await?;
    Ok(Json(roles))
}

// User defaults ===================================================================================

#[utoipa::path(
    get,
    path = "/users/{user_id}/defaults",
    params(("user_id" = Uuid, Path, description = "ID of the user")),
    responses(
        (status = 200, description = "Locale preferences of the user", body = UserDefaultsView),
        (status = 404, description = "Unknown user"),
        (status = 500, description = "Internal error")
    )
)]
#[instrument(skip(app_state))]
async fn get_user_defaults<U, P, R>(
    State(app_state): State<AppState<U, P, R>>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<UserDefaultsView>, Error>
where
    U: UserService,
    P: PersonService,
    R: ProviderService,
{
    let user = app_state
        .user_service
        .user(user_id)
        .await
        .map_err(Error::user_service)?
        .ok_or(Error::NotFound("user"))?;

    let user_defaults =
        UserDefaults::from_user(&user, app_state.presentation_locales.iter().cloned());
    Ok(Json(UserDefaultsView::from(&user_defaults)))
}

#[utoipa::path(
    put,
    path = "/users/{user_id}/defaults",
    params(("user_id" = Uuid, Path, description = "ID of the user")),
    request_body = UserDefaultsForm,
    responses(
        (status = 200, description = "Locale preferences saved", body = UserDefaultsView),
        (status = 404, description = "Unknown user"),
        (status = 422, description = "Unknown default locale"),
        (status = 500, description = "Internal error")
    )
)]
#[instrument(skip(app_state))]
async fn update_user_defaults<U, P, R>(
    State(app_state): State<AppState<U, P, R>>,
    Path(user_id): Path<Uuid>,
    Json(form): Json<UserDefaultsForm>,
) -> Result<Json<UserDefaultsView>, Error>
where
    U: UserService,
    P: PersonService,
    R: ProviderService,
{
    let UserDefaultsForm {
        default_locale,
        proficient_locales,
    } = form;

    if let Some(default_locale) = &default_locale {
        let known = app_state
            .presentation_locales
            .iter()
            .any(|presentation_locale| presentation_locale.locale.to_string() == *default_locale);
        if !known {
            return Err(Error::Invalid(format!(
                "unknown default locale {default_locale}"
            )));
        }
    }

    let mut user = app_state
        .user_service
        .user(user_id)
        .await
        .map_err(Error::user_service)?
        .ok_or(Error::NotFound("user"))?;

    let mut user_defaults = UserDefaults::new(app_state.presentation_locales.iter().cloned(), None);
    user_defaults.set_default_locale(default_locale);
    user_defaults.set_proficient_locales_list(&proficient_locales);
    user_defaults.apply_to(&mut user);

    app_state
        .user_service
        .save_user(&mut user, None)
        .await
        .map_err(Error::user_service)?;

    Ok(Json(UserDefaultsView::from(&user_defaults)))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UserDefaultsForm {
    default_locale: Option<String>,
    #[serde(default)]
    proficient_locales: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserDefaultsView {
    default_locale: Option<String>,
    proficient_locales: String,
    options: Vec<LocaleOptionView>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LocaleOptionView {
    name: String,
    display_name: String,
    selected: bool,
}

impl From<&UserDefaults> for UserDefaultsView {
    fn from(user_defaults: &UserDefaults) -> Self {
        let options = user_defaults
            .options()
            .iter()
            .map(|option| LocaleOptionView {
                name: option.name.clone(),
                display_name: option.display_name.clone(),
                selected: option.selected,
            })
            .collect();

        UserDefaultsView {
            default_locale: user_defaults.default_locale().map(ToOwned::to_owned),
            proficient_locales: user_defaults.proficient_locales(),
            options,
        }
    }
}

// Errors ==========================================================================================

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Account(#[from] AccountError),

    #[error("user service failed")]
    UserService(#[source] BoxError),
}

impl Error {
    fn user_service<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::UserService(error.into())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status_code = match &self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,

            Error::Invalid(_)
            | Error::Account(AccountError::IndexOutOfRange { .. })
            | Error::Account(AccountError::LengthMismatch { .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }

            Error::Account(_) | Error::UserService(_) => {
                error!(error = self.as_chain(), "cannot handle request");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status_code, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        api::{v0, AppState},
        domain::{
            testing::{Call, InMemoryServices},
            AccountService, PresentationLocale, Role, User, ROLE_PREFIX_CAPABILITY,
            ROLE_PREFIX_PRIVILEGE_LEVEL, USER_PROPERTY_PROFICIENT_LOCALES,
        },
    };
    use axum::{
        body::{self, Body},
        http::{Method, Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    fn app(services: &InMemoryServices) -> Router {
        let presentation_locales = ["en", "fr", "es"]
            .into_iter()
            .map(|name| PresentationLocale {
                locale: name.parse().unwrap(),
                display_name: name.to_uppercase(),
            })
            .collect::<Vec<_>>();
        let app_state = AppState {
            account_service: AccountService::new(
                services.clone(),
                services.clone(),
                services.clone(),
            ),
            user_service: services.clone(),
            presentation_locales: presentation_locales.into(),
        };
        v0::app().with_state(app_state)
    }

    fn services() -> InMemoryServices {
        InMemoryServices::with_roles([
            Role::new(format!("{ROLE_PREFIX_PRIVILEGE_LEVEL}Full")),
            Role::new(format!("{ROLE_PREFIX_CAPABILITY}Nurse")),
        ])
    }

    async fn send(
        app: Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map_or_else(Body::empty, |body| Body::from(body.to_string())))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_create_account() {
        let services = services();

        let form = json!({
            "given_name": "Ada",
            "family_name": "Okafor",
            "gender": "F",
            "user_enabled": true,
            "users": [{
                "username": "ada",
                "password": "p",
                "confirm_password": "p",
                "privilege_level": "Privilege Level: Full",
                "capabilities": ["Application Role: Nurse"]
            }]
        });
        let (status, body) = send(app(&services), Method::POST, "/accounts", Some(form)).await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["given_name"], "Ada");
        assert_eq!(body["users"][0]["username"], "ada");
        assert_eq!(body["users"][0]["privilege_level"], "Privilege Level: Full");
        assert_eq!(
            body["users"][0]["capabilities"],
            json!(["Application Role: Nurse"])
        );
        assert_eq!(
            services.calls()[1],
            Call::SaveUser {
                username: Some("ada".to_string()),
                password: Some("p".to_string())
            }
        );

        let person_id = body["person_id"].as_str().unwrap().to_string();
        let (status, body) = send(
            app(&services),
            Method::GET,
            &format!("/accounts/{person_id}"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["family_name"], "Okafor");
        assert_eq!(body["user_enabled"], true);
    }

    #[tokio::test]
    async fn test_create_account_password_mismatch() {
        let services = services();

        let form = json!({
            "given_name": "Ada",
            "family_name": "Okafor",
            "user_enabled": true,
            "users": [{
                "username": "ada",
                "password": "p",
                "confirm_password": "q",
                "privilege_level": "Privilege Level: Full"
            }]
        });
        let (status, _) = send(app(&services), Method::POST, "/accounts", Some(form)).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(services.calls().is_empty());
    }

    #[tokio::test]
    async fn test_update_account() {
        let services = services();

        let form = json!({
            "given_name": "Ada",
            "family_name": "Okafor",
            "user_enabled": true,
            "users": [{
                "username": "ada",
                "password": "p",
                "confirm_password": "p",
                "privilege_level": "Privilege Level: Full"
            }]
        });
        let (status, body) = send(app(&services), Method::POST, "/accounts", Some(form)).await;
        assert_eq!(status, StatusCode::CREATED);
        let uri = format!("/accounts/{}", body["person_id"].as_str().unwrap());

        let form = json!({
            "given_name": "Ada",
            "family_name": "Okafor",
            "user_enabled": true,
            "provider_enabled": true,
            "users": [{
                "username": "ada",
                "password": "n",
                "confirm_password": "n",
                "privilege_level": "Privilege Level: Full"
            }],
            "providers": [{ "identifier": "PRV-1" }]
        });
        let (status, body) = send(app(&services), Method::PUT, &uri, Some(form)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["users"].as_array().map(Vec::len), Some(1));
        assert_eq!(body["providers"][0]["identifier"], "PRV-1");
        assert_eq!(
            services.calls()[2..],
            [
                Call::SavePerson {
                    given_name: Some("Ada".to_string())
                },
                Call::SaveUser {
                    username: Some("ada".to_string()),
                    password: Some("n".to_string())
                },
                Call::ChangePassword {
                    username: Some("ada".to_string()),
                    password: "n".to_string()
                },
                Call::SaveProvider {
                    identifier: Some("PRV-1".to_string())
                }
            ]
        );

        let form = json!({
            "given_name": "Ada",
            "family_name": "Okafor",
            "user_enabled": true,
            "users": []
        });
        let (status, _) = send(app(&services), Method::PUT, &uri, Some(form)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(services.calls().len(), 6);
    }

    #[tokio::test]
    async fn test_unknown_account() {
        let services = services();

        let uri = format!("/accounts/{}", Uuid::now_v7());
        let (status, _) = send(app(&services), Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_service_failure() {
        let services = services();
        services.set_unavailable();

        let (status, body) = send(app(&services), Method::GET, "/accounts", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "user service failed");
    }

    #[tokio::test]
    async fn test_list_roles() {
        let services = services();

        let (status, body) =
            send(app(&services), Method::GET, "/roles/privilege-levels", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["name"], "Privilege Level: Full");

        let (status, body) = send(app(&services), Method::GET, "/roles/capabilities", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn test_user_defaults() {
        let services = services();
        let user_id = Uuid::now_v7();
        let mut user = User {
            id: Some(user_id),
            ..Default::default()
        };
        user.properties
            .insert(USER_PROPERTY_PROFICIENT_LOCALES.to_string(), "fr".to_string());
        services.add_user(user);

        let uri = format!("/users/{user_id}/defaults");
        let (status, body) = send(app(&services), Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["proficient_locales"], "fr");
        assert_eq!(body["options"].as_array().map(Vec::len), Some(3));

        let form = json!({
            "default_locale": "es",
            "proficient_locales": ["false", "en", "es"]
        });
        let (status, body) = send(app(&services), Method::PUT, &uri, Some(form)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["default_locale"], "es");
        assert_eq!(body["proficient_locales"], "en,es");
        assert_eq!(
            services.calls(),
            vec![Call::SaveUser {
                username: None,
                password: None
            }]
        );

        let form = json!({ "default_locale": "de" });
        let (status, _) = send(app(&services), Method::PUT, &uri, Some(form)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let uri = format!("/users/{}/defaults", Uuid::now_v7());
        let (status, _) = send(app(&services), Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
