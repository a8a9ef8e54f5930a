//! Token based authentication.
//!
//! [`Api::set_auth`](crate::Api::set_auth) installs a login route backed by a
//! [`LoginModel`]. A successful login returns `{"token": "..."}`, an HS256 token with
//! claims `{id, exp}`. Routes with `require_auth` then expect that token either as
//! `Authorization: Bearer <token>` or as an `access_token` query parameter, and make
//! the resolved principal available through
//! [`RequestContext::principal`](crate::RequestContext::principal).

use async_trait::async_trait;
use axum::{
    Json,
    extract::{Query, Request, State},
    http::{StatusCode, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use crate::body::{JsonBody, read_json_object};
use crate::config::ApiConfig;
use crate::context::RequestContext;
use crate::errors::{ApiError, ConfigError};
use crate::options::Stage;
use crate::traits::Resource;

/// Application hook deciding who may log in and who a token belongs to.
///
/// ```rust,ignore
/// struct Users;
///
/// #[async_trait]
/// impl LoginModel for Users {
///     type Id = i32;
///     type Principal = user::Model;
///
///     async fn check_login_details(&self, db: &DatabaseConnection, body: &JsonBody) -> Result<i32, ApiError> {
///         let name = body.get("username").and_then(|v| v.as_str()).unwrap_or_default();
///         let user = user::Entity::find().filter(user::Column::Username.eq(name)).one(db).await?;
///         match user {
///             Some(u) if verify(&u.password_hash, body) => Ok(u.id),
///             _ => Err(ApiError::forbidden("Bad credentials")),
///         }
///     }
///
///     async fn get_by_id(&self, db: &DatabaseConnection, id: i32) -> Result<user::Model, ApiError> {
///         user::Entity::find_by_id(id).one(db).await?.ok_or_else(|| ApiError::not_found("users", Some(id.to_string())))
///     }
/// }
/// ```
#[async_trait]
pub trait LoginModel: Send + Sync + 'static {
    /// Stored in the token's `id` claim
    type Id: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static;
    /// Inserted into request extensions after a successful authentication
    type Principal: Clone + Send + Sync + 'static;

    /// # Errors
    /// Any error rejects the login with 403.
    async fn check_login_details(
        &self,
        db: &DatabaseConnection,
        body: &JsonBody,
    ) -> Result<Self::Id, ApiError>;

    /// # Errors
    /// Any error rejects the request with 401.
    async fn get_by_id(
        &self,
        db: &DatabaseConnection,
        id: Self::Id,
    ) -> Result<Self::Principal, ApiError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims<I> {
    pub id: I,
    /// Expiry, seconds since the epoch
    pub exp: i64,
}

/// HS256 token issuer and verifier bound to a [`LoginModel`]
pub struct JwtAuth<L: LoginModel> {
    login: L,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl<L: LoginModel> JwtAuth<L> {
    /// # Errors
    /// [`ConfigError::MissingJwtKey`] when `config.jwt_key` is empty.
    pub fn new(login: L, config: &ApiConfig) -> Result<Self, ConfigError> {
        if config.jwt_key.is_empty() {
            return Err(ConfigError::MissingJwtKey);
        }
        let secret = config.jwt_key.as_bytes();

        // Only HS256; exp is required and checked without grace period
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Ok(Self {
            login,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            ttl: config.token_ttl(),
        })
    }

    /// Sign a token for `id`, valid for the configured lifetime
    ///
    /// # Errors
    /// A 500 if the token cannot be produced.
    pub fn issue_token(&self, id: &L::Id) -> Result<String, ApiError> {
        let ttl = chrono::Duration::from_std(self.ttl)
            .map_err(|err| ApiError::internal("Failed to issue token", Some(err.to_string())))?;
        let exp = Utc::now()
            .checked_add_signed(ttl)
            .ok_or_else(|| ApiError::internal("Failed to issue token", None))?
            .timestamp();

        let claims = Claims {
            id: id.clone(),
            exp,
        };
        tracing::info!(expiry = exp, id = ?id, "Signing token");
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|err| ApiError::internal("Failed to issue token", Some(err.to_string())))
    }

    /// Check signature, algorithm and expiry
    ///
    /// # Errors
    /// A 401 for any token that does not validate.
    pub fn verify_token(&self, token: &str) -> Result<Claims<L::Id>, ApiError> {
        decode::<Claims<L::Id>>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| {
                tracing::warn!(error = %err, "JWT token did not validate");
                ApiError::unauthorized("Unauthorized")
            })
    }
}

/// Authentication with the login model's types erased, shared by stages and middleware
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Resolve the request's principal and insert it into `parts.extensions`.
    ///
    /// # Errors
    /// A 401 when there is no valid token or its principal no longer exists.
    async fn authenticate(&self, db: &DatabaseConnection, parts: &mut Parts)
    -> Result<(), ApiError>;

    /// # Errors
    /// A 403 when the login model rejects the credentials.
    async fn login(&self, db: &DatabaseConnection, body: &JsonBody) -> Result<String, ApiError>;
}

#[async_trait]
impl<L: LoginModel> Authenticator for JwtAuth<L> {
    async fn authenticate(
        &self,
        db: &DatabaseConnection,
        parts: &mut Parts,
    ) -> Result<(), ApiError> {
        let token = extract_token(parts).ok_or_else(|| {
            tracing::warn!(path = %parts.uri.path(), "No token supplied");
            ApiError::unauthorized("Unauthorized")
        })?;
        let claims = self.verify_token(&token)?;
        let principal = self
            .login
            .get_by_id(db, claims.id.clone())
            .await
            .map_err(|err| {
                tracing::warn!(id = ?claims.id, error = %err, "Cannot find logged in user");
                ApiError::unauthorized("Unauthorized")
            })?;
        parts.extensions.insert(principal);
        Ok(())
    }

    async fn login(&self, db: &DatabaseConnection, body: &JsonBody) -> Result<String, ApiError> {
        let id = self
            .login
            .check_login_details(db, body)
            .await
            .map_err(|err| {
                tracing::warn!(error = %err, "Login failed");
                ApiError::forbidden("Login failed")
            })?;
        tracing::info!(id = ?id, "Logged in");
        self.issue_token(&id)
    }
}

#[derive(Deserialize)]
struct AccessToken {
    access_token: Option<String>,
}

/// The bearer token from the `Authorization` header, else the `access_token` query parameter
#[must_use]
pub fn extract_token(parts: &Parts) -> Option<String> {
    let from_header = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string());

    from_header.or_else(|| {
        Query::<AccessToken>::try_from_uri(&parts.uri)
            .ok()
            .and_then(|Query(q)| q.access_token)
    })
}

/// The built-in authenticate stage installed by `require_auth`
#[derive(Clone)]
pub struct DefaultAuthentication(pub(crate) Arc<dyn Authenticator>);

#[async_trait]
impl<R: Resource> Stage<R> for DefaultAuthentication {
    async fn call(&self, ctx: &mut RequestContext<R>) -> Result<(), ApiError> {
        let db = ctx.db().clone();
        self.0.authenticate(&db, ctx.parts_mut()).await
    }
}

/// State for the [`require_auth`] middleware
#[derive(Clone)]
pub struct AuthGate {
    pub(crate) authenticator: Arc<dyn Authenticator>,
    pub(crate) db: DatabaseConnection,
}

/// Protect application-defined routes with the same token check the generated routes use.
///
/// ```rust,ignore
/// let gate = api.auth_gate().expect("set_auth was called");
/// let app = api.into_router().route(
///     "/me",
///     get(me).layer(axum::middleware::from_fn_with_state(gate, crudchain::auth::require_auth)),
/// );
/// ```
pub async fn require_auth(State(gate): State<AuthGate>, request: Request, next: Next) -> Response {
    let (mut parts, body) = request.into_parts();
    if let Err(err) = gate.authenticator.authenticate(&gate.db, &mut parts).await {
        return err.into_response();
    }
    next.run(Request::from_parts(parts, body)).await
}

#[derive(Serialize)]
struct TokenResponse {
    token: String,
}

pub(crate) async fn login(
    authenticator: &dyn Authenticator,
    db: &DatabaseConnection,
    body_limit: usize,
    request: Request,
) -> Response {
    let result = async {
        let body = read_json_object(request.into_body(), body_limit).await?;
        authenticator.login(db, &body).await
    }
    .await;

    match result {
        Ok(token) => (StatusCode::OK, Json(TokenResponse { token })).into_response(),
        Err(err) => err.into_response(),
    }
}
