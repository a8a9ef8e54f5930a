use axum::{
    Router,
    extract::Request,
    routing::{MethodRouter, delete, get, patch, post},
};
use sea_orm::DatabaseConnection;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::auth::{self, AuthGate, Authenticator, DefaultAuthentication, JwtAuth, LoginModel};
use crate::config::{API_PREFIX, ApiConfig};
use crate::context::Operation;
use crate::errors::ConfigError;
use crate::options::{RouteOptions, select_options};
use crate::pipeline::Pipeline;
use crate::traits::Resource;

/// Collects generated routes for any number of resources.
///
/// ```rust,ignore
/// let mut api = Api::new(db, ApiConfig::load()?)?;
/// api.set_auth(Users, "/login")?
///     .add_default_routes::<Widget>(&[])?
///     .add_default_routes::<Secret>(&[RouteOptions::new().require_auth(true)])?;
/// axum::serve(listener, api.into_router()).await?;
/// ```
pub struct Api {
    db: DatabaseConnection,
    config: ApiConfig,
    router: Router,
    registered: BTreeSet<(String, String)>,
    authenticator: Option<Arc<dyn Authenticator>>,
}

impl Api {
    /// # Errors
    /// [`ConfigError::NoDatabase`] for a disconnected handle.
    pub fn new(db: DatabaseConnection, config: ApiConfig) -> Result<Self, ConfigError> {
        if matches!(db, DatabaseConnection::Disconnected) {
            return Err(ConfigError::NoDatabase);
        }
        Ok(Self {
            db,
            config,
            router: Router::new(),
            registered: BTreeSet::new(),
            authenticator: None,
        })
    }

    /// [`Api::new`] with configuration from `crudchain.toml` and `CRUDCHAIN_*` variables
    ///
    /// # Errors
    /// See [`ApiConfig::load`] and [`Api::new`].
    pub fn from_env(db: DatabaseConnection) -> Result<Self, ConfigError> {
        Self::new(db, ApiConfig::load()?)
    }

    #[must_use]
    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    #[must_use]
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Enable token authentication and mount `POST {path}` as the login route.
    ///
    /// The login path is used as given, outside `/api`. Call this before registering
    /// routes with `require_auth`.
    ///
    /// # Errors
    /// [`ConfigError::MissingJwtKey`] when no signing key is configured, plus the
    /// path errors of the route registration methods.
    pub fn set_auth<L: LoginModel>(
        &mut self,
        login: L,
        path: &str,
    ) -> Result<&mut Self, ConfigError> {
        if !path.starts_with('/') {
            return Err(ConfigError::InvalidPrefix(path.to_string()));
        }
        let authenticator: Arc<dyn Authenticator> = Arc::new(JwtAuth::new(login, &self.config)?);
        self.claim("POST", path)?;

        let db = self.db.clone();
        let body_limit = self.config.body_limit;
        let login_auth = Arc::clone(&authenticator);
        let handler = move |request: Request| {
            let authenticator = Arc::clone(&login_auth);
            let db = db.clone();
            async move { auth::login(authenticator.as_ref(), &db, body_limit, request).await }
        };

        tracing::info!(path, "Adding login route");
        self.mount(path, post(handler));
        self.authenticator = Some(authenticator);
        Ok(self)
    }

    /// Middleware state for protecting application-defined routes, once auth is set
    #[must_use]
    pub fn auth_gate(&self) -> Option<AuthGate> {
        self.authenticator.as_ref().map(|authenticator| AuthGate {
            authenticator: Arc::clone(authenticator),
            db: self.db.clone(),
        })
    }

    /// Index, get, post, patch and delete for `R`.
    ///
    /// `options` holds zero to three option sets; see
    /// [`select_options`](crate::options::select_options) for which applies where.
    ///
    /// # Errors
    /// Any error from the individual route methods.
    pub fn add_default_routes<R: Resource>(
        &mut self,
        options: &[RouteOptions<R>],
    ) -> Result<&mut Self, ConfigError> {
        tracing::info!(
            model = std::any::type_name::<R>(),
            segment = %segment_for(options),
            "Adding REST routes"
        );
        for operation in Operation::ALL {
            self.add_route(operation, options)?;
        }
        Ok(self)
    }

    /// `GET /api{prefix}/{segment}`
    ///
    /// # Errors
    /// See [`Api::add_route`].
    pub fn add_index_route<R: Resource>(
        &mut self,
        options: &[RouteOptions<R>],
    ) -> Result<&mut Self, ConfigError> {
        self.add_route(Operation::Index, options)
    }

    /// `GET /api{prefix}/{segment}/{id}`
    ///
    /// # Errors
    /// See [`Api::add_route`].
    pub fn add_get_route<R: Resource>(
        &mut self,
        options: &[RouteOptions<R>],
    ) -> Result<&mut Self, ConfigError> {
        self.add_route(Operation::Get, options)
    }

    /// `POST /api{prefix}/{segment}`
    ///
    /// # Errors
    /// See [`Api::add_route`].
    pub fn add_post_route<R: Resource>(
        &mut self,
        options: &[RouteOptions<R>],
    ) -> Result<&mut Self, ConfigError> {
        self.add_route(Operation::Post, options)
    }

    /// `PATCH /api{prefix}/{segment}/{id}`
    ///
    /// # Errors
    /// See [`Api::add_route`].
    pub fn add_patch_route<R: Resource>(
        &mut self,
        options: &[RouteOptions<R>],
    ) -> Result<&mut Self, ConfigError> {
        self.add_route(Operation::Patch, options)
    }

    /// `DELETE /api{prefix}/{segment}/{id}`
    ///
    /// # Errors
    /// See [`Api::add_route`].
    pub fn add_delete_route<R: Resource>(
        &mut self,
        options: &[RouteOptions<R>],
    ) -> Result<&mut Self, ConfigError> {
        self.add_route(Operation::Delete, options)
    }

    /// Register one generated route.
    ///
    /// # Errors
    /// - [`ConfigError::TooManyOptionSets`] for more than three option sets
    /// - [`ConfigError::InvalidPrefix`] for a prefix not starting with `/`
    /// - [`ConfigError::DuplicateRoute`] when the method and path are taken
    /// - [`ConfigError::AuthNotConfigured`] for `require_auth` before [`Api::set_auth`]
    pub fn add_route<R: Resource>(
        &mut self,
        operation: Operation,
        options: &[RouteOptions<R>],
    ) -> Result<&mut Self, ConfigError> {
        let selected = select_options(options, operation.group())?;
        let path = route_path(
            &selected.prefix,
            &segment_for(options),
            operation.targets_item(),
        )?;
        let method = operation.method();

        let default_auth = self.authenticator.clone().map(DefaultAuthentication);
        let pipeline = Arc::new(Pipeline::<R>::build(
            operation,
            path.clone(),
            &selected,
            default_auth.as_ref(),
            self.db.clone(),
            &self.config,
        )?);
        tracing::debug!(
            model = std::any::type_name::<R>(),
            method = %method,
            path = %path,
            steps = ?pipeline.describe(),
            "Adding route"
        );

        let handler = move |request: Request| {
            let pipeline = Arc::clone(&pipeline);
            async move { pipeline.run(request).await }
        };
        let method_router = match operation {
            Operation::Index | Operation::Get => get(handler),
            Operation::Post => post(handler),
            Operation::Patch => patch(handler),
            Operation::Delete => delete(handler),
        };

        self.claim(method.as_str(), &path)?;
        self.mount(&path, method_router);
        Ok(self)
    }

    /// Registered `(method, path)` pairs, sorted
    pub fn routes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.registered
            .iter()
            .map(|(method, path)| (method.as_str(), path.as_str()))
    }

    /// A copy of the router built so far
    #[must_use]
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    #[must_use]
    pub fn into_router(self) -> Router {
        self.router
    }

    fn claim(&mut self, method: &str, path: &str) -> Result<(), ConfigError> {
        let route = (method.to_string(), path.to_string());
        if self.registered.insert(route) {
            Ok(())
        } else {
            Err(ConfigError::DuplicateRoute {
                method: method.to_string(),
                path: path.to_string(),
            })
        }
    }

    fn mount(&mut self, path: &str, method_router: MethodRouter) {
        self.router = std::mem::take(&mut self.router).route(path, method_router);
    }
}

/// The model segment: the first option set's override, else the derived name
fn segment_for<R: Resource>(options: &[RouteOptions<R>]) -> String {
    options
        .first()
        .and_then(|o| o.uri_model_name.clone())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(R::route_name)
}

/// `/api` + prefix + `/` + segment, plus `/{id}` for single-item routes.
///
/// `:name` segments in the prefix are rewritten to `{name}` captures.
///
/// # Errors
/// [`ConfigError::InvalidPrefix`] when a non-empty prefix does not start with `/`.
pub fn route_path(prefix: &str, segment: &str, item: bool) -> Result<String, ConfigError> {
    if !prefix.is_empty() && !prefix.starts_with('/') {
        return Err(ConfigError::InvalidPrefix(prefix.to_string()));
    }
    let prefix = prefix
        .trim_end_matches('/')
        .split('/')
        .map(|part| match part.strip_prefix(':') {
            Some(name) => format!("{{{name}}}"),
            None => part.to_string(),
        })
        .collect::<Vec<_>>()
        .join("/");

    let mut path = format!("{API_PREFIX}{prefix}/{}", segment.trim_matches('/'));
    if item {
        path.push_str("/{id}");
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Widget;

    #[test]
    fn paths_without_prefix() {
        assert_eq!(route_path("", "widgets", false).unwrap(), "/api/widgets");
        assert_eq!(route_path("", "widgets", true).unwrap(), "/api/widgets/{id}");
    }

    #[test]
    fn paths_with_prefix() {
        assert_eq!(
            route_path("/department/{dept_id}", "employees", false).unwrap(),
            "/api/department/{dept_id}/employees"
        );
        assert_eq!(
            route_path("/department/:dept_id/", "employees", true).unwrap(),
            "/api/department/{dept_id}/employees/{id}"
        );
    }

    #[test]
    fn prefix_must_be_absolute() {
        assert!(matches!(
            route_path("v2", "widgets", false),
            Err(ConfigError::InvalidPrefix(_))
        ));
    }

    #[test]
    fn segment_override_comes_from_the_first_option_set() {
        assert_eq!(segment_for::<Widget>(&[]), "widgets");
        let options = [
            RouteOptions::<Widget>::new().uri_model_name("other_widgets"),
            RouteOptions::new().uri_model_name("ignored"),
        ];
        assert_eq!(segment_for(&options), "other_widgets");
    }

    #[test]
    fn disconnected_database_is_rejected() {
        let result = Api::new(DatabaseConnection::Disconnected, ApiConfig::default());
        assert!(matches!(result, Err(ConfigError::NoDatabase)));
    }
}
