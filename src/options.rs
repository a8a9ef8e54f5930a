use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::context::RequestContext;
use crate::errors::{ApiError, ConfigError};
use crate::traits::Resource;

/// One step of a request pipeline.
///
/// Returning an error stops the pipeline; the error becomes the response. Plain
/// closures taking `&mut RequestContext<R>` are stages too, so async work is the
/// only reason to implement this by hand.
///
/// ```rust,ignore
/// struct OwnerOnly;
///
/// #[async_trait]
/// impl Stage<Widget> for OwnerOnly {
///     async fn call(&self, ctx: &mut RequestContext<Widget>) -> Result<(), ApiError> {
///         let user = ctx.principal::<User>().ok_or_else(|| ApiError::forbidden("No user"))?;
///         ctx.filter(widget::Column::OwnerId.eq(user.id));
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Stage<R: Resource>: Send + Sync {
    async fn call(&self, ctx: &mut RequestContext<R>) -> Result<(), ApiError>;
}

#[async_trait]
impl<R, F> Stage<R> for F
where
    R: Resource,
    F: Fn(&mut RequestContext<R>) -> Result<(), ApiError> + Send + Sync,
{
    async fn call(&self, ctx: &mut RequestContext<R>) -> Result<(), ApiError> {
        self(ctx)
    }
}

/// The optional extension points, in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Authenticate,
    Authorize,
    Query,
    CheckUpload,
    EditResult,
}

impl StageKind {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            StageKind::Authenticate => "Authenticate",
            StageKind::Authorize => "Authorize",
            StageKind::Query => "Query",
            StageKind::CheckUpload => "CheckUpload",
            StageKind::EditResult => "EditResult",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Operation groups that each get their own option set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteGroup {
    /// index and get
    Read,
    /// post and patch
    Write,
    Delete,
}

/// Per-group route configuration.
///
/// ```rust,ignore
/// let read = RouteOptions::<Widget>::new();
/// let write = RouteOptions::new()
///     .require_auth(true)
///     .check_upload(|ctx: &mut RequestContext<Widget>| {
///         match &ctx.uploaded {
///             Some(w) if w.name.starts_with('_') => Err(ApiError::forbidden("Reserved name")),
///             _ => Ok(()),
///         }
///     });
/// api.add_default_routes::<Widget>(&[read, write])?;
/// ```
pub struct RouteOptions<R: Resource> {
    /// Inserted between `/api` and the model segment. May contain `{param}` captures.
    pub prefix: String,
    /// Replaces the derived model segment. Only read from the first option set.
    pub uri_model_name: Option<String>,
    /// Install the built-in token check unless a custom authenticate stage is set
    pub require_auth: bool,
    authenticate: Option<Arc<dyn Stage<R>>>,
    authorize: Option<Arc<dyn Stage<R>>>,
    query: Option<Arc<dyn Stage<R>>>,
    check_upload: Option<Arc<dyn Stage<R>>>,
    edit_result: Option<Arc<dyn Stage<R>>>,
}

impl<R: Resource> RouteOptions<R> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            prefix: String::new(),
            uri_model_name: None,
            require_auth: false,
            authenticate: None,
            authorize: None,
            query: None,
            check_upload: None,
            edit_result: None,
        }
    }

    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn uri_model_name(mut self, name: impl Into<String>) -> Self {
        self.uri_model_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn require_auth(mut self, require: bool) -> Self {
        self.require_auth = require;
        self
    }

    #[must_use]
    pub fn authenticate<F>(self, f: F) -> Self
    where
        F: Fn(&mut RequestContext<R>) -> Result<(), ApiError> + Send + Sync + 'static,
    {
        self.stage(StageKind::Authenticate, f)
    }

    #[must_use]
    pub fn authorize<F>(self, f: F) -> Self
    where
        F: Fn(&mut RequestContext<R>) -> Result<(), ApiError> + Send + Sync + 'static,
    {
        self.stage(StageKind::Authorize, f)
    }

    #[must_use]
    pub fn query<F>(self, f: F) -> Self
    where
        F: Fn(&mut RequestContext<R>) -> Result<(), ApiError> + Send + Sync + 'static,
    {
        self.stage(StageKind::Query, f)
    }

    /// Post and patch only. `ctx.uploaded` holds the decoded body.
    #[must_use]
    pub fn check_upload<F>(self, f: F) -> Self
    where
        F: Fn(&mut RequestContext<R>) -> Result<(), ApiError> + Send + Sync + 'static,
    {
        self.stage(StageKind::CheckUpload, f)
    }

    #[must_use]
    pub fn edit_result<F>(self, f: F) -> Self
    where
        F: Fn(&mut RequestContext<R>) -> Result<(), ApiError> + Send + Sync + 'static,
    {
        self.stage(StageKind::EditResult, f)
    }

    /// Install any [`Stage`] implementation, including async ones
    #[must_use]
    pub fn stage(mut self, kind: StageKind, stage: impl Stage<R> + 'static) -> Self {
        let stage: Arc<dyn Stage<R>> = Arc::new(stage);
        *self.slot_mut(kind) = Some(stage);
        self
    }

    #[must_use]
    pub fn get(&self, kind: StageKind) -> Option<&Arc<dyn Stage<R>>> {
        match kind {
            StageKind::Authenticate => self.authenticate.as_ref(),
            StageKind::Authorize => self.authorize.as_ref(),
            StageKind::Query => self.query.as_ref(),
            StageKind::CheckUpload => self.check_upload.as_ref(),
            StageKind::EditResult => self.edit_result.as_ref(),
        }
    }

    fn slot_mut(&mut self, kind: StageKind) -> &mut Option<Arc<dyn Stage<R>>> {
        match kind {
            StageKind::Authenticate => &mut self.authenticate,
            StageKind::Authorize => &mut self.authorize,
            StageKind::Query => &mut self.query,
            StageKind::CheckUpload => &mut self.check_upload,
            StageKind::EditResult => &mut self.edit_result,
        }
    }
}

impl<R: Resource> Default for RouteOptions<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Resource> Clone for RouteOptions<R> {
    fn clone(&self) -> Self {
        Self {
            prefix: self.prefix.clone(),
            uri_model_name: self.uri_model_name.clone(),
            require_auth: self.require_auth,
            authenticate: self.authenticate.clone(),
            authorize: self.authorize.clone(),
            query: self.query.clone(),
            check_upload: self.check_upload.clone(),
            edit_result: self.edit_result.clone(),
        }
    }
}

impl<R: Resource> fmt::Debug for RouteOptions<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stages: Vec<&str> = [
            StageKind::Authenticate,
            StageKind::Authorize,
            StageKind::Query,
            StageKind::CheckUpload,
            StageKind::EditResult,
        ]
        .into_iter()
        .filter(|kind| self.get(*kind).is_some())
        .map(StageKind::name)
        .collect();

        f.debug_struct("RouteOptions")
            .field("prefix", &self.prefix)
            .field("uri_model_name", &self.uri_model_name)
            .field("require_auth", &self.require_auth)
            .field("stages", &stages)
            .finish()
    }
}

/// Pick the option set that governs `group`.
///
/// | supplied | read | write | delete |
/// |----------|------|-------|--------|
/// | 0        | default | default | default |
/// | 1        | `[0]` | `[0]` | `[0]` |
/// | 2        | `[0]` | `[1]` | `[1]` |
/// | 3        | `[0]` | `[1]` | `[2]` |
///
/// # Errors
/// More than three option sets is [`ConfigError::TooManyOptionSets`].
pub fn select_options<T: Clone + Default>(
    options: &[T],
    group: RouteGroup,
) -> Result<T, ConfigError> {
    let index = match (options.len(), group) {
        (n, _) if n > 3 => return Err(ConfigError::TooManyOptionSets(n)),
        (0, _) => return Ok(T::default()),
        (1, _) | (_, RouteGroup::Read) => 0,
        (2, _) | (_, RouteGroup::Write) => 1,
        (_, RouteGroup::Delete) => 2,
    };
    Ok(options[index].clone())
}
