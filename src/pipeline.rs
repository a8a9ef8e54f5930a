//! The ordered steps each generated route runs.
//!
//! | operation | steps |
//! |-----------|-------|
//! | index  | bind, authenticate?, authorize?, query?, fetch-collection, edit-result?, serialize |
//! | get    | bind, authenticate?, authorize?, query?, fetch-by-id, edit-result?, serialize |
//! | post   | bind, authenticate?, authorize?, parse-body, check-upload?, create, edit-result?, serialize |
//! | patch  | bind, authenticate?, authorize?, query?, fetch-by-id, merge-body, check-upload?, save, edit-result?, serialize |
//! | delete | bind, authenticate?, authorize?, query?, fetch-by-id, delete, edit-result?, serialize |
//!
//! Stages marked `?` come from [`RouteOptions`] and are left out when absent. The first
//! step to fail ends the request with its [`ApiError`].

use axum::{
    Json,
    extract::{FromRequestParts, Path, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, IntoActiveModel, QueryFilter,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

use crate::auth::DefaultAuthentication;
use crate::body::{overlay, read_json_object, validate};
use crate::config::ApiConfig;
use crate::context::{Operation, Outcome, RequestContext};
use crate::errors::{ApiError, ConfigError};
use crate::naming::empty_instance;
use crate::options::{RouteOptions, Stage, StageKind};
use crate::traits::Resource;

enum Step<R: Resource> {
    Delay(Duration),
    Stage(StageKind, Arc<dyn Stage<R>>),
    FetchCollection,
    FetchById,
    ParseBody,
    MergeBody,
    Create,
    Save,
    Delete,
}

impl<R: Resource> Step<R> {
    fn name(&self) -> &'static str {
        match self {
            Step::Delay(_) => "delay",
            Step::Stage(kind, _) => kind.name(),
            Step::FetchCollection => "fetch-collection",
            Step::FetchById => "fetch-by-id",
            Step::ParseBody => "parse-body",
            Step::MergeBody => "merge-body",
            Step::Create => "create",
            Step::Save => "save",
            Step::Delete => "delete",
        }
    }
}

/// The compiled step list for one operation on one resource
pub struct Pipeline<R: Resource> {
    operation: Operation,
    path: String,
    db: DatabaseConnection,
    body_limit: usize,
    steps: Vec<Step<R>>,
}

impl<R: Resource> Pipeline<R> {
    /// Assemble the steps for `operation` from the selected option set.
    ///
    /// # Errors
    /// [`ConfigError::AuthNotConfigured`] when `require_auth` is set, no custom
    /// authenticate stage is given and no default authentication exists.
    pub fn build(
        operation: Operation,
        path: impl Into<String>,
        options: &RouteOptions<R>,
        default_auth: Option<&DefaultAuthentication>,
        db: DatabaseConnection,
        config: &ApiConfig,
    ) -> Result<Self, ConfigError> {
        let path = path.into();
        let mut steps = Vec::new();

        if !config.http_latency.is_zero() {
            steps.push(Step::Delay(config.http_latency));
        }

        // A custom authenticate stage wins over require_auth
        match (options.get(StageKind::Authenticate), options.require_auth) {
            (Some(stage), _) => steps.push(Step::Stage(StageKind::Authenticate, stage.clone())),
            (None, true) => {
                let auth = default_auth.ok_or_else(|| ConfigError::AuthNotConfigured {
                    method: operation.method().to_string(),
                    path: path.clone(),
                })?;
                steps.push(Step::Stage(StageKind::Authenticate, Arc::new(auth.clone())));
            }
            (None, false) => {}
        }

        let optional = |kind: StageKind| options.get(kind).map(|s| Step::Stage(kind, s.clone()));

        steps.extend(optional(StageKind::Authorize));
        match operation {
            Operation::Index => {
                steps.extend(optional(StageKind::Query));
                steps.push(Step::FetchCollection);
            }
            Operation::Get => {
                steps.extend(optional(StageKind::Query));
                steps.push(Step::FetchById);
            }
            Operation::Post => {
                steps.push(Step::ParseBody);
                steps.extend(optional(StageKind::CheckUpload));
                steps.push(Step::Create);
            }
            Operation::Patch => {
                steps.extend(optional(StageKind::Query));
                steps.push(Step::FetchById);
                steps.push(Step::MergeBody);
                steps.extend(optional(StageKind::CheckUpload));
                steps.push(Step::Save);
            }
            Operation::Delete => {
                steps.extend(optional(StageKind::Query));
                steps.push(Step::FetchById);
                steps.push(Step::Delete);
            }
        }
        steps.extend(optional(StageKind::EditResult));

        Ok(Self {
            operation,
            path,
            db,
            body_limit: config.body_limit,
            steps,
        })
    }

    #[must_use]
    pub fn operation(&self) -> Operation {
        self.operation
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Step names in execution order, including the fixed bind and serialize ends
    #[must_use]
    pub fn describe(&self) -> Vec<&'static str> {
        std::iter::once("bind")
            .chain(self.steps.iter().map(Step::name))
            .chain(std::iter::once("serialize"))
            .collect()
    }

    /// Run one request through the pipeline
    pub async fn run(&self, request: Request) -> Response {
        let span = tracing::debug_span!(
            "pipeline",
            operation = self.operation.name(),
            resource = %R::route_name(),
            request_id = %Uuid::new_v4(),
        );

        async move {
            match self.execute(request).await {
                Ok(ctx) => (StatusCode::OK, Json(ctx.result)).into_response(),
                Err(err) => err.into_response(),
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, request: Request) -> Result<RequestContext<R>, ApiError> {
        let (mut parts, body) = request.into_parts();
        let params =
            match Path::<HashMap<String, String>>::from_request_parts(&mut parts, &()).await {
                Ok(Path(params)) => params,
                Err(err) => {
                    tracing::debug!(error = %err, "Unreadable path parameters");
                    HashMap::new()
                }
            };
        let mut ctx = RequestContext::new(self.operation, self.db.clone(), parts, body, params);

        for step in &self.steps {
            tracing::debug!(step = step.name(), "Running step");
            self.apply(step, &mut ctx).await?;
        }
        Ok(ctx)
    }

    async fn apply(&self, step: &Step<R>, ctx: &mut RequestContext<R>) -> Result<(), ApiError> {
        match step {
            Step::Delay(latency) => {
                tokio::time::sleep(*latency).await;
                Ok(())
            }
            Step::Stage(_, stage) => stage.call(ctx).await,
            Step::FetchCollection => fetch_collection(ctx).await,
            Step::FetchById => fetch_by_id(ctx).await,
            Step::ParseBody => self.parse_body(ctx).await,
            Step::MergeBody => self.merge_body(ctx).await,
            Step::Create => create(ctx).await,
            Step::Save => save(ctx).await,
            Step::Delete => delete(ctx).await,
        }
    }

    /// Decode the body over an empty record and validate it
    async fn parse_body(&self, ctx: &mut RequestContext<R>) -> Result<(), ApiError> {
        let body = ctx.take_body().unwrap_or_default();
        let upload = read_json_object(body, self.body_limit).await?;
        let record: R::Record = overlay(&empty_instance::<R::Record>(), upload)?;
        validate::<R>(&record)?;
        ctx.uploaded = Some(record);
        Ok(())
    }

    /// Decode the body over the stored record. The id must survive unchanged.
    async fn merge_body(&self, ctx: &mut RequestContext<R>) -> Result<(), ApiError> {
        let current = ctx.record().cloned().ok_or_else(missing_record)?;
        let body = ctx.take_body().unwrap_or_default();
        let upload = read_json_object(body, self.body_limit).await?;
        let merged: R::Record = overlay(&current, upload)?;

        let before = R::id(&current);
        let after = R::id(&merged);
        if before != after {
            tracing::warn!(before_id = %before, after_id = %after, "Patch trying to change ID");
            return Err(ApiError::unprocessable(
                "The id of a record cannot be changed",
            ));
        }

        validate::<R>(&merged)?;
        ctx.uploaded = Some(merged);
        Ok(())
    }
}

fn missing_record() -> ApiError {
    ApiError::internal(
        "Failed to process request",
        Some(
            "pipeline step ran without a record in the context".to_string(),
        ),
    )
}

fn missing_upload() -> ApiError {
    ApiError::internal(
        "Failed to process request",
        Some("pipeline step ran without an uploaded record".to_string()),
    )
}

async fn fetch_collection<R: Resource>(ctx: &mut RequestContext<R>) -> Result<(), ApiError> {
    let scope = ctx.scope().clone();
    let db = ctx.db().clone();
    let items = scope.all(&db).await?;
    ctx.result = Some(Outcome::List(items));
    Ok(())
}

async fn fetch_by_id<R: Resource>(ctx: &mut RequestContext<R>) -> Result<(), ApiError> {
    let raw = ctx.param("id").unwrap_or_default().to_string();
    let Ok(id) = raw.parse::<R::Id>() else {
        tracing::debug!(id = %raw, "Unparseable id");
        return Err(ApiError::not_found(R::route_name(), Some(raw)));
    };

    let query = ctx.scope().clone().filter(R::ID_COLUMN.eq(id.clone()));
    let db = ctx.db().clone();
    match query.one(&db).await? {
        Some(record) => {
            ctx.result = Some(Outcome::Item(record));
            Ok(())
        }
        None => Err(ApiError::not_found(R::route_name(), Some(id.to_string()))),
    }
}

async fn create<R: Resource>(ctx: &mut RequestContext<R>) -> Result<(), ApiError> {
    let record = ctx.uploaded.clone().ok_or_else(missing_upload)?;
    let assign_id = R::id(&record) == R::id(&empty_instance::<R::Record>());

    let mut active: R::Active = record.into_active_model().reset_all();
    if assign_id {
        match R::new_id() {
            Some(id) => active.set(R::ID_COLUMN, id.into()),
            None => active.not_set(R::ID_COLUMN),
        }
    }

    let db = ctx.db().clone();
    let created = active.insert(&db).await.map_err(ApiError::from_insert)?;
    tracing::debug!(id = %R::id(&created), "Created record");
    ctx.result = Some(Outcome::Item(created));
    Ok(())
}

async fn save<R: Resource>(ctx: &mut RequestContext<R>) -> Result<(), ApiError> {
    let record = ctx.uploaded.clone().ok_or_else(missing_upload)?;
    let id = R::id(&record);
    let active: R::Active = record.into_active_model().reset_all();

    let db = ctx.db().clone();
    let saved = active.update(&db).await.map_err(|err| match err {
        DbErr::RecordNotUpdated => ApiError::not_found(R::route_name(), Some(id.to_string())),
        other => ApiError::from(other),
    })?;
    ctx.result = Some(Outcome::Item(saved));
    Ok(())
}

async fn delete<R: Resource>(ctx: &mut RequestContext<R>) -> Result<(), ApiError> {
    let record = ctx.record().cloned().ok_or_else(missing_record)?;
    tracing::info!(resource = %R::route_name(), id = %R::id(&record), "Deleting");

    let active: R::Active = record.into_active_model();
    let db = ctx.db().clone();
    active.delete(&db).await?;
    Ok(())
}
