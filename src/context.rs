use axum::body::Body;
use axum::http::{HeaderMap, Method, Uri, request::Parts};
use sea_orm::{DatabaseConnection, EntityTrait, QueryFilter, Select, sea_query::IntoCondition};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::options::RouteGroup;
use crate::traits::Resource;

/// The five generated operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Index,
    Get,
    Post,
    Patch,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::Index,
        Operation::Get,
        Operation::Post,
        Operation::Patch,
        Operation::Delete,
    ];

    #[must_use]
    pub fn method(self) -> Method {
        match self {
            Operation::Index | Operation::Get => Method::GET,
            Operation::Post => Method::POST,
            Operation::Patch => Method::PATCH,
            Operation::Delete => Method::DELETE,
        }
    }

    /// Which option set governs this operation
    #[must_use]
    pub fn group(self) -> RouteGroup {
        match self {
            Operation::Index | Operation::Get => RouteGroup::Read,
            Operation::Post | Operation::Patch => RouteGroup::Write,
            Operation::Delete => RouteGroup::Delete,
        }
    }

    /// Single-item operations are mounted at `{base}/{id}`
    #[must_use]
    pub fn targets_item(self) -> bool {
        matches!(self, Operation::Get | Operation::Patch | Operation::Delete)
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Operation::Index => "index",
            Operation::Get => "get",
            Operation::Post => "post",
            Operation::Patch => "patch",
            Operation::Delete => "delete",
        }
    }
}

/// What a pipeline sends back. Stages may replace it wholesale with [`Outcome::Json`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outcome<T> {
    Item(T),
    List(Vec<T>),
    Json(serde_json::Value),
}

/// Per-request state handed to every stage of a pipeline.
///
/// Stages may narrow [`scope`](RequestContext::scope) with
/// [`filter`](RequestContext::filter), inspect the request head, and read or replace
/// `result` and `uploaded`. A context lives for exactly one request.
pub struct RequestContext<R: Resource> {
    operation: Operation,
    db: DatabaseConnection,
    scope: Select<R::Entity>,
    params: HashMap<String, String>,
    parts: Parts,
    // Body is !Sync; the lock keeps &RequestContext Send across awaits
    body: Mutex<Option<Body>>,
    /// Record(s) fetched, created, saved or deleted. Serialized as the response body.
    pub result: Option<Outcome<R::Record>>,
    /// Decoded request body for post and patch, set before check-upload runs
    pub uploaded: Option<R::Record>,
}

impl<R: Resource> RequestContext<R> {
    pub(crate) fn new(
        operation: Operation,
        db: DatabaseConnection,
        parts: Parts,
        body: Body,
        params: HashMap<String, String>,
    ) -> Self {
        Self {
            operation,
            db,
            scope: R::Entity::find(),
            params,
            parts,
            body: Mutex::new(Some(body)),
            result: None,
            uploaded: None,
        }
    }

    #[must_use]
    pub fn operation(&self) -> Operation {
        self.operation
    }

    #[must_use]
    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    /// The query every read and single-item lookup starts from
    #[must_use]
    pub fn scope(&self) -> &Select<R::Entity> {
        &self.scope
    }

    /// Narrow the scope. Conditions accumulate; they can never be removed.
    ///
    /// ```rust,ignore
    /// RouteOptions::new().query(|ctx: &mut RequestContext<Widget>| {
    ///     ctx.filter(widget::Column::Public.eq(true));
    ///     Ok(())
    /// })
    /// ```
    pub fn filter<C: IntoCondition>(&mut self, condition: C) {
        let scope = std::mem::replace(&mut self.scope, R::Entity::find());
        self.scope = scope.filter(condition);
    }

    /// A path parameter, either `id` or one declared in a route prefix
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    #[must_use]
    pub fn extensions(&self) -> &axum::http::Extensions {
        &self.parts.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut axum::http::Extensions {
        &mut self.parts.extensions
    }

    /// The authenticated principal, once an authenticate stage has run
    #[must_use]
    pub fn principal<P: Clone + Send + Sync + 'static>(&self) -> Option<&P> {
        self.parts.extensions.get::<P>()
    }

    /// The single record in `result`, if that is what it holds
    #[must_use]
    pub fn record(&self) -> Option<&R::Record> {
        match &self.result {
            Some(Outcome::Item(item)) => Some(item),
            _ => None,
        }
    }

    #[must_use]
    pub fn records(&self) -> Option<&[R::Record]> {
        match &self.result {
            Some(Outcome::List(items)) => Some(items),
            _ => None,
        }
    }

    pub(crate) fn parts_mut(&mut self) -> &mut Parts {
        &mut self.parts
    }

    /// The body can be consumed once
    pub(crate) fn take_body(&mut self) -> Option<Body> {
        self.body
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_follow_operation_kind() {
        assert_eq!(Operation::Index.group(), RouteGroup::Read);
        assert_eq!(Operation::Get.group(), RouteGroup::Read);
        assert_eq!(Operation::Post.group(), RouteGroup::Write);
        assert_eq!(Operation::Patch.group(), RouteGroup::Write);
        assert_eq!(Operation::Delete.group(), RouteGroup::Delete);
    }

    #[test]
    fn item_operations() {
        let item_ops: Vec<_> = Operation::ALL
            .into_iter()
            .filter(|op| op.targets_item())
            .collect();
        assert_eq!(
            item_ops,
            vec![Operation::Get, Operation::Patch, Operation::Delete]
        );
        assert_eq!(Operation::Patch.method(), Method::PATCH);
    }

    #[test]
    fn outcome_serializes_untagged() {
        let item: Outcome<u32> = Outcome::Item(3);
        assert_eq!(serde_json::to_string(&item).unwrap(), "3");
        let list: Outcome<u32> = Outcome::List(vec![]);
        assert_eq!(serde_json::to_string(&list).unwrap(), "[]");
        let json: Outcome<u32> = Outcome::Json(serde_json::json!({"ok": true}));
        assert_eq!(serde_json::to_string(&json).unwrap(), r#"{"ok":true}"#);
    }
}
