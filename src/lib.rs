//! # crudchain
//!
//! REST CRUD routes for Sea-ORM models on Axum. Each generated route runs a short
//! pipeline: bind a request context, optionally authenticate, authorize and narrow the
//! query, do the database work, optionally edit the result, then send it as JSON.
//!
//! ```rust,ignore
//! use crudchain::{Api, ApiConfig, RouteOptions};
//!
//! crudchain::resource!(pub struct Widget for widget { Id => id: i32 });
//!
//! let mut api = Api::new(db, ApiConfig::with_jwt_key(secret))?;
//! api.set_auth(Users, "/login")?
//!     .add_default_routes::<Widget>(&[
//!         RouteOptions::new(),
//!         RouteOptions::new().require_auth(true),
//!     ])?;
//! let app = api.into_router();
//! ```
//!
//! Reads at `/api/widgets` and `/api/widgets/{id}` are public; post, patch and
//! delete need a token from `POST /login`.

pub mod auth;
pub mod body;
pub mod config;
pub mod context;
pub mod errors;
pub mod naming;
pub mod options;
pub mod pipeline;
pub mod routes;
pub mod traits;
pub mod validation;

#[cfg(test)]
mod test_support;

pub use auth::{AuthGate, Claims, JwtAuth, LoginModel, require_auth};
pub use body::JsonBody;
pub use config::{API_PREFIX, ApiConfig};
pub use context::{Operation, Outcome, RequestContext};
pub use errors::{ApiError, ConfigError};
pub use naming::HasRouteName;
pub use options::{RouteGroup, RouteOptions, Stage, StageKind};
pub use pipeline::Pipeline;
pub use routes::Api;
pub use traits::Resource;
pub use validation::{Validatable, ValidationErrors};

/// Declare a marker type serving a Sea-ORM entity module.
///
/// ```rust,ignore
/// // served at /api/widgets, ids are widget::Model::id
/// crudchain::resource!(pub struct Widget for widget { Id => id: i32 });
///
/// // widget::Model implements Validatable and is checked before every write
/// crudchain::resource!(pub struct Gadget for entities::gadget { Id => id: i32 }, validated);
///
/// // created records without an id get a random v4 uuid
/// crudchain::resource!(pub struct Thing for thing { Id => id: Uuid }, uuid);
/// ```
#[macro_export]
macro_rules! resource {
    (
        $vis:vis struct $name:ident for $($module:ident)::+
        { $column:ident => $field:ident: $id:ty }
        $(, $flag:ident)*
    ) => {
        #[derive(Debug, Clone, Copy, Default)]
        $vis struct $name;

        impl $crate::HasRouteName for $name {}

        impl $crate::Resource for $name {
            type Entity = $($module)::+::Entity;
            type Record = $($module)::+::Model;
            type Active = $($module)::+::ActiveModel;
            type Id = $id;

            const ID_COLUMN: $($module)::+::Column = $($module)::+::Column::$column;

            fn id(record: &Self::Record) -> $id {
                record.$field.clone()
            }

            $($crate::resource!(@$flag);)*
        }
    };

    (@validated) => {
        fn validatable(record: &Self::Record) -> Option<&dyn $crate::Validatable> {
            Some(record)
        }
    };

    (@uuid) => {
        fn new_id() -> Option<Self::Id> {
            Some($crate::__private::Uuid::new_v4())
        }
    };
}

#[doc(hidden)]
pub mod __private {
    pub use uuid::Uuid;
}
