use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, EntityTrait, FromQueryResult, IntoActiveModel,
    ModelTrait,
};
use serde::{Serialize, de::DeserializeOwned};
use std::fmt::{Debug, Display};
use std::str::FromStr;

use crate::naming::HasRouteName;
use crate::validation::Validatable;

/// Binds a model to the Sea-ORM types that store it.
///
/// Implement this on a zero-sized marker named after the model; the marker's name
/// becomes the route segment through [`HasRouteName`]. The [`resource!`](crate::resource)
/// macro writes both impls for the usual case.
///
/// ```rust,ignore
/// pub struct Widget;
///
/// impl HasRouteName for Widget {}
///
/// impl Resource for Widget {
///     type Entity = widget::Entity;
///     type Record = widget::Model;
///     type Active = widget::ActiveModel;
///     type Id = i32;
///
///     const ID_COLUMN: widget::Column = widget::Column::Id;
///
///     fn id(record: &widget::Model) -> i32 {
///         record.id
///     }
/// }
/// ```
pub trait Resource: HasRouteName + Send + Sync + 'static {
    type Entity: EntityTrait<Model = Self::Record, ActiveModel = Self::Active> + Sync;

    /// The stored record. `Default` supplies the empty instance that uploads are laid over.
    type Record: ModelTrait<Entity = Self::Entity>
        + FromQueryResult
        + IntoActiveModel<Self::Active>
        + Serialize
        + DeserializeOwned
        + Clone
        + Default
        + Debug
        + Send
        + Sync
        + 'static;

    type Active: ActiveModelTrait<Entity = Self::Entity>
        + ActiveModelBehavior
        + From<Self::Record>
        + Send
        + Sync
        + 'static;

    /// Identifier as it appears in `/{id}` path segments
    type Id: FromStr
        + Into<sea_orm::Value>
        + PartialEq
        + Clone
        + Debug
        + Display
        + Send
        + Sync
        + 'static;

    const ID_COLUMN: <Self::Entity as EntityTrait>::Column;

    fn id(record: &Self::Record) -> Self::Id;

    /// A fresh id for a created record that arrives without one. `None` leaves the
    /// id to the database, which suits auto-increment keys.
    fn new_id() -> Option<Self::Id> {
        None
    }

    /// Return the record as a [`Validatable`] when it needs checking before it is stored.
    fn validatable(_record: &Self::Record) -> Option<&dyn Validatable> {
        None
    }
}
