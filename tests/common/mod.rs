#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use crudchain::{Api, ApiConfig, ApiError, JsonBody, LoginModel, RouteOptions};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, Database, DatabaseConnection, DbErr,
    EntityTrait, QueryFilter, Schema, Set,
};
use sea_orm_migration::prelude::*;
use serde_json::Value;
use tower::ServiceExt;
use tracing_subscriber::EnvFilter;

pub mod entities;
use entities::{gadget, private_widget, thing, user, widget};

pub const JWT_KEY: &str = "RandomString";

crudchain::resource!(pub struct Widget for entities::widget { Id => id: i32 });
crudchain::resource!(pub struct PrivateWidget for entities::private_widget { Id => id: i32 });
crudchain::resource!(pub struct Gadget for entities::gadget { Id => id: i32 }, validated);
crudchain::resource!(pub struct Thing for entities::thing { Id => id: uuid::Uuid }, uuid);

/// Route library logs to the test output; filter with `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub async fn setup_test_db() -> Result<DatabaseConnection, DbErr> {
    init_tracing();
    let db = Database::connect("sqlite::memory:").await?;

    Migrator::up(&db, None).await?;
    seed(&db).await?;

    Ok(db)
}

/// One user `admin`/`password` and widgets 1 to 3 named "Widget N"
async fn seed(db: &DatabaseConnection) -> Result<(), DbErr> {
    user::ActiveModel {
        id: Set(1),
        name: Set("admin".to_string()),
        password: Set("password".to_string()),
    }
    .insert(db)
    .await?;

    for id in 1..=3 {
        widget::ActiveModel {
            id: Set(id),
            name: Set(format!("Widget {id}")),
        }
        .insert(db)
        .await?;
    }
    Ok(())
}

pub fn test_config() -> ApiConfig {
    ApiConfig::with_jwt_key(JWT_KEY)
}

/// Login is at `/auth`; widgets are public, private widgets need a token
pub fn setup_test_api(db: DatabaseConnection) -> Api {
    let mut api = Api::new(db, test_config()).expect("database is connected");
    api.set_auth(Users, "/auth")
        .and_then(|api| api.add_default_routes::<Widget>(&[]))
        .and_then(|api| {
            api.add_default_routes::<Widget>(&[RouteOptions::new().uri_model_name("other_widgets")])
        })
        .and_then(|api| {
            api.add_default_routes::<PrivateWidget>(&[RouteOptions::new().require_auth(true)])
        })
        .and_then(|api| api.add_default_routes::<Gadget>(&[]))
        .and_then(|api| api.add_default_routes::<Thing>(&[]))
        .expect("routes register");
    api
}

pub async fn setup_test_app() -> (Router, DatabaseConnection) {
    let db = setup_test_db()
        .await
        .expect("Failed to setup test database");
    let app = setup_test_api(db.clone()).into_router();
    (app, db)
}

/// Send one request and decode the JSON response body (`Value::Null` when empty)
pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<&str>,
) -> (StatusCode, Value) {
    send_with_headers(app, method, uri, body, &[]).await
}

pub async fn send_with_headers(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<&str>,
    headers: &[(&str, &str)],
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if body.is_some() {
        builder = builder.header("content-type", "application/json");
    }
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = builder
        .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, json)
}

/// Log in as the seeded admin and return the token
pub async fn login(app: &Router) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/auth",
        Some(r#"{"name": "admin", "password": "password"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "login failed: {body}");
    body["token"]
        .as_str()
        .expect("token in login response")
        .to_string()
}

pub async fn widget_count(db: &DatabaseConnection) -> usize {
    widget::Entity::find().all(db).await.unwrap().len()
}

/// Looks users up by name and password
pub struct Users;

#[async_trait]
impl LoginModel for Users {
    type Id = i32;
    type Principal = user::Model;

    async fn check_login_details(
        &self,
        db: &DatabaseConnection,
        body: &JsonBody,
    ) -> Result<i32, ApiError> {
        let name = body.get("name").and_then(Value::as_str).unwrap_or_default();
        let password = body
            .get("password")
            .and_then(Value::as_str)
            .unwrap_or_default();
        user::Entity::find()
            .filter(user::Column::Name.eq(name))
            .filter(user::Column::Password.eq(password))
            .one(db)
            .await?
            .map(|u| u.id)
            .ok_or_else(|| ApiError::forbidden("Not authenticated"))
    }

    async fn get_by_id(&self, db: &DatabaseConnection, id: i32) -> Result<user::Model, ApiError> {
        user::Entity::find_by_id(id)
            .one(db)
            .await?
            .ok_or_else(|| ApiError::not_found("users", Some(id.to_string())))
    }
}

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(CreateTables)]
    }
}

pub struct CreateTables;

#[async_trait::async_trait]
impl MigrationName for CreateTables {
    fn name(&self) -> &'static str {
        "m20240101_000001_create_tables"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for CreateTables {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let schema = Schema::new(manager.get_database_backend());
        manager
            .create_table(schema.create_table_from_entity(user::Entity))
            .await?;
        manager
            .create_table(schema.create_table_from_entity(widget::Entity))
            .await?;
        manager
            .create_table(schema.create_table_from_entity(private_widget::Entity))
            .await?;
        manager
            .create_table(schema.create_table_from_entity(gadget::Entity))
            .await?;
        manager
            .create_table(schema.create_table_from_entity(thing::Entity))
            .await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for table in ["things", "gadgets", "private_widgets", "widgets", "users"] {
            manager
                .get_connection()
                .execute_unprepared(&format!("DROP TABLE IF EXISTS {table}"))
                .await?;
        }
        Ok(())
    }
}
