use std::{collections::BTreeMap, sync::Arc, time::Duration};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};

/// How long `/slow` waits before answering.
pub const SLOW_DELAY: Duration = Duration::from_millis(300);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager_id: Option<u64>,
}

#[derive(Deserialize)]
pub struct CreateUser {
    pub name: String,
    #[serde(default)]
    pub manager_id: Option<u64>,
}

#[derive(Deserialize)]
pub struct UpdateUser {
    pub name: Option<String>,
    pub manager_id: Option<u64>,
}

#[derive(Deserialize)]
pub struct ListParams {
    pub manager_id: Option<u64>,
}

#[derive(Default)]
pub struct Store {
    next_id: u64,
    users: BTreeMap<u64, User>,
}

pub type Db = Arc<RwLock<Store>>;

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(Store::default()));
    Router::new()
        .route("/echo", any(echo))
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/{id}",
            get(get_user)
                .put(update_user)
                .patch(update_user)
                .delete(delete_user),
        )
        .route("/malformed", any(malformed))
        .route("/slow", get(slow))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

fn errors(status: StatusCode, messages: &[&str]) -> Response {
    (status, Json(json!({ "errors": messages }))).into_response()
}

fn not_found() -> Response {
    errors(StatusCode::NOT_FOUND, &["not found"])
}

/// Reflect the request back as JSON.
async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: String) -> Json<Value> {
    let headers: Map<String, Value> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), Value::from(v)))
        })
        .collect();
    let body = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&body).unwrap_or(Value::String(body))
    };
    Json(json!({
        "method": method.as_str(),
        "path": uri.path(),
        "query": uri.query(),
        "headers": headers,
        "body": body,
    }))
}

async fn list_users(State(db): State<Db>, Query(params): Query<ListParams>) -> Json<Vec<User>> {
    let store = db.read().await;
    Json(
        store
            .users
            .values()
            .filter(|u| params.manager_id.is_none() || u.manager_id == params.manager_id)
            .cloned()
            .collect(),
    )
}

async fn create_user(State(db): State<Db>, Json(input): Json<CreateUser>) -> Response {
    if input.name.trim().is_empty() {
        return errors(StatusCode::UNPROCESSABLE_ENTITY, &["name can't be blank"]);
    }
    let mut store = db.write().await;
    store.next_id += 1;
    let user = User {
        id: store.next_id,
        name: input.name,
        manager_id: input.manager_id,
    };
    store.users.insert(user.id, user.clone());
    (StatusCode::OK, Json(user)).into_response()
}

async fn get_user(State(db): State<Db>, Path(id): Path<u64>) -> Response {
    let store = db.read().await;
    match store.users.get(&id) {
        Some(user) => Json(user.clone()).into_response(),
        None => not_found(),
    }
}

async fn update_user(
    State(db): State<Db>,
    Path(id): Path<u64>,
    Json(input): Json<UpdateUser>,
) -> Response {
    if input.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return errors(StatusCode::UNPROCESSABLE_ENTITY, &["name can't be blank"]);
    }
    let mut store = db.write().await;
    let Some(user) = store.users.get_mut(&id) else {
        return not_found();
    };
    if let Some(name) = input.name {
        user.name = name;
    }
    if let Some(manager_id) = input.manager_id {
        user.manager_id = Some(manager_id);
    }
    Json(user.clone()).into_response()
}

async fn delete_user(State(db): State<Db>, Path(id): Path<u64>) -> Response {
    let mut store = db.write().await;
    match store.users.remove(&id) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => not_found(),
    }
}

async fn malformed() -> (StatusCode, &'static str) {
    (StatusCode::UNPROCESSABLE_ENTITY, "ERROR")
}

async fn slow() -> Json<Value> {
    tokio::time::sleep(SLOW_DELAY).await;
    Json(json!({ "slow": true }))
}
