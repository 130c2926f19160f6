//! The HTTP front end: three routes translated into calls against
//! whichever replication backend is running (`chain::ChainReplication`
//! or `solo::NoReplication`).

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::CLIENT_BASE;
use crate::error::{ErrorKind, Result};

/// The three operations the front end dispatches to. Implemented by
/// both replication backends so the same HTTP layer serves either one.
#[async_trait]
pub trait Logic: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn put(&self, key: String, value: String);
    async fn get_all(&self) -> Vec<(String, String)>;
}

/// Serves the HTTP front end for `logic` on `CLIENT_BASE + index`. Never
/// returns under normal operation.
pub async fn serve<L>(logic: Arc<L>, index: u32) -> Result<()>
where
    L: Logic + 'static,
{
    let app = Router::new()
        .route("/", get(handle_index))
        .route("/get", get(handle_get))
        .route("/put", post(handle_put))
        .with_state(logic as Arc<dyn Logic>);

    let port = CLIENT_BASE + index as u16;
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));
    info!(%addr, "serving HTTP front end");

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .map_err(|e| crate::error::Error::wrapped(ErrorKind::Communication, e))
}

async fn handle_index(State(logic): State<Arc<dyn Logic>>) -> Html<String> {
    let entries = logic.get_all().await;

    let mut text = String::from("<html><head>\n<title>MiniKV</title>\n</head><body>\n");
    if entries.is_empty() {
        text.push_str("Found no entries in the database.");
    } else {
        text.push_str("Found the following entries: <br />\n<ul>\n");
        for (key, value) in entries {
            text.push_str(&format!("<li>{}: {}</li>\n", key, value));
        }
        text.push_str("</ul>\n");
    }
    text.push_str("</html>");

    Html(text)
}

#[derive(Deserialize)]
struct GetQuery {
    key: String,
}

#[derive(Serialize)]
struct ValueResponse {
    value: Option<String>,
}

async fn handle_get(
    State(logic): State<Arc<dyn Logic>>,
    Query(query): Query<GetQuery>,
) -> Json<ValueResponse> {
    let value = logic.get(&query.key).await;
    Json(ValueResponse { value })
}

#[derive(Deserialize)]
struct PutQuery {
    key: String,
}

#[derive(Deserialize)]
struct PutBody {
    value: String,
}

async fn handle_put(
    State(logic): State<Arc<dyn Logic>>,
    Query(query): Query<PutQuery>,
    Json(body): Json<PutBody>,
) -> (StatusCode, Json<serde_json::Value>) {
    logic.put(query.key, body.value).await;
    (StatusCode::OK, Json(serde_json::json!({})))
}
