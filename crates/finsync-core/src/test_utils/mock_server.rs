//! Mock provider server
//!
//! One axum server answering the Pluggy, BrasilAPI, chat-completion and
//! Notion routes the adapters call. List endpoints serve two items per page
//! regardless of the requested page size so pagination gets exercised.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::sync::oneshot;

use crate::ai::{Categorizer, MockBackend};

/// API key handed out by the mock `/auth`
pub const MOCK_API_KEY: &str = "mock-api-key";

/// Client secret the mock `/auth` rejects
pub const REJECTED_SECRET: &str = "wrong-secret";

const SERVER_PAGE_SIZE: usize = 2;

#[derive(Default)]
struct MockState {
    /// Pluggy records per account id, in wire format
    transactions: HashMap<String, Vec<Value>>,
    failing_accounts: Vec<String>,
    /// BrasilAPI responses per CNPJ
    companies: HashMap<String, Value>,
    /// Notion databases in creation order: (id, parent page, title)
    databases: Vec<(String, String, String)>,
    /// Notion rows per database id, as sent by the client
    rows: HashMap<String, Vec<Value>>,
    chat_prompts: Vec<String>,
}

type Shared = Arc<Mutex<MockState>>;

/// Mock provider APIs for adapter tests
pub struct MockApiServer {
    addr: SocketAddr,
    state: Shared,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockApiServer {
    /// Start the mock server on an available port
    pub async fn start() -> Self {
        let state: Shared = Arc::default();

        let app = Router::new()
            .route("/auth", post(handle_auth))
            .route("/transactions", get(handle_transactions))
            .route("/api/cnpj/v1/:cnpj", get(handle_cnpj))
            .route("/v1/chat/completions", post(handle_chat))
            .route("/v1/blocks/:page_id/children", get(handle_block_children))
            .route("/v1/databases", post(handle_create_database))
            .route("/v1/databases/:id/query", post(handle_query_database))
            .route("/v1/pages", post(handle_create_page))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Get the base URL for this mock server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Serve Pluggy records (see [`pluggy_transaction`]) for an account
    pub fn add_transactions(&self, account_id: &str, records: Vec<Value>) {
        self.state
            .lock()
            .unwrap()
            .transactions
            .entry(account_id.to_string())
            .or_default()
            .extend(records);
    }

    /// Answer 500 for every page of `account_id`
    pub fn fail_account(&self, account_id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_accounts
            .push(account_id.to_string());
    }

    pub fn add_company(&self, cnpj: &str, razao_social: &str, nome_fantasia: &str) {
        self.state.lock().unwrap().companies.insert(
            cnpj.to_string(),
            json!({
                "cnpj": cnpj,
                "razao_social": razao_social,
                "nome_fantasia": nome_fantasia,
                "uf": "SP"
            }),
        );
    }

    /// Titles of the databases created under any page
    pub fn database_titles(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .databases
            .iter()
            .map(|(_, _, title)| title.clone())
            .collect()
    }

    /// Row properties of the database titled `title`
    pub fn rows(&self, title: &str) -> Vec<Value> {
        let state = self.state.lock().unwrap();
        state
            .databases
            .iter()
            .find(|(_, _, t)| t == title)
            .and_then(|(id, _, _)| state.rows.get(id))
            .cloned()
            .unwrap_or_default()
    }

    pub fn chat_prompts(&self) -> Vec<String> {
        self.state.lock().unwrap().chat_prompts.clone()
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockApiServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A Pluggy transaction in wire format
pub fn pluggy_transaction(
    id: &str,
    description: &str,
    amount: f64,
    date: &str,
    payment_method: Option<&str>,
    receiver_document: Option<&str>,
) -> Value {
    let receiver = receiver_document.map(|doc| {
        json!({
            "name": null,
            "documentNumber": { "type": "CNPJ", "value": doc }
        })
    });
    let payment_data = payment_method.map(|method| {
        json!({
            "paymentMethod": method,
            "receiver": receiver
        })
    });
    let direction = if amount < 0.0 { "DEBIT" } else { "CREDIT" };

    json!({
        "id": id,
        "description": description,
        "amount": amount,
        "amountInAccountCurrency": null,
        "date": date,
        "category": null,
        "type": direction,
        "paymentData": payment_data,
        "creditCardMetadata": null
    })
}

fn page_of<T: Clone>(items: &[T], page: usize) -> Vec<T> {
    items
        .iter()
        .skip(page.saturating_sub(1) * SERVER_PAGE_SIZE)
        .take(SERVER_PAGE_SIZE)
        .cloned()
        .collect()
}

fn total_pages(len: usize) -> usize {
    len.div_ceil(SERVER_PAGE_SIZE)
}

/// Cursor pages for Notion: the cursor is the next item offset
fn cursor_page<T: Clone>(items: &[T], cursor: Option<&str>) -> (Vec<T>, Option<String>) {
    let start: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
    let end = (start + SERVER_PAGE_SIZE).min(items.len());
    let page = items.get(start..end).map(<[T]>::to_vec).unwrap_or_default();
    let next = (end < items.len()).then(|| end.to_string());
    (page, next)
}

fn bearer_ok(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("Bearer "))
        && headers.contains_key("notion-version")
}

async fn handle_auth(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    if body["clientSecret"] == REJECTED_SECRET {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "invalid credentials" })),
        );
    }
    (StatusCode::OK, Json(json!({ "apiKey": MOCK_API_KEY })))
}

async fn handle_transactions(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    let authorized = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == MOCK_API_KEY);
    if !authorized {
        return (StatusCode::FORBIDDEN, Json(json!({ "message": "forbidden" })));
    }

    let account_id = params.get("accountId").cloned().unwrap_or_default();
    let page: usize = params.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);

    let state = state.lock().unwrap();
    if state.failing_accounts.contains(&account_id) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "message": "aggregator error" })),
        );
    }

    let records = state
        .transactions
        .get(&account_id)
        .cloned()
        .unwrap_or_default();

    (
        StatusCode::OK,
        Json(json!({
            "total": records.len(),
            "totalPages": total_pages(records.len()),
            "page": page,
            "results": page_of(&records, page),
        })),
    )
}

async fn handle_cnpj(
    State(state): State<Shared>,
    Path(cnpj): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.lock().unwrap().companies.get(&cnpj) {
        Some(company) => (StatusCode::OK, Json(company.clone())),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "message": format!("CNPJ {} não encontrado.", cnpj) })),
        ),
    }
}

/// Chat completions answered by the keyword mock
async fn handle_chat(State(state): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    let prompt = body["messages"][0]["content"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    state.lock().unwrap().chat_prompts.push(prompt.clone());

    let content = MockBackend::new()
        .create_chat_completion(&prompt)
        .await
        .unwrap();

    Json(json!({
        "id": "chatcmpl-mock",
        "object": "chat.completion",
        "model": body["model"],
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }]
    }))
}

async fn handle_block_children(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(page_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    if !bearer_ok(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "code": "unauthorized" })));
    }

    let state = state.lock().unwrap();
    // A non-database block is always present to check filtering
    let mut blocks = vec![json!({
        "object": "block",
        "id": "paragraph-1",
        "type": "paragraph",
        "paragraph": { "rich_text": [] }
    })];
    blocks.extend(
        state
            .databases
            .iter()
            .filter(|(_, parent, _)| *parent == page_id)
            .map(|(id, _, title)| {
                json!({
                    "object": "block",
                    "id": id,
                    "type": "child_database",
                    "child_database": { "title": title },
                    "archived": false,
                    "in_trash": false
                })
            }),
    );

    let (results, next) = cursor_page(&blocks, params.get("start_cursor").map(String::as_str));
    (
        StatusCode::OK,
        Json(json!({
            "object": "list",
            "results": results,
            "has_more": next.is_some(),
            "next_cursor": next,
        })),
    )
}

async fn handle_create_database(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if !bearer_ok(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "code": "unauthorized" })));
    }

    let parent = body["parent"]["page_id"].as_str().unwrap_or_default().to_string();
    let title = body["title"][0]["text"]["content"]
        .as_str()
        .unwrap_or_default()
        .to_string();

    let mut state = state.lock().unwrap();
    let id = format!("db-{}", state.databases.len() + 1);
    state.databases.push((id.clone(), parent, title.clone()));
    state.rows.insert(id.clone(), Vec::new());

    (
        StatusCode::OK,
        Json(json!({
            "object": "database",
            "id": id,
            "title": [{ "type": "text", "text": { "content": title }, "plain_text": title }],
            "properties": body["properties"],
            "archived": false,
            "in_trash": false
        })),
    )
}

async fn handle_query_database(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if !bearer_ok(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "code": "unauthorized" })));
    }

    let state = state.lock().unwrap();
    let Some(rows) = state.rows.get(&id) else {
        return (StatusCode::NOT_FOUND, Json(json!({ "code": "object_not_found" })));
    };

    let pages: Vec<Value> = rows
        .iter()
        .enumerate()
        .map(|(i, props)| {
            json!({
                "object": "page",
                "id": format!("{}-row-{}", id, i + 1),
                "properties": with_plain_text(props.clone()),
            })
        })
        .collect();

    let (results, next) = cursor_page(&pages, body["start_cursor"].as_str());
    (
        StatusCode::OK,
        Json(json!({
            "object": "list",
            "results": results,
            "has_more": next.is_some(),
            "next_cursor": next,
        })),
    )
}

async fn handle_create_page(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if !bearer_ok(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "code": "unauthorized" })));
    }

    let database_id = body["parent"]["database_id"].as_str().unwrap_or_default();
    let mut state = state.lock().unwrap();
    let Some(rows) = state.rows.get_mut(database_id) else {
        return (StatusCode::NOT_FOUND, Json(json!({ "code": "object_not_found" })));
    };
    rows.push(body["properties"].clone());

    (
        StatusCode::OK,
        Json(json!({ "object": "page", "id": format!("page-{}", rows.len()) })),
    )
}

/// Echo rich text the way Notion returns it: `plain_text` next to `text`
fn with_plain_text(value: Value) -> Value {
    match value {
        Value::Object(mut map) => {
            if let Some(content) = map
                .get("text")
                .and_then(|t| t.get("content"))
                .and_then(Value::as_str)
                .map(str::to_string)
            {
                map.insert("plain_text".to_string(), Value::String(content));
            }
            Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, with_plain_text(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(with_plain_text).collect()),
        other => other,
    }
}
