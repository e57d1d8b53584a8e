#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use axum::{extract::State, routing::post, Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use url::Url;

type Respond = dyn Fn(&str, &Value) -> Result<Value, Value> + Send + Sync;

#[derive(Clone)]
struct Stub {
    respond: Arc<Respond>,
    calls: Arc<Mutex<Vec<(String, Value)>>>,
}

/// A JSON-RPC endpoint on a loopback port answering through `respond`.
/// `Err` values are sent back as the response's `error` member.
pub struct RpcStub {
    pub url: Url,
    calls: Arc<Mutex<Vec<(String, Value)>>>,
}

impl RpcStub {
    pub async fn serve(
        respond: impl Fn(&str, &Value) -> Result<Value, Value> + Send + Sync + 'static,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap())
            .parse()
            .unwrap();
        let stub = Stub {
            respond: Arc::new(respond),
            calls: Arc::default(),
        };
        let calls = Arc::clone(&stub.calls);
        let app = Router::new().route("/", post(handle)).with_state(stub);
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        Self { url, calls }
    }

    /// `(method, params)` of every request received so far.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

async fn handle(State(stub): State<Stub>, Json(request): Json<Value>) -> Json<Value> {
    let method = request["method"].as_str().unwrap_or_default().to_string();
    let params = request["params"].clone();
    stub.calls
        .lock()
        .unwrap()
        .push((method.clone(), params.clone()));
    let id = request["id"].clone();
    Json(match (stub.respond)(&method, &params) {
        Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
        Err(error) => json!({ "jsonrpc": "2.0", "id": id, "error": error }),
    })
}

/// An ABI-encoded 32-byte return word.
pub fn word(value: u64) -> Value {
    json!(format!("0x{value:064x}"))
}
