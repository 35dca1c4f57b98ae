//! Local stand-in for a remote signing service

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use p256::ecdsa::signature::Signer as _;
use p256::ecdsa::{Signature, SigningKey};
use p256::pkcs8::DecodePrivateKey;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use super::custom_key_material;

struct ServiceState {
    url: String,
    token: String,
    chain_pem: String,
    key: SigningKey,
    configuration_requests: AtomicU32,
    sign_requests: AtomicU32,
}

pub struct RemoteService {
    pub url: String,
    pub token: String,
    state: Arc<ServiceState>,
}

impl RemoteService {
    pub async fn start(token: &str) -> Self {
        let (chain_pem, key_pem) = custom_key_material();
        let key = SigningKey::from_pkcs8_pem(&key_pem).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let url = format!("http://{addr}");

        let state = Arc::new(ServiceState {
            url: url.clone(),
            token: token.to_string(),
            chain_pem,
            key,
            configuration_requests: AtomicU32::new(0),
            sign_requests: AtomicU32::new(0),
        });

        let app = Router::new()
            .route("/configuration", get(configuration))
            .route("/sign", post(sign))
            .with_state(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url,
            token: token.to_string(),
            state,
        }
    }

    pub fn configuration_url(&self) -> String {
        format!("{}/configuration", self.url)
    }

    pub fn verifying_key(&self) -> p256::ecdsa::VerifyingKey {
        *self.state.key.verifying_key()
    }

    pub fn configuration_requests(&self) -> u32 {
        self.state.configuration_requests.load(Ordering::SeqCst)
    }

    pub fn sign_requests(&self) -> u32 {
        self.state.sign_requests.load(Ordering::SeqCst)
    }
}

fn authorized(state: &ServiceState, headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {}", state.token))
        .unwrap_or(false)
}

async fn configuration(
    State(state): State<Arc<ServiceState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state.configuration_requests.fetch_add(1, Ordering::SeqCst);
    if !authorized(&state, &headers) {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid token" })),
        ));
    }

    Ok(Json(json!({
        "algorithm": "es256",
        "signing_url": format!("{}/sign", state.url),
        "certificate_chain": BASE64.encode(&state.chain_pem),
    })))
}

async fn sign(
    State(state): State<Arc<ServiceState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state.sign_requests.fetch_add(1, Ordering::SeqCst);
    if !authorized(&state, &headers) {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid token" })),
        ));
    }

    let claim = body["claim"]
        .as_str()
        .and_then(|c| BASE64.decode(c).ok())
        .ok_or((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "missing claim" })),
        ))?;
    let signature: Signature = state.key.sign(&claim);

    Ok(Json(json!({
        "signature": BASE64.encode(signature.to_der().as_bytes()),
    })))
}
