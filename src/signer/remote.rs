//! Remote signing service client.
//!
//! The service publishes its configuration at a URL:
//!
//! ```json
//! {
//!   "algorithm": "es256",
//!   "timestamp_url": "http://timestamp.example",
//!   "signing_url": "https://signer.example/api/v1/sign",
//!   "certificate_chain": "<base64 PEM bundle>"
//! }
//! ```
//!
//! Signing POSTs `{"claim": "<base64>"}` to `signing_url` and expects
//! `{"signature": "<base64>"}` back. Both requests carry the bearer token.

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use zeroize::Zeroizing;

use super::SigningAlgorithm;
use crate::types::{CertificateChain, ProofmarkError, Result};

/// Configuration document served by the remote signing service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSignerConfiguration {
    pub algorithm: SigningAlgorithm,
    #[serde(default)]
    pub timestamp_url: Option<String>,
    pub signing_url: String,
    /// Base64-encoded PEM bundle, leaf first
    pub certificate_chain: String,
}

#[derive(Debug, Serialize)]
struct SignClaimRequest<'a> {
    claim: &'a str,
}

#[derive(Debug, Deserialize)]
struct SignClaimResponse {
    signature: String,
}

/// Error response from the signing service
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

/// Signer that defers key custody entirely to a remote service.
pub struct RemoteSigner {
    http: reqwest::Client,
    configuration_url: String,
    signing_url: String,
    token: Option<Zeroizing<String>>,
    algorithm: SigningAlgorithm,
    chain: CertificateChain,
    timestamp_url: Option<String>,
}

impl RemoteSigner {
    /// Fetch the service configuration and build a signer from it.
    pub async fn connect(
        http: reqwest::Client,
        configuration_url: &str,
        token: Option<String>,
    ) -> Result<Self> {
        let token = token.map(Zeroizing::new);

        let mut request = http.get(configuration_url);
        if let Some(token) = &token {
            request = request.header("Authorization", format!("Bearer {}", token.as_str()));
        }

        let response = request.send().await.map_err(|e| {
            ProofmarkError::Remote(format!("Configuration request failed: {}", e))
        })?;
        let response = check_status(response, "Configuration request").await?;

        let configuration = response
            .json::<RemoteSignerConfiguration>()
            .await
            .map_err(|e| ProofmarkError::Remote(format!("Malformed signer configuration: {}", e)))?;

        let signer = Self::from_configuration(http, configuration_url, token, configuration)?;
        info!(
            url = %configuration_url,
            algorithm = %signer.algorithm,
            certificates = signer.chain.len(),
            "Connected to remote signing service"
        );
        Ok(signer)
    }

    fn from_configuration(
        http: reqwest::Client,
        configuration_url: &str,
        token: Option<Zeroizing<String>>,
        configuration: RemoteSignerConfiguration,
    ) -> Result<Self> {
        let pem = BASE64
            .decode(configuration.certificate_chain.trim())
            .map_err(|e| ProofmarkError::Remote(format!("Invalid certificate encoding: {}", e)))?;
        let pem = String::from_utf8(pem)
            .map_err(|_| ProofmarkError::Remote("Certificate chain is not UTF-8 PEM".into()))?;
        let chain = CertificateChain::from_pem(&pem)
            .map_err(|e| ProofmarkError::Remote(format!("Invalid certificate chain: {}", e)))?;

        Ok(Self {
            http,
            configuration_url: configuration_url.to_string(),
            signing_url: configuration.signing_url,
            token,
            algorithm: configuration.algorithm,
            chain,
            timestamp_url: configuration.timestamp_url,
        })
    }

    pub fn configuration_url(&self) -> &str {
        &self.configuration_url
    }

    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    pub fn certificate_chain(&self) -> &CertificateChain {
        &self.chain
    }

    pub fn timestamp_url(&self) -> Option<&str> {
        self.timestamp_url.as_deref()
    }

    pub async fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        let claim = BASE64.encode(data);
        let mut request = self
            .http
            .post(&self.signing_url)
            .json(&SignClaimRequest { claim: &claim });
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {}", token.as_str()));
        }

        debug!(url = %self.signing_url, bytes = data.len(), "Requesting remote signature");

        let response = request
            .send()
            .await
            .map_err(|e| ProofmarkError::Remote(format!("Sign request failed: {}", e)))?;
        let response = check_status(response, "Sign request").await?;

        let body = response
            .json::<SignClaimResponse>()
            .await
            .map_err(|e| ProofmarkError::Remote(format!("Malformed sign response: {}", e)))?;

        BASE64
            .decode(body.signature)
            .map_err(|e| ProofmarkError::Remote(format!("Invalid signature encoding: {}", e)))
    }
}

async fn check_status(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());

    if let Ok(err) = serde_json::from_str::<ErrorResponse>(&body) {
        return Err(ProofmarkError::Remote(format!(
            "{} failed ({}): {}",
            what, status, err.error
        )));
    }
    Err(ProofmarkError::Remote(format!(
        "{} failed ({}): {}",
        what, status, body
    )))
}

impl fmt::Debug for RemoteSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSigner")
            .field("configuration_url", &self.configuration_url)
            .field("signing_url", &self.signing_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("algorithm", &self.algorithm)
            .field("certificates", &self.chain.len())
            .finish()
    }
}
