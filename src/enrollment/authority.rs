//! Certificate authority endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{ProofmarkError, Result};

/// Path of the CSR signing endpoint, relative to the authority base URL
pub const SIGN_CSR_PATH: &str = "/api/v1/certificates/sign";

/// Request body for POST {base}/api/v1/certificates/sign
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignCsrRequest {
    pub csr: String,
}

/// Issued certificate chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentResponse {
    /// PEM bundle, leaf first
    pub certificate_chain: String,
    pub certificate_id: String,
}

/// Error response from the authority
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default)]
    pub code: Option<String>,
}

/// Remote authority that turns a CSR into a certificate chain.
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Submit a PEM CSR. Transport failure, non-2xx status and malformed
    /// responses are all [`ProofmarkError::Enrollment`].
    async fn submit_csr(&self, csr_pem: &str) -> Result<EnrollmentResponse>;
}

/// HTTP certificate authority client.
pub struct HttpCertificateAuthority {
    base_url: Option<String>,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl HttpCertificateAuthority {
    pub fn new(base_url: Option<String>, api_key: Option<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, api_key)
    }

    pub fn with_client(
        http: reqwest::Client,
        base_url: Option<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
            api_key,
            http,
        }
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }
}

#[async_trait]
impl CertificateAuthority for HttpCertificateAuthority {
    async fn submit_csr(&self, csr_pem: &str) -> Result<EnrollmentResponse> {
        let base = self.base_url.as_deref().ok_or_else(|| {
            ProofmarkError::Configuration("Certificate authority URL not configured".into())
        })?;
        let url = format!("{base}{SIGN_CSR_PATH}");

        let mut request = self.http.post(&url).json(&SignCsrRequest {
            csr: csr_pem.to_string(),
        });
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        debug!(url = %url, "Submitting certificate signing request");

        let response = request
            .send()
            .await
            .map_err(|e| ProofmarkError::Enrollment(format!("CSR submission failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            if let Ok(err) = serde_json::from_str::<ErrorResponse>(&body) {
                return Err(ProofmarkError::Enrollment(format!(
                    "Authority rejected CSR ({}): {}",
                    status, err.error
                )));
            }
            return Err(ProofmarkError::Enrollment(format!(
                "Authority rejected CSR ({}): {}",
                status, body
            )));
        }

        response
            .json::<EnrollmentResponse>()
            .await
            .map_err(|e| ProofmarkError::Enrollment(format!("Malformed authority response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_url_is_configuration_error() {
        let authority = HttpCertificateAuthority::new(None, None);
        let result = authority.submit_csr("csr").await;
        assert!(matches!(result, Err(ProofmarkError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_unreachable_authority_is_enrollment_error() {
        // Port 9 (discard) on localhost is closed in test environments
        let authority = HttpCertificateAuthority::new(Some("http://127.0.0.1:9/".into()), None);
        let result = authority.submit_csr("csr").await;
        assert!(matches!(result, Err(ProofmarkError::Enrollment(_))));
    }

    #[test]
    fn test_base_url_is_normalised() {
        let authority = HttpCertificateAuthority::new(Some("https://ca.example/".into()), None);
        assert_eq!(authority.base_url(), Some("https://ca.example"));
    }

    #[test]
    fn test_response_parses() {
        let json = r#"{"certificate_chain":"-----BEGIN CERTIFICATE-----","certificate_id":"c-1"}"#;
        let parsed: EnrollmentResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.certificate_id, "c-1");
    }
}
