//! Mock certificate authority for testing
//!
//! Issues real X.509 certificates from an in-memory CA so chains validate
//! against the enrolled key.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CertificateSigningRequestParams, DnType,
    IsCa, KeyPair,
};

use super::authority::{CertificateAuthority, EnrollmentResponse};
use crate::types::{ProofmarkError, Result};

/// Mock authority with request counting and a rejection switch
pub struct MockAuthority {
    ca_cert: Certificate,
    ca_key: KeyPair,
    requests: AtomicU32,
    reject: AtomicBool,
    delay: Option<Duration>,
}

impl MockAuthority {
    pub fn new() -> Result<Self> {
        let ca_key = KeyPair::generate()
            .map_err(|e| ProofmarkError::Enrollment(format!("Mock CA key failed: {e}")))?;

        let mut params = CertificateParams::default();
        params
            .distinguished_name
            .push(DnType::CommonName, "Proofmark Mock CA");
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);

        let ca_cert = params
            .self_signed(&ca_key)
            .map_err(|e| ProofmarkError::Enrollment(format!("Mock CA certificate failed: {e}")))?;

        Ok(Self {
            ca_cert,
            ca_key,
            requests: AtomicU32::new(0),
            reject: AtomicBool::new(false),
            delay: None,
        })
    }

    /// Hold each request for `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    /// Number of CSRs received, including rejected ones
    pub fn request_count(&self) -> u32 {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn ca_pem(&self) -> String {
        self.ca_cert.pem()
    }
}

#[async_trait]
impl CertificateAuthority for MockAuthority {
    async fn submit_csr(&self, csr_pem: &str) -> Result<EnrollmentResponse> {
        let n = self.requests.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.reject.load(Ordering::SeqCst) {
            return Err(ProofmarkError::Enrollment(
                "Authority rejected CSR (403 Forbidden): mock rejection".into(),
            ));
        }

        let csr = CertificateSigningRequestParams::from_pem(csr_pem)
            .map_err(|e| ProofmarkError::Enrollment(format!("Unparsable CSR: {e}")))?;
        let issued = csr
            .signed_by(&self.ca_cert, &self.ca_key)
            .map_err(|e| ProofmarkError::Enrollment(format!("Mock issuance failed: {e}")))?;

        Ok(EnrollmentResponse {
            certificate_chain: format!("{}{}", issued.pem(), self.ca_cert.pem()),
            certificate_id: format!("mock-{n}"),
        })
    }
}
