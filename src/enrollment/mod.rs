//! Certificate enrollment
//!
//! Builds a CSR for a key held in the protected store, exchanges it with a
//! certificate authority and caches the issued chain per alias.

pub mod authority;
pub mod client;
pub mod csr;
pub mod mock;

pub use authority::{CertificateAuthority, EnrollmentResponse, HttpCertificateAuthority};
pub use client::EnrollmentClient;
pub use csr::{build_csr, CertificateSubject};
pub use mock::MockAuthority;
