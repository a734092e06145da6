//! CA public key pins for node discovery
//!
//! kubeadm pins the cluster CA as `sha256:<hex>` of the certificate's DER
//! encoded SubjectPublicKeyInfo.

use crate::error::ConfigError;
use sha2::{Digest, Sha256};
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::*;

/// Compute the discovery hash of a PEM or DER encoded CA certificate
pub fn ca_cert_hash(certificate: &[u8]) -> Result<String, ConfigError> {
    let der = if certificate.trim_ascii_start().starts_with(b"-----BEGIN") {
        let (_, pem) = parse_x509_pem(certificate)
            .map_err(|e| ConfigError::InvalidCertificate(format!("unable to decode PEM: {}", e)))?;
        pem.contents
    } else {
        certificate.to_vec()
    };

    let (_, cert) = X509Certificate::from_der(&der)
        .map_err(|e| ConfigError::InvalidCertificate(format!("unable to parse certificate: {}", e)))?;

    let digest = Sha256::digest(cert.tbs_certificate.subject_pki.raw);
    Ok(format!("sha256:{}", hex::encode(digest)))
}
