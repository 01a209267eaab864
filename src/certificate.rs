//! Credentials handed to the secure transport.
//!
//! The DTLS engine authenticates both ends with certificates. For load testing a
//! fresh self-signed ECDSA P-256 certificate per process is enough; the
//! fingerprint is logged so the echo target can be identified.

use std::fmt;

use rcgen::{
    Certificate as RcgenCertificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    PKCS_ECDSA_P256_SHA256,
};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::Error;

/// Certificate and private key used by one transport.
#[derive(Clone)]
pub struct Credentials {
    certificate: Vec<u8>,
    private_key: Vec<u8>,
}

impl Credentials {
    /// Wrap an existing DER certificate and PKCS#8 DER private key.
    pub fn from_der(certificate: Vec<u8>, private_key: Vec<u8>) -> Result<Self, Error> {
        if certificate.is_empty() {
            return Err(Error::Credentials("empty certificate".into()));
        }
        if private_key.is_empty() {
            return Err(Error::Credentials("empty private key".into()));
        }
        Ok(Credentials {
            certificate,
            private_key,
        })
    }

    /// Generate a self-signed certificate valid for one year.
    pub fn self_signed(common_name: &str) -> Result<Self, Error> {
        let key_pair = KeyPair::generate(&PKCS_ECDSA_P256_SHA256)
            .map_err(|e| Error::Credentials(format!("key generation: {}", e)))?;

        let mut params = CertificateParams::new(vec![common_name.to_string()]);

        let mut distinguished_name = DistinguishedName::new();
        distinguished_name.push(DnType::OrganizationName, "dimpl-loadgen".to_string());
        distinguished_name.push(DnType::CommonName, common_name.to_string());
        params.distinguished_name = distinguished_name;
        params.is_ca = IsCa::NoCa;
        params.key_pair = Some(key_pair);

        let not_before = time::OffsetDateTime::now_utc();
        params.not_before = not_before;
        params.not_after = not_before + time::Duration::days(365);

        let cert = RcgenCertificate::from_params(params)
            .map_err(|e| Error::Credentials(format!("certificate params: {}", e)))?;

        let certificate = cert
            .serialize_der()
            .map_err(|e| Error::Credentials(format!("certificate serialization: {}", e)))?;
        let private_key = cert.serialize_private_key_der();

        Credentials::from_der(certificate, private_key)
    }

    /// Certificate in DER format.
    pub fn certificate(&self) -> &[u8] {
        &self.certificate
    }

    /// SHA-256 over the DER certificate.
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&Sha256::digest(&self.certificate));
        out
    }

    /// Fingerprint as colon separated uppercase hex, e.g. "AF:12:F6:...".
    pub fn fingerprint_str(&self) -> String {
        format_fingerprint(&self.fingerprint())
    }

    /// DER certificate and key, as the engine takes them.
    pub(crate) fn to_der_pair(&self) -> (Vec<u8>, Vec<u8>) {
        (self.certificate.clone(), self.private_key.clone())
    }
}

pub fn format_fingerprint(fingerprint: &[u8]) -> String {
    fingerprint
        .iter()
        .map(|byte| format!("{:02X}", byte))
        .collect::<Vec<String>>()
        .join(":")
}

impl Drop for Credentials {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("certificate", &self.certificate.len())
            .field("fingerprint", &self.fingerprint_str())
            .finish()
    }
}
