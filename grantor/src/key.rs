use std::{fmt, sync::Arc};

use ring::{
    rand::SystemRandom,
    signature::{RsaKeyPair, RSA_PKCS1_SHA256},
};

use crate::error;

const PKCS8_LABEL: &str = "PRIVATE KEY";
const PKCS1_LABEL: &str = "RSA PRIVATE KEY";

/// An RSA private key used to sign assertions with RS256
///
/// The key is parsed once and shared cheaply between clones.
#[derive(Clone)]
#[must_use]
pub struct SigningKey {
    key_pair: Arc<RsaKeyPair>,
    rng: SystemRandom,
}

impl SigningKey {
    /// Imports an RSA private key from a PEM document
    ///
    /// Both PKCS#8 (`BEGIN PRIVATE KEY`) and PKCS#1 (`BEGIN RSA PRIVATE KEY`)
    /// encodings are accepted. Service-account key files use PKCS#8.
    ///
    /// # Errors
    ///
    /// The document is not valid PEM, uses another label, or does not contain
    /// a usable RSA private key.
    pub fn from_pem(document: &str) -> Result<Self, error::KeyRejected> {
        let block = pem::parse(document).map_err(error::key_rejected)?;
        match block.tag() {
            PKCS8_LABEL => Self::from_pkcs8_der(block.contents()),
            PKCS1_LABEL => Self::from_pkcs1_der(block.contents()),
            other => Err(error::key_rejected(format!(
                "unsupported PEM label '{}'",
                other
            ))),
        }
    }

    /// Imports an RSA private key from a DER-encoded PKCS#8 document
    ///
    /// # Errors
    ///
    /// The document is not a valid PKCS#8 RSA private key.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, error::KeyRejected> {
        let key_pair =
            RsaKeyPair::from_pkcs8(der).map_err(|e| error::key_rejected(e.to_string()))?;
        Ok(Self::from_key_pair(key_pair))
    }

    /// Imports an RSA private key from a DER-encoded PKCS#1 `RSAPrivateKey`
    ///
    /// # Errors
    ///
    /// The document is not a valid RSA private key.
    pub fn from_pkcs1_der(der: &[u8]) -> Result<Self, error::KeyRejected> {
        let key_pair = RsaKeyPair::from_der(der).map_err(|e| error::key_rejected(e.to_string()))?;
        Ok(Self::from_key_pair(key_pair))
    }

    fn from_key_pair(key_pair: RsaKeyPair) -> Self {
        Self {
            key_pair: Arc::new(key_pair),
            rng: SystemRandom::new(),
        }
    }

    /// The public half of the key as a DER-encoded PKCS#1 `RSAPublicKey`
    #[must_use]
    pub fn public_key_der(&self) -> &[u8] {
        self.key_pair.public().as_ref()
    }

    /// The length of signatures produced by this key, in bytes
    #[must_use]
    pub fn signature_len(&self) -> usize {
        self.key_pair.public().modulus_len()
    }

    /// Signs `message` with RSASSA-PKCS1-v1_5 over a SHA-256 digest
    ///
    /// # Errors
    ///
    /// The key is unusable for signing.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, error::SigningError> {
        let mut buf = vec![0; self.signature_len()];
        self.key_pair
            .sign(&RSA_PKCS1_SHA256, &self.rng, message, &mut buf)
            .map_err(|e| error::signing_error(e.to_string()))?;
        Ok(buf)
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("algorithm", &"RS256")
            .field("modulus_bits", &(self.signature_len() * 8))
            .field("private_key", &"<redacted>")
            .finish()
    }
}
