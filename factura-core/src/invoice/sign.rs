use super::canonical::SigningPayload;
use base64ct::{Base64, Encoding};
use chrono::{DateTime, Utc};
use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use k256::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePublicKey, LineEnding};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("Signing error: {0}")]
    SigningError(String),
}

/// Detached signature over a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadSignature {
    signature: String,
    timestamp: DateTime<Utc>,
}

impl PayloadSignature {
    /// Base64 of the DER-encoded ECDSA signature.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn into_parts(self) -> (String, DateTime<Utc>) {
        (self.signature, self.timestamp)
    }
}

/// Holds the issuer's private key and produces invoice signatures.
#[derive(Clone)]
pub struct InvoiceSigner {
    private_key: SigningKey,
}

impl std::fmt::Debug for InvoiceSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvoiceSigner").finish_non_exhaustive()
    }
}

impl InvoiceSigner {
    pub fn from_pem(private_key_pem: &str) -> Result<Self, SigningError> {
        let private_key = SigningKey::from_pkcs8_pem(private_key_pem.trim())
            .map_err(|e| SigningError::SigningError(format!("Private key parse error: {e:?}")))?;
        Ok(Self { private_key })
    }

    pub fn from_der(private_key_der: &[u8]) -> Result<Self, SigningError> {
        let private_key = SigningKey::from_pkcs8_der(private_key_der)
            .map_err(|e| SigningError::SigningError(format!("Private key parse error: {e:?}")))?;
        Ok(Self { private_key })
    }

    pub fn from_signing_key(private_key: SigningKey) -> Self {
        Self { private_key }
    }

    /// Sign the exact bytes given, stamping the current time.
    pub fn sign(&self, payload: &[u8]) -> Result<PayloadSignature, SigningError> {
        let digest = Sha256::digest(payload);
        debug!(digest = %Base64::encode_string(&digest), "signing payload");
        let signature: Signature = self
            .private_key
            .sign_prehash(&digest)
            .map_err(|e| SigningError::SigningError(format!("Failed to sign payload: {e:?}")))?;
        Ok(PayloadSignature {
            signature: Base64::encode_string(signature.to_der().as_bytes()),
            timestamp: Utc::now(),
        })
    }

    pub fn sign_invoice(&self, payload: &SigningPayload) -> Result<PayloadSignature, SigningError> {
        self.sign(&payload.to_bytes())
    }

    /// SubjectPublicKeyInfo PEM for the signing key.
    pub fn public_key_pem(&self) -> Result<String, SigningError> {
        self.private_key
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| SigningError::SigningError(format!("Public key encoding error: {e:?}")))
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        self.private_key.verifying_key()
    }
}

/// Check `signature_b64` over `payload` against a PEM public key.
///
/// Any decoding or verification failure yields `false`.
pub fn verify(payload: &[u8], signature_b64: &str, public_key_pem: &str) -> bool {
    let Ok(key) = VerifyingKey::from_public_key_pem(public_key_pem.trim()) else {
        return false;
    };
    verify_with_key(payload, signature_b64, &key)
}

pub fn verify_with_key(payload: &[u8], signature_b64: &str, key: &VerifyingKey) -> bool {
    let Ok(der) = Base64::decode_vec(signature_b64.trim()) else {
        return false;
    };
    let Ok(signature) = Signature::from_der(&der) else {
        return false;
    };
    let digest = Sha256::digest(payload);
    key.verify_prehash(&digest, &signature).is_ok()
}
