// Cryptographic signing module
// This file handles transaction signing and scoped access to key material.
// The signing key only exists for the duration of one signing call.
//
// Numan Thabit 2025 Nov

use crate::errors::ExecError;
use crate::types::{SignedPayload, TransactionPayload};
use async_trait::async_trait;
use blake2::{Blake2b512, Digest};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use hex::FromHex;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Wallet/key collaborator: seals a payload so providers can broadcast it.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    async fn sign(&self, payload: TransactionPayload) -> Result<SignedPayload, ExecError>;
}

/// Key material loaded for one signing operation. Zeroized on drop.
struct KeyGuard {
    key: SigningKey,
}

impl KeyGuard {
    fn load(secret_hex: &str) -> Result<Self, ExecError> {
        let sk_bytes = Zeroizing::new(
            <[u8; 32]>::from_hex(secret_hex)
                .map_err(|e| ExecError::Signing(format!("bad hex key: {e}")))?,
        );
        Ok(Self {
            key: SigningKey::from_bytes(&sk_bytes),
        })
    }
}

/// Blake2b-256 digest of the message bytes.
pub fn message_digest(message: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b512::new();
    hasher.update(message);
    let hash_result = hasher.finalize();
    // Take first 32 bytes for 256-bit hash
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&hash_result[..32]);
    digest
}

/// Sign `message` with a hex-encoded Ed25519 key.
/// Returns `(signature, public key)`; wire format is `signature || pubkey || message`.
pub fn sign_message_ed25519(
    message: &[u8],
    secret_hex: &str,
) -> Result<([u8; 64], [u8; 32]), ExecError> {
    let guard = KeyGuard::load(secret_hex)?;
    let vk: VerifyingKey = guard.key.verifying_key();
    let sig = guard.key.sign(&message_digest(message));
    Ok((sig.to_bytes(), vk.to_bytes()))
}

pub struct Ed25519Signer {
    /// Wiped when the signer is dropped
    secret_key_hex: Zeroizing<String>,
    public_key: [u8; 32],
}

impl Ed25519Signer {
    pub fn new(secret_key_hex: impl Into<String>) -> Result<Self, ExecError> {
        let secret_key_hex = Zeroizing::new(secret_key_hex.into());
        let public_key = KeyGuard::load(&secret_key_hex)?.key.verifying_key().to_bytes();
        Ok(Self {
            secret_key_hex,
            public_key,
        })
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key)
    }
}

#[async_trait]
impl TransactionSigner for Ed25519Signer {
    async fn sign(&self, payload: TransactionPayload) -> Result<SignedPayload, ExecError> {
        let message = payload.message_bytes();
        let (sig, pk) = sign_message_ed25519(&message, &self.secret_key_hex)?;

        let mut wire = Vec::with_capacity(64 + 32 + message.len());
        wire.extend_from_slice(&sig);
        wire.extend_from_slice(&pk);
        wire.extend_from_slice(&message);

        Ok(SignedPayload {
            payload: Arc::new(payload),
            signature: hex::encode(sig),
            wire,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, FeeParams};
    use ed25519_dalek::{Signature, Verifier};
    use tokio::time::Instant;
    use uuid::Uuid;

    const KEY: &str = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";

    fn payload() -> TransactionPayload {
        let now = Instant::now();
        TransactionPayload {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            pair: "SOL-USDC".into(),
            direction: Direction::Buy,
            size: 5.5,
            quoted_price: 150.1,
            instructions: b"route".to_vec(),
            recent_blockhash: "blockhash".into(),
            fees: FeeParams {
                priority_fee: 10,
                tip: 20,
            },
            built_at: now,
            expires_at: now,
        }
    }

    #[tokio::test]
    async fn signature_verifies_against_wire_message() {
        let signer = Ed25519Signer::new(KEY).unwrap();
        let p = payload();
        let message = p.message_bytes();
        let signed = signer.sign(p).await.unwrap();

        assert_eq!(&signed.wire[96..], message.as_slice());
        let pk = VerifyingKey::from_bytes(<&[u8; 32]>::try_from(&signed.wire[64..96]).unwrap())
            .unwrap();
        let sig = Signature::from_bytes(<&[u8; 64]>::try_from(&signed.wire[..64]).unwrap());
        pk.verify(&message_digest(&message), &sig).unwrap();
        assert_eq!(signed.signature, hex::encode(&signed.wire[..64]));
        assert_eq!(hex::encode(pk.to_bytes()), signer.public_key_hex());
    }

    #[test]
    fn signer_takes_ownership_of_the_key_string() {
        let owned = KEY.to_string();
        let signer = Ed25519Signer::new(owned).unwrap();
        assert_eq!(
            signer.public_key_hex(),
            "d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a"
        );
        assert_eq!(signer.secret_key_hex.as_str(), KEY);
    }

    #[test]
    fn bad_key_rejected() {
        assert!(matches!(
            Ed25519Signer::new("zz"),
            Err(ExecError::Signing(_))
        ));
    }
}
