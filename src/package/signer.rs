//! secp256k1 signing and Ethereum-style signer address recovery
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};

use crate::error::{QuorumError, Result};

pub const SIGNATURE_BS: usize = 65;

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&hasher.finalize());
    hash
}

/// Lowercase `0x`-prefixed address of a public key
pub fn address_from_pubkey(public_key: &VerifyingKey) -> String {
    let encoded = public_key.to_encoded_point(false);
    // skip the 0x04 prefix
    let hash = keccak256(&encoded.as_bytes()[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}

/// Normalize an address for comparison
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

/// Recover the signer address from a 65-byte `r‖s‖v` signature over `digest`
pub fn recover_address(digest: &[u8; 32], signature: &[u8]) -> Result<String> {
    if signature.len() != SIGNATURE_BS {
        return Err(QuorumError::Signature(format!(
            "expected {} signature bytes, got {}",
            SIGNATURE_BS,
            signature.len()
        )));
    }
    let recovery_byte = match signature[64] {
        0 | 27 => 0,
        1 | 28 => 1,
        v => {
            return Err(QuorumError::Signature(format!(
                "invalid recovery id: {}",
                v
            )))
        }
    };
    let recovery_id = RecoveryId::from_byte(recovery_byte)
        .ok_or_else(|| QuorumError::Signature("invalid recovery id".to_string()))?;
    let sig = Signature::from_slice(&signature[..64])
        .map_err(|e| QuorumError::Signature(format!("malformed signature: {}", e)))?;

    let recovered = VerifyingKey::recover_from_prehash(digest, &sig, recovery_id)
        .map_err(|e| QuorumError::Signature(format!("recovery failed: {}", e)))?;
    Ok(address_from_pubkey(&recovered))
}

/// A private key able to sign data packages
#[derive(Clone)]
pub struct Wallet {
    signing_key: SigningKey,
    address: String,
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address)
            .finish()
    }
}

impl Wallet {
    pub fn from_private_key_hex(private_key: &str) -> Result<Self> {
        let raw = hex::decode(private_key.trim_start_matches("0x"))
            .map_err(|e| QuorumError::Signature(format!("invalid private key hex: {}", e)))?;
        Self::from_bytes(&raw)
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        let signing_key = SigningKey::from_slice(raw)
            .map_err(|e| QuorumError::Signature(format!("invalid private key: {}", e)))?;
        let address = address_from_pubkey(signing_key.verifying_key());
        Ok(Self {
            signing_key,
            address,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Sign a prehashed digest, returning `r‖s‖v` with `v` in {27, 28}
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<[u8; SIGNATURE_BS]> {
        let (sig, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(digest)
            .map_err(|e| QuorumError::Signature(format!("signing failed: {}", e)))?;
        let mut out = [0u8; SIGNATURE_BS];
        out[..64].copy_from_slice(&sig.to_bytes());
        out[64] = 27 + recovery_id.to_byte();
        Ok(out)
    }
}
