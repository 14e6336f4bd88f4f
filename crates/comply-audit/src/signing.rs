//! Ed25519 signing for Decision Records.
//!
//! Signatures are rendered as `<algorithm>:<lowercase hex>` so the
//! algorithm can change without ambiguity. Only `ed25519` is accepted today.
//!
//! The private key never implements `Serialize` or prints its bytes.

use std::fs;
use std::path::Path;

use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use comply_core::persist;
use comply_core::{ComplianceError, Result};

/// Algorithm tag prefixed to every signature.
pub const SIGNATURE_ALGORITHM: &str = "ed25519";

/// Key used to sign Decision Records.
pub struct DrSigningKey {
    signing_key: SigningKey,
}

impl DrSigningKey {
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self {
            signing_key: SigningKey::generate(&mut csprng),
        }
    }

    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Parse a 64-character hex seed.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let seed: [u8; 32] = hex_to_array(hex.trim())
            .map_err(|e| ComplianceError::Signing(format!("invalid signing key: {e}")))?;
        Ok(Self::from_seed(&seed))
    }

    /// Read an existing hex seed from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| ComplianceError::persistence(path, e))?;
        Self::from_hex(&contents)
    }

    /// Read the hex seed at `path`, or generate one and store it there.
    ///
    /// An unreadable existing key is an error, never silently replaced:
    /// records signed with it would become unverifiable.
    pub fn load_or_generate(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => Self::from_hex(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let key = Self::generate();
                persist::write_secret_once(path, bytes_to_hex(&key.signing_key.to_bytes()).as_bytes())?;
                tracing::info!(
                    path = %path.display(),
                    public_key = %key.public_key(),
                    "Generated Decision Record signing key"
                );
                Ok(key)
            }
            Err(e) => Err(ComplianceError::persistence(path, e)),
        }
    }

    pub fn public_key(&self) -> DrPublicKey {
        DrPublicKey(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign `message` and render the tagged signature string.
    pub fn sign(&self, message: &[u8]) -> String {
        let signature = self.signing_key.sign(message);
        format!("{SIGNATURE_ALGORITHM}:{}", bytes_to_hex(&signature.to_bytes()))
    }
}

impl std::fmt::Debug for DrSigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DrSigningKey(<private>)")
    }
}

/// Verifying key for Decision Record signatures. Serializes as hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DrPublicKey(pub [u8; 32]);

impl DrPublicKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        bytes_to_hex(&self.0)
    }

    pub fn from_hex(hex: &str) -> Result<Self> {
        hex_to_array(hex.trim())
            .map(Self)
            .map_err(|e| ComplianceError::Signing(format!("invalid public key: {e}")))
    }
}

impl std::fmt::Display for DrPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::fmt::Debug for DrPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DrPublicKey({}...)", &self.to_hex()[..8])
    }
}

impl Serialize for DrPublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for DrPublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Self::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

/// Verify a tagged signature string over `message`.
///
/// Returns `false` for unknown algorithms, malformed encodings, invalid
/// keys and failed verification alike.
pub fn verify_signature(message: &[u8], signature: &str, public_key: &DrPublicKey) -> bool {
    let Some((algorithm, encoded)) = signature.split_once(':') else {
        return false;
    };
    if algorithm != SIGNATURE_ALGORITHM {
        return false;
    }
    let Ok(bytes) = hex_to_array::<64>(encoded) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&public_key.0) else {
        return false;
    };

    let signature = ed25519_dalek::Signature::from_bytes(&bytes);
    verifying_key.verify_strict(message, &signature).is_ok()
}

// ── Hex ──────────────────────────────────────────────────────────

fn bytes_to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_to_array<const N: usize>(hex: &str) -> std::result::Result<[u8; N], String> {
    if hex.len() != N * 2 {
        return Err(format!("expected {} hex chars, got {}", N * 2, hex.len()));
    }
    if !hex.is_ascii() {
        return Err("non-ASCII characters in hex string".to_string());
    }
    let digits = hex.as_bytes();
    let mut out = [0u8; N];
    for (i, byte) in out.iter_mut().enumerate() {
        let hi = hex_digit(digits[i * 2]).ok_or_else(|| format!("invalid hex at position {}", i * 2))?;
        let lo = hex_digit(digits[i * 2 + 1])
            .ok_or_else(|| format!("invalid hex at position {}", i * 2 + 1))?;
        *byte = (hi << 4) | lo;
    }
    Ok(out)
}

/// Lowercase hex only, so every value has exactly one encoding.
fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        _ => None,
    }
}
