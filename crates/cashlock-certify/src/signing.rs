//! # Ed25519 Artifact Signing
//!
//! Keys and signatures for certification artifacts.
//!
//! ## Security Invariant
//!
//! - Signing input is `&CanonicalBytes`; raw byte slices cannot be signed.
//! - [`ArtifactSigner`] is not `Serialize` and its `Debug` output never
//!   shows key material.
//! - Public keys and signatures travel as lowercase hex strings.

use ed25519_dalek::{Signer, Verifier};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use cashlock_core::CanonicalBytes;

use crate::error::CertifyError;

/// An Ed25519 public key (32 bytes).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Ed25519PublicKey(pub [u8; 32]);

/// An Ed25519 signature (64 bytes).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Ed25519Signature(pub [u8; 64]);

/// Where the signer's key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    /// Loaded from configuration.
    Configured,
    /// Generated at startup; signatures do not survive a restart.
    Ephemeral,
}

/// Holds the certification signing key.
pub struct ArtifactSigner {
    signing_key: ed25519_dalek::SigningKey,
    source: KeySource,
}

impl Ed25519PublicKey {
    /// Lowercase hex.
    pub fn to_hex(&self) -> String {
        to_hex(&self.0)
    }

    /// Parse 64 hex characters.
    pub fn from_hex(hex: &str) -> Result<Self, CertifyError> {
        let bytes = hex_to_array::<32>(hex).map_err(CertifyError::InvalidKey)?;
        Ok(Self(bytes))
    }

    fn to_verifying_key(&self) -> Result<ed25519_dalek::VerifyingKey, CertifyError> {
        ed25519_dalek::VerifyingKey::from_bytes(&self.0)
            .map_err(|e| CertifyError::InvalidKey(format!("invalid public key: {e}")))
    }
}

impl Ed25519Signature {
    /// Lowercase hex.
    pub fn to_hex(&self) -> String {
        to_hex(&self.0)
    }

    /// Parse 128 hex characters.
    pub fn from_hex(hex: &str) -> Result<Self, CertifyError> {
        let bytes = hex_to_array::<64>(hex).map_err(CertifyError::VerificationFailed)?;
        Ok(Self(bytes))
    }
}

macro_rules! hex_serde {
    ($($ty:ident),*) => {
        $(
            impl Serialize for $ty {
                fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                    serializer.serialize_str(&self.to_hex())
                }
            }

            impl<'de> Deserialize<'de> for $ty {
                fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                    let hex = String::deserialize(deserializer)?;
                    Self::from_hex(&hex).map_err(serde::de::Error::custom)
                }
            }

            impl std::fmt::Debug for $ty {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    write!(f, "{}({}...)", stringify!($ty), &self.to_hex()[..8])
                }
            }

            impl std::fmt::Display for $ty {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    f.write_str(&self.to_hex())
                }
            }
        )*
    };
}

hex_serde!(Ed25519PublicKey, Ed25519Signature);

impl ArtifactSigner {
    /// Fresh random key.
    pub fn ephemeral() -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self {
            signing_key: ed25519_dalek::SigningKey::generate(&mut csprng),
            source: KeySource::Ephemeral,
        }
    }

    /// Key from a 32-byte seed written as 64 hex characters.
    pub fn from_seed_hex(hex: &str) -> Result<Self, CertifyError> {
        let seed = hex_to_array::<32>(hex).map_err(CertifyError::InvalidKey)?;
        Ok(Self {
            signing_key: ed25519_dalek::SigningKey::from_bytes(&seed),
            source: KeySource::Configured,
        })
    }

    /// Configured key when `seed_hex` is present, otherwise an ephemeral
    /// one.
    pub fn from_config(seed_hex: Option<&str>) -> Result<Self, CertifyError> {
        match seed_hex.map(str::trim).filter(|s| !s.is_empty()) {
            Some(hex) => Self::from_seed_hex(hex),
            None => {
                tracing::warn!(
                    "no certification signing key configured; using an ephemeral key"
                );
                Ok(Self::ephemeral())
            }
        }
    }

    /// Where the key came from.
    pub fn source(&self) -> KeySource {
        self.source
    }

    /// Public half.
    pub fn public_key(&self) -> Ed25519PublicKey {
        Ed25519PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign canonical bytes.
    pub fn sign(&self, data: &CanonicalBytes) -> Ed25519Signature {
        Ed25519Signature(self.signing_key.sign(data.as_bytes()).to_bytes())
    }
}

impl std::fmt::Debug for ArtifactSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ArtifactSigner(<private>, {:?})", self.source)
    }
}

/// Verify `signature` over `data` with `public_key`.
pub fn verify(
    data: &CanonicalBytes,
    signature: &Ed25519Signature,
    public_key: &Ed25519PublicKey,
) -> Result<(), CertifyError> {
    let vk = public_key.to_verifying_key()?;
    let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
    vk.verify(data.as_bytes(), &sig)
        .map_err(|e| CertifyError::VerificationFailed(format!("Ed25519 verification failed: {e}")))
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_to_array<const N: usize>(hex: &str) -> Result<[u8; N], String> {
    let hex = hex.trim();
    if !hex.is_ascii() || hex.len() != N * 2 {
        return Err(format!("expected {} hex characters, got {}", N * 2, hex.len()));
    }
    let mut out = [0u8; N];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
            .map_err(|e| format!("invalid hex at position {}: {e}", i * 2))?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: &str = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";

    #[test]
    fn configured_seed_yields_the_rfc8032_public_key() {
        let signer = ArtifactSigner::from_seed_hex(SEED).unwrap();
        assert_eq!(signer.source(), KeySource::Configured);
        assert_eq!(
            signer.public_key().to_hex(),
            "d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a"
        );
    }

    #[test]
    fn sign_and_verify() {
        let signer = ArtifactSigner::ephemeral();
        let data = CanonicalBytes::new(&serde_json::json!({"score": "100.0"})).unwrap();
        let sig = signer.sign(&data);
        verify(&data, &sig, &signer.public_key()).unwrap();

        let other = CanonicalBytes::new(&serde_json::json!({"score": "99.9"})).unwrap();
        assert!(verify(&other, &sig, &signer.public_key()).is_err());
        assert!(verify(&data, &sig, &ArtifactSigner::ephemeral().public_key()).is_err());
    }

    #[test]
    fn hex_serde_round_trips_and_rejects_bad_input() {
        let signer = ArtifactSigner::ephemeral();
        let pk = signer.public_key();
        let json = serde_json::to_string(&pk).unwrap();
        let back: Ed25519PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pk);
        assert!(Ed25519PublicKey::from_hex("abcd").is_err());
        assert!(ArtifactSigner::from_seed_hex(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn missing_config_falls_back_to_ephemeral() {
        assert_eq!(
            ArtifactSigner::from_config(None).unwrap().source(),
            KeySource::Ephemeral
        );
        assert_eq!(
            ArtifactSigner::from_config(Some("  ")).unwrap().source(),
            KeySource::Ephemeral
        );
        assert!(format!("{:?}", ArtifactSigner::ephemeral()).contains("<private>"));
    }
}
