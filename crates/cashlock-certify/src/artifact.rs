//! # Certification Artifacts
//!
//! A report exported for downstream reporting: the report and signing time
//! are canonicalized (JCS), hashed with SHA-256 and signed with Ed25519.
//! Anyone holding the artifact can check it without access to this
//! service.

use serde::{Deserialize, Serialize};

use cashlock_core::{sha256_digest, CanonicalBytes, ContentDigest, Timestamp};

use crate::error::CertifyError;
use crate::report::CertificationReport;
use crate::signing::{verify, ArtifactSigner, Ed25519PublicKey, Ed25519Signature, KeySource};

/// Artifact layout version.
pub const ARTIFACT_FORMAT: &str = "certification-artifact/v1";

#[derive(Serialize)]
struct SignedPayload<'a> {
    format: &'a str,
    report: &'a CertificationReport,
    signed_at: &'a Timestamp,
}

/// A signed certification report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificationArtifact {
    /// Layout version.
    pub format: String,
    /// The report as certified (or not) at signing time.
    pub report: CertificationReport,
    /// Signing time.
    pub signed_at: Timestamp,
    /// SHA-256 over the canonical payload.
    pub digest: ContentDigest,
    /// Ed25519 signature over the canonical payload.
    pub signature: Ed25519Signature,
    /// Verifying key.
    pub public_key: Ed25519PublicKey,
    /// Whether the key was configured or ephemeral.
    pub key_source: KeySource,
}

impl CertificationArtifact {
    fn payload(&self) -> Result<CanonicalBytes, CertifyError> {
        Ok(CanonicalBytes::new(&SignedPayload {
            format: &self.format,
            report: &self.report,
            signed_at: &self.signed_at,
        })?)
    }

    /// The artifact itself as canonical JSON bytes.
    pub fn to_canonical_json(&self) -> Result<Vec<u8>, CertifyError> {
        Ok(CanonicalBytes::new(self)?.as_bytes().to_vec())
    }
}

/// Sign `report`.
pub fn export_artifact(
    report: &CertificationReport,
    signer: &ArtifactSigner,
    now: Timestamp,
) -> Result<CertificationArtifact, CertifyError> {
    let payload = CanonicalBytes::new(&SignedPayload {
        format: ARTIFACT_FORMAT,
        report,
        signed_at: &now,
    })?;
    let artifact = CertificationArtifact {
        format: ARTIFACT_FORMAT.to_string(),
        report: report.clone(),
        signed_at: now,
        digest: sha256_digest(&payload),
        signature: signer.sign(&payload),
        public_key: signer.public_key(),
        key_source: signer.source(),
    };
    tracing::info!(
        report_id = %report.report_id,
        digest = %artifact.digest,
        key_source = ?artifact.key_source,
        "certification artifact signed"
    );
    Ok(artifact)
}

/// Recompute the digest and check the signature.
pub fn verify_artifact(artifact: &CertificationArtifact) -> Result<(), CertifyError> {
    let payload = artifact.payload()?;
    let digest = sha256_digest(&payload);
    if digest != artifact.digest {
        return Err(CertifyError::VerificationFailed(format!(
            "digest mismatch: recorded {}, computed {digest}",
            artifact.digest
        )));
    }
    verify(&payload, &artifact.signature, &artifact.public_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::compare;
    use crate::config::CertificationSettings;
    use crate::test_support::*;
    use rust_decimal::Decimal;

    fn report() -> CertificationReport {
        compare(&loaded(), &export(Vec::new()), &CertificationSettings::default(), now())
    }

    #[test]
    fn exported_artifact_verifies() {
        let signer = ArtifactSigner::ephemeral();
        let artifact = export_artifact(&report(), &signer, now()).unwrap();
        assert_eq!(artifact.format, ARTIFACT_FORMAT);
        assert_eq!(artifact.key_source, KeySource::Ephemeral);
        verify_artifact(&artifact).unwrap();

        let bytes = artifact.to_canonical_json().unwrap();
        let back: CertificationArtifact = serde_json::from_slice(&bytes).unwrap();
        verify_artifact(&back).unwrap();
    }

    #[test]
    fn tampered_report_fails_verification() {
        let signer = ArtifactSigner::ephemeral();
        let mut artifact = export_artifact(&report(), &signer, now()).unwrap();
        artifact.report.score = Decimal::ONE_HUNDRED;
        artifact.report.external_system = "Forged".into();
        let err = verify_artifact(&artifact).unwrap_err();
        assert!(matches!(err, CertifyError::VerificationFailed(_)));
    }

    #[test]
    fn recomputed_digest_still_needs_the_signature() {
        let signer = ArtifactSigner::ephemeral();
        let mut artifact = export_artifact(&report(), &signer, now()).unwrap();
        artifact.report.external_system = "Forged".into();
        artifact.digest = sha256_digest(&artifact.payload().unwrap());
        assert!(verify_artifact(&artifact).is_err());
    }
}
