//! Proof verification stage.
//!
//! Every verifier runs the structural checks first. The external verifier then
//! asks a prover service to validate each proof against its circuit, all
//! three concurrently.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use shadowbridge_common::{ProofBundle, ProofKind};

use crate::config::VerifierConfig;
use crate::error::VerificationError;

/// Shortest proof payload accepted, including the `0x` prefix.
pub const MIN_PROOF_LEN: usize = 8;

#[async_trait]
pub trait ProofVerifier: Send + Sync {
    /// `Ok(())` when every proof in the bundle is accepted.
    async fn verify(&self, proofs: &ProofBundle) -> Result<(), VerificationError>;
}

/// Checks each proof is a `0x`-prefixed, even-length hex string of at least
/// [`MIN_PROOF_LEN`] characters.
pub fn check_structure(proofs: &ProofBundle) -> Result<(), VerificationError> {
    for kind in ProofKind::ALL {
        let proof = proofs.get(kind);
        if proof.len() < MIN_PROOF_LEN {
            return Err(VerificationError::Malformed(kind));
        }
        let Some(body) = proof.strip_prefix("0x") else {
            return Err(VerificationError::NotHex(kind));
        };
        if body.len() % 2 != 0 || !body.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(VerificationError::NotHex(kind));
        }
    }
    Ok(())
}

/// Structural checks only.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuralVerifier;

#[async_trait]
impl ProofVerifier for StructuralVerifier {
    async fn verify(&self, proofs: &ProofBundle) -> Result<(), VerificationError> {
        check_structure(proofs)
    }
}

#[derive(Debug, Serialize)]
struct VerifyRequest<'a> {
    proof: &'a str,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    valid: bool,
}

/// Structural checks followed by `POST {base}/verify/{circuit}` per proof.
#[derive(Debug, Clone)]
pub struct ExternalVerifier {
    client: reqwest::Client,
    base_url: String,
}

impl ExternalVerifier {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn verify_one(&self, kind: ProofKind, proof: &str) -> Result<(), VerificationError> {
        let url = format!("{}/verify/{}", self.base_url, kind.circuit());
        let unavailable = |reason: String| VerificationError::Unavailable { kind, reason };

        let response = self
            .client
            .post(&url)
            .json(&VerifyRequest { proof })
            .send()
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(unavailable(format!("verifier returned {}", response.status())));
        }

        let body: VerifyResponse = response
            .json()
            .await
            .map_err(|e| unavailable(format!("unreadable verifier response: {e}")))?;

        if body.valid {
            Ok(())
        } else {
            Err(VerificationError::Rejected(kind))
        }
    }
}

#[async_trait]
impl ProofVerifier for ExternalVerifier {
    async fn verify(&self, proofs: &ProofBundle) -> Result<(), VerificationError> {
        check_structure(proofs)?;
        let checks = ProofKind::ALL
            .into_iter()
            .map(|kind| self.verify_one(kind, proofs.get(kind)));
        try_join_all(checks).await?;
        tracing::debug!("proof bundle accepted by verifier");
        Ok(())
    }
}

/// External verifier when a URL is configured, structural checks otherwise.
pub fn from_config(config: &VerifierConfig) -> anyhow::Result<Box<dyn ProofVerifier>> {
    match &config.url {
        Some(url) => {
            tracing::info!(%url, "using external proof verifier");
            Ok(Box::new(ExternalVerifier::new(url.clone(), config.timeout)?))
        }
        None => {
            tracing::info!("no proof verifier configured, using structural checks");
            Ok(Box::new(StructuralVerifier))
        }
    }
}
