use crate::error::{ControllerError, Result};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRef {
    pub id: String,
}

/// Claims of the credential a job presents to the InfraBox API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobClaims {
    pub job: JobRef,
    #[serde(rename = "type")]
    pub token_type: String,
}

impl JobClaims {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job: JobRef { id: job_id.into() },
            token_type: "job".to_string(),
        }
    }
}

/// Sign a job token with an RS256 key in PEM form
pub fn sign_job_token(job_id: &str, private_key_pem: &[u8]) -> Result<String> {
    let key = EncodingKey::from_rsa_pem(private_key_pem)
        .map_err(|e| ControllerError::token_error(format!("invalid signing key: {}", e)))?;

    jsonwebtoken::encode(&Header::new(Algorithm::RS256), &JobClaims::new(job_id), &key)
        .map_err(|e| ControllerError::token_error(format!("signing failed: {}", e)))
}

/// Mint a token for `job_id`, reading the key from disk on every call
pub async fn mint_job_token(job_id: &str, key_path: &Path) -> Result<String> {
    let pem = tokio::fs::read(key_path).await.map_err(|e| {
        ControllerError::token_error(format!(
            "cannot read signing key {}: {}",
            key_path.display(),
            e
        ))
    })?;

    sign_job_token(job_id, &pem)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use jsonwebtoken::{DecodingKey, Validation};
    use std::collections::HashSet;

    pub(crate) const PRIVATE_KEY: &str = include_str!("testdata/id_rsa");
    pub(crate) const PUBLIC_KEY: &str = include_str!("testdata/id_rsa.pub");

    pub(crate) fn decode(token: &str) -> JobClaims {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = false;
        validation.required_spec_claims = HashSet::new();

        let key = DecodingKey::from_rsa_pem(PUBLIC_KEY.as_bytes()).unwrap();
        jsonwebtoken::decode::<JobClaims>(token, &key, &validation)
            .unwrap()
            .claims
    }

    #[test]
    fn test_token_verifies_with_public_key() {
        let token = sign_job_token("build-1", PRIVATE_KEY.as_bytes()).unwrap();

        let claims = decode(&token);
        assert_eq!(claims.job.id, "build-1");
        assert_eq!(claims.token_type, "job");

        let header = jsonwebtoken::decode_header(&token).unwrap();
        assert_eq!(header.alg, Algorithm::RS256);
    }

    #[test]
    fn test_invalid_key_is_token_error() {
        let err = sign_job_token("build-1", b"not a key").unwrap_err();
        assert!(matches!(err, ControllerError::TokenError { .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_mint_reads_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id_rsa");

        let err = mint_job_token("build-1", &path).await.unwrap_err();
        assert!(matches!(err, ControllerError::TokenError { .. }));

        std::fs::write(&path, PRIVATE_KEY).unwrap();
        let token = mint_job_token("build-1", &path).await.unwrap();
        assert_eq!(decode(&token).job.id, "build-1");
    }
}
