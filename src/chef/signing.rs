//! Chef server authentication protocol, version 1.3
//!
//! Every request carries a SHA-256 hash of its body and an RSA PKCS#1 v1.5
//! signature over a canonical description of the request. The base64
//! signature is split across numbered `X-Ops-Authorization-N` headers.

use base64::{engine::general_purpose::STANDARD as b64, Engine};
use openssl::{
    hash::MessageDigest,
    pkey::{PKey, Private},
    sign::Signer,
};
use sha2::{Digest, Sha256};

use crate::{config::ConfigError, errors::TransportError};

pub const SERVER_API_VERSION: &str = "1";
const SIGN_DESCRIPTION: &str = "algorithm=sha256;version=1.3";
const AUTHORIZATION_LINE_WIDTH: usize = 60;

pub struct RequestSigner {
    user_id: String,
    key: PKey<Private>,
}

impl RequestSigner {
    pub fn new(user_id: impl Into<String>, key_pem: &str) -> Result<Self, ConfigError> {
        let key = PKey::private_key_from_pem(key_pem.as_bytes())
            .map_err(|err| ConfigError::InvalidClientKey(err.to_string()))?;

        Ok(Self {
            user_id: user_id.into(),
            key,
        })
    }

    /// Authentication headers for one request. `timestamp` is ISO-8601 UTC.
    pub fn sign(
        &self,
        method: &str,
        path: &str,
        body: &[u8],
        timestamp: &str,
    ) -> Result<Vec<(String, String)>, TransportError> {
        let content_hash = content_hash(body);
        let canonical = canonical_request(method, path, &content_hash, timestamp, &self.user_id);

        let mut signer = Signer::new(MessageDigest::sha256(), &self.key)
            .map_err(|err| TransportError::Signing(err.to_string()))?;
        signer
            .update(canonical.as_bytes())
            .map_err(|err| TransportError::Signing(err.to_string()))?;
        let signature = signer
            .sign_to_vec()
            .map_err(|err| TransportError::Signing(err.to_string()))?;
        let signature_base64 = b64.encode(signature);

        let mut headers = vec![
            ("X-Ops-Sign".to_string(), SIGN_DESCRIPTION.to_string()),
            ("X-Ops-Userid".to_string(), self.user_id.clone()),
            ("X-Ops-Timestamp".to_string(), timestamp.to_string()),
            ("X-Ops-Content-Hash".to_string(), content_hash),
            (
                "X-Ops-Server-API-Version".to_string(),
                SERVER_API_VERSION.to_string(),
            ),
        ];
        headers.extend(
            signature_base64
                .as_bytes()
                .chunks(AUTHORIZATION_LINE_WIDTH)
                .enumerate()
                .map(|(index, chunk)| {
                    (
                        format!("X-Ops-Authorization-{}", index + 1),
                        String::from_utf8_lossy(chunk).into_owned(),
                    )
                }),
        );

        Ok(headers)
    }
}

pub fn content_hash(body: &[u8]) -> String {
    b64.encode(Sha256::digest(body))
}

pub fn canonical_request(
    method: &str,
    path: &str,
    content_hash: &str,
    timestamp: &str,
    user_id: &str,
) -> String {
    format!(
        "Method:{}\nPath:{}\nX-Ops-Content-Hash:{}\nX-Ops-Sign:version=1.3\nX-Ops-Timestamp:{}\nX-Ops-UserId:{}\nX-Ops-Server-API-Version:{}",
        method.to_ascii_uppercase(),
        canonical_path(path),
        content_hash,
        timestamp,
        user_id,
        SERVER_API_VERSION,
    )
}

/// Collapses repeated slashes and drops a trailing one.
pub fn canonical_path(path: &str) -> String {
    let mut canonical = String::with_capacity(path.len());
    for character in path.chars() {
        if character == '/' && canonical.ends_with('/') {
            continue;
        }
        canonical.push(character);
    }

    if canonical.len() > 1 && canonical.ends_with('/') {
        canonical.pop();
    }
    canonical
}

#[cfg(test)]
mod tests {
    use openssl::{rsa::Rsa, sign::Verifier};

    use super::*;

    fn throwaway_key() -> (String, PKey<Private>) {
        let rsa = Rsa::generate(2048).expect("generate rsa key");
        let pem = String::from_utf8(rsa.private_key_to_pem().expect("pem export")).expect("utf8 pem");
        let key = PKey::from_rsa(rsa).expect("pkey");
        (pem, key)
    }

    #[test]
    fn canonical_path_collapses_slashes() {
        assert_eq!(canonical_path("/organizations//prod/nodes/"), "/organizations/prod/nodes");
        assert_eq!(canonical_path("/"), "/");
    }

    #[test]
    fn empty_body_hash_is_sha256_of_nothing() {
        assert_eq!(
            content_hash(b""),
            "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="
        );
    }

    #[test]
    fn canonical_request_layout() {
        let canonical = canonical_request(
            "get",
            "/organizations/prod/nodes/web01",
            "hash",
            "2026-10-16T12:00:00Z",
            "admin",
        );
        assert_eq!(
            canonical,
            "Method:GET\nPath:/organizations/prod/nodes/web01\nX-Ops-Content-Hash:hash\nX-Ops-Sign:version=1.3\nX-Ops-Timestamp:2026-10-16T12:00:00Z\nX-Ops-UserId:admin\nX-Ops-Server-API-Version:1"
        );
    }

    #[test]
    fn signature_headers_verify_against_public_key() {
        let (pem, key) = throwaway_key();
        let signer = RequestSigner::new("admin", &pem).expect("signer");
        let headers = signer
            .sign("GET", "/nodes/web01", b"", "2026-10-16T12:00:00Z")
            .expect("signed");

        let signature: String = headers
            .iter()
            .filter(|(name, _)| name.starts_with("X-Ops-Authorization-"))
            .map(|(_, value)| value.as_str())
            .collect();
        assert!(headers
            .iter()
            .filter(|(name, _)| name.starts_with("X-Ops-Authorization-"))
            .all(|(_, value)| value.len() <= AUTHORIZATION_LINE_WIDTH));

        let canonical = canonical_request(
            "GET",
            "/nodes/web01",
            &content_hash(b""),
            "2026-10-16T12:00:00Z",
            "admin",
        );
        let mut verifier = Verifier::new(MessageDigest::sha256(), &key).expect("verifier");
        verifier.update(canonical.as_bytes()).expect("update");
        let decoded = b64.decode(signature).expect("base64 signature");
        assert!(verifier.verify(&decoded).expect("verify"));
    }

    #[test]
    fn rejects_garbage_key() {
        let err = RequestSigner::new("admin", "not a key")
            .err()
            .expect("garbage key must fail");
        assert!(matches!(err, ConfigError::InvalidClientKey(_)));
    }
}
