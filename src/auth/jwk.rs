//! RSA JSON Web Key → RS256 signing and verification keys.
//!
//! The private key is rebuilt from n, e, d, p and q and re-encoded as PKCS#1
//! DER, so keys that omit the CRT parameters load the same way.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{DecodingKey, EncodingKey};
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::{BigUint, RsaPrivateKey};
use serde::{Deserialize, Serialize};

use super::AuthError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    #[serde(default)]
    pub kty: Option<String>,
    #[serde(default)]
    pub kid: Option<String>,
    pub n: String,
    pub e: String,
    pub d: String,
    pub p: String,
    pub q: String,
}

impl Jwk {
    pub fn from_json(raw: &str) -> Result<Self, AuthError> {
        let jwk: Jwk = serde_json::from_str(raw).map_err(|e| AuthError::InvalidKey(e.to_string()))?;
        if let Some(kty) = &jwk.kty {
            if kty != "RSA" {
                return Err(AuthError::InvalidKey(format!("unsupported key type {}", kty)));
            }
        }
        Ok(jwk)
    }
}

/// Signing and verification halves of one RSA key.
#[derive(Clone)]
pub struct KeyPair {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyPair { .. }")
    }
}

impl KeyPair {
    pub fn from_jwk(jwk: &Jwk) -> Result<Self, AuthError> {
        let n = decode_uint("n", &jwk.n)?;
        let e = decode_uint("e", &jwk.e)?;
        let d = decode_uint("d", &jwk.d)?;
        let p = decode_uint("p", &jwk.p)?;
        let q = decode_uint("q", &jwk.q)?;

        let key = RsaPrivateKey::from_components(n, e, d, vec![p, q])
            .map_err(|e| AuthError::InvalidKey(e.to_string()))?;
        key.validate().map_err(|e| AuthError::InvalidKey(e.to_string()))?;
        let der = key.to_pkcs1_der().map_err(|e| AuthError::InvalidKey(e.to_string()))?;

        let encoding = EncodingKey::from_rsa_der(der.as_bytes());
        let decoding = DecodingKey::from_rsa_components(jwk.n.trim_end_matches('='), jwk.e.trim_end_matches('='))
            .map_err(|e| AuthError::InvalidKey(e.to_string()))?;
        Ok(Self { encoding, decoding })
    }
}

fn decode_uint(name: &str, value: &str) -> Result<BigUint, AuthError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|e| AuthError::InvalidKey(format!("{}: {}", name, e)))?;
    if bytes.is_empty() {
        return Err(AuthError::InvalidKey(format!("{} is empty", name)));
    }
    Ok(BigUint::from_bytes_be(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = include_str!("../../tests/fixtures/jwk.json");

    #[test]
    fn loads_the_fixture_key() {
        let jwk = Jwk::from_json(FIXTURE).unwrap();
        let keys = KeyPair::from_jwk(&jwk).unwrap();

        let claims = serde_json::json!({"sub": "fixture", "exp": 4_102_444_800u64});
        let header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256);
        let token = jsonwebtoken::encode(&header, &claims, &keys.encoding).unwrap();
        let validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::RS256);
        let decoded = jsonwebtoken::decode::<serde_json::Value>(&token, &keys.decoding, &validation).unwrap();
        assert_eq!(decoded.claims["sub"], "fixture");
    }

    #[test]
    fn rejects_inconsistent_primes() {
        let mut jwk = Jwk::from_json(FIXTURE).unwrap();
        jwk.q = jwk.p.clone();
        assert!(matches!(KeyPair::from_jwk(&jwk), Err(AuthError::InvalidKey(_))));
    }

    #[test]
    fn rejects_non_rsa_keys() {
        let raw = r#"{"kty":"EC","n":"AQ","e":"AQ","d":"AQ","p":"AQ","q":"AQ"}"#;
        assert!(Jwk::from_json(raw).is_err());
    }
}
