//! Websocket handshake authentication.
//!
//! Browsers cannot set arbitrary headers on a websocket upgrade, so clients
//! may smuggle them through `Sec-WebSocket-Protocol`: the first protocol
//! entry starting with `||` carries a base64 JSON blob `{"headers": {...}}`.
//! The blob uses a header-safe alphabet (`+` → `.`, `/` → `|`, `=` → `-`).
//!
//! After smuggled headers are merged, the upgrade must carry
//! `Authorization: Bearer <jwt>` signed with the configured HS256 secret.

use std::collections::BTreeMap;

use axum::http::header::{AUTHORIZATION, SEC_WEBSOCKET_PROTOCOL};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Marks the protocol entry that carries smuggled headers.
pub const SMUGGLED_PREFIX: &str = "||";

const SMUGGLE_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Why a websocket handshake was refused.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The smuggled header blob could not be decoded.
    #[error("malformed smuggled headers: {0}")]
    MalformedProtocol(String),

    /// No `Authorization` header, even after merging smuggled ones.
    #[error("missing authorization header")]
    MissingAuthorization,

    /// `Authorization` is not `Bearer <token>`.
    #[error("malformed authorization header")]
    MalformedAuthorization,

    /// The token failed verification.
    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
}

/// Verified token claims.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Principal id; keys the connection registry.
    pub sub: String,
    /// Role of the principal.
    pub user_role_id: i64,
    /// Optional expiry, seconds since the epoch. Enforced when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

impl Claims {
    /// Expiry as a timestamp, if the token carries one.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| DateTime::from_timestamp(exp, 0))
    }
}

#[derive(Deserialize)]
struct SmuggledBlob {
    headers: BTreeMap<String, String>,
}

/// Sub-protocol offer split into smuggled headers and real protocols.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ProtocolOffer {
    /// Headers decoded from the first `||` entry, names lower-cased.
    pub smuggled: Vec<(String, String)>,
    /// Every other entry, in offer order.
    pub protocols: Vec<String>,
}

/// Split a `Sec-WebSocket-Protocol` value.
///
/// Only the first `||` entry is decoded; later ones are dropped rather than
/// offered back.
pub fn parse_protocol_offer(value: &str) -> Result<ProtocolOffer, AuthError> {
    let mut offer = ProtocolOffer::default();
    let mut decoded = false;
    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        match entry.strip_prefix(SMUGGLED_PREFIX) {
            Some(blob) if !decoded => {
                offer.smuggled = decode_smuggled(blob)?;
                decoded = true;
            }
            Some(_) => {}
            None => offer.protocols.push(entry.to_owned()),
        }
    }
    Ok(offer)
}

/// Decode one smuggled blob (without its `||` prefix).
pub fn decode_smuggled(blob: &str) -> Result<Vec<(String, String)>, AuthError> {
    let standard: String = blob
        .chars()
        .map(|c| match c {
            '.' => '+',
            '|' => '/',
            '-' => '=',
            other => other,
        })
        .collect();
    let raw = SMUGGLE_ENGINE
        .decode(standard.as_bytes())
        .map_err(|e| AuthError::MalformedProtocol(e.to_string()))?;
    let parsed: SmuggledBlob =
        serde_json::from_slice(&raw).map_err(|e| AuthError::MalformedProtocol(e.to_string()))?;
    Ok(parsed
        .headers
        .into_iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value))
        .collect())
}

/// Merge smuggled headers into `headers`.
///
/// Takes the map by value so a request's headers can only be merged once.
/// Returns the merged map and the remaining protocols to offer back.
pub fn merge_smuggled_headers(
    mut headers: HeaderMap,
) -> Result<(HeaderMap, Vec<String>), AuthError> {
    let Some(value) = headers.get(SEC_WEBSOCKET_PROTOCOL) else {
        return Ok((headers, Vec::new()));
    };
    let value = value
        .to_str()
        .map_err(|e| AuthError::MalformedProtocol(e.to_string()))?;
    let offer = parse_protocol_offer(value)?;

    for (name, value) in offer.smuggled {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| AuthError::MalformedProtocol(e.to_string()))?;
        let value =
            HeaderValue::from_str(&value).map_err(|e| AuthError::MalformedProtocol(e.to_string()))?;
        let _ = headers.append(name, value);
    }
    Ok((headers, offer.protocols))
}

/// Extract the token from `Authorization: Bearer <token>`.
///
/// The header must be exactly two space-separated parts with the scheme
/// spelled `Bearer`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingAuthorization)?
        .to_str()
        .map_err(|_| AuthError::MalformedAuthorization)?;

    let parts: Vec<&str> = value.split(' ').collect();
    match parts.as_slice() {
        ["Bearer", token] => Ok(*token),
        _ => Err(AuthError::MalformedAuthorization),
    }
}

/// HS256 token verifier.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    /// Verifier for tokens signed with `secret`.
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // exp is checked when present but not required
        validation.required_spec_claims.clear();
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Verify the signature and decode the claims.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation)?;
        Ok(data.claims)
    }

    /// Verify the bearer token carried by `headers`.
    pub fn authorize(&self, headers: &HeaderMap) -> Result<Claims, AuthError> {
        self.verify(bearer_token(headers)?)
    }
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier").finish_non_exhaustive()
    }
}

/// Encode headers the way clients smuggle them. Used by tests and tooling.
pub fn encode_smuggled(headers: &[(&str, &str)]) -> String {
    let map: BTreeMap<&str, &str> = headers.iter().copied().collect();
    let json = serde_json::json!({ "headers": map }).to_string();
    let blob: String = base64::engine::general_purpose::STANDARD
        .encode(json)
        .chars()
        .map(|c| match c {
            '+' => '.',
            '/' => '|',
            '=' => '-',
            other => other,
        })
        .collect();
    format!("{SMUGGLED_PREFIX}{blob}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use jsonwebtoken::{EncodingKey, Header};

    fn token(secret: &str, claims: &Claims) -> String {
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn alice() -> Claims {
        Claims {
            sub: "alice".into(),
            user_role_id: 2,
            exp: None,
        }
    }

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            let _ = map.append(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn smuggled_blob_round_trips_through_the_safe_alphabet() {
        let entry = encode_smuggled(&[("Authorization", "Bearer abc"), ("X-Odd", ">>>?")]);
        assert!(entry.starts_with("||"));
        assert!(!entry.contains('+') && !entry.contains('/') && !entry.contains('='));

        let decoded = decode_smuggled(&entry[2..]).unwrap();
        assert_eq!(
            decoded,
            vec![
                ("authorization".to_owned(), "Bearer abc".to_owned()),
                ("x-odd".to_owned(), ">>>?".to_owned()),
            ]
        );
    }

    #[test]
    fn offer_keeps_other_protocols_in_order() {
        let smuggled = encode_smuggled(&[("authorization", "Bearer t")]);
        let offer = parse_protocol_offer(&format!("chat.v1, {smuggled}, audio")).unwrap();
        assert_eq!(offer.protocols, vec!["chat.v1", "audio"]);
        assert_eq!(offer.smuggled.len(), 1);
    }

    #[test]
    fn only_first_smuggled_entry_is_used() {
        let first = encode_smuggled(&[("x-which", "first")]);
        let second = encode_smuggled(&[("x-which", "second")]);
        let offer = parse_protocol_offer(&format!("{first},{second}")).unwrap();
        assert_eq!(offer.smuggled, vec![("x-which".into(), "first".into())]);
        assert!(offer.protocols.is_empty());
    }

    #[test]
    fn garbage_blob_is_rejected() {
        assert_matches!(
            parse_protocol_offer("||not base64!!"),
            Err(AuthError::MalformedProtocol(_))
        );
        // Valid base64, wrong JSON shape
        let blob = base64::engine::general_purpose::STANDARD.encode(r#"{"nope":1}"#);
        assert_matches!(
            parse_protocol_offer(&format!("||{blob}")),
            Err(AuthError::MalformedProtocol(_))
        );
    }

    #[test]
    fn merge_appends_smuggled_headers() {
        let smuggled = encode_smuggled(&[("Authorization", "Bearer t0k")]);
        let map = headers(&[("sec-websocket-protocol", format!("{smuggled}, chat").as_str())]);

        let (merged, protocols) = merge_smuggled_headers(map).unwrap();
        assert_eq!(merged.get(AUTHORIZATION).unwrap(), "Bearer t0k");
        assert_eq!(protocols, vec!["chat"]);
    }

    #[test]
    fn merge_without_protocol_header_is_a_no_op() {
        let map = headers(&[("authorization", "Bearer x")]);
        let (merged, protocols) = merge_smuggled_headers(map).unwrap();
        assert_eq!(merged.len(), 1);
        assert!(protocols.is_empty());
    }

    #[test]
    fn bearer_parsing() {
        assert_eq!(bearer_token(&headers(&[("authorization", "Bearer abc")])).unwrap(), "abc");
        assert_matches!(bearer_token(&HeaderMap::new()), Err(AuthError::MissingAuthorization));
        for bad in ["bearer abc", "Bearer", "Bearer a b", "Basic abc", "Bearer  abc"] {
            assert_matches!(
                bearer_token(&headers(&[("authorization", bad)])),
                Err(AuthError::MalformedAuthorization),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn verifies_signed_token() {
        let verifier = TokenVerifier::new("secret");
        let claims = verifier.verify(&token("secret", &alice())).unwrap();
        assert_eq!(claims, alice());
        assert!(claims.expires_at().is_none());
    }

    #[test]
    fn rejects_wrong_secret() {
        let verifier = TokenVerifier::new("secret");
        assert_matches!(
            verifier.verify(&token("other", &alice())),
            Err(AuthError::InvalidToken(_))
        );
    }

    #[test]
    fn rejects_expired_token() {
        let verifier = TokenVerifier::new("secret");
        let expired = Claims {
            exp: Some(Utc::now().timestamp() - 3_600),
            ..alice()
        };
        assert_matches!(
            verifier.verify(&token("secret", &expired)),
            Err(AuthError::InvalidToken(_))
        );
    }

    #[test]
    fn accepts_unexpired_token() {
        let verifier = TokenVerifier::new("secret");
        let fresh = Claims {
            exp: Some(Utc::now().timestamp() + 3_600),
            ..alice()
        };
        let claims = verifier.verify(&token("secret", &fresh)).unwrap();
        assert!(claims.expires_at().is_some());
    }

    #[test]
    fn authorize_reads_the_header() {
        let verifier = TokenVerifier::new("secret");
        let bearer = format!("Bearer {}", token("secret", &alice()));
        let claims = verifier.authorize(&headers(&[("authorization", bearer.as_str())])).unwrap();
        assert_eq!(claims.sub, "alice");
    }
}
