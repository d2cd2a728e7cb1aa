//! Signed room-join grants (HS256 JWT).

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use voiceloop_core::error::{Result, VoiceloopError};

/// Media-room permissions embedded in the grant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoomGrant {
    pub room_join: bool,
    pub room: String,
    pub can_publish: bool,
    pub can_subscribe: bool,
    pub can_publish_data: bool,
}

/// JWT claim set for a room-join token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub sub: String,
    pub nbf: i64,
    pub exp: i64,
    pub video: RoomGrant,
    pub metadata: String,
}

/// Issues and verifies HS256-signed room-join tokens, keyed by the media
/// server API key/secret pair.
pub struct TokenIssuer {
    api_key: String,
    api_secret: String,
    default_ttl_secs: u64,
}

impl TokenIssuer {
    pub fn new(api_key: String, api_secret: String, default_ttl_secs: u64) -> Self {
        Self {
            api_key,
            api_secret,
            default_ttl_secs,
        }
    }

    /// Build a signed token for `(room, identity)` with the given
    /// capabilities. `ttl_seconds` falls back to the configured default.
    pub fn issue(
        &self,
        room: &str,
        identity: &str,
        can_publish: bool,
        can_subscribe: bool,
        metadata: Option<&str>,
        ttl_seconds: Option<u64>,
    ) -> Result<String> {
        let now = Utc::now().timestamp();
        let ttl = ttl_seconds.unwrap_or(self.default_ttl_secs);
        let claims = Claims {
            iss: self.api_key.clone(),
            sub: identity.to_string(),
            nbf: now - 1,
            exp: now + ttl as i64,
            video: RoomGrant {
                room_join: true,
                room: room.to_string(),
                can_publish,
                can_subscribe,
                can_publish_data: true,
            },
            metadata: metadata.unwrap_or_default().to_string(),
        };
        self.encode(&claims)
    }

    pub fn default_ttl_secs(&self) -> u64 {
        self.default_ttl_secs
    }

    fn encode(&self, claims: &Claims) -> Result<String> {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
        let signing_input = format!("{header}.{payload}");
        let signature = URL_SAFE_NO_PAD.encode(self.sign(signing_input.as_bytes())?);
        Ok(format!("{signing_input}.{signature}"))
    }

    /// Verify signature and decode claims. Used by tests and diagnostics;
    /// expiry is not checked here.
    pub fn decode(&self, token: &str) -> Result<Claims> {
        let mut parts = token.split('.');
        let (Some(header), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(VoiceloopError::Token("malformed token".into()));
        };

        let signing_input = format!("{header}.{payload}");
        let expected = URL_SAFE_NO_PAD.encode(self.sign(signing_input.as_bytes())?);
        if expected != signature {
            return Err(VoiceloopError::Token("signature mismatch".into()));
        }

        let payload_bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|e| VoiceloopError::Token(format!("bad payload encoding: {e}")))?;
        Ok(serde_json::from_slice(&payload_bytes)?)
    }

    fn sign(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| VoiceloopError::Token(e.to_string()))?;
        mac.update(input);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> TokenIssuer {
        TokenIssuer::new("api-key".into(), "api-secret".into(), 60)
    }

    #[test]
    fn test_token_shape_and_claims() {
        let token = issuer()
            .issue("call-123", "pstn-4567", true, true, None, None)
            .unwrap();
        assert_eq!(token.split('.').count(), 3);

        let claims = issuer().decode(&token).unwrap();
        assert_eq!(claims.iss, "api-key");
        assert_eq!(claims.sub, "pstn-4567");
        assert_eq!(claims.video.room, "call-123");
        assert!(claims.video.room_join);
        assert!(claims.video.can_publish_data);
        assert_eq!(claims.exp - claims.nbf, 61); // ttl + nbf skew
    }

    #[test]
    fn test_custom_ttl() {
        let token = issuer()
            .issue("r", "i", true, false, Some("meta"), Some(300))
            .unwrap();
        let claims = issuer().decode(&token).unwrap();
        assert_eq!(claims.exp - claims.nbf, 301);
        assert_eq!(claims.metadata, "meta");
        assert!(!claims.video.can_subscribe);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = issuer().issue("r", "i", true, true, None, None).unwrap();
        let other = TokenIssuer::new("api-key".into(), "other-secret".into(), 60);
        assert!(other.decode(&token).is_err());
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let token = issuer().issue("r", "i", true, true, None, None).unwrap();
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(r#"{"iss":"x"}"#);
        parts[1] = &forged;
        let tampered = parts.join(".");
        assert!(issuer().decode(&tampered).is_err());
    }

    #[test]
    fn test_grant_serializes_camel_case() {
        let grant = RoomGrant {
            room_join: true,
            room: "r".into(),
            can_publish: true,
            can_subscribe: true,
            can_publish_data: true,
        };
        let json = serde_json::to_value(&grant).unwrap();
        assert!(json.get("roomJoin").is_some());
        assert!(json.get("canPublish").is_some());
    }
}
