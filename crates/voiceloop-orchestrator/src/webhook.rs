//! Telephony voice webhook — maps an inbound call to an isolated room and
//! answers with dial XML pointing at the SIP ingress.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

/// Form payload posted by the telephony provider on an inbound call.
#[derive(Debug, Deserialize)]
pub struct VoiceWebhookForm {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "From", default)]
    pub from: String,
    #[serde(rename = "To", default)]
    pub to: String,
    #[serde(rename = "Caller", default)]
    pub caller: String,
    #[serde(rename = "AccountSid", default)]
    pub account_sid: String,
}

/// Each call gets its own room, keyed by the provider call id.
pub fn room_for_call(call_sid: &str) -> String {
    format!("call-{call_sid}")
}

/// Caller identity: last four digits of the caller number, falling back to
/// the call id when the number is absent.
pub fn identity_for_caller(from: &str, call_sid: &str) -> String {
    let suffix = if from.is_empty() {
        last4(call_sid)
    } else {
        last4(from).replace('+', "")
    };
    format!("pstn-{suffix}")
}

fn last4(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    chars[chars.len().saturating_sub(4)..].iter().collect()
}

/// Dial XML instructing the provider to bridge the call into the room via
/// the SIP ingress, carrying the join token as a query parameter.
pub fn dial_xml(room: &str, sip_ingress_host: &str, token: &str) -> String {
    let sip_uri = format!("sip:room-{room}@{sip_ingress_host}?token={token}");
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Response>
  <Dial>
    <Sip>{sip_uri}</Sip>
  </Dial>
</Response>"#
    )
}

/// HMAC-SHA256 body-signature check. With no secret configured every request
/// passes; with one, the hex digest of the raw body must match the header.
pub fn verify_webhook_signature(secret: Option<&str>, body: &[u8], header: Option<&str>) -> bool {
    let Some(secret) = secret else {
        return true;
    };
    let Some(header) = header else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());
    expected == header
}
