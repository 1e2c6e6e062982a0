//! Unsubscribe tokens: `base64(contact_id | md5_hex(email))`.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;

/// Query parameter the host application reads the token from.
pub const UNSUBSCRIBE_PARAM: &str = "ph_unsubscribe";

/// Encode the token for a contact and its email address.
pub fn unsubscribe_token(contact_id: i64, email_address: &str) -> String {
    let digest = md5::compute(email_address.as_bytes());
    URL_SAFE.encode(format!("{contact_id}|{digest:x}"))
}

/// Full link for the footer; `#` when the message has no contact.
pub fn unsubscribe_link(site_url: &str, contact: Option<(i64, &str)>) -> String {
    match contact {
        Some((contact_id, email)) => format!(
            "{}?{}={}",
            site_url.trim_end_matches('/'),
            UNSUBSCRIBE_PARAM,
            unsubscribe_token(contact_id, email)
        ),
        None => "#".to_string(),
    }
}

/// Decode a token back to `(contact_id, email_hash)`.
pub fn decode_unsubscribe_token(token: &str) -> Option<(i64, String)> {
    let raw = URL_SAFE.decode(token).ok()?;
    let text = String::from_utf8(raw).ok()?;
    let (id, hash) = text.split_once('|')?;
    Some((id.parse().ok()?, hash.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_roundtrip() {
        let token = unsubscribe_token(42, "jo@example.com");
        let (id, hash) = decode_unsubscribe_token(&token).unwrap();
        assert_eq!(id, 42);
        assert_eq!(hash, format!("{:x}", md5::compute("jo@example.com")));
        assert_eq!(hash.len(), 32);
    }

    #[test]
    fn link_without_contact_is_placeholder() {
        assert_eq!(unsubscribe_link("https://example.com", None), "#");
    }

    #[test]
    fn link_with_contact() {
        let link = unsubscribe_link("https://example.com/", Some((7, "a@b.com")));
        assert!(link.starts_with("https://example.com?ph_unsubscribe="));
    }

    #[test]
    fn garbage_token_rejected() {
        assert!(decode_unsubscribe_token("!!!").is_none());
    }
}
