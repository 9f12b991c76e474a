//! Session URL signing for the probe service

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Sign a session for `user` at Unix second `ut`
///
/// `md5_hex(base64(md5_hex(token)[4..23] + user + ut))`
pub fn signature(token: &str, user: &str, ut: i64) -> String {
    let token_hash = format!("{:x}", md5::compute(token.as_bytes()));
    let encoded = STANDARD.encode(format!("{}{}{}", &token_hash[4..23], user, ut));
    format!("{:x}", md5::compute(encoded.as_bytes()))
}

/// Signed WebSocket URL for one session
pub fn session_url(host: &str, user: &str, token: &str, ut: i64) -> String {
    format!(
        "wss://{}/socket/?ut={}&code={}&user={}",
        host,
        ut,
        signature(token, user, ut),
        user
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_signature(token: &str, user: &str, ut: i64) -> String {
        let hashed = format!("{:x}", md5::compute(token));
        let joined = format!("{}{}{}", &hashed[4..23], user, ut);
        format!("{:x}", md5::compute(STANDARD.encode(joined)))
    }

    #[test]
    fn test_signature_shape() {
        let sig = signature("secret", "ops@example.com", 1_700_000_000);
        assert_eq!(sig.len(), 32);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_signature_matches_recipe() {
        assert_eq!(
            signature("secret", "ops@example.com", 1_700_000_000),
            reference_signature("secret", "ops@example.com", 1_700_000_000)
        );
    }

    #[test]
    fn test_signature_depends_on_every_input() {
        let base = signature("secret", "user", 100);
        assert_ne!(base, signature("secret2", "user", 100));
        assert_ne!(base, signature("secret", "user2", 100));
        assert_ne!(base, signature("secret", "user", 101));
    }

    #[test]
    fn test_token_hash_slice() {
        // md5("") = d41d8cd98f00b204e9800998ecf8427e, characters 4..23
        let hashed = format!("{:x}", md5::compute(""));
        assert_eq!(&hashed[4..23], "8cd98f00b204e980099");
    }

    #[test]
    fn test_session_url() {
        let url = session_url("wsapi.17ce.com:8001", "user", "secret", 42);
        let code = signature("secret", "user", 42);
        assert_eq!(
            url,
            format!("wss://wsapi.17ce.com:8001/socket/?ut=42&code={}&user=user", code)
        );
    }
}
