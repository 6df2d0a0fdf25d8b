//! CRAM-MD5 (RFC 2195) server side.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};

type HmacMd5 = Hmac<md5::Md5>;

/// A server challenge, `<random.timestamp@hostname>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CramChallenge(String);

impl CramChallenge {
    /// Fresh challenge; random and clock-derived so it is never replayed.
    pub fn generate(hostname: &str) -> Self {
        let random: u64 = rand::random();
        let micros = chrono::Utc::now().timestamp_micros();
        Self(format!("<{random}.{micros}@{hostname}>"))
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Base64 form sent in the `334` continuation.
    pub fn encoded(&self) -> String {
        STANDARD.encode(self.0.as_bytes())
    }
}

/// Lowercase hex HMAC-MD5 of the raw challenge keyed with the secret.
pub fn digest(secret: &[u8], challenge: &CramChallenge) -> Option<String> {
    let mut mac = HmacMd5::new_from_slice(secret).ok()?;
    mac.update(challenge.as_str().as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Check a decoded `username hexdigest` response.
///
/// The digest must be lowercase hex and both parts must match.
pub fn verify(username: &str, secret: &[u8], challenge: &CramChallenge, response: &str) -> bool {
    let Some((user, hex_digest)) = response.trim().rsplit_once(' ') else {
        return false;
    };
    if hex_digest.bytes().any(|b| b.is_ascii_uppercase()) {
        return false;
    }
    let Ok(claimed) = hex::decode(hex_digest) else {
        return false;
    };
    let Ok(mut mac) = HmacMd5::new_from_slice(secret) else {
        return false;
    };
    mac.update(challenge.as_str().as_bytes());
    let digest_ok = mac.verify_slice(&claimed).is_ok();
    let user_ok = super::constant_time_eq(user.as_bytes(), username.as_bytes());
    digest_ok && user_ok
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc2195_example_digest() {
        let challenge = CramChallenge::from_raw("<1896.697170952@postoffice.reston.mci.net>");
        assert_eq!(
            digest(b"tanstaaftanstaaf", &challenge).unwrap(),
            "b913a602c7eda7a495b4e6e7334d3890"
        );
    }

    #[test]
    fn correct_response_verifies() {
        let challenge = CramChallenge::from_raw("<1896.697170952@postoffice.reston.mci.net>");
        assert!(verify(
            "tim",
            b"tanstaaftanstaaf",
            &challenge,
            "tim b913a602c7eda7a495b4e6e7334d3890"
        ));
    }

    #[test]
    fn flipping_any_hex_character_fails() {
        let challenge = CramChallenge::from_raw("<1896.697170952@postoffice.reston.mci.net>");
        let good = "b913a602c7eda7a495b4e6e7334d3890";
        for i in 0..good.len() {
            let mut bytes = good.as_bytes().to_vec();
            bytes[i] = if bytes[i] == b'0' { b'1' } else { b'0' };
            let flipped = String::from_utf8(bytes).unwrap();
            assert!(
                !verify("tim", b"tanstaaftanstaaf", &challenge, &format!("tim {flipped}")),
                "flip at {i} accepted"
            );
        }
    }

    #[test]
    fn wrong_user_or_shape_fails() {
        let challenge = CramChallenge::from_raw("<1.2@host>");
        let d = digest(b"secret", &challenge).unwrap();
        assert!(verify("tim", b"secret", &challenge, &format!("tim {d}")));
        assert!(!verify("tim", b"secret", &challenge, &format!("bob {d}")));
        assert!(!verify("tim", b"secret", &challenge, &d));
        assert!(!verify("tim", b"secret", &challenge, &format!("tim {}", d.to_uppercase())));
        assert!(!verify("tim", b"secret", &challenge, "tim not-hex"));
    }

    #[test]
    fn challenges_are_unique_and_well_formed() {
        let a = CramChallenge::generate("relay.local");
        let b = CramChallenge::generate("relay.local");
        assert_ne!(a, b);
        assert!(a.as_str().starts_with('<'));
        assert!(a.as_str().ends_with("@relay.local>"));
        assert_eq!(STANDARD.decode(a.encoded()).unwrap(), a.as_str().as_bytes());
    }
}
