//! Secret values read from configuration
//!
//! The webhook HMAC key and the revalidation token are the only secrets this
//! service holds. Both live in a [`SecretString`] which wipes its buffer on drop
//! and never prints its contents through `Debug` or `Display`.
//!
//! Logging of secrets goes through [`describe_secret`], which reveals a short
//! prefix only when debug mode is switched on.

use serde::{Deserialize, Deserializer};
use zeroize::Zeroize;

/// Number of leading characters revealed in debug mode
const DEBUG_PREFIX_LEN: usize = 10;

/// String that is zeroized on drop and redacted when formatted
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value (use with caution)
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Drop for SecretString {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretString([REDACTED {} bytes])", self.0.len())
    }
}

impl std::fmt::Display for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(SecretString::new)
    }
}

/// Mask secret value for logging purposes
pub fn mask_secret(value: &str) -> String {
    if value.is_empty() {
        "[empty]".to_string()
    } else if value.chars().count() <= 8 {
        "*".repeat(value.chars().count())
    } else {
        let chars: Vec<char> = value.chars().collect();
        let head: String = chars[..2].iter().collect();
        let tail: String = chars[chars.len() - 2..].iter().collect();
        format!("{}***{}", head, tail)
    }
}

/// Render a secret for a log line.
///
/// In debug mode the first characters are shown, otherwise the value is masked.
pub fn describe_secret(secret: &SecretString, debug: bool) -> String {
    if secret.is_empty() {
        return "[not set]".to_string();
    }
    if debug {
        let prefix: String = secret.expose().chars().take(DEBUG_PREFIX_LEN).collect();
        format!("{}...", prefix)
    } else {
        mask_secret(secret.expose())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret(""), "[empty]");
        assert_eq!(mask_secret("short"), "*****");
        assert_eq!(mask_secret("verylongsecretkey"), "ve***ey");
        assert_eq!(mask_secret("12345678"), "********");
        assert_eq!(mask_secret("123456789"), "12***89");
    }

    #[test]
    fn test_secret_string_is_redacted() {
        let secret = SecretString::new("super-secret-token");
        assert_eq!(format!("{}", secret), "[REDACTED]");
        assert_eq!(format!("{:?}", secret), "SecretString([REDACTED 18 bytes])");
        assert_eq!(secret.expose(), "super-secret-token");
        assert_eq!(secret.expose().len(), 18);
    }

    #[test]
    fn test_describe_secret_respects_debug_flag() {
        let secret = SecretString::new("abcdefghijklmnop");
        assert_eq!(describe_secret(&secret, true), "abcdefghij...");
        assert_eq!(describe_secret(&secret, false), "ab***op");
        assert_eq!(describe_secret(&SecretString::default(), true), "[not set]");
    }

    #[test]
    fn test_secret_string_deserializes_from_toml() {
        #[derive(Deserialize)]
        struct Holder {
            token: SecretString,
        }

        let holder: Holder = toml::from_str(r#"token = "from-file""#).unwrap();
        assert_eq!(holder.token.expose(), "from-file");
    }
}
