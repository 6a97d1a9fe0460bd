//! Fernet (AES-128-CBC + HMAC-SHA256) credential cipher.
//!
//! Tokens follow the standard Fernet format, so any Fernet implementation holding the
//! same key can read stored credentials.

use crate::domain::DomainError;
use crate::ports::CredentialCipher;
use fernet::Fernet;
use tracing::warn;

/// Value shipped in the sample .env. Treated as "no key configured".
const PLACEHOLDER_KEY: &str = "your-encryption-key-here";

pub struct FernetCipher {
    fernet: Fernet,
    generated: bool,
}

impl FernetCipher {
    /// Fails with `Config` when `key` is not a valid Fernet key.
    pub fn new(key: &str) -> Result<Self, DomainError> {
        let fernet = Fernet::new(key.trim())
            .ok_or_else(|| DomainError::Config("invalid Fernet key".into()))?;
        Ok(Self {
            fernet,
            generated: false,
        })
    }

    /// Uses the configured key, or generates a fresh one when it is missing, the
    /// placeholder, or malformed. A generated key only lives for this process.
    pub fn from_config_key(key: Option<&str>) -> Result<Self, DomainError> {
        let reason = match key.map(str::trim) {
            None | Some("") => "missing",
            Some(PLACEHOLDER_KEY) => "placeholder",
            Some(k) => match Fernet::new(k) {
                Some(fernet) => {
                    return Ok(Self {
                        fernet,
                        generated: false,
                    });
                }
                None => "invalid",
            },
        };
        warn!(
            reason,
            "OAUTH_ENCRYPTION_KEY unusable, generated a temporary key; set a persistent key or stored credentials become unreadable after restart"
        );
        Self::generate()
    }

    pub fn generate() -> Result<Self, DomainError> {
        let fernet = Fernet::new(&Fernet::generate_key())
            .ok_or_else(|| DomainError::Crypto("generated Fernet key rejected".into()))?;
        Ok(Self {
            fernet,
            generated: true,
        })
    }

    /// True when the key was generated rather than configured.
    pub fn is_ephemeral(&self) -> bool {
        self.generated
    }
}

impl CredentialCipher for FernetCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String, DomainError> {
        Ok(self.fernet.encrypt(plaintext.as_bytes()))
    }

    fn decrypt(&self, token: &str) -> Result<String, DomainError> {
        let bytes = self
            .fernet
            .decrypt(token)
            .map_err(|_| DomainError::Crypto("credential token failed to decrypt".into()))?;
        String::from_utf8(bytes).map_err(|e| DomainError::Crypto(e.to_string()))
    }
}
