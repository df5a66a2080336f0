use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use aes_gcm::aead::rand_core::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};
use crate::error::{AppError, Result};

/// The size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// The size of the AES-GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// A secure key wrapper that ensures the key is zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecureKey([u8; KEY_SIZE]);

impl SecureKey {
    /// Builds a key from raw bytes, rejecting anything that is not exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| AppError::Encryption("Invalid master key size".to_string()))?;
        Ok(Self(key))
    }

    fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

/// A portal secret sealed with AES-256-GCM, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedSecret {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_SIZE],
}

/// Encrypts and decrypts stored portal secrets under the master key.
#[derive(Clone)]
pub struct SecretCipher {
    key: SecureKey,
}

impl SecretCipher {
    pub fn new(key: SecureKey) -> Self {
        Self { key }
    }

    /// Seals a secret with a fresh random nonce.
    pub fn seal(&self, secret: &str) -> Result<SealedSecret> {
        let cipher = Aes256Gcm::new(self.key.as_bytes().into());

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from(nonce_bytes);

        let ciphertext = cipher
            .encrypt(&nonce, secret.as_bytes())
            .map_err(|e| AppError::Encryption(format!("Encryption failed: {}", e)))?;

        Ok(SealedSecret {
            ciphertext,
            nonce: nonce_bytes,
        })
    }

    /// Opens a sealed secret. Fails if the key is wrong or the ciphertext was tampered with.
    pub fn open(&self, sealed: &SealedSecret) -> Result<Zeroizing<String>> {
        let cipher = Aes256Gcm::new(self.key.as_bytes().into());
        let nonce = Nonce::from(sealed.nonce);

        let plaintext = Zeroizing::new(
            cipher
                .decrypt(&nonce, sealed.ciphertext.as_slice())
                .map_err(|e| AppError::Encryption(format!("Decryption failed: {}", e)))?,
        );

        let secret = std::str::from_utf8(&plaintext)
            .map_err(|_| AppError::Encryption("Stored secret is not valid UTF-8".to_string()))?;

        Ok(Zeroizing::new(secret.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher(byte: u8) -> SecretCipher {
        SecretCipher::new(SecureKey::from_slice(&[byte; KEY_SIZE]).unwrap())
    }

    #[test]
    fn sealed_secret_opens_with_the_same_key() {
        let cipher = cipher(7);
        let sealed = cipher.seal("hunter2").unwrap();

        assert_ne!(sealed.ciphertext, b"hunter2".to_vec());
        assert_eq!(cipher.open(&sealed).unwrap().as_str(), "hunter2");
    }

    #[test]
    fn wrong_key_is_rejected() {
        let sealed = cipher(1).seal("hunter2").unwrap();
        assert!(matches!(cipher(2).open(&sealed), Err(AppError::Encryption(_))));
    }

    #[test]
    fn nonces_are_not_reused() {
        let cipher = cipher(3);
        let a = cipher.seal("same").unwrap();
        let b = cipher.seal("same").unwrap();
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn short_master_key_is_rejected() {
        assert!(SecureKey::from_slice(&[0u8; 16]).is_err());
    }
}
