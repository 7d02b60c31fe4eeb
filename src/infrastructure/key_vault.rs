//! AEAD storage for venue credentials.
//!
//! One process-wide AES-256-GCM key, either taken directly from a 32-byte
//! hex `ENCRYPTION_KEY` or derived with scrypt from a password and salt.
//! Access and secret keys are encrypted separately, each under a fresh
//! 12-byte IV; the stored row carries the two ciphers plus combined
//! `"ivA:ivS"` / `"tagA:tagS"` columns. Decryption failures surface as a
//! missing key, never as cryptographic detail.

use crate::domain::errors::PlatformError;
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use rand::RngCore;
use scrypt::Params;
use zeroize::Zeroizing;

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// One encrypted value: cipher, IV and authentication tag, all hex.
#[derive(Debug, Clone)]
pub struct EncryptedSecret {
    pub cipher_hex: String,
    pub iv_hex: String,
    pub tag_hex: String,
}

/// Credential pair as persisted: separate ciphers, combined iv/tag columns.
#[derive(Debug, Clone)]
pub struct SealedKeyPair {
    pub access_cipher: String,
    pub secret_cipher: String,
    pub iv: String,
    pub tag: String,
}

#[derive(Debug, Clone)]
pub struct MaskedKeys {
    pub access_key: String,
    pub secret_key: String,
}

pub struct KeyVault {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for KeyVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyVault").finish_non_exhaustive()
    }
}

impl KeyVault {
    /// Build from a 32-byte hex key (the `ENCRYPTION_KEY` environment
    /// variable). Fatal at boot when malformed.
    pub fn from_key_hex(key_hex: &str) -> Result<Self, PlatformError> {
        let bytes = hex::decode(key_hex).map_err(|_| PlatformError::Cryptographic)?;
        if bytes.len() != KEY_LEN {
            return Err(PlatformError::Cryptographic);
        }
        let key = Zeroizing::new(bytes);
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| PlatformError::Cryptographic)?;
        Ok(Self { cipher })
    }

    /// Derive the process key with scrypt from a configured password + salt.
    pub fn from_password(password: &str, salt: &str) -> Result<Self, PlatformError> {
        let params = Params::new(14, 8, 1, KEY_LEN).map_err(|_| PlatformError::Cryptographic)?;
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        scrypt::scrypt(password.as_bytes(), salt.as_bytes(), &params, &mut *key)
            .map_err(|_| PlatformError::Cryptographic)?;
        let cipher =
            Aes256Gcm::new_from_slice(key.as_ref()).map_err(|_| PlatformError::Cryptographic)?;
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedSecret, PlatformError> {
        let mut iv = [0u8; IV_LEN];
        rand::rngs::OsRng.fill_bytes(&mut iv);
        let nonce = Nonce::from_slice(&iv);
        let sealed = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| PlatformError::Cryptographic)?;

        // aes-gcm appends the 16-byte tag to the ciphertext.
        let (cipher_bytes, tag) = sealed.split_at(sealed.len() - TAG_LEN);
        Ok(EncryptedSecret {
            cipher_hex: hex::encode(cipher_bytes),
            iv_hex: hex::encode(iv),
            tag_hex: hex::encode(tag),
        })
    }

    pub fn decrypt(&self, secret: &EncryptedSecret) -> Result<Zeroizing<String>, PlatformError> {
        let iv = hex::decode(&secret.iv_hex).map_err(|_| Self::missing_key())?;
        if iv.len() != IV_LEN {
            return Err(Self::missing_key());
        }
        let mut sealed = hex::decode(&secret.cipher_hex).map_err(|_| Self::missing_key())?;
        let tag = hex::decode(&secret.tag_hex).map_err(|_| Self::missing_key())?;
        sealed.extend_from_slice(&tag);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&iv), sealed.as_ref())
            .map_err(|_| Self::missing_key())?;
        String::from_utf8(plaintext)
            .map(Zeroizing::new)
            .map_err(|_| Self::missing_key())
    }

    /// Seal a credential pair into its storage shape.
    pub fn seal_pair(&self, access_key: &str, secret_key: &str) -> Result<SealedKeyPair, PlatformError> {
        let access = self.encrypt(access_key)?;
        let secret = self.encrypt(secret_key)?;
        Ok(SealedKeyPair {
            access_cipher: access.cipher_hex,
            secret_cipher: secret.cipher_hex,
            iv: format!("{}:{}", access.iv_hex, secret.iv_hex),
            tag: format!("{}:{}", access.tag_hex, secret.tag_hex),
        })
    }

    /// Open a stored pair back into (access, secret).
    pub fn open_pair(
        &self,
        sealed: &SealedKeyPair,
    ) -> Result<(Zeroizing<String>, Zeroizing<String>), PlatformError> {
        let (iv_a, iv_s) = sealed.iv.split_once(':').ok_or_else(Self::missing_key)?;
        let (tag_a, tag_s) = sealed.tag.split_once(':').ok_or_else(Self::missing_key)?;

        let access = self.decrypt(&EncryptedSecret {
            cipher_hex: sealed.access_cipher.clone(),
            iv_hex: iv_a.to_string(),
            tag_hex: tag_a.to_string(),
        })?;
        let secret = self.decrypt(&EncryptedSecret {
            cipher_hex: sealed.secret_cipher.clone(),
            iv_hex: iv_s.to_string(),
            tag_hex: tag_s.to_string(),
        })?;
        Ok((access, secret))
    }

    /// First 8 + last 4 of the access key; only the last 4 of the secret.
    pub fn mask(access_key: &str, secret_key: &str) -> MaskedKeys {
        let mask_access = |k: &str| {
            if k.len() <= 12 {
                "*".repeat(k.len())
            } else {
                format!("{}...{}", &k[..8], &k[k.len() - 4..])
            }
        };
        let mask_secret = |k: &str| {
            if k.len() <= 4 {
                "*".repeat(k.len())
            } else {
                format!("****{}", &k[k.len() - 4..])
            }
        };
        MaskedKeys {
            access_key: mask_access(access_key),
            secret_key: mask_secret(secret_key),
        }
    }

    fn missing_key() -> PlatformError {
        PlatformError::NotFound("api key".to_string())
    }
}
