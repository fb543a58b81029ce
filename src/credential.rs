//! Credential provisioning
//!
//! The engine secret is shipped as an AES-256-GCM encrypted triple
//! (auth tag, IV, ciphertext). The symmetric key is the SHA-256 digest of a
//! key phrase, so neither the secret nor the raw key lives in source or
//! config. Nothing in this module logs or persists a derived secret.

use aes_gcm::aead::{AeadCore, AeadInPlace, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce, Tag};
use base64::Engine;
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Length of the GCM authentication tag in bytes
pub const TAG_LEN: usize = 16;

/// Length of the GCM initialization vector in bytes
pub const IV_LEN: usize = 12;

/// Key phrase pinned by the license-gated deployments
pub const LICENSE_KEY_PHRASE: &str = "You may only use the C/C++ Extension for Visual Studio Code and C# \
Extension for Visual Studio Code with Visual Studio Code, Visual Studio \
or Xamarin Studio software to help you develop and test your applications. \
The software is licensed, not sold. This agreement only gives you some \
rights to use the software. Microsoft reserves all other rights. You may \
not work around any technical limitations in the software; reverse engineer, \
decompile or disassemble the software remove, minimize, block or modify any \
notices of Microsoft or its suppliers in the software share, publish, rent, \
or lease the software, or provide the software as a stand-alone hosted as \
solution for others to use.";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("key phrase does not match the expected key phrase")]
    InvalidKeyPhrase,

    #[error("credential failed authentication")]
    AuthenticationFailed,

    #[error("malformed credential input: {0}")]
    MalformedInput(String),
}

/// Secret recovered from an encrypted triple
///
/// `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct DerivedSecret(String);

impl DerivedSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for DerivedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedSecret(<redacted>)")
    }
}

/// Encrypted credential material as shipped in config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedTriple {
    pub auth_tag: Vec<u8>,
    pub iv: Vec<u8>,
    pub cipher_text: Vec<u8>,
}

impl EncryptedTriple {
    pub fn new(auth_tag: Vec<u8>, iv: Vec<u8>, cipher_text: Vec<u8>) -> Self {
        Self {
            auth_tag,
            iv,
            cipher_text,
        }
    }

    pub fn from_hex(auth_tag: &str, iv: &str, cipher_text: &str) -> Result<Self, CredentialError> {
        Ok(Self {
            auth_tag: decode_hex("auth tag", auth_tag)?,
            iv: decode_hex("iv", iv)?,
            cipher_text: decode_hex("cipher text", cipher_text)?,
        })
    }

    pub fn from_base64(auth_tag: &str, iv: &str, cipher_text: &str) -> Result<Self, CredentialError> {
        Ok(Self {
            auth_tag: decode_base64("auth tag", auth_tag)?,
            iv: decode_base64("iv", iv)?,
            cipher_text: decode_base64("cipher text", cipher_text)?,
        })
    }

    /// Hex text of (auth tag, iv, cipher text)
    pub fn to_hex(&self) -> (String, String, String) {
        (
            hex::encode(&self.auth_tag),
            hex::encode(&self.iv),
            hex::encode(&self.cipher_text),
        )
    }

    /// Recover the secret with the given key phrase
    pub fn derive(&self, key_phrase: &str) -> Result<DerivedSecret, CredentialError> {
        derive(key_phrase, &self.auth_tag, &self.iv, &self.cipher_text)
    }
}

fn decode_hex(field: &str, text: &str) -> Result<Vec<u8>, CredentialError> {
    hex::decode(text.trim())
        .map_err(|e| CredentialError::MalformedInput(format!("{field} is not valid hex: {e}")))
}

fn decode_base64(field: &str, text: &str) -> Result<Vec<u8>, CredentialError> {
    base64::engine::general_purpose::STANDARD
        .decode(text.trim())
        .map_err(|e| CredentialError::MalformedInput(format!("{field} is not valid base64: {e}")))
}

/// 256-bit symmetric key for a key phrase
pub fn derive_key(key_phrase: &str) -> [u8; 32] {
    Sha256::digest(key_phrase.as_bytes()).into()
}

/// Authenticated AES-256-GCM decryption with a detached tag
///
/// Either the whole ciphertext verifies and decrypts, or nothing is returned.
pub fn open(key: &[u8; 32], iv: &[u8], auth_tag: &[u8], cipher_text: &[u8]) -> Result<Vec<u8>, CredentialError> {
    if iv.len() != IV_LEN {
        return Err(CredentialError::MalformedInput(format!(
            "iv must be {IV_LEN} bytes, got {}",
            iv.len()
        )));
    }
    if auth_tag.len() != TAG_LEN {
        return Err(CredentialError::MalformedInput(format!(
            "auth tag must be {TAG_LEN} bytes, got {}",
            auth_tag.len()
        )));
    }

    let cipher = Aes256Gcm::new(key.into());
    let mut buffer = cipher_text.to_vec();
    cipher
        .decrypt_in_place_detached(Nonce::from_slice(iv), b"", &mut buffer, Tag::from_slice(auth_tag))
        .map_err(|_| CredentialError::AuthenticationFailed)?;

    Ok(buffer)
}

/// Recover the engine secret from an encrypted triple
pub fn derive(key_phrase: &str, auth_tag: &[u8], iv: &[u8], cipher_text: &[u8]) -> Result<DerivedSecret, CredentialError> {
    let key = derive_key(key_phrase);
    let plain = open(&key, iv, auth_tag, cipher_text)?;

    String::from_utf8(plain)
        .map(DerivedSecret)
        .map_err(|_| CredentialError::MalformedInput("decrypted secret is not UTF-8".to_string()))
}

/// Encrypt a secret under a key phrase with a fresh random IV
pub fn seal(plain_text: &str, key_phrase: &str) -> Result<EncryptedTriple, CredentialError> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(&nonce);
    seal_with_iv(plain_text, key_phrase, iv)
}

/// Encrypt a secret under a key phrase with a caller-chosen IV
///
/// Reusing an IV with the same key phrase breaks GCM; only fixtures should
/// call this directly.
pub fn seal_with_iv(plain_text: &str, key_phrase: &str, iv: [u8; IV_LEN]) -> Result<EncryptedTriple, CredentialError> {
    let key = derive_key(key_phrase);
    let cipher = Aes256Gcm::new((&key).into());
    let mut buffer = plain_text.as_bytes().to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&iv), b"", &mut buffer)
        .map_err(|_| CredentialError::MalformedInput("secret is too long to encrypt".to_string()))?;

    Ok(EncryptedTriple {
        auth_tag: tag.to_vec(),
        iv: iv.to_vec(),
        cipher_text: buffer,
    })
}

/// How the engine credential is obtained for a session
#[derive(Debug, Clone)]
pub enum CredentialMode {
    /// The engine key is given as-is
    PlainKey(String),

    /// The engine key is decrypted with the supplied key phrase
    EncryptedTriple {
        triple: EncryptedTriple,
        key_phrase: String,
    },

    /// As `EncryptedTriple`, but the key phrase must equal a pinned phrase
    GatedEncryptedTriple {
        triple: EncryptedTriple,
        key_phrase: String,
        expected_key_phrase: String,
    },
}

/// Credential handed to the engine for one call
#[derive(Debug, Clone)]
pub struct EngineCredential {
    pub secret: DerivedSecret,
    /// Raw triple, present only when the policy forwards it alongside the secret
    pub encrypted: Option<EncryptedTriple>,
}

/// Credential mode plus the forwarding choice
#[derive(Debug, Clone)]
pub struct CredentialPolicy {
    pub mode: CredentialMode,
    pub forward_encrypted_triple: bool,
}

impl CredentialPolicy {
    pub fn new(mode: CredentialMode) -> Self {
        Self {
            mode,
            forward_encrypted_triple: false,
        }
    }

    pub fn forwarding_triple(mut self) -> Self {
        self.forward_encrypted_triple = true;
        self
    }

    /// Produce the engine credential, failing closed on any error
    pub fn resolve(&self) -> Result<EngineCredential, CredentialError> {
        let (secret, triple) = match &self.mode {
            CredentialMode::PlainKey(key) => {
                if key.is_empty() {
                    return Err(CredentialError::MalformedInput("engine key is empty".to_string()));
                }
                (DerivedSecret::new(key.clone()), None)
            }
            CredentialMode::EncryptedTriple { triple, key_phrase } => (triple.derive(key_phrase)?, Some(triple)),
            CredentialMode::GatedEncryptedTriple {
                triple,
                key_phrase,
                expected_key_phrase,
            } => {
                if key_phrase != expected_key_phrase {
                    return Err(CredentialError::InvalidKeyPhrase);
                }
                (triple.derive(key_phrase)?, Some(triple))
            }
        };

        Ok(EngineCredential {
            secret,
            encrypted: if self.forward_encrypted_triple {
                triple.cloned()
            } else {
                None
            },
        })
    }
}
