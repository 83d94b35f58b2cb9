use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::key_storage::{KeyStorage, KeyStorageError, ENCRYPTION_KEY_NAME};
use crate::nlog;

pub const CONTENT_KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;

#[derive(Debug)]
pub enum CryptoError {
    InvalidLength(&'static str),
    /// GCM tag verification failed: wrong key, or the data was altered.
    Authentication,
    Encoding(base64::DecodeError),
    Utf8(std::string::FromUtf8Error),
    Key(String),
    Storage(KeyStorageError),
}

impl std::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CryptoError::InvalidLength(what) => write!(f, "invalid length: {what}"),
            CryptoError::Authentication => {
                write!(f, "decryption failed: wrong key or tampered data")
            }
            CryptoError::Encoding(e) => write!(f, "base64 error: {e}"),
            CryptoError::Utf8(e) => write!(f, "utf-8 error: {e}"),
            CryptoError::Key(msg) => write!(f, "malformed key: {msg}"),
            CryptoError::Storage(e) => write!(f, "key storage error: {e}"),
        }
    }
}

impl std::error::Error for CryptoError {}

impl From<aes_gcm::aead::Error> for CryptoError {
    fn from(_: aes_gcm::aead::Error) -> Self {
        CryptoError::Authentication
    }
}

impl From<base64::DecodeError> for CryptoError {
    fn from(error: base64::DecodeError) -> Self {
        CryptoError::Encoding(error)
    }
}

impl From<std::string::FromUtf8Error> for CryptoError {
    fn from(error: std::string::FromUtf8Error) -> Self {
        CryptoError::Utf8(error)
    }
}

impl From<KeyStorageError> for CryptoError {
    fn from(error: KeyStorageError) -> Self {
        CryptoError::Storage(error)
    }
}

pub fn generate_content_key() -> [u8; CONTENT_KEY_SIZE] {
    let mut key = [0u8; CONTENT_KEY_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// AES-256-GCM encrypt. A fresh nonce is drawn unless one is supplied.
///
/// Returns `(nonce, ciphertext || tag)`.
pub fn encrypt_payload(
    content_key: &[u8],
    plaintext: &[u8],
    nonce: Option<&[u8]>,
) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
    if content_key.len() != CONTENT_KEY_SIZE {
        return Err(CryptoError::InvalidLength("content key must be 32 bytes"));
    }

    let nonce_bytes = match nonce {
        Some(value) => {
            if value.len() != NONCE_SIZE {
                return Err(CryptoError::InvalidLength("nonce must be 12 bytes"));
            }
            value.to_vec()
        }
        None => generate_nonce().to_vec(),
    };

    let aead = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(content_key));
    let ciphertext = aead.encrypt(Nonce::from_slice(&nonce_bytes), plaintext)?;
    Ok((nonce_bytes, ciphertext))
}

pub fn decrypt_payload(
    content_key: &[u8],
    nonce: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if content_key.len() != CONTENT_KEY_SIZE {
        return Err(CryptoError::InvalidLength("content key must be 32 bytes"));
    }
    if nonce.len() != NONCE_SIZE {
        return Err(CryptoError::InvalidLength("nonce must be 12 bytes"));
    }

    let aead = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(content_key));
    let plaintext = aead.decrypt(Nonce::from_slice(nonce), ciphertext)?;
    Ok(plaintext)
}

/// A 256-bit AES-GCM key.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; CONTENT_KEY_SIZE]);

// Keeps key bytes out of logs.
impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// Exportable key form (an `oct` JSON Web Key), as kept in storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Jwk {
    kty: String,
    k: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    alg: Option<String>,
    #[serde(default)]
    ext: bool,
    #[serde(default)]
    key_ops: Vec<String>,
}

impl EncryptionKey {
    pub fn generate() -> Self {
        Self(generate_content_key())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; CONTENT_KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidLength("content key must be 32 bytes"))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_jwk(&self) -> String {
        let jwk = Jwk {
            kty: "oct".to_string(),
            k: URL_SAFE_NO_PAD.encode(self.0),
            alg: Some("A256GCM".to_string()),
            ext: true,
            key_ops: vec!["encrypt".to_string(), "decrypt".to_string()],
        };
        serde_json::json!(jwk).to_string()
    }

    pub fn from_jwk(raw: &str) -> Result<Self, CryptoError> {
        let jwk: Jwk = serde_json::from_str(raw).map_err(|e| CryptoError::Key(e.to_string()))?;
        if jwk.kty != "oct" {
            return Err(CryptoError::Key(format!("unsupported key type {:?}", jwk.kty)));
        }
        if let Some(alg) = jwk.alg.as_deref() {
            if alg != "A256GCM" {
                return Err(CryptoError::Key(format!("unsupported algorithm {alg:?}")));
            }
        }
        Self::from_bytes(&URL_SAFE_NO_PAD.decode(jwk.k.trim_end_matches('='))?)
    }
}

/// Wire form of one encryption: base64 ciphertext plus the base64 IV it was
/// produced with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub data: String,
    pub iv: String,
}

/// Encrypts text with the key kept in `storage`, creating the key on first
/// use.
///
/// The key is read back from storage on every call. Two codecs racing on
/// first use over shared storage may both generate a key; the last write
/// wins.
pub struct Codec<S> {
    storage: S,
}

impl<S: KeyStorage> Codec<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn generate_key() -> EncryptionKey {
        EncryptionKey::generate()
    }

    pub fn get_or_create_key(&self) -> Result<EncryptionKey, CryptoError> {
        if let Some(raw) = self.storage.get(ENCRYPTION_KEY_NAME)? {
            nlog!("crypto: local key found");
            return EncryptionKey::from_jwk(&raw);
        }
        nlog!("crypto: no local key, generating one");
        let key = Self::generate_key();
        self.storage.set(ENCRYPTION_KEY_NAME, &key.to_jwk())?;
        Ok(key)
    }

    pub fn encrypt(
        &self,
        plaintext: &str,
        iv: Option<&[u8]>,
    ) -> Result<EncryptedPayload, CryptoError> {
        let key = self.get_or_create_key()?;
        let (iv, ciphertext) = encrypt_payload(key.as_bytes(), plaintext.as_bytes(), iv)?;
        Ok(EncryptedPayload {
            data: STANDARD.encode(ciphertext),
            iv: STANDARD.encode(iv),
        })
    }

    pub fn decrypt(&self, payload: &EncryptedPayload) -> Result<String, CryptoError> {
        let key = self.get_or_create_key()?;
        let iv = STANDARD.decode(&payload.iv)?;
        let ciphertext = STANDARD.decode(&payload.data)?;
        let plaintext = decrypt_payload(key.as_bytes(), &iv, &ciphertext)?;
        Ok(String::from_utf8(plaintext)?)
    }
}
