//! Key derivation, token rotation, request signing and AES-CBC envelope encryption.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

/// AES block size. Also the padding modulus.
pub const BLOCK_SIZE: usize = 16;

/// Every secret and token in a session is a SHA-256 digest.
pub const KEY_SIZE: usize = 32;

/// A 32-byte secret or token. For AES-CBC it is split in half: IV first, then the
/// cipher key, so only AES-128 is ever used.
pub type Key = [u8; KEY_SIZE];

type HmacSha256 = Hmac<Sha256>;
type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// Secret domains. `Server` keys relay traffic, `Device` keys device traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Server,
    Device,
}

impl Domain {
    pub fn tag(self) -> &'static str {
        match self {
            Domain::Server => "server",
            Domain::Device => "device",
        }
    }
}

/// SHA-256 over lower-cased email, password and domain tag.
pub fn derive_secret(email: &str, password: &str, domain: Domain) -> Key {
    let mut hasher = Sha256::new();
    hasher.update(email.to_lowercase().as_bytes());
    hasher.update(password.as_bytes());
    hasher.update(domain.tag().as_bytes());
    hasher.finalize().into()
}

/// Next encryption token: SHA-256 of the previous token (or secret) followed by the
/// raw bytes of the hex session token.
pub fn rotate_token(previous: &[u8], session_token_hex: &str) -> Result<Key, CryptoError> {
    let token = hex::decode(session_token_hex)?;
    let mut hasher = Sha256::new();
    hasher.update(previous);
    hasher.update(&token);
    Ok(hasher.finalize().into())
}

/// HMAC-SHA256 of `message`, hex encoded.
pub fn sign(key: &[u8], message: &str) -> Result<String, CryptoError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).map_err(|_| CryptoError::KeyLength)?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Append `n` copies of byte `n`, `n = BLOCK_SIZE - len % BLOCK_SIZE`.
pub fn pad(data: &[u8]) -> Vec<u8> {
    let n = BLOCK_SIZE - data.len() % BLOCK_SIZE;
    let mut out = Vec::with_capacity(data.len() + n);
    out.extend_from_slice(data);
    out.resize(data.len() + n, n as u8);
    out
}

/// Drop as many trailing bytes as the last byte says.
pub fn unpad(data: &[u8]) -> Result<&[u8], CryptoError> {
    let n = *data.last().ok_or(CryptoError::Padding)? as usize;
    if n == 0 || n > BLOCK_SIZE || n > data.len() {
        return Err(CryptoError::Padding);
    }
    Ok(&data[..data.len() - n])
}

/// First half of the key is the IV, second half the AES-128 key. The IV must be one block,
/// which is why keys are fixed at 32 bytes.
fn split_key(key: &Key) -> (&[u8], &[u8]) {
    key.split_at(KEY_SIZE / 2)
}

/// Pad, encrypt with AES-CBC and base64-encode.
pub fn encrypt_cbc(key: &Key, plaintext: &[u8]) -> Result<String, CryptoError> {
    let (iv, aes_key) = split_key(key);
    let cipher = Aes128CbcEnc::new_from_slices(aes_key, iv).map_err(|_| CryptoError::KeyLength)?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<NoPadding>(&pad(plaintext));
    Ok(BASE64.encode(ciphertext))
}

/// Inverse of [`encrypt_cbc`].
pub fn decrypt_cbc(key: &Key, ciphertext_b64: &str) -> Result<Vec<u8>, CryptoError> {
    let ciphertext = BASE64.decode(ciphertext_b64.trim())?;
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::Ciphertext);
    }
    let (iv, aes_key) = split_key(key);
    let cipher = Aes128CbcDec::new_from_slices(aes_key, iv).map_err(|_| CryptoError::KeyLength)?;
    let plain = cipher
        .decrypt_padded_vec_mut::<NoPadding>(&ciphertext)
        .map_err(|_| CryptoError::Ciphertext)?;
    Ok(unpad(&plain)?.to_vec())
}

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid key length")]
    KeyLength,
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid hex token: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("ciphertext is not a whole number of blocks")]
    Ciphertext,
    #[error("invalid padding")]
    Padding,
}
