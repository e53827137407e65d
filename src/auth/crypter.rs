//! Session cookie encryption.
//!
//! AES-GCM with a random 96-bit nonce per message.  The wire form is
//! `base64url(nonce || ciphertext || tag)` without padding, so it can be
//! used as a cookie value as-is.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

enum Cipher {
    Aes128(Box<Aes128Gcm>),
    Aes256(Box<Aes256Gcm>),
}

pub struct Crypter {
    cipher: Cipher,
}

impl Crypter {
    /// `key` must be 16 (AES-128) or 32 (AES-256) bytes.
    pub fn new(key: &[u8]) -> Result<Self> {
        let cipher = match key.len() {
            16 => Cipher::Aes128(Box::new(
                Aes128Gcm::new_from_slice(key).map_err(|_| anyhow!("invalid AES-128 key"))?,
            )),
            32 => Cipher::Aes256(Box::new(
                Aes256Gcm::new_from_slice(key).map_err(|_| anyhow!("invalid AES-256 key"))?,
            )),
            n => bail!("unsupported key length {n}: expected 16 or 32 bytes"),
        };
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let (nonce, ciphertext) = match &self.cipher {
            Cipher::Aes128(c) => {
                let nonce = Aes128Gcm::generate_nonce(&mut OsRng);
                let ct = c.encrypt(&nonce, plaintext.as_bytes());
                (nonce, ct)
            }
            Cipher::Aes256(c) => {
                let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
                let ct = c.encrypt(&nonce, plaintext.as_bytes());
                (nonce, ct)
            }
        };
        let ciphertext = ciphertext.map_err(|_| anyhow!("encryption failed"))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(out))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String> {
        let raw = URL_SAFE_NO_PAD
            .decode(encoded)
            .context("ciphertext is not valid base64")?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            bail!("ciphertext too short: {} bytes", raw.len());
        }

        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce);
        let plaintext = match &self.cipher {
            Cipher::Aes128(c) => c.decrypt(nonce, ciphertext),
            Cipher::Aes256(c) => c.decrypt(nonce, ciphertext),
        }
        .map_err(|_| anyhow!("ciphertext failed authentication"))?;

        String::from_utf8(plaintext).context("plaintext is not UTF-8")
    }
}
