//! Payload codecs shared by agent and server: gzip and RSA PKCS#1 v1.5.

use crate::core::error::{MetricsError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use std::io::{Read, Write};
use std::path::Path;

/// Compresses `data` with gzip at best compression.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::best());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decompresses a gzip stream.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::with_capacity(data.len() * 4);
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Agent-side payload encryption with the server's public key.
#[derive(Clone)]
pub struct PayloadEncryptor {
    key: RsaPublicKey,
}

impl PayloadEncryptor {
    /// Wraps an already parsed key
    pub fn new(key: RsaPublicKey) -> Self {
        Self { key }
    }

    /// Parses a PEM public key, SubjectPublicKeyInfo or PKCS#1.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let key = RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .map_err(|e| MetricsError::crypto(format!("invalid RSA public key: {}", e)))?;
        Ok(Self { key })
    }

    /// Reads and parses a PEM public key file.
    pub async fn from_file(path: &Path) -> Result<Self> {
        let pem = tokio::fs::read_to_string(path).await.map_err(|e| {
            MetricsError::crypto(format!("error while opening crypto key file {:?}: {}", path, e))
        })?;
        Self::from_pem(&pem)
    }

    /// Encrypts one payload. Fails when it exceeds the key's block size.
    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut rng = rand::thread_rng();
        self.key
            .encrypt(&mut rng, Pkcs1v15Encrypt, data)
            .map_err(|e| MetricsError::crypto(format!("error while encrypting payload: {}", e)))
    }
}

/// Server-side payload decryption with the private key.
#[derive(Clone)]
pub struct PayloadDecryptor {
    key: RsaPrivateKey,
}

impl PayloadDecryptor {
    /// Wraps an already parsed key
    pub fn new(key: RsaPrivateKey) -> Self {
        Self { key }
    }

    /// Parses a PEM private key, PKCS#1 or PKCS#8.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let key = RsaPrivateKey::from_pkcs1_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
            .map_err(|e| MetricsError::crypto(format!("invalid RSA private key: {}", e)))?;
        Ok(Self { key })
    }

    /// Reads and parses a PEM private key file.
    pub async fn from_file(path: &Path) -> Result<Self> {
        let pem = tokio::fs::read_to_string(path).await.map_err(|e| {
            MetricsError::crypto(format!("error while reading crypto key file {:?}: {}", path, e))
        })?;
        Self::from_pem(&pem)
    }

    /// Public half, for wiring an agent in tests and tooling.
    pub fn public_key(&self) -> RsaPublicKey {
        self.key.to_public_key()
    }

    /// Decrypts one payload.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.key
            .decrypt(Pkcs1v15Encrypt, data)
            .map_err(|e| MetricsError::crypto(format!("error while decrypting payload: {}", e)))
    }
}
