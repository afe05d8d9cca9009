//! Asymmetric cipher adapter.
//!
//! RSA-2048 with OAEP/SHA-256 padding. Public keys travel as base64 of the
//! DER SubjectPublicKeyInfo, the same bytes a browser produces with
//! `crypto.subtle.exportKey("spki", ..)`. PKCS#1 DER is accepted on import for
//! older clients.
//!
//! OAEP/SHA-256 over a 2048-bit modulus carries at most 190 bytes per block,
//! so plaintext longer than [`MAX_CHUNK`] is split byte-wise, every piece is
//! encrypted on its own, and the base64 blocks are joined with
//! [`CHUNK_DELIMITER`]. `|` never appears in standard base64, which makes a
//! ciphertext self-describing on decrypt.
//!
//! Private keys never leave [`Keypair`]; `rsa` wipes them on drop.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::Oaep;
pub use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use thiserror::Error;

/// Modulus size for generated keys.
pub const KEY_BITS: usize = 2048;

/// Largest plaintext piece encrypted as a single block. Kept below the
/// 190-byte OAEP limit; the browser client splits at the same size.
pub const MAX_CHUNK: usize = 180;

/// Separator between independently encrypted blocks.
pub const CHUNK_DELIMITER: char = '|';

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key generation failed: {0}")]
    KeyGeneration(rsa::Error),
    #[error("failed to export public key: {0}")]
    KeyExport(String),
    #[error("invalid public key format: {0}")]
    InvalidKeyFormat(String),
    #[error("failed to encrypt chunk {chunk}: {source}")]
    Encryption { chunk: usize, source: rsa::Error },
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
}

// ── Keypair ───────────────────────────────────────────────────────────────────

/// A session keypair. Generated once per connection and never persisted.
pub struct Keypair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
    /// Base64 SPKI export of `public`, computed once.
    exported: String,
}

impl Keypair {
    /// Generate a fresh 2048-bit keypair. Slow; call from a blocking context
    /// when running on an async runtime.
    pub fn generate() -> Result<Self, CryptoError> {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), KEY_BITS)
            .map_err(CryptoError::KeyGeneration)?;
        Self::from_private(private)
    }

    pub fn from_private(private: RsaPrivateKey) -> Result<Self, CryptoError> {
        let public = private.to_public_key();
        let exported = export_public_key(&public)?;
        Ok(Self {
            private,
            public,
            exported,
        })
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    /// The public key as shared on the wire.
    pub fn exported_public_key(&self) -> &str {
        &self.exported
    }

    /// Decrypt a single- or multi-block ciphertext addressed to this keypair.
    pub fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError> {
        decrypt(ciphertext, &self.private)
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("public", &self.exported)
            .finish_non_exhaustive()
    }
}

// ── Key encoding ──────────────────────────────────────────────────────────────

/// Export as base64 of the DER SubjectPublicKeyInfo.
pub fn export_public_key(key: &RsaPublicKey) -> Result<String, CryptoError> {
    let der = key
        .to_public_key_der()
        .map_err(|e| CryptoError::KeyExport(e.to_string()))?;
    Ok(BASE64.encode(der.as_bytes()))
}

/// Import a base64 public key, SPKI first and PKCS#1 as fallback.
///
/// Anything else, including the empty string, is `InvalidKeyFormat`.
pub fn import_public_key(encoded: &str) -> Result<RsaPublicKey, CryptoError> {
    let der = BASE64
        .decode(encoded)
        .map_err(|e| CryptoError::InvalidKeyFormat(format!("not base64: {e}")))?;

    RsaPublicKey::from_public_key_der(&der)
        .or_else(|_| RsaPublicKey::from_pkcs1_der(&der))
        .map_err(|e| {
            CryptoError::InvalidKeyFormat(format!("neither SPKI nor PKCS#1 RSA key: {e}"))
        })
}

// ── Encrypt / decrypt ─────────────────────────────────────────────────────────

/// Encrypt `plaintext` for `recipient`.
///
/// Up to [`MAX_CHUNK`] bytes produce one base64 block; longer input produces
/// `|`-joined blocks of at most [`MAX_CHUNK`] plaintext bytes each.
pub fn encrypt(plaintext: &str, recipient: &RsaPublicKey) -> Result<String, CryptoError> {
    let bytes = plaintext.as_bytes();
    let mut rng = rand::thread_rng();

    if bytes.len() <= MAX_CHUNK {
        let block = recipient
            .encrypt(&mut rng, Oaep::new::<Sha256>(), bytes)
            .map_err(|source| CryptoError::Encryption { chunk: 0, source })?;
        return Ok(BASE64.encode(block));
    }

    let mut blocks = Vec::with_capacity(bytes.len().div_ceil(MAX_CHUNK));
    for (chunk, piece) in bytes.chunks(MAX_CHUNK).enumerate() {
        let block = recipient
            .encrypt(&mut rng, Oaep::new::<Sha256>(), piece)
            .map_err(|source| CryptoError::Encryption { chunk, source })?;
        blocks.push(BASE64.encode(block));
    }

    Ok(blocks.join(CHUNK_DELIMITER.to_string().as_str()))
}

/// Decrypt what [`encrypt`] produced. Blocks are concatenated in order before
/// UTF-8 validation, so a multi-byte character split across blocks survives.
pub fn decrypt(ciphertext: &str, private: &RsaPrivateKey) -> Result<String, CryptoError> {
    let mut rng = rand::thread_rng();
    let mut plaintext = Vec::new();

    for (i, block) in ciphertext.split(CHUNK_DELIMITER).enumerate() {
        let raw = BASE64
            .decode(block)
            .map_err(|e| CryptoError::DecryptionFailed(format!("chunk {i} is not base64: {e}")))?;
        let piece = private
            .decrypt_blinded(&mut rng, Oaep::new::<Sha256>(), &raw)
            .map_err(|e| CryptoError::DecryptionFailed(format!("chunk {i}: {e}")))?;
        plaintext.extend_from_slice(&piece);
    }

    String::from_utf8(plaintext)
        .map_err(|e| CryptoError::DecryptionFailed(format!("plaintext is not UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1::EncodeRsaPublicKey;
    use rsa::traits::PublicKeyParts;
    use std::sync::OnceLock;

    fn alice() -> &'static Keypair {
        static KEY: OnceLock<Keypair> = OnceLock::new();
        KEY.get_or_init(|| Keypair::generate().unwrap())
    }

    fn bob() -> &'static Keypair {
        static KEY: OnceLock<Keypair> = OnceLock::new();
        KEY.get_or_init(|| Keypair::generate().unwrap())
    }

    fn text_of_len(len: usize) -> String {
        "abcdefghijklmnopqrstuvwxyz0123456789"
            .chars()
            .cycle()
            .take(len)
            .collect()
    }

    #[test]
    fn generated_key_is_2048_bits() {
        assert_eq!(alice().public_key().size() * 8, KEY_BITS);
    }

    #[test]
    fn export_import_preserves_modulus() {
        let exported = alice().exported_public_key();
        let imported = import_public_key(exported).unwrap();
        assert_eq!(imported.n(), alice().public_key().n());
        assert_eq!(imported.e(), alice().public_key().e());
    }

    #[test]
    fn export_is_spki_der() {
        let der = BASE64.decode(alice().exported_public_key()).unwrap();
        // SEQUENCE { SEQUENCE { rsaEncryption OID, NULL }, BIT STRING }
        assert_eq!(der[0], 0x30);
        assert!(RsaPublicKey::from_public_key_der(&der).is_ok());
        assert!(RsaPublicKey::from_pkcs1_der(&der).is_err());
    }

    #[test]
    fn import_accepts_pkcs1() {
        let der = alice().public_key().to_pkcs1_der().unwrap();
        let encoded = BASE64.encode(der.as_bytes());
        let imported = import_public_key(&encoded).unwrap();
        assert_eq!(imported.n(), alice().public_key().n());
    }

    #[test]
    fn import_rejects_garbage() {
        for bad in ["invalid-base64-key", "", "aGVsbG8gd29ybGQ="] {
            match import_public_key(bad) {
                Err(CryptoError::InvalidKeyFormat(_)) => {}
                other => panic!("expected InvalidKeyFormat for {bad:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn roundtrip_across_chunk_threshold() {
        for len in [10, 180, 181, 5000] {
            let plaintext = text_of_len(len);
            let ciphertext = encrypt(&plaintext, bob().public_key()).unwrap();
            assert_eq!(
                ciphertext.contains(CHUNK_DELIMITER),
                len > MAX_CHUNK,
                "delimiter presence wrong for len {len}"
            );
            assert_eq!(bob().decrypt(&ciphertext).unwrap(), plaintext, "len {len}");
        }
    }

    #[test]
    fn chunk_count_matches_plaintext_length() {
        let ciphertext = encrypt(&text_of_len(5000), bob().public_key()).unwrap();
        assert_eq!(ciphertext.split(CHUNK_DELIMITER).count(), 5000usize.div_ceil(MAX_CHUNK));
    }

    #[test]
    fn multibyte_character_split_across_chunks() {
        // 179 ASCII bytes then a 4-byte character straddling the boundary.
        let plaintext = format!("{}🦀 tail", text_of_len(179));
        let ciphertext = encrypt(&plaintext, bob().public_key()).unwrap();
        assert!(ciphertext.contains(CHUNK_DELIMITER));
        assert_eq!(bob().decrypt(&ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn empty_plaintext_roundtrips() {
        let ciphertext = encrypt("", bob().public_key()).unwrap();
        assert_eq!(bob().decrypt(&ciphertext).unwrap(), "");
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let ciphertext = encrypt("for bob only", bob().public_key()).unwrap();
        assert!(matches!(
            alice().decrypt(&ciphertext),
            Err(CryptoError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn corrupt_chunk_fails_to_decrypt() {
        let ciphertext = encrypt(&text_of_len(400), bob().public_key()).unwrap();
        let mut blocks: Vec<&str> = ciphertext.split(CHUNK_DELIMITER).collect();
        blocks[1] = "not*base64";
        let tampered = blocks.join("|");
        assert!(matches!(
            bob().decrypt(&tampered),
            Err(CryptoError::DecryptionFailed(_))
        ));
        assert!(bob().decrypt("").is_err());
    }

    #[test]
    fn encryption_is_randomised() {
        let a = encrypt("same", bob().public_key()).unwrap();
        let b = encrypt("same", bob().public_key()).unwrap();
        assert_ne!(a, b);
    }
}
