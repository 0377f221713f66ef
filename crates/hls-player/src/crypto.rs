// Segment decryption: AES-128-CBC behind a completion-style interface.

use aes::Aes128;
use bytes::Bytes;
use cipher::{
    BlockDecryptMut, KeyIvInit,
    block_padding::{NoPadding, Pkcs7},
};
use tracing::warn;

type Aes128CbcDec = cbc::Decryptor<Aes128>;

const BLOCK_SIZE: usize = 16;

/// Identifies one decrypt job so a late result can be matched or discarded.
pub type DecryptId = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum DecryptOutcome {
    /// Plaintext is available immediately.
    Ready(Bytes),
    /// The host will deliver the plaintext through
    /// [`SegmentLoader::handle_decrypted`](crate::loader::SegmentLoader::handle_decrypted).
    Pending,
}

pub trait Decrypter {
    fn decrypt(
        &mut self,
        id: DecryptId,
        ciphertext: Bytes,
        key: &[u8; 16],
        iv: &[u8; 16],
    ) -> DecryptOutcome;
}

/// Synchronous AES-128-CBC with PKCS#7 padding removal.
///
/// Never fails: a trailing partial block is dropped and invalid padding is
/// left in place, both with a warning.
#[derive(Debug, Clone, Copy, Default)]
pub struct Aes128CbcDecrypter;

impl Aes128CbcDecrypter {
    pub fn new() -> Self {
        Self
    }

    pub fn decrypt_segment(ciphertext: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Bytes {
        let aligned = ciphertext.len() - ciphertext.len() % BLOCK_SIZE;
        if aligned != ciphertext.len() {
            warn!(
                len = ciphertext.len(),
                "Ciphertext is not block aligned, dropping trailing bytes"
            );
        }

        let mut buffer = ciphertext[..aligned].to_vec();
        let unpadded = Aes128CbcDec::new(&(*key).into(), &(*iv).into())
            .decrypt_padded_mut::<Pkcs7>(&mut buffer)
            .map(<[u8]>::len);
        let len = match unpadded {
            Ok(len) => len,
            Err(e) => {
                warn!(error = %e, "Invalid PKCS#7 padding, keeping full plaintext");
                buffer.copy_from_slice(&ciphertext[..aligned]);
                match Aes128CbcDec::new(&(*key).into(), &(*iv).into())
                    .decrypt_padded_mut::<NoPadding>(&mut buffer)
                {
                    Ok(plaintext) => plaintext.len(),
                    Err(e) => {
                        warn!(error = %e, "Segment decryption failed");
                        return Bytes::new();
                    }
                }
            }
        };
        buffer.truncate(len);
        Bytes::from(buffer)
    }
}

impl Decrypter for Aes128CbcDecrypter {
    fn decrypt(
        &mut self,
        _id: DecryptId,
        ciphertext: Bytes,
        key: &[u8; 16],
        iv: &[u8; 16],
    ) -> DecryptOutcome {
        DecryptOutcome::Ready(Self::decrypt_segment(&ciphertext, key, iv))
    }
}
