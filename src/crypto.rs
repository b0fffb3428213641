//! Encryption collaborators.
//!
//! The archive engine does not implement any cipher. It drives an
//! [`EncryptionScheme`] that turns a password and an entry into byte
//! transforms applied to the compressed data, plus the header and trailer
//! bytes the scheme stores around it.

use std::fmt;

use crate::error::Result;
use crate::zip::ZipEntry;

/// Decrypts one entry's compressed bytes in place.
pub trait Decryptor: Send {
    fn decrypt(&mut self, data: &mut [u8]);

    /// Check the bytes stored after the encrypted data (e.g. an
    /// authentication code). Schemes without a trailer accept anything.
    fn verify(&mut self, trailer: &[u8]) -> Result<()> {
        let _ = trailer;
        Ok(())
    }
}

/// Encrypts one entry's compressed bytes in place.
pub trait Encryptor: Send {
    fn encrypt(&mut self, data: &mut [u8]);

    /// Bytes to append after the encrypted data.
    fn finish(&mut self) -> Vec<u8> {
        Vec::new()
    }
}

/// A password-keyed cipher as stored in ZIP entries.
pub trait EncryptionScheme: Send + Sync {
    /// Bytes stored in front of the encrypted data.
    fn header_len(&self, entry: &ZipEntry) -> usize;

    /// Bytes stored after the encrypted data.
    fn trailer_len(&self, entry: &ZipEntry) -> usize {
        let _ = entry;
        0
    }

    /// Build a decryptor from the stored header. Fails when the password is
    /// wrong and the scheme can tell.
    fn decryptor(&self, entry: &ZipEntry, password: &[u8], header: &[u8])
    -> Result<Box<dyn Decryptor>>;

    /// Build an encryptor, returning the header to store before the data.
    fn encryptor(&self, entry: &ZipEntry, password: &[u8]) -> Result<(Vec<u8>, Box<dyn Encryptor>)>;
}

impl fmt::Debug for dyn EncryptionScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionScheme")
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! A toy XOR scheme for exercising the encrypted code paths.

    use super::*;
    use crate::error::Error;

    pub struct XorScheme;

    struct Xor {
        key: Vec<u8>,
        pos: usize,
        sum: u8,
    }

    impl Xor {
        fn new(password: &[u8]) -> Self {
            Self {
                key: password.to_vec(),
                pos: 0,
                sum: 0,
            }
        }

        fn apply(&mut self, data: &mut [u8]) {
            for byte in data {
                *byte ^= self.key[self.pos % self.key.len()];
                self.pos += 1;
            }
        }
    }

    impl Decryptor for Xor {
        fn decrypt(&mut self, data: &mut [u8]) {
            self.apply(data);
            self.sum = data.iter().fold(self.sum, |acc, &b| acc.wrapping_add(b));
        }

        fn verify(&mut self, trailer: &[u8]) -> Result<()> {
            if trailer != [self.sum] {
                return Err(Error::checksum_mismatch(
                    "XOR trailer",
                    trailer.first().copied().unwrap_or(0) as u32,
                    self.sum as u32,
                ));
            }
            Ok(())
        }
    }

    impl Encryptor for Xor {
        fn encrypt(&mut self, data: &mut [u8]) {
            self.sum = data.iter().fold(self.sum, |acc, &b| acc.wrapping_add(b));
            self.apply(data);
        }

        fn finish(&mut self) -> Vec<u8> {
            vec![self.sum]
        }
    }

    impl EncryptionScheme for XorScheme {
        fn header_len(&self, _entry: &ZipEntry) -> usize {
            2
        }

        fn trailer_len(&self, _entry: &ZipEntry) -> usize {
            1
        }

        fn decryptor(
            &self,
            _entry: &ZipEntry,
            password: &[u8],
            header: &[u8],
        ) -> Result<Box<dyn Decryptor>> {
            if password.is_empty() || header != [password[0], password.len() as u8] {
                return Err(Error::capability("wrong password"));
            }
            Ok(Box::new(Xor::new(password)))
        }

        fn encryptor(
            &self,
            _entry: &ZipEntry,
            password: &[u8],
        ) -> Result<(Vec<u8>, Box<dyn Encryptor>)> {
            if password.is_empty() {
                return Err(Error::usage("empty password"));
            }
            let header = vec![password[0], password.len() as u8];
            Ok((header, Box::new(Xor::new(password))))
        }
    }
}
