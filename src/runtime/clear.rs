/*
 * SPDX-FileCopyrightText: 2025 The oblix authors
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use std::cell::RefCell;

use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};

use crate::error::{KernelError, KernelResult};
use crate::runtime::Runtime;

/// Marker prepended to every "ciphertext" so that decryption of a buffer
/// that was never encrypted fails verification.
const MAGIC: u32 = 0x4F42_4C58;

/// Header size of the plaintext envelope: marker plus plaintext length.
const HEADER: usize = 8;

/// A plaintext [`Runtime`] for tests and host-side simulation.
///
/// "Encryption" wraps the plaintext in a verifiable envelope with the
/// same length discipline as a real cipher (`enc_size` is a function of
/// the plaintext length only), so every operator exercises the same byte
/// layouts it would see in an enclave. Entropy comes from a seedable
/// [`SmallRng`] so sampling tests are reproducible.
pub struct ClearRuntime {
    rng: RefCell<SmallRng>,
}

impl ClearRuntime {
    /// Creates a runtime with entropy seeded from the given value.
    pub fn seeded(seed: u64) -> Self {
        ClearRuntime {
            rng: RefCell::new(SmallRng::seed_from_u64(seed)),
        }
    }
}

impl Default for ClearRuntime {
    fn default() -> Self {
        Self::seeded(0)
    }
}

impl Runtime for ClearRuntime {
    fn encrypt(&self, plain: &[u8], out: &mut [u8]) -> KernelResult<()> {
        let needed = self.enc_size(plain.len());
        if out.len() != needed {
            return Err(KernelError::OutputOverflow {
                needed,
                available: out.len(),
            });
        }
        out[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        out[4..8].copy_from_slice(&(plain.len() as u32).to_le_bytes());
        out[HEADER..].copy_from_slice(plain);
        Ok(())
    }

    fn decrypt(&self, cipher: &[u8], out: &mut [u8]) -> KernelResult<usize> {
        if cipher.len() < HEADER {
            return Err(KernelError::DecryptFailed);
        }
        let magic = u32::from_le_bytes(cipher[0..4].try_into().unwrap());
        let plain_len = u32::from_le_bytes(cipher[4..8].try_into().unwrap()) as usize;
        if magic != MAGIC || cipher.len() != HEADER + plain_len {
            return Err(KernelError::DecryptFailed);
        }
        if out.len() < plain_len {
            return Err(KernelError::OutputOverflow {
                needed: plain_len,
                available: out.len(),
            });
        }
        out[..plain_len].copy_from_slice(&cipher[HEADER..]);
        Ok(plain_len)
    }

    fn enc_size(&self, plain_len: usize) -> usize {
        HEADER + plain_len
    }

    fn read_rand(&self, buf: &mut [u8]) -> KernelResult<()> {
        self.rng.borrow_mut().fill_bytes(buf);
        Ok(())
    }

    fn is_within_enclave(&self, _buf: &[u8]) -> bool {
        true
    }
}
