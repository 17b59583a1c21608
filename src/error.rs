/*
 * SPDX-FileCopyrightText: 2025 The oblix authors
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Kernel errors.
//!
//! Nothing is recovered inside an operator call: the first error
//! terminates the operator and is reported at the enclave boundary. The
//! host inspects [`KernelError::kind`] to decide whether the stage can be
//! retried (pure stages are idempotent) or the query must be aborted.

use thiserror::Error;

/// Coarse classification of a [`KernelError`], used by the host for its
/// retry/abort decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller violated the operator contract; abort the stage.
    Usage,
    /// A host-provided buffer was too small; resize and retry.
    Capacity,
    /// Ciphertext or dummy-format verification failed; treat the stage as
    /// compromised.
    Integrity,
    /// An aggregation was applied to a value it cannot consume.
    Arithmetic,
}

/// Errors reported by the operator kernel.
#[derive(Error, Debug)]
pub enum KernelError {
    #[error("unknown op code {0}")]
    UnknownOpCode(i32),

    #[error("attribute index {idx} out of range for row with {num_cols} columns")]
    IndexOutOfRange { idx: u32, num_cols: u32 },

    #[error("malformed row: {0}")]
    MalformedRow(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("scratch buffer too small: need {needed} bytes, have {available}")]
    ScratchTooSmall { needed: usize, available: usize },

    #[error("record pool exhausted: need {needed} records, have {available}")]
    PoolExhausted { needed: usize, available: usize },

    #[error("output buffer overflow: need {needed} bytes, have {available}")]
    OutputOverflow { needed: usize, available: usize },

    #[error("ciphertext verification failed")]
    DecryptFailed,

    #[error("dummy format violation: {0}")]
    DummyFormat(&'static str),

    #[error("aggregation cannot consume an attribute of type tag {type_tag}")]
    UnsupportedAggregation { type_tag: u8 },

    #[error("attributes of type tags {0} and {1} are not comparable")]
    IncomparableTypes(u8, u8),
}

impl KernelError {
    /// Returns the coarse error classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            KernelError::UnknownOpCode(_)
            | KernelError::IndexOutOfRange { .. }
            | KernelError::MalformedRow(_)
            | KernelError::InvalidArgument(_) => ErrorKind::Usage,
            KernelError::ScratchTooSmall { .. }
            | KernelError::PoolExhausted { .. }
            | KernelError::OutputOverflow { .. } => ErrorKind::Capacity,
            KernelError::DecryptFailed | KernelError::DummyFormat(_) => ErrorKind::Integrity,
            KernelError::UnsupportedAggregation { .. } | KernelError::IncomparableTypes(..) => {
                ErrorKind::Arithmetic
            }
        }
    }
}

/// Result alias for kernel-internal operations.
pub type KernelResult<T> = Result<T, KernelError>;
