// Copyright (c) 2026 Datacapsule Contributors
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

pub type CapsuleResult<T> = Result<T, CapsuleError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CapsuleError {
    #[error("invalid argument")]
    InvalidArgument,

    #[error("not found")]
    NotFound,

    #[error("bad signature")]
    BadSignature,

    #[error("bad proof: {0}")]
    BadProof(&'static str),

    #[error("cipher failure")]
    Cipher,

    #[error("internal error")]
    Internal,
}
