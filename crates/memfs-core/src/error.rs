// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for the memfs core

/// Core filesystem error type
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("wrong object type")]
    WrongType,
    #[error("directory not empty")]
    NotEmpty,
    #[error("busy")]
    Busy,
    #[error("share reservation conflict")]
    ShareDenied,
    #[error("not opened for this access")]
    NotOpened,
    #[error("stale")]
    Stale,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("name not allowed")]
    InvalidName,
    #[error("malformed wire handle")]
    BadHandle,
    #[error("out of memory")]
    OutOfMemory,
    #[error("unsupported")]
    Unsupported,
}

pub type FsResult<T> = Result<T, FsError>;
