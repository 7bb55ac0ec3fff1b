// SPDX-License-Identifier: MIT

//! Errors surfaced by the engine crate's services.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Storage(#[from] healarr_storage::StorageError),

    #[error("publish failed after exhausting retries: {0}")]
    PublishExhausted(#[source] healarr_storage::StorageError),
}
