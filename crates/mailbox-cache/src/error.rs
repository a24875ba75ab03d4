/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Error types for the mailbox cache layer

use shared_store::StoreError;

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Mailbox cache errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The distributed store failed or was unreachable. Never degraded
    /// silently; the caller decides whether to fail or retry.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Invalid cache configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A cached value could not be reconstructed
    #[error("Decode error: {0}")]
    Decode(String),

    /// Operation attempted through a detached or deleted shared-state handle
    #[error("Stale shared-state handle: {0}")]
    StaleHandle(String),

    /// A cross-process watch request failed
    #[error("Remote mailbox error: {0}")]
    Remote(String),
}
