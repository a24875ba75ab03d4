/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Error types for the shared-state store

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Shared-state store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing store could not be reached
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The backing store rejected or failed the operation
    #[error("Backend error: {0}")]
    Backend(String),

    /// A stored value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}
