// SPDX-License-Identifier: Apache-2.0

//! Worker-specific error wrapper over the shared [`common::Error`]
//! taxonomy, for failure modes that only make sense on this side of the
//! wire (bad runtime/store configuration at startup).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] common::Error),

    #[error("invalid worker configuration: {0}")]
    Config(String),
}
