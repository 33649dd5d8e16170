// SPDX-License-Identifier: Apache-2.0

//! Manager-specific error wrapper over the shared [`common::Error`]
//! taxonomy, for the handful of failure modes that only make sense on this
//! side of the wire (bad scheduler/store configuration at startup).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] common::Error),

    #[error("invalid manager configuration: {0}")]
    Config(String),
}
