// SPDX-License-Identifier: Apache-2.0

//! Crate-wide error taxonomy, mirrored on both sides of the manager/worker
//! wire so a logged error always carries the same meaning.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid transition from {from:?} to {to:?}")]
    InvalidTransition { from: String, to: String },

    #[error("no candidate nodes for task {0}")]
    NoCandidates(String),

    #[error("unreachable: {0}")]
    Unreachable(String),

    #[error("container runtime failure: {0}")]
    RuntimeFailure(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("fatal startup error: {0}")]
    Fatal(String),
}
