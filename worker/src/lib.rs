// SPDX-License-Identifier: Apache-2.0

//! Worker binary library: the container-runtime adapter, the local
//! reconciliation loop, and the HTTP surface the manager dispatches to.

pub mod error;
pub mod routes;
pub mod runtime;
pub mod worker;

pub use worker::Worker;
