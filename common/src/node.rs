// SPDX-License-Identifier: Apache-2.0

//! A worker host as the scheduler and manager see it: capacity, current
//! allocation, and a stats snapshot refreshed from the worker's `/stats`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Worker,
    Manager,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stats {
    pub task_count: usize,
}

/// A worker addressable as `host:port`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub api: String,
    pub role: Role,
    pub memory: i64,
    pub memory_allocated: i64,
    pub disk: i64,
    pub disk_allocated: i64,
    pub task_count: usize,
    pub stats: Stats,
}

impl Node {
    pub fn new(name: impl Into<String>, api: impl Into<String>, role: Role) -> Self {
        Node {
            name: name.into(),
            api: api.into(),
            role,
            memory: 0,
            memory_allocated: 0,
            disk: 0,
            disk_allocated: 0,
            task_count: 0,
            stats: Stats::default(),
        }
    }
}
