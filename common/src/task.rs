// SPDX-License-Identifier: Apache-2.0

//! The Task record, its lifecycle state machine, and the TaskEvent intent
//! record that carries a desired state across the wire from manager to
//! worker.

use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Lifecycle state of a [`Task`]. Encoded on the wire as its ordinal
/// (`Pending = 0 … Failed = 4`) rather than its name, per the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
}

impl State {
    fn ordinal(self) -> u8 {
        match self {
            State::Pending => 0,
            State::Scheduled => 1,
            State::Running => 2,
            State::Completed => 3,
            State::Failed => 4,
        }
    }

    fn from_ordinal(v: u8) -> Option<Self> {
        match v {
            0 => Some(State::Pending),
            1 => Some(State::Scheduled),
            2 => Some(State::Running),
            3 => Some(State::Completed),
            4 => Some(State::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Pending => "Pending",
            State::Scheduled => "Scheduled",
            State::Running => "Running",
            State::Completed => "Completed",
            State::Failed => "Failed",
        };
        f.write_str(s)
    }
}

impl Serialize for State {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.ordinal())
    }
}

impl<'de> Deserialize<'de> for State {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = u8::deserialize(deserializer)?;
        State::from_ordinal(v).ok_or_else(|| serde::de::Error::custom(format!("invalid state ordinal {v}")))
    }
}

/// Total function over the task transition table in SPEC_FULL.md §4.1.
/// Self-transitions on `Scheduled` and `Running` are legal idempotent
/// re-applies; `Completed` is terminal; `Failed -> Scheduled` is the sole
/// restart edge.
pub fn valid_transition(src: State, dst: State) -> bool {
    use State::*;
    matches!(
        (src, dst),
        (Pending, Scheduled)
            | (Scheduled, Scheduled)
            | (Scheduled, Running)
            | (Scheduled, Failed)
            | (Running, Scheduled)
            | (Running, Running)
            | (Running, Completed)
            | (Running, Failed)
            | (Failed, Scheduled)
    )
}

/// A host-side port binding as reported by the container runtime after a
/// container reaches `Running`, e.g. `{"80/tcp": [{host_ip: "0.0.0.0",
/// host_port: "32768"}]}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct HostPortBinding {
    pub host_ip: String,
    pub host_port: String,
}

pub type HostPortMap = HashMap<String, Vec<HostPortBinding>>;

/// One container-to-be-run, identified by UUID. The sole consistency
/// contract shared by manager and worker: only [`valid_transition`] may
/// change `state`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub name: String,
    pub image: String,
    pub cpu: f64,
    pub memory: i64,
    pub disk: i64,
    pub exposed_ports: HashSet<String>,
    #[serde(default)]
    pub host_ports: HostPortMap,
    pub restart_policy: String,
    pub health_check: Option<String>,
    #[serde(default)]
    pub container_id: String,
    pub start_time: Option<DateTime<Utc>>,
    pub finish_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub restart_count: u32,
    pub state: State,
}

impl Task {
    /// A brand-new task, state `Pending`, with no runtime-derived fields
    /// populated yet.
    pub fn new(name: impl Into<String>, image: impl Into<String>, cpu: f64, memory: i64, disk: i64) -> Self {
        Task {
            id: Uuid::new_v4(),
            name: name.into(),
            image: image.into(),
            cpu,
            memory,
            disk,
            exposed_ports: HashSet::new(),
            host_ports: HashMap::new(),
            restart_policy: "always".to_string(),
            health_check: None,
            container_id: String::new(),
            start_time: None,
            finish_time: None,
            restart_count: 0,
            state: State::Pending,
        }
    }
}

/// An immutable intent record submitted to the manager: "bring this task to
/// this state". Events are the unit of communication from manager to
/// worker and, once stored, are never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub id: Uuid,
    pub state: State,
    pub timestamp: DateTime<Utc>,
    pub task: Task,
}

impl TaskEvent {
    pub fn new(state: State, task: Task) -> Self {
        TaskEvent {
            id: Uuid::new_v4(),
            state,
            timestamp: Utc::now(),
            task,
        }
    }
}

/// Derived view of a [`Task`] used to parameterize the container runtime.
/// Deliberately narrower than `Task`: it carries only what `run` needs to
/// create and start a container.
#[derive(Debug, Clone)]
pub struct Config {
    pub name: String,
    pub image: String,
    pub cpu: f64,
    pub memory: i64,
    pub disk: i64,
    pub exposed_ports: HashSet<String>,
    pub env: Vec<String>,
    pub restart_policy: String,
}

impl From<&Task> for Config {
    fn from(task: &Task) -> Self {
        Config {
            name: task.name.clone(),
            image: task.image.clone(),
            cpu: task.cpu,
            memory: task.memory,
            disk: task.disk,
            exposed_ports: task.exposed_ports.clone(),
            env: Vec::new(),
            restart_policy: task.restart_policy.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table_is_total_and_matches_spec() {
        use State::*;
        let cases = [
            (Pending, Pending, false),
            (Pending, Scheduled, true),
            (Pending, Running, false),
            (Pending, Completed, false),
            (Pending, Failed, false),
            (Scheduled, Pending, false),
            (Scheduled, Scheduled, true),
            (Scheduled, Running, true),
            (Scheduled, Completed, false),
            (Scheduled, Failed, true),
            (Running, Pending, false),
            (Running, Scheduled, true),
            (Running, Running, true),
            (Running, Completed, true),
            (Running, Failed, true),
            (Completed, Pending, false),
            (Completed, Scheduled, false),
            (Completed, Running, false),
            (Completed, Completed, false),
            (Completed, Failed, false),
            (Failed, Pending, false),
            (Failed, Scheduled, true),
            (Failed, Running, false),
            (Failed, Completed, false),
            (Failed, Failed, false),
        ];
        assert_eq!(cases.len(), 25);
        for (src, dst, expected) in cases {
            assert_eq!(
                valid_transition(src, dst),
                expected,
                "valid_transition({src:?}, {dst:?})"
            );
        }
    }

    #[test]
    fn state_round_trips_as_ordinal() {
        for (state, ordinal) in [
            (State::Pending, 0),
            (State::Scheduled, 1),
            (State::Running, 2),
            (State::Completed, 3),
            (State::Failed, 4),
        ] {
            let encoded = serde_json::to_string(&state).unwrap();
            assert_eq!(encoded, ordinal.to_string());
            let decoded: State = serde_json::from_str(&encoded).unwrap();
            assert_eq!(decoded, state);
        }
    }

    #[test]
    fn config_from_task_copies_resource_request() {
        let mut task = Task::new("web", "nginx", 0.25, 128, 1024);
        task.exposed_ports.insert("80/tcp".to_string());
        let config = Config::from(&task);
        assert_eq!(config.image, "nginx");
        assert_eq!(config.cpu, 0.25);
        assert_eq!(config.memory, 128);
        assert!(config.exposed_ports.contains("80/tcp"));
    }
}
