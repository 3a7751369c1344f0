//! Robots, tasks and the persisted catalog snapshot

use serde::{Deserialize, Serialize};
use std::fmt;

/// Robot identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RobotId(String);

/// Task (skill) identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            /// Allocate a fresh random identifier
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(RobotId);
string_id!(TaskId);

/// Task lifecycle
///
/// `Pending --start--> Running --stop--> Stopped`. A stopped task may be
/// started again. `Removed` is terminal and only reached when the task or
/// its robot is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Stopped,
    Removed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Removed => "removed",
        }
    }

    /// Whether a start may be attempted from this state
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Pending | Self::Stopped)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A skill: one containerized task owned by a robot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub image: String,
    pub state: TaskState,
    /// Owning robot, resolved through the registry
    #[serde(skip)]
    pub robot: Option<RobotId>,
}

impl Task {
    /// New pending task for `image`, owned by `robot`
    pub fn new(robot: &RobotId, image: impl Into<String>) -> Self {
        Self {
            id: TaskId::generate(),
            image: image.into(),
            state: TaskState::Pending,
            robot: Some(robot.clone()),
        }
    }
}

/// A logical agent accumulating skills in teaching order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Robot {
    pub id: RobotId,
    pub skills: Vec<Task>,
}

impl Robot {
    pub fn new() -> Self {
        Self {
            id: RobotId::generate(),
            skills: Vec::new(),
        }
    }

    pub fn knows_image(&self, image: &str) -> bool {
        self.skills.iter().any(|t| t.image == image)
    }

    pub fn position_of(&self, task: &TaskId) -> Option<usize> {
        self.skills.iter().position(|t| &t.id == task)
    }
}

impl Default for Robot {
    fn default() -> Self {
        Self::new()
    }
}

/// Persisted catalog, `{ "robots": [ { "id", "skills": [ { "id", "image" } ] } ] }`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub robots: Vec<RobotRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RobotRecord {
    pub id: RobotId,
    #[serde(default)]
    pub skills: Vec<TaskRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub image: String,
}

impl Snapshot {
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn task_count(&self) -> usize {
        self.robots.iter().map(|r| r.skills.len()).sum()
    }
}

impl From<&Robot> for RobotRecord {
    fn from(robot: &Robot) -> Self {
        Self {
            id: robot.id.clone(),
            skills: robot
                .skills
                .iter()
                .map(|t| TaskRecord {
                    id: t.id.clone(),
                    image: t.image.clone(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_robot_descriptor_shape() {
        let mut robot = Robot::new();
        let mut task = Task::new(&robot.id, "worker:v1");
        task.state = TaskState::Running;
        robot.skills.push(task);

        let json = serde_json::to_value(&robot).unwrap();
        assert!(json["id"].is_string());
        assert_eq!(json["skills"][0]["image"], "worker:v1");
        assert_eq!(json["skills"][0]["state"], "running");
        // back-reference never leaves the process
        assert!(json["skills"][0].get("robot").is_none());
    }

    #[test]
    fn test_snapshot_ignores_transient_fields() {
        let raw = r#"{"robots":[{"id":"r1","skills":[{"id":"t1","image":"a:1","state":"running"}]}]}"#;
        let snapshot = Snapshot::from_json(raw).unwrap();
        assert_eq!(snapshot.robots[0].id.as_str(), "r1");
        assert_eq!(snapshot.robots[0].skills[0].image, "a:1");
        assert_eq!(snapshot.task_count(), 1);

        let out = serde_json::to_value(&snapshot).unwrap();
        assert!(out["robots"][0]["skills"][0].get("state").is_none());
    }

    #[test]
    fn test_empty_template_parses() {
        let snapshot = Snapshot::from_json("{\"robots\": []}").unwrap();
        assert!(snapshot.robots.is_empty());
        assert_eq!(Snapshot::from_json("{}").unwrap(), Snapshot::default());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(RobotId::generate(), RobotId::generate());
        assert_ne!(TaskId::generate(), TaskId::generate());
    }

    #[test]
    fn test_can_start() {
        assert!(TaskState::Pending.can_start());
        assert!(TaskState::Stopped.can_start());
        assert!(!TaskState::Running.can_start());
        assert!(!TaskState::Removed.can_start());
    }
}
