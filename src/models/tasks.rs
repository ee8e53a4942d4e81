use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

use crate::models::UserSummary;

/// Lifecycle stage of a task. Transitions only ever move forward:
/// available -> in-progress -> awaiting-verification -> verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "task_status", rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Available,
    InProgress,
    AwaitingVerification,
    Verified,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Available => "available",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::AwaitingVerification => "awaiting-verification",
            TaskStatus::Verified => "verified",
        }
    }

    /// The only status reachable from this one, `None` for the terminal state.
    pub fn next(&self) -> Option<TaskStatus> {
        match self {
            TaskStatus::Available => Some(TaskStatus::InProgress),
            TaskStatus::InProgress => Some(TaskStatus::AwaitingVerification),
            TaskStatus::AwaitingVerification => Some(TaskStatus::Verified),
            TaskStatus::Verified => None,
        }
    }

    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        self.next() == Some(target)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "task_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Delivery,
    Errand,
    Assistance,
    Repairs,
    Urgent,
    Important,
    Routine,
    Other,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Delivery => "delivery",
            TaskType::Errand => "errand",
            TaskType::Assistance => "assistance",
            TaskType::Repairs => "repairs",
            TaskType::Urgent => "urgent",
            TaskType::Important => "important",
            TaskType::Routine => "routine",
            TaskType::Other => "other",
        }
    }
}

impl Default for TaskType {
    fn default() -> Self {
        TaskType::Other
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "delivery" => Ok(TaskType::Delivery),
            "errand" => Ok(TaskType::Errand),
            "assistance" => Ok(TaskType::Assistance),
            "repairs" => Ok(TaskType::Repairs),
            "urgent" => Ok(TaskType::Urgent),
            "important" => Ok(TaskType::Important),
            "routine" => Ok(TaskType::Routine),
            "other" => Ok(TaskType::Other),
            other => Err(format!("Unknown task type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct LocationCoords {
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: Option<f64>,
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: Option<f64>,
    pub address: Option<String>,
}

impl LocationCoords {
    pub fn is_empty(&self) -> bool {
        self.latitude.is_none() && self.longitude.is_none() && self.address.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub location: Option<String>,
    pub location_coords: Option<LocationCoords>,
    /// Minutes the creator expects the task to take.
    pub time_window: i32,
    pub created_by: Uuid,
    pub assigned_to: Option<Uuid>,
    pub completion_note: String,
    pub verification_note: String,
    pub task_rating: Option<i32>,
    pub reward_amount: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn is_involved(&self, user_id: Uuid) -> bool {
        self.created_by == user_id || self.assigned_to == Some(user_id)
    }
}

/// Which tasks `GET /api/tasks` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskView {
    /// Created by or assigned to the viewer
    #[default]
    Mine,
    Created,
    Assigned,
    /// Every available task, regardless of owner
    Available,
}

impl FromStr for TaskView {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mine" => Ok(TaskView::Mine),
            "created" => Ok(TaskView::Created),
            "assigned" => Ok(TaskView::Assigned),
            "available" => Ok(TaskView::Available),
            other => Err(format!(
                "Unknown view '{}', expected one of mine, created, assigned, available",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TaskListParams {
    pub view: Option<String>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub task_type: Option<String>,
    pub location: Option<String>,
    #[validate(nested)]
    pub location_coords: Option<LocationCoords>,
    /// Number or numeric string, anything else falls back to the default window
    pub time_window: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteTaskRequest {
    pub completion_note: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyTaskRequest {
    #[validate(required(message = "Rating is required"), range(min = 1, max = 5, message = "Rating must be between 1 and 5"))]
    pub rating: Option<i32>,
    pub note: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResponse {
    #[serde(flatten)]
    pub task: Task,
    pub creator: Option<UserSummary>,
    pub assignee: Option<UserSummary>,
}

#[derive(Debug, Serialize)]
pub struct VerifyTaskResponse {
    #[serde(flatten)]
    pub task: TaskResponse,
    /// `None` when the reward could not be recorded at verification time
    pub reward: Option<Decimal>,
}
