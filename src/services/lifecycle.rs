//! Task state machine.
//!
//! ```text
//! available --accept--> in-progress --complete--> awaiting-verification --verify--> verified
//! ```
//!
//! Every operation takes the acting user explicitly. Checks run in a fixed
//! order (input, existence, then ownership and status; accept checks status
//! first) and every status check goes through
//! [`TaskStatus::can_transition_to`]. The final write is a
//! compare-and-set in the store, so a lost race surfaces as `InvalidState`
//! without touching the task.

use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use super::ledger::validate_credit_amount;
use super::{OwnershipPolicy, RewardCalculator};
use crate::errors::{AppError, Result};
use crate::models::{
    CreateTaskRequest, Task, TaskResponse, TaskStatus, TaskType, TaskView, UserSummary,
};
use crate::store::{Completion, Credit, NewTask, Store, Verification};

pub const DEFAULT_TIME_WINDOW: i32 = 60;

/// Outcome of a verification: the task and the reward actually recorded.
#[derive(Debug, Clone)]
pub struct Verified {
    pub task: Task,
    pub reward: Option<Decimal>,
}

#[derive(Clone)]
pub struct TaskLifecycle {
    store: Arc<dyn Store>,
    rewards: RewardCalculator,
    policy: OwnershipPolicy,
}

impl TaskLifecycle {
    pub fn new(store: Arc<dyn Store>, rewards: RewardCalculator, policy: OwnershipPolicy) -> Self {
        Self {
            store,
            rewards,
            policy,
        }
    }

    pub async fn create(&self, owner: Uuid, request: CreateTaskRequest) -> Result<Task> {
        request.validate()?;

        let title = required_text(request.title.as_deref(), "Title")?;
        let description = required_text(request.description.as_deref(), "Description")?;
        let task_type = match request.task_type.as_deref().map(str::trim) {
            None | Some("") => TaskType::default(),
            Some(raw) => raw.parse::<TaskType>().map_err(AppError::Validation)?,
        };
        let location = request
            .location
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty());
        let location_coords = request.location_coords.filter(|c| !c.is_empty());

        let task = self
            .store
            .insert_task(NewTask {
                title,
                description,
                task_type,
                location,
                location_coords,
                time_window: parse_time_window(request.time_window.as_ref()),
                created_by: owner,
                created_at: Utc::now(),
            })
            .await?;

        info!("📝 Task {} created by {}", task.id, owner);
        Ok(task)
    }

    pub async fn accept(&self, task_id: Uuid, actor: Uuid) -> Result<Task> {
        let task = self.load(task_id).await?;

        // A task that is no longer available is InvalidState for everyone,
        // the creator included.
        if !task.status.can_transition_to(TaskStatus::InProgress) {
            return Err(not_in_state(&task, TaskStatus::InProgress));
        }
        if task.created_by == actor {
            if !self.policy.relaxed {
                return Err(AppError::Forbidden(
                    "You cannot accept your own task".to_string(),
                ));
            }
            warn!("⚠️ Relaxed ownership: creator {} accepting own task {}", actor, task_id);
        }

        let task = self
            .store
            .assign_task(task_id, actor, Utc::now())
            .await?
            .ok_or_else(|| {
                AppError::InvalidState("Task was accepted by someone else".to_string())
            })?;

        info!("🤝 Task {} accepted by {}", task_id, actor);
        Ok(task)
    }

    pub async fn complete(&self, task_id: Uuid, actor: Uuid, note: Option<String>) -> Result<Task> {
        let task = self.load(task_id).await?;

        let expected = if task.status.can_transition_to(TaskStatus::AwaitingVerification) {
            task.status
        } else if self.policy.relaxed && task.status == TaskStatus::Available {
            warn!("⚠️ Relaxed ownership: completing task {} straight from available", task_id);
            TaskStatus::Available
        } else {
            return Err(not_in_state(&task, TaskStatus::AwaitingVerification));
        };

        let is_assignee = task.assigned_to == Some(actor);
        if !is_assignee {
            let creator_allowed = self.policy.relaxed && task.created_by == actor;
            let unclaimed_allowed = self.policy.relaxed && task.assigned_to.is_none();
            if !(creator_allowed || unclaimed_allowed) {
                return Err(AppError::Forbidden(
                    "Only the assigned user can complete this task".to_string(),
                ));
            }
            warn!("⚠️ Relaxed ownership: {} completing task {} as non-assignee", actor, task_id);
        }

        let task = self
            .store
            .complete_task(Completion {
                task_id,
                actor,
                expected,
                note: note.map(|n| n.trim().to_string()).unwrap_or_default(),
                at: Utc::now(),
            })
            .await?
            .ok_or_else(|| AppError::InvalidState("Task changed state, try again".to_string()))?;

        info!("✅ Task {} completed by {}", task_id, actor);
        Ok(task)
    }

    /// Rates the work and pays the assignee. The reward is dropped (and
    /// logged) when the calculator produces an amount the ledger refuses.
    pub async fn verify(
        &self,
        task_id: Uuid,
        actor: Uuid,
        rating: Option<i32>,
        note: Option<String>,
    ) -> Result<Verified> {
        let rating = match rating {
            Some(r) if (1..=5).contains(&r) => r,
            _ => {
                return Err(AppError::Validation(
                    "Rating must be between 1 and 5".to_string(),
                ))
            }
        };

        let task = self.load(task_id).await?;
        if task.created_by != actor {
            return Err(AppError::Forbidden(
                "Only the task creator can verify this task".to_string(),
            ));
        }
        if !task.status.can_transition_to(TaskStatus::Verified) {
            return Err(not_in_state(&task, TaskStatus::Verified));
        }

        let amount = self.rewards.calculate(&task).await;
        let credit = match (task.assigned_to, validate_credit_amount(amount)) {
            (Some(assignee), Ok(amount)) => Some(Credit {
                user_id: assignee,
                task_id,
                task_title: task.title.clone(),
                amount,
                at: Utc::now(),
            }),
            (_, Err(e)) => {
                warn!("⚠️ Reward for task {} omitted: {}", task_id, e);
                None
            }
            (None, Ok(_)) => None,
        };
        let reward = credit.as_ref().map(|c| c.amount);

        let task = self
            .store
            .verify_task(Verification {
                task_id,
                rating,
                note: note.map(|n| n.trim().to_string()).unwrap_or_default(),
                at: Utc::now(),
                credit,
            })
            .await?
            .ok_or_else(|| AppError::InvalidState("Task changed state, try again".to_string()))?;

        info!(
            "🏅 Task {} verified by {} with rating {} (reward {:?})",
            task_id, actor, rating, reward
        );
        Ok(Verified { task, reward })
    }

    pub async fn delete(&self, task_id: Uuid, actor: Uuid) -> Result<()> {
        let task = self.load(task_id).await?;
        if task.created_by != actor {
            return Err(AppError::Forbidden(
                "Only the task creator can delete this task".to_string(),
            ));
        }
        if task.status != TaskStatus::Available {
            return Err(AppError::InvalidState(format!(
                "Only available tasks can be deleted (currently {})",
                task.status
            )));
        }

        if !self.store.delete_task(task_id).await? {
            return Err(AppError::InvalidState(
                "Task was accepted before it could be deleted".to_string(),
            ));
        }

        info!("🗑️ Task {} deleted by {}", task_id, actor);
        Ok(())
    }

    pub async fn get(&self, task_id: Uuid, viewer: Uuid) -> Result<Task> {
        let task = self.load(task_id).await?;
        if task.status != TaskStatus::Available && !task.is_involved(viewer) {
            return Err(AppError::Forbidden(
                "You are not involved in this task".to_string(),
            ));
        }
        Ok(task)
    }

    pub async fn list(&self, viewer: Uuid, view: TaskView) -> Result<Vec<Task>> {
        self.store.list_tasks(viewer, view).await
    }

    /// Reward the task would earn right now, nothing is persisted.
    pub async fn preview_reward(&self, task_id: Uuid, viewer: Uuid) -> Result<Decimal> {
        let task = self.load(task_id).await?;
        if !task.is_involved(viewer) {
            return Err(AppError::Forbidden(
                "Only the task creator or assignee can calculate its reward".to_string(),
            ));
        }
        Ok(self.rewards.calculate(&task).await)
    }

    /// Attaches creator and assignee summaries.
    pub async fn with_people(&self, tasks: Vec<Task>) -> Result<Vec<TaskResponse>> {
        let mut ids: Vec<Uuid> = tasks
            .iter()
            .flat_map(|t| std::iter::once(t.created_by).chain(t.assigned_to))
            .collect();
        ids.sort_unstable();
        ids.dedup();

        let people: HashMap<Uuid, UserSummary> = self
            .store
            .user_summaries(&ids)
            .await?
            .into_iter()
            .map(|s| (s.id, s))
            .collect();

        Ok(tasks
            .into_iter()
            .map(|task| TaskResponse {
                creator: people.get(&task.created_by).cloned(),
                assignee: task.assigned_to.and_then(|id| people.get(&id).cloned()),
                task,
            })
            .collect())
    }

    pub async fn with_people_one(&self, task: Task) -> Result<TaskResponse> {
        self.with_people(vec![task])
            .await?
            .pop()
            .ok_or_else(|| AppError::Internal("task vanished while loading people".to_string()))
    }

    async fn load(&self, task_id: Uuid) -> Result<Task> {
        self.store
            .get_task(task_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Task not found".to_string()))
    }
}

fn required_text(value: Option<&str>, field: &str) -> Result<String> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(AppError::Validation(format!("{} is required", field))),
    }
}

fn not_in_state(task: &Task, target: TaskStatus) -> AppError {
    AppError::InvalidState(format!(
        "Task is {}, cannot move to {}",
        task.status, target
    ))
}

/// Accepts a positive integer or a string holding one.
pub fn parse_time_window(raw: Option<&serde_json::Value>) -> i32 {
    let parsed = match raw {
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed
        .filter(|minutes| *minutes > 0)
        .and_then(|minutes| i32::try_from(minutes).ok())
        .unwrap_or(DEFAULT_TIME_WINDOW)
}
