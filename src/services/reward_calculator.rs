use async_trait::async_trait;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::errors::{AppError, Result};
use crate::models::{Task, TaskType};

/// Something that can be asked for a free-text reward suggestion.
#[async_trait]
pub trait RewardSuggester: Send + Sync {
    async fn suggest(&self, prompt: &str) -> Result<String>;
}

/// Turns a completed task into a dollar reward.
///
/// With a suggester configured the model's answer is used, clamped to
/// [1, 50]. Any failure on that path (timeout, transport, unparseable reply)
/// falls back to [`fallback_reward`], so `calculate` never fails.
#[derive(Clone)]
pub struct RewardCalculator {
    suggester: Option<Arc<dyn RewardSuggester>>,
    timeout: Duration,
}

impl RewardCalculator {
    pub fn new(suggester: Option<Arc<dyn RewardSuggester>>, timeout: Duration) -> Self {
        Self { suggester, timeout }
    }

    /// Fallback formula only.
    pub fn offline() -> Self {
        Self::new(None, Duration::from_secs(5))
    }

    pub async fn calculate(&self, task: &Task) -> Decimal {
        let Some(suggester) = &self.suggester else {
            return fallback_reward(task);
        };

        match self.suggested_reward(suggester.as_ref(), task).await {
            Ok(reward) => {
                info!("💡 Suggested reward {} for task {}", reward, task.id);
                reward
            }
            Err(e) => {
                let reward = fallback_reward(task);
                warn!("⚠️ {} - using fallback reward {} for task {}", e, reward, task.id);
                reward
            }
        }
    }

    async fn suggested_reward(&self, suggester: &dyn RewardSuggester, task: &Task) -> Result<Decimal> {
        let prompt = build_prompt(task);
        let text = tokio::time::timeout(self.timeout, suggester.suggest(&prompt))
            .await
            .map_err(|_| {
                AppError::UpstreamUnavailable(format!("timed out after {:?}", self.timeout))
            })??;

        parse_reward_suggestion(&text).ok_or_else(|| {
            AppError::UpstreamUnavailable(format!("could not parse reward from '{}'", text.trim()))
        })
    }
}

/// Hours between creation and completion, when the task has been completed.
pub fn completion_hours(task: &Task) -> Option<f64> {
    let completed_at = task.completed_at?;
    let elapsed = completed_at.signed_duration_since(task.created_at);
    Some(elapsed.num_milliseconds() as f64 / 3_600_000.0)
}

/// Deterministic reward: 5.00 base plus bonuses for type, detail and speed.
/// Floored at 1.00; there is no upper clamp here.
pub fn fallback_reward(task: &Task) -> Decimal {
    let mut reward = Decimal::new(500, 2);

    match task.task_type {
        TaskType::Urgent => reward += Decimal::new(300, 2),
        TaskType::Important => reward += Decimal::new(200, 2),
        _ => {}
    }

    if task.description.chars().count() > 100 {
        reward += Decimal::new(150, 2);
    }

    if task.completion_note.chars().count() > 50 {
        reward += Decimal::new(75, 2);
    }

    match completion_hours(task) {
        Some(hours) if hours < 2.0 => reward += Decimal::new(200, 2),
        Some(hours) if hours < 12.0 => reward += Decimal::new(100, 2),
        _ => {}
    }

    reward.round_dp(2).max(Decimal::ONE)
}

pub fn build_prompt(task: &Task) -> String {
    let completion_time = completion_hours(task)
        .map(|hours| format!("{:.1} hours", hours))
        .unwrap_or_else(|| "unknown".to_string());

    format!(
        "As an AI assistant for TaskHive, a task management platform, please analyze this \
         completed task and suggest an appropriate reward amount in dollars (between $1 and $50) \
         based on its complexity, effort required, and time taken. Please return ONLY a number \
         with up to 2 decimal places, nothing else.\n\
         \n\
         Task details:\n\
         - Title: {}\n\
         - Description: {}\n\
         - Type: {}\n\
         - Completion note: {}\n\
         - Completion time: {}\n\
         \n\
         Reward amount in dollars (just the number, e.g., 15.75):",
        task.title,
        task.description,
        task.task_type.as_str(),
        task.completion_note,
        completion_time,
    )
}

/// First `digits[.digits]` token in `text`, clamped to [1, 50] and rounded
/// to cents.
pub fn parse_reward_suggestion(text: &str) -> Option<Decimal> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let rest = &text[start..];

    let int_len = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    let mut end = int_len;
    if rest[int_len..].starts_with('.') {
        let frac = &rest[int_len + 1..];
        let frac_len = frac.find(|c: char| !c.is_ascii_digit()).unwrap_or(frac.len());
        if frac_len > 0 {
            end = int_len + 1 + frac_len;
        }
    }

    let value = Decimal::from_str(&rest[..end]).ok()?;
    Some(value.clamp(Decimal::ONE, Decimal::from(50)).round_dp(2))
}
