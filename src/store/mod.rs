//! Persistence port for users, tasks and reward ledgers.
//!
//! Every method is one atomic unit of work. Lifecycle writes are
//! compare-and-set on the task status: they return `None` when the task is
//! no longer in the expected state, which callers report as `InvalidState`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::errors::Result;
use crate::models::{
    LeaderboardEntry, LocationCoords, RewardLedger, Task, TaskStatus, TaskType, TaskView, User,
    UserSummary,
};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub user_id: Uuid,
    pub password_hash: String,
}

#[derive(Debug, Clone)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub task_type: TaskType,
    pub location: Option<String>,
    pub location_coords: Option<LocationCoords>,
    pub time_window: i32,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Moves a task from `expected` to awaiting-verification.
#[derive(Debug, Clone)]
pub struct Completion {
    pub task_id: Uuid,
    pub actor: Uuid,
    pub expected: TaskStatus,
    pub note: String,
    pub at: DateTime<Utc>,
}

/// A reward credit that already passed ledger validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Credit {
    pub user_id: Uuid,
    pub task_id: Uuid,
    pub task_title: String,
    pub amount: Decimal,
    pub at: DateTime<Utc>,
}

/// Everything verify writes: task fields, creator and assignee stats, and
/// optionally the assignee's ledger credit.
#[derive(Debug, Clone)]
pub struct Verification {
    pub task_id: Uuid,
    pub rating: i32,
    pub note: String,
    pub at: DateTime<Utc>,
    pub credit: Option<Credit>,
}

#[derive(Debug, Clone)]
pub struct Redemption {
    pub user_id: Uuid,
    pub option: String,
    pub description: String,
    pub amount: Decimal,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RedeemOutcome {
    Redeemed(RewardLedger),
    Insufficient { available: Decimal },
    MissingLedger,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Short name used in logs and the health endpoint
    fn backend(&self) -> &'static str;

    async fn ping(&self) -> Result<()>;

    // Users

    /// Fails with `Conflict` when the email is taken.
    async fn create_user(&self, user: NewUser) -> Result<User>;
    async fn find_credentials(&self, email: &str) -> Result<Option<Credentials>>;
    async fn get_user(&self, id: Uuid) -> Result<Option<User>>;
    async fn user_summaries(&self, ids: &[Uuid]) -> Result<Vec<UserSummary>>;

    // Tasks

    /// Inserts the task and bumps the owner's created counter.
    async fn insert_task(&self, task: NewTask) -> Result<Task>;
    async fn get_task(&self, id: Uuid) -> Result<Option<Task>>;
    /// Newest first.
    async fn list_tasks(&self, viewer: Uuid, view: TaskView) -> Result<Vec<Task>>;
    /// available -> in-progress.
    async fn assign_task(&self, id: Uuid, assignee: Uuid, at: DateTime<Utc>)
        -> Result<Option<Task>>;
    /// Sets the assignee when missing and bumps the actor's completed counter.
    async fn complete_task(&self, completion: Completion) -> Result<Option<Task>>;
    /// awaiting-verification -> verified, including stats, rating history
    /// and the optional credit.
    async fn verify_task(&self, verification: Verification) -> Result<Option<Task>>;
    /// Deletes only while available.
    async fn delete_task(&self, id: Uuid) -> Result<bool>;

    // Rewards

    async fn get_ledger(&self, user_id: Uuid) -> Result<Option<RewardLedger>>;
    async fn get_or_create_ledger(&self, user_id: Uuid) -> Result<RewardLedger>;
    async fn credit(&self, credit: Credit) -> Result<RewardLedger>;
    /// Records a reward on a verified task that has none yet and credits the
    /// recipient. `None` when the task is not verified or already rewarded.
    async fn award_task_reward(&self, credit: Credit) -> Result<Option<(RewardLedger, Task)>>;
    async fn redeem(&self, redemption: Redemption) -> Result<RedeemOutcome>;
    /// Ordered by total earned, ties in ledger creation order.
    async fn leaderboard(&self, limit: i64) -> Result<Vec<LeaderboardEntry>>;
}
