//! In-process store for local development and tests.
//!
//! All tables sit behind one `RwLock`; each trait method holds the write
//! guard for its entire read-modify-write, so operations are atomic with
//! respect to each other just like the Postgres transactions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    Completion, Credentials, Credit, NewTask, NewUser, RedeemOutcome, Redemption, Store,
    Verification,
};
use crate::errors::{AppError, Result};
use crate::models::{
    LeaderboardEntry, LedgerEntry, LedgerEntryKind, Rating, RewardLedger, Role, Task, TaskStats,
    TaskStatus, TaskView, User, UserSummary,
};

struct UserRow {
    user: User,
    password_hash: String,
}

#[derive(Default)]
struct Tables {
    // Vecs keep insertion order, which is the tie-break for listings
    users: Vec<UserRow>,
    tasks: Vec<Task>,
    ledgers: Vec<RewardLedger>,
}

impl Tables {
    fn user_mut(&mut self, id: Uuid) -> Option<&mut User> {
        self.users.iter_mut().map(|row| &mut row.user).find(|u| u.id == id)
    }

    fn task_mut(&mut self, id: Uuid) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    fn ledger_mut(&mut self, user_id: Uuid, now: DateTime<Utc>) -> &mut RewardLedger {
        let index = match self.ledgers.iter().position(|l| l.user_id == user_id) {
            Some(index) => index,
            None => {
                self.ledgers.push(RewardLedger::empty(user_id, now));
                self.ledgers.len() - 1
            }
        };
        &mut self.ledgers[index]
    }

    fn apply_credit(&mut self, credit: &Credit) -> RewardLedger {
        let ledger = self.ledger_mut(credit.user_id, credit.at);
        ledger.total_earned += credit.amount;
        ledger.available_balance += credit.amount;
        ledger.last_updated = credit.at;
        ledger.history.insert(
            0,
            LedgerEntry {
                id: Uuid::new_v4(),
                task_id: Some(credit.task_id),
                task_title: Some(credit.task_title.clone()),
                amount: credit.amount,
                kind: LedgerEntryKind::Earned,
                description: None,
                date: credit.at,
            },
        );
        ledger.clone()
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn create_user(&self, new_user: NewUser) -> Result<User> {
        let mut tables = self.tables.write().await;
        if tables.users.iter().any(|row| row.user.email == new_user.email) {
            return Err(AppError::Conflict("User already exists".to_string()));
        }

        let user = User {
            id: Uuid::new_v4(),
            name: new_user.name,
            email: new_user.email,
            profile_pic: String::new(),
            role: Role::User,
            created_at: Utc::now(),
            task_stats: TaskStats::default(),
            ratings: Vec::new(),
        };
        tables.users.push(UserRow {
            user: user.clone(),
            password_hash: new_user.password_hash,
        });
        Ok(user)
    }

    async fn find_credentials(&self, email: &str) -> Result<Option<Credentials>> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .iter()
            .find(|row| row.user.email == email)
            .map(|row| Credentials {
                user_id: row.user.id,
                password_hash: row.password_hash.clone(),
            }))
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .iter()
            .find(|row| row.user.id == id)
            .map(|row| row.user.clone()))
    }

    async fn user_summaries(&self, ids: &[Uuid]) -> Result<Vec<UserSummary>> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .iter()
            .filter(|row| ids.contains(&row.user.id))
            .map(|row| UserSummary {
                id: row.user.id,
                name: row.user.name.clone(),
                profile_pic: row.user.profile_pic.clone(),
            })
            .collect())
    }

    async fn insert_task(&self, new_task: NewTask) -> Result<Task> {
        let mut tables = self.tables.write().await;
        let owner = tables
            .user_mut(new_task.created_by)
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
        owner.task_stats.created += 1;

        let task = Task {
            id: Uuid::new_v4(),
            title: new_task.title,
            description: new_task.description,
            task_type: new_task.task_type,
            status: TaskStatus::Available,
            location: new_task.location,
            location_coords: new_task.location_coords,
            time_window: new_task.time_window,
            created_by: new_task.created_by,
            assigned_to: None,
            completion_note: String::new(),
            verification_note: String::new(),
            task_rating: None,
            reward_amount: None,
            created_at: new_task.created_at,
            assigned_at: None,
            completed_at: None,
            verified_at: None,
        };
        tables.tasks.push(task.clone());
        Ok(task)
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>> {
        let tables = self.tables.read().await;
        Ok(tables.tasks.iter().find(|t| t.id == id).cloned())
    }

    async fn list_tasks(&self, viewer: Uuid, view: TaskView) -> Result<Vec<Task>> {
        let tables = self.tables.read().await;
        Ok(tables
            .tasks
            .iter()
            .rev()
            .filter(|t| match view {
                TaskView::Mine => t.is_involved(viewer),
                TaskView::Created => t.created_by == viewer,
                TaskView::Assigned => t.assigned_to == Some(viewer),
                TaskView::Available => t.status == TaskStatus::Available,
            })
            .cloned()
            .collect())
    }

    async fn assign_task(
        &self,
        id: Uuid,
        assignee: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Task>> {
        let mut tables = self.tables.write().await;
        let Some(task) = tables.task_mut(id) else {
            return Ok(None);
        };
        if task.status != TaskStatus::Available {
            return Ok(None);
        }

        task.status = TaskStatus::InProgress;
        task.assigned_to = Some(assignee);
        task.assigned_at = Some(at);
        Ok(Some(task.clone()))
    }

    async fn complete_task(&self, completion: Completion) -> Result<Option<Task>> {
        let mut tables = self.tables.write().await;
        let Some(task) = tables.task_mut(completion.task_id) else {
            return Ok(None);
        };
        if task.status != completion.expected {
            return Ok(None);
        }

        task.status = TaskStatus::AwaitingVerification;
        task.assigned_to = task.assigned_to.or(Some(completion.actor));
        if task.assigned_at.is_none() {
            task.assigned_at = Some(completion.at);
        }
        task.completed_at = Some(completion.at);
        task.completion_note = completion.note;
        let task = task.clone();

        if let Some(actor) = tables.user_mut(completion.actor) {
            actor.task_stats.completed += 1;
        }
        Ok(Some(task))
    }

    async fn verify_task(&self, verification: Verification) -> Result<Option<Task>> {
        let mut tables = self.tables.write().await;
        let Some(task) = tables.task_mut(verification.task_id) else {
            return Ok(None);
        };
        if task.status != TaskStatus::AwaitingVerification {
            return Ok(None);
        }

        task.status = TaskStatus::Verified;
        task.verified_at = Some(verification.at);
        task.task_rating = Some(verification.rating);
        task.verification_note = verification.note;
        task.reward_amount = verification.credit.as_ref().map(|c| c.amount);
        let task = task.clone();

        if let Some(creator) = tables.user_mut(task.created_by) {
            creator.task_stats.verified += 1;
        }
        if let Some(assignee) = task.assigned_to.and_then(|id| tables.user_mut(id)) {
            assignee.ratings.push(Rating {
                task_id: task.id,
                rating: verification.rating,
                as_completer: true,
                date: verification.at,
            });
            let completer: Vec<i32> = assignee
                .ratings
                .iter()
                .filter(|r| r.as_completer)
                .map(|r| r.rating)
                .collect();
            assignee.task_stats.avg_rating =
                completer.iter().sum::<i32>() as f64 / completer.len() as f64;
        }
        if let Some(credit) = &verification.credit {
            tables.apply_credit(credit);
        }

        Ok(Some(task))
    }

    async fn delete_task(&self, id: Uuid) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let before = tables.tasks.len();
        tables
            .tasks
            .retain(|t| !(t.id == id && t.status == TaskStatus::Available));
        Ok(tables.tasks.len() < before)
    }

    async fn get_ledger(&self, user_id: Uuid) -> Result<Option<RewardLedger>> {
        let tables = self.tables.read().await;
        Ok(tables.ledgers.iter().find(|l| l.user_id == user_id).cloned())
    }

    async fn get_or_create_ledger(&self, user_id: Uuid) -> Result<RewardLedger> {
        let mut tables = self.tables.write().await;
        Ok(tables.ledger_mut(user_id, Utc::now()).clone())
    }

    async fn credit(&self, credit: Credit) -> Result<RewardLedger> {
        let mut tables = self.tables.write().await;
        Ok(tables.apply_credit(&credit))
    }

    async fn award_task_reward(&self, credit: Credit) -> Result<Option<(RewardLedger, Task)>> {
        let mut tables = self.tables.write().await;
        let Some(task) = tables.task_mut(credit.task_id) else {
            return Ok(None);
        };
        if task.status != TaskStatus::Verified || task.reward_amount.is_some() {
            return Ok(None);
        }

        task.reward_amount = Some(credit.amount);
        let task = task.clone();
        let ledger = tables.apply_credit(&credit);
        Ok(Some((ledger, task)))
    }

    async fn redeem(&self, redemption: Redemption) -> Result<RedeemOutcome> {
        let mut tables = self.tables.write().await;
        let Some(ledger) = tables
            .ledgers
            .iter_mut()
            .find(|l| l.user_id == redemption.user_id)
        else {
            return Ok(RedeemOutcome::MissingLedger);
        };
        if ledger.available_balance < redemption.amount {
            return Ok(RedeemOutcome::Insufficient {
                available: ledger.available_balance,
            });
        }

        ledger.available_balance -= redemption.amount;
        ledger.last_updated = redemption.at;
        ledger.history.insert(
            0,
            LedgerEntry {
                id: Uuid::new_v4(),
                task_id: None,
                task_title: None,
                amount: redemption.amount,
                kind: LedgerEntryKind::Spent,
                description: Some(redemption.description),
                date: redemption.at,
            },
        );
        Ok(RedeemOutcome::Redeemed(ledger.clone()))
    }

    async fn leaderboard(&self, limit: i64) -> Result<Vec<LeaderboardEntry>> {
        let tables = self.tables.read().await;
        let mut ranked: Vec<&RewardLedger> = tables.ledgers.iter().collect();
        // stable sort keeps creation order among equal totals
        ranked.sort_by(|a, b| b.total_earned.cmp(&a.total_earned));

        Ok(ranked
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|ledger| LeaderboardEntry {
                user_id: ledger.user_id,
                user_name: tables
                    .users
                    .iter()
                    .find(|row| row.user.id == ledger.user_id)
                    .map(|row| row.user.name.clone())
                    .unwrap_or_else(|| "Unknown User".to_string()),
                total_earned: ledger.total_earned,
            })
            .collect())
    }
}
