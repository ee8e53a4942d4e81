use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use super::{
    Completion, Credentials, Credit, NewTask, NewUser, RedeemOutcome, Redemption, Store,
    Verification,
};
use crate::errors::{AppError, Result};
use crate::models::{
    LeaderboardEntry, LedgerEntry, LedgerEntryKind, LocationCoords, Rating, RewardLedger, Role,
    Task, TaskStats, TaskStatus, TaskType, TaskView, User, UserSummary,
};

const TASK_COLUMNS: &str = r#"
    id, title, description, task_type, status, location, latitude, longitude, address,
    time_window, created_by, assigned_to, completion_note, verification_note, task_rating,
    reward_amount, created_at, assigned_at, completed_at, verified_at
"#;

#[derive(Debug, FromRow)]
struct TaskRow {
    id: Uuid,
    title: String,
    description: String,
    task_type: TaskType,
    status: TaskStatus,
    location: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    address: Option<String>,
    time_window: i32,
    created_by: Uuid,
    assigned_to: Option<Uuid>,
    completion_note: String,
    verification_note: String,
    task_rating: Option<i32>,
    reward_amount: Option<Decimal>,
    created_at: DateTime<Utc>,
    assigned_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    verified_at: Option<DateTime<Utc>>,
}

impl From<TaskRow> for Task {
    fn from(row: TaskRow) -> Self {
        let coords = LocationCoords {
            latitude: row.latitude,
            longitude: row.longitude,
            address: row.address,
        };
        Task {
            id: row.id,
            title: row.title,
            description: row.description,
            task_type: row.task_type,
            status: row.status,
            location: row.location,
            location_coords: (!coords.is_empty()).then_some(coords),
            time_window: row.time_window,
            created_by: row.created_by,
            assigned_to: row.assigned_to,
            completion_note: row.completion_note,
            verification_note: row.verification_note,
            task_rating: row.task_rating,
            reward_amount: row.reward_amount,
            created_at: row.created_at,
            assigned_at: row.assigned_at,
            completed_at: row.completed_at,
            verified_at: row.verified_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    email: String,
    profile_pic: String,
    role: Role,
    tasks_created: i32,
    tasks_completed: i32,
    tasks_verified: i32,
    avg_rating: f64,
    created_at: DateTime<Utc>,
}

impl UserRow {
    fn into_user(self, ratings: Vec<Rating>) -> User {
        User {
            id: self.id,
            name: self.name,
            email: self.email,
            profile_pic: self.profile_pic,
            role: self.role,
            created_at: self.created_at,
            task_stats: TaskStats {
                created: self.tasks_created,
                completed: self.tasks_completed,
                verified: self.tasks_verified,
                avg_rating: self.avg_rating,
            },
            ratings,
        }
    }
}

#[derive(Debug, FromRow)]
struct LedgerRow {
    user_id: Uuid,
    total_earned: Decimal,
    available_balance: Decimal,
    created_at: DateTime<Utc>,
    last_updated: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct LedgerEntryRow {
    id: Uuid,
    task_id: Option<Uuid>,
    task_title: Option<String>,
    amount: Decimal,
    kind: LedgerEntryKind,
    description: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<LedgerEntryRow> for LedgerEntry {
    fn from(row: LedgerEntryRow) -> Self {
        LedgerEntry {
            id: row.id,
            task_id: row.task_id,
            task_title: row.task_title,
            amount: row.amount,
            kind: row.kind,
            description: row.description,
            date: row.created_at,
        }
    }
}

/// PostgreSQL implementation of [`Store`].
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_ledger(&self, user_id: Uuid) -> Result<Option<RewardLedger>> {
        let Some(row) = sqlx::query_as::<_, LedgerRow>(
            r#"
            SELECT user_id, total_earned, available_balance, created_at, last_updated
            FROM reward_ledgers
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let history = sqlx::query_as::<_, LedgerEntryRow>(
            r#"
            SELECT id, task_id, task_title, amount, kind, description, created_at
            FROM ledger_entries
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(LedgerEntry::from)
        .collect();

        Ok(Some(RewardLedger {
            user_id: row.user_id,
            total_earned: row.total_earned,
            available_balance: row.available_balance,
            history,
            created_at: row.created_at,
            last_updated: row.last_updated,
        }))
    }

    async fn require_ledger(&self, user_id: Uuid) -> Result<RewardLedger> {
        self.load_ledger(user_id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("ledger for {} vanished", user_id)))
    }
}

/// Upserts the recipient's ledger and appends the earned entry.
async fn apply_credit(conn: &mut PgConnection, credit: &Credit) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO reward_ledgers (user_id, total_earned, available_balance, created_at, last_updated)
        VALUES ($1, $2, $2, $3, $3)
        ON CONFLICT (user_id) DO UPDATE SET
            total_earned = reward_ledgers.total_earned + EXCLUDED.total_earned,
            available_balance = reward_ledgers.available_balance + EXCLUDED.available_balance,
            last_updated = EXCLUDED.last_updated
        "#,
    )
    .bind(credit.user_id)
    .bind(credit.amount)
    .bind(credit.at)
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO ledger_entries (id, user_id, task_id, task_title, amount, kind, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(credit.user_id)
    .bind(credit.task_id)
    .bind(&credit.task_title)
    .bind(credit.amount)
    .bind(LedgerEntryKind::Earned)
    .bind(credit.at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

#[async_trait]
impl Store for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn create_user(&self, user: NewUser) -> Result<User> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (id, name, email, password_hash, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, name, email, profile_pic, role, tasks_created, tasks_completed,
                      tasks_verified, avg_rating, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AppError::Conflict("User already exists".to_string())
            }
            other => AppError::Database(other),
        })?;

        Ok(row.into_user(Vec::new()))
    }

    async fn find_credentials(&self, email: &str) -> Result<Option<Credentials>> {
        let row = sqlx::query_as::<_, (Uuid, String)>(
            "SELECT id, password_hash FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(user_id, password_hash)| Credentials {
            user_id,
            password_hash,
        }))
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        let Some(row) = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, name, email, profile_pic, role, tasks_created, tasks_completed,
                   tasks_verified, avg_rating, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let ratings = sqlx::query_as::<_, (Uuid, i32, bool, DateTime<Utc>)>(
            r#"
            SELECT task_id, rating, as_completer, created_at
            FROM user_ratings
            WHERE user_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|(task_id, rating, as_completer, date)| Rating {
            task_id,
            rating,
            as_completer,
            date,
        })
        .collect();

        Ok(Some(row.into_user(ratings)))
    }

    async fn user_summaries(&self, ids: &[Uuid]) -> Result<Vec<UserSummary>> {
        let summaries = sqlx::query_as::<_, UserSummary>(
            "SELECT id, name, profile_pic FROM users WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(summaries)
    }

    async fn insert_task(&self, task: NewTask) -> Result<Task> {
        let mut tx = self.pool.begin().await?;

        let owner = sqlx::query("UPDATE users SET tasks_created = tasks_created + 1 WHERE id = $1")
            .bind(task.created_by)
            .execute(&mut *tx)
            .await?;
        if owner.rows_affected() == 0 {
            return Err(AppError::NotFound("User not found".to_string()));
        }

        let coords = task.location_coords.unwrap_or(LocationCoords {
            latitude: None,
            longitude: None,
            address: None,
        });
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            INSERT INTO tasks (id, title, description, task_type, status, location, latitude,
                               longitude, address, time_window, created_by, created_at)
            VALUES ($1, $2, $3, $4, 'available', $5, $6, $7, $8, $9, $10, $11)
            RETURNING {}
            "#,
            TASK_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.task_type)
        .bind(&task.location)
        .bind(coords.latitude)
        .bind(coords.longitude)
        .bind(&coords.address)
        .bind(task.time_window)
        .bind(task.created_by)
        .bind(task.created_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row.into())
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {} FROM tasks WHERE id = $1",
            TASK_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Task::from))
    }

    async fn list_tasks(&self, viewer: Uuid, view: TaskView) -> Result<Vec<Task>> {
        let filter = match view {
            TaskView::Mine => "created_by = $1 OR assigned_to = $1",
            TaskView::Created => "created_by = $1",
            TaskView::Assigned => "assigned_to = $1",
            // every view binds $1
            TaskView::Available => "status = 'available' AND $1::uuid IS NOT NULL",
        };

        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {} FROM tasks WHERE {} ORDER BY created_at DESC",
            TASK_COLUMNS, filter
        ))
        .bind(viewer)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Task::from).collect())
    }

    async fn assign_task(
        &self,
        id: Uuid,
        assignee: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Task>> {
        // The status predicate makes concurrent accepts race on the row lock;
        // the loser sees zero rows.
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            UPDATE tasks
            SET status = 'in-progress', assigned_to = $2, assigned_at = $3
            WHERE id = $1 AND status = 'available'
            RETURNING {}
            "#,
            TASK_COLUMNS
        ))
        .bind(id)
        .bind(assignee)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Task::from))
    }

    async fn complete_task(&self, completion: Completion) -> Result<Option<Task>> {
        let mut tx = self.pool.begin().await?;

        let Some(row) = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            UPDATE tasks
            SET status = 'awaiting-verification',
                assigned_to = COALESCE(assigned_to, $2),
                assigned_at = COALESCE(assigned_at, $4),
                completed_at = $4,
                completion_note = $3
            WHERE id = $1 AND status = $5
            RETURNING {}
            "#,
            TASK_COLUMNS
        ))
        .bind(completion.task_id)
        .bind(completion.actor)
        .bind(&completion.note)
        .bind(completion.at)
        .bind(completion.expected)
        .fetch_optional(&mut *tx)
        .await?
        else {
            return Ok(None);
        };

        sqlx::query("UPDATE users SET tasks_completed = tasks_completed + 1 WHERE id = $1")
            .bind(completion.actor)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(row.into()))
    }

    async fn verify_task(&self, verification: Verification) -> Result<Option<Task>> {
        let mut tx = self.pool.begin().await?;

        let Some(row) = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            UPDATE tasks
            SET status = 'verified',
                verified_at = $2,
                task_rating = $3,
                verification_note = $4,
                reward_amount = $5
            WHERE id = $1 AND status = 'awaiting-verification'
            RETURNING {}
            "#,
            TASK_COLUMNS
        ))
        .bind(verification.task_id)
        .bind(verification.at)
        .bind(verification.rating)
        .bind(&verification.note)
        .bind(verification.credit.as_ref().map(|c| c.amount))
        .fetch_optional(&mut *tx)
        .await?
        else {
            return Ok(None);
        };

        sqlx::query("UPDATE users SET tasks_verified = tasks_verified + 1 WHERE id = $1")
            .bind(row.created_by)
            .execute(&mut *tx)
            .await?;

        if let Some(assignee) = row.assigned_to {
            sqlx::query(
                r#"
                INSERT INTO user_ratings (user_id, task_id, rating, as_completer, created_at)
                VALUES ($1, $2, $3, TRUE, $4)
                "#,
            )
            .bind(assignee)
            .bind(row.id)
            .bind(verification.rating)
            .bind(verification.at)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                UPDATE users
                SET avg_rating = (
                    SELECT COALESCE(AVG(rating)::float8, 0)
                    FROM user_ratings
                    WHERE user_id = $1 AND as_completer
                )
                WHERE id = $1
                "#,
            )
            .bind(assignee)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(credit) = &verification.credit {
            apply_credit(&mut *tx, credit).await?;
        }

        tx.commit().await?;
        Ok(Some(row.into()))
    }

    async fn delete_task(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1 AND status = 'available'")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_ledger(&self, user_id: Uuid) -> Result<Option<RewardLedger>> {
        self.load_ledger(user_id).await
    }

    async fn get_or_create_ledger(&self, user_id: Uuid) -> Result<RewardLedger> {
        sqlx::query(
            r#"
            INSERT INTO reward_ledgers (user_id, created_at, last_updated)
            VALUES ($1, $2, $2)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        self.require_ledger(user_id).await
    }

    async fn credit(&self, credit: Credit) -> Result<RewardLedger> {
        let mut tx = self.pool.begin().await?;
        apply_credit(&mut *tx, &credit).await?;
        tx.commit().await?;
        self.require_ledger(credit.user_id).await
    }

    async fn award_task_reward(&self, credit: Credit) -> Result<Option<(RewardLedger, Task)>> {
        let mut tx = self.pool.begin().await?;

        let Some(row) = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            UPDATE tasks
            SET reward_amount = $2
            WHERE id = $1 AND status = 'verified' AND reward_amount IS NULL
            RETURNING {}
            "#,
            TASK_COLUMNS
        ))
        .bind(credit.task_id)
        .bind(credit.amount)
        .fetch_optional(&mut *tx)
        .await?
        else {
            return Ok(None);
        };

        apply_credit(&mut *tx, &credit).await?;
        tx.commit().await?;

        let ledger = self.require_ledger(credit.user_id).await?;
        Ok(Some((ledger, row.into())))
    }

    async fn redeem(&self, redemption: Redemption) -> Result<RedeemOutcome> {
        let mut tx = self.pool.begin().await?;

        let debited = sqlx::query(
            r#"
            UPDATE reward_ledgers
            SET available_balance = available_balance - $2, last_updated = $3
            WHERE user_id = $1 AND available_balance >= $2
            "#,
        )
        .bind(redemption.user_id)
        .bind(redemption.amount)
        .bind(redemption.at)
        .execute(&mut *tx)
        .await?;

        if debited.rows_affected() == 0 {
            let balance = sqlx::query_scalar::<_, Decimal>(
                "SELECT available_balance FROM reward_ledgers WHERE user_id = $1",
            )
            .bind(redemption.user_id)
            .fetch_optional(&mut *tx)
            .await?;

            return Ok(match balance {
                Some(available) => RedeemOutcome::Insufficient { available },
                None => RedeemOutcome::MissingLedger,
            });
        }

        sqlx::query(
            r#"
            INSERT INTO ledger_entries (id, user_id, amount, kind, description, redeem_option, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(redemption.user_id)
        .bind(redemption.amount)
        .bind(LedgerEntryKind::Spent)
        .bind(&redemption.description)
        .bind(&redemption.option)
        .bind(redemption.at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(RedeemOutcome::Redeemed(
            self.require_ledger(redemption.user_id).await?,
        ))
    }

    async fn leaderboard(&self, limit: i64) -> Result<Vec<LeaderboardEntry>> {
        let rows = sqlx::query_as::<_, (Uuid, String, Decimal)>(
            r#"
            SELECT l.user_id, COALESCE(u.name, 'Unknown User'), l.total_earned
            FROM reward_ledgers l
            LEFT JOIN users u ON u.id = l.user_id
            ORDER BY l.total_earned DESC, l.created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(user_id, user_name, total_earned)| LeaderboardEntry {
                user_id,
                user_name,
                total_earned,
            })
            .collect())
    }
}
