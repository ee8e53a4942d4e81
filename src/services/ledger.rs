use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::OwnershipPolicy;
use crate::errors::{AppError, Result};
use crate::models::{LeaderboardEntry, RewardLedger, Task, TaskStatus};
use crate::store::{Credit, RedeemOutcome, Redemption, Store};

pub const DEFAULT_LEADERBOARD_LIMIT: i64 = 10;
pub const MAX_LEADERBOARD_LIMIT: i64 = 100;

/// Largest single credit a task can pay out.
pub fn max_credit() -> Decimal {
    Decimal::from(50)
}

/// Rounds to cents and checks the amount is in (0, 50].
pub fn validate_credit_amount(amount: Decimal) -> Result<Decimal> {
    let amount = amount.round_dp(2);
    if amount <= Decimal::ZERO || amount > max_credit() {
        return Err(AppError::Validation(format!(
            "Reward amount must be greater than 0 and at most {}, got {}",
            max_credit(),
            amount
        )));
    }
    Ok(amount)
}

/// History description for a redemption option.
pub fn redemption_description(option: &str, amount: Decimal) -> String {
    match option {
        "gift-card" => format!("Gift Card Redemption (${})", amount),
        "charity" => format!("Charity Donation (${})", amount),
        "premium" => format!("Premium Access (${})", amount),
        _ => "Reward redemption".to_string(),
    }
}

#[derive(Clone)]
pub struct RewardLedgerService {
    store: Arc<dyn Store>,
    policy: OwnershipPolicy,
}

impl RewardLedgerService {
    pub fn new(store: Arc<dyn Store>, policy: OwnershipPolicy) -> Self {
        Self { store, policy }
    }

    pub async fn get_or_create(&self, user_id: Uuid) -> Result<RewardLedger> {
        self.store.get_or_create_ledger(user_id).await
    }

    pub async fn credit(
        &self,
        user_id: Uuid,
        task_id: Uuid,
        task_title: &str,
        amount: Decimal,
    ) -> Result<RewardLedger> {
        let amount = validate_credit_amount(amount)?;
        let ledger = self
            .store
            .credit(Credit {
                user_id,
                task_id,
                task_title: task_title.to_string(),
                amount,
                at: Utc::now(),
            })
            .await?;

        info!("💰 Credited {} to user {} for task {}", amount, user_id, task_id);
        Ok(ledger)
    }

    /// Manual payout for a verified task that carries no reward yet.
    pub async fn award(
        &self,
        actor: Uuid,
        task_id: Uuid,
        recipient: Uuid,
        amount: Decimal,
    ) -> Result<(RewardLedger, Task)> {
        let amount = validate_credit_amount(amount)?;
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Task not found".to_string()))?;

        if task.created_by != actor {
            return Err(AppError::Forbidden(
                "Only the task creator can award a reward".to_string(),
            ));
        }
        if task.status != TaskStatus::Verified {
            return Err(AppError::InvalidState(format!(
                "Task must be verified before it is rewarded (currently {})",
                task.status
            )));
        }
        if task.reward_amount.is_some() {
            return Err(AppError::InvalidState(
                "Task has already been rewarded".to_string(),
            ));
        }
        if task.assigned_to != Some(recipient) {
            if !self.policy.relaxed {
                return Err(AppError::Forbidden(
                    "Rewards can only be paid to the task's assignee".to_string(),
                ));
            }
            warn!(
                "⚠️ Relaxed ownership: paying user {} who is not the assignee of task {}",
                recipient, task_id
            );
        }

        let awarded = self
            .store
            .award_task_reward(Credit {
                user_id: recipient,
                task_id,
                task_title: task.title.clone(),
                amount,
                at: Utc::now(),
            })
            .await?
            .ok_or_else(|| AppError::InvalidState("Task has already been rewarded".to_string()))?;

        info!("💰 Awarded {} to user {} for task {}", amount, recipient, task_id);
        Ok(awarded)
    }

    /// Returns the ledger after the debit and the amount actually redeemed.
    pub async fn redeem(
        &self,
        user_id: Uuid,
        option: &str,
        amount: Decimal,
    ) -> Result<(RewardLedger, Decimal)> {
        let option = option.trim();
        if option.is_empty() {
            return Err(AppError::Validation("Redemption option is required".to_string()));
        }
        let amount = amount.round_dp(2);
        if amount <= Decimal::ZERO {
            return Err(AppError::Validation(
                "Redemption amount must be greater than 0".to_string(),
            ));
        }

        let outcome = self
            .store
            .redeem(Redemption {
                user_id,
                option: option.to_string(),
                description: redemption_description(option, amount),
                amount,
                at: Utc::now(),
            })
            .await?;

        match outcome {
            RedeemOutcome::Redeemed(ledger) => {
                info!("🎁 User {} redeemed {} ({})", user_id, amount, option);
                Ok((ledger, amount))
            }
            RedeemOutcome::Insufficient { available } => Err(AppError::InsufficientBalance {
                available,
                requested: amount,
            }),
            RedeemOutcome::MissingLedger => {
                Err(AppError::NotFound("Rewards not found".to_string()))
            }
        }
    }

    pub async fn leaderboard(&self, limit: Option<i64>) -> Result<Vec<LeaderboardEntry>> {
        let limit = limit
            .unwrap_or(DEFAULT_LEADERBOARD_LIMIT)
            .clamp(1, MAX_LEADERBOARD_LIMIT);
        self.store.leaderboard(limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LedgerEntryKind;
    use crate::store::{MemoryStore, NewUser};

    fn service() -> (Arc<MemoryStore>, RewardLedgerService) {
        let store = Arc::new(MemoryStore::new());
        let service = RewardLedgerService::new(store.clone(), OwnershipPolicy::strict());
        (store, service)
    }

    fn dollars(cents: i64) -> Decimal {
        Decimal::new(cents, 2)
    }

    #[test]
    fn credit_amount_bounds() {
        assert!(validate_credit_amount(Decimal::ZERO).is_err());
        assert!(validate_credit_amount(dollars(-100)).is_err());
        assert!(validate_credit_amount(dollars(5001)).is_err());
        assert_eq!(validate_credit_amount(dollars(5000)).unwrap(), dollars(5000));
        assert_eq!(validate_credit_amount(Decimal::new(1234, 3)).unwrap(), dollars(123));
    }

    #[test]
    fn redemption_descriptions_follow_the_option() {
        assert_eq!(
            redemption_description("gift-card", dollars(1000)),
            "Gift Card Redemption ($10.00)"
        );
        assert_eq!(redemption_description("charity", dollars(500)), "Charity Donation ($5.00)");
        assert_eq!(redemption_description("premium", dollars(250)), "Premium Access ($2.50)");
        assert_eq!(redemption_description("crypto", dollars(100)), "Reward redemption");
    }

    #[tokio::test]
    async fn credits_and_redemptions_keep_balances_consistent() {
        let (_, ledger) = service();
        let user = Uuid::new_v4();

        ledger.credit(user, Uuid::new_v4(), "Mow lawn", dollars(1000)).await.unwrap();
        ledger.credit(user, Uuid::new_v4(), "Wash car", dollars(500)).await.unwrap();
        let (after, redeemed) = ledger.redeem(user, "gift-card", dollars(1200)).await.unwrap();

        assert_eq!(redeemed, dollars(1200));
        assert_eq!(after.total_earned, dollars(1500));
        assert_eq!(after.available_balance, dollars(300));
        assert_eq!(after.history.len(), 3);
        assert_eq!(after.history[0].kind, LedgerEntryKind::Spent);

        let err = ledger.redeem(user, "gift-card", dollars(1000)).await.unwrap_err();
        match err {
            AppError::InsufficientBalance { available, requested } => {
                assert_eq!(available, dollars(300));
                assert_eq!(requested, dollars(1000));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        let unchanged = ledger.get_or_create(user).await.unwrap();
        assert_eq!(unchanged.available_balance, dollars(300));
        assert_eq!(unchanged.history.len(), 3);
    }

    #[tokio::test]
    async fn credit_rejects_out_of_range_amounts() {
        let (_, ledger) = service();
        let user = Uuid::new_v4();
        let err = ledger.credit(user, Uuid::new_v4(), "Big", dollars(7500)).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(ledger.get_or_create(user).await.unwrap().total_earned, Decimal::ZERO);
    }

    #[tokio::test]
    async fn redeem_validates_input_and_ledger() {
        let (_, ledger) = service();
        let user = Uuid::new_v4();

        assert!(matches!(
            ledger.redeem(user, "charity", Decimal::ZERO).await.unwrap_err(),
            AppError::Validation(_)
        ));
        assert!(matches!(
            ledger.redeem(user, "  ", dollars(100)).await.unwrap_err(),
            AppError::Validation(_)
        ));
        assert!(matches!(
            ledger.redeem(user, "charity", dollars(100)).await.unwrap_err(),
            AppError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn leaderboard_orders_by_total_and_keeps_ties_stable() {
        let (store, ledger) = service();
        let mut ids = Vec::new();
        for (name, cents) in [("A", 3000), ("B", 1000), ("C", 3000)] {
            let user = store
                .create_user(NewUser {
                    name: name.to_string(),
                    email: format!("{}@example.com", name),
                    password_hash: "x".into(),
                })
                .await
                .unwrap();
            ledger.credit(user.id, Uuid::new_v4(), "Job", dollars(cents)).await.unwrap();
            ids.push(user.id);
        }

        let board = ledger.leaderboard(None).await.unwrap();
        let names: Vec<_> = board.iter().map(|e| e.user_name.as_str()).collect();
        assert_eq!(names, ["A", "C", "B"]);

        let top = ledger.leaderboard(Some(1)).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].user_id, ids[0]);
    }
}
