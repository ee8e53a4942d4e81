use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ledger_entry_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LedgerEntryKind {
    Earned,
    Spent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: Uuid,
    pub task_id: Option<Uuid>,
    pub task_title: Option<String>,
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub kind: LedgerEntryKind,
    pub description: Option<String>,
    pub date: DateTime<Utc>,
}

/// Per-user rewards account. `history` is newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardLedger {
    pub user_id: Uuid,
    pub total_earned: Decimal,
    pub available_balance: Decimal,
    pub history: Vec<LedgerEntry>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl RewardLedger {
    pub fn empty(user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            total_earned: Decimal::ZERO,
            available_balance: Decimal::ZERO,
            history: Vec::new(),
            created_at: now,
            last_updated: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub user_id: Uuid,
    pub user_name: String,
    pub total_earned: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculateRewardRequest {
    pub task_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct CalculateRewardResponse {
    pub reward: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddRewardRequest {
    pub task_id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
}

#[derive(Debug, Serialize)]
pub struct AddRewardResponse {
    pub rewards: RewardLedger,
    pub task: crate::models::Task,
}

#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    pub option: String,
    pub amount: Decimal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemResponse {
    pub msg: String,
    pub available_balance: Decimal,
    pub total_earned: Decimal,
    pub redeemed: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardParams {
    pub limit: Option<i64>,
}
