use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;

use super::extract::{AppJson, AppQuery};
use crate::errors::AppError;
use crate::middleware::AuthUser;
use crate::models::{
    AddRewardRequest, AddRewardResponse, CalculateRewardRequest, CalculateRewardResponse,
    LeaderboardEntry, LeaderboardParams, RedeemRequest, RedeemResponse, RewardLedger,
};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_rewards))
        .route("/calculate", post(calculate_reward))
        .route("/add", post(add_reward))
        .route("/redeem", post(redeem_reward))
        .route("/leaderboard", get(leaderboard))
}

/// GET /api/rewards - caller's ledger, created on first access
pub async fn get_rewards(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<RewardLedger>, AppError> {
    Ok(Json(state.ledger.get_or_create(user.id).await?))
}

pub async fn calculate_reward(
    State(state): State<AppState>,
    user: AuthUser,
    AppJson(payload): AppJson<CalculateRewardRequest>,
) -> Result<Json<CalculateRewardResponse>, AppError> {
    let reward = state.lifecycle.preview_reward(payload.task_id, user.id).await?;
    Ok(Json(CalculateRewardResponse { reward }))
}

pub async fn add_reward(
    State(state): State<AppState>,
    user: AuthUser,
    AppJson(payload): AppJson<AddRewardRequest>,
) -> Result<Json<AddRewardResponse>, AppError> {
    let (rewards, task) = state
        .ledger
        .award(user.id, payload.task_id, payload.user_id, payload.amount)
        .await?;
    Ok(Json(AddRewardResponse { rewards, task }))
}

pub async fn redeem_reward(
    State(state): State<AppState>,
    user: AuthUser,
    AppJson(payload): AppJson<RedeemRequest>,
) -> Result<Json<RedeemResponse>, AppError> {
    let (ledger, redeemed) = state
        .ledger
        .redeem(user.id, &payload.option, payload.amount)
        .await?;

    Ok(Json(RedeemResponse {
        msg: "Reward redeemed successfully".to_string(),
        available_balance: ledger.available_balance,
        total_earned: ledger.total_earned,
        redeemed,
        timestamp: Utc::now(),
    }))
}

pub async fn leaderboard(
    State(state): State<AppState>,
    _user: AuthUser,
    AppQuery(params): AppQuery<LeaderboardParams>,
) -> Result<Json<Vec<LeaderboardEntry>>, AppError> {
    Ok(Json(state.ledger.leaderboard(params.limit).await?))
}
