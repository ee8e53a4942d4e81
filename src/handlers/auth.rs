use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use tracing::info;
use validator::Validate;

use super::extract::AppJson;
use crate::errors::AppError;
use crate::middleware::auth::{hash_password, verify_password};
use crate::middleware::AuthUser;
use crate::models::{AuthResponse, LoginRequest, RegisterRequest, User};
use crate::store::NewUser;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/user", get(current_user))
}

const BAD_CREDENTIALS: &str = "Invalid credentials";

pub async fn register(
    State(state): State<AppState>,
    AppJson(mut payload): AppJson<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    payload.name = payload.name.trim().to_string();
    payload.email = payload.email.trim().to_lowercase();
    payload.validate()?;

    let password = payload.password;
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| AppError::Internal(format!("hashing task failed: {}", e)))??;

    let user = state
        .store
        .create_user(NewUser {
            name: payload.name,
            email: payload.email,
            password_hash,
        })
        .await?;

    let token = state.auth.issue_token(&user)?;
    info!("👤 Registered user {}", user.id);
    Ok((StatusCode::CREATED, Json(AuthResponse { token, user })))
}

pub async fn login(
    State(state): State<AppState>,
    AppJson(payload): AppJson<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let email = payload.email.trim().to_lowercase();
    let credentials = state
        .store
        .find_credentials(&email)
        .await?
        .ok_or_else(|| AppError::Unauthorized(BAD_CREDENTIALS.to_string()))?;

    let password = payload.password;
    let hash = credentials.password_hash;
    let matches = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| AppError::Internal(format!("password check failed: {}", e)))?;
    if !matches {
        return Err(AppError::Unauthorized(BAD_CREDENTIALS.to_string()));
    }

    let user = state
        .store
        .get_user(credentials.user_id)
        .await?
        .ok_or_else(|| AppError::Unauthorized(BAD_CREDENTIALS.to_string()))?;

    let token = state.auth.issue_token(&user)?;
    Ok(Json(AuthResponse { token, user }))
}

/// GET /api/auth/user
pub async fn current_user(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<User>, AppError> {
    state
        .store
        .get_user(user.id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{call, register, TestApp};
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn register_login_and_profile() {
        let app = TestApp::new(false);
        let token = register(&app.router, "Nia").await;

        let (status, profile) =
            call(&app.router, Method::GET, "/api/auth/user", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(profile["name"], "Nia");
        assert_eq!(profile["taskStats"]["created"], 0);
        assert!(profile.get("passwordHash").is_none());

        let (status, body) = call(
            &app.router,
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": "NIA@example.com", "password": "secret123" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["token"].as_str().is_some());
    }

    #[tokio::test]
    async fn duplicate_and_bad_credentials() {
        let app = TestApp::new(false);
        register(&app.router, "Ravi").await;

        let (status, body) = call(
            &app.router,
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({ "name": "Ravi", "email": "ravi@example.com", "password": "secret123" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "conflict");

        let (wrong_password, a) = call(
            &app.router,
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": "ravi@example.com", "password": "nope-nope" })),
        )
        .await;
        let (unknown_email, b) = call(
            &app.router,
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": "nobody@example.com", "password": "secret123" })),
        )
        .await;
        assert_eq!(wrong_password, StatusCode::UNAUTHORIZED);
        assert_eq!(unknown_email, StatusCode::UNAUTHORIZED);
        assert_eq!(a["error"], b["error"]);
    }

    #[tokio::test]
    async fn register_validates_input() {
        let app = TestApp::new(false);
        let (status, body) = call(
            &app.router,
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({ "name": "Short", "email": "short@example.com", "password": "123" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Password must be at least 6 characters");
    }

    #[tokio::test]
    async fn blank_names_are_rejected_after_trimming() {
        let app = TestApp::new(false);
        let (status, body) = call(
            &app.router,
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({ "name": "   ", "email": "blank@example.com", "password": "secret123" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "validation_error");
        assert_eq!(body["error"], "Name is required");

        let (status, body) = call(
            &app.router,
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({ "name": "  Nia  ", "email": " Nia@Example.com ", "password": "secret123" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["user"]["name"], "Nia");
        assert_eq!(body["user"]["email"], "nia@example.com");
    }
}
