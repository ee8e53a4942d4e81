use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, put},
    Router,
};
use serde_json::{json, Value};
use uuid::Uuid;
use validator::Validate;

use super::extract::{AppJson, AppPath, AppQuery};
use crate::errors::AppError;
use crate::middleware::AuthUser;
use crate::models::{
    CompleteTaskRequest, CreateTaskRequest, TaskListParams, TaskResponse, TaskView,
    VerifyTaskRequest, VerifyTaskResponse,
};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_tasks).post(create_task))
        .route("/:id", get(get_task).delete(delete_task))
        .route("/:id/accept", put(accept_task))
        .route("/:id/assign", put(accept_task))
        .route("/:id/complete", put(complete_task))
        .route("/:id/verify", put(verify_task))
}

/// GET /api/tasks?view=mine|created|assigned|available
pub async fn list_tasks(
    State(state): State<AppState>,
    user: AuthUser,
    AppQuery(params): AppQuery<TaskListParams>,
) -> Result<Json<Vec<TaskResponse>>, AppError> {
    let view = match params.view.as_deref() {
        None | Some("") => TaskView::default(),
        Some(raw) => raw.parse::<TaskView>().map_err(AppError::Validation)?,
    };

    let tasks = state.lifecycle.list(user.id, view).await?;
    Ok(Json(state.lifecycle.with_people(tasks).await?))
}

pub async fn create_task(
    State(state): State<AppState>,
    user: AuthUser,
    AppJson(payload): AppJson<CreateTaskRequest>,
) -> Result<(StatusCode, Json<TaskResponse>), AppError> {
    let task = state.lifecycle.create(user.id, payload).await?;
    let response = state.lifecycle.with_people_one(task).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn get_task(
    State(state): State<AppState>,
    user: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<TaskResponse>, AppError> {
    let task = state.lifecycle.get(id, user.id).await?;
    Ok(Json(state.lifecycle.with_people_one(task).await?))
}

/// PUT /api/tasks/:id/accept (also mounted as /assign)
pub async fn accept_task(
    State(state): State<AppState>,
    user: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<TaskResponse>, AppError> {
    let task = state.lifecycle.accept(id, user.id).await?;
    Ok(Json(state.lifecycle.with_people_one(task).await?))
}

pub async fn complete_task(
    State(state): State<AppState>,
    user: AuthUser,
    AppPath(id): AppPath<Uuid>,
    payload: Option<AppJson<CompleteTaskRequest>>,
) -> Result<Json<TaskResponse>, AppError> {
    let note = payload.and_then(|AppJson(body)| body.completion_note);
    let task = state.lifecycle.complete(id, user.id, note).await?;
    Ok(Json(state.lifecycle.with_people_one(task).await?))
}

pub async fn verify_task(
    State(state): State<AppState>,
    user: AuthUser,
    AppPath(id): AppPath<Uuid>,
    AppJson(payload): AppJson<VerifyTaskRequest>,
) -> Result<Json<VerifyTaskResponse>, AppError> {
    payload.validate()?;

    let verified = state
        .lifecycle
        .verify(id, user.id, payload.rating, payload.note)
        .await?;
    let task = state.lifecycle.with_people_one(verified.task).await?;
    Ok(Json(VerifyTaskResponse {
        task,
        reward: verified.reward,
    }))
}

pub async fn delete_task(
    State(state): State<AppState>,
    user: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Value>, AppError> {
    state.lifecycle.delete(id, user.id).await?;
    Ok(Json(json!({ "msg": "Task removed" })))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{call, register, TestApp};
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn task_endpoints_require_a_token() {
        let app = TestApp::new(false);
        let (status, body) = call(&app.router, Method::GET, "/api/tasks", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["kind"], "unauthorized");
    }

    #[tokio::test]
    async fn lifecycle_over_http() {
        let app = TestApp::new(false);
        let owner = register(&app.router, "Olive").await;
        let worker = register(&app.router, "Wade").await;

        let (status, task) = call(
            &app.router,
            Method::POST,
            "/api/tasks",
            Some(&owner),
            Some(json!({
                "title": "Feed the cat",
                "description": "Twice a day over the weekend",
                "type": "routine",
                "timeWindow": 30
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(task["status"], "available");
        assert_eq!(task["type"], "routine");
        assert_eq!(task["creator"]["name"], "Olive");
        let id = task["id"].as_str().unwrap().to_string();

        let (status, body) = call(
            &app.router,
            Method::PUT,
            &format!("/api/tasks/{}/accept", id),
            Some(&owner),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["kind"], "forbidden");

        let (status, task) = call(
            &app.router,
            Method::PUT,
            &format!("/api/tasks/{}/assign", id),
            Some(&worker),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(task["status"], "in-progress");
        assert_eq!(task["assignee"]["name"], "Wade");

        let (status, _) = call(
            &app.router,
            Method::PUT,
            &format!("/api/tasks/{}/complete", id),
            Some(&worker),
            Some(json!({ "completionNote": "Fed and watered" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(
            &app.router,
            Method::PUT,
            &format!("/api/tasks/{}/verify", id),
            Some(&owner),
            Some(json!({ "rating": 9 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "validation_error");

        let (status, verified) = call(
            &app.router,
            Method::PUT,
            &format!("/api/tasks/{}/verify", id),
            Some(&owner),
            Some(json!({ "rating": 5, "note": "Perfect" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(verified["status"], "verified");
        assert_eq!(verified["taskRating"], 5);
        // base + finished within two hours
        assert_eq!(verified["reward"], 7.0);

        let (status, body) = call(
            &app.router,
            Method::PUT,
            &format!("/api/tasks/{}/verify", id),
            Some(&owner),
            Some(json!({ "rating": 5 })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "invalid_state");
    }

    #[tokio::test]
    async fn listing_views_and_delete() {
        let app = TestApp::new(false);
        let owner = register(&app.router, "Opal").await;
        let other = register(&app.router, "Otto").await;

        let (_, task) = call(
            &app.router,
            Method::POST,
            "/api/tasks",
            Some(&owner),
            Some(json!({ "title": "Rake leaves", "description": "Front lawn" })),
        )
        .await;
        let id = task["id"].as_str().unwrap().to_string();
        assert_eq!(task["type"], "other");
        assert_eq!(task["timeWindow"], 60);

        let (_, available) = call(
            &app.router,
            Method::GET,
            "/api/tasks?view=available",
            Some(&other),
            None,
        )
        .await;
        assert_eq!(available.as_array().unwrap().len(), 1);

        let (_, mine) = call(&app.router, Method::GET, "/api/tasks", Some(&other), None).await;
        assert!(mine.as_array().unwrap().is_empty());

        let (status, _) = call(
            &app.router,
            Method::GET,
            "/api/tasks?view=everything",
            Some(&other),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &app.router,
            Method::DELETE,
            &format!("/api/tasks/{}", id),
            Some(&other),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = call(
            &app.router,
            Method::DELETE,
            &format!("/api/tasks/{}", id),
            Some(&owner),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["msg"], "Task removed");

        let (status, _) = call(
            &app.router,
            Method::GET,
            &format!("/api/tasks/{}", id),
            Some(&owner),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_ids_and_bodies_are_validation_errors() {
        let app = TestApp::new(false);
        let token = register(&app.router, "Milo").await;

        let (status, body) = call(
            &app.router,
            Method::PUT,
            "/api/tasks/not-a-uuid/accept",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "validation_error");
        assert_eq!(body["error"], "Invalid ID");

        let (status, body) = call(
            &app.router,
            Method::PUT,
            &format!("/api/tasks/{}/verify", uuid::Uuid::new_v4()),
            Some(&token),
            Some(json!({ "rating": "4" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "validation_error");

        let (status, body) = call(
            &app.router,
            Method::POST,
            "/api/tasks",
            Some(&token),
            Some(json!({ "title": 42, "description": "Numbers are not titles" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "validation_error");
    }
}
