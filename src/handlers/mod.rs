pub mod auth;
pub mod extract;
pub mod rewards;
pub mod tasks;

#[cfg(test)]
pub(crate) mod test_support {
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;
    use tower_http::cors::CorsLayer;

    use crate::middleware::AuthConfig;
    use crate::services::{OwnershipPolicy, RewardCalculator};
    use crate::store::MemoryStore;
    use crate::AppState;

    pub struct TestApp {
        pub router: Router,
    }

    impl TestApp {
        pub fn new(relaxed: bool) -> Self {
            let state = AppState::new(
                Arc::new(MemoryStore::new()),
                RewardCalculator::offline(),
                OwnershipPolicy { relaxed },
                AuthConfig::new("router-test-secret", Duration::from_secs(3600)),
            );
            Self {
                router: crate::build_router(state, CorsLayer::permissive()),
            }
        }
    }

    pub async fn call(
        router: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    /// Registers `name` and returns the issued token.
    pub async fn register(router: &Router, name: &str) -> String {
        let (status, body) = call(
            router,
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({
                "name": name,
                "email": format!("{}@example.com", name.to_lowercase()),
                "password": "secret123"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {}", body);
        body["token"].as_str().unwrap().to_string()
    }
}
