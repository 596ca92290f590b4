//! Application state and routing

use crate::handlers;
use crate::middleware::{
    metrics::track_metrics,
    rate_limit::{rate_limit_middleware, RateLimit},
};
use axum::{
    extract::{FromRef, Request},
    middleware::{from_fn, Next},
    routing::{get, post},
    Router,
};
use nexora_common::{
    auth::{JwtManager, SubscriptionGate},
    billing::PaymentWebhook,
    config::AppConfig,
    db::{CatalogStore, JobStore, SubscriptionStore},
    Catalog, EbookPipeline, LlmClient,
};
use std::sync::Arc;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pipeline: EbookPipeline,
    pub catalog: Catalog,
    pub webhook: PaymentWebhook,
    pub jwt: Arc<JwtManager>,
    pub gate: SubscriptionGate,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        jobs: Arc<dyn JobStore>,
        catalog: Arc<dyn CatalogStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        llm: LlmClient,
        jwt: JwtManager,
    ) -> Self {
        let llm = Arc::new(llm);
        let pipeline = EbookPipeline::new(jobs.clone(), llm.clone(), config.pipeline.clone());
        let catalog = Catalog::new(catalog, jobs, llm, config.pipeline.module_max_tokens);
        let webhook = PaymentWebhook::new(&config.billing, subscriptions.clone());
        let gate = SubscriptionGate::new(subscriptions, config.auth.require_subscription);

        Self {
            config: Arc::new(config),
            pipeline,
            catalog,
            webhook,
            jwt: Arc::new(jwt),
            gate,
        }
    }
}

impl FromRef<AppState> for Arc<JwtManager> {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}

impl FromRef<AppState> for SubscriptionGate {
    fn from_ref(state: &AppState) -> Self {
        state.gate.clone()
    }
}

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // must cover every LLM attempt of a chapter request
    let timeout = TimeoutLayer::new(state.config.request_timeout());
    let concurrency = ConcurrencyLimitLayer::new(state.config.server.max_concurrent_requests.max(1));

    let routes = Router::new()
        // Health endpoints (no auth)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))

        // Ebook pipeline
        .route("/generate-ebook", post(handlers::ebooks::generate_ebook))
        .route("/ebook-status", get(handlers::ebooks::ebook_status))
        .route("/generate-chapter", post(handlers::ebooks::generate_chapter))
        .route("/generate-cover", post(handlers::ebooks::generate_cover))
        .route("/finalize-ebook", post(handlers::ebooks::finalize_ebook))

        // Monetization catalog
        .route("/create-product", post(handlers::catalog::create_product))
        .route("/list-products", get(handlers::catalog::list_products))
        .route("/create-module", post(handlers::catalog::create_module))
        .route("/generate-module", post(handlers::catalog::generate_module))
        .route("/get-module", get(handlers::catalog::get_module))
        .route("/record-metric", post(handlers::catalog::record_metric))
        .route("/submit-feedback", post(handlers::catalog::submit_feedback))
        .route("/dashboard", get(handlers::catalog::dashboard))

        // Payment provider (signature auth)
        .route("/webhooks/payment", post(handlers::webhooks::payment_webhook))
        .route_layer(from_fn(track_metrics));

    let routes = if state.config.rate_limit.enabled {
        let limit = RateLimit::from_config(&state.config.rate_limit);
        routes.layer(from_fn(move |request: Request, next: Next| {
            rate_limit_middleware(request, next, limit.clone())
        }))
    } else {
        routes
    };

    routes
        .layer(timeout)
        .layer(concurrency)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use nexora_common::{
        billing,
        db::{models::SubscriptionStatus, store::SubscriptionUpdate, MemoryStore},
        errors::{AppError, Result},
        llm::{CompletionProvider, RetryPolicy, ScriptedProvider},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    const WEBHOOK_SECRET: &str = "whsec_test";

    fn scripted(prompt: &str, call: u32) -> Result<String> {
        Ok(if prompt.contains("image-generation") {
            "A rustic loaf on a wooden board".to_string()
        } else if prompt.contains("title and subtitle") {
            r#"{"title": "Crust & Crumb", "subtitle": "Bread at home"}"#.to_string()
        } else if prompt.contains("Plan the chapters") {
            r#"[{"number": 1, "title": "Starter", "goal": "Feed it"},
                {"number": 2, "title": "Dough", "goal": "Mix it"},
                {"number": 3, "title": "Bake", "goal": "Bake it"}]"#
                .to_string()
        } else {
            format!("Generated body {call}")
        })
    }

    struct Harness {
        app: Router,
        store: Arc<MemoryStore>,
        jwt: Arc<JwtManager>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_provider(ScriptedProvider::new(scripted))
        }

        fn with_provider(provider: ScriptedProvider) -> Self {
            Self::configured(Arc::new(provider), |_| {})
        }

        fn configured<F>(provider: Arc<dyn CompletionProvider>, configure: F) -> Self
        where
            F: FnOnce(&mut AppConfig),
        {
            let mut config = AppConfig::default();
            config.auth.require_subscription = true;
            config.billing.webhook_secret = Some(WEBHOOK_SECRET.to_string());
            config.rate_limit.enabled = false;
            configure(&mut config);

            let store = Arc::new(MemoryStore::new());
            let llm = LlmClient::new(Some(provider), RetryPolicy::immediate(3));
            let state = AppState::new(
                config,
                store.clone(),
                store.clone(),
                store.clone(),
                llm,
                JwtManager::new("test-secret", 3600),
            );
            let jwt = state.jwt.clone();

            Self {
                app: create_router(state),
                store,
                jwt,
            }
        }

        /// Token for a fresh user with an active subscription
        async fn subscriber(&self) -> String {
            let user = Uuid::new_v4();
            self.store
                .upsert_subscription(SubscriptionUpdate {
                    user_id: user,
                    status: SubscriptionStatus::Active,
                    provider_customer_id: None,
                    current_period_end: None,
                })
                .await
                .unwrap();
            self.jwt.generate_token(user).unwrap()
        }

        async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
            let response = self.app.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, body)
        }

        async fn post(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
            let request = Request::post(uri)
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap();
            self.send(request).await
        }

        async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
            let request = Request::get(uri)
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap();
            self.send(request).await
        }
    }

    fn error_code(body: &Value) -> &str {
        body["error"]["code"].as_str().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_health_needs_no_auth() {
        let harness = Harness::new();
        let request = Request::get("/health").body(Body::empty()).unwrap();
        let (status, body) = harness.send(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let request = Request::get("/ready").body(Body::empty()).unwrap();
        let (status, body) = harness.send(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks"]["database"]["status"], "up");
    }

    #[tokio::test]
    async fn test_requests_without_token_are_rejected() {
        let harness = Harness::new();
        let request = Request::post("/generate-ebook")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({"topic": "bread"}).to_string()))
            .unwrap();
        let (status, body) = harness.send(request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(error_code(&body), "UNAUTHORIZED");

        let (status, body) = harness.get("/list-products", "garbage").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(error_code(&body), "INVALID_TOKEN");
    }

    #[tokio::test]
    async fn test_paywall_blocks_users_without_subscription() {
        let harness = Harness::new();
        let token = harness.jwt.generate_token(Uuid::new_v4()).unwrap();

        let (status, body) = harness
            .post("/generate-ebook", &token, json!({"topic": "bread"}))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(error_code(&body), "SUBSCRIPTION_INACTIVE");

        // reads stay open
        let (status, _) = harness.get("/list-products", &token).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_full_ebook_flow() {
        let harness = Harness::new();
        let token = harness.subscriber().await;

        let (status, body) = harness
            .post("/generate-ebook", &token, json!({"topic": "sourdough", "length": "short"}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["title"], "Crust & Crumb");
        assert_eq!(body["totalChapters"], 3);
        assert_eq!(body["status"], "outline_done");
        let job_id = body["jobId"].as_str().unwrap().to_string();

        // finalizing early is refused
        let (status, body) = harness
            .post("/finalize-ebook", &token, json!({"jobId": job_id}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_code(&body), "JOB_NOT_READY");

        for index in 0..3 {
            let (status, body) = harness
                .post("/generate-chapter", &token, json!({"jobId": job_id, "chapterIndex": index}))
                .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["success"], true);
            assert_eq!(body["progress"], index + 1);
            assert_eq!(body["alreadyGenerated"], false);
        }

        let (status, body) = harness
            .post("/generate-chapter", &token, json!({"jobId": job_id, "chapterIndex": 1}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["alreadyGenerated"], true);
        assert_eq!(body["status"], "complete");

        let (status, body) = harness
            .get(&format!("/ebook-status?jobId={job_id}"), &token)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "complete");
        assert_eq!(body["progress"], 3);

        let (status, body) = harness
            .post("/finalize-ebook", &token, json!({"jobId": job_id}))
            .await;
        assert_eq!(status, StatusCode::OK);
        let markdown = body["finalMarkdown"].as_str().unwrap();
        assert!(markdown.starts_with("# Crust & Crumb"));
        assert!(markdown.contains("## Table of Contents"));

        let (status, body) = harness
            .post(
                "/generate-cover",
                &token,
                json!({"title": "Crust & Crumb", "subtitle": "Bread at home", "jobId": job_id}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["coverPrompt"], "A rustic loaf on a wooden board");
    }

    /// Provider that never answers within any sane deadline
    struct StalledProvider;

    #[async_trait::async_trait]
    impl CompletionProvider for StalledProvider {
        async fn complete(&self, _prompt: &str, _max_tokens: u32) -> Result<String> {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Ok("too late".to_string())
        }

        fn model_name(&self) -> &str {
            "stalled"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_generation_hits_request_timeout() {
        let harness = Harness::configured(Arc::new(StalledProvider), |config| {
            config.server.request_timeout_secs = 5;
        });
        let token = harness.subscriber().await;

        let (status, _) = harness
            .post("/generate-ebook", &token, json!({"topic": "Bread"}))
            .await;
        assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn test_missing_and_invalid_fields() {
        let harness = Harness::new();
        let token = harness.subscriber().await;

        let (status, body) = harness.post("/generate-ebook", &token, json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_code(&body), "MISSING_FIELD");

        let (status, body) = harness
            .post("/generate-ebook", &token, json!({"topic": "x", "length": "epic"}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_code(&body), "VALIDATION_ERROR");

        let (status, body) = harness.get("/ebook-status", &token).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_code(&body), "MISSING_FIELD");

        let (status, body) = harness
            .get(&format!("/ebook-status?jobId={}", Uuid::new_v4()), &token)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(error_code(&body), "JOB_NOT_FOUND");

        let (status, body) = harness
            .post("/generate-cover", &token, json!({"subtitle": "only"}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_code(&body), "MISSING_FIELD");
    }

    #[tokio::test]
    async fn test_llm_outage_surfaces_as_bad_gateway() {
        let harness = Harness::with_provider(ScriptedProvider::new(|_, _| {
            Err(AppError::Internal {
                message: "upstream down".to_string(),
            })
        }));
        let token = harness.subscriber().await;

        let (status, body) = harness
            .post("/generate-ebook", &token, json!({"topic": "bread"}))
            .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(error_code(&body), "UPSTREAM_GENERATION");
        assert_eq!(body["error"]["details"]["attempts"], 3);
    }

    #[tokio::test]
    async fn test_catalog_flow() {
        let harness = Harness::new();
        let token = harness.subscriber().await;

        let (status, product) = harness
            .post("/create-product", &token, json!({"name": "Bread Bundle"}))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let product_id = product["id"].as_str().unwrap().to_string();

        let (status, module) = harness
            .post(
                "/create-module",
                &token,
                json!({"productId": product_id, "moduleType": "email_sequence"}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let module_id = module["id"].as_str().unwrap().to_string();

        let (status, body) = harness
            .post("/create-module", &token, json!({"productId": product_id, "moduleType": "podcast"}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_code(&body), "VALIDATION_ERROR");

        for _ in 0..2 {
            let (status, body) = harness
                .post("/generate-module", &token, json!({"moduleId": module_id}))
                .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["success"], true);
        }

        let (status, detail) = harness
            .get(&format!("/get-module?moduleId={module_id}"), &token)
            .await;
        assert_eq!(status, StatusCode::OK);
        let versions = detail["versions"].as_array().unwrap();
        assert_eq!(versions.len(), 2);
        let version_id = versions[0]["id"].as_str().unwrap().to_string();

        let (status, _) = harness
            .post(
                "/record-metric",
                &token,
                json!({"productId": product_id, "moduleId": module_id, "versionId": version_id, "views": 40, "downloads": 4}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = harness
            .post("/submit-feedback", &token, json!({"productId": product_id, "rating": 9}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_code(&body), "VALIDATION_ERROR");

        let (status, _) = harness
            .post(
                "/submit-feedback",
                &token,
                json!({"productId": product_id, "rating": 4, "comment": "Great recipes", "section": "Intro"}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, products) = harness.get("/list-products", &token).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(products["products"][0]["moduleCount"], 1);

        let (status, dashboard) = harness
            .get(&format!("/dashboard?productId={product_id}"), &token)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(dashboard["summary"]["totalViews"], 40);
        assert_eq!(dashboard["summary"]["totalDownloads"], 4);

        // another user sees nothing
        let stranger = harness.subscriber().await;
        let (status, _) = harness
            .get(&format!("/get-module?moduleId={module_id}"), &stranger)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_webhook_requires_valid_signature() {
        let harness = Harness::new();
        let user = Uuid::new_v4();
        let payload = json!({"type": "payment.succeeded", "data": {"userId": user}}).to_string();

        let request = Request::post("/webhooks/payment")
            .header("X-Signature", "deadbeef")
            .body(Body::from(payload.clone()))
            .unwrap();
        let (status, body) = harness.send(request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(error_code(&body), "INVALID_SIGNATURE");

        let signature = billing::sign(WEBHOOK_SECRET.as_bytes(), payload.as_bytes()).unwrap();
        let request = Request::post("/webhooks/payment")
            .header("X-Signature", signature)
            .body(Body::from(payload))
            .unwrap();
        let (status, body) = harness.send(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["received"], true);

        // the webhook unlocked paid routes for that user
        let token = harness.jwt.generate_token(user).unwrap();
        let (status, _) = harness
            .post("/create-product", &token, json!({"name": "Unlocked"}))
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }
}
