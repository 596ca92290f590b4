//! Monetization catalog handlers

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::{required, validate_body};
use crate::AppState;
use nexora_common::{
    analytics::Dashboard,
    auth::{AuthUser, Subscriber},
    db::models::{Feedback, Metric, Module, ModuleType, ModuleVersion, Product},
    errors::Result,
    monetization::{FeedbackEntry, MetricSample, ModuleDetail, NewProduct, ProductSummary},
};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateProductRequest {
    #[serde(default)]
    #[validate(length(max = 200))]
    pub name: String,

    #[validate(length(max = 5000))]
    pub description: Option<String>,

    pub ebook_job_id: Option<Uuid>,
}

pub async fn create_product(
    State(state): State<AppState>,
    user: Subscriber,
    Json(request): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<Product>)> {
    validate_body(&request)?;

    let product = state
        .catalog
        .create_product(
            user.user_id(),
            NewProduct {
                name: request.name,
                description: request.description,
                ebook_job_id: request.ebook_job_id,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(product)))
}

#[derive(Serialize)]
pub struct ProductList {
    pub products: Vec<ProductSummary>,
}

pub async fn list_products(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ProductList>> {
    let products = state.catalog.list_products(user.user_id).await?;
    Ok(Json(ProductList { products }))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateModuleRequest {
    pub product_id: Option<Uuid>,

    pub module_type: Option<String>,

    #[validate(length(max = 300))]
    pub title: Option<String>,
}

pub async fn create_module(
    State(state): State<AppState>,
    user: Subscriber,
    Json(request): Json<CreateModuleRequest>,
) -> Result<(StatusCode, Json<Module>)> {
    validate_body(&request)?;
    let product_id = required(request.product_id, "productId")?;
    let module_type: ModuleType = required(request.module_type, "moduleType")?.parse()?;

    let module = state
        .catalog
        .create_module(user.user_id(), product_id, module_type, request.title)
        .await?;

    Ok((StatusCode::CREATED, Json(module)))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerateModuleRequest {
    pub module_id: Option<Uuid>,

    #[validate(length(max = 2000))]
    pub instructions: Option<String>,
}

#[derive(Serialize)]
pub struct GenerateModuleResponse {
    pub success: bool,
    pub module: Module,
    pub version: ModuleVersion,
}

/// Generate a new version of a module's content
pub async fn generate_module(
    State(state): State<AppState>,
    user: Subscriber,
    Json(request): Json<GenerateModuleRequest>,
) -> Result<Json<GenerateModuleResponse>> {
    validate_body(&request)?;
    let module_id = required(request.module_id, "moduleId")?;

    let (module, version) = state
        .catalog
        .generate_module(user.user_id(), module_id, request.instructions)
        .await?;

    Ok(Json(GenerateModuleResponse {
        success: true,
        module,
        version,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleQuery {
    pub module_id: Option<Uuid>,
}

pub async fn get_module(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ModuleQuery>,
) -> Result<Json<ModuleDetail>> {
    let module_id = required(query.module_id, "moduleId")?;
    let detail = state.catalog.get_module(user.user_id, module_id).await?;
    Ok(Json(detail))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RecordMetricRequest {
    pub product_id: Option<Uuid>,
    pub module_id: Option<Uuid>,
    pub version_id: Option<Uuid>,

    #[serde(default)]
    #[validate(range(min = 0))]
    pub views: i64,

    #[serde(default)]
    #[validate(range(min = 0))]
    pub downloads: i64,
}

pub async fn record_metric(
    State(state): State<AppState>,
    user: Subscriber,
    Json(request): Json<RecordMetricRequest>,
) -> Result<(StatusCode, Json<Metric>)> {
    validate_body(&request)?;
    let product_id = required(request.product_id, "productId")?;

    let metric = state
        .catalog
        .record_metric(
            user.user_id(),
            MetricSample {
                product_id,
                module_id: request.module_id,
                version_id: request.version_id,
                views: request.views,
                downloads: request.downloads,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(metric)))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitFeedbackRequest {
    pub product_id: Option<Uuid>,
    pub module_id: Option<Uuid>,

    #[validate(range(min = 1, max = 5))]
    pub rating: Option<i32>,

    #[validate(length(max = 5000))]
    pub comment: Option<String>,

    #[validate(length(max = 200))]
    pub section: Option<String>,
}

pub async fn submit_feedback(
    State(state): State<AppState>,
    user: Subscriber,
    Json(request): Json<SubmitFeedbackRequest>,
) -> Result<(StatusCode, Json<Feedback>)> {
    validate_body(&request)?;
    let product_id = required(request.product_id, "productId")?;
    let rating = required(request.rating, "rating")?;

    let feedback = state
        .catalog
        .submit_feedback(
            user.user_id(),
            FeedbackEntry {
                product_id,
                module_id: request.module_id,
                rating,
                comment: request.comment,
                section: request.section,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(feedback)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardQuery {
    pub product_id: Option<Uuid>,
}

/// Aggregated metrics and feedback for one product
pub async fn dashboard(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<DashboardQuery>,
) -> Result<Json<Dashboard>> {
    let product_id = required(query.product_id, "productId")?;
    let dashboard = state.catalog.dashboard(user.user_id, product_id).await?;
    Ok(Json(dashboard))
}
