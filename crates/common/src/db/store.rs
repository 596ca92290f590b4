//! Storage traits
//!
//! Handlers and pipeline stages depend on these traits rather than on a
//! concrete database handle, so the Postgres [`Repository`](super::Repository)
//! and the in-memory [`MemoryStore`](super::MemoryStore) are interchangeable.

use crate::db::models::{
    Feedback, Metric, Module, ModuleType, ModuleVersion, Product, Subscription, SubscriptionStatus,
};
use crate::errors::Result;
use crate::pipeline::job::{EbookJob, JobPatch, NewJob};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Persistence for ebook generation jobs
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new pending job
    async fn create_job(&self, new: NewJob) -> Result<EbookJob>;

    /// Fetch a job by id
    async fn get_job(&self, id: Uuid) -> Result<Option<EbookJob>>;

    /// Merge `patch` into the job if its stored version still equals
    /// `expected_version`. Fails with `Conflict` otherwise.
    async fn update_job(&self, id: Uuid, patch: JobPatch, expected_version: i32) -> Result<EbookJob>;

    /// Connectivity check for readiness probes
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// New metric sample
#[derive(Debug, Clone)]
pub struct NewMetric {
    pub product_id: Uuid,
    pub module_id: Option<Uuid>,
    pub version_id: Option<Uuid>,
    pub views: i64,
    pub downloads: i64,
    pub recorded_at: DateTime<Utc>,
}

/// New feedback entry
#[derive(Debug, Clone)]
pub struct NewFeedback {
    pub product_id: Uuid,
    pub module_id: Option<Uuid>,
    pub rating: i32,
    pub comment: Option<String>,
    pub section: Option<String>,
}

/// Persistence for products, modules and their analytics
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn create_product(
        &self,
        user_id: Uuid,
        name: String,
        description: Option<String>,
        ebook_job_id: Option<Uuid>,
    ) -> Result<Product>;

    async fn find_product(&self, id: Uuid) -> Result<Option<Product>>;

    /// Products of a user, newest first
    async fn list_products(&self, user_id: Uuid) -> Result<Vec<Product>>;

    async fn create_module(
        &self,
        product_id: Uuid,
        user_id: Uuid,
        module_type: ModuleType,
        title: String,
    ) -> Result<Module>;

    async fn find_module(&self, id: Uuid) -> Result<Option<Module>>;

    /// Modules of a product, oldest first
    async fn list_modules(&self, product_id: Uuid) -> Result<Vec<Module>>;

    /// Append the next version to a module and mark it generated.
    /// Existing versions are never touched.
    async fn append_version(&self, module_id: Uuid, content: String) -> Result<(Module, ModuleVersion)>;

    /// Versions of a module in ascending version order
    async fn list_versions(&self, module_id: Uuid) -> Result<Vec<ModuleVersion>>;

    async fn record_metric(&self, metric: NewMetric) -> Result<Metric>;

    async fn list_metrics(&self, product_id: Uuid) -> Result<Vec<Metric>>;

    async fn submit_feedback(&self, feedback: NewFeedback) -> Result<Feedback>;

    async fn list_feedback(&self, product_id: Uuid) -> Result<Vec<Feedback>>;
}

/// Subscription change coming from the payment provider
#[derive(Debug, Clone)]
pub struct SubscriptionUpdate {
    pub user_id: Uuid,
    pub status: SubscriptionStatus,
    pub provider_customer_id: Option<String>,
    pub current_period_end: Option<DateTime<Utc>>,
}

/// Persistence for paywall state
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn find_subscription(&self, user_id: Uuid) -> Result<Option<Subscription>>;

    /// Insert or replace the user's subscription row
    async fn upsert_subscription(&self, update: SubscriptionUpdate) -> Result<Subscription>;
}
