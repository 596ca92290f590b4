//! In-memory store
//!
//! Implements every storage trait over `tokio::sync::RwLock`-guarded maps.
//! Used by tests and by the gateway's `--memory` mode.

use crate::db::models::{
    Feedback, Metric, Module, ModuleStatus, ModuleType, ModuleVersion, Product, Subscription,
};
use crate::db::store::{
    CatalogStore, JobStore, NewFeedback, NewMetric, SubscriptionStore, SubscriptionUpdate,
};
use crate::errors::{AppError, Result};
use crate::pipeline::job::{EbookJob, JobPatch, NewJob};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    jobs: HashMap<Uuid, EbookJob>,
    products: HashMap<Uuid, Product>,
    modules: HashMap<Uuid, Module>,
    versions: Vec<ModuleVersion>,
    metrics: Vec<Metric>,
    feedback: Vec<Feedback>,
    subscriptions: HashMap<Uuid, Subscription>,
}

/// Process-local store with the same semantics as the Postgres repository
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) async fn all_jobs(&self) -> Vec<EbookJob> {
        self.tables.read().await.jobs.values().cloned().collect()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create_job(&self, new: NewJob) -> Result<EbookJob> {
        let job = EbookJob::new(Uuid::new_v4(), new, Utc::now());
        self.tables.write().await.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<EbookJob>> {
        Ok(self.tables.read().await.jobs.get(&id).cloned())
    }

    async fn update_job(&self, id: Uuid, patch: JobPatch, expected_version: i32) -> Result<EbookJob> {
        let mut tables = self.tables.write().await;
        let job = tables
            .jobs
            .get_mut(&id)
            .ok_or_else(|| AppError::JobNotFound { id: id.to_string() })?;

        if job.version != expected_version {
            return Err(AppError::Conflict {
                resource: "ebook_job".to_string(),
                id: id.to_string(),
            });
        }

        job.apply(patch, Utc::now())?;
        Ok(job.clone())
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn create_product(
        &self,
        user_id: Uuid,
        name: String,
        description: Option<String>,
        ebook_job_id: Option<Uuid>,
    ) -> Result<Product> {
        let now = Utc::now();
        let product = Product {
            id: Uuid::new_v4(),
            user_id,
            name,
            description,
            ebook_job_id,
            created_at: now.into(),
            updated_at: now.into(),
        };
        self.tables
            .write()
            .await
            .products
            .insert(product.id, product.clone());
        Ok(product)
    }

    async fn find_product(&self, id: Uuid) -> Result<Option<Product>> {
        Ok(self.tables.read().await.products.get(&id).cloned())
    }

    async fn list_products(&self, user_id: Uuid) -> Result<Vec<Product>> {
        let tables = self.tables.read().await;
        let mut products: Vec<Product> = tables
            .products
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        products.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(products)
    }

    async fn create_module(
        &self,
        product_id: Uuid,
        user_id: Uuid,
        module_type: ModuleType,
        title: String,
    ) -> Result<Module> {
        let now = Utc::now();
        let module = Module {
            id: Uuid::new_v4(),
            product_id,
            user_id,
            module_type: module_type.as_str().to_string(),
            title,
            status: ModuleStatus::Draft.as_str().to_string(),
            created_at: now.into(),
            updated_at: now.into(),
        };
        self.tables
            .write()
            .await
            .modules
            .insert(module.id, module.clone());
        Ok(module)
    }

    async fn find_module(&self, id: Uuid) -> Result<Option<Module>> {
        Ok(self.tables.read().await.modules.get(&id).cloned())
    }

    async fn list_modules(&self, product_id: Uuid) -> Result<Vec<Module>> {
        let tables = self.tables.read().await;
        let mut modules: Vec<Module> = tables
            .modules
            .values()
            .filter(|m| m.product_id == product_id)
            .cloned()
            .collect();
        modules.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(modules)
    }

    async fn append_version(&self, module_id: Uuid, content: String) -> Result<(Module, ModuleVersion)> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();

        let next_number = tables
            .versions
            .iter()
            .filter(|v| v.module_id == module_id)
            .map(|v| v.version_number)
            .max()
            .unwrap_or(0)
            + 1;

        let module = tables
            .modules
            .get_mut(&module_id)
            .ok_or_else(|| AppError::ModuleNotFound { id: module_id.to_string() })?;
        module.status = ModuleStatus::Generated.as_str().to_string();
        module.updated_at = now.into();
        let module = module.clone();

        let version = ModuleVersion {
            id: Uuid::new_v4(),
            module_id,
            version_number: next_number,
            content,
            created_at: now.into(),
        };
        tables.versions.push(version.clone());

        Ok((module, version))
    }

    async fn list_versions(&self, module_id: Uuid) -> Result<Vec<ModuleVersion>> {
        let tables = self.tables.read().await;
        let mut versions: Vec<ModuleVersion> = tables
            .versions
            .iter()
            .filter(|v| v.module_id == module_id)
            .cloned()
            .collect();
        versions.sort_by_key(|v| v.version_number);
        Ok(versions)
    }

    async fn record_metric(&self, metric: NewMetric) -> Result<Metric> {
        let row = Metric {
            id: Uuid::new_v4(),
            product_id: metric.product_id,
            module_id: metric.module_id,
            version_id: metric.version_id,
            views: metric.views,
            downloads: metric.downloads,
            recorded_at: metric.recorded_at.into(),
        };
        self.tables.write().await.metrics.push(row.clone());
        Ok(row)
    }

    async fn list_metrics(&self, product_id: Uuid) -> Result<Vec<Metric>> {
        let tables = self.tables.read().await;
        let mut metrics: Vec<Metric> = tables
            .metrics
            .iter()
            .filter(|m| m.product_id == product_id)
            .cloned()
            .collect();
        metrics.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at));
        Ok(metrics)
    }

    async fn submit_feedback(&self, feedback: NewFeedback) -> Result<Feedback> {
        let row = Feedback {
            id: Uuid::new_v4(),
            product_id: feedback.product_id,
            module_id: feedback.module_id,
            rating: feedback.rating,
            comment: feedback.comment,
            section: feedback.section,
            created_at: Utc::now().into(),
        };
        self.tables.write().await.feedback.push(row.clone());
        Ok(row)
    }

    async fn list_feedback(&self, product_id: Uuid) -> Result<Vec<Feedback>> {
        let tables = self.tables.read().await;
        Ok(tables
            .feedback
            .iter()
            .filter(|f| f.product_id == product_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn find_subscription(&self, user_id: Uuid) -> Result<Option<Subscription>> {
        Ok(self.tables.read().await.subscriptions.get(&user_id).cloned())
    }

    async fn upsert_subscription(&self, update: SubscriptionUpdate) -> Result<Subscription> {
        let row = Subscription {
            user_id: update.user_id,
            status: update.status.as_str().to_string(),
            provider_customer_id: update.provider_customer_id,
            current_period_end: update.current_period_end.map(Into::into),
            updated_at: Utc::now().into(),
        };
        self.tables
            .write()
            .await
            .subscriptions
            .insert(row.user_id, row.clone());
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::SubscriptionStatus;
    use crate::pipeline::job::{BookLength, JobStatus};

    fn new_job() -> NewJob {
        NewJob {
            user_id: Uuid::new_v4(),
            topic: "Sourdough".to_string(),
            tone: "warm".to_string(),
            length: BookLength::Medium,
        }
    }

    #[tokio::test]
    async fn test_create_and_get_job() {
        let store = MemoryStore::new();
        let job = store.create_job(new_job()).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        let fetched = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(fetched, job);
        assert!(store.get_job(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_version_is_rejected() {
        let store = MemoryStore::new();
        let job = store.create_job(new_job()).await.unwrap();

        let patch = JobPatch {
            title: Some("T".to_string()),
            ..Default::default()
        };
        let updated = store.update_job(job.id, patch.clone(), job.version).await.unwrap();
        assert_eq!(updated.version, job.version + 1);

        let err = store.update_job(job.id, patch, job.version).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_update_missing_job() {
        let store = MemoryStore::new();
        let err = store
            .update_job(Uuid::new_v4(), JobPatch::default(), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::JobNotFound { .. }));
    }

    #[tokio::test]
    async fn test_versions_append_monotonically() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let product = store
            .create_product(user, "Bundle".to_string(), None, None)
            .await
            .unwrap();
        let module = store
            .create_module(product.id, user, ModuleType::Course, "Course".to_string())
            .await
            .unwrap();
        assert_eq!(module.module_status(), ModuleStatus::Draft);

        let (_, v1) = store.append_version(module.id, "one".into()).await.unwrap();
        let (module, v2) = store.append_version(module.id, "two".into()).await.unwrap();

        assert_eq!(v1.version_number, 1);
        assert_eq!(v2.version_number, 2);
        assert_eq!(module.module_status(), ModuleStatus::Generated);

        let versions = store.list_versions(module.id).await.unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].content, "one");
    }

    #[tokio::test]
    async fn test_subscription_upsert_replaces() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        for status in [SubscriptionStatus::Active, SubscriptionStatus::Cancelled] {
            store
                .upsert_subscription(SubscriptionUpdate {
                    user_id: user,
                    status,
                    provider_customer_id: None,
                    current_period_end: None,
                })
                .await
                .unwrap();
        }
        let sub = store.find_subscription(user).await.unwrap().unwrap();
        assert!(!sub.is_active());
    }
}
