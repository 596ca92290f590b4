//! Repository pattern for database operations
//!
//! Postgres implementation of the storage traits, built on SeaORM.

use crate::db::models::*;
use crate::db::store::{
    CatalogStore, JobStore, NewFeedback, NewMetric, SubscriptionStore, SubscriptionUpdate,
};
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use crate::pipeline::job::{EbookJob, JobPatch, NewJob};
use async_trait::async_trait;
use sea_orm::sea_query::OnConflict;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use uuid::Uuid;

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }
}

// ============================================================================
// Job Operations
// ============================================================================

#[async_trait]
impl JobStore for Repository {
    async fn create_job(&self, new: NewJob) -> Result<EbookJob> {
        let job = EbookJob::new(Uuid::new_v4(), new, chrono::Utc::now());
        let active = EbookJobActiveModel::try_from(&job)?;
        active.insert(self.write_conn()).await?;
        Ok(job)
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<EbookJob>> {
        // Read from primary: the poller must observe its own writes
        EbookJobEntity::find_by_id(id)
            .one(self.write_conn())
            .await?
            .map(EbookJob::try_from)
            .transpose()
    }

    async fn update_job(&self, id: Uuid, patch: JobPatch, expected_version: i32) -> Result<EbookJob> {
        let row = EbookJobEntity::find_by_id(id)
            .one(self.write_conn())
            .await?
            .ok_or_else(|| AppError::JobNotFound { id: id.to_string() })?;

        let mut job = EbookJob::try_from(row)?;
        if job.version != expected_version {
            return Err(AppError::Conflict {
                resource: "ebook_job".to_string(),
                id: id.to_string(),
            });
        }

        job.apply(patch, chrono::Utc::now())?;

        let mut active = EbookJobActiveModel::try_from(&job)?;
        active.id = NotSet;
        active.created_at = NotSet;

        let result = EbookJobEntity::update_many()
            .set(active)
            .filter(EbookJobColumn::Id.eq(id))
            .filter(EbookJobColumn::Version.eq(expected_version))
            .exec(self.write_conn())
            .await?;

        if result.rows_affected == 0 {
            tracing::debug!(job_id = %id, expected_version, "Lost optimistic update race");
            return Err(AppError::Conflict {
                resource: "ebook_job".to_string(),
                id: id.to_string(),
            });
        }

        Ok(job)
    }

    async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }
}

// ============================================================================
// Catalog Operations
// ============================================================================

#[async_trait]
impl CatalogStore for Repository {
    async fn create_product(
        &self,
        user_id: Uuid,
        name: String,
        description: Option<String>,
        ebook_job_id: Option<Uuid>,
    ) -> Result<Product> {
        let now = chrono::Utc::now();

        let product = ProductActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            name: Set(name),
            description: Set(description),
            ebook_job_id: Set(ebook_job_id),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        product.insert(self.write_conn()).await.map_err(Into::into)
    }

    async fn find_product(&self, id: Uuid) -> Result<Option<Product>> {
        ProductEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn list_products(&self, user_id: Uuid) -> Result<Vec<Product>> {
        ProductEntity::find()
            .filter(ProductColumn::UserId.eq(user_id))
            .order_by_desc(ProductColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn create_module(
        &self,
        product_id: Uuid,
        user_id: Uuid,
        module_type: ModuleType,
        title: String,
    ) -> Result<Module> {
        let now = chrono::Utc::now();

        let module = ModuleActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product_id),
            user_id: Set(user_id),
            module_type: Set(module_type.as_str().to_string()),
            title: Set(title),
            status: Set(ModuleStatus::Draft.as_str().to_string()),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        module.insert(self.write_conn()).await.map_err(Into::into)
    }

    async fn find_module(&self, id: Uuid) -> Result<Option<Module>> {
        ModuleEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn list_modules(&self, product_id: Uuid) -> Result<Vec<Module>> {
        ModuleEntity::find()
            .filter(ModuleColumn::ProductId.eq(product_id))
            .order_by_asc(ModuleColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn append_version(&self, module_id: Uuid, content: String) -> Result<(Module, ModuleVersion)> {
        let now = chrono::Utc::now();
        let txn = self.write_conn().begin().await?;

        let module = ModuleEntity::find_by_id(module_id)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::ModuleNotFound { id: module_id.to_string() })?;

        // (module_id, version_number) is unique in the schema, so a racing
        // append fails the insert instead of duplicating a number
        let latest = ModuleVersionEntity::find()
            .filter(ModuleVersionColumn::ModuleId.eq(module_id))
            .order_by_desc(ModuleVersionColumn::VersionNumber)
            .one(&txn)
            .await?;
        let next_number = latest.map(|v| v.version_number + 1).unwrap_or(1);

        let version = ModuleVersionActiveModel {
            id: Set(Uuid::new_v4()),
            module_id: Set(module_id),
            version_number: Set(next_number),
            content: Set(content),
            created_at: Set(now.into()),
        }
        .insert(&txn)
        .await?;

        let mut active: ModuleActiveModel = module.into();
        active.status = Set(ModuleStatus::Generated.as_str().to_string());
        active.updated_at = Set(now.into());
        let module = active.update(&txn).await?;

        txn.commit().await?;
        Ok((module, version))
    }

    async fn list_versions(&self, module_id: Uuid) -> Result<Vec<ModuleVersion>> {
        ModuleVersionEntity::find()
            .filter(ModuleVersionColumn::ModuleId.eq(module_id))
            .order_by_asc(ModuleVersionColumn::VersionNumber)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn record_metric(&self, metric: NewMetric) -> Result<Metric> {
        let row = MetricActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(metric.product_id),
            module_id: Set(metric.module_id),
            version_id: Set(metric.version_id),
            views: Set(metric.views),
            downloads: Set(metric.downloads),
            recorded_at: Set(metric.recorded_at.into()),
        };

        row.insert(self.write_conn()).await.map_err(Into::into)
    }

    async fn list_metrics(&self, product_id: Uuid) -> Result<Vec<Metric>> {
        MetricEntity::find()
            .filter(MetricColumn::ProductId.eq(product_id))
            .order_by_asc(MetricColumn::RecordedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn submit_feedback(&self, feedback: NewFeedback) -> Result<Feedback> {
        let row = FeedbackActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(feedback.product_id),
            module_id: Set(feedback.module_id),
            rating: Set(feedback.rating),
            comment: Set(feedback.comment),
            section: Set(feedback.section),
            created_at: Set(chrono::Utc::now().into()),
        };

        row.insert(self.write_conn()).await.map_err(Into::into)
    }

    async fn list_feedback(&self, product_id: Uuid) -> Result<Vec<Feedback>> {
        FeedbackEntity::find()
            .filter(FeedbackColumn::ProductId.eq(product_id))
            .order_by_asc(FeedbackColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }
}

// ============================================================================
// Subscription Operations
// ============================================================================

#[async_trait]
impl SubscriptionStore for Repository {
    async fn find_subscription(&self, user_id: Uuid) -> Result<Option<Subscription>> {
        SubscriptionEntity::find_by_id(user_id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn upsert_subscription(&self, update: SubscriptionUpdate) -> Result<Subscription> {
        let row = SubscriptionActiveModel {
            user_id: Set(update.user_id),
            status: Set(update.status.as_str().to_string()),
            provider_customer_id: Set(update.provider_customer_id),
            current_period_end: Set(update.current_period_end.map(Into::into)),
            updated_at: Set(chrono::Utc::now().into()),
        };

        SubscriptionEntity::insert(row)
            .on_conflict(
                OnConflict::column(SubscriptionColumn::UserId)
                    .update_columns([
                        SubscriptionColumn::Status,
                        SubscriptionColumn::ProviderCustomerId,
                        SubscriptionColumn::CurrentPeriodEnd,
                        SubscriptionColumn::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(self.write_conn())
            .await?;

        SubscriptionEntity::find_by_id(update.user_id)
            .one(self.write_conn())
            .await?
            .ok_or_else(|| AppError::Internal {
                message: format!("subscription for {} vanished after upsert", update.user_id),
            })
    }
}
