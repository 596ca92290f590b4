//! Monetization catalog
//!
//! Products, their derivative modules and the append-only version history
//! of each module, plus the metric and feedback rows that feed the
//! dashboard. Every operation is scoped to the calling user: resources of
//! other users are reported as missing.

pub mod prompts;

use crate::analytics::{self, Dashboard};
use crate::db::models::{Feedback, Metric, Module, ModuleType, ModuleVersion, Product};
use crate::db::store::{NewFeedback, NewMetric};
use crate::db::{CatalogStore, JobStore};
use crate::errors::{AppError, Result};
use crate::llm::LlmClient;
use crate::metrics;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct NewProduct {
    pub name: String,
    pub description: Option<String>,
    pub ebook_job_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct MetricSample {
    pub product_id: Uuid,
    pub module_id: Option<Uuid>,
    pub version_id: Option<Uuid>,
    pub views: i64,
    pub downloads: i64,
}

#[derive(Debug, Clone)]
pub struct FeedbackEntry {
    pub product_id: Uuid,
    pub module_id: Option<Uuid>,
    pub rating: i32,
    pub comment: Option<String>,
    pub section: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSummary {
    #[serde(flatten)]
    pub product: Product,
    pub module_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDetail {
    pub module: Module,
    /// Newest first
    pub versions: Vec<ModuleVersion>,
}

/// Catalog operations over the injected stores
#[derive(Clone)]
pub struct Catalog {
    store: Arc<dyn CatalogStore>,
    jobs: Arc<dyn JobStore>,
    llm: Arc<LlmClient>,
    max_tokens: u32,
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Catalog {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        jobs: Arc<dyn JobStore>,
        llm: Arc<LlmClient>,
        max_tokens: u32,
    ) -> Self {
        Self {
            store,
            jobs,
            llm,
            max_tokens,
        }
    }

    async fn owned_product(&self, owner: Uuid, product_id: Uuid) -> Result<Product> {
        match self.store.find_product(product_id).await? {
            Some(product) if product.user_id == owner => Ok(product),
            _ => Err(AppError::ProductNotFound {
                id: product_id.to_string(),
            }),
        }
    }

    async fn owned_module(&self, owner: Uuid, module_id: Uuid) -> Result<Module> {
        match self.store.find_module(module_id).await? {
            Some(module) if module.user_id == owner => Ok(module),
            _ => Err(AppError::ModuleNotFound {
                id: module_id.to_string(),
            }),
        }
    }

    #[instrument(skip(self, new), fields(name = %new.name))]
    pub async fn create_product(&self, owner: Uuid, new: NewProduct) -> Result<Product> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(AppError::MissingField {
                field: "name".to_string(),
            });
        }

        if let Some(job_id) = new.ebook_job_id {
            match self.jobs.get_job(job_id).await? {
                Some(job) if job.user_id == owner => {}
                _ => {
                    return Err(AppError::JobNotFound {
                        id: job_id.to_string(),
                    })
                }
            }
        }

        let product = self
            .store
            .create_product(
                owner,
                name.to_string(),
                blank_to_none(new.description),
                new.ebook_job_id,
            )
            .await?;
        info!(product_id = %product.id, "Product created");
        Ok(product)
    }

    /// Products of `owner`, newest first, with their module counts
    pub async fn list_products(&self, owner: Uuid) -> Result<Vec<ProductSummary>> {
        let products = self.store.list_products(owner).await?;
        let mut summaries = Vec::with_capacity(products.len());
        for product in products {
            let module_count = self.store.list_modules(product.id).await?.len();
            summaries.push(ProductSummary {
                product,
                module_count,
            });
        }
        Ok(summaries)
    }

    /// Create a draft module. Without a title one is derived from the
    /// module type and product name.
    #[instrument(skip(self, title))]
    pub async fn create_module(
        &self,
        owner: Uuid,
        product_id: Uuid,
        module_type: ModuleType,
        title: Option<String>,
    ) -> Result<Module> {
        let product = self.owned_product(owner, product_id).await?;
        let title = blank_to_none(title)
            .unwrap_or_else(|| format!("{}: {}", product.name, module_type.label()));

        let module = self
            .store
            .create_module(product.id, owner, module_type, title)
            .await?;
        info!(module_id = %module.id, module_type = module_type.as_str(), "Module created");
        Ok(module)
    }

    /// Generate the next version of a module. Earlier versions stay as they
    /// were.
    #[instrument(skip(self, instructions))]
    pub async fn generate_module(
        &self,
        owner: Uuid,
        module_id: Uuid,
        instructions: Option<String>,
    ) -> Result<(Module, ModuleVersion)> {
        let start = Instant::now();
        let result = self.generate_module_inner(owner, module_id, instructions).await;
        metrics::record_stage("module", start.elapsed().as_secs_f64(), result.is_ok());
        result
    }

    async fn generate_module_inner(
        &self,
        owner: Uuid,
        module_id: Uuid,
        instructions: Option<String>,
    ) -> Result<(Module, ModuleVersion)> {
        let module = self.owned_module(owner, module_id).await?;
        let product = self.owned_product(owner, module.product_id).await?;
        let kind = module.kind()?;

        let source = match product.ebook_job_id {
            Some(job_id) => {
                let job = self.jobs.get_job(job_id).await?;
                if job.is_none() {
                    warn!(%job_id, "Linked ebook no longer exists, generating without it");
                }
                job
            }
            None => None,
        };

        let prompt = prompts::module_prompt(
            kind,
            &module.title,
            &product,
            source.as_ref(),
            instructions.as_deref(),
        );
        let content = self.llm.call(&prompt, self.max_tokens).await?;

        let (module, version) = self.store.append_version(module.id, content).await?;
        info!(version = version.version_number, "Module version generated");
        Ok((module, version))
    }

    pub async fn get_module(&self, owner: Uuid, module_id: Uuid) -> Result<ModuleDetail> {
        let module = self.owned_module(owner, module_id).await?;
        let mut versions = self.store.list_versions(module.id).await?;
        versions.reverse();
        Ok(ModuleDetail { module, versions })
    }

    pub async fn record_metric(&self, owner: Uuid, sample: MetricSample) -> Result<Metric> {
        let product = self.owned_product(owner, sample.product_id).await?;

        if sample.views < 0 || sample.downloads < 0 {
            return Err(AppError::Validation {
                message: "views and downloads must not be negative".to_string(),
                field: None,
            });
        }

        if let Some(module_id) = sample.module_id {
            let module = self.owned_module(owner, module_id).await?;
            if module.product_id != product.id {
                return Err(AppError::ModuleNotFound {
                    id: module_id.to_string(),
                });
            }
            if let Some(version_id) = sample.version_id {
                let versions = self.store.list_versions(module_id).await?;
                if !versions.iter().any(|v| v.id == version_id) {
                    return Err(AppError::NotFound {
                        resource_type: "module_version".to_string(),
                        id: version_id.to_string(),
                    });
                }
            }
        } else if sample.version_id.is_some() {
            return Err(AppError::Validation {
                message: "versionId requires moduleId".to_string(),
                field: Some("versionId".to_string()),
            });
        }

        self.store
            .record_metric(NewMetric {
                product_id: product.id,
                module_id: sample.module_id,
                version_id: sample.version_id,
                views: sample.views,
                downloads: sample.downloads,
                recorded_at: Utc::now(),
            })
            .await
    }

    pub async fn submit_feedback(&self, owner: Uuid, entry: FeedbackEntry) -> Result<Feedback> {
        if !(1..=5).contains(&entry.rating) {
            return Err(AppError::Validation {
                message: format!("rating must be between 1 and 5 (got {})", entry.rating),
                field: Some("rating".to_string()),
            });
        }

        let product = self.owned_product(owner, entry.product_id).await?;
        if let Some(module_id) = entry.module_id {
            let module = self.owned_module(owner, module_id).await?;
            if module.product_id != product.id {
                return Err(AppError::ModuleNotFound {
                    id: module_id.to_string(),
                });
            }
        }

        self.store
            .submit_feedback(NewFeedback {
                product_id: product.id,
                module_id: entry.module_id,
                rating: entry.rating,
                comment: blank_to_none(entry.comment),
                section: blank_to_none(entry.section),
            })
            .await
    }

    /// Aggregates for one product
    #[instrument(skip(self))]
    pub async fn dashboard(&self, owner: Uuid, product_id: Uuid) -> Result<Dashboard> {
        let product = self.owned_product(owner, product_id).await?;

        let metrics = self.store.list_metrics(product.id).await?;
        let feedback = self.store.list_feedback(product.id).await?;

        let mut versions = Vec::new();
        for module in self.store.list_modules(product.id).await? {
            versions.extend(self.store.list_versions(module.id).await?);
        }

        Ok(analytics::build_dashboard(&metrics, &feedback, &versions, Utc::now()))
    }
}
