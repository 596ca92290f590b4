//! SeaORM entity models
//!
//! Database entities for NexoraOS

pub mod ebook_job;
mod product;
mod module;
mod module_version;
mod metric;
mod feedback;
mod subscription;

pub use ebook_job::{
    Entity as EbookJobEntity,
    Model as EbookJobRow,
    ActiveModel as EbookJobActiveModel,
    Column as EbookJobColumn,
};

pub use product::{
    Entity as ProductEntity,
    Model as Product,
    ActiveModel as ProductActiveModel,
    Column as ProductColumn,
};

pub use module::{
    Entity as ModuleEntity,
    Model as Module,
    ActiveModel as ModuleActiveModel,
    Column as ModuleColumn,
    ModuleStatus,
    ModuleType,
};

pub use module_version::{
    Entity as ModuleVersionEntity,
    Model as ModuleVersion,
    ActiveModel as ModuleVersionActiveModel,
    Column as ModuleVersionColumn,
};

pub use metric::{
    Entity as MetricEntity,
    Model as Metric,
    ActiveModel as MetricActiveModel,
    Column as MetricColumn,
};

pub use feedback::{
    Entity as FeedbackEntity,
    Model as Feedback,
    ActiveModel as FeedbackActiveModel,
    Column as FeedbackColumn,
};

pub use subscription::{
    Entity as SubscriptionEntity,
    Model as Subscription,
    ActiveModel as SubscriptionActiveModel,
    Column as SubscriptionColumn,
    SubscriptionStatus,
};
