//! Monetization module entity (course, lead magnet, email sequence, ...)

use crate::errors::{AppError, Result as AppResult};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Kind of derivative asset a module produces
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleType {
    Course,
    LeadMagnet,
    EmailSequence,
    LandingPage,
    SalesPage,
    SocialPosts,
}

impl ModuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleType::Course => "course",
            ModuleType::LeadMagnet => "lead_magnet",
            ModuleType::EmailSequence => "email_sequence",
            ModuleType::LandingPage => "landing_page",
            ModuleType::SalesPage => "sales_page",
            ModuleType::SocialPosts => "social_posts",
        }
    }

    /// Human label used for default titles
    pub fn label(&self) -> &'static str {
        match self {
            ModuleType::Course => "Mini Course",
            ModuleType::LeadMagnet => "Lead Magnet",
            ModuleType::EmailSequence => "Email Sequence",
            ModuleType::LandingPage => "Landing Page",
            ModuleType::SalesPage => "Sales Page",
            ModuleType::SocialPosts => "Social Media Posts",
        }
    }
}

impl FromStr for ModuleType {
    type Err = AppError;

    fn from_str(s: &str) -> AppResult<Self> {
        match s {
            "course" => Ok(ModuleType::Course),
            "lead_magnet" => Ok(ModuleType::LeadMagnet),
            "email_sequence" => Ok(ModuleType::EmailSequence),
            "landing_page" => Ok(ModuleType::LandingPage),
            "sales_page" => Ok(ModuleType::SalesPage),
            "social_posts" => Ok(ModuleType::SocialPosts),
            other => Err(AppError::Validation {
                message: format!("unknown module type '{}'", other),
                field: Some("moduleType".to_string()),
            }),
        }
    }
}

/// Module status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    Draft,
    Generated,
}

impl ModuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleStatus::Draft => "draft",
            ModuleStatus::Generated => "generated",
        }
    }
}

impl From<String> for ModuleStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "generated" => ModuleStatus::Generated,
            _ => ModuleStatus::Draft,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[sea_orm(table_name = "monetization_modules")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub product_id: Uuid,

    pub user_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub module_type: String,

    #[sea_orm(column_type = "Text")]
    pub title: String,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Get the module type as an enum
    pub fn kind(&self) -> AppResult<ModuleType> {
        self.module_type.parse()
    }

    /// Get the module status as an enum
    pub fn module_status(&self) -> ModuleStatus {
        ModuleStatus::from(self.status.clone())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,

    #[sea_orm(has_many = "super::module_version::Entity")]
    Versions,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl Related<super::module_version::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Versions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
