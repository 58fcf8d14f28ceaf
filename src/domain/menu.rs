//! Menu entities produced by the sheet parser

use crate::error::PipelineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    #[default]
    Available,
    NotAvailable,
    Deleted,
}

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductStatus::Available => "available",
            ProductStatus::NotAvailable => "not_available",
            ProductStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ProductStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProductStatus {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(ProductStatus::Available),
            "not_available" => Ok(ProductStatus::NotAvailable),
            "deleted" => Ok(ProductStatus::Deleted),
            other => Err(PipelineError::validation(format!(
                "invalid product status '{other}', expected available, not_available or deleted"
            ))),
        }
    }
}

/// Attribute bag of a product.
///
/// Only `options` is modelled; unknown keys are accepted and dropped on read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductAttributes {
    #[serde(default)]
    pub options: Vec<String>,
}

impl ProductAttributes {
    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub ext_id: String,
    pub name: String,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_old: Option<f64>,
    #[serde(default)]
    pub status: ProductStatus,
    #[serde(default, skip_serializing_if = "ProductAttributes::is_empty")]
    pub attributes: ProductAttributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<String>,
    #[serde(default)]
    pub is_required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Menu {
    /// Assigned by the menu store on create
    #[serde(default, rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub restaurant_id: String,
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default)]
    pub attributes_groups: Vec<AttributeGroup>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Menu {
    /// Unsaved menu; `name` and `restaurant_id` both take the restaurant name
    pub fn new(
        restaurant_name: impl Into<String>,
        products: Vec<Product>,
        attributes_groups: Vec<AttributeGroup>,
        attributes: Vec<Attribute>,
    ) -> Self {
        let restaurant_name = restaurant_name.into();
        let now = Utc::now();
        Self {
            id: None,
            name: restaurant_name.clone(),
            restaurant_id: restaurant_name,
            products,
            attributes_groups,
            attributes,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn product(&self, ext_id: &str) -> Option<&Product> {
        self.products.iter().find(|p| p.ext_id == ext_id)
    }

    /// Overwrite a product's status, returning the status it had before
    pub fn set_product_status(&mut self, ext_id: &str, status: ProductStatus) -> Option<ProductStatus> {
        let product = self.products.iter_mut().find(|p| p.ext_id == ext_id)?;
        let previous = std::mem::replace(&mut product.status, status);
        self.updated_at = Utc::now();
        Some(previous)
    }
}
