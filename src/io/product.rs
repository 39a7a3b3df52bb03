use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A reference document about the product sold in a case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductDocument {
    pub title: String,
    pub content: String,
}

/// Source of product reference data for product-verification steps
#[async_trait]
pub trait ProductContextProvider: Send + Sync {
    /// Zero or more documents for a case; an empty list is not an error
    async fn product_documents(&self, fiche_id: &str) -> Result<Vec<ProductDocument>>;
}

/// Render documents as a prompt section; None when there is nothing to show
pub fn render_product_context(documents: &[ProductDocument]) -> Option<String> {
    let sections: Vec<String> = documents
        .iter()
        .filter(|d| !d.content.trim().is_empty())
        .map(|d| format!("### {}\n{}", d.title, d.content.trim()))
        .collect();

    if sections.is_empty() {
        None
    } else {
        Some(sections.join("\n\n"))
    }
}

/// Catalog backed by `<root>/products/<fiche_id>.json`
#[derive(Debug, Clone)]
pub struct JsonProductCatalog {
    root: PathBuf,
}

impl JsonProductCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ProductContextProvider for JsonProductCatalog {
    async fn product_documents(&self, fiche_id: &str) -> Result<Vec<ProductDocument>> {
        let path = self.root.join("products").join(format!("{}.json", fiche_id));

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {:?}", path)),
        };

        serde_json::from_str(&content).with_context(|| format!("Failed to parse {:?}", path))
    }
}
