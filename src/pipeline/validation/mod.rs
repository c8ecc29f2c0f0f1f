pub mod catalog;
pub mod fuzzy;
pub mod stage;

pub use catalog::{PurchaseOrder, PurchaseOrderCatalog};
pub use fuzzy::similarity;
pub use stage::ValidationStage;

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Purchase-order catalog not found at {0}")]
    CatalogNotFound(PathBuf),

    #[error("Failed to read purchase-order catalog: {0}")]
    CatalogRead(#[from] csv::Error),

    #[error("Purchase-order catalog is empty")]
    CatalogEmpty,
}
