//! Purchase-order reference catalog.
//!
//! Loaded once from CSV at stage construction and cached for the lifetime
//! of the pipeline. Exact lookups are keyed by invoice number and order id;
//! fuzzy fallback scans linearly.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use super::ValidationError;

/// One previously issued/approved order.
#[derive(Debug, Clone, Deserialize)]
pub struct PurchaseOrder {
    pub invoice_number: String,
    pub customer_name: String,
    pub total: f64,
    pub order_id: String,
}

#[derive(Debug)]
pub struct PurchaseOrderCatalog {
    orders: Vec<PurchaseOrder>,
    by_invoice: HashMap<String, usize>,
    by_order: HashMap<String, usize>,
}

impl PurchaseOrderCatalog {
    /// Load from a CSV file with a header row containing at minimum
    /// `invoice_number, customer_name, total, order_id`. A missing or
    /// unreadable catalog is fatal for the whole run.
    pub fn load(path: &Path) -> Result<Self, ValidationError> {
        if !path.exists() {
            return Err(ValidationError::CatalogNotFound(path.to_path_buf()));
        }

        let mut reader = csv::Reader::from_path(path)?;
        let mut orders = Vec::new();
        for row in reader.deserialize() {
            let order: PurchaseOrder = row?;
            orders.push(order);
        }

        if orders.is_empty() {
            return Err(ValidationError::CatalogEmpty);
        }

        tracing::info!(rows = orders.len(), path = %path.display(), "Purchase-order catalog loaded");
        Ok(Self::from_orders(orders))
    }

    pub fn from_orders(orders: Vec<PurchaseOrder>) -> Self {
        let mut by_invoice = HashMap::with_capacity(orders.len());
        let mut by_order = HashMap::with_capacity(orders.len());
        for (idx, order) in orders.iter().enumerate() {
            by_invoice.insert(normalize_key(&order.invoice_number), idx);
            by_order.insert(normalize_key(&order.order_id), idx);
        }
        Self {
            orders,
            by_invoice,
            by_order,
        }
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn find_by_invoice_number(&self, invoice_number: &str) -> Option<&PurchaseOrder> {
        self.by_invoice
            .get(&normalize_key(invoice_number))
            .map(|&idx| &self.orders[idx])
    }

    pub fn find_by_order_id(&self, order_id: &str) -> Option<&PurchaseOrder> {
        self.by_order
            .get(&normalize_key(order_id))
            .map(|&idx| &self.orders[idx])
    }

    /// Linear scan for the fuzzy fallback path.
    pub fn iter(&self) -> impl Iterator<Item = &PurchaseOrder> {
        self.orders.iter()
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) fn sample_catalog() -> PurchaseOrderCatalog {
        PurchaseOrderCatalog::from_orders(vec![
            PurchaseOrder {
                invoice_number: "14021".into(),
                customer_name: "Bill Eplett".into(),
                total: 9466.5,
                order_id: "ES-2025-BE11335139-41340".into(),
            },
            PurchaseOrder {
                invoice_number: "INV-001".into(),
                customer_name: "Test Customer".into(),
                total: 110.0,
                order_id: "ORD-001".into(),
            },
            PurchaseOrder {
                invoice_number: "INV-550".into(),
                customer_name: "Acme Industrial Supplies".into(),
                total: 30_000.0,
                order_id: "ORD-550".into(),
            },
        ])
    }

    fn write_catalog_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{contents}").unwrap();
        file
    }

    #[test]
    fn loads_csv_with_required_columns() {
        let file = write_catalog_csv(
            "invoice_number,customer_name,total,order_id\n\
             14021,Bill Eplett,9466.5,ES-2025-BE11335139-41340\n\
             INV-001,Test Customer,110.0,ORD-001\n",
        );
        let catalog = PurchaseOrderCatalog::load(file.path()).unwrap();
        assert_eq!(catalog.len(), 2);

        let po = catalog.find_by_invoice_number("14021").unwrap();
        assert_eq!(po.customer_name, "Bill Eplett");
        assert!((po.total - 9466.5).abs() < f64::EPSILON);
    }

    #[test]
    fn tolerates_extra_columns() {
        let file = write_catalog_csv(
            "invoice_number,customer_name,total,order_id,region\n\
             INV-9,Someone,50.0,ORD-9,EMEA\n",
        );
        let catalog = PurchaseOrderCatalog::load(file.path()).unwrap();
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn missing_file_is_fatal() {
        let err = PurchaseOrderCatalog::load(Path::new("/no/such/catalog.csv")).unwrap_err();
        assert!(matches!(err, ValidationError::CatalogNotFound(_)));
    }

    #[test]
    fn empty_catalog_is_fatal() {
        let file = write_catalog_csv("invoice_number,customer_name,total,order_id\n");
        let err = PurchaseOrderCatalog::load(file.path()).unwrap_err();
        assert!(matches!(err, ValidationError::CatalogEmpty));
    }

    #[test]
    fn corrupt_row_is_fatal() {
        let file = write_catalog_csv(
            "invoice_number,customer_name,total,order_id\n\
             INV-1,Someone,not_a_number,ORD-1\n",
        );
        let err = PurchaseOrderCatalog::load(file.path()).unwrap_err();
        assert!(matches!(err, ValidationError::CatalogRead(_)));
    }

    #[test]
    fn lookups_are_case_and_whitespace_insensitive() {
        let catalog = sample_catalog();
        assert!(catalog.find_by_invoice_number(" inv-001 ").is_some());
        assert!(catalog.find_by_order_id("ord-001").is_some());
        assert!(catalog.find_by_invoice_number("INV-404").is_none());
    }
}
