//! Dataset and operation-set metadata persistence
//!
//! [`MetadataStore`] is the boundary to the document store that owns dataset
//! and operation-set records. [`InMemoryMetadataStore`] keeps them in process.

use crate::error::{Error, Result};
use crate::model::{Dataset, OperationSet, OperationSetUpdate};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// CRUD over dataset and operation-set records
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Persist a new dataset
    async fn insert_dataset(&self, dataset: Dataset) -> Result<Dataset>;

    /// Fetch a dataset, [`Error::NotFound`] if absent
    async fn get_dataset(&self, id: &str) -> Result<Dataset>;

    /// All datasets
    async fn list_datasets(&self) -> Result<Vec<Dataset>>;

    /// Delete a dataset together with its operation sets
    ///
    /// Returns the operation sets that were removed.
    async fn delete_dataset(&self, id: &str) -> Result<Vec<OperationSet>>;

    /// Persist a new operation set; its dataset must exist
    async fn insert_operation_set(&self, opset: OperationSet) -> Result<OperationSet>;

    /// Fetch an operation set, [`Error::NotFound`] if absent
    async fn get_operation_set(&self, id: &str) -> Result<OperationSet>;

    /// Operation sets, optionally restricted to one dataset
    async fn list_operation_sets(&self, dataset_id: Option<&str>) -> Result<Vec<OperationSet>>;

    /// Apply `update` in place, returning `(previous, current)`
    async fn update_operation_set(
        &self,
        id: &str,
        update: &OperationSetUpdate,
    ) -> Result<(OperationSet, OperationSet)>;

    /// Delete an operation set, returning the removed record
    async fn delete_operation_set(&self, id: &str) -> Result<OperationSet>;
}

fn dataset_not_found(id: &str) -> Error {
    Error::NotFound {
        kind: "dataset",
        id: id.to_string(),
    }
}

fn opset_not_found(id: &str) -> Error {
    Error::NotFound {
        kind: "operation set",
        id: id.to_string(),
    }
}

/// Process-local [`MetadataStore`]
#[derive(Default)]
pub struct InMemoryMetadataStore {
    datasets: RwLock<HashMap<String, Dataset>>,
    opsets: RwLock<HashMap<String, OperationSet>>,
}

impl InMemoryMetadataStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn insert_dataset(&self, dataset: Dataset) -> Result<Dataset> {
        let mut datasets = self.datasets.write();
        if datasets.contains_key(&dataset.id) {
            return Err(Error::Metadata(format!(
                "dataset {} already exists",
                dataset.id
            )));
        }
        datasets.insert(dataset.id.clone(), dataset.clone());
        Ok(dataset)
    }

    async fn get_dataset(&self, id: &str) -> Result<Dataset> {
        self.datasets
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| dataset_not_found(id))
    }

    async fn list_datasets(&self) -> Result<Vec<Dataset>> {
        let mut datasets: Vec<Dataset> = self.datasets.read().values().cloned().collect();
        datasets.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(datasets)
    }

    async fn delete_dataset(&self, id: &str) -> Result<Vec<OperationSet>> {
        // Lock order: datasets, then opsets
        let mut datasets = self.datasets.write();
        let mut opsets = self.opsets.write();

        datasets.remove(id).ok_or_else(|| dataset_not_found(id))?;

        let owned: Vec<String> = opsets
            .values()
            .filter(|o| o.dataset_id == id)
            .map(|o| o.id.clone())
            .collect();
        Ok(owned.iter().filter_map(|o| opsets.remove(o)).collect())
    }

    async fn insert_operation_set(&self, opset: OperationSet) -> Result<OperationSet> {
        opset.validate()?;
        let datasets = self.datasets.read();
        let mut opsets = self.opsets.write();

        if !datasets.contains_key(&opset.dataset_id) {
            return Err(dataset_not_found(&opset.dataset_id));
        }
        if opsets.contains_key(&opset.id) {
            return Err(Error::Metadata(format!(
                "operation set {} already exists",
                opset.id
            )));
        }
        opsets.insert(opset.id.clone(), opset.clone());
        Ok(opset)
    }

    async fn get_operation_set(&self, id: &str) -> Result<OperationSet> {
        self.opsets
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| opset_not_found(id))
    }

    async fn list_operation_sets(&self, dataset_id: Option<&str>) -> Result<Vec<OperationSet>> {
        let mut opsets: Vec<OperationSet> = self
            .opsets
            .read()
            .values()
            .filter(|o| dataset_id.map_or(true, |d| o.dataset_id == d))
            .cloned()
            .collect();
        opsets.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(opsets)
    }

    async fn update_operation_set(
        &self,
        id: &str,
        update: &OperationSetUpdate,
    ) -> Result<(OperationSet, OperationSet)> {
        let mut opsets = self.opsets.write();
        let current = opsets.get_mut(id).ok_or_else(|| opset_not_found(id))?;
        let next = current.apply(update)?;
        let previous = std::mem::replace(current, next.clone());
        Ok((previous, next))
    }

    async fn delete_operation_set(&self, id: &str) -> Result<OperationSet> {
        self.opsets
            .write()
            .remove(id)
            .ok_or_else(|| opset_not_found(id))
    }
}
