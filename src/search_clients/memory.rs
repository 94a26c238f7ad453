use crate::error::AppError;
use crate::metadata::ImageRecord;
use crate::query::Filter;
use crate::search::MetadataIndex;
use async_trait::async_trait;
use std::collections::HashSet;
use tokio::sync::RwLock;

/// In-process index. Natural order is insertion order; a replace keeps the
/// record's position.
#[derive(Default)]
pub struct MemoryIndex {
    records: RwLock<Vec<ImageRecord>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

fn window(skip: i64, limit: i64) -> Result<(usize, usize), AppError> {
    if skip < 0 {
        return Err(AppError::InvalidQuery(format!("skip must be non-negative, got {}", skip)));
    }
    if limit < 0 {
        return Err(AppError::InvalidQuery(format!("limit must be non-negative, got {}", limit)));
    }
    Ok((skip as usize, limit as usize))
}

#[async_trait]
impl MetadataIndex for MemoryIndex {
    async fn ensure_index_exists(&self) -> Result<(), AppError> {
        log::debug!("Memory index needs no setup.");
        Ok(())
    }

    async fn insert(&self, record: ImageRecord) -> Result<(), AppError> {
        let mut records = self.records.write().await;
        if records.iter().any(|r| r.image_id == record.image_id) {
            return Err(AppError::Generic(format!("duplicate image_id {}", record.image_id)));
        }
        log::trace!("Inserting record {} into memory index", record.image_id);
        records.push(record);
        Ok(())
    }

    async fn get(&self, image_id: &str) -> Result<Option<ImageRecord>, AppError> {
        let records = self.records.read().await;
        Ok(records.iter().find(|r| r.image_id == image_id).cloned())
    }

    async fn count(&self, filter: &Filter) -> Result<u64, AppError> {
        let records = self.records.read().await;
        Ok(records.iter().filter(|r| filter.matches(r)).count() as u64)
    }

    async fn find(&self, filter: &Filter, skip: i64, limit: i64) -> Result<Vec<ImageRecord>, AppError> {
        let (skip, limit) = window(skip, limit)?;
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| filter.matches(r))
            .skip(skip)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn replace(&self, record: ImageRecord) -> Result<(), AppError> {
        let mut records = self.records.write().await;
        match records.iter_mut().find(|r| r.image_id == record.image_id) {
            Some(slot) => {
                *slot = record;
                Ok(())
            }
            None => Err(AppError::NotFound("Image not found".into())),
        }
    }

    async fn delete(&self, image_id: &str) -> Result<bool, AppError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.image_id != image_id);
        Ok(records.len() != before)
    }

    async fn delete_many(&self, image_ids: &[String]) -> Result<Vec<ImageRecord>, AppError> {
        let ids: HashSet<&str> = image_ids.iter().map(String::as_str).collect();
        let mut records = self.records.write().await;
        let (removed, kept): (Vec<_>, Vec<_>) = records
            .drain(..)
            .partition(|r| ids.contains(r.image_id.as_str()));
        *records = kept;
        Ok(removed)
    }
}
