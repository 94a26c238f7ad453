use crate::error::AppError;
use crate::metadata::ImageRecord;
use crate::query::Filter;
use async_trait::async_trait;

/// Document store holding one `ImageRecord` per image, keyed by `image_id`.
///
/// `find` returns records in the store's natural order with `skip` and `limit`
/// passed through untouched; a backend rejects values it cannot honour.
#[async_trait]
pub trait MetadataIndex: Send + Sync {
    async fn ensure_index_exists(&self) -> Result<(), AppError>;
    async fn insert(&self, record: ImageRecord) -> Result<(), AppError>;
    async fn get(&self, image_id: &str) -> Result<Option<ImageRecord>, AppError>;
    async fn count(&self, filter: &Filter) -> Result<u64, AppError>;
    async fn find(&self, filter: &Filter, skip: i64, limit: i64) -> Result<Vec<ImageRecord>, AppError>;
    async fn replace(&self, record: ImageRecord) -> Result<(), AppError>;
    /// Returns whether a record was removed.
    async fn delete(&self, image_id: &str) -> Result<bool, AppError>;
    /// Returns the records that were removed.
    async fn delete_many(&self, image_ids: &[String]) -> Result<Vec<ImageRecord>, AppError>;
}
