use crate::blob_store::BlobStore;
use crate::error::AppError;
use crate::metadata::{ImageInfo, ImageRecord, InfoUpdate};
use crate::query::{SearchParams, SearchQuery, SearchResponse, SearchSettings};
use crate::search::MetadataIndex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// A file part taken from a multipart form.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: Option<mime::Mime>,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn is_image(&self) -> bool {
        self.content_type
            .as_ref()
            .map_or(false, |m| m.type_() == mime::IMAGE)
    }

    /// Extension of the original file name including the dot, or "".
    pub fn extension(&self) -> String {
        Path::new(&self.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImageForm {
    pub file: Option<UploadedFile>,
    pub info: InfoUpdate,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ReplaceOutcome {
    Replaced,
    NothingChanged,
}

#[derive(Debug)]
pub enum Fetched {
    /// Location of the blob on disk; the caller streams it.
    Blob(PathBuf),
    Details(ImageRecord),
}

/// The five image operations over an injected blob store and metadata index.
///
/// The two stores are written one after the other with no transaction; a
/// failure between the writes leaves them out of sync.
pub struct ImageService {
    blobs: Arc<dyn BlobStore>,
    index: Arc<dyn MetadataIndex>,
    settings: SearchSettings,
    public_prefix: String,
}

impl ImageService {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        index: Arc<dyn MetadataIndex>,
        settings: SearchSettings,
        public_prefix: impl Into<String>,
    ) -> Self {
        Self { blobs, index, settings, public_prefix: public_prefix.into() }
    }

    pub fn public_prefix(&self) -> &str {
        &self.public_prefix
    }

    fn record_path(&self, blob_name: &str) -> String {
        format!("{}/{}", self.public_prefix, blob_name)
    }

    pub async fn upload(&self, form: ImageForm) -> Result<ImageRecord, AppError> {
        let file = form.file.ok_or(AppError::NoFile)?;
        if !file.is_image() {
            return Err(AppError::InvalidFileType);
        }

        let image_id = Uuid::new_v4().simple().to_string();
        let blob_name = format!("{}{}", image_id, file.extension());
        self.blobs
            .write(&blob_name, &file.bytes)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to save image: {}", e)))?;

        let record = ImageRecord {
            image_id,
            image_path: self.record_path(&blob_name),
            info: ImageInfo::from_update(&form.info),
        };
        self.index.insert(record.clone()).await?;
        log::info!("Uploaded image {} ({} bytes)", record.image_id, file.bytes.len());
        Ok(record)
    }

    pub async fn search(&self, params: &SearchParams) -> Result<SearchResponse, AppError> {
        let query = SearchQuery::build(params, &self.settings)?;
        log::trace!("Built search query: {:?}", query);
        query.execute(self.index.as_ref()).await
    }

    pub async fn replace(&self, image_id: &str, form: ImageForm) -> Result<ReplaceOutcome, AppError> {
        if form.file.is_none() && form.info.is_blank() {
            log::debug!("Nothing to change for image {}", image_id);
            return Ok(ReplaceOutcome::NothingChanged);
        }
        if let Some(file) = &form.file {
            if !file.is_image() {
                return Err(AppError::InvalidFileType);
            }
        }

        let mut record = self
            .index
            .get(image_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Image not found".into()))?;

        if let Some(file) = &form.file {
            let old_blob = record.blob_name().to_string();
            let blob_name = format!("{}{}", image_id, file.extension());
            self.blobs
                .write(&blob_name, &file.bytes)
                .await
                .map_err(|e| AppError::Storage(format!("Failed to replace image: {}", e)))?;
            if old_blob != blob_name {
                if let Err(e) = self.blobs.remove(&old_blob).await {
                    log::warn!("Could not remove stale blob {}: {}", old_blob, e);
                }
            }
            record.image_path = self.record_path(&blob_name);
        }

        record.info.merge(&form.info);
        self.index.replace(record).await?;
        log::info!("Replaced image {}", image_id);
        Ok(ReplaceOutcome::Replaced)
    }

    /// `image_name` is a blob file name; with `details` its stem is taken as the image id.
    pub async fn fetch(&self, image_name: &str, details: bool) -> Result<Fetched, AppError> {
        if details {
            let image_id = Path::new(image_name)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(image_name);
            return match self.index.get(image_id).await? {
                Some(record) => Ok(Fetched::Details(record)),
                None => Err(AppError::NotFound("Image not found".into())),
            };
        }

        Ok(Fetched::Blob(self.blobs.locate(image_name).await?))
    }

    pub async fn delete(&self, image_id: &str) -> Result<(), AppError> {
        let record = self
            .index
            .get(image_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Image not found".into()))?;
        self.index.delete(image_id).await?;
        log::info!("Deleted record {}", image_id);

        match self.blobs.remove(record.blob_name()).await {
            Ok(()) => Ok(()),
            Err(AppError::NotFound(_)) => {
                log::warn!("Blob {} was already missing", record.blob_name());
                Ok(())
            }
            Err(e) => Err(AppError::Storage(format!("Failed to delete image: {}", e))),
        }
    }

    /// Returns the number of records removed. Blob failures are ignored.
    pub async fn delete_many(&self, image_ids: &[String]) -> Result<u64, AppError> {
        let unique: Vec<String> = image_ids
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let removed = self.index.delete_many(&unique).await?;
        if removed.is_empty() {
            return Err(AppError::NotFound("No matching images found".into()));
        }

        for record in &removed {
            if let Err(e) = self.blobs.remove(record.blob_name()).await {
                log::warn!("Ignoring failure to remove blob {}: {}", record.blob_name(), e);
            }
        }
        log::info!("Bulk delete removed {} records", removed.len());
        Ok(removed.len() as u64)
    }
}
