use crate::error::AppError;
use crate::metadata::InfoField;
use crate::service::{ImageForm, UploadedFile};
use actix_multipart::{Multipart, MultipartError};
use futures::TryStreamExt;

/// Name of the multipart part carrying the image.
pub const FILE_FIELD: &str = "image";

/// Size limits applied while reading a form.
#[derive(Debug, Clone, Copy)]
pub struct FormLimits {
    pub max_part_bytes: usize,
}

fn multipart_error(e: MultipartError) -> AppError {
    AppError::Multipart(e.to_string())
}

/// Reads an upload/replace form. Unknown parts are skipped; the first `image`
/// part wins. A part larger than `limits.max_part_bytes` aborts the read.
pub async fn read_image_form(mut payload: Multipart, limits: FormLimits) -> Result<ImageForm, AppError> {
    let mut form = ImageForm::default();

    while let Some(mut field) = payload.try_next().await.map_err(multipart_error)? {
        let disposition = field.content_disposition();
        let name = disposition.get_name().unwrap_or_default().to_string();
        let file_name = disposition.get_filename().map(str::to_string);
        let content_type = field.content_type().cloned();

        let mut bytes = Vec::new();
        while let Some(chunk) = field.try_next().await.map_err(multipart_error)? {
            if bytes.len() + chunk.len() > limits.max_part_bytes {
                log::warn!("Rejecting form part '{}' over {} bytes", name, limits.max_part_bytes);
                return Err(AppError::PartTooLarge(name, limits.max_part_bytes));
            }
            bytes.extend_from_slice(&chunk);
        }

        if name == FILE_FIELD {
            if form.file.is_some() {
                log::debug!("Ignoring extra '{}' part", FILE_FIELD);
                continue;
            }
            log::trace!("Received file part {:?} ({} bytes, {:?})", file_name, bytes.len(), content_type);
            form.file = Some(UploadedFile {
                file_name: file_name.unwrap_or_default(),
                content_type,
                bytes,
            });
        } else if let Some(info_field) = InfoField::from_name(&name) {
            form.info.set(info_field, String::from_utf8_lossy(&bytes).into_owned());
        } else {
            log::trace!("Skipping unknown form part '{}'", name);
        }
    }

    Ok(form)
}
