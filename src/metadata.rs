// src/metadata.rs

use serde::{Deserialize, Serialize};

/// Descriptive attributes attached to a stored image. Every field defaults to "".
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ImageInfo {
    pub category: String,
    pub number: String,
    pub title: String,
    pub name: String,
    pub content: String,
    pub price: String,
    pub status: String,
    pub situation: String,
    pub business_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InfoField {
    Category,
    Number,
    Title,
    Name,
    Content,
    Price,
    Status,
    Situation,
    BusinessType,
}

impl InfoField {
    pub const ALL: [InfoField; 9] = [
        InfoField::Category,
        InfoField::Number,
        InfoField::Title,
        InfoField::Name,
        InfoField::Content,
        InfoField::Price,
        InfoField::Status,
        InfoField::Situation,
        InfoField::BusinessType,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InfoField::Category => "category",
            InfoField::Number => "number",
            InfoField::Title => "title",
            InfoField::Name => "name",
            InfoField::Content => "content",
            InfoField::Price => "price",
            InfoField::Status => "status",
            InfoField::Situation => "situation",
            InfoField::BusinessType => "business_type",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == name)
    }
}

impl ImageInfo {
    pub fn get(&self, field: InfoField) -> &str {
        match field {
            InfoField::Category => &self.category,
            InfoField::Number => &self.number,
            InfoField::Title => &self.title,
            InfoField::Name => &self.name,
            InfoField::Content => &self.content,
            InfoField::Price => &self.price,
            InfoField::Status => &self.status,
            InfoField::Situation => &self.situation,
            InfoField::BusinessType => &self.business_type,
        }
    }

    fn slot(&mut self, field: InfoField) -> &mut String {
        match field {
            InfoField::Category => &mut self.category,
            InfoField::Number => &mut self.number,
            InfoField::Title => &mut self.title,
            InfoField::Name => &mut self.name,
            InfoField::Content => &mut self.content,
            InfoField::Price => &mut self.price,
            InfoField::Status => &mut self.status,
            InfoField::Situation => &mut self.situation,
            InfoField::BusinessType => &mut self.business_type,
        }
    }

    /// Overwrites only the fields present in `update`.
    pub fn merge(&mut self, update: &InfoUpdate) {
        for (field, value) in &update.fields {
            *self.slot(*field) = value.clone();
        }
    }

    pub fn from_update(update: &InfoUpdate) -> Self {
        let mut info = Self::default();
        info.merge(update);
        info
    }
}

/// Info fields as they arrived in a form, in arrival order. A later value for
/// the same field replaces the earlier one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfoUpdate {
    fields: Vec<(InfoField, String)>,
}

impl InfoUpdate {
    pub fn set(&mut self, field: InfoField, value: impl Into<String>) {
        let value = value.into();
        match self.fields.iter_mut().find(|(f, _)| *f == field) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((field, value)),
        }
    }

    /// True when no field carries a non-empty value.
    pub fn is_blank(&self) -> bool {
        self.fields.iter().all(|(_, v)| v.is_empty())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub image_id: String,
    pub image_path: String,
    pub info: ImageInfo,
}

impl ImageRecord {
    /// File name of the blob, i.e. the last segment of `image_path`.
    pub fn blob_name(&self) -> &str {
        self.image_path.rsplit('/').next().unwrap_or(&self.image_path)
    }
}
