use crate::error::AppError;
use crate::metadata::{ImageInfo, ImageRecord, InfoField};
use crate::search::MetadataIndex;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};

/// Fields the search bar looks at; everything else is ignored in that mode.
const SEARCH_BAR_FIELDS: [InfoField; 3] = [InfoField::Title, InfoField::Name, InfoField::Number];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// Case-insensitive substring.
    Contains,
    Equals,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub field: InfoField,
    pub value: String,
    pub kind: MatchKind,
}

impl Clause {
    pub fn contains(field: InfoField, value: impl Into<String>) -> Self {
        Self { field, value: value.into(), kind: MatchKind::Contains }
    }

    pub fn equals(field: InfoField, value: impl Into<String>) -> Self {
        Self { field, value: value.into(), kind: MatchKind::Equals }
    }

    pub fn matches(&self, info: &ImageInfo) -> bool {
        let actual = info.get(self.field);
        match self.kind {
            MatchKind::Equals => actual == self.value,
            MatchKind::Contains => actual.to_lowercase().contains(&self.value.to_lowercase()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Every clause must match.
    All(Vec<Clause>),
    /// At least one clause must match.
    Any(Vec<Clause>),
}

impl Filter {
    pub fn clauses(&self) -> &[Clause] {
        match self {
            Filter::All(c) | Filter::Any(c) => c,
        }
    }

    pub fn matches(&self, record: &ImageRecord) -> bool {
        match self {
            Filter::All(clauses) => clauses.iter().all(|c| c.matches(&record.info)),
            Filter::Any(clauses) => clauses.iter().any(|c| c.matches(&record.info)),
        }
    }
}

/// Query string of `GET /images/search`.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct SearchParams {
    pub title: Option<String>,
    pub name: Option<String>,
    pub number: Option<String>,
    pub business_type: Option<String>,
    pub category: Option<String>,
    pub page_number: Option<i64>,
    pub page_size: Option<i64>,
    #[serde(default)]
    pub is_search_bar: bool,
    #[serde(default)]
    pub is_random: bool,
}

impl SearchParams {
    fn value(&self, field: InfoField) -> Option<&str> {
        let value = match field {
            InfoField::Title => self.title.as_deref(),
            InfoField::Name => self.name.as_deref(),
            InfoField::Number => self.number.as_deref(),
            InfoField::BusinessType => self.business_type.as_deref(),
            InfoField::Category => self.category.as_deref(),
            _ => None,
        };
        value.filter(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub default_page_size: i64,
    pub exact_match_categories: Vec<String>,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            default_page_size: 25,
            exact_match_categories: vec!["men-traditional-chinese".to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Page { skip: i64, limit: i64 },
    /// Fetch the first `fetch` matches and keep a random `keep` of them.
    Sample { fetch: i64, keep: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub filter: Filter,
    pub window: Window,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<ImageRecord>,
    pub total_count: u64,
}

impl SearchQuery {
    pub fn build(params: &SearchParams, settings: &SearchSettings) -> Result<Self, AppError> {
        let filter = if params.is_search_bar {
            let clauses: Vec<Clause> = SEARCH_BAR_FIELDS
                .iter()
                .filter_map(|&f| params.value(f).map(|v| Clause::contains(f, v)))
                .collect();
            if clauses.is_empty() {
                return Err(AppError::MissingParameter(
                    "one of title, name or number is required".into(),
                ));
            }
            Filter::Any(clauses)
        } else {
            let fields = [
                InfoField::Title,
                InfoField::Name,
                InfoField::Number,
                InfoField::BusinessType,
                InfoField::Category,
            ];
            let clauses: Vec<Clause> = fields
                .iter()
                .filter_map(|&f| {
                    params.value(f).map(|v| {
                        let exact = f == InfoField::Category
                            && settings.exact_match_categories.iter().any(|c| c == v);
                        if exact {
                            Clause::equals(f, v)
                        } else {
                            Clause::contains(f, v)
                        }
                    })
                })
                .collect();
            if clauses.is_empty() {
                return Err(AppError::MissingParameter(
                    "at least one of title, name, number, business_type or category is required"
                        .into(),
                ));
            }
            Filter::All(clauses)
        };

        let page_size = params.page_size.unwrap_or(settings.default_page_size);
        if page_size < 1 {
            return Err(AppError::InvalidQuery(format!(
                "page_size must be positive, got {}",
                page_size
            )));
        }
        let page_number = params.page_number.unwrap_or(1);

        let overflow = || AppError::InvalidQuery(format!(
            "page_number {} with page_size {} is out of range",
            page_number, page_size
        ));
        let window = if params.is_random {
            Window::Sample {
                fetch: page_size.checked_mul(2).ok_or_else(overflow)?,
                keep: usize::try_from(page_size).map_err(|_| overflow())?,
            }
        } else {
            let skip = page_number
                .checked_sub(1)
                .and_then(|p| p.checked_mul(page_size))
                .ok_or_else(overflow)?;
            Window::Page { skip, limit: page_size }
        };

        Ok(Self { filter, window })
    }

    pub async fn execute(&self, index: &dyn MetadataIndex) -> Result<SearchResponse, AppError> {
        let total_count = index.count(&self.filter).await?;
        log::debug!("Search matched {} records", total_count);
        if total_count == 0 {
            return Ok(SearchResponse { results: Vec::new(), total_count });
        }

        let results = match self.window {
            Window::Page { skip, limit } => index.find(&self.filter, skip, limit).await?,
            Window::Sample { fetch, keep } => {
                let fetched = index.find(&self.filter, 0, fetch).await?;
                log::trace!("Sampling {} of {} fetched records", keep, fetched.len());
                sample(fetched, keep)
            }
        };

        Ok(SearchResponse { results, total_count })
    }
}

/// Uniformly picks `keep` items without replacement. Returns everything when
/// there are not more than `keep` items.
pub fn sample<T: Clone>(items: Vec<T>, keep: usize) -> Vec<T> {
    if items.len() <= keep {
        return items;
    }
    let mut rng = rand::rng();
    items.choose_multiple(&mut rng, keep).cloned().collect()
}
