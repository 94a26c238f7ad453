use crate::config::AppConfig;
use crate::error::AppError;
use crate::metadata::{ImageRecord, InfoField};
use crate::query::{Clause, Filter, MatchKind};
use crate::search::MetadataIndex;
use async_trait::async_trait;
use elasticsearch::{
    http::{
        transport::{SingleNodeConnectionPool, TransportBuilder},
        StatusCode,
    },
    indices::{IndicesCreateParts, IndicesExistsParts},
    params::Refresh,
    CountParts, CreateParts, DeleteByQueryParts, DeleteParts, Elasticsearch, GetParts, IndexParts,
    SearchParts,
};
use serde_json::{json, Map, Value};
use url::Url;

pub struct ElasticsearchIndex {
    client: Elasticsearch,
    index: String,
}

impl ElasticsearchIndex {
    pub fn new(config: &AppConfig) -> Result<Self, AppError> {
        log::debug!("Creating Elasticsearch client for URL: {}", config.elasticsearch_url);
        let url = Url::parse(&config.elasticsearch_url)
            .map_err(|e| AppError::Generic(format!("invalid elasticsearch_url: {}", e)))?;
        let conn_pool = SingleNodeConnectionPool::new(url);
        let transport = TransportBuilder::new(conn_pool)
            .disable_proxy()
            .build()
            .map_err(|e| AppError::Generic(format!("failed to build transport: {}", e)))?;
        let client = Elasticsearch::new(transport);
        log::trace!("Elasticsearch client created successfully.");
        Ok(Self { client, index: config.elasticsearch_index.clone() })
    }

    async fn search_hits(&self, body: Value, skip: i64, limit: i64) -> Result<Vec<ImageRecord>, AppError> {
        let response = self
            .client
            .search(SearchParts::Index(&[self.index.as_str()]))
            .from(skip)
            .size(limit)
            .body(body)
            .send()
            .await?
            .error_for_status_code()?;

        let body = response.json::<Value>().await?;
        log::trace!("Elasticsearch search response: {:?}", body);

        let mut records = Vec::new();
        if let Some(hits) = body["hits"]["hits"].as_array() {
            for hit in hits {
                records.push(serde_json::from_value(hit["_source"].clone())?);
            }
        }
        Ok(records)
    }
}

fn info_path(field: InfoField) -> String {
    format!("info.{}", field.as_str())
}

/// Escapes the wildcard metacharacters so the value is matched literally.
fn escape_wildcard(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '*' | '?' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn clause_query(clause: &Clause) -> Value {
    let path = info_path(clause.field);
    match clause.kind {
        MatchKind::Equals => json!({ "term": { (path): clause.value } }),
        MatchKind::Contains => json!({
            "wildcard": {
                (path): {
                    "value": format!("*{}*", escape_wildcard(&clause.value)),
                    "case_insensitive": true
                }
            }
        }),
    }
}

pub(crate) fn filter_query(filter: &Filter) -> Value {
    match filter {
        Filter::All(clauses) => json!({
            "bool": { "filter": clauses.iter().map(clause_query).collect::<Vec<_>>() }
        }),
        Filter::Any(clauses) => json!({
            "bool": {
                "should": clauses.iter().map(clause_query).collect::<Vec<_>>(),
                "minimum_should_match": 1
            }
        }),
    }
}

fn mappings() -> Value {
    let info: Map<String, Value> = InfoField::ALL
        .iter()
        .map(|f| (f.as_str().to_string(), json!({ "type": "keyword" })))
        .collect();
    json!({
        "mappings": {
            "properties": {
                "image_id": { "type": "keyword" },
                "image_path": { "type": "keyword" },
                "info": { "properties": info }
            }
        }
    })
}

#[async_trait]
impl MetadataIndex for ElasticsearchIndex {
    async fn ensure_index_exists(&self) -> Result<(), AppError> {
        log::debug!("Checking if Elasticsearch index '{}' exists.", self.index);
        let index_exists = self
            .client
            .indices()
            .exists(IndicesExistsParts::Index(&[self.index.as_str()]))
            .send()
            .await?
            .status_code()
            .is_success();

        if !index_exists {
            log::info!("Elasticsearch index '{}' does not exist. Creating it.", self.index);
            self.client
                .indices()
                .create(IndicesCreateParts::Index(&self.index))
                .body(mappings())
                .send()
                .await?
                .error_for_status_code()?;
            log::info!("Elasticsearch index '{}' created successfully.", self.index);
        } else {
            log::debug!("Elasticsearch index '{}' already exists.", self.index);
        }

        Ok(())
    }

    async fn insert(&self, record: ImageRecord) -> Result<(), AppError> {
        log::debug!("Indexing new record {}", record.image_id);
        self.client
            .create(CreateParts::IndexId(&self.index, &record.image_id))
            .refresh(Refresh::True)
            .body(&record)
            .send()
            .await?
            .error_for_status_code()?;
        Ok(())
    }

    async fn get(&self, image_id: &str) -> Result<Option<ImageRecord>, AppError> {
        let response = self
            .client
            .get(GetParts::IndexId(&self.index, image_id))
            .send()
            .await?;
        if response.status_code() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response.error_for_status_code()?.json::<Value>().await?;
        Ok(Some(serde_json::from_value(body["_source"].clone())?))
    }

    async fn count(&self, filter: &Filter) -> Result<u64, AppError> {
        let response = self
            .client
            .count(CountParts::Index(&[self.index.as_str()]))
            .body(json!({ "query": filter_query(filter) }))
            .send()
            .await?
            .error_for_status_code()?;
        let body = response.json::<Value>().await?;
        count_from(&body)
    }

    async fn find(&self, filter: &Filter, skip: i64, limit: i64) -> Result<Vec<ImageRecord>, AppError> {
        if skip < 0 {
            return Err(AppError::InvalidQuery(format!("[from] parameter cannot be negative but was [{}]", skip)));
        }
        log::debug!("Searching Elasticsearch with skip={} limit={}", skip, limit);
        let body = json!({
            "query": filter_query(filter),
            "sort": ["_doc"]
        });
        self.search_hits(body, skip, limit).await
    }

    async fn replace(&self, record: ImageRecord) -> Result<(), AppError> {
        log::debug!("Replacing record {}", record.image_id);
        self.client
            .index(IndexParts::IndexId(&self.index, &record.image_id))
            .refresh(Refresh::True)
            .body(&record)
            .send()
            .await?
            .error_for_status_code()?;
        Ok(())
    }

    async fn delete(&self, image_id: &str) -> Result<bool, AppError> {
        let response = self
            .client
            .delete(DeleteParts::IndexId(&self.index, image_id))
            .refresh(Refresh::True)
            .send()
            .await?;
        if response.status_code() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        response.error_for_status_code()?;
        Ok(true)
    }

    async fn delete_many(&self, image_ids: &[String]) -> Result<Vec<ImageRecord>, AppError> {
        let query = json!({ "ids": { "values": image_ids } });
        let records = self
            .search_hits(json!({ "query": query.clone() }), 0, image_ids.len() as i64)
            .await?;
        if records.is_empty() {
            return Ok(records);
        }

        let response = self
            .client
            .delete_by_query(DeleteByQueryParts::Index(&[self.index.as_str()]))
            .refresh(true)
            .body(json!({ "query": query }))
            .send()
            .await?
            .error_for_status_code()?;
        let body = response.json::<Value>().await?;
        log::debug!("Elasticsearch deleted {} records", body["deleted"]);
        Ok(records)
    }
}

fn count_from(body: &Value) -> Result<u64, AppError> {
    body["count"].as_u64().ok_or_else(|| {
        log::error!("Count response without a numeric count: {}", body);
        AppError::Generic(format!("Elasticsearch count response has no count: {}", body))
    })
}
