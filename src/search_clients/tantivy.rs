use crate::config::AppConfig;
use crate::error::AppError;
use crate::metadata::{ImageRecord, InfoField};
use crate::query::{Clause, Filter, MatchKind};
use crate::search::MetadataIndex;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tantivy::collector::{Count, DocSetCollector, TopDocs};
use tantivy::directory::MmapDirectory;
use tantivy::query::{AllQuery, BooleanQuery, Occur, Query, RegexQuery, TermQuery};
use tantivy::schema::{Document, Field, IndexRecordOption, Schema, Term, INDEXED, STORED, STRING};
use tantivy::{DocAddress, Index, IndexReader, IndexWriter, ReloadPolicy, Searcher, TantivyError};

struct Fields {
    image_id: Field,
    /// Insertion sequence; defines natural order and survives a replace.
    seq: Field,
    /// Whole record as JSON.
    doc: Field,
    exact: HashMap<InfoField, Field>,
    lower: HashMap<InfoField, Field>,
}

struct Inner {
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    fields: Fields,
    next_seq: AtomicU64,
}

pub struct TantivyIndex {
    inner: Arc<Inner>,
}

fn build_schema() -> (Schema, Fields) {
    let mut schema_builder = Schema::builder();

    let image_id = schema_builder.add_text_field("image_id", STRING | STORED);
    let seq = schema_builder.add_u64_field("seq", INDEXED | STORED);
    let doc = schema_builder.add_text_field("doc", STORED);
    let mut exact = HashMap::new();
    let mut lower = HashMap::new();
    for field in InfoField::ALL {
        exact.insert(field, schema_builder.add_text_field(&format!("info_{}", field.as_str()), STRING));
        lower.insert(field, schema_builder.add_text_field(&format!("info_{}_lower", field.as_str()), STRING));
    }

    (schema_builder.build(), Fields { image_id, seq, doc, exact, lower })
}

/// Escapes regex metacharacters so the value is matched literally.
fn escape_regex(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if "\\.+*?()|[]{}^$".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl Inner {
    fn searcher(&self) -> Searcher {
        self.reader.searcher()
    }

    fn clause_query(&self, clause: &Clause) -> Result<Box<dyn Query>, AppError> {
        let query: Box<dyn Query> = match clause.kind {
            MatchKind::Equals => Box::new(TermQuery::new(
                Term::from_field_text(self.fields.exact[&clause.field], &clause.value),
                IndexRecordOption::Basic,
            )),
            MatchKind::Contains => {
                // `.` stops at line breaks; values may span lines.
                let pattern = format!("[\\s\\S]*{}[\\s\\S]*", escape_regex(&clause.value.to_lowercase()));
                Box::new(RegexQuery::from_pattern(&pattern, self.fields.lower[&clause.field])?)
            }
        };
        Ok(query)
    }

    fn filter_query(&self, filter: &Filter) -> Result<BooleanQuery, AppError> {
        let occur = match filter {
            Filter::All(_) => Occur::Must,
            Filter::Any(_) => Occur::Should,
        };
        let clauses = filter
            .clauses()
            .iter()
            .map(|c| Ok((occur, self.clause_query(c)?)))
            .collect::<Result<Vec<_>, AppError>>()?;
        Ok(BooleanQuery::new(clauses))
    }

    fn id_term(&self, image_id: &str) -> Term {
        Term::from_field_text(self.fields.image_id, image_id)
    }

    fn load(&self, searcher: &Searcher, address: DocAddress) -> Result<(u64, ImageRecord), AppError> {
        let stored = searcher.doc(address)?;
        let seq = stored.get_first(self.fields.seq).and_then(|v| v.as_u64()).unwrap_or(0);
        let json = stored.get_first(self.fields.doc).and_then(|v| v.as_text()).unwrap_or("{}");
        Ok((seq, serde_json::from_str(json)?))
    }

    /// Matching records sorted by insertion sequence.
    fn collect(&self, query: &dyn Query) -> Result<Vec<(u64, ImageRecord)>, AppError> {
        let searcher = self.searcher();
        let addresses = searcher.search(query, &DocSetCollector)?;
        let mut records = addresses
            .into_iter()
            .map(|address| self.load(&searcher, address))
            .collect::<Result<Vec<_>, AppError>>()?;
        records.sort_by_key(|(seq, _)| *seq);
        Ok(records)
    }

    fn lookup(&self, image_id: &str) -> Result<Option<(u64, ImageRecord)>, AppError> {
        let searcher = self.searcher();
        let query = TermQuery::new(self.id_term(image_id), IndexRecordOption::Basic);
        let top_docs = searcher.search(&query, &TopDocs::with_limit(1))?;
        match top_docs.first() {
            Some((_score, address)) => Ok(Some(self.load(&searcher, *address)?)),
            None => Ok(None),
        }
    }

    fn to_document(&self, seq: u64, record: &ImageRecord) -> Result<Document, AppError> {
        let mut doc = Document::default();
        doc.add_text(self.fields.image_id, &record.image_id);
        doc.add_u64(self.fields.seq, seq);
        doc.add_text(self.fields.doc, &serde_json::to_string(record)?);
        for field in InfoField::ALL {
            let value = record.info.get(field);
            doc.add_text(self.fields.exact[&field], value);
            doc.add_text(self.fields.lower[&field], &value.to_lowercase());
        }
        Ok(doc)
    }

    fn lock_writer(&self) -> Result<std::sync::MutexGuard<'_, IndexWriter>, AppError> {
        self.writer
            .lock()
            .map_err(|_| AppError::Generic("tantivy writer lock poisoned".into()))
    }

    fn commit(&self, writer: &mut IndexWriter) -> Result<(), AppError> {
        writer.commit()?;
        self.reader.reload()?;
        log::trace!("Tantivy index writer committed changes.");
        Ok(())
    }
}

impl TantivyIndex {
    pub fn new(config: &AppConfig) -> Result<Self, AppError> {
        let index_path = &config.tantivy_index_path;
        log::debug!("Initializing Tantivy index at {}", index_path);

        std::fs::create_dir_all(index_path)?;
        let (schema, fields) = build_schema();
        let index = Index::open_or_create(MmapDirectory::open(index_path).map_err(TantivyError::from)?, schema)?;
        let writer: IndexWriter = index.writer(50_000_000)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        let inner = Inner { reader, writer: Mutex::new(writer), fields, next_seq: AtomicU64::new(0) };
        let last_seq = inner.collect(&AllQuery)?.last().map(|(seq, _)| *seq + 1).unwrap_or(0);
        inner.next_seq.store(last_seq, Ordering::SeqCst);

        log::debug!("Tantivy index initialized, next sequence {}", last_seq);
        Ok(Self { inner: Arc::new(inner) })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> Result<T, AppError> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || f(&inner)).await?
    }
}

fn window(skip: i64, limit: i64) -> Result<(usize, usize), AppError> {
    if skip < 0 || limit < 0 {
        return Err(AppError::InvalidQuery(format!(
            "skip and limit must be non-negative, got skip={} limit={}",
            skip, limit
        )));
    }
    Ok((skip as usize, limit as usize))
}

#[async_trait]
impl MetadataIndex for TantivyIndex {
    async fn ensure_index_exists(&self) -> Result<(), AppError> {
        // Created on open.
        log::debug!("Tantivy index existence is handled during initialization.");
        Ok(())
    }

    async fn insert(&self, record: ImageRecord) -> Result<(), AppError> {
        self.blocking(move |inner| {
            let mut writer = inner.lock_writer()?;
            if inner.lookup(&record.image_id)?.is_some() {
                return Err(AppError::Generic(format!("duplicate image_id {}", record.image_id)));
            }
            let seq = inner.next_seq.fetch_add(1, Ordering::SeqCst);
            writer.add_document(inner.to_document(seq, &record)?)?;
            inner.commit(&mut writer)?;
            log::debug!("New document indexed for image: {}", record.image_id);
            Ok(())
        })
        .await
    }

    async fn get(&self, image_id: &str) -> Result<Option<ImageRecord>, AppError> {
        let image_id = image_id.to_string();
        self.blocking(move |inner| Ok(inner.lookup(&image_id)?.map(|(_, record)| record)))
            .await
    }

    async fn count(&self, filter: &Filter) -> Result<u64, AppError> {
        let filter = filter.clone();
        self.blocking(move |inner| {
            let query = inner.filter_query(&filter)?;
            Ok(inner.searcher().search(&query, &Count)? as u64)
        })
        .await
    }

    async fn find(&self, filter: &Filter, skip: i64, limit: i64) -> Result<Vec<ImageRecord>, AppError> {
        let (skip, limit) = window(skip, limit)?;
        let filter = filter.clone();
        self.blocking(move |inner| {
            log::debug!("Searching Tantivy with skip={} limit={}", skip, limit);
            let query = inner.filter_query(&filter)?;
            Ok(inner
                .collect(&query)?
                .into_iter()
                .skip(skip)
                .take(limit)
                .map(|(_, record)| record)
                .collect())
        })
        .await
    }

    async fn replace(&self, record: ImageRecord) -> Result<(), AppError> {
        self.blocking(move |inner| {
            let mut writer = inner.lock_writer()?;
            let (seq, _) = inner
                .lookup(&record.image_id)?
                .ok_or_else(|| AppError::NotFound("Image not found".into()))?;
            writer.delete_term(inner.id_term(&record.image_id));
            writer.add_document(inner.to_document(seq, &record)?)?;
            inner.commit(&mut writer)?;
            log::debug!("Existing document replaced for image: {}", record.image_id);
            Ok(())
        })
        .await
    }

    async fn delete(&self, image_id: &str) -> Result<bool, AppError> {
        let image_id = image_id.to_string();
        self.blocking(move |inner| {
            let mut writer = inner.lock_writer()?;
            if inner.lookup(&image_id)?.is_none() {
                return Ok(false);
            }
            writer.delete_term(inner.id_term(&image_id));
            inner.commit(&mut writer)?;
            log::debug!("Deleted document for image: {}", image_id);
            Ok(true)
        })
        .await
    }

    async fn delete_many(&self, image_ids: &[String]) -> Result<Vec<ImageRecord>, AppError> {
        let ids: HashSet<String> = image_ids.iter().cloned().collect();
        self.blocking(move |inner| {
            let mut writer = inner.lock_writer()?;
            let mut removed = Vec::new();
            for id in &ids {
                if let Some((_, record)) = inner.lookup(id)? {
                    writer.delete_term(inner.id_term(id));
                    removed.push(record);
                }
            }
            if !removed.is_empty() {
                inner.commit(&mut writer)?;
            }
            Ok(removed)
        })
        .await
    }
}
