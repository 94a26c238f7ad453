use serde::Deserialize;
use config::{Config, ConfigError, Environment, File};

const ENV_PREFIX: &str = "IMAGE_STORE";

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub engine: String,
    pub elasticsearch_url: String,
    pub elasticsearch_index: String,
    pub tantivy_index_path: String,
    pub image_directory: String,
    pub public_prefix: String,
    pub web_port: u16,
    pub log_level: String,
    pub default_page_size: i64,
    /// Category values that must match exactly instead of by substring.
    pub exact_match_categories: Vec<String>,
    /// Largest accepted size of a single multipart part, in bytes.
    pub max_upload_bytes: usize,
}

impl AppConfig {
    /// Layers `base`, the `RUN_MODE` file, `config/local` and `IMAGE_STORE__*` variables.
    /// `IMAGE_STORE__EXACT_MATCH_CATEGORIES` is read as a comma separated list.
    pub fn load(base: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .set_default("engine", "elasticsearch")?
            .set_default("elasticsearch_index", "images")?
            .set_default("public_prefix", "images")?
            .set_default("default_page_size", 25i64)?
            .set_default("exact_match_categories", vec!["men-traditional-chinese"])?
            .set_default("max_upload_bytes", 10 * 1024 * 1024i64)?
            .add_source(File::with_name(base))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("exact_match_categories"),
            )
            .build()?;

        s.try_deserialize()
    }
}
