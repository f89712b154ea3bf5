use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::domain::GeneSource;
use crate::error::KiraError;

pub const DEFAULT_GENOMIC_DISTANCE: i64 = 100_000;
pub const DEFAULT_BATCH_SIZE: usize = 200;
pub const DEFAULT_CONCURRENCY: usize = 15;

/// On-disk configuration (`kira-vm.json`). Every field is optional.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub genomic_distance: Option<i64>,
    #[serde(default)]
    pub ensembl_source: Option<String>,
    #[serde(default)]
    pub ncbi_source: Option<String>,
    #[serde(default)]
    pub mapping_method: Option<String>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub cache_dir: Option<String>,
    #[serde(default)]
    pub rate_limit_delay_ms: Option<u64>,
    #[serde(default)]
    pub max_rate_limit_retries: Option<usize>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub job_timeout_secs: Option<u64>,
    #[serde(default)]
    pub search_window_prefetch: Option<u32>,
    #[serde(default)]
    pub ncbi_logic_name: Option<String>,
    #[serde(default)]
    pub ncbi_db_type: Option<String>,
    #[serde(default)]
    pub endpoints: Option<EndpointConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EndpointConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_species")]
    pub species: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            species: default_species(),
        }
    }
}

/// Validated settings shared read-only by every stage of a mapping job.
#[derive(Debug, Clone)]
pub struct MappingConfig {
    pub genomic_distance: i64,
    pub ensembl_source: String,
    pub ncbi_source: String,
    pub mapping_method: String,
    pub batch_size: usize,
    pub concurrency: usize,
    pub cache_dir: Utf8PathBuf,
    pub rate_limit_delay: Duration,
    pub max_rate_limit_retries: usize,
    pub request_timeout: Duration,
    pub job_timeout: Option<Duration>,
    pub search_window_prefetch: u32,
    pub ncbi_logic_name: String,
    pub ncbi_db_type: String,
    pub endpoints: EndpointConfig,
}

impl MappingConfig {
    pub fn source_label(&self, source: GeneSource) -> &str {
        match source {
            GeneSource::Ensembl => &self.ensembl_source,
            GeneSource::Ncbi => &self.ncbi_source,
        }
    }
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            genomic_distance: DEFAULT_GENOMIC_DISTANCE,
            ensembl_source: "Ensembl".to_string(),
            ncbi_source: "NCBI".to_string(),
            mapping_method: "Ensembl_pipeline".to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            cache_dir: default_cache_dir(),
            rate_limit_delay: Duration::from_millis(500),
            max_rate_limit_retries: 20,
            request_timeout: Duration::from_secs(60),
            job_timeout: None,
            search_window_prefetch: 1,
            ncbi_logic_name: "refseq_import".to_string(),
            ncbi_db_type: "otherfeatures".to_string(),
            endpoints: EndpointConfig::default(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<MappingConfig, KiraError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("kira-vm.json"),
        };

        if path.is_none() && !config_path.exists() {
            return Err(KiraError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| KiraError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<MappingConfig, KiraError> {
        let defaults = MappingConfig::default();

        let genomic_distance = config
            .genomic_distance
            .unwrap_or(defaults.genomic_distance);
        if genomic_distance <= 0 {
            return Err(KiraError::InvalidConfig(format!(
                "genomic_distance must be positive, got {genomic_distance}"
            )));
        }
        let batch_size = config.batch_size.unwrap_or(defaults.batch_size);
        if batch_size == 0 {
            return Err(KiraError::InvalidConfig(
                "batch_size must be at least 1".to_string(),
            ));
        }
        let concurrency = config.concurrency.unwrap_or(defaults.concurrency);
        if concurrency == 0 {
            return Err(KiraError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        let search_window_prefetch = config
            .search_window_prefetch
            .unwrap_or(defaults.search_window_prefetch);
        if search_window_prefetch == 0 {
            return Err(KiraError::InvalidConfig(
                "search_window_prefetch must be at least 1".to_string(),
            ));
        }

        let ensembl_source = config.ensembl_source.unwrap_or(defaults.ensembl_source);
        let ncbi_source = config.ncbi_source.unwrap_or(defaults.ncbi_source);
        if ensembl_source == ncbi_source {
            return Err(KiraError::InvalidConfig(format!(
                "ensembl_source and ncbi_source must differ (both are {ensembl_source})"
            )));
        }

        Ok(MappingConfig {
            genomic_distance,
            ensembl_source,
            ncbi_source,
            mapping_method: config.mapping_method.unwrap_or(defaults.mapping_method),
            batch_size,
            concurrency,
            cache_dir: config
                .cache_dir
                .map(Utf8PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            rate_limit_delay: config
                .rate_limit_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.rate_limit_delay),
            max_rate_limit_retries: config
                .max_rate_limit_retries
                .unwrap_or(defaults.max_rate_limit_retries),
            request_timeout: config
                .request_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            job_timeout: config.job_timeout_secs.map(Duration::from_secs),
            search_window_prefetch,
            ncbi_logic_name: config.ncbi_logic_name.unwrap_or(defaults.ncbi_logic_name),
            ncbi_db_type: config.ncbi_db_type.unwrap_or(defaults.ncbi_db_type),
            endpoints: config.endpoints.unwrap_or(defaults.endpoints),
        })
    }
}

pub fn default_cache_dir() -> Utf8PathBuf {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("kira-variant-mapper"))
                .ok()
        })
        .unwrap_or_else(|| Utf8PathBuf::from(".kira-vm").join("cache"))
}

fn default_base_url() -> String {
    "https://rest.ensembl.org".to_string()
}

fn default_species() -> String {
    "homo_sapiens".to_string()
}
