#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::{Map, Value, json};

use kira_variant_mapper::client::{AnnotationClient, Endpoint, error_record};
use kira_variant_mapper::config::MappingConfig;
use kira_variant_mapper::error::KiraError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Variants,
    Symbols,
    Assembly,
    Bands,
    Ensembl,
    Ncbi,
}

pub fn category(endpoint: &Endpoint) -> Category {
    let has_query = |name: &str, value: Option<&str>| {
        endpoint
            .query
            .iter()
            .any(|(key, val)| key == name && value.is_none_or(|value| val == value))
    };
    if endpoint.url.contains("/variation/") {
        Category::Variants
    } else if endpoint.url.contains("/lookup/symbol/") {
        Category::Symbols
    } else if endpoint.url.contains("/info/assembly/") {
        Category::Assembly
    } else if has_query("feature", Some("band")) {
        Category::Bands
    } else if has_query("logic_name", None) {
        Category::Ncbi
    } else {
        Category::Ensembl
    }
}

/// In-memory annotation source. Records every batch and single lookup.
#[derive(Default)]
pub struct MockAnnotation {
    pub variants: BTreeMap<String, Value>,
    pub symbols: BTreeMap<String, Value>,
    pub assembly: BTreeMap<String, Value>,
    pub bands: BTreeMap<String, Value>,
    pub ensembl: BTreeMap<String, Value>,
    pub ncbi: BTreeMap<String, Value>,
    /// Ids only answered by single lookups.
    pub hidden_from_batch: BTreeSet<String>,
    pub failing_batches: bool,
    pub stray_batch_key: Option<String>,
    pub delay: Option<Duration>,
    pub batches: Mutex<Vec<Vec<String>>>,
    pub lookups: Mutex<Vec<(Category, String)>>,
}

impl MockAnnotation {
    fn table(&self, category: Category) -> &BTreeMap<String, Value> {
        match category {
            Category::Variants => &self.variants,
            Category::Symbols => &self.symbols,
            Category::Assembly => &self.assembly,
            Category::Bands => &self.bands,
            Category::Ensembl => &self.ensembl,
            Category::Ncbi => &self.ncbi,
        }
    }

    pub fn lookups_of(&self, category: Category) -> Vec<String> {
        self.lookups
            .lock()
            .unwrap()
            .iter()
            .filter(|(seen, _)| *seen == category)
            .map(|(_, key)| key.clone())
            .collect()
    }
}

impl AnnotationClient for MockAnnotation {
    fn fetch_one(&self, endpoint: &Endpoint, key: &str) -> Value {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        let category = category(endpoint);
        self.lookups
            .lock()
            .unwrap()
            .push((category, key.to_string()));
        match self.table(category).get(key) {
            Some(value) => value.clone(),
            None => match category {
                Category::Variants | Category::Symbols | Category::Assembly => {
                    error_record(format!("{key} not found"))
                }
                Category::Bands | Category::Ensembl | Category::Ncbi => json!([]),
            },
        }
    }

    fn fetch_batch(
        &self,
        endpoint: &Endpoint,
        keys: &[String],
    ) -> Result<Map<String, Value>, KiraError> {
        self.batches.lock().unwrap().push(keys.to_vec());
        if self.failing_batches {
            return Err(KiraError::AnnotationStatus {
                status: 503,
                message: "service unavailable".to_string(),
            });
        }
        let table = self.table(category(endpoint));
        let mut response = keys
            .iter()
            .filter(|key| !self.hidden_from_batch.contains(*key))
            .filter_map(|key| table.get(key).map(|value| (key.clone(), value.clone())))
            .collect::<Map<String, Value>>();
        if let Some(stray) = &self.stray_batch_key {
            response.insert(stray.clone(), json!({"name": stray}));
        }
        Ok(response)
    }

    fn request_count(&self) -> usize {
        self.batches.lock().unwrap().len() + self.lookups.lock().unwrap().len()
    }
}

pub fn test_config() -> MappingConfig {
    MappingConfig {
        genomic_distance: 1_000,
        batch_size: 2,
        concurrency: 4,
        ..MappingConfig::default()
    }
}

pub fn variant_record(name: &str, chromosome: &str, start: i64) -> Value {
    json!({
        "name": name,
        "mappings": [
            {"seq_region_name": chromosome, "start": start, "strand": 1}
        ],
        "most_severe_consequence": "intron_variant"
    })
}
