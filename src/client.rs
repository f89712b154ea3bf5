use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, ClientBuilder};
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::config::MappingConfig;
use crate::domain::GeneSource;
use crate::error::KiraError;

/// One lookup category of the annotation REST service.
///
/// Single keys are fetched with `GET {url}/{key}?{query}`, batches with
/// `POST {url}?{query}` and a body of `{"<batch_key>": [keys...]}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub batch_key: String,
}

impl Endpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
            batch_key: "ids".to_string(),
        }
    }

    pub fn with_query(mut self, name: &str, value: &str) -> Self {
        self.query.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_batch_key(mut self, batch_key: &str) -> Self {
        self.batch_key = batch_key.to_string();
        self
    }

    pub fn lookup_url(&self, key: &str) -> String {
        format!("{}/{}", self.url.trim_end_matches('/'), key)
    }
}

#[derive(Debug, Clone)]
pub struct Endpoints {
    pub variants: Endpoint,
    pub reported_genes: Endpoint,
    pub cytogenetic_bands: Endpoint,
    pub assembly_info: Endpoint,
    pub ensembl_genes: Endpoint,
    pub ncbi_genes: Endpoint,
}

impl Endpoints {
    pub fn from_config(config: &MappingConfig) -> Self {
        let base = config.endpoints.base_url.trim_end_matches('/');
        let species = &config.endpoints.species;
        let overlap = format!("{base}/overlap/region/{species}");
        Self {
            variants: Endpoint::new(format!("{base}/variation/{species}")),
            reported_genes: Endpoint::new(format!("{base}/lookup/symbol/{species}"))
                .with_batch_key("symbols"),
            cytogenetic_bands: Endpoint::new(overlap.clone()).with_query("feature", "band"),
            assembly_info: Endpoint::new(format!("{base}/info/assembly/{species}")),
            ensembl_genes: Endpoint::new(overlap.clone()).with_query("feature", "gene"),
            ncbi_genes: Endpoint::new(overlap)
                .with_query("feature", "gene")
                .with_query("logic_name", &config.ncbi_logic_name)
                .with_query("db_type", &config.ncbi_db_type),
        }
    }

    pub fn genes(&self, source: GeneSource) -> &Endpoint {
        match source {
            GeneSource::Ensembl => &self.ensembl_genes,
            GeneSource::Ncbi => &self.ncbi_genes,
        }
    }
}

pub trait AnnotationClient: Send + Sync {
    /// Fetches a single key. Never fails: any non-success answer is folded
    /// into a record of the form `{"error": "..."}`.
    fn fetch_one(&self, endpoint: &Endpoint, key: &str) -> Value;

    /// Fetches many keys with one request, returning the source's map from
    /// key to record.
    fn fetch_batch(
        &self,
        endpoint: &Endpoint,
        keys: &[String],
    ) -> Result<Map<String, Value>, KiraError>;

    fn request_count(&self) -> usize {
        0
    }
}

pub fn error_record(message: impl Into<String>) -> Value {
    json!({ "error": message.into() })
}

#[derive(Clone)]
pub struct AnnotationHttpClient {
    client: Client,
    rate_limit_delay: Duration,
    max_rate_limit_retries: usize,
    requests: Arc<AtomicUsize>,
}

impl AnnotationHttpClient {
    pub fn new(config: &MappingConfig) -> Result<Self, KiraError> {
        let client = Self::client_builder(config)?
            .build()
            .map_err(|err| KiraError::AnnotationHttp(err.to_string()))?;
        Ok(Self::with_client(client, config))
    }

    fn with_client(client: Client, config: &MappingConfig) -> Self {
        Self {
            client,
            rate_limit_delay: config.rate_limit_delay,
            max_rate_limit_retries: config.max_rate_limit_retries,
            requests: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn client_builder(config: &MappingConfig) -> Result<ClientBuilder, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-vm/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::AnnotationHttp(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        Ok(Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout))
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, KiraError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        let mut attempt = 0usize;
        loop {
            self.requests.fetch_add(1, Ordering::Relaxed);
            let response = make_req()
                .send()
                .map_err(|err| KiraError::AnnotationHttp(err.to_string()))?;
            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                return Ok(response);
            }
            attempt += 1;
            if attempt > self.max_rate_limit_retries {
                return Err(KiraError::RateLimited { attempts: attempt });
            }
            info!(
                url = %response.url(),
                attempt,
                "too many requests, retrying in {} ms",
                self.rate_limit_delay.as_millis()
            );
            thread::sleep(self.rate_limit_delay);
        }
    }
}

impl AnnotationClient for AnnotationHttpClient {
    fn fetch_one(&self, endpoint: &Endpoint, key: &str) -> Value {
        let url = endpoint.lookup_url(key);
        let response = match self.send_with_retries(|| self.client.get(&url).query(&endpoint.query))
        {
            Ok(response) => response,
            Err(err) => {
                warn!(%url, "lookup failed: {err}");
                return error_record(err.to_string());
            }
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            debug!(%url, status, "lookup returned an error status");
            return error_record(error_message(status, &body));
        }

        response
            .json::<Value>()
            .unwrap_or_else(|err| error_record(format!("undecodable response: {err}")))
    }

    fn fetch_batch(
        &self,
        endpoint: &Endpoint,
        keys: &[String],
    ) -> Result<Map<String, Value>, KiraError> {
        let mut body = Map::new();
        body.insert(
            endpoint.batch_key.clone(),
            Value::from(keys.iter().map(|key| key.trim()).collect::<Vec<_>>()),
        );
        let body = Value::Object(body);

        let response = self.send_with_retries(|| {
            self.client
                .post(&endpoint.url)
                .query(&endpoint.query)
                .json(&body)
        })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            return Err(KiraError::AnnotationStatus {
                status,
                message: error_message(status, &body),
            });
        }

        response
            .json::<Map<String, Value>>()
            .map_err(|err| KiraError::AnnotationHttp(err.to_string()))
    }

    fn request_count(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }
}

/// Extracts the message of an `{"error": "..."}` body, falling back to the
/// raw body or the bare status.
pub fn error_message(status: u16, body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|value| {
        value
            .get("error")
            .and_then(|error| error.as_str())
            .map(|error| error.to_string())
    });
    match from_json {
        Some(message) => message,
        None if body.trim().is_empty() => format!("annotation source returned status {status}"),
        None => body.trim().to_string(),
    }
}
