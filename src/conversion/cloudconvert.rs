use std::future::Future;
use std::time::Duration;

use backon::Retryable;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::contracts::{ConversionError, DocumentConverter, SourceDocument};
use crate::storage::retry::{is_transient_error, RetryConfig};

const IMPORT_TASK: &str = "upload-source";
const CONVERT_TASK: &str = "convert-source";
const EXPORT_TASK: &str = "export-pdf";

/// Configuration for the CloudConvert API client.
#[derive(Debug, Clone)]
pub struct CloudConvertConfig {
    pub api_key: String,
    /// API base URL without the `/v2` suffix.
    pub base_url: String,
    /// Timeout for each HTTP request in seconds.
    pub timeout_secs: u64,
    /// Delay between job status polls.
    pub poll_interval: Duration,
    /// Total time to wait for a job before giving up.
    pub max_wait: Duration,
    /// Backoff for transient API failures (not for the upload itself).
    pub retry: RetryConfig,
}

impl CloudConvertConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.cloudconvert.com".into(),
            timeout_secs: 30,
            poll_interval: Duration::from_secs(3),
            max_wait: Duration::from_secs(60),
            retry: RetryConfig::default(),
        }
    }

    /// Creates a config from environment variables, or `None` when no API key is set.
    ///
    /// Reads:
    /// - `CONTRACTOR_CLOUDCONVERT_API_KEY`: API token (required)
    /// - `CONTRACTOR_CLOUDCONVERT_BASE_URL`: API base (default: `https://api.cloudconvert.com`)
    /// - `CONTRACTOR_CLOUDCONVERT_POLL_MS`: Poll interval in ms (default: 3000)
    /// - `CONTRACTOR_CLOUDCONVERT_MAX_WAIT_SECS`: Job deadline in seconds (default: 60)
    /// - `CONTRACTOR_CLOUDCONVERT_MAX_RETRIES`, `_RETRY_INITIAL_MS`, `_RETRY_MAX_MS`
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("CONTRACTOR_CLOUDCONVERT_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())?;
        let default = Self::new(api_key);

        Some(Self {
            base_url: std::env::var("CONTRACTOR_CLOUDCONVERT_BASE_URL")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or(default.base_url.clone()),
            poll_interval: std::env::var("CONTRACTOR_CLOUDCONVERT_POLL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(default.poll_interval),
            max_wait: std::env::var("CONTRACTOR_CLOUDCONVERT_MAX_WAIT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.max_wait),
            retry: RetryConfig::from_env_with_prefix("CONTRACTOR_CLOUDCONVERT"),
            ..default
        })
    }
}

/// Job creation request.
#[derive(Debug, Serialize)]
struct CreateJobRequest {
    tasks: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct JobEnvelope {
    data: Job,
}

#[derive(Debug, Deserialize)]
struct Job {
    id: String,
    status: String,
    #[serde(default)]
    tasks: Vec<Task>,
}

#[derive(Debug, Deserialize)]
struct Task {
    #[serde(default)]
    name: Option<String>,
    operation: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    result: Option<TaskResult>,
}

#[derive(Debug, Deserialize)]
struct TaskResult {
    #[serde(default)]
    form: Option<UploadForm>,
    #[serde(default)]
    upload_url: Option<String>,
    #[serde(default)]
    files: Vec<ExportedFile>,
}

#[derive(Debug, Deserialize)]
struct UploadForm {
    url: String,
    #[serde(default)]
    parameters: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ExportedFile {
    url: String,
}

impl Job {
    fn task(&self, operation: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.operation == operation)
    }

    fn failure_message(&self) -> String {
        self.tasks
            .iter()
            .filter_map(|t| {
                t.message
                    .as_ref()
                    .map(|m| format!("{}: {}", t.name.as_deref().unwrap_or(&t.operation), m))
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Server errors and throttling are retried by status; transport errors by message.
fn is_retryable(err: &ConversionError) -> bool {
    match err {
        ConversionError::Rejected { status, .. } => *status >= 500 || *status == 429,
        ConversionError::Http(message) => is_transient_error(message),
        _ => false,
    }
}

/// CloudConvert v2 client: create job, upload, poll, download.
pub struct CloudConvertClient {
    config: CloudConvertConfig,
    client: reqwest::Client,
}

impl CloudConvertClient {
    pub fn new(config: CloudConvertConfig) -> Result<Self, ConversionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConversionError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/v2{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn add_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.bearer_auth(&self.config.api_key)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ConversionError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ConversionError::Rejected {
            status: status.as_u16(),
            body,
        })
    }

    /// Sends a request built by `make`, retrying transient failures and 5xx/429 rejections.
    async fn send_with_retry<F, Fut>(&self, context: &str, make: F) -> Result<reqwest::Response, ConversionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<reqwest::Response, ConversionError>>,
    {
        make.retry(self.config.retry.backoff())
            .when(is_retryable)
            .notify(|err, dur| {
                tracing::warn!(
                    context = context,
                    error = %err,
                    retry_in = ?dur,
                    "Conversion API request failed, retrying"
                );
            })
            .await
    }

    async fn read_job(response: reqwest::Response) -> Result<Job, ConversionError> {
        let envelope: JobEnvelope = response
            .json()
            .await
            .map_err(|e| ConversionError::InvalidResponse(e.to_string()))?;
        Ok(envelope.data)
    }

    async fn create_job(&self) -> Result<Job, ConversionError> {
        let mut tasks = serde_json::Map::new();
        tasks.insert(IMPORT_TASK.into(), serde_json::json!({ "operation": "import/upload" }));
        tasks.insert(
            CONVERT_TASK.into(),
            serde_json::json!({
                "operation": "convert",
                "input": IMPORT_TASK,
                "output_format": "pdf"
            }),
        );
        tasks.insert(
            EXPORT_TASK.into(),
            serde_json::json!({ "operation": "export/url", "input": CONVERT_TASK }),
        );

        let body = CreateJobRequest { tasks };
        let url = self.api_url("/jobs");
        let response = self
            .send_with_retry("create job", || async {
                let request = self.add_auth(self.client.post(&url)).json(&body);
                Self::check(request.send().await?).await
            })
            .await?;
        Self::read_job(response).await
    }

    /// Sends the source either as a signed multipart form or as a raw PUT.
    async fn upload(&self, job: &Job, source: &SourceDocument) -> Result<(), ConversionError> {
        let result = job
            .task("import/upload")
            .and_then(|t| t.result.as_ref())
            .ok_or_else(|| ConversionError::InvalidResponse("job has no upload task".into()))?;

        let request = if let Some(form) = &result.form {
            let mut multipart = Form::new();
            for (key, value) in &form.parameters {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                multipart = multipart.text(key.clone(), value);
            }
            let file = Part::bytes(source.body.to_vec())
                .file_name(source.filename.clone())
                .mime_str(&source.content_type)?;
            self.client.post(&form.url).multipart(multipart.part("file", file))
        } else if let Some(url) = &result.upload_url {
            self.client
                .put(url)
                .header(reqwest::header::CONTENT_TYPE, &source.content_type)
                .body(source.body.clone())
        } else {
            return Err(ConversionError::InvalidResponse(
                "upload task has neither form nor upload_url".into(),
            ));
        };

        Self::check(request.send().await?).await?;
        Ok(())
    }

    async fn wait_for_job(&self, job_id: &str) -> Result<Job, ConversionError> {
        let deadline = tokio::time::Instant::now() + self.config.max_wait;
        let url = self.api_url(&format!("/jobs/{}", job_id));

        loop {
            tokio::time::sleep(self.config.poll_interval).await;

            let response = self
                .send_with_retry("poll job", || async {
                    Self::check(self.add_auth(self.client.get(&url)).send().await?).await
                })
                .await?;
            let job = Self::read_job(response).await?;
            match job.status.as_str() {
                "finished" => return Ok(job),
                "error" => return Err(ConversionError::Failed(job.failure_message())),
                status => {
                    tracing::debug!(job_id = job_id, status = status, "Waiting for conversion job");
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(ConversionError::Timeout(self.config.max_wait));
            }
        }
    }

    async fn download(&self, job: &Job) -> Result<Bytes, ConversionError> {
        let url = job
            .task("export/url")
            .and_then(|t| t.result.as_ref())
            .and_then(|r| r.files.first())
            .map(|f| f.url.as_str())
            .ok_or_else(|| ConversionError::InvalidResponse("finished job has no exported file".into()))?;

        let response = self
            .send_with_retry("download result", || async {
                Self::check(self.client.get(url).send().await?).await
            })
            .await?;
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(ConversionError::InvalidResponse("exported file is empty".into()));
        }
        Ok(bytes)
    }
}

impl DocumentConverter for CloudConvertClient {
    async fn convert(&self, source: SourceDocument) -> Result<Bytes, ConversionError> {
        let job = self.create_job().await?;
        tracing::debug!(job_id = %job.id, filename = %source.filename, "Created conversion job");

        self.upload(&job, &source).await?;
        let finished = self.wait_for_job(&job.id).await?;
        let pdf = self.download(&finished).await?;

        tracing::info!(
            job_id = %job.id,
            filename = %source.filename,
            bytes = pdf.len(),
            "Converted document via CloudConvert"
        );
        Ok(pdf)
    }

    fn name(&self) -> &'static str {
        "cloudconvert"
    }
}
