use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What should happen to a URL the next time it is submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "indexaction", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum IndexAction {
    Index,
    Delete,
    Ignore,
}

/// Per-shop limits and retry budget, stored as the `settings` JSONB column.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ShopSettings {
    #[serde(default = "ShopSettings::default_limit", rename = "googleLimit")]
    pub google_limit: i64,
    #[serde(default = "ShopSettings::default_limit", rename = "bingLimit")]
    pub bing_limit: i64,
    #[serde(default = "ShopSettings::default_retry_limit", rename = "retryLimit")]
    pub retry_limit: u32,
}

impl ShopSettings {
    fn default_limit() -> i64 {
        200
    }

    fn default_retry_limit() -> u32 {
        3
    }
}

impl Default for ShopSettings {
    fn default() -> Self {
        Self {
            google_limit: Self::default_limit(),
            bing_limit: Self::default_limit(),
            retry_limit: Self::default_retry_limit(),
        }
    }
}

/// A tenant row, `auth` table. Credentials stay ciphertext until an L2
/// provider path actually needs them.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Auth {
    pub id: Uuid,
    pub shop: String,
    #[sqlx(rename = "googleConfig")]
    pub google_config: Option<String>,
    #[sqlx(rename = "bingApiKey")]
    pub bing_api_key: Option<String>,
    #[sqlx(json)]
    pub settings: ShopSettings,
    #[sqlx(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[sqlx(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// The subset of `Auth` that travels inside an `UrlIndexBatchJob` envelope.
/// Credentials remain encrypted; only L2 decrypts them, and only the
/// provider path that needs them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthPayload {
    pub shop: String,
    #[serde(rename = "googleConfig", skip_serializing_if = "Option::is_none")]
    pub google_config: Option<String>,
    #[serde(rename = "bingApiKey", skip_serializing_if = "Option::is_none")]
    pub bing_api_key: Option<String>,
    pub settings: ShopSettings,
}

impl From<&Auth> for AuthPayload {
    fn from(auth: &Auth) -> Self {
        Self {
            shop: auth.shop.clone(),
            google_config: auth.google_config.clone(),
            bing_api_key: auth.bing_api_key.clone(),
            settings: auth.settings,
        }
    }
}

/// One row projected off `url_entry` for batching into L1's output.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PendingUrlRow {
    #[sqlx(rename = "webUrl")]
    pub web_url: String,
    #[sqlx(rename = "indexAction")]
    pub index_action: IndexAction,
    pub attempts: i32,
}

/// A single URL plus how many times it has already been attempted;
/// the unit the provider workers operate on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlItem {
    #[serde(rename = "webUrl")]
    pub web_url: String,
    pub attempts: i32,
}

/// `actions` field of `UrlIndexBatchJob`: `{"INDEX": [...], "DELETE": [...]}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchActions {
    #[serde(rename = "INDEX", default)]
    pub index: Vec<UrlItem>,
    #[serde(rename = "DELETE", default)]
    pub delete: Vec<UrlItem>,
}

impl BatchActions {
    pub fn total(&self) -> usize {
        self.index.len() + self.delete.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty() && self.delete.is_empty()
    }
}

/// L1's output / L2's input payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlIndexBatchJob {
    #[serde(rename = "jobType")]
    pub job_type: String,
    pub version: u32,
    pub shop: String,
    pub auth: AuthPayload,
    pub actions: BatchActions,
}

pub const URL_INDEX_BATCH_JOB_TYPE: &str = "URL_INDEXING_BATCH";
pub const URL_INDEX_BATCH_JOB_VERSION: u32 = 1;

impl UrlIndexBatchJob {
    pub fn new(shop: String, auth: AuthPayload, actions: BatchActions) -> Self {
        Self {
            job_type: URL_INDEX_BATCH_JOB_TYPE.to_string(),
            version: URL_INDEX_BATCH_JOB_VERSION,
            shop,
            auth,
            actions,
        }
    }
}

/// Scheduler's seed payload, L1's input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedJobPayload {
    pub shop: String,
    pub action: String,
    pub priority: String,
    pub scheduled_at: DateTime<Utc>,
}

impl SeedJobPayload {
    pub fn new(shop: String) -> Self {
        Self {
            shop,
            action: "index.urls".to_string(),
            priority: "normal".to_string(),
            scheduled_at: Utc::now(),
        }
    }
}

/// Outcome of a single URL against the Google Indexing API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoogleResultStatus {
    Success,
    Failed,
    QuotaExceeded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleUrlResult {
    pub url: String,
    pub action: String,
    pub status: GoogleResultStatus,
    pub attempts: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GoogleBatchResult {
    pub total_urls: usize,
    pub successful: usize,
    pub failed: usize,
    pub quota_exceeded: usize,
    pub results: Vec<GoogleUrlResult>,
}

impl GoogleBatchResult {
    pub fn add(&mut self, result: GoogleUrlResult) {
        match result.status {
            GoogleResultStatus::Success => self.successful += 1,
            GoogleResultStatus::Failed => self.failed += 1,
            GoogleResultStatus::QuotaExceeded => self.quota_exceeded += 1,
        }
        self.results.push(result);
    }
}

/// Outcome of a single batch submission against Bing IndexNow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BingResultStatus {
    Success,
    Failed,
    QuotaExceeded,
    RateLimited,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BingBatchUrlResult {
    pub batch_number: usize,
    pub urls: Vec<String>,
    pub url_count: usize,
    pub status: BingResultStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BingBatchResult {
    pub total_urls: usize,
    pub total_batches: usize,
    pub successful_batches: usize,
    pub failed_batches: usize,
    pub successful_urls: usize,
    pub failed_urls: usize,
    pub quota_exceeded: usize,
    pub rate_limited: usize,
    pub results: Vec<BingBatchUrlResult>,
}

impl BingBatchResult {
    pub fn add(&mut self, result: BingBatchUrlResult) {
        match result.status {
            BingResultStatus::Success => {
                self.successful_batches += 1;
                self.successful_urls += result.url_count;
            }
            BingResultStatus::Failed => {
                self.failed_batches += 1;
                self.failed_urls += result.url_count;
            }
            BingResultStatus::QuotaExceeded => {
                self.quota_exceeded += 1;
                self.failed_urls += result.url_count;
            }
            BingResultStatus::RateLimited => {
                self.rate_limited += 1;
                self.failed_urls += result.url_count;
            }
        }
        self.results.push(result);
    }
}

/// Why a provider was not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    MissingCredentials,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleOutcome {
    pub executed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<GoogleBatchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<SkipReason>,
}

impl GoogleOutcome {
    pub fn not_executed(reason: SkipReason) -> Self {
        Self {
            executed: false,
            success: None,
            result: None,
            reason: Some(reason),
        }
    }

    pub fn executed(result: GoogleBatchResult) -> Self {
        let success = result.failed == 0;
        Self {
            executed: true,
            success: Some(success),
            result: Some(result),
            reason: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BingOutcome {
    pub executed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<BingBatchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<SkipReason>,
}

impl BingOutcome {
    pub fn not_executed(reason: SkipReason) -> Self {
        Self {
            executed: false,
            success: None,
            result: None,
            reason: Some(reason),
        }
    }

    pub fn executed(result: BingBatchResult) -> Self {
        let success = result.failed_batches == 0 && result.rate_limited == 0;
        Self {
            executed: true,
            success: Some(success),
            result: Some(result),
            reason: None,
        }
    }
}

/// L2's output / L3's input payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexResultEnvelope {
    pub shop: String,
    pub job_id: Uuid,
    pub processed_at: DateTime<Utc>,
    pub google: GoogleOutcome,
    pub bing: BingOutcome,
}
