use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BooksumConfig {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub toc: TocConfig,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for BooksumConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            storage: StorageConfig::default(),
            ai: AiConfig::default(),
            toc: TocConfig::default(),
            pipeline: PipelineSettings::default(),
            vault: VaultConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

// ─── Storage ───

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Filesystem,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreBackendConfig {
    pub backend: StoreBackend,
    /// Directory for `filesystem`, database file for `sqlite`.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_job_store")]
    pub job_store: StoreBackendConfig,
    #[serde(default = "default_output_store")]
    pub output_store: StoreBackendConfig,
    /// Directory that document references are resolved against.
    #[serde(default = "default_document_root")]
    pub document_root: String,
}

fn default_job_store() -> StoreBackendConfig {
    StoreBackendConfig {
        backend: StoreBackend::Sqlite,
        path: Some("~/.booksum/data/booksum.db".to_string()),
    }
}

fn default_output_store() -> StoreBackendConfig {
    StoreBackendConfig {
        backend: StoreBackend::Filesystem,
        path: Some("~/.booksum/vault".to_string()),
    }
}

fn default_document_root() -> String {
    "~/.booksum/inbox".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            job_store: default_job_store(),
            output_store: default_output_store(),
            document_root: default_document_root(),
        }
    }
}

// ─── AI service ───

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_vision_model")]
    pub vision_model: String,
    #[serde(default = "default_text_model")]
    pub text_model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_file: Option<String>,
    #[serde(default = "default_api_key_env_var")]
    pub api_key_env_var: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// PDF windows above this size go through the upload API instead of
    /// being sent inline.
    #[serde(default = "default_inline_limit")]
    pub inline_upload_limit_bytes: usize,
    #[serde(default = "default_activation_timeout")]
    pub activation_timeout_secs: u64,
    #[serde(default = "default_activation_poll_interval")]
    pub activation_poll_interval_ms: u64,
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_vision_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_text_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_api_key_env_var() -> Option<String> {
    Some("GEMINI_API_KEY".to_string())
}

fn default_request_timeout() -> u64 {
    300
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_output_tokens() -> u32 {
    8192
}

fn default_inline_limit() -> usize {
    15 * 1024 * 1024
}

fn default_activation_timeout() -> u64 {
    120
}

fn default_activation_poll_interval() -> u64 {
    2_000
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            vision_model: default_vision_model(),
            text_model: default_text_model(),
            api_key: None,
            api_key_file: None,
            api_key_env_var: default_api_key_env_var(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            inline_upload_limit_bytes: default_inline_limit(),
            activation_timeout_secs: default_activation_timeout(),
            activation_poll_interval_ms: default_activation_poll_interval(),
        }
    }
}

// ─── TOC detection ───

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TocConfig {
    #[serde(default = "default_scan_start_page")]
    pub scan_start_page: usize,
    #[serde(default = "default_narrow_end_page")]
    pub narrow_end_page: usize,
    #[serde(default = "default_wide_end_page")]
    pub wide_end_page: usize,
    #[serde(default = "default_min_chapters")]
    pub min_chapters: usize,
    #[serde(default = "default_runaway_limit")]
    pub runaway_limit: usize,
    /// A page holding at least this many distinct headings is treated as a
    /// printed table of contents.
    #[serde(default = "default_contents_page_threshold")]
    pub contents_page_threshold: usize,
}

fn default_scan_start_page() -> usize {
    3
}

fn default_narrow_end_page() -> usize {
    30
}

fn default_wide_end_page() -> usize {
    50
}

fn default_min_chapters() -> usize {
    2
}

fn default_runaway_limit() -> usize {
    100
}

fn default_contents_page_threshold() -> usize {
    3
}

impl Default for TocConfig {
    fn default() -> Self {
        Self {
            scan_start_page: default_scan_start_page(),
            narrow_end_page: default_narrow_end_page(),
            wide_end_page: default_wide_end_page(),
            min_chapters: default_min_chapters(),
            runaway_limit: default_runaway_limit(),
            contents_page_threshold: default_contents_page_threshold(),
        }
    }
}

// ─── Pipeline ───

/// What the finalizer does when some chapters ended up `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterFailurePolicy {
    /// Hold the artifact back until every chapter succeeds.
    #[default]
    Block,
    /// Write the artifact with placeholder sections for failed chapters.
    BestEffort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_inter_task_delay")]
    pub inter_task_delay_secs: u64,
    #[serde(default = "default_max_chapter_chars")]
    pub max_chapter_chars: usize,
    #[serde(default = "default_concept_hint_limit")]
    pub concept_hint_limit: usize,
    #[serde(default)]
    pub chapter_failure_policy: ChapterFailurePolicy,
    #[serde(default = "default_category")]
    pub default_category: String,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_max_deliveries")]
    pub max_deliveries: u32,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Age after which a claimed finalization with no finished job is
    /// considered lost by recovery.
    #[serde(default = "default_finalization_lease")]
    pub finalization_lease_secs: u64,
}

fn default_inter_task_delay() -> u64 {
    60
}

fn default_max_chapter_chars() -> usize {
    50_000
}

fn default_concept_hint_limit() -> usize {
    100
}

fn default_category() -> String {
    "Business".to_string()
}

fn default_max_deliveries() -> u32 {
    3
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_finalization_lease() -> u64 {
    600
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            inter_task_delay_secs: default_inter_task_delay(),
            max_chapter_chars: default_max_chapter_chars(),
            concept_hint_limit: default_concept_hint_limit(),
            chapter_failure_policy: ChapterFailurePolicy::default(),
            default_category: default_category(),
            retry: RetryPolicy::default(),
            max_deliveries: default_max_deliveries(),
            worker_count: default_worker_count(),
            finalization_lease_secs: default_finalization_lease(),
        }
    }
}

// ─── Vault layout ───

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultConfig {
    #[serde(default = "default_reading_dir")]
    pub reading_dir: String,
    #[serde(default = "default_knowledge_dir")]
    pub knowledge_dir: String,
    /// Prefix for the master and pending concept lists.
    #[serde(default = "default_config_prefix")]
    pub config_prefix: String,
}

fn default_reading_dir() -> String {
    "01_Reading".to_string()
}

fn default_knowledge_dir() -> String {
    "02_Knowledge".to_string()
}

fn default_config_prefix() -> String {
    "config".to_string()
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            reading_dir: default_reading_dir(),
            knowledge_dir: default_knowledge_dir(),
            config_prefix: default_config_prefix(),
        }
    }
}

// ─── Logging ───

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}
