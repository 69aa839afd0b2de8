//! Settings file management

use secrecy::SecretString;
use serde::Deserialize;

use crate::errors::PipelineError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Service settings
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON formatted logs
    #[serde(default)]
    pub log_json: bool,

    /// Also write daily rolling log files under the storage layout
    #[serde(default)]
    pub log_to_file: bool,

    /// Base directory for deployment records and local workspaces
    #[serde(default)]
    pub data_dir: Option<String>,

    /// Enable the dispatch HTTP API
    #[serde(default = "default_true")]
    pub enable_dispatch_server: bool,

    /// Enable the realtime log gateway
    #[serde(default = "default_true")]
    pub enable_realtime_gateway: bool,

    /// Enable the subdomain edge router
    #[serde(default = "default_true")]
    pub enable_edge_router: bool,

    /// Enable the deployment status tracker
    #[serde(default = "default_true")]
    pub enable_status_tracker: bool,

    #[serde(default)]
    pub dispatch: DispatchSettings,

    #[serde(default)]
    pub task_runner: TaskRunnerSettings,

    #[serde(default)]
    pub gateway: GatewaySettings,

    #[serde(default)]
    pub router: RouterSettings,

    #[serde(default)]
    pub bus: BusSettings,

    #[serde(default)]
    pub blob_store: BlobStoreSettings,

    #[serde(default)]
    pub builder: BuilderSettings,
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: false,
            data_dir: None,
            enable_dispatch_server: true,
            enable_realtime_gateway: true,
            enable_edge_router: true,
            enable_status_tracker: true,
            dispatch: DispatchSettings::default(),
            task_runner: TaskRunnerSettings::default(),
            gateway: GatewaySettings::default(),
            router: RouterSettings::default(),
            bus: BusSettings::default(),
            blob_store: BlobStoreSettings::default(),
            builder: BuilderSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file, falling back to defaults when the file
    /// does not exist.
    pub async fn load(file: &File) -> Result<Self, PipelineError> {
        if !file.exists().await {
            return Ok(Self::default());
        }
        file.read_json::<Settings>().await.map_err(|e| {
            PipelineError::ConfigError(format!(
                "invalid settings file {}: {}",
                file.path().display(),
                e
            ))
        })
    }

    /// Base URL the edge router proxies to.
    ///
    /// Defaults to the public S3 endpoint of the configured bucket.
    pub fn router_upstream_base(&self) -> String {
        match &self.router.upstream_base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.blob_store.bucket, self.blob_store.region, self.blob_store.prefix
            ),
        }
    }
}

/// Dispatch API settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    pub host: String,
    pub port: u16,

    /// Where deployments are served from
    pub serving: ServingSettings,

    /// Attempts per task runner start request
    pub max_attempts: u32,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9000,
            serving: ServingSettings::default(),
            max_attempts: 3,
        }
    }
}

/// Serving URL settings, rendered as `<scheme>://<id>.<domain>[:<port>]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServingSettings {
    pub scheme: String,
    pub domain: String,
    pub port: Option<u16>,
}

impl Default for ServingSettings {
    fn default() -> Self {
        Self {
            scheme: "http".to_string(),
            domain: "localhost".to_string(),
            port: Some(8000),
        }
    }
}

/// Which task runner launches build executors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskRunnerKind {
    /// Remote scheduler reached over HTTP
    Http,

    /// Local child process per build
    Process,
}

/// Task runner settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TaskRunnerSettings {
    pub kind: TaskRunnerKind,

    /// Scheduler endpoint (http kind)
    pub endpoint: String,

    /// Task template reference passed to the scheduler
    pub template: String,

    /// Bearer token for the scheduler (http kind)
    pub token: Option<SecretString>,

    /// Builder binary to launch (process kind), defaults to the running binary
    pub builder_program: Option<String>,

    /// Scheduler request timeout in seconds (http kind)
    pub request_timeout_secs: u64,
}

impl Default for TaskRunnerSettings {
    fn default() -> Self {
        Self {
            kind: TaskRunnerKind::Process,
            endpoint: "http://localhost:7000".to_string(),
            template: "builder-task".to_string(),
            token: None,
            builder_program: None,
            request_timeout_secs: 30,
        }
    }
}

/// Realtime gateway settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub host: String,
    pub port: u16,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9001,
        }
    }
}

/// Edge router settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterSettings {
    pub host: String,
    pub port: u16,

    /// HTTP base of the artifact namespace, e.g.
    /// `https://bucket.s3.eu-west-1.amazonaws.com/__outputs`
    pub upstream_base_url: Option<String>,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            upstream_base_url: None,
        }
    }
}

/// Log bus (MQTT broker) settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    pub host: String,
    pub port: u16,
    pub tls: bool,

    /// Optional path to a PEM-encoded CA certificate for broker TLS verification.
    /// When absent, the system certificate store is used.
    pub ca_cert_path: Option<String>,

    /// Prefix of the MQTT client id
    pub client_prefix: String,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            tls: false,
            ca_cert_path: None,
            client_prefix: "shipit".to_string(),
        }
    }
}

/// Object store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobBackend {
    S3,
    Local,
    Memory,
}

/// Blob store settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BlobStoreSettings {
    pub backend: BlobBackend,
    pub bucket: String,
    pub region: String,

    /// Custom S3-compatible endpoint
    pub endpoint: Option<String>,

    /// Static credentials, otherwise read from the AWS environment
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<SecretString>,

    /// Root directory for the local backend
    pub local_path: String,

    /// Namespace every artifact key is placed under
    pub prefix: String,
}

impl Default for BlobStoreSettings {
    fn default() -> Self {
        Self {
            backend: BlobBackend::S3,
            bucket: "shipit-outputs".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            local_path: "/var/lib/shipit/outputs".to_string(),
            prefix: "__outputs".to_string(),
        }
    }
}

/// Build executor settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BuilderSettings {
    /// Workspace root inside the isolated environment
    pub workspace_dir: String,

    /// Source checkout directory, relative to the workspace
    pub source_dir: String,

    /// Build output directory, relative to the source checkout
    pub output_dir: String,

    pub install_command: String,
    pub build_command: String,

    /// Clone the repository before building
    pub clone_source: bool,

    /// Treat a non-zero build exit code as a failed build
    pub fail_on_nonzero_exit: bool,

    /// Attempts per artifact upload
    pub upload_max_attempts: u32,
}

impl Default for BuilderSettings {
    fn default() -> Self {
        Self {
            workspace_dir: "/home/app".to_string(),
            source_dir: "output".to_string(),
            output_dir: "dist".to_string(),
            install_command: "npm install".to_string(),
            build_command: "npm run build".to_string(),
            clone_source: true,
            fail_on_nonzero_exit: true,
            upload_max_attempts: 3,
        }
    }
}
