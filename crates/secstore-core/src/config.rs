//! Configuration module
//!
//! The agent is configured from the process environment (optionally seeded
//! from a `.env` file). Any failure here is fatal at startup.

use std::env;
use std::path::PathBuf;

const SERVER_PORT: u16 = 8210;
const MOUNT_TIMEOUT_SECS: u64 = 120;
const PROCESS_TIMEOUT_FLOOR_SECS: u64 = 300;
const PROCESS_TIMEOUT_PER_GB_SECS: u64 = 120;
const MAX_UPLOAD_SIZE_GB: u64 = 50;
const MAX_DOWNLOAD_SIZE_GB: u64 = 100;
const WORKER_POOL_SIZE: usize = 4;

/// Settings every binary in the workspace reads.
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub server_port: u16,
    pub environment: String,
    pub log_format: String,
}

/// Storage agent configuration
#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub base: BaseConfig,
    // Mounts
    pub mount_root: PathBuf,
    pub mount_table_path: PathBuf,
    pub nfs_version: Option<String>,
    pub mount_timeout_secs: u64,
    pub mount_binary: String,
    // External process bounds
    pub process_timeout_floor_secs: u64,
    pub process_timeout_per_gb_secs: u64,
    pub snapshot_template_helper: Option<PathBuf>,
    // Uploads
    pub upload_key_file: PathBuf,
    pub max_upload_size_gb: u64,
    pub upload_public_base_url: String,
    // Downloads
    pub max_download_size_gb: u64,
    pub public_download_dir: PathBuf,
    pub public_download_base_url: String,
    // Command execution
    pub worker_pool_size: usize,
    pub service_api_key: Option<String>,
    // Firewall
    pub firewall_manage: bool,
    pub firewall_chain: String,
    pub iptables_binary: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            base: BaseConfig {
                server_port: SERVER_PORT,
                environment: "development".to_string(),
                log_format: "compact".to_string(),
            },
            mount_root: PathBuf::from("/mnt/SecStorage"),
            mount_table_path: PathBuf::from("/proc/mounts"),
            nfs_version: None,
            mount_timeout_secs: MOUNT_TIMEOUT_SECS,
            mount_binary: "mount".to_string(),
            process_timeout_floor_secs: PROCESS_TIMEOUT_FLOOR_SECS,
            process_timeout_per_gb_secs: PROCESS_TIMEOUT_PER_GB_SECS,
            snapshot_template_helper: None,
            upload_key_file: PathBuf::from("/etc/secstore/upload.key"),
            max_upload_size_gb: MAX_UPLOAD_SIZE_GB,
            upload_public_base_url: format!("https://localhost:{}", SERVER_PORT),
            max_download_size_gb: MAX_DOWNLOAD_SIZE_GB,
            public_download_dir: PathBuf::from("/var/www/html/userdata"),
            public_download_base_url: format!("http://localhost:{}/userdata", SERVER_PORT),
            worker_pool_size: WORKER_POOL_SIZE,
            service_api_key: None,
            firewall_manage: false,
            firewall_chain: "INPUT".to_string(),
            iptables_binary: "iptables".to_string(),
        }
    }
}

/// Application configuration (storage agent).
#[derive(Clone, Debug)]
pub struct Config(pub Box<AgentConfig>);

impl Config {
    fn as_agent(&self) -> &AgentConfig {
        &self.0
    }

    pub fn new(config: AgentConfig) -> Self {
        Config(Box::new(config))
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        let env = self.as_agent().base.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        let config = AgentConfig::from_env()?;
        Ok(Config(Box::new(config)))
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.as_agent().validate()
    }

    pub fn server_port(&self) -> u16 {
        self.as_agent().base.server_port
    }

    pub fn environment(&self) -> &str {
        &self.as_agent().base.environment
    }

    pub fn log_format(&self) -> &str {
        &self.as_agent().base.log_format
    }

    pub fn mount_root(&self) -> &std::path::Path {
        &self.as_agent().mount_root
    }

    pub fn mount_table_path(&self) -> &std::path::Path {
        &self.as_agent().mount_table_path
    }

    pub fn nfs_version(&self) -> Option<&str> {
        self.as_agent().nfs_version.as_deref()
    }

    pub fn mount_timeout_secs(&self) -> u64 {
        self.as_agent().mount_timeout_secs
    }

    pub fn mount_binary(&self) -> &str {
        &self.as_agent().mount_binary
    }

    pub fn process_timeout_floor_secs(&self) -> u64 {
        self.as_agent().process_timeout_floor_secs
    }

    pub fn process_timeout_per_gb_secs(&self) -> u64 {
        self.as_agent().process_timeout_per_gb_secs
    }

    pub fn snapshot_template_helper(&self) -> Option<&std::path::Path> {
        self.as_agent().snapshot_template_helper.as_deref()
    }

    pub fn upload_key_file(&self) -> &std::path::Path {
        &self.as_agent().upload_key_file
    }

    pub fn max_upload_size_gb(&self) -> u64 {
        self.as_agent().max_upload_size_gb
    }

    pub fn upload_public_base_url(&self) -> &str {
        &self.as_agent().upload_public_base_url
    }

    pub fn max_download_size_gb(&self) -> u64 {
        self.as_agent().max_download_size_gb
    }

    pub fn public_download_dir(&self) -> &std::path::Path {
        &self.as_agent().public_download_dir
    }

    pub fn public_download_base_url(&self) -> &str {
        &self.as_agent().public_download_base_url
    }

    pub fn worker_pool_size(&self) -> usize {
        self.as_agent().worker_pool_size
    }

    pub fn service_api_key(&self) -> Option<&str> {
        self.as_agent().service_api_key.as_deref()
    }

    pub fn firewall_manage(&self) -> bool {
        self.as_agent().firewall_manage
    }

    pub fn firewall_chain(&self) -> &str {
        &self.as_agent().firewall_chain
    }

    pub fn iptables_binary(&self) -> &str {
        &self.as_agent().iptables_binary
    }
}

impl AgentConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let defaults = AgentConfig::default();

        let server_port: u16 = env::var("PORT")
            .unwrap_or_else(|_| SERVER_PORT.to_string())
            .parse()
            .map_err(|_| anyhow::anyhow!("PORT must be a valid number"))?;

        let base = BaseConfig {
            server_port,
            environment: env::var("ENVIRONMENT")
                .or_else(|_| env::var("APP_ENV"))
                .unwrap_or_else(|_| "development".to_string()),
            log_format: env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "compact".to_string())
                .to_lowercase(),
        };

        let config = AgentConfig {
            base,
            mount_root: env::var("MOUNT_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.mount_root),
            mount_table_path: env::var("MOUNT_TABLE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.mount_table_path),
            nfs_version: env::var("NFS_VERSION").ok().filter(|s| !s.is_empty()),
            mount_timeout_secs: env::var("MOUNT_TIMEOUT_SECS")
                .unwrap_or_else(|_| MOUNT_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(MOUNT_TIMEOUT_SECS),
            mount_binary: env::var("MOUNT_BINARY").unwrap_or(defaults.mount_binary),
            process_timeout_floor_secs: env::var("PROCESS_TIMEOUT_FLOOR_SECS")
                .unwrap_or_else(|_| PROCESS_TIMEOUT_FLOOR_SECS.to_string())
                .parse()
                .unwrap_or(PROCESS_TIMEOUT_FLOOR_SECS),
            process_timeout_per_gb_secs: env::var("PROCESS_TIMEOUT_PER_GB_SECS")
                .unwrap_or_else(|_| PROCESS_TIMEOUT_PER_GB_SECS.to_string())
                .parse()
                .unwrap_or(PROCESS_TIMEOUT_PER_GB_SECS),
            snapshot_template_helper: env::var("SNAPSHOT_TEMPLATE_HELPER")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            upload_key_file: env::var("UPLOAD_KEY_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_key_file),
            max_upload_size_gb: env::var("MAX_UPLOAD_SIZE_GB")
                .unwrap_or_else(|_| MAX_UPLOAD_SIZE_GB.to_string())
                .parse()
                .unwrap_or(MAX_UPLOAD_SIZE_GB),
            upload_public_base_url: env::var("UPLOAD_PUBLIC_BASE_URL")
                .unwrap_or_else(|_| format!("https://localhost:{}", server_port)),
            max_download_size_gb: env::var("MAX_DOWNLOAD_SIZE_GB")
                .unwrap_or_else(|_| MAX_DOWNLOAD_SIZE_GB.to_string())
                .parse()
                .unwrap_or(MAX_DOWNLOAD_SIZE_GB),
            public_download_dir: env::var("PUBLIC_DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.public_download_dir),
            public_download_base_url: env::var("PUBLIC_DOWNLOAD_BASE_URL")
                .unwrap_or_else(|_| format!("http://localhost:{}/userdata", server_port)),
            worker_pool_size: env::var("WORKER_POOL_SIZE")
                .unwrap_or_else(|_| WORKER_POOL_SIZE.to_string())
                .parse()
                .unwrap_or(WORKER_POOL_SIZE),
            service_api_key: env::var("SERVICE_API_KEY").ok().filter(|s| !s.is_empty()),
            firewall_manage: env::var("FIREWALL_MANAGE")
                .unwrap_or_else(|_| "false".to_string())
                .to_lowercase()
                .parse()
                .unwrap_or(false),
            firewall_chain: env::var("FIREWALL_CHAIN").unwrap_or(defaults.firewall_chain),
            iptables_binary: env::var("IPTABLES_BINARY").unwrap_or(defaults.iptables_binary),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.base.server_port == 0 {
            return Err(anyhow::anyhow!("PORT must be greater than 0"));
        }

        if !matches!(self.base.log_format.as_str(), "compact" | "json") {
            return Err(anyhow::anyhow!("LOG_FORMAT must be 'compact' or 'json'"));
        }

        if self.worker_pool_size == 0 {
            return Err(anyhow::anyhow!("WORKER_POOL_SIZE must be at least 1"));
        }

        if self.max_upload_size_gb == 0 {
            return Err(anyhow::anyhow!("MAX_UPLOAD_SIZE_GB must be greater than 0"));
        }

        if self.mount_timeout_secs == 0 || self.process_timeout_floor_secs == 0 {
            return Err(anyhow::anyhow!(
                "MOUNT_TIMEOUT_SECS and PROCESS_TIMEOUT_FLOOR_SECS must be greater than 0"
            ));
        }

        if !self.mount_root.is_absolute() {
            return Err(anyhow::anyhow!("MOUNT_ROOT must be an absolute path"));
        }

        for (name, value) in [
            ("UPLOAD_PUBLIC_BASE_URL", &self.upload_public_base_url),
            ("PUBLIC_DOWNLOAD_BASE_URL", &self.public_download_base_url),
        ] {
            url::Url::parse(value)
                .map_err(|e| anyhow::anyhow!("{} is not a valid URL: {}", name, e))?;
        }

        if self.firewall_manage && self.firewall_chain.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "FIREWALL_CHAIN must be set when FIREWALL_MANAGE=true"
            ));
        }

        Ok(())
    }
}
