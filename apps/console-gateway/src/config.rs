use std::time::Duration;

use console_bridge::demux::DEFAULT_MAX_FRAME_LEN;
use console_bridge::docker::DEFAULT_DOCKER_HOST;
use console_bridge::{CompilerConfig, ExecSettings, ReceiptPolling};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_docker_host")]
    pub docker_host: String,
    #[serde(default = "default_console_program")]
    pub console_program: String,
    #[serde(default)]
    pub console_attach_target: Option<String>,
    #[serde(default = "default_exec_timeout_ms")]
    pub exec_timeout_ms: u64,
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
    #[serde(default = "default_deploy_gas")]
    pub deploy_gas: u64,
    #[serde(default = "default_receipt_poll_initial_ms")]
    pub receipt_poll_initial_ms: u64,
    #[serde(default = "default_receipt_poll_max_ms")]
    pub receipt_poll_max_ms: u64,
    #[serde(default = "default_receipt_poll_attempts")]
    pub receipt_poll_attempts: u32,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            bind_addr: default_bind_addr(),
            docker_host: default_docker_host(),
            console_program: default_console_program(),
            console_attach_target: None,
            exec_timeout_ms: default_exec_timeout_ms(),
            max_frame_len: default_max_frame_len(),
            deploy_gas: default_deploy_gas(),
            receipt_poll_initial_ms: default_receipt_poll_initial_ms(),
            receipt_poll_max_ms: default_receipt_poll_max_ms(),
            receipt_poll_attempts: default_receipt_poll_attempts(),
            log_filter: default_log_filter(),
        }
    }
}

impl AppConfig {
    /// Reads configuration from the process environment (`BIND_ADDR`,
    /// `DOCKER_HOST`, `EXEC_TIMEOUT_MS`, ...).
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::load(config::Environment::default().separator("__"))
    }

    fn load(source: config::Environment) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(source)
            .build()
            .and_then(|c| c.try_deserialize())
            .map(AppConfig::normalize)
    }

    fn normalize(mut self) -> Self {
        self.console_attach_target = Self::normalize_opt(self.console_attach_target.take());
        self.console_program = self.console_program.trim().to_string();
        if self.console_program.is_empty() {
            self.console_program = default_console_program();
        }
        self
    }

    fn normalize_opt(value: Option<String>) -> Option<String> {
        value.and_then(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }

    pub fn compiler_config(&self) -> CompilerConfig {
        CompilerConfig {
            program: self.console_program.clone(),
            attach_target: self.console_attach_target.clone(),
            deploy_gas: self.deploy_gas,
            ..CompilerConfig::default()
        }
    }

    pub fn exec_settings(&self) -> ExecSettings {
        ExecSettings {
            timeout: Duration::from_millis(self.exec_timeout_ms),
            max_frame_len: self.max_frame_len,
        }
    }

    pub fn receipt_polling(&self) -> ReceiptPolling {
        ReceiptPolling {
            initial_delay: Duration::from_millis(self.receipt_poll_initial_ms),
            max_delay: Duration::from_millis(self.receipt_poll_max_ms),
            max_attempts: self.receipt_poll_attempts,
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_docker_host() -> String {
    DEFAULT_DOCKER_HOST.to_string()
}

fn default_console_program() -> String {
    "geth".to_string()
}

fn default_exec_timeout_ms() -> u64 {
    30_000
}

fn default_max_frame_len() -> usize {
    DEFAULT_MAX_FRAME_LEN
}

fn default_deploy_gas() -> u64 {
    4_700_000
}

fn default_receipt_poll_initial_ms() -> u64 {
    500
}

fn default_receipt_poll_max_ms() -> u64 {
    8_000
}

fn default_receipt_poll_attempts() -> u32 {
    10
}

fn default_log_filter() -> String {
    "info,console_bridge=debug".to_string()
}
