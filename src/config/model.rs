// src/config/model.rs

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration as read from a YAML file.
///
/// ```yaml
/// workflows:
///   - ./workflows
/// broker:
///   host: localhost
///   port: 6379
///   database: "0"
/// signal:
///   host: localhost
///   port: 6379
///   database: "1"
/// store:
///   host: localhost
///   port: 27017
///   database: lightflow
/// worker:
///   concurrency: 4
///   queues_default: [workflow, dag, task]
/// logging:
///   level: info
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Search paths for workflow definition files.
    #[serde(default)]
    pub workflows: Vec<PathBuf>,

    /// Connection settings for the job queue broker.
    #[serde(default)]
    pub broker: EndpointConfig,

    /// Connection settings for the signal bus; may coincide with the broker.
    #[serde(default)]
    pub signal: EndpointConfig,

    /// Connection settings for the document store.
    #[serde(default = "EndpointConfig::store_default")]
    pub store: EndpointConfig,

    #[serde(default)]
    pub worker: WorkerSection,

    #[serde(default)]
    pub logging: LoggingSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workflows: Vec::new(),
            broker: EndpointConfig::default(),
            signal: EndpointConfig::default(),
            store: EndpointConfig::store_default(),
            worker: WorkerSection::default(),
            logging: LoggingSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            database: "0".to_string(),
            password: None,
        }
    }
}

impl EndpointConfig {
    fn store_default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 27017,
            database: "lightflow".to_string(),
            password: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSection {
    /// In-process job slots per worker.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Queues a worker services when `--queues` is not given.
    #[serde(default = "default_queues")]
    pub queues_default: Vec<String>,
}

fn default_concurrency() -> usize {
    4
}

fn default_queues() -> Vec<String> {
    vec![
        "workflow".to_string(),
        "dag".to_string(),
        "task".to_string(),
    ]
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            queues_default: default_queues(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// The default configuration rendered as YAML, for `config default`.
    pub fn default_yaml() -> String {
        // Defaults serialize cleanly; a failure here would be a programming
        // error in the model itself.
        serde_yaml::to_string(&Config {
            workflows: vec![PathBuf::from("./workflows")],
            ..Config::default()
        })
        .unwrap_or_default()
    }
}
