use anyhow::Result;
use clap::Parser;
use serde::Deserialize;
use serde_yaml;
use std::env;
use std::fs;
use std::path::PathBuf;

use crate::model::Role;

#[derive(Parser, Debug)]
#[command(name = "stockroom")]
#[command(about = "Runs the stockroom inventory service", long_about = None)]
pub struct Cli {
    #[arg(short = 'c', long = "config")]
    pub config_path: Option<String>,
}

pub fn default_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".stockroom")
}

pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.yaml")
}

#[derive(Debug, Deserialize, Clone)]
pub struct App {
    database: String,
    port: u16,
}

impl App {
    pub fn get_db(&self) -> &str {
        &self.database
    }

    pub fn get_port(&self) -> u16 {
        self.port
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Inventory {
    #[serde(default = "default_barcode_site")]
    pub barcode_site: String,
    #[serde(default = "default_loan_days")]
    pub default_loan_days: i64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_barcode_site() -> String {
    "CDM".to_string()
}

/// Upper bound for `inventory.default_loan_days` (ten years).
pub const MAX_LOAN_DAYS: i64 = 3650;

fn default_loan_days() -> i64 {
    14
}

fn default_page_size() -> u32 {
    20
}

impl Default for Inventory {
    fn default() -> Self {
        Inventory {
            barcode_site: default_barcode_site(),
            default_loan_days: default_loan_days(),
            page_size: default_page_size(),
        }
    }
}

/// A user provisioned by the identity provider.
#[derive(Debug, Deserialize, Clone)]
pub struct DirectoryUser {
    pub id: String,
    pub full_name: String,
    #[serde(default)]
    pub email: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub department: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Directory {
    #[serde(default)]
    pub users: Vec<DirectoryUser>,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub inventory: Inventory,
    #[serde(default)]
    pub directory: Directory,
}

impl Config {
    pub fn new(path: &str) -> Result<Self> {
        let yaml_str = fs::read_to_string(path)?;
        Config::from_yaml(&yaml_str)
    }

    pub fn from_yaml(yaml_str: &str) -> Result<Self> {
        let yaml_with_env = Config::substitute_env_vars(yaml_str)?;
        let config: Config = serde_yaml::from_str(&yaml_with_env)?;
        if config.inventory.page_size == 0 {
            anyhow::bail!("inventory.page_size must be greater than 0");
        }
        if !(1..=MAX_LOAN_DAYS).contains(&config.inventory.default_loan_days) {
            anyhow::bail!("inventory.default_loan_days must be between 1 and {MAX_LOAN_DAYS}");
        }
        Ok(config)
    }

    fn substitute_env_vars(yaml_str: &str) -> Result<String> {
        let mut result = yaml_str.to_string();
        let mut offset = 0;

        while let Some(start) = result[offset..].find("${") {
            let actual_start = offset + start;
            let Some(end) = result[actual_start..].find('}') else {
                break;
            };
            let expr = &result[actual_start + 2..actual_start + end];

            // ${VAR:-default}
            let env_value = match expr.split_once(":-") {
                Some((name, default_val)) => env::var(name).unwrap_or_else(|_| default_val.to_string()),
                None => env::var(expr).unwrap_or_else(|_| {
                    tracing::warn!(var = expr, "environment variable not found, substituting empty string");
                    String::new()
                }),
            };

            result.replace_range(actual_start..actual_start + end + 1, &env_value);
            offset = actual_start + env_value.len();
        }

        Ok(result)
    }
}
