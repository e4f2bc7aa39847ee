use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use anyhow::Result;

use crate::prompt::PromptTemplates;

/// Where named configuration values come from. The process environment in
/// production; a plain map in tests.
pub trait ConfigSource: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
}

/// Reads the live process environment on every lookup, so tier overrides
/// changed at runtime apply to the next request.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl ConfigSource for ProcessEnv {
    fn get(&self, name: &str) -> Option<String> {
        env::var(name).ok()
    }
}

impl ConfigSource for HashMap<String, String> {
    fn get(&self, name: &str) -> Option<String> {
        HashMap::get(self, name).cloned()
    }
}

pub fn source_bool(source: &dyn ConfigSource, name: &str, default: bool) -> bool {
    source
        .get(name)
        .map(|value| value.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

pub fn source_string(source: &dyn ConfigSource, name: &str, default: &str) -> String {
    source.get(name).unwrap_or_else(|| default.to_string())
}

pub fn source_u32(source: &dyn ConfigSource, name: &str, default: u32) -> u32 {
    source
        .get(name)
        .and_then(|value| value.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

pub fn source_u64(source: &dyn ConfigSource, name: &str, default: u64) -> u64 {
    source
        .get(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

/// Comma list, trimmed and lowercased, empties and repeats dropped.
/// `None` when the variable is not set at all.
pub fn source_csv_lowercase(source: &dyn ConfigSource, name: &str) -> Option<Vec<String>> {
    let raw = source.get(name)?;
    let mut values: Vec<String> = Vec::new();
    for value in raw.split(',') {
        let value = value.trim().to_lowercase();
        if value.is_empty() || values.contains(&value) {
            continue;
        }
        values.push(value);
    }
    Some(values)
}

fn normalize_database_url(value: String) -> String {
    if value.starts_with("sqlite+aiosqlite://") {
        return value.replacen("sqlite+aiosqlite://", "sqlite://", 1);
    }
    value
}

/// Safety thresholds sent with every Gemini request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyProfile {
    Standard,
    Permissive,
}

impl SafetyProfile {
    /// Blank means standard; unknown values are `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "" | "standard" => Some(SafetyProfile::Standard),
            "permissive" | "off" | "none" => Some(SafetyProfile::Permissive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub log_level: String,
    pub log_dir: PathBuf,
    pub database_url: String,
    pub gemini_api_key: String,
    pub gemini_base_url: String,
    pub gemini_image_model: String,
    pub gemini_safety_settings: SafetyProfile,
    pub gemini_request_timeout_seconds: u64,
    pub rate_limit_seconds: u64,
    pub storage_dir: PathBuf,
    pub public_storage_url: String,
    pub prompt_templates: PromptTemplates,
    /// Problems found while loading, logged once logging is up.
    pub warnings: Vec<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::from_source(&ProcessEnv)
    }

    pub fn from_source(source: &dyn ConfigSource) -> Result<Self> {
        let prompt_templates = PromptTemplates::from_source(source)?;
        let mut warnings = Vec::new();

        let safety_value = source_string(source, "GEMINI_SAFETY_SETTINGS", "standard");
        let gemini_safety_settings = SafetyProfile::parse(&safety_value).unwrap_or_else(|| {
            warnings.push(format!(
                "Unknown GEMINI_SAFETY_SETTINGS value '{safety_value}'; defaulting to standard."
            ));
            SafetyProfile::Standard
        });

        let mut public_storage_url = source_string(
            source,
            "PUBLIC_STORAGE_URL",
            "http://localhost:8080/storage/",
        );
        if !public_storage_url.ends_with('/') {
            public_storage_url.push('/');
        }

        Ok(Config {
            bind_address: source_string(source, "BIND_ADDRESS", "0.0.0.0:8080"),
            log_level: source_string(source, "LOG_LEVEL", "info").to_lowercase(),
            log_dir: PathBuf::from(source_string(source, "LOG_DIR", "logs")),
            database_url: normalize_database_url(source_string(
                source,
                "DATABASE_URL",
                "sqlite://headshots.db?mode=rwc",
            )),
            gemini_api_key: source_string(source, "GEMINI_API_KEY", ""),
            gemini_base_url: source_string(
                source,
                "GEMINI_BASE_URL",
                "https://generativelanguage.googleapis.com/v1beta",
            )
            .trim_end_matches('/')
            .to_string(),
            gemini_image_model: source_string(
                source,
                "GEMINI_IMAGE_MODEL",
                "gemini-2.5-flash-image-preview",
            ),
            gemini_safety_settings,
            gemini_request_timeout_seconds: source_u64(
                source,
                "GEMINI_REQUEST_TIMEOUT_SECONDS",
                120,
            ),
            rate_limit_seconds: source_u64(source, "RATE_LIMIT_SECONDS", 5),
            storage_dir: PathBuf::from(source_string(source, "STORAGE_DIR", "storage")),
            public_storage_url,
            prompt_templates,
            warnings,
        })
    }
}
