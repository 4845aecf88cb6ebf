use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use codereview_core::{DEFAULT_BASE_URL, DEFAULT_MODEL, DEFAULT_SYSTEM_INSTRUCTION};

use crate::service::DEFAULT_UPSTREAM_TIMEOUT;

#[derive(Clone)]
pub struct Config {
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub port: u16,
    /// Instruction sent with every review; built-in unless `SYSTEM_INSTRUCTION_PATH` is set.
    pub system_instruction: String,
    pub upstream_timeout: Duration,
    pub recording_enabled: bool,
    pub recording_log_path: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let gemini_api_key = non_blank(lookup("GOOGLE_GEMINI_KEY"))
            .context("GOOGLE_GEMINI_KEY environment variable is required")?;

        let gemini_model =
            non_blank(lookup("GEMINI_MODEL")).unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let gemini_base_url =
            non_blank(lookup("GEMINI_BASE_URL")).unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let port = lookup("PORT")
            .unwrap_or_else(|| "5000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let system_instruction = match non_blank(lookup("SYSTEM_INSTRUCTION_PATH")) {
            Some(path) => {
                let instruction = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read SYSTEM_INSTRUCTION_PATH {}", path))?;
                if instruction.trim().is_empty() {
                    anyhow::bail!("SYSTEM_INSTRUCTION_PATH {} is empty", path);
                }
                instruction
            }
            None => DEFAULT_SYSTEM_INSTRUCTION.to_string(),
        };

        let upstream_timeout = match lookup("UPSTREAM_TIMEOUT_SECS") {
            Some(secs) => {
                let secs = secs
                    .parse::<u64>()
                    .context("UPSTREAM_TIMEOUT_SECS must be a whole number of seconds")?;
                if secs == 0 {
                    anyhow::bail!("UPSTREAM_TIMEOUT_SECS must be greater than zero");
                }
                Duration::from_secs(secs)
            }
            None => DEFAULT_UPSTREAM_TIMEOUT,
        };

        let recording_enabled = lookup("RECORDING_ENABLED")
            .unwrap_or_else(|| "false".to_string())
            .parse::<bool>()
            .unwrap_or(false);

        let recording_log_path = lookup("RECORDING_LOG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("recordings.jsonl"));

        Ok(Config {
            gemini_api_key,
            gemini_model,
            gemini_base_url,
            port,
            system_instruction,
            upstream_timeout,
            recording_enabled,
            recording_log_path,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_from(&[("GOOGLE_GEMINI_KEY", "k")])).unwrap();

        assert_eq!(config.gemini_api_key, "k");
        assert_eq!(config.gemini_model, "gemini-2.5-flash");
        assert_eq!(config.gemini_base_url, DEFAULT_BASE_URL);
        assert_eq!(config.port, 5000);
        assert_eq!(config.system_instruction, DEFAULT_SYSTEM_INSTRUCTION);
        assert_eq!(config.upstream_timeout, Duration::from_secs(30));
        assert!(!config.recording_enabled);
        assert_eq!(config.recording_log_path, PathBuf::from("recordings.jsonl"));
    }

    #[test]
    fn test_api_key_is_required() {
        assert!(Config::from_lookup(lookup_from(&[])).is_err());
        // Whitespace-only should be treated as unset
        assert!(Config::from_lookup(lookup_from(&[("GOOGLE_GEMINI_KEY", "  ")])).is_err());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("GOOGLE_GEMINI_KEY", "k"),
            ("GEMINI_MODEL", "gemini-2.5-pro"),
            ("PORT", "8080"),
            ("UPSTREAM_TIMEOUT_SECS", "5"),
            ("RECORDING_ENABLED", "true"),
            ("RECORDING_LOG_PATH", "/tmp/rec.jsonl"),
        ]))
        .unwrap();

        assert_eq!(config.gemini_model, "gemini-2.5-pro");
        assert_eq!(config.port, 8080);
        assert_eq!(config.upstream_timeout, Duration::from_secs(5));
        assert!(config.recording_enabled);
        assert_eq!(config.recording_log_path, PathBuf::from("/tmp/rec.jsonl"));
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        assert!(
            Config::from_lookup(lookup_from(&[("GOOGLE_GEMINI_KEY", "k"), ("PORT", "http")]))
                .is_err()
        );
        assert!(Config::from_lookup(lookup_from(&[
            ("GOOGLE_GEMINI_KEY", "k"),
            ("UPSTREAM_TIMEOUT_SECS", "0")
        ]))
        .is_err());
    }

    #[test]
    fn test_system_instruction_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("instruction.txt");
        std::fs::write(&path, "You review Rust only.").unwrap();
        let path = path.to_str().unwrap().to_string();

        let config = Config::from_lookup(lookup_from(&[
            ("GOOGLE_GEMINI_KEY", "k"),
            ("SYSTEM_INSTRUCTION_PATH", path.as_str()),
        ]))
        .unwrap();

        assert_eq!(config.system_instruction, "You review Rust only.");
    }

    #[test]
    fn test_missing_instruction_file_is_an_error() {
        let result = Config::from_lookup(lookup_from(&[
            ("GOOGLE_GEMINI_KEY", "k"),
            ("SYSTEM_INSTRUCTION_PATH", "/definitely/not/here.txt"),
        ]));
        assert!(result.is_err());
    }
}
