//! Configuration - segment sizing, expansion policy and logging
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//!
//! ```toml
//! [segment]
//! size = 1048576
//! expand_forward = true
//! expand_backward = false
//!
//! [logging]
//! level = "debug"
//! ```

use crate::error::{Error, Result};
use crate::logging::{parse_level, LogConfig};
use crate::segment::ExpansionPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub segment: SegmentConfig,

    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentConfig {
    /// Region size in bytes.
    #[serde(default = "default_segment_size")]
    pub size: usize,

    #[serde(default = "default_true")]
    pub expand_forward: bool,

    #[serde(default = "default_true")]
    pub expand_backward: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub file: Option<String>,

    #[serde(default)]
    pub json: bool,

    #[serde(default)]
    pub spans: bool,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            size: default_segment_size(),
            expand_forward: true,
            expand_backward: true,
        }
    }
}

impl SegmentConfig {
    pub fn policy(&self) -> ExpansionPolicy {
        ExpansionPolicy {
            forward: self.expand_forward,
            backward: self.expand_backward,
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_level(),
            file: None,
            json: false,
            spans: false,
        }
    }
}

impl LoggingSection {
    pub fn to_log_config(&self) -> Result<LogConfig> {
        let level = parse_level(&self.level)
            .ok_or_else(|| Error::Config(format!("unknown log level '{}'", self.level)))?;
        Ok(LogConfig {
            level,
            file_output: self.file.is_some(),
            log_path: self.file.clone(),
            json_format: self.json,
            show_spans: self.spans,
        })
    }
}

fn default_true() -> bool {
    true
}

fn default_segment_size() -> usize {
    1024 * 1024
}

fn default_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| Error::Config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.segment.size < crate::segment::SEGMENT_ALIGNMENT {
            return Err(Error::Config(format!(
                "segment size {} is smaller than one block",
                self.segment.size
            )));
        }
        self.logging.to_log_config().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.segment.policy(), ExpansionPolicy::default());
    }

    #[test]
    fn partial_segment_section() {
        let config = Config::from_toml_str(
            r#"
            [segment]
            size = 4096
            expand_backward = false
            "#,
        )
        .unwrap();
        assert_eq!(config.segment.size, 4096);
        assert_eq!(config.segment.policy(), ExpansionPolicy::FORWARD_ONLY);
    }

    #[test]
    fn rejects_unknown_level_and_tiny_segment() {
        assert!(Config::from_toml_str("[logging]\nlevel = \"chatty\"").is_err());
        assert!(Config::from_toml_str("[segment]\nsize = 8").is_err());
    }

    #[test]
    fn logging_section_maps_to_log_config() {
        let section = LoggingSection {
            level: "trace".into(),
            file: Some("out.log".into()),
            json: true,
            spans: false,
        };
        let log = section.to_log_config().unwrap();
        assert_eq!(log.level, tracing::Level::TRACE);
        assert!(log.file_output);
        assert!(log.json_format);
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[segment]\nsize = 65536\nexpand_forward = false").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.segment.size, 65536);
        assert!(!config.segment.expand_forward);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = Config::load(Path::new("/nonexistent/relocmem.toml")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
