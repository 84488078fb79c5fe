//! Process configuration, loaded from a `key=value` properties file.
//!
//! Structured like a nested settings object (matching how the rest of this
//! codebase shapes config), but parsed from the flat properties format the
//! protocol's persistent-state layout specifies rather than TOML.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

const DEFAULT_CHUNK_SIZE: u64 = 524_288;
const DEFAULT_SEND_INTERVAL_MS: u64 = 2_000;
const DEFAULT_RECEIVE_INTERVAL_MS: u64 = 1_000;

const CHUNK_SIZE_RANGE: std::ops::RangeInclusive<u64> = 1_024..=10_485_760;
const SEND_INTERVAL_RANGE: std::ops::RangeInclusive<u64> = 100..=60_000;
const RECEIVE_INTERVAL_RANGE: std::ops::RangeInclusive<u64> = 100..=10_000;

/// Top-level process configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub chunk: ChunkConfig,
    pub send: SendConfig,
    pub receive: ReceiveConfig,
    pub log: LogConfig,
    pub download: DownloadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkConfig {
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SendConfig {
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReceiveConfig {
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogConfig {
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloadConfig {
    pub path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk: ChunkConfig {
                size: DEFAULT_CHUNK_SIZE,
            },
            send: SendConfig {
                interval_ms: DEFAULT_SEND_INTERVAL_MS,
            },
            receive: ReceiveConfig {
                interval_ms: DEFAULT_RECEIVE_INTERVAL_MS,
            },
            log: LogConfig {
                level: "INFO".into(),
            },
            download: DownloadConfig {
                path: default_download_path(),
            },
        }
    }
}

fn default_download_path() -> PathBuf {
    dirs_home().join("Downloads")
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

impl Config {
    /// Loads configuration from a `key=value` properties file, falling back
    /// to defaults (with a warning) for a missing file or any invalid value.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    fn parse(contents: &str) -> Self {
        let mut cfg = Self::default();

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();

            match key {
                "chunk.size" => cfg.chunk.size = parse_ranged(key, value, CHUNK_SIZE_RANGE, DEFAULT_CHUNK_SIZE),
                "send.interval" => {
                    cfg.send.interval_ms =
                        parse_ranged(key, value, SEND_INTERVAL_RANGE, DEFAULT_SEND_INTERVAL_MS)
                }
                "receive.interval" => {
                    cfg.receive.interval_ms = parse_ranged(
                        key,
                        value,
                        RECEIVE_INTERVAL_RANGE,
                        DEFAULT_RECEIVE_INTERVAL_MS,
                    )
                }
                "log.level" => cfg.log.level = value.to_string(),
                "download.path" => cfg.download.path = PathBuf::from(value),
                _ => warn!("unknown config key {key:?}, ignoring"),
            }
        }

        cfg
    }

    /// Writes the default configuration to `path` (for bootstrapping a fresh
    /// `$HOME/.cliptransfer/` layout).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let cfg = Self::default();
        let text = format!(
            "chunk.size={}\nsend.interval={}\nreceive.interval={}\nlog.level={}\ndownload.path={}\n",
            cfg.chunk.size,
            cfg.send.interval_ms,
            cfg.receive.interval_ms,
            cfg.log.level,
            cfg.download.path.display(),
        );
        std::fs::write(path, text)
    }
}

fn parse_ranged(key: &str, value: &str, range: std::ops::RangeInclusive<u64>, default: u64) -> u64 {
    match value.parse::<u64>() {
        Ok(n) if range.contains(&n) => n,
        Ok(n) => {
            warn!("config {key}={n} out of range {range:?}; using default {default}");
            default
        }
        Err(_) => {
            warn!("config {key}={value:?} is not a number; using default {default}");
            default
        }
    }
}
