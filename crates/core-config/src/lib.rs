//! Configuration loading and parsing.
//!
//! Parses `choreo.toml` (or an override path provided by the binary) into
//! the pipeline tunables: debounce window, retry cap, channel capacities,
//! default screen timeout, and the optional validation watchdog. Unknown
//! fields are ignored (TOML deserialization tolerance) so the file format
//! can evolve without immediate warnings; a missing or unparsable file falls
//! back to defaults rather than aborting startup.
//!
//! The raw parsed values are retained alongside the clamped effective
//! `PipelineConfig` so later re-application (or diagnostics) can see what
//! the file actually said.

use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::{info, warn};

/// Floor for the command broadcast buffer. Consumers are external and may
/// lag; anything below this starves them in bursts.
pub const MIN_COMMAND_BUFFER: usize = 64;

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineSection {
    #[serde(default = "PipelineSection::default_debounce_window_ms")]
    pub debounce_window_ms: u64,
    #[serde(default = "PipelineSection::default_max_intent_retries")]
    pub max_intent_retries: u32,
    #[serde(default = "PipelineSection::default_local_source_capacity")]
    pub local_source_capacity: usize,
}

impl PipelineSection {
    const fn default_debounce_window_ms() -> u64 {
        70
    }
    const fn default_max_intent_retries() -> u32 {
        3
    }
    const fn default_local_source_capacity() -> usize {
        16
    }
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            debounce_window_ms: Self::default_debounce_window_ms(),
            max_intent_retries: Self::default_max_intent_retries(),
            local_source_capacity: Self::default_local_source_capacity(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CommandsSection {
    #[serde(default = "CommandsSection::default_buffer_capacity")]
    pub buffer_capacity: usize,
}

impl CommandsSection {
    const fn default_buffer_capacity() -> usize {
        64
    }
}

impl Default for CommandsSection {
    fn default() -> Self {
        Self {
            buffer_capacity: Self::default_buffer_capacity(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutSection {
    #[serde(default = "TimeoutSection::default_screen_secs")]
    pub default_screen_secs: u64,
    /// Absent means no watchdog: a stalled validator blocks the pipeline,
    /// which preserves ordering at the cost of liveness.
    #[serde(default)]
    pub validation_watchdog_ms: Option<u64>,
}

impl TimeoutSection {
    const fn default_screen_secs() -> u64 {
        300
    }
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            default_screen_secs: Self::default_screen_secs(),
            validation_watchdog_ms: None,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ConfigFile {
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub commands: CommandsSection,
    #[serde(default)]
    pub timeout: TimeoutSection,
}

/// Effective runtime tunables after clamping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub debounce_window: Duration,
    pub max_intent_retries: u32,
    pub default_screen_timeout: Duration,
    pub command_buffer_capacity: usize,
    pub local_source_capacity: usize,
    pub validation_watchdog: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_file(&ConfigFile::default())
    }
}

impl PipelineConfig {
    /// Compute the effective config, clamping capacities into their floors
    /// with an audit log entry when a raw value was rejected.
    pub fn from_file(file: &ConfigFile) -> Self {
        let raw_buffer = file.commands.buffer_capacity;
        let command_buffer_capacity = raw_buffer.max(MIN_COMMAND_BUFFER);
        if command_buffer_capacity != raw_buffer {
            info!(
                target: "config",
                raw = raw_buffer,
                clamped = command_buffer_capacity,
                "command_buffer_capacity_clamped"
            );
        }

        let raw_local = file.pipeline.local_source_capacity;
        let local_source_capacity = raw_local.max(1);
        if local_source_capacity != raw_local {
            info!(
                target: "config",
                raw = raw_local,
                clamped = local_source_capacity,
                "local_source_capacity_clamped"
            );
        }

        Self {
            debounce_window: Duration::from_millis(file.pipeline.debounce_window_ms),
            max_intent_retries: file.pipeline.max_intent_retries,
            default_screen_timeout: Duration::from_secs(file.timeout.default_screen_secs),
            command_buffer_capacity,
            local_source_capacity,
            validation_watchdog: file
                .timeout
                .validation_watchdog_ms
                .map(Duration::from_millis),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub raw: Option<String>, // original file string (optional)
    pub file: ConfigFile,    // parsed (or default) data
    pub effective: PipelineConfig,
}

/// Best-effort config path following platform conventions: prefer a local
/// working-directory `choreo.toml` before the platform config dir.
pub fn discover() -> PathBuf {
    let local = PathBuf::from("choreo.toml");
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("choreo").join("choreo.toml");
    }
    // Final fallback relative filename.
    PathBuf::from("choreo.toml")
}

pub fn load_from(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(discover);
    if let Ok(content) = fs::read_to_string(&path) {
        match toml::from_str::<ConfigFile>(&content) {
            Ok(file) => {
                let effective = PipelineConfig::from_file(&file);
                Ok(Config {
                    raw: Some(content),
                    file,
                    effective,
                })
            }
            Err(e) => {
                // Fall back to defaults on parse error rather than refusing
                // to start; the warning carries the reason.
                warn!(target: "config", file = %path.display(), error = %e, "config_parse_failed");
                Ok(Config::default())
            }
        }
    } else {
        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex, MutexGuard};
    use tracing::Level;
    use tracing::subscriber::with_default;
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone)]
    struct BufferWriter {
        inner: Arc<Mutex<Vec<u8>>>,
    }

    impl BufferWriter {
        fn new() -> (Self, Arc<Mutex<Vec<u8>>>) {
            let buf = Arc::new(Mutex::new(Vec::new()));
            (Self { inner: buf.clone() }, buf)
        }
    }

    struct LockedWriter<'a> {
        guard: MutexGuard<'a, Vec<u8>>,
    }

    impl<'a> Write for LockedWriter<'a> {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.guard.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for BufferWriter {
        type Writer = LockedWriter<'a>;

        fn make_writer(&'a self) -> Self::Writer {
            LockedWriter {
                guard: self.inner.lock().expect("log buffer poisoned"),
            }
        }
    }

    #[test]
    fn default_config_when_missing_file() {
        let cfg = load_from(Some(PathBuf::from("__nonexistent_hopefully__.toml"))).unwrap();
        assert_eq!(cfg.effective, PipelineConfig::default());
        assert_eq!(cfg.effective.debounce_window, Duration::from_millis(70));
        assert_eq!(cfg.effective.max_intent_retries, 3);
        assert_eq!(cfg.effective.command_buffer_capacity, 64);
        assert_eq!(cfg.effective.local_source_capacity, 16);
        assert_eq!(
            cfg.effective.default_screen_timeout,
            Duration::from_secs(300)
        );
        assert!(cfg.effective.validation_watchdog.is_none());
    }

    #[test]
    fn parses_pipeline_values() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            tmp.path(),
            "[pipeline]\ndebounce_window_ms = 120\nmax_intent_retries = 5\n",
        )
        .unwrap();
        let cfg = load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(cfg.effective.debounce_window, Duration::from_millis(120));
        assert_eq!(cfg.effective.max_intent_retries, 5);
        // Untouched sections keep defaults.
        assert_eq!(cfg.effective.command_buffer_capacity, 64);
    }

    #[test]
    fn clamps_command_buffer_below_floor() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "[commands]\nbuffer_capacity = 8\n").unwrap();
        let cfg = load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(cfg.effective.command_buffer_capacity, MIN_COMMAND_BUFFER);
        assert_eq!(cfg.file.commands.buffer_capacity, 8, "raw value retained");
    }

    #[test]
    fn clamps_local_source_capacity_to_one() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "[pipeline]\nlocal_source_capacity = 0\n").unwrap();
        let cfg = load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(cfg.effective.local_source_capacity, 1);
    }

    #[test]
    fn clamp_logging_uses_config_target() {
        let (writer, buffer) = BufferWriter::new();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(Level::INFO)
            .with_target(true)
            .with_ansi(false)
            .without_time()
            .with_writer(writer)
            .finish();

        let file = ConfigFile {
            pipeline: PipelineSection {
                local_source_capacity: 0,
                ..PipelineSection::default()
            },
            commands: CommandsSection { buffer_capacity: 8 },
            ..ConfigFile::default()
        };
        let effective = with_default(subscriber, || PipelineConfig::from_file(&file));

        assert_eq!(effective.command_buffer_capacity, MIN_COMMAND_BUFFER);
        assert_eq!(effective.local_source_capacity, 1);
        let log_output = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(log_output.contains("INFO config:"));
        assert!(log_output.contains("command_buffer_capacity_clamped"));
        assert!(log_output.contains("local_source_capacity_clamped"));
    }

    #[test]
    fn parses_watchdog_and_screen_timeout() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            tmp.path(),
            "[timeout]\ndefault_screen_secs = 120\nvalidation_watchdog_ms = 1500\n",
        )
        .unwrap();
        let cfg = load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(
            cfg.effective.default_screen_timeout,
            Duration::from_secs(120)
        );
        assert_eq!(
            cfg.effective.validation_watchdog,
            Some(Duration::from_millis(1500))
        );
    }

    #[test]
    fn parse_error_falls_back_to_defaults() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "pipeline = \"not a table\"\n").unwrap();
        let cfg = load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(cfg.effective, PipelineConfig::default());
        assert!(cfg.raw.is_none());
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            tmp.path(),
            "[pipeline]\ndebounce_window_ms = 90\nfuture_knob = true\n",
        )
        .unwrap();
        let cfg = load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(cfg.effective.debounce_window, Duration::from_millis(90));
    }
}
