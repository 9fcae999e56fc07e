//! Log filter resolution and the rolling file sink.
//!
//! ffmpeg's own stderr is relayed under [`FFMPEG_DECODE_TARGET`] and
//! [`FFMPEG_ENCODE_TARGET`]; per-stage timing lands under
//! [`STAGE_SUMMARY_TARGET`]. Unless the user names a filter, ffmpeg chatter is
//! kept off the console but recorded in the log file, and stage summaries
//! always reach the file.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};

pub const DEFAULT_LOG_FILTER: &str = "info";
pub const FFMPEG_DECODE_TARGET: &str = "blurline::ffmpeg::decode";
pub const FFMPEG_ENCODE_TARGET: &str = "blurline::ffmpeg::encode";
pub const STAGE_SUMMARY_TARGET: &str = "blurline::stage";

const FFMPEG_TARGETS: [&str; 2] = [FFMPEG_DECODE_TARGET, FFMPEG_ENCODE_TARGET];
const LOG_DIR_NAME: &str = "logs";
const LOG_FILE_PREFIX: &str = "blurline";
const LOG_FILE_SUFFIX: &str = "log";
const DEFAULT_RETENTION_FILES: usize = 14;

/// Where the effective log filter came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterSource {
    /// `--log-filter`.
    Cli,
    /// `-v` / `-vv`.
    Verbose,
    /// `RUST_LOG`.
    Env,
    Default,
}

impl FilterSource {
    /// Filters the user spelled out are applied to both sinks untouched.
    fn is_explicit(self) -> bool {
        matches!(self, FilterSource::Cli | FilterSource::Verbose)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilters {
    pub source: FilterSource,
    pub console: String,
    pub file: String,
}

#[derive(Debug)]
pub struct FileSink {
    pub dir: PathBuf,
    pub appender: RollingFileAppender,
}

#[derive(Debug, Error)]
pub enum FileSinkError {
    #[error("no data directory configured")]
    NoDataDir,
    #[error("cannot create log directory {}", dir.display())]
    CreateDir {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot open rolling log file in {}", dir.display())]
    Appender {
        dir: PathBuf,
        #[source]
        source: InitError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub data_dir: Option<PathBuf>,
    pub verbose: u8,
    pub cli_filter: Option<String>,
    pub env_filter: Option<String>,
    /// Daily files kept; 0 means the default.
    pub retention_files: usize,
}

impl LogSettings {
    /// Settings for a CLI run, reading `RUST_LOG` from the environment.
    pub fn from_env(data_dir: Option<&Path>, verbose: u8, cli_filter: Option<&str>) -> Self {
        Self {
            data_dir: data_dir.map(Path::to_path_buf),
            verbose,
            cli_filter: cli_filter.map(str::to_string),
            env_filter: std::env::var("RUST_LOG")
                .ok()
                .filter(|filter| !filter.trim().is_empty()),
            retention_files: DEFAULT_RETENTION_FILES,
        }
    }

    /// Resolves the console and file filters.
    ///
    /// Priority: `--log-filter`, then `-v`/`-vv`, then `RUST_LOG`, then
    /// [`DEFAULT_LOG_FILTER`].
    pub fn filters(&self) -> LogFilters {
        let (source, base) = self.base_filter();
        if source.is_explicit() {
            return LogFilters {
                source,
                console: base.clone(),
                file: base,
            };
        }

        let console = with_directives(FFMPEG_TARGETS.map(|target| format!("{target}=warn")), &base);
        let mut file_directives: Vec<String> = FFMPEG_TARGETS
            .iter()
            .map(|target| format!("{target}=debug"))
            .collect();
        file_directives.push(format!("{STAGE_SUMMARY_TARGET}=info"));
        let file = with_directives(file_directives, &base);

        LogFilters {
            source,
            console,
            file,
        }
    }

    fn base_filter(&self) -> (FilterSource, String) {
        if let Some(filter) = self.cli_filter.as_deref() {
            (FilterSource::Cli, filter.to_string())
        } else if self.verbose >= 2 {
            (FilterSource::Verbose, "trace".to_string())
        } else if self.verbose == 1 {
            (FilterSource::Verbose, "debug".to_string())
        } else if let Some(filter) = self.env_filter.as_deref() {
            (FilterSource::Env, filter.to_string())
        } else {
            (FilterSource::Default, DEFAULT_LOG_FILTER.to_string())
        }
    }

    /// Opens daily-rotated `blurline.*.log` files under `<data_dir>/logs`.
    pub fn open_file_sink(&self) -> Result<FileSink, FileSinkError> {
        let data_dir = self.data_dir.as_deref().ok_or(FileSinkError::NoDataDir)?;
        let dir = data_dir.join(LOG_DIR_NAME);
        if let Err(source) = fs::create_dir_all(&dir) {
            return Err(FileSinkError::CreateDir { dir, source });
        }

        let retention = match self.retention_files {
            0 => DEFAULT_RETENTION_FILES,
            n => n,
        };
        let built = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(LOG_FILE_PREFIX)
            .filename_suffix(LOG_FILE_SUFFIX)
            .max_log_files(retention)
            .build(&dir);
        match built {
            Ok(appender) => Ok(FileSink { dir, appender }),
            Err(source) => Err(FileSinkError::Appender { dir, source }),
        }
    }
}

/// Target directives go first; the user's filter still sets the global level.
fn with_directives(directives: impl IntoIterator<Item = String>, base: &str) -> String {
    let mut parts: Vec<String> = directives.into_iter().collect();
    parts.push(base.to_string());
    parts.join(",")
}
