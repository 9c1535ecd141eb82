//! FileSink - appends records to a local file, one tab-separated line each
//!
//! Line layout: `<timestamp>\t<tag>\t<json>\n`. With `compress = gzip` the
//! same lines go through a gzip stream that is sync-flushed after every batch.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use flate2::write::GzEncoder;
use tracing::{debug, info, instrument, warn};

use contracts::{Batch, ContractError, DataSink, SinkConfig};
use observability::{MetricKind, Scorekeeper};

use super::format::{write_json, TimeZoneSpec, TimestampFormat};
use crate::error::DispatcherError;
use crate::handle::SinkHandle;
use crate::registry::OutputFactory;

const DEFAULT_PERMISSION: u32 = 0o666;

/// Output compression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Gzip,
}

impl Compression {
    fn parse(value: &str) -> Result<Self, String> {
        match value.to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "gz" | "gzip" => Ok(Self::Gzip),
            other => Err(format!("unknown compression format: {other}")),
        }
    }
}

/// Configuration for FileSink
#[derive(Debug, Clone)]
pub struct FileSinkConfig {
    /// Output file, opened for append
    pub path: PathBuf,
    /// strftime pattern; RFC 3339 when `None`
    pub time_format: Option<String>,
    pub timezone: TimeZoneSpec,
    pub compression: Compression,
    /// Symlink pointing at `path`
    pub symlink_path: Option<PathBuf>,
    /// Mode bits used when the file is created
    pub permission: u32,
}

impl FileSinkConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            time_format: None,
            timezone: TimeZoneSpec::Utc,
            compression: Compression::None,
            symlink_path: None,
            permission: DEFAULT_PERMISSION,
        }
    }

    /// Create config from attribute map
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, String> {
        let path = params
            .get("path")
            .filter(|p| !p.is_empty())
            .ok_or_else(|| "missing required attribute 'path'".to_string())?;

        let mut config = Self::new(path);
        config.time_format = params.get("time_format").filter(|f| !f.is_empty()).cloned();
        if let Some(tz) = params.get("timezone") {
            config.timezone = TimeZoneSpec::parse(tz)?;
        }
        if let Some(compress) = params.get("compress") {
            config.compression = Compression::parse(compress)?;
        }
        config.symlink_path = params
            .get("symlink_path")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);
        if let Some(permission) = params.get("permission") {
            config.permission = parse_permission(permission)?;
        }

        Ok(config)
    }
}

/// Parse octal mode bits (`644`, `0644`, `0o644`)
fn parse_permission(value: &str) -> Result<u32, String> {
    let digits = value.trim();
    let digits = digits.strip_prefix("0o").unwrap_or(digits);
    u32::from_str_radix(digits, 8)
        .ok()
        .filter(|mode| *mode <= 0o7777)
        .ok_or_else(|| format!("invalid permission '{value}', expected octal mode bits"))
}

enum LineWriter {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl LineWriter {
    fn new(file: File, compression: Compression) -> Self {
        let buffered = BufWriter::new(file);
        match compression {
            Compression::None => Self::Plain(buffered),
            Compression::Gzip => {
                Self::Gzip(GzEncoder::new(buffered, flate2::Compression::default()))
            }
        }
    }

    /// Finish the gzip stream, then flush and sync the file
    ///
    /// Every step is attempted; the first error wins.
    fn finish(self) -> io::Result<()> {
        match self {
            Self::Plain(mut buffered) => sync(&mut buffered),
            Self::Gzip(mut encoder) => {
                let finished = encoder.try_finish();
                let synced = sync(encoder.get_mut());
                finished.and(synced)
            }
        }
    }
}

fn sync(buffered: &mut BufWriter<File>) -> io::Result<()> {
    let flushed = buffered.flush();
    let synced = buffered.get_ref().sync_all();
    flushed.and(synced)
}

impl Write for LineWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(w) => w.write(buf),
            Self::Gzip(w) => w.write(buf),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            Self::Plain(w) => w.write_all(buf),
            Self::Gzip(w) => w.write_all(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(w) => w.flush(),
            Self::Gzip(w) => w.flush(),
        }
    }
}

/// Sink that appends tab-separated lines to a file
pub struct FileSink {
    name: String,
    path: PathBuf,
    timestamps: TimestampFormat,
    writer: Option<LineWriter>,
    line: Vec<u8>,
}

impl FileSink {
    /// Open `config.path` for append and create the symlink, if any
    ///
    /// A failing symlink is logged and ignored.
    pub fn new(name: impl Into<String>, config: FileSinkConfig) -> Result<Self, ContractError> {
        let name = name.into();
        let timestamps = TimestampFormat::new(config.time_format.as_deref(), config.timezone)
            .map_err(|e| ContractError::config_validation("time_format", e))?;

        let file = open_append(&config.path, config.permission).map_err(|e| {
            ContractError::sink_connection(
                &name,
                format!("failed to open {}: {e}", config.path.display()),
            )
        })?;

        if let Some(link) = &config.symlink_path {
            match replace_symlink(&config.path, link) {
                Ok(()) => debug!(sink = %name, link = %link.display(), "Symlink created"),
                Err(e) => warn!(
                    sink = %name,
                    link = %link.display(),
                    error = %e,
                    "Failed to create symbolic link"
                ),
            }
        }

        info!(
            sink = %name,
            path = %config.path.display(),
            compression = ?config.compression,
            "FileSink opened"
        );

        Ok(Self {
            name,
            path: config.path,
            timestamps,
            writer: Some(LineWriter::new(file, config.compression)),
            line: Vec::with_capacity(256),
        })
    }

    /// Create from params map (for factory)
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> Result<Self, ContractError> {
        let config = FileSinkConfig::from_params(params)
            .map_err(|e| ContractError::config_validation("attrs", e))?;
        Self::new(name, config)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_batch(&mut self, batch: &Batch) -> Result<usize, ContractError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| ContractError::sink_write(&self.name, "file already closed"))?;

        let mut bytes = 0;
        for set in batch.iter() {
            for record in &set.records {
                self.line.clear();
                self.timestamps
                    .write_to(&mut self.line, record.timestamp)
                    .map_err(|e| ContractError::encode(&self.name, &set.tag, e.to_string()))?;
                self.line.push(b'\t');
                self.line.extend_from_slice(set.tag.as_bytes());
                self.line.push(b'\t');
                write_json(&mut self.line, &self.name, &set.tag, &record.data)?;
                self.line.push(b'\n');

                writer
                    .write_all(&self.line)
                    .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))?;
                bytes += self.line.len();
            }
        }

        writer
            .flush()
            .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))?;
        Ok(bytes)
    }
}

impl DataSink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "file_sink_write",
        skip(self, batch),
        fields(sink = %self.name, records = batch.record_count())
    )]
    async fn write(&mut self, batch: &Batch) -> Result<(), ContractError> {
        let bytes = self.write_batch(batch)?;
        observability::record_bytes_written(&self.name, bytes);
        Ok(())
    }

    #[instrument(name = "file_sink_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), ContractError> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    #[instrument(name = "file_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        if let Some(writer) = self.writer.take() {
            writer
                .finish()
                .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))?;
            debug!(sink = %self.name, "FileSink closed");
        }
        Ok(())
    }

    async fn idle(&mut self) -> Result<(), ContractError> {
        Ok(())
    }
}

fn open_append(path: &Path, permission: u32) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(permission);
    }
    #[cfg(not(unix))]
    let _ = permission;
    options.open(path)
}

#[cfg(unix)]
fn replace_symlink(target: &Path, link: &Path) -> io::Result<()> {
    let target = target.canonicalize()?;
    match std::fs::symlink_metadata(link) {
        Ok(meta) if meta.file_type().is_symlink() => std::fs::remove_file(link)?,
        Ok(_) => {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "path exists and is not a symlink",
            ))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn replace_symlink(_target: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlinks are only supported on unix",
    ))
}

/// Factory for `sink_type = "file"`
pub struct FileSinkFactory;

#[async_trait]
impl OutputFactory for FileSinkFactory {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn create(&self, config: &SinkConfig) -> Result<SinkHandle, DispatcherError> {
        let sink = FileSink::from_params(&config.name, &config.attrs)
            .map_err(|e| DispatcherError::sink_creation(&config.name, e.to_string()))?;
        Ok(SinkHandle::spawn_for(sink, config))
    }

    fn bind_scorekeeper(&self, keeper: &Scorekeeper) {
        keeper.register(
            MetricKind::Counter,
            "logport_file_bytes_written_total",
            "Bytes written by file sinks before compression",
        );
    }
}
