//! Sink implementations
//!
//! Contains FileSink and PgSink plus the record formatting they share.

mod file;
mod format;
mod pg;

pub use self::file::{Compression, FileSink, FileSinkConfig, FileSinkFactory};
pub use self::format::{TimeZoneSpec, TimestampFormat};
pub use self::pg::{
    DbConnection, DbConnector, MemoryConnection, MemoryConnector, MemoryRow, PgConnector, PgSink,
    PgSinkConfig, PgSinkFactory,
};
