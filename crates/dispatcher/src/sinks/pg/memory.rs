//! In-memory database used by tests and `--dry-run`
//!
//! Understands just enough SQL for the pg sink: `CREATE TABLE IF NOT EXISTS`
//! and `COPY <table> (...) FROM STDIN` with a text payload.

use std::collections::BTreeMap;
use std::future::{ready, Future};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::connector::{DbConnection, DbConnector};

/// One row of a memory table, fields as sent on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRow {
    pub tag: String,
    pub timestamp: String,
    pub data: String,
}

#[derive(Debug, Default)]
struct MemoryState {
    generation: u64,
    connects: usize,
    closes: usize,
    commits: usize,
    fail_connect: bool,
    fail_copy: bool,
    statements: Vec<String>,
    tables: BTreeMap<String, Vec<MemoryRow>>,
}

/// Connector whose connections share one in-memory database
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector whose database already contains `table`
    pub fn with_table(table: &str) -> Self {
        let connector = Self::new();
        connector.add_table(table);
        connector
    }

    /// Create `table` if it does not exist yet
    pub fn add_table(&self, table: &str) {
        self.lock().tables.entry(table.to_string()).or_default();
    }

    /// Make new connection attempts fail
    pub fn set_fail_connect(&self, fail: bool) {
        self.lock().fail_connect = fail;
    }

    /// Make COPY fail (nothing is committed)
    pub fn set_fail_copy(&self, fail: bool) {
        self.lock().fail_copy = fail;
    }

    /// Break every open connection; pings and copies on them fail from now on
    pub fn kill_connections(&self) {
        self.lock().generation += 1;
    }

    pub fn rows(&self, table: &str) -> Vec<MemoryRow> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.lock().tables.contains_key(table)
    }

    /// Successful connection attempts
    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    pub fn closes(&self) -> usize {
        self.lock().closes
    }

    /// Committed COPY transactions
    pub fn commits(&self) -> usize {
        self.lock().commits
    }

    /// Statements executed so far, in order
    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DbConnector for MemoryConnector {
    type Connection = MemoryConnection;

    fn connect(
        &self,
        _url: &str,
    ) -> impl Future<Output = Result<MemoryConnection, sqlx::Error>> + Send {
        let mut state = self.lock();
        let result = if state.fail_connect {
            Err(sqlx::Error::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            )))
        } else {
            state.connects += 1;
            Ok(MemoryConnection {
                state: Arc::clone(&self.state),
                generation: state.generation,
            })
        };
        ready(result)
    }
}

/// Connection handed out by `MemoryConnector`
#[derive(Debug)]
pub struct MemoryConnection {
    state: Arc<Mutex<MemoryState>>,
    generation: u64,
}

impl MemoryConnection {
    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_alive(&self, state: &MemoryState) -> Result<(), sqlx::Error> {
        if state.generation == self.generation {
            Ok(())
        } else {
            Err(sqlx::Error::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "connection closed by server",
            )))
        }
    }

    fn run_copy(&self, statement: &str, payload: &[u8]) -> Result<u64, sqlx::Error> {
        let mut state = self.lock();
        self.check_alive(&state)?;
        state.statements.push(statement.to_string());
        if state.fail_copy {
            return Err(sqlx::Error::Protocol("copy failed".to_string()));
        }

        let table = statement
            .split_whitespace()
            .nth(1)
            .ok_or_else(|| sqlx::Error::Protocol(format!("malformed COPY: {statement}")))?
            .to_string();
        let text = std::str::from_utf8(payload)
            .map_err(|e| sqlx::Error::Protocol(format!("invalid COPY payload: {e}")))?;

        let mut rows = Vec::new();
        for line in text.split('\n').filter(|line| !line.is_empty()) {
            let fields: Vec<String> = line.split('\t').map(unescape).collect();
            let [tag, timestamp, data] = <[String; 3]>::try_from(fields).map_err(|fields| {
                sqlx::Error::Protocol(format!("expected 3 columns, got {}", fields.len()))
            })?;
            rows.push(MemoryRow {
                tag,
                timestamp,
                data,
            });
        }

        let count = rows.len() as u64;
        state
            .tables
            .get_mut(&table)
            .ok_or_else(|| {
                sqlx::Error::Protocol(format!("relation \"{table}\" does not exist"))
            })?
            .extend(rows);
        state.commits += 1;
        Ok(count)
    }

    fn run_execute(&self, sql: &str) -> Result<(), sqlx::Error> {
        let mut state = self.lock();
        self.check_alive(&state)?;
        state.statements.push(sql.to_string());

        let words: Vec<&str> = sql.split_whitespace().collect();
        if let ["CREATE", "TABLE", "IF", "NOT", "EXISTS", name, ..] = words.as_slice() {
            let name = name.split('(').next().unwrap_or_default();
            state.tables.entry(name.to_string()).or_default();
        }
        Ok(())
    }
}

impl DbConnection for MemoryConnection {
    fn ping(&mut self) -> impl Future<Output = Result<(), sqlx::Error>> + Send {
        let state = self.lock();
        ready(self.check_alive(&state))
    }

    fn execute(&mut self, sql: &str) -> impl Future<Output = Result<(), sqlx::Error>> + Send {
        ready(self.run_execute(sql))
    }

    fn copy_in(
        &mut self,
        statement: &str,
        payload: &[u8],
    ) -> impl Future<Output = Result<u64, sqlx::Error>> + Send {
        ready(self.run_copy(statement, payload))
    }

    fn close(self) -> impl Future<Output = Result<(), sqlx::Error>> + Send {
        self.lock().closes += 1;
        ready(Ok::<(), sqlx::Error>(()))
    }
}

/// Undo COPY text-format escaping
fn unescape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
