//! Database connection seam
//!
//! `PgSink` only talks to these traits. `PgConnector` is the sqlx-backed
//! implementation; `MemoryConnector` stands in for tests and dry runs.

use std::future::Future;

use sqlx::{Connection, PgConnection};

/// Opens connections for a sink
pub trait DbConnector: Send + Sync + 'static {
    type Connection: DbConnection;

    /// Connect to `url`
    fn connect(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<Self::Connection, sqlx::Error>> + Send;
}

/// One open database connection
pub trait DbConnection: Send + 'static {
    /// Liveness check
    fn ping(&mut self) -> impl Future<Output = Result<(), sqlx::Error>> + Send;

    /// Run a statement without result rows (DDL)
    fn execute(&mut self, sql: &str) -> impl Future<Output = Result<(), sqlx::Error>> + Send;

    /// Run `statement` (a `COPY ... FROM STDIN`) with `payload` in text
    /// format inside one transaction and commit it
    ///
    /// Returns the number of rows copied. On error nothing is committed.
    fn copy_in(
        &mut self,
        statement: &str,
        payload: &[u8],
    ) -> impl Future<Output = Result<u64, sqlx::Error>> + Send;

    /// Close the connection gracefully
    fn close(self) -> impl Future<Output = Result<(), sqlx::Error>> + Send;
}

/// PostgreSQL connector backed by sqlx
#[derive(Debug, Clone, Copy, Default)]
pub struct PgConnector;

impl DbConnector for PgConnector {
    type Connection = PgConnection;

    async fn connect(&self, url: &str) -> Result<PgConnection, sqlx::Error> {
        PgConnection::connect(url).await
    }
}

impl DbConnection for PgConnection {
    async fn ping(&mut self) -> Result<(), sqlx::Error> {
        Connection::ping(self).await
    }

    async fn execute(&mut self, sql: &str) -> Result<(), sqlx::Error> {
        sqlx::Executor::execute(&mut *self, sqlx::raw_sql(sql)).await?;
        Ok(())
    }

    async fn copy_in(&mut self, statement: &str, payload: &[u8]) -> Result<u64, sqlx::Error> {
        // Dropping the transaction on any error below rolls it back
        let mut tx = Connection::begin(self).await?;
        let mut copy = tx.copy_in_raw(statement).await?;
        copy.send(payload).await?;
        let rows = copy.finish().await?;
        tx.commit().await?;
        Ok(rows)
    }

    async fn close(self) -> Result<(), sqlx::Error> {
        Connection::close(self).await
    }
}
