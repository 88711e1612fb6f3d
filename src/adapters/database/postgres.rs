//! PostgreSQL Connector - sqlx Wire Client
//!
//! Opens one connection per collection and decodes every cell by its
//! reported column type into a `SqlValue`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::{Column, Connection, Row, TypeInfo};
use tracing::{debug, instrument};

use crate::domain::error::CollectError;
use crate::ports::sources::{QueryResult, SqlConnector, SqlSession, SqlValue};

/// Connector over configured `postgres://` service URLs.
pub struct PgConnector {
    /// Service name → connection URL.
    urls: HashMap<String, String>,
    /// Connect timeout.
    connect_timeout: Duration,
}

impl PgConnector {
    /// Create a connector for `urls`.
    pub fn new(urls: HashMap<String, String>, connect_timeout: Duration) -> Self {
        Self {
            urls,
            connect_timeout,
        }
    }
}

#[async_trait]
impl SqlConnector for PgConnector {
    #[instrument(skip(self))]
    async fn connect(&self, service: &str) -> Result<Box<dyn SqlSession>, CollectError> {
        let connection_error = |message: String| CollectError::SourceConnection {
            service: service.to_string(),
            message,
        };

        let url = self
            .urls
            .get(service)
            .ok_or_else(|| connection_error("service is not configured".to_string()))?;

        let conn = tokio::time::timeout(self.connect_timeout, PgConnection::connect(url))
            .await
            .map_err(|_| connection_error(format!("connect timed out after {:?}", self.connect_timeout)))?
            .map_err(|e| connection_error(e.to_string()))?;

        debug!(service, "Database session opened");
        Ok(Box::new(PgSession {
            service: service.to_string(),
            conn,
        }))
    }
}

/// A single PostgreSQL connection, closed when dropped.
struct PgSession {
    service: String,
    conn: PgConnection,
}

#[async_trait]
impl SqlSession for PgSession {
    async fn query(&mut self, statement: &str) -> Result<QueryResult, CollectError> {
        let rows = sqlx::query(statement)
            .fetch_all(&mut self.conn)
            .await
            .map_err(|e| match e {
                sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut => {
                    CollectError::SourceConnection {
                        service: self.service.clone(),
                        message: e.to_string(),
                    }
                }
                other => CollectError::Query {
                    service: self.service.clone(),
                    message: other.to_string(),
                },
            })?;

        let columns = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();
        let rows = rows.iter().map(decode_row).collect();

        Ok(QueryResult { columns, rows })
    }
}

fn decode_row(row: &PgRow) -> Vec<SqlValue> {
    row.columns()
        .iter()
        .map(|column| decode_cell(row, column.ordinal(), column.type_info().name()))
        .collect()
}

/// Decode one cell. Types without a dedicated mapping are read as text
/// when possible and as NULL otherwise.
fn decode_cell(row: &PgRow, idx: usize, type_name: &str) -> SqlValue {
    fn get<'r, T>(row: &'r PgRow, idx: usize) -> Option<T>
    where
        T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
    {
        row.try_get::<Option<T>, _>(idx).ok().flatten()
    }

    let value = match type_name {
        "BOOL" => get::<bool>(row, idx).map(SqlValue::Bool),
        "INT2" => get::<i16>(row, idx).map(|v| SqlValue::Int(v.into())),
        "INT4" => get::<i32>(row, idx).map(|v| SqlValue::Int(v.into())),
        "INT8" => get::<i64>(row, idx).map(SqlValue::Int),
        "FLOAT4" => get::<f32>(row, idx).map(|v| SqlValue::Float(v.into())),
        "FLOAT8" => get::<f64>(row, idx).map(SqlValue::Float),
        "NUMERIC" => get::<Decimal>(row, idx)
            .and_then(|d| d.to_f64())
            .map(SqlValue::Float),
        "TIMESTAMP" => get::<chrono::NaiveDateTime>(row, idx).map(SqlValue::Timestamp),
        "TIMESTAMPTZ" => get::<chrono::DateTime<chrono::Utc>>(row, idx)
            .map(|ts| SqlValue::TimestampTz(ts.fixed_offset())),
        "DATE" => get::<chrono::NaiveDate>(row, idx)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(SqlValue::Timestamp),
        _ => get::<String>(row, idx).map(SqlValue::Text),
    };

    value.unwrap_or(SqlValue::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_service_rejected() {
        let connector = PgConnector::new(HashMap::new(), Duration::from_secs(1));
        let err = connector.connect("warehouse").await.err().unwrap();
        assert!(matches!(err, CollectError::SourceConnection { .. }));
    }

    #[tokio::test]
    async fn test_invalid_url_is_connection_error() {
        let mut urls = HashMap::new();
        urls.insert("warehouse".to_string(), "not-a-url".to_string());
        let connector = PgConnector::new(urls, Duration::from_secs(1));
        let err = connector.connect("warehouse").await.err().unwrap();
        assert!(err.to_string().contains("warehouse"));
    }
}
