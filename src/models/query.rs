//! Execution request and outcome models.
//!
//! An [`ExecRequest`] describes one unit of work for the executor: an optional
//! read query, optional writes, and whether to wrap everything in a
//! transaction.

use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

/// A dictionary-shaped result row: column name to value.
pub type Row = serde_json::Map<String, JsonValue>;

/// A parameter value for parameterized queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// How many rows a read query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    /// First row only (or none).
    #[default]
    One,
    /// Every row.
    All,
}

impl FromStr for FetchMode {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "one" => Ok(Self::One),
            "all" => Ok(Self::All),
            other => Err(DbError::invalid_argument(format!(
                "Invalid fetch method '{}', use 'one' or 'all'",
                other
            ))),
        }
    }
}

impl fmt::Display for FetchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::One => write!(f, "one"),
            Self::All => write!(f, "all"),
        }
    }
}

/// One SQL statement with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<QueryParam>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<QueryParam>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Add a parameter.
    pub fn with_param(mut self, param: impl Into<QueryParam>) -> Self {
        self.params.push(param.into());
        self
    }

    /// True for row-locking reads, which need autocommit disabled.
    pub fn is_locking_read(&self) -> bool {
        self.sql.to_ascii_uppercase().contains("FOR UPDATE")
    }
}

/// Write statements of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Writes {
    /// Executed one by one in listed order; the outcome is the affected-row
    /// count of the last statement.
    Sequential(Vec<Statement>),
    /// One statement executed once per parameter set; the outcome is the
    /// total affected-row count.
    Batch {
        sql: String,
        param_sets: Vec<Vec<QueryParam>>,
    },
}

impl Writes {
    /// True when there is nothing to execute.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Sequential(statements) => statements.is_empty(),
            Self::Batch { param_sets, .. } => param_sets.is_empty(),
        }
    }
}

/// One unit of work for the executor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecRequest {
    /// Label of the calling context, used in logs.
    pub caller: String,
    #[serde(default)]
    pub select: Option<Statement>,
    #[serde(default)]
    pub fetch: FetchMode,
    #[serde(default)]
    pub writes: Option<Writes>,
    /// Wrap everything in START TRANSACTION / COMMIT.
    #[serde(default)]
    pub lock: bool,
}

impl ExecRequest {
    pub fn new(caller: impl Into<String>) -> Self {
        Self {
            caller: caller.into(),
            ..Default::default()
        }
    }

    pub fn select(mut self, statement: Statement) -> Self {
        self.select = Some(statement);
        self
    }

    pub fn fetch(mut self, fetch: FetchMode) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn sequential(mut self, statements: Vec<Statement>) -> Self {
        self.writes = Some(Writes::Sequential(statements));
        self
    }

    pub fn batch(mut self, sql: impl Into<String>, param_sets: Vec<Vec<QueryParam>>) -> Self {
        self.writes = Some(Writes::Batch {
            sql: sql.into(),
            param_sets,
        });
        self
    }

    pub fn lock(mut self, lock: bool) -> Self {
        self.lock = lock;
        self
    }

    /// Reject requests that cannot be sent to the server.
    pub fn validate(&self) -> DbResult<()> {
        if let Some(select) = &self.select {
            ensure_sql("select query", &select.sql)?;
        }
        match &self.writes {
            Some(Writes::Sequential(statements)) => {
                for (idx, statement) in statements.iter().enumerate() {
                    ensure_sql(&format!("write statement #{}", idx + 1), &statement.sql)?;
                }
            }
            Some(Writes::Batch { sql, .. }) => ensure_sql("batch statement", sql)?,
            None => {}
        }
        Ok(())
    }
}

fn ensure_sql(what: &str, sql: &str) -> DbResult<()> {
    if sql.trim().is_empty() {
        return Err(DbError::invalid_argument(format!("{} is empty", what)));
    }
    Ok(())
}

/// Result of a successful execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum QueryOutcome {
    /// Neither a read nor any write was executed.
    Empty,
    /// `FetchMode::One` read.
    Row(Option<Row>),
    /// `FetchMode::All` read.
    Rows(Vec<Row>),
    /// Affected rows reported by the writes.
    RowsAffected(u64),
}

impl QueryOutcome {
    pub fn rows_affected(&self) -> Option<u64> {
        match self {
            Self::RowsAffected(n) => Some(*n),
            _ => None,
        }
    }

    pub fn row(&self) -> Option<&Row> {
        match self {
            Self::Row(row) => row.as_ref(),
            _ => None,
        }
    }

    pub fn rows(&self) -> &[Row] {
        match self {
            Self::Rows(rows) => rows,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_params_from_json() {
        let params: Vec<QueryParam> = serde_json::from_str(r#"[1, "a", null, true, 2.5]"#).unwrap();
        assert_eq!(
            params,
            vec![
                QueryParam::Int(1),
                QueryParam::String("a".to_string()),
                QueryParam::Null,
                QueryParam::Bool(true),
                QueryParam::Float(2.5),
            ]
        );
    }

    #[test]
    fn test_fetch_mode_parse() {
        assert_eq!("one".parse::<FetchMode>().unwrap(), FetchMode::One);
        assert_eq!("all".parse::<FetchMode>().unwrap(), FetchMode::All);
        let err = "many".parse::<FetchMode>().unwrap_err();
        assert!(matches!(err, DbError::InvalidArgument { .. }));
        assert!(err.to_string().contains("'one' or 'all'"));
    }

    #[test]
    fn test_locking_read_detection_is_case_insensitive() {
        assert!(Statement::new("SELECT * FROM t WHERE id = 1 FOR UPDATE").is_locking_read());
        assert!(Statement::new("select * from t for update").is_locking_read());
        assert!(!Statement::new("SELECT * FROM t").is_locking_read());
    }

    #[test]
    fn test_writes_is_empty() {
        assert!(Writes::Sequential(vec![]).is_empty());
        assert!(
            Writes::Batch {
                sql: "INSERT INTO t VALUES (?)".to_string(),
                param_sets: vec![]
            }
            .is_empty()
        );
        assert!(!Writes::Sequential(vec![Statement::new("DELETE FROM t")]).is_empty());
    }

    #[test]
    fn test_validate_rejects_blank_sql() {
        let req = ExecRequest::new("test").select(Statement::new("   "));
        assert!(matches!(
            req.validate(),
            Err(DbError::InvalidArgument { .. })
        ));

        let req = ExecRequest::new("test")
            .sequential(vec![Statement::new("UPDATE t SET a = 1"), Statement::new("")]);
        let err = req.validate().unwrap_err();
        assert!(err.to_string().contains("#2"));

        let req = ExecRequest::new("test").select(Statement::new("SELECT 1"));
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_outcome_accessors() {
        assert_eq!(QueryOutcome::RowsAffected(3).rows_affected(), Some(3));
        assert_eq!(QueryOutcome::Empty.rows_affected(), None);
        assert!(QueryOutcome::Row(None).row().is_none());
        assert!(QueryOutcome::Empty.rows().is_empty());
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(QueryOutcome::RowsAffected(2)).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "rows_affected", "value": 2 }));
    }
}
