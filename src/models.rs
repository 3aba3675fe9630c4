use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A registered user account
///
/// Users are immutable once created; `password_hash` holds the PBKDF2
/// `base64(salt):base64(hash)` string and never leaves the process.
#[derive(Debug, Clone)]
pub struct User {
    pub login: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(login: String, password_hash: String) -> Self {
        Self {
            login,
            password_hash,
            created_at: Utc::now(),
            last_login: None,
        }
    }
}

/// A user-submitted arithmetic expression
///
/// Status moves monotonically from `Pending` to either `Done` (with the
/// root task's result) or `Failed` with the first task error code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expression {
    pub id: String,
    pub owner: String,
    pub status: ExpressionStatus,
    pub result: Option<f64>,
}

impl Expression {
    pub fn new(id: String, owner: String) -> Self {
        Self {
            id,
            owner,
            status: ExpressionStatus::Pending,
            result: None,
        }
    }
}

/// A single binary operation within an expression's DAG
///
/// Task IDs are `"<expression_id>-<ordinal>"` with a 1-based ordinal.
/// Arguments sourced from a dependency carry a `0.0` placeholder and the
/// matching `arg*_from_dep` tag; `depends_on` lists dependency task IDs in
/// argument order (arg1 source first, then arg2 source).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub arg1: f64,
    pub arg2: f64,
    pub arg1_from_dep: bool,
    pub arg2_from_dep: bool,
    pub operation: Operation,
    pub operation_time_ms: u64,
    pub depends_on: Vec<String>,
    pub result: Option<f64>,
    pub status: TaskStatus,
    pub user_login: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// The owning expression's ID (task IDs embed it as a prefix).
    pub fn expression_id(&self) -> &str {
        expression_id_of(&self.id).unwrap_or(&self.id)
    }
}

/// Extract the expression ID from a `"<expression_id>-<ordinal>"` task ID.
///
/// Expression IDs are UUIDs and contain hyphens themselves, so the split
/// must happen at the last hyphen.
pub fn expression_id_of(task_id: &str) -> Option<&str> {
    task_id.rsplit_once('-').map(|(expression_id, _)| expression_id)
}

/// The four supported binary operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Sub,
    #[serde(rename = "*")]
    Mul,
    #[serde(rename = "/")]
    Div,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Add => "+",
            Operation::Sub => "-",
            Operation::Mul => "*",
            Operation::Div => "/",
        }
    }

    /// Apply the operation to two operands.
    ///
    /// Division by zero is a compute error, not a panic or infinity.
    pub fn apply(&self, arg1: f64, arg2: f64) -> std::result::Result<f64, TaskError> {
        match self {
            Operation::Add => Ok(arg1 + arg2),
            Operation::Sub => Ok(arg1 - arg2),
            Operation::Mul => Ok(arg1 * arg2),
            Operation::Div => {
                if arg2 == 0.0 {
                    Err(TaskError::new(
                        TaskErrorCode::DivisionByZero,
                        "division by zero",
                    ))
                } else {
                    Ok(arg1 / arg2)
                }
            }
        }
    }
}

impl FromStr for Operation {
    type Err = TaskError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "+" => Ok(Operation::Add),
            "-" => Ok(Operation::Sub),
            "*" => Ok(Operation::Mul),
            "/" => Ok(Operation::Div),
            other => Err(TaskError::new(
                TaskErrorCode::UnknownOperation,
                format!("unknown operation: {other}"),
            )),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure codes a task can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorCode {
    DivisionByZero,
    UnknownOperation,
    InternalError,
}

impl TaskErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskErrorCode::DivisionByZero => "division_by_zero",
            TaskErrorCode::UnknownOperation => "unknown_operation",
            TaskErrorCode::InternalError => "internal_error",
        }
    }
}

impl FromStr for TaskErrorCode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "division_by_zero" => Ok(TaskErrorCode::DivisionByZero),
            "unknown_operation" => Ok(TaskErrorCode::UnknownOperation),
            "internal_error" => Ok(TaskErrorCode::InternalError),
            other => Err(format!("unknown task error code: {other}")),
        }
    }
}

impl fmt::Display for TaskErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A compute failure carried from an agent back to the orchestrator
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct TaskError {
    pub code: TaskErrorCode,
    pub message: String,
}

impl TaskError {
    pub fn new(code: TaskErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Current status of a task in the scheduling pipeline
///
/// `Pending → Processing → {Completed, Failed}`; terminal states are sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed(TaskErrorCode),
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed(code) => code.as_str(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed(_))
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            other => TaskErrorCode::from_str(other).map(TaskStatus::Failed),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for TaskStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TaskStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Current status of an expression
///
/// `Pending → {Done, Failed}`; an expression is never re-opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpressionStatus {
    Pending,
    Processing,
    Done,
    Failed(TaskErrorCode),
}

impl ExpressionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpressionStatus::Pending => "pending",
            ExpressionStatus::Processing => "processing",
            ExpressionStatus::Done => "done",
            ExpressionStatus::Failed(code) => code.as_str(),
        }
    }
}

impl FromStr for ExpressionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExpressionStatus::Pending),
            "processing" => Ok(ExpressionStatus::Processing),
            "done" => Ok(ExpressionStatus::Done),
            other => TaskErrorCode::from_str(other).map(ExpressionStatus::Failed),
        }
    }
}

impl fmt::Display for ExpressionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ExpressionStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ExpressionStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Outcome of a task execution reported by an agent
///
/// Serializes externally tagged, so the wire form is either
/// `{"result": 5.0}` or `{"error": "division_by_zero"}`; the result/error
/// union survives the RPC layer intact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Result(f64),
    Error(TaskErrorCode),
}

/// What `update_task_result` did to a task
#[derive(Debug, Clone, PartialEq)]
pub struct TaskUpdate {
    /// False when the task was not `Processing` and the update was skipped.
    pub applied: bool,
    /// The task's status after the call.
    pub status: TaskStatus,
}
