//! Task and expression persistence.
//!
//! The `Repository` trait is the storage contract the orchestrator runs
//! against; `MemoryRepository` is the in-process backend. A SQL backend
//! must honor the same logical columns and, critically, the same
//! atomic-dequeue semantics: two overlapping `get_and_lock_task` calls
//! never return the same task.

use crate::{
    models::{
        Expression, ExpressionStatus, Task, TaskOutcome, TaskStatus, TaskUpdate, User,
    },
    DagcalcError, Result,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Storage contract for expressions, tasks, and users.
///
/// Every operation is safe for concurrent callers.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Persist a new expression; fails on a duplicate ID.
    async fn add_expression(&self, expression: Expression) -> Result<()>;

    /// Persist a new task; fails on a duplicate ID.
    async fn add_task(&self, task: Task) -> Result<()>;

    /// Create a user; `UserExists` on login collision.
    async fn register_user(&self, user: User) -> Result<()>;

    async fn find_user(&self, login: &str) -> Result<Option<User>>;

    /// Stamp the user's last successful login.
    async fn record_login(&self, login: &str) -> Result<()>;

    /// Atomically pick the oldest pending task whose dependencies are all
    /// completed, flip it to `Processing`, and return it. Returns `None`
    /// without side effects when no task is ready.
    async fn get_and_lock_task(&self) -> Result<Option<Task>>;

    /// Transition `Processing → Completed(result)` or `Processing →
    /// Failed(code)`. A task in any other state is left untouched and the
    /// update reports `applied = false`.
    async fn update_task_result(&self, task_id: &str, outcome: TaskOutcome) -> Result<TaskUpdate>;

    /// A completed task's result; `None` for any other state.
    async fn get_task_result(&self, task_id: &str) -> Result<Option<f64>>;

    /// True iff the expression has tasks and every one is `Completed`.
    async fn are_all_tasks_completed(&self, expression_id: &str) -> Result<bool>;

    /// The result of the expression's root task (the single task no other
    /// task depends on).
    async fn calculate_final_result(&self, expression_id: &str) -> Result<Option<f64>>;

    async fn update_expression(
        &self,
        expression_id: &str,
        status: ExpressionStatus,
        result: Option<f64>,
    ) -> Result<()>;

    /// Remove an expression and its tasks (rollback support).
    async fn delete_expression(&self, expression_id: &str) -> Result<()>;

    async fn get_expressions_by_owner(&self, owner: &str) -> Result<Vec<Expression>>;

    async fn get_expression_by_id_and_owner(
        &self,
        id: &str,
        owner: &str,
    ) -> Result<Option<Expression>>;
}

#[derive(Default)]
struct StoreInner {
    users: HashMap<String, User>,
    expressions: HashMap<String, Expression>,
    /// Insertion order doubles as dequeue age order.
    tasks: Vec<Task>,
}

/// In-memory repository backend.
///
/// One mutex over the whole store serializes dequeue-and-lock against
/// every other mutation, which is what realizes the at-most-one-lease
/// guarantee.
#[derive(Clone, Default)]
pub struct MemoryRepository {
    inner: Arc<Mutex<StoreInner>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn add_expression(&self, expression: Expression) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.expressions.contains_key(&expression.id) {
            return Err(DagcalcError::Repository {
                message: format!("expression {} already exists", expression.id),
            });
        }
        debug!("stored expression {}", expression.id);
        inner.expressions.insert(expression.id.clone(), expression);
        Ok(())
    }

    async fn add_task(&self, task: Task) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.tasks.iter().any(|existing| existing.id == task.id) {
            return Err(DagcalcError::Repository {
                message: format!("task {} already exists", task.id),
            });
        }
        debug!("stored task {} ({} deps)", task.id, task.depends_on.len());
        inner.tasks.push(task);
        Ok(())
    }

    async fn register_user(&self, user: User) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.users.contains_key(&user.login) {
            return Err(DagcalcError::UserExists);
        }
        info!("registered user {}", user.login);
        inner.users.insert(user.login.clone(), user);
        Ok(())
    }

    async fn find_user(&self, login: &str) -> Result<Option<User>> {
        let inner = self.inner.lock().await;
        Ok(inner.users.get(login).cloned())
    }

    async fn record_login(&self, login: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(user) = inner.users.get_mut(login) {
            user.last_login = Some(Utc::now());
        }
        Ok(())
    }

    async fn get_and_lock_task(&self) -> Result<Option<Task>> {
        let mut inner = self.inner.lock().await;

        let ready_position = inner.tasks.iter().enumerate().find_map(|(position, task)| {
            if task.status != TaskStatus::Pending {
                return None;
            }
            let dependencies_ready = task.depends_on.iter().all(|dep_id| {
                inner
                    .tasks
                    .iter()
                    .find(|candidate| &candidate.id == dep_id)
                    .map(|dep| dep.status == TaskStatus::Completed)
                    .unwrap_or(false)
            });
            dependencies_ready.then_some(position)
        });

        let Some(position) = ready_position else {
            return Ok(None);
        };

        let task = &mut inner.tasks[position];
        task.status = TaskStatus::Processing;
        task.updated_at = Utc::now();
        debug!("task {} leased", task.id);
        Ok(Some(task.clone()))
    }

    async fn update_task_result(&self, task_id: &str, outcome: TaskOutcome) -> Result<TaskUpdate> {
        let mut inner = self.inner.lock().await;
        let task = inner
            .tasks
            .iter_mut()
            .find(|task| task.id == task_id)
            .ok_or_else(|| DagcalcError::NotFound(format!("task {task_id}")))?;

        if task.status != TaskStatus::Processing {
            debug!(
                "ignoring result for task {} in state {}",
                task_id, task.status
            );
            return Ok(TaskUpdate {
                applied: false,
                status: task.status,
            });
        }

        match outcome {
            TaskOutcome::Result(value) => {
                task.status = TaskStatus::Completed;
                task.result = Some(value);
                info!("task {} completed: {}", task_id, value);
            }
            TaskOutcome::Error(code) => {
                task.status = TaskStatus::Failed(code);
                task.result = None;
                info!("task {} failed: {}", task_id, code);
            }
        }
        task.updated_at = Utc::now();

        Ok(TaskUpdate {
            applied: true,
            status: task.status,
        })
    }

    async fn get_task_result(&self, task_id: &str) -> Result<Option<f64>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .tasks
            .iter()
            .find(|task| task.id == task_id && task.status == TaskStatus::Completed)
            .and_then(|task| task.result))
    }

    async fn are_all_tasks_completed(&self, expression_id: &str) -> Result<bool> {
        let inner = self.inner.lock().await;
        let mut seen_any = false;
        for task in inner
            .tasks
            .iter()
            .filter(|task| task.expression_id() == expression_id)
        {
            seen_any = true;
            if task.status != TaskStatus::Completed {
                return Ok(false);
            }
        }
        Ok(seen_any)
    }

    async fn calculate_final_result(&self, expression_id: &str) -> Result<Option<f64>> {
        let inner = self.inner.lock().await;
        let expression_tasks: Vec<&Task> = inner
            .tasks
            .iter()
            .filter(|task| task.expression_id() == expression_id)
            .collect();

        let root = expression_tasks.iter().find(|candidate| {
            !expression_tasks
                .iter()
                .any(|task| task.depends_on.contains(&candidate.id))
        });

        Ok(root.and_then(|task| task.result))
    }

    async fn update_expression(
        &self,
        expression_id: &str,
        status: ExpressionStatus,
        result: Option<f64>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let expression = inner
            .expressions
            .get_mut(expression_id)
            .ok_or_else(|| DagcalcError::NotFound(format!("expression {expression_id}")))?;

        expression.status = status;
        expression.result = result;
        info!("expression {} is now {}", expression_id, status);
        Ok(())
    }

    async fn delete_expression(&self, expression_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.expressions.remove(expression_id);
        inner
            .tasks
            .retain(|task| task.expression_id() != expression_id);
        debug!("deleted expression {}", expression_id);
        Ok(())
    }

    async fn get_expressions_by_owner(&self, owner: &str) -> Result<Vec<Expression>> {
        let inner = self.inner.lock().await;
        let mut expressions: Vec<Expression> = inner
            .expressions
            .values()
            .filter(|expression| expression.owner == owner)
            .cloned()
            .collect();
        expressions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(expressions)
    }

    async fn get_expression_by_id_and_owner(
        &self,
        id: &str,
        owner: &str,
    ) -> Result<Option<Expression>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .expressions
            .get(id)
            .filter(|expression| expression.owner == owner)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Operation, TaskErrorCode};

    fn make_task(id: &str, depends_on: Vec<&str>) -> Task {
        let now = Utc::now();
        let arg_from_dep = !depends_on.is_empty();
        Task {
            id: id.to_string(),
            arg1: if arg_from_dep { 0.0 } else { 1.0 },
            arg2: 2.0,
            arg1_from_dep: arg_from_dep,
            arg2_from_dep: false,
            operation: Operation::Add,
            operation_time_ms: 0,
            depends_on: depends_on.into_iter().map(str::to_string).collect(),
            result: None,
            status: TaskStatus::Pending,
            user_login: "alice".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    async fn seed_chain(repo: &MemoryRepository) {
        repo.add_expression(Expression::new("e1".to_string(), "alice".to_string()))
            .await
            .unwrap();
        repo.add_task(make_task("e1-1", vec![])).await.unwrap();
        repo.add_task(make_task("e1-2", vec!["e1-1"])).await.unwrap();
    }

    #[tokio::test]
    async fn test_dequeue_respects_dependencies() {
        let repo = MemoryRepository::new();
        seed_chain(&repo).await;

        let first = repo.get_and_lock_task().await.unwrap().unwrap();
        assert_eq!(first.id, "e1-1");
        assert_eq!(first.status, TaskStatus::Processing);

        // e1-2 depends on e1-1, which is still processing.
        assert!(repo.get_and_lock_task().await.unwrap().is_none());

        repo.update_task_result("e1-1", TaskOutcome::Result(3.0))
            .await
            .unwrap();

        let second = repo.get_and_lock_task().await.unwrap().unwrap();
        assert_eq!(second.id, "e1-2");
    }

    #[tokio::test]
    async fn test_concurrent_dequeue_hands_out_one_lease() {
        let repo = MemoryRepository::new();
        repo.add_expression(Expression::new("e1".to_string(), "alice".to_string()))
            .await
            .unwrap();
        repo.add_task(make_task("e1-1", vec![])).await.unwrap();

        let attempts = futures::future::join_all(
            (0..16).map(|_| {
                let repo = repo.clone();
                async move { repo.get_and_lock_task().await.unwrap() }
            }),
        )
        .await;

        let leased: Vec<_> = attempts.into_iter().flatten().collect();
        assert_eq!(leased.len(), 1);
        assert_eq!(leased[0].id, "e1-1");
    }

    #[tokio::test]
    async fn test_result_update_requires_processing_state() {
        let repo = MemoryRepository::new();
        seed_chain(&repo).await;

        // Pending task: update ignored.
        let update = repo
            .update_task_result("e1-1", TaskOutcome::Result(3.0))
            .await
            .unwrap();
        assert!(!update.applied);
        assert_eq!(update.status, TaskStatus::Pending);

        repo.get_and_lock_task().await.unwrap().unwrap();
        let update = repo
            .update_task_result("e1-1", TaskOutcome::Result(3.0))
            .await
            .unwrap();
        assert!(update.applied);
        assert_eq!(update.status, TaskStatus::Completed);

        // Completed is terminal: a second submission cannot overwrite it.
        let update = repo
            .update_task_result("e1-1", TaskOutcome::Result(99.0))
            .await
            .unwrap();
        assert!(!update.applied);
        assert_eq!(repo.get_task_result("e1-1").await.unwrap(), Some(3.0));
    }

    #[tokio::test]
    async fn test_error_outcome_clears_result() {
        let repo = MemoryRepository::new();
        repo.add_expression(Expression::new("e1".to_string(), "alice".to_string()))
            .await
            .unwrap();
        repo.add_task(make_task("e1-1", vec![])).await.unwrap();
        repo.get_and_lock_task().await.unwrap().unwrap();

        let update = repo
            .update_task_result("e1-1", TaskOutcome::Error(TaskErrorCode::DivisionByZero))
            .await
            .unwrap();
        assert!(update.applied);
        assert_eq!(
            update.status,
            TaskStatus::Failed(TaskErrorCode::DivisionByZero)
        );
        assert_eq!(repo.get_task_result("e1-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_completion_and_final_result() {
        let repo = MemoryRepository::new();
        seed_chain(&repo).await;

        assert!(!repo.are_all_tasks_completed("e1").await.unwrap());

        repo.get_and_lock_task().await.unwrap().unwrap();
        repo.update_task_result("e1-1", TaskOutcome::Result(3.0))
            .await
            .unwrap();
        assert!(!repo.are_all_tasks_completed("e1").await.unwrap());

        repo.get_and_lock_task().await.unwrap().unwrap();
        repo.update_task_result("e1-2", TaskOutcome::Result(5.0))
            .await
            .unwrap();

        assert!(repo.are_all_tasks_completed("e1").await.unwrap());
        // The root is e1-2: nothing depends on it.
        assert_eq!(repo.calculate_final_result("e1").await.unwrap(), Some(5.0));
    }

    #[tokio::test]
    async fn test_user_registration_conflict() {
        let repo = MemoryRepository::new();
        repo.register_user(User::new("alice".to_string(), "hash".to_string()))
            .await
            .unwrap();

        let err = repo
            .register_user(User::new("alice".to_string(), "other".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, DagcalcError::UserExists));

        assert!(repo.find_user("alice").await.unwrap().is_some());
        assert!(repo.find_user("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_owner_scoped_reads() {
        let repo = MemoryRepository::new();
        repo.add_expression(Expression::new("e1".to_string(), "alice".to_string()))
            .await
            .unwrap();
        repo.add_expression(Expression::new("e2".to_string(), "bob".to_string()))
            .await
            .unwrap();

        let alices = repo.get_expressions_by_owner("alice").await.unwrap();
        assert_eq!(alices.len(), 1);
        assert_eq!(alices[0].id, "e1");

        assert!(repo
            .get_expression_by_id_and_owner("e1", "alice")
            .await
            .unwrap()
            .is_some());
        // Another owner's expression reads as absent, not as an error.
        assert!(repo
            .get_expression_by_id_and_owner("e1", "bob")
            .await
            .unwrap()
            .is_none());
        assert!(repo
            .get_expressions_by_owner("carol")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_delete_expression_removes_tasks() {
        let repo = MemoryRepository::new();
        seed_chain(&repo).await;

        repo.delete_expression("e1").await.unwrap();
        assert!(repo.get_and_lock_task().await.unwrap().is_none());
        assert!(repo
            .get_expression_by_id_and_owner("e1", "alice")
            .await
            .unwrap()
            .is_none());
    }
}
