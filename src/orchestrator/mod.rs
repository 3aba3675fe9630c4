//! Orchestrator service: the single owner of expression and task state.
//!
//! Composes the parser, the repository, and the auth capabilities behind
//! the operations both front doors call into: the user-facing HTTP
//! facade and the agent-facing RPC server.

pub mod rpc;

use crate::{
    auth::{self, TokenManager},
    config::{Config, OperationTimes},
    models::{
        expression_id_of, Expression, ExpressionStatus, Task, TaskErrorCode, TaskOutcome,
        TaskStatus, User,
    },
    parser,
    repository::Repository,
    DagcalcError, Result,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct OrchestratorService {
    repository: Arc<dyn Repository>,
    tokens: TokenManager,
    times: OperationTimes,
}

impl OrchestratorService {
    pub fn new(config: &Config, repository: Arc<dyn Repository>) -> Self {
        Self {
            repository,
            tokens: TokenManager::new(&config.auth),
            times: config.times.clone(),
        }
    }

    pub fn repository(&self) -> Arc<dyn Repository> {
        self.repository.clone()
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// Register a new user with a hashed password.
    pub async fn register_user(&self, login: &str, password: &str) -> Result<()> {
        if login.trim().is_empty() || password.is_empty() {
            return Err(DagcalcError::InvalidCredentials);
        }
        let password_hash = auth::hash_password(password)?;
        self.repository
            .register_user(User::new(login.to_string(), password_hash))
            .await?;
        Ok(())
    }

    /// Verify credentials and mint a bearer token valid for 24 hours.
    pub async fn authenticate(
        &self,
        login: &str,
        password: &str,
    ) -> Result<(String, DateTime<Utc>)> {
        let user = self
            .repository
            .find_user(login)
            .await?
            .ok_or(DagcalcError::InvalidCredentials)?;

        if !auth::verify_password(password, &user.password_hash)? {
            return Err(DagcalcError::InvalidCredentials);
        }

        self.repository.record_login(login).await?;
        let (token, expires_at) = self.tokens.mint(login)?;
        info!("user {} authenticated", login);
        Ok((token, expires_at))
    }

    /// Submit an expression: persist it, parse it into tasks, and persist
    /// the tasks in topological order.
    ///
    /// If parsing fails or any task insert fails, the expression is
    /// deleted again (best effort) so no orphaned tasks survive.
    pub async fn add_expression(&self, text: &str, owner: &str) -> Result<String> {
        let expression_id = Uuid::new_v4().to_string();
        self.repository
            .add_expression(Expression::new(expression_id.clone(), owner.to_string()))
            .await?;

        let tasks = match parser::parse_expression(text, &expression_id, owner, &self.times) {
            Ok(tasks) => tasks,
            Err(err) => {
                self.rollback_expression(&expression_id).await;
                return Err(err.into());
            }
        };

        let task_count = tasks.len();
        for task in tasks {
            if let Err(err) = self.repository.add_task(task).await {
                error!(
                    "task persistence failed for expression {}: {}",
                    expression_id, err
                );
                self.rollback_expression(&expression_id).await;
                return Err(err);
            }
        }

        info!(
            "expression {} submitted by {} ({} tasks)",
            expression_id, owner, task_count
        );
        Ok(expression_id)
    }

    async fn rollback_expression(&self, expression_id: &str) {
        if let Err(err) = self.repository.delete_expression(expression_id).await {
            warn!("rollback failed for expression {}: {}", expression_id, err);
        }
    }

    /// Lease the next ready task for an agent.
    pub async fn get_task(&self) -> Result<Option<Task>> {
        self.repository.get_and_lock_task().await
    }

    /// Apply a task outcome reported by an agent.
    ///
    /// On completion, finalizes the expression once every task is done.
    /// On a compute error, the expression fails immediately with that
    /// error code; siblings are not awaited.
    pub async fn submit_result(&self, task_id: &str, outcome: TaskOutcome) -> Result<bool> {
        let update = self.repository.update_task_result(task_id, outcome).await?;
        if !update.applied {
            warn!(
                "result for task {} ignored in state {}",
                task_id, update.status
            );
            return Ok(false);
        }

        let expression_id = expression_id_of(task_id).ok_or_else(|| DagcalcError::Repository {
            message: format!("malformed task id {task_id}"),
        })?;

        match update.status {
            TaskStatus::Completed => {
                if self.repository.are_all_tasks_completed(expression_id).await? {
                    match self.repository.calculate_final_result(expression_id).await? {
                        Some(result) => {
                            self.repository
                                .update_expression(
                                    expression_id,
                                    ExpressionStatus::Done,
                                    Some(result),
                                )
                                .await?;
                            info!("expression {} done: {}", expression_id, result);
                        }
                        None => {
                            error!(
                                "expression {} completed without a root result",
                                expression_id
                            );
                            self.repository
                                .update_expression(
                                    expression_id,
                                    ExpressionStatus::Failed(TaskErrorCode::InternalError),
                                    None,
                                )
                                .await?;
                        }
                    }
                }
            }
            TaskStatus::Failed(code) => {
                self.repository
                    .update_expression(expression_id, ExpressionStatus::Failed(code), None)
                    .await?;
                warn!("expression {} failed: {}", expression_id, code);
            }
            TaskStatus::Pending | TaskStatus::Processing => {}
        }

        Ok(true)
    }

    /// A completed task's result, for agent dependency resolution.
    pub async fn get_task_result(&self, task_id: &str) -> Result<Option<f64>> {
        self.repository.get_task_result(task_id).await
    }

    pub async fn get_expressions(&self, owner: &str) -> Result<Vec<Expression>> {
        self.repository.get_expressions_by_owner(owner).await
    }

    pub async fn get_expression(&self, id: &str, owner: &str) -> Result<Option<Expression>> {
        self.repository.get_expression_by_id_and_owner(id, owner).await
    }
}
