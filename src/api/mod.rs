//! User-facing HTTP facade.
//!
//! A thin request-mapping layer: routes translate JSON bodies into
//! orchestrator service calls and service errors into status codes. The
//! agent RPC routes are nested under `/internal` on the same listener.

use crate::{
    auth::{auth_middleware, AuthState, CurrentUser},
    config::HttpConfig,
    models::Expression,
    orchestrator::{rpc, OrchestratorService},
    DagcalcError, Result,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::Json,
    routing::{get, post},
    Extension, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

const ROUTE_REGISTER: &str = "/api/v1/register";
const ROUTE_LOGIN: &str = "/api/v1/login";
const ROUTE_CALCULATE: &str = "/api/v1/calculate";
const ROUTE_EXPRESSIONS: &str = "/api/v1/expressions";
const ROUTE_EXPRESSION_BY_ID: &str = "/api/v1/expressions/{id}";

const ERROR_INTERNAL_SERVER: &str = "internal server error";

#[derive(Clone)]
pub struct ApiServer {
    config: HttpConfig,
    service: Arc<OrchestratorService>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CredentialsRequest {
    pub login: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    /// RFC 3339 timestamp of token expiry.
    pub expires_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CalculateRequest {
    pub expression: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CalculateResponse {
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExpressionsResponse {
    pub expressions: Vec<Expression>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExpressionResponse {
    pub expression: Expression,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ApiServer {
    pub fn new(config: HttpConfig, service: Arc<OrchestratorService>) -> Self {
        Self { config, service }
    }

    pub async fn run(&self) -> Result<()> {
        let app = self.build_router();

        let listener =
            tokio::net::TcpListener::bind(format!("{}:{}", self.config.host, self.config.port))
                .await
                .map_err(|e| DagcalcError::Internal(e.into()))?;

        info!(
            "orchestrator listening on {}:{}",
            self.config.host, self.config.port
        );

        axum::serve(listener, app)
            .await
            .map_err(|e| DagcalcError::Internal(e.into()))?;

        Ok(())
    }

    pub fn build_router(&self) -> Router {
        let auth_state = AuthState {
            tokens: self.service.tokens().clone(),
            repository: self.service.repository(),
        };

        let cors_layer = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
            .allow_headers([
                axum::http::header::CONTENT_TYPE,
                axum::http::header::AUTHORIZATION,
            ]);

        let protected = Router::new()
            .route(ROUTE_CALCULATE, post(calculate))
            .route(ROUTE_EXPRESSIONS, get(list_expressions))
            .route(ROUTE_EXPRESSION_BY_ID, get(get_expression))
            .layer(middleware::from_fn_with_state(auth_state, auth_middleware));

        let api = Router::new()
            .route(ROUTE_REGISTER, post(register))
            .route(ROUTE_LOGIN, post(login))
            .merge(protected)
            .with_state(self.service.clone());

        Router::new()
            .merge(api)
            .nest("/internal", rpc::rpc_router(self.service.clone()))
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(cors_layer),
            )
    }
}

async fn register(
    State(service): State<Arc<OrchestratorService>>,
    Json(request): Json<CredentialsRequest>,
) -> std::result::Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    match service.register_user(&request.login, &request.password).await {
        Ok(()) => Ok(StatusCode::OK),
        Err(DagcalcError::UserExists) => Err((
            StatusCode::CONFLICT,
            error_body("user already exists"),
        )),
        Err(DagcalcError::InvalidCredentials) => Err((
            StatusCode::BAD_REQUEST,
            error_body("login and password must not be empty"),
        )),
        Err(err) => Err(internal_error("registration", err)),
    }
}

async fn login(
    State(service): State<Arc<OrchestratorService>>,
    Json(request): Json<CredentialsRequest>,
) -> std::result::Result<Json<LoginResponse>, (StatusCode, Json<ErrorResponse>)> {
    match service.authenticate(&request.login, &request.password).await {
        Ok((token, expires_at)) => Ok(Json(LoginResponse {
            token,
            expires_at: expires_at.to_rfc3339(),
        })),
        Err(DagcalcError::InvalidCredentials) => {
            warn!("failed login attempt for {}", request.login);
            Err((
                StatusCode::UNAUTHORIZED,
                error_body("invalid login or password"),
            ))
        }
        Err(err) => Err(internal_error("login", err)),
    }
}

async fn calculate(
    State(service): State<Arc<OrchestratorService>>,
    Extension(CurrentUser(login)): Extension<CurrentUser>,
    Json(request): Json<CalculateRequest>,
) -> std::result::Result<(StatusCode, Json<CalculateResponse>), (StatusCode, Json<ErrorResponse>)> {
    match service.add_expression(&request.expression, &login).await {
        Ok(id) => Ok((StatusCode::CREATED, Json(CalculateResponse { id }))),
        Err(DagcalcError::Parse(err)) => Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            error_body(&err.to_string()),
        )),
        Err(err) => Err(internal_error("expression submission", err)),
    }
}

async fn list_expressions(
    State(service): State<Arc<OrchestratorService>>,
    Extension(CurrentUser(login)): Extension<CurrentUser>,
) -> std::result::Result<Json<ExpressionsResponse>, (StatusCode, Json<ErrorResponse>)> {
    match service.get_expressions(&login).await {
        Ok(expressions) => Ok(Json(ExpressionsResponse { expressions })),
        Err(err) => Err(internal_error("expression listing", err)),
    }
}

async fn get_expression(
    State(service): State<Arc<OrchestratorService>>,
    Extension(CurrentUser(login)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> std::result::Result<Json<ExpressionResponse>, (StatusCode, Json<ErrorResponse>)> {
    match service.get_expression(&id, &login).await {
        Ok(Some(expression)) => Ok(Json(ExpressionResponse { expression })),
        Ok(None) => Err((StatusCode::NOT_FOUND, error_body("expression not found"))),
        Err(err) => Err(internal_error("expression lookup", err)),
    }
}

fn error_body(message: &str) -> Json<ErrorResponse> {
    Json(ErrorResponse {
        error: message.to_string(),
    })
}

fn internal_error(context: &str, err: DagcalcError) -> (StatusCode, Json<ErrorResponse>) {
    error!("{context} failed: {err}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        error_body(ERROR_INTERNAL_SERVER),
    )
}
