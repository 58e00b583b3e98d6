//! HTTP API for Case Study Builder
//!
//! JSON over HTTP, authenticated with `Authorization: Bearer <token>`. A
//! token is either an API token issued by `casebuilder users token` or a
//! break-glass session token; requests made under the latter are recorded
//! in the audit log.

use anyhow::Result;
use axum::{
    Router,
    extract::{ConnectInfo, FromRequestParts, Path, Query, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header, request::Parts},
    response::{IntoResponse, Json, Response},
    routing::{get, patch, post, put},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use super::AppState;
use crate::audit::{AuditAction, AuditEntry, AuditEvent, AuditQuery, ChainReport};
use crate::cases::{CaseStatus, CaseStudy, CaseUpdate, LibraryPage, LibraryQuery, NewCase, Notification};
use crate::error::Error;
use crate::gdpr::{DeletionRequest, UserDataExport};
use crate::retention::{DataType, PolicyUpdate, RetentionPolicy, RetentionReport};
use crate::security::Grant;
use crate::users::{Principal, Role, User};

pub struct Server {
    state: Arc<AppState>,
}

impl Server {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub async fn run(self) -> Result<()> {
        let config = &self.state.config;
        let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
        let app = router(self.state.clone());

        info!("Starting HTTP server on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;

        Ok(())
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/me", get(me))
        // Case workflow
        .route("/api/cases", get(list_cases).post(create_case))
        .route(
            "/api/cases/{id}",
            get(get_case).patch(update_case).delete(delete_case),
        )
        .route("/api/cases/{id}/submit", post(submit_case))
        .route("/api/cases/{id}/approve", post(approve_case))
        .route("/api/cases/{id}/reject", post(reject_case))
        .route("/api/cases/{id}/publish", post(publish_case))
        .route("/api/library", get(library))
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/{id}/read", post(mark_notification_read))
        // Compliance
        .route("/api/audit", get(audit_entries))
        .route("/api/audit/verify", get(audit_verify))
        .route("/api/retention/policies", get(list_policies))
        .route("/api/retention/policies/{data_type}", put(update_policy))
        .route("/api/retention/run", post(run_retention))
        .route("/api/gdpr/requests", get(list_gdpr).post(create_gdpr))
        .route("/api/gdpr/requests/{id}/verify", post(verify_gdpr))
        .route("/api/gdpr/requests/{id}/cancel", post(cancel_gdpr))
        .route("/api/gdpr/requests/{id}/reject", post(reject_gdpr))
        .route("/api/gdpr/requests/{id}/process", post(process_gdpr))
        .route("/api/gdpr/export", get(export_gdpr))
        .route(
            "/api/break-glass",
            post(break_glass_grant).delete(break_glass_revoke),
        )
        // Administration
        .route("/api/users", get(list_users).post(create_user))
        .route("/api/users/{id}/role", patch(change_role))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    if origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", o);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

// Error response type
#[derive(Debug)]
pub struct AppError(pub StatusCode, pub String);

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        let status = match &e {
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::InvalidTransition { .. } | Error::Conflict(_) => StatusCode::CONFLICT,
            Error::TokenExpired => StatusCode::GONE,
            Error::LockedOut { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Disabled(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Database(_) | Error::Serialization(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status.is_server_error() {
            error!("Request failed: {}", e);
            // Internal detail stays in the log
            return Self(status, "internal server error".to_string());
        }
        debug!("Request rejected ({}): {}", status, e);
        Self(status, e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "error": self.1 }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, AppError>;

// Request metadata extractors

/// Peer address, when the server was started with connect info.
pub struct ClientIp(pub Option<String>);

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(client_ip(parts)))
    }
}

fn client_ip(parts: &Parts) -> Option<String> {
    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// The authenticated caller.
pub struct Auth(pub Principal);

impl FromRequestParts<Arc<AppState>> for Auth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(Error::Unauthorized)?;

        if let Some(session) = state.break_glass.validate(token)? {
            state.break_glass.record_access(
                &state.audit,
                &session.id,
                parts.method.as_str(),
                parts.uri.path(),
                client_ip(parts),
            );
            let user = state.users.break_glass_user()?;
            return Ok(Self(Principal {
                user,
                break_glass_session: Some(session.id),
            }));
        }

        let user = state.users.resolve_token(token)?;
        Ok(Self(Principal::user(user)))
    }
}

// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

#[derive(Serialize)]
struct MeResponse {
    user: User,
    #[serde(skip_serializing_if = "Option::is_none")]
    break_glass_session: Option<String>,
}

async fn me(Auth(p): Auth) -> Json<MeResponse> {
    Json(MeResponse {
        user: p.user,
        break_glass_session: p.break_glass_session,
    })
}

// Case workflow endpoints
#[derive(Deserialize)]
struct CaseListQuery {
    status: Option<CaseStatus>,
}

async fn list_cases(
    State(state): State<Arc<AppState>>,
    Auth(p): Auth,
    Query(query): Query<CaseListQuery>,
) -> ApiResult<Json<Vec<CaseStudy>>> {
    Ok(Json(state.cases.list(&p, query.status)?))
}

async fn create_case(
    State(state): State<Arc<AppState>>,
    Auth(p): Auth,
    Json(input): Json<NewCase>,
) -> ApiResult<(StatusCode, Json<CaseStudy>)> {
    let case = state.cases.create(&p, input)?;
    Ok((StatusCode::CREATED, Json(case)))
}

async fn get_case(
    State(state): State<Arc<AppState>>,
    Auth(p): Auth,
    Path(id): Path<String>,
) -> ApiResult<Json<CaseStudy>> {
    Ok(Json(state.cases.get(&p, &id)?))
}

async fn update_case(
    State(state): State<Arc<AppState>>,
    Auth(p): Auth,
    Path(id): Path<String>,
    Json(patch): Json<CaseUpdate>,
) -> ApiResult<Json<CaseStudy>> {
    Ok(Json(state.cases.update(&p, &id, patch)?))
}

async fn delete_case(
    State(state): State<Arc<AppState>>,
    Auth(p): Auth,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.cases.delete(&p, &id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn submit_case(
    State(state): State<Arc<AppState>>,
    Auth(p): Auth,
    Path(id): Path<String>,
) -> ApiResult<Json<CaseStudy>> {
    Ok(Json(state.cases.submit(&p, &id)?))
}

async fn approve_case(
    State(state): State<Arc<AppState>>,
    Auth(p): Auth,
    Path(id): Path<String>,
) -> ApiResult<Json<CaseStudy>> {
    Ok(Json(state.cases.approve(&p, &id)?))
}

#[derive(Deserialize)]
struct ReasonRequest {
    #[serde(default)]
    reason: String,
}

async fn reject_case(
    State(state): State<Arc<AppState>>,
    Auth(p): Auth,
    Path(id): Path<String>,
    Json(request): Json<ReasonRequest>,
) -> ApiResult<Json<CaseStudy>> {
    Ok(Json(state.cases.reject(&p, &id, &request.reason)?))
}

async fn publish_case(
    State(state): State<Arc<AppState>>,
    Auth(p): Auth,
    Path(id): Path<String>,
) -> ApiResult<Json<CaseStudy>> {
    Ok(Json(state.cases.publish(&p, &id)?))
}

async fn library(
    State(state): State<Arc<AppState>>,
    Auth(_): Auth,
    Query(query): Query<LibraryQuery>,
) -> ApiResult<Json<LibraryPage>> {
    Ok(Json(state.cases.library(&query)?))
}

#[derive(Deserialize)]
struct NotificationQuery {
    #[serde(default)]
    unread: bool,
}

async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Auth(p): Auth,
    Query(query): Query<NotificationQuery>,
) -> ApiResult<Json<Vec<Notification>>> {
    Ok(Json(state.cases.notifications().list(p.id(), query.unread)?))
}

async fn mark_notification_read(
    State(state): State<Arc<AppState>>,
    Auth(p): Auth,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.cases.notifications().mark_read(p.id(), &id)?;
    Ok(StatusCode::NO_CONTENT)
}

// Audit endpoints
async fn audit_entries(
    State(state): State<Arc<AppState>>,
    Auth(p): Auth,
    Query(query): Query<AuditQuery>,
) -> ApiResult<Json<Vec<AuditEntry>>> {
    p.require_admin()?;
    Ok(Json(state.audit.query(&query)?))
}

async fn audit_verify(
    State(state): State<Arc<AppState>>,
    Auth(p): Auth,
) -> ApiResult<Json<ChainReport>> {
    p.require_admin()?;
    let report = state.audit.verify_chain()?;
    if !report.is_intact() {
        warn!(
            "Audit chain verification found {} break(s)",
            report.breaks.len()
        );
    }
    state.audit.record(
        AuditEvent::new(AuditAction::AuditChainVerified, p.actor(), "audit_log").metadata(json!({
            "checked": report.checked,
            "intact": report.is_intact(),
        })),
    );
    Ok(Json(report))
}

// Retention endpoints
async fn list_policies(
    State(state): State<Arc<AppState>>,
    Auth(p): Auth,
) -> ApiResult<Json<Vec<RetentionPolicy>>> {
    p.require_admin()?;
    Ok(Json(state.policies.list()?))
}

async fn update_policy(
    State(state): State<Arc<AppState>>,
    Auth(p): Auth,
    Path(data_type): Path<String>,
    Json(change): Json<PolicyUpdate>,
) -> ApiResult<Json<RetentionPolicy>> {
    let data_type: DataType = data_type.parse().map_err(Error::from)?;
    Ok(Json(state.policies.update(Some(&p), data_type, change)?))
}

#[derive(Deserialize, Default)]
struct RunRequest {
    dry_run: Option<bool>,
}

async fn run_retention(
    State(state): State<Arc<AppState>>,
    Auth(p): Auth,
    request: Option<Json<RunRequest>>,
) -> ApiResult<Json<RetentionReport>> {
    p.require_admin()?;
    let dry_run = request
        .and_then(|Json(r)| r.dry_run)
        .unwrap_or(state.config.retention.dry_run);

    let guard = state
        .retention_lock
        .try_acquire()
        .map_err(|e| Error::Internal(e.to_string()))?
        .ok_or_else(|| Error::Conflict("a retention run is already in progress".into()))?;

    let engine = state.retention.clone();
    let report = tokio::task::spawn_blocking(move || engine.run(dry_run))
        .await
        .map_err(|e| Error::Internal(e.to_string()))??;
    drop(guard);

    info!(
        "Manual retention run by {}: {} deleted, {} archived",
        p.id(),
        report.total_deleted(),
        report.total_archived()
    );
    Ok(Json(report))
}

// GDPR endpoints
#[derive(Deserialize, Default)]
struct CreateGdprRequest {
    reason: Option<String>,
}

/// The verification token is only returned by e-mail.
#[derive(Serialize)]
struct CreateGdprResponse {
    request: DeletionRequest,
    message: &'static str,
}

async fn create_gdpr(
    State(state): State<Arc<AppState>>,
    Auth(p): Auth,
    request: Option<Json<CreateGdprRequest>>,
) -> ApiResult<(StatusCode, Json<CreateGdprResponse>)> {
    let reason = request.and_then(|Json(r)| r.reason);
    let (request, _token) = state.gdpr.create_request(&p, reason.as_deref())?;
    Ok((
        StatusCode::CREATED,
        Json(CreateGdprResponse {
            request,
            message: "A verification link has been sent to your e-mail address",
        }),
    ))
}

async fn list_gdpr(
    State(state): State<Arc<AppState>>,
    Auth(p): Auth,
) -> ApiResult<Json<Vec<DeletionRequest>>> {
    Ok(Json(state.gdpr.list(Some(&p))?))
}

#[derive(Deserialize)]
struct VerifyRequest {
    token: String,
}

/// The e-mailed token is the credential; no bearer token is needed.
async fn verify_gdpr(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<VerifyRequest>,
) -> ApiResult<Json<DeletionRequest>> {
    Ok(Json(state.gdpr.verify(&id, &request.token)?))
}

async fn cancel_gdpr(
    State(state): State<Arc<AppState>>,
    Auth(p): Auth,
    Path(id): Path<String>,
) -> ApiResult<Json<DeletionRequest>> {
    Ok(Json(state.gdpr.cancel(&p, &id)?))
}

async fn reject_gdpr(
    State(state): State<Arc<AppState>>,
    Auth(p): Auth,
    Path(id): Path<String>,
    Json(request): Json<ReasonRequest>,
) -> ApiResult<Json<DeletionRequest>> {
    Ok(Json(state.gdpr.reject(&p, &id, &request.reason)?))
}

async fn process_gdpr(
    State(state): State<Arc<AppState>>,
    Auth(p): Auth,
    Path(id): Path<String>,
) -> ApiResult<Json<DeletionRequest>> {
    Ok(Json(state.gdpr.process(Some(&p), &id)?))
}

#[derive(Deserialize)]
struct ExportQuery {
    user_id: Option<String>,
}

async fn export_gdpr(
    State(state): State<Arc<AppState>>,
    Auth(p): Auth,
    Query(query): Query<ExportQuery>,
) -> ApiResult<Json<UserDataExport>> {
    let user_id = query.user_id.unwrap_or_else(|| p.id().to_string());
    Ok(Json(state.gdpr.export_user_data(Some(&p), &user_id)?))
}

// Break-glass endpoints
#[derive(Deserialize)]
struct BreakGlassRequest {
    key: String,
    reason: Option<String>,
}

async fn break_glass_grant(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    Json(request): Json<BreakGlassRequest>,
) -> ApiResult<(StatusCode, Json<Grant>)> {
    let grant =
        state
            .break_glass
            .authenticate(&request.key, ip.as_deref(), request.reason.as_deref())?;
    Ok((StatusCode::CREATED, Json(grant)))
}

async fn break_glass_revoke(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let token = bearer_token(&headers).ok_or(Error::Unauthorized)?;
    if state.break_glass.revoke(token, ip.as_deref())? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(Error::not_found("break-glass session").into())
    }
}

// User administration endpoints
async fn list_users(
    State(state): State<Arc<AppState>>,
    Auth(p): Auth,
) -> ApiResult<Json<Vec<User>>> {
    Ok(Json(state.users.list(Some(&p))?))
}

#[derive(Deserialize)]
struct CreateUserRequest {
    email: String,
    name: String,
    role: Role,
}

async fn create_user(
    State(state): State<Arc<AppState>>,
    Auth(p): Auth,
    Json(request): Json<CreateUserRequest>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let user = state
        .users
        .create(Some(&p), &request.email, &request.name, request.role)?;
    Ok((StatusCode::CREATED, Json(user)))
}

#[derive(Deserialize)]
struct RoleRequest {
    role: Role,
}

async fn change_role(
    State(state): State<Arc<AppState>>,
    Auth(p): Auth,
    Path(id): Path<String>,
    Json(request): Json<RoleRequest>,
) -> ApiResult<Json<User>> {
    Ok(Json(state.users.change_role(Some(&p), &id, request.role)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cases::CaseType;
    use crate::cases::tests::complete_case;
    use crate::server::tests::state_with;
    use axum::http::Request;

    fn parts(method: Method, uri: &str, token: Option<&str>) -> Parts {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(()).unwrap().into_parts().0
    }

    async fn auth(state: &Arc<AppState>, token: Option<&str>) -> ApiResult<Principal> {
        let mut parts = parts(Method::GET, "/api/me", token);
        Auth::from_request_parts(&mut parts, state)
            .await
            .map(|Auth(p)| p)
    }

    fn user_token(state: &Arc<AppState>, email: &str, role: Role) -> (User, String) {
        let user = state.users.create(None, email, "Test User", role).unwrap();
        let token = state.users.issue_token(&user.id).unwrap();
        (user, token)
    }

    #[test]
    fn errors_map_to_statuses() {
        let cases = [
            (Error::Unauthorized, StatusCode::UNAUTHORIZED),
            (Error::forbidden("x"), StatusCode::FORBIDDEN),
            (Error::not_found("x"), StatusCode::NOT_FOUND),
            (Error::validation("x"), StatusCode::BAD_REQUEST),
            (Error::transition("submit", "published"), StatusCode::CONFLICT),
            (Error::Conflict("x".into()), StatusCode::CONFLICT),
            (Error::TokenExpired, StatusCode::GONE),
            (
                Error::LockedOut {
                    until: "later".into(),
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (Error::Disabled("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (Error::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).0, status);
        }
    }

    #[test]
    fn server_errors_hide_detail() {
        let err = AppError::from(Error::Internal("disk path /var/x".into()));
        assert!(!err.1.contains("/var/x"));
    }

    #[tokio::test]
    async fn bearer_token_resolves_user() {
        let tmp = tempfile::tempdir().unwrap();
        let state = state_with(tmp.path(), |_| {});
        let (user, token) = user_token(&state, "c@example.com", Role::Contributor);

        assert_eq!(auth(&state, None).await.unwrap_err().0, StatusCode::UNAUTHORIZED);
        assert_eq!(
            auth(&state, Some("bogus")).await.unwrap_err().0,
            StatusCode::UNAUTHORIZED
        );

        let p = auth(&state, Some(&token)).await.unwrap();
        assert_eq!(p.id(), user.id);
        assert!(p.break_glass_session.is_none());
    }

    #[tokio::test]
    async fn break_glass_requests_are_audited() {
        let tmp = tempfile::tempdir().unwrap();
        let state = state_with(tmp.path(), |c| {
            c.break_glass.enabled = true;
            c.break_glass.key = "emergency-key-0123456789abcdefghijkl".to_string();
        });

        let denied = break_glass_grant(
            State(state.clone()),
            ClientIp(Some("10.0.0.9".into())),
            Json(BreakGlassRequest {
                key: "wrong".into(),
                reason: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(denied.0, StatusCode::UNAUTHORIZED);

        let (status, Json(grant)) = break_glass_grant(
            State(state.clone()),
            ClientIp(None),
            Json(BreakGlassRequest {
                key: "emergency-key-0123456789abcdefghijkl".into(),
                reason: Some("SSO outage".into()),
            }),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);

        let p = auth(&state, Some(&grant.token)).await.unwrap();
        assert_eq!(p.role(), Role::Admin);
        assert_eq!(p.break_glass_session.as_deref(), Some(grant.session_id.as_str()));

        let access = state
            .audit
            .query(&AuditQuery {
                action: Some(AuditAction::BreakGlassAccess),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(access.len(), 1);
        assert_eq!(access[0].metadata.as_ref().unwrap()["path"], "/api/me");

        let revoke = parts(Method::DELETE, "/api/break-glass", Some(&grant.token));
        assert_eq!(
            break_glass_revoke(State(state.clone()), ClientIp(None), revoke.headers)
                .await
                .unwrap(),
            StatusCode::NO_CONTENT
        );
        assert_eq!(
            auth(&state, Some(&grant.token)).await.unwrap_err().0,
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn case_handlers_enforce_workflow() {
        let tmp = tempfile::tempdir().unwrap();
        let state = state_with(tmp.path(), |_| {});
        let (author, _) = user_token(&state, "author@example.com", Role::Contributor);
        let (approver, _) = user_token(&state, "approver@example.com", Role::Approver);
        let author = Principal::user(author);
        let approver = Principal::user(approver);

        let (status, Json(case)) = create_case(
            State(state.clone()),
            Auth(author.clone()),
            Json(complete_case(CaseType::Application)),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);

        let err = approve_case(
            State(state.clone()),
            Auth(approver.clone()),
            Path(case.id.clone()),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::CONFLICT);

        submit_case(State(state.clone()), Auth(author.clone()), Path(case.id.clone()))
            .await
            .unwrap();
        let Json(rejected) = reject_case(
            State(state.clone()),
            Auth(approver.clone()),
            Path(case.id.clone()),
            Json(ReasonRequest {
                reason: "Add hardness readings".into(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(rejected.status, CaseStatus::Rejected);

        let Json(notes) = list_notifications(
            State(state.clone()),
            Auth(author.clone()),
            Query(NotificationQuery { unread: true }),
        )
        .await
        .unwrap();
        assert_eq!(notes.len(), 1);
    }

    #[tokio::test]
    async fn compliance_endpoints_require_admin() {
        let tmp = tempfile::tempdir().unwrap();
        let state = state_with(tmp.path(), |_| {});
        let (user, _) = user_token(&state, "c@example.com", Role::Contributor);
        let (admin, _) = user_token(&state, "admin@example.com", Role::Admin);
        let user = Principal::user(user);
        let admin = Principal::user(admin);

        let err = audit_verify(State(state.clone()), Auth(user.clone()))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::FORBIDDEN);
        let err = list_policies(State(state.clone()), Auth(user))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::FORBIDDEN);

        let Json(report) = audit_verify(State(state.clone()), Auth(admin.clone()))
            .await
            .unwrap();
        assert!(report.is_intact());

        let err = update_policy(
            State(state.clone()),
            Auth(admin.clone()),
            Path("spreadsheets".into()),
            Json(PolicyUpdate::default()),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn retention_run_conflicts_with_held_lock() {
        let tmp = tempfile::tempdir().unwrap();
        let state = state_with(tmp.path(), |_| {});
        let (admin, _) = user_token(&state, "admin@example.com", Role::Admin);
        let admin = Principal::user(admin);

        let Json(report) = run_retention(
            State(state.clone()),
            Auth(admin.clone()),
            Some(Json(RunRequest {
                dry_run: Some(true),
            })),
        )
        .await
        .unwrap();
        assert!(report.dry_run);

        let other = crate::concurrency::JobLock::new(&tmp.path().join("retention.lock")).unwrap();
        let _held = other.acquire().unwrap();
        let err = run_retention(State(state.clone()), Auth(admin), None)
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn gdpr_request_does_not_return_token() {
        let tmp = tempfile::tempdir().unwrap();
        let state = state_with(tmp.path(), |_| {});
        let (user, _) = user_token(&state, "c@example.com", Role::Contributor);

        let (status, Json(body)) = create_gdpr(
            State(state.clone()),
            Auth(Principal::user(user)),
            None,
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);

        let json = serde_json::to_value(&body).unwrap();
        assert!(json["request"].get("token_hash").is_none());
        assert_eq!(json["request"]["status"], "pending");

        let err = verify_gdpr(
            State(state.clone()),
            Path(body.request.id.clone()),
            Json(VerifyRequest {
                token: "guess".into(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::FORBIDDEN);
    }
}
