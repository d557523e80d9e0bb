use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use clap::Parser;
use rulehub_api::{
    CreateRuleRequest, IngestReport, RuleHubApi, UpdateRuleRequest, API_CONTRACT_VERSION,
};
use rulehub_core::{Descriptor, RuleId, RuleRecord, RuleStatus};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");

#[derive(Debug, Clone)]
struct ServiceState {
    api: RuleHubApi,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone, Deserialize)]
struct MigrateRequest {
    dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct UpdateRuleBody {
    actor: String,
    template_name: Option<String>,
    benefit_type: Option<String>,
    business_area: Option<String>,
    sub_business_area: Option<String>,
    description: Option<String>,
    version: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    effective_date: Option<OffsetDateTime>,
    status: Option<RuleStatus>,
    category: Option<String>,
    language: Option<String>,
    repeater_type: Option<String>,
    published: Option<bool>,
    tags: Option<BTreeSet<String>>,
}

#[derive(Debug, Clone, Deserialize)]
struct DeleteRuleBody {
    actor: String,
}

#[derive(Debug, Clone, Deserialize)]
struct UploadRequest {
    actor: String,
    descriptors: Vec<Descriptor>,
}

#[derive(Debug, Clone, Serialize)]
struct UpdateRuleResponse {
    found: bool,
    rule: Option<RuleRecord>,
}

#[derive(Debug, Clone, Serialize)]
struct DeleteRuleResponse {
    rule_id: String,
    deleted: bool,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Parser)]
#[command(name = "rulehub-service")]
#[command(about = "Local HTTP service for RuleHub")]
struct Args {
    #[arg(long, default_value = "./rulehub.sqlite3")]
    db: PathBuf,
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = StatusCode::BAD_REQUEST;
        (status, Json(self)).into_response()
    }
}

impl ServiceState {
    fn error(message: impl Into<String>) -> ServiceError {
        ServiceError { service_contract_version: SERVICE_CONTRACT_VERSION, error: message.into() }
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/openapi", get(openapi))
        .route("/v1/db/schema-version", post(db_schema_version))
        .route("/v1/db/migrate", post(db_migrate))
        .route("/v1/rules", get(rules_list).post(rules_create))
        .route("/v1/rules/:rule_id", put(rules_update).delete(rules_delete))
        .route("/v1/ingest/auto-load", post(ingest_auto_load))
        .route("/v1/ingest/upload", post(ingest_upload))
        .route("/v1/activity", get(activity_list))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let state = ServiceState { api: RuleHubApi::new(args.db) };
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn db_schema_version(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<rulehub_store_sqlite::SchemaStatus>>, ServiceError> {
    let status = state.api.schema_status().map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(status)))
}

async fn db_migrate(
    State(state): State<ServiceState>,
    Json(request): Json<MigrateRequest>,
) -> Result<Json<ServiceEnvelope<rulehub_api::MigrateResult>>, ServiceError> {
    let result =
        state.api.migrate(request.dry_run).map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(result)))
}

async fn rules_list(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<Vec<RuleRecord>>>, ServiceError> {
    let records = state.api.list_rules().map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(records)))
}

async fn rules_create(
    State(state): State<ServiceState>,
    Json(request): Json<CreateRuleRequest>,
) -> Result<Json<ServiceEnvelope<RuleRecord>>, ServiceError> {
    let record =
        state.api.create_rule(request).map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(record)))
}

async fn rules_update(
    State(state): State<ServiceState>,
    Path(rule_id): Path<String>,
    Json(body): Json<UpdateRuleBody>,
) -> Result<Json<ServiceEnvelope<UpdateRuleResponse>>, ServiceError> {
    let id = parse_rule_id(&rule_id)?;
    let updated = state
        .api
        .update_rule(UpdateRuleRequest {
            actor: body.actor,
            id,
            template_name: body.template_name,
            benefit_type: body.benefit_type,
            business_area: body.business_area,
            sub_business_area: body.sub_business_area,
            description: body.description,
            version: body.version,
            effective_date: body.effective_date,
            status: body.status,
            category: body.category,
            language: body.language,
            repeater_type: body.repeater_type,
            published: body.published,
            tags: body.tags,
        })
        .map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(UpdateRuleResponse { found: updated.is_some(), rule: updated })))
}

async fn rules_delete(
    State(state): State<ServiceState>,
    Path(rule_id): Path<String>,
    Json(body): Json<DeleteRuleBody>,
) -> Result<Json<ServiceEnvelope<DeleteRuleResponse>>, ServiceError> {
    let id = parse_rule_id(&rule_id)?;
    let deleted =
        state.api.delete_rule(id, &body.actor).map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(DeleteRuleResponse { rule_id: id.to_string(), deleted })))
}

async fn ingest_auto_load(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<IngestReport>>, ServiceError> {
    let report = state.api.auto_load().map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(report)))
}

async fn ingest_upload(
    State(state): State<ServiceState>,
    Json(request): Json<UploadRequest>,
) -> Result<Json<ServiceEnvelope<IngestReport>>, ServiceError> {
    let report = state
        .api
        .upload(request.descriptors, &request.actor)
        .map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(report)))
}

async fn activity_list(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<Vec<rulehub_core::ActivityEntry>>>, ServiceError> {
    let entries = state.api.list_activity().map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(entries)))
}

fn parse_rule_id(value: &str) -> Result<RuleId, ServiceError> {
    let parsed = Ulid::from_string(value)
        .map_err(|err| ServiceState::error(format!("invalid ULID: {value}: {err}")))?;
    Ok(RuleId(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use http::Request;
    use tower::ServiceExt;

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("rulehub-service-{}.sqlite3", ulid::Ulid::new()))
    }

    async fn response_json(response: Response) -> serde_json::Value {
        let bytes = match to_bytes(response.into_body(), 1024 * 1024).await {
            Ok(bytes) => bytes,
            Err(err) => panic!("failed to read response body: {err}"),
        };
        let body = match String::from_utf8(bytes.to_vec()) {
            Ok(body) => body,
            Err(err) => panic!("response body is not UTF-8: {err}"),
        };
        match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(err) => panic!("response body is not JSON: {err}; body={body}"),
        }
    }

    async fn send_json(router: Router, method: &str, uri: &str, payload: serde_json::Value) -> Response {
        match router
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .method(method)
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(payload.to_string()))
                    .unwrap_or_else(|err| panic!("failed to build request: {err}")),
            )
            .await
        {
            Ok(response) => response,
            Err(err) => panic!("router request failed: {err}"),
        }
    }

    async fn send_empty(router: Router, method: &str, uri: &str) -> Response {
        match router
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .method(method)
                    .body(axum::body::Body::empty())
                    .unwrap_or_else(|err| panic!("failed to build request: {err}")),
            )
            .await
        {
            Ok(response) => response,
            Err(err) => panic!("router request failed: {err}"),
        }
    }

    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let state = ServiceState { api: RuleHubApi::new(unique_temp_db_path()) };
        let router = app(state);

        let response = send_empty(router, "GET", "/v1/health").await;
        assert_eq!(response.status(), StatusCode::OK);

        let value = response_json(response).await;
        assert_eq!(
            value.get("service_contract_version").and_then(serde_json::Value::as_str),
            Some(SERVICE_CONTRACT_VERSION)
        );
        assert_eq!(
            value.get("api_contract_version").and_then(serde_json::Value::as_str),
            Some(API_CONTRACT_VERSION)
        );
    }

    #[tokio::test]
    async fn openapi_endpoint_returns_versioned_artifact() {
        let state = ServiceState { api: RuleHubApi::new(unique_temp_db_path()) };
        let router = app(state);

        let response = send_empty(router, "GET", "/v1/openapi").await;
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = match to_bytes(response.into_body(), 1024 * 1024).await {
            Ok(bytes) => bytes,
            Err(err) => panic!("failed to read response body: {err}"),
        };
        let body = match String::from_utf8(bytes.to_vec()) {
            Ok(body) => body,
            Err(err) => panic!("response body is not UTF-8: {err}"),
        };
        assert!(body.contains("openapi: 3.1.0"));
        assert!(body.contains("version: service.v1"));
        assert!(body.contains("/v1/ingest/upload"));
        assert!(body.contains("/v1/activity"));
    }

    #[tokio::test]
    async fn upload_flow_reconciles_and_records_activity() {
        let db_path = unique_temp_db_path();
        let state = ServiceState { api: RuleHubApi::new(db_path.clone()) };
        let router = app(state);

        let create_payload = serde_json::json!({
            "actor": "editor",
            "template_name": "Medicare Advantage",
            "benefit_type": "Medical",
            "business_area": "Enrollment",
            "sub_business_area": "Renewals",
            "description": "service fixture",
            "version": null,
            "effective_date": null,
            "status": null,
            "category": null,
            "language": null,
            "repeater_type": null,
            "published": false,
            "tags": []
        });
        let create_response =
            send_json(router.clone(), "POST", "/v1/rules", create_payload).await;
        assert_eq!(create_response.status(), StatusCode::OK);

        let upload_payload = serde_json::json!({
            "actor": "analyst",
            "descriptors": [
                {
                    "title": "MEDICARE ADVANTAGE ANNUAL NOTICE",
                    "benefit_type": "Medical",
                    "business_area": "Enrollment",
                    "sub_business_area": "Renewals",
                    "description": "updated by upload"
                },
                {
                    "title": "Hearing Aid Allowance",
                    "benefit_type": "Hearing",
                    "business_area": "Member Services",
                    "sub_business_area": "Correspondence",
                    "description": "new benefit notice"
                }
            ]
        });
        let upload_response =
            send_json(router.clone(), "POST", "/v1/ingest/upload", upload_payload).await;
        assert_eq!(upload_response.status(), StatusCode::OK);

        let upload_value = response_json(upload_response).await;
        let result = upload_value
            .get("data")
            .and_then(|data| data.get("result"))
            .unwrap_or_else(|| panic!("missing data.result in response: {upload_value}"));
        assert_eq!(result.get("matched").and_then(serde_json::Value::as_i64), Some(1));
        assert_eq!(result.get("created").and_then(serde_json::Value::as_i64), Some(1));

        let rules_response = send_empty(router.clone(), "GET", "/v1/rules").await;
        assert_eq!(rules_response.status(), StatusCode::OK);
        let rules_value = response_json(rules_response).await;
        let rules = rules_value
            .get("data")
            .and_then(serde_json::Value::as_array)
            .unwrap_or_else(|| panic!("data should be an array: {rules_value}"));
        assert_eq!(rules.len(), 2);
        assert_eq!(
            rules[0].get("description").and_then(serde_json::Value::as_str),
            Some("updated by upload")
        );

        let activity_response = send_empty(router, "GET", "/v1/activity").await;
        let activity_value = response_json(activity_response).await;
        let entries = activity_value
            .get("data")
            .and_then(serde_json::Value::as_array)
            .unwrap_or_else(|| panic!("data should be an array: {activity_value}"));
        assert_eq!(entries.len(), 3);

        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test]
    async fn rule_update_and_delete_handle_unknown_ids() {
        let db_path = unique_temp_db_path();
        let state = ServiceState { api: RuleHubApi::new(db_path.clone()) };
        let router = app(state);

        let missing = RuleId::new();
        let update_payload = serde_json::json!({
            "actor": "editor",
            "description": "should not apply"
        });
        let update_response = send_json(
            router.clone(),
            "PUT",
            &format!("/v1/rules/{missing}"),
            update_payload,
        )
        .await;
        assert_eq!(update_response.status(), StatusCode::OK);
        let update_value = response_json(update_response).await;
        assert_eq!(
            update_value
                .get("data")
                .and_then(|data| data.get("found"))
                .and_then(serde_json::Value::as_bool),
            Some(false)
        );

        let delete_payload = serde_json::json!({ "actor": "editor" });
        let delete_response = send_json(
            router.clone(),
            "DELETE",
            &format!("/v1/rules/{missing}"),
            delete_payload,
        )
        .await;
        assert_eq!(delete_response.status(), StatusCode::OK);
        let delete_value = response_json(delete_response).await;
        assert_eq!(
            delete_value
                .get("data")
                .and_then(|data| data.get("deleted"))
                .and_then(serde_json::Value::as_bool),
            Some(false)
        );

        let bad_id_response = send_json(
            router,
            "PUT",
            "/v1/rules/not-a-ulid",
            serde_json::json!({ "actor": "editor" }),
        )
        .await;
        assert_eq!(bad_id_response.status(), StatusCode::BAD_REQUEST);

        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test]
    async fn auto_load_endpoint_seeds_collection() {
        let db_path = unique_temp_db_path();
        let state = ServiceState { api: RuleHubApi::new(db_path.clone()) };
        let router = app(state);

        let response = send_empty(router.clone(), "POST", "/v1/ingest/auto-load").await;
        assert_eq!(response.status(), StatusCode::OK);
        let value = response_json(response).await;
        assert_eq!(
            value
                .get("data")
                .and_then(|data| data.get("actor"))
                .and_then(serde_json::Value::as_str),
            Some("auto-loader")
        );
        assert_eq!(
            value
                .get("data")
                .and_then(|data| data.get("total_records"))
                .and_then(serde_json::Value::as_i64),
            Some(5)
        );

        let _ = std::fs::remove_file(&db_path);
    }
}
