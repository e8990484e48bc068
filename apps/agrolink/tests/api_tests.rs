//! Integration tests for the AgroLink HTTP API.
//!
//! Uses axum-test to drive the router without starting a real server.

// Allow unwrap and panic in tests - these are standard for test code
// Allow holding MutexGuard across await - tests touching env vars are
// serialized intentionally
#![allow(clippy::unwrap_used, clippy::panic, clippy::await_holding_lock)]

use agrolink::api::{
    AlertsResponse, AppState, CancelResponse, ConversionResponse, ErrorResponse, HealthResponse,
    PendenciaResponse, SwapResponse, create_router,
};
use agrolink::config::ServerConfig;
use agrolink::documents::{DocumentPurger, FsDocumentPurger};
use agrolink_core::{
    ClientId, DashboardStats, ManualClock, Pipeline, ProjectStatus, ProjectView, Proposal,
    ProposalStatus, RequirementDefinition, Stage, StageCatalog, StorageBackend, Summary,
};
use axum::http::{HeaderValue, StatusCode, header};
use axum_test::{TestResponse, TestServer};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Serializes tests, since the router reads its security settings from env vars.
static ENV_TEST_MUTEX: Mutex<()> = Mutex::new(());

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

struct TestGuard {
    _guard: std::sync::MutexGuard<'static, ()>,
}

impl Drop for TestGuard {
    fn drop(&mut self) {
        clear_env();
    }
}

fn clear_env() {
    // SAFETY: Tests run sequentially under ENV_TEST_MUTEX, so no concurrent env access.
    unsafe {
        std::env::remove_var("AGROLINK_API_KEY");
        std::env::remove_var("AGROLINK_RATE_LIMIT");
    }
}

struct TestApp {
    server: TestServer,
    clock: Arc<ManualClock>,
    uploads: TempDir,
    _guard: TestGuard,
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).single().unwrap()
}

fn lock_env() -> TestGuard {
    let guard = ENV_TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();
    TestGuard { _guard: guard }
}

/// In-memory pipeline seeded with the default catalog, on a manual clock.
fn seeded_pipeline() -> (Arc<ManualClock>, Pipeline) {
    let clock = Arc::new(ManualClock::new(t0()));
    let pipeline = Pipeline::with_clock(StorageBackend::default(), clock.clone()).unwrap();
    pipeline
        .seed_catalog(&StageCatalog::default_catalog())
        .unwrap();
    (clock, pipeline)
}

fn build_app(guard: TestGuard, purger: Option<Arc<dyn DocumentPurger>>) -> TestApp {
    let (clock, pipeline) = seeded_pipeline();
    let uploads = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        upload_dir: uploads.path().to_path_buf(),
        ..ServerConfig::default()
    };
    let purger =
        purger.unwrap_or_else(|| Arc::new(FsDocumentPurger::new(uploads.path().to_path_buf())));
    let state = AppState::with_purger(pipeline, config, purger);
    TestApp {
        server: TestServer::new(create_router(state)).unwrap(),
        clock,
        uploads,
        _guard: guard,
    }
}

fn create_test_app() -> TestApp {
    build_app(lock_env(), None)
}

fn project_body(client: u64) -> serde_json::Value {
    json!({
        "client_id": client,
        "project_type": 1,
        "institution_id": 3,
        "credit_amount": 15_000_000
    })
}

async fn create_project(app: &TestApp, client: u64) -> ProjectView {
    let response = app.server.post("/projects").json(&project_body(client)).await;
    response.assert_status(StatusCode::CREATED);
    response.json()
}

async fn active_stages(app: &TestApp) -> Vec<Stage> {
    app.server.get("/etapas").await.json()
}

fn assert_error(response: &TestResponse, status: StatusCode, kind: &str, code: &str) {
    response.assert_status(status);
    let error: ErrorResponse = response.json();
    assert_eq!(error.kind, kind);
    assert_eq!(error.code, code);
    assert!(!error.message.is_empty());
}

// =============================================================================
// HEALTH ENDPOINT TESTS
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_app();

    let response = app.server.get("/health").await;

    response.assert_status_ok();
    let health: HealthResponse = response.json();
    assert_eq!(health.status, "ok");
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
}

// =============================================================================
// STAGE (ETAPA) TESTS
// =============================================================================

#[tokio::test]
async fn test_stages_listed_in_order() {
    let app = create_test_app();

    let stages = active_stages(&app).await;

    assert_eq!(stages.len(), 7);
    assert_eq!(stages[0].name, "Cadastro");
    assert_eq!(stages[6].name, "Projeto Creditado");
    assert!(stages.windows(2).all(|w| w[0].order < w[1].order));
}

#[tokio::test]
async fn test_create_stage_duplicate_order_rejected() {
    let app = create_test_app();

    let response = app
        .server
        .post("/etapas")
        .json(&json!({"name": "Vistoria", "order": 3}))
        .await;
    assert_error(&response, StatusCode::BAD_REQUEST, "validation", "duplicate_stage_order");

    let response = app
        .server
        .post("/etapas")
        .json(&json!({"name": "Vistoria", "order": 8}))
        .await;
    response.assert_status(StatusCode::CREATED);
    let stage: Stage = response.json();
    assert_eq!(stage.order, 8);
    assert_eq!(active_stages(&app).await.last().unwrap().name, "Vistoria");
}

#[tokio::test]
async fn test_deactivated_stage_hidden_from_active_list() {
    let app = create_test_app();
    let stages = active_stages(&app).await;
    let target = stages[2].id;

    let response = app.server.delete(&format!("/etapas/{}", target)).await;
    response.assert_status_ok();
    let stage: Stage = response.json();
    assert!(!stage.active);

    assert!(active_stages(&app).await.iter().all(|s| s.id != target));
    let all: Vec<Stage> = app.server.get("/etapas/all").await.json();
    assert_eq!(all.len(), 7);

    let response = app
        .server
        .put(&format!("/etapas/{}", target))
        .json(&json!({"name": "Projeto Técnico", "active": true}))
        .await;
    response.assert_status_ok();
    let stage: Stage = response.json();
    assert!(stage.active);
    assert_eq!(stage.name, "Projeto Técnico");
}

#[tokio::test]
async fn test_rejected_stage_update_keeps_stage() {
    let app = create_test_app();
    let victim = active_stages(&app).await[1].clone();

    app.server
        .delete(&format!("/etapas/{}", victim.id))
        .await
        .assert_status_ok();
    app.server
        .post("/etapas")
        .json(&json!({"name": "Substituta", "order": victim.order}))
        .await
        .assert_status(StatusCode::CREATED);

    let response = app
        .server
        .put(&format!("/etapas/{}", victim.id))
        .json(&json!({"name": "Renomeada", "active": true}))
        .await;
    assert_error(
        &response,
        StatusCode::BAD_REQUEST,
        "validation",
        "duplicate_stage_order",
    );

    let all: Vec<Stage> = app.server.get("/etapas/all").await.json();
    let stored = all.iter().find(|s| s.id == victim.id).unwrap();
    assert_eq!(stored.name, victim.name);
    assert!(!stored.active);
}

#[tokio::test]
async fn test_swap_stage_orders() {
    let app = create_test_app();
    let stages = active_stages(&app).await;
    let (a, b) = (stages[1].clone(), stages[2].clone());

    let response = app
        .server
        .put(&format!("/etapas/{}/swap/{}", a.id, b.id))
        .await;
    response.assert_status_ok();
    let swapped: SwapResponse = response.json();
    assert_eq!(swapped.stages.len(), 2);

    let after = active_stages(&app).await;
    assert_eq!(after[1].id, b.id);
    assert_eq!(after[2].id, a.id);
    assert_eq!(after[1].order, a.order);
}

#[tokio::test]
async fn test_requirements_for_stage() {
    let app = create_test_app();
    let documents = active_stages(&app).await[1].id;

    let response = app
        .server
        .get(&format!("/etapas/{}/requisitos", documents))
        .add_query_param("project_type", 1)
        .await;
    response.assert_status_ok();
    let requirements: Vec<RequirementDefinition> = response.json();
    let keys: Vec<&str> = requirements.iter().map(|r| r.field_key.as_str()).collect();
    assert_eq!(keys.len(), 3);
    assert!(keys.contains(&"car"));

    let response = app
        .server
        .post(&format!("/etapas/{}/requisitos", documents))
        .json(&json!({"name": "ITR", "field_key": "itr", "project_types": [2]}))
        .await;
    response.assert_status(StatusCode::CREATED);
    let itr: RequirementDefinition = response.json();

    // Type 1 does not see a type-2-only item.
    let for_type_1: Vec<RequirementDefinition> = app
        .server
        .get(&format!("/etapas/{}/requisitos", documents))
        .add_query_param("project_type", 1)
        .await
        .json();
    assert_eq!(for_type_1.len(), 3);
    let for_type_2: Vec<RequirementDefinition> = app
        .server
        .get(&format!("/etapas/{}/requisitos", documents))
        .add_query_param("project_type", 2)
        .await
        .json();
    assert_eq!(for_type_2.len(), 4);

    app.server
        .delete(&format!("/requisitos/{}", itr.id))
        .await
        .assert_status_ok();
    let for_type_2: Vec<RequirementDefinition> = app
        .server
        .get(&format!("/etapas/{}/requisitos", documents))
        .add_query_param("project_type", 2)
        .await
        .json();
    assert_eq!(for_type_2.len(), 3);
}

#[tokio::test]
async fn test_requirement_bad_field_key_rejected() {
    let app = create_test_app();
    let documents = active_stages(&app).await[1].id;

    let response = app
        .server
        .post(&format!("/etapas/{}/requisitos", documents))
        .json(&json!({"name": "Matrícula", "field_key": "Matrícula do Imóvel"}))
        .await;
    assert_error(&response, StatusCode::BAD_REQUEST, "validation", "invalid_field_key");

    let response = app
        .server
        .post(&format!("/etapas/{}/requisitos", documents))
        .json(&json!({"name": "CAR de novo", "field_key": "car"}))
        .await;
    assert_error(&response, StatusCode::BAD_REQUEST, "validation", "duplicate_field_key");
}

#[tokio::test]
async fn test_requirements_unknown_stage_not_found() {
    let app = create_test_app();

    let response = app
        .server
        .get("/etapas/999/requisitos")
        .add_query_param("project_type", 1)
        .await;
    assert_error(&response, StatusCode::NOT_FOUND, "not_found", "stage_not_found");
}

// =============================================================================
// PROJECT LIFECYCLE TESTS
// =============================================================================

#[tokio::test]
async fn test_create_project_starts_on_first_stage() {
    let app = create_test_app();
    let stages = active_stages(&app).await;

    let view = create_project(&app, 10).await;

    assert_eq!(view.project.current_stage_id(), stages[0].id);
    assert_eq!(view.project.status(), ProjectStatus::Active);
    assert_eq!(view.project.stage_history().len(), 1);
    assert!(!view.tem_pendencia);
    assert_eq!(view.days_in_stage, Some(0));

    let fetched: ProjectView = app
        .server
        .get(&format!("/projects/{}", view.project.id()))
        .await
        .json();
    assert_eq!(fetched.project, view.project);
}

#[tokio::test]
async fn test_create_project_validation() {
    let app = create_test_app();

    let response = app
        .server
        .post("/projects")
        .json(&json!({"client_id": 1, "project_type": 1, "institution_id": 1, "credit_amount": 0}))
        .await;
    assert_error(&response, StatusCode::BAD_REQUEST, "validation", "non_positive_amount");
}

#[tokio::test]
async fn test_one_active_project_per_client() {
    let app = create_test_app();
    create_project(&app, 10).await;

    let response = app.server.post("/projects").json(&project_body(10)).await;
    assert_error(&response, StatusCode::CONFLICT, "state", "client_has_active_project");

    create_project(&app, 11).await;
}

#[tokio::test]
async fn test_project_not_found() {
    let app = create_test_app();

    let response = app.server.get("/projects/404").await;
    assert_error(&response, StatusCode::NOT_FOUND, "not_found", "project_not_found");

    let response = app.server.put("/projects/404/next-stage").await;
    assert_error(&response, StatusCode::NOT_FOUND, "not_found", "project_not_found");
}

#[tokio::test]
async fn test_advance_blocked_by_pendency_until_resolved() {
    let app = create_test_app();
    let stages = active_stages(&app).await;
    let project = create_project(&app, 10).await;
    let id = project.project.id();

    let response = app
        .server
        .post(&format!("/projects/{}/pendencia", id))
        .json(&json!({"descricao": "Falta CPF do cônjuge"}))
        .await;
    response.assert_status(StatusCode::CREATED);
    let raised: PendenciaResponse = response.json();
    assert_eq!(raised.index, 0);
    assert!(raised.project.tem_pendencia);

    let response = app.server.put(&format!("/projects/{}/next-stage", id)).await;
    assert_error(&response, StatusCode::CONFLICT, "state", "blocked_by_pendency");
    let unchanged: ProjectView = app.server.get(&format!("/projects/{}", id)).await.json();
    assert_eq!(unchanged.project.current_stage_id(), stages[0].id);

    let response = app
        .server
        .put(&format!("/projects/{}/pendencia/0/resolve", id))
        .await;
    response.assert_status_ok();
    let resolved: ProjectView = response.json();
    assert!(!resolved.tem_pendencia);

    let response = app
        .server
        .put(&format!("/projects/{}/pendencia/0/resolve", id))
        .await;
    assert_error(&response, StatusCode::CONFLICT, "state", "pendency_already_resolved");

    let response = app
        .server
        .put(&format!("/projects/{}/pendencia/5/resolve", id))
        .await;
    assert_error(&response, StatusCode::NOT_FOUND, "not_found", "pendency_not_found");

    app.clock.advance(Duration::days(3));
    let response = app.server.put(&format!("/projects/{}/next-stage", id)).await;
    response.assert_status_ok();
    let advanced: ProjectView = response.json();
    assert_eq!(advanced.project.current_stage_id(), stages[1].id);
    assert_eq!(advanced.project.stage_history()[0].duration_days, Some(3));
}

#[tokio::test]
async fn test_advance_with_target_body() {
    let app = create_test_app();
    let stages = active_stages(&app).await;
    let id = create_project(&app, 10).await.project.id();

    // Skipping ahead is not allowed.
    let response = app
        .server
        .put(&format!("/projects/{}/next-stage", id))
        .json(&json!({"target_stage_id": stages[3].id}))
        .await;
    assert_error(&response, StatusCode::CONFLICT, "state", "invalid_target");

    let response = app
        .server
        .put(&format!("/projects/{}/next-stage", id))
        .json(&json!({"target_stage_id": stages[1].id}))
        .await;
    response.assert_status_ok();
    let view: ProjectView = response.json();
    assert_eq!(view.project.current_stage_id(), stages[1].id);

    let response = app
        .server
        .put(&format!("/projects/{}/next-stage", id))
        .bytes("{not json".into())
        .content_type("application/json")
        .await;
    assert_error(&response, StatusCode::BAD_REQUEST, "validation", "invalid_body");
}

#[tokio::test]
async fn test_walk_to_archive() {
    let app = create_test_app();
    let id = create_project(&app, 10).await.project.id();

    let response = app.server.put(&format!("/projects/{}/archive", id)).await;
    assert_error(&response, StatusCode::CONFLICT, "state", "not_at_final_stage");

    for _ in 0..6 {
        app.clock.advance(Duration::days(2));
        app.server
            .put(&format!("/projects/{}/next-stage", id))
            .await
            .assert_status_ok();
    }

    let response = app.server.put(&format!("/projects/{}/next-stage", id)).await;
    assert_error(&response, StatusCode::CONFLICT, "state", "no_next_stage");

    let response = app.server.put(&format!("/projects/{}/archive", id)).await;
    response.assert_status_ok();
    let archived: ProjectView = response.json();
    assert_eq!(archived.project.status(), ProjectStatus::Archived);
    assert!(archived.project.stage_history().iter().all(|e| !e.is_open()));
    assert_eq!(archived.project.stage_history().len(), 7);

    let response = app
        .server
        .post(&format!("/projects/{}/pendencia", id))
        .json(&json!({"descricao": "tarde demais"}))
        .await;
    assert_error(&response, StatusCode::CONFLICT, "state", "not_active");
}

#[tokio::test]
async fn test_document_checklist_patch() {
    let app = create_test_app();
    let id = create_project(&app, 10).await.project.id();
    app.server
        .put(&format!("/projects/{}/next-stage", id))
        .await
        .assert_status_ok();

    let response = app
        .server
        .put(&format!("/projects/{}/documents", id))
        .json(&json!({"car": true, "saldo_iagro": false}))
        .await;
    response.assert_status_ok();
    let view: ProjectView = response.json();
    let checklist = view.checklist.unwrap();
    assert_eq!(checklist.total, 3);
    assert_eq!(checklist.completed, 1);

    let response = app
        .server
        .put(&format!("/projects/{}/documents", id))
        .json(&json!({"projeto_assinado": true}))
        .await;
    assert_error(&response, StatusCode::BAD_REQUEST, "validation", "unknown_field_key");
}

#[tokio::test]
async fn test_observacao_and_contract() {
    let app = create_test_app();
    let id = create_project(&app, 10).await.project.id();

    let response = app
        .server
        .post(&format!("/projects/{}/observacao", id))
        .json(&json!({"texto": "Cliente prefere contato por WhatsApp", "author_id": 4}))
        .await;
    response.assert_status(StatusCode::CREATED);
    let view: ProjectView = response.json();
    let notes = &view.project.stage_history()[0].observations;
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].texto, "Cliente prefere contato por WhatsApp");

    let response = app
        .server
        .post(&format!("/projects/{}/observacao", id))
        .json(&json!({"texto": "   ", "author_id": 4}))
        .await;
    assert_error(&response, StatusCode::BAD_REQUEST, "validation", "empty_text");

    let response = app
        .server
        .put(&format!("/projects/{}/contract", id))
        .json(&json!({"contract_number": "40/00123-9", "service_amount": 45_000}))
        .await;
    response.assert_status_ok();
    let view: ProjectView = response.json();
    assert_eq!(view.project.contract_number(), Some("40/00123-9"));
}

// =============================================================================
// CANCELLATION AND DOCUMENT PURGE TESTS
// =============================================================================

#[tokio::test]
async fn test_cancel_purges_client_documents() {
    let app = create_test_app();
    let id = create_project(&app, 42).await.project.id();
    let client_dir = app.uploads.path().join("42");
    std::fs::create_dir_all(&client_dir).unwrap();
    std::fs::write(client_dir.join("car.pdf"), b"%PDF-1.4").unwrap();

    let response = app
        .server
        .put(&format!("/projects/{}/cancel", id))
        .json(&json!({"motivo": "Cliente desistiu do financiamento"}))
        .await;
    response.assert_status_ok();
    let cancelled: CancelResponse = response.json();
    assert!(cancelled.documents_purged);
    assert_eq!(cancelled.project.project.status(), ProjectStatus::Cancelled);
    assert_eq!(
        cancelled.project.project.cancel_reason(),
        Some("Cliente desistiu do financiamento")
    );
    assert!(!client_dir.exists());

    let response = app
        .server
        .put(&format!("/projects/{}/cancel", id))
        .json(&json!({"motivo": "de novo"}))
        .await;
    assert_error(&response, StatusCode::CONFLICT, "state", "not_active");

    // The client may start again once nothing is active.
    create_project(&app, 42).await;
}

#[tokio::test]
async fn test_cancel_requires_reason() {
    let app = create_test_app();
    let id = create_project(&app, 42).await.project.id();

    let response = app
        .server
        .put(&format!("/projects/{}/cancel", id))
        .json(&json!({"motivo": ""}))
        .await;
    assert_error(&response, StatusCode::BAD_REQUEST, "validation", "empty_text");

    let response = app
        .server
        .put(&format!("/projects/{}/cancel", id))
        .json(&json!({}))
        .await;
    assert_error(&response, StatusCode::BAD_REQUEST, "validation", "invalid_body");

    let view: ProjectView = app.server.get(&format!("/projects/{}", id)).await.json();
    assert_eq!(view.project.status(), ProjectStatus::Active);
}

struct BrokenPurger;

impl DocumentPurger for BrokenPurger {
    fn purge_client(&self, _client: ClientId) -> std::io::Result<bool> {
        Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only volume",
        ))
    }
}

#[tokio::test]
async fn test_purge_failure_keeps_cancellation() {
    let app = build_app(lock_env(), Some(Arc::new(BrokenPurger)));
    let id = create_project(&app, 42).await.project.id();

    let response = app
        .server
        .put(&format!("/projects/{}/cancel", id))
        .json(&json!({"motivo": "Crédito negado"}))
        .await;
    response.assert_status_ok();
    let cancelled: CancelResponse = response.json();
    assert!(!cancelled.documents_purged);

    let view: ProjectView = app.server.get(&format!("/projects/{}", id)).await.json();
    assert_eq!(view.project.status(), ProjectStatus::Cancelled);
}

// =============================================================================
// PROPOSAL (PROPOSTA) TESTS
// =============================================================================

fn proposal_body(client: u64) -> serde_json::Value {
    json!({
        "client_id": client,
        "project_type": 1,
        "institution_id": 2,
        "credit_amount": 8_000_000
    })
}

async fn create_proposal(app: &TestApp, client: u64) -> Proposal {
    let response = app.server.post("/propostas").json(&proposal_body(client)).await;
    response.assert_status(StatusCode::CREATED);
    response.json()
}

#[tokio::test]
async fn test_convert_proposal() {
    let app = create_test_app();
    let stages = active_stages(&app).await;
    let proposal = create_proposal(&app, 20).await;
    assert_eq!(proposal.status(), ProposalStatus::Open);

    let response = app
        .server
        .put(&format!("/propostas/{}/converter", proposal.id()))
        .await;
    response.assert_status_ok();
    let converted: ConversionResponse = response.json();
    assert_eq!(converted.proposal.status(), ProposalStatus::Converted);
    assert_eq!(converted.proposal.project_id(), Some(converted.project.project.id()));
    assert_eq!(converted.project.project.source_proposal(), Some(proposal.id()));
    assert_eq!(converted.project.project.current_stage_id(), stages[0].id);
    assert_eq!(converted.project.project.client_id(), ClientId(20));

    let response = app
        .server
        .put(&format!("/propostas/{}/converter", proposal.id()))
        .await;
    assert_error(&response, StatusCode::CONFLICT, "state", "proposal_not_open");

    let all: Vec<serde_json::Value> = app
        .server
        .get("/projects")
        .add_query_param("status", "all")
        .await
        .json();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn test_withdraw_proposal() {
    let app = create_test_app();
    let proposal = create_proposal(&app, 20).await;

    let response = app
        .server
        .put(&format!("/propostas/{}/desistir", proposal.id()))
        .json(&json!({"motivo": " "}))
        .await;
    assert_error(&response, StatusCode::BAD_REQUEST, "validation", "empty_text");

    let response = app
        .server
        .put(&format!("/propostas/{}/desistir", proposal.id()))
        .json(&json!({"motivo": "Optou por outro banco"}))
        .await;
    response.assert_status_ok();
    let withdrawn: Proposal = response.json();
    assert_eq!(withdrawn.status(), ProposalStatus::Withdrawn);
    assert_eq!(withdrawn.withdraw_reason(), Some("Optou por outro banco"));

    let response = app
        .server
        .put(&format!("/propostas/{}/converter", proposal.id()))
        .await;
    assert_error(&response, StatusCode::CONFLICT, "state", "proposal_not_open");
}

#[tokio::test]
async fn test_list_proposals_by_status() {
    let app = create_test_app();
    let first = create_proposal(&app, 20).await;
    create_proposal(&app, 21).await;
    app.server
        .put(&format!("/propostas/{}/converter", first.id()))
        .await
        .assert_status_ok();

    let open: Vec<Proposal> = app
        .server
        .get("/propostas")
        .add_query_param("status", "open")
        .await
        .json();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].client_id(), ClientId(21));

    let all: Vec<Proposal> = app.server.get("/propostas").await.json();
    assert_eq!(all.len(), 2);

    let response = app
        .server
        .get("/propostas")
        .add_query_param("status", "pendente")
        .await;
    assert_error(&response, StatusCode::BAD_REQUEST, "validation", "invalid_query");

    let response = app.server.get("/propostas/77").await;
    assert_error(&response, StatusCode::NOT_FOUND, "not_found", "proposal_not_found");
}

#[tokio::test]
async fn test_stale_proposal_alerts() {
    let app = create_test_app();
    let old = create_proposal(&app, 20).await;
    app.clock.advance(Duration::days(5));
    create_proposal(&app, 21).await;
    app.clock.advance(Duration::days(3));

    let alerts: AlertsResponse = app.server.get("/alerts/propostas").await.json();
    assert_eq!(alerts.threshold_days, 7);
    assert_eq!(alerts.alerts.len(), 1);
    assert_eq!(alerts.alerts[0].proposal.id(), old.id());
    assert_eq!(alerts.alerts[0].days_open, 8);

    let alerts: AlertsResponse = app
        .server
        .get("/alerts/propostas")
        .add_query_param("days", 3)
        .await
        .json();
    assert_eq!(alerts.alerts.len(), 2);
    assert_eq!(alerts.alerts[0].proposal.id(), old.id());
}

// =============================================================================
// REPORTING TESTS
// =============================================================================

#[tokio::test]
async fn test_dashboard_stats() {
    let app = create_test_app();
    let a = create_project(&app, 1).await.project.id();
    create_project(&app, 2).await;
    let c = create_project(&app, 3).await.project.id();
    create_proposal(&app, 4).await;

    app.server
        .post(&format!("/projects/{}/pendencia", a))
        .json(&json!({"descricao": "Falta matrícula"}))
        .await
        .assert_status(StatusCode::CREATED);
    app.server
        .put(&format!("/projects/{}/cancel", c))
        .json(&json!({"motivo": "Crédito negado"}))
        .await
        .assert_status_ok();

    let stats: DashboardStats = app.server.get("/dashboard/stats").await.json();
    assert_eq!(stats.active_projects, 2);
    assert_eq!(stats.started_this_month, 2);
    assert_eq!(stats.with_pendency, 1);
    assert_eq!(stats.total_active_credit.value(), 30_000_000);
    assert_eq!(stats.open_proposals, 1);
}

#[tokio::test]
async fn test_project_listing_filters() {
    let app = create_test_app();
    let stages = active_stages(&app).await;
    let a = create_project(&app, 1).await.project.id();
    create_project(&app, 2).await;
    let c = create_project(&app, 3).await.project.id();
    app.server
        .put(&format!("/projects/{}/next-stage", a))
        .await
        .assert_status_ok();
    app.server
        .put(&format!("/projects/{}/cancel", c))
        .json(&json!({"motivo": "Desistência"}))
        .await
        .assert_status_ok();

    let active: Vec<ProjectView> = app.server.get("/projects").await.json();
    assert_eq!(active.len(), 2);

    let all: Vec<ProjectView> = app
        .server
        .get("/projects")
        .add_query_param("status", "all")
        .await
        .json();
    assert_eq!(all.len(), 3);

    let cancelled: Vec<ProjectView> = app
        .server
        .get("/projects")
        .add_query_param("status", "cancelled")
        .await
        .json();
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].project.id(), c);

    let on_documents: Vec<ProjectView> = app
        .server
        .get("/projects")
        .add_query_param("stage", stages[1].id)
        .await
        .json();
    assert_eq!(on_documents.len(), 1);
    assert_eq!(on_documents[0].project.id(), a);

    let this_month: Vec<ProjectView> = app
        .server
        .get("/projects")
        .add_query_param("year", 2025)
        .add_query_param("month", 3)
        .await
        .json();
    assert_eq!(this_month.len(), 2);

    let response = app
        .server
        .get("/projects")
        .add_query_param("month", 13)
        .await;
    assert_error(&response, StatusCode::BAD_REQUEST, "validation", "invalid_query");
}

#[tokio::test]
async fn test_summary_report() {
    let app = create_test_app();
    let a = create_project(&app, 1).await.project.id();
    create_project(&app, 2).await;
    app.clock.advance(Duration::days(4));
    app.server
        .put(&format!("/projects/{}/next-stage", a))
        .await
        .assert_status_ok();

    let summary: Summary = app.server.get("/reports/summary").await.json();
    assert_eq!(summary.total, 2);
    assert_eq!(summary.by_stage.get("Cadastro"), Some(&1));
    assert_eq!(summary.by_stage.get("Coleta de Documentos"), Some(&1));
    assert_eq!(summary.by_status.get("active"), Some(&2));
    assert_eq!(summary.rows.len(), 2);
    assert!(summary.rows.iter().all(|r| r.total_duration_days == 4));
    assert_eq!(summary.rows[0].stage_name, "Coleta de Documentos");
}

// =============================================================================
// ERROR HANDLING TESTS
// =============================================================================

#[tokio::test]
async fn test_404_on_unknown_endpoint() {
    let app = create_test_app();

    app.server.get("/unknown").await.assert_status_not_found();
}

#[tokio::test]
async fn test_method_not_allowed() {
    let app = create_test_app();

    let response = app.server.post("/health").await;
    assert_eq!(response.status_code().as_u16(), 405);
}

#[tokio::test]
async fn test_invalid_json_body() {
    let app = create_test_app();

    let response = app
        .server
        .post("/projects")
        .bytes("not valid json".into())
        .content_type("application/json")
        .await;
    assert_error(&response, StatusCode::BAD_REQUEST, "validation", "invalid_body");
}

#[tokio::test]
async fn test_mistyped_body_field() {
    let app = create_test_app();
    let id = create_project(&app, 8).await.project.id();

    let response = app
        .server
        .post(&format!("/projects/{}/pendencia", id))
        .json(&json!({"descricao": 5}))
        .await;
    assert_error(&response, StatusCode::BAD_REQUEST, "validation", "invalid_body");

    let response = app
        .server
        .post("/propostas")
        .json(&json!({"client_id": 1}))
        .await;
    assert_error(&response, StatusCode::BAD_REQUEST, "validation", "invalid_body");
}

#[tokio::test]
async fn test_non_numeric_path_id() {
    let app = create_test_app();

    let response = app.server.put("/projects/abc/archive").await;
    assert_error(&response, StatusCode::BAD_REQUEST, "validation", "invalid_path");

    let response = app.server.put("/projects/1/pendencia/x/resolve").await;
    assert_error(&response, StatusCode::BAD_REQUEST, "validation", "invalid_path");
}

#[tokio::test]
async fn test_malformed_query_parameter() {
    let app = create_test_app();

    let response = app.server.get("/projects").add_query_param("year", "dois mil").await;
    assert_error(&response, StatusCode::BAD_REQUEST, "validation", "invalid_query");
}

// =============================================================================
// AUTHENTICATION MIDDLEWARE TESTS
// =============================================================================

/// Test app with `AGROLINK_API_KEY` set for as long as the app lives.
fn create_auth_test_app(api_key: &str) -> TestApp {
    let guard = lock_env();
    // SAFETY: Tests run sequentially under ENV_TEST_MUTEX, so no concurrent env access.
    unsafe { std::env::set_var("AGROLINK_API_KEY", api_key) };
    build_app(guard, None)
}

#[tokio::test]
async fn test_auth_valid_bearer_token() {
    let app = create_auth_test_app("chave-secreta-123");

    let response = app
        .server
        .get("/etapas")
        .add_header(
            header::AUTHORIZATION,
            "Bearer chave-secreta-123".parse::<HeaderValue>().unwrap(),
        )
        .await;

    response.assert_status_ok();
}

#[tokio::test]
async fn test_auth_invalid_token_rejected() {
    let app = create_auth_test_app("chave-correta");

    let response = app
        .server
        .get("/etapas")
        .add_header(
            header::AUTHORIZATION,
            "Bearer chave-errada".parse::<HeaderValue>().unwrap(),
        )
        .await;

    assert_eq!(response.status_code().as_u16(), 401);
}

#[tokio::test]
async fn test_auth_missing_header_rejected() {
    let app = create_auth_test_app("chave-obrigatoria");

    let response = app.server.post("/projects").json(&project_body(1)).await;

    assert_eq!(response.status_code().as_u16(), 401);
    let listed: Vec<ProjectView> = app
        .server
        .get("/projects")
        .add_header(
            header::AUTHORIZATION,
            "Bearer chave-obrigatoria".parse::<HeaderValue>().unwrap(),
        )
        .await
        .json();
    assert!(listed.is_empty());
}

#[tokio::test]
async fn test_auth_health_endpoint_bypasses_auth() {
    let app = create_auth_test_app("chave-do-balanceador");

    let response = app.server.get("/health").await;

    response.assert_status_ok();
}

// =============================================================================
// RATE LIMIT TESTS
// =============================================================================

#[tokio::test]
async fn test_rate_limit_rejects_burst() {
    let guard = lock_env();
    // SAFETY: Tests run sequentially under ENV_TEST_MUTEX, so no concurrent env access.
    unsafe { std::env::set_var("AGROLINK_RATE_LIMIT", "1") };
    let app = build_app(guard, None);

    app.server.get("/health").await.assert_status_ok();
    let response = app.server.get("/health").await;

    assert_eq!(response.status_code().as_u16(), 429);
}
