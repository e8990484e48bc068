//! # API Endpoint Handlers
//!
//! Every handler hands its engine call to the blocking thread pool via
//! [`run_engine`]; the engine takes std locks and may touch redb.

use super::{
    AppState,
    extract::{ApiJson, ApiPath, ApiQuery},
    types::{
        AdvanceRequest, AlertQuery, AlertsResponse, ApiError, CancelResponse, ConversionResponse,
        CreateRequirementRequest, CreateStageRequest, HealthResponse, ObservacaoRequest,
        PendenciaRequest, PendenciaResponse, ProjectListQuery, ProposalListQuery, ReasonRequest,
        RequirementsQuery, SwapResponse, UpdateStageRequest,
    },
};
use agrolink_core::{
    ContractDetails, DashboardStats, NewProposal, Pipeline, PipelineError, Project, ProjectId,
    ProjectSeed, ProjectView, Proposal, ProposalId, RequirementDefinition, RequirementId, Stage,
    StageId, Summary,
};
use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Run an engine call on the blocking pool.
async fn run_engine<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Pipeline) -> Result<T, PipelineError> + Send + 'static,
    T: Send + 'static,
{
    let pipeline = Arc::clone(&state.pipeline);
    tokio::task::spawn_blocking(move || f(&pipeline))
        .await
        .map_err(|e| ApiError::Internal(format!("engine task failed: {}", e)))?
        .map_err(ApiError::from)
}

/// Project plus derived fields, against the current registry.
fn view_of(pipeline: &Pipeline, project: &Project) -> ProjectView {
    project.view(&pipeline.registry(), pipeline.now())
}

// =============================================================================
// HEALTH
// =============================================================================

pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

// =============================================================================
// STAGES (ETAPAS)
// =============================================================================

/// Active stages in pipeline order.
pub async fn list_stages_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<Stage>>, ApiError> {
    let stages = run_engine(&state, |p| Ok(p.list_active_stages())).await?;
    Ok(Json(stages))
}

/// Every stage, inactive ones included.
pub async fn list_all_stages_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<Stage>>, ApiError> {
    let stages = run_engine(&state, |p| Ok(p.list_all_stages())).await?;
    Ok(Json(stages))
}

pub async fn create_stage_handler(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<CreateStageRequest>,
) -> Result<(StatusCode, Json<Stage>), ApiError> {
    let stage = run_engine(&state, move |p| p.create_stage(&request.name, request.order)).await?;
    tracing::info!(
        event = "stage_created",
        stage_id = %stage.id,
        order = stage.order,
        "Stage '{}' created",
        stage.name
    );
    Ok((StatusCode::CREATED, Json(stage)))
}

/// Rename and/or (re)activate a stage.
pub async fn update_stage_handler(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<u64>,
    ApiJson(request): ApiJson<UpdateStageRequest>,
) -> Result<Json<Stage>, ApiError> {
    let id = StageId(id);
    let stage = run_engine(&state, move |p| {
        p.update_stage(id, request.name.as_deref(), request.active)
    })
    .await?;
    tracing::info!(event = "stage_updated", stage_id = %id, active = stage.active);
    Ok(Json(stage))
}

/// Soft-delete a stage.
pub async fn deactivate_stage_handler(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<u64>,
) -> Result<Json<Stage>, ApiError> {
    let stage = run_engine(&state, move |p| p.deactivate_stage(StageId(id))).await?;
    tracing::info!(event = "stage_deactivated", stage_id = %stage.id);
    Ok(Json(stage))
}

pub async fn swap_stages_handler(
    State(state): State<AppState>,
    ApiPath((a, b)): ApiPath<(u64, u64)>,
) -> Result<Json<SwapResponse>, ApiError> {
    let (first, second) =
        run_engine(&state, move |p| p.swap_stage_order(StageId(a), StageId(b))).await?;
    tracing::info!(
        event = "stage_order_swapped",
        first = %first.id,
        second = %second.id,
        "Stage orders swapped: {} <-> {}",
        first.order,
        second.order
    );
    Ok(Json(SwapResponse {
        stages: vec![first, second],
    }))
}

/// Active requirements of a stage for one project type.
pub async fn list_requirements_handler(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<u64>,
    ApiQuery(query): ApiQuery<RequirementsQuery>,
) -> Result<Json<Vec<RequirementDefinition>>, ApiError> {
    let requirements = run_engine(&state, move |p| {
        p.requirements_for(StageId(id), query.project_type)
    })
    .await?;
    Ok(Json(requirements))
}

pub async fn create_requirement_handler(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<u64>,
    ApiJson(request): ApiJson<CreateRequirementRequest>,
) -> Result<(StatusCode, Json<RequirementDefinition>), ApiError> {
    let input = request.to_new_requirement();
    let requirement =
        run_engine(&state, move |p| p.create_requirement(StageId(id), input)).await?;
    tracing::info!(
        event = "requirement_created",
        stage_id = %requirement.stage_id,
        requirement_id = %requirement.id,
        field_key = %requirement.field_key
    );
    Ok((StatusCode::CREATED, Json(requirement)))
}

pub async fn deactivate_requirement_handler(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<u64>,
) -> Result<Json<RequirementDefinition>, ApiError> {
    let requirement =
        run_engine(&state, move |p| p.deactivate_requirement(RequirementId(id))).await?;
    tracing::info!(event = "requirement_deactivated", requirement_id = %requirement.id);
    Ok(Json(requirement))
}

// =============================================================================
// PROJECTS
// =============================================================================

pub async fn create_project_handler(
    State(state): State<AppState>,
    ApiJson(seed): ApiJson<ProjectSeed>,
) -> Result<(StatusCode, Json<ProjectView>), ApiError> {
    let view = run_engine(&state, move |p| {
        let project = p.create_project(seed)?;
        Ok(view_of(p, &project))
    })
    .await?;
    tracing::info!(
        event = "project_created",
        project_id = %view.project.id(),
        client_id = %view.project.client_id(),
        stage_id = %view.project.current_stage_id()
    );
    Ok((StatusCode::CREATED, Json(view)))
}

/// Filtered listing; active projects unless `status` says otherwise.
pub async fn list_projects_handler(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ProjectListQuery>,
) -> Result<Json<Vec<ProjectView>>, ApiError> {
    let filter = query.to_filter()?;
    let views = run_engine(&state, move |p| {
        let registry = p.registry();
        let now = p.now();
        Ok(p.list_projects(&filter)?
            .iter()
            .map(|project| project.view(&registry, now))
            .collect())
    })
    .await?;
    Ok(Json(views))
}

pub async fn get_project_handler(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<u64>,
) -> Result<Json<ProjectView>, ApiError> {
    let view = run_engine(&state, move |p| p.project_view(ProjectId(id))).await?;
    Ok(Json(view))
}

/// Move to the next stage, or to `target_stage_id` when the body names one.
///
/// The body is optional; an empty body means a plain advance.
pub async fn advance_handler(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<u64>,
    body: Bytes,
) -> Result<Json<ProjectView>, ApiError> {
    let request: AdvanceRequest = if body.iter().all(u8::is_ascii_whitespace) {
        AdvanceRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::InvalidBody(e.to_string()))?
    };
    let id = ProjectId(id);
    let (from, view) = run_engine(&state, move |p| {
        let (project, from) = match request.target_stage_id {
            Some(target) => p.advance_to(id, target)?,
            None => p.advance(id)?,
        };
        Ok((from, view_of(p, &project)))
    })
    .await?;
    tracing::info!(
        event = "stage_advanced",
        project_id = %id,
        from_stage = %from,
        to_stage = %view.project.current_stage_id()
    );
    Ok(Json(view))
}

pub async fn archive_handler(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<u64>,
) -> Result<Json<ProjectView>, ApiError> {
    let id = ProjectId(id);
    let view = run_engine(&state, move |p| {
        let project = p.archive(id)?;
        Ok(view_of(p, &project))
    })
    .await?;
    tracing::info!(event = "project_archived", project_id = %id);
    Ok(Json(view))
}

/// Cancel, then purge the client's documents.
///
/// The purge runs only after the cancellation is stored. A purge failure
/// is logged and reported as `documents_purged: false`.
pub async fn cancel_handler(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<u64>,
    ApiJson(request): ApiJson<ReasonRequest>,
) -> Result<Json<CancelResponse>, ApiError> {
    let id = ProjectId(id);
    let view = run_engine(&state, move |p| {
        let project = p.cancel(id, &request.motivo)?;
        Ok(view_of(p, &project))
    })
    .await?;
    tracing::info!(event = "project_cancelled", project_id = %id);

    let client = view.project.client_id();
    let purger = Arc::clone(&state.purger);
    let documents_purged = match tokio::task::spawn_blocking(move || purger.purge_client(client))
        .await
    {
        Ok(Ok(purged)) => {
            tracing::info!(
                event = "documents_purged",
                project_id = %id,
                client_id = %client,
                purged
            );
            purged
        }
        Ok(Err(e)) => {
            tracing::warn!(
                event = "document_purge_failed",
                project_id = %id,
                client_id = %client,
                "Document purge failed: {}",
                e
            );
            false
        }
        Err(e) => {
            tracing::warn!(
                event = "document_purge_failed",
                project_id = %id,
                client_id = %client,
                "Document purge task failed: {}",
                e
            );
            false
        }
    };

    Ok(Json(CancelResponse {
        project: view,
        documents_purged,
    }))
}

pub async fn add_pendencia_handler(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<u64>,
    ApiJson(request): ApiJson<PendenciaRequest>,
) -> Result<(StatusCode, Json<PendenciaResponse>), ApiError> {
    let id = ProjectId(id);
    let (index, view) = run_engine(&state, move |p| {
        let (project, index) = p.add_pendencia(id, &request.descricao)?;
        Ok((index, view_of(p, &project)))
    })
    .await?;
    tracing::info!(event = "pendency_added", project_id = %id, index);
    Ok((
        StatusCode::CREATED,
        Json(PendenciaResponse {
            index,
            project: view,
        }),
    ))
}

pub async fn resolve_pendencia_handler(
    State(state): State<AppState>,
    ApiPath((id, index)): ApiPath<(u64, usize)>,
) -> Result<Json<ProjectView>, ApiError> {
    let id = ProjectId(id);
    let view = run_engine(&state, move |p| {
        let project = p.resolve_pendencia(id, index)?;
        Ok(view_of(p, &project))
    })
    .await?;
    tracing::info!(
        event = "pendency_resolved",
        project_id = %id,
        index,
        tem_pendencia = view.tem_pendencia
    );
    Ok(Json(view))
}

pub async fn add_observacao_handler(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<u64>,
    ApiJson(request): ApiJson<ObservacaoRequest>,
) -> Result<(StatusCode, Json<ProjectView>), ApiError> {
    let id = ProjectId(id);
    let author = request.author_id;
    let view = run_engine(&state, move |p| {
        let project = p.add_observacao(id, &request.texto, request.author_id)?;
        Ok(view_of(p, &project))
    })
    .await?;
    tracing::info!(event = "observation_added", project_id = %id, author_id = %author);
    Ok((StatusCode::CREATED, Json(view)))
}

/// Patch the open stage's checklist with `{field_key: bool}` pairs.
pub async fn update_documents_handler(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<u64>,
    ApiJson(patch): ApiJson<BTreeMap<String, bool>>,
) -> Result<Json<ProjectView>, ApiError> {
    let id = ProjectId(id);
    let keys = patch.len();
    let view = run_engine(&state, move |p| {
        let project = p.update_document_checklist(id, &patch)?;
        Ok(view_of(p, &project))
    })
    .await?;
    tracing::info!(event = "checklist_updated", project_id = %id, keys);
    Ok(Json(view))
}

pub async fn update_contract_handler(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<u64>,
    ApiJson(details): ApiJson<ContractDetails>,
) -> Result<Json<ProjectView>, ApiError> {
    let id = ProjectId(id);
    let view = run_engine(&state, move |p| {
        let project = p.update_contract_details(id, &details)?;
        Ok(view_of(p, &project))
    })
    .await?;
    tracing::info!(event = "contract_updated", project_id = %id);
    Ok(Json(view))
}

// =============================================================================
// PROPOSALS (PROPOSTAS)
// =============================================================================

pub async fn create_proposal_handler(
    State(state): State<AppState>,
    ApiJson(input): ApiJson<NewProposal>,
) -> Result<(StatusCode, Json<Proposal>), ApiError> {
    let proposal = run_engine(&state, move |p| p.create_proposal(input)).await?;
    tracing::info!(
        event = "proposal_created",
        proposal_id = %proposal.id(),
        client_id = %proposal.client_id()
    );
    Ok((StatusCode::CREATED, Json(proposal)))
}

pub async fn list_proposals_handler(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ProposalListQuery>,
) -> Result<Json<Vec<Proposal>>, ApiError> {
    let status = query.to_status()?;
    let proposals = run_engine(&state, move |p| p.list_proposals(status)).await?;
    Ok(Json(proposals))
}

pub async fn get_proposal_handler(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<u64>,
) -> Result<Json<Proposal>, ApiError> {
    let proposal = run_engine(&state, move |p| p.get_proposal(ProposalId(id))).await?;
    Ok(Json(proposal))
}

pub async fn convert_proposal_handler(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<u64>,
) -> Result<Json<ConversionResponse>, ApiError> {
    let id = ProposalId(id);
    let response = run_engine(&state, move |p| {
        let (project, proposal) = p.convert(id)?;
        Ok(ConversionResponse {
            project: view_of(p, &project),
            proposal,
        })
    })
    .await?;
    tracing::info!(
        event = "proposal_converted",
        proposal_id = %id,
        project_id = %response.project.project.id()
    );
    Ok(Json(response))
}

pub async fn withdraw_proposal_handler(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<u64>,
    ApiJson(request): ApiJson<ReasonRequest>,
) -> Result<Json<Proposal>, ApiError> {
    let id = ProposalId(id);
    let proposal = run_engine(&state, move |p| p.withdraw(id, &request.motivo)).await?;
    tracing::info!(event = "proposal_withdrawn", proposal_id = %id);
    Ok(Json(proposal))
}

/// Open proposals waiting at least `days` (server default when absent).
pub async fn proposal_alerts_handler(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<AlertQuery>,
) -> Result<Json<AlertsResponse>, ApiError> {
    let threshold_days = query.days.unwrap_or(state.config.proposal_alert_days);
    let alerts = run_engine(&state, move |p| p.stale_proposals(threshold_days)).await?;
    Ok(Json(AlertsResponse {
        threshold_days,
        alerts,
    }))
}

// =============================================================================
// REPORTS
// =============================================================================

pub async fn dashboard_handler(
    State(state): State<AppState>,
) -> Result<Json<DashboardStats>, ApiError> {
    let stats = run_engine(&state, |p| p.dashboard()).await?;
    Ok(Json(stats))
}

pub async fn summary_handler(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ProjectListQuery>,
) -> Result<Json<Summary>, ApiError> {
    let filter = query.to_filter()?;
    let summary = run_engine(&state, move |p| p.summary(&filter)).await?;
    Ok(Json(summary))
}
