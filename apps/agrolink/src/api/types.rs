//! # API Request/Response Types
//!
//! JSON structures for the HTTP API, and the mapping from engine errors
//! to HTTP responses.

use agrolink_core::{
    Cents, ClientId, ErrorKind, NewRequirement, PipelineError, ProjectFilter, ProjectStatus,
    ProjectTypeId, ProjectView, Proposal, ProposalAlert, ProposalStatus, Stage, StageId, UserId,
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Error body returned by every failing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub kind: String,
    pub code: String,
    pub message: String,
}

/// Failure of an API call.
#[derive(Debug)]
pub enum ApiError {
    /// The engine refused or failed the operation.
    Pipeline(PipelineError),
    /// A query parameter could not be interpreted.
    BadRequest(String),
    /// A request body could not be parsed.
    InvalidBody(String),
    /// A path segment is not a valid id.
    InvalidPath(String),
    /// The engine task itself did not complete.
    Internal(String),
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        ApiError::Pipeline(e)
    }
}

/// HTTP status for an engine error category.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::State | ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    fn parts(&self) -> (StatusCode, ErrorResponse) {
        match self {
            ApiError::Pipeline(e) => (
                status_for(e.kind()),
                ErrorResponse {
                    kind: e.kind().as_str().to_string(),
                    code: e.code().to_string(),
                    message: e.to_string(),
                },
            ),
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    kind: ErrorKind::Validation.as_str().to_string(),
                    code: "invalid_query".to_string(),
                    message: msg.clone(),
                },
            ),
            ApiError::InvalidBody(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    kind: ErrorKind::Validation.as_str().to_string(),
                    code: "invalid_body".to_string(),
                    message: msg.clone(),
                },
            ),
            ApiError::InvalidPath(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    kind: ErrorKind::Validation.as_str().to_string(),
                    code: "invalid_path".to_string(),
                    message: msg.clone(),
                },
            ),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    kind: ErrorKind::Storage.as_str().to_string(),
                    code: "internal".to_string(),
                    message: msg.clone(),
                },
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = self.parts();
        if status.is_server_error() {
            tracing::error!(
                event = "request_failed",
                kind = %body.kind,
                code = %body.code,
                "{}",
                body.message
            );
        } else {
            tracing::debug!(
                event = "request_rejected",
                kind = %body.kind,
                code = %body.code,
                "{}",
                body.message
            );
        }
        (status, Json(body)).into_response()
    }
}

// =============================================================================
// STAGE REQUESTS
// =============================================================================

/// Create a stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStageRequest {
    pub name: String,
    pub order: u32,
}

/// Rename a stage and/or toggle it. Absent fields are left alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateStageRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
}

/// Result of swapping the orders of two stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapResponse {
    pub stages: Vec<Stage>,
}

/// Define a checklist item on a stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRequirementRequest {
    pub name: String,
    pub field_key: String,
    /// Project types the item applies to; empty means all types.
    #[serde(default)]
    pub project_types: Vec<ProjectTypeId>,
}

impl CreateRequirementRequest {
    pub fn to_new_requirement(&self) -> NewRequirement {
        NewRequirement {
            name: self.name.clone(),
            field_key: self.field_key.clone(),
            applicable_project_types: self.project_types.iter().copied().collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequirementsQuery {
    pub project_type: ProjectTypeId,
}

// =============================================================================
// PROJECT REQUESTS
// =============================================================================

/// Optional body of `PUT /projects/{id}/next-stage`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdvanceRequest {
    #[serde(default)]
    pub target_stage_id: Option<StageId>,
}

/// A free-text reason (`motivo`) for cancelling or withdrawing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasonRequest {
    pub motivo: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendenciaRequest {
    pub descricao: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservacaoRequest {
    pub texto: String,
    pub author_id: UserId,
}

/// Query string of the project listing and the summary report.
///
/// `status` defaults to `active`; `all` lifts the status restriction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectListQuery {
    pub status: Option<String>,
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub stage: Option<StageId>,
    pub tem_pendencia: Option<bool>,
    pub credit_min: Option<Cents>,
    pub credit_max: Option<Cents>,
    pub client: Option<ClientId>,
}

impl ProjectListQuery {
    pub fn to_filter(&self) -> Result<ProjectFilter, ApiError> {
        let status = match self.status.as_deref() {
            None => Some(ProjectStatus::Active),
            Some("all") => None,
            Some(raw) => Some(ProjectStatus::parse(raw).ok_or_else(|| {
                ApiError::BadRequest(format!("unknown project status '{}'", raw))
            })?),
        };
        if let Some(month) = self.month
            && !(1..=12).contains(&month)
        {
            return Err(ApiError::BadRequest(format!("invalid month {}", month)));
        }
        Ok(ProjectFilter {
            status,
            started_year: self.year,
            started_month: self.month,
            stage: self.stage,
            tem_pendencia: self.tem_pendencia,
            credit_min: self.credit_min,
            credit_max: self.credit_max,
            client: self.client,
        })
    }
}

// =============================================================================
// PROJECT RESPONSES
// =============================================================================

/// A new pendency and the project it was raised on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendenciaResponse {
    pub index: usize,
    pub project: ProjectView,
}

/// Outcome of a cancellation, including the document purge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub project: ProjectView,
    /// False when the client had no documents or the purge failed.
    pub documents_purged: bool,
}

// =============================================================================
// PROPOSALS
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProposalListQuery {
    pub status: Option<String>,
}

impl ProposalListQuery {
    pub fn to_status(&self) -> Result<Option<ProposalStatus>, ApiError> {
        match self.status.as_deref() {
            None | Some("all") => Ok(None),
            Some(raw) => ProposalStatus::parse(raw)
                .map(Some)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown proposal status '{}'", raw))),
        }
    }
}

/// The project created by a conversion and the converted proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionResponse {
    pub project: ProjectView,
    pub proposal: Proposal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertQuery {
    pub days: Option<u32>,
}

/// Open proposals older than the threshold, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsResponse {
    pub threshold_days: u32,
    pub alerts: Vec<ProposalAlert>,
}
