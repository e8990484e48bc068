//! # Core Type Definitions
//!
//! This module contains the shared vocabulary of the pipeline engine:
//! - Identifiers for every aggregate and configuration row (`StageId`, `ProjectId`, ...)
//! - Money as integer cents (`Cents`)
//! - Checklist keys (`FieldKey`)
//! - Error types (`PipelineError`, `ErrorKind`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Use integer arithmetic only (no floating-point)
//! - Implement `Ord` for deterministic ordering in `BTreeMap`/`BTreeSet`

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::primitives::{MAX_FIELD_KEY_LENGTH, MAX_TEXT_LENGTH};

// =============================================================================
// IDENTIFIERS
// =============================================================================

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Identifier of a pipeline stage (Etapa).
    StageId
);
id_type!(
    /// Identifier of a requirement definition (Requisito).
    RequirementId
);
id_type!(
    /// Identifier of a Project aggregate.
    ProjectId
);
id_type!(
    /// Identifier of a Proposal (Proposta).
    ProposalId
);
id_type!(
    /// External client reference. Clients are owned outside the engine.
    ClientId
);
id_type!(
    /// External project type reference (e.g. PRONAF, custeio).
    ProjectTypeId
);
id_type!(
    /// External financial institution reference.
    InstitutionId
);
id_type!(
    /// External user reference, used as the author of observations.
    UserId
);

// =============================================================================
// MONEY
// =============================================================================

/// A monetary amount in integer cents.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Cents(pub i64);

impl Cents {
    /// Get the raw value in cents.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }

    /// Require a strictly positive amount.
    pub fn positive(self, field: &'static str) -> Result<Self, PipelineError> {
        if self.0 > 0 {
            Ok(self)
        } else {
            Err(PipelineError::NonPositiveAmount(field))
        }
    }

    /// Saturating sum, used by aggregate views.
    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }
}

/// Renders as reais with two decimals, e.g. `R$ 1500.00`.
impl std::fmt::Display for Cents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}R$ {}.{:02}", sign, abs / 100, abs % 100)
    }
}

// =============================================================================
// FIELD KEY
// =============================================================================

/// Key of a checklist item, unique per stage (e.g. `ccu_titulo`).
///
/// Keys are lowercase ASCII letters, digits and underscores.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldKey(String);

impl FieldKey {
    /// Parse and validate a field key.
    pub fn parse(raw: &str) -> Result<Self, PipelineError> {
        let key = raw.trim();
        if key.is_empty() {
            return Err(PipelineError::EmptyText("field_key"));
        }
        if key.len() > MAX_FIELD_KEY_LENGTH
            || !key
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
        {
            return Err(PipelineError::InvalidFieldKey(key.to_string()));
        }
        Ok(Self(key.to_string()))
    }

    /// Get the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FieldKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// TEXT VALIDATION
// =============================================================================

/// Trim and validate a free-text input (descriptions, reasons, notes).
pub fn required_text(field: &'static str, raw: &str) -> Result<String, PipelineError> {
    bounded_text(field, raw, MAX_TEXT_LENGTH)
}

/// Trim and validate a free-text input against an explicit bound.
pub fn bounded_text(field: &'static str, raw: &str, max: usize) -> Result<String, PipelineError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(PipelineError::EmptyText(field));
    }
    if text.len() > max {
        return Err(PipelineError::TextTooLong { field, max });
    }
    Ok(text.to_string())
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Coarse error classification surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or invalid input. Never retried automatically.
    Validation,
    /// Operation not valid in the aggregate's current state.
    State,
    /// Referenced entity or index does not exist.
    NotFound,
    /// Concurrent modification detected; safe to retry after reload.
    Conflict,
    /// Storage or encoding failure.
    Storage,
}

impl ErrorKind {
    /// Stable label used on the wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::State => "state",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Storage => "storage",
        }
    }
}

/// Errors that can occur in the pipeline engine.
///
/// - No silent failures
/// - Use `Result<T, PipelineError>` for fallible operations
/// - A failed operation leaves every aggregate unchanged
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    // ---- validation -------------------------------------------------------
    /// A required text field is empty.
    #[error("{0} must not be empty")]
    EmptyText(&'static str),

    /// A text field exceeds its maximum length.
    #[error("{field} exceeds the maximum of {max} bytes")]
    TextTooLong { field: &'static str, max: usize },

    /// A field key has an invalid shape.
    #[error("invalid field key '{0}'")]
    InvalidFieldKey(String),

    /// A checklist patch names a key the stage does not define for the project type.
    #[error("'{key}' is not a requirement of stage {stage} for this project type")]
    UnknownFieldKey { stage: StageId, key: String },

    /// An amount must be strictly positive.
    #[error("{0} must be a positive amount")]
    NonPositiveAmount(&'static str),

    /// Stage order values must be positive.
    #[error("stage order must be a positive integer")]
    InvalidOrder,

    /// Two active stages would share the same order.
    #[error("an active stage already uses order {0}")]
    DuplicateStageOrder(u32),

    /// A requirement key is already defined for the stage.
    #[error("field key '{key}' is already defined for stage {stage}")]
    DuplicateFieldKey { stage: StageId, key: String },

    /// A catalog repeats a requirement key within one stage entry.
    #[error("field key '{key}' is repeated in the catalog stage with order {order}")]
    DuplicateCatalogKey { order: u32, key: String },

    /// A stage catalog is not valid TOML or does not fit the catalog shape.
    #[error("invalid stage catalog: {0}")]
    InvalidCatalog(String),

    // ---- state ------------------------------------------------------------
    /// The open stage visit still has unresolved pendencies.
    #[error("project {project} has {unresolved} unresolved pendencies")]
    BlockedByPendency { project: ProjectId, unresolved: usize },

    /// The project is already on the last active stage.
    #[error("project {0} is already on the last active stage; archive it instead")]
    NoNextStage(ProjectId),

    /// Archival requires the project to sit on the last active stage.
    #[error("project {0} is not on the final active stage")]
    NotAtFinalStage(ProjectId),

    /// The project is archived or cancelled.
    #[error("project {project} is {status}")]
    NotActive {
        project: ProjectId,
        status: &'static str,
    },

    /// The pendency at this index was already resolved.
    #[error("pendency {0} is already resolved")]
    PendencyAlreadyResolved(usize),

    /// The proposal is converted or withdrawn.
    #[error("proposal {proposal} is {status}")]
    ProposalNotOpen {
        proposal: ProposalId,
        status: &'static str,
    },

    /// A client may only have one active project at a time.
    #[error("client {client} already has active project {project}")]
    ClientHasActiveProject { client: ClientId, project: ProjectId },

    /// A caller-chosen target stage is not the derived next stage.
    #[error("stage {requested} is not the next stage of project {project}")]
    InvalidTarget {
        project: ProjectId,
        requested: StageId,
        expected: Option<StageId>,
    },

    /// No active stage is configured, so no project can start.
    #[error("no active stages are configured")]
    NoActiveStages,

    // ---- not found --------------------------------------------------------
    /// The project does not exist.
    #[error("project not found: {0}")]
    ProjectNotFound(ProjectId),

    /// The proposal does not exist.
    #[error("proposal not found: {0}")]
    ProposalNotFound(ProposalId),

    /// The stage does not exist.
    #[error("stage not found: {0}")]
    StageNotFound(StageId),

    /// The requirement does not exist.
    #[error("requirement not found: {0}")]
    RequirementNotFound(RequirementId),

    /// No pendency exists at this index in the open stage visit.
    #[error("pendency not found at index {0}")]
    PendencyNotFound(usize),

    // ---- conflict ---------------------------------------------------------
    /// The stored aggregate changed since it was loaded.
    #[error("project {project} was modified concurrently (expected version {expected}, found {found})")]
    VersionConflict {
        project: ProjectId,
        expected: u64,
        found: u64,
    },

    // ---- storage ----------------------------------------------------------
    /// An I/O or database error occurred.
    #[error("I/O error: {0}")]
    Io(String),

    /// A serialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A deserialization error occurred.
    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl PipelineError {
    /// Classify the error for callers.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::EmptyText(_)
            | PipelineError::TextTooLong { .. }
            | PipelineError::InvalidFieldKey(_)
            | PipelineError::UnknownFieldKey { .. }
            | PipelineError::NonPositiveAmount(_)
            | PipelineError::InvalidOrder
            | PipelineError::DuplicateStageOrder(_)
            | PipelineError::DuplicateFieldKey { .. }
            | PipelineError::DuplicateCatalogKey { .. }
            | PipelineError::InvalidCatalog(_) => ErrorKind::Validation,

            PipelineError::BlockedByPendency { .. }
            | PipelineError::NoNextStage(_)
            | PipelineError::NotAtFinalStage(_)
            | PipelineError::NotActive { .. }
            | PipelineError::PendencyAlreadyResolved(_)
            | PipelineError::ProposalNotOpen { .. }
            | PipelineError::ClientHasActiveProject { .. }
            | PipelineError::InvalidTarget { .. }
            | PipelineError::NoActiveStages => ErrorKind::State,

            PipelineError::ProjectNotFound(_)
            | PipelineError::ProposalNotFound(_)
            | PipelineError::StageNotFound(_)
            | PipelineError::RequirementNotFound(_)
            | PipelineError::PendencyNotFound(_) => ErrorKind::NotFound,

            PipelineError::VersionConflict { .. } => ErrorKind::Conflict,

            PipelineError::Io(_)
            | PipelineError::Serialization(_)
            | PipelineError::Deserialization(_) => ErrorKind::Storage,
        }
    }

    /// Short machine-readable code for the specific variant.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::EmptyText(_) => "empty_text",
            PipelineError::TextTooLong { .. } => "text_too_long",
            PipelineError::InvalidFieldKey(_) => "invalid_field_key",
            PipelineError::UnknownFieldKey { .. } => "unknown_field_key",
            PipelineError::NonPositiveAmount(_) => "non_positive_amount",
            PipelineError::InvalidOrder => "invalid_order",
            PipelineError::DuplicateStageOrder(_) => "duplicate_stage_order",
            PipelineError::DuplicateFieldKey { .. } | PipelineError::DuplicateCatalogKey { .. } => {
                "duplicate_field_key"
            }
            PipelineError::InvalidCatalog(_) => "invalid_catalog",
            PipelineError::BlockedByPendency { .. } => "blocked_by_pendency",
            PipelineError::NoNextStage(_) => "no_next_stage",
            PipelineError::NotAtFinalStage(_) => "not_at_final_stage",
            PipelineError::NotActive { .. } => "not_active",
            PipelineError::PendencyAlreadyResolved(_) => "pendency_already_resolved",
            PipelineError::ProposalNotOpen { .. } => "proposal_not_open",
            PipelineError::ClientHasActiveProject { .. } => "client_has_active_project",
            PipelineError::InvalidTarget { .. } => "invalid_target",
            PipelineError::NoActiveStages => "no_active_stages",
            PipelineError::ProjectNotFound(_) => "project_not_found",
            PipelineError::ProposalNotFound(_) => "proposal_not_found",
            PipelineError::StageNotFound(_) => "stage_not_found",
            PipelineError::RequirementNotFound(_) => "requirement_not_found",
            PipelineError::PendencyNotFound(_) => "pendency_not_found",
            PipelineError::VersionConflict { .. } => "version_conflict",
            PipelineError::Io(_) => "io",
            PipelineError::Serialization(_) => "serialization",
            PipelineError::Deserialization(_) => "deserialization",
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
