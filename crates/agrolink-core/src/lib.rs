//! # agrolink-core
//!
//! The stage-pipeline engine for AgroLink - THE LOGIC.
//!
//! This crate tracks rural-credit loan applications ("Projects") as they
//! move through a configurable, ordered sequence of processing stages. It
//! owns a Project's current stage, its per-stage history, blocking
//! pendencies, document checklists, and the rules for forward movement,
//! cancellation, archival and proposal conversion.
//!
//! ## Architectural Constraints
//!
//! - Pure Rust: NO async, NO network dependencies
//! - The engine never logs; callers observe outcomes through `Result`
//! - Deterministic ordering: `BTreeMap`/`BTreeSet` only
//! - A failed operation leaves every stored aggregate unchanged

// =============================================================================
// MODULES
// =============================================================================

pub mod catalog;
pub mod checklist;
pub mod clock;
pub mod engine;
pub mod locks;
pub mod primitives;
pub mod project;
pub mod proposal;
pub mod registry;
pub mod report;
pub mod storage;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    Cents, ClientId, ErrorKind, FieldKey, InstitutionId, PipelineError, ProjectId, ProjectTypeId,
    ProposalId, RequirementId, StageId, UserId,
};

// =============================================================================
// RE-EXPORTS: Pipeline Engine
// =============================================================================

pub use catalog::{CatalogRequirement, CatalogStage, StageCatalog};
pub use checklist::{ChecklistStatus, DocumentChecklist};
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{NewRequirement, Pipeline};
pub use project::{
    ContractDetails, Observacao, Pendencia, Project, ProjectSeed, ProjectStatus, ProjectView,
    StageHistoryEntry,
};
pub use proposal::{NewProposal, Proposal, ProposalAlert, ProposalStatus};
pub use registry::{RequirementDefinition, Stage, StageRegistry};
pub use report::{DashboardStats, ProjectFilter, Summary, SummaryRow};
pub use storage::{MemoryStore, PipelineStore, RedbStore, Sequence, StorageBackend};
