//! # Storage Module
//!
//! Persistence seam of the engine.
//!
//! [`PipelineStore`] is the contract both backends implement:
//! - [`MemoryStore`]: `BTreeMap` tables behind one `RwLock` (tests, `--backend memory`)
//! - [`RedbStore`]: redb tables with postcard-encoded rows (ACID, persistent)
//!
//! Every multi-row write (catalog seed, order swap, proposal conversion) is a single
//! transaction in both backends: either every row is visible afterwards or
//! none is.

mod memory;
mod redb_store;

pub use memory::MemoryStore;
pub use redb_store::RedbStore;

use crate::project::{Project, ProjectStatus};
use crate::proposal::Proposal;
use crate::registry::{RequirementDefinition, Stage, StageRegistry};
use crate::{ClientId, PipelineError, ProjectId, ProposalId};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;

// =============================================================================
// ID SEQUENCES
// =============================================================================

/// Monotonic id counters, one per row kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Sequence {
    Stage,
    Requirement,
    Project,
    Proposal,
}

impl Sequence {
    /// Metadata key holding the last allocated id.
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Sequence::Stage => "last_stage_id",
            Sequence::Requirement => "last_requirement_id",
            Sequence::Project => "last_project_id",
            Sequence::Proposal => "last_proposal_id",
        }
    }
}

// =============================================================================
// STORE CONTRACT
// =============================================================================

/// Row-level persistence for the pipeline engine.
///
/// Stores are shared across threads; implementations synchronize
/// internally. Ids are allocated from 1 and never reused.
pub trait PipelineStore: Send + Sync {
    /// Allocate the next id of a sequence.
    fn allocate_id(&self, sequence: Sequence) -> Result<u64, PipelineError>;

    /// Load every stage and requirement row.
    fn load_registry(&self) -> Result<StageRegistry, PipelineError>;

    fn insert_stage(&self, stage: &Stage) -> Result<(), PipelineError>;

    fn update_stage(&self, stage: &Stage) -> Result<(), PipelineError>;

    /// Write two already-swapped stage rows in one transaction.
    fn swap_stage_order(&self, first: &Stage, second: &Stage) -> Result<(), PipelineError>;

    /// Write an initial registry in one transaction.
    ///
    /// Returns `false` and writes nothing when any stage row already exists.
    fn seed_registry(
        &self,
        stages: &[Stage],
        requirements: &[RequirementDefinition],
    ) -> Result<bool, PipelineError>;

    fn insert_requirement(&self, requirement: &RequirementDefinition)
    -> Result<(), PipelineError>;

    fn update_requirement(&self, requirement: &RequirementDefinition)
    -> Result<(), PipelineError>;

    fn get_project(&self, id: ProjectId) -> Result<Option<Project>, PipelineError>;

    /// Every project, ordered by id.
    fn list_projects(&self) -> Result<Vec<Project>, PipelineError>;

    fn insert_project(&self, project: &Project) -> Result<(), PipelineError>;

    /// Replace a project row if the stored version still equals `expected_version`.
    ///
    /// Fails with `VersionConflict` otherwise, leaving the stored row untouched.
    fn update_project(&self, project: &Project, expected_version: u64)
    -> Result<(), PipelineError>;

    fn get_proposal(&self, id: ProposalId) -> Result<Option<Proposal>, PipelineError>;

    /// Every proposal, ordered by id.
    fn list_proposals(&self) -> Result<Vec<Proposal>, PipelineError>;

    fn insert_proposal(&self, proposal: &Proposal) -> Result<(), PipelineError>;

    fn update_proposal(&self, proposal: &Proposal) -> Result<(), PipelineError>;

    /// Insert the converted project and the converted proposal atomically.
    ///
    /// The stored proposal must still be open; otherwise nothing is written.
    fn commit_conversion(&self, project: &Project, proposal: &Proposal)
    -> Result<(), PipelineError>;

    /// The client's active project, if any.
    fn find_active_project_for_client(
        &self,
        client: ClientId,
    ) -> Result<Option<ProjectId>, PipelineError> {
        Ok(self
            .list_projects()?
            .into_iter()
            .find(|p| p.client_id() == client && p.status() == ProjectStatus::Active)
            .map(|p| p.id()))
    }
}

// =============================================================================
// STORAGE BACKEND
// =============================================================================

/// Storage backend selected at startup.
#[derive(Debug)]
pub enum StorageBackend {
    /// In-memory tables (fast, volatile).
    InMemory(MemoryStore),
    /// Disk-backed tables using redb (ACID, persistent).
    Persistent(RedbStore),
}

impl Default for StorageBackend {
    fn default() -> Self {
        Self::InMemory(MemoryStore::new())
    }
}

impl StorageBackend {
    /// Open or create a redb database at `path`.
    pub fn open_redb(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        Ok(Self::Persistent(RedbStore::open(path)?))
    }

    /// Check if using persistent storage.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::Persistent(_))
    }
}

macro_rules! dispatch {
    ($self:ident, $store:ident => $call:expr) => {
        match $self {
            StorageBackend::InMemory($store) => $call,
            StorageBackend::Persistent($store) => $call,
        }
    };
}

impl PipelineStore for StorageBackend {
    fn allocate_id(&self, sequence: Sequence) -> Result<u64, PipelineError> {
        dispatch!(self, s => s.allocate_id(sequence))
    }

    fn load_registry(&self) -> Result<StageRegistry, PipelineError> {
        dispatch!(self, s => s.load_registry())
    }

    fn insert_stage(&self, stage: &Stage) -> Result<(), PipelineError> {
        dispatch!(self, s => s.insert_stage(stage))
    }

    fn update_stage(&self, stage: &Stage) -> Result<(), PipelineError> {
        dispatch!(self, s => s.update_stage(stage))
    }

    fn swap_stage_order(&self, first: &Stage, second: &Stage) -> Result<(), PipelineError> {
        dispatch!(self, s => s.swap_stage_order(first, second))
    }

    fn seed_registry(
        &self,
        stages: &[Stage],
        requirements: &[RequirementDefinition],
    ) -> Result<bool, PipelineError> {
        dispatch!(self, s => s.seed_registry(stages, requirements))
    }

    fn insert_requirement(
        &self,
        requirement: &RequirementDefinition,
    ) -> Result<(), PipelineError> {
        dispatch!(self, s => s.insert_requirement(requirement))
    }

    fn update_requirement(
        &self,
        requirement: &RequirementDefinition,
    ) -> Result<(), PipelineError> {
        dispatch!(self, s => s.update_requirement(requirement))
    }

    fn get_project(&self, id: ProjectId) -> Result<Option<Project>, PipelineError> {
        dispatch!(self, s => s.get_project(id))
    }

    fn list_projects(&self) -> Result<Vec<Project>, PipelineError> {
        dispatch!(self, s => s.list_projects())
    }

    fn insert_project(&self, project: &Project) -> Result<(), PipelineError> {
        dispatch!(self, s => s.insert_project(project))
    }

    fn update_project(
        &self,
        project: &Project,
        expected_version: u64,
    ) -> Result<(), PipelineError> {
        dispatch!(self, s => s.update_project(project, expected_version))
    }

    fn get_proposal(&self, id: ProposalId) -> Result<Option<Proposal>, PipelineError> {
        dispatch!(self, s => s.get_proposal(id))
    }

    fn list_proposals(&self) -> Result<Vec<Proposal>, PipelineError> {
        dispatch!(self, s => s.list_proposals())
    }

    fn insert_proposal(&self, proposal: &Proposal) -> Result<(), PipelineError> {
        dispatch!(self, s => s.insert_proposal(proposal))
    }

    fn update_proposal(&self, proposal: &Proposal) -> Result<(), PipelineError> {
        dispatch!(self, s => s.update_proposal(proposal))
    }

    fn commit_conversion(
        &self,
        project: &Project,
        proposal: &Proposal,
    ) -> Result<(), PipelineError> {
        dispatch!(self, s => s.commit_conversion(project, proposal))
    }
}

// =============================================================================
// SHARED CHECKS
// =============================================================================

/// Optimistic-lock check shared by both backends.
pub(crate) fn check_version(
    stored: &Project,
    expected_version: u64,
) -> Result<(), PipelineError> {
    if stored.version() == expected_version {
        Ok(())
    } else {
        Err(PipelineError::VersionConflict {
            project: stored.id(),
            expected: expected_version,
            found: stored.version(),
        })
    }
}

/// Encode a row with postcard.
pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, PipelineError> {
    postcard::to_allocvec(value).map_err(|e| PipelineError::Serialization(e.to_string()))
}

/// Decode a postcard row.
pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, PipelineError> {
    postcard::from_bytes(bytes).map_err(|e| PipelineError::Deserialization(e.to_string()))
}
