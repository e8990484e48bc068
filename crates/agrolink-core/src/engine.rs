//! # Pipeline Engine
//!
//! The single entry point for every operation on stages, projects and
//! proposals.
//!
//! ## Mutation Protocol
//!
//! Every project mutation runs the same sequence while holding the
//! project's lock from [`LockTable`]:
//!
//! 1. load the stored aggregate
//! 2. apply the transition to that copy (all checks first)
//! 3. bump the version and write it back with an optimistic version check
//!
//! A failure at any step drops the copy, so the stored aggregate is never
//! half-updated.
//!
//! ## Registry Snapshot
//!
//! The stage registry is loaded once and shared as `Arc<StageRegistry>`.
//! Administrative writes go through the store and then replace the
//! snapshot; there is no other cache invalidation path.

use crate::catalog::StageCatalog;
use crate::clock::{Clock, SystemClock};
use crate::locks::LockTable;
use crate::primitives::MAX_NAME_LENGTH;
use crate::project::{ContractDetails, Project, ProjectSeed, ProjectView};
use crate::proposal::{NewProposal, Proposal, ProposalAlert, ProposalStatus};
use crate::registry::{RequirementDefinition, Stage, StageRegistry};
use crate::report::{DashboardStats, ProjectFilter, Summary};
use crate::storage::{PipelineStore, Sequence, StorageBackend};
use crate::types::bounded_text;
use crate::{
    ClientId, FieldKey, PipelineError, ProjectId, ProjectTypeId, ProposalId, RequirementId,
    StageId, UserId,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

/// Input for a new requirement definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRequirement {
    pub name: String,
    pub field_key: String,
    pub applicable_project_types: BTreeSet<ProjectTypeId>,
}

/// The stage-pipeline engine over a [`PipelineStore`].
pub struct Pipeline<S: PipelineStore = StorageBackend> {
    store: S,
    clock: Arc<dyn Clock>,
    registry: RwLock<Arc<StageRegistry>>,
    /// Serializes registry writes.
    admin: Mutex<()>,
    project_locks: LockTable<ProjectId>,
    proposal_locks: LockTable<ProposalId>,
    client_locks: LockTable<ClientId>,
}

impl<S: PipelineStore> std::fmt::Debug for Pipeline<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.registry().list_all_stages().len())
            .finish_non_exhaustive()
    }
}

impl Pipeline<StorageBackend> {
    /// Engine over a fresh in-memory store.
    pub fn in_memory() -> Result<Self, PipelineError> {
        Self::new(StorageBackend::default())
    }

    /// Engine over a redb database at `path`, created if missing.
    pub fn with_redb(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        Self::new(StorageBackend::open_redb(path)?)
    }

    /// Check if the engine persists to disk.
    pub fn is_persistent(&self) -> bool {
        self.store.is_persistent()
    }
}

impl<S: PipelineStore> Pipeline<S> {
    /// Engine on wall-clock time.
    pub fn new(store: S) -> Result<Self, PipelineError> {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    /// Engine with an explicit time source.
    pub fn with_clock(store: S, clock: Arc<dyn Clock>) -> Result<Self, PipelineError> {
        let registry = store.load_registry()?;
        Ok(Self {
            store,
            clock,
            registry: RwLock::new(Arc::new(registry)),
            admin: Mutex::new(()),
            project_locks: LockTable::new(),
            proposal_locks: LockTable::new(),
            client_locks: LockTable::new(),
        })
    }

    /// Current instant according to the engine clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // =========================================================================
    // STAGE REGISTRY
    // =========================================================================

    /// Current registry snapshot.
    pub fn registry(&self) -> Arc<StageRegistry> {
        Arc::clone(&self.registry.read().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn list_active_stages(&self) -> Vec<Stage> {
        self.registry()
            .list_active_stages_ordered()
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn list_all_stages(&self) -> Vec<Stage> {
        self.registry()
            .list_all_stages()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Active requirements of a stage for a project type.
    pub fn requirements_for(
        &self,
        stage: StageId,
        project_type: ProjectTypeId,
    ) -> Result<Vec<RequirementDefinition>, PipelineError> {
        let registry = self.registry();
        registry.stage(stage)?;
        Ok(registry
            .requirements_for(stage, project_type)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Seed an empty registry from a catalog in one store transaction.
    /// Returns `false` when stages already exist and nothing was written.
    pub fn seed_catalog(&self, catalog: &StageCatalog) -> Result<bool, PipelineError> {
        catalog.validate()?;
        self.admin_write(|registry| {
            if !registry.is_empty() {
                return Ok(false);
            }
            let mut stages = Vec::with_capacity(catalog.stages.len());
            let mut requirements = Vec::new();
            for entry in &catalog.stages {
                let stage = Stage {
                    id: StageId(self.store.allocate_id(Sequence::Stage)?),
                    name: bounded_text("name", &entry.name, MAX_NAME_LENGTH)?,
                    order: entry.order,
                    active: true,
                };
                for req in &entry.requirements {
                    requirements.push(RequirementDefinition {
                        id: RequirementId(self.store.allocate_id(Sequence::Requirement)?),
                        stage_id: stage.id,
                        name: bounded_text("name", &req.name, MAX_NAME_LENGTH)?,
                        field_key: FieldKey::parse(&req.field_key)?,
                        active: true,
                        applicable_project_types: req
                            .project_types
                            .iter()
                            .map(|t| ProjectTypeId(*t))
                            .collect(),
                    });
                }
                stages.push(stage);
            }
            self.store.seed_registry(&stages, &requirements)
        })
    }

    pub fn create_stage(&self, name: &str, order: u32) -> Result<Stage, PipelineError> {
        let name = bounded_text("name", name, MAX_NAME_LENGTH)?;
        self.admin_write(|registry| {
            registry.ensure_order_available(order, None)?;
            let stage = Stage {
                id: StageId(self.store.allocate_id(Sequence::Stage)?),
                name,
                order,
                active: true,
            };
            self.store.insert_stage(&stage)?;
            Ok(stage)
        })
    }

    /// Rename a stage. History entries keep the name they were opened with.
    pub fn rename_stage(&self, id: StageId, name: &str) -> Result<Stage, PipelineError> {
        self.update_stage(id, Some(name), None)
    }

    /// Soft-delete a stage. Projects already on it stay there.
    pub fn deactivate_stage(&self, id: StageId) -> Result<Stage, PipelineError> {
        self.update_stage(id, None, Some(false))
    }

    pub fn reactivate_stage(&self, id: StageId) -> Result<Stage, PipelineError> {
        self.update_stage(id, None, Some(true))
    }

    /// Rename and/or change the active flag of a stage as one write.
    ///
    /// Both changes are checked against the snapshot before anything is
    /// stored; a rejected update leaves the stage untouched.
    pub fn update_stage(
        &self,
        id: StageId,
        name: Option<&str>,
        active: Option<bool>,
    ) -> Result<Stage, PipelineError> {
        let name = name
            .map(|n| bounded_text("name", n, MAX_NAME_LENGTH))
            .transpose()?;
        self.admin_write(|registry| {
            let mut stage = registry.stage(id)?.clone();
            if active == Some(true) {
                registry.ensure_order_available(stage.order, Some(id))?;
            }
            if let Some(name) = name {
                stage.name = name;
            }
            if let Some(active) = active {
                stage.active = active;
            }
            self.store.update_stage(&stage)?;
            Ok(stage)
        })
    }

    /// Exchange the orders of two stages in one transaction.
    pub fn swap_stage_order(&self, a: StageId, b: StageId) -> Result<(Stage, Stage), PipelineError> {
        self.admin_write(|registry| {
            let (first, second) = registry.plan_order_swap(a, b)?;
            self.store.swap_stage_order(&first, &second)?;
            Ok((first, second))
        })
    }

    pub fn create_requirement(
        &self,
        stage: StageId,
        input: NewRequirement,
    ) -> Result<RequirementDefinition, PipelineError> {
        let name = bounded_text("name", &input.name, MAX_NAME_LENGTH)?;
        let field_key = FieldKey::parse(&input.field_key)?;
        self.admin_write(|registry| {
            registry.ensure_field_key_available(stage, &field_key)?;
            let requirement = RequirementDefinition {
                id: RequirementId(self.store.allocate_id(Sequence::Requirement)?),
                stage_id: stage,
                name,
                field_key,
                active: true,
                applicable_project_types: input.applicable_project_types,
            };
            self.store.insert_requirement(&requirement)?;
            Ok(requirement)
        })
    }

    pub fn deactivate_requirement(
        &self,
        id: RequirementId,
    ) -> Result<RequirementDefinition, PipelineError> {
        self.admin_write(|registry| {
            let mut requirement = registry.requirement(id)?.clone();
            requirement.active = false;
            self.store.update_requirement(&requirement)?;
            Ok(requirement)
        })
    }

    /// Run a registry write, then reload the snapshot from the store.
    ///
    /// The snapshot is reloaded even when `f` fails, since a failed
    /// multi-row write may have committed some rows.
    fn admin_write<T>(
        &self,
        f: impl FnOnce(&StageRegistry) -> Result<T, PipelineError>,
    ) -> Result<T, PipelineError> {
        let _admin = self.admin.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.registry();
        let result = f(&current);
        let fresh = self.store.load_registry()?;
        *self.registry.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(fresh);
        result
    }

    // =========================================================================
    // PROJECTS
    // =========================================================================

    /// Start a project directly, without a proposal.
    pub fn create_project(&self, seed: ProjectSeed) -> Result<Project, PipelineError> {
        seed.validate()?;
        self.client_locks.with_lock(seed.client_id, || {
            self.ensure_client_free(seed.client_id)?;
            let registry = self.registry();
            let first = registry
                .first_active_stage()
                .ok_or(PipelineError::NoActiveStages)?;
            let id = ProjectId(self.store.allocate_id(Sequence::Project)?);
            let project = Project::start(id, seed, first, None, self.clock.now())?;
            self.store.insert_project(&project)?;
            Ok(project)
        })
    }

    pub fn get_project(&self, id: ProjectId) -> Result<Project, PipelineError> {
        self.store
            .get_project(id)?
            .ok_or(PipelineError::ProjectNotFound(id))
    }

    /// Project snapshot with derived fields.
    pub fn project_view(&self, id: ProjectId) -> Result<ProjectView, PipelineError> {
        let project = self.get_project(id)?;
        Ok(project.view(&self.registry(), self.clock.now()))
    }

    /// Move to the next active stage. Returns the project and the stage it left.
    pub fn advance(&self, id: ProjectId) -> Result<(Project, StageId), PipelineError> {
        self.mutate_project_with(id, |p, reg, now| {
            let from = p.current_stage_id();
            p.advance(reg, now)?;
            Ok(from)
        })
    }

    /// Advance, rejecting a caller-chosen target that is not the next stage.
    pub fn advance_to(
        &self,
        id: ProjectId,
        target: StageId,
    ) -> Result<(Project, StageId), PipelineError> {
        self.mutate_project_with(id, |p, reg, now| {
            let from = p.current_stage_id();
            p.advance_to(target, reg, now)?;
            Ok(from)
        })
    }

    pub fn archive(&self, id: ProjectId) -> Result<Project, PipelineError> {
        self.mutate_project(id, |p, reg, now| p.archive(reg, now))
    }

    pub fn cancel(&self, id: ProjectId, reason: &str) -> Result<Project, PipelineError> {
        self.mutate_project(id, |p, _, now| p.cancel(reason, now))
    }

    /// Raise a pendency. Returns the project and the new pendency's index.
    pub fn add_pendencia(
        &self,
        id: ProjectId,
        descricao: &str,
    ) -> Result<(Project, usize), PipelineError> {
        self.mutate_project_with(id, |p, _, now| p.add_pendencia(descricao, now))
    }

    pub fn resolve_pendencia(&self, id: ProjectId, index: usize) -> Result<Project, PipelineError> {
        self.mutate_project(id, |p, _, now| p.resolve_pendencia(index, now))
    }

    pub fn add_observacao(
        &self,
        id: ProjectId,
        texto: &str,
        author: UserId,
    ) -> Result<Project, PipelineError> {
        self.mutate_project(id, |p, _, now| p.add_observacao(texto, author, now))
    }

    pub fn update_document_checklist(
        &self,
        id: ProjectId,
        patch: &BTreeMap<String, bool>,
    ) -> Result<Project, PipelineError> {
        self.mutate_project(id, |p, reg, _| p.update_document_checklist(patch, reg))
    }

    pub fn update_contract_details(
        &self,
        id: ProjectId,
        details: &ContractDetails,
    ) -> Result<Project, PipelineError> {
        self.mutate_project(id, |p, _, _| p.update_contract_details(details))
    }

    fn mutate_project(
        &self,
        id: ProjectId,
        f: impl FnOnce(&mut Project, &StageRegistry, DateTime<Utc>) -> Result<(), PipelineError>,
    ) -> Result<Project, PipelineError> {
        self.mutate_project_with(id, f).map(|(project, ())| project)
    }

    /// Load, mutate a copy, and commit under the project's lock.
    ///
    /// `f`'s output is returned next to the committed project, so values
    /// observed inside the lock stay consistent with the commit.
    fn mutate_project_with<T>(
        &self,
        id: ProjectId,
        f: impl FnOnce(&mut Project, &StageRegistry, DateTime<Utc>) -> Result<T, PipelineError>,
    ) -> Result<(Project, T), PipelineError> {
        self.project_locks.with_lock(id, || {
            let mut project = self.get_project(id)?;
            let registry = self.registry();
            let output = f(&mut project, &registry, self.clock.now())?;
            let expected = project.bump_version();
            self.store.update_project(&project, expected)?;
            Ok((project, output))
        })
    }

    fn ensure_client_free(&self, client: ClientId) -> Result<(), PipelineError> {
        match self.store.find_active_project_for_client(client)? {
            Some(project) => Err(PipelineError::ClientHasActiveProject { client, project }),
            None => Ok(()),
        }
    }

    // =========================================================================
    // PROPOSALS
    // =========================================================================

    pub fn create_proposal(&self, input: NewProposal) -> Result<Proposal, PipelineError> {
        input.credit_amount.positive("credit_amount")?;
        let id = ProposalId(self.store.allocate_id(Sequence::Proposal)?);
        let proposal = Proposal::open(id, input, self.clock.now())?;
        self.store.insert_proposal(&proposal)?;
        Ok(proposal)
    }

    pub fn get_proposal(&self, id: ProposalId) -> Result<Proposal, PipelineError> {
        self.store
            .get_proposal(id)?
            .ok_or(PipelineError::ProposalNotFound(id))
    }

    /// Proposals ordered by id, optionally restricted to one status.
    pub fn list_proposals(
        &self,
        status: Option<ProposalStatus>,
    ) -> Result<Vec<Proposal>, PipelineError> {
        Ok(self
            .store
            .list_proposals()?
            .into_iter()
            .filter(|p| status.is_none_or(|s| p.status() == s))
            .collect())
    }

    /// Turn an open proposal into a Project on the first active stage.
    ///
    /// The project insert and the proposal update commit together.
    pub fn convert(&self, id: ProposalId) -> Result<(Project, Proposal), PipelineError> {
        self.proposal_locks.with_lock(id, || {
            let mut proposal = self.get_proposal(id)?;
            proposal.ensure_open()?;
            self.client_locks.with_lock(proposal.client_id(), || {
                self.ensure_client_free(proposal.client_id())?;
                let registry = self.registry();
                let first = registry
                    .first_active_stage()
                    .ok_or(PipelineError::NoActiveStages)?;
                let now = self.clock.now();
                let project_id = ProjectId(self.store.allocate_id(Sequence::Project)?);
                let project =
                    Project::start(project_id, proposal.project_seed(), first, Some(id), now)?;
                proposal.mark_converted(project_id, now)?;
                self.store.commit_conversion(&project, &proposal)?;
                Ok((project, proposal))
            })
        })
    }

    /// Withdraw an open proposal. Terminal.
    pub fn withdraw(&self, id: ProposalId, reason: &str) -> Result<Proposal, PipelineError> {
        self.proposal_locks.with_lock(id, || {
            let mut proposal = self.get_proposal(id)?;
            proposal.withdraw(reason, self.clock.now())?;
            self.store.update_proposal(&proposal)?;
            Ok(proposal)
        })
    }

    /// Open proposals at least `threshold_days` old, oldest first.
    pub fn stale_proposals(&self, threshold_days: u32) -> Result<Vec<ProposalAlert>, PipelineError> {
        let now = self.clock.now();
        let mut alerts: Vec<ProposalAlert> = self
            .list_proposals(Some(ProposalStatus::Open))?
            .into_iter()
            .map(|proposal| ProposalAlert {
                days_open: proposal.days_open(now),
                proposal,
            })
            .filter(|alert| alert.days_open >= threshold_days)
            .collect();
        alerts.sort_by(|a, b| {
            b.days_open
                .cmp(&a.days_open)
                .then(a.proposal.id().cmp(&b.proposal.id()))
        });
        Ok(alerts)
    }

    // =========================================================================
    // REPORTING
    // =========================================================================

    pub fn dashboard(&self) -> Result<DashboardStats, PipelineError> {
        let projects = self.store.list_projects()?;
        let proposals = self.store.list_proposals()?;
        Ok(DashboardStats::compute(
            &projects,
            &proposals,
            self.clock.now(),
        ))
    }

    /// Projects matching `filter`, ordered by id.
    pub fn list_projects(&self, filter: &ProjectFilter) -> Result<Vec<Project>, PipelineError> {
        Ok(self
            .store
            .list_projects()?
            .into_iter()
            .filter(|p| filter.matches(p))
            .collect())
    }

    pub fn summary(&self, filter: &ProjectFilter) -> Result<Summary, PipelineError> {
        let projects = self.list_projects(filter)?;
        Ok(Summary::compute(
            &projects,
            &self.registry(),
            self.clock.now(),
        ))
    }
}
