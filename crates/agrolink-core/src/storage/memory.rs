//! In-memory store: every table is a `BTreeMap` behind one `RwLock`, so each
//! write method is trivially a single transaction.

use super::{PipelineStore, Sequence, check_version};
use crate::project::Project;
use crate::proposal::Proposal;
use crate::registry::{RequirementDefinition, Stage, StageRegistry};
use crate::{PipelineError, ProjectId, ProposalId, RequirementId, StageId};
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct Tables {
    counters: BTreeMap<Sequence, u64>,
    stages: BTreeMap<StageId, Stage>,
    requirements: BTreeMap<RequirementId, RequirementDefinition>,
    projects: BTreeMap<ProjectId, Project>,
    proposals: BTreeMap<ProposalId, Proposal>,
}

/// Volatile store for tests and `--backend memory`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl PipelineStore for MemoryStore {
    fn allocate_id(&self, sequence: Sequence) -> Result<u64, PipelineError> {
        let mut tables = self.write();
        let counter = tables.counters.entry(sequence).or_insert(0);
        *counter = counter.saturating_add(1);
        Ok(*counter)
    }

    fn load_registry(&self) -> Result<StageRegistry, PipelineError> {
        let tables = self.read();
        Ok(StageRegistry::from_parts(
            tables.stages.values().cloned(),
            tables.requirements.values().cloned(),
        ))
    }

    fn insert_stage(&self, stage: &Stage) -> Result<(), PipelineError> {
        self.write().stages.insert(stage.id, stage.clone());
        Ok(())
    }

    fn update_stage(&self, stage: &Stage) -> Result<(), PipelineError> {
        let mut tables = self.write();
        let row = tables
            .stages
            .get_mut(&stage.id)
            .ok_or(PipelineError::StageNotFound(stage.id))?;
        *row = stage.clone();
        Ok(())
    }

    fn swap_stage_order(&self, first: &Stage, second: &Stage) -> Result<(), PipelineError> {
        let mut tables = self.write();
        for stage in [first, second] {
            if !tables.stages.contains_key(&stage.id) {
                return Err(PipelineError::StageNotFound(stage.id));
            }
        }
        tables.stages.insert(first.id, first.clone());
        tables.stages.insert(second.id, second.clone());
        Ok(())
    }

    fn seed_registry(
        &self,
        stages: &[Stage],
        requirements: &[RequirementDefinition],
    ) -> Result<bool, PipelineError> {
        let mut tables = self.write();
        if !tables.stages.is_empty() {
            return Ok(false);
        }
        tables
            .stages
            .extend(stages.iter().map(|s| (s.id, s.clone())));
        tables
            .requirements
            .extend(requirements.iter().map(|r| (r.id, r.clone())));
        Ok(true)
    }

    fn insert_requirement(
        &self,
        requirement: &RequirementDefinition,
    ) -> Result<(), PipelineError> {
        self.write()
            .requirements
            .insert(requirement.id, requirement.clone());
        Ok(())
    }

    fn update_requirement(
        &self,
        requirement: &RequirementDefinition,
    ) -> Result<(), PipelineError> {
        let mut tables = self.write();
        let row = tables
            .requirements
            .get_mut(&requirement.id)
            .ok_or(PipelineError::RequirementNotFound(requirement.id))?;
        *row = requirement.clone();
        Ok(())
    }

    fn get_project(&self, id: ProjectId) -> Result<Option<Project>, PipelineError> {
        Ok(self.read().projects.get(&id).cloned())
    }

    fn list_projects(&self) -> Result<Vec<Project>, PipelineError> {
        Ok(self.read().projects.values().cloned().collect())
    }

    fn insert_project(&self, project: &Project) -> Result<(), PipelineError> {
        self.write().projects.insert(project.id(), project.clone());
        Ok(())
    }

    fn update_project(
        &self,
        project: &Project,
        expected_version: u64,
    ) -> Result<(), PipelineError> {
        let mut tables = self.write();
        let row = tables
            .projects
            .get_mut(&project.id())
            .ok_or(PipelineError::ProjectNotFound(project.id()))?;
        check_version(row, expected_version)?;
        *row = project.clone();
        Ok(())
    }

    fn get_proposal(&self, id: ProposalId) -> Result<Option<Proposal>, PipelineError> {
        Ok(self.read().proposals.get(&id).cloned())
    }

    fn list_proposals(&self) -> Result<Vec<Proposal>, PipelineError> {
        Ok(self.read().proposals.values().cloned().collect())
    }

    fn insert_proposal(&self, proposal: &Proposal) -> Result<(), PipelineError> {
        self.write().proposals.insert(proposal.id(), proposal.clone());
        Ok(())
    }

    fn update_proposal(&self, proposal: &Proposal) -> Result<(), PipelineError> {
        let mut tables = self.write();
        let row = tables
            .proposals
            .get_mut(&proposal.id())
            .ok_or(PipelineError::ProposalNotFound(proposal.id()))?;
        *row = proposal.clone();
        Ok(())
    }

    fn commit_conversion(
        &self,
        project: &Project,
        proposal: &Proposal,
    ) -> Result<(), PipelineError> {
        let mut tables = self.write();
        tables
            .proposals
            .get(&proposal.id())
            .ok_or(PipelineError::ProposalNotFound(proposal.id()))?
            .ensure_open()?;
        tables.projects.insert(project.id(), project.clone());
        tables.proposals.insert(proposal.id(), proposal.clone());
        Ok(())
    }
}
