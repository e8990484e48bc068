//! # Project Aggregate
//!
//! The state machine at the heart of the engine. A Project owns its
//! current-stage pointer and the full stage history; every transition is
//! a method here and every method checks all of its preconditions before
//! touching any field, so a returned error always means "nothing changed".
//!
//! ```text
//!            advance (no open pendency, next active stage exists)
//!          ┌──────────┐
//!          ▼          │
//!   ┌─────────────────┴┐  archive (on last active stage)  ┌──────────┐
//!   │ active @ stage k ├─────────────────────────────────►│ archived │
//!   └────────┬─────────┘                                  └──────────┘
//!            │ cancel (reason)                            ┌───────────┐
//!            └───────────────────────────────────────────►│ cancelled │
//!                                                         └───────────┘
//! ```
//!
//! Invariants held by construction:
//! - while active, `current_stage_id == stage_history.last().stage_id`
//! - exactly one history entry per visited stage, in traversal order
//! - only the last entry is open; closed entries never change again

use crate::checklist::{ChecklistStatus, DocumentChecklist};
use crate::clock::whole_days_between;
use crate::primitives::MAX_CONTRACT_NUMBER_LENGTH;
use crate::registry::{Stage, StageRegistry};
use crate::types::{bounded_text, required_text};
use crate::{
    Cents, ClientId, InstitutionId, PipelineError, ProjectId, ProjectTypeId, ProposalId, StageId,
    UserId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// STATUS
// =============================================================================

/// Lifecycle status of a Project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Active,
    Archived,
    Cancelled,
}

impl ProjectStatus {
    /// Stable label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Active => "active",
            ProjectStatus::Archived => "archived",
            ProjectStatus::Cancelled => "cancelled",
        }
    }

    /// Parse a label produced by [`ProjectStatus::as_str`].
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(ProjectStatus::Active),
            "archived" => Some(ProjectStatus::Archived),
            "cancelled" => Some(ProjectStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// PENDENCIA / OBSERVACAO
// =============================================================================

/// A blocking issue raised against a stage visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pendencia {
    pub descricao: String,
    pub resolvida: bool,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// An append-only note on a stage visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observacao {
    pub texto: String,
    pub author_id: UserId,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// STAGE HISTORY ENTRY
// =============================================================================

/// The record of a Project's single visit to one Stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageHistoryEntry {
    pub stage_id: StageId,
    /// Stage name at the time the visit began.
    pub stage_name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Frozen when the visit closes.
    pub duration_days: Option<u32>,
    pub document_checklist: DocumentChecklist,
    pub pendencies: Vec<Pendencia>,
    pub observations: Vec<Observacao>,
}

impl StageHistoryEntry {
    fn open(stage: &Stage, now: DateTime<Utc>) -> Self {
        Self {
            stage_id: stage.id,
            stage_name: stage.name.clone(),
            started_at: now,
            ended_at: None,
            duration_days: None,
            document_checklist: DocumentChecklist::new(),
            pendencies: Vec::new(),
            observations: Vec::new(),
        }
    }

    /// True while this is the visit of the project's current stage.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Days spent on this visit: frozen value once closed, live floor otherwise.
    #[must_use]
    pub fn days_elapsed(&self, now: DateTime<Utc>) -> u32 {
        self.duration_days
            .unwrap_or_else(|| whole_days_between(self.started_at, now))
    }

    /// Number of pendencies not yet resolved.
    #[must_use]
    pub fn unresolved_pendencies(&self) -> usize {
        self.pendencies.iter().filter(|p| !p.resolvida).count()
    }

    fn close(&mut self, now: DateTime<Utc>) {
        if self.is_open() {
            self.duration_days = Some(whole_days_between(self.started_at, now));
            self.ended_at = Some(now);
        }
    }
}

// =============================================================================
// SEED
// =============================================================================

/// Commercial data a Project starts with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSeed {
    pub client_id: ClientId,
    pub project_type: ProjectTypeId,
    pub institution_id: InstitutionId,
    pub credit_amount: Cents,
}

impl ProjectSeed {
    /// Validate the seed's amounts.
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.credit_amount.positive("credit_amount")?;
        Ok(())
    }
}

/// Contract data filled in during the later stages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractDetails {
    pub contract_number: Option<String>,
    pub service_amount: Option<Cents>,
}

// =============================================================================
// PROJECT
// =============================================================================

/// A rural-credit loan application moving through the stage pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    id: ProjectId,
    client_id: ClientId,
    project_type: ProjectTypeId,
    institution_id: InstitutionId,
    credit_amount: Cents,
    service_amount: Option<Cents>,
    contract_number: Option<String>,
    current_stage_id: StageId,
    status: ProjectStatus,
    cancel_reason: Option<String>,
    source_proposal: Option<ProposalId>,
    started_at: DateTime<Utc>,
    archived_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    version: u64,
    stage_history: Vec<StageHistoryEntry>,
}

impl Project {
    /// Start a project on `first_stage` with one open history entry.
    pub fn start(
        id: ProjectId,
        seed: ProjectSeed,
        first_stage: &Stage,
        source_proposal: Option<ProposalId>,
        now: DateTime<Utc>,
    ) -> Result<Self, PipelineError> {
        seed.validate()?;
        Ok(Self {
            id,
            client_id: seed.client_id,
            project_type: seed.project_type,
            institution_id: seed.institution_id,
            credit_amount: seed.credit_amount,
            service_amount: None,
            contract_number: None,
            current_stage_id: first_stage.id,
            status: ProjectStatus::Active,
            cancel_reason: None,
            source_proposal,
            started_at: now,
            archived_at: None,
            cancelled_at: None,
            version: 1,
            stage_history: vec![StageHistoryEntry::open(first_stage, now)],
        })
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub fn id(&self) -> ProjectId {
        self.id
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn project_type(&self) -> ProjectTypeId {
        self.project_type
    }

    pub fn institution_id(&self) -> InstitutionId {
        self.institution_id
    }

    pub fn credit_amount(&self) -> Cents {
        self.credit_amount
    }

    pub fn service_amount(&self) -> Option<Cents> {
        self.service_amount
    }

    pub fn contract_number(&self) -> Option<&str> {
        self.contract_number.as_deref()
    }

    pub fn current_stage_id(&self) -> StageId {
        self.current_stage_id
    }

    pub fn status(&self) -> ProjectStatus {
        self.status
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    pub fn source_proposal(&self) -> Option<ProposalId> {
        self.source_proposal
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn archived_at(&self) -> Option<DateTime<Utc>> {
        self.archived_at
    }

    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        self.cancelled_at
    }

    /// Optimistic-lock version, bumped once per committed mutation.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn stage_history(&self) -> &[StageHistoryEntry] {
        &self.stage_history
    }

    pub fn is_active(&self) -> bool {
        self.status == ProjectStatus::Active
    }

    /// The visit of the current stage, if the project is still active.
    pub fn open_entry(&self) -> Option<&StageHistoryEntry> {
        self.stage_history.last().filter(|e| e.is_open())
    }

    /// Derived "has pendency" flag (tem_pendencia).
    ///
    /// True iff the open stage visit holds at least one unresolved pendency.
    pub fn tem_pendencia(&self) -> bool {
        self.open_entry()
            .is_some_and(|entry| entry.unresolved_pendencies() > 0)
    }

    /// Sum of days over every visit, live for the open one.
    pub fn total_duration_days(&self, now: DateTime<Utc>) -> u32 {
        self.stage_history
            .iter()
            .map(|e| e.days_elapsed(now))
            .fold(0u32, u32::saturating_add)
    }

    /// Checklist completion of the open visit against the registry.
    pub fn checklist_status(&self, registry: &StageRegistry) -> Option<ChecklistStatus> {
        self.open_entry().map(|entry| {
            let requirements = registry.requirements_for(entry.stage_id, self.project_type);
            entry.document_checklist.status(&requirements)
        })
    }

    /// Read model with derived fields, as served to presentation.
    pub fn view(&self, registry: &StageRegistry, now: DateTime<Utc>) -> ProjectView {
        ProjectView {
            tem_pendencia: self.tem_pendencia(),
            unresolved_pendencies: self
                .open_entry()
                .map_or(0, StageHistoryEntry::unresolved_pendencies),
            days_in_stage: self.open_entry().map(|e| e.days_elapsed(now)),
            checklist: self.checklist_status(registry),
            project: self.clone(),
        }
    }

    // =========================================================================
    // TRANSITIONS
    // =========================================================================

    /// Move to the next active stage in registry order.
    ///
    /// The target is always derived here, never taken from the caller.
    pub fn advance(
        &mut self,
        registry: &StageRegistry,
        now: DateTime<Utc>,
    ) -> Result<StageId, PipelineError> {
        self.ensure_active()?;
        let unresolved = self.open_entry_ref()?.unresolved_pendencies();
        if unresolved > 0 {
            return Err(PipelineError::BlockedByPendency {
                project: self.id,
                unresolved,
            });
        }
        let next = registry
            .next_active_stage_after(self.current_stage_id)?
            .ok_or(PipelineError::NoNextStage(self.id))?;

        self.open_entry_mut()?.close(now);
        self.stage_history.push(StageHistoryEntry::open(next, now));
        self.current_stage_id = next.id;
        Ok(next.id)
    }

    /// Advance, asserting that the caller's chosen target is the next stage.
    ///
    /// Used by drag-and-drop surfaces: the drop column is compared against
    /// the derived next stage and rejected when they differ.
    pub fn advance_to(
        &mut self,
        target: StageId,
        registry: &StageRegistry,
        now: DateTime<Utc>,
    ) -> Result<StageId, PipelineError> {
        self.ensure_active()?;
        let expected = registry
            .next_active_stage_after(self.current_stage_id)?
            .map(|s| s.id);
        if expected != Some(target) {
            return Err(PipelineError::InvalidTarget {
                project: self.id,
                requested: target,
                expected,
            });
        }
        self.advance(registry, now)
    }

    /// Archive a project sitting on the last active stage.
    pub fn archive(
        &mut self,
        registry: &StageRegistry,
        now: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        self.ensure_active()?;
        let on_final = registry
            .last_active_stage()
            .is_some_and(|last| last.id == self.current_stage_id);
        if !on_final {
            return Err(PipelineError::NotAtFinalStage(self.id));
        }
        self.open_entry_mut()?.close(now);
        self.status = ProjectStatus::Archived;
        self.archived_at = Some(now);
        Ok(())
    }

    /// Cancel an active project. Terminal.
    pub fn cancel(&mut self, reason: &str, now: DateTime<Utc>) -> Result<(), PipelineError> {
        self.ensure_active()?;
        let reason = required_text("motivo", reason)?;
        self.open_entry_mut()?.close(now);
        self.status = ProjectStatus::Cancelled;
        self.cancel_reason = Some(reason);
        self.cancelled_at = Some(now);
        Ok(())
    }

    /// Raise a pendency on the open stage visit. Returns its index.
    pub fn add_pendencia(
        &mut self,
        descricao: &str,
        now: DateTime<Utc>,
    ) -> Result<usize, PipelineError> {
        self.ensure_active()?;
        let descricao = required_text("descricao", descricao)?;
        let entry = self.open_entry_mut()?;
        entry.pendencies.push(Pendencia {
            descricao,
            resolvida: false,
            created_at: now,
            resolved_at: None,
        });
        Ok(entry.pendencies.len() - 1)
    }

    /// Resolve the pendency at `index` of the open stage visit.
    pub fn resolve_pendencia(
        &mut self,
        index: usize,
        now: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        self.ensure_active()?;
        let pendencia = self
            .open_entry_mut()?
            .pendencies
            .get_mut(index)
            .ok_or(PipelineError::PendencyNotFound(index))?;
        if pendencia.resolvida {
            return Err(PipelineError::PendencyAlreadyResolved(index));
        }
        pendencia.resolvida = true;
        pendencia.resolved_at = Some(now);
        Ok(())
    }

    /// Append a note to the open stage visit.
    pub fn add_observacao(
        &mut self,
        texto: &str,
        author: UserId,
        now: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        self.ensure_active()?;
        let texto = required_text("texto", texto)?;
        self.open_entry_mut()?.observations.push(Observacao {
            texto,
            author_id: author,
            created_at: now,
        });
        Ok(())
    }

    /// Merge checklist flags into the open stage visit.
    ///
    /// Keys must be requirements the registry defines for the current stage
    /// and this project's type. Closed visits are never edited.
    pub fn update_document_checklist(
        &mut self,
        patch: &BTreeMap<String, bool>,
        registry: &StageRegistry,
    ) -> Result<(), PipelineError> {
        self.ensure_active()?;
        let stage = self.current_stage_id;
        let requirements = registry.requirements_for(stage, self.project_type);
        self.open_entry_mut()?
            .document_checklist
            .apply_patch(stage, patch, &requirements)
    }

    /// Record contract number and/or service amount.
    ///
    /// Fields left as `None` keep their current value.
    pub fn update_contract_details(
        &mut self,
        details: &ContractDetails,
    ) -> Result<(), PipelineError> {
        self.ensure_active()?;
        let contract_number = details
            .contract_number
            .as_deref()
            .map(|n| bounded_text("contract_number", n, MAX_CONTRACT_NUMBER_LENGTH))
            .transpose()?;
        let service_amount = details
            .service_amount
            .map(|a| a.positive("service_amount"))
            .transpose()?;

        if let Some(number) = contract_number {
            self.contract_number = Some(number);
        }
        if let Some(amount) = service_amount {
            self.service_amount = Some(amount);
        }
        Ok(())
    }

    /// Bump the version ahead of a commit. Returns the version the store
    /// must still hold for the write to succeed.
    pub(crate) fn bump_version(&mut self) -> u64 {
        let expected = self.version;
        self.version = self.version.saturating_add(1);
        expected
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    fn ensure_active(&self) -> Result<(), PipelineError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(PipelineError::NotActive {
                project: self.id,
                status: self.status.as_str(),
            })
        }
    }

    fn open_entry_ref(&self) -> Result<&StageHistoryEntry, PipelineError> {
        self.open_entry().ok_or_else(|| missing_open_entry(self.id))
    }

    fn open_entry_mut(&mut self) -> Result<&mut StageHistoryEntry, PipelineError> {
        let id = self.id;
        self.stage_history
            .last_mut()
            .filter(|e| e.is_open())
            .ok_or_else(|| missing_open_entry(id))
    }
}

/// An active project without an open entry can only come from a corrupt row.
fn missing_open_entry(id: ProjectId) -> PipelineError {
    PipelineError::Deserialization(format!("active project {id} has no open stage entry"))
}

// =============================================================================
// VIEW
// =============================================================================

/// Project snapshot plus the derived fields presentation needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectView {
    pub project: Project,
    pub tem_pendencia: bool,
    pub unresolved_pendencies: usize,
    pub days_in_stage: Option<u32>,
    pub checklist: Option<ChecklistStatus>,
}

// =============================================================================
// TESTS
// =============================================================================
