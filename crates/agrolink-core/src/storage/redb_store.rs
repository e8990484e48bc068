//! # redb-backed Pipeline Storage
//!
//! A disk-backed store using the redb embedded database, providing:
//! - ACID transactions (a conversion or order swap is one write transaction)
//! - Crash safety (copy-on-write B-trees)
//! - MVCC (concurrent readers, single writer)
//!
//! Rows are keyed by their `u64` id and stored as postcard bytes. Id
//! counters live in the metadata table.

use super::{PipelineStore, Sequence, check_version, decode, encode};
use crate::project::Project;
use crate::proposal::Proposal;
use crate::registry::{RequirementDefinition, Stage, StageRegistry};
use crate::{PipelineError, ProjectId, ProposalId};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;

type RowTable = TableDefinition<'static, u64, &'static [u8]>;

/// Table for stages: StageId(u64) -> serialized Stage
const STAGES: RowTable = TableDefinition::new("stages");

/// Table for requirement definitions: RequirementId(u64) -> serialized RequirementDefinition
const REQUIREMENTS: RowTable = TableDefinition::new("requirements");

/// Table for projects: ProjectId(u64) -> serialized Project
const PROJECTS: RowTable = TableDefinition::new("projects");

/// Table for proposals: ProposalId(u64) -> serialized Proposal
const PROPOSALS: RowTable = TableDefinition::new("proposals");

/// Table for metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

fn io_err(e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Io(e.to_string())
}

/// A disk-backed pipeline store using redb.
pub struct RedbStore {
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a pipeline database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let db = Database::create(path.as_ref()).map_err(io_err)?;

        // Initialize tables if they don't exist
        {
            let write_txn = db.begin_write().map_err(io_err)?;
            for table in [STAGES, REQUIREMENTS, PROJECTS, PROPOSALS] {
                let _ = write_txn.open_table(table).map_err(io_err)?;
            }
            let _ = write_txn.open_table(METADATA).map_err(io_err)?;
            write_txn.commit().map_err(io_err)?;
        }

        Ok(Self { db })
    }

    fn get_row<T: DeserializeOwned>(
        &self,
        table: RowTable,
        id: u64,
    ) -> Result<Option<T>, PipelineError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(table).map_err(io_err)?;
        let row = table.get(id).map_err(io_err)?;
        row.map(|bytes| decode(bytes.value())).transpose()
    }

    fn list_rows<T: DeserializeOwned>(&self, table: RowTable) -> Result<Vec<T>, PipelineError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(table).map_err(io_err)?;
        let mut rows = Vec::new();
        for entry in table.iter().map_err(io_err)? {
            let (_, value) = entry.map_err(io_err)?;
            rows.push(decode(value.value())?);
        }
        Ok(rows)
    }

    /// Write one row. With `must_exist`, a missing row yields `missing` and
    /// the transaction is dropped uncommitted.
    fn put_row<T: Serialize>(
        &self,
        table: RowTable,
        id: u64,
        value: &T,
        must_exist: Option<PipelineError>,
    ) -> Result<(), PipelineError> {
        let bytes = encode(value)?;
        let write_txn = self.db.begin_write().map_err(io_err)?;
        {
            let mut table = write_txn.open_table(table).map_err(io_err)?;
            if let Some(missing) = must_exist {
                if table.get(id).map_err(io_err)?.is_none() {
                    return Err(missing);
                }
            }
            table.insert(id, bytes.as_slice()).map_err(io_err)?;
        }
        write_txn.commit().map_err(io_err)?;
        Ok(())
    }
}

impl PipelineStore for RedbStore {
    fn allocate_id(&self, sequence: Sequence) -> Result<u64, PipelineError> {
        let write_txn = self.db.begin_write().map_err(io_err)?;
        let next = {
            let mut table = write_txn.open_table(METADATA).map_err(io_err)?;
            let last = table
                .get(sequence.key())
                .map_err(io_err)?
                .map(|v| v.value())
                .unwrap_or(0);
            let next = last.saturating_add(1);
            table.insert(sequence.key(), next).map_err(io_err)?;
            next
        };
        write_txn.commit().map_err(io_err)?;
        Ok(next)
    }

    fn load_registry(&self) -> Result<StageRegistry, PipelineError> {
        let stages: Vec<Stage> = self.list_rows(STAGES)?;
        let requirements: Vec<RequirementDefinition> = self.list_rows(REQUIREMENTS)?;
        Ok(StageRegistry::from_parts(stages, requirements))
    }

    fn insert_stage(&self, stage: &Stage) -> Result<(), PipelineError> {
        self.put_row(STAGES, stage.id.0, stage, None)
    }

    fn update_stage(&self, stage: &Stage) -> Result<(), PipelineError> {
        self.put_row(
            STAGES,
            stage.id.0,
            stage,
            Some(PipelineError::StageNotFound(stage.id)),
        )
    }

    fn swap_stage_order(&self, first: &Stage, second: &Stage) -> Result<(), PipelineError> {
        let first_bytes = encode(first)?;
        let second_bytes = encode(second)?;
        let write_txn = self.db.begin_write().map_err(io_err)?;
        {
            let mut table = write_txn.open_table(STAGES).map_err(io_err)?;
            for stage in [first, second] {
                if table.get(stage.id.0).map_err(io_err)?.is_none() {
                    return Err(PipelineError::StageNotFound(stage.id));
                }
            }
            table
                .insert(first.id.0, first_bytes.as_slice())
                .map_err(io_err)?;
            table
                .insert(second.id.0, second_bytes.as_slice())
                .map_err(io_err)?;
        }
        write_txn.commit().map_err(io_err)?;
        Ok(())
    }

    fn seed_registry(
        &self,
        stages: &[Stage],
        requirements: &[RequirementDefinition],
    ) -> Result<bool, PipelineError> {
        let stage_rows = stages
            .iter()
            .map(|s| Ok((s.id.0, encode(s)?)))
            .collect::<Result<Vec<_>, PipelineError>>()?;
        let requirement_rows = requirements
            .iter()
            .map(|r| Ok((r.id.0, encode(r)?)))
            .collect::<Result<Vec<_>, PipelineError>>()?;

        let write_txn = self.db.begin_write().map_err(io_err)?;
        {
            let mut stage_table = write_txn.open_table(STAGES).map_err(io_err)?;
            if stage_table.first().map_err(io_err)?.is_some() {
                return Ok(false);
            }
            for (id, bytes) in &stage_rows {
                stage_table.insert(*id, bytes.as_slice()).map_err(io_err)?;
            }
            let mut requirement_table = write_txn.open_table(REQUIREMENTS).map_err(io_err)?;
            for (id, bytes) in &requirement_rows {
                requirement_table
                    .insert(*id, bytes.as_slice())
                    .map_err(io_err)?;
            }
        }
        write_txn.commit().map_err(io_err)?;
        Ok(true)
    }

    fn insert_requirement(
        &self,
        requirement: &RequirementDefinition,
    ) -> Result<(), PipelineError> {
        self.put_row(REQUIREMENTS, requirement.id.0, requirement, None)
    }

    fn update_requirement(
        &self,
        requirement: &RequirementDefinition,
    ) -> Result<(), PipelineError> {
        self.put_row(
            REQUIREMENTS,
            requirement.id.0,
            requirement,
            Some(PipelineError::RequirementNotFound(requirement.id)),
        )
    }

    fn get_project(&self, id: ProjectId) -> Result<Option<Project>, PipelineError> {
        self.get_row(PROJECTS, id.0)
    }

    fn list_projects(&self) -> Result<Vec<Project>, PipelineError> {
        self.list_rows(PROJECTS)
    }

    fn insert_project(&self, project: &Project) -> Result<(), PipelineError> {
        self.put_row(PROJECTS, project.id().0, project, None)
    }

    fn update_project(
        &self,
        project: &Project,
        expected_version: u64,
    ) -> Result<(), PipelineError> {
        let bytes = encode(project)?;
        let write_txn = self.db.begin_write().map_err(io_err)?;
        {
            let mut table = write_txn.open_table(PROJECTS).map_err(io_err)?;
            let stored: Project = {
                let row = table.get(project.id().0).map_err(io_err)?;
                let row = row.ok_or(PipelineError::ProjectNotFound(project.id()))?;
                decode(row.value())?
            };
            check_version(&stored, expected_version)?;
            table
                .insert(project.id().0, bytes.as_slice())
                .map_err(io_err)?;
        }
        write_txn.commit().map_err(io_err)?;
        Ok(())
    }

    fn get_proposal(&self, id: ProposalId) -> Result<Option<Proposal>, PipelineError> {
        self.get_row(PROPOSALS, id.0)
    }

    fn list_proposals(&self) -> Result<Vec<Proposal>, PipelineError> {
        self.list_rows(PROPOSALS)
    }

    fn insert_proposal(&self, proposal: &Proposal) -> Result<(), PipelineError> {
        self.put_row(PROPOSALS, proposal.id().0, proposal, None)
    }

    fn update_proposal(&self, proposal: &Proposal) -> Result<(), PipelineError> {
        self.put_row(
            PROPOSALS,
            proposal.id().0,
            proposal,
            Some(PipelineError::ProposalNotFound(proposal.id())),
        )
    }

    fn commit_conversion(
        &self,
        project: &Project,
        proposal: &Proposal,
    ) -> Result<(), PipelineError> {
        let project_bytes = encode(project)?;
        let proposal_bytes = encode(proposal)?;
        let write_txn = self.db.begin_write().map_err(io_err)?;
        {
            let mut projects = write_txn.open_table(PROJECTS).map_err(io_err)?;
            let mut proposals = write_txn.open_table(PROPOSALS).map_err(io_err)?;

            // The project row goes in first; any failure below drops the
            // transaction and takes it back out.
            projects
                .insert(project.id().0, project_bytes.as_slice())
                .map_err(io_err)?;

            let stored: Proposal = {
                let row = proposals.get(proposal.id().0).map_err(io_err)?;
                let row = row.ok_or(PipelineError::ProposalNotFound(proposal.id()))?;
                decode(row.value())?
            };
            stored.ensure_open()?;

            proposals
                .insert(proposal.id().0, proposal_bytes.as_slice())
                .map_err(io_err)?;
        }
        write_txn.commit().map_err(io_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposal::NewProposal;
    use crate::{Cents, ClientId, InstitutionId, ProjectTypeId, StageId};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn store() -> (TempDir, RedbStore) {
        let dir = TempDir::new().expect("temp dir");
        let store = RedbStore::open(dir.path().join("pipeline.redb")).expect("open");
        (dir, store)
    }

    #[test]
    fn ids_are_monotonic_per_sequence() {
        let (_dir, store) = store();
        assert_eq!(store.allocate_id(Sequence::Stage).expect("id"), 1);
        assert_eq!(store.allocate_id(Sequence::Stage).expect("id"), 2);
        assert_eq!(store.allocate_id(Sequence::Project).expect("id"), 1);
    }

    #[test]
    fn stages_survive_reopen() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("pipeline.redb");
        {
            let store = RedbStore::open(&path).expect("open");
            store
                .insert_stage(&Stage {
                    id: StageId(1),
                    name: "Cadastro".into(),
                    order: 1,
                    active: true,
                })
                .expect("insert");
        }
        let store = RedbStore::open(&path).expect("reopen");
        let registry = store.load_registry().expect("load");
        assert_eq!(registry.stage(StageId(1)).map(|s| s.order), Ok(1));
    }

    #[test]
    fn seed_writes_once() {
        let (_dir, store) = store();
        let stage = Stage {
            id: StageId(1),
            name: "Cadastro".into(),
            order: 1,
            active: true,
        };
        assert_eq!(store.seed_registry(&[stage.clone()], &[]), Ok(true));

        let other = Stage {
            id: StageId(2),
            name: "Outra".into(),
            order: 2,
            ..stage
        };
        assert_eq!(store.seed_registry(&[other], &[]), Ok(false));
        let registry = store.load_registry().expect("load");
        assert_eq!(registry.list_all_stages().len(), 1);
    }

    #[test]
    fn update_of_missing_stage_fails() {
        let (_dir, store) = store();
        let stage = Stage {
            id: StageId(9),
            name: "X".into(),
            order: 1,
            active: true,
        };
        assert_eq!(
            store.update_stage(&stage),
            Err(PipelineError::StageNotFound(StageId(9)))
        );
    }

    #[test]
    fn proposal_round_trips_through_postcard() {
        let (_dir, store) = store();
        let now = Utc
            .with_ymd_and_hms(2025, 1, 15, 10, 0, 0)
            .single()
            .expect("valid timestamp");
        let proposal = Proposal::open(
            ProposalId(1),
            NewProposal {
                client_id: ClientId(1),
                project_type: ProjectTypeId(2),
                institution_id: InstitutionId(3),
                credit_amount: Cents(1_000),
            },
            now,
        )
        .expect("open");
        store.insert_proposal(&proposal).expect("insert");
        assert_eq!(store.get_proposal(ProposalId(1)), Ok(Some(proposal)));
        assert_eq!(store.get_proposal(ProposalId(2)), Ok(None));
    }
}
