//! # Stage Registry
//!
//! The ordered catalog of pipeline stages and the checklist requirements
//! that apply to each stage.
//!
//! The registry is a read-only snapshot. The engine loads it from the store
//! at start, hands `Arc<StageRegistry>` to every project operation, and
//! replaces the snapshot after each administrative write. Write validation
//! (unique active orders, unique field keys per stage) lives here so the
//! same rules apply to both storage backends.

use crate::{FieldKey, PipelineError, ProjectTypeId, RequirementId, StageId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// STAGE
// =============================================================================

/// One ordered step of the processing pipeline (Etapa).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub id: StageId,
    pub name: String,
    /// Position in the pipeline. Unique among active stages.
    pub order: u32,
    /// Soft-delete flag. Inactive stages stay referenced by history.
    pub active: bool,
}

// =============================================================================
// REQUIREMENT DEFINITION
// =============================================================================

/// A named checklist item applicable to a stage (Requisito).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementDefinition {
    pub id: RequirementId,
    pub stage_id: StageId,
    pub name: String,
    pub field_key: FieldKey,
    pub active: bool,
    /// Project types this item applies to. Empty means every type.
    pub applicable_project_types: BTreeSet<ProjectTypeId>,
}

impl RequirementDefinition {
    /// Whether this requirement applies to the given project type.
    #[must_use]
    pub fn applies_to(&self, project_type: ProjectTypeId) -> bool {
        self.applicable_project_types.is_empty()
            || self.applicable_project_types.contains(&project_type)
    }
}

// =============================================================================
// REGISTRY SNAPSHOT
// =============================================================================

/// Immutable snapshot of stages and requirements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageRegistry {
    stages: BTreeMap<StageId, Stage>,
    requirements: BTreeMap<RequirementId, RequirementDefinition>,
}

impl StageRegistry {
    /// Build a snapshot from stored rows.
    #[must_use]
    pub fn from_parts(
        stages: impl IntoIterator<Item = Stage>,
        requirements: impl IntoIterator<Item = RequirementDefinition>,
    ) -> Self {
        Self {
            stages: stages.into_iter().map(|s| (s.id, s)).collect(),
            requirements: requirements.into_iter().map(|r| (r.id, r)).collect(),
        }
    }

    /// True when no stage has ever been configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Look up a stage by id, active or not.
    pub fn stage(&self, id: StageId) -> Result<&Stage, PipelineError> {
        self.stages.get(&id).ok_or(PipelineError::StageNotFound(id))
    }

    /// Look up a requirement by id.
    pub fn requirement(&self, id: RequirementId) -> Result<&RequirementDefinition, PipelineError> {
        self.requirements
            .get(&id)
            .ok_or(PipelineError::RequirementNotFound(id))
    }

    /// Active stages sorted by `order`.
    #[must_use]
    pub fn list_active_stages_ordered(&self) -> Vec<&Stage> {
        let mut stages: Vec<&Stage> = self.stages.values().filter(|s| s.active).collect();
        stages.sort_by_key(|s| (s.order, s.id));
        stages
    }

    /// Every stage, including deactivated ones, sorted by `order`.
    #[must_use]
    pub fn list_all_stages(&self) -> Vec<&Stage> {
        let mut stages: Vec<&Stage> = self.stages.values().collect();
        stages.sort_by_key(|s| (s.order, s.id));
        stages
    }

    /// Lowest-order active stage, where new projects begin.
    #[must_use]
    pub fn first_active_stage(&self) -> Option<&Stage> {
        self.stages
            .values()
            .filter(|s| s.active)
            .min_by_key(|s| s.order)
    }

    /// Highest-order active stage, the only one a project may be archived from.
    #[must_use]
    pub fn last_active_stage(&self) -> Option<&Stage> {
        self.stages
            .values()
            .filter(|s| s.active)
            .max_by_key(|s| s.order)
    }

    /// The active stage immediately after `current` in order.
    ///
    /// `current` may itself be inactive; its stored order still anchors the
    /// position of projects that sit on it.
    pub fn next_active_stage_after(&self, current: StageId) -> Result<Option<&Stage>, PipelineError> {
        let anchor = self.stage(current)?.order;
        Ok(self
            .stages
            .values()
            .filter(|s| s.active && s.order > anchor)
            .min_by_key(|s| s.order))
    }

    /// Active requirements of `stage` that apply to `project_type`.
    #[must_use]
    pub fn requirements_for(
        &self,
        stage: StageId,
        project_type: ProjectTypeId,
    ) -> Vec<&RequirementDefinition> {
        self.requirements
            .values()
            .filter(|r| r.stage_id == stage && r.active && r.applies_to(project_type))
            .collect()
    }

    /// Every requirement row of a stage, active or not.
    #[must_use]
    pub fn all_requirements_of(&self, stage: StageId) -> Vec<&RequirementDefinition> {
        self.requirements
            .values()
            .filter(|r| r.stage_id == stage)
            .collect()
    }

    // =========================================================================
    // WRITE VALIDATION
    // =========================================================================

    /// Check that `order` may be taken by an active stage other than `except`.
    pub fn ensure_order_available(
        &self,
        order: u32,
        except: Option<StageId>,
    ) -> Result<(), PipelineError> {
        if order == 0 {
            return Err(PipelineError::InvalidOrder);
        }
        let taken = self
            .stages
            .values()
            .any(|s| s.active && s.order == order && Some(s.id) != except);
        if taken {
            return Err(PipelineError::DuplicateStageOrder(order));
        }
        Ok(())
    }

    /// Validate a swap of two stages' orders and return the updated rows.
    ///
    /// The result must keep every active order unique; a swap that would
    /// collide with a third active stage is rejected.
    pub fn plan_order_swap(&self, a: StageId, b: StageId) -> Result<(Stage, Stage), PipelineError> {
        let mut first = self.stage(a)?.clone();
        let mut second = self.stage(b)?.clone();
        std::mem::swap(&mut first.order, &mut second.order);

        for updated in [&first, &second] {
            if !updated.active {
                continue;
            }
            let collides = self.stages.values().any(|s| {
                s.active && s.id != first.id && s.id != second.id && s.order == updated.order
            });
            if collides {
                return Err(PipelineError::DuplicateStageOrder(updated.order));
            }
        }
        Ok((first, second))
    }

    /// Check that `key` is not yet defined on `stage`.
    pub fn ensure_field_key_available(
        &self,
        stage: StageId,
        key: &FieldKey,
    ) -> Result<(), PipelineError> {
        self.stage(stage)?;
        if self
            .requirements
            .values()
            .any(|r| r.stage_id == stage && &r.field_key == key)
        {
            return Err(PipelineError::DuplicateFieldKey {
                stage,
                key: key.to_string(),
            });
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(id: u64, name: &str, order: u32, active: bool) -> Stage {
        Stage {
            id: StageId(id),
            name: name.to_string(),
            order,
            active,
        }
    }

    fn requirement(id: u64, stage: u64, key: &str, types: &[u64]) -> RequirementDefinition {
        RequirementDefinition {
            id: RequirementId(id),
            stage_id: StageId(stage),
            name: key.to_string(),
            field_key: FieldKey::parse(key).expect("key"),
            active: true,
            applicable_project_types: types.iter().map(|t| ProjectTypeId(*t)).collect(),
        }
    }

    fn registry() -> StageRegistry {
        StageRegistry::from_parts(
            vec![
                stage(1, "Cadastro", 1, true),
                stage(2, "Documentos", 2, true),
                stage(3, "Antigo", 3, false),
                stage(4, "Creditado", 4, true),
            ],
            vec![
                requirement(1, 2, "car", &[]),
                requirement(2, 2, "gta_emitido", &[7]),
            ],
        )
    }

    #[test]
    fn active_stages_in_order() {
        let reg = registry();
        let names: Vec<_> = reg
            .list_active_stages_ordered()
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(names, vec!["Cadastro", "Documentos", "Creditado"]);
        assert_eq!(reg.list_all_stages().len(), 4);
    }

    #[test]
    fn next_stage_skips_inactive() {
        let reg = registry();
        let next = reg.next_active_stage_after(StageId(2)).expect("known stage");
        assert_eq!(next.map(|s| s.id), Some(StageId(4)));
        assert!(reg.next_active_stage_after(StageId(4)).expect("known").is_none());
    }

    #[test]
    fn next_stage_from_unknown_stage_fails() {
        let reg = registry();
        assert_eq!(
            reg.next_active_stage_after(StageId(99)),
            Err(PipelineError::StageNotFound(StageId(99)))
        );
    }

    #[test]
    fn first_and_last_active() {
        let reg = registry();
        assert_eq!(reg.first_active_stage().map(|s| s.id), Some(StageId(1)));
        assert_eq!(reg.last_active_stage().map(|s| s.id), Some(StageId(4)));
    }

    #[test]
    fn requirements_filtered_by_project_type() {
        let reg = registry();
        let generic: Vec<_> = reg
            .requirements_for(StageId(2), ProjectTypeId(1))
            .iter()
            .map(|r| r.field_key.as_str())
            .collect();
        assert_eq!(generic, vec!["car"]);

        let livestock = reg.requirements_for(StageId(2), ProjectTypeId(7));
        assert_eq!(livestock.len(), 2);
    }

    #[test]
    fn duplicate_active_order_rejected() {
        let reg = registry();
        assert_eq!(
            reg.ensure_order_available(2, None),
            Err(PipelineError::DuplicateStageOrder(2))
        );
        // The inactive stage's order is free for reuse.
        assert!(reg.ensure_order_available(3, None).is_ok());
        // A stage may keep its own order.
        assert!(reg.ensure_order_available(2, Some(StageId(2))).is_ok());
        assert_eq!(
            reg.ensure_order_available(0, None),
            Err(PipelineError::InvalidOrder)
        );
    }

    #[test]
    fn swap_exchanges_orders() {
        let reg = registry();
        let (a, b) = reg.plan_order_swap(StageId(1), StageId(4)).expect("swap");
        assert_eq!((a.order, b.order), (4, 1));
    }

    #[test]
    fn swap_rejects_collision_with_third_stage() {
        let reg = StageRegistry::from_parts(
            vec![
                stage(1, "A", 1, true),
                stage(2, "B", 2, false),
                stage(3, "C", 2, true),
                stage(4, "D", 4, true),
            ],
            vec![],
        );
        // D would take order 2, which C already holds.
        assert_eq!(
            reg.plan_order_swap(StageId(2), StageId(4)),
            Err(PipelineError::DuplicateStageOrder(2))
        );
    }

    #[test]
    fn duplicate_field_key_rejected() {
        let reg = registry();
        let key = FieldKey::parse("car").expect("key");
        assert!(matches!(
            reg.ensure_field_key_available(StageId(2), &key),
            Err(PipelineError::DuplicateFieldKey { .. })
        ));
        assert!(reg.ensure_field_key_available(StageId(1), &key).is_ok());
    }
}
