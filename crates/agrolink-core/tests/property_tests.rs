//! # Property-Based Tests
//!
//! Invariants of the Project state machine under arbitrary operation
//! sequences, checked with proptest against a pure in-memory registry.

use agrolink_core::{
    Cents, ClientId, FieldKey, InstitutionId, PipelineError, Project, ProjectId, ProjectSeed,
    ProjectStatus, ProjectTypeId, Stage, StageId, StageRegistry,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::collection::vec;
use proptest::prelude::*;

// =============================================================================
// FIXTURES
// =============================================================================

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 6, 7, 0, 0)
        .single()
        .expect("valid timestamp")
}

/// Registry with `count` active stages whose orders are spread out and
/// whose ids are deliberately not in order.
fn registry(count: u64) -> StageRegistry {
    let stages = (1..=count).map(|i| Stage {
        id: StageId(1_000 - i),
        name: format!("Etapa {i}"),
        order: (i as u32) * 10,
        active: true,
    });
    StageRegistry::from_parts(stages, vec![])
}

fn start(registry: &StageRegistry) -> Project {
    let first = registry.first_active_stage().expect("stages configured");
    Project::start(
        ProjectId(1),
        ProjectSeed {
            client_id: ClientId(1),
            project_type: ProjectTypeId(1),
            institution_id: InstitutionId(1),
            credit_amount: Cents(1_000_000),
        },
        first,
        None,
        t0(),
    )
    .expect("start")
}

#[derive(Debug, Clone)]
enum Op {
    Advance,
    AddPendencia,
    Resolve(usize),
    Wait(i64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Advance),
        2 => Just(Op::AddPendencia),
        2 => (0usize..4).prop_map(Op::Resolve),
        1 => (1i64..200).prop_map(Op::Wait),
    ]
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Advance is blocked iff the open entry has an unresolved pendency,
    /// and history always follows registry order without skips or repeats.
    #[test]
    fn history_follows_registry_order(
        stage_count in 2u64..7,
        ops in vec(op_strategy(), 0..40)
    ) {
        let reg = registry(stage_count);
        let ordered: Vec<StageId> = reg.list_active_stages_ordered().iter().map(|s| s.id).collect();
        let mut project = start(&reg);
        let mut now = t0();

        for op in ops {
            match op {
                Op::Advance => {
                    let unresolved = project.open_entry().map_or(0, |e| e.unresolved_pendencies());
                    let before = project.clone();
                    match project.advance(&reg, now) {
                        Ok(_) => prop_assert_eq!(unresolved, 0),
                        Err(PipelineError::BlockedByPendency { unresolved: n, .. }) => {
                            prop_assert!(n > 0);
                            prop_assert_eq!(n, unresolved);
                            prop_assert_eq!(&project, &before);
                        }
                        Err(PipelineError::NoNextStage(_)) => {
                            prop_assert_eq!(unresolved, 0);
                            prop_assert_eq!(Some(&project.current_stage_id()), ordered.last());
                            prop_assert_eq!(&project, &before);
                        }
                        Err(other) => prop_assert!(false, "unexpected error: {other}"),
                    }
                }
                Op::AddPendencia => {
                    project.add_pendencia("pendência", now).expect("active project");
                }
                Op::Resolve(index) => {
                    let _ = project.resolve_pendencia(index, now);
                }
                Op::Wait(hours) => now += Duration::hours(hours),
            }
            prop_assert_eq!(project.tem_pendencia(),
                project.open_entry().is_some_and(|e| e.unresolved_pendencies() > 0));
        }

        let visited: Vec<StageId> = project.stage_history().iter().map(|e| e.stage_id).collect();
        prop_assert_eq!(&visited[..], &ordered[..visited.len()]);
        prop_assert_eq!(project.current_stage_id(), *visited.last().expect("non-empty history"));
        let open = project.stage_history().iter().filter(|e| e.is_open()).count();
        prop_assert_eq!(open, 1);
    }

    /// Archive succeeds iff the project sits on the highest-order active stage.
    #[test]
    fn archive_only_from_last_stage(stage_count in 1u64..7, advances in 0usize..7) {
        let reg = registry(stage_count);
        let mut project = start(&reg);
        for _ in 0..advances {
            let _ = project.advance(&reg, t0());
        }
        let on_last = reg.last_active_stage().map(|s| s.id) == Some(project.current_stage_id());

        match project.archive(&reg, t0()) {
            Ok(()) => {
                prop_assert!(on_last);
                prop_assert_eq!(project.status(), ProjectStatus::Archived);
            }
            Err(e) => {
                prop_assert!(!on_last);
                prop_assert_eq!(e, PipelineError::NotAtFinalStage(ProjectId(1)));
            }
        }
    }

    /// A closed entry's duration is the floor of elapsed days and never changes.
    #[test]
    fn closed_duration_is_floor_and_frozen(hours in 0i64..2_000, later in 0i64..10_000) {
        let reg = registry(2);
        let mut project = start(&reg);
        let closed_at = t0() + Duration::hours(hours);
        project.advance(&reg, closed_at).expect("advance");

        let entry = &project.stage_history()[0];
        let expected = u32::try_from(hours / 24).expect("small");
        prop_assert_eq!(entry.duration_days, Some(expected));
        prop_assert_eq!(entry.days_elapsed(closed_at + Duration::hours(later)), expected);
    }

    /// Well-formed field keys parse; anything with other characters is rejected.
    #[test]
    fn field_key_shape(raw in "[a-z0-9_]{1,64}", bad in "[a-z]{0,8}[A-Z-][a-z]{0,8}") {
        let key = FieldKey::parse(&raw).expect("valid key");
        prop_assert_eq!(key.as_str(), raw.as_str());
        prop_assert!(FieldKey::parse(&bad).is_err());
    }
}
