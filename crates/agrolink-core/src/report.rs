//! # Reporting
//!
//! Read-only aggregation over stored projects and proposals: dashboard
//! counters, filtered listings and the summary report. Nothing here
//! mutates an aggregate.

use crate::project::{Project, ProjectStatus};
use crate::proposal::{Proposal, ProposalStatus};
use crate::registry::StageRegistry;
use crate::{Cents, ClientId, ProjectId, StageId};
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// FILTER
// =============================================================================

/// Criteria for project listings. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectFilter {
    pub status: Option<ProjectStatus>,
    pub started_year: Option<i32>,
    pub started_month: Option<u32>,
    pub stage: Option<StageId>,
    pub tem_pendencia: Option<bool>,
    pub credit_min: Option<Cents>,
    pub credit_max: Option<Cents>,
    pub client: Option<ClientId>,
}

impl ProjectFilter {
    /// Filter matching active projects only.
    #[must_use]
    pub fn active() -> Self {
        Self {
            status: Some(ProjectStatus::Active),
            ..Self::default()
        }
    }

    /// Whether `project` satisfies every set criterion.
    #[must_use]
    pub fn matches(&self, project: &Project) -> bool {
        let started = project.started_at();
        self.status.is_none_or(|s| project.status() == s)
            && self.started_year.is_none_or(|y| started.year() == y)
            && self.started_month.is_none_or(|m| started.month() == m)
            && self.stage.is_none_or(|s| project.current_stage_id() == s)
            && self
                .tem_pendencia
                .is_none_or(|flag| project.tem_pendencia() == flag)
            && self
                .credit_min
                .is_none_or(|min| project.credit_amount() >= min)
            && self
                .credit_max
                .is_none_or(|max| project.credit_amount() <= max)
            && self.client.is_none_or(|c| project.client_id() == c)
    }
}

fn same_month(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.year() == b.year() && a.month() == b.month()
}

// =============================================================================
// DASHBOARD
// =============================================================================

/// Headline counters for the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub active_projects: usize,
    /// Active projects started in the current calendar month.
    pub started_this_month: usize,
    pub archived_this_month: usize,
    pub with_pendency: usize,
    pub total_active_credit: Cents,
    pub open_proposals: usize,
}

impl DashboardStats {
    #[must_use]
    pub fn compute(projects: &[Project], proposals: &[Proposal], now: DateTime<Utc>) -> Self {
        let mut stats = Self::default();
        for project in projects {
            if project.is_active() {
                stats.active_projects += 1;
                stats.total_active_credit =
                    stats.total_active_credit.saturating_add(project.credit_amount());
                if same_month(project.started_at(), now) {
                    stats.started_this_month += 1;
                }
                if project.tem_pendencia() {
                    stats.with_pendency += 1;
                }
            }
            if project.archived_at().is_some_and(|at| same_month(at, now)) {
                stats.archived_this_month += 1;
            }
        }
        stats.open_proposals = proposals
            .iter()
            .filter(|p| p.status() == ProposalStatus::Open)
            .count();
        stats
    }
}

// =============================================================================
// SUMMARY
// =============================================================================

/// One project line of the summary report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub project_id: ProjectId,
    pub client_id: ClientId,
    pub status: ProjectStatus,
    pub stage_name: String,
    pub credit_amount: Cents,
    pub tem_pendencia: bool,
    pub total_duration_days: u32,
}

/// Aggregated report over a filtered set of projects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub by_stage: BTreeMap<String, usize>,
    pub by_status: BTreeMap<String, usize>,
    pub total_credit: Cents,
    pub with_pendency: usize,
    pub rows: Vec<SummaryRow>,
}

impl Summary {
    #[must_use]
    pub fn compute<'a>(
        projects: impl IntoIterator<Item = &'a Project>,
        registry: &StageRegistry,
        now: DateTime<Utc>,
    ) -> Self {
        let mut summary = Self::default();
        for project in projects {
            let stage_name = stage_name_of(project, registry);
            let tem_pendencia = project.tem_pendencia();

            summary.total += 1;
            *summary.by_stage.entry(stage_name.clone()).or_insert(0) += 1;
            *summary
                .by_status
                .entry(project.status().as_str().to_string())
                .or_insert(0) += 1;
            summary.total_credit = summary.total_credit.saturating_add(project.credit_amount());
            if tem_pendencia {
                summary.with_pendency += 1;
            }
            summary.rows.push(SummaryRow {
                project_id: project.id(),
                client_id: project.client_id(),
                status: project.status(),
                stage_name,
                credit_amount: project.credit_amount(),
                tem_pendencia,
                total_duration_days: project.total_duration_days(now),
            });
        }
        summary
    }
}

/// Current stage name from the registry, falling back to the history snapshot.
fn stage_name_of(project: &Project, registry: &StageRegistry) -> String {
    registry
        .stage(project.current_stage_id())
        .map(|s| s.name.clone())
        .ok()
        .or_else(|| project.stage_history().last().map(|e| e.stage_name.clone()))
        .unwrap_or_default()
}
