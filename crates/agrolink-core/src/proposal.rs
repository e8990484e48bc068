//! # Proposal
//!
//! A commercial offer that precedes a Project. A proposal is either
//! converted into a Project (exactly once) or withdrawn; both are terminal.

use crate::clock::whole_days_between;
use crate::project::ProjectSeed;
use crate::types::required_text;
use crate::{Cents, ClientId, InstitutionId, PipelineError, ProjectId, ProjectTypeId, ProposalId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a Proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Open,
    Converted,
    Withdrawn,
}

impl ProposalStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Open => "open",
            ProposalStatus::Converted => "converted",
            ProposalStatus::Withdrawn => "withdrawn",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "open" => Some(ProposalStatus::Open),
            "converted" => Some(ProposalStatus::Converted),
            "withdrawn" => Some(ProposalStatus::Withdrawn),
            _ => None,
        }
    }
}

/// Input for a new proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProposal {
    pub client_id: ClientId,
    pub project_type: ProjectTypeId,
    pub institution_id: InstitutionId,
    pub credit_amount: Cents,
}

/// A commercial offer to a client (Proposta).
///
/// Fields are private: status changes only through [`Proposal::mark_converted`]
/// and [`Proposal::withdraw`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    id: ProposalId,
    client_id: ClientId,
    project_type: ProjectTypeId,
    institution_id: InstitutionId,
    credit_amount: Cents,
    status: ProposalStatus,
    created_at: DateTime<Utc>,
    withdraw_reason: Option<String>,
    withdrawn_at: Option<DateTime<Utc>>,
    /// Set once the proposal is converted.
    project_id: Option<ProjectId>,
    converted_at: Option<DateTime<Utc>>,
}

impl Proposal {
    /// Create an open proposal.
    pub fn open(
        id: ProposalId,
        input: NewProposal,
        now: DateTime<Utc>,
    ) -> Result<Self, PipelineError> {
        input.credit_amount.positive("credit_amount")?;
        Ok(Self {
            id,
            client_id: input.client_id,
            project_type: input.project_type,
            institution_id: input.institution_id,
            credit_amount: input.credit_amount,
            status: ProposalStatus::Open,
            created_at: now,
            withdraw_reason: None,
            withdrawn_at: None,
            project_id: None,
            converted_at: None,
        })
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub fn id(&self) -> ProposalId {
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

    pub fn status(&self) -> ProposalStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn withdraw_reason(&self) -> Option<&str> {
        self.withdraw_reason.as_deref()
    }

    pub fn withdrawn_at(&self) -> Option<DateTime<Utc>> {
        self.withdrawn_at
    }

    /// The project this proposal became, once converted.
    pub fn project_id(&self) -> Option<ProjectId> {
        self.project_id
    }

    pub fn converted_at(&self) -> Option<DateTime<Utc>> {
        self.converted_at
    }

    // =========================================================================
    // TRANSITIONS
    // =========================================================================

    /// Fail unless the proposal is still open.
    pub fn ensure_open(&self) -> Result<(), PipelineError> {
        if self.status == ProposalStatus::Open {
            Ok(())
        } else {
            Err(PipelineError::ProposalNotOpen {
                proposal: self.id,
                status: self.status.as_str(),
            })
        }
    }

    /// Commercial data the converted Project starts with.
    #[must_use]
    pub fn project_seed(&self) -> ProjectSeed {
        ProjectSeed {
            client_id: self.client_id,
            project_type: self.project_type,
            institution_id: self.institution_id,
            credit_amount: self.credit_amount,
        }
    }

    /// Mark as converted into `project`.
    pub fn mark_converted(
        &mut self,
        project: ProjectId,
        now: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        self.ensure_open()?;
        self.status = ProposalStatus::Converted;
        self.project_id = Some(project);
        self.converted_at = Some(now);
        Ok(())
    }

    /// Withdraw with a reason. Terminal.
    pub fn withdraw(&mut self, reason: &str, now: DateTime<Utc>) -> Result<(), PipelineError> {
        self.ensure_open()?;
        let reason = required_text("motivo", reason)?;
        self.status = ProposalStatus::Withdrawn;
        self.withdraw_reason = Some(reason);
        self.withdrawn_at = Some(now);
        Ok(())
    }

    /// Whole days since creation.
    #[must_use]
    pub fn days_open(&self, now: DateTime<Utc>) -> u32 {
        whole_days_between(self.created_at, now)
    }
}

/// An open proposal that has waited too long for a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalAlert {
    pub proposal: Proposal,
    pub days_open: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 10, 14, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn proposal() -> Proposal {
        Proposal::open(
            ProposalId(1),
            NewProposal {
                client_id: ClientId(3),
                project_type: ProjectTypeId(1),
                institution_id: InstitutionId(1),
                credit_amount: Cents(8_000_000),
            },
            t0(),
        )
        .expect("open")
    }

    #[test]
    fn withdraw_is_terminal() {
        let mut p = proposal();
        assert_eq!(p.withdraw(" ", t0()), Err(PipelineError::EmptyText("motivo")));
        p.withdraw("sem interesse", t0()).expect("withdraw");
        assert_eq!(p.status(), ProposalStatus::Withdrawn);
        assert_eq!(p.withdraw_reason(), Some("sem interesse"));
        assert_eq!(p.withdrawn_at(), Some(t0()));
        assert_eq!(
            p.mark_converted(ProjectId(1), t0()),
            Err(PipelineError::ProposalNotOpen {
                proposal: ProposalId(1),
                status: "withdrawn"
            })
        );
    }

    #[test]
    fn convert_only_once() {
        let mut p = proposal();
        p.mark_converted(ProjectId(9), t0()).expect("convert");
        assert_eq!(p.project_id(), Some(ProjectId(9)));
        assert_eq!(p.status(), ProposalStatus::Converted);
        assert!(p.mark_converted(ProjectId(10), t0()).is_err());
        assert!(p.withdraw("tarde demais", t0()).is_err());
    }

    #[test]
    fn days_open_floors() {
        let p = proposal();
        assert_eq!(p.days_open(t0() + Duration::hours(191)), 7);
    }

    #[test]
    fn rejects_non_positive_amount() {
        let input = NewProposal {
            client_id: ClientId(3),
            project_type: ProjectTypeId(1),
            institution_id: InstitutionId(1),
            credit_amount: Cents(0),
        };
        assert!(Proposal::open(ProposalId(1), input, t0()).is_err());
    }
}
