use chrono::NaiveDate;
use serde::Deserialize;
use utoipa::IntoParams;

use crate::model::actor::Actor;
use crate::model::attendance::{DailyAttendanceRecord, DeadlineState};
use crate::model::history::RecordSnapshot;
use crate::model::worker::{IdentityLookup, WorkerKey};
use crate::utils::predicate::{Clause, Predicate, SqlValue};

/// Which projects an actor may see.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ProjectScope {
    #[default]
    All,
    Only(Vec<i64>),
}

impl ProjectScope {
    pub fn for_actor(actor: &Actor) -> Self {
        if actor.role.sees_all_projects() {
            ProjectScope::All
        } else {
            ProjectScope::Only(actor.project_ids.clone())
        }
    }

    pub fn allows(&self, project_id: Option<i64>) -> bool {
        match self {
            ProjectScope::All => true,
            ProjectScope::Only(ids) => project_id.is_some_and(|p| ids.contains(&p)),
        }
    }

    /// Standalone predicate over `column`; empty for unrestricted actors.
    pub fn to_predicate(&self, column: &'static str) -> Predicate {
        let mut predicate = Predicate::new();
        if let Some(clause) = self.clause(column) {
            predicate.push(clause);
        }
        predicate
    }

    /// Like [`Self::clause`], but lets project-less rows through.
    fn clause_or_null(&self, column: &'static str) -> Option<Clause> {
        match self {
            ProjectScope::All => None,
            ProjectScope::Only(ids) => Some(Clause::NullOrIn(column, ids.iter().map(|id| SqlValue::Int(*id)).collect())),
        }
    }

    fn clause(&self, column: &'static str) -> Option<Clause> {
        match self {
            ProjectScope::All => None,
            ProjectScope::Only(ids) if ids.is_empty() => Some(Clause::Never),
            ProjectScope::Only(ids) => Some(Clause::In(column, ids.iter().map(|id| SqlValue::Int(*id)).collect())),
        }
    }
}

/// Query parameters for the daily record list.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct DailyRecordParams {
    /// Site filter
    pub site_id: Option<i64>,
    /// Project filter
    pub project_id: Option<i64>,
    /// First record date (inclusive)
    pub from: Option<NaiveDate>,
    /// Last record date (inclusive)
    pub to: Option<NaiveDate>,
    /// Only open or only closed records
    pub deadline: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DailyRecordFilter {
    pub site_id: Option<i64>,
    pub project_id: Option<i64>,
    pub worker_keys: Vec<WorkerKey>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub deadline: Option<DeadlineState>,
    pub scope: ProjectScope,
}

impl DailyRecordFilter {
    pub fn to_predicate(&self) -> Predicate {
        let mut predicate = Predicate::new();
        if let Some(site_id) = self.site_id {
            predicate.push(Clause::Eq("site_id", site_id.into()));
        }
        if let Some(project_id) = self.project_id {
            predicate.push(Clause::Eq("project_id", project_id.into()));
        }
        if !self.worker_keys.is_empty() {
            predicate.push(Clause::In(
                "worker_key",
                self.worker_keys.iter().map(|k| SqlValue::from(k.as_str())).collect(),
            ));
        }
        match (self.from, self.to) {
            (Some(from), Some(to)) => predicate.push(Clause::Between("record_date", from.into(), to.into())),
            (Some(from), None) => predicate.push(Clause::AtLeast("record_date", from.into())),
            (None, Some(to)) => predicate.push(Clause::AtMost("record_date", to.into())),
            (None, None) => {}
        }
        if let Some(deadline) = self.deadline {
            predicate.push(Clause::Eq("is_deadline", deadline.is_closed().into()));
        }
        if let Some(clause) = self.scope.clause("project_id") {
            predicate.push(clause);
        }
        predicate
    }

    /// Same semantics as [`Self::to_predicate`], evaluated in memory.
    pub fn matches(&self, record: &DailyAttendanceRecord) -> bool {
        let key = &record.key;
        self.site_id.is_none_or(|s| s == key.site_id)
            && self.project_id.is_none_or(|p| p == key.project_id)
            && (self.worker_keys.is_empty() || self.worker_keys.contains(&key.worker_key))
            && self.from.is_none_or(|f| key.record_date >= f)
            && self.to.is_none_or(|t| key.record_date <= t)
            && self.deadline.is_none_or(|d| d == record.deadline)
            && self.scope.allows(Some(key.project_id))
    }
}

/// Live identities sharing login id, name and blind index. A missing index
/// only matches rows that have none.
pub fn identity_predicate(lookup: &IdentityLookup) -> Predicate {
    let index = match &lookup.id_fragment_index {
        Some(index) => Clause::Eq("id_fragment_index", index.as_str().into()),
        None => Clause::IsNull("id_fragment_index"),
    };
    Predicate::new()
        .and(Clause::Eq("login_id", lookup.login_id.as_str().into()))
        .and(Clause::Eq("name", lookup.name.as_str().into()))
        .and(index)
        .and(Clause::Eq("is_deleted", false.into()))
}

/// Query parameters for the history ledger.
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct HistoryParams {
    /// Site the records belong to
    pub site_id: i64,
    /// First record date (inclusive)
    pub from: NaiveDate,
    /// Last record date (inclusive)
    pub to: NaiveDate,
    /// Comma separated worker keys
    pub worker_keys: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryQuery {
    pub site_id: i64,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub worker_keys: Vec<WorkerKey>,
    pub scope: ProjectScope,
}

impl HistoryQuery {
    /// Selects the anchor rows; partners are joined on `(worker_key, registered_at)`.
    pub fn to_predicate(&self) -> Predicate {
        let mut predicate = Predicate::new()
            .and(Clause::Eq("site_id", self.site_id.into()))
            .and(Clause::Between("record_date", self.from.into(), self.to.into()));
        if !self.worker_keys.is_empty() {
            predicate.push(Clause::In(
                "worker_key",
                self.worker_keys.iter().map(|k| SqlValue::from(k.as_str())).collect(),
            ));
        }
        if let Some(clause) = self.scope.clause("project_id") {
            predicate.push(clause);
        }
        predicate
    }

    /// Rows returned alongside an anchor must still be in scope. Removal
    /// post-images carry no project and ride along with their anchor.
    pub fn partner_predicate(&self) -> Predicate {
        let mut predicate = Predicate::new();
        if let Some(clause) = self.scope.clause_or_null("project_id") {
            predicate.push(clause);
        }
        predicate
    }

    pub fn partner_matches(&self, snapshot: &RecordSnapshot) -> bool {
        snapshot.project_id.is_none() || self.scope.allows(snapshot.project_id)
    }

    pub fn matches(&self, snapshot: &RecordSnapshot) -> bool {
        snapshot.site_id == Some(self.site_id)
            && snapshot
                .record_date
                .is_some_and(|d| d >= self.from && d <= self.to)
            && (self.worker_keys.is_empty()
                || snapshot
                    .worker_key
                    .as_ref()
                    .is_some_and(|k| self.worker_keys.contains(k)))
            && self.scope.allows(snapshot.project_id)
    }
}
