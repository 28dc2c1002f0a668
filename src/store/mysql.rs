use std::str::FromStr;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use sqlx::mysql::MySqlArguments;
use sqlx::query::Query;
use sqlx::{Arguments, FromRow, MySql, MySqlPool, Transaction};

use super::filter::{ProjectScope, identity_predicate};
use super::{AttendanceStore, AttendanceTx, DailyRecordFilter, HistoryQuery, Stamp, StoreError};
use crate::model::attendance::{
    CompareState, DailyAttendanceRecord, DeadlineState, OvertimeCandidate, RecordKey, WorkState,
};
use crate::model::device::DeviceRawEvent;
use crate::model::history::{HisStatus, HistoryEntry, NewHistoryEntry, OperationLog, RecordSnapshot, ReasonType};
use crate::model::worker::{IdentityLookup, WorkerIdentity, WorkerKey, WorkerProfileRow, WorkerRow};
use crate::utils::predicate::SqlValue;

const DAILY_COLUMNS: &str = "record_id, site_id, project_id, worker_key, record_date, in_time, out_time, \
     work_state, work_hours, is_deadline, is_overtime, compare_state, reason_type, reason, device_id";

const HISTORY_COLUMNS: &str = "entry_id, his_status, reason_type, reason, site_id, project_id, worker_key, \
     record_date, in_time, out_time, is_deadline, work_state, is_overtime, work_hours, compare_state, \
     actor_id, actor_name, registered_at";

const EVENT_COLUMNS: &str = "event_id, device_id, site_id, project_id, login_id, name, department, job_role, \
     id_fragment_enc, recognized_at, identity_matched, daily_matched";

/// Maps SQLSTATE 23000 to [`StoreError::Duplicate`].
fn write_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23000") {
            return StoreError::Duplicate(db_err.message().to_string());
        }
    }
    StoreError::Database(err)
}

fn parse_code<T: FromStr>(column: &str, value: &str) -> Result<T, StoreError> {
    T::from_str(value).map_err(|_| StoreError::Backend(format!("unknown {column} code '{value}'")))
}

fn parse_optional<T: FromStr>(column: &str, value: Option<String>) -> Result<Option<T>, StoreError> {
    value.map(|v| parse_code(column, &v)).transpose()
}

/// Packs predicate values into bind arguments, in placeholder order.
fn arguments(values: Vec<SqlValue>) -> MySqlArguments {
    let mut args = MySqlArguments::default();
    for value in values {
        match value {
            SqlValue::Text(v) => args.add(v),
            SqlValue::Int(v) => args.add(v),
            SqlValue::Float(v) => args.add(v),
            SqlValue::Flag(v) => args.add(v),
            SqlValue::Date(v) => args.add(v),
            SqlValue::Timestamp(v) => args.add(v),
            SqlValue::Null => args.add(None::<String>),
        }
    }
    args
}

#[derive(FromRow)]
struct DailyRow {
    record_id: i64,
    site_id: i64,
    project_id: i64,
    worker_key: String,
    record_date: NaiveDate,
    in_time: Option<NaiveDateTime>,
    out_time: Option<NaiveDateTime>,
    work_state: String,
    work_hours: Option<f64>,
    is_deadline: bool,
    is_overtime: bool,
    compare_state: Option<String>,
    reason_type: Option<String>,
    reason: Option<String>,
    device_id: Option<i64>,
}

impl TryFrom<DailyRow> for DailyAttendanceRecord {
    type Error = StoreError;

    fn try_from(row: DailyRow) -> Result<Self, Self::Error> {
        Ok(Self {
            record_id: Some(row.record_id),
            key: RecordKey::new(row.site_id, row.project_id, WorkerKey::from(row.worker_key), row.record_date),
            in_time: row.in_time,
            out_time: row.out_time,
            work_state: parse_code("work_state", &row.work_state)?,
            work_hours: row.work_hours,
            deadline: DeadlineState::from_flag(row.is_deadline),
            is_overtime: row.is_overtime,
            compare_state: parse_optional("compare_state", row.compare_state)?,
            reason_type: parse_optional("reason_type", row.reason_type)?,
            reason: row.reason,
            device_id: row.device_id,
        })
    }
}

#[derive(FromRow)]
struct HistoryRow {
    entry_id: i64,
    his_status: String,
    reason_type: String,
    reason: Option<String>,
    site_id: Option<i64>,
    project_id: Option<i64>,
    worker_key: Option<String>,
    record_date: Option<NaiveDate>,
    in_time: Option<NaiveDateTime>,
    out_time: Option<NaiveDateTime>,
    is_deadline: Option<bool>,
    work_state: Option<String>,
    is_overtime: Option<bool>,
    work_hours: Option<f64>,
    compare_state: Option<String>,
    actor_id: u64,
    actor_name: String,
    registered_at: NaiveDateTime,
}

impl TryFrom<HistoryRow> for HistoryEntry {
    type Error = StoreError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            entry_id: row.entry_id,
            status: parse_code::<HisStatus>("his_status", &row.his_status)?,
            reason_type: parse_code::<ReasonType>("reason_type", &row.reason_type)?,
            reason: row.reason,
            snapshot: RecordSnapshot {
                site_id: row.site_id,
                project_id: row.project_id,
                worker_key: row.worker_key.map(WorkerKey::from),
                record_date: row.record_date,
                in_time: row.in_time,
                out_time: row.out_time,
                deadline: row.is_deadline.map(DeadlineState::from_flag),
                work_state: parse_optional("work_state", row.work_state)?,
                is_overtime: row.is_overtime,
                work_hours: row.work_hours,
                compare_state: parse_optional("compare_state", row.compare_state)?,
            },
            actor_id: row.actor_id,
            actor_name: row.actor_name,
            registered_at: row.registered_at,
        })
    }
}

#[derive(FromRow)]
struct WorkerIdentityRow {
    worker_key: String,
    site_id: i64,
    project_id: i64,
    login_id: String,
    name: String,
    department: Option<String>,
    job_role: Option<String>,
    phone: Option<String>,
    is_retired: bool,
    retired_on: Option<NaiveDate>,
    id_fragment_enc: Option<String>,
    id_fragment_index: Option<String>,
    device_editable: bool,
    is_deleted: bool,
    registered_at: NaiveDateTime,
}

impl From<WorkerIdentityRow> for WorkerIdentity {
    fn from(row: WorkerIdentityRow) -> Self {
        Self {
            worker_key: row.worker_key.into(),
            site_id: row.site_id,
            project_id: row.project_id,
            login_id: row.login_id,
            name: row.name,
            department: row.department,
            job_role: row.job_role,
            phone: row.phone,
            is_retired: row.is_retired,
            retired_on: row.retired_on,
            id_fragment_enc: row.id_fragment_enc,
            id_fragment_index: row.id_fragment_index,
            device_editable: row.device_editable,
            is_deleted: row.is_deleted,
            registered_at: row.registered_at,
        }
    }
}

#[derive(FromRow)]
struct EventRow {
    event_id: i64,
    device_id: Option<i64>,
    site_id: i64,
    project_id: i64,
    login_id: String,
    name: String,
    department: Option<String>,
    job_role: Option<String>,
    id_fragment_enc: Option<String>,
    recognized_at: Option<NaiveDateTime>,
    identity_matched: bool,
    daily_matched: bool,
}

impl From<EventRow> for DeviceRawEvent {
    fn from(row: EventRow) -> Self {
        Self {
            event_id: row.event_id,
            device_id: row.device_id,
            site_id: row.site_id,
            project_id: row.project_id,
            login_id: row.login_id,
            name: row.name,
            department: row.department,
            job_role: row.job_role,
            id_fragment_enc: row.id_fragment_enc,
            recognized_at: row.recognized_at,
            identity_matched: row.identity_matched,
            daily_matched: row.daily_matched,
        }
    }
}

#[derive(FromRow)]
struct PairRow {
    before_id: i64,
    after_id: i64,
}

#[derive(Clone)]
pub struct MySqlAttendanceStore {
    pool: MySqlPool,
}

impl MySqlAttendanceStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    async fn record_by_id(&self, record_id: i64) -> Result<Option<DailyAttendanceRecord>, StoreError> {
        let sql = format!("SELECT {DAILY_COLUMNS} FROM daily_attendance WHERE record_id = ?");
        sqlx::query_as::<_, DailyRow>(&sql)
            .bind(record_id)
            .fetch_optional(&self.pool)
            .await?
            .map(DailyAttendanceRecord::try_from)
            .transpose()
    }

    async fn fetch_records(&self, sql: &str, values: Vec<SqlValue>) -> Result<Vec<DailyAttendanceRecord>, StoreError> {
        let rows = sqlx::query_as_with::<_, DailyRow, _>(sql, arguments(values))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(DailyAttendanceRecord::try_from).collect()
    }

    async fn fetch_events(&self, flag_sql: &str, limit: usize) -> Result<Vec<DeviceRawEvent>, StoreError> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM device_raw_event WHERE {flag_sql} ORDER BY event_id LIMIT ?");
        let rows = sqlx::query_as::<_, EventRow>(&sql)
            .bind(limit as u64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(DeviceRawEvent::from).collect())
    }
}

#[async_trait]
impl AttendanceStore for MySqlAttendanceStore {
    async fn find_worker_key(&self, lookup: &IdentityLookup) -> Result<Option<WorkerKey>, StoreError> {
        let (where_sql, values) = identity_predicate(lookup).to_sql();
        let sql = format!("SELECT worker_key FROM worker_identity{where_sql} ORDER BY registered_at DESC LIMIT 1");
        let row: Option<(String,)> = sqlx::query_as_with(&sql, arguments(values))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(key,)| WorkerKey::from(key)))
    }

    async fn mint_worker_key(&self) -> Result<Option<String>, StoreError> {
        let key: Option<String> = sqlx::query_scalar("SELECT REPLACE(UUID(), '-', '')")
            .fetch_optional(&self.pool)
            .await?;
        Ok(key.filter(|k| !k.is_empty()))
    }

    async fn get_worker(&self, site_id: i64, worker_key: &WorkerKey) -> Result<Option<WorkerIdentity>, StoreError> {
        let row = sqlx::query_as::<_, WorkerIdentityRow>(
            r#"
            SELECT worker_key, site_id, project_id, login_id, name, department, job_role, phone,
                   is_retired, retired_on, id_fragment_enc, id_fragment_index, device_editable,
                   is_deleted, registered_at
            FROM worker_identity
            WHERE site_id = ? AND worker_key = ?
            "#,
        )
        .bind(site_id)
        .bind(worker_key.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(WorkerIdentity::from))
    }

    async fn find_daily_record(&self, key: &RecordKey) -> Result<Option<DailyAttendanceRecord>, StoreError> {
        let sql = format!(
            "SELECT {DAILY_COLUMNS} FROM daily_attendance \
             WHERE site_id = ? AND project_id = ? AND worker_key = ? AND record_date = ?"
        );
        sqlx::query_as::<_, DailyRow>(&sql)
            .bind(key.site_id)
            .bind(key.project_id)
            .bind(key.worker_key.as_str())
            .bind(key.record_date)
            .fetch_optional(&self.pool)
            .await?
            .map(DailyAttendanceRecord::try_from)
            .transpose()
    }

    async fn list_daily_records(&self, filter: &DailyRecordFilter) -> Result<Vec<DailyAttendanceRecord>, StoreError> {
        let predicate = filter.to_predicate();
        if predicate.is_never() {
            return Ok(Vec::new());
        }
        let (where_sql, values) = predicate.to_sql();
        let sql = format!(
            "SELECT {DAILY_COLUMNS} FROM daily_attendance{where_sql} ORDER BY record_date DESC, worker_key"
        );
        self.fetch_records(&sql, values).await
    }

    async fn find_overtime_candidates(&self, today: NaiveDate) -> Result<Vec<OvertimeCandidate>, StoreError> {
        let pairs = sqlx::query_as::<_, PairRow>(
            r#"
            SELECT b.record_id AS before_id, a.record_id AS after_id
            FROM daily_attendance b
            JOIN daily_attendance a
              ON a.site_id = b.site_id
             AND a.project_id = b.project_id
             AND a.worker_key = b.worker_key
            WHERE b.record_date = ?
              AND b.in_time IS NOT NULL
              AND b.out_time IS NULL
              AND a.record_date = ?
              AND a.in_time IS NULL
              AND a.out_time IS NOT NULL
              AND a.compare_state = 'S'
            "#,
        )
        .bind(today - Duration::days(1))
        .bind(today)
        .fetch_all(&self.pool)
        .await?;

        let mut found = Vec::with_capacity(pairs.len());
        for pair in pairs {
            let (Some(before), Some(after)) = (
                self.record_by_id(pair.before_id).await?,
                self.record_by_id(pair.after_id).await?,
            ) else {
                continue;
            };
            found.push(OvertimeCandidate { before, after });
        }
        Ok(found)
    }

    async fn find_auto_deadline_targets(&self, today: NaiveDate) -> Result<Vec<DailyAttendanceRecord>, StoreError> {
        let sql = format!(
            "SELECT {DAILY_COLUMNS} FROM daily_attendance \
             WHERE record_date >= ? AND record_date < ? \
               AND work_state = ? AND is_deadline = 0 AND compare_state = ?"
        );
        let values = vec![
            SqlValue::Date(today - Duration::days(7)),
            SqlValue::Date(today),
            SqlValue::from(WorkState::CheckedOut.as_ref()),
            SqlValue::from(CompareState::Settled.as_ref()),
        ];
        self.fetch_records(&sql, values).await
    }

    async fn pending_identity_events(&self, limit: usize) -> Result<Vec<DeviceRawEvent>, StoreError> {
        self.fetch_events("identity_matched = 0", limit).await
    }

    async fn pending_daily_events(&self, limit: usize) -> Result<Vec<DeviceRawEvent>, StoreError> {
        self.fetch_events("identity_matched = 1 AND daily_matched = 0", limit).await
    }

    async fn list_history(&self, query: &HistoryQuery) -> Result<Vec<HistoryEntry>, StoreError> {
        let predicate = query.to_predicate();
        if predicate.is_never() {
            return Ok(Vec::new());
        }
        let (partner_sql, mut values) = query.partner_predicate().to_sql();
        let (where_sql, anchor_values) = predicate.to_sql();
        values.extend(anchor_values);
        let sql = format!(
            "SELECT {HISTORY_COLUMNS} FROM (SELECT * FROM daily_attendance_history{partner_sql}) h \
             WHERE (h.worker_key, h.registered_at) IN \
                   (SELECT worker_key, registered_at FROM daily_attendance_history{where_sql}) \
             ORDER BY registered_at DESC, worker_key, his_status = 'AFTER', entry_id"
        );
        let rows = sqlx::query_as_with::<_, HistoryRow, _>(&sql, arguments(values))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(HistoryEntry::try_from).collect()
    }

    async fn history_reason(&self, entry_id: i64, scope: &ProjectScope) -> Result<Option<String>, StoreError> {
        let visible = scope.to_predicate("s.project_id");
        if visible.is_never() {
            return Ok(None);
        }
        let (scope_sql, scope_values) = visible.to_sql();
        let in_scope = if scope_sql.is_empty() {
            String::new()
        } else {
            format!(
                " AND EXISTS (SELECT 1 FROM daily_attendance_history s{scope_sql} \
                   AND s.worker_key = anchor.worker_key AND s.registered_at = anchor.registered_at)"
            )
        };
        let sql = format!(
            "SELECT MAX(h.reason) \
             FROM daily_attendance_history h \
             JOIN daily_attendance_history anchor \
               ON anchor.worker_key = h.worker_key AND anchor.registered_at = h.registered_at \
             WHERE anchor.entry_id = ?{in_scope}"
        );
        let mut values = vec![SqlValue::Int(entry_id)];
        values.extend(scope_values);
        let reason: Option<Option<String>> = sqlx::query_scalar_with(&sql, arguments(values))
            .fetch_optional(&self.pool)
            .await?;
        Ok(reason.flatten())
    }

    async fn begin(&self) -> Result<Box<dyn AttendanceTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(MySqlTx { tx }))
    }
}

pub struct MySqlTx {
    tx: Transaction<'static, MySql>,
}

impl MySqlTx {
    async fn execute(&mut self, query: Query<'_, MySql, MySqlArguments>) -> Result<u64, StoreError> {
        let result = query.execute(&mut *self.tx).await.map_err(write_error)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl AttendanceTx for MySqlTx {
    async fn insert_worker(&mut self, worker: &WorkerRow, stamp: &Stamp) -> Result<u64, StoreError> {
        let query = sqlx::query(
            r#"
            INSERT INTO worker_identity (
                worker_key, site_id, project_id, login_id, name, department, job_role, phone,
                is_retired, id_fragment_enc, id_fragment_index, device_editable, is_deleted,
                reg_user, registered_at
            )
            SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, 0, ?, ?
            FROM DUAL
            WHERE NOT EXISTS (
                SELECT 1
                FROM worker_identity
                WHERE login_id = ?
                  AND name = ?
                  AND id_fragment_index <=> ?
                  AND is_deleted = 0
            )
            "#,
        )
        .bind(worker.worker_key.as_str())
        .bind(worker.site_id)
        .bind(worker.project_id)
        .bind(&worker.login_id)
        .bind(&worker.name)
        .bind(&worker.department)
        .bind(&worker.job_role)
        .bind(&worker.phone)
        .bind(worker.is_retired)
        .bind(&worker.id_fragment_enc)
        .bind(&worker.id_fragment_index)
        .bind(&stamp.actor_name)
        .bind(stamp.at)
        .bind(&worker.login_id)
        .bind(&worker.name)
        .bind(&worker.id_fragment_index);
        self.execute(query).await
    }

    async fn upsert_device_worker(&mut self, worker: &WorkerRow, stamp: &Stamp) -> Result<u64, StoreError> {
        let query = sqlx::query(
            r#"
            INSERT INTO worker_identity (
                worker_key, site_id, project_id, login_id, name, department, job_role,
                is_retired, id_fragment_enc, id_fragment_index, device_editable, is_deleted,
                reg_user, registered_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, 0, ?, ?)
            ON DUPLICATE KEY UPDATE
                project_id        = IF(device_editable = 1, VALUES(project_id), project_id),
                login_id          = IF(device_editable = 1, VALUES(login_id), login_id),
                name              = IF(device_editable = 1, VALUES(name), name),
                department        = IF(device_editable = 1, VALUES(department), department),
                job_role          = IF(device_editable = 1, VALUES(job_role), job_role),
                id_fragment_enc   = IF(device_editable = 1, VALUES(id_fragment_enc), id_fragment_enc),
                id_fragment_index = IF(device_editable = 1, VALUES(id_fragment_index), id_fragment_index),
                mod_user          = VALUES(reg_user),
                mod_date          = VALUES(registered_at)
            "#,
        )
        .bind(worker.worker_key.as_str())
        .bind(worker.site_id)
        .bind(worker.project_id)
        .bind(&worker.login_id)
        .bind(&worker.name)
        .bind(&worker.department)
        .bind(&worker.job_role)
        .bind(worker.is_retired)
        .bind(&worker.id_fragment_enc)
        .bind(&worker.id_fragment_index)
        .bind(&stamp.actor_name)
        .bind(stamp.at);
        self.execute(query).await
    }

    async fn update_worker_profile(&mut self, profile: &WorkerProfileRow, stamp: &Stamp) -> Result<u64, StoreError> {
        let query = sqlx::query(
            r#"
            UPDATE worker_identity
            SET name = ?, department = ?, job_role = ?, phone = ?, is_retired = ?, retired_on = ?,
                id_fragment_enc = ?, id_fragment_index = ?, device_editable = 0,
                mod_user = ?, mod_date = ?
            WHERE site_id = ? AND worker_key = ? AND is_deleted = 0
            "#,
        )
        .bind(&profile.name)
        .bind(&profile.department)
        .bind(&profile.job_role)
        .bind(&profile.phone)
        .bind(profile.is_retired)
        .bind(profile.retired_on)
        .bind(&profile.id_fragment_enc)
        .bind(&profile.id_fragment_index)
        .bind(&stamp.actor_name)
        .bind(stamp.at)
        .bind(profile.site_id)
        .bind(profile.worker_key.as_str());
        self.execute(query).await
    }

    async fn soft_delete_worker(&mut self, site_id: i64, worker_key: &WorkerKey, stamp: &Stamp) -> Result<u64, StoreError> {
        let query = sqlx::query(
            r#"
            UPDATE worker_identity
            SET is_deleted = 1, mod_user = ?, mod_date = ?
            WHERE site_id = ? AND worker_key = ? AND is_deleted = 0
            "#,
        )
        .bind(&stamp.actor_name)
        .bind(stamp.at)
        .bind(site_id)
        .bind(worker_key.as_str());
        self.execute(query).await
    }

    async fn update_worker_default_project(
        &mut self,
        site_id: i64,
        worker_key: &WorkerKey,
        from_project: i64,
        to_project: i64,
        stamp: &Stamp,
    ) -> Result<u64, StoreError> {
        let query = sqlx::query(
            r#"
            UPDATE worker_identity
            SET project_id = ?, mod_user = ?, mod_date = ?
            WHERE site_id = ? AND worker_key = ? AND project_id = ?
            "#,
        )
        .bind(to_project)
        .bind(&stamp.actor_name)
        .bind(stamp.at)
        .bind(site_id)
        .bind(worker_key.as_str())
        .bind(from_project);
        self.execute(query).await
    }

    async fn update_daily_record(&mut self, record: &DailyAttendanceRecord, stamp: &Stamp) -> Result<u64, StoreError> {
        let key = &record.key;
        let query = sqlx::query(
            r#"
            UPDATE daily_attendance
            SET in_time = ?, out_time = ?, work_state = ?, work_hours = ?, is_deadline = ?,
                is_overtime = ?, reason_type = ?, reason = ?, device_id = COALESCE(?, device_id),
                mod_user = ?, mod_date = ?
            WHERE site_id = ? AND project_id = ? AND worker_key = ? AND record_date = ?
              AND is_deadline = 0
            "#,
        )
        .bind(record.in_time)
        .bind(record.out_time)
        .bind(record.work_state.as_ref())
        .bind(record.work_hours)
        .bind(record.deadline.is_closed())
        .bind(record.is_overtime)
        .bind(record.reason_type.map(|r| r.as_ref().to_string()))
        .bind(&record.reason)
        .bind(record.device_id)
        .bind(&stamp.actor_name)
        .bind(stamp.at)
        .bind(key.site_id)
        .bind(key.project_id)
        .bind(key.worker_key.as_str())
        .bind(key.record_date);
        self.execute(query).await
    }

    async fn insert_daily_record(&mut self, record: &DailyAttendanceRecord, stamp: &Stamp) -> Result<i64, StoreError> {
        let key = &record.key;
        let result = sqlx::query(
            r#"
            INSERT INTO daily_attendance (
                site_id, project_id, worker_key, record_date, in_time, out_time, work_state,
                work_hours, is_deadline, is_overtime, compare_state, reason_type, reason, device_id,
                reg_user, reg_date
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(key.site_id)
        .bind(key.project_id)
        .bind(key.worker_key.as_str())
        .bind(key.record_date)
        .bind(record.in_time)
        .bind(record.out_time)
        .bind(record.work_state.as_ref())
        .bind(record.work_hours)
        .bind(record.deadline.is_closed())
        .bind(record.is_overtime)
        .bind(record.compare_state.map(|c| c.as_ref().to_string()))
        .bind(record.reason_type.map(|r| r.as_ref().to_string()))
        .bind(&record.reason)
        .bind(record.device_id)
        .bind(&stamp.actor_name)
        .bind(stamp.at)
        .execute(&mut *self.tx)
        .await
        .map_err(write_error)?;
        Ok(result.last_insert_id() as i64)
    }

    async fn set_deadline(&mut self, key: &RecordKey, state: DeadlineState, stamp: &Stamp) -> Result<u64, StoreError> {
        let query = sqlx::query(
            r#"
            UPDATE daily_attendance
            SET is_deadline = ?, mod_user = ?, mod_date = ?
            WHERE site_id = ? AND project_id = ? AND worker_key = ? AND record_date = ?
            "#,
        )
        .bind(state.is_closed())
        .bind(&stamp.actor_name)
        .bind(stamp.at)
        .bind(key.site_id)
        .bind(key.project_id)
        .bind(key.worker_key.as_str())
        .bind(key.record_date);
        self.execute(query).await
    }

    async fn update_record_project(&mut self, key: &RecordKey, to_project: i64, stamp: &Stamp) -> Result<u64, StoreError> {
        let query = sqlx::query(
            r#"
            UPDATE daily_attendance
            SET project_id = ?, mod_user = ?, mod_date = ?
            WHERE site_id = ? AND project_id = ? AND worker_key = ? AND record_date = ?
            "#,
        )
        .bind(to_project)
        .bind(&stamp.actor_name)
        .bind(stamp.at)
        .bind(key.site_id)
        .bind(key.project_id)
        .bind(key.worker_key.as_str())
        .bind(key.record_date);
        self.execute(query).await
    }

    async fn update_work_hours(&mut self, key: &RecordKey, work_hours: f64, stamp: &Stamp) -> Result<u64, StoreError> {
        let query = sqlx::query(
            r#"
            UPDATE daily_attendance
            SET work_hours = ?, mod_user = ?, mod_date = ?
            WHERE site_id = ? AND project_id = ? AND worker_key = ? AND record_date = ?
              AND is_deadline = 0
            "#,
        )
        .bind(work_hours)
        .bind(&stamp.actor_name)
        .bind(stamp.at)
        .bind(key.site_id)
        .bind(key.project_id)
        .bind(key.worker_key.as_str())
        .bind(key.record_date);
        self.execute(query).await
    }

    async fn update_compare_state(&mut self, key: &RecordKey, state: CompareState, stamp: &Stamp) -> Result<u64, StoreError> {
        let query = sqlx::query(
            r#"
            UPDATE daily_attendance
            SET compare_state = ?, mod_user = ?, mod_date = ?
            WHERE site_id = ? AND project_id = ? AND worker_key = ? AND record_date = ?
              AND is_deadline = 0
            "#,
        )
        .bind(state.as_ref())
        .bind(&stamp.actor_name)
        .bind(stamp.at)
        .bind(key.site_id)
        .bind(key.project_id)
        .bind(key.worker_key.as_str())
        .bind(key.record_date);
        self.execute(query).await
    }

    async fn delete_open_record(&mut self, key: &RecordKey) -> Result<u64, StoreError> {
        let query = sqlx::query(
            r#"
            DELETE FROM daily_attendance
            WHERE site_id = ? AND project_id = ? AND worker_key = ? AND record_date = ?
              AND is_deadline = 0
            "#,
        )
        .bind(key.site_id)
        .bind(key.project_id)
        .bind(key.worker_key.as_str())
        .bind(key.record_date);
        self.execute(query).await
    }

    async fn close_overnight_shift(&mut self, record: &DailyAttendanceRecord, stamp: &Stamp) -> Result<u64, StoreError> {
        let Some(record_id) = record.record_id else {
            return Ok(0);
        };
        let query = sqlx::query(
            r#"
            UPDATE daily_attendance
            SET out_time = ?, work_state = ?, work_hours = ?, is_overtime = 1,
                mod_user = ?, mod_date = ?
            WHERE record_id = ? AND is_deadline = 0 AND out_time IS NULL
            "#,
        )
        .bind(record.out_time)
        .bind(WorkState::CheckedOut.as_ref())
        .bind(record.work_hours)
        .bind(&stamp.actor_name)
        .bind(stamp.at)
        .bind(record_id);
        self.execute(query).await
    }

    async fn delete_record_by_id(&mut self, record_id: i64) -> Result<u64, StoreError> {
        let query = sqlx::query("DELETE FROM daily_attendance WHERE record_id = ?").bind(record_id);
        self.execute(query).await
    }

    async fn mark_identity_matched(&mut self, event_id: i64) -> Result<u64, StoreError> {
        let query = sqlx::query("UPDATE device_raw_event SET identity_matched = 1 WHERE event_id = ?").bind(event_id);
        self.execute(query).await
    }

    async fn mark_daily_matched(&mut self, event_id: i64) -> Result<u64, StoreError> {
        let query = sqlx::query("UPDATE device_raw_event SET daily_matched = 1 WHERE event_id = ?").bind(event_id);
        self.execute(query).await
    }

    async fn append_operation_log(&mut self, line: &OperationLog) -> Result<(), StoreError> {
        let query = sqlx::query(
            r#"
            INSERT INTO daily_attendance_log (
                site_id, project_id, worker_key, record_date, work_state, message,
                actor_id, actor_name, logged_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(line.site_id)
        .bind(line.project_id)
        .bind(line.worker_key.as_str())
        .bind(line.record_date)
        .bind(line.work_state.map(|w| w.as_ref().to_string()))
        .bind(&line.message)
        .bind(line.actor_id)
        .bind(&line.actor_name)
        .bind(line.logged_at);
        self.execute(query).await?;
        Ok(())
    }

    async fn append_history(&mut self, entry: &NewHistoryEntry) -> Result<(), StoreError> {
        let snap = &entry.snapshot;
        let values = vec![
            SqlValue::from(entry.status.as_ref()),
            SqlValue::from(entry.reason_type.as_ref()),
            entry.reason.clone().map_or(SqlValue::Null, SqlValue::Text),
            snap.site_id.map_or(SqlValue::Null, SqlValue::Int),
            snap.project_id.map_or(SqlValue::Null, SqlValue::Int),
            snap.worker_key.as_ref().map_or(SqlValue::Null, |k| SqlValue::from(k.as_str())),
            snap.record_date.map_or(SqlValue::Null, SqlValue::Date),
            snap.in_time.map_or(SqlValue::Null, SqlValue::Timestamp),
            snap.out_time.map_or(SqlValue::Null, SqlValue::Timestamp),
            snap.deadline.map_or(SqlValue::Null, |d| SqlValue::Flag(d.is_closed())),
            snap.work_state.map_or(SqlValue::Null, |w| SqlValue::from(w.as_ref())),
            snap.is_overtime.map_or(SqlValue::Null, SqlValue::Flag),
            snap.work_hours.map_or(SqlValue::Null, SqlValue::Float),
            snap.compare_state.map_or(SqlValue::Null, |c| SqlValue::from(c.as_ref())),
            SqlValue::Int(entry.actor_id as i64),
            SqlValue::from(entry.actor_name.as_str()),
            SqlValue::Timestamp(entry.registered_at),
        ];
        let query = sqlx::query_with(
            r#"
            INSERT INTO daily_attendance_history (
                his_status, reason_type, reason, site_id, project_id, worker_key, record_date,
                in_time, out_time, is_deadline, work_state, is_overtime, work_hours, compare_state,
                actor_id, actor_name, registered_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            arguments(values),
        );
        self.execute(query).await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_rows_decode_stored_codes() {
        let row = DailyRow {
            record_id: 7,
            site_id: 1,
            project_id: 10,
            worker_key: "abc".to_string(),
            record_date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            in_time: None,
            out_time: None,
            work_state: "02".to_string(),
            work_hours: None,
            is_deadline: true,
            is_overtime: false,
            compare_state: Some("S".to_string()),
            reason_type: Some("08".to_string()),
            reason: None,
            device_id: None,
        };
        let record = DailyAttendanceRecord::try_from(row).unwrap();
        assert_eq!(record.record_id, Some(7));
        assert_eq!(record.work_state, WorkState::CheckedOut);
        assert_eq!(record.deadline, DeadlineState::Closed);
        assert_eq!(record.compare_state, Some(CompareState::Settled));
        assert_eq!(record.reason_type, Some(ReasonType::EditAndDeadline));
    }

    #[test]
    fn unknown_codes_are_backend_errors() {
        let err = parse_code::<WorkState>("work_state", "99").unwrap_err();
        assert!(matches!(err, StoreError::Backend(msg) if msg.contains("'99'")));
    }
}
