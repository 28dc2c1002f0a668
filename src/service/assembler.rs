//! Folds a single device punch into the day's record.

use chrono::{NaiveDateTime, Timelike};

use crate::model::attendance::{DailyAttendanceRecord, RecordKey};

/// First punches from this hour on open the day as an exit.
pub const OUT_PUNCH_HOUR: u32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PunchKind {
    In,
    Out,
}

pub fn classify(ts: NaiveDateTime) -> PunchKind {
    if ts.hour() < OUT_PUNCH_HOUR {
        PunchKind::In
    } else {
        PunchKind::Out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PunchOutcome {
    Created(DailyAttendanceRecord),
    Updated(DailyAttendanceRecord),
    Unchanged,
    /// The record is closed; the punch is dropped.
    Locked,
}

/// Merges `ts` into `existing` (or a new record for `key`).
///
/// Once set, in-time is never rewritten. Every later punch is an exit and
/// out-time only moves forward; a punch at or before the check-in cannot be an
/// exit and is ignored. Re-applying a punch is a no-op.
pub fn apply_punch(
    existing: Option<&DailyAttendanceRecord>,
    key: RecordKey,
    ts: NaiveDateTime,
    device_id: Option<i64>,
) -> PunchOutcome {
    let Some(current) = existing else {
        let mut record = DailyAttendanceRecord::empty(key);
        match classify(ts) {
            PunchKind::In => record.in_time = Some(ts),
            PunchKind::Out => record.out_time = Some(ts),
        }
        record.device_id = device_id;
        record.refresh_derived();
        return PunchOutcome::Created(record);
    };

    if current.is_closed() {
        return PunchOutcome::Locked;
    }

    let mut record = current.clone();
    if record.in_time.is_some_and(|in_time| ts <= in_time) {
        return PunchOutcome::Unchanged;
    }
    record.out_time = Some(record.out_time.map_or(ts, |out| out.max(ts)));

    if record.out_time == current.out_time {
        return PunchOutcome::Unchanged;
    }
    if device_id.is_some() {
        record.device_id = device_id;
    }
    record.refresh_derived();
    PunchOutcome::Updated(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::attendance::{DeadlineState, WorkState};
    use crate::service::testing::{at, date, key, record};

    #[test]
    fn first_punch_boundary_is_fifteen_hundred() {
        let day = date(2025, 3, 1);
        let PunchOutcome::Created(before) = apply_punch(None, key(day), at(day, 14, 59, 59), None) else {
            panic!("expected a new record");
        };
        assert_eq!(before.in_time, Some(at(day, 14, 59, 59)));
        assert_eq!(before.out_time, None);
        assert_eq!(before.work_state, WorkState::CheckedIn);

        let PunchOutcome::Created(after) = apply_punch(None, key(day), at(day, 15, 0, 0), None) else {
            panic!("expected a new record");
        };
        assert_eq!(after.in_time, None);
        assert_eq!(after.out_time, Some(at(day, 15, 0, 0)));
        assert_eq!(after.work_state, WorkState::CheckedOut);
    }

    #[test]
    fn later_punch_closes_shift_and_derives_hours() {
        let day = date(2025, 3, 1);
        let open = record(day, Some(at(day, 8, 0, 0)), None);
        let PunchOutcome::Updated(closed) = apply_punch(Some(&open), key(day), at(day, 17, 30, 0), Some(3)) else {
            panic!("expected an update");
        };
        assert_eq!(closed.out_time, Some(at(day, 17, 30, 0)));
        assert_eq!(closed.work_state, WorkState::CheckedOut);
        assert_eq!(closed.work_hours, Some(9.5));
        assert_eq!(closed.device_id, Some(3));
    }

    #[test]
    fn out_time_never_moves_backwards() {
        let day = date(2025, 3, 1);
        let done = record(day, Some(at(day, 8, 0, 0)), Some(at(day, 18, 0, 0)));
        assert_eq!(
            apply_punch(Some(&done), key(day), at(day, 12, 0, 0), None),
            PunchOutcome::Unchanged
        );
    }

    #[test]
    fn check_in_is_never_rewritten() {
        let day = date(2025, 3, 1);
        let open = record(day, Some(at(day, 9, 0, 0)), None);
        assert_eq!(
            apply_punch(Some(&open), key(day), at(day, 7, 45, 0), None),
            PunchOutcome::Unchanged
        );

        let PunchOutcome::Updated(done) = apply_punch(Some(&open), key(day), at(day, 18, 0, 0), None) else {
            panic!("expected an update");
        };
        let PunchOutcome::Updated(later) = apply_punch(Some(&done), key(day), at(day, 19, 0, 0), None) else {
            panic!("expected an update");
        };
        assert_eq!(later.in_time, Some(at(day, 9, 0, 0)));
        assert_eq!(later.out_time, Some(at(day, 19, 0, 0)));
        assert_eq!(
            apply_punch(Some(&later), key(day), at(day, 8, 0, 0), None),
            PunchOutcome::Unchanged
        );
    }

    #[test]
    fn applying_the_same_punch_twice_is_idempotent() {
        let day = date(2025, 3, 1);
        for ts in [at(day, 8, 0, 0), at(day, 16, 0, 0)] {
            let PunchOutcome::Created(once) = apply_punch(None, key(day), ts, Some(1)) else {
                panic!("expected a new record");
            };
            assert_eq!(apply_punch(Some(&once), key(day), ts, Some(1)), PunchOutcome::Unchanged);
        }

        let open = record(day, Some(at(day, 9, 0, 0)), None);
        let PunchOutcome::Updated(once) = apply_punch(Some(&open), key(day), at(day, 17, 0, 0), None) else {
            panic!("expected an update");
        };
        assert_eq!(apply_punch(Some(&once), key(day), at(day, 17, 0, 0), None), PunchOutcome::Unchanged);
    }

    #[test]
    fn closed_records_are_locked() {
        let day = date(2025, 3, 1);
        let mut closed = record(day, Some(at(day, 8, 0, 0)), None);
        closed.deadline = DeadlineState::Closed;
        assert_eq!(
            apply_punch(Some(&closed), key(day), at(day, 18, 0, 0), None),
            PunchOutcome::Locked
        );
    }
}
