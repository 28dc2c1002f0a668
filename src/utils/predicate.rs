//! Typed WHERE clauses for the attendance queries.

use chrono::{NaiveDate, NaiveDateTime};

/// A value carried to a `?` placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Int(i64),
    Float(f64),
    Flag(bool),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Null,
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Flag(v)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(v: NaiveDate) -> Self {
        SqlValue::Date(v)
    }
}

/// One typed condition. Column names are compile-time constants, values are
/// always bound, never spliced into the SQL text.
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Eq(&'static str, SqlValue),
    In(&'static str, Vec<SqlValue>),
    Between(&'static str, SqlValue, SqlValue),
    AtLeast(&'static str, SqlValue),
    AtMost(&'static str, SqlValue),
    IsNull(&'static str),
    /// Column is NULL or one of the values.
    NullOrIn(&'static str, Vec<SqlValue>),
    /// Matches nothing. Used for actors scoped to zero projects.
    Never,
}

/// Conjunction of clauses, rendered as one `WHERE`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    clauses: Vec<Clause>,
}

impl Predicate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn and(mut self, clause: Clause) -> Self {
        self.clauses.push(clause);
        self
    }

    pub fn push(&mut self, clause: Clause) {
        self.clauses.push(clause);
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn is_never(&self) -> bool {
        self.clauses.iter().any(|c| matches!(c, Clause::Never))
            || self
                .clauses
                .iter()
                .any(|c| matches!(c, Clause::In(_, values) if values.is_empty()))
    }

    /// Renders ` WHERE ...` (or an empty string) plus the values in bind order.
    pub fn to_sql(&self) -> (String, Vec<SqlValue>) {
        if self.clauses.is_empty() {
            return (String::new(), Vec::new());
        }

        let mut parts = Vec::with_capacity(self.clauses.len());
        let mut values = Vec::new();

        for clause in &self.clauses {
            match clause {
                Clause::Eq(column, value) => {
                    parts.push(format!("{} = ?", column));
                    values.push(value.clone());
                }
                Clause::In(_, list) if list.is_empty() => parts.push("1 = 0".to_string()),
                Clause::In(column, list) => {
                    let marks = vec!["?"; list.len()].join(", ");
                    parts.push(format!("{} IN ({})", column, marks));
                    values.extend(list.iter().cloned());
                }
                Clause::Between(column, low, high) => {
                    parts.push(format!("{} BETWEEN ? AND ?", column));
                    values.push(low.clone());
                    values.push(high.clone());
                }
                Clause::AtLeast(column, value) => {
                    parts.push(format!("{} >= ?", column));
                    values.push(value.clone());
                }
                Clause::AtMost(column, value) => {
                    parts.push(format!("{} <= ?", column));
                    values.push(value.clone());
                }
                Clause::IsNull(column) => parts.push(format!("{} IS NULL", column)),
                Clause::NullOrIn(column, list) if list.is_empty() => parts.push(format!("{} IS NULL", column)),
                Clause::NullOrIn(column, list) => {
                    let marks = vec!["?"; list.len()].join(", ");
                    parts.push(format!("({0} IS NULL OR {0} IN ({1}))", column, marks));
                    values.extend(list.iter().cloned());
                }
                Clause::Never => parts.push("1 = 0".to_string()),
            }
        }

        (format!(" WHERE {}", parts.join(" AND ")), values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_predicate_renders_nothing() {
        let (sql, values) = Predicate::new().to_sql();
        assert!(sql.is_empty());
        assert!(values.is_empty());
    }

    #[test]
    fn clauses_render_in_bind_order() {
        let from = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2025, 3, 31).unwrap();
        let predicate = Predicate::new()
            .and(Clause::Eq("site_id", SqlValue::Int(1)))
            .and(Clause::In("project_id", vec![10.into(), 11.into()]))
            .and(Clause::Between("record_date", from.into(), to.into()))
            .and(Clause::IsNull("reason"));

        let (sql, values) = predicate.to_sql();
        assert_eq!(
            sql,
            " WHERE site_id = ? AND project_id IN (?, ?) AND record_date BETWEEN ? AND ? AND reason IS NULL"
        );
        assert_eq!(
            values,
            vec![
                SqlValue::Int(1),
                SqlValue::Int(10),
                SqlValue::Int(11),
                SqlValue::Date(from),
                SqlValue::Date(to)
            ]
        );
    }

    #[test]
    fn hostile_values_stay_out_of_sql_text() {
        let predicate = Predicate::new().and(Clause::Eq("worker_key", "x' OR '1'='1".into()));
        let (sql, values) = predicate.to_sql();
        assert_eq!(sql, " WHERE worker_key = ?");
        assert_eq!(values, vec![SqlValue::Text("x' OR '1'='1".to_string())]);
    }

    #[test]
    fn null_or_in_keeps_placeholder_rows() {
        let predicate = Predicate::new().and(Clause::NullOrIn("project_id", vec![10.into()]));
        let (sql, values) = predicate.to_sql();
        assert_eq!(sql, " WHERE (project_id IS NULL OR project_id IN (?))");
        assert_eq!(values, vec![SqlValue::Int(10)]);
        assert!(!predicate.is_never());
    }

    #[test]
    fn empty_in_list_matches_nothing() {
        let predicate = Predicate::new().and(Clause::In("project_id", Vec::new()));
        assert!(predicate.is_never());
        assert_eq!(predicate.to_sql().0, " WHERE 1 = 0");
    }
}
