use std::collections::HashMap;

use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;
use crate::scheduler::PublishRequest;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    /// `INSERT INTO slots (...) VALUES (...)`
    PublishSlot {
        mentor: Caller,
        request: PublishRequest,
        returning: bool,
    },
    /// `INSERT INTO bookings (...) VALUES (...)`
    BookSlot {
        slot_id: Ulid,
        student: Caller,
        returning: bool,
    },
    /// `DELETE FROM bookings WHERE id = .. AND student_id = ..`
    CancelBooking {
        booking_id: Ulid,
        student_id: String,
        returning: bool,
    },
    /// `SELECT * FROM available_slots WHERE subject = .. [AND date = ..]`
    SelectAvailable {
        subject: String,
        date: Option<String>,
    },
    /// `SELECT * FROM slots WHERE mentor_id = ..`
    SelectMentorSlots {
        mentor_id: String,
    },
    /// `SELECT * FROM bookings WHERE student_id = ..`
    SelectStudentBookings {
        student_id: String,
    },
    /// `SELECT * FROM booking_summary WHERE student_id = ..`
    SelectStudentSummary {
        student_id: String,
    },
}

/// Row layout a statement produces, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    Slots,
    Bookings,
    Summary,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Classify a statement by its result rows without evaluating its values,
/// so `$n` placeholders are fine. Used to describe prepared statements.
pub fn result_shape(sql: &str) -> Option<ResultShape> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    match stmts.first()? {
        Statement::Insert(insert) if insert.returning.is_some() => {
            match insert_table_name(insert).ok()?.as_str() {
                "slots" => Some(ResultShape::Slots),
                "bookings" => Some(ResultShape::Bookings),
                _ => None,
            }
        }
        Statement::Delete(delete) if delete.returning.is_some() => {
            (delete_table_name(delete).ok()? == "bookings").then_some(ResultShape::Bookings)
        }
        Statement::Query(query) => match select_table_name(query).ok()?.as_str() {
            "available_slots" | "slots" => Some(ResultShape::Slots),
            "bookings" => Some(ResultShape::Bookings),
            "booking_summary" => Some(ResultShape::Summary),
            _ => None,
        },
        _ => None,
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let mut row = named_insert_row(insert)?;
    let returning = insert.returning.is_some();

    match table.as_str() {
        "slots" => {
            let mentor = Caller::mentor(
                row.required("mentor_id")?,
                row.optional("mentor_name").unwrap_or_default(),
                row.optional("mentor_email").unwrap_or_default(),
            );
            let request = PublishRequest {
                subject: row.optional("subject").unwrap_or_default(),
                date: row.optional("date").unwrap_or_default(),
                time_slot: row.optional("time_slot").unwrap_or_default(),
                max_occupants: parse_i64_text("max_occupants", &row.required("max_occupants")?)?,
                description: row.optional("description"),
            };
            row.finish()?;
            Ok(Command::PublishSlot { mentor, request, returning })
        }
        "bookings" => {
            let slot_id = parse_ulid_text(&row.required("slot_id")?)?;
            let student = Caller::student(
                row.required("student_id")?,
                row.optional("student_name").unwrap_or_default(),
                row.optional("student_email").unwrap_or_default(),
            );
            row.finish()?;
            Ok(Command::BookSlot { slot_id, student, returning })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != "bookings" {
        return Err(SqlError::UnknownTable(table));
    }
    let filters = where_equalities(delete.selection.as_ref())?;
    Ok(Command::CancelBooking {
        booking_id: parse_ulid_text(filter(&filters, "id")?)?,
        student_id: filter(&filters, "student_id")?.to_string(),
        returning: delete.returning.is_some(),
    })
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let table = select_table_name(query)?;
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let filters = where_equalities(select.selection.as_ref())?;

    match table.as_str() {
        "available_slots" => Ok(Command::SelectAvailable {
            subject: filter(&filters, "subject")?.to_string(),
            date: filters.get("date").cloned(),
        }),
        "slots" => Ok(Command::SelectMentorSlots {
            mentor_id: filter(&filters, "mentor_id")?.to_string(),
        }),
        "bookings" => Ok(Command::SelectStudentBookings {
            student_id: filter(&filters, "student_id")?.to_string(),
        }),
        "booking_summary" => Ok(Command::SelectStudentSummary {
            student_id: filter(&filters, "student_id")?.to_string(),
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── Helpers ───────────────────────────────────────────────────

/// First VALUES row keyed by the INSERT column list.
struct NamedRow(HashMap<String, Option<String>>);

impl NamedRow {
    fn required(&mut self, col: &'static str) -> Result<String, SqlError> {
        self.0
            .remove(col)
            .flatten()
            .ok_or(SqlError::MissingColumn(col))
    }

    /// Absent columns and NULL both read as `None`.
    fn optional(&mut self, col: &str) -> Option<String> {
        self.0.remove(col).flatten()
    }

    /// Reject columns nobody consumed.
    fn finish(self) -> Result<(), SqlError> {
        match self.0.into_keys().next() {
            Some(col) => Err(SqlError::UnknownColumn(col)),
            None => Ok(()),
        }
    }
}

fn named_insert_row(insert: &ast::Insert) -> Result<NamedRow, SqlError> {
    if insert.columns.is_empty() {
        return Err(SqlError::Parse("INSERT must name its columns".into()));
    }
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    let rows = match body.body.as_ref() {
        SetExpr::Values(values) => &values.rows,
        _ => return Err(SqlError::Parse("expected VALUES".into())),
    };
    let values = match rows.as_slice() {
        [] => return Err(SqlError::Parse("empty VALUES".into())),
        [row] => row,
        _ => return Err(SqlError::Unsupported("multi-row INSERT".into())),
    };
    if values.len() != insert.columns.len() {
        return Err(SqlError::WrongArity(insert.columns.len(), values.len()));
    }

    let mut named = HashMap::with_capacity(values.len());
    for (col, expr) in insert.columns.iter().zip(values) {
        named.insert(col.value.to_lowercase(), expr_text(expr)?);
    }
    Ok(NamedRow(named))
}

/// `col = literal` pairs joined by AND.
fn where_equalities(selection: Option<&Expr>) -> Result<HashMap<String, String>, SqlError> {
    let mut out = HashMap::new();
    if let Some(expr) = selection {
        collect_equalities(expr, &mut out)?;
    }
    Ok(out)
}

fn collect_equalities(expr: &Expr, out: &mut HashMap<String, String>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_equalities(inner, out),
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_equalities(left, out)?;
            collect_equalities(right, out)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            let value = expr_text(right)?
                .ok_or_else(|| SqlError::Unsupported(format!("{col} = NULL")))?;
            out.insert(col, value);
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

fn filter<'a>(
    filters: &'a HashMap<String, String>,
    col: &'static str,
) -> Result<&'a str, SqlError> {
    filters
        .get(col)
        .map(String::as_str)
        .ok_or(SqlError::MissingFilter(col))
}

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn select_table_name(query: &ast::Query) -> Result<String, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let first = select
        .from
        .first()
        .ok_or_else(|| SqlError::Parse("SELECT without FROM".into()))?;
    table_factor_name(&first.relation)
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

/// Literal as text; `NULL` is `None`.
fn expr_text(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr: inner,
    } = expr
    {
        return Ok(expr_text(inner)?.map(|s| format!("-{s}")));
    }
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(Some(s.clone())),
        Some(Value::Null) => Ok(None),
        Some(Value::Boolean(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(SqlError::Parse(format!("unsupported literal {other}"))),
        None => Err(SqlError::Parse(format!("expected literal, got {expr}"))),
    }
}

fn parse_ulid_text(s: &str) -> Result<Ulid, SqlError> {
    Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
}

fn parse_i64_text(col: &str, s: &str) -> Result<i64, SqlError> {
    s.trim()
        .parse()
        .map_err(|_| SqlError::Parse(format!("{col} must be an integer, got {s:?}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("expected {0} values, got {1}")]
    WrongArity(usize, usize),
    #[error("missing column: {0}")]
    MissingColumn(&'static str),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
}
