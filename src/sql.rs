use chrono::NaiveDate;
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;
use crate::time::{parse_date, time_to_minutes};

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertSalon {
        id: Ulid,
        name: Option<String>,
        time_zone: String,
        /// `None` means the server's default capacity.
        capacity: Option<i64>,
    },
    UpdateSalon {
        id: Ulid,
        name: Option<String>,
        time_zone: String,
        capacity: Option<i64>,
    },
    InsertBusinessHours {
        salon_id: Ulid,
        hours: BusinessHours,
    },
    InsertClosure {
        salon_id: Ulid,
        closure: SalonClosure,
    },
    DeleteClosure {
        id: Ulid,
    },
    /// Book; date/time stay as text so the store reports bad input itself.
    InsertAppointment {
        id: Ulid,
        salon_id: Ulid,
        date: String,
        time: String,
        duration: i64,
    },
    /// Cancel.
    DeleteAppointment {
        id: Ulid,
    },
    InsertCompletion {
        appointment_id: Ulid,
    },
    InsertReschedule {
        appointment_id: Ulid,
        date: String,
        time: String,
        duration: i64,
    },
    SelectSalons,
    SelectBusinessHours {
        salon_id: Ulid,
    },
    SelectClosures {
        salon_id: Ulid,
    },
    SelectAppointments {
        salon_id: Ulid,
    },
    SelectAvailability {
        salon_id: Ulid,
        date: String,
        duration: i64,
    },
    SelectSlotCheck {
        salon_id: Ulid,
        date: String,
        time: String,
        duration: i64,
        exclude_ids: Vec<Ulid>,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn arity(table: &'static str, values: &[Expr], min: usize) -> Result<(), SqlError> {
    if values.len() < min {
        return Err(SqlError::WrongArity(table, min, values.len()));
    }
    Ok(())
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "salons" | "salon_updates" => {
            arity("salons", &values, 3)?;
            let id = parse_ulid_expr(&values[0])?;
            let name = parse_string_or_null(&values[1])?;
            let time_zone = parse_string_expr(&values[2])?;
            let capacity = values.get(3).map(parse_i64_or_null).transpose()?.flatten();
            Ok(if table == "salons" {
                Command::InsertSalon { id, name, time_zone, capacity }
            } else {
                Command::UpdateSalon { id, name, time_zone, capacity }
            })
        }
        "business_hours" => {
            arity("business_hours", &values, 4)?;
            let day = parse_string_expr(&values[1])?;
            let weekday = Weekday::parse(&day)
                .ok_or_else(|| SqlError::InvalidValue(format!("unknown weekday '{day}'")))?;
            let is_closed = values.get(4).map(parse_bool).transpose()?.unwrap_or(false);
            Ok(Command::InsertBusinessHours {
                salon_id: parse_ulid_expr(&values[0])?,
                hours: BusinessHours {
                    weekday,
                    open: parse_time_expr(&values[2])?,
                    close: parse_time_expr(&values[3])?,
                    is_closed,
                },
            })
        }
        "closures" => {
            arity("closures", &values, 4)?;
            Ok(Command::InsertClosure {
                salon_id: parse_ulid_expr(&values[1])?,
                closure: SalonClosure {
                    id: parse_ulid_expr(&values[0])?,
                    start_date: parse_date_expr(&values[2])?,
                    end_date: parse_date_expr(&values[3])?,
                    reason: values.get(4).map(parse_string_or_null).transpose()?.flatten(),
                },
            })
        }
        "appointments" => {
            arity("appointments", &values, 5)?;
            Ok(Command::InsertAppointment {
                id: parse_ulid_expr(&values[0])?,
                salon_id: parse_ulid_expr(&values[1])?,
                date: parse_string_expr(&values[2])?,
                time: parse_string_expr(&values[3])?,
                duration: parse_i64_expr(&values[4])?,
            })
        }
        "completions" => {
            arity("completions", &values, 1)?;
            Ok(Command::InsertCompletion {
                appointment_id: parse_ulid_expr(&values[0])?,
            })
        }
        "reschedules" => {
            arity("reschedules", &values, 4)?;
            Ok(Command::InsertReschedule {
                appointment_id: parse_ulid_expr(&values[0])?,
                date: parse_string_expr(&values[1])?,
                time: parse_string_expr(&values[2])?,
                duration: parse_i64_expr(&values[3])?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "closures" => Ok(Command::DeleteClosure { id }),
        "appointments" => Ok(Command::DeleteAppointment { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "salons" => Ok(Command::SelectSalons),
        "business_hours" => Ok(Command::SelectBusinessHours {
            salon_id: parse_ulid_expr(filters.require("salon_id")?)?,
        }),
        "closures" => Ok(Command::SelectClosures {
            salon_id: parse_ulid_expr(filters.require("salon_id")?)?,
        }),
        "appointments" => Ok(Command::SelectAppointments {
            salon_id: parse_ulid_expr(filters.require("salon_id")?)?,
        }),
        "availability" => Ok(Command::SelectAvailability {
            salon_id: parse_ulid_expr(filters.require("salon_id")?)?,
            date: parse_string_expr(filters.require("date")?)?,
            duration: parse_i64_expr(filters.require("duration")?)?,
        }),
        "slot_check" => {
            let exclude_ids = filters
                .exclusions()
                .map(parse_ulid_expr)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Command::SelectSlotCheck {
                salon_id: parse_ulid_expr(filters.require("salon_id")?)?,
                date: parse_string_expr(filters.require("date")?)?,
                time: parse_string_expr(filters.require("time")?)?,
                duration: parse_i64_expr(filters.require("duration")?)?,
                exclude_ids,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── WHERE clause ──────────────────────────────────────────────

/// Conjunction of `col = value` and `col IN (...)` predicates.
#[derive(Default)]
struct Filters<'a> {
    eq: Vec<(String, &'a Expr)>,
    in_lists: Vec<(String, &'a [Expr])>,
}

impl<'a> Filters<'a> {
    fn require(&self, col: &'static str) -> Result<&'a Expr, SqlError> {
        self.eq
            .iter()
            .find(|(c, _)| c == col)
            .map(|(_, e)| *e)
            .ok_or(SqlError::MissingFilter(col))
    }

    /// Every value given for `exclude_id`, by `=` or `IN`.
    fn exclusions(&self) -> impl Iterator<Item = &'a Expr> + '_ {
        let single = self.eq.iter().filter(|(c, _)| c == "exclude_id").map(|(_, e)| *e);
        let listed = self
            .in_lists
            .iter()
            .filter(|(c, _)| c == "exclude_id")
            .flat_map(|(_, list)| list.iter());
        single.chain(listed)
    }
}

fn collect_filters<'a>(expr: &'a Expr, filters: &mut Filters<'a>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op: ast::BinaryOperator::And, right } => {
            collect_filters(left, filters)?;
            collect_filters(right, filters)
        }
        Expr::BinaryOp { left, op: ast::BinaryOperator::Eq, right } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            filters.eq.push((col, &**right));
            Ok(())
        }
        Expr::InList { expr, list, negated: false } => {
            let col = expr_column_name(expr)
                .ok_or_else(|| SqlError::Unsupported(format!("IN on {expr}")))?;
            filters.in_lists.push((col, list.as_slice()));
            Ok(())
        }
        Expr::Nested(inner) => collect_filters(inner, filters),
        other => Err(SqlError::Unsupported(format!("predicate {other}"))),
    }
}

// ── Helpers ───────────────────────────────────────────────────

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
    tables_with_joins
        .first()
        .ok_or_else(|| SqlError::Parse("DELETE without table".into()))
        .and_then(|first| table_factor_name(&first.relation))
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

/// First VALUES row. Multi-row inserts aren't supported.
fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row VALUES".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_ulid_expr(right),
        _ => Err(SqlError::MissingFilter("id")),
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

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string_expr(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::InvalidValue(format!("bad ULID '{s}': {e}")))
}

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_string_expr(expr).map(Some),
    }
}

fn parse_time_expr(expr: &Expr) -> Result<u32, SqlError> {
    time_to_minutes(&parse_string_expr(expr)?).map_err(|e| SqlError::InvalidValue(e.to_string()))
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    parse_date(&parse_string_expr(expr)?).map_err(|e| SqlError::InvalidValue(e.to_string()))
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer '{s}': {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_i64_expr(expr).map(Some),
    }
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(other) => Err(SqlError::Parse(format!("expected bool, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
    /// Well-formed SQL carrying a value the domain rejects (bad time, date, id).
    InvalidValue(String),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected at least {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::InvalidValue(s) => write!(f, "invalid value: {s}"),
        }
    }
}

impl std::error::Error for SqlError {}
