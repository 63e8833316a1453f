use chrono::NaiveDate;
use chrono_tz::Tz;
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Three-state field update: leave alone, set to NULL, or set to a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Patch<T> {
    Keep,
    Clear,
    Set(T),
}

/// Parsed command from SQL input.
///
/// The surface is a handful of virtual tables: `providers`, `services`,
/// `service_providers`, `weekly_rules`, `date_overrides`, `bookings`, plus
/// read-only `availability`, `slot_check` and `slot_providers`.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertProvider {
        id: Ulid,
        name: Option<String>,
        timezone: String,
    },
    UpdateProvider {
        id: Ulid,
        name: Patch<String>,
        timezone: Option<String>,
    },
    DeleteProvider {
        id: Ulid,
    },
    InsertService {
        id: Ulid,
        name: String,
        duration_min: i64,
        buffer_before_min: i64,
        buffer_after_min: i64,
        min_notice_hours: i64,
        max_future_days: i64,
        max_capacity: u32,
    },
    UpdateService {
        id: Ulid,
        name: Option<String>,
        duration_min: Option<i64>,
        buffer_before_min: Option<i64>,
        buffer_after_min: Option<i64>,
        min_notice_hours: Option<i64>,
        max_future_days: Option<i64>,
        max_capacity: Option<u32>,
    },
    DeleteService {
        id: Ulid,
    },
    AssignProvider {
        service_id: Ulid,
        provider_id: Ulid,
    },
    UnassignProvider {
        service_id: Ulid,
        provider_id: Ulid,
    },
    /// Replaces the full set of ranges for one weekday. Empty ranges clear it.
    ReplaceWeeklyRules {
        provider_id: Ulid,
        day_of_week: u8,
        ranges: Vec<TimeRange>,
    },
    UpsertOverride {
        provider_id: Ulid,
        date: NaiveDate,
        is_available: bool,
        window: Option<TimeRange>,
        reason: Option<String>,
    },
    DeleteOverride {
        provider_id: Ulid,
        date: NaiveDate,
    },
    /// `provider_id = None` requests any-provider assignment.
    InsertBooking {
        id: Ulid,
        service_id: Ulid,
        provider_id: Option<Ulid>,
        start: Ms,
        status: BookingStatus,
        client_name: Option<String>,
        client_email: Option<String>,
    },
    UpdateBookingStatus {
        id: Ulid,
        status: BookingStatus,
    },
    CancelBooking {
        id: Ulid,
    },
    SelectProviders,
    SelectServices,
    SelectWeeklyRules {
        provider_id: Ulid,
    },
    SelectOverrides {
        provider_id: Ulid,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    },
    SelectBookings {
        provider_id: Ulid,
    },
    SelectAvailability {
        service_id: Ulid,
        start_date: NaiveDate,
        end_date: NaiveDate,
        tz: Tz,
        provider_id: Option<Ulid>,
    },
    SelectSlotCheck {
        service_id: Ulid,
        provider_id: Ulid,
        start: Ms,
    },
    SelectSlotProviders {
        service_id: Ulid,
        start: Ms,
    },
    Listen {
        channel: String,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if trimmed.to_uppercase().starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches(';').to_string();
        return Ok(Command::Listen { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        // (id, name, timezone)
        "providers" => {
            if values.len() < 3 {
                return Err(SqlError::WrongArity("providers", 3, values.len()));
            }
            Ok(Command::InsertProvider {
                id: parse_ulid(&values[0])?,
                name: parse_string_or_null(&values[1])?,
                timezone: parse_string(&values[2])?,
            })
        }
        // (id, name, duration_min[, buffer_before_min, buffer_after_min,
        //  min_notice_hours, max_future_days, max_capacity])
        "services" => {
            if values.len() < 3 {
                return Err(SqlError::WrongArity("services", 3, values.len()));
            }
            let opt_i64 = |i: usize, default: i64| -> Result<i64, SqlError> {
                if values.len() > i {
                    parse_i64(&values[i])
                } else {
                    Ok(default)
                }
            };
            let max_capacity = if values.len() > 7 {
                parse_u32(&values[7])?
            } else {
                1
            };
            Ok(Command::InsertService {
                id: parse_ulid(&values[0])?,
                name: parse_string(&values[1])?,
                duration_min: parse_i64(&values[2])?,
                buffer_before_min: opt_i64(3, 0)?,
                buffer_after_min: opt_i64(4, 0)?,
                min_notice_hours: opt_i64(5, 0)?,
                max_future_days: opt_i64(6, 30)?,
                max_capacity,
            })
        }
        // (service_id, provider_id)
        "service_providers" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("service_providers", 2, values.len()));
            }
            Ok(Command::AssignProvider {
                service_id: parse_ulid(&values[0])?,
                provider_id: parse_ulid(&values[1])?,
            })
        }
        // Rows of (provider_id, day_of_week, start_min, end_min); one INSERT
        // replaces the whole day, so every row must share provider and day.
        "weekly_rules" => {
            let rows = extract_all_insert_rows(insert)?;
            let mut provider_id = None;
            let mut day_of_week = None;
            let mut ranges = Vec::with_capacity(rows.len());
            for (i, row) in rows.iter().enumerate() {
                if row.len() < 4 {
                    return Err(SqlError::WrongArity("weekly_rules row", 4, row.len()));
                }
                let pid = parse_ulid(&row[0]).map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?;
                let dow = parse_u8(&row[1]).map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?;
                if *provider_id.get_or_insert(pid) != pid {
                    return Err(SqlError::Parse(
                        "weekly_rules rows must share provider_id".into(),
                    ));
                }
                if *day_of_week.get_or_insert(dow) != dow {
                    return Err(SqlError::Parse(
                        "weekly_rules rows must share day_of_week".into(),
                    ));
                }
                ranges.push(TimeRange {
                    start_min: parse_u16(&row[2])?,
                    end_min: parse_u16(&row[3])?,
                });
            }
            Ok(Command::ReplaceWeeklyRules {
                provider_id: provider_id.ok_or(SqlError::MissingFilter("provider_id"))?,
                day_of_week: day_of_week.ok_or(SqlError::MissingFilter("day_of_week"))?,
                ranges,
            })
        }
        // (provider_id, date, is_available[, start_min, end_min, reason])
        "date_overrides" => {
            if values.len() < 3 {
                return Err(SqlError::WrongArity("date_overrides", 3, values.len()));
            }
            let start_min = if values.len() > 3 {
                parse_u16_or_null(&values[3])?
            } else {
                None
            };
            let end_min = if values.len() > 4 {
                parse_u16_or_null(&values[4])?
            } else {
                None
            };
            let window = match (start_min, end_min) {
                (Some(s), Some(e)) => Some(TimeRange { start_min: s, end_min: e }),
                (None, None) => None,
                _ => {
                    return Err(SqlError::Parse(
                        "override window needs both start_min and end_min".into(),
                    ));
                }
            };
            let reason = if values.len() > 5 {
                parse_string_or_null(&values[5])?
            } else {
                None
            };
            Ok(Command::UpsertOverride {
                provider_id: parse_ulid(&values[0])?,
                date: parse_date(&values[1])?,
                is_available: parse_bool(&values[2])?,
                window,
                reason,
            })
        }
        // (id, service_id, provider_id, start[, status, client_name, client_email])
        "bookings" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("bookings", 4, values.len()));
            }
            let status = if values.len() > 4 {
                parse_status(&values[4])?
            } else {
                BookingStatus::Confirmed
            };
            let client_name = if values.len() > 5 {
                parse_string_or_null(&values[5])?
            } else {
                None
            };
            let client_email = if values.len() > 6 {
                parse_string_or_null(&values[6])?
            } else {
                None
            };
            Ok(Command::InsertBooking {
                id: parse_ulid(&values[0])?,
                service_id: parse_ulid(&values[1])?,
                provider_id: parse_ulid_or_null(&values[2])?,
                start: parse_instant(&values[3])?,
                status,
                client_name,
                client_email,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let mut set: Vec<(String, &Expr)> = Vec::with_capacity(assignments.len());
    for a in assignments {
        let col = match &a.target {
            ast::AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty assignment target".into()))?,
            other => return Err(SqlError::Parse(format!("unsupported assignment: {other}"))),
        };
        set.push((col, &a.value));
    }
    let get = |col: &str| set.iter().find(|(c, _)| c == col).map(|(_, e)| *e);

    match table.as_str() {
        "providers" => {
            let id = extract_where_id(selection)?;
            let name = match get("name") {
                None => Patch::Keep,
                Some(expr) => match parse_string_or_null(expr)? {
                    Some(s) => Patch::Set(s),
                    None => Patch::Clear,
                },
            };
            let timezone = get("timezone").map(parse_string).transpose()?;
            Ok(Command::UpdateProvider { id, name, timezone })
        }
        "services" => {
            let id = extract_where_id(selection)?;
            Ok(Command::UpdateService {
                id,
                name: get("name").map(parse_string).transpose()?,
                duration_min: get("duration_min").map(parse_i64).transpose()?,
                buffer_before_min: get("buffer_before_min").map(parse_i64).transpose()?,
                buffer_after_min: get("buffer_after_min").map(parse_i64).transpose()?,
                min_notice_hours: get("min_notice_hours").map(parse_i64).transpose()?,
                max_future_days: get("max_future_days").map(parse_i64).transpose()?,
                max_capacity: get("max_capacity").map(parse_u32).transpose()?,
            })
        }
        "bookings" => {
            let id = extract_where_id(selection)?;
            let status = get("status").ok_or(SqlError::MissingFilter("status"))?;
            Ok(Command::UpdateBookingStatus {
                id,
                status: parse_status(status)?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = collect_filters(&delete.selection)?;

    match table.as_str() {
        "providers" => Ok(Command::DeleteProvider {
            id: filters.require_ulid("id")?,
        }),
        "services" => Ok(Command::DeleteService {
            id: filters.require_ulid("id")?,
        }),
        "service_providers" => Ok(Command::UnassignProvider {
            service_id: filters.require_ulid("service_id")?,
            provider_id: filters.require_ulid("provider_id")?,
        }),
        // Clearing a weekday is the same operation as replacing it with nothing.
        "weekly_rules" => Ok(Command::ReplaceWeeklyRules {
            provider_id: filters.require_ulid("provider_id")?,
            day_of_week: filters.require_u8("day_of_week")?,
            ranges: Vec::new(),
        }),
        "date_overrides" => Ok(Command::DeleteOverride {
            provider_id: filters.require_ulid("provider_id")?,
            date: filters.require_date("date")?,
        }),
        // Bookings are never hard-deleted over the wire; DELETE cancels.
        "bookings" => Ok(Command::CancelBooking {
            id: filters.require_ulid("id")?,
        }),
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
    let filters = collect_filters(&select.selection)?;

    match table.as_str() {
        "providers" => Ok(Command::SelectProviders),
        "services" => Ok(Command::SelectServices),
        "weekly_rules" => Ok(Command::SelectWeeklyRules {
            provider_id: filters.require_ulid("provider_id")?,
        }),
        "date_overrides" => Ok(Command::SelectOverrides {
            provider_id: filters.require_ulid("provider_id")?,
            start_date: filters.get_date_bound("date", FilterOp::Ge)?,
            end_date: filters.get_date_bound("date", FilterOp::Le)?,
        }),
        "bookings" => Ok(Command::SelectBookings {
            provider_id: filters.require_ulid("provider_id")?,
        }),
        "availability" => {
            let tz = match filters.get("tz") {
                Some(expr) => {
                    let name = parse_string(expr)?;
                    crate::tz::parse_tz(&name)
                        .ok_or_else(|| SqlError::Parse(format!("unknown timezone: {name}")))?
                }
                None => chrono_tz::UTC,
            };
            Ok(Command::SelectAvailability {
                service_id: filters.require_ulid("service_id")?,
                start_date: filters.require_date("start_date")?,
                end_date: filters.require_date("end_date")?,
                tz,
                provider_id: filters.get_ulid("provider_id")?,
            })
        }
        "slot_check" => Ok(Command::SelectSlotCheck {
            service_id: filters.require_ulid("service_id")?,
            provider_id: filters.require_ulid("provider_id")?,
            start: filters.require_instant("start")?,
        }),
        "slot_providers" => Ok(Command::SelectSlotProviders {
            service_id: filters.require_ulid("service_id")?,
            start: filters.require_instant("start")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── WHERE clause handling ─────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterOp {
    Eq,
    Ge,
    Le,
}

/// Comparisons from an AND-chain: `col = value` lookups plus `col >= value`
/// and `col <= value` range bounds.
struct Filters<'a>(Vec<(String, FilterOp, &'a Expr)>);

impl<'a> Filters<'a> {
    fn get(&self, col: &str) -> Option<&'a Expr> {
        self.find(col, FilterOp::Eq)
    }

    fn find(&self, col: &str, op: FilterOp) -> Option<&'a Expr> {
        self.0
            .iter()
            .find(|(c, o, _)| c == col && *o == op)
            .map(|(_, _, e)| *e)
    }

    fn require(&self, col: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(col).ok_or(SqlError::MissingFilter(col))
    }

    fn require_ulid(&self, col: &'static str) -> Result<Ulid, SqlError> {
        parse_ulid(self.require(col)?)
    }

    fn get_ulid(&self, col: &'static str) -> Result<Option<Ulid>, SqlError> {
        self.get(col).map(parse_ulid).transpose()
    }

    fn require_instant(&self, col: &'static str) -> Result<Ms, SqlError> {
        parse_instant(self.require(col)?)
    }

    fn require_u8(&self, col: &'static str) -> Result<u8, SqlError> {
        parse_u8(self.require(col)?)
    }

    fn require_date(&self, col: &'static str) -> Result<NaiveDate, SqlError> {
        parse_date(self.require(col)?)
    }

    fn get_date_bound(
        &self,
        col: &str,
        op: FilterOp,
    ) -> Result<Option<NaiveDate>, SqlError> {
        self.find(col, op).map(parse_date).transpose()
    }
}

fn collect_filters(selection: &Option<Expr>) -> Result<Filters<'_>, SqlError> {
    let mut filters = Filters(Vec::new());
    if let Some(expr) = selection {
        collect_filter(expr, &mut filters)?;
    }
    Ok(filters)
}

fn collect_filter<'a>(expr: &'a Expr, filters: &mut Filters<'a>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_filter(left, filters)?;
            collect_filter(right, filters)?;
            Ok(())
        }
        Expr::BinaryOp { left, op, right } => {
            let fop = match op {
                ast::BinaryOperator::Eq => FilterOp::Eq,
                ast::BinaryOperator::GtEq => FilterOp::Ge,
                ast::BinaryOperator::LtEq => FilterOp::Le,
                other => {
                    return Err(SqlError::Unsupported(format!("operator: {other}")));
                }
            };
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Parse(format!("expected column, got {left}")))?;
            filters.0.push((col, fop, right));
            Ok(())
        }
        Expr::Nested(inner) => collect_filter(inner, filters),
        other => Err(SqlError::Unsupported(format!("filter expression: {other}"))),
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
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let rows = extract_all_insert_rows(insert)?;
    Ok(rows.into_iter().next().unwrap())
}

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    collect_filters(selection)?.require_ulid("id")
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

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_ulid(expr).map(Some),
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

/// An instant: epoch milliseconds, or an RFC 3339 datetime string.
fn parse_instant(expr: &Expr) -> Result<Ms, SqlError> {
    if let Some(Value::SingleQuotedString(s)) = extract_value(expr) {
        if let Some(ms) = crate::tz::parse_instant(s) {
            return Ok(ms);
        }
    }
    parse_i64(expr)
}

fn parse_u8(expr: &Expr) -> Result<u8, SqlError> {
    let v = parse_i64(expr)?;
    u8::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u8 range")))
}

fn parse_u16(expr: &Expr) -> Result<u16, SqlError> {
    let v = parse_i64(expr)?;
    u16::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u16 range")))
}

fn parse_u16_or_null(expr: &Expr) -> Result<Option<u16>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_u16(expr).map(Some),
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_string(expr).map(Some),
    }
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

fn parse_status(expr: &Expr) -> Result<BookingStatus, SqlError> {
    let s = parse_string(expr)?;
    BookingStatus::parse(&s).ok_or_else(|| SqlError::Parse(format!("unknown status: {s}")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
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
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
