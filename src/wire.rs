use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use ulid::Ulid;

use crate::auth::SlotdAuthSource;
use crate::engine::{Engine, EngineError};
use crate::observability;
use crate::sql::{self, Command, Patch};
use crate::tenant::TenantManager;

pub struct SlotdHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<SlotdQueryParser>,
}

impl SlotdHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(SlotdQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    async fn run(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(
            observability::QUERIES_TOTAL,
            "command" => label,
            "status" => status
        )
        .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertProvider { id, name, timezone } => {
                engine
                    .create_provider(id, name, &timezone)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateProvider { id, name, timezone } => {
                // Partial update: merge with the current profile.
                let current = engine.get_provider(&id).ok_or_else(|| engine_err(EngineError::NotFound(id)))?;
                let (cur_name, cur_tz) = {
                    let ps = current.read().await;
                    (ps.name.clone(), ps.tz.name().to_string())
                };
                let name = match name {
                    Patch::Keep => cur_name,
                    Patch::Clear => None,
                    Patch::Set(n) => Some(n),
                };
                let timezone = timezone.unwrap_or(cur_tz);
                engine
                    .update_provider(id, name, &timezone)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteProvider { id } => {
                engine.delete_provider(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertService {
                id,
                name,
                duration_min,
                buffer_before_min,
                buffer_after_min,
                min_notice_hours,
                max_future_days,
                max_capacity,
            } => {
                engine
                    .create_service(
                        id,
                        name,
                        duration_min,
                        buffer_before_min,
                        buffer_after_min,
                        min_notice_hours,
                        max_future_days,
                        max_capacity,
                    )
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateService {
                id,
                name,
                duration_min,
                buffer_before_min,
                buffer_after_min,
                min_notice_hours,
                max_future_days,
                max_capacity,
            } => {
                let cur = engine
                    .get_service(&id)
                    .ok_or_else(|| engine_err(EngineError::NotFound(id)))?;
                engine
                    .update_service(
                        id,
                        name.unwrap_or(cur.name),
                        duration_min.unwrap_or(cur.duration_min),
                        buffer_before_min.unwrap_or(cur.buffer_before_min),
                        buffer_after_min.unwrap_or(cur.buffer_after_min),
                        min_notice_hours.unwrap_or(cur.min_notice_hours),
                        max_future_days.unwrap_or(cur.max_future_days),
                        max_capacity.unwrap_or(cur.max_capacity),
                    )
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteService { id } => {
                engine.delete_service(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::AssignProvider {
                service_id,
                provider_id,
            } => {
                engine
                    .assign_provider(service_id, provider_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UnassignProvider {
                service_id,
                provider_id,
            } => {
                engine
                    .unassign_provider(service_id, provider_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::ReplaceWeeklyRules {
                provider_id,
                day_of_week,
                ranges,
            } => {
                let count = ranges.len();
                engine
                    .replace_weekly_day(provider_id, day_of_week, ranges)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(
                    Tag::new("INSERT").with_rows(count),
                )])
            }
            Command::UpsertOverride {
                provider_id,
                date,
                is_available,
                window,
                reason,
            } => {
                engine
                    .upsert_override(provider_id, date, is_available, window, reason)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteOverride { provider_id, date } => {
                engine
                    .delete_override(provider_id, date)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertBooking {
                id,
                service_id,
                provider_id,
                start,
                status,
                client_name,
                client_email,
            } => {
                let booking = engine
                    .create_booking(
                        id,
                        service_id,
                        provider_id,
                        start,
                        status,
                        client_name,
                        client_email,
                    )
                    .await
                    .map_err(engine_err)?;

                // Echo the assigned provider back so any-provider callers
                // learn who they got.
                let schema = Arc::new(booking_schema());
                let rows = vec![encode_booking(&schema, &booking)];
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::UpdateBookingStatus { id, status } => {
                engine
                    .set_booking_status(id, status)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::CancelBooking { id } => {
                engine.cancel_booking(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SelectProviders => {
                let providers = engine.list_providers().await;
                let schema = Arc::new(provider_schema());
                let rows: Vec<PgWireResult<_>> = providers
                    .into_iter()
                    .map(|p| {
                        let mut enc = DataRowEncoder::new(schema.clone());
                        enc.encode_field(&p.id.to_string())?;
                        enc.encode_field(&p.name)?;
                        enc.encode_field(&p.timezone)?;
                        Ok(enc.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectServices => {
                let services = engine.list_services();
                let schema = Arc::new(service_schema());
                let rows: Vec<PgWireResult<_>> = services
                    .into_iter()
                    .map(|s| {
                        let mut enc = DataRowEncoder::new(schema.clone());
                        enc.encode_field(&s.id.to_string())?;
                        enc.encode_field(&s.name)?;
                        enc.encode_field(&s.duration_min)?;
                        enc.encode_field(&s.buffer_before_min)?;
                        enc.encode_field(&s.buffer_after_min)?;
                        enc.encode_field(&s.min_notice_hours)?;
                        enc.encode_field(&s.max_future_days)?;
                        enc.encode_field(&(s.max_capacity as i64))?;
                        enc.encode_field(&join_ids(&s.provider_ids))?;
                        Ok(enc.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectWeeklyRules { provider_id } => {
                let rules = engine
                    .get_weekly_rules(provider_id)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(weekly_rule_schema());
                let rows: Vec<PgWireResult<_>> = rules
                    .into_iter()
                    .map(|r| {
                        let mut enc = DataRowEncoder::new(schema.clone());
                        enc.encode_field(&r.provider_id.to_string())?;
                        enc.encode_field(&(r.day_of_week as i64))?;
                        enc.encode_field(&(r.range.start_min as i64))?;
                        enc.encode_field(&(r.range.end_min as i64))?;
                        Ok(enc.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectOverrides {
                provider_id,
                start_date,
                end_date,
            } => {
                let overrides = engine
                    .get_overrides(provider_id, start_date, end_date)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(override_schema());
                let rows: Vec<PgWireResult<_>> = overrides
                    .into_iter()
                    .map(|ov| {
                        let mut enc = DataRowEncoder::new(schema.clone());
                        enc.encode_field(&ov.provider_id.to_string())?;
                        enc.encode_field(&ov.date.to_string())?;
                        enc.encode_field(&ov.is_available)?;
                        enc.encode_field(&ov.window.map(|w| w.start_min as i64))?;
                        enc.encode_field(&ov.window.map(|w| w.end_min as i64))?;
                        enc.encode_field(&ov.reason)?;
                        Ok(enc.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectBookings { provider_id } => {
                let bookings = engine.get_bookings(provider_id).await.map_err(engine_err)?;
                let schema = Arc::new(booking_schema());
                let rows: Vec<PgWireResult<_>> = bookings
                    .iter()
                    .map(|b| encode_booking(&schema, b))
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectAvailability {
                service_id,
                start_date,
                end_date,
                tz,
                provider_id,
            } => {
                let result = engine
                    .get_availability(service_id, start_date, end_date, tz, provider_id)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(availability_schema());
                let mut rows: Vec<PgWireResult<_>> = Vec::new();
                for day in result.days {
                    let date = day.date.to_string();
                    if day.slots.is_empty() {
                        // One NULL row per empty day keeps the calendar shape
                        // visible to the client.
                        let mut enc = DataRowEncoder::new(schema.clone());
                        enc.encode_field(&date)?;
                        enc.encode_field(&None::<i64>)?;
                        enc.encode_field(&None::<i64>)?;
                        enc.encode_field(&None::<String>)?;
                        rows.push(Ok(enc.take_row()));
                        continue;
                    }
                    for slot in day.slots {
                        let mut enc = DataRowEncoder::new(schema.clone());
                        enc.encode_field(&date)?;
                        enc.encode_field(&slot.span.start)?;
                        enc.encode_field(&slot.span.end)?;
                        enc.encode_field(&join_ids(&slot.provider_ids))?;
                        rows.push(Ok(enc.take_row()));
                    }
                }
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectSlotCheck {
                service_id,
                provider_id,
                start,
            } => {
                let check = engine
                    .check_slot(service_id, provider_id, start)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(slot_check_schema());
                let mut enc = DataRowEncoder::new(schema.clone());
                enc.encode_field(&check.available)?;
                enc.encode_field(&check.reason.map(|r| r.as_str()))?;
                let rows = vec![Ok(enc.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectSlotProviders { service_id, start } => {
                let free = engine
                    .providers_for_slot(service_id, start)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(slot_providers_schema());
                let rows: Vec<PgWireResult<_>> = free
                    .into_iter()
                    .map(|pid| {
                        let mut enc = DataRowEncoder::new(schema.clone());
                        enc.encode_field(&pid.to_string())?;
                        Ok(enc.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::Listen { channel } => {
                let provider_id_str = channel.strip_prefix("provider_").ok_or_else(|| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "42000".into(),
                        format!("invalid channel: {channel} (expected provider_{{id}})"),
                    )))
                })?;
                let _provider_id = Ulid::from_string(provider_id_str).map_err(|e| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "42000".into(),
                        format!("bad ULID in channel: {e}"),
                    )))
                })?;
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
        }
    }
}

fn join_ids(ids: &[Ulid]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn encode_booking(
    schema: &Arc<Vec<FieldInfo>>,
    b: &crate::model::Booking,
) -> PgWireResult<pgwire::messages::data::DataRow> {
    let mut enc = DataRowEncoder::new(schema.clone());
    enc.encode_field(&b.id.to_string())?;
    enc.encode_field(&b.service_id.to_string())?;
    enc.encode_field(&b.provider_id.to_string())?;
    enc.encode_field(&b.span.start)?;
    enc.encode_field(&b.span.end)?;
    enc.encode_field(&b.status.as_str())?;
    enc.encode_field(&b.client_name)?;
    enc.encode_field(&b.client_email)?;
    Ok(enc.take_row())
}

// ── Row schemas ──────────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn bool_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::BOOL, FieldFormat::Text)
}

fn provider_schema() -> Vec<FieldInfo> {
    vec![text_field("id"), text_field("name"), text_field("timezone")]
}

fn service_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("name"),
        int8_field("duration_min"),
        int8_field("buffer_before_min"),
        int8_field("buffer_after_min"),
        int8_field("min_notice_hours"),
        int8_field("max_future_days"),
        int8_field("max_capacity"),
        text_field("provider_ids"),
    ]
}

fn weekly_rule_schema() -> Vec<FieldInfo> {
    vec![
        text_field("provider_id"),
        int8_field("day_of_week"),
        int8_field("start_min"),
        int8_field("end_min"),
    ]
}

fn override_schema() -> Vec<FieldInfo> {
    vec![
        text_field("provider_id"),
        text_field("date"),
        bool_field("is_available"),
        int8_field("start_min"),
        int8_field("end_min"),
        text_field("reason"),
    ]
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("service_id"),
        text_field("provider_id"),
        int8_field("start"),
        int8_field("end"),
        text_field("status"),
        text_field("client_name"),
        text_field("client_email"),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        text_field("date"),
        int8_field("start"),
        int8_field("end"),
        text_field("provider_ids"),
    ]
}

fn slot_check_schema() -> Vec<FieldInfo> {
    vec![bool_field("available"), text_field("reason")]
}

fn slot_providers_schema() -> Vec<FieldInfo> {
    vec![text_field("provider_id")]
}

/// Best-effort schema guess for Describe, keyed on the virtual table name.
fn result_schema_for(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    let is_select = upper.trim_start().starts_with("SELECT");
    let inserts_booking = upper.trim_start().starts_with("INSERT") && upper.contains("BOOKINGS");
    if inserts_booking {
        return booking_schema();
    }
    if !is_select {
        return vec![];
    }
    if upper.contains("SLOT_PROVIDERS") {
        slot_providers_schema()
    } else if upper.contains("SLOT_CHECK") {
        slot_check_schema()
    } else if upper.contains("AVAILABILITY") {
        availability_schema()
    } else if upper.contains("WEEKLY_RULES") {
        weekly_rule_schema()
    } else if upper.contains("DATE_OVERRIDES") {
        override_schema()
    } else if upper.contains("BOOKINGS") {
        booking_schema()
    } else if upper.contains("SERVICES") {
        service_schema()
    } else if upper.contains("PROVIDERS") {
        provider_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for SlotdHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.run(&engine, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SlotdQueryParser;

#[async_trait]
impl QueryParser for SlotdQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema_for(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SlotdHandler {
    type Statement = String;
    type QueryParser = SlotdQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.run(&engine, cmd).await?;
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema_for(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema_for(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start {
                if let Ok(n) = sql[start..i].parse::<usize>() {
                    if n > max {
                        max = n;
                    }
                }
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SlotdFactory {
    handler: Arc<SlotdHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<SlotdAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SlotdFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = SlotdAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(SlotdHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SlotdFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Engine errors carry the SQLSTATE the failure class maps to:
/// booking races are exclusion violations, lookups are no_data_found,
/// validation is invalid_parameter_value.
fn engine_err(e: EngineError) -> PgWireError {
    let code = match &e {
        EngineError::NotFound(_) => "P0002",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::SlotUnavailable(_)
        | EngineError::Conflict(_)
        | EngineError::CapacityExceeded(_) => "23P01",
        EngineError::InvalidTransition { .. } | EngineError::Validation(_) => "22023",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "XX000",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}

/// Drive one client connection through the pgwire protocol.
pub async fn process_connection(
    socket: tokio::net::TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<pgwire::tokio::TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(SlotdFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_params_finds_highest() {
        assert_eq!(count_params("SELECT * FROM providers"), 0);
        assert_eq!(count_params("INSERT INTO providers VALUES ($1, $2, $3)"), 3);
        assert_eq!(count_params("WHERE a = $2 AND b = $1"), 2);
    }

    #[test]
    fn describe_schema_disambiguates_tables() {
        let cols = |fields: Vec<FieldInfo>| -> Vec<String> {
            fields.iter().map(|f| f.name().to_string()).collect()
        };
        assert_eq!(
            cols(result_schema_for("SELECT * FROM slot_providers WHERE service_id = 'x'")),
            vec!["provider_id"]
        );
        assert_eq!(
            cols(result_schema_for("SELECT * FROM providers")),
            vec!["id", "name", "timezone"]
        );
        assert!(result_schema_for("DELETE FROM providers WHERE id = 'x'").is_empty());
        assert_eq!(
            cols(result_schema_for("INSERT INTO bookings (id) VALUES ('x')"))[0],
            "id"
        );
    }
}
