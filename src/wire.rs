use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
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
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::ChairtimeAuthSource;
use crate::engine::{Engine, EngineError, SlotCheckQuery, SlotQuery, SourceError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError};
use crate::store::{BookingRequest, Store, StoreError};

pub struct ChairtimeHandler {
    store: Arc<Store>,
    engine: Engine<Store>,
    /// Capacity for salons inserted without one.
    default_capacity: Capacity,
    query_parser: Arc<ChairtimeQueryParser>,
}

fn now_ms() -> Ms {
    Utc::now().timestamp_millis()
}

fn inserted(rows: usize) -> Vec<Response> {
    vec![Response::Execution(Tag::new("INSERT").with_rows(rows))]
}

fn deleted() -> Vec<Response> {
    vec![Response::Execution(Tag::new("DELETE").with_rows(1))]
}

impl ChairtimeHandler {
    pub fn new(store: Arc<Store>, engine: Engine<Store>, default_capacity: Capacity) -> Self {
        Self {
            store,
            engine,
            default_capacity,
            query_parser: Arc::new(ChairtimeQueryParser),
        }
    }

    /// Execute with per-command RED metrics.
    async fn run(&self, cmd: Command) -> PgWireResult<Vec<Response>> {
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Vec<Response>> {
        let store = self.store.as_ref();
        match cmd {
            Command::InsertSalon {
                id,
                name,
                time_zone,
                capacity,
            } => {
                let capacity = capacity.map_or(self.default_capacity, Capacity::new);
                store
                    .create_salon(id, name, &time_zone, capacity)
                    .await
                    .map_err(store_err)?;
                Ok(inserted(1))
            }
            Command::UpdateSalon {
                id,
                name,
                time_zone,
                capacity,
            } => {
                store
                    .update_salon(id, name, &time_zone, capacity.map(Capacity::new))
                    .await
                    .map_err(store_err)?;
                Ok(inserted(1))
            }
            Command::InsertBusinessHours { salon_id, hours } => {
                store
                    .set_business_hours(salon_id, hours)
                    .await
                    .map_err(store_err)?;
                Ok(inserted(1))
            }
            Command::InsertClosure { salon_id, closure } => {
                store.add_closure(salon_id, closure).await.map_err(store_err)?;
                Ok(inserted(1))
            }
            Command::DeleteClosure { id } => {
                store.remove_closure(id).await.map_err(store_err)?;
                Ok(deleted())
            }
            Command::InsertAppointment {
                id,
                salon_id,
                date,
                time,
                duration,
            } => {
                let req = BookingRequest {
                    date: &date,
                    time: &time,
                    duration_minutes: duration,
                    now: Some(now_ms()),
                };
                store
                    .book_appointment(id, salon_id, &req)
                    .await
                    .map_err(store_err)?;
                Ok(inserted(1))
            }
            Command::DeleteAppointment { id } => {
                store.cancel_appointment(id).await.map_err(store_err)?;
                Ok(deleted())
            }
            Command::InsertCompletion { appointment_id } => {
                store
                    .complete_appointment(appointment_id)
                    .await
                    .map_err(store_err)?;
                Ok(inserted(1))
            }
            Command::InsertReschedule {
                appointment_id,
                date,
                time,
                duration,
            } => {
                let req = BookingRequest {
                    date: &date,
                    time: &time,
                    duration_minutes: duration,
                    now: Some(now_ms()),
                };
                store
                    .reschedule_appointment(appointment_id, &req)
                    .await
                    .map_err(store_err)?;
                Ok(inserted(1))
            }
            Command::SelectSalons => {
                let salons = store.list_salons().await;
                let schema = Arc::new(salons_schema());
                let rows: Vec<PgWireResult<_>> = salons
                    .into_iter()
                    .map(|s| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&s.id.to_string())?;
                        encoder.encode_field(&s.name)?;
                        encoder.encode_field(&s.time_zone.name().to_string())?;
                        encoder.encode_field(&(s.capacity.get() as i32))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectBusinessHours { salon_id } => {
                let hours = store
                    .list_business_hours(salon_id)
                    .await
                    .map_err(store_err)?;
                let schema = Arc::new(business_hours_schema());
                let sid = salon_id.to_string();
                let rows: Vec<PgWireResult<_>> = hours
                    .into_iter()
                    .map(|h| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&sid)?;
                        encoder.encode_field(&h.weekday.as_str())?;
                        encoder.encode_field(&h.open_time())?;
                        encoder.encode_field(&h.close_time())?;
                        encoder.encode_field(&h.is_closed)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectClosures { salon_id } => {
                let closures = store.list_closures(salon_id).await.map_err(store_err)?;
                let schema = Arc::new(closures_schema());
                let sid = salon_id.to_string();
                let rows: Vec<PgWireResult<_>> = closures
                    .into_iter()
                    .map(|c| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&c.id.to_string())?;
                        encoder.encode_field(&sid)?;
                        encoder.encode_field(&c.start_date.to_string())?;
                        encoder.encode_field(&c.end_date.to_string())?;
                        encoder.encode_field(&c.reason)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectAppointments { salon_id } => {
                let appointments = store
                    .list_appointments(salon_id)
                    .await
                    .map_err(store_err)?;
                let schema = Arc::new(appointments_schema());
                let sid = salon_id.to_string();
                let rows: Vec<PgWireResult<_>> = appointments
                    .into_iter()
                    .map(|a| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&a.id.to_string())?;
                        encoder.encode_field(&sid)?;
                        encoder.encode_field(&a.span.start)?;
                        encoder.encode_field(&a.span.end)?;
                        encoder.encode_field(&a.status.as_str())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectAvailability {
                salon_id,
                date,
                duration,
            } => {
                let info = store.salon_info(salon_id).await.map_err(store_err)?;
                let slots = self
                    .engine
                    .available_time_slots(&SlotQuery {
                        salon_id,
                        date: &date,
                        duration_minutes: duration,
                        time_zone: info.time_zone,
                        now: Some(now_ms()),
                    })
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(availability_schema());
                let rows: Vec<PgWireResult<_>> = slots
                    .into_iter()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&slot.time)?;
                        encoder.encode_field(&slot.available)?;
                        encoder.encode_field(&slot.reason)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectSlotCheck {
                salon_id,
                date,
                time,
                duration,
                exclude_ids,
            } => {
                let info = store.salon_info(salon_id).await.map_err(store_err)?;
                let check = self
                    .engine
                    .check_time_slot(&SlotCheckQuery {
                        salon_id,
                        date: &date,
                        time: &time,
                        duration_minutes: duration,
                        time_zone: info.time_zone,
                        exclude_ids: &exclude_ids,
                        now: Some(now_ms()),
                    })
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(slot_check_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&check.available)?;
                encoder.encode_field(&check.reason)?;
                encoder.encode_field(&(check.capacity_info.used as i32))?;
                encoder.encode_field(&(check.capacity_info.total as i32))?;
                let rows: Vec<PgWireResult<_>> = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
        }
    }
}

// ── Result schemas ───────────────────────────────────────────────

fn text(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn typed(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![text("time"), typed("available", Type::BOOL), text("reason")]
}

fn slot_check_schema() -> Vec<FieldInfo> {
    vec![
        typed("available", Type::BOOL),
        text("reason"),
        typed("used", Type::INT4),
        typed("total", Type::INT4),
    ]
}

fn salons_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("name"),
        text("time_zone"),
        typed("capacity", Type::INT4),
    ]
}

fn business_hours_schema() -> Vec<FieldInfo> {
    vec![
        text("salon_id"),
        text("day_of_week"),
        text("open_time"),
        text("close_time"),
        typed("is_closed", Type::BOOL),
    ]
}

fn closures_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("salon_id"),
        text("start_date"),
        text("end_date"),
        text("reason"),
    ]
}

fn appointments_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("salon_id"),
        typed("start", Type::INT8),
        typed("end", Type::INT8),
        text("status"),
    ]
}

/// Table named after the first `FROM`, lowercased.
fn select_table(sql: &str) -> Option<String> {
    let lower = sql.to_lowercase();
    if !lower.trim_start().starts_with("select") {
        return None;
    }
    let mut words = lower.split_whitespace();
    words.find(|w| *w == "from")?;
    words
        .next()
        .map(|t| t.trim_end_matches(';').trim_matches('"').to_string())
}

/// Row description for a statement, empty for anything but a known SELECT.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    match select_table(sql).as_deref() {
        Some("availability") => availability_schema(),
        Some("slot_check") => slot_check_schema(),
        Some("salons") => salons_schema(),
        Some("business_hours") => business_hours_schema(),
        Some("closures") => closures_schema(),
        Some("appointments") => appointments_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for ChairtimeHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.run(cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ChairtimeQueryParser;

#[async_trait]
impl QueryParser for ChairtimeQueryParser {
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
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for ChairtimeHandler {
    type Statement = String;
    type QueryParser = ChairtimeQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.run(cmd).await?;
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
            result_schema(&target.statement),
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
        Ok(DescribePortalResponse::new(result_schema(
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
            if let Ok(n) = sql[start..i].parse::<usize>() {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Inline bound parameters as quoted text literals.
fn substitute_params(portal: &Portal<String>) -> String {
    let texts: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    inline_params(&portal.statement.statement, &texts)
}

/// One left-to-right pass over the statement text. Each `$N` outside a
/// string literal is read once and replaced, so inlined values are never
/// scanned again. Unknown indexes are left as written.
fn inline_params(sql: &str, params: &[Option<String>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.char_indices().peekable();
    let mut in_literal = false;
    while let Some((i, c)) = chars.next() {
        if c == '\'' {
            in_literal = !in_literal;
        }
        if c != '$' || in_literal {
            out.push(c);
            continue;
        }
        let digits_start = i + 1;
        let mut digits_end = digits_start;
        while let Some(&(j, d)) = chars.peek() {
            if !d.is_ascii_digit() {
                break;
            }
            digits_end = j + 1;
            chars.next();
        }
        let token = &sql[i..digits_end];
        let param = sql[digits_start..digits_end]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|idx| params.get(idx));
        match param {
            Some(Some(text)) => {
                out.push('\'');
                out.push_str(&text.replace('\'', "''"));
                out.push('\'');
            }
            Some(None) => out.push_str("NULL"),
            None => out.push_str(token),
        }
    }
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct ChairtimeFactory {
    handler: Arc<ChairtimeHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<ChairtimeAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl ChairtimeFactory {
    pub fn new(handler: Arc<ChairtimeHandler>, password: String) -> Self {
        let auth_source = ChairtimeAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler,
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ChairtimeFactory {
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

/// Serve one client until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    handler: Arc<ChairtimeHandler>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(ChairtimeFactory::new(handler, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Error mapping ────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn store_code(e: &StoreError) -> &'static str {
    match e {
        StoreError::Invalid(_) => "22023",
        StoreError::NotFound(_) => "P0002",
        StoreError::AlreadyExists(_) => "23505",
        StoreError::SlotUnavailable(_) => "23P01",
        StoreError::LimitExceeded(_) => "54000",
        StoreError::WalError(_) => "58030",
    }
}

fn engine_code(e: &EngineError) -> &'static str {
    match e {
        EngineError::Validation(_) => "22023",
        EngineError::Source(SourceError::SalonNotFound(_)) => "P0002",
        EngineError::Source(_) => "P0001",
    }
}

fn sql_code(e: &SqlError) -> &'static str {
    match e {
        SqlError::InvalidValue(_) => "22023",
        _ => "42601",
    }
}

fn store_err(e: StoreError) -> PgWireError {
    user_error(store_code(&e), e.to_string())
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(engine_code(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error(sql_code(&e), e.to_string())
}
