use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
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
use pgwire::messages::data::DataRow;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::TutorHubAuthSource;
use crate::model::*;
use crate::observability::{QUERIES_TOTAL, QUERY_DURATION_SECONDS, command_label};
use crate::scheduler::{Scheduler, SchedulerError};
use crate::sql::{self, Command, ResultShape};
use crate::tenant::TenantManager;

pub struct TutorHubHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<TutorHubQueryParser>,
    conference_host: String,
}

impl TutorHubHandler {
    pub fn new(tenant_manager: Arc<TenantManager>, conference_host: String) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(TutorHubQueryParser),
            conference_host,
        }
    }

    fn resolve_scheduler<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Scheduler>> {
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

    /// Parse, execute and record RED metrics for one statement.
    async fn run<C: ClientInfo>(&self, client: &C, query: &str) -> PgWireResult<Response> {
        let scheduler = self.resolve_scheduler(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = command_label(&cmd);
        let start = Instant::now();
        let result = self.execute_command(&scheduler, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, scheduler: &Scheduler, cmd: Command) -> PgWireResult<Response> {
        match cmd {
            Command::PublishSlot {
                mentor,
                request,
                returning,
            } => {
                let slot = scheduler
                    .publish(&mentor, request)
                    .await
                    .map_err(scheduler_err)?;
                if returning {
                    self.slot_rows(vec![slot])
                } else {
                    Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
                }
            }
            Command::BookSlot {
                slot_id,
                student,
                returning,
            } => {
                let booking = scheduler
                    .book(&student, slot_id)
                    .await
                    .map_err(scheduler_err)?;
                if returning {
                    self.booking_rows(scheduler, vec![booking])
                } else {
                    Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
                }
            }
            Command::CancelBooking {
                booking_id,
                student_id,
                returning,
            } => {
                // Ownership is checked against the booking; the name and
                // email are not needed to cancel.
                let student = Caller::student(student_id, "", "");
                let booking = scheduler
                    .cancel(&student, booking_id)
                    .await
                    .map_err(scheduler_err)?;
                if returning {
                    self.booking_rows(scheduler, vec![booking])
                } else {
                    Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
                }
            }
            Command::SelectAvailable { subject, date } => {
                let slots = scheduler
                    .find_available(&subject, date.as_deref())
                    .await
                    .map_err(scheduler_err)?;
                self.slot_rows(slots)
            }
            Command::SelectMentorSlots { mentor_id } => {
                let slots = scheduler
                    .find_by_owner(&mentor_id)
                    .await
                    .map_err(scheduler_err)?;
                self.slot_rows(slots)
            }
            Command::SelectStudentBookings { student_id } => {
                let bookings = scheduler
                    .list_by_student(&student_id)
                    .await
                    .map_err(scheduler_err)?;
                self.booking_rows(scheduler, bookings)
            }
            Command::SelectStudentSummary { student_id } => {
                let summary = scheduler
                    .student_summary(&student_id)
                    .await
                    .map_err(scheduler_err)?;
                let schema = Arc::new(summary_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&student_id)?;
                encoder.encode_field(&count(summary.total))?;
                encoder.encode_field(&count(summary.confirmed))?;
                encoder.encode_field(&count(summary.completed))?;
                encoder.encode_field(&count(summary.live_now))?;
                let rows: Vec<PgWireResult<DataRow>> = vec![Ok(encoder.take_row())];
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
        }
    }

    fn slot_rows(&self, slots: Vec<Slot>) -> PgWireResult<Response> {
        let schema = Arc::new(slot_schema());
        let rows: Vec<PgWireResult<DataRow>> = slots
            .iter()
            .map(|slot| {
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&slot.id.to_string())?;
                encoder.encode_field(&slot.mentor_id)?;
                encoder.encode_field(&slot.mentor_name)?;
                encoder.encode_field(&slot.mentor_email)?;
                encoder.encode_field(&slot.subject)?;
                encoder.encode_field(&slot.date.to_string())?;
                encoder.encode_field(&slot.time_slot.to_string())?;
                encoder.encode_field(&int4(slot.max_occupants))?;
                encoder.encode_field(&int4(slot.current_occupants))?;
                encoder.encode_field(&slot.is_available)?;
                encoder.encode_field(&slot.room_id.to_string())?;
                encoder.encode_field(&slot.room_id.join_url(&self.conference_host))?;
                encoder.encode_field(&slot.description)?;
                encoder.encode_field(&slot.created_at)?;
                Ok(encoder.take_row())
            })
            .collect();
        Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
    }

    fn booking_rows(
        &self,
        scheduler: &Scheduler,
        bookings: Vec<Booking>,
    ) -> PgWireResult<Response> {
        let schema = Arc::new(booking_schema());
        let now = scheduler.clock().local_now();
        let rows: Vec<PgWireResult<DataRow>> = bookings
            .iter()
            .map(|b| {
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&b.id.to_string())?;
                encoder.encode_field(&b.slot_id.to_string())?;
                encoder.encode_field(&b.student_id)?;
                encoder.encode_field(&b.student_name)?;
                encoder.encode_field(&b.student_email)?;
                encoder.encode_field(&b.mentor_id)?;
                encoder.encode_field(&b.subject)?;
                encoder.encode_field(&b.date.to_string())?;
                encoder.encode_field(&b.time_slot.to_string())?;
                encoder.encode_field(&b.room_id.to_string())?;
                encoder.encode_field(&b.room_id.join_url(&self.conference_host))?;
                encoder.encode_field(&b.status.to_string())?;
                encoder.encode_field(&b.phase_at(now).as_str().to_string())?;
                encoder.encode_field(&b.created_at)?;
                Ok(encoder.take_row())
            })
            .collect();
        Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
    }
}

fn int4(n: u32) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

fn count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn typed_field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn slot_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("mentor_id"),
        text_field("mentor_name"),
        text_field("mentor_email"),
        text_field("subject"),
        text_field("date"),
        text_field("time_slot"),
        typed_field("max_occupants", Type::INT4),
        typed_field("current_occupants", Type::INT4),
        typed_field("is_available", Type::BOOL),
        text_field("room_id"),
        text_field("join_url"),
        text_field("description"),
        typed_field("created_at", Type::INT8),
    ]
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("slot_id"),
        text_field("student_id"),
        text_field("student_name"),
        text_field("student_email"),
        text_field("mentor_id"),
        text_field("subject"),
        text_field("date"),
        text_field("time_slot"),
        text_field("room_id"),
        text_field("join_url"),
        text_field("status"),
        text_field("phase"),
        typed_field("created_at", Type::INT8),
    ]
}

fn summary_schema() -> Vec<FieldInfo> {
    vec![
        text_field("student_id"),
        typed_field("total", Type::INT8),
        typed_field("confirmed", Type::INT8),
        typed_field("completed", Type::INT8),
        typed_field("live_now", Type::INT8),
    ]
}

fn schema_for(sql: &str) -> Vec<FieldInfo> {
    match sql::result_shape(sql) {
        Some(ResultShape::Slots) => slot_schema(),
        Some(ResultShape::Bookings) => booking_schema(),
        Some(ResultShape::Summary) => summary_schema(),
        None => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for TutorHubHandler {
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
        Ok(vec![self.run(client, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct TutorHubQueryParser;

#[async_trait]
impl QueryParser for TutorHubQueryParser {
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
        Ok(schema_for(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for TutorHubHandler {
    type Statement = String;
    type QueryParser = TutorHubQueryParser;

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
        let sql = substitute_params(portal);
        self.run(client, &sql).await
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
            schema_for(&target.statement),
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
        Ok(DescribePortalResponse::new(schema_for(
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
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
/// Highest index first so `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
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

pub struct TutorHubFactory {
    handler: Arc<TutorHubHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<TutorHubAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl TutorHubFactory {
    pub fn new(
        tenant_manager: Arc<TenantManager>,
        password: String,
        conference_host: String,
    ) -> Self {
        let auth_source = TutorHubAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(TutorHubHandler::new(tenant_manager, conference_host)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for TutorHubFactory {
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

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    factory: Arc<TutorHubFactory>,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn scheduler_err(e: SchedulerError) -> PgWireError {
    if e.is_retryable() {
        tracing::warn!(sqlstate = e.sqlstate(), "request failed: {e}");
    } else {
        tracing::debug!(sqlstate = e.sqlstate(), "request rejected: {e}");
    }
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        e.sqlstate().into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
