use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use mysql_async::consts::ColumnType;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, OptsBuilder, Params, Pool, Row as MysqlRow, SslOpts, Value};
use rowscope_core::row_store::{Page, PageRequest, RowFilter, RowStore, StoreError};
use rowscope_core::settings::{ConnectionProfile, TlsMode};
use rowscope_core::sql_generator::{
    count_sql, delete_by_id_sql, insert_sql, sample_sql, select_page_sql, update_by_id_sql,
    SqlGenerationError, SqlStatement, SqlTarget,
};
use rowscope_core::value::{CellValue, Row, ID_COLUMN};

/// Row store over a MySQL connection pool. Every statement is prepared with
/// bound parameters.
#[derive(Debug, Clone)]
pub struct MysqlRowStore {
    pool: Pool,
    database: Option<String>,
}

impl MysqlRowStore {
    #[must_use]
    pub fn from_profile(profile: &ConnectionProfile) -> Self {
        Self {
            pool: Pool::new(opts_from_profile(profile)),
            database: profile.database.clone(),
        }
    }

    pub async fn disconnect(&self) -> Result<(), StoreError> {
        self.pool.clone().disconnect().await.map_err(to_store_error)
    }

    pub async fn list_tables(&self) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn().await?;
        conn.query::<String, _>("SHOW TABLES")
            .await
            .map_err(to_store_error)
    }

    async fn conn(&self) -> Result<Conn, StoreError> {
        self.pool.get_conn().await.map_err(to_store_error)
    }

    fn target<'a>(&'a self, table: &'a str) -> Result<SqlTarget<'a>, StoreError> {
        SqlTarget::new(self.database.as_deref(), table).map_err(to_generation_error)
    }

    async fn fetch_count(&self, conn: &mut Conn, statement: SqlStatement) -> Result<u64, StoreError> {
        tracing::debug!(sql = %statement.sql, "count");
        let count = conn
            .exec_first::<u64, _, _>(statement.sql, bind(statement.params))
            .await
            .map_err(to_store_error)?;
        Ok(count.unwrap_or(0))
    }

    async fn fetch_rows(&self, conn: &mut Conn, statement: SqlStatement) -> Result<Vec<Row>, StoreError> {
        tracing::debug!(sql = %statement.sql, "select");
        let rows = conn
            .exec::<MysqlRow, _, _>(statement.sql, bind(statement.params))
            .await
            .map_err(to_store_error)?;
        Ok(rows.into_iter().map(mysql_row_to_row).collect())
    }

    async fn execute(&self, statement: SqlStatement) -> Result<(), StoreError> {
        tracing::debug!(sql = %statement.sql, "execute");
        let mut conn = self.conn().await?;
        conn.exec_drop(statement.sql, bind(statement.params))
            .await
            .map_err(to_store_error)
    }
}

#[async_trait]
impl RowStore for MysqlRowStore {
    async fn count(&self, table: &str, filter: &RowFilter) -> Result<u64, StoreError> {
        let statement = count_sql(&self.target(table)?, filter, None).map_err(to_generation_error)?;
        let mut conn = self.conn().await?;
        self.fetch_count(&mut conn, statement).await
    }

    async fn select_page(&self, table: &str, request: &PageRequest) -> Result<Page, StoreError> {
        let target = self.target(table)?;
        let count = count_sql(&target, &request.filter, request.search.as_ref())
            .map_err(to_generation_error)?;
        let select = select_page_sql(&target, request).map_err(to_generation_error)?;

        let mut conn = self.conn().await?;
        let total_count = self.fetch_count(&mut conn, count).await?;
        let rows = self.fetch_rows(&mut conn, select).await?;
        Ok(Page { rows, total_count })
    }

    async fn sample_rows(&self, table: &str, limit: usize) -> Result<Vec<Row>, StoreError> {
        let statement = sample_sql(&self.target(table)?, limit);
        let mut conn = self.conn().await?;
        self.fetch_rows(&mut conn, statement).await
    }

    async fn update(&self, table: &str, id: &CellValue, patch: &Row) -> Result<(), StoreError> {
        let statement = update_by_id_sql(&self.target(table)?, ID_COLUMN, id, patch)
            .map_err(to_generation_error)?;
        self.execute(statement).await
    }

    async fn insert(&self, table: &str, row: &Row) -> Result<(), StoreError> {
        let statement = insert_sql(&self.target(table)?, row).map_err(to_generation_error)?;
        self.execute(statement).await
    }

    async fn delete(&self, table: &str, id: &CellValue) -> Result<(), StoreError> {
        let statement =
            delete_by_id_sql(&self.target(table)?, ID_COLUMN, id).map_err(to_generation_error)?;
        self.execute(statement).await
    }
}

fn opts_from_profile(profile: &ConnectionProfile) -> OptsBuilder {
    let mut builder = OptsBuilder::default()
        .ip_or_hostname(profile.host.clone())
        .tcp_port(profile.port)
        .user(Some(profile.user.clone()));

    if let Some(password) = profile.password() {
        builder = builder.pass(Some(password));
    }

    if let Some(database) = &profile.database {
        builder = builder.db_name(Some(database.clone()));
    }

    if let Some(ssl_opts) = ssl_opts_from_profile(profile) {
        builder = builder.ssl_opts(ssl_opts);
    }

    if matches!(profile.tls_mode, TlsMode::Disabled) {
        builder = builder.prefer_socket(false);
    }

    builder
}

fn ssl_opts_from_profile(profile: &ConnectionProfile) -> Option<SslOpts> {
    matches!(profile.tls_mode, TlsMode::Require).then(SslOpts::default)
}

fn bind(params: Vec<CellValue>) -> Params {
    if params.is_empty() {
        Params::Empty
    } else {
        Params::Positional(params.into_iter().map(cell_to_mysql_value).collect())
    }
}

fn cell_to_mysql_value(value: CellValue) -> Value {
    match value {
        CellValue::Null => Value::NULL,
        CellValue::Bool(flag) => Value::Int(i64::from(flag)),
        CellValue::Number(number) => {
            if let Some(int) = number.as_i64() {
                Value::Int(int)
            } else if let Some(uint) = number.as_u64() {
                Value::UInt(uint)
            } else {
                Value::Double(number.as_f64().unwrap_or_default())
            }
        }
        CellValue::Text(text) => Value::Bytes(text.into_bytes()),
        other @ (CellValue::Json(_) | CellValue::Array(_)) => {
            Value::Bytes(serde_json::Value::from(other).to_string().into_bytes())
        }
    }
}

fn mysql_row_to_row(row: MysqlRow) -> Row {
    let columns = row
        .columns_ref()
        .iter()
        .map(|column| (column.name_str().into_owned(), column.column_type()))
        .collect::<Vec<_>>();

    columns
        .into_iter()
        .zip(row.unwrap())
        .map(|((name, column_type), value)| (name, mysql_value_to_cell(value, column_type)))
        .collect()
}

fn mysql_value_to_cell(value: Value, column_type: ColumnType) -> CellValue {
    match value {
        Value::NULL => CellValue::Null,
        Value::Int(value) => CellValue::from(value),
        Value::UInt(value) => CellValue::from(value),
        Value::Float(value) => CellValue::from(f64::from(value)),
        Value::Double(value) => CellValue::from(value),
        Value::Bytes(bytes) => bytes_to_cell(&bytes, column_type),
        Value::Date(year, month, day, hour, minute, second, micros) => CellValue::Text(
            format_date(year, month, day, hour, minute, second, micros, column_type),
        ),
        Value::Time(is_negative, days, hours, minutes, seconds, micros) => {
            let sign = if is_negative { "-" } else { "" };
            let hours = days * 24 + u32::from(hours);
            let fraction = if micros == 0 {
                String::new()
            } else {
                format!(".{micros:06}")
            };
            CellValue::Text(format!("{sign}{hours:02}:{minutes:02}:{seconds:02}{fraction}"))
        }
    }
}

fn bytes_to_cell(bytes: &[u8], column_type: ColumnType) -> CellValue {
    let text = String::from_utf8_lossy(bytes);
    match column_type {
        ColumnType::MYSQL_TYPE_JSON => serde_json::from_str::<serde_json::Value>(&text)
            .map_or_else(|_| CellValue::Text(text.into_owned()), CellValue::from),
        ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => text
            .parse::<serde_json::Number>()
            .map_or_else(|_| CellValue::Text(text.into_owned()), CellValue::Number),
        _ => CellValue::Text(text.into_owned()),
    }
}

// Dates become ISO-8601 text so the type classifier recognizes them.
#[allow(clippy::too_many_arguments)]
fn format_date(
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    second: u8,
    micros: u32,
    column_type: ColumnType,
) -> String {
    let Some(date) = NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day))
    else {
        return format!("{year:04}-{month:02}-{day:02}");
    };
    if column_type == ColumnType::MYSQL_TYPE_DATE {
        return date.format("%Y-%m-%d").to_string();
    }
    date.and_hms_micro_opt(
        u32::from(hour),
        u32::from(minute),
        u32::from(second),
        micros,
    )
    .map_or_else(
        || date.format("%Y-%m-%d").to_string(),
        |datetime: NaiveDateTime| datetime.format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
    )
}

fn to_store_error(error: mysql_async::Error) -> StoreError {
    match error {
        mysql_async::Error::Server(server) => {
            StoreError::with_code(server.code.to_string(), server.message)
        }
        other => StoreError::new(other.to_string()),
    }
}

fn to_generation_error(error: SqlGenerationError) -> StoreError {
    StoreError::new(error.to_string())
}
