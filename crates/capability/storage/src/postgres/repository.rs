//! Postgres 轮询仓储实现

use crate::error::StorageError;
use crate::traits::PollingRepository;
use domain::{ByteOrder, DataPoint, DataType, FunctionCode, Gateway, Reading};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

const GATEWAY_COLUMNS: &str = "gateway_id, name, host, port, unit_id, poll_interval_seconds, \
     is_active, last_seen_at_ms, success_count, failure_count";

pub struct PgPollingRepository {
    pub pool: PgPool,
}

impl PgPollingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 通过数据库 URL 建立连接池
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = crate::connection::connect_pool(database_url).await?;
        Ok(Self { pool })
    }
}

fn out_of_range(column: &str, value: impl std::fmt::Display) -> StorageError {
    StorageError::new(format!("column {} out of range: {}", column, value))
}

fn gateway_from_row(row: &PgRow) -> Result<Gateway, StorageError> {
    let port: i32 = row.try_get("port")?;
    let unit_id: i16 = row.try_get("unit_id")?;
    let poll_interval_seconds: i32 = row.try_get("poll_interval_seconds")?;
    let success_count: i64 = row.try_get("success_count")?;
    let failure_count: i64 = row.try_get("failure_count")?;
    Ok(Gateway {
        gateway_id: row.try_get("gateway_id")?,
        name: row.try_get("name")?,
        host: row.try_get("host")?,
        port: u16::try_from(port).map_err(|_| out_of_range("port", port))?,
        unit_id: u8::try_from(unit_id).map_err(|_| out_of_range("unit_id", unit_id))?,
        poll_interval_seconds: u32::try_from(poll_interval_seconds)
            .map_err(|_| out_of_range("poll_interval_seconds", poll_interval_seconds))?,
        is_active: row.try_get("is_active")?,
        last_seen_at_ms: row.try_get("last_seen_at_ms")?,
        success_count: u64::try_from(success_count)
            .map_err(|_| out_of_range("success_count", success_count))?,
        failure_count: u64::try_from(failure_count)
            .map_err(|_| out_of_range("failure_count", failure_count))?,
    })
}

fn data_point_from_row(row: &PgRow) -> Result<DataPoint, StorageError> {
    let function_code: i16 = row.try_get("function_code")?;
    let register_address: i32 = row.try_get("register_address")?;
    let register_count: i32 = row.try_get("register_count")?;
    let data_type: String = row.try_get("data_type")?;
    let byte_order: String = row.try_get("byte_order")?;
    let function_code = u8::try_from(function_code)
        .map_err(|_| out_of_range("function_code", function_code))?;
    Ok(DataPoint {
        point_id: row.try_get("point_id")?,
        gateway_id: row.try_get("gateway_id")?,
        function_code: FunctionCode::try_from(function_code)?,
        register_address: u16::try_from(register_address)
            .map_err(|_| out_of_range("register_address", register_address))?,
        register_count: u16::try_from(register_count)
            .map_err(|_| out_of_range("register_count", register_count))?,
        data_type: data_type.parse::<DataType>()?,
        byte_order: byte_order.parse::<ByteOrder>()?,
        scale_factor: row.try_get("scale_factor")?,
        enabled: row.try_get("enabled")?,
        label: row.try_get("label")?,
        group: row.try_get("group_name")?,
    })
}

#[async_trait::async_trait]
impl PollingRepository for PgPollingRepository {
    async fn get_gateway(&self, gateway_id: &str) -> Result<Option<Gateway>, StorageError> {
        let sql = format!("select {} from gateways where gateway_id = $1", GATEWAY_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(gateway_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(gateway_from_row).transpose()
    }

    async fn get_active_gateways(&self) -> Result<Vec<Gateway>, StorageError> {
        let sql = format!(
            "select {} from gateways where is_active = true order by gateway_id",
            GATEWAY_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(gateway_from_row).collect()
    }

    async fn list_gateways(&self) -> Result<Vec<Gateway>, StorageError> {
        let sql = format!("select {} from gateways order by gateway_id", GATEWAY_COLUMNS);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(gateway_from_row).collect()
    }

    async fn get_enabled_data_points(
        &self,
        gateway_id: &str,
    ) -> Result<Vec<DataPoint>, StorageError> {
        let rows = sqlx::query(
            "select point_id, gateway_id, function_code, register_address, register_count, \
             data_type, byte_order, scale_factor, enabled, label, group_name \
             from data_points where gateway_id = $1 and enabled = true order by point_id",
        )
        .bind(gateway_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(data_point_from_row).collect()
    }

    async fn insert_reading(&self, reading: &Reading) -> Result<(), StorageError> {
        let raw_words: Option<Vec<i32>> = reading
            .raw_words
            .as_ref()
            .map(|words| words.iter().map(|w| i32::from(*w)).collect());
        sqlx::query(
            "insert into readings \
             (reading_id, point_id, gateway_id, raw_words, scaled_value, quality, ts_ms) \
             values ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&reading.reading_id)
        .bind(&reading.point_id)
        .bind(&reading.gateway_id)
        .bind(raw_words)
        .bind(reading.scaled_value)
        .bind(reading.quality.as_str())
        .bind(reading.ts_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn increment_gateway_success(&self, gateway_id: &str) -> Result<(), StorageError> {
        sqlx::query("update gateways set success_count = success_count + 1 where gateway_id = $1")
            .bind(gateway_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn increment_gateway_failure(&self, gateway_id: &str) -> Result<(), StorageError> {
        sqlx::query("update gateways set failure_count = failure_count + 1 where gateway_id = $1")
            .bind(gateway_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_gateway_active(
        &self,
        gateway_id: &str,
        is_active: bool,
    ) -> Result<Option<bool>, StorageError> {
        let row = sqlx::query(
            "with previous as ( \
                 select gateway_id, is_active from gateways where gateway_id = $1 for update \
             ) \
             update gateways g set is_active = $2 \
             from previous p where g.gateway_id = p.gateway_id \
             returning p.is_active as previous_active",
        )
        .bind(gateway_id)
        .bind(is_active)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(row.try_get("previous_active")?)),
            None => Ok(None),
        }
    }

    async fn update_gateway_last_seen(
        &self,
        gateway_id: &str,
        ts_ms: i64,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "update gateways set last_seen_at_ms = greatest(coalesce(last_seen_at_ms, 0), $2) \
             where gateway_id = $1",
        )
        .bind(gateway_id)
        .bind(ts_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn last_reading_at_ms(&self, gateway_id: &str) -> Result<Option<i64>, StorageError> {
        let row = sqlx::query("select max(ts_ms) as last_ts from readings where gateway_id = $1")
            .bind(gateway_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("last_ts")?)
    }

    async fn delete_gateway(&self, gateway_id: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("delete from gateways where gateway_id = $1")
            .bind(gateway_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
