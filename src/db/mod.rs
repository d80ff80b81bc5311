pub mod schema;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use rusqlite::types::Type;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::alerts::AlertEvent;
use crate::core::{Assessment, FactorMeasurement, RiskLevel, RuleScore};

/// Only alert type the engine produces.
pub const RISK_LEVEL_CHANGE: &str = "RISK_LEVEL_CHANGE";

/// One row of the risk level time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLevelRecord {
    pub id: i64,
    pub market_id: String,
    pub risk_level: RiskLevel,
    pub risk_score: f64,
    pub created_at: DateTime<Utc>,
}

/// Persisted factor breakdown of one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorRecord {
    pub id: i64,
    pub market_id: String,
    pub dex_score: f64,
    pub whale_score: f64,
    pub cex_score: f64,
    pub dex_volume_ratio: Option<f64>,
    pub dex_tx_count: Option<f64>,
    pub dex_liquidity: Option<f64>,
    pub whale_sell_volume: Option<f64>,
    pub whale_active_count: Option<f64>,
    pub whale_sell_ratio: Option<f64>,
    pub cex_total_inflow: Option<f64>,
    pub cex_total_outflow: Option<f64>,
    pub cex_net_inflow_ratio: Option<f64>,
    pub components: Vec<RuleScore>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: i64,
    pub event_id: u64,
    pub market_id: String,
    pub alert_type: String,
    pub severity: String,
    pub previous_level: RiskLevel,
    pub new_level: RiskLevel,
    pub risk_score: f64,
    pub message: String,
    pub delivered: bool,
    pub created_at: DateTime<Utc>,
}

pub struct Database {
    conn: Connection,
}

/// Thread-safe wrapper around Database.
#[derive(Clone)]
pub struct SharedDatabase {
    inner: Arc<Mutex<Database>>,
}

impl SharedDatabase {
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let db = Database::open(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(db)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Database> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store the level and the factor breakdown of one cycle.
    pub fn store_assessment(&self, assessment: &Assessment) -> Result<(), rusqlite::Error> {
        self.lock().store_assessment(assessment)
    }

    pub fn store_alert(&self, event: &AlertEvent, delivered: bool) -> Result<(), rusqlite::Error> {
        self.lock().store_alert(event, delivered)
    }

    /// Level history of one market from `since` onwards, oldest first.
    pub fn risk_history(
        &self,
        market_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RiskLevelRecord>, rusqlite::Error> {
        self.lock().risk_history(market_id, since)
    }

    pub fn latest_factors(&self, market_id: &str) -> Result<Option<FactorRecord>, rusqlite::Error> {
        self.lock().latest_factors(market_id)
    }

    /// Most recent alerts across all markets, newest first.
    pub fn recent_alerts(&self, limit: usize) -> Result<Vec<AlertRecord>, rusqlite::Error> {
        self.lock().recent_alerts(limit)
    }

    pub fn alert_count(&self) -> Result<usize, rusqlite::Error> {
        self.lock().alert_count()
    }

    /// Highest stored event id, 0 when no alert was ever stored.
    pub fn max_event_id(&self) -> Result<u64, rusqlite::Error> {
        self.lock().max_event_id()
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_level(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<RiskLevel> {
    let raw: u8 = row.get(idx)?;
    RiskLevel::try_from(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    pub fn store_assessment(&self, assessment: &Assessment) -> Result<(), rusqlite::Error> {
        let created_at = timestamp(assessment.assessed_at);
        let factors = &assessment.factors;
        let components: Vec<&RuleScore> = factors.iter().flat_map(|f| f.components.iter()).collect();
        let components_json = serde_json::to_string(&components)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

        let (mut dex, mut whale, mut cex) = (None, None, None);
        for measurement in factors.iter().filter_map(|f| f.measurement) {
            match measurement {
                FactorMeasurement::Dex(d) => dex = Some(d),
                FactorMeasurement::Whale(w) => whale = Some(w),
                FactorMeasurement::Cex(c) => cex = Some(c),
            }
        }

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO risk_levels (market_id, risk_level, risk_score, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                assessment.market_id,
                assessment.level.as_u8(),
                assessment.risk_score.value(),
                created_at
            ],
        )?;
        tx.execute(
            "INSERT INTO risk_factors (market_id, dex_score, whale_score, cex_score,
                dex_volume_ratio, dex_tx_count, dex_liquidity,
                whale_sell_volume, whale_active_count, whale_sell_ratio,
                cex_total_inflow, cex_total_outflow, cex_net_inflow_ratio,
                components, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            rusqlite::params![
                assessment.market_id,
                factors.dex.score,
                factors.whale.score,
                factors.cex.score,
                dex.map(|d| d.volume_ratio),
                dex.map(|d| d.tx_count),
                dex.map(|d| d.liquidity),
                whale.map(|w| w.sell_volume),
                whale.map(|w| w.active_count),
                whale.map(|w| w.sell_ratio),
                cex.map(|c| c.total_inflow),
                cex.map(|c| c.total_outflow),
                cex.map(|c| c.net_inflow_ratio),
                components_json,
                created_at
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Re-storing the same event id is a no-op. Ids are only unique across
    /// restarts when the state machine is seeded from `max_event_id`.
    pub fn store_alert(&self, event: &AlertEvent, delivered: bool) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "INSERT OR IGNORE INTO alerts (event_id, market_id, alert_type, severity, previous_level,
                new_level, risk_score, message, delivered, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                event.id as i64,
                event.market_id,
                RISK_LEVEL_CHANGE,
                event.new_level.severity(),
                event.previous_level.as_u8(),
                event.new_level.as_u8(),
                event.triggering_score.value(),
                event.message,
                delivered as i32,
                timestamp(event.timestamp)
            ],
        )?;
        Ok(())
    }

    pub fn risk_history(
        &self,
        market_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RiskLevelRecord>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT id, market_id, risk_level, risk_score, created_at
             FROM risk_levels WHERE market_id = ?1 AND created_at >= ?2 ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(rusqlite::params![market_id, timestamp(since)], |row| {
            Ok(RiskLevelRecord {
                id: row.get(0)?,
                market_id: row.get(1)?,
                risk_level: parse_level(row, 2)?,
                risk_score: row.get(3)?,
                created_at: parse_timestamp(row, 4)?,
            })
        })?;
        rows.collect()
    }

    pub fn latest_factors(&self, market_id: &str) -> Result<Option<FactorRecord>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT id, market_id, dex_score, whale_score, cex_score,
                dex_volume_ratio, dex_tx_count, dex_liquidity,
                whale_sell_volume, whale_active_count, whale_sell_ratio,
                cex_total_inflow, cex_total_outflow, cex_net_inflow_ratio,
                components, created_at
             FROM risk_factors WHERE market_id = ?1 ORDER BY created_at DESC, id DESC LIMIT 1",
        )?;
        let mut rows = stmt.query(rusqlite::params![market_id])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let components_json: Option<String> = row.get(14)?;
        let components = match components_json {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(14, Type::Text, Box::new(e)))?,
            None => Vec::new(),
        };
        Ok(Some(FactorRecord {
            id: row.get(0)?,
            market_id: row.get(1)?,
            dex_score: row.get(2)?,
            whale_score: row.get(3)?,
            cex_score: row.get(4)?,
            dex_volume_ratio: row.get(5)?,
            dex_tx_count: row.get(6)?,
            dex_liquidity: row.get(7)?,
            whale_sell_volume: row.get(8)?,
            whale_active_count: row.get(9)?,
            whale_sell_ratio: row.get(10)?,
            cex_total_inflow: row.get(11)?,
            cex_total_outflow: row.get(12)?,
            cex_net_inflow_ratio: row.get(13)?,
            components,
            created_at: parse_timestamp(row, 15)?,
        }))
    }

    fn row_to_alert(row: &rusqlite::Row) -> rusqlite::Result<AlertRecord> {
        let delivered: i32 = row.get(9)?;
        Ok(AlertRecord {
            id: row.get(0)?,
            event_id: row.get::<_, i64>(1)? as u64,
            market_id: row.get(2)?,
            alert_type: row.get(3)?,
            severity: row.get(4)?,
            previous_level: parse_level(row, 5)?,
            new_level: parse_level(row, 6)?,
            risk_score: row.get(7)?,
            message: row.get(8)?,
            delivered: delivered != 0,
            created_at: parse_timestamp(row, 10)?,
        })
    }

    pub fn recent_alerts(&self, limit: usize) -> Result<Vec<AlertRecord>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT id, event_id, market_id, alert_type, severity, previous_level, new_level,
                risk_score, message, delivered, created_at
             FROM alerts ORDER BY created_at DESC, event_id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(rusqlite::params![limit as i64], Self::row_to_alert)?;
        rows.collect()
    }

    pub fn alert_count(&self) -> Result<usize, rusqlite::Error> {
        self.conn.query_row("SELECT COUNT(*) FROM alerts", [], |row| {
            row.get::<_, i64>(0).map(|c| c as usize)
        })
    }

    pub fn max_event_id(&self) -> Result<u64, rusqlite::Error> {
        self.conn.query_row("SELECT COALESCE(MAX(event_id), 0) FROM alerts", [], |row| {
            row.get::<_, i64>(0).map(|id| id.max(0) as u64)
        })
    }
}
