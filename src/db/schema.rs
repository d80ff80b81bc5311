use rusqlite::Connection;

pub fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS risk_levels (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            market_id   TEXT NOT NULL,
            risk_level  INTEGER NOT NULL,
            risk_score  REAL NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS risk_factors (
            id                    INTEGER PRIMARY KEY AUTOINCREMENT,
            market_id             TEXT NOT NULL,
            dex_score             REAL NOT NULL,
            whale_score           REAL NOT NULL,
            cex_score             REAL NOT NULL,
            dex_volume_ratio      REAL,
            dex_tx_count          REAL,
            dex_liquidity         REAL,
            whale_sell_volume     REAL,
            whale_active_count    REAL,
            whale_sell_ratio      REAL,
            cex_total_inflow      REAL,
            cex_total_outflow     REAL,
            cex_net_inflow_ratio  REAL,
            components            TEXT, -- JSON
            created_at            TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS alerts (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id        INTEGER NOT NULL UNIQUE,
            market_id       TEXT NOT NULL,
            alert_type      TEXT NOT NULL,
            severity        TEXT NOT NULL,
            previous_level  INTEGER NOT NULL,
            new_level       INTEGER NOT NULL,
            risk_score      REAL NOT NULL,
            message         TEXT NOT NULL,
            delivered       INTEGER NOT NULL DEFAULT 0, -- accepted by every sink
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_risk_levels_market ON risk_levels(market_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_risk_factors_market ON risk_factors(market_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_alerts_created ON alerts(created_at DESC);
        ",
    )?;
    Ok(())
}
