//! Local PostgreSQL mirror of signals, orders, executions, and P&L (§4.7).
use crate::errors::GatewayError;
use crate::gateway::ExchangeGateway;
use crate::model::{ClosedPnl, ConditionalOrder, Execution, Order, Signal};
use chrono::{DateTime, Local, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub struct PersistenceSync {
    pool: PgPool,
}

impl PersistenceSync {
    pub async fn connect(connection_string: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(connection_string)
            .await?;
        Ok(PersistenceSync { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS trade_signals (
                order_link_id TEXT PRIMARY KEY,
                pair TEXT NOT NULL,
                interval TEXT NOT NULL,
                side TEXT NOT NULL,
                entry_price NUMERIC NOT NULL,
                strategy_name TEXT NOT NULL,
                indicator_values TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS orders (
                order_id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                order_status TEXT NOT NULL,
                qty NUMERIC NOT NULL,
                price NUMERIC NOT NULL,
                cum_exec_qty NUMERIC NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS conditional_orders (
                stop_order_id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                order_status TEXT NOT NULL,
                qty NUMERIC NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS user_trades (
                exec_id TEXT PRIMARY KEY,
                order_id TEXT NOT NULL,
                side TEXT NOT NULL,
                price NUMERIC NOT NULL,
                exec_qty NUMERIC NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS closed_pnl (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                qty NUMERIC NOT NULL,
                closed_pnl NUMERIC NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_signal(&self, signal: &Signal) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO trade_signals (order_link_id, pair, interval, side, entry_price, strategy_name, indicator_values, created_at)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8) ON CONFLICT (order_link_id) DO NOTHING",
        )
        .bind(&signal.order_link_id)
        .bind(&signal.pair)
        .bind(&signal.interval)
        .bind(signal.side.to_string())
        .bind(signal.entry_price)
        .bind(&signal.strategy_name)
        .bind(&signal.indicator_values)
        .bind(to_local(signal.timestamp))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// §4.7: Orders are delete-and-replace for non-terminal status, then
    /// idempotent insert on primary key.
    pub async fn upsert_order(&self, order: &Order) -> Result<(), GatewayError> {
        self.upsert_order_inner(order)
            .await
            .map_err(|e| GatewayError::Fatal(e.to_string()))
    }

    async fn upsert_order_inner(&self, order: &Order) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM orders WHERE order_id = $1 AND order_status NOT IN ('Filled','Cancelled')")
            .bind(&order.order_id)
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "INSERT INTO orders (order_id, symbol, side, order_status, qty, price, cum_exec_qty, created_at, updated_at)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9) ON CONFLICT (order_id) DO NOTHING",
        )
        .bind(&order.order_id)
        .bind(&order.symbol)
        .bind(order.side.to_string())
        .bind(format!("{:?}", order.order_status))
        .bind(order.qty)
        .bind(order.price)
        .bind(order.cum_exec_qty)
        .bind(millis_to_local(order.created_time))
        .bind(millis_to_local(order.updated_time))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_conditional_order(&self, order: &ConditionalOrder) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM conditional_orders WHERE stop_order_id = $1 AND order_status NOT IN ('Filled','Cancelled')")
            .bind(&order.stop_order_id)
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "INSERT INTO conditional_orders (stop_order_id, symbol, side, order_status, qty, created_at, updated_at)
             VALUES ($1,$2,$3,$4,$5,$6,$7) ON CONFLICT (stop_order_id) DO NOTHING",
        )
        .bind(&order.stop_order_id)
        .bind(&order.symbol)
        .bind(order.side.to_string())
        .bind(format!("{:?}", order.order_status))
        .bind(order.qty)
        .bind(millis_to_local(order.created_time))
        .bind(millis_to_local(order.updated_time))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Append-only: skip existing primary keys (§4.7).
    pub async fn insert_execution(&self, execution: &Execution) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO user_trades (exec_id, order_id, side, price, exec_qty, created_at)
             VALUES ($1,$2,$3,$4,$5,$6) ON CONFLICT (exec_id) DO NOTHING",
        )
        .bind(&execution.exec_id)
        .bind(&execution.order_id)
        .bind(execution.side.to_string())
        .bind(execution.price)
        .bind(execution.exec_qty)
        .bind(millis_to_local(execution.trade_time_ms))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_closed_pnl(&self, pnl: &ClosedPnl) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO closed_pnl (id, symbol, side, qty, closed_pnl, created_at)
             VALUES ($1,$2,$3,$4,$5,$6) ON CONFLICT (id) DO NOTHING",
        )
        .bind(&pnl.id)
        .bind(&pnl.symbol)
        .bind(pnl.side.to_string())
        .bind(pnl.qty)
        .bind(pnl.closed_pnl)
        .bind(millis_to_local(pnl.created_time))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Pulls full venue history for the pair and merges it table by table
    /// (§4.7). Called on interrupt (§5) and periodically from `BotLoop`.
    pub async fn sync_all(&self, gateway: &ExchangeGateway) -> Result<(), GatewayError> {
        let now = crate::util::epoch_millis() as i64;
        let day_ago = now - 24 * 60 * 60 * 1000;

        for order in gateway.order_history().await? {
            self.upsert_order(&order).await?;
        }
        for conditional in gateway.conditional_order_history().await? {
            self.upsert_conditional_order(&conditional)
                .await
                .map_err(|e| GatewayError::Fatal(e.to_string()))?;
        }
        for execution in gateway.user_trade_records().await? {
            self.insert_execution(&execution)
                .await
                .map_err(|e| GatewayError::Fatal(e.to_string()))?;
        }
        for pnl in gateway.closed_profit_and_loss(day_ago, now).await? {
            self.insert_closed_pnl(&pnl)
                .await
                .map_err(|e| GatewayError::Fatal(e.to_string()))?;
        }
        Ok(())
    }

    /// Counts non-terminal rows left in `orders` after a sync — used by
    /// tests exercising R2.
    pub async fn count_stale_non_terminal_orders(&self) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM orders WHERE order_status NOT IN ('Filled','Cancelled')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }
}

fn to_local(ts: DateTime<Utc>) -> DateTime<Local> {
    ts.with_timezone(&Local)
}

fn millis_to_local(ms: i64) -> DateTime<Local> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).unwrap())
        .with_timezone(&Local)
}
