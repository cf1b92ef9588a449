//! Stage 1: pull order lines out of the source database into the raw extract.

use std::path::Path;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::Row;
use tracing::info;

use crate::artifacts;
use crate::db::DbPool;
use crate::error::Result;
use crate::model::{order_lines_to_frame, OrderLine};

pub const ORDER_LINES_QUERY: &str = r#"
    SELECT
        o.orderdate::date AS sale_date,
        od.productid::int8 AS product_id,
        p.productname::text AS product_name,
        od.quantity::int8 AS quantity,
        p.price::float8 AS unit_price
    FROM orders o
    JOIN order_details od ON o.orderid = od.orderid
    JOIN products p ON od.productid = p.productid
"#;

/// Anything that can hand back the joined order lines.
#[async_trait]
pub trait OrderSource: Send + Sync {
    fn describe(&self) -> String;
    async fn fetch_order_lines(&self) -> Result<Vec<OrderLine>>;
}

/// Reads from Postgres using [`ORDER_LINES_QUERY`].
#[derive(Debug, Clone)]
pub struct PgOrderSource {
    pool: DbPool,
}

impl PgOrderSource {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderSource for PgOrderSource {
    fn describe(&self) -> String {
        "postgres".to_string()
    }

    async fn fetch_order_lines(&self) -> Result<Vec<OrderLine>> {
        let rows = sqlx::query(ORDER_LINES_QUERY).fetch_all(&self.pool).await?;

        let mut lines = Vec::with_capacity(rows.len());
        for row in rows {
            let sale_date: NaiveDate = row.try_get("sale_date")?;
            let product_id: i64 = row.try_get("product_id")?;
            let product_name: String = row.try_get("product_name")?;
            let quantity: i64 = row.try_get("quantity")?;
            let unit_price: f64 = row.try_get("unit_price")?;
            lines.push(OrderLine {
                sale_date,
                product_id,
                product_name,
                quantity,
                unit_price,
            });
        }
        Ok(lines)
    }
}

/// Fixed rows, used for dry runs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticOrderSource {
    lines: Vec<OrderLine>,
}

impl StaticOrderSource {
    pub fn new(lines: Vec<OrderLine>) -> Self {
        Self { lines }
    }
}

#[async_trait]
impl OrderSource for StaticOrderSource {
    fn describe(&self) -> String {
        format!("static ({} rows)", self.lines.len())
    }

    async fn fetch_order_lines(&self) -> Result<Vec<OrderLine>> {
        Ok(self.lines.clone())
    }
}

/// Run the extract and overwrite the raw-extract artifact. Returns the row count.
pub async fn extract_order_lines(source: &dyn OrderSource, output: &Path) -> Result<usize> {
    info!(source = %source.describe(), "fetching order lines");
    let lines = source.fetch_order_lines().await?;

    let mut df = order_lines_to_frame(&lines)?;
    artifacts::write_table(output, &mut df)?;

    info!(rows = lines.len(), path = %output.display(), "raw extract written");
    Ok(lines.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::read_table;
    use crate::model::{order_line_schema, QUANTITY};

    fn line(quantity: i64, unit_price: f64) -> OrderLine {
        OrderLine {
            sale_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            product_id: 1,
            product_name: "Chai".to_string(),
            quantity,
            unit_price,
        }
    }

    #[tokio::test]
    async fn rows_are_written_as_fetched() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("raw").join("fetch_sales_data.csv");
        let source = StaticOrderSource::new(vec![line(3, 10.0), line(-1, 10.0), line(0, 0.0)]);

        let rows = extract_order_lines(&source, &output).await.unwrap();
        assert_eq!(rows, 3);

        let df = read_table(&output, order_line_schema()).unwrap();
        let quantities: Vec<i64> = df
            .column(QUANTITY)
            .unwrap()
            .i64()
            .unwrap()
            .into_iter()
            .flatten()
            .collect();
        assert_eq!(quantities, vec![3, -1, 0]);
    }
}
