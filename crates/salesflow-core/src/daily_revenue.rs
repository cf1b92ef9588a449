//! Stage 2: revenue summed per sale date.

use std::path::Path;

use polars::prelude::*;
use tracing::info;

use crate::artifacts;
use crate::error::Result;
use crate::model::{order_line_schema, revenue_expr, SALE_DATE, TOTAL_REVENUE};

/// One row per distinct `sale_date`, ascending by date.
pub fn daily_revenue(order_lines: &DataFrame) -> PolarsResult<DataFrame> {
    order_lines
        .clone()
        .lazy()
        .with_column(revenue_expr())
        .group_by([col(SALE_DATE)])
        .agg([col(TOTAL_REVENUE).sum()])
        .sort([SALE_DATE], SortMultipleOptions::default())
        .collect()
}

/// Read the raw extract, aggregate, and overwrite the daily revenue artifact.
pub fn process_daily_revenue(raw_extract: &Path, output: &Path) -> Result<usize> {
    let order_lines = artifacts::read_table(raw_extract, order_line_schema())?;
    let mut daily = daily_revenue(&order_lines)?;
    artifacts::write_table(output, &mut daily)?;

    info!(days = daily.height(), path = %output.display(), "daily revenue written");
    Ok(daily.height())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(dates: &[&str], quantities: &[i64], prices: &[f64]) -> DataFrame {
        let names: Vec<String> = (0..dates.len()).map(|i| format!("P{i}")).collect();
        let ids: Vec<i64> = (0..dates.len() as i64).collect();
        DataFrame::new(vec![
            Series::new(SALE_DATE.into(), dates.to_vec()).into(),
            Series::new("product_id".into(), ids).into(),
            Series::new("product_name".into(), names).into(),
            Series::new("quantity".into(), quantities.to_vec()).into(),
            Series::new("unit_price".into(), prices.to_vec()).into(),
        ])
        .unwrap()
    }

    #[test]
    fn sums_quantity_times_price_per_day() {
        let df = extract(&["2024-01-01", "2024-01-01"], &[2, 1], &[10.0, 5.0]);
        let daily = daily_revenue(&df).unwrap();

        assert_eq!(daily.height(), 1);
        let revenue = daily.column(TOTAL_REVENUE).unwrap().f64().unwrap();
        assert_eq!(revenue.get(0), Some(25.0));
    }

    #[test]
    fn output_is_sorted_ascending_by_date() {
        let df = extract(
            &["2024-01-03", "2024-01-01", "2024-01-02", "2024-01-01"],
            &[1, 1, 1, 1],
            &[3.0, 1.0, 2.0, 1.0],
        );
        let daily = daily_revenue(&df).unwrap();

        let dates: Vec<Option<&str>> = daily
            .column(SALE_DATE)
            .unwrap()
            .str()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(
            dates,
            vec![Some("2024-01-01"), Some("2024-01-02"), Some("2024-01-03")]
        );

        let revenue = daily.column(TOTAL_REVENUE).unwrap().f64().unwrap();
        assert_eq!(revenue.get(0), Some(2.0));
    }

    #[test]
    fn empty_extract_gives_empty_output() {
        let df = extract(&[], &[], &[]);
        let daily = daily_revenue(&df).unwrap();
        assert_eq!(daily.height(), 0);
        assert_eq!(daily.width(), 2);
    }
}
