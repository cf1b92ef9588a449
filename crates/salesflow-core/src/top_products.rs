//! Stage 4: best-selling products by total revenue.

use std::path::Path;

use polars::prelude::*;
use tracing::info;

use crate::artifacts;
use crate::error::Result;
use crate::model::{order_line_schema, revenue_expr, PRODUCT_NAME, TOTAL_REVENUE};

pub const TOP_PRODUCT_LIMIT: usize = 5;

/// Revenue per product in first-seen order.
pub fn product_revenue(order_lines: &DataFrame) -> PolarsResult<DataFrame> {
    order_lines
        .clone()
        .lazy()
        .with_column(revenue_expr())
        .group_by_stable([col(PRODUCT_NAME)])
        .agg([col(TOTAL_REVENUE).sum()])
        .collect()
}

/// The `limit` highest-revenue products, descending. Equal revenues keep the
/// order in which the products first appear in the extract.
pub fn top_products(order_lines: &DataFrame, limit: usize) -> PolarsResult<DataFrame> {
    product_revenue(order_lines)?
        .lazy()
        .sort(
            [TOTAL_REVENUE],
            SortMultipleOptions::default()
                .with_order_descending(true)
                .with_nulls_last(true)
                .with_maintain_order(true),
        )
        .limit(limit as IdxSize)
        .collect()
}

/// Read the raw extract, rank products, and overwrite the top-products artifact.
pub fn calculate_top_products(raw_extract: &Path, output: &Path) -> Result<usize> {
    let order_lines = artifacts::read_table(raw_extract, order_line_schema())?;
    let mut top = top_products(&order_lines, TOP_PRODUCT_LIMIT)?;
    artifacts::write_table(output, &mut top)?;

    info!(products = top.height(), path = %output.display(), "top products written");
    Ok(top.height())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(names: &[&str], quantities: &[i64], prices: &[f64]) -> DataFrame {
        let dates: Vec<&str> = names.iter().map(|_| "2024-01-01").collect();
        let ids: Vec<i64> = (0..names.len() as i64).collect();
        DataFrame::new(vec![
            Series::new("sale_date".into(), dates).into(),
            Series::new("product_id".into(), ids).into(),
            Series::new(PRODUCT_NAME.into(), names.to_vec()).into(),
            Series::new("quantity".into(), quantities.to_vec()).into(),
            Series::new("unit_price".into(), prices.to_vec()).into(),
        ])
        .unwrap()
    }

    fn names_of(df: &DataFrame) -> Vec<String> {
        df.column(PRODUCT_NAME)
            .unwrap()
            .str()
            .unwrap()
            .into_iter()
            .map(|v| v.unwrap_or_default().to_string())
            .collect()
    }

    fn revenues_of(df: &DataFrame) -> Vec<f64> {
        df.column(TOTAL_REVENUE)
            .unwrap()
            .f64()
            .unwrap()
            .into_iter()
            .map(|v| v.unwrap_or_default())
            .collect()
    }

    #[test]
    fn keeps_five_highest_and_drops_the_rest() {
        let df = extract(
            &["F", "A", "B", "C", "D", "E"],
            &[1, 1, 1, 1, 1, 1],
            &[5.0, 100.0, 90.0, 80.0, 70.0, 10.0],
        );
        let top = top_products(&df, TOP_PRODUCT_LIMIT).unwrap();

        assert_eq!(revenues_of(&top), vec![100.0, 90.0, 80.0, 70.0, 10.0]);
        assert_eq!(names_of(&top), vec!["A", "B", "C", "D", "E"]);
    }

    #[test]
    fn sums_across_rows_of_the_same_product() {
        let df = extract(&["Chai", "Tofu", "Chai"], &[2, 1, 3], &[10.0, 40.0, 10.0]);
        let top = top_products(&df, TOP_PRODUCT_LIMIT).unwrap();

        assert_eq!(names_of(&top), vec!["Chai", "Tofu"]);
        assert_eq!(revenues_of(&top), vec![50.0, 40.0]);
    }

    #[test]
    fn ties_keep_first_seen_order() {
        let df = extract(&["Zed", "Amy", "Kit"], &[1, 1, 1], &[10.0, 10.0, 10.0]);
        let top = top_products(&df, 2).unwrap();
        assert_eq!(names_of(&top), vec!["Zed", "Amy"]);
    }

    #[test]
    fn fewer_products_than_limit() {
        let df = extract(&["Chai"], &[1], &[1.0]);
        let top = top_products(&df, TOP_PRODUCT_LIMIT).unwrap();
        assert_eq!(top.height(), 1);
    }

    #[test]
    fn first_seen_order_before_ranking() {
        let df = extract(&["B", "A", "B"], &[1, 1, 1], &[1.0, 5.0, 1.0]);
        let all = product_revenue(&df).unwrap();
        assert_eq!(names_of(&all), vec!["B", "A"]);
        assert_eq!(revenues_of(&all), vec![2.0, 5.0]);
    }
}
