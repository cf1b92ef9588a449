use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

pub const SALE_DATE: &str = "sale_date";
pub const PRODUCT_ID: &str = "product_id";
pub const PRODUCT_NAME: &str = "product_name";
pub const QUANTITY: &str = "quantity";
pub const UNIT_PRICE: &str = "unit_price";
pub const TOTAL_REVENUE: &str = "total_revenue";

/// Dates are stored as ISO-8601 text so that lexical and calendar order agree.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// One row of the raw extract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub sale_date: NaiveDate,
    pub product_id: i64,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price: f64,
}

impl OrderLine {
    pub fn revenue(&self) -> f64 {
        self.quantity as f64 * self.unit_price
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRevenue {
    pub sale_date: NaiveDate,
    pub total_revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRevenue {
    pub product_name: String,
    pub total_revenue: f64,
}

pub fn order_line_schema() -> Schema {
    Schema::from_iter([
        Field::new(SALE_DATE.into(), DataType::String),
        Field::new(PRODUCT_ID.into(), DataType::Int64),
        Field::new(PRODUCT_NAME.into(), DataType::String),
        Field::new(QUANTITY.into(), DataType::Int64),
        Field::new(UNIT_PRICE.into(), DataType::Float64),
    ])
}

pub fn daily_revenue_schema() -> Schema {
    Schema::from_iter([
        Field::new(SALE_DATE.into(), DataType::String),
        Field::new(TOTAL_REVENUE.into(), DataType::Float64),
    ])
}

pub fn product_revenue_schema() -> Schema {
    Schema::from_iter([
        Field::new(PRODUCT_NAME.into(), DataType::String),
        Field::new(TOTAL_REVENUE.into(), DataType::Float64),
    ])
}

/// Build the extract frame from typed rows, preserving row order.
pub fn order_lines_to_frame(lines: &[OrderLine]) -> PolarsResult<DataFrame> {
    let dates: Vec<String> = lines
        .iter()
        .map(|line| line.sale_date.format(DATE_FORMAT).to_string())
        .collect();
    let product_ids: Vec<i64> = lines.iter().map(|line| line.product_id).collect();
    let names: Vec<&str> = lines.iter().map(|line| line.product_name.as_str()).collect();
    let quantities: Vec<i64> = lines.iter().map(|line| line.quantity).collect();
    let prices: Vec<f64> = lines.iter().map(|line| line.unit_price).collect();

    DataFrame::new(vec![
        Series::new(SALE_DATE.into(), dates).into(),
        Series::new(PRODUCT_ID.into(), product_ids).into(),
        Series::new(PRODUCT_NAME.into(), names).into(),
        Series::new(QUANTITY.into(), quantities).into(),
        Series::new(UNIT_PRICE.into(), prices).into(),
    ])
}

/// Expression computing per-row revenue. Both operands are widened to f64
/// so integer-only prices still produce a float column.
pub fn revenue_expr() -> Expr {
    (col(QUANTITY).cast(DataType::Float64) * col(UNIT_PRICE).cast(DataType::Float64))
        .alias(TOTAL_REVENUE)
}

pub(crate) fn parse_sale_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).ok()
}
