pub mod artifacts;
pub mod charts;
pub mod config;
pub mod daily_revenue;
pub mod dag;
pub mod db;
pub mod error;
pub mod extract;
pub mod model;
pub mod pipeline;
pub mod schedule;
pub mod top_products;
