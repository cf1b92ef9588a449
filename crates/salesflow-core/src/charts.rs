//! Stages 3 and 5: PNG charts for the aggregated tables.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{Duration, NaiveDate};
use plotters::coord::ranged1d::SegmentValue;
use plotters::prelude::*;
use plotters::style::{register_font, FontStyle, FontTransform};
use polars::prelude::DataFrame;
use tracing::{debug, info};

use crate::artifacts;
use crate::config::ChartConfig;
use crate::error::{PipelineError, Result};
use crate::model::{
    daily_revenue_schema, parse_sale_date, product_revenue_schema, DailyRevenue, ProductRevenue,
    DATE_FORMAT, PRODUCT_NAME, SALE_DATE, TOTAL_REVENUE,
};

const FONT_FAMILY: &str = "sans-serif";
const SKY_BLUE: RGBColor = RGBColor(135, 206, 235);
const LINE_COLOR: RGBColor = RGBColor(31, 119, 180);

const SYSTEM_FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu-sans-fonts/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/truetype/freefont/FreeSans.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

static REGISTERED_FONT: Mutex<Option<PathBuf>> = Mutex::new(None);

/// First readable font: the configured path if set, otherwise a known
/// system location.
pub fn locate_font(configured: Option<&Path>) -> Option<PathBuf> {
    match configured {
        Some(path) => path.is_file().then(|| path.to_path_buf()),
        None => SYSTEM_FONT_CANDIDATES
            .iter()
            .map(PathBuf::from)
            .find(|path| path.is_file()),
    }
}

/// Register the chart font with plotters. plotters keeps one font per family
/// for the whole process, so a different path replaces the previous font.
fn ensure_font(config: &ChartConfig) -> Result<()> {
    let path = locate_font(config.font_path.as_deref()).ok_or_else(|| {
        PipelineError::Render(match &config.font_path {
            Some(path) => format!("font file {} not found", path.display()),
            None => "no system font found; set charts.font_path".to_string(),
        })
    })?;

    let mut registered = REGISTERED_FONT
        .lock()
        .map_err(|_| PipelineError::Render("font registry lock poisoned".to_string()))?;
    if registered.as_deref() == Some(path.as_path()) {
        return Ok(());
    }

    let bytes: &'static [u8] = Box::leak(fs::read(&path)?.into_boxed_slice());
    register_font(FONT_FAMILY, FontStyle::Normal, bytes)
        .map_err(|_| PipelineError::Render(format!("{} is not a usable font", path.display())))?;
    debug!(font = %path.display(), "chart font registered");
    *registered = Some(path);
    Ok(())
}

fn render_err<E: std::fmt::Display>(err: E) -> PipelineError {
    PipelineError::Render(err.to_string())
}

pub fn daily_points(df: &DataFrame) -> Result<Vec<DailyRevenue>> {
    let dates = df.column(SALE_DATE)?.str()?;
    let revenue = df.column(TOTAL_REVENUE)?.f64()?;

    let mut points = Vec::with_capacity(df.height());
    for idx in 0..df.height() {
        let raw = dates.get(idx).ok_or_else(|| {
            PipelineError::Validation(format!("daily revenue row {idx} has no sale_date"))
        })?;
        let sale_date = parse_sale_date(raw).ok_or_else(|| {
            PipelineError::Validation(format!("daily revenue row {idx} has bad date '{raw}'"))
        })?;
        points.push(DailyRevenue {
            sale_date,
            total_revenue: revenue.get(idx).unwrap_or(0.0),
        });
    }
    points.sort_by_key(|point| point.sale_date);
    Ok(points)
}

pub fn product_bars(df: &DataFrame) -> Result<Vec<ProductRevenue>> {
    let names = df.column(PRODUCT_NAME)?.str()?;
    let revenue = df.column(TOTAL_REVENUE)?.f64()?;

    Ok((0..df.height())
        .map(|idx| ProductRevenue {
            product_name: names.get(idx).unwrap_or_default().to_string(),
            total_revenue: revenue.get(idx).unwrap_or(0.0),
        })
        .collect())
}

/// Y range with a little headroom above the tallest value.
fn revenue_axis(values: impl Iterator<Item = f64>) -> std::ops::Range<f64> {
    let max = values.fold(0.0_f64, f64::max);
    if max > 0.0 {
        0.0..max * 1.1
    } else {
        0.0..1.0
    }
}

pub fn draw_daily_revenue_chart(
    points: &[DailyRevenue],
    output: &Path,
    config: &ChartConfig,
) -> Result<()> {
    ensure_font(config)?;
    artifacts::ensure_parent_dir(output)?;

    let origin: NaiveDate = points.first().map(|p| p.sale_date).unwrap_or_default();
    let series: Vec<(f64, f64)> = points
        .iter()
        .map(|p| ((p.sale_date - origin).num_days() as f64, p.total_revenue))
        .collect();
    let span = series.last().map(|(x, _)| *x).unwrap_or(0.0);

    let root = BitMapBackend::new(output, (config.width, config.height)).into_drawing_area();
    root.fill(&WHITE).map_err(render_err)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Daily Total Sales Revenue", (FONT_FAMILY, 24))
        .margin(20)
        .x_label_area_size(110)
        .y_label_area_size(90)
        .build_cartesian_2d(-0.5..span + 0.5, revenue_axis(series.iter().map(|(_, y)| *y)))
        .map_err(render_err)?;

    let date_label = |x: &f64| {
        let offset = x.round() as i64;
        if offset < 0 || (offset as f64) > span {
            return String::new();
        }
        (origin + Duration::days(offset)).format(DATE_FORMAT).to_string()
    };

    chart
        .configure_mesh()
        .x_desc("Date")
        .y_desc("Total Revenue")
        .x_labels(points.len().clamp(2, 20))
        .x_label_formatter(&date_label)
        .x_label_style(
            (FONT_FAMILY, 13)
                .into_font()
                .transform(FontTransform::Rotate90),
        )
        .y_label_formatter(&|y: &f64| format!("{y:.0}"))
        .y_label_style((FONT_FAMILY, 13))
        .axis_desc_style((FONT_FAMILY, 15))
        .draw()
        .map_err(render_err)?;

    chart
        .draw_series(LineSeries::new(series.iter().copied(), LINE_COLOR.stroke_width(2)))
        .map_err(render_err)?;
    chart
        .draw_series(
            series
                .iter()
                .map(|point| Circle::new(*point, 4, LINE_COLOR.filled())),
        )
        .map_err(render_err)?;

    root.present().map_err(render_err)?;
    Ok(())
}

pub fn draw_top_products_chart(
    bars: &[ProductRevenue],
    output: &Path,
    config: &ChartConfig,
) -> Result<()> {
    ensure_font(config)?;
    artifacts::ensure_parent_dir(output)?;

    let slots = bars.len().max(1) as u32;
    let root = BitMapBackend::new(output, (config.width, config.height)).into_drawing_area();
    root.fill(&WHITE).map_err(render_err)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Top 5 Products by Total Revenue", (FONT_FAMILY, 24))
        .margin(20)
        .x_label_area_size(140)
        .y_label_area_size(90)
        .build_cartesian_2d(
            (0u32..slots).into_segmented(),
            revenue_axis(bars.iter().map(|b| b.total_revenue)),
        )
        .map_err(render_err)?;

    let product_label = |value: &SegmentValue<u32>| match value {
        SegmentValue::CenterOf(idx) => bars
            .get(*idx as usize)
            .map(|bar| bar.product_name.clone())
            .unwrap_or_default(),
        _ => String::new(),
    };

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_desc("Product")
        .y_desc("Total Revenue")
        .x_labels(slots as usize)
        .x_label_formatter(&product_label)
        .x_label_style(
            (FONT_FAMILY, 13)
                .into_font()
                .transform(FontTransform::Rotate90),
        )
        .y_label_formatter(&|y: &f64| format!("{y:.0}"))
        .y_label_style((FONT_FAMILY, 13))
        .axis_desc_style((FONT_FAMILY, 15))
        .draw()
        .map_err(render_err)?;

    chart
        .draw_series(bars.iter().enumerate().map(|(idx, bar)| {
            let idx = idx as u32;
            let mut rect = Rectangle::new(
                [
                    (SegmentValue::Exact(idx), 0.0),
                    (SegmentValue::Exact(idx + 1), bar.total_revenue),
                ],
                SKY_BLUE.filled(),
            );
            rect.set_margin(0, 0, 12, 12);
            rect
        }))
        .map_err(render_err)?;

    root.present().map_err(render_err)?;
    Ok(())
}

/// Stage 3: read the daily revenue table and draw it as a line chart.
pub fn visualize_daily_revenue(
    daily_revenue: &Path,
    output: &Path,
    config: &ChartConfig,
) -> Result<PathBuf> {
    let df = artifacts::read_table(daily_revenue, daily_revenue_schema())?;
    let points = daily_points(&df)?;
    draw_daily_revenue_chart(&points, output, config)?;

    info!(path = %output.display(), "daily revenue chart saved");
    Ok(output.to_path_buf())
}

/// Stage 5: read the top-products table and draw it as a bar chart.
pub fn visualize_top_products(
    top_products: &Path,
    output: &Path,
    config: &ChartConfig,
) -> Result<PathBuf> {
    let df = artifacts::read_table(top_products, product_revenue_schema())?;
    let bars = product_bars(&df)?;
    draw_top_products_chart(&bars, output, config)?;

    info!(path = %output.display(), "top products chart saved");
    Ok(output.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    #[test]
    fn daily_points_are_parsed_and_ordered() {
        let df = DataFrame::new(vec![
            Series::new(SALE_DATE.into(), vec!["2024-01-03", "2024-01-01"]).into(),
            Series::new(TOTAL_REVENUE.into(), vec![30.0f64, 10.0]).into(),
        ])
        .unwrap();

        let points = daily_points(&df).unwrap();
        assert_eq!(points[0].sale_date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(points[1].total_revenue, 30.0);
    }

    #[test]
    fn bad_dates_are_rejected() {
        let df = DataFrame::new(vec![
            Series::new(SALE_DATE.into(), vec!["yesterday"]).into(),
            Series::new(TOTAL_REVENUE.into(), vec![1.0f64]).into(),
        ])
        .unwrap();

        assert!(matches!(daily_points(&df), Err(PipelineError::Validation(_))));
    }

    #[test]
    fn bars_follow_table_order() {
        let df = DataFrame::new(vec![
            Series::new(PRODUCT_NAME.into(), vec!["Chai", "Tofu"]).into(),
            Series::new(TOTAL_REVENUE.into(), vec![50.0f64, 40.0]).into(),
        ])
        .unwrap();

        let bars = product_bars(&df).unwrap();
        assert_eq!(bars[0].product_name, "Chai");
        assert_eq!(bars[1].total_revenue, 40.0);
    }

    #[test]
    fn axis_has_headroom_and_never_collapses() {
        let axis = revenue_axis([10.0, 100.0].into_iter());
        assert!(axis.end > 100.0);
        assert_eq!(revenue_axis(std::iter::empty()), 0.0..1.0);
    }

    #[test]
    fn configured_font_must_exist() {
        let missing = Path::new("/nonexistent/font.ttf");
        assert_eq!(locate_font(Some(missing)), None);
    }

    #[test]
    fn changed_font_path_is_not_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("not-a-font.ttf");
        fs::write(&bogus, b"plain text").unwrap();
        let bogus_config = ChartConfig {
            font_path: Some(bogus.clone()),
            ..ChartConfig::default()
        };

        if locate_font(None).is_some() {
            ensure_font(&ChartConfig::default()).unwrap();
        }
        let err = ensure_font(&bogus_config).unwrap_err();
        assert!(err.to_string().contains("not a usable font"), "{err}");

        let missing = ChartConfig {
            font_path: Some(dir.path().join("absent.ttf")),
            ..ChartConfig::default()
        };
        assert!(matches!(ensure_font(&missing), Err(PipelineError::Render(_))));
    }
}
