#![cfg(not(tarpaulin_include))]
use plotters::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

use crate::error::{AppError, AppResult};
use crate::expense::{CollectionKind, ExpenseCollection};
use crate::money::Money;

/// Chart styles offered for the totals chart
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    /// Share of the overall total per kind
    #[default]
    Pie,

    /// One bar per kind
    Bar,
}

/// Configuration options for chart generation
#[derive(Clone, Debug)]
pub struct ChartOptions {
    /// Title displayed at the top of the chart
    pub title: String,

    /// Width of the chart in pixels
    pub width: u32,

    /// Height of the chart in pixels
    pub height: u32,

    pub chart_type: ChartType,
}

impl Default for ChartOptions {
    fn default() -> Self {
        Self {
            title: "Expenses by type".to_string(),
            width: 800,
            height: 600,
            chart_type: ChartType::Pie,
        }
    }
}

/// One segment of the chart
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSlice {
    pub kind: CollectionKind,
    pub label: String,
    pub total: Money,
    /// Share of the overall total, 0 when nothing has been spent
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartData {
    pub slices: Vec<ChartSlice>,
    pub overall: Money,
}

fn label_for(kind: CollectionKind) -> &'static str {
    match kind {
        CollectionKind::Group => "Group expenses",
        CollectionKind::Individual => "Individual expenses",
    }
}

/// Sum grand totals per kind across a user's collections
///
/// Both kinds are always present, in group-then-individual order.
/// Percentages are rounded to two decimals.
pub fn chart_data(collections: &[ExpenseCollection]) -> ChartData {
    let kinds = [CollectionKind::Group, CollectionKind::Individual];
    let totals: Vec<Money> = kinds
        .iter()
        .map(|kind| {
            collections
                .iter()
                .filter(|c| c.kind == *kind)
                .map(ExpenseCollection::grand_total)
                .sum::<Money>()
        })
        .collect();
    let overall: Money = totals.iter().sum();

    let slices = kinds
        .iter()
        .zip(totals)
        .map(|(kind, total)| {
            let percentage = if overall.cents() == 0 {
                0.0
            } else {
                (total.cents() as f64 / overall.cents() as f64 * 10_000.0).round() / 100.0
            };
            ChartSlice {
                kind: *kind,
                label: label_for(*kind).to_string(),
                total,
                percentage,
            }
        })
        .collect();

    ChartData { slices, overall }
}

fn chart_error(e: impl Display) -> AppError {
    AppError::Chart(e.to_string())
}

/// Render the chart as PNG bytes
///
/// Plotters writes the PNG to a scratch file which is read back and removed.
pub fn render_chart(data: &ChartData, options: &ChartOptions) -> AppResult<Vec<u8>> {
    let file = tempfile::Builder::new()
        .prefix("splitbill-chart")
        .suffix(".png")
        .tempfile()?;
    let path = file.path().to_path_buf();

    {
        let root = BitMapBackend::new(&path, (options.width, options.height)).into_drawing_area();
        root.fill(&WHITE).map_err(chart_error)?;

        match options.chart_type {
            ChartType::Pie => draw_pie(&root, data, options)?,
            ChartType::Bar => draw_bar(&root, data, options)?,
        }

        root.present().map_err(chart_error)?;
    }

    let png = std::fs::read(&path)?;
    Ok(png)
}

fn draw_pie(
    root: &DrawingArea<BitMapBackend<'_>, plotters::coord::Shift>,
    data: &ChartData,
    options: &ChartOptions,
) -> AppResult<()> {
    let titled = root
        .titled(&options.title, ("sans-serif", 30).into_font())
        .map_err(chart_error)?;
    let (width, height) = titled.dim_in_pixel();
    let center = (width as i32 / 2, height as i32 / 2);

    if data.overall.cents() == 0 {
        titled
            .draw(&Text::new(
                "No expenses yet",
                (center.0 - 80, center.1),
                ("sans-serif", 24).into_font(),
            ))
            .map_err(chart_error)?;
        return Ok(());
    }

    let radius = f64::from(width.min(height)) * 0.35;
    let sizes: Vec<f64> = data.slices.iter().map(|s| s.total.as_f64()).collect();
    let colors = [BLUE, GREEN];
    let labels: Vec<String> = data
        .slices
        .iter()
        .map(|s| format!("{} ({}%)", s.label, s.percentage))
        .collect();

    let mut pie = Pie::new(&center, &radius, &sizes, &colors, &labels);
    pie.label_style(("sans-serif", 18).into_font());
    titled.draw(&pie).map_err(chart_error)?;
    Ok(())
}

fn draw_bar(
    root: &DrawingArea<BitMapBackend<'_>, plotters::coord::Shift>,
    data: &ChartData,
    options: &ChartOptions,
) -> AppResult<()> {
    let max_y = data
        .slices
        .iter()
        .map(|s| s.total.as_f64())
        .fold(0.0, f64::max)
        .max(1.0)
        * 1.1;
    let count = data.slices.len() as f64;
    let labels: Vec<String> = data.slices.iter().map(|s| s.label.clone()).collect();
    let label_at = |x: &f64| {
        let index = x.floor();
        if (x - index - 0.5).abs() < 1e-6 && index >= 0.0 {
            labels.get(index as usize).cloned().unwrap_or_default()
        } else {
            String::new()
        }
    };

    let mut chart = ChartBuilder::on(root)
        .caption(&options.title, ("sans-serif", 30).into_font())
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(60)
        .build_cartesian_2d(0.0..count, 0.0..max_y)
        .map_err(chart_error)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(data.slices.len() * 2 + 1)
        .x_label_formatter(&label_at)
        .y_desc("Total")
        .draw()
        .map_err(chart_error)?;

    let colors = [BLUE, GREEN];
    chart
        .draw_series(data.slices.iter().enumerate().map(|(i, slice)| {
            let x = i as f64;
            Rectangle::new(
                [(x + 0.15, 0.0), (x + 0.85, slice.total.as_f64())],
                colors[i % colors.len()].filled(),
            )
        }))
        .map_err(chart_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expense::{LineItem, NewCollection};
    use chrono::Utc;

    fn doc(kind: CollectionKind, items: Vec<LineItem>) -> ExpenseCollection {
        let members = if kind.has_members() { vec!["Ana".to_string()] } else { Vec::new() };
        ExpenseCollection::from_new(
            "u1",
            NewCollection {
                kind,
                name: "n".into(),
                description: "d".into(),
                members,
                items,
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_chart_data_percentages() {
        let docs = vec![
            doc(CollectionKind::Group, vec![LineItem::new("a", "1", "30").assigned_to("Ana")]),
            doc(CollectionKind::Individual, vec![LineItem::new("b", "1", "10")]),
            doc(CollectionKind::Group, vec![LineItem::new("c", "2", "5").assigned_to("Ana")]),
        ];
        let data = chart_data(&docs);

        assert_eq!(data.overall.to_string(), "50.00");
        assert_eq!(data.slices[0].kind, CollectionKind::Group);
        assert_eq!(data.slices[0].total.to_string(), "40.00");
        assert_eq!(data.slices[0].percentage, 80.0);
        assert_eq!(data.slices[1].total.to_string(), "10.00");
        assert_eq!(data.slices[1].percentage, 20.0);
    }

    #[test]
    fn test_chart_data_empty() {
        let data = chart_data(&[]);
        assert_eq!(data.overall, Money::ZERO);
        assert_eq!(data.slices.len(), 2);
        assert!(data.slices.iter().all(|s| s.percentage == 0.0));
    }

    #[test]
    fn test_chart_type_from_query() {
        let pie: ChartType = serde_json::from_str("\"pie\"").unwrap();
        let bar: ChartType = serde_json::from_str("\"bar\"").unwrap();
        assert_eq!(pie, ChartType::Pie);
        assert_eq!(bar, ChartType::Bar);
        assert_eq!(ChartOptions::default().width, 800);
    }
}
