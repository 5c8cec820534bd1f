//! Report assembly.
//!
//! The composer decides which sections exist and in what order; turning a
//! data series into an image and a section list into bytes is delegated to
//! [`ChartRenderer`] and [`DocumentRenderer`] implementations.

use crate::aggregator::{Aggregation, Totals};
use crate::error::Result;
use crate::schema::{Record, ReportingPeriod};
use crate::utils::format_quantity;
use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};

pub const DEPARTMENT_CHART_TITLE: &str = "Quantity per Department";
pub const ITEM_CHART_TITLE: &str = "Quantity per Item";
pub const TABLE_COLUMNS: [&str; 5] = ["Date", "Item", "Client", "Department", "Qty"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormat {
    /// Uncompressed 8-bit RGB pixels, row-major from the top-left corner.
    RawRgb { width: u32, height: u32 },
    Png,
    Svg,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartImage {
    pub format: ImageFormat,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetailTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl DetailTable {
    pub fn from_records(records: &[Record]) -> Self {
        Self {
            columns: TABLE_COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows: records
                .iter()
                .map(|record| {
                    vec![
                        record.date.format("%Y-%m-%d").to_string(),
                        record.item.clone(),
                        record.client.clone(),
                        record.department.clone(),
                        format_quantity(record.qty),
                    ]
                })
                .collect(),
        }
    }
}

/// One plotted category and its total, printed under the chart so the bars
/// can be read without the underlying data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegendEntry {
    pub label: String,
    pub value: String,
}

impl LegendEntry {
    pub fn text(&self) -> String {
        format!("{}: {}", self.label, self.value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Section {
    Title(String),
    /// `legend` lists the bars left to right.
    Chart {
        label: String,
        image: ChartImage,
        legend: Vec<LegendEntry>,
    },
    /// Stands in for a chart that had no categories to plot.
    ChartPlaceholder { label: String, note: String },
    Narrative(String),
    Table(DetailTable),
}

impl Section {
    pub fn kind(&self) -> &'static str {
        match self {
            Section::Title(_) => "title",
            Section::Chart { .. } => "chart",
            Section::ChartPlaceholder { .. } => "chart-placeholder",
            Section::Narrative(_) => "narrative",
            Section::Table(_) => "table",
        }
    }
}

/// Finalized, ordered section list for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportDocument {
    period: ReportingPeriod,
    sections: Vec<Section>,
}

impl ReportDocument {
    pub fn period(&self) -> ReportingPeriod {
        self.period
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn table(&self) -> Option<&DetailTable> {
        self.sections.iter().find_map(|section| match section {
            Section::Table(table) => Some(table),
            _ => None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ComposedReport {
    pub document: ReportDocument,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait ChartRenderer: Send + Sync {
    /// Rasterizes one bar series. Must be deterministic for identical input.
    async fn render(&self, labels: &[String], values: &[f64], title: &str) -> Result<ChartImage>;
}

#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    /// Lays out the sections in the order given.
    async fn compose(&self, sections: &[Section]) -> Result<Vec<u8>>;
}

pub struct ReportComposer<'a> {
    organization_name: &'a str,
    charts: &'a dyn ChartRenderer,
    renderer: &'a dyn DocumentRenderer,
}

impl<'a> ReportComposer<'a> {
    pub fn new(
        organization_name: &'a str,
        charts: &'a dyn ChartRenderer,
        renderer: &'a dyn DocumentRenderer,
    ) -> Self {
        Self {
            organization_name,
            charts,
            renderer,
        }
    }

    pub fn title(&self, period: ReportingPeriod) -> String {
        format!("{} Monthly Report - {}", self.organization_name, period)
    }

    /// Builds the document for `records`, which must already be filtered to
    /// `period`, and serializes it.
    pub async fn compose(
        &self,
        records: &[Record],
        aggregation: &Aggregation,
        period: ReportingPeriod,
    ) -> Result<ComposedReport> {
        let mut sections = vec![Section::Title(self.title(period))];

        sections.push(
            self.chart_section(&aggregation.department_totals, DEPARTMENT_CHART_TITLE)
                .await?,
        );
        sections.push(
            self.chart_section(&aggregation.item_totals, ITEM_CHART_TITLE)
                .await?,
        );

        sections.extend(narrative_lines(aggregation).into_iter().map(Section::Narrative));
        sections.push(Section::Table(DetailTable::from_records(records)));

        let document = ReportDocument { period, sections };
        let bytes = self.renderer.compose(document.sections()).await?;

        info!(
            "Composed report for {} with {} sections ({} bytes)",
            period,
            document.sections().len(),
            bytes.len()
        );

        Ok(ComposedReport { document, bytes })
    }

    async fn chart_section(&self, totals: &Totals, title: &str) -> Result<Section> {
        if totals.is_empty() {
            debug!("No categories for '{}', using placeholder", title);
            return Ok(Section::ChartPlaceholder {
                label: title.to_string(),
                note: "No records in this period".to_string(),
            });
        }

        let image = self
            .charts
            .render(&totals.labels(), &totals.chart_values(), title)
            .await?;

        Ok(Section::Chart {
            label: title.to_string(),
            image,
            legend: legend_for(totals),
        })
    }
}

pub fn legend_for(totals: &Totals) -> Vec<LegendEntry> {
    totals
        .iter()
        .map(|(label, qty)| LegendEntry {
            label: label.to_string(),
            value: format_quantity(qty),
        })
        .collect()
}

pub fn narrative_lines(aggregation: &Aggregation) -> Vec<String> {
    vec![
        format!(
            "Highest Quantity Department: {} ({})",
            aggregation.top_department.key_or("none"),
            format_quantity(aggregation.top_department.qty)
        ),
        format!(
            "Highest Quantity Item: {} ({})",
            aggregation.top_item.key_or("none"),
            format_quantity(aggregation.top_item.qty)
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::aggregate;
    use crate::error::ReportError;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingCharts {
        titles: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChartRenderer for RecordingCharts {
        async fn render(&self, labels: &[String], _values: &[f64], title: &str) -> Result<ChartImage> {
            self.titles.lock().unwrap().push(title.to_string());
            Ok(ChartImage {
                format: ImageFormat::Png,
                bytes: labels.join(",").into_bytes(),
            })
        }
    }

    struct KindsRenderer;

    #[async_trait]
    impl DocumentRenderer for KindsRenderer {
        async fn compose(&self, sections: &[Section]) -> Result<Vec<u8>> {
            let kinds: Vec<&str> = sections.iter().map(Section::kind).collect();
            Ok(kinds.join("|").into_bytes())
        }
    }

    struct FailingCharts;

    #[async_trait]
    impl ChartRenderer for FailingCharts {
        async fn render(&self, _: &[String], _: &[f64], _: &str) -> Result<ChartImage> {
            Err(ReportError::chart("canvas unavailable"))
        }
    }

    fn record(day: u32, item: &str, department: &str, qty: &str) -> Record {
        Record {
            date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            item: item.to_string(),
            client: "Acme".to_string(),
            department: department.to_string(),
            qty: qty.parse::<Decimal>().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_sections_in_fixed_order() {
        let records = vec![record(1, "A", "X", "5"), record(2, "B", "X", "7")];
        let aggregation = aggregate(&records);
        let charts = RecordingCharts::default();
        let composer = ReportComposer::new("PRD Prime", &charts, &KindsRenderer);
        let period = ReportingPeriod::new(2024, 3).unwrap();

        let report = composer.compose(&records, &aggregation, period).await.unwrap();

        assert_eq!(
            String::from_utf8(report.bytes).unwrap(),
            "title|chart|chart|narrative|narrative|table"
        );
        assert_eq!(
            report.document.sections()[0],
            Section::Title("PRD Prime Monthly Report - 3/2024".to_string())
        );
        assert_eq!(
            *charts.titles.lock().unwrap(),
            vec![DEPARTMENT_CHART_TITLE, ITEM_CHART_TITLE]
        );
        assert_eq!(
            report.document.sections()[4],
            Section::Narrative("Highest Quantity Item: B (7)".to_string())
        );
    }

    #[tokio::test]
    async fn test_chart_sections_carry_category_legend() {
        let records = vec![
            record(1, "A", "Packing", "0.1"),
            record(2, "B", "Assembly", "3"),
            record(3, "A", "Packing", "0.2"),
        ];
        let aggregation = aggregate(&records);
        let charts = RecordingCharts::default();
        let composer = ReportComposer::new("PRD Prime", &charts, &KindsRenderer);
        let period = ReportingPeriod::new(2024, 3).unwrap();

        let report = composer.compose(&records, &aggregation, period).await.unwrap();

        match &report.document.sections()[1] {
            Section::Chart { label, legend, .. } => {
                assert_eq!(label, DEPARTMENT_CHART_TITLE);
                let texts: Vec<String> = legend.iter().map(LegendEntry::text).collect();
                assert_eq!(texts, vec!["Packing: 0.3", "Assembly: 3"]);
            }
            other => panic!("expected a chart section, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_table_rows_follow_record_order() {
        let records = vec![
            record(9, "C", "Y", "1"),
            record(1, "A", "X", "2.5"),
            record(5, "B", "X", "3"),
        ];
        let aggregation = aggregate(&records);
        let charts = RecordingCharts::default();
        let composer = ReportComposer::new("PRD Prime", &charts, &KindsRenderer);
        let period = ReportingPeriod::new(2024, 3).unwrap();

        let report = composer.compose(&records, &aggregation, period).await.unwrap();
        let table = report.document.table().unwrap();

        assert_eq!(table.columns, TABLE_COLUMNS);
        assert_eq!(table.rows.len(), 3);
        assert_eq!(table.rows[0], vec!["2024-03-09", "C", "Acme", "Y", "1"]);
        assert_eq!(table.rows[1][4], "2.5");
        assert_eq!(table.rows[2][1], "B");
    }

    #[tokio::test]
    async fn test_empty_period_uses_placeholders() {
        let aggregation = aggregate(&[]);
        let charts = RecordingCharts::default();
        let composer = ReportComposer::new("PRD Prime", &charts, &KindsRenderer);
        let period = ReportingPeriod::new(2024, 3).unwrap();

        let report = composer.compose(&[], &aggregation, period).await.unwrap();

        assert_eq!(
            String::from_utf8(report.bytes).unwrap(),
            "title|chart-placeholder|chart-placeholder|narrative|narrative|table"
        );
        assert!(charts.titles.lock().unwrap().is_empty());
        assert_eq!(
            report.document.sections()[3],
            Section::Narrative("Highest Quantity Department: none (0)".to_string())
        );
        assert!(report.document.table().unwrap().rows.is_empty());
    }

    #[tokio::test]
    async fn test_chart_failure_fails_composition() {
        let records = vec![record(1, "A", "X", "5")];
        let aggregation = aggregate(&records);
        let composer = ReportComposer::new("PRD Prime", &FailingCharts, &KindsRenderer);
        let period = ReportingPeriod::new(2024, 3).unwrap();

        let err = composer
            .compose(&records, &aggregation, period)
            .await
            .unwrap_err();
        assert_eq!(err.stage(), "chart-render");
    }
}
