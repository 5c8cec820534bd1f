//! # Barcode Report Builder
//!
//! A library for turning a snapshot of barcode scan events into a monthly
//! PDF report and delivering it by email.
//!
//! ## Core Concepts
//!
//! - **Record**: one normalized scan event (date, item, client, department, qty)
//! - **Reporting Period**: the calendar month a report covers
//! - **Totals**: insertion-ordered quantity sums per department and per item
//! - **Extremum**: the department or item with the highest total, ties going to the first seen
//! - **Report Document**: title, charts, narrative and a detail table, in that order
//!
//! ## Example
//!
//! ```rust,ignore
//! use barcode_report_builder::*;
//!
//! let config = ReportConfig::from_json_file("report.json")?;
//! let processor = MonthlyReportProcessor::from_config(config)?;
//!
//! let period = ReportingPeriod::new(2024, 3)?;
//! let summary = processor.run_monthly_report(Some(period)).await?;
//! println!("Top item: {:?}", summary.top_item);
//! ```

pub mod aggregator;
pub mod charts;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod ingestion;
pub mod pdf;
pub mod report;
pub mod schedule;
pub mod schema;
pub mod source;
pub mod utils;

pub use aggregator::{aggregate, Aggregation, Extremum, GroupBy, Totals};
pub use charts::BarChartRenderer;
pub use config::{
    DataSourceConfig, MailRelayConfig, MailTransportConfig, ReportConfig, SmtpConfig, SmtpSecurity,
};
pub use dispatch::{Attachment, DispatchCoordinator, MailTransport, OutgoingMessage, Sender};
pub use error::{ReportError, Result};
pub use ingestion::*;
pub use pdf::PdfDocumentRenderer;
pub use report::*;
pub use schedule::{run_on_schedule, wait_until, MonthlySchedule};
pub use schema::*;
pub use source::*;
pub use utils::*;

pub use rust_decimal::Decimal;

#[cfg(feature = "http")]
pub use dispatch::HttpMailTransport;
#[cfg(feature = "smtp")]
pub use dispatch::SmtpMailTransport;

use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;

/// A composed report that has not been sent yet.
#[derive(Debug, Clone)]
pub struct PreparedReport {
    pub period: ReportingPeriod,
    pub raw_count: usize,
    pub dropped_count: usize,
    pub records: Vec<Record>,
    pub aggregation: Aggregation,
    pub composed: ComposedReport,
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub period: ReportingPeriod,
    pub raw_count: usize,
    pub normalized_count: usize,
    pub filtered_count: usize,
    pub department_totals: Totals,
    pub item_totals: Totals,
    pub top_department: Extremum,
    pub top_item: Extremum,
    pub document_size: usize,
    pub retained_at: Option<PathBuf>,
    pub subject: String,
    pub recipients: BTreeSet<String>,
}

pub struct MonthlyReportProcessor {
    config: ReportConfig,
    source: Box<dyn RecordSource>,
    charts: Box<dyn ChartRenderer>,
    renderer: Box<dyn DocumentRenderer>,
    transport: Box<dyn MailTransport>,
}

impl MonthlyReportProcessor {
    /// Uses the built-in bar chart and PDF renderers.
    pub fn new(
        config: ReportConfig,
        source: Box<dyn RecordSource>,
        transport: Box<dyn MailTransport>,
    ) -> Self {
        Self {
            config,
            source,
            charts: Box::new(BarChartRenderer::default()),
            renderer: Box::new(PdfDocumentRenderer::default()),
            transport,
        }
    }

    /// Builds the data source and the mail transport (SMTP or HTTP relay)
    /// described by `config`.
    pub fn from_config(config: ReportConfig) -> Result<Self> {
        config.validate()?;
        let source = config.source.build()?;
        let transport = config
            .mail
            .as_ref()
            .ok_or_else(|| {
                ReportError::InvalidConfig(
                    "a 'mail' section (kind 'smtp' or 'http') is required".to_string(),
                )
            })?
            .build()?;
        Ok(Self::new(config, source, transport))
    }

    pub fn with_chart_renderer(mut self, charts: Box<dyn ChartRenderer>) -> Self {
        self.charts = charts;
        self
    }

    pub fn with_document_renderer(mut self, renderer: Box<dyn DocumentRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn config(&self) -> &ReportConfig {
        &self.config
    }

    /// Fetches, aggregates and composes the report for `period` without
    /// sending it.
    pub async fn prepare_report(&self, period: ReportingPeriod) -> Result<PreparedReport> {
        let raw = self.source.fetch_records().await.map_err(|e| match e {
            ReportError::DataUnavailable(reason) => ReportError::DataUnavailable(reason),
            other => ReportError::DataUnavailable(format!("{}: {}", self.source.describe(), other)),
        })?;

        if raw.is_empty() {
            return Err(ReportError::DataUnavailable(format!(
                "{} returned no records",
                self.source.describe()
            )));
        }

        let normalization = normalize_with_report(&raw);
        let records = filter_by_period(&normalization.records, period);
        debug!(
            "{} raw records, {} normalized, {} in {}",
            raw.len(),
            normalization.records.len(),
            records.len(),
            period
        );

        let aggregation = aggregate(&records);

        let composer = ReportComposer::new(
            &self.config.organization_name,
            self.charts.as_ref(),
            self.renderer.as_ref(),
        );
        let composed = composer.compose(&records, &aggregation, period).await?;

        Ok(PreparedReport {
            period,
            raw_count: raw.len(),
            dropped_count: normalization.dropped.len(),
            records,
            aggregation,
            composed,
        })
    }

    /// Runs the whole pipeline once. `None` reports on the current calendar
    /// month.
    pub async fn run_monthly_report(&self, period: Option<ReportingPeriod>) -> Result<RunSummary> {
        let period = period.unwrap_or_else(ReportingPeriod::current);
        info!("Starting monthly report for {}", period);

        match self.run(period).await {
            Ok(summary) => {
                info!(
                    "Monthly report for {} sent: top department {} ({}), top item {} ({})",
                    period,
                    summary.top_department.key_or("none"),
                    format_quantity(summary.top_department.qty),
                    summary.top_item.key_or("none"),
                    format_quantity(summary.top_item.qty)
                );
                Ok(summary)
            }
            Err(e) => {
                error!(
                    "Monthly report for {} failed during {}: {}",
                    period,
                    e.stage(),
                    e
                );
                Err(e)
            }
        }
    }

    async fn run(&self, period: ReportingPeriod) -> Result<RunSummary> {
        let prepared = self.prepare_report(period).await?;
        let retained_at = self.retain(&prepared.composed.bytes).await;

        let coordinator = DispatchCoordinator::new(
            &self.config.sender,
            &self.config.recipients,
            &self.config.attachment_file_name,
            self.transport.as_ref(),
        );

        let PreparedReport {
            raw_count,
            dropped_count,
            records,
            aggregation,
            composed,
            ..
        } = prepared;

        let message = coordinator
            .dispatch(
                composed.bytes,
                period,
                &aggregation.top_department,
                &aggregation.top_item,
            )
            .await?;

        Ok(RunSummary {
            period,
            raw_count,
            normalized_count: raw_count - dropped_count,
            filtered_count: records.len(),
            department_totals: aggregation.department_totals,
            item_totals: aggregation.item_totals,
            top_department: aggregation.top_department,
            top_item: aggregation.top_item,
            document_size: message.attachment.content.len(),
            retained_at,
            subject: message.subject,
            recipients: message.recipients,
        })
    }

    /// Keeps a copy of the document when an output directory is configured.
    async fn retain(&self, document: &[u8]) -> Option<PathBuf> {
        let path = self.config.retained_document_path()?;

        let written = async {
            if let Some(dir) = path.parent() {
                tokio::fs::create_dir_all(dir).await?;
            }
            tokio::fs::write(&path, document).await
        }
        .await;

        match written {
            Ok(()) => {
                debug!("Retained report at {}", path.display());
                Some(path)
            }
            Err(e) => {
                warn!("Could not retain report at {}: {}", path.display(), e);
                None
            }
        }
    }
}

pub async fn run_monthly_report(
    processor: &MonthlyReportProcessor,
    period: Option<ReportingPeriod>,
) -> Result<RunSummary> {
    processor.run_monthly_report(period).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct OutboxTransport {
        sent: Arc<Mutex<Vec<OutgoingMessage>>>,
    }

    #[async_trait]
    impl MailTransport for OutboxTransport {
        async fn send(&self, message: &OutgoingMessage) -> Result<()> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn config() -> ReportConfig {
        ReportConfig::from_json_str(
            r#"{
                "sender": { "address": "reports@example.com" },
                "recipients": ["boss@example.com"],
                "source": { "kind": "file", "path": "unused.json" }
            }"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_end_to_end_processing() {
        let source = StaticRecordSource::new(vec![
            json!({"date": "2024-03-01", "item": "A", "department": "X", "qty": 5}),
            json!({"date": "2024-03-02", "item": "B", "department": "X", "qty": 7}),
            json!({"date": "2024-04-01", "item": "A", "department": "Y", "qty": 100}),
        ]);
        let transport = OutboxTransport::default();
        let processor =
            MonthlyReportProcessor::new(config(), Box::new(source), Box::new(transport.clone()));

        let summary = processor
            .run_monthly_report(Some(ReportingPeriod::new(2024, 3).unwrap()))
            .await
            .unwrap();

        assert_eq!(summary.filtered_count, 2);
        assert_eq!(
            summary.department_totals.get("X"),
            Some(rust_decimal::Decimal::from(12))
        );
        assert_eq!(summary.top_item.key.as_deref(), Some("B"));
        assert_eq!(summary.subject, "Monthly Barcode Report - 3/2024");

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].attachment.content.starts_with(b"%PDF-"));
        assert_eq!(sent[0].attachment.content.len(), summary.document_size);
    }

    #[tokio::test]
    async fn test_empty_source_aborts_before_composing() {
        let transport = OutboxTransport::default();
        let processor = MonthlyReportProcessor::new(
            config(),
            Box::new(StaticRecordSource::default()),
            Box::new(transport.clone()),
        );

        let err = processor
            .run_monthly_report(Some(ReportingPeriod::new(2024, 3).unwrap()))
            .await
            .unwrap_err();

        assert!(matches!(err, ReportError::DataUnavailable(_)));
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[cfg(feature = "smtp")]
    #[tokio::test]
    async fn test_from_config_accepts_smtp_without_relay() {
        let config = ReportConfig::from_json_str(
            r#"{
                "sender": { "address": "reports@example.com" },
                "recipients": ["boss@example.com"],
                "source": { "kind": "file", "path": "unused.json" },
                "mail": { "kind": "smtp", "host": "smtp.gmail.com", "username": "reports@example.com" }
            }"#,
        )
        .unwrap();

        let processor = MonthlyReportProcessor::from_config(config).unwrap();
        assert!(matches!(
            processor.config().mail,
            Some(MailTransportConfig::Smtp(_))
        ));
    }

    #[test]
    fn test_from_config_requires_mail_section() {
        let err = MonthlyReportProcessor::from_config(config()).err().unwrap();
        assert_eq!(err.stage(), "config");
    }
}
