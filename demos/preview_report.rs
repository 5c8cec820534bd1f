use async_trait::async_trait;
use barcode_report_builder::{
    FileRecordSource, MailTransport, MonthlyReportProcessor, OutgoingMessage, Record,
    ReportConfig, ReportingPeriod, Result,
};
use std::env;

/// Prints instead of sending.
struct DryRun;

#[async_trait]
impl MailTransport for DryRun {
    async fn send(&self, message: &OutgoingMessage) -> Result<()> {
        println!("Would send '{}' to {:?}", message.subject, message.recipients);
        Ok(())
    }
}

/// Usage: preview_report [scanner.json] [YYYY-MM]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let feed = args
        .first()
        .map(String::as_str)
        .unwrap_or("demos/scanner.json");
    let period = match args.get(1) {
        Some(label) => ReportingPeriod::parse(label)?,
        None => ReportingPeriod::new(2024, 3)?,
    };

    let config = ReportConfig::from_json_str(&format!(
        r#"{{
            "sender": {{ "address": "preview@localhost.test" }},
            "recipients": ["preview@localhost.test"],
            "source": {{ "kind": "file", "path": {} }}
        }}"#,
        serde_json::to_string(feed)?
    ))?;

    println!("Record feed schema:\n{}\n", Record::schema_as_json()?);

    let processor =
        MonthlyReportProcessor::new(config, Box::new(FileRecordSource::new(feed)), Box::new(DryRun));
    let prepared = processor.prepare_report(period).await?;

    println!(
        "{} raw records, {} dropped, {} in {}",
        prepared.raw_count,
        prepared.dropped_count,
        prepared.records.len(),
        period
    );
    for (department, qty) in prepared.aggregation.department_totals.iter() {
        println!("  {:<20} {}", department, qty);
    }
    println!(
        "Top item: {} ({})",
        prepared.aggregation.top_item.key_or("none"),
        prepared.aggregation.top_item.qty
    );

    let out = format!("target/preview-{}.pdf", period.label());
    tokio::fs::create_dir_all("target").await?;
    tokio::fs::write(&out, &prepared.composed.bytes).await?;
    println!("Wrote {} ({} bytes)", out, prepared.composed.bytes.len());

    Ok(())
}
