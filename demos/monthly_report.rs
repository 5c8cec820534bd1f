use barcode_report_builder::{
    run_on_schedule, MailTransportConfig, MonthlyReportProcessor, ReportConfig, ReportingPeriod,
};
use dotenv::dotenv;
use std::env;

/// Usage: monthly_report [config.json] [YYYY-MM | --schedule]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let args: Vec<String> = env::args().skip(1).collect();
    let config_path = args
        .first()
        .map(String::as_str)
        .unwrap_or("demos/report.json");

    let mut config = ReportConfig::from_json_file(config_path)?;
    match config.mail.as_mut() {
        Some(MailTransportConfig::Smtp(smtp)) => {
            if let Ok(password) = env::var("SMTP_PASSWORD") {
                smtp.password = Some(password);
            }
        }
        Some(MailTransportConfig::Http(relay)) => {
            if let Ok(api_key) = env::var("MAIL_RELAY_API_KEY") {
                relay.api_key = Some(api_key);
            }
        }
        None => {}
    }

    let schedule = config.schedule;
    let processor = MonthlyReportProcessor::from_config(config)?;

    match args.get(1).map(String::as_str) {
        Some("--schedule") => {
            println!(
                "Scheduler started. Waiting for day {} at {:02}:{:02}...",
                schedule.day, schedule.hour, schedule.minute
            );
            run_on_schedule(&processor, schedule).await?;
        }
        Some(period) => {
            let period = ReportingPeriod::parse(period)?;
            let summary = processor.run_monthly_report(Some(period)).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        None => {
            let summary = processor.run_monthly_report(None).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
