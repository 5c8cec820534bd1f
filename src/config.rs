use crate::dispatch::{MailTransport, Sender};
use crate::error::{ReportError, Result};
use crate::schedule::MonthlySchedule;
use crate::source::{FileRecordSource, RecordSource};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_organization_name() -> String {
    "PRD Prime".to_string()
}

fn default_attachment_file_name() -> String {
    "monthly-report.pdf".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataSourceConfig {
    File { path: PathBuf },
    Http { url: String },
}

impl DataSourceConfig {
    pub fn build(&self) -> Result<Box<dyn RecordSource>> {
        match self {
            DataSourceConfig::File { path } => Ok(Box::new(FileRecordSource::new(path.clone()))),
            #[cfg(feature = "http")]
            DataSourceConfig::Http { url } => {
                Ok(Box::new(crate::source::HttpRecordSource::new(url.clone())))
            }
            #[cfg(not(feature = "http"))]
            DataSourceConfig::Http { url } => Err(ReportError::InvalidConfig(format!(
                "HTTP source {} requires the 'http' feature",
                url
            ))),
        }
    }
}

fn default_smtp_port() -> u16 {
    465
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmtpSecurity {
    /// TLS from the first byte, usually port 465.
    #[default]
    Tls,
    /// Plain connection upgraded with STARTTLS, usually port 587.
    StartTls,
    /// Unencrypted, for local relays only.
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    /// Usually left out of the file and supplied from the environment.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default)]
    pub security: SmtpSecurity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailRelayConfig {
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// How the finished report leaves the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MailTransportConfig {
    Smtp(SmtpConfig),
    Http(MailRelayConfig),
}

impl MailTransportConfig {
    pub fn validate(&self) -> Result<()> {
        match self {
            MailTransportConfig::Smtp(smtp) => {
                if smtp.host.trim().is_empty() {
                    return Err(ReportError::InvalidConfig(
                        "smtp host must not be empty".to_string(),
                    ));
                }
                if smtp.port == 0 {
                    return Err(ReportError::InvalidConfig(
                        "smtp port must not be 0".to_string(),
                    ));
                }
            }
            MailTransportConfig::Http(relay) => {
                if relay.endpoint.trim().is_empty() {
                    return Err(ReportError::InvalidConfig(
                        "mail relay endpoint must not be empty".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn build(&self) -> Result<Box<dyn MailTransport>> {
        match self {
            #[cfg(feature = "smtp")]
            MailTransportConfig::Smtp(smtp) => {
                Ok(Box::new(crate::dispatch::SmtpMailTransport::new(smtp)?))
            }
            #[cfg(not(feature = "smtp"))]
            MailTransportConfig::Smtp(smtp) => Err(ReportError::InvalidConfig(format!(
                "SMTP relay {} requires the 'smtp' feature",
                smtp.host
            ))),
            #[cfg(feature = "http")]
            MailTransportConfig::Http(relay) => Ok(Box::new(
                crate::dispatch::HttpMailTransport::new(relay.endpoint.clone(), relay.api_key.clone()),
            )),
            #[cfg(not(feature = "http"))]
            MailTransportConfig::Http(relay) => Err(ReportError::InvalidConfig(format!(
                "mail relay {} requires the 'http' feature",
                relay.endpoint
            ))),
        }
    }
}

/// Everything a report run needs besides the records themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_organization_name")]
    pub organization_name: String,

    pub sender: Sender,

    pub recipients: Vec<String>,

    #[serde(default = "default_attachment_file_name")]
    pub attachment_file_name: String,

    /// Directory the rendered document is kept in after each run.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    pub source: DataSourceConfig,

    #[serde(default)]
    pub mail: Option<MailTransportConfig>,

    #[serde(default)]
    pub schedule: MonthlySchedule,
}

impl ReportConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let mut config: ReportConfig = serde_json::from_str(json)?;
        if config.sender.display_name.is_none() {
            config.sender.display_name = Some(format!("{} Reports", config.organization_name));
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let body = std::fs::read_to_string(path)?;
        Self::from_json_str(&body)
    }

    pub fn validate(&self) -> Result<()> {
        if self.organization_name.trim().is_empty() {
            return Err(ReportError::InvalidConfig(
                "organization_name must not be empty".to_string(),
            ));
        }

        if !is_plausible_address(&self.sender.address) {
            return Err(ReportError::InvalidConfig(format!(
                "sender address '{}' is not an email address",
                self.sender.address
            )));
        }

        if self.recipients.is_empty() {
            return Err(ReportError::InvalidConfig(
                "at least one recipient is required".to_string(),
            ));
        }

        if let Some(bad) = self.recipients.iter().find(|r| !is_plausible_address(r)) {
            return Err(ReportError::InvalidConfig(format!(
                "recipient '{}' is not an email address",
                bad
            )));
        }

        if self.attachment_file_name.trim().is_empty()
            || self.attachment_file_name.contains(['/', '\\'])
        {
            return Err(ReportError::InvalidConfig(format!(
                "attachment_file_name '{}' must be a plain file name",
                self.attachment_file_name
            )));
        }

        if let Some(mail) = &self.mail {
            mail.validate()?;
        }

        self.schedule.validate()?;
        Ok(())
    }

    /// Where the document of a run is retained, if anywhere.
    pub fn retained_document_path(&self) -> Option<PathBuf> {
        self.output_dir
            .as_ref()
            .map(|dir| dir.join(&self.attachment_file_name))
    }
}

fn is_plausible_address(address: &str) -> bool {
    let address = address.trim();
    match address.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && !address.contains(char::is_whitespace)
        }
        None => false,
    }
}
