use crate::aggregator::Extremum;
use crate::error::{ReportError, Result};
use crate::schema::ReportingPeriod;
use crate::utils::format_quantity;
use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub address: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl Sender {
    /// `"Name" <address>` when a display name is set.
    pub fn mailbox(&self) -> String {
        match &self.display_name {
            Some(name) if !name.trim().is_empty() => format!("\"{}\" <{}>", name, self.address),
            _ => self.address.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

/// Fully built email, handed to a [`MailTransport`] exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub from: Sender,
    pub recipients: BTreeSet<String>,
    pub subject: String,
    pub body_text: String,
    pub attachment: Attachment,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Delivers the message. Any error is treated as a failed run.
    async fn send(&self, message: &OutgoingMessage) -> Result<()>;
}

pub fn subject_for(period: ReportingPeriod) -> String {
    format!("Monthly Barcode Report - {}", period)
}

pub fn body_for(period: ReportingPeriod, top_department: &Extremum, top_item: &Extremum) -> String {
    format!(
        "Attached is the monthly barcode report for {}.\n\n\
         Highest quantity department: {} ({})\n\
         Highest quantity item: {} ({})\n",
        period,
        top_department.key_or("none"),
        format_quantity(top_department.qty),
        top_item.key_or("none"),
        format_quantity(top_item.qty)
    )
}

pub struct DispatchCoordinator<'a> {
    sender: &'a Sender,
    recipients: &'a [String],
    attachment_file_name: &'a str,
    transport: &'a dyn MailTransport,
}

impl<'a> DispatchCoordinator<'a> {
    pub fn new(
        sender: &'a Sender,
        recipients: &'a [String],
        attachment_file_name: &'a str,
        transport: &'a dyn MailTransport,
    ) -> Self {
        Self {
            sender,
            recipients,
            attachment_file_name,
            transport,
        }
    }

    pub fn build_message(
        &self,
        document: Vec<u8>,
        period: ReportingPeriod,
        top_department: &Extremum,
        top_item: &Extremum,
    ) -> Result<OutgoingMessage> {
        let recipients: BTreeSet<String> = self
            .recipients
            .iter()
            .map(|address| address.trim().to_string())
            .filter(|address| !address.is_empty())
            .collect();

        if recipients.is_empty() {
            return Err(ReportError::InvalidConfig(
                "no recipients configured for the report".to_string(),
            ));
        }

        let content_type = mime_guess::from_path(self.attachment_file_name)
            .first_or_octet_stream()
            .to_string();

        Ok(OutgoingMessage {
            from: self.sender.clone(),
            recipients,
            subject: subject_for(period),
            body_text: body_for(period, top_department, top_item),
            attachment: Attachment {
                file_name: self.attachment_file_name.to_string(),
                content_type,
                content: document,
            },
        })
    }

    /// Builds the message and makes a single delivery attempt.
    pub async fn dispatch(
        &self,
        document: Vec<u8>,
        period: ReportingPeriod,
        top_department: &Extremum,
        top_item: &Extremum,
    ) -> Result<OutgoingMessage> {
        let message = self.build_message(document, period, top_department, top_item)?;
        debug!(
            "Sending '{}' to {} recipients with {} byte attachment",
            message.subject,
            message.recipients.len(),
            message.attachment.content.len()
        );

        self.transport.send(&message).await.map_err(|e| match e {
            ReportError::DispatchFailure(reason) => ReportError::DispatchFailure(reason),
            other => ReportError::DispatchFailure(other.to_string()),
        })?;

        info!(
            "Report for {} delivered to {}",
            period,
            message
                .recipients
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(message)
    }
}

#[cfg(feature = "http")]
pub use http::HttpMailTransport;

#[cfg(feature = "smtp")]
pub use smtp::SmtpMailTransport;

#[cfg(feature = "smtp")]
mod smtp {
    use super::*;
    use crate::config::{SmtpConfig, SmtpSecurity};
    use lettre::message::header::ContentType;
    use lettre::message::{Attachment as MimeAttachment, Mailbox, MultiPart, SinglePart};
    use lettre::transport::smtp::authentication::Credentials;
    use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

    /// Delivers messages over SMTP with a single PDF attachment.
    pub struct SmtpMailTransport {
        mailer: AsyncSmtpTransport<Tokio1Executor>,
        host: String,
    }

    impl SmtpMailTransport {
        pub fn new(config: &SmtpConfig) -> Result<Self> {
            let builder = match config.security {
                SmtpSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host),
                SmtpSecurity::StartTls => {
                    AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                }
                SmtpSecurity::None => Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(
                    &config.host,
                )),
            }
            .map_err(|e| {
                ReportError::InvalidConfig(format!("SMTP relay '{}': {}", config.host, e))
            })?;

            let mut builder = builder.port(config.port);
            if let Some(username) = &config.username {
                let password = config.password.clone().unwrap_or_default();
                builder = builder.credentials(Credentials::new(username.clone(), password));
            }

            debug!(
                "SMTP transport for {}:{} ({:?})",
                config.host, config.port, config.security
            );

            Ok(Self {
                mailer: builder.build(),
                host: config.host.clone(),
            })
        }

        /// MIME message with a plain text body followed by the attachment.
        pub fn build_email(message: &OutgoingMessage) -> Result<Message> {
            let from: Mailbox = message.from.mailbox().parse().map_err(|e| {
                ReportError::InvalidConfig(format!(
                    "sender '{}' is not a valid mailbox: {}",
                    message.from.address, e
                ))
            })?;

            let mut builder = Message::builder().from(from).subject(message.subject.as_str());
            for recipient in &message.recipients {
                let to: Mailbox = recipient.parse().map_err(|e| {
                    ReportError::InvalidConfig(format!(
                        "recipient '{}' is not a valid mailbox: {}",
                        recipient, e
                    ))
                })?;
                builder = builder.to(to);
            }

            let content_type = ContentType::parse(&message.attachment.content_type).map_err(|e| {
                ReportError::DispatchFailure(format!(
                    "attachment content type '{}': {}",
                    message.attachment.content_type, e
                ))
            })?;
            let attachment = MimeAttachment::new(message.attachment.file_name.clone())
                .body(message.attachment.content.clone(), content_type);

            builder
                .multipart(
                    MultiPart::mixed()
                        .singlepart(SinglePart::plain(message.body_text.clone()))
                        .singlepart(attachment),
                )
                .map_err(|e| ReportError::DispatchFailure(format!("failed to build email: {}", e)))
        }
    }

    #[async_trait]
    impl MailTransport for SmtpMailTransport {
        async fn send(&self, message: &OutgoingMessage) -> Result<()> {
            let email = Self::build_email(message)?;
            self.mailer.send(email).await.map_err(|e| {
                ReportError::DispatchFailure(format!("SMTP relay {}: {}", self.host, e))
            })?;
            Ok(())
        }
    }

}

#[cfg(feature = "http")]
mod http {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use reqwest::Client;
    use serde_json::json;

    /// Delivers messages through an HTTP mail relay accepting a JSON envelope
    /// with base64 encoded attachments.
    #[derive(Clone)]
    pub struct HttpMailTransport {
        client: Client,
        endpoint: String,
        api_key: Option<String>,
    }

    impl HttpMailTransport {
        pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
            Self {
                client: Client::new(),
                endpoint: endpoint.into(),
                api_key,
            }
        }

        pub fn envelope(message: &OutgoingMessage) -> serde_json::Value {
            json!({
                "from": message.from.mailbox(),
                "to": message.recipients.iter().collect::<Vec<_>>(),
                "subject": message.subject,
                "text": message.body_text,
                "attachments": [{
                    "filename": message.attachment.file_name,
                    "content_type": message.attachment.content_type,
                    "content": STANDARD.encode(&message.attachment.content),
                }],
            })
        }
    }

    #[async_trait]
    impl MailTransport for HttpMailTransport {
        async fn send(&self, message: &OutgoingMessage) -> Result<()> {
            let mut request = self.client.post(&self.endpoint).json(&Self::envelope(message));
            if let Some(api_key) = &self.api_key {
                request = request.bearer_auth(api_key);
            }

            let res = request
                .send()
                .await
                .map_err(|e| ReportError::DispatchFailure(format!("{}: {}", self.endpoint, e)))?;

            let status = res.status();
            if !status.is_success() {
                let error_text = res.text().await.unwrap_or_default();
                return Err(ReportError::DispatchFailure(format!(
                    "Mail relay error (status {}): {}",
                    status, error_text
                )));
            }

            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_envelope_encodes_attachment() {
            let message = OutgoingMessage {
                from: Sender {
                    address: "reports@example.com".to_string(),
                    display_name: Some("PRD Prime Reports".to_string()),
                },
                recipients: ["b@example.com".to_string(), "a@example.com".to_string()]
                    .into_iter()
                    .collect(),
                subject: "Monthly Barcode Report - 3/2024".to_string(),
                body_text: "Attached".to_string(),
                attachment: Attachment {
                    file_name: "monthly-report.pdf".to_string(),
                    content_type: "application/pdf".to_string(),
                    content: b"%PDF".to_vec(),
                },
            };

            let envelope = HttpMailTransport::envelope(&message);
            assert_eq!(envelope["from"], "\"PRD Prime Reports\" <reports@example.com>");
            assert_eq!(envelope["to"][0], "a@example.com");
            assert_eq!(envelope["attachments"][0]["content"], "JVBERg==");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturingTransport {
        sent: Mutex<Vec<OutgoingMessage>>,
        fail_with: Option<String>,
    }

    #[async_trait]
    impl MailTransport for CapturingTransport {
        async fn send(&self, message: &OutgoingMessage) -> Result<()> {
            self.sent.lock().unwrap().push(message.clone());
            match &self.fail_with {
                Some(reason) => Err(ReportError::IoError(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    reason.clone(),
                ))),
                None => Ok(()),
            }
        }
    }

    fn sender() -> Sender {
        Sender {
            address: "reports@example.com".to_string(),
            display_name: None,
        }
    }

    fn tops() -> (Extremum, Extremum) {
        (
            Extremum {
                key: Some("X".to_string()),
                qty: Decimal::from(12),
            },
            Extremum {
                key: Some("B".to_string()),
                qty: Decimal::from(7),
            },
        )
    }

    #[test]
    fn test_message_is_templated_from_period_and_tops() {
        let transport = CapturingTransport::default();
        let sender = sender();
        let recipients = vec![
            "boss@example.com".to_string(),
            " ops@example.com ".to_string(),
            "boss@example.com".to_string(),
        ];
        let coordinator =
            DispatchCoordinator::new(&sender, &recipients, "monthly-report.pdf", &transport);
        let (department, item) = tops();
        let period = ReportingPeriod::new(2024, 3).unwrap();

        let message = coordinator
            .build_message(b"%PDF-1.4".to_vec(), period, &department, &item)
            .unwrap();

        assert_eq!(message.subject, "Monthly Barcode Report - 3/2024");
        assert!(message.body_text.contains("Highest quantity department: X (12)"));
        assert!(message.body_text.contains("Highest quantity item: B (7)"));
        assert_eq!(message.recipients.len(), 2);
        assert!(message.recipients.contains("ops@example.com"));
        assert_eq!(message.attachment.content_type, "application/pdf");
        assert_eq!(message.attachment.content, b"%PDF-1.4".to_vec());
    }

    #[test]
    fn test_body_for_empty_period() {
        let period = ReportingPeriod::new(2024, 3).unwrap();
        let body = body_for(period, &Extremum::none(), &Extremum::none());
        assert!(body.contains("Highest quantity item: none (0)"));
    }

    #[tokio::test]
    async fn test_transport_failure_is_dispatch_failure_without_retry() {
        let transport = CapturingTransport {
            fail_with: Some("relay offline".to_string()),
            ..Default::default()
        };
        let sender = sender();
        let recipients = vec!["boss@example.com".to_string()];
        let coordinator =
            DispatchCoordinator::new(&sender, &recipients, "monthly-report.pdf", &transport);
        let (department, item) = tops();
        let period = ReportingPeriod::new(2024, 3).unwrap();

        let err = coordinator
            .dispatch(vec![1, 2, 3], period, &department, &item)
            .await
            .unwrap_err();

        assert!(matches!(err, ReportError::DispatchFailure(ref reason) if reason.contains("relay offline")));
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_no_recipients_sends_nothing() {
        let transport = CapturingTransport::default();
        let sender = sender();
        let recipients = vec!["  ".to_string()];
        let coordinator =
            DispatchCoordinator::new(&sender, &recipients, "monthly-report.pdf", &transport);
        let period = ReportingPeriod::new(2024, 3).unwrap();

        let err = coordinator
            .dispatch(vec![], period, &Extremum::none(), &Extremum::none())
            .await
            .unwrap_err();

        assert_eq!(err.stage(), "config");
        assert!(transport.sent.lock().unwrap().is_empty());
    }
}
