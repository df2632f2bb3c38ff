use super::provider::{EmailProvider, OutgoingEmail, ProviderError, ProviderResponse};
use async_trait::async_trait;
use entity::email_integration::IntegrationSettings;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

/// SMTP relay backed provider
pub struct SmtpProvider {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

fn parse_mailbox(address: &str) -> Result<Mailbox, ProviderError> {
    address
        .parse::<Mailbox>()
        .map_err(|err| ProviderError::Permanent(format!("invalid address {}: {}", address, err)))
}

impl SmtpProvider {
    pub fn from_settings(settings: &IntegrationSettings) -> Result<SmtpProvider, ProviderError> {
        let host = settings
            .smtp_host
            .as_deref()
            .ok_or_else(|| ProviderError::Permanent(String::from("smtp host not configured")))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(host)
            .map_err(|err| ProviderError::Permanent(format!("invalid smtp relay: {}", err)))?;

        if let Some(port) = settings.smtp_port {
            builder = builder.port(port);
        }

        if let (Some(username), Some(password)) = (&settings.smtp_username, &settings.smtp_password)
        {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(SmtpProvider {
            transport: builder.build(),
        })
    }
}

#[async_trait]
impl EmailProvider for SmtpProvider {
    async fn send(&self, email: &OutgoingEmail) -> Result<ProviderResponse, ProviderError> {
        let mut builder = Message::builder()
            .from(parse_mailbox(&email.from)?)
            .to(parse_mailbox(&email.to)?)
            .subject(email.subject.clone());

        if let Some(reply_to) = &email.reply_to {
            builder = builder.reply_to(parse_mailbox(reply_to)?);
        }

        for cc in &email.cc {
            builder = builder.cc(parse_mailbox(cc)?);
        }

        for bcc in &email.bcc {
            builder = builder.bcc(parse_mailbox(bcc)?);
        }

        let message = match &email.text {
            Some(text) => builder
                .multipart(MultiPart::alternative_plain_html(
                    text.clone(),
                    email.html.clone(),
                ))
                .map_err(|err| ProviderError::Permanent(format!("failed to build email: {}", err)))?,
            None => builder
                .header(ContentType::TEXT_HTML)
                .body(email.html.clone())
                .map_err(|err| ProviderError::Permanent(format!("failed to build email: {}", err)))?,
        };

        match self.transport.send(message).await {
            Ok(response) => Ok(ProviderResponse {
                provider_message_id: response.message().next().map(String::from),
            }),
            Err(err) if err.is_permanent() => Err(ProviderError::Permanent(err.to_string())),

            // transient SMTP codes, connection refusals and timeouts all
            // stand a chance on a retry
            Err(err) => Err(ProviderError::Retryable(err.to_string())),
        }
    }

    async fn test_connection(&self) -> Result<(), ProviderError> {
        match self.transport.test_connection().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(ProviderError::Retryable(String::from(
                "smtp relay refused the connection test",
            ))),
            Err(err) => Err(ProviderError::Retryable(err.to_string())),
        }
    }
}
