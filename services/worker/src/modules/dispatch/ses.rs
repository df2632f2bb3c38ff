use super::provider::{EmailProvider, OutgoingEmail, ProviderError, ProviderResponse};
use async_trait::async_trait;
use aws_sdk_sesv2::{
    config::Region,
    error::SdkError,
    types::{Body, Content, Destination, EmailContent, Message, MessageTag},
    Client,
};

/// name of the tag correlating provider side events back to our message id
pub static MESSAGE_ID_TAG_NAME: &str = "message_uuid";

/// AWS SES backed provider
pub struct SesProvider {
    client: Client,
}

fn to_utf8_content(input: &str) -> Result<Content, ProviderError> {
    Content::builder()
        .data(input)
        .charset("UTF-8")
        .build()
        .map_err(|err| ProviderError::Permanent(format!("failed to build content: {}", err)))
}

impl SesProvider {
    pub async fn new(region: &str) -> SesProvider {
        let aws_cfg = aws_config::from_env()
            .region(Region::new(String::from(region)))
            .load()
            .await;

        SesProvider {
            client: Client::new(&aws_cfg),
        }
    }
}

#[async_trait]
impl EmailProvider for SesProvider {
    async fn send(&self, email: &OutgoingEmail) -> Result<ProviderResponse, ProviderError> {
        let body = Body::builder()
            .html(to_utf8_content(&email.html)?)
            .text(to_utf8_content(email.text.as_deref().unwrap_or_default())?)
            .build();

        let msg = Message::builder()
            .subject(to_utf8_content(&email.subject)?)
            .body(body)
            .build();

        let dest = Destination::builder()
            .to_addresses(email.to.clone())
            .set_cc_addresses(Some(email.cc.clone()).filter(|v| !v.is_empty()))
            .set_bcc_addresses(Some(email.bcc.clone()).filter(|v| !v.is_empty()))
            .build();

        let message_id_tag = MessageTag::builder()
            .name(MESSAGE_ID_TAG_NAME)
            .value(email.message_id.to_string())
            .build()
            .map_err(|err| ProviderError::Permanent(format!("failed to build email tag: {}", err)))?;

        let result = self
            .client
            .send_email()
            .from_email_address(email.from.clone())
            .destination(dest)
            .email_tags(message_id_tag)
            .set_reply_to_addresses(email.reply_to.clone().map(|r| vec![r]))
            .content(EmailContent::builder().simple(msg).build())
            .send()
            .await;

        match result {
            Ok(output) => Ok(ProviderResponse {
                provider_message_id: output.message_id().map(String::from),
            }),
            Err(SdkError::ServiceError(svc)) => {
                let err = svc.err();

                // throttling and paused sending recover by themselves,
                // everything else SES answers is a rejection
                if err.is_too_many_requests_exception()
                    || err.is_limit_exceeded_exception()
                    || err.is_sending_paused_exception()
                {
                    Err(ProviderError::Retryable(err.to_string()))
                } else {
                    Err(ProviderError::Permanent(err.to_string()))
                }
            }
            Err(err) => Err(ProviderError::Retryable(err.to_string())),
        }
    }

    async fn test_connection(&self) -> Result<(), ProviderError> {
        self.client
            .get_account()
            .send()
            .await
            .map(|_| ())
            .map_err(|err| ProviderError::Retryable(err.to_string()))
    }
}
