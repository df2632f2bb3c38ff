use async_trait::async_trait;
use std::fmt::Display;
use uuid::Uuid;

/// A email ready to be handed to a provider, bodies are final, no
/// placeholder substitution happens beyond this point
#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: Option<String>,
    pub reply_to: Option<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,

    /// our message history id, tagged on providers that support it so
    /// asynchronous provider events can be correlated back
    pub message_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct ProviderResponse {
    /// message id assigned by the provider, if any
    pub provider_message_id: Option<String>,
}

/// Provider failures split by whether retrying can possibly help, this
/// classification drives in-slice retries and the failed_count bookkeeping
#[derive(Debug, Clone)]
pub enum ProviderError {
    /// timeouts, connection errors, provider 4xx throttling responses
    Retryable(String),

    /// rejected addresses, authentication failures, provider 5xx rejections
    Permanent(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Retryable(_))
    }
}

impl Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::Retryable(msg) => write!(f, "retryable provider error: {}", msg),
            ProviderError::Permanent(msg) => write!(f, "permanent provider error: {}", msg),
        }
    }
}

/// Minimum capability set of a email service provider
#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<ProviderResponse, ProviderError>;

    async fn test_connection(&self) -> Result<(), ProviderError>;
}
