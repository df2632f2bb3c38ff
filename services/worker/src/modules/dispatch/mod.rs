pub mod breaker;
pub mod dispatcher;
pub mod provider;
pub mod rate_limit;
pub mod ses;
pub mod smtp;

pub use dispatcher::{Dispatcher, SendOutcome};
pub use provider::{EmailProvider, OutgoingEmail, ProviderError};
