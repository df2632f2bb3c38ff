pub mod fanout;
pub mod signer;

pub use fanout::EventBus;
