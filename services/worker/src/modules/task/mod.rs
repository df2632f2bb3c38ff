pub mod dto;
pub mod processor;
pub mod routes;
pub mod runtime;

pub use processor::{ProcessorContext, SliceOutcome, TaskProcessor};
pub use runtime::TaskRuntime;
