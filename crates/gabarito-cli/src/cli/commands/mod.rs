pub mod dispatch;
pub(crate) mod run;
pub(crate) mod summarize;

pub use dispatch::dispatch;
