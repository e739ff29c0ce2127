//! Judge provider backends.
//!
//! [`llm`] covers synchronous chat calls, [`batch`] the asynchronous bulk API.
//! Both share the status mapping in `http`.

pub mod batch;
pub(crate) mod http;
pub mod llm;
