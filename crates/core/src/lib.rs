// crates/core/src/lib.rs
pub mod cache;
pub mod chain;
pub mod discovery;
pub mod error;
pub mod history;
pub mod message_filter;
pub mod parser;
pub mod query;
pub mod session_info;
pub mod tool_metrics;
pub mod types;

pub use cache::*;
pub use chain::*;
pub use discovery::*;
pub use error::*;
pub use history::*;
pub use parser::*;
pub use query::*;
pub use session_info::*;
pub use tool_metrics::*;
pub use types::*;
