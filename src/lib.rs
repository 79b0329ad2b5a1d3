pub mod api;
pub mod args;
mod config;
pub mod dates;
mod error;
pub mod fetch;
pub mod pipeline;
pub mod publish;
pub mod table;
mod utils;

#[cfg(test)]
mod test;

pub use api::Mode;
pub use config::{Config, MissingSpreadsheet};
pub use error::{PipelineError, Result};
pub use pipeline::{run, Outcome, State};
