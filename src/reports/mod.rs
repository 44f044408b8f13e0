pub mod formatters;

pub use formatters::{formatter_for, EventFormatter, JsonFormatter, TextFormatter};
