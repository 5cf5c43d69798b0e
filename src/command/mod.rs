mod clip;
mod parser;
pub mod dispatcher;

pub use clip::{parse_clip, parse_time};
pub use parser::{parse_url, Command, ParseError, Trigger, Verb};
