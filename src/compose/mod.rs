//! Compose-style group documents.
//!
//! A group document is a YAML file with a `services` mapping. Each service
//! becomes a [`ContainerSpec`]; the spec hash over its semantic fields decides
//! whether a running container still matches.

pub mod parser;
pub mod types;

pub use parser::ComposeParser;
pub use types::{ContainerSpec, GroupSpec, ParsedGroup, PortMapping, RestartPolicy};

use crate::error::ParseError;

/// Parse a group document. Pure; no I/O.
pub fn parse(raw_text: &str) -> Result<ParsedGroup, ParseError> {
    ComposeParser::parse(raw_text)
}
