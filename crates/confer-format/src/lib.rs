//! Document format processors for confer.
//!
//! A [`Processor`] turns document bytes into an ordered property mapping and
//! back. Three formats are supported:
//!
//! - [`PropertiesProcessor`]: `key=value` text (`.properties`)
//! - [`YamlProcessor`]: YAML (`.yaml`, `.yml`)
//! - [`JsonProcessor`]: JSON (`.json`)
//!
//! [`ProcessorSelector`] picks one by file-name suffix in that order and
//! never guesses: an unknown suffix is a [`FormatError::NoProcessor`].
//!
//! All processors are pure computation and safe to call inline from async
//! code.

pub mod error;
pub mod json;
pub mod processor;
pub mod properties;
pub mod selector;
pub mod yaml;

pub use error::{FormatError, FormatResult};
pub use json::JsonProcessor;
pub use processor::Processor;
pub use properties::PropertiesProcessor;
pub use selector::ProcessorSelector;
pub use yaml::YamlProcessor;
