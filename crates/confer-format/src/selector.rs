use confer_types::Properties;

use crate::error::{FormatError, FormatResult};
use crate::json::JsonProcessor;
use crate::processor::Processor;
use crate::properties::PropertiesProcessor;
use crate::yaml::YamlProcessor;

/// Picks a processor for a file name.
///
/// Processors are tried in a fixed order and the first match wins. There is
/// no fallback format: an unrecognized name fails with
/// [`FormatError::NoProcessor`].
pub struct ProcessorSelector {
    processors: Vec<Box<dyn Processor>>,
}

impl ProcessorSelector {
    /// Properties text, then YAML, then JSON.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(PropertiesProcessor),
            Box::new(YamlProcessor),
            Box::new(JsonProcessor),
        ])
    }

    /// A selector over `processors`, tried in the given order.
    pub fn new(processors: Vec<Box<dyn Processor>>) -> Self {
        Self { processors }
    }

    /// The first processor matching `file_name`.
    pub fn select(&self, file_name: &str) -> FormatResult<&dyn Processor> {
        self.processors
            .iter()
            .find(|p| p.matches(file_name))
            .map(|p| p.as_ref())
            .ok_or_else(|| FormatError::NoProcessor {
                file_name: file_name.to_string(),
            })
    }

    /// Decode `data` with the processor for `file_name`.
    pub fn decode(&self, file_name: &str, data: &[u8]) -> FormatResult<Properties> {
        self.select(file_name)?.decode(data)
    }

    /// Encode `properties` with the processor for `file_name`.
    pub fn encode(&self, file_name: &str, properties: &Properties) -> FormatResult<Vec<u8>> {
        self.select(file_name)?.encode(properties)
    }

    /// Names of the registered processors, in selection order.
    pub fn names(&self) -> Vec<&'static str> {
        self.processors.iter().map(|p| p.name()).collect()
    }
}

impl Default for ProcessorSelector {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for ProcessorSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorSelector")
            .field("processors", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Everything;

    impl Processor for Everything {
        fn name(&self) -> &'static str {
            "everything"
        }
        fn matches(&self, _file_name: &str) -> bool {
            true
        }
        fn decode(&self, _data: &[u8]) -> FormatResult<Properties> {
            Ok(Properties::new())
        }
        fn encode(&self, _properties: &Properties) -> FormatResult<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn standard_order() {
        assert_eq!(
            ProcessorSelector::standard().names(),
            vec!["properties", "yaml", "json"]
        );
    }

    #[test]
    fn selects_by_suffix() {
        let selector = ProcessorSelector::standard();
        assert_eq!(selector.select("a.properties").unwrap().name(), "properties");
        assert_eq!(selector.select("s3://b/c/a.yml").unwrap().name(), "yaml");
        assert_eq!(selector.select("file:///x/a.JSON").unwrap().name(), "json");
    }

    #[test]
    fn unknown_names_have_no_processor() {
        let selector = ProcessorSelector::standard();
        for name in ["app.toml", "app", "", "app.yaml.orig"] {
            assert_eq!(
                selector.select(name).err().unwrap(),
                FormatError::NoProcessor {
                    file_name: name.to_string()
                }
            );
        }
    }

    #[test]
    fn first_match_wins() {
        let selector = ProcessorSelector::new(vec![Box::new(Everything), Box::new(JsonProcessor)]);
        assert_eq!(selector.select("a.json").unwrap().name(), "everything");
    }

    #[test]
    fn decode_and_encode_dispatch() {
        let selector = ProcessorSelector::standard();
        let props = selector.decode("app.yaml", b"key: value").unwrap();
        assert_eq!(props["key"], json!("value"));

        let bytes = selector.encode("app.properties", &props).unwrap();
        assert_eq!(bytes, b"key=value\n");
    }
}
