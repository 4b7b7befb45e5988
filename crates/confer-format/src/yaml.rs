use confer_types::{Number, Properties, Value};
use serde_yaml::Value as Yaml;

use crate::error::{FormatError, FormatResult};
use crate::processor::{document_text, has_extension, Processor};

const FORMAT: &str = "yaml";

/// Processor for `.yaml` / `.yml` documents.
///
/// The top-level node must be a mapping (an empty document decodes to an
/// empty mapping). Scalar mapping keys are converted to their text form;
/// tags are dropped in favour of the tagged value.
#[derive(Clone, Copy, Debug, Default)]
pub struct YamlProcessor;

impl Processor for YamlProcessor {
    fn name(&self) -> &'static str {
        FORMAT
    }

    fn matches(&self, file_name: &str) -> bool {
        has_extension(file_name, &["yaml", "yml"])
    }

    fn decode(&self, data: &[u8]) -> FormatResult<Properties> {
        let text = document_text(FORMAT, data)?;
        if text.trim().is_empty() {
            return Ok(Properties::new());
        }
        let document: Yaml =
            serde_yaml::from_str(text).map_err(|e| FormatError::decode(FORMAT, e))?;
        match document {
            Yaml::Null => Ok(Properties::new()),
            Yaml::Mapping(_) | Yaml::Tagged(_) => match to_value(document)? {
                Value::Object(map) => Ok(map),
                _ => Err(FormatError::decode(
                    FORMAT,
                    "top-level document must be a mapping",
                )),
            },
            _ => Err(FormatError::decode(
                FORMAT,
                "top-level document must be a mapping",
            )),
        }
    }

    fn encode(&self, properties: &Properties) -> FormatResult<Vec<u8>> {
        serde_yaml::to_string(properties)
            .map(String::into_bytes)
            .map_err(|e| FormatError::encode(FORMAT, e))
    }
}

fn to_value(node: Yaml) -> FormatResult<Value> {
    Ok(match node {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Bool(b),
        Yaml::Number(n) => Value::Number(to_number(&n)?),
        Yaml::String(s) => Value::String(s),
        Yaml::Sequence(items) => Value::Array(
            items
                .into_iter()
                .map(to_value)
                .collect::<FormatResult<Vec<_>>>()?,
        ),
        Yaml::Mapping(mapping) => {
            let mut map = Properties::new();
            for (key, value) in mapping {
                map.insert(key_text(key)?, to_value(value)?);
            }
            Value::Object(map)
        }
        Yaml::Tagged(tagged) => to_value(tagged.value)?,
    })
}

fn to_number(n: &serde_yaml::Number) -> FormatResult<Number> {
    if let Some(u) = n.as_u64() {
        return Ok(Number::from(u));
    }
    if let Some(i) = n.as_i64() {
        return Ok(Number::from(i));
    }
    let f = n.as_f64().unwrap_or(f64::NAN);
    Number::from_f64(f)
        .ok_or_else(|| FormatError::decode(FORMAT, format!("non-finite number {n} is not supported")))
}

fn key_text(key: Yaml) -> FormatResult<String> {
    match key {
        Yaml::String(s) => Ok(s),
        Yaml::Number(n) => Ok(n.to_string()),
        Yaml::Bool(b) => Ok(b.to_string()),
        Yaml::Null => Ok("null".to_string()),
        Yaml::Tagged(tagged) => key_text(tagged.value),
        Yaml::Sequence(_) | Yaml::Mapping(_) => Err(FormatError::decode(
            FORMAT,
            "complex mapping keys are not supported",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn decode(text: &str) -> FormatResult<Properties> {
        YamlProcessor.decode(text.as_bytes())
    }

    #[test]
    fn matches_yaml_extensions() {
        assert!(YamlProcessor.matches("app.yaml"));
        assert!(YamlProcessor.matches("app.yml"));
        assert!(!YamlProcessor.matches("app.json"));
    }

    #[test]
    fn decode_simple_mapping() {
        let props = decode("key: value").unwrap();
        assert_eq!(Value::Object(props), json!({"key": "value"}));
    }

    #[test]
    fn decode_nested_structures_in_order() {
        let props = decode(
            "server:\n  port: 8080\n  hosts:\n    - a\n    - b\nratio: 0.5\nenabled: true\nempty: ~\n",
        )
        .unwrap();
        let keys: Vec<&str> = props.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["server", "ratio", "enabled", "empty"]);
        assert_eq!(
            Value::Object(props),
            json!({
                "server": {"port": 8080, "hosts": ["a", "b"]},
                "ratio": 0.5,
                "enabled": true,
                "empty": null,
            })
        );
    }

    #[test]
    fn scalar_keys_become_text() {
        let props = decode("1: one\ntrue: yes\n").unwrap();
        assert_eq!(props["1"], json!("one"));
        assert_eq!(props["true"], json!("yes"));
    }

    #[test]
    fn empty_document_is_empty_mapping() {
        assert!(decode("").unwrap().is_empty());
        assert!(decode("# nothing\n").unwrap().is_empty());
        assert!(decode("~").unwrap().is_empty());
    }

    #[test]
    fn rejects_non_mapping_documents() {
        assert!(matches!(decode("- a\n- b\n"), Err(FormatError::Decode { .. })));
        assert!(matches!(decode("just text"), Err(FormatError::Decode { .. })));
        assert!(matches!(decode("a: [unclosed"), Err(FormatError::Decode { .. })));
        assert!(matches!(decode("x: .nan"), Err(FormatError::Decode { .. })));
    }

    #[test]
    fn ambiguous_strings_survive_round_trip() {
        let Value::Object(props) = json!({
            "port": "8080",
            "flag": "true",
            "nothing": "null",
            "padded": "  spaced  ",
            "multi": "line one\nline two",
        }) else {
            unreachable!()
        };
        let encoded = YamlProcessor.encode(&props).unwrap();
        assert_eq!(YamlProcessor.decode(&encoded).unwrap(), props);
    }

    #[test]
    fn unicode_and_control_characters_survive_round_trip() {
        let Value::Object(props) = json!({
            "größe": "naïve café ☕",
            "tab\tkey": "bell\u{7} and nul\u{0}",
            "日本": "line\r\nbreak\n",
            "emoji 🚀": ["\u{85}", "\u{2028}", " lead"],
        }) else {
            unreachable!()
        };
        let encoded = YamlProcessor.encode(&props).unwrap();
        assert_eq!(YamlProcessor.decode(&encoded).unwrap(), props);
    }

    fn leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            any::<u64>().prop_map(Value::from),
            (-1.0e6f64..1.0e6).prop_map(Value::from),
            "(?s).{0,12}".prop_map(Value::String),
        ]
    }

    fn tree() -> impl Strategy<Value = Value> {
        leaf().prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                proptest::collection::vec((".{1,6}", inner), 0..4)
                    .prop_map(|entries| Value::Object(entries.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn decode_encode_round_trip(
            entries in proptest::collection::vec((".{1,8}", tree()), 0..5)
        ) {
            let props: Properties = entries.into_iter().collect();
            let encoded = YamlProcessor.encode(&props).unwrap();
            let decoded = YamlProcessor.decode(&encoded).unwrap();
            prop_assert_eq!(decoded, props);
        }
    }
}
