use confer_types::{Properties, Value};

use crate::error::{FormatError, FormatResult};
use crate::processor::{document_text, has_extension, Processor};

const FORMAT: &str = "json";

/// Processor for `.json` documents. The top-level value must be an object;
/// an empty document decodes to an empty mapping.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonProcessor;

impl Processor for JsonProcessor {
    fn name(&self) -> &'static str {
        FORMAT
    }

    fn matches(&self, file_name: &str) -> bool {
        has_extension(file_name, &["json"])
    }

    fn decode(&self, data: &[u8]) -> FormatResult<Properties> {
        let text = document_text(FORMAT, data)?;
        if text.trim().is_empty() {
            return Ok(Properties::new());
        }
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(FormatError::decode(
                FORMAT,
                format!("top-level value must be an object, found {}", kind(&other)),
            )),
            Err(e) => Err(FormatError::decode(FORMAT, e)),
        }
    }

    fn encode(&self, properties: &Properties) -> FormatResult<Vec<u8>> {
        let mut out =
            serde_json::to_vec_pretty(properties).map_err(|e| FormatError::encode(FORMAT, e))?;
        out.push(b'\n');
        Ok(out)
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
