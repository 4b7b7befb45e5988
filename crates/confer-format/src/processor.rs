use confer_types::Properties;

use crate::error::{FormatError, FormatResult};

/// A format-specific decode/encode pair.
///
/// Implementations are pure: no I/O, no shared state. Round trips must hold
/// for every mapping the format can represent: `decode(encode(m)) == m`.
pub trait Processor: Send + Sync {
    /// Short format name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Whether this processor handles documents named `file_name`.
    fn matches(&self, file_name: &str) -> bool;

    /// Parse `data` into an ordered property mapping.
    fn decode(&self, data: &[u8]) -> FormatResult<Properties>;

    /// Serialize `properties` into document bytes.
    fn encode(&self, properties: &Properties) -> FormatResult<Vec<u8>>;
}

/// Case-insensitive suffix check on the last path segment of `file_name`,
/// ignoring any query string.
pub(crate) fn has_extension(file_name: &str, extensions: &[&str]) -> bool {
    let name = file_name.split(['?', '#']).next().unwrap_or_default();
    let name = name.rsplit('/').next().unwrap_or_default();
    let Some((stem, ext)) = name.rsplit_once('.') else {
        return false;
    };
    !stem.is_empty() && extensions.iter().any(|e| ext.eq_ignore_ascii_case(e))
}

/// Text view of a document body, without a UTF-8 byte order mark.
pub(crate) fn document_text<'a>(format: &'static str, data: &'a [u8]) -> FormatResult<&'a str> {
    let text = std::str::from_utf8(data).map_err(|e| FormatError::decode(format, e))?;
    Ok(text.strip_prefix('\u{feff}').unwrap_or(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_matching() {
        assert!(has_extension("app.yaml", &["yaml", "yml"]));
        assert!(has_extension("APP.YML", &["yaml", "yml"]));
        assert!(has_extension("s3://b/config/app.json?versionId=2", &["json"]));
        assert!(!has_extension("app.yaml.bak", &["yaml"]));
        assert!(!has_extension(".yaml", &["yaml"]));
        assert!(!has_extension("yaml", &["yaml"]));
        assert!(!has_extension("dir.json/app", &["json"]));
    }

    #[test]
    fn bom_is_stripped() {
        let text = document_text("test", "\u{feff}a=1".as_bytes()).unwrap();
        assert_eq!(text, "a=1");
        assert!(document_text("test", &[0xff, 0xfe]).is_err());
    }
}
