use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{TypeError, TypeResult};
use crate::location::LocationBuilder;

/// The kind of backend a repository is served from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BackendKind {
    /// Object storage addressed by bucket and key (`s3://bucket/prefix/`).
    #[serde(rename = "s3", alias = "object")]
    ObjectStorage,
    /// Local filesystem directory (`file:///srv/config/`).
    #[serde(rename = "file", alias = "fs")]
    File,
    /// Resources embedded in the running binary (`classpath:/config/`).
    #[serde(rename = "classpath", alias = "embedded")]
    Classpath,
    /// A git repository read through a local clone.
    #[serde(rename = "git")]
    Git,
}

impl BackendKind {
    /// All known backend kinds, in registry order.
    pub const ALL: [BackendKind; 4] = [
        BackendKind::ObjectStorage,
        BackendKind::File,
        BackendKind::Classpath,
        BackendKind::Git,
    ];

    /// Canonical backend type string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ObjectStorage => "s3",
            Self::File => "file",
            Self::Classpath => "classpath",
            Self::Git => "git",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s3" | "object" => Ok(Self::ObjectStorage),
            "file" | "fs" => Ok(Self::File),
            "classpath" | "embedded" => Ok(Self::Classpath),
            "git" => Ok(Self::Git),
            other => Err(TypeError::UnknownBackend(other.to_string())),
        }
    }
}

/// Static description of one configured repository.
///
/// Definitions are loaded once by the host and handed to a stream source,
/// which only ever reads them. `options` is opaque here: each backend reads
/// the keys it understands (`branch`, `repo`, `create`, ...).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryDefinition {
    /// Name the repository is addressed by.
    pub name: String,
    /// Backend serving the repository.
    pub backend: BackendKind,
    /// Base location of the repository.
    pub uri: String,
    /// Default document name for directory-like request paths; also selects
    /// the format used for writes.
    #[serde(default)]
    pub file_name: String,
    /// Backend-specific settings.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl RepositoryDefinition {
    /// Create a definition without backend options.
    pub fn new(
        name: impl Into<String>,
        backend: BackendKind,
        uri: impl Into<String>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            backend,
            uri: uri.into(),
            file_name: file_name.into(),
            options: BTreeMap::new(),
        }
    }

    /// Builder-style option setter.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Look up a backend option.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Interpret a backend option as a boolean flag (`true`, `yes`, `1`).
    pub fn flag(&self, key: &str) -> bool {
        self.option(key)
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "1"))
            .unwrap_or(false)
    }

    /// Check the definition's invariants and that its base URI resolves.
    pub fn validate(&self) -> TypeResult<()> {
        if self.name.trim().is_empty() {
            return Err(self.invalid("repository name is empty"));
        }
        if self.uri.trim().is_empty() {
            return Err(self.invalid("base uri is empty"));
        }
        if self.file_name.contains(['/', '\\']) {
            return Err(self.invalid("file name must be a bare name without separators"));
        }
        self.location_builder().map(|_| ())
    }

    /// Build the resolver for this repository's locations.
    pub fn location_builder(&self) -> TypeResult<LocationBuilder> {
        LocationBuilder::new(&self.uri, &self.file_name)
    }

    fn invalid(&self, reason: &str) -> TypeError {
        TypeError::InvalidDefinition {
            name: self.name.clone(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_parsing() {
        assert_eq!("s3".parse::<BackendKind>().unwrap(), BackendKind::ObjectStorage);
        assert_eq!("FS".parse::<BackendKind>().unwrap(), BackendKind::File);
        assert_eq!("embedded".parse::<BackendKind>().unwrap(), BackendKind::Classpath);
        assert_eq!("git".parse::<BackendKind>().unwrap(), BackendKind::Git);
        assert!(matches!(
            "ftp".parse::<BackendKind>(),
            Err(TypeError::UnknownBackend(_))
        ));
    }

    #[test]
    fn backend_kind_display_round_trips() {
        for kind in BackendKind::ALL {
            assert_eq!(kind.to_string().parse::<BackendKind>().unwrap(), kind);
        }
    }

    #[test]
    fn definition_from_toml() {
        let doc = r#"
            name = "payments"
            backend = "s3"
            uri = "s3://config-bucket/payments/"
            file_name = "app.yaml"

            [options]
            region = "eu-west-1"
        "#;
        let def: RepositoryDefinition = toml::from_str(doc).unwrap();
        assert_eq!(def.backend, BackendKind::ObjectStorage);
        assert_eq!(def.option("region"), Some("eu-west-1"));
        def.validate().unwrap();
    }

    #[test]
    fn definition_aliases_deserialize() {
        let def: RepositoryDefinition =
            serde_json::from_str(r#"{"name":"x","backend":"fs","uri":"file:///tmp/"}"#).unwrap();
        assert_eq!(def.backend, BackendKind::File);
        assert!(def.file_name.is_empty());
        assert!(def.options.is_empty());
    }

    #[test]
    fn validation_failures() {
        let empty_uri = RepositoryDefinition::new("a", BackendKind::File, " ", "app.yaml");
        assert!(matches!(
            empty_uri.validate(),
            Err(TypeError::InvalidDefinition { .. })
        ));

        let nested_name =
            RepositoryDefinition::new("a", BackendKind::File, "file:///tmp/", "conf/app.yaml");
        assert!(matches!(
            nested_name.validate(),
            Err(TypeError::InvalidDefinition { .. })
        ));

        let bad_uri = RepositoryDefinition::new("a", BackendKind::File, "::", "app.yaml");
        assert!(matches!(
            bad_uri.validate(),
            Err(TypeError::InvalidLocation { .. })
        ));
    }

    #[test]
    fn flags() {
        let def = RepositoryDefinition::new("a", BackendKind::Git, "git:/", "app.yaml")
            .with_option("push", "Yes")
            .with_option("create", "no");
        assert!(def.flag("push"));
        assert!(!def.flag("create"));
        assert!(!def.flag("missing"));
    }
}
