use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use confer_source::{ResourceBundle, SourceRegistry};
use confer_types::RepositoryDefinition;
use serde::{Deserialize, Serialize};

/// Contents of `confer.toml`.
///
/// ```toml
/// resources = "defaults"
///
/// [[repos]]
/// name = "payments"
/// backend = "file"
/// uri = "file:///srv/config/payments/"
/// file_name = "app.yaml"
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConferConfig {
    /// Directory served to `classpath` repositories.
    #[serde(default)]
    pub resources: Option<PathBuf>,

    #[serde(default)]
    pub repos: Vec<RepositoryDefinition>,
}

impl ConferConfig {
    /// Load and validate the file at `path`.
    ///
    /// A relative `resources` directory is taken relative to the file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        let mut config = Self::from_toml(&text)
            .with_context(|| format!("invalid config file {}", path.display()))?;

        if let (Some(resources), Some(dir)) = (&config.resources, path.parent()) {
            if resources.is_relative() {
                config.resources = Some(dir.join(resources));
            }
        }
        Ok(config)
    }

    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let mut seen = HashSet::new();
        for repo in &self.repos {
            repo.validate()?;
            if !seen.insert(repo.name.as_str()) {
                bail!("repository {:?} is defined more than once", repo.name);
            }
        }
        Ok(())
    }

    pub fn repo(&self, name: &str) -> anyhow::Result<&RepositoryDefinition> {
        match self.repos.iter().find(|r| r.name == name) {
            Some(repo) => Ok(repo),
            None => bail!("no repository named {name:?} in config"),
        }
    }

    /// Registry for the backends this binary can serve.
    ///
    /// Object storage needs a client supplied by the embedding host, so it is
    /// not available here.
    pub fn registry(&self) -> anyhow::Result<SourceRegistry> {
        let registry = SourceRegistry::builtin();
        match &self.resources {
            Some(dir) => {
                let bundle = ResourceBundle::load_dir(dir)
                    .with_context(|| format!("cannot load resources from {}", dir.display()))?;
                Ok(registry.with_embedded(Arc::new(bundle)))
            }
            None => Ok(registry),
        }
    }
}

#[cfg(test)]
mod tests {
    use confer_types::BackendKind;

    use super::*;

    const SAMPLE: &str = r#"
        [[repos]]
        name = "payments"
        backend = "file"
        uri = "file:///srv/config/payments/"
        file_name = "app.yaml"

        [[repos]]
        name = "history"
        backend = "git"
        uri = "git:/services/"
        file_name = "app.properties"

        [repos.options]
        repo = "/var/lib/confer/history"
        branch = "release"
    "#;

    #[test]
    fn parses_repositories() {
        let config = ConferConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.repos.len(), 2);
        let history = config.repo("history").unwrap();
        assert_eq!(history.backend, BackendKind::Git);
        assert_eq!(history.option("branch"), Some("release"));
        assert!(config.repo("missing").is_err());
    }

    #[test]
    fn rejects_duplicate_names() {
        let doc = r#"
            [[repos]]
            name = "a"
            backend = "file"
            uri = "file:///x/"
            [[repos]]
            name = "a"
            backend = "file"
            uri = "file:///y/"
        "#;
        assert!(ConferConfig::from_toml(doc).is_err());
    }

    #[test]
    fn rejects_invalid_definitions() {
        let doc = r#"
            [[repos]]
            name = "a"
            backend = "file"
            uri = ""
        "#;
        assert!(ConferConfig::from_toml(doc).is_err());
    }

    #[test]
    fn relative_resources_follow_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("confer.toml");
        std::fs::write(&path, "resources = \"defaults\"\n").unwrap();
        let config = ConferConfig::load(&path).unwrap();
        assert_eq!(config.resources, Some(dir.path().join("defaults")));
    }

    #[test]
    fn registry_includes_embedded_only_with_resources() {
        let config = ConferConfig::default();
        assert!(!config.registry().unwrap().supports(BackendKind::Classpath));

        let dir = tempfile::tempdir().unwrap();
        let config = ConferConfig {
            resources: Some(dir.path().to_path_buf()),
            repos: Vec::new(),
        };
        assert!(config.registry().unwrap().supports(BackendKind::Classpath));
    }
}
