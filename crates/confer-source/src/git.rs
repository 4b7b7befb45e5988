//! Git-backed repositories, read through a local clone with the system
//! `git` executable.
//!
//! Reads come from the committed tree of the configured branch, never from
//! the worktree, so uncommitted edits are invisible. Writes update the
//! worktree file and commit it; with `push = "true"` the commit is pushed to
//! `origin`.
//!
//! Options:
//!
//! | key | meaning |
//! |-----|---------|
//! | `repo` | local clone directory (required) |
//! | `remote` | cloned into `repo` at `init` when the directory is absent |
//! | `branch` | branch to read and commit to, default `main` |
//! | `push` | push after each commit |
//! | `author_name`, `author_email` | commit identity |

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use confer_format::ProcessorSelector;
use confer_types::{
    backend_key, BackendKind, LocationBuilder, RepositoryDefinition, StreamPacket, TypeError,
};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace};

use crate::context::SourceContext;
use crate::error::{SourceError, SourceResult};
use crate::lifecycle::LifecycleState;
use crate::traits::{StreamSource, WriteRequest};

const DEFAULT_BRANCH: &str = "main";
const DEFAULT_AUTHOR: &str = "confer";
const DEFAULT_EMAIL: &str = "confer@localhost";

#[derive(Clone, Debug)]
struct GitSettings {
    repo: PathBuf,
    remote: Option<String>,
    branch: String,
    push: bool,
    author_name: String,
    author_email: String,
}

impl GitSettings {
    fn from_definition(definition: &RepositoryDefinition) -> SourceResult<Self> {
        let repo = definition
            .option("repo")
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| TypeError::InvalidDefinition {
                name: definition.name.clone(),
                reason: "git repositories need a `repo` option naming the local clone".into(),
            })?;
        let option_or = |key: &str, default: &str| {
            definition
                .option(key)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
                .to_string()
        };
        Ok(Self {
            repo: PathBuf::from(repo),
            remote: definition.option("remote").map(str::to_string),
            branch: option_or("branch", DEFAULT_BRANCH),
            push: definition.flag("push"),
            author_name: option_or("author_name", DEFAULT_AUTHOR),
            author_email: option_or("author_email", DEFAULT_EMAIL),
        })
    }
}

/// A ready local clone.
#[derive(Debug)]
struct Worktree {
    settings: GitSettings,
    /// Serializes add/commit/push; git's index lock admits one writer.
    write_lock: Mutex<()>,
}

impl Worktree {
    /// Run git inside the clone and require success.
    async fn git<I, S>(&self, args: I) -> SourceResult<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self.git_status(args).await?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(self.failure(&output))
        }
    }

    /// Run git inside the clone, leaving the exit status to the caller.
    async fn git_status<I, S>(&self, args: I) -> SourceResult<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new("git");
        command.arg("-C").arg(&self.settings.repo).args(args);
        run(command, &self.settings.repo).await
    }

    fn failure(&self, output: &Output) -> SourceError {
        failure(self.settings.repo.display(), output)
    }

    /// Blob id of `key` on the configured branch, `None` if absent.
    async fn blob_id(&self, key: &str) -> SourceResult<Option<String>> {
        let revision = format!("{}:{}", self.settings.branch, key);
        let output = self
            .git_status(["rev-parse", "--verify", "--quiet", revision.as_str()])
            .await?;
        match output.status.code() {
            Some(0) => Ok(Some(stdout_line(&output))),
            Some(1) => Ok(None),
            _ => Err(self.failure(&output)),
        }
    }

    async fn read_blob(&self, id: &str) -> SourceResult<Bytes> {
        let output = self.git(["cat-file", "blob", id]).await?;
        Ok(Bytes::from(output.stdout))
    }

    /// Commit currently at the tip of the branch, `None` before the first
    /// commit.
    async fn head(&self) -> SourceResult<Option<String>> {
        let output = self
            .git_status(["rev-parse", "--verify", "--quiet", "HEAD"])
            .await?;
        match output.status.code() {
            Some(0) => Ok(Some(stdout_line(&output))),
            Some(1) | Some(128) => Ok(None),
            _ => Err(self.failure(&output)),
        }
    }

    /// Worktree path for `key`. Keys must stay inside the clone and out of
    /// its `.git` directory.
    fn worktree_path(&self, key: &str) -> SourceResult<PathBuf> {
        let segments: Vec<&str> = key.split('/').collect();
        let invalid = segments
            .iter()
            .any(|s| s.is_empty() || *s == "." || *s == ".." || s.contains('\\'))
            || segments.first().is_some_and(|s| s.eq_ignore_ascii_case(".git"));
        if invalid {
            return Err(TypeError::InvalidLocation {
                location: key.to_string(),
                reason: "key does not name a file inside the clone".to_string(),
            }
            .into());
        }
        Ok(segments
            .iter()
            .fold(self.settings.repo.clone(), |path, segment| path.join(segment)))
    }

    /// Write, commit and optionally push `key`. Returns the commit id.
    ///
    /// A failed step rolls the branch, index entry and worktree file back to
    /// their state before the call.
    async fn commit(&self, key: &str, data: &[u8]) -> SourceResult<String> {
        let _guard = self.write_lock.lock().await;
        let path = self.worktree_path(key)?;
        let before = Snapshot {
            head: self.head().await?,
            file: match tokio::fs::read(&path).await {
                Ok(existing) => Some(existing),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => return Err(SourceError::backend(path.display(), None, e)),
            },
        };

        match self.record(key, &path, data).await {
            Ok(commit) => Ok(commit),
            Err(err) => {
                match self.restore(key, &path, &before).await {
                    Ok(()) => debug!(key = %key, "rolled back failed write"),
                    Err(e) => error!(key = %key, error = %e, "could not roll back failed write"),
                }
                Err(err)
            }
        }
    }

    async fn record(&self, key: &str, path: &Path, data: &[u8]) -> SourceResult<String> {
        let settings = &self.settings;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SourceError::backend(path.display(), None, e))?;
        }
        tokio::fs::write(path, data)
            .await
            .map_err(|e| SourceError::backend(path.display(), None, e))?;

        self.git(["add", "--", key]).await?;
        let name = format!("user.name={}", settings.author_name);
        let email = format!("user.email={}", settings.author_email);
        let message = format!("Update {key}");
        self.git([
            "-c",
            name.as_str(),
            "-c",
            email.as_str(),
            "commit",
            "--quiet",
            "--allow-empty",
            "-m",
            message.as_str(),
        ])
        .await?;
        let commit = stdout_line(&self.git(["rev-parse", "HEAD"]).await?);

        if settings.push {
            self.git(["push", "--quiet", "origin", settings.branch.as_str()])
                .await?;
            debug!(branch = %settings.branch, commit = %commit, "pushed");
        }
        Ok(commit)
    }

    async fn restore(&self, key: &str, path: &Path, before: &Snapshot) -> SourceResult<()> {
        match &before.head {
            Some(head) => {
                self.git(["reset", "--quiet", "--soft", head.as_str()]).await?;
                self.git(["reset", "--quiet", head.as_str(), "--", key]).await?;
            }
            None => {
                if self.head().await?.is_some() {
                    self.git(["update-ref", "-d", "HEAD"]).await?;
                }
                self.git(["rm", "--cached", "--quiet", "--ignore-unmatch", "--", key])
                    .await?;
            }
        }

        let restored = match &before.file {
            Some(data) => tokio::fs::write(path, data).await,
            None => match tokio::fs::remove_file(path).await {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                other => other,
            },
        };
        restored.map_err(|e| SourceError::backend(path.display(), None, e))
    }
}

/// Branch tip and worktree file captured before a write.
struct Snapshot {
    head: Option<String>,
    file: Option<Vec<u8>>,
}

async fn run(mut command: Command, context: &Path) -> SourceResult<Output> {
    command
        .env("GIT_TERMINAL_PROMPT", "0")
        .env("GIT_LITERAL_PATHSPECS", "1")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| SourceError::backend(context.display(), None, format!("cannot run git: {e}")))
}

/// Backend error for a failed git run. The exit code goes into the message;
/// `status` stays empty.
fn failure(location: impl ToString, output: &Output) -> SourceError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let message = match output.status.code() {
        Some(code) => format!("git exited with {code}: {}", stderr.trim()),
        None => format!("git was terminated: {}", stderr.trim()),
    };
    SourceError::backend(location, None, message)
}

fn stdout_line(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Stream source over a branch of a git repository.
#[derive(Debug)]
pub struct GitStreamSource {
    ctx: SourceContext<Worktree>,
    settings: GitSettings,
}

impl GitStreamSource {
    pub fn new(definition: RepositoryDefinition) -> SourceResult<Self> {
        let ctx = SourceContext::new(definition, BackendKind::Git)?;
        let settings = GitSettings::from_definition(ctx.definition())?;
        Ok(Self { ctx, settings })
    }

    /// Use a selector shared with other sources.
    pub fn with_processors(mut self, processors: Arc<ProcessorSelector>) -> Self {
        self.ctx = self.ctx.with_processors(processors);
        self
    }

    pub fn branch(&self) -> &str {
        &self.settings.branch
    }

    async fn clone_remote(&self, remote: &str) -> SourceResult<()> {
        let settings = &self.settings;
        info!(remote = %remote, repo = %settings.repo.display(), "cloning repository");
        let mut command = Command::new("git");
        command
            .args(["clone", "--quiet", "--branch", settings.branch.as_str(), remote])
            .arg(&settings.repo);
        let output = run(command, &settings.repo).await?;
        if !output.status.success() {
            return Err(failure(remote, &output));
        }
        Ok(())
    }
}

#[async_trait]
impl StreamSource for GitStreamSource {
    fn source_config(&self) -> &RepositoryDefinition {
        self.ctx.definition()
    }

    fn locations(&self) -> &LocationBuilder {
        self.ctx.locations()
    }

    fn processors(&self) -> &ProcessorSelector {
        self.ctx.processors()
    }

    fn state(&self) -> LifecycleState {
        self.ctx.client().state()
    }

    async fn init(&self) -> SourceResult<()> {
        let slot = self.ctx.client();
        slot.ensure_uninitialized()?;
        let settings = &self.settings;

        if !settings.repo.exists() {
            match &settings.remote {
                Some(remote) => self.clone_remote(remote).await?,
                None => {
                    return Err(SourceError::backend(
                        settings.repo.display(),
                        None,
                        "clone directory does not exist and no remote is configured",
                    ))
                }
            }
        }

        let worktree = Worktree {
            settings: settings.clone(),
            write_lock: Mutex::new(()),
        };
        let head = stdout_line(
            &worktree
                .git(["symbolic-ref", "--quiet", "--short", "HEAD"])
                .await?,
        );
        if head != settings.branch {
            error!(expected = %settings.branch, found = %head, "clone is on the wrong branch");
            return Err(SourceError::backend(
                settings.repo.display(),
                None,
                format!("clone is on branch {head:?}, expected {:?}", settings.branch),
            ));
        }

        slot.install(Arc::new(worktree)).map_err(|(err, _)| err)?;
        info!(
            repo = %self.ctx.definition().name,
            clone = %settings.repo.display(),
            branch = %settings.branch,
            "git source ready"
        );
        Ok(())
    }

    async fn close(&self) -> SourceResult<()> {
        self.ctx.client().take()?;
        info!(repo = %self.ctx.definition().name, "git source closed");
        Ok(())
    }

    async fn stream_file(&self, path: &str) -> SourceResult<Option<StreamPacket>> {
        let worktree = self.ctx.client().client()?;
        let location = self.prototype_location(path)?;
        let key = backend_key(&location);
        debug!(branch = %self.settings.branch, key = %key, "resolving blob");

        let start = Instant::now();
        let Some(blob) = worktree.blob_id(&key).await? else {
            debug!(key = %key, "no blob on branch");
            return Ok(None);
        };
        let data = worktree.read_blob(&blob).await.map_err(|e| {
            error!(key = %key, blob = %blob, error = %e, "could not read blob");
            e
        })?;
        trace!(
            key = %key,
            bytes = data.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "read blob"
        );
        Ok(Some(StreamPacket::from_bytes(location, data).with_change_token(blob)))
    }

    async fn write_file(&self, request: WriteRequest) -> SourceResult<Option<String>> {
        let worktree = self.ctx.client().client()?;
        let key = backend_key(&request.location);
        let start = Instant::now();
        let commit = worktree.commit(&key, &request.body).await.map_err(|e| {
            error!(key = %key, error = %e, "commit failed");
            e
        })?;
        trace!(
            key = %key,
            commit = %commit,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "committed document"
        );
        Ok(Some(commit))
    }
}
