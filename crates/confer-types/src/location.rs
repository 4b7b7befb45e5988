//! Resolution of request paths against a repository's base location.
//!
//! A [`LocationBuilder`] is created once per repository from its base URI and
//! default file name, then turns arbitrary request paths into concrete,
//! backend-addressable [`Url`]s:
//!
//! - an empty or directory-like request path gets the default file name
//!   appended;
//! - a request path whose last segment carries a file extension is used as-is;
//! - leading, trailing and repeated separators are normalized, `.` segments
//!   are dropped and `..` segments are rejected.
//!
//! Resolution is idempotent: feeding the relative part of a resolved location
//! back into [`LocationBuilder::build`] yields the identical location.

use percent_encoding::percent_decode_str;
use url::Url;

use crate::error::{TypeError, TypeResult};

/// Builds resolved locations for one repository.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocationBuilder {
    /// Base location in directory form (its path always ends with `/`).
    base: Url,
    default_file_name: String,
}

impl LocationBuilder {
    /// Parse `base` and pair it with `default_file_name`.
    ///
    /// When the last segment of `base` is itself file-like
    /// (`s3://bucket/config/app.yaml`), the parent becomes the base directory
    /// and the file name serves as the default if `default_file_name` is
    /// empty.
    pub fn new(base: &str, default_file_name: &str) -> TypeResult<Self> {
        let trimmed = base.trim();
        if trimmed.is_empty() {
            return Err(TypeError::location(base, "base location is empty"));
        }

        let mut url =
            Url::parse(trimmed).map_err(|e| TypeError::location(trimmed, e.to_string()))?;
        if url.cannot_be_a_base() {
            return Err(TypeError::location(
                trimmed,
                "base location must be hierarchical",
            ));
        }
        url.set_query(None);
        url.set_fragment(None);

        let mut default = default_file_name.trim().to_string();
        if default.contains(['/', '\\']) {
            return Err(TypeError::location(
                default_file_name,
                "default file name must not contain path separators",
            ));
        }

        let path = url.path().to_string();
        let (dir, tail) = split_last_segment(&path);
        if tail.is_empty() {
            if path.is_empty() {
                url.set_path("/");
            }
        } else if looks_like_file(tail) {
            if default.is_empty() {
                default = decode(tail);
            }
            url.set_path(dir);
        } else {
            url.set_path(&format!("{path}/"));
        }

        Ok(Self {
            base: url,
            default_file_name: default,
        })
    }

    /// The base location in directory form.
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// File name appended to directory-like request paths.
    pub fn default_file_name(&self) -> &str {
        &self.default_file_name
    }

    /// Resolve `request_path` to a concrete location.
    ///
    /// Never fails because the request path is empty; fails with
    /// [`TypeError::InvalidLocation`] if the path tries to escape the base
    /// directory, or names a directory while no default file name is known.
    pub fn build(&self, request_path: &str) -> TypeResult<Url> {
        let relative = RelativePath::parse(request_path)?;

        let mut path = self.base.path().to_string();
        path.push_str(&relative.joined);
        if !relative.is_file {
            if self.default_file_name.is_empty() {
                return Err(TypeError::location(
                    request_path,
                    "path names a directory and no default file name is configured",
                ));
            }
            if !path.ends_with('/') {
                path.push('/');
            }
            path.push_str(&self.default_file_name);
        }

        let mut url = self.base.clone();
        url.set_path(&path);
        if !url.path().starts_with(self.base.path()) {
            return Err(TypeError::location(
                request_path,
                "path resolves outside the base location",
            ));
        }
        Ok(url)
    }

    /// The request path that resolves to `location`, if it lies under the
    /// base directory.
    pub fn relative_path(&self, location: &Url) -> Option<String> {
        if location.scheme() != self.base.scheme()
            || location.host_str() != self.base.host_str()
            || location.port() != self.base.port()
        {
            return None;
        }
        location
            .path()
            .strip_prefix(self.base.path())
            .map(decode)
    }
}

/// Root-relative key for `location`: the decoded path without its leading
/// separator. Backends addressed by root-relative keys must never see the
/// leading `/`, or lookups resolve to the wrong entry.
pub fn backend_key(location: &Url) -> String {
    decode(location.path().trim_start_matches('/'))
}

/// The decoded last path segment of `location`, empty for directory paths.
pub fn file_name(location: &Url) -> String {
    let (_, tail) = split_last_segment(location.path());
    decode(tail)
}

/// Whether a path segment carries a recognizable file extension.
///
/// The extension must be non-empty, alphanumeric and contain at least one
/// letter, so `app.yaml` is a file while `v1.2`, `.hidden` and `conf` are
/// directories.
pub fn looks_like_file(segment: &str) -> bool {
    match segment.rfind('.') {
        Some(idx) if idx > 0 => {
            let ext = &segment[idx + 1..];
            !ext.is_empty()
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
                && ext.chars().any(|c| c.is_ascii_alphabetic())
        }
        _ => false,
    }
}

/// A normalized, root-relative request path.
struct RelativePath {
    joined: String,
    is_file: bool,
}

impl RelativePath {
    fn parse(raw: &str) -> TypeResult<Self> {
        let mut segments: Vec<&str> = Vec::new();
        for segment in raw.split(['/', '\\']) {
            // Url path parsing treats `%2e` as `.`, so judge the decoded form.
            let decoded = decode(segment);
            match decoded.as_str() {
                "" | "." => {}
                ".." => {
                    return Err(TypeError::location(
                        raw,
                        "parent segments are not allowed in request paths",
                    ))
                }
                name if name.contains(['/', '\\']) => {
                    return Err(TypeError::location(
                        raw,
                        "encoded separators are not allowed in request paths",
                    ))
                }
                _ => segments.push(segment),
            }
        }

        let names_directory = raw.ends_with(['/', '\\'])
            || segments.is_empty()
            || raw
                .rsplit(['/', '\\'])
                .next()
                .map(|last| decode(last) == ".")
                .unwrap_or(false);
        let is_file = !names_directory
            && segments.last().map(|s| looks_like_file(s)).unwrap_or(false);

        Ok(Self {
            joined: segments.join("/"),
            is_file,
        })
    }
}

fn split_last_segment(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(idx) => (&path[..=idx], &path[idx + 1..]),
        None => ("", path),
    }
}

fn decode(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}
