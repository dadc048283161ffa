//! Path translation between the mounted namespace and the repository.
//!
//! Local paths are absolute, `/`-separated and never carry a trailing
//! separator (the volume root is `/`). Host runtimes that hand us
//! `\`-separated names are normalized on the way in.
//!
//! Repository paths are the repository root prefix followed by the local
//! path. The volume root maps to the prefix exactly.

/// Separator used for cache keys and mounted paths.
pub const LOCAL_SEPARATOR: char = '/';

/// Separator used by the remote repository's addressing scheme.
pub const REPOSITORY_SEPARATOR: char = '/';

/// Path of the volume root in the mounted namespace.
pub const ROOT: &str = "/";

/// Normalizes a host-supplied path into a canonical local path.
///
/// Backslashes are treated as separators, empty segments are dropped and
/// the result always starts with `/`.
pub fn normalize(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    for segment in path
        .split(['\\', LOCAL_SEPARATOR])
        .filter(|s| !s.is_empty())
    {
        out.push(LOCAL_SEPARATOR);
        out.push_str(segment);
    }
    if out.is_empty() {
        out.push(LOCAL_SEPARATOR);
    }
    out
}

/// Returns true for the volume root.
#[inline]
pub fn is_root(path: &str) -> bool {
    path == ROOT
}

/// Parent of a local path, or `None` for the root.
pub fn parent(path: &str) -> Option<&str> {
    if is_root(path) {
        return None;
    }
    match path.rfind(LOCAL_SEPARATOR) {
        Some(0) => Some(ROOT),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Leaf component of a local path. Empty for the root.
pub fn name(path: &str) -> &str {
    match path.rfind(LOCAL_SEPARATOR) {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Joins a child name onto a local directory path.
pub fn join(dir: &str, child: &str) -> String {
    if is_root(dir) {
        format!("{LOCAL_SEPARATOR}{child}")
    } else {
        format!("{dir}{LOCAL_SEPARATOR}{child}")
    }
}

/// Prefix shared by every strict descendant of `path`.
pub fn descendant_prefix(path: &str) -> String {
    if is_root(path) {
        ROOT.to_string()
    } else {
        format!("{path}{LOCAL_SEPARATOR}")
    }
}

/// Returns true if `candidate` lies strictly below `ancestor`.
pub fn is_descendant(candidate: &str, ancestor: &str) -> bool {
    if candidate == ancestor {
        return false;
    }
    if is_root(ancestor) {
        return candidate.starts_with(LOCAL_SEPARATOR);
    }
    candidate.len() > ancestor.len() + 1
        && candidate.starts_with(ancestor)
        && candidate[ancestor.len()..].starts_with(LOCAL_SEPARATOR)
}

/// Returns true if `candidate` is an immediate child of `dir`.
pub fn is_immediate_child(candidate: &str, dir: &str) -> bool {
    is_descendant(candidate, dir) && parent(candidate) == Some(dir)
}

/// Maps local paths onto repository paths under a fixed root prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapper {
    /// Repository root without a trailing separator (empty for `/`).
    root: String,
}

impl PathMapper {
    /// Creates a mapper for the given repository root, e.g. `/dav/documents/`.
    pub fn new(repository_root: &str) -> Self {
        let trimmed = repository_root.trim_end_matches(REPOSITORY_SEPARATOR);
        let root = if trimmed.is_empty() || trimmed.starts_with(REPOSITORY_SEPARATOR) {
            trimmed.to_string()
        } else {
            format!("{REPOSITORY_SEPARATOR}{trimmed}")
        };
        Self { root }
    }

    /// The repository path the volume root maps to.
    pub fn repository_root(&self) -> &str {
        if self.root.is_empty() { "/" } else { &self.root }
    }

    /// Converts a local path to its repository path.
    pub fn to_repository(&self, local: &str) -> String {
        let local = normalize(local);
        if is_root(&local) {
            return self.repository_root().to_string();
        }
        let translated: String = local
            .chars()
            .map(|c| if c == LOCAL_SEPARATOR { REPOSITORY_SEPARATOR } else { c })
            .collect();
        format!("{}{translated}", self.root)
    }

    /// Converts a repository path back into the mounted namespace.
    ///
    /// Returns `None` for paths outside the repository root.
    pub fn to_local(&self, repository: &str) -> Option<String> {
        let trimmed = repository.trim_end_matches(REPOSITORY_SEPARATOR);
        let rest = trimmed.strip_prefix(self.root.as_str())?;
        if !rest.is_empty() && !rest.starts_with(REPOSITORY_SEPARATOR) {
            return None;
        }
        Some(normalize(
            &rest
                .chars()
                .map(|c| if c == REPOSITORY_SEPARATOR { LOCAL_SEPARATOR } else { c })
                .collect::<String>(),
        ))
    }

    /// Parent of a repository path.
    pub fn repository_parent(&self, repository: &str) -> String {
        let trimmed = repository.trim_end_matches(REPOSITORY_SEPARATOR);
        match trimmed.rfind(REPOSITORY_SEPARATOR) {
            Some(0) | None => REPOSITORY_SEPARATOR.to_string(),
            Some(idx) => trimmed[..idx].to_string(),
        }
    }

    /// Document name (last segment) of a repository path.
    pub fn repository_name<'a>(&self, repository: &'a str) -> &'a str {
        let trimmed = repository.trim_end_matches(REPOSITORY_SEPARATOR);
        match trimmed.rfind(REPOSITORY_SEPARATOR) {
            Some(idx) => &trimmed[idx + 1..],
            None => trimmed,
        }
    }
}
