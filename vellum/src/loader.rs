//! Template source loaders.
//!
//! A loader connects the environment to wherever template sources
//! live.  The built-in loaders cover the common cases:
//!
//! - [`path_loader`] serves templates from a directory tree,
//! - [`DictLoader`] serves them from an in-memory mapping,
//! - [`ChainLoader`] tries a sequence of loaders in order,
//! - [`Environment::set_loader`](crate::Environment::set_loader)
//!   accepts a plain closure.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::{Error, ErrorKind};

/// A probe that reports whether a cached template is still current.
pub type UptodateProbe = Box<dyn Fn() -> bool + Send + Sync>;

/// The source of a template as produced by a loader.
pub struct TemplateSource {
    /// The template source text.
    pub source: String,
    /// The file name the source came from, if any.
    pub filename: Option<String>,
    /// Invoked on cache hits; returning `false` forces a reload.
    pub uptodate: Option<UptodateProbe>,
}

impl TemplateSource {
    /// Creates a source without filename or probe.
    pub fn new(source: impl Into<String>) -> TemplateSource {
        TemplateSource {
            source: source.into(),
            filename: None,
            uptodate: None,
        }
    }
}

/// Loads template sources by name.
pub trait Loader: Send + Sync {
    /// Returns the source for a template or a
    /// [`TemplateNotFound`](ErrorKind::TemplateNotFound) error.
    fn get_source(&self, name: &str) -> Result<TemplateSource, Error>;

    /// Enumerates the names this loader can serve, if known.
    fn list_templates(&self) -> Vec<String> {
        Vec::new()
    }
}

impl<F> Loader for F
where
    F: Fn(&str) -> Result<Option<String>, Error> + Send + Sync,
{
    fn get_source(&self, name: &str) -> Result<TemplateSource, Error> {
        match self(name)? {
            Some(source) => Ok(TemplateSource::new(source)),
            None => Err(Error::template_not_found(name)),
        }
    }
}

/// A loader over an in-memory mapping of sources.
#[derive(Default, Clone)]
pub struct DictLoader {
    templates: BTreeMap<String, String>,
}

impl DictLoader {
    /// Creates a dict loader from pairs of name and source.
    pub fn new<I, N, S>(templates: I) -> DictLoader
    where
        I: IntoIterator<Item = (N, S)>,
        N: Into<String>,
        S: Into<String>,
    {
        DictLoader {
            templates: templates
                .into_iter()
                .map(|(name, source)| (name.into(), source.into()))
                .collect(),
        }
    }
}

impl Loader for DictLoader {
    fn get_source(&self, name: &str) -> Result<TemplateSource, Error> {
        self.templates
            .get(name)
            .map(|source| TemplateSource::new(source.clone()))
            .ok_or_else(|| Error::template_not_found(name))
    }

    fn list_templates(&self) -> Vec<String> {
        self.templates.keys().cloned().collect()
    }
}

/// Tries a sequence of loaders in order.
pub struct ChainLoader {
    loaders: Vec<Arc<dyn Loader>>,
}

impl ChainLoader {
    /// Creates a chain loader from individual loaders.
    pub fn new(loaders: Vec<Arc<dyn Loader>>) -> ChainLoader {
        ChainLoader { loaders }
    }
}

impl Loader for ChainLoader {
    fn get_source(&self, name: &str) -> Result<TemplateSource, Error> {
        for loader in &self.loaders {
            match loader.get_source(name) {
                Ok(source) => return Ok(source),
                Err(err) if err.kind() == ErrorKind::TemplateNotFound => continue,
                Err(err) => return Err(err),
            }
        }
        Err(Error::template_not_found(name))
    }

    fn list_templates(&self) -> Vec<String> {
        let mut rv = Vec::new();
        for loader in &self.loaders {
            for name in loader.list_templates() {
                if !rv.contains(&name) {
                    rv.push(name);
                }
            }
        }
        rv
    }
}

fn mtime_of(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).ok().and_then(|meta| meta.modified().ok())
}

/// Safely joins a template name onto the search root.
///
/// Segments that would escape the root (absolute paths, `..`) make
/// the template unresolvable rather than leaking the file system.
fn safe_join(base: &Path, template: &str) -> Option<PathBuf> {
    let mut rv = base.to_path_buf();
    for segment in template.split('/') {
        if segment.starts_with('.') || segment.contains('\\') || segment.is_empty() {
            return None;
        }
        rv.push(segment);
    }
    Some(rv)
}

/// Returns a loader serving templates below a directory.
///
/// Template names use forward slashes on all platforms.  Loaded
/// entries carry a modification-time probe so that edited files are
/// recompiled on the next lookup.
///
/// ```no_run
/// # use vellum::Environment;
/// let mut env = Environment::new();
/// env.set_loader(vellum::path_loader("templates"));
/// ```
pub fn path_loader(dir: impl AsRef<Path>) -> impl Loader {
    let dir = dir.as_ref().to_path_buf();
    PathLoader { dir }
}

struct PathLoader {
    dir: PathBuf,
}

impl Loader for PathLoader {
    fn get_source(&self, name: &str) -> Result<TemplateSource, Error> {
        let path = match safe_join(&self.dir, name) {
            Some(path) => path,
            None => return Err(Error::template_not_found(name)),
        };
        match fs::read_to_string(&path) {
            Ok(source) => {
                let loaded_at = mtime_of(&path);
                let probe_path = path.clone();
                Ok(TemplateSource {
                    source,
                    filename: Some(path.display().to_string()),
                    uptodate: Some(Box::new(move || mtime_of(&probe_path) == loaded_at)),
                })
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::template_not_found(name))
            }
            Err(err) => Err(Error::new(
                ErrorKind::TemplateNotFound,
                format!("could not read template {name:?}"),
            )
            .with_source(err)),
        }
    }

    fn list_templates(&self) -> Vec<String> {
        let mut rv = Vec::new();
        let mut dirs = vec![(self.dir.clone(), String::new())];
        while let Some((dir, prefix)) = dirs.pop() {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            for entry in entries.flatten() {
                let name = match entry.file_name().into_string() {
                    Ok(name) => name,
                    Err(_) => continue,
                };
                let full = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{prefix}/{name}")
                };
                match entry.file_type() {
                    Ok(ty) if ty.is_dir() => dirs.push((entry.path(), full)),
                    Ok(ty) if ty.is_file() => rv.push(full),
                    _ => {}
                }
            }
        }
        rv.sort();
        rv
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_join_rejects_escapes() {
        let base = Path::new("/srv/templates");
        assert!(safe_join(base, "ok/index.html").is_some());
        assert!(safe_join(base, "../etc/passwd").is_none());
        assert!(safe_join(base, "foo/../../etc").is_none());
        assert!(safe_join(base, ".hidden").is_none());
        assert!(safe_join(base, "a//b").is_none());
    }

    #[test]
    fn test_dict_loader() {
        let loader = DictLoader::new([("a.txt", "A"), ("b.txt", "B")]);
        assert_eq!(loader.get_source("a.txt").unwrap().source, "A");
        assert!(loader.get_source("missing.txt").is_err());
        assert_eq!(loader.list_templates(), vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_chain_loader() {
        let loader = ChainLoader::new(vec![
            Arc::new(DictLoader::new([("a.txt", "first")])),
            Arc::new(DictLoader::new([("a.txt", "second"), ("b.txt", "B")])),
        ]);
        assert_eq!(loader.get_source("a.txt").unwrap().source, "first");
        assert_eq!(loader.get_source("b.txt").unwrap().source, "B");
        assert_eq!(loader.list_templates(), vec!["a.txt", "b.txt"]);
    }
}
