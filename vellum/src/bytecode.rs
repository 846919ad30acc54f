//! Persistence of compiled templates.
//!
//! Compiling a template is much more expensive than deserializing the
//! compiled form, so environments can be given a
//! [`CompiledTemplateCache`] that stores programs keyed by the
//! environment signature, the template name and a checksum of the
//! source.  The payload carries a version tag; a tag mismatch simply
//! causes recompilation instead of an error.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind};
use crate::program::{CompiledTemplate, Program};
use crate::utils::AutoEscape;

/// The version tag prefixed to every serialized program.
const CACHE_VERSION_TAG: &[u8] = b"vellum-program-v1\0";

/// Identifies a cache slot and transports the payload.
pub struct CacheBucket {
    /// Derived from the environment configuration; programs compiled
    /// under different delimiters or flags never alias.
    pub environment_signature: String,
    /// The name of the template.
    pub template_name: String,
    /// Checksum of the template source.
    pub checksum: String,
    code: Option<Vec<u8>>,
}

impl CacheBucket {
    pub(crate) fn new(
        environment_signature: String,
        template_name: &str,
        source: &str,
    ) -> CacheBucket {
        CacheBucket {
            environment_signature,
            template_name: template_name.to_string(),
            checksum: format!("{:016x}", fnv1a(source.as_bytes())),
            code: None,
        }
    }

    /// A stable string key combining all parts of the bucket identity.
    pub fn key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.environment_signature, self.template_name, self.checksum
        )
    }

    /// Returns the serialized program, if the cache provided one.
    pub fn code(&self) -> Option<&[u8]> {
        self.code.as_deref()
    }

    /// Sets the serialized program read from the cache.
    pub fn set_code(&mut self, code: Vec<u8>) {
        self.code = Some(code);
    }

    pub(crate) fn put_template(&mut self, template: &CompiledTemplate) {
        #[derive(Serialize)]
        struct Persisted<'a> {
            name: &'a str,
            source: &'a str,
            program: &'a Program,
            html_escape: bool,
            json_escape: bool,
        }
        let persisted = Persisted {
            name: &template.name,
            source: &template.source,
            program: &template.program,
            html_escape: template.initial_auto_escape == AutoEscape::Html,
            json_escape: template.initial_auto_escape == AutoEscape::Json,
        };
        let mut buf = CACHE_VERSION_TAG.to_vec();
        if serde_json::to_writer(&mut buf, &persisted).is_ok() {
            self.code = Some(buf);
        }
    }

    pub(crate) fn take_template(&mut self) -> Option<CompiledTemplate> {
        #[derive(Deserialize)]
        struct Persisted {
            name: String,
            source: String,
            program: Program,
            html_escape: bool,
            json_escape: bool,
        }
        let code = self.code.take()?;
        let payload = code.strip_prefix(CACHE_VERSION_TAG)?;
        let persisted: Persisted = serde_json::from_slice(payload).ok()?;
        Some(CompiledTemplate {
            name: persisted.name,
            source: persisted.source,
            program: persisted.program,
            initial_auto_escape: if persisted.html_escape {
                AutoEscape::Html
            } else if persisted.json_escape {
                AutoEscape::Json
            } else {
                AutoEscape::None
            },
        })
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Stores and retrieves serialized programs.
///
/// Implementations only move bytes; (de)serialization and versioning
/// are handled by the engine through the bucket.
pub trait CompiledTemplateCache: Send + Sync {
    /// Fills `bucket` with a previously stored payload if available.
    fn load(&self, bucket: &mut CacheBucket);

    /// Persists the payload carried by `bucket`.
    fn store(&self, bucket: &CacheBucket);
}

/// An in-memory program cache.
///
/// Mostly useful for tests and for processes that recreate
/// environments with identical configuration many times.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl CompiledTemplateCache for MemoryCache {
    fn load(&self, bucket: &mut CacheBucket) {
        if let Some(code) = self.entries.lock().unwrap().get(&bucket.key()) {
            bucket.set_code(code.clone());
        }
    }

    fn store(&self, bucket: &CacheBucket) {
        if let Some(code) = bucket.code() {
            self.entries
                .lock()
                .unwrap()
                .insert(bucket.key(), code.to_vec());
        }
    }
}

/// A program cache backed by a directory of files.
pub struct FileSystemCache {
    dir: PathBuf,
}

impl FileSystemCache {
    /// Creates a cache storing programs below the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Result<FileSystemCache, Error> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|err| {
            Error::new(ErrorKind::WriteFailure, "could not create cache directory")
                .with_source(err)
        })?;
        Ok(FileSystemCache { dir })
    }

    fn path_for(&self, bucket: &CacheBucket) -> PathBuf {
        self.dir
            .join(format!("{:016x}.cache", fnv1a(bucket.key().as_bytes())))
    }
}

impl CompiledTemplateCache for FileSystemCache {
    fn load(&self, bucket: &mut CacheBucket) {
        if let Ok(code) = fs::read(self.path_for(bucket)) {
            bucket.set_code(code);
        }
    }

    fn store(&self, bucket: &CacheBucket) {
        let code = match bucket.code() {
            Some(code) => code,
            None => return,
        };
        let path = self.path_for(bucket);
        // writes go through a temporary file so that concurrent
        // readers never observe a partial entry
        let tmp = path.with_extension("tmp");
        let written = fs::File::create(&tmp)
            .and_then(|mut f| f.write_all(code))
            .is_ok();
        if written {
            let _ = fs::rename(&tmp, &path);
        } else {
            let _ = fs::remove_file(&tmp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_tag_mismatch_recompiles() {
        let mut bucket = CacheBucket::new("sig".into(), "a.txt", "{{ x }}");
        bucket.set_code(b"other-tag\0garbage".to_vec());
        assert!(bucket.take_template().is_none());
    }

    #[test]
    fn test_checksum_stability() {
        let a = CacheBucket::new("sig".into(), "a.txt", "{{ x }}");
        let b = CacheBucket::new("sig".into(), "a.txt", "{{ x }}");
        let c = CacheBucket::new("sig".into(), "a.txt", "{{ y }}");
        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
    }
}
