//! Invalidation: forget, clear, tag flush, pattern flush, dependency
//! cascade, model-scoped flush, and the orphan-chunk sweep.

use std::collections::HashSet;

use regex::Regex;
use tracing::debug;

use stashbox_core::envelope::ChunkManifest;

use crate::error::CacheError;
use crate::events::CacheEvent;

use super::Cache;

/// Translates a glob (`*`, `?`) into an anchored regex.
fn glob_to_regex(glob: &str) -> String {
    let mut pattern = String::with_capacity(glob.len() + 8);
    pattern.push('^');
    for ch in glob.chars() {
        match ch {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    pattern.push('$');
    pattern
}

/// Compiles one flush pattern: `/.../` is a regex, anything else a glob.
/// Invalid regexes match nothing.
fn compile_pattern(pattern: &str, namespace: Option<&str>) -> Option<Regex> {
    if pattern.len() >= 2 && pattern.starts_with('/') && pattern.ends_with('/') {
        return Regex::new(&pattern[1..pattern.len() - 1]).ok();
    }
    let glob = match namespace {
        Some(ns) if !ns.is_empty() => format!("{ns}:{pattern}"),
        _ => pattern.to_owned(),
    };
    Regex::new(&glob_to_regex(&glob)).ok()
}

impl Cache {
    /// Removes `key` and everything that hangs off it: chunks first, then
    /// SWR metadata, then the sidecar entries, then the backend value.
    ///
    /// If the backend delete fails the earlier cleanup still stands; the
    /// next sweep reconciles the difference.
    pub async fn forget(&self, key: &str) -> Result<bool, CacheError> {
        let prefixed = self.prefixed(key);
        self.forget_prefixed(&prefixed).await
    }

    pub(crate) async fn forget_prefixed(&self, prefixed: &str) -> Result<bool, CacheError> {
        // Chunk cleanup: a chunk manifest owns its chunks.
        if let Some(stored) = self.runtime.store.get(prefixed).await?
            && let Some(manifest) = ChunkManifest::from_value(&stored)
        {
            for chunk in &manifest.chunk_keys {
                self.runtime.store.forget(chunk).await?;
            }
        }
        self.runtime.sidecar.remove_manifest(prefixed).await?;
        self.runtime.sidecar.clear_meta(prefixed).await?;
        self.runtime.sidecar.untrack(prefixed).await?;
        self.runtime.sidecar.untag(prefixed).await?;
        self.runtime.sidecar.remove_dependencies(prefixed).await?;
        self.runtime.cost.forget(prefixed).await?;
        let removed = self.runtime.store.forget(prefixed).await?;
        if removed {
            self.dispatch(CacheEvent::KeyForgotten {
                key: prefixed.to_owned(),
            });
        }
        Ok(removed)
    }

    /// Forgets every managed key after dropping expired ones. Returns the
    /// number of keys removed.
    pub async fn clear(&self) -> Result<usize, CacheError> {
        self.runtime.sidecar.cleanup_expired().await?;
        let keys = self.runtime.sidecar.managed_keys().await?;
        let mut removed = 0;
        for key in keys {
            if self.forget_prefixed(&key).await? {
                removed += 1;
            }
        }
        self.runtime.sidecar.clear_managed().await?;
        Ok(removed)
    }

    /// Delegates to the backend's flush and resets every in-memory
    /// sidecar view (the persisted sidecar was wiped with everything
    /// else).
    pub async fn flush(&self) -> Result<bool, CacheError> {
        let flushed = self.runtime.store.flush().await?;
        self.runtime.sidecar.reset().await;
        self.runtime.cost.reset().await;
        Ok(flushed)
    }

    /// Forgets every key bearing any of `tags`, then drops the tag lists.
    ///
    /// Idempotent: missing keys and empty tags are tolerated silently.
    pub async fn flush_tags<I, T>(&self, tags: I) -> Result<(), CacheError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        for tag in tags {
            let tag = tag.as_ref();
            let members = self.runtime.sidecar.tag_members(tag).await?;
            for member in members {
                self.forget_prefixed(&member).await?;
            }
            self.runtime.sidecar.remove_tag(tag).await?;
        }
        Ok(())
    }

    /// Forgets every managed key matching any pattern. Each pattern is a
    /// glob (`*`, `?`) or a `/`-delimited regex; invalid regexes match
    /// nothing. Returns the number of keys removed.
    pub async fn flush_patterns<I, T>(&self, patterns: I) -> Result<usize, CacheError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let regexes: Vec<Regex> = patterns
            .into_iter()
            .filter_map(|pattern| compile_pattern(pattern.as_ref(), self.get_namespace()))
            .collect();
        if regexes.is_empty() {
            return Ok(0);
        }
        let managed = self.runtime.sidecar.managed_keys().await?;
        let matched: Vec<String> = managed
            .into_iter()
            .filter(|key| regexes.iter().any(|regex| regex.is_match(key)))
            .collect();
        let mut removed = 0;
        for key in &matched {
            self.forget_prefixed(key).await?;
            removed += 1;
        }
        debug!(removed, "pattern flush complete");
        Ok(removed)
    }

    /// Transitively invalidates `key` and everything depending on it.
    ///
    /// Iterative depth-first traversal with a visited set: dependents are
    /// forgotten before the key they depend on, and cycles terminate.
    /// Succeeds even for keys that were never stored.
    pub async fn invalidate(&self, key: &str) -> Result<(), CacheError> {
        let root = self.prefixed(key);
        let mut visited: HashSet<String> = HashSet::new();
        let mut stack: Vec<(String, bool)> = vec![(root, false)];
        while let Some((key, expanded)) = stack.pop() {
            if expanded {
                self.forget_prefixed(&key).await?;
                continue;
            }
            if !visited.insert(key.clone()) {
                continue;
            }
            let dependents = self.runtime.sidecar.dependents_of(&key).await?;
            stack.push((key, true));
            for dependent in dependents {
                if !visited.contains(&dependent) {
                    stack.push((dependent, false));
                }
            }
        }
        Ok(())
    }

    /// Flushes keys derived from model naming conventions:
    /// `<class>_<id>`, `<class>_<id>_*`, and
    /// `<relationship>_*_<class>_<id>` for each relationship.
    pub async fn invalidate_model(
        &self,
        class: &str,
        id: &str,
        relationships: &[&str],
    ) -> Result<usize, CacheError> {
        let mut patterns = vec![format!("{class}_{id}"), format!("{class}_{id}_*")];
        for relationship in relationships {
            patterns.push(format!("{relationship}_*_{class}_{id}"));
        }
        self.flush_patterns(patterns).await
    }

    /// Sweeps chunks whose parent manifest is gone. Returns the number of
    /// chunk keys reclaimed.
    pub async fn cleanup_orphan_chunks(&self) -> Result<usize, CacheError> {
        let entries = self.runtime.sidecar.manifest_entries().await?;
        let mut removed = 0;
        for (parent, chunks) in entries {
            if self.runtime.store.has(&parent).await? {
                continue;
            }
            for chunk in &chunks {
                if self.runtime.store.forget(chunk).await? {
                    removed += 1;
                }
            }
            self.runtime.sidecar.remove_manifest(&parent).await?;
        }
        Ok(removed)
    }

    /// Drops managed keys whose backend entry expired. Returns how many
    /// were dropped.
    pub async fn cleanup_expired(&self) -> Result<usize, CacheError> {
        Ok(self.runtime.sidecar.cleanup_expired().await?)
    }

    /// Fully-prefixed managed keys under `namespace`.
    pub async fn get_namespace_keys(&self, namespace: &str) -> Result<Vec<String>, CacheError> {
        let prefix = format!("{namespace}:");
        Ok(self
            .runtime
            .sidecar
            .managed_keys()
            .await?
            .into_iter()
            .filter(|key| key.starts_with(&prefix))
            .collect())
    }

    /// Forgets every managed key under `namespace`. Returns the number of
    /// keys removed.
    pub async fn flush_namespace(&self, namespace: &str) -> Result<usize, CacheError> {
        let keys = self.get_namespace_keys(namespace).await?;
        let mut removed = 0;
        for key in keys {
            if self.forget_prefixed(&key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
