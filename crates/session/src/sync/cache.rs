use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use sha2::{Digest, Sha256};

use super::manifest::{ResourceData, StreamingResource};

/// One cached file, identified by resource, filename and content hash.
/// All three components are stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub resource: String,
    pub filename: String,
    pub hash: String,
}

/// One file the cache is missing for the current manifest.
#[derive(Debug, Clone)]
pub struct ResourceDownload {
    pub source_url: String,
    pub target_name: String,
    pub resource: String,
    pub filename: String,
    pub hash: String,
}

/// Content-addressed store of resource files, plus a mark set naming the
/// entries the current server actually uses.
#[derive(Debug, Default)]
pub struct ResourceCache {
    entries: Vec<CacheEntry>,
    index: HashSet<String>,
    marks: HashMap<String, CacheEntry>,
}

fn entry_key(resource: &str, filename: &str, hash: &str) -> String {
    format!("{}__{}__{}", resource, filename, hash).to_lowercase()
}

fn mark_key(resource: &str, filename: &str) -> String {
    format!("{}__{}", resource, filename).to_lowercase()
}

fn target_name(resource: &str, filename: &str, hash: &str) -> String {
    format!("{}_{}_{}", filename, resource, hash).to_lowercase()
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, resource: &str, filename: &str, hash: &str) -> bool {
        self.index.contains(&entry_key(resource, filename, hash))
    }

    pub fn entries(&self) -> &[CacheEntry] {
        &self.entries
    }

    /// Diffs a manifest against the cache: every required file whose exact
    /// content is not already present becomes a download.
    pub fn downloads_for(&self, resources: &[ResourceData]) -> Vec<ResourceDownload> {
        let mut downloads = Vec::new();

        for resource in resources {
            for file in &resource.files {
                if self.contains(&resource.name, &file.name, &file.hash) {
                    continue;
                }

                downloads.push(ResourceDownload {
                    source_url: resource.file_url(&file.name),
                    target_name: target_name(&resource.name, &file.name, &file.hash),
                    resource: resource.name.to_lowercase(),
                    filename: file.name.to_lowercase(),
                    hash: file.hash.to_lowercase(),
                });
            }
        }

        downloads
    }

    /// Stores downloaded content under its actual hash and returns that hash.
    pub fn commit(&mut self, resource: &str, filename: &str, data: &[u8]) -> String {
        let digest = Sha256::digest(data);
        let hash = digest.iter().fold(String::with_capacity(64), |mut out, b| {
            let _ = write!(out, "{b:02x}");
            out
        });

        let entry = CacheEntry {
            resource: resource.to_lowercase(),
            filename: filename.to_lowercase(),
            hash: hash.clone(),
        };

        let key = entry_key(&entry.resource, &entry.filename, &entry.hash);
        if self.index.insert(key) {
            self.entries.push(entry);
        }

        hash
    }

    pub fn clear_marks(&mut self) {
        self.marks.clear();
    }

    /// Marks every file the manifest requires as in use by the current
    /// server, keyed by resource and filename.
    pub fn mark_list(&mut self, resources: &[ResourceData]) {
        for resource in resources {
            for file in &resource.files {
                self.mark(&resource.name, &file.name, &file.hash);
            }
        }
    }

    pub fn mark_streaming(&mut self, streaming: &[StreamingResource]) {
        for file in streaming {
            self.mark(&file.resource, &file.filename, &file.hash);
        }
    }

    fn mark(&mut self, resource: &str, filename: &str, hash: &str) {
        let entry = CacheEntry {
            resource: resource.to_lowercase(),
            filename: filename.to_lowercase(),
            hash: hash.to_lowercase(),
        };

        self.marks.insert(mark_key(resource, filename), entry);
    }

    /// Device path of a marked file inside the cache mount.
    pub fn marked_path_for(&self, resource: &str, filename: &str) -> Option<String> {
        self.marks.get(&mark_key(resource, filename)).map(|entry| {
            format!(
                "cache:/{}",
                target_name(&entry.resource, &entry.filename, &entry.hash)
            )
        })
    }

    pub fn mark_count(&self) -> usize {
        self.marks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::manifest::parse_manifest;

    fn manifest_with(doc: &str) -> Vec<ResourceData> {
        parse_manifest(doc.as_bytes(), "host").unwrap().resources
    }

    #[test]
    fn test_downloads_for_skips_cached_files() {
        let resources = manifest_with(
            r#"{
                "fileServer": "http://%s/files",
                "resources": [
                    {"name": "lobby", "files": {"a.lua": "h1", "b.lua": "h2"}},
                    {"name": "maps", "files": {"c.dat": "h3"}}
                ]
            }"#,
        );

        let mut cache = ResourceCache::new();
        // pre-seed two of the three required files
        let h1 = cache.commit("lobby", "a.lua", b"alpha");
        let h3 = cache.commit("maps", "c.dat", b"gamma");
        assert!(cache.contains("lobby", "a.lua", &h1));
        assert!(cache.contains("maps", "c.dat", &h3));

        let resources: Vec<_> = resources
            .into_iter()
            .map(|mut r| {
                for file in &mut r.files {
                    file.hash = match file.name.as_str() {
                        "a.lua" => h1.clone(),
                        "c.dat" => h3.clone(),
                        _ => file.hash.clone(),
                    };
                }
                r
            })
            .collect();

        let downloads = cache.downloads_for(&resources);
        assert_eq!(downloads.len(), 1);
        assert_eq!(downloads[0].filename, "b.lua");
        assert_eq!(downloads[0].source_url, "http://host/files/lobby/b.lua");
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let mut cache = ResourceCache::new();
        let hash = cache.commit("Lobby", "Client.LUA", b"data");
        assert!(cache.contains("lobby", "client.lua", &hash));
        assert!(cache.contains("LOBBY", "CLIENT.lua", &hash.to_uppercase()));
    }

    #[test]
    fn test_commit_hashes_content() {
        let mut cache = ResourceCache::new();
        let hash = cache.commit("res", "f.bin", b"hello");
        assert_eq!(hash.len(), 64);
        assert_eq!(
            hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_duplicate_commit_keeps_one_entry() {
        let mut cache = ResourceCache::new();
        cache.commit("res", "f.bin", b"same");
        cache.commit("res", "f.bin", b"same");
        assert_eq!(cache.entries().len(), 1);
    }

    #[test]
    fn test_marked_path_uses_cache_device() {
        let mut cache = ResourceCache::new();
        let resources = manifest_with(
            r#"{
                "fileServer": "http://%s/files",
                "resources": [{"name": "world", "files": {"pack.pak": "abCD"}}]
            }"#,
        );

        cache.mark_list(&resources);
        assert_eq!(
            cache.marked_path_for("world", "pack.pak").as_deref(),
            Some("cache:/pack.pak_world_abcd")
        );
        assert!(cache.marked_path_for("world", "missing.pak").is_none());

        cache.clear_marks();
        assert_eq!(cache.mark_count(), 0);
    }
}
