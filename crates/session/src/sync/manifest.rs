use std::collections::BTreeMap;

use serde::Deserialize;

use super::SyncError;

/// One required file of a resource, keyed by content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceFile {
    pub name: String,
    pub hash: String,
}

/// A resource the server requires, with the file server its files are
/// pulled from.
#[derive(Debug, Clone)]
pub struct ResourceData {
    pub name: String,
    pub base_url: String,
    pub files: Vec<ResourceFile>,
    processed: bool,
}

impl ResourceData {
    pub fn is_processed(&self) -> bool {
        self.processed
    }

    pub fn set_processed(&mut self) {
        self.processed = true;
    }

    pub fn file_url(&self, filename: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.name, filename)
    }
}

/// A streamed asset, fetched on demand rather than during sync.
#[derive(Debug, Clone)]
pub struct StreamingResource {
    pub resource: String,
    pub filename: String,
    pub hash: String,
    pub size: u32,
    pub flags: u32,
    pub version: u32,
}

#[derive(Debug, Default)]
pub struct Manifest {
    pub imports: Vec<String>,
    pub resources: Vec<ResourceData>,
    pub streaming: Vec<StreamingResource>,
    pub load_screen: Option<String>,
}

#[derive(Deserialize)]
struct RawStreamFile {
    hash: String,
    #[serde(default)]
    size: u32,
    #[serde(rename = "rscFlags", default)]
    rsc_flags: u32,
    #[serde(rename = "rscVersion", default)]
    rsc_version: u32,
}

#[derive(Deserialize)]
struct RawResource {
    name: String,
    #[serde(default)]
    files: BTreeMap<String, String>,
    #[serde(rename = "streamFiles", default)]
    stream_files: BTreeMap<String, RawStreamFile>,
    #[serde(rename = "fileServer")]
    file_server: Option<String>,
}

#[derive(Deserialize)]
struct RawManifest {
    #[serde(default)]
    imports: Vec<String>,
    #[serde(rename = "fileServer")]
    file_server: Option<String>,
    #[serde(default)]
    resources: Vec<RawResource>,
    #[serde(rename = "loadScreen")]
    load_screen: Option<String>,
}

/// Parses a configuration document. `%s` in any file server URL stands for
/// the host the configuration came from. Resources without a usable file
/// server are dropped with a warning; imports are kept regardless.
pub fn parse_manifest(data: &[u8], server_host: &str) -> Result<Manifest, SyncError> {
    let raw: RawManifest =
        serde_json::from_slice(data).map_err(|e| SyncError::Manifest(e.to_string()))?;

    let default_server = raw
        .file_server
        .map(|url| url.replace("%s", server_host));

    let mut manifest = Manifest {
        imports: raw.imports,
        load_screen: raw.load_screen,
        ..Manifest::default()
    };

    for resource in raw.resources {
        let base_url = match resource
            .file_server
            .map(|url| url.replace("%s", server_host))
            .or_else(|| default_server.clone())
        {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => {
                log::warn!("resource {} has no file server, skipping", resource.name);
                continue;
            }
        };

        for (filename, raw_file) in resource.stream_files {
            manifest.streaming.push(StreamingResource {
                resource: resource.name.clone(),
                filename,
                hash: raw_file.hash,
                size: raw_file.size,
                flags: raw_file.rsc_flags,
                version: raw_file.rsc_version,
            });
        }

        manifest.resources.push(ResourceData {
            files: resource
                .files
                .into_iter()
                .map(|(name, hash)| ResourceFile { name, hash })
                .collect(),
            name: resource.name,
            base_url,
            processed: false,
        });
    }

    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_substitutes_host_and_builds_urls() {
        let doc = br#"{
            "fileServer": "http://%s/files",
            "resources": [
                {"name": "lobby", "files": {"client.lua": "abc123"}}
            ]
        }"#;

        let manifest = parse_manifest(doc, "play.example.com:30120").unwrap();
        assert_eq!(manifest.resources.len(), 1);

        let lobby = &manifest.resources[0];
        assert_eq!(lobby.base_url, "http://play.example.com:30120/files");
        assert_eq!(
            lobby.file_url("client.lua"),
            "http://play.example.com:30120/files/lobby/client.lua"
        );
    }

    #[test]
    fn test_per_resource_file_server_wins() {
        let doc = br#"{
            "fileServer": "http://%s/files",
            "resources": [
                {"name": "maps", "files": {"m.dat": "ff"}, "fileServer": "http://cdn.example.com/"}
            ]
        }"#;

        let manifest = parse_manifest(doc, "host").unwrap();
        assert_eq!(manifest.resources[0].base_url, "http://cdn.example.com");
    }

    #[test]
    fn test_resource_without_file_server_dropped_imports_kept() {
        let doc = br#"{
            "imports": ["http://imports.example.com/base"],
            "resources": [
                {"name": "orphan", "files": {"x.lua": "1"}}
            ]
        }"#;

        let manifest = parse_manifest(doc, "host").unwrap();
        assert!(manifest.resources.is_empty());
        assert_eq!(manifest.imports.len(), 1);
    }

    #[test]
    fn test_stream_files_collected() {
        let doc = br#"{
            "fileServer": "http://%s/files",
            "resources": [
                {"name": "world", "files": {},
                 "streamFiles": {"tree.mdl": {"hash": "aa", "size": 512,
                                              "rscFlags": 1, "rscVersion": 4}}}
            ]
        }"#;

        let manifest = parse_manifest(doc, "host").unwrap();
        assert_eq!(manifest.streaming.len(), 1);
        assert_eq!(manifest.streaming[0].filename, "tree.mdl");
        assert_eq!(manifest.streaming[0].size, 512);
        assert_eq!(manifest.streaming[0].flags, 1);
        assert_eq!(manifest.streaming[0].version, 4);
    }

    #[test]
    fn test_garbage_is_a_manifest_error() {
        assert!(matches!(
            parse_manifest(b"not json", "host"),
            Err(SyncError::Manifest(_))
        ));
    }
}
