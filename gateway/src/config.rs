//! YAML configuration loading: a single document with `secret_file:`
//! indirection for any secret-shaped value, and a `clusters: path:/dir`
//! directory-of-YAML-files loading mode. Mirrors `RemoteStorageConfig`'s
//! `from_toml` boundary in the teacher: one pure parse function, one
//! loader that touches the filesystem and the environment.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use model::Cluster;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("neither YAML_CONFIG_FILE nor INPUT_YAML_CONFIG_FILE is set")]
    MissingEnvVar,
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("cluster config validation failed: {0}")]
    Validation(#[from] model::ConfigError),
    #[error("clusters string value must start with 'path:', got {0:?}")]
    InvalidClustersField(String),
}

/// A secret that may be inlined or loaded from disk via `secret_file:/path`.
/// Resolved eagerly at deserialize time so downstream code only ever sees
/// the resolved value.
#[derive(Clone)]
pub struct SecretValue(pub String);

impl<'de> Deserialize<'de> for SecretValue {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        match raw.strip_prefix("secret_file:") {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .map_err(|e| serde::de::Error::custom(format!("reading {path}: {e}")))?;
                Ok(SecretValue(contents.trim_end().to_string()))
            }
            None => Ok(SecretValue(raw)),
        }
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretValue(..)")
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthEndpoint {
    pub url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    pub authentication: AuthEndpoint,
    pub authorization: AuthEndpoint,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticKeyEntry {
    pub private_key: SecretValue,
    pub public_cert: Option<String>,
    pub passphrase: Option<SecretValue>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SshCredentialsConfig {
    KeyService { url: String },
    Static(HashMap<String, StaticKeyEntry>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    pub public_endpoint: String,
    pub private_endpoint: String,
    pub region: Option<String>,
    pub tenant: Option<String>,
    #[serde(default)]
    pub part_size_bytes: Option<u64>,
    #[serde(default)]
    pub max_part_size_bytes: Option<u64>,
    #[serde(default)]
    pub bucket_lifecycle_days: Option<u32>,
    #[serde(default)]
    pub egress_concurrency: Option<usize>,
    pub access_key_id: SecretValue,
    pub secret_access_key: SecretValue,
}

/// `clusters` is either an inline list of `Cluster` records or the literal
/// string `path:/dir`, meaning "load one YAML file per cluster from this
/// directory tree".
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ClustersField {
    Inline(Vec<Cluster>),
    Directory(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGatewayConfig {
    app_version: String,
    apis_root_path: String,
    #[serde(default)]
    doc_servers: Vec<String>,
    auth: AuthConfig,
    ssh_credentials: SshCredentialsConfig,
    clusters: ClustersField,
    storage: StorageConfig,
}

#[derive(Debug)]
pub struct GatewayConfig {
    pub app_version: String,
    pub apis_root_path: String,
    pub doc_servers: Vec<String>,
    pub auth: AuthConfig,
    pub ssh_credentials: SshCredentialsConfig,
    pub clusters: Vec<Cluster>,
    pub storage: StorageConfig,
}

/// Reads `YAML_CONFIG_FILE`, falling back to `INPUT_YAML_CONFIG_FILE`.
/// Absence of both is a startup error, matching spec.md §6.
pub fn config_path_from_env() -> Result<PathBuf, ConfigLoadError> {
    std::env::var("YAML_CONFIG_FILE")
        .or_else(|_| std::env::var("INPUT_YAML_CONFIG_FILE"))
        .map(PathBuf::from)
        .map_err(|_| ConfigLoadError::MissingEnvVar)
}

pub fn load(path: &Path) -> Result<GatewayConfig, ConfigLoadError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigLoadError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let raw: RawGatewayConfig = serde_yaml::from_str(&text).map_err(|e| ConfigLoadError::Yaml {
        path: path.to_path_buf(),
        source: e,
    })?;

    let clusters = match raw.clusters {
        ClustersField::Inline(clusters) => clusters,
        ClustersField::Directory(spec) => {
            let dir = spec
                .strip_prefix("path:")
                .ok_or_else(|| ConfigLoadError::InvalidClustersField(spec.clone()))?;
            load_clusters_dir(Path::new(dir))?
        }
    };

    for cluster in &clusters {
        cluster.validate()?;
    }

    Ok(GatewayConfig {
        app_version: raw.app_version,
        apis_root_path: raw.apis_root_path,
        doc_servers: raw.doc_servers,
        auth: raw.auth,
        ssh_credentials: raw.ssh_credentials,
        clusters,
        storage: raw.storage,
    })
}

fn load_clusters_dir(dir: &Path) -> Result<Vec<Cluster>, ConfigLoadError> {
    let mut clusters = Vec::new();
    for entry in walk_yaml_files(dir)? {
        let text = std::fs::read_to_string(&entry).map_err(|e| ConfigLoadError::Io {
            path: entry.clone(),
            source: e,
        })?;
        let cluster: Cluster = serde_yaml::from_str(&text).map_err(|e| ConfigLoadError::Yaml {
            path: entry.clone(),
            source: e,
        })?;
        clusters.push(cluster);
    }
    Ok(clusters)
}

fn walk_yaml_files(dir: &Path) -> Result<Vec<PathBuf>, ConfigLoadError> {
    let mut files = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(|e| ConfigLoadError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;
    for entry in entries {
        let entry = entry.map_err(|e| ConfigLoadError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        if path.is_dir() {
            files.extend(walk_yaml_files(&path)?);
        } else if matches!(path.extension().and_then(|e| e.to_str()), Some("yaml") | Some("yml")) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    const CLUSTER_YAML: &str = r#"
name: daint
ssh:
  host: daint.example
  timeouts:
    connectSecs: 5
    loginSecs: 5
    executeSecs: 10
    idleSecs: 60
    keepAliveSecs: 5
scheduler:
  type: slurm
serviceAccount:
  clientId: svc
  secret: secret
"#;

    #[test]
    fn secret_file_indirection_reads_referenced_file() {
        let dir = tempfile::tempdir().unwrap();
        let secret_path = write_temp(&dir, "secret.txt", "topsecret\n");
        let yaml = format!("\"secret_file:{}\"", secret_path.display());
        let value: SecretValue = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(value.0, "topsecret");
    }

    #[test]
    fn inline_secret_is_used_verbatim() {
        let value: SecretValue = serde_yaml::from_str("\"inline-secret\"").unwrap();
        assert_eq!(value.0, "inline-secret");
    }

    #[test]
    fn clusters_directory_mode_loads_every_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        write_temp(&dir, "daint.yaml", CLUSTER_YAML);
        let clusters = load_clusters_dir(dir.path()).unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].name.0.as_str(), "daint");
    }
}
