//! YAML configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.glancesync/
//!   config.yaml     (targets and policies)
//!   catalog/        (default root of the local catalog repository)
//!   backups/        (default root for `make-backup`)
//! ```
//!
//! # API pattern
//!
//! Loaders take explicit paths (`load_at`, `config_path_at(home)`) so tests
//! can point them at a `TempDir`; callers resolve `home()` once.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::condition::MetadataCondition;
use crate::error::{io_err, ConfigError};
use crate::target::{RegionId, Target, DEFAULT_LIST_IMAGES_TIMEOUT, MASTER_TARGET};

pub const CONFIG_FILE: &str = "config.yaml";

// ---------------------------------------------------------------------------
// 1. On-disk shape
// ---------------------------------------------------------------------------

/// Raw `config.yaml` document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub master_region: String,
    #[serde(default = "default_max_children")]
    pub max_children: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_dir: Option<PathBuf>,
    #[serde(default)]
    pub targets: BTreeMap<String, TargetConfig>,
}

/// One `targets.<name>` entry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub credential: String,
    pub keystone_url: String,
    pub tenant: String,
    pub use_keystone_v3: bool,
    pub forcesyncs: BTreeSet<String>,
    pub replace: BTreeSet<String>,
    pub rename: BTreeSet<String>,
    pub dontupdate: BTreeSet<String>,
    pub metadata_set: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_condition: Option<String>,
    pub ignore_regions: BTreeSet<String>,
    pub only_tenant_images: bool,
    pub support_obsolete_images: bool,
    pub obsolete_syncprops: BTreeSet<String>,
    /// Seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_images_timeout: Option<u64>,
}

fn default_max_children() -> usize {
    1
}

// ---------------------------------------------------------------------------
// 2. Validated configuration
// ---------------------------------------------------------------------------

/// Validated configuration with compiled targets.
#[derive(Debug, Clone)]
pub struct Config {
    pub master_region: String,
    pub max_children: usize,
    pub catalog_dir: Option<PathBuf>,
    pub backup_dir: Option<PathBuf>,
    pub targets: BTreeMap<String, Target>,
}

impl Config {
    /// Validate a raw document and compile its metadata conditions.
    pub fn from_file(file: ConfigFile) -> Result<Self, ConfigError> {
        if file.master_region.trim().is_empty() {
            return Err(ConfigError::MissingMasterRegion);
        }
        if !file.targets.contains_key(MASTER_TARGET) {
            return Err(ConfigError::UnknownTarget {
                target: MASTER_TARGET.to_string(),
            });
        }

        let mut targets = BTreeMap::new();
        for (name, raw) in file.targets {
            let target = compile_target(&name, raw)?;
            targets.insert(name, target);
        }

        Ok(Self {
            master_region: file.master_region,
            max_children: file.max_children.max(1),
            catalog_dir: file.catalog_dir,
            backup_dir: file.backup_dir,
            targets,
        })
    }

    pub fn master_target(&self) -> &Target {
        // Presence is checked in `from_file`.
        &self.targets[MASTER_TARGET]
    }

    pub fn target(&self, name: &str) -> Result<&Target, ConfigError> {
        self.targets.get(name).ok_or_else(|| ConfigError::UnknownTarget {
            target: name.to_string(),
        })
    }

    pub fn master_region_id(&self) -> RegionId {
        RegionId::new(MASTER_TARGET, self.master_region.clone())
    }

    /// Parse a `target:region` id and check its target is configured.
    pub fn resolve_region(&self, id: &str) -> Result<RegionId, ConfigError> {
        let region: RegionId = id.parse()?;
        self.target(&region.target)?;
        Ok(region)
    }

    /// Configured `catalog_dir`, or `<home>/.glancesync/catalog/`.
    pub fn catalog_root(&self, home: &Path) -> PathBuf {
        self.catalog_dir
            .clone()
            .unwrap_or_else(|| default_catalog_dir(home))
    }

    /// Configured `backup_dir`, or `<home>/.glancesync/backups/`.
    pub fn backup_root(&self, home: &Path) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| default_backup_dir(home))
    }
}

fn compile_target(name: &str, raw: TargetConfig) -> Result<Target, ConfigError> {
    if raw.credential.trim().is_empty() {
        return Err(ConfigError::MissingCredential {
            target: name.to_string(),
        });
    }
    let metadata_condition = raw
        .metadata_condition
        .as_deref()
        .filter(|source| !source.trim().is_empty())
        .map(MetadataCondition::parse)
        .transpose()
        .map_err(|source| ConfigError::InvalidCondition {
            target: name.to_string(),
            source,
        })?;

    Ok(Target {
        name: name.to_string(),
        credential: raw.credential,
        keystone_url: raw.keystone_url,
        tenant: raw.tenant,
        use_keystone_v3: raw.use_keystone_v3,
        forcesyncs: raw.forcesyncs,
        replace: raw.replace,
        rename: raw.rename,
        dontupdate: raw.dontupdate,
        metadata_set: raw.metadata_set,
        metadata_condition,
        ignore_regions: raw.ignore_regions,
        only_tenant_images: raw.only_tenant_images,
        support_obsolete_images: raw.support_obsolete_images,
        obsolete_syncprops: raw.obsolete_syncprops,
        list_images_timeout: raw
            .list_images_timeout
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_LIST_IMAGES_TIMEOUT),
    })
}

// ---------------------------------------------------------------------------
// 3. Paths
// ---------------------------------------------------------------------------

/// `<home>/.glancesync/`
pub fn glancesync_root(home: &Path) -> PathBuf {
    home.join(".glancesync")
}

/// `<home>/.glancesync/config.yaml`. Pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    glancesync_root(home).join(CONFIG_FILE)
}

/// `<home>/.glancesync/catalog/`
pub fn default_catalog_dir(home: &Path) -> PathBuf {
    glancesync_root(home).join("catalog")
}

/// `<home>/.glancesync/backups/`
pub fn default_backup_dir(home: &Path) -> PathBuf {
    glancesync_root(home).join("backups")
}

// ---------------------------------------------------------------------------
// 4. Load
// ---------------------------------------------------------------------------

/// Load and validate the configuration at `path`.
///
/// Returns `ConfigError::NotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    parse(&contents, path)
}

/// Parse YAML contents; `path` is only used for error context.
pub fn parse(contents: &str, path: &Path) -> Result<Config, ConfigError> {
    let file: ConfigFile = serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    Config::from_file(file)
}

/// The user's home directory, root of `~/.glancesync/`.
pub fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
master_region: Spain2
max_children: 3
targets:
  master:
    credential: admin,secret,admin
    tenant: "1"
    metadata_set: [type, nid]
    replace: [any]
    list_images_timeout: 5
  experimental:
    credential: other,secret,other
    metadata_condition: "public and has('nid')"
    ignore_regions: [Trento]
"#;

    fn sample() -> Config {
        parse(SAMPLE, Path::new("config.yaml")).expect("parse sample")
    }

    #[test]
    fn parses_targets_and_policies() {
        let config = sample();
        assert_eq!(config.master_region, "Spain2");
        assert_eq!(config.max_children, 3);

        let master = config.master_target();
        assert_eq!(master.name, MASTER_TARGET);
        assert!(master.replaces("anything"));
        assert_eq!(master.metadata_set.len(), 2);
        assert_eq!(master.list_images_timeout, Duration::from_secs(5));

        let experimental = config.target("experimental").expect("target");
        assert!(experimental.metadata_condition.is_some());
        assert!(experimental.ignore_regions.contains("Trento"));
        assert_eq!(experimental.list_images_timeout, DEFAULT_LIST_IMAGES_TIMEOUT);
    }

    #[test]
    fn max_children_defaults_to_one() {
        let config = parse(
            "master_region: R\ntargets:\n  master:\n    credential: c\n",
            Path::new("c.yaml"),
        )
        .expect("parse");
        assert_eq!(config.max_children, 1);
    }

    #[test]
    fn missing_credential_is_rejected() {
        let err = parse(
            "master_region: R\ntargets:\n  master:\n    tenant: t\n",
            Path::new("c.yaml"),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredential { ref target } if target == "master"));
    }

    #[test]
    fn missing_master_target_is_rejected() {
        let err = parse(
            "master_region: R\ntargets:\n  other:\n    credential: c\n",
            Path::new("c.yaml"),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownTarget { .. }));
    }

    #[test]
    fn empty_master_region_is_rejected() {
        let err = parse(
            "master_region: ''\ntargets:\n  master:\n    credential: c\n",
            Path::new("c.yaml"),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingMasterRegion));
    }

    #[test]
    fn invalid_condition_names_the_target() {
        let err = parse(
            "master_region: R\ntargets:\n  master:\n    credential: c\n    metadata_condition: 'eval(x)'\n",
            Path::new("c.yaml"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("master"), "got: {err}");
    }

    #[test]
    fn resolve_region_checks_target() {
        let config = sample();
        assert_eq!(
            config.resolve_region("experimental:Lannion").expect("resolve"),
            RegionId::new("experimental", "Lannion")
        );
        assert!(config.resolve_region("unknown:Lannion").is_err());
        assert_eq!(config.master_region_id().to_string(), "Spain2");
    }
}
