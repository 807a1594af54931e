//! Targets (credential/policy groups) and region identifiers.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::condition::MetadataCondition;
use crate::error::ConfigError;

/// Name of the target that owns the master region.
pub const MASTER_TARGET: &str = "master";

/// Policy value in `replace`/`rename` matching every checksum.
pub const ANY_CHECKSUM: &str = "any";

pub const DEFAULT_LIST_IMAGES_TIMEOUT: Duration = Duration::from_secs(30);

/// Policy bundle shared by every region reachable with one credential.
#[derive(Debug, Clone)]
pub struct Target {
    pub name: String,
    pub credential: String,
    pub keystone_url: String,
    pub tenant: String,
    pub use_keystone_v3: bool,
    /// Image ids synchronised regardless of any other rule.
    pub forcesyncs: BTreeSet<String>,
    /// Checksums (or `any`) whose conflicting regional images are replaced.
    pub replace: BTreeSet<String>,
    /// Checksums (or `any`) whose conflicting regional images are renamed.
    pub rename: BTreeSet<String>,
    /// Checksums whose conflicting regional images are left alone.
    pub dontupdate: BTreeSet<String>,
    pub metadata_set: BTreeSet<String>,
    pub metadata_condition: Option<MetadataCondition>,
    pub ignore_regions: BTreeSet<String>,
    pub only_tenant_images: bool,
    pub support_obsolete_images: bool,
    pub obsolete_syncprops: BTreeSet<String>,
    pub list_images_timeout: Duration,
}

impl Target {
    /// A target with no policies configured.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            credential: String::new(),
            keystone_url: String::new(),
            tenant: String::new(),
            use_keystone_v3: false,
            forcesyncs: BTreeSet::new(),
            replace: BTreeSet::new(),
            rename: BTreeSet::new(),
            dontupdate: BTreeSet::new(),
            metadata_set: BTreeSet::new(),
            metadata_condition: None,
            ignore_regions: BTreeSet::new(),
            only_tenant_images: false,
            support_obsolete_images: false,
            obsolete_syncprops: BTreeSet::new(),
            list_images_timeout: DEFAULT_LIST_IMAGES_TIMEOUT,
        }
    }

    pub fn replaces(&self, checksum: &str) -> bool {
        self.replace.contains(checksum) || self.replace.contains(ANY_CHECKSUM)
    }

    pub fn renames(&self, checksum: &str) -> bool {
        self.rename.contains(checksum) || self.rename.contains(ANY_CHECKSUM)
    }

    pub fn region_id(&self, region: &str) -> RegionId {
        RegionId::new(self.name.clone(), region)
    }
}

/// A region qualified by its target: `target:region`.
///
/// Regions of the master target are written without prefix; `master:region`
/// is accepted as an alias on input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId {
    pub target: String,
    pub region: String,
}

impl RegionId {
    pub fn new(target: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            region: region.into(),
        }
    }
}

impl FromStr for RegionId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (target, region) = match s.split_once(':') {
            Some((target, region)) => (target, region),
            None => (MASTER_TARGET, s),
        };
        if target.is_empty() || region.is_empty() || region.contains(':') {
            return Err(ConfigError::InvalidRegionId(s.to_string()));
        }
        Ok(Self::new(target, region))
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.target == MASTER_TARGET {
            write!(f, "{}", self.region)
        } else {
            write!(f, "{}:{}", self.target, self.region)
        }
    }
}
