//! The catalog entry shared by every region.
//!
//! An [`Image`] is a snapshot of one Glance image as returned by a repository
//! listing. Identity is `(region, id)`; `name` is the key used to match images
//! across regions and is not guaranteed to be unique within a region.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Property holding the id (or, in the master catalog, the name) of the kernel image.
pub const KERNEL_ID: &str = "kernel_id";
/// Property holding the id (or, in the master catalog, the name) of the ramdisk image.
pub const RAMDISK_ID: &str = "ramdisk_id";
/// Both AMI dependency properties, in resolution order.
pub const AMI_PROPERTIES: [&str; 2] = [KERNEL_ID, RAMDISK_ID];

/// Suffix marking a retired image.
pub const OBSOLETE_SUFFIX: &str = "_obsolete";

/// Glance status of an image that is fully uploaded and usable.
pub const STATUS_ACTIVE: &str = "active";

/// Width of tenant ids after zero padding.
const TENANT_ID_WIDTH: usize = 32;

/// One image of one region's catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub checksum: String,
    /// Size in bytes.
    #[serde(default)]
    pub size: u64,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub user_properties: BTreeMap<String, String>,
    /// Untouched repository payload, kept for backups.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub raw: Value,
}

fn default_status() -> String {
    STATUS_ACTIVE.to_string()
}

impl Image {
    /// A minimal active, private image with no properties.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            region: String::new(),
            owner: String::new(),
            is_public: false,
            checksum: String::new(),
            size: 0,
            status: default_status(),
            user_properties: BTreeMap::new(),
            raw: Value::Null,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == STATUS_ACTIVE
    }

    pub fn is_obsolete(&self) -> bool {
        self.name.ends_with(OBSOLETE_SUFFIX)
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.user_properties.get(key).map(String::as_str)
    }

    /// True if the image is owned by `tenant_id`. An empty owner matches any tenant.
    pub fn owned_by(&self, tenant_id: &str) -> bool {
        self.owner.is_empty() || same_tenant(&self.owner, tenant_id)
    }

    /// Size in megabytes, for reporting.
    pub fn size_mb(&self) -> f64 {
        bytes_to_mb(self.size)
    }
}

impl fmt::Display for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Compare tenant ids after left zero-padding both to 32 characters.
pub fn same_tenant(a: &str, b: &str) -> bool {
    zero_pad(a) == zero_pad(b)
}

fn zero_pad(id: &str) -> String {
    format!("{id:0>width$}", width = TENANT_ID_WIDTH)
}

pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}
