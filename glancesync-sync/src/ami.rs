//! AMI dependency resolution.
//!
//! In the master catalog `kernel_id`/`ramdisk_id` hold image *names* (see
//! [`crate::master`]); in a region they must hold the regional *ids* of the
//! images with those names.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use glancesync_core::image::AMI_PROPERTIES;
use glancesync_core::Image;

/// Prefix written when a dependency cannot be found in the region.
pub const MISSING_PREFIX: &str = "__";

/// State of an image's kernel/ramdisk references in one region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AmiStatus {
    /// References match the region.
    Ready,
    /// References must be rewritten (or removed).
    Update,
    /// A dependency will exist once this pass uploads it.
    Pending,
    /// A dependency is absent from the region and not being uploaded.
    Missing,
}

impl fmt::Display for AmiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AmiStatus::Ready => "ready",
            AmiStatus::Update => "update",
            AmiStatus::Pending => "pending",
            AmiStatus::Missing => "missing",
        };
        f.write_str(label)
    }
}

/// Status of a single property.
pub fn check_property(
    prop: &str,
    image: &Image,
    master: &Image,
    region_by_name: &BTreeMap<String, Image>,
    pending_upload: &BTreeSet<String>,
) -> AmiStatus {
    let Some(dependency) = master.property(prop) else {
        return if image.property(prop).is_none() {
            AmiStatus::Ready
        } else {
            AmiStatus::Update
        };
    };
    match region_by_name.get(dependency) {
        None if pending_upload.contains(dependency) => AmiStatus::Pending,
        None => AmiStatus::Missing,
        Some(regional) if image.property(prop) == Some(regional.id.as_str()) => AmiStatus::Ready,
        Some(_) => AmiStatus::Update,
    }
}

/// Combined kernel + ramdisk status of `image` against its master counterpart.
pub fn check_ami(
    image: &Image,
    master: &Image,
    region_by_name: &BTreeMap<String, Image>,
    pending_upload: &BTreeSet<String>,
) -> AmiStatus {
    let [kernel, ramdisk] =
        AMI_PROPERTIES.map(|prop| check_property(prop, image, master, region_by_name, pending_upload));
    combine(kernel, ramdisk)
}

fn combine(a: AmiStatus, b: AmiStatus) -> AmiStatus {
    use AmiStatus::*;
    match (a, b) {
        (a, b) if a == b => a,
        (Missing, _) | (_, Missing) => Missing,
        (Pending, _) | (_, Pending) => Pending,
        _ => Update,
    }
}

/// Rewrite `image`'s kernel/ramdisk properties to the regional ids.
///
/// Properties absent from `master` are removed. A dependency missing from the
/// region is recorded as `"__" + name` so the breakage stays visible.
pub fn update_kernelramdisk_id(
    image: &mut Image,
    master: &Image,
    region_by_name: &BTreeMap<String, Image>,
) {
    for prop in AMI_PROPERTIES {
        let Some(dependency) = master.property(prop) else {
            image.user_properties.remove(prop);
            continue;
        };
        let value = match region_by_name.get(dependency) {
            Some(regional) => regional.id.clone(),
            None => {
                tracing::warn!(
                    image = %image.name,
                    property = prop,
                    dependency,
                    "AMI dependency missing in region",
                );
                format!("{MISSING_PREFIX}{dependency}")
            }
        };
        image.user_properties.insert(prop.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glancesync_core::image::{KERNEL_ID, RAMDISK_ID};

    fn with_props(id: &str, name: &str, props: &[(&str, &str)]) -> Image {
        let mut image = Image::new(id, name);
        for (k, v) in props {
            image.user_properties.insert(k.to_string(), v.to_string());
        }
        image
    }

    fn region(images: &[Image]) -> BTreeMap<String, Image> {
        images.iter().map(|i| (i.name.clone(), i.clone())).collect()
    }

    fn pending(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_references_is_ready() {
        let image = with_props("r-1", "ami1", &[]);
        let master = with_props("m-1", "ami1", &[]);
        assert_eq!(
            check_ami(&image, &master, &BTreeMap::new(), &BTreeSet::new()),
            AmiStatus::Ready
        );
    }

    #[test]
    fn stale_reference_needs_update() {
        let image = with_props("r-1", "ami1", &[(KERNEL_ID, "old")]);
        let master = with_props("m-1", "ami1", &[]);
        assert_eq!(
            check_ami(&image, &master, &BTreeMap::new(), &BTreeSet::new()),
            AmiStatus::Update
        );
    }

    #[test]
    fn matching_regional_id_is_ready() {
        let kern = with_props("rk", "kern", &[]);
        let image = with_props("r-1", "ami1", &[(KERNEL_ID, "rk")]);
        let master = with_props("m-1", "ami1", &[(KERNEL_ID, "kern")]);
        let by_name = region(&[kern]);
        assert_eq!(
            check_ami(&image, &master, &by_name, &BTreeSet::new()),
            AmiStatus::Ready
        );

        let wrong = with_props("r-1", "ami1", &[(KERNEL_ID, "mk")]);
        assert_eq!(
            check_ami(&wrong, &master, &by_name, &BTreeSet::new()),
            AmiStatus::Update
        );
    }

    #[test]
    fn absent_dependency_is_pending_or_missing() {
        let image = with_props("r-1", "ami1", &[]);
        let master = with_props("m-1", "ami1", &[(KERNEL_ID, "kern")]);
        assert_eq!(
            check_ami(&image, &master, &BTreeMap::new(), &pending(&["kern"])),
            AmiStatus::Pending
        );
        assert_eq!(
            check_ami(&image, &master, &BTreeMap::new(), &BTreeSet::new()),
            AmiStatus::Missing
        );
    }

    #[test]
    fn combination_prefers_missing_then_pending() {
        use AmiStatus::*;
        assert_eq!(combine(Ready, Ready), Ready);
        assert_eq!(combine(Ready, Update), Update);
        assert_eq!(combine(Pending, Missing), Missing);
        assert_eq!(combine(Update, Missing), Missing);
        assert_eq!(combine(Ready, Pending), Pending);
        assert_eq!(combine(Pending, Update), Pending);
    }

    #[test]
    fn kernel_and_ramdisk_are_checked_independently() {
        let kern = with_props("rk", "kern", &[]);
        let image = with_props("r-1", "ami1", &[(KERNEL_ID, "rk")]);
        let master = with_props("m-1", "ami1", &[(KERNEL_ID, "kern"), (RAMDISK_ID, "initrd")]);
        assert_eq!(
            check_ami(&image, &master, &region(&[kern]), &pending(&["initrd"])),
            AmiStatus::Pending
        );
    }

    #[test]
    fn update_rewrites_removes_and_marks_missing() {
        let kern = with_props("rk", "kern", &[]);
        let master = with_props("m-1", "ami1", &[(KERNEL_ID, "kern"), (RAMDISK_ID, "initrd")]);
        let mut image = with_props("r-1", "ami1", &[(KERNEL_ID, "stale")]);
        let by_name = region(&[kern]);

        update_kernelramdisk_id(&mut image, &master, &by_name);
        assert_eq!(image.property(KERNEL_ID), Some("rk"));
        assert_eq!(image.property(RAMDISK_ID), Some("__initrd"));

        // A second pass keeps a single prefix.
        update_kernelramdisk_id(&mut image, &master, &by_name);
        assert_eq!(image.property(RAMDISK_ID), Some("__initrd"));

        let plain = with_props("m-2", "ami1", &[]);
        update_kernelramdisk_id(&mut image, &plain, &by_name);
        assert!(image.property(KERNEL_ID).is_none());
        assert!(image.property(RAMDISK_ID).is_none());
    }
}
