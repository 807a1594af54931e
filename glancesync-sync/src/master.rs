//! Master catalog construction.
//!
//! Build flow:
//!
//! 1. Keep active, named images owned by the master tenant (or unowned).
//! 2. Drop every name that occurs more than once: an ambiguous master entry
//!    is never synchronised.
//! 3. Index the survivors by name.
//! 4. Rewrite `kernel_id`/`ramdisk_id` from image ids to image names, so the
//!    dependency can be matched in regions where ids differ.

use std::collections::{BTreeMap, HashMap};

use glancesync_core::image::AMI_PROPERTIES;
use glancesync_core::Image;

/// Master images indexed by name.
pub type MasterCatalog = BTreeMap<String, Image>;

/// Build the master catalog from the raw listing of the master region.
pub fn build_master_catalog(images: Vec<Image>, tenant_id: &str) -> MasterCatalog {
    let candidates: Vec<Image> = images
        .into_iter()
        .filter(|image| image.is_active() && !image.name.is_empty() && image.owned_by(tenant_id))
        .collect();

    let names_by_id: HashMap<String, String> = candidates
        .iter()
        .map(|image| (image.id.clone(), image.name.clone()))
        .collect();

    let mut occurrences: HashMap<&str, usize> = HashMap::new();
    for image in &candidates {
        *occurrences.entry(image.name.as_str()).or_default() += 1;
    }
    let duplicated: Vec<String> = occurrences
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(name, _)| name.to_string())
        .collect();
    for name in &duplicated {
        tracing::warn!(image = %name, "duplicated image name in master region; not synchronised");
    }

    let mut catalog = MasterCatalog::new();
    for mut image in candidates {
        if duplicated.contains(&image.name) {
            continue;
        }
        normalize_ami_references(&mut image, &names_by_id);
        catalog.insert(image.name.clone(), image);
    }
    catalog
}

fn normalize_ami_references(image: &mut Image, names_by_id: &HashMap<String, String>) {
    for prop in AMI_PROPERTIES {
        let Some(value) = image.user_properties.get(prop).cloned() else {
            continue;
        };
        if value.is_empty() {
            image.user_properties.remove(prop);
            continue;
        }
        match names_by_id.get(&value) {
            Some(name) => {
                image.user_properties.insert(prop.to_string(), name.clone());
            }
            None => tracing::warn!(
                image = %image.name,
                property = prop,
                id = %value,
                "AMI reference does not match any master image",
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glancesync_core::image::{KERNEL_ID, RAMDISK_ID};

    const TENANT: &str = "00000000000000000000000000000001";

    fn image(id: &str, name: &str) -> Image {
        let mut image = Image::new(id, name);
        image.owner = TENANT.to_string();
        image.is_public = true;
        image
    }

    #[test]
    fn inactive_unnamed_and_foreign_images_are_excluded() {
        let mut queued = image("1", "queued");
        queued.status = "queued".into();
        let unnamed = image("2", "");
        let mut foreign = image("3", "foreign");
        foreign.owner = "99".into();
        let mut unowned = image("4", "unowned");
        unowned.owner.clear();
        let mut padded = image("5", "padded");
        padded.owner = "1".into();

        let catalog = build_master_catalog(vec![queued, unnamed, foreign, unowned, padded], TENANT);
        let names: Vec<&str> = catalog.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["padded", "unowned"]);
    }

    #[test]
    fn duplicated_names_are_dropped_entirely() {
        let catalog = build_master_catalog(
            vec![image("1", "base"), image("2", "base"), image("3", "other")],
            TENANT,
        );
        assert!(!catalog.contains_key("base"), "no last-write-wins");
        assert!(catalog.contains_key("other"));
    }

    #[test]
    fn inactive_duplicate_does_not_cause_a_drop() {
        let mut killed = image("2", "base");
        killed.status = "killed".into();
        let catalog = build_master_catalog(vec![image("1", "base"), killed], TENANT);
        assert_eq!(catalog["base"].id, "1");
    }

    #[test]
    fn ami_references_become_names() {
        let kernel = image("k-1", "kern");
        let ramdisk = image("r-1", "initrd");
        let mut ami = image("a-1", "ami1");
        ami.user_properties.insert(KERNEL_ID.into(), "k-1".into());
        ami.user_properties.insert(RAMDISK_ID.into(), "r-1".into());

        let catalog = build_master_catalog(vec![kernel, ramdisk, ami], TENANT);
        assert_eq!(catalog["ami1"].property(KERNEL_ID), Some("kern"));
        assert_eq!(catalog["ami1"].property(RAMDISK_ID), Some("initrd"));
    }

    #[test]
    fn empty_ami_references_are_removed() {
        let mut ami = image("a-1", "ami1");
        ami.user_properties.insert(KERNEL_ID.into(), String::new());
        let catalog = build_master_catalog(vec![ami], TENANT);
        assert!(catalog["ami1"].property(KERNEL_ID).is_none());
    }

    #[test]
    fn unresolvable_reference_is_kept() {
        let mut ami = image("a-1", "ami1");
        ami.user_properties.insert(KERNEL_ID.into(), "gone".into());
        let catalog = build_master_catalog(vec![ami], TENANT);
        assert_eq!(catalog["ami1"].property(KERNEL_ID), Some("gone"));
    }
}
