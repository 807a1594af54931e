//! Obsolete-image lifecycle.
//!
//! A master image renamed to `<name>_obsolete` is retired: regions keep their
//! copy, but it is renamed the same way and its `obsolete_syncprops` follow
//! master. Runs before reconciliation; the images it touches are excluded from
//! the main pass.

use std::collections::{BTreeMap, BTreeSet};

use glancesync_core::image::OBSOLETE_SUFFIX;
use glancesync_core::{Image, RegionId, Target};

use crate::error::RepositoryError;
use crate::master::MasterCatalog;
use crate::policy::is_synchronisable;
use crate::repository::ImageRepository;

/// A pending change to one regional image.
#[derive(Debug, Clone, PartialEq)]
pub struct ObsoleteUpdate {
    /// The regional image with its new name, visibility and properties.
    pub image: Image,
    /// Previous name, when the image is being renamed.
    pub renamed_from: Option<String>,
}

/// Master obsolete entries that apply to `target`, by name.
///
/// `<name>_obsolete` is shadowed while a synchronisable `<name>` still exists.
pub fn obsolete_candidates<'a>(
    master: &'a MasterCatalog,
    target: &Target,
) -> BTreeMap<&'a str, &'a Image> {
    master
        .iter()
        .filter(|(_, image)| image.is_obsolete())
        .filter(|(name, _)| {
            let Some(base) = name.strip_suffix(OBSOLETE_SUFFIX) else {
                return false;
            };
            !master
                .get(base)
                .is_some_and(|current| is_synchronisable(current, target))
        })
        .map(|(name, image)| (name.as_str(), image))
        .collect()
}

/// Compute the obsolete updates of one region.
pub fn plan_obsolete(
    master: &MasterCatalog,
    region_images: &[Image],
    target: &Target,
    tenant_id: &str,
) -> Vec<ObsoleteUpdate> {
    let candidates = obsolete_candidates(master, target);
    if candidates.is_empty() {
        return vec![];
    }

    let mut updates = Vec::new();
    for image in region_images.iter().filter(|i| i.owned_by(tenant_id)) {
        if image.is_obsolete() {
            let Some(master_image) = candidates.get(image.name.as_str()) else {
                continue;
            };
            if master_image.checksum != image.checksum {
                continue;
            }
            let mut updated = image.clone();
            sync_obsolete_properties(&mut updated, master_image, target);
            if updated != *image {
                updates.push(ObsoleteUpdate {
                    image: updated,
                    renamed_from: None,
                });
            }
        } else {
            let obsolete_name = format!("{}{OBSOLETE_SUFFIX}", image.name);
            let Some(master_image) = candidates.get(obsolete_name.as_str()) else {
                continue;
            };
            if master_image.checksum != image.checksum {
                continue;
            }
            let mut updated = image.clone();
            updated.name = obsolete_name;
            sync_obsolete_properties(&mut updated, master_image, target);
            updates.push(ObsoleteUpdate {
                image: updated,
                renamed_from: Some(image.name.clone()),
            });
        }
    }
    updates
}

fn sync_obsolete_properties(image: &mut Image, master: &Image, target: &Target) {
    for prop in &target.obsolete_syncprops {
        match master.user_properties.get(prop) {
            Some(value) => {
                image.user_properties.insert(prop.clone(), value.clone());
            }
            None => {
                image.user_properties.remove(prop);
            }
        }
    }
    image.is_public = master.is_public;
}

/// Push `updates` to the region and return the ids handled.
///
/// The ids are returned in dry-run mode too, so a dry run plans the same main
/// pass a real run would.
pub async fn apply_obsolete(
    repo: &dyn ImageRepository,
    region: &RegionId,
    updates: &[ObsoleteUpdate],
    dry_run: bool,
) -> Result<BTreeSet<String>, RepositoryError> {
    let mut handled = BTreeSet::new();
    for update in updates {
        match &update.renamed_from {
            Some(old) => tracing::info!(
                region = %region,
                image = %update.image.id,
                from = %old,
                to = %update.image.name,
                dry_run,
                "marking image obsolete",
            ),
            None => tracing::info!(
                region = %region,
                image = %update.image,
                dry_run,
                "refreshing obsolete image",
            ),
        }
        if !dry_run {
            repo.update_metadata(&region.region, &update.image).await?;
        }
        handled.insert(update.image.id.clone());
    }
    Ok(handled)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(id: &str, name: &str, checksum: &str) -> Image {
        let mut image = Image::new(id, name);
        image.checksum = checksum.to_string();
        image.is_public = true;
        image
    }

    fn catalog(images: &[Image]) -> MasterCatalog {
        images.iter().map(|i| (i.name.clone(), i.clone())).collect()
    }

    fn target() -> Target {
        let mut target = Target::new("master");
        target.support_obsolete_images = true;
        target.obsolete_syncprops.insert("nid".into());
        target
    }

    #[test]
    fn shadowed_obsolete_entry_is_ignored() {
        let master = catalog(&[image("1", "base", "c2"), image("2", "base_obsolete", "c1")]);
        assert!(obsolete_candidates(&master, &target()).is_empty());

        let mut private_base = image("1", "base", "c2");
        private_base.is_public = false;
        let master = catalog(&[private_base, image("2", "base_obsolete", "c1")]);
        assert_eq!(
            obsolete_candidates(&master, &target()).keys().copied().collect::<Vec<_>>(),
            vec!["base_obsolete"]
        );
    }

    #[test]
    fn only_one_suffix_is_stripped_when_shadowing() {
        let master = catalog(&[
            image("1", "base", "c2"),
            image("2", "base_obsolete_obsolete", "c1"),
        ]);
        assert_eq!(
            obsolete_candidates(&master, &target()).keys().copied().collect::<Vec<_>>(),
            vec!["base_obsolete_obsolete"]
        );
    }

    #[test]
    fn matching_unsuffixed_image_is_renamed() {
        let mut retired = image("m-1", "base_obsolete", "c1");
        retired.is_public = false;
        retired.user_properties.insert("nid".into(), "9".into());
        let master = catalog(&[retired]);

        let regional = vec![image("r-1", "base", "c1"), image("r-2", "other", "c1")];
        let updates = plan_obsolete(&master, &regional, &target(), "");
        assert_eq!(updates.len(), 1);
        let update = &updates[0];
        assert_eq!(update.renamed_from.as_deref(), Some("base"));
        assert_eq!(update.image.name, "base_obsolete");
        assert_eq!(update.image.id, "r-1");
        assert!(!update.image.is_public);
        assert_eq!(update.image.property("nid"), Some("9"));
    }

    #[test]
    fn checksum_mismatch_is_left_alone() {
        let master = catalog(&[image("m-1", "base_obsolete", "c1")]);
        let regional = vec![image("r-1", "base", "c9"), image("r-2", "base_obsolete", "c9")];
        assert!(plan_obsolete(&master, &regional, &target(), "").is_empty());
    }

    #[test]
    fn already_obsolete_image_updates_only_on_change() {
        let mut retired = image("m-1", "base_obsolete", "c1");
        retired.user_properties.insert("nid".into(), "9".into());
        let master = catalog(&[retired]);

        let mut current = image("r-1", "base_obsolete", "c1");
        current.user_properties.insert("nid".into(), "9".into());
        assert!(plan_obsolete(&master, &[current.clone()], &target(), "").is_empty());

        current.user_properties.insert("nid".into(), "1".into());
        let updates = plan_obsolete(&master, &[current], &target(), "");
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].renamed_from, None);
        assert_eq!(updates[0].image.property("nid"), Some("9"));
    }

    #[test]
    fn foreign_images_are_untouched() {
        let master = catalog(&[image("m-1", "base_obsolete", "c1")]);
        let mut foreign = image("r-1", "base", "c1");
        foreign.owner = "other".into();
        assert!(plan_obsolete(&master, &[foreign], &target(), "mine").is_empty());
    }
}
