//! Which master images a target wants.

use glancesync_core::{Image, Target};

/// Decide whether `image` should exist in the regions of `target`.
///
/// Rules, first match wins:
/// 1. obsolete images are never synchronised
/// 2. forced ids always are
/// 3. a configured `metadata_condition` decides alone
/// 4. private images are not synchronised
/// 5. with no `metadata_set`, every public image is
/// 6. otherwise the image needs at least one `metadata_set` property
pub fn is_synchronisable(image: &Image, target: &Target) -> bool {
    if image.is_obsolete() {
        return false;
    }
    if target.forcesyncs.contains(&image.id) {
        return true;
    }
    if let Some(condition) = &target.metadata_condition {
        return condition.evaluate(image, &target.metadata_set);
    }
    if !image.is_public {
        return false;
    }
    if target.metadata_set.is_empty() {
        return true;
    }
    target
        .metadata_set
        .iter()
        .any(|key| image.user_properties.contains_key(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use glancesync_core::MetadataCondition;

    fn public(name: &str) -> Image {
        let mut image = Image::new(format!("id-{name}"), name);
        image.is_public = true;
        image
    }

    #[test]
    fn obsolete_beats_forcesync() {
        let image = public("base_obsolete");
        let mut target = Target::new("master");
        target.forcesyncs.insert(image.id.clone());
        assert!(!is_synchronisable(&image, &target));
    }

    #[test]
    fn forcesync_beats_privacy_and_condition() {
        let mut image = public("base");
        image.is_public = false;
        let mut target = Target::new("master");
        target.metadata_condition = Some(MetadataCondition::parse("false").unwrap());
        assert!(!is_synchronisable(&image, &target));
        target.forcesyncs.insert(image.id.clone());
        assert!(is_synchronisable(&image, &target));
    }

    #[test]
    fn condition_replaces_remaining_rules() {
        let mut image = public("base");
        image.is_public = false;
        let mut target = Target::new("master");
        target.metadata_condition = Some(MetadataCondition::parse("name == 'base'").unwrap());
        assert!(is_synchronisable(&image, &target), "private accepted by condition");
    }

    #[test]
    fn private_images_are_skipped() {
        let mut image = public("base");
        image.is_public = false;
        assert!(!is_synchronisable(&image, &Target::new("master")));
    }

    #[test]
    fn metadata_set_requires_one_property() {
        let mut image = public("base");
        let mut target = Target::new("master");
        assert!(is_synchronisable(&image, &target));

        target.metadata_set.insert("type".into());
        assert!(!is_synchronisable(&image, &target));

        image.user_properties.insert("type".into(), "x".into());
        assert!(is_synchronisable(&image, &target));
    }

    #[test]
    fn decision_is_repeatable() {
        let image = public("base");
        let mut target = Target::new("master");
        target.metadata_set.insert("nid".into());
        let first = is_synchronisable(&image, &target);
        for _ in 0..10 {
            assert_eq!(is_synchronisable(&image, &target), first);
        }
    }
}
