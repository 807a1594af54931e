//! Table-driven checks of the metadata condition language.

use std::collections::BTreeSet;

use glancesync_core::{Image, MetadataCondition};
use rstest::rstest;

fn image() -> Image {
    let mut image = Image::new("7f1c", "base_centos7");
    image.is_public = true;
    image.owner = "tenant-a".to_string();
    image.checksum = "c1".to_string();
    image.user_properties.insert("type".into(), "baseimage".into());
    image
}

#[rstest]
#[case("public", true)]
#[case("private or has('type')", true)]
#[case("not public", false)]
#[case("name == 'base_centos7'", true)]
#[case("name startswith 'base_' and checksum == 'c1'", true)]
#[case("owner != 'tenant-a'", false)]
#[case("status == 'active'", true)]
#[case("prop('type') == 'baseimage' and not has('nid')", true)]
#[case("has_metadata", true)]
#[case("(public or false) and (name endswith '7')", true)]
fn evaluates(#[case] source: &str, #[case] expected: bool) {
    let metadata_set: BTreeSet<String> = ["type".to_string()].into_iter().collect();
    let condition = MetadataCondition::parse(source)
        .unwrap_or_else(|e| panic!("[{source}] failed to parse: {e}"));
    assert_eq!(
        condition.evaluate(&image(), &metadata_set),
        expected,
        "[{source}]"
    );
}

#[rstest]
#[case("")]
#[case("(public")]
#[case("name ==")]
#[case("name < 'a'")]
#[case("prop(type) == 'x'")]
#[case("os.system('rm')")]
fn rejects(#[case] source: &str) {
    assert!(
        MetadataCondition::parse(source).is_err(),
        "[{source}] should not compile"
    );
}
