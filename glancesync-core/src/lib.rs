//! glancesync core library: image model, targets, configuration, errors.
//!
//! - [`image`]: the [`Image`] catalog entry
//! - [`target`]: [`Target`] policy bundles and [`RegionId`]
//! - [`condition`]: compiled `metadata_condition` expressions
//! - [`config`]: YAML configuration loading and validation
//! - [`error`]: [`ConfigError`], [`ConditionError`]

pub mod condition;
pub mod config;
pub mod error;
pub mod image;
pub mod target;

pub use condition::MetadataCondition;
pub use config::{Config, ConfigFile, TargetConfig};
pub use error::{ConditionError, ConfigError};
pub use image::Image;
pub use target::{RegionId, Target, MASTER_TARGET};
