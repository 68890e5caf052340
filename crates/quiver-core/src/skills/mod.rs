//! Skill manifests, naming rules, and conversion into the canonical layout.

pub mod manifest;
pub mod name;
mod normalizer;

pub use manifest::{PluginManifest, SkillManifest};
pub use name::{clean_description, normalize_name, synthesize_description, validate_name};
pub use normalizer::{
    NormalizedSkill, Normalizer, PackageType, RejectedCandidate, link_packages,
};
