//! Atomic install and uninstall into the runtime skills directory.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::formats::SkillFormat;
use crate::fs::{CopyFilter, copy_tree, hash_tree};
use crate::scan::ScanResult;
use crate::skills::manifest::{has_frontmatter, parse_skill_md};
use crate::skills::{
    NormalizedSkill, PackageType, clean_description, normalize_name, synthesize_description,
    validate_name,
};

use super::record::{Registry, ScanSummary, SkillRecord, record_id};
use super::store::RegistryStore;

/// Skills removed by one uninstall, children first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UninstallReport {
    pub removed: Vec<String>,
}

/// Differences `sync` found between the registry and the skills directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Records whose directory vanished
    pub marked_missing: Vec<String>,
    /// Records whose directory reappeared
    pub restored: Vec<String>,
    /// Directories with a SKILL.md but no record
    pub adopted: Vec<String>,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.marked_missing.is_empty() && self.restored.is_empty() && self.adopted.is_empty()
    }
}

/// Places staged skills into the skills directory and keeps the registry in step.
#[derive(Debug, Clone)]
pub struct SkillInstaller {
    store: RegistryStore,
    skills_dir: PathBuf,
}

impl SkillInstaller {
    pub fn new(store: RegistryStore, skills_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            skills_dir: skills_dir.into(),
        }
    }

    pub fn skills_dir(&self) -> &Path {
        &self.skills_dir
    }

    pub fn store(&self) -> &RegistryStore {
        &self.store
    }

    /// Install a staged skill.
    ///
    /// The skill directory and its registry record appear together or not at
    /// all. With `force` an existing installation is replaced and its usage
    /// statistics reset.
    pub fn install(
        &self,
        skill: &NormalizedSkill,
        source: &str,
        scan: Option<&ScanResult>,
        force: bool,
    ) -> Result<SkillRecord> {
        let content_dir = skill
            .content_dir
            .as_deref()
            .ok_or_else(|| PipelineError::validation(&skill.name, "skill has not been staged"))?;

        self.store.with_lock(|| {
            let mut registry = self.store.load()?;
            let id = record_id(&skill.name);
            let target = self.skills_dir.join(&skill.name);

            // Known records conflict even when their directory is missing.
            let recorded = registry.skills.contains_key(&id);
            if (recorded || target.exists()) && !force {
                return Err(PipelineError::RegistryConflict {
                    name: skill.name.clone(),
                });
            }

            fs::create_dir_all(&self.skills_dir)?;
            let placement = Placement::place(content_dir, &target, &self.skills_dir, &skill.name)?;

            let record = match build_record(&registry, skill, source, scan, &target) {
                Ok(record) => record,
                Err(err) => {
                    placement.rollback();
                    return Err(err);
                }
            };
            registry.skills.insert(id, record.clone());

            if let Err(err) = self.store.save(&registry) {
                tracing::warn!(skill = %skill.name, error = %err, "Registry write failed, rolling back");
                placement.rollback();
                return Err(err.into());
            }
            placement.commit();

            tracing::info!(
                skill = %record.name,
                package_type = %record.package_type,
                path = %record.installed_path.display(),
                "Installed skill"
            );
            Ok(record)
        })
    }

    /// Remove a skill directory and its record.
    ///
    /// A parent with children is refused unless `force`, which removes the
    /// children too. A directory that already vanished is not an error.
    pub fn uninstall(&self, name: &str, force: bool) -> Result<UninstallReport> {
        self.store.with_lock(|| {
            let mut registry = self.store.load()?;
            let id = record_id(name);
            let record = registry.skills.get(&id).cloned();

            let dir = match &record {
                Some(record) => record.installed_path.clone(),
                None if validate_name(&id) && self.skills_dir.join(&id).exists() => {
                    self.skills_dir.join(&id)
                }
                None => {
                    return Err(PipelineError::NotFound {
                        name: name.to_string(),
                    });
                }
            };

            let children: Vec<SkillRecord> = registry
                .children_of(&id)
                .into_iter()
                .filter(|child| child.id != id)
                .cloned()
                .collect();
            if !children.is_empty() && !force {
                let names: Vec<&str> = children.iter().map(|c| c.name.as_str()).collect();
                return Err(PipelineError::validation(
                    name,
                    format!(
                        "has installed children ({}); use --force to remove them too",
                        names.join(", ")
                    ),
                ));
            }

            let mut report = UninstallReport::default();
            for child in &children {
                remove_path(&child.installed_path)?;
                registry.skills.remove(&child.id);
                report.removed.push(child.name.clone());
            }
            remove_path(&dir)?;
            registry.skills.remove(&id);
            report
                .removed
                .push(record.map(|r| r.name).unwrap_or_else(|| id.clone()));

            self.store.save(&registry)?;
            tracing::info!(removed = ?report.removed, "Uninstalled skill");
            Ok(report)
        })
    }

    /// Count one use of an installed skill.
    pub fn record_use(&self, name: &str) -> Result<SkillRecord> {
        self.store.mutate(|registry| {
            let record = registry
                .get_mut(name)
                .filter(|r| r.installed)
                .ok_or_else(|| PipelineError::NotFound {
                    name: name.to_string(),
                })?;
            record.usage_count += 1;
            record.last_used = Some(Utc::now());
            Ok(record.clone())
        })
    }

    /// Store the latest scan verdict for an installed skill.
    pub fn record_scan(&self, name: &str, result: &ScanResult) -> Result<()> {
        self.store.mutate(|registry| {
            let record = registry
                .get_mut(name)
                .ok_or_else(|| PipelineError::NotFound {
                    name: name.to_string(),
                })?;
            record.last_scan = Some(ScanSummary::from_result(result));
            Ok(())
        })
    }

    pub fn get(&self, name: &str) -> Result<Option<SkillRecord>> {
        Ok(self.store.load()?.get(name).cloned())
    }

    /// Every record, sorted by name.
    pub fn list(&self) -> Result<Vec<SkillRecord>> {
        Ok(self.store.load()?.skills.into_values().collect())
    }

    /// Reconcile the registry with the skills directory.
    pub fn sync(&self) -> Result<SyncReport> {
        self.store.mutate(|registry| {
            let mut report = SyncReport::default();

            for record in registry.skills.values_mut() {
                let present = record.installed_path.is_dir();
                if record.installed && !present {
                    record.installed = false;
                    report.marked_missing.push(record.name.clone());
                } else if !record.installed && present {
                    record.installed = true;
                    record.content_hash = hash_tree(&record.installed_path)?;
                    report.restored.push(record.name.clone());
                }
            }

            for dir in unrecorded_dirs(&self.skills_dir, registry)? {
                match adopt(registry, &dir) {
                    Ok(Some(record)) => {
                        report.adopted.push(record.name.clone());
                        registry.skills.insert(record.id.clone(), record);
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!(path = %dir.display(), error = %err, "Skipping unreadable skill directory");
                    }
                }
            }

            if !report.is_empty() {
                tracing::info!(
                    missing = report.marked_missing.len(),
                    restored = report.restored.len(),
                    adopted = report.adopted.len(),
                    "Registry synchronized"
                );
            }
            Ok(report)
        })
    }
}

fn build_record(
    registry: &Registry,
    skill: &NormalizedSkill,
    source: &str,
    scan: Option<&ScanResult>,
    target: &Path,
) -> Result<SkillRecord> {
    let mut package_type = skill.package_type;
    let mut parent_ref = skill.parent_ref.clone();
    if package_type == PackageType::Child {
        let parent_present = parent_ref
            .as_deref()
            .and_then(|p| registry.get(p))
            .is_some_and(|p| p.installed);
        if !parent_present {
            tracing::warn!(
                skill = %skill.name,
                parent = ?parent_ref,
                "Parent is not installed, installing as standalone"
            );
            package_type = PackageType::Standalone;
            parent_ref = None;
        }
    }

    Ok(SkillRecord {
        id: record_id(&skill.name),
        name: skill.name.clone(),
        folder_name: skill.folder_name.clone(),
        description: skill.description.clone(),
        category: skill.category.clone(),
        tags: skill.tags.clone(),
        keywords: skill.keywords.clone(),
        package_type,
        parent_ref,
        installed: true,
        installed_path: target.to_path_buf(),
        usage_count: 0,
        last_used: None,
        source: source.to_string(),
        format: skill.format,
        content_hash: hash_tree(target)?,
        last_scan: scan.map(ScanSummary::from_result),
    })
}

/// A skill directory moved into place, with the replaced one held aside.
struct Placement {
    target: PathBuf,
    backup: Option<PathBuf>,
}

impl Placement {
    fn place(content: &Path, target: &Path, skills_dir: &Path, name: &str) -> Result<Self> {
        let suffix = Uuid::new_v4().simple().to_string();
        let staged = skills_dir.join(format!(".quiver-tmp-{}-{}", name, suffix));
        if let Err(err) = copy_tree(content, &staged, CopyFilter::SkipGit) {
            discard(&staged);
            return Err(err.into());
        }

        let backup = if target.symlink_metadata().is_ok() {
            let backup = skills_dir.join(format!(".quiver-old-{}-{}", name, suffix));
            if let Err(err) = fs::rename(target, &backup) {
                discard(&staged);
                return Err(err.into());
            }
            Some(backup)
        } else {
            None
        };

        if let Err(err) = fs::rename(&staged, target) {
            discard(&staged);
            if let Some(backup) = &backup {
                restore(backup, target);
            }
            return Err(err.into());
        }

        Ok(Self {
            target: target.to_path_buf(),
            backup,
        })
    }

    fn rollback(self) {
        discard(&self.target);
        if let Some(backup) = &self.backup {
            restore(backup, &self.target);
        }
    }

    fn commit(self) {
        if let Some(backup) = &self.backup {
            discard(backup);
        }
    }
}

fn restore(backup: &Path, target: &Path) {
    if let Err(err) = fs::rename(backup, target) {
        tracing::error!(
            backup = %backup.display(),
            target = %target.display(),
            error = %err,
            "Failed to restore previous installation"
        );
    }
}

fn discard(path: &Path) {
    if let Err(err) = remove_path(path) {
        tracing::warn!(path = %path.display(), error = %err, "Failed to clean up");
    }
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    match path.symlink_metadata() {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

fn unrecorded_dirs(skills_dir: &Path, registry: &Registry) -> Result<Vec<PathBuf>> {
    if !skills_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(skills_dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with('.') || !entry.path().is_dir() {
            continue;
        }
        let path = entry.path();
        if registry.skills.values().any(|r| r.installed_path == path) {
            continue;
        }
        dirs.push(path);
    }
    dirs.sort();
    Ok(dirs)
}

fn adopt(registry: &Registry, dir: &Path) -> anyhow::Result<Option<SkillRecord>> {
    let skill_md = dir.join("SKILL.md");
    if !skill_md.is_file() {
        return Ok(None);
    }
    let folder = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let content = fs::read_to_string(&skill_md)?;
    let (manifest, body) = parse_skill_md(&content)?;

    let name = normalize_name(manifest.name.as_deref().unwrap_or(&folder));
    let id = record_id(&name);
    if registry.skills.contains_key(&id) {
        return Ok(None);
    }

    let description = manifest
        .description
        .as_deref()
        .map(clean_description)
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| synthesize_description(&body, &folder));

    let parent_ref = manifest
        .parent
        .as_deref()
        .map(normalize_name)
        .filter(|p| registry.get(p).is_some_and(|r| r.installed));
    let package_type = if parent_ref.is_some() {
        PackageType::Child
    } else {
        PackageType::Standalone
    };

    Ok(Some(SkillRecord {
        id,
        name,
        folder_name: folder,
        description,
        category: manifest.category,
        tags: manifest.tags,
        keywords: manifest.keywords,
        package_type,
        parent_ref,
        installed: true,
        installed_path: dir.to_path_buf(),
        usage_count: 0,
        last_used: None,
        source: format!("local:{}", dir.display()),
        format: if has_frontmatter(&content) {
            SkillFormat::Official
        } else {
            SkillFormat::Generic
        },
        content_hash: hash_tree(dir)?,
        last_scan: None,
    }))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::formats::FormatDetector;
    use crate::skills::Normalizer;
    use tempfile::TempDir;

    /// Stage every skill found under `source` into `staging`.
    pub(crate) fn stage_all(source: &Path, staging: &Path) -> Vec<NormalizedSkill> {
        let candidates = FormatDetector::default().detect(source).unwrap();
        let normalizer = Normalizer::new();
        let (mut skills, rejected) = normalizer.plan_all(&candidates, "root");
        assert!(rejected.is_empty(), "unexpected rejections: {rejected:?}");
        for skill in &mut skills {
            normalizer.materialize(skill, staging).unwrap();
        }
        skills
    }

    pub(crate) fn write_skill(dir: &Path, frontmatter: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(
            dir.join("SKILL.md"),
            format!("---\n{}\n---\n\nInstructions.\n", frontmatter),
        )
        .unwrap();
    }

    struct Fixture {
        _temp: TempDir,
        source: PathBuf,
        staging: PathBuf,
        installer: SkillInstaller,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("source");
        let staging = temp.path().join("staging");
        let installer = SkillInstaller::new(
            RegistryStore::new(&temp.path().join("state")),
            temp.path().join("skills"),
        );
        Fixture {
            source,
            staging,
            installer,
            _temp: temp,
        }
    }

    fn single(fx: &Fixture, name: &str) -> NormalizedSkill {
        write_skill(
            &fx.source.join(name),
            &format!("name: {name}\ndescription: The {name} skill"),
        );
        stage_all(&fx.source, &fx.staging)
            .into_iter()
            .find(|s| s.name == name)
            .unwrap()
    }

    #[test]
    fn install_places_directory_and_record_together() {
        let fx = fixture();
        let skill = single(&fx, "pdf");

        let record = fx.installer.install(&skill, "github:org/repo", None, false).unwrap();

        assert!(record.installed);
        assert_eq!(record.installed_path, fx.installer.skills_dir().join("pdf"));
        assert!(record.installed_path.join("SKILL.md").is_file());
        assert_eq!(record.content_hash, hash_tree(&record.installed_path).unwrap());
        assert_eq!(fx.installer.get("PDF").unwrap(), Some(record));
    }

    #[test]
    fn reinstall_without_force_conflicts() {
        let fx = fixture();
        let skill = single(&fx, "pdf");
        fx.installer.install(&skill, "src", None, false).unwrap();

        let err = fx.installer.install(&skill, "src", None, false).unwrap_err();
        assert!(matches!(err, PipelineError::RegistryConflict { ref name } if name == "pdf"));
    }

    #[test]
    fn missing_record_still_conflicts_until_forced() {
        let fx = fixture();
        let skill = single(&fx, "pdf");
        let record = fx.installer.install(&skill, "src", None, false).unwrap();
        fs::remove_dir_all(&record.installed_path).unwrap();
        fx.installer.sync().unwrap();
        assert!(!fx.installer.get("pdf").unwrap().unwrap().installed);

        let err = fx.installer.install(&skill, "src", None, false).unwrap_err();
        assert!(matches!(err, PipelineError::RegistryConflict { .. }));
        assert!(!record.installed_path.exists());

        let again = fx.installer.install(&skill, "src", None, true).unwrap();
        assert!(again.installed);
        assert!(again.installed_path.join("SKILL.md").is_file());
    }

    #[test]
    fn unrecorded_directory_also_conflicts() {
        let fx = fixture();
        let skill = single(&fx, "pdf");
        fs::create_dir_all(fx.installer.skills_dir().join("pdf")).unwrap();

        let err = fx.installer.install(&skill, "src", None, false).unwrap_err();
        assert!(matches!(err, PipelineError::RegistryConflict { .. }));
    }

    #[test]
    fn force_replaces_content_and_resets_usage() {
        let fx = fixture();
        let skill = single(&fx, "pdf");
        fx.installer.install(&skill, "src", None, false).unwrap();
        fx.installer.record_use("pdf").unwrap();
        fs::write(
            fx.installer.skills_dir().join("pdf").join("stale.txt"),
            "old",
        )
        .unwrap();

        let record = fx.installer.install(&skill, "src", None, true).unwrap();

        assert_eq!(record.usage_count, 0);
        assert!(!record.installed_path.join("stale.txt").exists());
        let leftovers: Vec<_> = fs::read_dir(fx.installer.skills_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn failed_registry_write_rolls_back_directory() {
        let fx = fixture();
        let skill = single(&fx, "pdf");
        let tmp = fx.installer.store().tmp_path();
        fs::create_dir_all(&tmp).unwrap();

        assert!(fx.installer.install(&skill, "src", None, false).is_err());
        assert!(!fx.installer.skills_dir().join("pdf").exists());
        fs::remove_dir_all(&tmp).unwrap();
        assert!(fx.installer.list().unwrap().is_empty());
    }

    #[test]
    fn failed_forced_write_restores_previous_install() {
        let fx = fixture();
        let skill = single(&fx, "pdf");
        fx.installer.install(&skill, "src", None, false).unwrap();
        let marker = fx.installer.skills_dir().join("pdf").join("keep.txt");
        fs::write(&marker, "previous").unwrap();

        let tmp = fx.installer.store().tmp_path();
        fs::create_dir_all(&tmp).unwrap();
        assert!(fx.installer.install(&skill, "src", None, true).is_err());

        assert_eq!(fs::read_to_string(&marker).unwrap(), "previous");
    }

    #[test]
    fn child_installs_as_child_only_when_parent_present() {
        let fx = fixture();
        write_skill(&fx.source.join("suite"), "name: suite\ndescription: Suite");
        write_skill(
            &fx.source.join("suite").join("part"),
            "name: part\ndescription: Part",
        );
        let skills = stage_all(&fx.source, &fx.staging);
        let parent = skills.iter().find(|s| s.name == "suite").unwrap();
        let child = skills.iter().find(|s| s.name == "part").unwrap();
        assert_eq!(child.package_type, PackageType::Child);

        let orphan = fx.installer.install(child, "src", None, false).unwrap();
        assert_eq!(orphan.package_type, PackageType::Standalone);
        assert_eq!(orphan.parent_ref, None);

        fx.installer.install(parent, "src", None, false).unwrap();
        let linked = fx.installer.install(child, "src", None, true).unwrap();
        assert_eq!(linked.package_type, PackageType::Child);
        assert_eq!(linked.parent_ref.as_deref(), Some("suite"));
    }

    #[test]
    fn uninstall_parent_requires_force_and_cascades() {
        let fx = fixture();
        write_skill(&fx.source.join("suite"), "name: suite\ndescription: Suite");
        write_skill(
            &fx.source.join("suite").join("part"),
            "name: part\ndescription: Part",
        );
        let skills = stage_all(&fx.source, &fx.staging);
        for name in ["suite", "part"] {
            let skill = skills.iter().find(|s| s.name == name).unwrap();
            fx.installer.install(skill, "src", None, false).unwrap();
        }

        let err = fx.installer.uninstall("suite", false).unwrap_err();
        assert!(matches!(err, PipelineError::Validation { .. }));
        assert_eq!(fx.installer.list().unwrap().len(), 2);

        let report = fx.installer.uninstall("suite", true).unwrap();
        assert_eq!(report.removed, vec!["part".to_string(), "suite".to_string()]);
        assert!(fx.installer.list().unwrap().is_empty());
        assert!(!fx.installer.skills_dir().join("part").exists());
    }

    #[test]
    fn uninstall_tolerates_vanished_directory() {
        let fx = fixture();
        let skill = single(&fx, "pdf");
        let record = fx.installer.install(&skill, "src", None, false).unwrap();
        fs::remove_dir_all(&record.installed_path).unwrap();

        let report = fx.installer.uninstall("pdf", false).unwrap();
        assert_eq!(report.removed, vec!["pdf".to_string()]);
        assert!(fx.installer.list().unwrap().is_empty());
    }

    #[test]
    fn uninstall_unknown_is_not_found() {
        let fx = fixture();
        let err = fx.installer.uninstall("../etc", false).unwrap_err();
        assert!(matches!(err, PipelineError::NotFound { .. }));
    }

    #[test]
    fn record_use_counts_and_timestamps() {
        let fx = fixture();
        let skill = single(&fx, "pdf");
        fx.installer.install(&skill, "src", None, false).unwrap();

        fx.installer.record_use("pdf").unwrap();
        let record = fx.installer.record_use("pdf").unwrap();
        assert_eq!(record.usage_count, 2);
        assert!(record.last_used.is_some());
        assert!(matches!(
            fx.installer.record_use("missing"),
            Err(PipelineError::NotFound { .. })
        ));
    }

    #[test]
    fn sync_marks_missing_restores_and_adopts() {
        let fx = fixture();
        let skill = single(&fx, "pdf");
        let record = fx.installer.install(&skill, "src", None, false).unwrap();
        let parked = fx.installer.skills_dir().join(".parked");
        fs::rename(&record.installed_path, &parked).unwrap();
        write_skill(
            &fx.installer.skills_dir().join("Hand Made"),
            "description: Dropped in by hand",
        );

        let report = fx.installer.sync().unwrap();
        assert_eq!(report.marked_missing, vec!["pdf".to_string()]);
        assert_eq!(report.adopted, vec!["hand-made".to_string()]);
        assert!(!fx.installer.get("pdf").unwrap().unwrap().installed);

        fs::rename(&parked, &record.installed_path).unwrap();
        let report = fx.installer.sync().unwrap();
        assert_eq!(report.restored, vec!["pdf".to_string()]);
        assert!(fx.installer.sync().unwrap().is_empty());
    }
}
