mod common;

use std::path::Path;
use std::process::Command;

use common::{StubScanner, TestEnv, write_skill};
use quiver_core::cache::CacheEntryKind;
use quiver_core::workflow::{InstallRequest, WorkflowOutcome};

fn run_git(repo: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(repo)
        .status()
        .expect("Failed to invoke git");
    assert!(status.success(), "git command failed: {:?}", args);
}

fn init_repo(repo: &Path) {
    std::fs::create_dir_all(repo).unwrap();
    run_git(repo, &["init"]);
    run_git(repo, &["checkout", "-b", "main"]);
    run_git(repo, &["config", "user.email", "test@example.com"]);
    run_git(repo, &["config", "user.name", "Test User"]);
    run_git(repo, &["config", "commit.gpgsign", "false"]);
    write_skill(&repo.join("skills").join("lint"), "lint", "Lint code");
    write_skill(&repo.join("skills").join("format"), "format", "Format code");
    run_git(repo, &["add", "."]);
    run_git(repo, &["commit", "-m", "init"]);
}

#[tokio::test]
async fn remote_repo_is_cloned_once_and_served_from_cache() {
    let env = TestEnv::new();
    let repo = env.temp.path().join("upstream").join("org").join("tools");
    init_repo(&repo);
    let url = url::Url::from_directory_path(&repo).unwrap().to_string();

    let workflow = env.ctx.install_workflow_with(StubScanner::clean());
    let outcome = workflow
        .start(InstallRequest::new(&url).with_skill("lint"))
        .await
        .unwrap();
    assert!(matches!(outcome, WorkflowOutcome::Completed(_)));

    let cache = env.ctx.repo_cache();
    let entries = cache.list().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind, CacheEntryKind::Repo);
    assert!(entries[0].commit.is_some());
    let first_cached_at = entries[0].cached_at;

    workflow
        .start(InstallRequest::new(&url).with_skill("format"))
        .await
        .unwrap();
    let entries = cache.list().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].cached_at, first_cached_at);

    let installer = env.ctx.skill_installer();
    let names: Vec<String> = installer
        .list()
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, vec!["format".to_string(), "lint".to_string()]);
    let lint = installer.get("lint").unwrap().unwrap();
    assert!(lint.source.starts_with("file://"));
}

#[tokio::test]
async fn refresh_reclones() {
    let env = TestEnv::new();
    let repo = env.temp.path().join("upstream").join("org").join("tools");
    init_repo(&repo);
    let url = url::Url::from_directory_path(&repo).unwrap().to_string();
    let workflow = env.ctx.install_workflow_with(StubScanner::clean());

    workflow
        .start(InstallRequest::new(&url).with_skill("lint"))
        .await
        .unwrap();
    let before = env.ctx.repo_cache().list().unwrap()[0].cached_at;

    workflow
        .start(
            InstallRequest::new(&url)
                .with_skill("format")
                .with_refresh(true),
        )
        .await
        .unwrap();
    let after = env.ctx.repo_cache().list().unwrap()[0].cached_at;
    assert!(after >= before);
    assert_eq!(env.ctx.repo_cache().list().unwrap().len(), 1);
}
