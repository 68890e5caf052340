//! Tests for the git module.

use super::*;

mod git_spec_tests {
    use super::*;

    #[test]
    fn parse_github_shorthand() {
        let spec = GitSpec::parse("github:anthropics/skills").unwrap();
        assert_eq!(spec.repo_url, "https://github.com/anthropics/skills");
        assert_eq!(spec.reference, None);
        assert_eq!(spec.subdir, None);
    }

    #[test]
    fn parse_github_with_ref_and_path() {
        let spec = GitSpec::parse("github:anthropics/skills@main/skills/pdf").unwrap();
        assert_eq!(spec.repo_url, "https://github.com/anthropics/skills");
        assert_eq!(spec.reference, Some("main".to_string()));
        assert_eq!(spec.subdir, Some("skills/pdf".to_string()));
    }

    #[test]
    fn parse_github_with_ref_only() {
        let spec = GitSpec::parse("github:anthropics/skills@v1.2").unwrap();
        assert_eq!(spec.reference, Some("v1.2".to_string()));
        assert_eq!(spec.subdir, None);
    }

    #[test]
    fn parse_github_missing_repo_errors() {
        assert!(GitSpec::parse("github:anthropics").is_err());
    }

    #[test]
    fn parse_tree_url_with_nested_path() {
        let spec = GitSpec::parse(
            "https://github.com/anthropics/life-sciences/tree/v1.0.0/category/plugin",
        )
        .unwrap();
        assert_eq!(spec.repo_url, "https://github.com/anthropics/life-sciences");
        assert_eq!(spec.reference, Some("v1.0.0".to_string()));
        assert_eq!(spec.subdir, Some("category/plugin".to_string()));
    }

    #[test]
    fn parse_tree_url_without_path_keeps_ref() {
        let spec = GitSpec::parse("https://github.com/org/repo/tree/dev").unwrap();
        assert_eq!(spec.reference, Some("dev".to_string()));
        assert_eq!(spec.subdir, None);
    }

    #[test]
    fn owner_repo_handles_url_shapes() {
        let cases = [
            ("https://github.com/org/repo", ("org", "repo")),
            ("https://github.com/org/repo.git", ("org", "repo")),
            ("git@github.com:org/repo.git", ("org", "repo")),
            ("file:///tmp/work/org/repo/", ("org", "repo")),
        ];
        for (url, (owner, repo)) in cases {
            let (o, r) = GitSpec::new(url).owner_repo().unwrap();
            assert_eq!((o.as_str(), r.as_str()), (owner, repo), "url: {}", url);
        }
    }

    #[test]
    fn cache_key_is_deterministic_and_ref_sensitive() {
        let a = GitSpec::new("https://github.com/org/repo");
        let b = GitSpec::new("https://github.com/org/repo");
        let c = GitSpec::new("https://github.com/org/repo").with_reference("dev");
        let d = GitSpec::new("https://gitlab.com/org/repo");

        assert_eq!(a.cache_key(), b.cache_key());
        assert_ne!(a.cache_key(), c.cache_key());
        assert_ne!(a.cache_key(), d.cache_key());
        assert!(a.cache_key().starts_with("org__repo__HEAD__"));
    }

    #[test]
    fn render_mirror_placeholders() {
        let spec = GitSpec::new("https://github.com/org/repo");
        assert_eq!(
            render_mirror("https://ghproxy.example/{url}", &spec).unwrap(),
            "https://ghproxy.example/https://github.com/org/repo"
        );
        assert_eq!(
            render_mirror("https://mirror.example/{repo}.git", &spec).unwrap(),
            "https://mirror.example/org/repo.git"
        );
        assert_eq!(
            render_mirror("https://m.example/{owner}--{name}", &spec).unwrap(),
            "https://m.example/org--repo"
        );
    }
}

mod git_fetcher_tests {
    use super::*;
    use crate::config::CloneConfig;
    use crate::error::PipelineError;
    use std::path::Path;
    use std::process::Command;
    use tempfile::TempDir;

    fn run_git(repo: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(repo)
            .status()
            .expect("Failed to invoke git");
        assert!(status.success(), "git command failed: {:?}", args);
    }

    fn init_test_repo(repo: &Path) {
        std::fs::create_dir_all(repo).expect("Failed to create repo dir");
        run_git(repo, &["init"]);
        run_git(repo, &["checkout", "-b", "main"]);
        run_git(repo, &["config", "user.email", "test@example.com"]);
        run_git(repo, &["config", "user.name", "Test User"]);
        run_git(repo, &["config", "commit.gpgsign", "false"]);
        std::fs::write(
            repo.join("SKILL.md"),
            "---\nname: test-skill\ndescription: Test skill\n---\n\nTest instructions.\n",
        )
        .expect("Failed to write SKILL.md");
        run_git(repo, &["add", "."]);
        run_git(repo, &["commit", "-m", "init"]);
    }

    fn git_rev_parse(repo: &Path, rev: &str) -> String {
        let output = Command::new("git")
            .args(["rev-parse", rev])
            .current_dir(repo)
            .output()
            .expect("Failed to run git rev-parse");
        assert!(output.status.success(), "git rev-parse failed");
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    #[tokio::test]
    async fn clone_local_repo_reads_head_commit() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let repo_root = temp.path().join("repo");
        init_test_repo(&repo_root);
        let expected = git_rev_parse(&repo_root, "HEAD");

        let url = url::Url::from_directory_path(&repo_root).unwrap().to_string();
        let spec = GitSpec::new(&url).with_reference("main");
        let dest = temp.path().join("clone");

        let fetcher = GitFetcher::new(&CloneConfig::default());
        let outcome = fetcher.clone_into(&spec, &dest).await.unwrap();

        assert_eq!(outcome.commit.as_deref(), Some(expected.as_str()));
        assert!(outcome.failed_attempts.is_empty());
        assert!(dest.join("SKILL.md").exists());
    }

    #[tokio::test]
    async fn missing_repo_reports_every_attempt() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let missing = temp.path().join("does-not-exist");
        let url = url::Url::from_directory_path(&missing).unwrap().to_string();
        let spec = GitSpec::new(&url);
        let dest = temp.path().join("clone");

        let fetcher = GitFetcher::new(&CloneConfig::default());
        let err = fetcher.clone_into(&spec, &dest).await.unwrap_err();

        match err {
            PipelineError::Clone { attempts, .. } => {
                assert_eq!(attempts.len(), 1);
                assert!(!attempts[0].timed_out);
            }
            other => panic!("expected clone error, got {other:?}"),
        }
        assert!(!dest.exists());
    }
}
