//! Filesystem-resident repository metadata store.
//!
//! Every hosted repository is a bare git directory at
//! `{root}/{workspace}/{name}.git` carrying a JSON sidecar (`aiplan.json`).
//! The sidecar is the source of truth for existence: a directory without one
//! is not a repository as far as the store is concerned.
//!
//! There is no database and no internal locking. Concurrent creation of the
//! same repository is arbitrated by `fs::create_dir`, which fails for all
//! but one caller; the `exists` check in front of it is only a fast path.
//!
//! Used by: SSH exec handling (load before dispatch) and the HTTP API routes.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use git2::{Repository, RepositoryInitOptions};
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::git::resolver::repository_path;
use crate::git::validation::{
    validate_branch_name, validate_repository_name, validate_workspace_slug,
};
use crate::models::{
    CreateRepositoryRequest, DEFAULT_BRANCH, GitRepository, UpdateRepositoryRequest,
};

/// Name of the metadata sidecar inside each bare repository.
pub const SIDECAR_FILE: &str = "aiplan.json";

const SIDECAR_STAGING_FILE: &str = "aiplan.json.tmp";

/// Plain-text description git itself reads (e.g. for gitweb).
const DESCRIPTION_FILE: &str = "description";

#[derive(Debug, Clone)]
pub struct RepositoryStore {
    root: PathBuf,
}

impl RepositoryStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn repository_path(&self, workspace: &str, name: &str) -> PathBuf {
        repository_path(&self.root, workspace, name)
    }

    /// Write the sidecar for `repo` into `repo.path`, replacing any existing one.
    ///
    /// The new sidecar is written next to the old one and renamed over it, so
    /// readers see either the previous record or the new one.
    pub fn save(&self, repo: &GitRepository) -> Result<()> {
        let json = serde_json::to_string_pretty(repo)
            .map_err(|e| AppError::Internal(format!("failed to serialize metadata: {}", e)))?;

        let staged = repo.path.join(SIDECAR_STAGING_FILE);
        fs::write(&staged, json)?;
        if let Err(e) = fs::rename(&staged, repo.path.join(SIDECAR_FILE)) {
            let _ = fs::remove_file(&staged);
            return Err(e.into());
        }
        fs::write(
            repo.path.join(DESCRIPTION_FILE),
            format!("{}\n", repo.description),
        )?;
        Ok(())
    }

    /// Read the sidecar in `path`. The returned record's `path` is always `path`.
    pub fn load(&self, path: &Path) -> Result<GitRepository> {
        let sidecar = path.join(SIDECAR_FILE);
        let contents = match fs::read_to_string(&sidecar) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(AppError::RepositoryNotFound(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut repo: GitRepository =
            serde_json::from_str(&contents).map_err(|e| AppError::CorruptMetadata {
                path: sidecar.display().to_string(),
                reason: e.to_string(),
            })?;
        repo.path = path.to_path_buf();
        Ok(repo)
    }

    /// Presence check only; the sidecar content is not validated.
    pub fn exists(&self, workspace: &str, name: &str) -> bool {
        fs::metadata(self.repository_path(workspace, name).join(SIDECAR_FILE)).is_ok()
    }

    /// Load a single repository, surfacing corrupt metadata as an error.
    pub fn get(&self, workspace: &str, name: &str) -> Result<GitRepository> {
        validate_workspace_slug(workspace)?;
        validate_repository_name(name)?;

        self.load(&self.repository_path(workspace, name))
            .map_err(|e| match e {
                AppError::RepositoryNotFound(_) => {
                    AppError::RepositoryNotFound(format!("{}/{}", workspace, name))
                }
                other => other,
            })
    }

    /// All loadable repositories in a workspace, sorted by name.
    ///
    /// Entries that fail to load (no sidecar, corrupt sidecar, unreadable) are
    /// skipped so one broken repository cannot break the listing.
    pub fn list(&self, workspace: &str) -> Result<Vec<GitRepository>> {
        validate_workspace_slug(workspace)?;

        let dir = self.root.join(workspace);
        let read_dir = match fs::read_dir(&dir) {
            Ok(r) => r,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut repos = Vec::new();
        for entry in read_dir {
            let entry = entry?;
            let path = entry.path();
            let is_repo_dir = entry.file_name().to_string_lossy().ends_with(".git")
                && entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if !is_repo_dir {
                continue;
            }

            match self.load(&path) {
                Ok(repo) => repos.push(repo),
                Err(e) => debug!(path = %path.display(), error = %e, "skipping repository"),
            }
        }

        repos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(repos)
    }

    /// Create the bare repository and its sidecar.
    ///
    /// On any failure after the directory was claimed, the directory is
    /// removed again (best effort) before the error is returned.
    pub fn create(
        &self,
        workspace: &str,
        request: CreateRepositoryRequest,
        created_by: &str,
    ) -> Result<GitRepository> {
        validate_workspace_slug(workspace)?;
        validate_repository_name(&request.name)?;
        let branch = request
            .branch
            .unwrap_or_else(|| DEFAULT_BRANCH.to_string());
        validate_branch_name(&branch)?;

        let slug = format!("{}/{}", workspace, request.name);
        if self.exists(workspace, &request.name) {
            return Err(AppError::RepositoryExists(slug));
        }

        let path = self.repository_path(workspace, &request.name);
        fs::create_dir_all(self.root.join(workspace))?;
        match fs::create_dir(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(AppError::RepositoryExists(slug));
            }
            Err(e) => return Err(e.into()),
        }

        let repo = GitRepository {
            name: request.name,
            workspace: workspace.to_string(),
            private: request.private,
            description: request.description,
            created_at: chrono::Utc::now(),
            created_by: created_by.to_string(),
            branch,
            path,
        };

        if let Err(e) = self.initialize(&repo) {
            if let Err(cleanup) = fs::remove_dir_all(&repo.path) {
                warn!(
                    path = %repo.path.display(),
                    error = %cleanup,
                    "failed to remove partially created repository"
                );
            }
            return Err(e);
        }

        info!(repo = %slug, branch = %repo.branch, "repository created");
        Ok(repo)
    }

    fn initialize(&self, repo: &GitRepository) -> Result<()> {
        let mut opts = RepositoryInitOptions::new();
        opts.bare(true)
            .no_reinit(true)
            .mkdir(false)
            .initial_head(&repo.branch);
        Repository::init_opts(&repo.path, &opts)?;
        self.save(repo)
    }

    /// Rewrite the mutable fields of an existing repository.
    pub fn update(
        &self,
        workspace: &str,
        name: &str,
        changes: UpdateRepositoryRequest,
    ) -> Result<GitRepository> {
        let mut repo = self.get(workspace, name)?;

        if let Some(branch) = changes.branch {
            validate_branch_name(&branch)?;
            if branch != repo.branch {
                let git = Repository::open_bare(&repo.path)?;
                git.set_head(&format!("refs/heads/{}", branch))?;
                repo.branch = branch;
            }
        }
        if let Some(description) = changes.description {
            repo.description = description;
        }
        if let Some(private) = changes.private {
            repo.private = private;
        }

        self.save(&repo)?;
        debug!(repo = %format!("{}/{}", workspace, name), "repository updated");
        Ok(repo)
    }

    /// Remove the whole repository directory.
    ///
    /// Not transactional: a crash midway can leave a directory without a
    /// sidecar, which the store then treats as absent.
    pub fn delete(&self, workspace: &str, name: &str) -> Result<()> {
        validate_workspace_slug(workspace)?;
        validate_repository_name(name)?;

        if !self.exists(workspace, name) {
            return Err(AppError::RepositoryNotFound(format!("{}/{}", workspace, name)));
        }

        fs::remove_dir_all(self.repository_path(workspace, name))?;
        info!(repo = %format!("{}/{}", workspace, name), "repository deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn request(name: &str) -> CreateRepositoryRequest {
        CreateRepositoryRequest {
            name: name.to_string(),
            description: "test repository".to_string(),
            private: true,
            branch: None,
        }
    }

    fn sample(store: &RepositoryStore) -> GitRepository {
        let path = store.repository_path("acme", "widgets");
        fs::create_dir_all(&path).unwrap();
        GitRepository {
            name: "widgets".to_string(),
            workspace: "acme".to_string(),
            private: false,
            description: "Widgets \"and\" gadgets\nsecond line".to_string(),
            created_at: chrono::Utc::now(),
            created_by: "6f1c2a44-8a3e-4f38-9a51-2a7d0b0d9c11".to_string(),
            branch: "develop".to_string(),
            path,
        }
    }

    #[test]
    fn save_then_load_reproduces_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = RepositoryStore::new(dir.path());
        let repo = sample(&store);

        store.save(&repo).unwrap();
        let loaded = store.load(&repo.path).unwrap();

        assert_eq!(loaded, repo);
    }

    #[test]
    fn sidecar_never_contains_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = RepositoryStore::new(dir.path());
        let repo = sample(&store);
        store.save(&repo).unwrap();

        let raw = fs::read_to_string(repo.path.join(SIDECAR_FILE)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(value.get("path").is_none());
        assert_eq!(value["createdBy"], repo.created_by);
        assert!(raw.contains('\n'), "sidecar should be indented");
    }

    #[test]
    fn load_uses_the_given_path_not_file_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = RepositoryStore::new(dir.path());
        let repo = sample(&store);
        let mut json: serde_json::Value = serde_json::to_value(&repo).unwrap();
        json["path"] = serde_json::Value::String("/etc".to_string());
        fs::write(repo.path.join(SIDECAR_FILE), json.to_string()).unwrap();

        let loaded = store.load(&repo.path).unwrap();
        assert_eq!(loaded.path, repo.path);
    }

    #[test]
    fn interrupted_save_leaves_the_previous_sidecar_intact() {
        let dir = tempfile::tempdir().unwrap();
        let store = RepositoryStore::new(dir.path());
        let repo = sample(&store);
        store.save(&repo).unwrap();
        assert!(!repo.path.join(SIDECAR_STAGING_FILE).exists());

        // A write that died halfway only ever touches the staging file.
        fs::write(repo.path.join(SIDECAR_STAGING_FILE), "{\"name\": \"wid").unwrap();
        assert_eq!(store.load(&repo.path).unwrap(), repo);

        store.save(&repo).unwrap();
        assert!(!repo.path.join(SIDECAR_STAGING_FILE).exists());
        assert_eq!(store.load(&repo.path).unwrap(), repo);
    }

    #[test]
    fn readers_never_observe_a_partial_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RepositoryStore::new(dir.path()));
        let repo = sample(&store);
        store.save(&repo).unwrap();

        let writer = {
            let store = Arc::clone(&store);
            let mut repo = repo.clone();
            thread::spawn(move || {
                for i in 0..200 {
                    repo.description = "x".repeat(i * 50);
                    store.save(&repo).unwrap();
                }
            })
        };

        while !writer.is_finished() {
            if let Err(e) = store.load(&repo.path) {
                panic!("load during save failed: {}", e);
            }
        }
        writer.join().unwrap();
    }

    #[test]
    fn save_into_missing_directory_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = RepositoryStore::new(dir.path());
        let mut repo = sample(&store);
        repo.path = dir.path().join("missing").join("nope.git");

        assert!(matches!(store.save(&repo), Err(AppError::Io(_))));
    }

    #[test]
    fn load_distinguishes_missing_and_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = RepositoryStore::new(dir.path());
        let path = store.repository_path("acme", "broken");
        fs::create_dir_all(&path).unwrap();

        assert!(matches!(
            store.load(&path),
            Err(AppError::RepositoryNotFound(_))
        ));

        fs::write(path.join(SIDECAR_FILE), "{ not json").unwrap();
        assert!(matches!(
            store.load(&path),
            Err(AppError::CorruptMetadata { .. })
        ));
        assert!(matches!(
            store.get("acme", "broken"),
            Err(AppError::CorruptMetadata { .. })
        ));
    }

    #[test]
    fn exists_tracks_the_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let store = RepositoryStore::new(dir.path());
        assert!(!store.exists("acme", "widgets"));

        let repo = sample(&store);
        assert!(!store.exists("acme", "widgets"), "directory alone is not a repository");

        store.save(&repo).unwrap();
        assert!(store.exists("acme", "widgets"));
    }

    #[test]
    fn create_initializes_a_bare_repository() {
        let dir = tempfile::tempdir().unwrap();
        let store = RepositoryStore::new(dir.path());

        let mut req = request("widgets");
        req.branch = Some("trunk".to_string());
        let repo = store.create("acme", req, "user-1").unwrap();

        assert_eq!(repo.path, dir.path().join("acme").join("widgets.git"));
        assert!(store.exists("acme", "widgets"));

        let git = Repository::open_bare(&repo.path).unwrap();
        assert!(git.is_bare());
        assert_eq!(
            git.find_reference("HEAD").unwrap().symbolic_target(),
            Some("refs/heads/trunk")
        );
        assert_eq!(
            fs::read_to_string(repo.path.join(DESCRIPTION_FILE)).unwrap(),
            "test repository\n"
        );

        let loaded = store.get("acme", "widgets").unwrap();
        assert_eq!(loaded, repo);
    }

    #[test]
    fn create_rejects_duplicates_and_bad_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = RepositoryStore::new(dir.path());
        store.create("acme", request("widgets"), "user-1").unwrap();

        assert!(matches!(
            store.create("acme", request("widgets"), "user-2"),
            Err(AppError::RepositoryExists(_))
        ));
        assert!(matches!(
            store.create("acme", request(".hidden"), "user-1"),
            Err(AppError::InvalidRepositoryName(_))
        ));
        assert!(matches!(
            store.create("../etc", request("widgets"), "user-1"),
            Err(AppError::InvalidRepositoryName(_))
        ));

        let mut bad_branch = request("gadgets");
        bad_branch.branch = Some("/main".to_string());
        assert!(matches!(
            store.create("acme", bad_branch, "user-1"),
            Err(AppError::InvalidBranchName(_))
        ));
        assert!(!store.repository_path("acme", "gadgets").exists());
    }

    #[test]
    fn create_does_not_adopt_a_leftover_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = RepositoryStore::new(dir.path());
        fs::create_dir_all(store.repository_path("acme", "stale")).unwrap();

        assert!(matches!(
            store.create("acme", request("stale"), "user-1"),
            Err(AppError::RepositoryExists(_))
        ));
    }

    #[test]
    fn concurrent_creates_yield_exactly_one_repository() {
        let dir = tempfile::tempdir().unwrap();
        let store = RepositoryStore::new(dir.path());
        let callers = 8;
        let barrier = Arc::new(Barrier::new(callers));

        let handles: Vec<_> = (0..callers)
            .map(|i| {
                let store = store.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    store.create("acme", request("race"), &format!("user-{}", i))
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let created = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(AppError::RepositoryExists(_))))
            .count();

        assert_eq!(created, 1);
        assert_eq!(conflicts, callers - 1);
        assert_eq!(store.list("acme").unwrap().len(), 1);
        assert!(Repository::open_bare(store.repository_path("acme", "race")).is_ok());
    }

    #[test]
    fn list_skips_broken_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = RepositoryStore::new(dir.path());
        store.create("acme", request("beta"), "user-1").unwrap();
        store.create("acme", request("alpha"), "user-1").unwrap();

        let corrupt = store.repository_path("acme", "corrupt");
        fs::create_dir_all(&corrupt).unwrap();
        fs::write(corrupt.join(SIDECAR_FILE), "[]").unwrap();
        fs::create_dir_all(store.repository_path("acme", "partial")).unwrap();
        fs::create_dir_all(dir.path().join("acme").join("not-a-repo")).unwrap();
        fs::write(dir.path().join("acme").join("file.git"), "").unwrap();

        let names: Vec<String> = store
            .list("acme")
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[test]
    fn list_of_unknown_workspace_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = RepositoryStore::new(dir.path());
        assert!(store.list("nobody").unwrap().is_empty());
    }

    #[test]
    fn update_rewrites_mutable_fields_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = RepositoryStore::new(dir.path());
        let original = store.create("acme", request("widgets"), "user-1").unwrap();

        let updated = store
            .update(
                "acme",
                "widgets",
                UpdateRepositoryRequest {
                    description: Some("renamed".to_string()),
                    private: Some(false),
                    branch: Some("release/1.x".to_string()),
                },
            )
            .unwrap();

        assert_eq!(updated.name, original.name);
        assert_eq!(updated.workspace, original.workspace);
        assert_eq!(updated.created_at, original.created_at);
        assert_eq!(updated.description, "renamed");
        assert!(!updated.private);
        assert_eq!(store.get("acme", "widgets").unwrap(), updated);

        let git = Repository::open_bare(&updated.path).unwrap();
        assert_eq!(
            git.find_reference("HEAD").unwrap().symbolic_target(),
            Some("refs/heads/release/1.x")
        );

        assert!(matches!(
            store.update(
                "acme",
                "widgets",
                UpdateRepositoryRequest {
                    branch: Some(".bad".to_string()),
                    ..Default::default()
                }
            ),
            Err(AppError::InvalidBranchName(_))
        ));
    }

    #[test]
    fn delete_removes_the_tree() {
        let dir = tempfile::tempdir().unwrap();
        let store = RepositoryStore::new(dir.path());

        assert!(matches!(
            store.delete("acme", "widgets"),
            Err(AppError::RepositoryNotFound(_))
        ));

        let repo = store.create("acme", request("widgets"), "user-1").unwrap();
        store.delete("acme", "widgets").unwrap();

        assert!(!store.exists("acme", "widgets"));
        assert!(!repo.path.exists());
        assert!(matches!(
            store.get("acme", "widgets"),
            Err(AppError::RepositoryNotFound(_))
        ));
    }
}
