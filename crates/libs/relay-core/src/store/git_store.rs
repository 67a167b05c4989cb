//! Git-backed archive journal.
//!
//! Every state change is committed to a single Git repository rooted at
//! the storage root, with per-project trees under `projects/<slug>/`.
//! The staged-paths-then-commit sequence is the atomicity unit: an
//! aborted staging leaves no commit behind.
//!
//! # Example
//!
//! ```no_run
//! use relay_core::store::git_store::{init_or_open_repo, commit_file};
//!
//! # fn example() -> relay_core::Result<()> {
//! let repo = init_or_open_repo("data/archive")?;
//! commit_file(
//!     &repo,
//!     "projects/backend/profile.json",
//!     r#"{"slug": "backend"}"#,
//!     "project: ensure backend",
//!     "relay-bot",
//!     "relay-bot@localhost",
//! )?;
//! # Ok(())
//! # }
//! ```

use crate::Result;
use git2::{Error as GitError, Oid, Repository, Signature, Tree};
use std::path::Path;

/// Attempts for transient `index.lock` contention before giving up.
const INDEX_LOCK_ATTEMPTS: u32 = 5;

/// Initializes or opens a Git repository at the given path.
///
/// Checks for a `.git` directory directly at `path` rather than
/// discovering up the tree, so a nested storage root never adopts an
/// outer repository.
pub fn init_or_open_repo<P: AsRef<Path>>(path: P) -> Result<Repository> {
    let path_ref = path.as_ref();
    let git_dir = path_ref.join(".git");
    if git_dir.exists() {
        Repository::open(path_ref).map_err(crate::Error::from)
    } else {
        Repository::init(path).map_err(crate::Error::from)
    }
}

/// Opens an existing Git repository; fails if none exists.
pub fn open_repo<P: AsRef<Path>>(path: P) -> Result<Repository> {
    Repository::open(path).map_err(crate::Error::from)
}

/// Creates a commit with the given tree and signature.
fn create_commit(
    repo: &Repository,
    tree: &Tree,
    signature: &Signature,
    message: &str,
) -> Result<Oid> {
    let parent_commit_opt = find_last_commit(repo)?;
    let commit_oid = match parent_commit_opt {
        Some(ref parent) => {
            repo.commit(Some("HEAD"), signature, signature, message, tree, &[parent])?
        }
        None => repo.commit(Some("HEAD"), signature, signature, message, tree, &[])?,
    };
    Ok(commit_oid)
}

fn is_index_lock_error(err: &git2::Error) -> bool {
    err.code() == git2::ErrorCode::Locked
        || err.message().contains("index.lock")
        || err.message().contains("failed to lock")
}

/// Stage the given paths and commit them, retrying on transient
/// `index.lock` contention with backoff + jitter.
fn stage_and_commit<P: AsRef<Path>>(
    repo: &Repository,
    paths: &[P],
    message: &str,
    signature: &Signature,
) -> Result<Oid> {
    let mut attempt = 0;
    loop {
        let staged: std::result::Result<Oid, git2::Error> = (|| {
            let mut index = repo.index()?;
            for path in paths {
                index.add_path(path.as_ref())?;
            }
            index.write_tree()
        })();

        match staged {
            Ok(tree_oid) => {
                let tree = repo.find_tree(tree_oid)?;
                return create_commit(repo, &tree, signature, message);
            }
            Err(e) if is_index_lock_error(&e) && attempt + 1 < INDEX_LOCK_ATTEMPTS => {
                attempt += 1;
                let delay = super::retry::backoff_delay(attempt - 1);
                tracing::debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "git index locked, retrying stage"
                );
                std::thread::sleep(delay);
            }
            Err(e) => return Err(crate::Error::from(e)),
        }
    }
}

/// Commits a single file with the given content, creating parent
/// directories as needed.
pub fn commit_file<P: AsRef<Path>>(
    repo: &Repository,
    file_path: P,
    content: &str,
    message: &str,
    author_name: &str,
    author_email: &str,
) -> Result<Oid> {
    let workdir = repo
        .workdir()
        .ok_or_else(|| GitError::from_str("No working directory"))?;
    let full_path = workdir.join(file_path.as_ref());

    if let Some(parent) = full_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&full_path, content)?;

    let signature = Signature::now(author_name, author_email)?;
    stage_and_commit(repo, &[file_path.as_ref()], message, &signature)
}

/// Commits multiple existing files in a single commit.
///
/// The files must already be written under the working tree. Batched
/// operations (multi-recipient sends, multi-pattern grants) go through
/// here so the archive shows one commit per logical operation.
pub fn commit_paths<P: AsRef<Path>>(
    repo: &Repository,
    paths: &[P],
    message: &str,
    author_name: &str,
    author_email: &str,
) -> Result<Oid> {
    let signature = Signature::now(author_name, author_email)?;
    stage_and_commit(repo, paths, message, &signature)
}

/// Finds the last commit, or None for an unborn repository.
fn find_last_commit(repo: &Repository) -> Result<Option<git2::Commit<'_>>> {
    let head = repo.head();
    match head {
        Ok(head) => {
            let obj = head.resolve()?.peel(git2::ObjectType::Commit)?;
            let commit = obj.into_commit().map_err(|obj_not_commit| {
                GitError::from_str(&format!(
                    "Object is not a commit: {:?}",
                    obj_not_commit.id()
                ))
            })?;
            Ok(Some(commit))
        }
        Err(ref e)
            if e.code() == git2::ErrorCode::NotFound
                || e.code() == git2::ErrorCode::UnbornBranch =>
        {
            Ok(None)
        }
        Err(e) => Err(crate::Error::from(e)),
    }
}

/// Reads the content of a file from the repository at HEAD.
pub fn read_file_content<P: AsRef<Path>>(repo: &Repository, file_path: P) -> Result<String> {
    let head = repo.head()?;
    let tree = head.peel_to_tree()?;
    let entry = tree.get_path(file_path.as_ref())?;
    let object = entry.to_object(repo)?;
    let blob = object
        .as_blob()
        .ok_or_else(|| GitError::from_str("Object is not a blob"))?;
    Ok(String::from_utf8_lossy(blob.content()).into_owned())
}

/// List the most recent commit subjects touching the given path prefix.
///
/// Used by `whois` to surface an agent's recent archive activity.
pub fn recent_commit_subjects(
    repo: &Repository,
    path_prefix: &str,
    limit: usize,
) -> Result<Vec<String>> {
    let mut subjects = Vec::new();
    let mut revwalk = match repo.revwalk() {
        Ok(walk) => walk,
        Err(_) => return Ok(subjects), // unborn repo
    };
    if revwalk.push_head().is_err() {
        return Ok(subjects);
    }

    for oid in revwalk.flatten() {
        if subjects.len() >= limit {
            break;
        }
        let commit = repo.find_commit(oid)?;
        let touches = commit_touches_prefix(repo, &commit, path_prefix)?;
        if touches {
            subjects.push(commit.summary().unwrap_or_default().to_string());
        }
    }
    Ok(subjects)
}

fn commit_touches_prefix(
    repo: &Repository,
    commit: &git2::Commit<'_>,
    prefix: &str,
) -> Result<bool> {
    let tree = commit.tree()?;
    let parent_tree = commit.parent(0).ok().and_then(|p| p.tree().ok());
    let diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)?;
    let mut touches = false;
    diff.foreach(
        &mut |delta, _| {
            if let Some(path) = delta.new_file().path() {
                if path.to_string_lossy().starts_with(prefix) {
                    touches = true;
                }
            }
            true
        },
        None,
        None,
        None,
    )?;
    Ok(touches)
}
