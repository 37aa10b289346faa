//! Local git operations and git SaaS APIs
//!
//! [`GitOps`] wraps git2 and is synchronous; callers on the async runtime run
//! it through `spawn_blocking`. [`GitProviderApi`] covers the few REST calls
//! the pipeline makes against GitHub and GitLab.

mod provider_api;

pub use provider_api::{create_git_provider_api, GitProviderApi, GithubApi, GitlabApi};

#[cfg(test)]
pub use provider_api::MockGitProviderApi;

use std::path::Path;

use git2::build::RepoBuilder;
use git2::{
    Cred, CredentialType, IndexAddOption, PushOptions, RemoteCallbacks, Repository,
    RepositoryInitOptions, Signature,
};
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info};

use crate::{Error, Result};

/// Author of commits made by the provisioner
pub const COMMIT_AUTHOR: (&str, &str) = ("kbot", "kbot@kubefirst.io");

/// Remote name used for pushes
pub const REMOTE_NAME: &str = "origin";

/// Local repository operations
#[cfg_attr(test, automock)]
pub trait GitOps: Send + Sync {
    /// Clone `url` at `branch` into `dest`, replacing anything already there
    fn clone_template(&self, url: &str, branch: &str, dest: &Path) -> Result<()>;

    /// Commit the whole tree at `repo_dir` and push `branch` to `remote_url` over SSH
    fn commit_and_push(
        &self,
        repo_dir: &Path,
        remote_url: &str,
        branch: &str,
        private_key: &str,
        message: &str,
    ) -> Result<()>;
}

/// git2-backed [`GitOps`]
#[derive(Clone, Debug, Default)]
pub struct Git2Ops;

impl GitOps for Git2Ops {
    fn clone_template(&self, url: &str, branch: &str, dest: &Path) -> Result<()> {
        if dest.exists() {
            std::fs::remove_dir_all(dest)?;
        }
        info!(url = %url, branch = %branch, dest = %dest.display(), "Cloning template repository");
        RepoBuilder::new().branch(branch).clone(url, dest)?;
        Ok(())
    }

    fn commit_and_push(
        &self,
        repo_dir: &Path,
        remote_url: &str,
        branch: &str,
        private_key: &str,
        message: &str,
    ) -> Result<()> {
        let repo = open_or_init(repo_dir, branch)?;
        commit_all(&repo, message)?;
        set_remote(&repo, remote_url)?;

        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(|_url, username_from_url, allowed_types| {
            if allowed_types.contains(CredentialType::SSH_KEY) {
                return Cred::ssh_key_from_memory(
                    username_from_url.unwrap_or("git"),
                    None,
                    private_key,
                    None,
                );
            }
            Cred::default()
        });
        callbacks.push_update_reference(|refname, status| match status {
            Some(reason) => Err(git2::Error::from_str(&format!(
                "push of {refname} rejected: {reason}"
            ))),
            None => Ok(()),
        });

        let mut options = PushOptions::new();
        options.remote_callbacks(callbacks);

        let refspec = format!("+refs/heads/{branch}:refs/heads/{branch}");
        let mut remote = repo.find_remote(REMOTE_NAME)?;
        remote.push(&[refspec.as_str()], Some(&mut options))?;

        info!(remote = %remote_url, branch = %branch, "Pushed repository");
        Ok(())
    }
}

fn open_or_init(dir: &Path, branch: &str) -> Result<Repository> {
    if let Ok(repo) = Repository::open(dir) {
        return Ok(repo);
    }
    let mut opts = RepositoryInitOptions::new();
    opts.initial_head(branch);
    Ok(Repository::init_opts(dir, &opts)?)
}

/// Stage everything and commit if the tree changed
fn commit_all(repo: &Repository, message: &str) -> Result<()> {
    let mut index = repo.index()?;
    index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
    index.write()?;
    let tree_id = index.write_tree()?;

    let parent = repo.head().ok().and_then(|head| head.peel_to_commit().ok());
    if let Some(parent) = &parent {
        if parent.tree_id() == tree_id {
            debug!("Nothing to commit");
            return Ok(());
        }
    }

    let tree = repo.find_tree(tree_id)?;
    let (name, email) = COMMIT_AUTHOR;
    let sig = Signature::now(name, email)?;
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
    Ok(())
}

fn set_remote(repo: &Repository, url: &str) -> Result<()> {
    match repo.find_remote(REMOTE_NAME) {
        Ok(remote) if remote.url() == Some(url) => Ok(()),
        Ok(_) => Ok(repo.remote_set_url(REMOTE_NAME, url)?),
        Err(_) => repo.remote(REMOTE_NAME, url).map(|_| ()).map_err(Error::from),
    }
}
