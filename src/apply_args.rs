use std::path::PathBuf;

use clap::Args;
use miette::Result;
use terra_common::Manifest;
use tree_warden::{LockfileFormat, TreeWarden, TreeWardenOptions};
use url::Url;

/// Applies the current project's requested dependencies to
/// `node_modules/`, adding, removing, and updating installed packages as
/// needed, then writes the lockfile. This is the shared back half of
/// `install`, `ci`, `update`, `add`, and `remove`.
#[derive(Debug, Args)]
#[command(next_help_heading = "Apply Options")]
pub struct ApplyArgs {
    /// Skip restoring packages into `node_modules` and just resolve the
    /// tree and write the lockfile.
    #[arg(long)]
    pub lockfile_only: bool,

    /// Make the resolver error if the newly-resolved tree would differ
    /// from the existing lockfile.
    #[arg(long, visible_alias = "frozen")]
    pub locked: bool,

    /// Disable writing the lockfile after operations complete.
    ///
    /// Note that lockfiles are only written after all operations complete
    /// successfully.
    #[arg(long = "no-lockfile", action = clap::ArgAction::SetFalse)]
    pub lockfile: bool,

    /// Lockfile version to write (1, 2, or 3).
    #[arg(long, default_value_t = 3)]
    pub lockfile_version: u64,

    /// Default dist-tag to use when resolving bare package names.
    #[arg(long, default_value = "latest")]
    pub default_tag: String,

    /// Number of concurrent packument fetches during resolution.
    #[arg(long, default_value_t = tree_warden::DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Number of concurrent tarball downloads during installation.
    #[arg(long, default_value_t = tree_warden::DEFAULT_TARBALL_CONCURRENCY)]
    pub tarball_concurrency: usize,

    /// Number of times to retry failed registry requests.
    #[arg(long, default_value_t = 2)]
    pub fetch_retries: u32,

    #[arg(from_global)]
    pub registry: Url,

    #[arg(from_global)]
    pub root: PathBuf,

    #[arg(from_global)]
    pub quiet: bool,
}

impl ApplyArgs {
    /// A warden options builder preconfigured from these flags.
    pub fn warden_options(&self) -> TreeWardenOptions {
        TreeWarden::builder()
            .registry(self.registry.clone())
            .root(&self.root)
            .default_tag(&self.default_tag)
            .concurrency(self.concurrency)
            .tarball_concurrency(self.tarball_concurrency)
            .fetch_retries(self.fetch_retries)
            .locked(self.locked)
            .on_reify_progress(|message, processed, total| {
                tracing::debug!("{message}: {processed}/{total}");
            })
    }

    pub async fn execute(&self, manifest: Manifest) -> Result<()> {
        self.execute_with(manifest, self.warden_options()).await
    }

    /// Runs resolution + reification with a caller-tweaked options
    /// builder (update uses this to drop lockfile pins).
    pub async fn execute_with(
        &self,
        manifest: Manifest,
        options: TreeWardenOptions,
    ) -> Result<()> {
        let total_time = std::time::Instant::now();

        let warden = options.resolve_manifest(manifest).await?;

        if self.lockfile_only {
            tracing::info!("Skipping node_modules/, only writing the lockfile.");
        } else {
            let summary = warden.reify().await?;
            tracing::info!(
                "Applied node_modules/: {} added, {} updated, {} removed, {} bins linked.",
                summary.added,
                summary.updated,
                summary.removed,
                summary.bins_linked,
            );
        }

        if self.lockfile {
            let path = self.root.join("package-lock.json");
            warden
                .write_lockfile(&path, self.lockfile_version)
                .await?;
            tracing::info!("Wrote lockfile to {}.", path.display());
            // Projects that came in with a yarn.lock keep it current too.
            if warden.detected_lockfile_format() == Some(LockfileFormat::YarnBerry) {
                let yarn_path = self.root.join("yarn.lock");
                warden.write_yarn_lockfile(&yarn_path).await?;
                tracing::info!("Wrote lockfile to {}.", yarn_path.display());
            }
        }

        tracing::info!(
            "Done in {}s.",
            total_time.elapsed().as_millis() as f32 / 1000.0
        );
        Ok(())
    }
}
