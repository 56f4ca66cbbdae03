use async_trait::async_trait;
use clap::Args;
use miette::{miette, IntoDiagnostic, Result};

use crate::apply_args::ApplyArgs;
use crate::commands::{read_root_manifest, TerraCommand};

/// Clean install: requires a lockfile, wipes `node_modules/`, and errors
/// if the manifest has drifted from the lockfile.
#[derive(Debug, Args)]
pub struct CiCmd {
    #[command(flatten)]
    apply: ApplyArgs,
}

#[async_trait]
impl TerraCommand for CiCmd {
    async fn execute(mut self) -> Result<()> {
        let has_lockfile = ["npm-shrinkwrap.json", "package-lock.json", "yarn.lock"]
            .iter()
            .any(|name| self.apply.root.join(name).exists());
        if !has_lockfile {
            return Err(miette!(
                "`terra ci` requires an existing lockfile. Run `terra install` first."
            ));
        }

        let node_modules = self.apply.root.join("node_modules");
        if node_modules.exists() {
            async_std::fs::remove_dir_all(&node_modules)
                .await
                .into_diagnostic()?;
            tracing::info!("Removed existing node_modules/.");
        }

        self.apply.locked = true;
        let manifest = read_root_manifest(&self.apply.root).await?;
        self.apply.execute(manifest).await
    }
}
