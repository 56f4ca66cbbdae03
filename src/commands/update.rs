use async_trait::async_trait;
use clap::Args;
use miette::Result;

use crate::apply_args::ApplyArgs;
use crate::commands::{read_root_manifest, TerraCommand};

/// Re-resolves dependencies to the newest versions their declared ranges
/// allow, ignoring what the lockfile pinned for them.
#[derive(Debug, Args)]
pub struct UpdateCmd {
    /// Names of packages to update. With no names, everything updates.
    packages: Vec<String>,

    #[command(flatten)]
    apply: ApplyArgs,
}

#[async_trait]
impl TerraCommand for UpdateCmd {
    async fn execute(self) -> Result<()> {
        let mut options = self.apply.warden_options();
        if self.packages.is_empty() {
            options = options.update_all(true);
        } else {
            options = options.update_names(self.packages.clone());
        }
        let manifest = read_root_manifest(&self.apply.root).await?;
        self.apply.execute_with(manifest, options).await
    }
}
