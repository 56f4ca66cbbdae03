use async_trait::async_trait;
use clap::Args;
use miette::Result;

use crate::apply_args::ApplyArgs;
use crate::commands::{read_root_manifest, TerraCommand};

/// Resolves the project's declared dependencies and applies them to
/// `node_modules/`. Idempotent: running it twice does nothing the second
/// time.
#[derive(Debug, Args)]
pub struct InstallCmd {
    #[command(flatten)]
    apply: ApplyArgs,
}

#[async_trait]
impl TerraCommand for InstallCmd {
    async fn execute(self) -> Result<()> {
        let manifest = read_root_manifest(&self.apply.root).await?;
        self.apply.execute(manifest).await
    }
}
