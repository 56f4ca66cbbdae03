use async_trait::async_trait;
use clap::Args;
use miette::{IntoDiagnostic, Result, WrapErr};

use crate::apply_args::ApplyArgs;
use crate::commands::add::remove_from_manifest;
use crate::commands::TerraCommand;

/// Removes dependencies from the target package and uninstalls them.
#[derive(Debug, Args)]
pub struct RemoveCmd {
    /// Names of packages to remove.
    #[arg(required = true)]
    names: Vec<String>,

    /// Don't write the modified `package.json` back.
    #[arg(long = "no-save", action = clap::ArgAction::SetFalse)]
    save: bool,

    #[command(flatten)]
    apply: ApplyArgs,
}

#[async_trait]
impl TerraCommand for RemoveCmd {
    async fn execute(self) -> Result<()> {
        let path = self.apply.root.join("package.json");
        let raw = async_std::fs::read_to_string(&path)
            .await
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to read {}", path.display()))?;
        let mut manifest_value: serde_json::Value =
            serde_json::from_str(&raw).into_diagnostic()?;

        for name in &self.names {
            remove_from_manifest(&mut manifest_value, name);
            tracing::info!("Removed {name} from package.json.");
        }

        let manifest = serde_json::from_value(manifest_value.clone()).into_diagnostic()?;
        self.apply.execute(manifest).await?;

        if self.save {
            let mut contents =
                serde_json::to_string_pretty(&manifest_value).into_diagnostic()?;
            contents.push('\n');
            async_std::fs::write(&path, contents)
                .await
                .into_diagnostic()?;
        }

        Ok(())
    }
}
