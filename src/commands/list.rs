use std::path::PathBuf;

use async_trait::async_trait;
use clap::Args;
use miette::{miette, Result};
use tree_warden::Lockfile;

use crate::commands::TerraCommand;

/// Lists the installed dependency tree.
#[derive(Debug, Args)]
pub struct ListCmd {
    #[arg(from_global)]
    root: PathBuf,

    #[arg(from_global)]
    json: bool,
}

#[async_trait]
impl TerraCommand for ListCmd {
    async fn execute(self) -> Result<()> {
        let lockfile = self.load_tree().await?;
        if self.json {
            println!("{}", lockfile.to_npm_string(3)?.trim_end());
            return Ok(());
        }

        let root_entry = lockfile.root();
        println!(
            "{}@{}",
            root_entry
                .and_then(|entry| entry.name.as_deref())
                .unwrap_or("(unnamed)"),
            root_entry
                .and_then(|entry| entry.version.as_ref())
                .map(|v| v.to_string())
                .unwrap_or_else(|| "?".into()),
        );
        let mut locations = lockfile
            .packages
            .keys()
            .filter(|location| !location.is_empty())
            .cloned()
            .collect::<Vec<_>>();
        locations.sort();
        for location in locations {
            let entry = &lockfile.packages[&location];
            let depth = location.matches("node_modules/").count();
            let name = entry
                .name_at(&location)
                .unwrap_or_else(|| "(unknown)".into());
            println!(
                "{}{name}@{}",
                "  ".repeat(depth),
                entry
                    .version
                    .as_ref()
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "?".into()),
            );
        }
        Ok(())
    }
}

impl ListCmd {
    /// The installed tree, from the hidden meta record, falling back to
    /// the project lockfile.
    async fn load_tree(&self) -> Result<Lockfile> {
        let meta = self
            .root
            .join("node_modules")
            .join(tree_warden::META_FILE_NAME);
        if let Ok(contents) = async_std::fs::read_to_string(&meta).await {
            return Ok(Lockfile::from_npm(contents)?);
        }
        let lock = self.root.join("package-lock.json");
        if let Ok(contents) = async_std::fs::read_to_string(&lock).await {
            return Ok(Lockfile::from_npm(contents)?);
        }
        Err(miette!(
            "Nothing appears to be installed at {}. Run `terra install` first.",
            self.root.display()
        ))
    }
}
