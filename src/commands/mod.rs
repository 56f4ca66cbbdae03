use std::path::Path;

use async_trait::async_trait;
use miette::{IntoDiagnostic, Result, WrapErr};
use terra_common::Manifest;

pub mod add;
pub mod ci;
pub mod install;
pub mod list;
pub mod remove;
pub mod update;

#[async_trait]
pub trait TerraCommand {
    async fn execute(self) -> Result<()>;
}

/// Reads and parses `<root>/package.json`.
pub(crate) async fn read_root_manifest(root: &Path) -> Result<Manifest> {
    let path = root.join("package.json");
    let raw = async_std::fs::read_to_string(&path)
        .await
        .into_diagnostic()
        .wrap_err_with(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw)
        .into_diagnostic()
        .wrap_err_with(|| format!("Failed to parse {}", path.display()))
}
