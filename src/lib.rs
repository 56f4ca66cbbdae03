//! > Keeps your `node_modules/` honest.
//!
//! Terrane is a package manager client for tools that consume
//! `node_modules/` trees: it resolves a project's declared dependencies
//! against an npm-compatible registry, computes the hoisted installation
//! tree that satisfies every constraint, pins the result in a lockfile,
//! and installs exactly the diff between what's on disk and what should
//! be.
//!
//! The interesting machinery lives in the workspace crates:
//! [`tree_warden`] (resolution, placement, lockfiles, reification),
//! [`xylem`] (per-package resolution and fetching), and the `terra-*`
//! support crates. This crate is the thin CLI over them.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::prelude::*;
use url::Url;

use commands::TerraCommand;

mod apply_args;
mod commands;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Terrane {
    /// Path to the project to operate on.
    #[arg(
        help_heading = "Global Options",
        global = true,
        long,
        default_value = "."
    )]
    root: PathBuf,

    /// Registry used for packument and tarball fetches.
    #[arg(
        help_heading = "Global Options",
        global = true,
        long,
        env = "TERRANE_REGISTRY",
        default_value = "https://registry.npmjs.org"
    )]
    registry: Url,

    /// Log output level/directive.
    ///
    /// Supports plain loglevels (off, error, warn, info, debug, trace) as
    /// well as `tracing_subscriber` directives.
    #[arg(
        help_heading = "Global Options",
        global = true,
        long,
        default_value = "info"
    )]
    loglevel: String,

    /// Disable all output.
    #[arg(help_heading = "Global Options", global = true, long, short)]
    quiet: bool,

    /// Format machine-readable output as JSON where supported.
    #[arg(help_heading = "Global Options", global = true, long)]
    json: bool,

    #[command(subcommand)]
    subcommand: TerraneCmd,
}

#[derive(Debug, Subcommand)]
pub enum TerraneCmd {
    /// Resolves the project's dependencies and applies them to
    /// `node_modules/`.
    Install(commands::install::InstallCmd),
    /// Clean install: wipes `node_modules/` and installs strictly from the
    /// lockfile.
    Ci(commands::ci::CiCmd),
    /// Re-resolves some (or all) dependencies to their newest satisfying
    /// versions.
    Update(commands::update::UpdateCmd),
    /// Adds dependencies to package.json and installs them.
    Add(commands::add::AddCmd),
    /// Removes dependencies from package.json and uninstalls them.
    Remove(commands::remove::RemoveCmd),
    /// Lists the installed dependency tree.
    List(commands::list::ListCmd),
}

impl Terrane {
    pub async fn load() -> Result<()> {
        let app = Self::parse();
        app.setup_logging()?;
        app.execute().await
    }

    fn setup_logging(&self) -> Result<()> {
        let directive = if self.quiet { "off" } else { &self.loglevel };
        let filter = EnvFilter::try_new(directive).into_diagnostic()?;
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .without_time()
                    .with_writer(std::io::stderr),
            )
            .with(filter)
            .init();
        Ok(())
    }

    async fn execute(self) -> Result<()> {
        match self.subcommand {
            TerraneCmd::Install(cmd) => cmd.execute().await,
            TerraneCmd::Ci(cmd) => cmd.execute().await,
            TerraneCmd::Update(cmd) => cmd.execute().await,
            TerraneCmd::Add(cmd) => cmd.execute().await,
            TerraneCmd::Remove(cmd) => cmd.execute().await,
            TerraneCmd::List(cmd) => cmd.execute().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Terrane::command().debug_assert();
    }
}

