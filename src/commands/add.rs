use async_trait::async_trait;
use clap::Args;
use miette::{IntoDiagnostic, Result, WrapErr};
use terra_spec::PackageSpec;
use xylem::{PackageResolution, XylemOpts};

use crate::apply_args::ApplyArgs;
use crate::commands::TerraCommand;

/// Adds one or more dependencies to the target package.
#[derive(Debug, Args)]
pub struct AddCmd {
    /// Specifiers for packages to add.
    #[arg(required = true)]
    specs: Vec<String>,

    /// Prefix to prepend to resolved versions written to `package.json`.
    ///
    /// For example, `terra add foo@1.2.3 --prefix ~` writes `"foo": "~1.2.3"`.
    #[arg(long, default_value = "^")]
    prefix: String,

    /// Add packages as devDependencies.
    #[arg(long, short = 'D', conflicts_with_all = ["opt", "peer"])]
    dev: bool,

    /// Add packages as optionalDependencies.
    #[arg(long, short = 'O', visible_alias = "optional", conflicts_with = "peer")]
    opt: bool,

    /// Add packages as peerDependencies.
    #[arg(long, short = 'P')]
    peer: bool,

    /// Don't write the modified `package.json` back.
    #[arg(long = "no-save", action = clap::ArgAction::SetFalse)]
    save: bool,

    #[command(flatten)]
    apply: ApplyArgs,
}

#[async_trait]
impl TerraCommand for AddCmd {
    async fn execute(mut self) -> Result<()> {
        let path = self.apply.root.join("package.json");
        let raw = async_std::fs::read_to_string(&path)
            .await
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to read {}", path.display()))?;
        let mut manifest_value: serde_json::Value =
            serde_json::from_str(&raw).into_diagnostic()?;

        let xylem = XylemOpts::new()
            .registry(self.apply.registry.clone())
            .default_tag(&self.apply.default_tag)
            .fetch_retries(self.apply.fetch_retries)
            .build();

        let mut count = 0;
        for spec in &self.specs {
            let parsed: PackageSpec = spec.parse()?;
            let saved_spec = match parsed.target() {
                PackageSpec::Npm { .. } => {
                    let package = xylem.resolve_spec(&parsed).await?;
                    let PackageResolution::Npm {
                        name: registry_name,
                        version,
                        ..
                    } = package.resolved();
                    if parsed.is_alias() {
                        format!("npm:{registry_name}@{}{version}", self.prefix)
                    } else {
                        format!("{}{version}", self.prefix)
                    }
                }
                // git/url/dir/workspace specs are recorded verbatim.
                _ => parsed.requested(),
            };
            let name = parsed.name().to_string();
            tracing::info!("Resolved {spec} to {name}@{saved_spec}.");
            remove_from_manifest(&mut manifest_value, &name);
            self.add_to_manifest(&mut manifest_value, &name, &saved_spec);
            count += 1;
        }

        if self.apply.locked {
            tracing::info!(
                "Ignoring --locked option. It doesn't make sense when adding dependencies."
            );
            self.apply.locked = false;
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
            tracing::info!(
                "Updated package.json with {count} new {}.",
                if count == 1 {
                    self.dep_kind_str_singular()
                } else {
                    self.dep_kind_str()
                }
            );
        }

        Ok(())
    }
}

impl AddCmd {
    fn add_to_manifest(&self, manifest: &mut serde_json::Value, name: &str, spec: &str) {
        let deps = self.dep_kind_str();
        tracing::debug!("Adding {name}@{spec} to {deps}.");
        if !manifest[deps].is_object() {
            manifest[deps] = serde_json::json!({});
        }
        manifest[deps][name] = serde_json::Value::String(spec.into());
    }

    fn dep_kind_str(&self) -> &'static str {
        if self.dev {
            "devDependencies"
        } else if self.opt {
            "optionalDependencies"
        } else if self.peer {
            "peerDependencies"
        } else {
            "dependencies"
        }
    }

    fn dep_kind_str_singular(&self) -> &'static str {
        if self.dev {
            "devDependency"
        } else if self.opt {
            "optionalDependency"
        } else if self.peer {
            "peerDependency"
        } else {
            "dependency"
        }
    }
}

pub(crate) fn remove_from_manifest(manifest: &mut serde_json::Value, name: &str) {
    for ty in [
        "dependencies",
        "devDependencies",
        "optionalDependencies",
        "peerDependencies",
    ] {
        if let Some(obj) = manifest[ty].as_object_mut() {
            if obj.remove(name).is_some() {
                tracing::debug!("Removed {name} from {ty}.");
            }
        }
    }
}
