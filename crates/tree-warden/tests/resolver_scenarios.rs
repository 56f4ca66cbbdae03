use miette::{IntoDiagnostic, Result};
use pretty_assertions::assert_eq;
use serde_json::json;
use terra_common::Manifest;
use tree_warden::{Lockfile, TreeWarden, WardenError};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn version_meta(name: &str, version: &str, deps: &[(&str, &str)]) -> serde_json::Value {
    json!({
        "name": name,
        "version": version,
        "dist": {
            "tarball": format!("https://example.com/{name}-{version}.tgz"),
            "integrity": "sha512-deadbeef"
        },
        "dependencies": deps
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<std::collections::BTreeMap<_, _>>(),
    })
}

/// Mounts a packument for `name`; the last version listed becomes `latest`.
async fn mock_packument(server: &MockServer, name: &str, versions: &[serde_json::Value]) {
    let latest = versions
        .last()
        .and_then(|v| v["version"].as_str())
        .expect("at least one version");
    let packument = json!({
        "name": name,
        "dist-tags": { "latest": latest },
        "versions": versions
            .iter()
            .map(|v| (v["version"].as_str().unwrap().to_string(), v.clone()))
            .collect::<std::collections::BTreeMap<_, _>>(),
    });
    Mock::given(method("GET"))
        .and(path(format!("/{name}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(packument))
        .mount(server)
        .await;
}

fn manifest(value: serde_json::Value) -> Manifest {
    serde_json::from_value(value).unwrap()
}

async fn builder_for(server: &MockServer) -> Result<tree_warden::TreeWardenOptions> {
    Ok(TreeWarden::builder()
        .registry(server.uri().parse::<Url>().into_diagnostic()?)
        .fetch_retries(0))
}

#[async_std::test]
async fn basic_install_picks_max_satisfying() -> Result<()> {
    let server = MockServer::start().await;
    mock_packument(
        &server,
        "a",
        &[
            version_meta("a", "1.0.0", &[]),
            version_meta("a", "1.2.3", &[]),
            version_meta("a", "2.0.0", &[]),
        ],
    )
    .await;

    let warden = builder_for(&server)
        .await?
        .resolve_manifest(manifest(json!({
            "name": "proj",
            "version": "1.0.0",
            "dependencies": { "a": "^1.0.0" }
        })))
        .await?;

    let lockfile = warden.to_lockfile();
    assert_eq!(
        lockfile.packages.keys().collect::<Vec<_>>(),
        vec!["", "node_modules/a"]
    );
    assert_eq!(
        lockfile.packages["node_modules/a"].version,
        Some("1.2.3".parse()?)
    );
    Ok(())
}

#[async_std::test]
async fn transitive_deps_hoist_to_the_root() -> Result<()> {
    let server = MockServer::start().await;
    mock_packument(
        &server,
        "b",
        &[version_meta("b", "1.0.0", &[("c", "^1.0.0")])],
    )
    .await;
    mock_packument(&server, "c", &[version_meta("c", "1.5.0", &[])]).await;

    let warden = builder_for(&server)
        .await?
        .resolve_manifest(manifest(json!({
            "name": "proj",
            "version": "1.0.0",
            "dependencies": { "b": "1.x" }
        })))
        .await?;

    let graph = warden.graph();
    let b = graph.node_at_location("node_modules/b").expect("b at root");
    let c = graph
        .node_at_location("node_modules/c")
        .expect("c hoisted to root");
    // b's dependency edge resolves to the shared root-level copy.
    assert_eq!(
        graph.get(b).unwrap().edge("c").and_then(|edge| edge.to()),
        Some(c)
    );
    Ok(())
}

#[async_std::test]
async fn conflicting_versions_nest_under_their_dependent() -> Result<()> {
    let server = MockServer::start().await;
    mock_packument(
        &server,
        "a",
        &[
            version_meta("a", "1.0.0", &[]),
            version_meta("a", "2.0.0", &[]),
        ],
    )
    .await;
    mock_packument(
        &server,
        "b",
        &[version_meta("b", "1.0.0", &[("a", "2.x")])],
    )
    .await;

    let warden = builder_for(&server)
        .await?
        .resolve_manifest(manifest(json!({
            "name": "proj",
            "version": "1.0.0",
            "dependencies": { "a": "1.x", "b": "1.x" }
        })))
        .await?;

    let lockfile = warden.to_lockfile();
    assert_eq!(
        lockfile.packages["node_modules/a"].version,
        Some("1.0.0".parse()?)
    );
    assert_eq!(
        lockfile.packages["node_modules/b/node_modules/a"].version,
        Some("2.0.0".parse()?)
    );
    Ok(())
}

#[async_std::test]
async fn shared_ranges_reuse_one_copy() -> Result<()> {
    let server = MockServer::start().await;
    mock_packument(&server, "a", &[version_meta("a", "1.5.0", &[])]).await;
    mock_packument(
        &server,
        "b",
        &[version_meta("b", "1.0.0", &[("a", "^1.0.0")])],
    )
    .await;

    let warden = builder_for(&server)
        .await?
        .resolve_manifest(manifest(json!({
            "name": "proj",
            "version": "1.0.0",
            "dependencies": { "a": "^1.0.0", "b": "1.x" }
        })))
        .await?;

    let lockfile = warden.to_lockfile();
    let a_entries = lockfile
        .packages
        .keys()
        .filter(|location| location.ends_with("node_modules/a"))
        .count();
    assert_eq!(a_entries, 1);

    let graph = warden.graph();
    let a = graph.node_at_location("node_modules/a").unwrap();
    let b = graph.node_at_location("node_modules/b").unwrap();
    assert_eq!(
        graph.get(b).unwrap().edge("a").and_then(|edge| edge.to()),
        Some(a)
    );
    Ok(())
}

#[async_std::test]
async fn aliases_install_under_the_local_name() -> Result<()> {
    let server = MockServer::start().await;
    mock_packument(&server, "bar", &[version_meta("bar", "1.2.0", &[])]).await;

    let warden = builder_for(&server)
        .await?
        .resolve_manifest(manifest(json!({
            "name": "proj",
            "version": "1.0.0",
            "dependencies": { "foo": "npm:bar@^1" }
        })))
        .await?;

    let lockfile = warden.to_lockfile();
    let foo = &lockfile.packages["node_modules/foo"];
    assert_eq!(foo.name.as_deref(), Some("bar"));
    assert_eq!(foo.version, Some("1.2.0".parse()?));

    let graph = warden.graph();
    let idx = graph.node_at_location("node_modules/foo").unwrap();
    let node = graph.get(idx).unwrap();
    assert_eq!(node.name(), "foo");
    assert_eq!(node.registry_name(), "bar");
    Ok(())
}

#[async_std::test]
async fn missing_optional_deps_are_tolerated() -> Result<()> {
    let server = MockServer::start().await;
    mock_packument(&server, "a", &[version_meta("a", "1.0.0", &[])]).await;
    // `ghost` has no mock, so the registry 404s it.

    let warden = builder_for(&server)
        .await?
        .resolve_manifest(manifest(json!({
            "name": "proj",
            "version": "1.0.0",
            "dependencies": { "a": "^1.0.0" },
            "optionalDependencies": { "ghost": "^1.0.0" }
        })))
        .await?;

    let lockfile = warden.to_lockfile();
    assert!(lockfile.packages.contains_key("node_modules/a"));
    assert!(!lockfile.packages.contains_key("node_modules/ghost"));
    Ok(())
}

#[async_std::test]
async fn missing_required_deps_are_fatal() -> Result<()> {
    let server = MockServer::start().await;

    let result = builder_for(&server)
        .await?
        .resolve_manifest(manifest(json!({
            "name": "proj",
            "version": "1.0.0",
            "dependencies": { "ghost": "^1.0.0" }
        })))
        .await;

    assert!(matches!(
        result,
        Err(WardenError::ResolveError { name, .. }) if name == "ghost"
    ));
    Ok(())
}

#[async_std::test]
async fn optional_peers_do_not_install() -> Result<()> {
    let server = MockServer::start().await;
    mock_packument(&server, "a", &[version_meta("a", "1.0.0", &[])]).await;

    let warden = builder_for(&server)
        .await?
        .resolve_manifest(manifest(json!({
            "name": "proj",
            "version": "1.0.0",
            "dependencies": { "a": "^1.0.0" },
            "peerDependencies": { "react": ">=16" },
            "peerDependenciesMeta": { "react": { "optional": true } }
        })))
        .await?;

    let lockfile = warden.to_lockfile();
    assert!(!lockfile.packages.contains_key("node_modules/react"));
    Ok(())
}

#[async_std::test]
async fn dev_and_prod_reachability_set_flags() -> Result<()> {
    let server = MockServer::start().await;
    mock_packument(&server, "a", &[version_meta("a", "1.0.0", &[])]).await;
    mock_packument(
        &server,
        "d",
        &[version_meta("d", "1.0.0", &[("e", "^1.0.0")])],
    )
    .await;
    mock_packument(&server, "e", &[version_meta("e", "1.0.0", &[])]).await;

    let warden = builder_for(&server)
        .await?
        .resolve_manifest(manifest(json!({
            "name": "proj",
            "version": "1.0.0",
            "dependencies": { "a": "^1.0.0" },
            "devDependencies": { "d": "1.x" }
        })))
        .await?;

    let graph = warden.graph();
    let flags = |location: &str| {
        let node = graph.get(graph.node_at_location(location).unwrap()).unwrap();
        (node.is_dev(), node.is_extraneous())
    };
    assert_eq!(flags("node_modules/a"), (false, false));
    assert_eq!(flags("node_modules/d"), (true, false));
    // d's own dependency is only reachable through the dev edge.
    assert_eq!(flags("node_modules/e"), (true, false));
    Ok(())
}

#[async_std::test]
async fn optional_flag_propagates_by_path() -> Result<()> {
    let server = MockServer::start().await;
    mock_packument(
        &server,
        "opt",
        &[version_meta("opt", "1.0.0", &[("shared", "^1.0.0")])],
    )
    .await;
    mock_packument(&server, "shared", &[version_meta("shared", "1.0.0", &[])]).await;

    let warden = builder_for(&server)
        .await?
        .resolve_manifest(manifest(json!({
            "name": "proj",
            "version": "1.0.0",
            "dependencies": { "shared": "^1.0.0" },
            "optionalDependencies": { "opt": "^1.0.0" }
        })))
        .await?;

    let graph = warden.graph();
    let optional = |location: &str| {
        graph
            .get(graph.node_at_location(location).unwrap())
            .unwrap()
            .is_optional()
    };
    assert!(optional("node_modules/opt"));
    // shared is reachable through a non-optional path too, so it isn't
    // optional.
    assert!(!optional("node_modules/shared"));
    Ok(())
}

#[async_std::test]
async fn lockfile_pins_win_over_newer_registry_versions() -> Result<()> {
    let server = MockServer::start().await;
    mock_packument(
        &server,
        "a",
        &[
            version_meta("a", "1.0.0", &[]),
            version_meta("a", "1.2.3", &[]),
        ],
    )
    .await;

    let lockfile = Lockfile::from_npm(
        json!({
            "name": "proj",
            "version": "1.0.0",
            "lockfileVersion": 3,
            "packages": {
                "": { "name": "proj", "version": "1.0.0" },
                "node_modules/a": {
                    "version": "1.0.0",
                    "resolved": "https://example.com/a-1.0.0.tgz",
                    "integrity": "sha512-deadbeef"
                }
            }
        })
        .to_string(),
    )?;

    let warden = builder_for(&server)
        .await?
        .lockfile(lockfile)
        .resolve_manifest(manifest(json!({
            "name": "proj",
            "version": "1.0.0",
            "dependencies": { "a": "^1.0.0" }
        })))
        .await?;

    assert_eq!(
        warden.to_lockfile().packages["node_modules/a"].version,
        Some("1.0.0".parse()?)
    );
    Ok(())
}

#[async_std::test]
async fn locked_mode_rejects_drifted_lockfiles() -> Result<()> {
    let server = MockServer::start().await;
    mock_packument(&server, "a", &[version_meta("a", "1.2.3", &[])]).await;

    // Lockfile knows nothing about `a`, so the resolved tree must differ.
    let lockfile = Lockfile::from_npm(
        json!({
            "name": "proj",
            "version": "1.0.0",
            "lockfileVersion": 3,
            "packages": { "": { "name": "proj", "version": "1.0.0" } }
        })
        .to_string(),
    )?;

    let result = builder_for(&server)
        .await?
        .lockfile(lockfile)
        .locked(true)
        .resolve_manifest(manifest(json!({
            "name": "proj",
            "version": "1.0.0",
            "dependencies": { "a": "^1.0.0" }
        })))
        .await;

    assert!(matches!(
        result,
        Err(WardenError::LockedMismatch { added: 1, .. })
    ));
    Ok(())
}

#[async_std::test]
async fn resolution_is_deterministic() -> Result<()> {
    let server = MockServer::start().await;
    mock_packument(
        &server,
        "a",
        &[
            version_meta("a", "1.0.0", &[]),
            version_meta("a", "2.0.0", &[]),
        ],
    )
    .await;
    mock_packument(
        &server,
        "b",
        &[version_meta("b", "1.0.0", &[("a", "2.x"), ("c", "^1.0.0")])],
    )
    .await;
    mock_packument(&server, "c", &[version_meta("c", "1.0.0", &[])]).await;

    let root = json!({
        "name": "proj",
        "version": "1.0.0",
        "dependencies": { "a": "1.x", "b": "1.x" }
    });

    let first = builder_for(&server)
        .await?
        .resolve_manifest(manifest(root.clone()))
        .await?
        .to_lockfile()
        .to_npm_string(3)?;
    let second = builder_for(&server)
        .await?
        .resolve_manifest(manifest(root))
        .await?
        .to_lockfile()
        .to_npm_string(3)?;
    assert_eq!(first, second);
    Ok(())
}
