use std::collections::HashMap;

use maplit::hashmap;
use miette::{IntoDiagnostic, Result};
use pretty_assertions::assert_eq;
use terra_client::{ClientError, RegistryClient};
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn packument_json(name: &str, version: &str) -> serde_json::Value {
    serde_json::json!({
        "name": name,
        "dist-tags": { "latest": version },
        "versions": {
            version: {
                "name": name,
                "version": version,
                "dist": {
                    "tarball": format!("https://example.com/{name}-{version}.tgz"),
                    "integrity": "sha512-deadbeef"
                }
            }
        }
    })
}

async fn client_for(mock_server: &MockServer) -> Result<RegistryClient> {
    Ok(RegistryClient::builder()
        .registry(mock_server.uri().parse::<Url>().into_diagnostic()?)
        .fetch_retries(0)
        .build())
}

#[async_std::test]
async fn packument_fetch_and_cache() -> Result<()> {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .and(header("Accept", "application/vnd.npm.install-v1+json; q=1.0, application/json; q=0.8, */*"))
        .respond_with(ResponseTemplate::new(200).set_body_json(packument_json("a", "1.2.3")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server).await?;
    let first = client.packument("a").await.into_diagnostic()?;
    assert_eq!(first.tags["latest"], "1.2.3".parse()?);

    // Second hit comes from the cache; the mock's expect(1) verifies it.
    let second = client.packument("a").await.into_diagnostic()?;
    assert_eq!(first, second);
    assert!(client.has_cached_packument("a"));
    Ok(())
}

#[async_std::test]
async fn missing_package_is_package_not_found() -> Result<()> {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/nope"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server).await?;
    let err = client.packument("nope").await.unwrap_err();
    assert!(matches!(err, ClientError::PackageNotFound(name) if name == "nope"));
    Ok(())
}

#[async_std::test]
async fn malformed_json_is_registry_error() -> Result<()> {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/garbage"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server).await?;
    let err = client.packument("garbage").await.unwrap_err();
    assert!(matches!(err, ClientError::BadJson { .. }));
    Ok(())
}

#[async_std::test]
async fn scoped_packages_encode_the_slash() -> Result<()> {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/@scope%2Fpkg"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(packument_json("@scope/pkg", "2.0.0")),
        )
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server).await?;
    let packument = client.packument("@scope/pkg").await.into_diagnostic()?;
    assert_eq!(packument.name.as_deref(), Some("@scope/pkg"));
    Ok(())
}

#[async_std::test]
async fn batch_tolerates_partial_failures() -> Result<()> {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(packument_json("a", "1.0.0")))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server).await?;
    let batch = client
        .packuments(["a".to_string(), "missing".to_string()], 2)
        .await
        .into_diagnostic()?;
    assert!(batch.packuments.contains_key("a"));
    assert!(matches!(
        batch.failures.get("missing"),
        Some(ClientError::PackageNotFound(_))
    ));
    Ok(())
}

#[async_std::test]
async fn batch_fails_when_everything_fails() -> Result<()> {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server).await?;
    let err = client
        .packuments(["a".to_string(), "b".to_string()], 2)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::AllPackumentsFailed(2)));
    Ok(())
}

#[async_std::test]
async fn tarball_returns_exact_bytes() -> Result<()> {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a-1.0.0.tgz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"tarball bytes".to_vec()))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server).await?;
    let url = format!("{}/a-1.0.0.tgz", mock_server.uri())
        .parse::<Url>()
        .into_diagnostic()?;
    let bytes = client.tarball(&url).await.into_diagnostic()?;
    assert_eq!(bytes, b"tarball bytes".to_vec());
    Ok(())
}

#[async_std::test]
async fn tarball_batch_aborts_on_any_failure() -> Result<()> {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/good.tgz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/bad.tgz"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server).await?;
    let urls: HashMap<String, Url> = hashmap! {
        "good".to_string() => format!("{}/good.tgz", mock_server.uri()).parse().into_diagnostic()?,
        "bad".to_string() => format!("{}/bad.tgz", mock_server.uri()).parse().into_diagnostic()?,
    };
    assert!(client.tarballs(urls, 2).await.is_err());
    Ok(())
}
