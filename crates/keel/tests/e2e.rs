//! End-to-end run against a real server binary.
//!
//! Ignored by default. Point `KEEL_E2E_BINARY` at a FrankenPHP build and run
//! with `--ignored`.

mod common;

use common::{config_in, site};
use keel::{Orchestrator, StaticSites};
use keel_common::InstanceStatus;
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[tokio::test]
#[ignore]
async fn real_runtime_serves_and_reloads() {
    let Some(binary) = std::env::var_os("KEEL_E2E_BINARY").map(PathBuf::from) else {
        eprintln!("KEEL_E2E_BINARY not set, skipping");
        return;
    };

    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.dev_mode = true;
    config.runtimes[0].binary = binary;
    config.runtimes[0].port = free_port();
    config.runtimes[0].admin_port = free_port();
    let port = config.runtimes[0].port;

    let shop = site("shop", "shop.test", "8.4", dir.path());
    std::fs::create_dir_all(shop.document_root()).unwrap();
    std::fs::write(shop.document_root().join("index.php"), "<?php echo 'hello from keel';").unwrap();

    let sites = Arc::new(StaticSites::new(vec![shop.clone()]));
    let orchestrator = Orchestrator::new(config, sites.clone());
    orchestrator.start("8.4").await.unwrap();

    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{port}/");
    let mut body = String::new();
    for _ in 0..50 {
        if let Ok(resp) = client.get(&url).header("Host", "shop.test").send().await {
            body = resp.text().await.unwrap_or_default();
            if body.contains("hello") {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    assert!(body.contains("hello from keel"), "got: {body}");

    let mut blog = site("blog", "blog.test", "8.4", dir.path());
    blog.public_path = String::new();
    std::fs::create_dir_all(blog.document_root()).unwrap();
    std::fs::write(blog.document_root().join("index.php"), "<?php echo 'blog';").unwrap();
    sites.replace(vec![shop, blog]);
    orchestrator.reload("8.4").await.unwrap();

    let body = client
        .get(&url)
        .header("Host", "blog.test")
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "blog");

    assert!(orchestrator.instance("8.4").await.unwrap().threads > 0);
    orchestrator.stop_all().await.unwrap();
    assert_eq!(
        orchestrator.instance("8.4").await.unwrap().status,
        InstanceStatus::Stopped
    );
}
