//! Client against a live prover server
//!
//! Binds the prover router on an ephemeral port and resolves through [`HttpProver`].

use std::net::SocketAddr;
use std::sync::Arc;

use alloy_primitives::{Address, Bytes, U256};
use prover_server::{create_router, AppState};
use resolver_client::{ClientError, HttpProver, Prover, ResolverBuilder};
use resolver_core::{namehash, text_key, MemoryState, RecordKind, RegistryWriter, StorageLayout};

const REGISTRY: Address = Address::repeat_byte(0x10);
const RAFFY_OWNER: Address = Address::repeat_byte(0x20);
const SNAPSHOT_BLOCK: &str = "0x1234";

fn create_test_state() -> MemoryState {
    let mut state = MemoryState::new();
    RegistryWriter::new(&mut state, REGISTRY, StorageLayout::default())
        .set_namespace(RAFFY_OWNER, namehash("raffy.eth"), U256::from(1))
        .set_record(U256::from(1), "", text_key("description"), b"I AM ROOT")
        .set_record(U256::from(1), "a.b.c", text_key("description"), b"ABC");
    state
}

async fn spawn_server() -> SocketAddr {
    let app = create_router(Arc::new(AppState::new(create_test_state(), SNAPSHOT_BLOCK)));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

#[tokio::test]
async fn test_health() {
    let addr = spawn_server().await;
    let health: serde_json::Value = reqwest::get(format!("http://{}/health", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(health["status"], "ok");
    assert_eq!(health["block"], SNAPSHOT_BLOCK);
    assert!(health["slots"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_resolve_over_http() {
    let addr = spawn_server().await;
    let resolver = ResolverBuilder::new(REGISTRY)
        .basename("raffy.eth", RAFFY_OWNER)
        .build(HttpProver::new(format!("http://{}", addr), SNAPSHOT_BLOCK));

    let description = RecordKind::Text("description".into());

    let root = resolver.resolve("raffy.eth", &description).await.unwrap();
    assert_eq!(root.value.as_ref(), b"I AM ROOT");

    let nested = resolver.resolve("a.b.c.raffy.eth", &description).await.unwrap();
    assert_eq!(nested.value.as_ref(), b"ABC");

    let missing = resolver.resolve("x.raffy.eth", &description).await.unwrap();
    assert!(missing.is_empty());
}

#[tokio::test]
async fn test_latest_block_accepted() {
    let addr = spawn_server().await;
    let resolver = ResolverBuilder::new(REGISTRY)
        .basename("raffy.eth", RAFFY_OWNER)
        .build(HttpProver::new(format!("http://{}/", addr), "latest"));

    let resolved = resolver
        .resolve("raffy.eth", &RecordKind::Text("description".into()))
        .await
        .unwrap();
    assert_eq!(resolved.value.as_ref(), b"I AM ROOT");
}

#[tokio::test]
async fn test_stale_block_is_transient() {
    let addr = spawn_server().await;
    let resolver = ResolverBuilder::new(REGISTRY)
        .basename("raffy.eth", RAFFY_OWNER)
        .retries(1)
        .build(HttpProver::new(format!("http://{}", addr), "0x9999"));

    let err = resolver
        .resolve("raffy.eth", &RecordKind::Text("description".into()))
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert!(matches!(err, ClientError::ProverTransient(_)));
}

#[tokio::test]
async fn test_malformed_program_rejected() {
    let addr = spawn_server().await;
    let prover = HttpProver::new(format!("http://{}", addr), SNAPSHOT_BLOCK);

    let err = prover
        .evaluate(&Bytes::from_static(&[0x01, 0xee]), &[])
        .await
        .unwrap_err();

    assert!(!err.is_retryable());
    assert!(matches!(err, ClientError::Server { status: 400, .. }));
}

#[tokio::test]
async fn test_unreachable_prover_is_transient() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let prover = HttpProver::new(format!("http://{}", addr), SNAPSHOT_BLOCK);
    let err = prover
        .evaluate(&Bytes::from_static(&[0x00]), &[])
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::ProverTransient(_)));
}
