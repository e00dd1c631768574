//! Off-chain lookup handshake tests
//!
//! A mock resolving contract answers `resolve` with an `OffchainLookup` revert built from
//! the resolution builder, and answers the callback by selecting from the prover's outputs.

use std::sync::atomic::{AtomicU32, Ordering};

use alloy_primitives::{address, Address, Bytes, FixedBytes, B256, U256};
use alloy_sol_types::{sol, SolCall, SolError, SolValue};
use resolver_client::abi::{
    addrCall, contenthashCall, pubkeyCall, resolveCall, textCall, OffchainLookup,
};
use resolver_client::error::Result;
use resolver_client::{
    AwaitingRevert, CallOutcome, ClientError, ContractCaller, Handshake, LocalProver, Lookup,
    LookupOutcome, Prover, RecordValue, ResolverBuilder,
};
use resolver_core::keys::DEFAULT_EVM_COIN_TYPE;
use resolver_core::{
    address_key, dns_decode, labelhash, namehash, pubkey_key, select, text_key,
    BasenameRegistry, EvalState, GatewayRequest, Link, MemoryState, RecordKind, RegistryWriter,
    ResolutionBuilder, StorageLayout,
};

sol! {
    function resolveCallback(bytes[] values, uint8 exitCode, bytes carry) external view returns (bytes);
}

const REGISTRY: Address = Address::repeat_byte(0x10);
const RAFFY_OWNER: Address = Address::repeat_byte(0x20);
const CHONK_DEPLOYER: Address = Address::repeat_byte(0x30);
const NFT: Address = Address::repeat_byte(0x40);
const CONTRACT: Address = Address::repeat_byte(0x77);

const PAUSED_SLOT: u64 = 99;
const EXIT_PAUSED: u8 = 9;

const SUB_ADDR: Address = address!("51050ec063d393217b436747617ad1c2285aeeee");
const DEFAULT_ADDR: Address = address!("eb42a2c5f6ba8b2d3ee2e6a5c2b5cc8b28d51f11");
const PUBKEY: [u8; 64] = [0x5a; 64];

fn create_test_state() -> MemoryState {
    let mut state = MemoryState::new();
    let mut writer = RegistryWriter::new(&mut state, REGISTRY, StorageLayout::default());

    let link = Link::Tokenized {
        link_type: U256::from(1),
        mediator: NFT,
    };

    writer
        .set_namespace(RAFFY_OWNER, namehash("raffy.eth"), U256::from(1))
        .set_record(U256::from(1), "", text_key("description"), b"I AM ROOT")
        .set_record(
            U256::from(1),
            "sub",
            address_key(U256::from(60)),
            SUB_ADDR.as_slice(),
        )
        .set_record(
            U256::from(1),
            "",
            address_key(U256::from(DEFAULT_EVM_COIN_TYPE)),
            DEFAULT_ADDR.as_slice(),
        )
        .set_record(U256::from(1), "", pubkey_key(), &PUBKEY)
        .set_link(
            CHONK_DEPLOYER,
            "chonk.eth",
            B256::from(link.to_word().to_be_bytes::<32>()),
        )
        .set_namespace(NFT, labelhash("raffy"), U256::from(2))
        .set_record(U256::from(2), "", text_key("description"), b"Raffy dot Chonk");

    state
}

fn create_test_basenames() -> BasenameRegistry {
    let mut basenames = BasenameRegistry::new();
    basenames.insert("raffy.eth", RAFFY_OWNER);
    basenames.insert("chonk.eth", CHONK_DEPLOYER);
    basenames
}

fn description() -> RecordKind {
    RecordKind::Text("description".into())
}

/// How the mock contract reacts to `resolve`
#[derive(Clone, Copy)]
enum Mode {
    Lookup,
    /// Prepends a storage check that aborts while a pause flag is unset
    Paused,
    /// Returns normally, as a plain on-chain resolver would
    Return,
    /// Reverts with `Error(string)`
    ForeignRevert,
    /// Answers the callback with bytes that are not ABI-encoded
    GarbageAnswer,
    /// Cuts the lookup's `extraData` short
    TruncatedExtraData,
}

struct MockResolver {
    basenames: BasenameRegistry,
    builder: ResolutionBuilder,
    mode: Mode,
}

impl MockResolver {
    fn new(mode: Mode) -> Self {
        Self {
            basenames: create_test_basenames(),
            builder: ResolutionBuilder::new(REGISTRY),
            mode,
        }
    }

    fn record_kind(query: &[u8]) -> Option<RecordKind> {
        let selector = query.get(..4)?;
        if selector == textCall::SELECTOR {
            textCall::abi_decode(query)
                .ok()
                .map(|call| RecordKind::Text(call.key))
        } else if selector == addrCall::SELECTOR {
            addrCall::abi_decode(query)
                .ok()
                .map(|call| RecordKind::Addr(call.coinType))
        } else if selector == contenthashCall::SELECTOR {
            Some(RecordKind::Contenthash)
        } else if selector == pubkeyCall::SELECTOR {
            Some(RecordKind::Pubkey)
        } else {
            None
        }
    }

    fn revert(message: &str) -> CallOutcome {
        let mut data = vec![0x08, 0xc3, 0x79, 0xa0];
        data.extend_from_slice(&message.to_string().abi_encode());
        CallOutcome::Revert(Bytes::from(data))
    }

    fn on_resolve(&self, data: &[u8]) -> CallOutcome {
        let Ok(call) = resolveCall::abi_decode(data) else {
            return Self::revert("bad calldata");
        };
        let (Ok(name), Some(record)) = (dns_decode(&call.name), Self::record_kind(&call.data))
        else {
            return Self::revert("unsupported query");
        };

        let request = match self.mode {
            Mode::Return => return CallOutcome::Success(Bytes::new().abi_encode().into()),
            Mode::ForeignRevert => return Self::revert("not a gateway resolver"),
            Mode::Paused => {
                let mut req = GatewayRequest::new(1);
                req.set_target(CONTRACT)
                    .set_slot(U256::from(PAUSED_SLOT))
                    .read()
                    .assert_nonzero(EXIT_PAUSED);
                req.finish().unwrap()
            }
            Mode::Lookup | Mode::GarbageAnswer | Mode::TruncatedExtraData => {
                let decomposition = self.basenames.decompose(&name).unwrap();
                self.builder.build(&decomposition, &record).unwrap()
            }
        };

        let lookup = Lookup {
            sender: CONTRACT,
            urls: vec!["http://prover.test".into()],
            target: REGISTRY,
            context: Bytes::new(),
            ops: request.ops,
            inputs: request.inputs,
            callback: FixedBytes::from(resolveCallbackCall::SELECTOR),
            carry: (call.name, call.data).abi_encode_params().into(),
        };
        let revert = lookup.encode_revert();

        if let Mode::TruncatedExtraData = self.mode {
            let error = <OffchainLookup as SolError>::abi_decode(&revert).unwrap();
            let truncated = OffchainLookup {
                extraData: Bytes::copy_from_slice(&error.extraData[..64]),
                ..error
            };
            return CallOutcome::Revert(Bytes::from(SolError::abi_encode(&truncated)));
        }
        CallOutcome::Revert(revert)
    }

    fn on_callback(&self, data: &[u8]) -> CallOutcome {
        let Ok(callback) = resolveCallbackCall::abi_decode(data) else {
            return Self::revert("bad callback");
        };
        if let Mode::GarbageAnswer = self.mode {
            return CallOutcome::Success(Bytes::from_static(&[1, 2, 3]));
        }
        let Ok((name, query)) = <(Bytes, Bytes)>::abi_decode_params(&callback.carry) else {
            return Self::revert("bad carry");
        };

        let name = dns_decode(&name).unwrap();
        let record = Self::record_kind(&query).unwrap();
        let decomposition = self.basenames.decompose(&name).unwrap();
        let state = EvalState::new(
            callback.values.into_iter().map(Some).collect(),
            callback.exitCode,
        );

        match select(&decomposition, &state) {
            Ok(resolved) => {
                let answer = match record {
                    RecordKind::Text(_) => String::from_utf8_lossy(&resolved.value)
                        .into_owned()
                        .abi_encode(),
                    RecordKind::Pubkey if resolved.value.len() == 64 => (
                        B256::from_slice(&resolved.value[..32]),
                        B256::from_slice(&resolved.value[32..]),
                    )
                        .abi_encode_params(),
                    RecordKind::Pubkey => (B256::ZERO, B256::ZERO).abi_encode_params(),
                    _ => resolved.value.abi_encode(),
                };
                CallOutcome::Success(Bytes::from(answer))
            }
            Err(_) => Self::revert("unresolved"),
        }
    }
}

impl ContractCaller for MockResolver {
    async fn call(&self, to: Address, data: Bytes) -> Result<CallOutcome> {
        assert_eq!(to, CONTRACT);
        match data.get(..4) {
            Some(selector) if selector == resolveCall::SELECTOR => Ok(self.on_resolve(&data)),
            Some(selector) if selector == resolveCallbackCall::SELECTOR => {
                Ok(self.on_callback(&data))
            }
            _ => Ok(Self::revert("unknown selector")),
        }
    }
}

/// Fails with a transient error for the first `failures` calls
struct FlakyProver {
    inner: LocalProver<MemoryState>,
    failures: u32,
    calls: AtomicU32,
}

impl FlakyProver {
    fn new(failures: u32) -> Self {
        Self {
            inner: LocalProver::new(create_test_state()),
            failures,
            calls: AtomicU32::new(0),
        }
    }
}

impl Prover for FlakyProver {
    async fn evaluate(&self, ops: &Bytes, inputs: &[Bytes]) -> Result<EvalState> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(ClientError::ProverTransient("snapshot reloading".into()));
        }
        self.inner.evaluate(ops, inputs).await
    }
}

fn create_test_handshake(mode: Mode) -> Handshake<MockResolver, LocalProver<MemoryState>> {
    Handshake::new(
        MockResolver::new(mode),
        LocalProver::new(create_test_state()),
        CONTRACT,
    )
}

#[tokio::test]
async fn test_text_answer() {
    let handshake = create_test_handshake(Mode::Lookup);

    let outcome = handshake.lookup("raffy.chonk.eth", description()).await.unwrap();
    assert_eq!(
        outcome,
        LookupOutcome::Answered(RecordValue::Text("Raffy dot Chonk".into()))
    );

    let outcome = handshake.lookup("raffy.eth", description()).await.unwrap();
    assert_eq!(
        outcome,
        LookupOutcome::Answered(RecordValue::Text("I AM ROOT".into()))
    );
}

#[tokio::test]
async fn test_bytes_answer() {
    let handshake = create_test_handshake(Mode::Lookup);

    let outcome = handshake
        .lookup("sub.raffy.eth", RecordKind::Addr(U256::from(60)))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        LookupOutcome::Answered(RecordValue::Bytes(Bytes::copy_from_slice(
            SUB_ADDR.as_slice()
        )))
    );

    let outcome = handshake
        .lookup("raffy.eth", RecordKind::Contenthash)
        .await
        .unwrap();
    assert_eq!(outcome, LookupOutcome::Answered(RecordValue::Bytes(Bytes::new())));
}

#[tokio::test]
async fn test_pubkey_answer() {
    let handshake = create_test_handshake(Mode::Lookup);

    let outcome = handshake.lookup("raffy.eth", RecordKind::Pubkey).await.unwrap();
    assert_eq!(
        outcome,
        LookupOutcome::Answered(RecordValue::Bytes(Bytes::copy_from_slice(&PUBKEY)))
    );

    let outcome = handshake
        .lookup("sub.raffy.eth", RecordKind::Pubkey)
        .await
        .unwrap();
    assert_eq!(outcome, LookupOutcome::Answered(RecordValue::Bytes(Bytes::new())));
}

#[tokio::test]
async fn test_chain_address_falls_back_to_default() {
    let handshake = create_test_handshake(Mode::Lookup);
    let base = RecordKind::Addr(U256::from(DEFAULT_EVM_COIN_TYPE | 8453));

    let outcome = handshake.lookup("raffy.eth", base).await.unwrap();
    assert_eq!(
        outcome,
        LookupOutcome::Answered(RecordValue::Bytes(Bytes::copy_from_slice(
            DEFAULT_ADDR.as_slice()
        )))
    );

    // mainnet has its own record and never falls back
    let outcome = handshake
        .lookup("raffy.eth", RecordKind::Addr(U256::from(60)))
        .await
        .unwrap();
    assert_eq!(outcome, LookupOutcome::Answered(RecordValue::Bytes(Bytes::new())));
}

#[tokio::test]
async fn test_handshake_agrees_with_direct_path() {
    let handshake = create_test_handshake(Mode::Lookup);
    let resolver = ResolverBuilder::new(REGISTRY)
        .basenames(create_test_basenames())
        .build(LocalProver::new(create_test_state()));

    for name in ["raffy.eth", "raffy.chonk.eth", "sub.raffy.eth", "nobody.chonk.eth"] {
        let direct = resolver.resolve(name, &description()).await.unwrap();
        let outcome = handshake.lookup(name, description()).await.unwrap();
        assert_eq!(
            outcome,
            LookupOutcome::Answered(RecordValue::from_raw(&description(), direct.value)),
            "{}",
            name
        );
    }
}

#[tokio::test]
async fn test_aborted_program() {
    let handshake = create_test_handshake(Mode::Paused);
    let outcome = handshake.lookup("raffy.eth", description()).await.unwrap();

    assert_eq!(
        outcome,
        LookupOutcome::Aborted {
            exit_code: EXIT_PAUSED
        }
    );
}

#[tokio::test]
async fn test_normal_return_is_protocol_mismatch() {
    let handshake = create_test_handshake(Mode::Return);
    let err = handshake.lookup("raffy.eth", description()).await.unwrap_err();
    assert!(matches!(err, ClientError::ProtocolMismatch(_)));
}

#[tokio::test]
async fn test_foreign_revert_is_protocol_mismatch() {
    let handshake = create_test_handshake(Mode::ForeignRevert);
    let err = handshake.lookup("raffy.eth", description()).await.unwrap_err();
    assert!(matches!(err, ClientError::ProtocolMismatch(_)));
}

#[tokio::test]
async fn test_undecodable_answer_is_decode_failure() {
    let handshake = create_test_handshake(Mode::GarbageAnswer);
    let err = handshake.lookup("raffy.eth", description()).await.unwrap_err();
    assert!(matches!(err, ClientError::DecodeFailure(_)));
}

#[tokio::test]
async fn test_truncated_extra_data_is_protocol_mismatch() {
    let handshake = create_test_handshake(Mode::TruncatedExtraData);
    let err = handshake.lookup("raffy.eth", description()).await.unwrap_err();
    assert!(matches!(err, ClientError::ProtocolMismatch(_)));
}

#[tokio::test]
async fn test_transient_prover_retried() {
    let handshake = Handshake::new(MockResolver::new(Mode::Lookup), FlakyProver::new(2), CONTRACT)
        .with_retries(2);
    let outcome = handshake.lookup("raffy.chonk.eth", description()).await.unwrap();
    assert_eq!(
        outcome,
        LookupOutcome::Answered(RecordValue::Text("Raffy dot Chonk".into()))
    );

    let handshake = Handshake::new(MockResolver::new(Mode::Lookup), FlakyProver::new(2), CONTRACT)
        .with_retries(1);
    let err = handshake.lookup("raffy.chonk.eth", description()).await.unwrap_err();
    assert!(matches!(err, ClientError::ProverTransient(_)));
}

#[tokio::test]
async fn test_state_transitions() {
    let contract = MockResolver::new(Mode::Lookup);
    let prover = LocalProver::new(create_test_state());

    let awaiting = AwaitingRevert::new(CONTRACT, "raffy.chonk.eth", description()).unwrap();
    assert_eq!(&awaiting.call_data()[..4], &resolveCall::SELECTOR);

    let evaluating = awaiting.trigger(&contract).await.unwrap();
    let lookup = evaluating.lookup().clone();
    assert_eq!(lookup.sender, CONTRACT);
    assert_eq!(lookup.target, REGISTRY);
    assert_eq!(lookup.callback, FixedBytes::from(resolveCallbackCall::SELECTOR));

    let answered = evaluating.complete(&prover, &contract, 0).await.unwrap();
    assert_eq!(answered.lookup(), &lookup);
    assert_eq!(answered.state().exit_code(), 0);
    assert_eq!(
        answered.outcome(),
        &LookupOutcome::Answered(RecordValue::Text("Raffy dot Chonk".into()))
    );
}
