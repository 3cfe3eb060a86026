use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arbiter::config::{AppConfig, SideChainConfig};
use arbiter::main_watch::{MainChainBlock, MainChainRpc, MainChainWatcher, WatchError, WatchProgress};
use arbiter::rpc::{parse_amount, BlockInfo, InputInfo, OutputInfo, RpcError, SideChainRpc, TransactionInfo};
use arbiter::spv::{SpvHeader, SpvService};
use arbiter::submission::{Notification, SubmissionPipeline, SubmitError};
use arbiter::sync_loop::{ChainSyncer, SyncError, SyncProgress};
use async_trait::async_trait;
use auxpow::crypto::sha256d;
use auxpow::transaction::tx_type;
use auxpow::{
    compute_root, AuxPow, Decodable, Encodable, Hash256, MainBlockHeader, PartialMerkleProof, SideAuxPow,
    SideMiningPayload, Transaction,
};
use store::{MainChainStore, ShutdownCoordinator, SideChainStore};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

const DESTROY: &str = "SideChainDestroyAddress";
const GENESIS_ADDR: &str = "XGenesisAddressA";

// ---------------- Mocks ---------------- //

#[derive(Default)]
struct MockChain {
    blocks: Vec<BlockInfo>,
    fail_at: Option<u32>,
    reject: bool,
    submitted: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl SideChainRpc for MockChain {
    async fn get_current_height(&self) -> Result<u32, RpcError> {
        Ok(self.blocks.len() as u32)
    }

    async fn get_block_by_height(&self, height: u32) -> Result<BlockInfo, RpcError> {
        if self.fail_at == Some(height) {
            return Err(RpcError::Transport("connection refused".into()));
        }
        self.blocks
            .get(height as usize)
            .cloned()
            .ok_or_else(|| RpcError::Remote { code: -1, message: "unknown block".into() })
    }

    async fn submit_aux_block(&self, block_hash: &str, side_aux_pow: &str) -> Result<(), RpcError> {
        if self.reject {
            return Err(RpcError::Rejected(block_hash.to_string()));
        }
        self.submitted
            .lock()
            .await
            .push((block_hash.to_string(), side_aux_pow.to_string()));
        Ok(())
    }
}

struct MockSpv {
    headers: HashMap<Hash256, SpvHeader>,
}

#[async_trait]
impl SpvService for MockSpv {
    async fn get_header(&self, block_hash: &Hash256) -> Result<SpvHeader, RpcError> {
        self.headers
            .get(block_hash)
            .cloned()
            .ok_or_else(|| RpcError::Remote { code: -2, message: "unknown header".into() })
    }
}

struct MockMain {
    blocks: Vec<MainChainBlock>,
}

#[async_trait]
impl MainChainRpc for MockMain {
    async fn get_block_count(&self) -> Result<u32, RpcError> {
        Ok(self.blocks.len() as u32)
    }

    async fn get_block_at(&self, height: u32) -> Result<MainChainBlock, RpcError> {
        self.blocks
            .get(height as usize)
            .cloned()
            .ok_or_else(|| RpcError::Remote { code: -1, message: "unknown block".into() })
    }
}

// ---------------- Helpers ---------------- //

fn chain_config(name: &str, genesis_address: &str) -> SideChainConfig {
    SideChainConfig {
        name: name.to_string(),
        genesis_block_address: genesis_address.to_string(),
        genesis_block_hash: sha256d(name.as_bytes()),
        rpc_url: "http://127.0.0.1:20336".to_string(),
        monitored_addresses: vec![DESTROY.to_string()],
    }
}

fn output(n: u16, address: &str, value: &str, outputlock: u32) -> OutputInfo {
    OutputInfo {
        value: value.to_string(),
        n,
        address: address.to_string(),
        outputlock,
    }
}

fn tx_info(txid: &str, tx_type: u8, vin: Vec<InputInfo>, vout: Vec<OutputInfo>) -> TransactionInfo {
    TransactionInfo {
        txid: txid.to_string(),
        tx_type,
        vin,
        vout,
    }
}

fn block(height: u32, tx: Vec<TransactionInfo>) -> BlockInfo {
    BlockInfo {
        hash: format!("block{height}"),
        height,
        tx,
    }
}

fn spend(txid: &str, vout: u16) -> InputInfo {
    InputInfo {
        txid: txid.to_string(),
        vout,
        sequence: u32::MAX,
    }
}

async fn side_store() -> (ShutdownCoordinator, SideChainStore) {
    let shutdown = ShutdownCoordinator::new();
    let store = SideChainStore::open_in_memory(&shutdown).await.unwrap();
    (shutdown, store)
}

fn side_mining_tx(genesis: Hash256, side_block: Hash256, nonce: u8) -> Transaction {
    Transaction {
        tx_type: tx_type::SIDE_CHAIN_POW,
        payload_version: 0,
        payload: SideMiningPayload {
            side_block_hash: side_block,
            side_genesis_hash: genesis,
            block_height: 10,
            signed_data: vec![nonce; 64],
        }
        .encode(),
        attributes: vec![],
        inputs: vec![],
        outputs: vec![],
        lock_time: 0,
        programs: vec![],
    }
}

fn transfer_tx(nonce: u8) -> Transaction {
    Transaction {
        tx_type: tx_type::TRANSFER_ASSET,
        payload_version: 0,
        payload: vec![],
        attributes: vec![],
        inputs: vec![],
        outputs: vec![],
        lock_time: nonce as u32,
        programs: vec![],
    }
}

struct MainBlock {
    header: MainBlockHeader,
    txs: Vec<Transaction>,
}

impl MainBlock {
    fn new(txs: Vec<Transaction>) -> Self {
        let hashes: Vec<Hash256> = txs.iter().map(Transaction::hash).collect();
        let header = MainBlockHeader {
            version: 0,
            previous: sha256d(b"previous"),
            transactions_root: compute_root(&hashes).unwrap(),
            timestamp: 1_600_000_000,
            bits: 0x1d03_ffff,
            nonce: 42,
            height: 500,
            aux_pow: AuxPow::default(),
        };
        Self { header, txs }
    }

    fn at(height: u32, txs: Vec<Transaction>) -> Self {
        let mut block = Self::new(txs);
        block.header.height = height;
        block
    }

    fn chain_block(&self) -> MainChainBlock {
        MainChainBlock {
            header: self.header.clone(),
            transactions: self.txs.clone(),
        }
    }

    fn proof_for(&self, index: usize) -> PartialMerkleProof {
        let hashes: Vec<Hash256> = self.txs.iter().map(Transaction::hash).collect();
        let matches: Vec<bool> = (0..hashes.len()).map(|i| i == index).collect();
        PartialMerkleProof::build(self.header.hash(), self.header.height, &hashes, &matches).unwrap()
    }

    fn spv(&self) -> Arc<MockSpv> {
        let mut headers = HashMap::new();
        headers.insert(self.header.hash(), SpvHeader::from(&self.header));
        Arc::new(MockSpv { headers })
    }
}

// ---------------- Chain sync ---------------- //

#[tokio::test]
async fn test_two_block_sync_spends_tracked_output() {
    let (_shutdown, store) = side_store().await;
    let rpc = Arc::new(MockChain {
        blocks: vec![
            block(0, vec![tx_info("aa", tx_type::TRANSFER_ASSET, vec![], vec![output(0, DESTROY, "5", 0)])]),
            block(1, vec![tx_info("bb", tx_type::TRANSFER_ASSET, vec![spend("aa", 0)], vec![])]),
        ],
        ..Default::default()
    });
    let syncer = ChainSyncer::new(&chain_config("did", GENESIS_ADDR), rpc, store.clone(), 100);

    let progress = syncer.sync_once(&CancellationToken::new()).await.unwrap();
    assert_eq!(progress, SyncProgress::CaughtUp { from: 0, to: 2 });
    assert!(store.get_address_utxos_from_genesis_block_address(GENESIS_ADDR).await.unwrap().is_empty());
    assert_eq!(store.current_side_height(GENESIS_ADDR, 0).await.unwrap(), 2);

    assert_eq!(syncer.sync_once(&CancellationToken::new()).await.unwrap(), SyncProgress::Idle { height: 2 });
}

#[tokio::test]
async fn test_coinbase_outputs_get_maturity_sequence() {
    let (_shutdown, store) = side_store().await;
    let rpc = Arc::new(MockChain {
        blocks: vec![
            block(0, vec![]),
            block(
                1,
                vec![
                    tx_info("cb", tx_type::COIN_BASE, vec![], vec![output(0, DESTROY, "1.5", 0)]),
                    tx_info(
                        "tx",
                        tx_type::TRANSFER_CROSS_CHAIN_ASSET,
                        vec![],
                        vec![output(0, "someone-else", "3", 0), output(1, DESTROY, "0.00000001", 77)],
                    ),
                ],
            ),
        ],
        ..Default::default()
    });
    let syncer = ChainSyncer::new(&chain_config("did", GENESIS_ADDR), rpc, store.clone(), 100);
    syncer.sync_once(&CancellationToken::new()).await.unwrap();

    let utxos = store.get_address_utxos_from_destroy_address(DESTROY).await.unwrap();
    assert_eq!(utxos.len(), 2);

    let coinbase = utxos.iter().find(|u| u.input.tx_id == "cb").unwrap();
    assert_eq!(coinbase.input.sequence, 101);
    assert_eq!(coinbase.amount, 150_000_000);

    let transfer = utxos.iter().find(|u| u.input.tx_id == "tx").unwrap();
    assert_eq!(transfer.input.index, 1);
    assert_eq!(transfer.input.sequence, 77);
    assert_eq!(transfer.amount, 1);
    assert_eq!(transfer.genesis_block_address, GENESIS_ADDR);
}

#[tokio::test]
async fn test_fetch_failure_keeps_cursor_at_failed_block() {
    let (_shutdown, store) = side_store().await;
    let blocks = vec![
        block(0, vec![tx_info("aa", tx_type::TRANSFER_ASSET, vec![], vec![output(0, DESTROY, "5", 0)])]),
        block(1, vec![]),
        block(2, vec![]),
    ];
    let failing = Arc::new(MockChain {
        blocks: blocks.clone(),
        fail_at: Some(1),
        ..Default::default()
    });
    let syncer = ChainSyncer::new(&chain_config("did", GENESIS_ADDR), failing, store.clone(), 100);

    assert!(matches!(syncer.sync_once(&CancellationToken::new()).await, Err(SyncError::Rpc(_))));
    assert_eq!(store.current_side_height(GENESIS_ADDR, 0).await.unwrap(), 1);
    assert_eq!(store.get_address_utxos_from_genesis_block_address(GENESIS_ADDR).await.unwrap().len(), 1);

    // replaying from the cursor once the node recovers
    let healthy = Arc::new(MockChain { blocks, ..Default::default() });
    let syncer = ChainSyncer::new(&chain_config("did", GENESIS_ADDR), healthy, store.clone(), 100);
    assert_eq!(syncer.sync_once(&CancellationToken::new()).await.unwrap(), SyncProgress::CaughtUp { from: 1, to: 3 });
}

#[tokio::test]
async fn test_mismatched_block_height_is_rejected() {
    let (_shutdown, store) = side_store().await;
    let rpc = Arc::new(MockChain {
        blocks: vec![block(7, vec![])],
        ..Default::default()
    });
    let syncer = ChainSyncer::new(&chain_config("did", GENESIS_ADDR), rpc, store.clone(), 100);
    assert!(matches!(
        syncer.sync_once(&CancellationToken::new()).await,
        Err(SyncError::UnexpectedHeight { expected: 0, found: 7 })
    ));
    assert_eq!(store.current_side_height(GENESIS_ADDR, 0).await.unwrap(), 0);
}

#[tokio::test]
async fn test_failing_chain_does_not_stall_others() {
    let (shutdown, store) = side_store().await;
    let broken = Arc::new(MockChain {
        blocks: vec![block(0, vec![]), block(1, vec![])],
        fail_at: Some(0),
        ..Default::default()
    });
    let healthy = Arc::new(MockChain {
        blocks: vec![block(0, vec![]), block(1, vec![])],
        ..Default::default()
    });

    let cancel = CancellationToken::new();
    let a = ChainSyncer::new(&chain_config("broken", "XBroken"), broken, store.clone(), 100);
    let b = ChainSyncer::new(&chain_config("healthy", "XHealthy"), healthy, store.clone(), 100);
    let ta = tokio::spawn(a.run(Duration::from_millis(10), cancel.clone()));
    let tb = tokio::spawn(b.run(Duration::from_millis(10), cancel.clone()));

    let mut synced = false;
    for _ in 0..200 {
        if store.current_side_height("XHealthy", 0).await.unwrap() == 2 {
            synced = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cancel.cancel();
    ta.await.unwrap();
    tb.await.unwrap();

    assert!(synced);
    assert_eq!(store.current_side_height("XBroken", 0).await.unwrap(), 0);
    shutdown.shutdown().await;
}

/// Node far ahead of the cursor that serves empty blocks slowly.
struct SlowChain {
    height: u32,
    delay: Duration,
}

#[async_trait]
impl SideChainRpc for SlowChain {
    async fn get_current_height(&self) -> Result<u32, RpcError> {
        Ok(self.height)
    }

    async fn get_block_by_height(&self, height: u32) -> Result<BlockInfo, RpcError> {
        tokio::time::sleep(self.delay).await;
        Ok(block(height, vec![]))
    }

    async fn submit_aux_block(&self, _block_hash: &str, _side_aux_pow: &str) -> Result<(), RpcError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_cancel_interrupts_long_catch_up() {
    let (shutdown, store) = side_store().await;
    let rpc = Arc::new(SlowChain {
        height: 1_000_000,
        delay: Duration::from_millis(5),
    });
    let syncer = ChainSyncer::new(&chain_config("did", GENESIS_ADDR), rpc, store.clone(), 100);

    let cancel = CancellationToken::new();
    let task = tokio::spawn(syncer.run(Duration::from_secs(60), cancel.clone()));
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();

    tokio::time::timeout(Duration::from_secs(3), task)
        .await
        .expect("sync loop ignored cancellation")
        .unwrap();
    let cursor = store.current_side_height(GENESIS_ADDR, 0).await.unwrap();
    assert!(cursor > 0 && cursor < 1_000_000, "cursor at {cursor}");
    shutdown.shutdown().await;
}

#[tokio::test]
async fn test_cancelled_token_stops_before_first_block() {
    let (_shutdown, store) = side_store().await;
    let rpc = Arc::new(MockChain {
        blocks: vec![block(0, vec![]), block(1, vec![])],
        ..Default::default()
    });
    let syncer = ChainSyncer::new(&chain_config("did", GENESIS_ADDR), rpc, store.clone(), 100);

    let cancel = CancellationToken::new();
    cancel.cancel();
    assert_eq!(
        syncer.sync_once(&cancel).await.unwrap(),
        SyncProgress::Interrupted { from: 0, to: 0 }
    );
    assert_eq!(store.current_side_height(GENESIS_ADDR, 0).await.unwrap(), 0);
}

#[tokio::test]
async fn test_unparseable_amount_is_skipped() {
    let (_shutdown, store) = side_store().await;
    let rpc = Arc::new(MockChain {
        blocks: vec![
            block(
                0,
                vec![tx_info(
                    "aa",
                    tx_type::TRANSFER_ASSET,
                    vec![],
                    vec![output(0, DESTROY, "1e8", 0), output(1, DESTROY, "2", 0)],
                )],
            ),
            block(1, vec![]),
        ],
        ..Default::default()
    });
    let syncer = ChainSyncer::new(&chain_config("did", GENESIS_ADDR), rpc, store.clone(), 100);

    assert_eq!(
        syncer.sync_once(&CancellationToken::new()).await.unwrap(),
        SyncProgress::CaughtUp { from: 0, to: 2 }
    );
    let utxos = store.get_address_utxos_from_genesis_block_address(GENESIS_ADDR).await.unwrap();
    assert_eq!(utxos.len(), 1);
    assert_eq!(utxos[0].input.index, 1);
    assert_eq!(utxos[0].amount, 200_000_000);
}

#[tokio::test]
async fn test_block_spending_several_outputs() {
    let (_shutdown, store) = side_store().await;
    let rpc = Arc::new(MockChain {
        blocks: vec![
            block(
                0,
                vec![tx_info(
                    "aa",
                    tx_type::TRANSFER_ASSET,
                    vec![],
                    vec![output(0, DESTROY, "1", 0), output(1, DESTROY, "2", 0), output(2, DESTROY, "3", 0)],
                )],
            ),
            block(
                1,
                vec![
                    tx_info("bb", tx_type::TRANSFER_ASSET, vec![spend("aa", 0), spend("zz", 4)], vec![]),
                    tx_info("cc", tx_type::TRANSFER_ASSET, vec![spend("aa", 2)], vec![]),
                ],
            ),
        ],
        ..Default::default()
    });
    let syncer = ChainSyncer::new(&chain_config("did", GENESIS_ADDR), rpc, store.clone(), 100);
    syncer.sync_once(&CancellationToken::new()).await.unwrap();

    let utxos = store.get_address_utxos_from_genesis_block_address(GENESIS_ADDR).await.unwrap();
    assert_eq!(utxos.len(), 1);
    assert_eq!(utxos[0].input.index, 1);
}

#[test]
fn test_parse_amount() {
    assert_eq!(parse_amount("5").unwrap(), 500_000_000);
    assert_eq!(parse_amount("5.00000000").unwrap(), 500_000_000);
    assert_eq!(parse_amount("0.1").unwrap(), 10_000_000);
    assert_eq!(parse_amount("0.00000001").unwrap(), 1);
    for bad in ["", ".5", "1.000000001", "-1", "1e8", "1.2.3", "abc", "99999999999999"] {
        assert!(parse_amount(bad).is_err(), "{bad:?} accepted");
    }
}

#[tokio::test]
async fn test_join_tasks_counts_panicked_tasks() {
    let tasks = vec![
        tokio::spawn(async {}),
        tokio::spawn(async { panic!("sync loop blew up") }),
        tokio::spawn(async {}),
    ];
    assert_eq!(arbiter::join_tasks(tasks).await, 1);
}

// ---------------- Config ---------------- //

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    move |key| map.get(key).cloned()
}

const SIDE_CHAINS: &str = r#"[{
    "name": "did",
    "genesis_block_address": "XGenesisAddressA",
    "genesis_block_hash": "56be936978c261b2e649d58dbfaf3f23d4a868274f5522cd2adb4308a955c4a3",
    "rpc_url": "http://127.0.0.1:20606",
    "monitored_addresses": ["SideChainDestroyAddress"]
}]"#;

#[test]
fn test_config_defaults() {
    let cfg = AppConfig::from_lookup(lookup(&[("ARBITER_SIDE_CHAINS", SIDE_CHAINS)])).unwrap();
    assert_eq!(cfg.data_dir, std::path::PathBuf::from("./data"));
    assert_eq!(cfg.sync_interval, Duration::from_millis(1000));
    assert_eq!(cfg.rpc_timeout, Duration::from_secs(10));
    assert_eq!(cfg.coinbase_maturity, 100);
    assert!(cfg.main_rpc_url.is_none());
    assert_eq!(cfg.side_chains.len(), 1);
    assert_eq!(
        cfg.side_chains[0].genesis_block_hash.to_hex(),
        "56be936978c261b2e649d58dbfaf3f23d4a868274f5522cd2adb4308a955c4a3"
    );
}

#[test]
fn test_config_rejects_bad_values() {
    assert!(AppConfig::from_lookup(lookup(&[])).is_err());
    assert!(AppConfig::from_lookup(lookup(&[("ARBITER_SIDE_CHAINS", "[]")])).is_err());
    assert!(AppConfig::from_lookup(lookup(&[
        ("ARBITER_SIDE_CHAINS", SIDE_CHAINS),
        ("ARBITER_COINBASE_MATURITY", "soon"),
    ]))
    .is_err());
    assert!(AppConfig::from_lookup(lookup(&[
        ("ARBITER_SIDE_CHAINS", SIDE_CHAINS),
        ("ARBITER_MAIN_RPC_URL", "127.0.0.1:20336"),
    ]))
    .is_err());

    let duplicated = format!("[{0},{0}]", &SIDE_CHAINS[1..SIDE_CHAINS.len() - 1]);
    assert!(AppConfig::from_lookup(lookup(&[("ARBITER_SIDE_CHAINS", &duplicated)])).is_err());
}

// ---------------- Submission ---------------- //

fn pipeline_for(block: &MainBlock, genesis: Hash256, rpc: Arc<MockChain>) -> SubmissionPipeline {
    let mut side_chains: HashMap<Hash256, Arc<dyn SideChainRpc>> = HashMap::new();
    side_chains.insert(genesis, rpc);
    SubmissionPipeline::new(block.spv(), side_chains)
}

#[tokio::test]
async fn test_valid_notification_is_submitted() {
    let genesis = sha256d(b"did");
    let side_block = sha256d(b"side block 10");
    let block = MainBlock::new(vec![
        transfer_tx(0),
        transfer_tx(1),
        side_mining_tx(genesis, side_block, 2),
        transfer_tx(3),
    ]);
    let rpc = Arc::new(MockChain::default());
    let pipeline = pipeline_for(&block, genesis, rpc.clone());

    let notification = Notification {
        proof: block.proof_for(2),
        tx: block.txs[2].clone(),
    };
    let done = pipeline.process(&notification).await.unwrap();
    assert_eq!(done.side_block_hash, side_block);
    assert_eq!(done.side_aux_pow.branch.index, 2);

    let submitted = rpc.submitted.lock().await;
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].0, side_block.to_hex());

    let decoded = SideAuxPow::decode(&hex::decode(&submitted[0].1).unwrap()).unwrap();
    assert!(decoded.verify());
    assert_eq!(decoded.main_block_header, block.header);
    assert_eq!(decoded.side_aux_block_tx, block.txs[2]);
}

#[tokio::test]
async fn test_tampered_proof_is_dropped() {
    let genesis = sha256d(b"did");
    let block = MainBlock::new(vec![transfer_tx(0), side_mining_tx(genesis, sha256d(b"b"), 1), transfer_tx(2)]);
    let rpc = Arc::new(MockChain::default());
    let pipeline = pipeline_for(&block, genesis, rpc.clone());

    let mut proof = block.proof_for(1);
    proof.hashes[0].0[0] ^= 0xff;
    let err = pipeline
        .process(&Notification { proof, tx: block.txs[1].clone() })
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitError::RootMismatch { .. }), "{err}");
    assert!(err.is_verification());
    assert!(rpc.submitted.lock().await.is_empty());
}

#[tokio::test]
async fn test_transaction_outside_proof_is_dropped() {
    let genesis = sha256d(b"did");
    let block = MainBlock::new(vec![side_mining_tx(genesis, sha256d(b"b"), 0), transfer_tx(1)]);
    let rpc = Arc::new(MockChain::default());
    let pipeline = pipeline_for(&block, genesis, rpc.clone());

    let other = side_mining_tx(genesis, sha256d(b"c"), 9);
    let err = pipeline
        .process(&Notification { proof: block.proof_for(0), tx: other })
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitError::NotInProof(_)));
    assert!(rpc.submitted.lock().await.is_empty());
}

#[tokio::test]
async fn test_unknown_side_chain_and_rejection() {
    let genesis = sha256d(b"did");
    let block = MainBlock::new(vec![side_mining_tx(genesis, sha256d(b"b"), 0)]);
    let notification = Notification {
        proof: block.proof_for(0),
        tx: block.txs[0].clone(),
    };

    let elsewhere = pipeline_for(&block, sha256d(b"other chain"), Arc::new(MockChain::default()));
    assert!(matches!(
        elsewhere.process(&notification).await,
        Err(SubmitError::UnknownSideChain(g)) if g == genesis
    ));

    let rejecting = Arc::new(MockChain {
        reject: true,
        ..Default::default()
    });
    let err = pipeline_for(&block, genesis, rejecting)
        .process(&notification)
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitError::Submit(RpcError::Rejected(_))));
    assert!(!err.is_verification());
}

#[tokio::test]
async fn test_unknown_header_is_reported() {
    let genesis = sha256d(b"did");
    let block = MainBlock::new(vec![side_mining_tx(genesis, sha256d(b"b"), 0)]);
    let mut proof = block.proof_for(0);
    proof.block_hash = sha256d(b"elsewhere");

    let pipeline = pipeline_for(&block, genesis, Arc::new(MockChain::default()));
    let err = pipeline
        .process(&Notification { proof, tx: block.txs[0].clone() })
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitError::Header(_)));
}

#[tokio::test]
async fn test_listener_drains_channel() {
    let genesis = sha256d(b"did");
    let block = MainBlock::new(vec![transfer_tx(0), side_mining_tx(genesis, sha256d(b"b"), 1)]);
    let rpc = Arc::new(MockChain::default());
    let pipeline = pipeline_for(&block, genesis, rpc.clone());

    let (tx, rx) = mpsc::channel(4);
    let mut bad = block.proof_for(1);
    bad.hashes[0].0[0] ^= 1;
    tx.send(Notification { proof: bad, tx: block.txs[1].clone() }).await.unwrap();
    tx.send(Notification { proof: block.proof_for(1), tx: block.txs[1].clone() }).await.unwrap();
    drop(tx);

    pipeline.run(rx, CancellationToken::new()).await;
    assert_eq!(rpc.submitted.lock().await.len(), 1);
}

// ---------------- Main-chain watcher ---------------- //

#[tokio::test]
async fn test_main_watch_feeds_pipeline() {
    let genesis = sha256d(b"did");
    let side_block = sha256d(b"side block 10");
    let first = MainBlock::at(0, vec![transfer_tx(0)]);
    let second = MainBlock::at(
        1,
        vec![
            transfer_tx(1),
            side_mining_tx(genesis, side_block, 2),
            side_mining_tx(sha256d(b"unserved chain"), sha256d(b"x"), 3),
        ],
    );
    let rpc = Arc::new(MockMain {
        blocks: vec![first.chain_block(), second.chain_block()],
    });
    let shutdown = ShutdownCoordinator::new();
    let store = MainChainStore::open_in_memory(&shutdown).await.unwrap();
    let (tx, mut rx) = mpsc::channel(4);
    let watcher = MainChainWatcher::new(rpc, store.clone(), [genesis], tx);

    let cancel = CancellationToken::new();
    assert_eq!(
        watcher.watch_once(&cancel).await.unwrap(),
        WatchProgress::CaughtUp { from: 0, to: 2, notified: 1 }
    );
    assert_eq!(store.current_height(0).await.unwrap(), 2);

    let notification = rx.try_recv().unwrap();
    assert!(rx.try_recv().is_err());
    assert_eq!(notification.tx, second.txs[1]);
    assert_eq!(notification.proof.block_hash, second.header.hash());

    let side = Arc::new(MockChain::default());
    let done = pipeline_for(&second, genesis, side.clone())
        .process(&notification)
        .await
        .unwrap();
    assert_eq!(done.side_block_hash, side_block);
    assert_eq!(side.submitted.lock().await.len(), 1);

    assert_eq!(watcher.watch_once(&cancel).await.unwrap(), WatchProgress::Idle { height: 2 });
}

#[tokio::test]
async fn test_main_watch_holds_cursor_when_pipeline_is_gone() {
    let genesis = sha256d(b"did");
    let block = MainBlock::at(0, vec![side_mining_tx(genesis, sha256d(b"b"), 0)]);
    let rpc = Arc::new(MockMain {
        blocks: vec![block.chain_block()],
    });
    let shutdown = ShutdownCoordinator::new();
    let store = MainChainStore::open_in_memory(&shutdown).await.unwrap();
    let (tx, rx) = mpsc::channel(1);
    drop(rx);

    let watcher = MainChainWatcher::new(rpc, store.clone(), [genesis], tx);
    assert!(matches!(
        watcher.watch_once(&CancellationToken::new()).await,
        Err(WatchError::ChannelClosed)
    ));
    assert_eq!(store.current_height(0).await.unwrap(), 0);
}

#[test]
fn test_main_chain_block_decodes_header_then_transactions() {
    let genesis = sha256d(b"did");
    let block = MainBlock::at(3, vec![transfer_tx(0), side_mining_tx(genesis, sha256d(b"b"), 1)]);

    let mut raw = block.header.encode();
    raw.push(2);
    for tx in &block.txs {
        raw.extend(tx.encode());
    }
    let decoded = MainChainBlock::decode(&raw).unwrap();
    assert_eq!(decoded.header, block.header);
    assert_eq!(decoded.transactions, block.txs);

    raw.push(0);
    assert!(MainChainBlock::decode(&raw).is_err());
}

#[test]
fn test_spv_header_conversion() {
    let block = MainBlock::new(vec![transfer_tx(0)]);
    let spv = SpvHeader::from(&block.header);
    assert_eq!(MainBlockHeader::try_from(&spv).unwrap(), block.header);

    let mut broken = spv;
    broken.aux_pow.truncate(3);
    assert!(MainBlockHeader::try_from(&broken).is_err());
}
