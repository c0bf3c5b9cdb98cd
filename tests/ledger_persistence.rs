// tests/ledger_persistence.rs
//! The ledger survives a process restart when backed by a file

use ethers::types::{Address, H256, U256};
use relay_manager::config::AppConfig;
use relay_manager::ledger::TXSTORE_FILENAME;
use relay_manager::{ServerAction, SqliteTxStore, StoredTransaction, TxStore};
use tempfile::TempDir;

fn signer() -> Address {
    Address::repeat_byte(0x11)
}

fn worker() -> Address {
    Address::repeat_byte(0x22)
}

fn record(id: u8, nonce: u64, action: ServerAction) -> StoredTransaction {
    StoredTransaction {
        tx_id: H256::repeat_byte(id),
        from: signer(),
        to: Some(worker()),
        gas_limit: U256::from(21_000),
        gas_price: U256::from(1_000_000_000u64),
        data: None,
        nonce,
        server_action: action,
        attempts: 1,
        creation_block_number: 100,
        boost_block_number: None,
        mined_block_number: None,
    }
}

fn app_config(dir: &TempDir) -> AppConfig {
    AppConfig {
        url: "http://relay.test".to_string(),
        port: 0,
        workdir: dir.path().join("manager"),
        in_memory: false,
    }
}

#[tokio::test]
async fn test_records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let app = app_config(&dir);

    {
        let store = SqliteTxStore::open(&app).await.unwrap();
        store
            .put_tx(&record(1, 0, ServerAction::ValueTransfer), false)
            .await
            .unwrap();
        store
            .put_tx(&record(2, 1, ServerAction::RegisterServer), false)
            .await
            .unwrap();
    }

    assert!(app.workdir.join(TXSTORE_FILENAME).exists());

    let reopened = SqliteTxStore::open(&app).await.unwrap();
    let all = reopened.get_all_by_signer(signer()).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0], record(1, 0, ServerAction::ValueTransfer));
    assert!(reopened
        .is_action_pending(ServerAction::RegisterServer, None)
        .await
        .unwrap());
    assert!(reopened
        .is_action_pending(ServerAction::ValueTransfer, Some(worker()))
        .await
        .unwrap());

    // Nonce slots stay taken after restart
    assert!(reopened
        .put_tx(&record(3, 1, ServerAction::RelayCall), false)
        .await
        .is_err());
}

#[tokio::test]
async fn test_mined_and_pruned_state_persists() {
    let dir = TempDir::new().unwrap();
    let app = app_config(&dir);

    {
        let store = SqliteTxStore::open(&app).await.unwrap();
        for nonce in 0..3u64 {
            store
                .put_tx(&record(nonce as u8 + 1, nonce, ServerAction::ValueTransfer), false)
                .await
                .unwrap();
        }

        let mut mined = record(3, 2, ServerAction::ValueTransfer);
        mined.mined_block_number = Some(105);
        store.put_tx(&mined, true).await.unwrap();

        assert_eq!(store.remove_txs_until_nonce(signer(), 0).await.unwrap(), 1);
    }

    let reopened = SqliteTxStore::open(&app).await.unwrap();
    let nonces: Vec<u64> = reopened
        .get_all()
        .await
        .unwrap()
        .iter()
        .map(|tx| tx.nonce)
        .collect();
    assert_eq!(nonces, vec![1, 2]);

    let last = reopened.get_tx_by_nonce(signer(), 2).await.unwrap().unwrap();
    assert_eq!(last.mined_block_number, Some(105));

    reopened.clear_all().await.unwrap();
    let again = SqliteTxStore::open(&app).await.unwrap();
    assert!(again.get_all().await.unwrap().is_empty());
}
