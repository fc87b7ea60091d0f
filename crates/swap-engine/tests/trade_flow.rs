//! End-to-end negotiation and settlement tests against in-memory
//! collaborators.

use std::sync::Arc;

use swap_engine::pset::{decode_pset, encode_pset};
use swap_engine::testing::{
    InMemoryMarketRepository, InMemoryTradeRepository, InMemoryWallet, RecordingPublisher,
    base_asset, counterparty_request, native_asset, quote_asset, test_market,
};
use swap_engine::{
    BlockDetails, CompleteMessage, CompleteOutcome, Error, ProposeOutcome, SettlementTracker,
    StatusCode, SwapComplete, SwapFail, SwapFailCode, TradeConfig, TradeRepository, TradeService,
    TradeStatus, TradeType, UtxoEvent, UtxoEventKind,
};

// ── Helpers ─────────────────────────────────────────────────────────────

struct Harness {
    service: TradeService,
    tracker: Arc<SettlementTracker>,
    wallet: Arc<InMemoryWallet>,
    trades: Arc<InMemoryTradeRepository>,
    markets: Arc<InMemoryMarketRepository>,
    publisher: Arc<RecordingPublisher>,
}

fn harness() -> Harness {
    let wallet = Arc::new(InMemoryWallet::new());
    wallet.fund("market", quote_asset(), &[40_000, 30_000]);
    wallet.fund("market", base_asset(), &[5_000]);
    wallet.fund("fee_account", native_asset(), &[5_000]);

    let markets = Arc::new(InMemoryMarketRepository::new());
    markets.add_market(test_market());
    let trades = Arc::new(InMemoryTradeRepository::new());
    let publisher = Arc::new(RecordingPublisher::new());
    let tracker = Arc::new(SettlementTracker::new(
        trades.clone(),
        wallet.clone(),
        publisher.clone(),
    ));
    let service = TradeService::new(
        TradeConfig::default(),
        wallet.clone(),
        markets.clone(),
        trades.clone(),
        tracker.clone(),
    );
    Harness {
        service,
        tracker,
        wallet,
        trades,
        markets,
        publisher,
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn base_hex() -> String {
    base_asset().to_string()
}

fn quote_hex() -> String {
    quote_asset().to_string()
}

fn accept(h: &Harness, base_amount: u64, quote_amount: u64) -> swap_engine::Trade {
    let request = counterparty_request(TradeType::Sell, base_amount, quote_amount);
    match h
        .service
        .propose(&base_hex(), &quote_hex(), TradeType::Sell, request)
        .unwrap()
    {
        ProposeOutcome::Accepted { trade, .. } => trade,
        ProposeOutcome::Rejected { swap_fail, .. } => {
            panic!("proposal rejected: {}", swap_fail.failure_message)
        }
    }
}

fn completion(trade: &swap_engine::Trade) -> SwapComplete {
    let accept = trade.swap_accept.as_ref().unwrap();
    SwapComplete {
        id: uuid::Uuid::new_v4().to_string(),
        accept_id: accept.id.clone(),
        transaction: encode_pset(&decode_pset(&accept.transaction).unwrap()),
    }
}

// ── Preview ─────────────────────────────────────────────────────────────

#[test]
fn preview_quotes_market_price_with_fees() {
    let h = harness();
    let preview = h
        .service
        .preview(&base_hex(), &quote_hex(), TradeType::Sell, 1_000, &base_hex(), &quote_hex())
        .unwrap();
    assert_eq!(preview.amount, 50_000);
    assert_eq!(preview.asset, quote_hex());
    // 25 bps of 50_000 plus the fixed 100.
    assert_eq!(preview.fee_amount, 225);
}

#[test]
fn preview_on_unknown_market_is_unavailable() {
    let h = harness();
    let err = h
        .service
        .preview(&quote_hex(), &base_hex(), TradeType::Sell, 1_000, &base_hex(), &base_hex())
        .unwrap_err();
    assert!(matches!(err, Error::MarketUnavailable));
}

#[test]
fn closed_market_refuses_proposals() {
    let h = harness();
    let mut closed = test_market();
    closed.tradable = false;
    closed.quote_asset = native_asset().to_string();
    h.markets.add_market(closed);

    let request = counterparty_request(TradeType::Sell, 1_000, 50_000);
    let err = h
        .service
        .propose(&base_hex(), &native_asset().to_string(), TradeType::Sell, request)
        .unwrap_err();
    assert!(matches!(err, Error::MarketUnavailable));
}

// ── Propose ─────────────────────────────────────────────────────────────

#[test]
fn proposal_within_slippage_is_accepted() {
    let h = harness();
    let request = counterparty_request(TradeType::Sell, 1_000, 51_000);
    let outcome = h
        .service
        .propose(&base_hex(), &quote_hex(), TradeType::Sell, request.clone())
        .unwrap();
    let ProposeOutcome::Accepted { trade, swap_accept } = outcome else {
        panic!("expected an accept");
    };

    assert_eq!(trade.status, TradeStatus::ACCEPTED);
    assert_eq!(swap_accept.request_id, request.id);
    assert!((trade.expiry_time - (trade.request_time + 120)).abs() <= 1);

    let stored = h.trades.get(&trade.id).unwrap();
    assert_eq!(stored.status, TradeStatus::ACCEPTED);

    // Counterparty inputs come first; the market's follow.
    let pset = decode_pset(&swap_accept.transaction).unwrap();
    let request_pset = decode_pset(&request.transaction).unwrap();
    assert!(pset.n_inputs() > request_pset.n_inputs());
    assert_eq!(
        pset.inputs()[0].previous_txid,
        request_pset.inputs()[0].previous_txid
    );

    assert_eq!(h.tracker.dispatcher().utxo_queue().len(), 1);
    assert_eq!(h.tracker.dispatcher().tx_queue().len(), 1);
}

#[test]
fn proposal_off_price_is_rejected() {
    let h = harness();
    let request = counterparty_request(TradeType::Sell, 1_000, 60_000);
    let outcome = h
        .service
        .propose(&base_hex(), &quote_hex(), TradeType::Sell, request.clone())
        .unwrap();
    let ProposeOutcome::Rejected { trade, swap_fail } = outcome else {
        panic!("expected a rejection");
    };

    assert_eq!(swap_fail.failure_code, SwapFailCode::BadPricingSwapRequest);
    assert_eq!(swap_fail.message_id, request.id);
    assert_eq!(trade.status.code, StatusCode::Proposal);
    assert!(trade.status.failed);
    assert!(h.trades.get(&trade.id).unwrap().status.failed);
    assert!(h.tracker.dispatcher().utxo_queue().is_empty());
}

#[test]
fn malformed_proposal_is_rejected_and_stored() {
    let h = harness();
    let mut request = counterparty_request(TradeType::Sell, 1_000, 50_000);
    request.transaction = "bm90IGEgcHNldA==".into();
    let outcome = h
        .service
        .propose(&base_hex(), &quote_hex(), TradeType::Sell, request)
        .unwrap();
    let ProposeOutcome::Rejected { trade, swap_fail } = outcome else {
        panic!("expected a rejection");
    };
    assert_eq!(swap_fail.failure_code, SwapFailCode::InvalidSwapRequest);
    assert_eq!(trade.status, TradeStatus::PROPOSAL_REJECTED);
    assert!(h.trades.get(&trade.id).is_some());
}

#[test]
fn preview_beyond_market_balance_is_unavailable() {
    let h = harness();
    let mut market = test_market();
    market.account_name = "empty".into();
    market.quote_asset = native_asset().to_string();
    h.markets.add_market(market);
    let err = h
        .service
        .preview(
            &base_hex(),
            &native_asset().to_string(),
            TradeType::Sell,
            1_000,
            &base_hex(),
            &base_hex(),
        )
        .unwrap_err();
    assert!(matches!(err, Error::MarketUnavailable));
}

#[test]
fn repository_outage_surfaces_service_unavailable() {
    let h = harness();
    h.trades.set_unavailable(true);
    let request = counterparty_request(TradeType::Sell, 1_000, 50_000);
    let err = h
        .service
        .propose(&base_hex(), &quote_hex(), TradeType::Sell, request)
        .unwrap_err();
    assert!(matches!(err, Error::ServiceUnavailable(_)));
}

// ── Complete ────────────────────────────────────────────────────────────

#[test]
fn completion_broadcasts_and_completes() {
    let h = harness();
    let trade = accept(&h, 1_000, 50_000);
    let outcome = h
        .service
        .complete(CompleteMessage::Complete(completion(&trade)))
        .unwrap();
    let CompleteOutcome::Completed { trade, txid } = outcome else {
        panic!("expected completion");
    };

    assert_eq!(trade.status, TradeStatus::COMPLETED);
    assert_eq!(trade.tx_id, txid);
    assert_eq!(h.wallet.broadcasted().len(), 1);
    assert_eq!(h.wallet.broadcasted()[0].txid().to_string(), txid);
}

#[test]
fn failed_broadcast_can_be_retried() {
    let h = harness();
    let trade = accept(&h, 1_000, 50_000);
    let complete = completion(&trade);

    h.wallet.fail_broadcasts(true);
    let outcome = h
        .service
        .complete(CompleteMessage::Complete(complete.clone()))
        .unwrap();
    let CompleteOutcome::Failed { trade: failed, swap_fail } = outcome else {
        panic!("expected a failure");
    };
    assert_eq!(swap_fail.failure_code, SwapFailCode::FailedToBroadcast);
    assert_eq!(failed.status, TradeStatus::FAILED_TO_COMPLETE);

    h.wallet.fail_broadcasts(false);
    let outcome = h
        .service
        .complete(CompleteMessage::Complete(complete))
        .unwrap();
    assert!(matches!(outcome, CompleteOutcome::Completed { .. }));
}

#[test]
fn counterparty_abort_marks_trade_failed() {
    let h = harness();
    let trade = accept(&h, 1_000, 50_000);
    let accept_id = trade.swap_accept.as_ref().unwrap().id.clone();

    let fail = SwapFail::new(&accept_id, SwapFailCode::AbortedByCounterparty, "changed my mind");
    let outcome = h.service.complete(CompleteMessage::Fail(fail)).unwrap();
    let CompleteOutcome::Failed { trade, swap_fail } = outcome else {
        panic!("expected a failure");
    };
    assert_eq!(swap_fail.failure_code, SwapFailCode::AbortedByCounterparty);
    assert_eq!(trade.status, TradeStatus::FAILED_TO_COMPLETE);
}

#[test]
fn completing_unknown_accept_is_not_found() {
    let h = harness();
    let complete = SwapComplete {
        id: "c".into(),
        accept_id: "missing".into(),
        transaction: String::new(),
    };
    let err = h
        .service
        .complete(CompleteMessage::Complete(complete))
        .unwrap_err();
    assert!(matches!(err, Error::TradeNotFound(_)));
}

#[test]
fn expired_trade_refuses_completion() {
    let h = harness();
    let trade = accept(&h, 1_000, 50_000);
    h.trades
        .update_trade(&trade.id, &mut |t| {
            t.expiry_time = now() - 1;
            Ok(())
        })
        .unwrap();

    let outcome = h
        .service
        .complete(CompleteMessage::Complete(completion(&trade)))
        .unwrap();
    let CompleteOutcome::Failed { trade, swap_fail } = outcome else {
        panic!("expected a failure");
    };
    assert_eq!(swap_fail.failure_code, SwapFailCode::TradeExpired);
    assert_eq!(trade.status, TradeStatus::ACCEPTED);
    assert!(h.wallet.broadcasted().is_empty());
}

// ── Settlement ──────────────────────────────────────────────────────────

#[tokio::test]
async fn spent_event_settles_at_block_time() {
    let h = harness();
    let _listeners = h.tracker.start().unwrap();
    let trade = accept(&h, 1_000, 50_000);
    let keys = trade.accepted_outpoints().unwrap();

    let spent = UtxoEvent {
        kind: UtxoEventKind::Spent,
        account_name: "market".into(),
        utxos: vec![*keys.last().unwrap()],
        block: Some(BlockDetails {
            hash: None,
            height: 100,
            timestamp: 1_700_000_000,
        }),
    };
    h.wallet.emit_utxo_event(spent.clone());
    assert!(h.publisher.wait_for(1).await);

    let stored = h.trades.get(&trade.id).unwrap();
    assert_eq!(stored.status, TradeStatus::SETTLED);
    assert_eq!(stored.settlement_time, 1_700_000_000);

    // The watcher is gone: a repeat is a no-op.
    h.wallet.emit_utxo_event(spent);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(h.publisher.published().len(), 1);
    assert!(h.tracker.dispatcher().utxo_queue().is_empty());
}

#[test]
fn restart_expires_stale_accepted_trades() {
    let h = harness();
    let trade = accept(&h, 1_000, 50_000);
    h.trades
        .update_trade(&trade.id, &mut |t| {
            t.expiry_time = now() - 10;
            Ok(())
        })
        .unwrap();

    // A fresh tracker stands in for the restarted process.
    let tracker = SettlementTracker::new(h.trades.clone(), h.wallet.clone(), h.publisher.clone());
    let report = tracker.reconcile(now()).unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(h.trades.get(&trade.id).unwrap().status, TradeStatus::EXPIRED);
    assert!(tracker.dispatcher().utxo_queue().is_empty());
}
