use std::path::PathBuf;
use std::sync::Arc;

use swap_engine::{AccountService, SettlementTracker, TradeService};
use swapd_lib::publisher::LogPublisher;
use swapd_lib::store::JsonStore;
use swapd_lib::wallet::{spawn_poller, LwkWallet, PollerConfig};
use swapd_lib::{Config, Error, Result};

fn main() {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = match Config::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("swapd: {e}");
            std::process::exit(1);
        }
    };

    env_logger::Builder::new()
        .filter_level(config.log_filter())
        .parse_default_env()
        .init();

    if let Err(e) = run(config) {
        log::error!("swapd: {e}");
        std::process::exit(1);
    }
}

fn run(config: Config) -> Result<()> {
    log::info!("swapd: starting on {}", config.network.as_str());
    log::debug!("swapd: {config:?}");

    let store = Arc::new(JsonStore::open(&config.network_dir())?);
    let wallet = Arc::new(LwkWallet::open(&config)?);

    let fee = wallet
        .create_account(&config.fee_account)
        .map_err(|e| Error::Wallet(e.to_string()))?;
    log::info!("swapd: fee account {} at index {}", fee.name, fee.index);
    for market in store.markets()? {
        wallet
            .create_account(&market.account_name)
            .map_err(|e| Error::Wallet(e.to_string()))?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let tracker = Arc::new(SettlementTracker::new(
            store.clone(),
            wallet.clone(),
            Arc::new(LogPublisher),
        ));
        let report = tracker.reconcile(chrono::Utc::now().timestamp())?;
        log::info!(
            "swapd: reconciled trades, {} expired, {} watched",
            report.expired,
            report.rewatched
        );
        let (tx_listener, utxo_listener) = tracker.start()?;

        let poller = spawn_poller(wallet.clone(), PollerConfig::new(config.poll_interval()))?;

        // Kept alive until shutdown for the transport adapter to drive;
        // no RPC surface is served yet.
        let service = TradeService::new(
            config.trade_config(),
            wallet.clone(),
            store.clone(),
            store.clone(),
            tracker,
        );
        log::info!("swapd: ready, fees paid from {}", service.config().fee_account);

        tokio::signal::ctrl_c().await?;
        log::info!("swapd: shutting down");
        drop(service);
        poller.shutdown();
        tx_listener.abort();
        utxo_listener.abort();
        Ok::<(), Error>(())
    })
}
