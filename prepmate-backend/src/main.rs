use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use dotenv::dotenv;
use std::sync::Arc;

mod config;
mod controllers;
mod db;
mod payments;

use config::Config;
use db::Database;
use payments::{
    ChainVerifier, IndexerCrossChecker, PaymentChallengeIssuer, SettlementCoordinator,
    UsageGate,
};

pub struct AppState {
    pub db: Arc<Database>,
    pub config: Config,
    pub gate: Arc<UsageGate>,
    pub settlement: Arc<SettlementCoordinator>,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = Config::from_env();
    let port = config.port;

    log::info!("Initializing database at {}", config.database_url);
    let db = Database::new(&config.database_url).expect("Failed to initialize database");
    let db = Arc::new(db);

    log::info!(
        "Initializing chain verifier against {}",
        config.solana_rpc_url
    );
    let chain = ChainVerifier::new(&config.solana_rpc_url);
    let indexer =
        IndexerCrossChecker::new(&config.indexer_api_url, config.indexer_api_key.clone());

    let settlement = Arc::new(SettlementCoordinator::new(db.clone(), chain, indexer));

    let gate = Arc::new(UsageGate::new(
        db.clone(),
        PaymentChallengeIssuer::new(&config.solana_network),
        settlement.clone(),
        config.payment_wallet_address.clone(),
        config.usdc_mint.clone(),
    ));

    log::info!("Starting PrepMate backend on port {}", port);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(AppState {
                db: Arc::clone(&db),
                config: config.clone(),
                gate: Arc::clone(&gate),
                settlement: Arc::clone(&settlement),
            }))
            .wrap(Logger::default())
            .wrap(cors)
            .configure(controllers::health::config)
            .configure(controllers::usage::config)
            .configure(controllers::credits::config)
            .configure(controllers::payments::config)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
