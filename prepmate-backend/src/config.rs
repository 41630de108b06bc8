use std::env;

/// Environment variable names - single source of truth
pub mod env_vars {
    pub const PORT: &str = "PORT";
    pub const DATABASE_URL: &str = "DATABASE_URL";
    pub const SOLANA_RPC_URL: &str = "SOLANA_RPC_URL";
    pub const SOLANA_NETWORK: &str = "SOLANA_NETWORK";
    pub const INDEXER_API_URL: &str = "INDEXER_API_URL";
    pub const INDEXER_API_KEY: &str = "INDEXER_API_KEY";
    pub const PAYMENT_WALLET_ADDRESS: &str = "PAYMENT_WALLET_ADDRESS";
    pub const USDC_MINT: &str = "USDC_MINT";
}

/// Default values
pub mod defaults {
    pub const PORT: u16 = 8080;
    pub const DATABASE_URL: &str = "./.db/prepmate.db";
    pub const SOLANA_RPC_URL: &str = "https://api.mainnet-beta.solana.com";
    pub const SOLANA_NETWORK: &str = "solana";
    pub const INDEXER_API_URL: &str = "https://pro-api.solscan.io/v2.0";
    /// USDC mint on Solana mainnet
    pub const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
}

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// Primary RPC endpoint for signature confirmation. Empty string means
    /// the verifier runs uninitialized and settlement relies on the
    /// trust-fallback path.
    pub solana_rpc_url: String,
    pub solana_network: String,
    /// Independent block-explorer API used to corroborate transfers.
    pub indexer_api_url: String,
    pub indexer_api_key: Option<String>,
    /// Wallet that receives credit top-up payments.
    pub payment_wallet_address: Option<String>,
    pub usdc_mint: String,
}

impl Config {
    pub fn from_env() -> Self {
        let payment_wallet_address = env::var(env_vars::PAYMENT_WALLET_ADDRESS).ok();
        if payment_wallet_address.is_none() {
            log::warn!(
                "[config] {} not set - payment challenges cannot be issued",
                env_vars::PAYMENT_WALLET_ADDRESS
            );
        }

        Self {
            port: env::var(env_vars::PORT)
                .unwrap_or_else(|_| defaults::PORT.to_string())
                .parse()
                .expect("PORT must be a valid number"),
            database_url: env::var(env_vars::DATABASE_URL)
                .unwrap_or_else(|_| defaults::DATABASE_URL.to_string()),
            solana_rpc_url: env::var(env_vars::SOLANA_RPC_URL)
                .unwrap_or_else(|_| defaults::SOLANA_RPC_URL.to_string()),
            solana_network: env::var(env_vars::SOLANA_NETWORK)
                .unwrap_or_else(|_| defaults::SOLANA_NETWORK.to_string()),
            indexer_api_url: env::var(env_vars::INDEXER_API_URL)
                .unwrap_or_else(|_| defaults::INDEXER_API_URL.to_string()),
            indexer_api_key: env::var(env_vars::INDEXER_API_KEY).ok(),
            payment_wallet_address,
            usdc_mint: env::var(env_vars::USDC_MINT)
                .unwrap_or_else(|_| defaults::USDC_MINT.to_string()),
        }
    }
}
