//! Wiring & DI. Entry point: bootstrap adapters, inject into services, run UI.
//! No business logic here.

use creditops::adapters::crypto::FernetCipher;
use creditops::adapters::persistence::SqliteRepo;
use creditops::adapters::probe::HttpCredentialProbe;
use creditops::adapters::ui::tui::TuiInputPort;
use creditops::ports::{CredentialCipher, CredentialProbe, InputPort};
use creditops::shared::config::AppConfig;
use creditops::usecases::{ReferralPolicy, Services};
use dotenv::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let env_loaded = dotenv();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match &env_loaded {
        Ok(path) => info!(path = %path.display(), "loaded .env"),
        Err(_) => info!(cwd = %cwd.display(), "no .env found (check CWD)"),
    }

    creditops::adapters::ui::init_ui();

    let cfg = AppConfig::load().map_err(|e| anyhow::anyhow!("{}", e))?;

    let data_path = PathBuf::from(cfg.data_dir_or_default());
    let repo = Arc::new(
        SqliteRepo::connect(&data_path)
            .await
            .map_err(|e| anyhow::anyhow!("SQLite connect failed: {}", e))?,
    );
    info!(path = %repo.db_path().display(), "database ready");

    let cipher = FernetCipher::from_config_key(cfg.oauth_encryption_key())
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    if cipher.is_ephemeral() {
        warn!("OAuth credentials written this session will not survive a restart");
    }
    let cipher: Arc<dyn CredentialCipher> = Arc::new(cipher);

    let probe_timeout = cfg.probe_timeout_secs_or_default();
    let probe: Arc<dyn CredentialProbe> = Arc::new(
        HttpCredentialProbe::new(Duration::from_secs(probe_timeout))
            .map_err(|e| anyhow::anyhow!("{}", e))?,
    );

    let policy = ReferralPolicy {
        base_url: cfg.referral_base_url_or_default(),
        reward_credits: cfg.referral_reward_credits_or_default(),
        trigger: cfg
            .referral_trigger_or_default()
            .map_err(|e| anyhow::anyhow!("{}", e))?,
    };
    info!(
        trigger = %policy.trigger,
        reward = policy.reward_credits,
        "referral policy"
    );

    let services = Services::wire(Arc::clone(&repo), cipher, probe, policy);

    let seeded = services
        .oauth
        .seed_default_platforms()
        .await
        .map_err(|e| anyhow::anyhow!("seed platforms: {}", e))?;
    if seeded > 0 {
        info!(seeded, "registered built-in OAuth platforms");
    }

    let input_port: Arc<dyn InputPort> = Arc::new(TuiInputPort::new(
        services,
        cfg.admin_user_id_or_default(),
        data_path.join("exports"),
        cfg.page_size_or_default(),
    ));

    input_port
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    Ok(())
}
