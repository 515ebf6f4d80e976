use std::fs;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;

use repositories::{memory::MemoryEntitlementStore, postgres::PgEntitlementStore, EntitlementStore};

mod entitlement;
mod models;
mod repositories;
mod services;
mod settings;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    #[arg(long, default_value = "log4rs.yaml")]
    log4rs: String,
    /// Keep users and vouchers in memory instead of Postgres. State is lost on exit.
    #[arg(long)]
    in_memory: bool,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    dotenv::dotenv().ok();

    let args = Args::parse();
    init_logging(&args.log4rs).expect("Failed to initialize logging.");

    let settings = settings::Settings::new(&args.config).expect("Could not load config file.");
    let admin = models::users::AdminIdentity::new(settings.admin.telegram_id);

    let store: Arc<dyn EntitlementStore> = if args.in_memory {
        log::warn!("Running with the in-memory store, state will not survive a restart.");
        Arc::new(MemoryEntitlementStore::new(admin))
    } else {
        let postgres = settings.postgres.as_ref().ok_or_else(|| {
            anyhow::anyhow!("The [postgres] section is required unless --in-memory is set.")
        })?;
        let store = PgEntitlementStore::connect(&postgres.url, postgres.max_connections, admin)
            .await
            .expect("Could not connect to database.");
        Arc::new(store)
    };

    log::info!("Starting services.");
    services::start_services(store, settings).await
}

fn init_logging(path: &str) -> Result<(), anyhow::Error> {
    if !Path::new("logs").exists() {
        fs::create_dir("logs")?;
    }

    match log4rs::init_file(path, Default::default()) {
        Ok(_) => {
            println!("[*] Logging initialized successfully.");
            Ok(())
        }
        Err(e) => {
            println!("[ERROR] Failed to initialize logging: {}", e);
            Err(anyhow::anyhow!("Could not initialize logging: {}", e))
        }
    }
}
