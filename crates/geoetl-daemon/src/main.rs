use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod serve;

#[derive(Parser)]
#[command(name = "geoetl-daemon", about = "Scheduled geo-validation ETL daemon")]
struct Cli {
    /// Path to geoetl.toml (falls back to GEOETL_CONFIG, then ~/.geoetl/geoetl.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Start the scheduler and run until Ctrl-C
    Serve,
    /// Print the SQL a pipeline config compiles to
    Compile {
        /// JSON pipeline document
        #[arg(long = "pipeline")]
        pipeline: PathBuf,
        /// Provider name: postgresql, postgres or mysql
        #[arg(long, default_value = "postgresql")]
        dialect: String,
    },
    /// Seal a secret with the configured AES key and print the hex ciphertext
    EncryptSecret { plaintext: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "geoetl_daemon=info,geoetl_scheduler=info,geoetl_pipeline=info,geoetl_sync=info"
                    .into()
            }),
        )
        .init();

    let cli = Cli::parse();
    // explicit flag > GEOETL_CONFIG env > ~/.geoetl/geoetl.toml
    let config_path = cli.config.or_else(|| std::env::var("GEOETL_CONFIG").ok());

    match cli.command {
        Cmd::Serve => {
            let config = geoetl_core::GeoEtlConfig::load(config_path.as_deref())?;
            serve::run(config).await
        }
        Cmd::Compile { pipeline, dialect } => {
            let raw = std::fs::read_to_string(&pipeline)?;
            let document: serde_json::Value = serde_json::from_str(&raw)?;
            let dialect = geoetl_pipeline::Dialect::from_provider(&dialect)?;
            let sql = geoetl_pipeline::compile_document(&document, dialect)?;
            println!("{sql}");
            Ok(())
        }
        Cmd::EncryptSecret { plaintext } => {
            let config = geoetl_core::GeoEtlConfig::load(config_path.as_deref())?;
            let sealed = geoetl_core::crypto::encrypt(&plaintext, &config.security.aes_key)?;
            println!("{sealed}");
            Ok(())
        }
    }
}
