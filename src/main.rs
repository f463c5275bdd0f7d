use async_trait::async_trait;
use ipscope::cli::{Cli, Commands, ConfigAction};
use ipscope::config::{expand_tilde, Config};
use ipscope::enrich::{self, EnrichEvent, Enricher, EventSink};
use ipscope::error::{IpScopeError, Result};
use ipscope::lookup::ShodanClient;
use ipscope::server::{sse_payload, Server};
use ipscope::storage::{Database, HostRecord};
use std::path::PathBuf;
use std::sync::Arc;

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    match cli.command {
        Commands::Serve { bind } => {
            cmd_serve(cli.config, bind)?;
        }
        Commands::Enrich {
            ips,
            file,
            api_key,
            json,
        } => {
            cmd_enrich(cli.config, ips, file, api_key, json)?;
        }
        Commands::List { json } => {
            cmd_list(cli.config, json)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "ipscope=debug" } else { "ipscope=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt().with_env_filter(filter).with_target(false).init();
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| IpScopeError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })
}

fn cmd_serve(config_path: Option<PathBuf>, bind: Option<String>) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(bind) = bind {
        config.server.bind = bind;
    }

    tracing::info!("Starting ipscope server...");
    let server = Server::new(config)?;
    runtime()?.block_on(server.run())
}

fn cmd_enrich(
    config_path: Option<PathBuf>,
    ips: Vec<String>,
    file: Option<PathBuf>,
    api_key: Option<String>,
    json: bool,
) -> Result<()> {
    let config = load_config(config_path)?;

    let mut tokens: Vec<String> = ips
        .iter()
        .flat_map(|arg| enrich::split_whitespace(arg))
        .collect();
    if let Some(path) = file {
        let content = std::fs::read_to_string(&path).map_err(|e| IpScopeError::Io {
            source: e,
            context: format!("Failed to read address file: {:?}", path),
        })?;
        tokens.extend(enrich::split_lines(&content));
    }

    let credential = api_key.or_else(|| config.lookup.default_api_key());
    let database = Arc::new(open_database(&config)?);
    let lookup = Arc::new(ShodanClient::new(config.lookup.base_url.clone())?);
    let enricher = Enricher::new(database, lookup);

    runtime()?.block_on(async {
        let request = enricher.prepare(credential.as_deref(), tokens).await?;
        let mut sink = TerminalSink { json };
        enricher.run(request, &mut sink).await
    })
}

fn cmd_list(config_path: Option<PathBuf>, json: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let database = open_database(&config)?;
    let hosts = database.session()?.list_all()?;

    if json {
        let out = serde_json::to_string_pretty(&hosts).map_err(|e| IpScopeError::Json {
            source: e,
            context: "Failed to serialize records".to_string(),
        })?;
        println!("{}", out);
        return Ok(());
    }

    if hosts.is_empty() {
        println!("No records stored");
        return Ok(());
    }

    for host in &hosts {
        print_host(host);
    }
    println!("\n{} record(s)", hosts.len());
    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path)?;
            let out = toml::to_string_pretty(&config)?;
            println!("{}", out);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| IpScopeError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'ipscope config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        return Ok(config);
    }

    Config::load(&path)
}

fn open_database(config: &Config) -> Result<Database> {
    Database::with_pool_size(
        &expand_tilde(&config.storage.database_path),
        config.storage.pool_size,
    )
}

fn print_host(host: &HostRecord) {
    let ports = host
        .ports
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ");

    println!("[{}] {}", host.id, host.ip_address);
    println!("    Org: {} | ISP: {} | ASN: {}", host.org, host.isp, host.asn);
    println!("    Location: {}, {}", host.city, host.country);
    if !host.hostname.is_empty() {
        println!("    Hostnames: {}", host.hostname);
    }
    println!("    Ports: {}", if ports.is_empty() { "-" } else { ports.as_str() });
    if !host.vulns.is_empty() {
        println!("    Vulns: {}", host.vulns.join(", "));
    }
}

/// Prints pipeline events to stdout as they arrive
struct TerminalSink {
    json: bool,
}

#[async_trait]
impl EventSink for TerminalSink {
    async fn emit(&mut self, event: EnrichEvent) -> Result<()> {
        if self.json {
            let mut payload = sse_payload(&event)?;
            if let Some(fields) = payload.as_object_mut() {
                fields.insert("event".to_string(), event.name().into());
            }
            println!("{}", payload);
            return Ok(());
        }

        match &event {
            EnrichEvent::Processing { ip } => println!("→ {}", ip),
            EnrichEvent::Error { error, .. } => println!("  ✗ {}", error),
            EnrichEvent::Enriched { record } => {
                println!("  ✓ stored as record {}", record.id);
                print_host(record);
            }
            EnrichEvent::Complete { enriched, failed } => {
                println!("\nDone: {} enriched, {} failed", enriched, failed)
            }
        }
        Ok(())
    }
}
