use anyhow::Result;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use modbus_transport::{MockTransport, ModbusTcpTransport, TcpConfig, Word};
use poll_engine::{EngineConfig, PollingEngine, ScheduleOutcome};
use register_catalog::{self as catalog, DecodedValue, RegisterCatalog};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "regpoll",
    version,
    about = "Register polling and write tool",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Backend {
    Mock,
    Tcp,
}

#[derive(Args, Debug, Clone)]
struct LinkArgs {
    /// Transport backend
    #[arg(long, value_enum, default_value_t = Backend::Mock)]
    backend: Backend,
    /// Device host (tcp)
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    #[arg(long, default_value_t = 502)]
    port: u16,
    #[arg(long, default_value_t = 1)]
    unit_id: u8,
    /// Per-request timeout in milliseconds
    #[arg(long, default_value_t = 3000)]
    timeout_ms: u64,
}

/// Engine settings that take precedence over `--config`.
#[derive(Args, Debug, Clone, Default)]
struct EngineArgs {
    /// Seconds between poll cycles
    #[arg(long)]
    scan_interval_secs: Option<u64>,
    /// Write debounce window in milliseconds (0 writes immediately)
    #[arg(long)]
    write_debounce_ms: Option<u64>,
    /// Installed heating circuits; registers of higher circuits are skipped
    #[arg(long)]
    circuits: Option<u32>,
}

impl EngineArgs {
    fn apply(&self, mut config: EngineConfig) -> EngineConfig {
        if let Some(secs) = self.scan_interval_secs {
            config.scan_interval_secs = secs;
        }
        if let Some(ms) = self.write_debounce_ms {
            config.write_debounce_ms = ms;
        }
        if self.circuits.is_some() {
            config.circuits = self.circuits;
        }
        config
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate a catalog file or directory
    CatalogValidate {
        /// JSON or YAML catalog file
        #[arg(long)]
        file: Option<String>,
        /// Directory of catalog files
        #[arg(long)]
        dir: Option<String>,
        /// Print JSON after validation
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// List registers in a catalog
    CatalogList {
        #[arg(default_value = "configs/registers")]
        path: String,
    },
    /// Decode raw words with a register's descriptor
    Decode {
        /// Catalog file or directory
        #[arg(long)]
        catalog: String,
        /// Register id
        #[arg(long)]
        id: String,
        /// Words as hex (e.g. 0x4120 0x0000)
        #[arg(long, value_delimiter = ' ', num_args = 1..)]
        words: Vec<String>,
    },
    /// Encode a value into the words that would be written
    Encode {
        #[arg(long)]
        catalog: String,
        #[arg(long)]
        id: String,
        #[arg(long)]
        value: String,
    },
    /// Run one or more poll cycles and print each snapshot
    Poll {
        #[arg(long)]
        catalog: String,
        #[command(flatten)]
        link: LinkArgs,
        /// Number of cycles
        #[arg(long, default_value_t = 1u32)]
        count: u32,
        /// Installed heating circuits
        #[arg(long)]
        circuits: Option<u32>,
    },
    /// Write a register immediately, then refresh
    Write {
        #[arg(long)]
        catalog: String,
        #[command(flatten)]
        link: LinkArgs,
        #[arg(long)]
        id: String,
        #[arg(long)]
        value: String,
        /// Installed heating circuits
        #[arg(long)]
        circuits: Option<u32>,
    },
    /// Poll on the configured interval until Ctrl-C
    Watch {
        #[arg(long)]
        catalog: String,
        #[command(flatten)]
        link: LinkArgs,
        /// Engine config (JSON)
        #[arg(long)]
        config: Option<String>,
        #[command(flatten)]
        engine: EngineArgs,
        /// Write the effective engine config to this path before polling
        #[arg(long)]
        save_config: Option<String>,
        /// Print Prometheus metrics on exit
        #[arg(long, action = ArgAction::SetTrue)]
        metrics: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::CatalogValidate { file, dir, json } => {
            catalog_validate(file.as_deref(), dir.as_deref(), json)
        }
        Commands::CatalogList { path } => catalog_list(&path),
        Commands::Decode { catalog, id, words } => decode_words(&catalog, &id, &words),
        Commands::Encode { catalog, id, value } => encode_value(&catalog, &id, &value),
        Commands::Poll {
            catalog,
            link,
            count,
            circuits,
        } => poll(&catalog, &link, count, circuits).await,
        Commands::Write {
            catalog,
            link,
            id,
            value,
            circuits,
        } => write(&catalog, &link, &id, &value, circuits).await,
        Commands::Watch {
            catalog,
            link,
            config,
            engine,
            save_config,
            metrics,
        } => {
            let config = effective_config(config.as_deref(), &engine)?;
            if let Some(path) = save_config {
                config.save(&path)?;
                info!(path = %path, "saved engine config");
            }
            watch(&catalog, &link, config, metrics).await
        }
    }
}

fn setup_tracing() {
    // Best-effort; avoid panics if already set
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

fn catalog_validate(file: Option<&str>, dir: Option<&str>, json: bool) -> Result<()> {
    let cat = match (file, dir) {
        (Some(f), None) => catalog::load_catalog_file(f)?,
        (None, Some(d)) => catalog::load_catalog_dir(d)?,
        _ => {
            return Err(anyhow::anyhow!("provide --file <path> or --dir <dir>"));
        }
    };
    println!(
        "ok: loaded {} registers ({} writable)",
        cat.len(),
        cat.writable().count()
    );
    if json {
        let descs: Vec<_> = cat.iter().collect();
        println!("{}", serde_json::to_string_pretty(&descs)?);
    }
    Ok(())
}

fn catalog_list(path: &str) -> Result<()> {
    let cat = catalog::load_catalog(path)?;
    for d in &cat {
        println!("{}", list_line(d));
    }
    Ok(())
}

fn list_line(d: &catalog::RegisterDescriptor) -> String {
    let mut line = format!(
        "{}\t{}\t{}\t{:?}\t{}",
        d.id,
        d.class,
        d.address,
        d.encoding,
        if d.is_writable() { "rw" } else { "ro" }
    );
    if let Some(map) = &d.value_map {
        let options: Vec<String> = map.options().map(|v| v.to_string()).collect();
        line.push('\t');
        line.push_str(&options.join("|"));
    }
    line
}

fn parse_hex_words(items: &[String]) -> Result<Vec<Word>> {
    let mut out = Vec::with_capacity(items.len());
    for s in items {
        let t = s.trim();
        let no_prefix = t.strip_prefix("0x").unwrap_or(t);
        let w = Word::from_str_radix(no_prefix, 16)
            .map_err(|e| anyhow::anyhow!("invalid hex word '{t}': {e}"))?;
        out.push(w);
    }
    Ok(out)
}

fn lookup<'a>(cat: &'a RegisterCatalog, id: &str) -> Result<&'a catalog::RegisterDescriptor> {
    cat.get(id)
        .ok_or_else(|| anyhow::anyhow!("unknown register: {id}"))
}

fn decode_words(path: &str, id: &str, words_hex: &[String]) -> Result<()> {
    let cat = catalog::load_catalog(path)?;
    let desc = lookup(&cat, id)?;
    let words = parse_hex_words(words_hex)?;
    let value = catalog::decode(&words, desc)?;
    println!("{}", serde_json::json!({ "id": id, "value": value }));
    Ok(())
}

fn encode_value(path: &str, id: &str, input: &str) -> Result<()> {
    let cat = catalog::load_catalog(path)?;
    let desc = lookup(&cat, id)?;
    let words = catalog::encode(&DecodedValue::parse_input(input), desc)?;
    let hex: Vec<String> = words.iter().map(|w| format!("0x{w:04X}")).collect();
    println!("{}", hex.join(" "));
    Ok(())
}

fn build_engine(path: &str, link: &LinkArgs, config: EngineConfig) -> Result<PollingEngine> {
    let cat = catalog::load_catalog(path)?;
    let engine = match link.backend {
        Backend::Mock => PollingEngine::new(cat, MockTransport::new("cli"), config)?,
        Backend::Tcp => {
            let cfg = TcpConfig {
                host: link.host.clone(),
                port: link.port,
                unit_id: link.unit_id,
                timeout_ms: link.timeout_ms,
            };
            PollingEngine::new(cat, ModbusTcpTransport::new(cfg), config)?
        }
    };
    Ok(engine)
}

async fn poll(path: &str, link: &LinkArgs, count: u32, circuits: Option<u32>) -> Result<()> {
    let config = EngineConfig {
        circuits,
        ..EngineConfig::default()
    };
    let engine = build_engine(path, link, config)?;
    let mut result = Ok(());
    for _ in 0..count.max(1) {
        match engine.refresh().await {
            Ok(snap) => println!("{}", serde_json::to_string(&snap.to_record())?),
            Err(e) => {
                result = Err(e.into());
                break;
            }
        }
    }
    engine.shutdown().await;
    result
}

async fn write(
    path: &str,
    link: &LinkArgs,
    id: &str,
    input: &str,
    circuits: Option<u32>,
) -> Result<()> {
    let config = EngineConfig {
        write_debounce_ms: 0,
        circuits,
        ..EngineConfig::default()
    };
    let engine = build_engine(path, link, config)?;
    let result = async {
        engine.refresh().await?;
        let outcome = engine
            .schedule_write(id, DecodedValue::parse_input(input))
            .await?;
        match outcome {
            ScheduleOutcome::Unchanged => println!("{id}: already {input}, nothing written"),
            _ => println!("{id}: now {}", engine.snapshot().value(id)),
        }
        Ok::<_, anyhow::Error>(())
    }
    .await;
    engine.shutdown().await;
    result
}

fn effective_config(path: Option<&str>, overrides: &EngineArgs) -> Result<EngineConfig> {
    let base = match path {
        Some(p) => EngineConfig::load(p)?,
        None => EngineConfig::default(),
    };
    Ok(overrides.apply(base))
}

async fn watch(path: &str, link: &LinkArgs, config: EngineConfig, metrics: bool) -> Result<()> {
    let engine = build_engine(path, link, config)?;
    engine.on_snapshot(|snap| match serde_json::to_string(&snap.to_record()) {
        Ok(line) => println!("{line}"),
        Err(e) => tracing::error!(error = %e, "failed to serialize snapshot"),
    });
    engine.on_cycle_failed(|e| {
        println!("{}", serde_json::json!({ "event": "cycle_failed", "error": e.to_string() }));
    });
    engine.on_write(|event| {
        if let Ok(line) = serde_json::to_string(event) {
            println!("{line}");
        }
    });
    engine.start()?;
    info!(
        registers = engine.catalog().len(),
        interval_s = engine.config().scan_interval().as_secs(),
        "watching; Ctrl-C to stop"
    );
    tokio::signal::ctrl_c().await?;
    engine.shutdown().await;
    if metrics {
        print!("{}", engine.metrics().encode_text());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_words_accept_optional_prefix() -> Result<()> {
        let words = parse_hex_words(&["0x4120".into(), "0000".into(), "ffff".into()])?;
        assert_eq!(words, vec![0x4120, 0x0000, 0xFFFF]);
        assert!(parse_hex_words(&["0x10000".into()]).is_err());
        Ok(())
    }

    #[test]
    fn cli_parses_flattened_link_args() {
        let cli = Cli::try_parse_from([
            "regpoll", "poll", "--catalog", "c.json", "--backend", "tcp", "--host", "10.0.0.5",
            "--count", "3",
        ]);
        let Ok(Cli {
            command: Commands::Poll { link, count, .. },
        }) = cli
        else {
            panic!("poll command did not parse");
        };
        assert_eq!(link.backend, Backend::Tcp);
        assert_eq!(link.host, "10.0.0.5");
        assert_eq!(link.port, 502);
        assert_eq!(count, 3);
    }

    #[test]
    fn watch_flags_override_config_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("engine.json");
        std::fs::write(&file, r#"{"scan_interval_secs": 60, "write_debounce_ms": 800}"#)?;
        let file = file.to_string_lossy().into_owned();

        let cli = Cli::try_parse_from([
            "regpoll", "watch", "--catalog", "c.json", "--config", file.as_str(),
            "--write-debounce-ms", "0", "--circuits", "1",
        ])?;
        let Commands::Watch { config, engine, .. } = cli.command else {
            panic!("watch command did not parse");
        };
        let effective = effective_config(config.as_deref(), &engine)?;
        assert_eq!(effective.scan_interval_secs, 60);
        assert_eq!(effective.write_debounce_ms, 0);
        assert_eq!(effective.circuits, Some(1));

        let saved = dir.path().join("effective.json");
        effective.save(&saved)?;
        assert_eq!(EngineConfig::load(&saved)?, effective);

        let untouched = effective_config(Some(file.as_str()), &EngineArgs::default())?;
        assert_eq!(untouched.write_debounce_ms, 800);
        assert_eq!(untouched.circuits, None);
        Ok(())
    }

    #[test]
    fn list_line_shows_value_map_options() {
        let desc = catalog::RegisterDescriptor::new(
            "mode",
            modbus_transport::RegisterClass::Holding,
            11,
            catalog::ValueEncoding::Uint16,
        )
        .with_value_map(catalog::ValueMap::from_pairs([(1, "Heat"), (0, "Off")]));
        let line = list_line(&desc);
        assert!(line.starts_with("mode\tholding\t11\t"));
        assert!(line.ends_with("\trw\tOff|Heat"));
    }
}
