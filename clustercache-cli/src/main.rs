use anyhow::{Context, Result};
use clap::Parser;
use clustercache::{
    CacheClient, CacheConfig, CompressionAlgorithm, MemoryStore, SerializerFormat, Timeout,
};
use colored::Colorize;
use futures::TryStreamExt;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "clustercache-cli")]
#[command(about = "clustercache CLI - inspect and edit a Redis Cluster cache", long_about = None)]
struct Args {
    /// Seed nodes, comma-separated (redis://host:port)
    #[arg(short = 'n', long, env = "CLUSTERCACHE_NODES", default_value = "redis://127.0.0.1:7000")]
    nodes: String,

    /// Key prefix
    #[arg(short = 'p', long, default_value = "")]
    prefix: String,

    /// Key version (defaults to the client default version, 1)
    #[arg(short = 'v', long = "key-version")]
    key_version: Option<u64>,

    /// Serializer: msgpack or json
    #[arg(long, default_value = "msgpack")]
    serializer: SerializerFormat,

    /// Compressor: zlib, lz4, zstd or none
    #[arg(long, default_value = "zlib")]
    compressor: CompressionAlgorithm,

    /// Compress values at least this long (0 disables compression)
    #[arg(long, default_value_t = 0)]
    compress_min_len: usize,

    /// Socket timeout in seconds
    #[arg(long, default_value_t = 5.0)]
    timeout: f64,

    /// Use an in-process store instead of connecting to a cluster
    #[arg(long)]
    memory: bool,

    /// Command to execute (if not in interactive mode)
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

struct Shell {
    cache: CacheClient,
    version: Option<u64>,
}

impl Shell {
    async fn connect(args: &Args) -> Result<Self> {
        let config = CacheConfig::new(args.nodes.clone())
            .with_key_prefix(args.prefix.clone())
            .with_serializer(args.serializer)
            .with_compression(args.compressor, args.compress_min_len)
            .with_socket_timeout(Duration::from_secs_f64(args.timeout))
            .with_socket_connect_timeout(Duration::from_secs_f64(args.timeout));

        let cache = if args.memory {
            CacheClient::with_store(config, Arc::new(MemoryStore::new()))?
        } else {
            CacheClient::connect(config)
                .await
                .with_context(|| format!("Failed to connect to {}", args.nodes))?
        };

        Ok(Self {
            cache,
            version: args.key_version,
        })
    }

    async fn execute_command(&self, command: &str, args: &[String]) -> Result<String> {
        let start = Instant::now();

        let response = match command.to_uppercase().as_str() {
            "SET" => self.cmd_set(args, false).await?,
            "ADD" | "SETNX" => self.cmd_set(args, true).await?,
            "GET" => self.cmd_get(args).await?,
            "DEL" | "DELETE" => self.cmd_del(args).await?,
            "EXISTS" => self.cmd_exists(args).await?,
            "INCR" => self.cmd_incr(args, 1).await?,
            "DECR" => self.cmd_incr(args, -1).await?,
            "EXPIRE" => self.cmd_expire(args).await?,
            "TTL" => self.cmd_ttl(args).await?,
            "PERSIST" => self.cmd_persist(args).await?,
            "KEYS" => self.cmd_keys(args).await?,
            "SCAN" => self.cmd_scan(args).await?,
            "DELPATTERN" => self.cmd_delete_pattern(args).await?,
            "INCRVERSION" => self.cmd_incr_version(args, 1).await?,
            "DECRVERSION" => self.cmd_incr_version(args, -1).await?,
            "MSET" => self.cmd_mset(args).await?,
            "MGET" => self.cmd_mget(args).await?,
            "FLUSHDB" => self.cmd_flushdb().await?,
            "HELP" => self.help_text(),
            _ => return Err(anyhow::anyhow!("Unknown command: {}", command)),
        };

        let elapsed = start.elapsed();
        Ok(format!(
            "{}\n{}",
            response,
            format!("({:.2?})", elapsed).dimmed()
        ))
    }

    async fn cmd_set(&self, args: &[String], nx: bool) -> Result<String> {
        if args.len() < 2 {
            let name = if nx { "ADD" } else { "SET" };
            return Err(anyhow::anyhow!("Usage: {} key value [ttl]", name));
        }

        let value = parse_value(&args[1]);
        let timeout = parse_timeout(args.get(2))?;

        let stored = if nx {
            self.cache.add(&args[0], &value, timeout, self.version).await?
        } else {
            self.cache.set(&args[0], &value, timeout, self.version).await?
        };

        if stored {
            Ok("OK".green().to_string())
        } else {
            Ok("(nil)".dimmed().to_string())
        }
    }

    async fn cmd_get(&self, args: &[String]) -> Result<String> {
        if args.is_empty() {
            return Err(anyhow::anyhow!("Usage: GET key"));
        }

        let value: Option<Value> = self.cache.get(&args[0], self.version).await?;
        Ok(match value {
            Some(value) => format_value(&value),
            None => "(nil)".dimmed().to_string(),
        })
    }

    async fn cmd_del(&self, args: &[String]) -> Result<String> {
        if args.is_empty() {
            return Err(anyhow::anyhow!("Usage: DEL key [key ...]"));
        }

        let removed = self.cache.delete_many(args, self.version).await?;
        Ok(format!("(integer) {}", removed))
    }

    async fn cmd_exists(&self, args: &[String]) -> Result<String> {
        if args.is_empty() {
            return Err(anyhow::anyhow!("Usage: EXISTS key"));
        }

        let exists = self.cache.has_key(&args[0], self.version).await?;
        Ok(format!("(integer) {}", u8::from(exists)))
    }

    async fn cmd_incr(&self, args: &[String], sign: i64) -> Result<String> {
        if args.is_empty() {
            return Err(anyhow::anyhow!("Usage: INCR|DECR key [amount]"));
        }

        let amount = match args.get(1) {
            Some(amount) => amount.parse::<i64>().context("amount must be an integer")?,
            None => 1,
        };

        let value = if sign < 0 {
            self.cache.decr(&args[0], amount, self.version).await?
        } else {
            self.cache.incr(&args[0], amount, self.version).await?
        };
        Ok(format!("(integer) {}", value))
    }

    async fn cmd_expire(&self, args: &[String]) -> Result<String> {
        if args.len() < 2 {
            return Err(anyhow::anyhow!("Usage: EXPIRE key seconds"));
        }

        let seconds = args[1].parse::<i64>().context("seconds must be an integer")?;
        let updated = self.cache.expire(&args[0], seconds, self.version).await?;
        Ok(format!("(integer) {}", u8::from(updated)))
    }

    async fn cmd_ttl(&self, args: &[String]) -> Result<String> {
        if args.is_empty() {
            return Err(anyhow::anyhow!("Usage: TTL key"));
        }

        Ok(match self.cache.ttl(&args[0], self.version).await? {
            Some(secs) => format!("(integer) {}", secs),
            None => "(no expiry)".dimmed().to_string(),
        })
    }

    async fn cmd_persist(&self, args: &[String]) -> Result<String> {
        if args.is_empty() {
            return Err(anyhow::anyhow!("Usage: PERSIST key"));
        }

        let updated = self.cache.persist(&args[0], self.version).await?;
        Ok(format!("(integer) {}", u8::from(updated)))
    }

    async fn cmd_keys(&self, args: &[String]) -> Result<String> {
        let pattern = args.first().map(String::as_str).unwrap_or("*");
        let mut keys = self.cache.keys(pattern, self.version).await?;
        keys.sort();
        Ok(format_list(&keys))
    }

    async fn cmd_scan(&self, args: &[String]) -> Result<String> {
        let pattern = args.first().map(String::as_str).unwrap_or("*");
        let count = match args.get(1) {
            Some(count) => Some(count.parse::<usize>().context("count must be a number")?),
            None => None,
        };

        let keys: Vec<String> = self
            .cache
            .iter_keys(pattern, count, self.version)
            .try_collect()
            .await?;
        Ok(format_list(&keys))
    }

    async fn cmd_delete_pattern(&self, args: &[String]) -> Result<String> {
        if args.is_empty() {
            return Err(anyhow::anyhow!("Usage: DELPATTERN pattern"));
        }

        let removed = self.cache.delete_pattern(&args[0], self.version).await?;
        Ok(format!("(integer) {}", removed))
    }

    async fn cmd_incr_version(&self, args: &[String], sign: i64) -> Result<String> {
        if args.is_empty() {
            return Err(anyhow::anyhow!("Usage: INCRVERSION|DECRVERSION key [delta]"));
        }

        let delta = match args.get(1) {
            Some(delta) => delta.parse::<i64>().context("delta must be an integer")?,
            None => 1,
        };

        let version = if sign < 0 {
            self.cache.decr_version(&args[0], delta, self.version).await?
        } else {
            self.cache.incr_version(&args[0], delta, self.version).await?
        };
        Ok(format!("(version) {}", version))
    }

    async fn cmd_mset(&self, args: &[String]) -> Result<String> {
        if args.is_empty() || args.len() % 2 != 0 {
            return Err(anyhow::anyhow!("Usage: MSET key value [key value ...]"));
        }

        let entries = args
            .chunks(2)
            .map(|pair| (pair[0].as_str(), parse_value(&pair[1])));
        self.cache
            .set_batch(entries, Timeout::Default, self.version)
            .await?;
        Ok("OK".green().to_string())
    }

    async fn cmd_mget(&self, args: &[String]) -> Result<String> {
        if args.is_empty() {
            return Err(anyhow::anyhow!("Usage: MGET key [key ...]"));
        }

        let found: Vec<(String, Value)> = self.cache.get_many(args, self.version).await?;
        let output = args
            .iter()
            .enumerate()
            .map(|(i, key)| match found.iter().find(|(k, _)| k == key) {
                Some((_, value)) => format!("{}) {}", i + 1, format_value(value)),
                None => format!("{}) {}", i + 1, "(nil)".dimmed()),
            })
            .collect::<Vec<_>>()
            .join("\n");
        Ok(output)
    }

    async fn cmd_flushdb(&self) -> Result<String> {
        self.cache.clear().await?;
        Ok("OK".green().to_string())
    }

    fn help_text(&self) -> String {
        format!(
            r#"{}

{}
  SET key value [ttl]        Set key (value parsed as JSON, else string)
  ADD key value [ttl]        Set key only if it does not exist
  GET key                    Get the value of key
  DEL key [key ...]          Delete one or more keys
  EXISTS key                 Check if key exists
  INCR key [amount]          Increment value by amount (default 1)
  DECR key [amount]          Decrement value by amount (default 1)

{}
  EXPIRE key seconds         Set timeout on key
  TTL key                    Get remaining time to live
  PERSIST key                Remove timeout from key

{}
  KEYS [pattern]             Find all keys matching pattern
  SCAN [pattern] [count]     Iterate keys with cursor scans
  DELPATTERN pattern         Delete all keys matching pattern

{}
  INCRVERSION key [delta]    Move key to a higher version
  DECRVERSION key [delta]    Move key to a lower version

{}
  MSET k1 v1 [k2 v2 ...]     Set multiple keys
  MGET key [key ...]         Get values of multiple keys

{}
  FLUSHDB                    Remove all keys from every node
  HELP                       Show this help message
  QUIT                       Exit the CLI
"#,
            "clustercache CLI - Available Commands".bold().cyan(),
            "Basic Commands:".bold(),
            "TTL Commands:".bold(),
            "Key Discovery:".bold(),
            "Version Commands:".bold(),
            "Batch Commands:".bold(),
            "Database Commands:".bold(),
        )
    }
}

/// JSON if it parses, otherwise the raw string
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn parse_timeout(raw: Option<&String>) -> Result<Timeout> {
    match raw {
        Some(raw) => {
            let secs = raw.parse::<f64>().context("ttl must be a number of seconds")?;
            Ok(Timeout::Seconds(secs))
        }
        None => Ok(Timeout::Default),
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{}\"", s),
        Value::Number(n) => format!("(integer) {}", n),
        other => other.to_string(),
    }
}

fn format_list(items: &[String]) -> String {
    if items.is_empty() {
        return "(empty list)".dimmed().to_string();
    }
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}) \"{}\"", i + 1, item))
        .collect::<Vec<_>>()
        .join("\n")
}

#[tokio::main]
async fn main() -> Result<()> {
    // Use info level by default to show user-facing messages
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_writer(std::io::stdout)
        .with_env_filter(tracing_subscriber::EnvFilter::new(log_level))
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let args = Args::parse();
    let shell = Shell::connect(&args).await?;

    if !args.command.is_empty() {
        // Command mode: execute single command and exit
        let cmd = &args.command[0];
        let cmd_args: Vec<String> = args.command[1..].to_vec();

        match shell.execute_command(cmd, &cmd_args).await {
            Ok(output) => {
                info!("{}", output);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "{}", format!("Error: {}", e).red());
                std::process::exit(1);
            }
        }
    } else {
        run_interactive(shell).await
    }
}

async fn run_interactive(shell: Shell) -> Result<()> {
    info!(
        "{}",
        format!("clustercache CLI v{}", env!("CARGO_PKG_VERSION"))
            .bold()
            .cyan()
    );
    info!("Connected to {}", shell.cache.connection());
    info!("Type {} for available commands\n", "HELP".bold());

    let mut rl = DefaultEditor::new()?;
    let prompt = format!("{}> ", "clustercache".green());

    loop {
        match rl.readline(&prompt) {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }

                rl.add_history_entry(&line)?;

                let parts: Vec<String> = line.split_whitespace().map(String::from).collect();
                let cmd = &parts[0];
                let args = &parts[1..];

                if cmd.eq_ignore_ascii_case("QUIT") || cmd.eq_ignore_ascii_case("EXIT") {
                    info!("Goodbye!");
                    break;
                }

                match shell.execute_command(cmd, args).await {
                    Ok(output) => info!("{}", output),
                    Err(e) => {
                        error!(error = %e, "{}", format!("Error: {}", e).red());
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                info!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                info!("Goodbye!");
                break;
            }
            Err(err) => {
                error!(error = ?err, "Readline error: {:?}", err);
                break;
            }
        }
    }

    Ok(())
}
