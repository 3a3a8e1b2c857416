use clap::Parser;
use connpool::config::Config;
use connpool::pool::{PoolStats, RequestOptions, Retries};
use connpool::{ConnectionPool, HeaderMultiMap, PoolError, ProxyManager, Response, Result};
use http::Method;
use std::io::Write;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[cfg(feature = "fast-allocator")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "connpool")]
#[command(about = "Send HTTP/1.1 requests through a keep-alive connection pool", long_about = None)]
#[command(version)]
struct Args {
    /// Target URL (http:// only)
    #[arg(required_unless_present = "generate_config")]
    url: Option<String>,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Forward proxy URL (overrides config)
    #[arg(long, value_name = "URL")]
    proxy: Option<String>,

    /// Retries for this request; negative retries without limit (overrides config)
    #[arg(long, allow_negative_numbers = true)]
    retries: Option<i64>,

    /// Request method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Extra request header, e.g. -H 'Accept: text/html'
    #[arg(short = 'H', long = "header", value_name = "NAME: VALUE")]
    headers: Vec<String>,

    /// Request body
    #[arg(long)]
    data: Option<String>,

    /// Print pool statistics as JSON after the request
    #[arg(long)]
    stats: bool,

    /// Generate example configuration file
    #[arg(long, value_name = "FILE")]
    generate_config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error; overrides config)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle config generation
    if let Some(config_path) = args.generate_config {
        println!("Generating example configuration file: {:?}", config_path);
        Config::create_example(&config_path)?;
        println!("Example configuration file created successfully!");
        println!(
            "Edit the file and run: connpool --config {:?} <URL>",
            config_path
        );
        return Ok(());
    }

    // Load configuration
    let mut config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => Config::default(),
    };

    // Apply CLI overrides
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if let Some(proxy) = &args.proxy {
        config.proxy.url = Some(proxy.clone());
    }
    config.validate()?;

    init_logging(&config.logging.level, &config.logging.format)?;

    let url = args
        .url
        .ok_or_else(|| PoolError::Config("no URL given".to_string()))?;
    let method = Method::from_bytes(args.method.to_ascii_uppercase().as_bytes())
        .map_err(|e| PoolError::Config(format!("Invalid method {}: {}", args.method, e)))?;

    let mut options = RequestOptions::new();
    options.retries = args.retries.map(Retries::from_count);
    options.headers = parse_headers(&args.headers)?;
    options.body = args.data.map(Into::into);

    info!("connpool v{} sending {} {}", env!("CARGO_PKG_VERSION"), method, url);

    let (result, stats) = match &config.proxy.url {
        Some(proxy_url) => {
            let proxy_headers: HeaderMultiMap = config.proxy.headers.clone().into_iter().collect();
            let manager = ProxyManager::new(proxy_url, config.pool.clone())?
                .proxy_headers(proxy_headers);
            let result = manager.request(method, &url, options).await;
            (result, manager.pool().stats())
        }
        None => {
            let pool = ConnectionPool::from_url(&url, config.pool.clone())?;
            let result = pool.request(method, &url, options).await;
            (result, pool.stats())
        }
    };

    match result {
        Ok(response) => print_response(&response)?,
        Err(e) => {
            error!("Request failed: {}", e);
            if args.stats {
                print_stats(&stats)?;
            }
            return Err(e);
        }
    }

    if args.stats {
        print_stats(&stats)?;
    }

    Ok(())
}

fn parse_headers(raw: &[String]) -> Result<HeaderMultiMap> {
    raw.iter()
        .map(|header| {
            header
                .split_once(':')
                .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
                .ok_or_else(|| PoolError::Config(format!("Invalid header (want NAME: VALUE): {}", header)))
        })
        .collect()
}

fn print_response(response: &Response) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(
        stdout,
        "{} {} {}",
        response.version, response.status, response.reason
    )?;
    for (name, value) in response.headers.iter() {
        writeln!(stdout, "{}: {}", name, value)?;
    }
    writeln!(stdout)?;
    stdout.write_all(&response.data)?;
    stdout.flush()?;
    Ok(())
}

fn print_stats(stats: &PoolStats) -> Result<()> {
    let json = serde_json::to_string_pretty(stats)
        .map_err(|e| PoolError::Config(format!("Failed to serialize stats: {}", e)))?;
    eprintln!("{}", json);
    Ok(())
}

fn init_logging(level: &str, format: &str) -> Result<()> {
    let env_filter = EnvFilter::try_new(level)
        .map_err(|e| PoolError::Config(format!("Invalid log level: {}", e)))?;

    // Logs go to stderr so the response body on stdout stays clean.
    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "json" {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}
