use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use threadgate::server::{IssuerConfig, DEFAULT_HTTP_PORT};

fn parse_port_arg(args: &[String], flag: &str) -> Option<u16> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag && i + 1 < args.len() {
            return args[i + 1].parse::<u16>().ok();
        }
        i += 1;
    }
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let http_port = parse_port_arg(&args, "--port")
        .or_else(|| std::env::var("THREADGATE_HTTP_PORT").ok().and_then(|v| v.parse::<u16>().ok()))
        .unwrap_or(DEFAULT_HTTP_PORT);
    let cfg = IssuerConfig::from_env();

    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "threadgate",
        "threadgate issuer starting: RUST_LOG='{}', http_port={}, group_auth={}",
        rust_log, http_port, cfg.group.is_some()
    );

    threadgate::server::run(http_port, cfg).await
}
