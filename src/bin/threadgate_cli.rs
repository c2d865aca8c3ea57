//!
//! threadgate CLI
//! --------------
//! Generates a fresh identity and authenticates it against a token endpoint,
//! either by exchanging it for a bearer token or by signing a group-auth window
//! with a group key and secret. Prints the resulting request metadata.

use std::env;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

use threadgate::cli::connectivity::HttpTokenEndpoint;
use threadgate::cli::print_context;
use threadgate::config::SessionConfig;
use threadgate::identity::{with_session_token_retrying, Identity, RequestContext, RetryPolicy, SessionContextBuilder};

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} [--endpoint <url>] [--timeout-ms <ms>] [--retries <n>] [--whoami]\n  {program} --group-key <key> --group-secret <secret> [--endpoint <url>] [--whoami]\n\nFlags:\n  --endpoint <url>         Token endpoint base URL (env THREADGATE_ENDPOINT, default http://127.0.0.1:6006)\n  --timeout-ms <ms>        Transport timeout per request (env THREADGATE_TIMEOUT_MS, default 10000)\n  --deadline-ms <ms>       Overall deadline for the token exchange\n  --retries <n>            Extra attempts on transient failures (default 0)\n  --group-key <key>        Use group auth instead of a session token\n  --group-secret <secret>  base64url group secret (required with --group-key)\n  --whoami                 Ask the endpoint who the resulting context authenticates as\n  -h, --help               Show this help\n\nExamples:\n  {program} --endpoint http://127.0.0.1:6006 --whoami\n  {program} --group-key demo --group-secret $THREADGATE_GROUP_SECRET --whoami"
    );
}

fn take_value(args: &[String], i: usize, flag: &str, program: &str) -> String {
    if i + 1 >= args.len() {
        eprintln!("{flag} requires a value");
        print_usage(program);
        std::process::exit(2);
    }
    args[i + 1].clone()
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args: Vec<String> = env::args().collect();
    let program = args.remove(0);

    let mut cfg = SessionConfig::from_env();
    let mut group_key: Option<String> = None;
    let mut group_secret: Option<String> = None;
    let mut retries: u32 = 0;
    let mut deadline_ms: Option<u64> = None;
    let mut whoami = false;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--endpoint" => { cfg.endpoint = take_value(&args, i, "--endpoint", &program); i += 2; }
            "--timeout-ms" => {
                let v = take_value(&args, i, "--timeout-ms", &program);
                cfg.timeout_ms = v.parse().map_err(|_| anyhow!("--timeout-ms expects milliseconds, got '{}'", v))?;
                i += 2;
            }
            "--deadline-ms" => {
                let v = take_value(&args, i, "--deadline-ms", &program);
                deadline_ms = Some(v.parse().map_err(|_| anyhow!("--deadline-ms expects milliseconds, got '{}'", v))?);
                i += 2;
            }
            "--retries" => {
                let v = take_value(&args, i, "--retries", &program);
                retries = v.parse().map_err(|_| anyhow!("--retries expects a count, got '{}'", v))?;
                i += 2;
            }
            "--group-key" => { group_key = Some(take_value(&args, i, "--group-key", &program)); i += 2; }
            "--group-secret" => { group_secret = Some(take_value(&args, i, "--group-secret", &program)); i += 2; }
            "--whoami" => { whoami = true; i += 1; }
            "-h" | "--help" => { print_usage(&program); return Ok(()); }
            other => { eprintln!("unknown argument: {other}"); print_usage(&program); std::process::exit(2); }
        }
    }

    let endpoint = HttpTokenEndpoint::from_config(&cfg)?;
    let builder = SessionContextBuilder::new(endpoint.clone());
    let identity = Identity::generate()?;
    println!("identity: {}", identity.public_key());

    let mut base = RequestContext::new();
    if let Some(ms) = deadline_ms {
        base = base.with_timeout(Duration::from_millis(ms));
    }
    let cancel = base.cancellation_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let ctx = match (group_key, group_secret) {
        (Some(key), Some(secret)) => builder.with_group_auth(&base, &key, &secret)?,
        (Some(_), None) | (None, Some(_)) => {
            return Err(anyhow!("--group-key and --group-secret must be given together"));
        }
        (None, None) => {
            let policy = RetryPolicy::with_retries(retries);
            with_session_token_retrying(&builder, &base, &identity, &policy).await?
        }
    };

    println!("> Success!");
    print_context(&ctx);

    if whoami {
        let principal = endpoint.whoami(&ctx).await?;
        println!("authenticated as: {}", serde_json::to_string(&principal)?);
    }
    Ok(())
}
