use anyhow::Context;
use clap::{Parser, ValueEnum};
use colored::Colorize;
use http::Method;
use litehttp::request::requires_body;
use litehttp::{Engine, LoggingFilter, MetricsFilter, RequestBody, Response, TlsConfig};
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "litehttp")]
#[command(about = "Send HTTP requests through the litehttp engine")]
#[command(version)]
struct Cli {
    /// HTTP method to use
    #[arg(short, long, default_value = "get")]
    method: MethodArg,

    /// URL to request
    #[arg(value_name = "URL")]
    url: String,

    /// Request headers (format: "Name: Value")
    #[arg(short = 'H', long)]
    headers: Vec<String>,

    /// Request body
    #[arg(short, long)]
    body: Option<String>,

    /// Content type for the request body
    #[arg(long, default_value = "application/x-www-form-urlencoded")]
    content_type: String,

    /// Connect timeout in seconds
    #[arg(long, default_value = "8")]
    connect_timeout: u64,

    /// Read timeout in seconds
    #[arg(long, default_value = "6")]
    read_timeout: u64,

    /// Send this many copies of the request concurrently
    #[arg(short, long, default_value = "1")]
    parallel: usize,

    /// Maximum number of requests in flight
    #[arg(long, default_value = "10")]
    max_running: usize,

    /// Accept invalid TLS certificates
    #[arg(short = 'k', long)]
    insecure: bool,

    /// Show response headers
    #[arg(long)]
    show_headers: bool,

    /// Hide the response body
    #[arg(long)]
    no_body: bool,

    /// Output format
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// Log engine activity to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[derive(ValueEnum, Clone)]
enum MethodArg {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
}

impl From<MethodArg> for Method {
    fn from(method: MethodArg) -> Self {
        match method {
            MethodArg::Get => Method::GET,
            MethodArg::Post => Method::POST,
            MethodArg::Put => Method::PUT,
            MethodArg::Delete => Method::DELETE,
            MethodArg::Patch => Method::PATCH,
            MethodArg::Head => Method::HEAD,
        }
    }
}

#[derive(ValueEnum, Clone)]
enum OutputFormat {
    Text,
    Json,
    Headers,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let metrics = MetricsFilter::new();
    let mut builder = Engine::builder()
        .max_running(cli.max_running)
        .connect_timeout(Duration::from_secs(cli.connect_timeout))
        .read_timeout(Duration::from_secs(cli.read_timeout))
        .filter(metrics.clone());
    if cli.verbose {
        builder = builder.filter(LoggingFilter::new().level(log::Level::Debug));
    }
    if cli.insecure {
        builder = builder.tls_config(TlsConfig::insecure());
    }
    let engine = builder.build().context("failed to start the engine")?;

    let method: Method = cli.method.clone().into();
    let body = match cli.body.as_deref() {
        Some(text) => Some(RequestBody::text(text).with_content_type(cli.content_type.as_str())),
        None if requires_body(&method) => Some(RequestBody::empty()),
        None => None,
    };
    let mut request_builder = engine
        .request(method.clone(), &cli.url)
        .with_context(|| format!("invalid URL {}", cli.url))?
        .method(method, body);
    for header in &cli.headers {
        if let Some((name, value)) = header.split_once(':') {
            request_builder = request_builder.header(name.trim(), value.trim())?;
        }
    }
    let request = request_builder.build().context("invalid request")?;

    let started = Instant::now();
    let copies = cli.parallel.max(1);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    for index in 0..copies {
        let tx = tx.clone();
        engine.submit(request.clone(), move |response| {
            let _ = tx.send((index, response));
        });
    }
    drop(tx);

    let mut responses = Vec::with_capacity(copies);
    while let Some(entry) = rx.recv().await {
        responses.push(entry);
    }
    responses.sort_by_key(|(index, _)| *index);

    for (index, response) in responses {
        if copies > 1 {
            println!("{}", format!("--- response {} ---", index + 1).dimmed());
        }
        print_response(response, &cli)?;
    }

    if copies > 1 || cli.verbose {
        let snapshot = metrics.metrics();
        eprintln!(
            "{} {} sent, {} answered, {} failed in {:.2?}",
            "summary:".bold(),
            snapshot.request_count,
            snapshot.response_count,
            snapshot.failure_count,
            started.elapsed()
        );
    }

    Ok(())
}

fn status_line(response: &Response) -> String {
    match response.status() {
        Some(status) if status.is_success() => status.to_string().green().to_string(),
        Some(status) if status.is_redirection() => status.to_string().cyan().to_string(),
        Some(status) if status.is_client_error() => status.to_string().yellow().to_string(),
        Some(status) => status.to_string().red().to_string(),
        None => response.message().red().to_string(),
    }
}

fn print_response(response: Response, cli: &Cli) -> anyhow::Result<()> {
    match cli.format {
        OutputFormat::Text => {
            println!("Status: {}", status_line(&response));
            if cli.show_headers {
                println!("Headers:");
                for (name, value) in response.headers() {
                    println!("  {}: {}", name.as_str().bold(), value.to_str().unwrap_or(""));
                }
                println!();
            }
            if !cli.no_body {
                println!("{}", String::from_utf8_lossy(&response.bytes()?));
            }
        }
        OutputFormat::Json => {
            let mut headers_map = std::collections::HashMap::new();
            for (name, value) in response.headers() {
                headers_map.insert(name.to_string(), value.to_str().unwrap_or("").to_string());
            }
            let status = response.status().map(|s| s.as_u16());
            let failure = response.failure().map(|kind| kind.to_string());
            let body = if cli.no_body {
                None
            } else {
                Some(String::from_utf8_lossy(&response.bytes()?).into_owned())
            };
            let json_response = serde_json::json!({
                "status": status,
                "failure": failure,
                "headers": headers_map,
                "body": body,
            });
            println!("{}", serde_json::to_string_pretty(&json_response)?);
        }
        OutputFormat::Headers => {
            println!("Status: {}", status_line(&response));
            for (name, value) in response.headers() {
                println!("{}: {}", name, value.to_str().unwrap_or(""));
            }
        }
    }
    Ok(())
}
