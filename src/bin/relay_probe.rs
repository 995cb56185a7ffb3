use anyhow::{Context, Result};
use clap::Parser;
use reqwest::multipart::{Form, Part};
use std::time::Duration;
use webhook_relay::utils::logger;

/// 對執行中的中繼站送一則測試通知
#[derive(Debug, Parser)]
#[command(name = "relay-probe")]
#[command(about = "Send a test notification to a running webhook relay")]
struct ProbeArgs {
    #[arg(long, env = "RELAY_URL", default_value = "http://127.0.0.1:5000")]
    relay_url: String,

    #[arg(long, default_value = "default")]
    group: String,

    #[arg(long, default_value = "[probe] webhook relay test")]
    content: String,

    #[arg(long, help = "PNG file sent as the screenshot attachment")]
    image: Option<String>,

    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    #[arg(long, help = "Enable verbose output")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = ProbeArgs::parse();
    logger::init_cli_logger(args.verbose);

    let endpoint = format!(
        "{}/webhook/{}",
        args.relay_url.trim_end_matches('/'),
        args.group
    );
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(args.timeout_secs))
        .build()?;

    let request = match &args.image {
        Some(path) => {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read image {}", path))?;
            tracing::info!("🖼️ Attaching {} ({} bytes)", path, bytes.len());
            let part = Part::bytes(bytes)
                .file_name("screenshot.png")
                .mime_str("image/png")?;
            client
                .post(&endpoint)
                .multipart(Form::new().text("content", args.content.clone()).part("file", part))
        }
        None => client
            .post(&endpoint)
            .json(&serde_json::json!({"content": args.content})),
    };

    tracing::info!("📤 POST {}", endpoint);
    let response = request
        .send()
        .await
        .with_context(|| format!("Relay at {} is not reachable", endpoint))?;
    let status = response.status();
    let body: serde_json::Value = response
        .json()
        .await
        .context("Relay returned a non-JSON response")?;

    println!("HTTP {}", status);
    println!("{}", serde_json::to_string_pretty(&body)?);

    if !status.is_success() || body.get("success").and_then(|v| v.as_bool()) != Some(true) {
        anyhow::bail!("relay reported failure");
    }
    Ok(())
}
