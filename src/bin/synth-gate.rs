//! synth-gate binary
//!
//! Streaming answer-synthesis gateway

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use synth_gate::gate::{start_server, ConfigFile, Gateway, GatewayConfig, SynthesisRequest};
use synth_gate::{
    build_grounding, resolve_secret, AuthTokenizer, ProviderConfig, SearchResult, Settings,
};
use tracing_subscriber::{fmt, EnvFilter};

/// synth-gate: streaming answer-synthesis gateway
#[derive(Parser, Debug)]
#[command(name = "synth-gate")]
#[command(about = "Streaming answer-synthesis gateway", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    provider: ProviderArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Provider overrides; these win over environment and config file
#[derive(Args, Debug)]
struct ProviderArgs {
    /// Provider id (openai, openrouter, ollama, localai, lmstudio, gemini, azure, huggingface)
    #[arg(long, global = true)]
    provider: Option<String>,

    /// Endpoint URL
    #[arg(long, global = true)]
    url: Option<String>,

    /// Model name
    #[arg(long, global = true)]
    model: Option<String>,

    /// Maximum output tokens
    #[arg(long, global = true)]
    max_tokens: Option<u32>,

    /// Sampling temperature
    #[arg(long, global = true)]
    temperature: Option<f32>,
}

impl ProviderArgs {
    fn settings(&self) -> Settings {
        Settings {
            id: self.provider.clone(),
            url: self.url.clone(),
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            ..Settings::default()
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP gateway
    Serve {
        /// Host to listen on
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,

        /// Connect and idle-read timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Print the resolved configuration (without secrets) and validate it
    Check,

    /// Print a fresh auth token
    Token,

    /// Render the prompt for a query without calling upstream
    Prompt {
        /// Language tag
        #[arg(long, default_value = "all")]
        lang: String,

        /// JSON file with ranked search results
        #[arg(long)]
        results: Option<PathBuf>,

        /// Prior answer text
        #[arg(long, default_value = "")]
        prior: String,

        /// Query text
        #[arg(required = true)]
        query: Vec<String>,
    },
}

/// Everything loaded from flags, environment and config file
struct Loaded {
    settings: Settings,
    gateway: GatewayConfig,
    config_path: Option<PathBuf>,
}

impl Loaded {
    fn load(cli: &Cli) -> Result<Self> {
        let (file, config_path) = ConfigFile::load(cli.config.as_deref())?;
        let settings = cli
            .provider
            .settings()
            .or(Settings::from_env())
            .or(file.provider);
        Ok(Loaded {
            settings,
            gateway: file.gateway,
            config_path,
        })
    }

    /// Resolved provider, `None` when nothing is configured
    fn provider(&self) -> Result<Option<ProviderConfig>> {
        match ProviderConfig::resolve(&self.settings) {
            Ok(config) => Ok(Some(config)),
            Err(synth_gate::Error::Unconfigured(reason)) => {
                tracing::warn!("Provider not configured: {}", reason);
                Ok(None)
            }
            Err(e) => Err(e).context("Invalid provider configuration"),
        }
    }

    fn tokenizer(&self, provider: Option<&ProviderConfig>) -> AuthTokenizer {
        AuthTokenizer::new(resolve_secret(
            self.settings.secret.as_deref(),
            provider.and_then(|p| p.api_key()),
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so `token` and `prompt` output stays clean
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut loaded = Loaded::load(&cli)?;

    match cli.command {
        Commands::Serve { host, port, timeout } => {
            if let Some(host) = host {
                loaded.gateway.host = host;
            }
            if let Some(port) = port {
                loaded.gateway.port = port;
            }
            if let Some(timeout) = timeout {
                loaded.gateway.timeout_secs = timeout;
            }
            let provider = loaded.provider()?;
            let tokenizer = loaded.tokenizer(provider.as_ref());
            let gateway = Gateway::with_http_transport(provider, tokenizer, &loaded.gateway)?;
            start_server(loaded.gateway, gateway).await
        }
        Commands::Check => check(&loaded),
        Commands::Token => {
            let provider = loaded.provider()?;
            let token = loaded
                .tokenizer(provider.as_ref())
                .issue()
                .context("Cannot issue tokens without a secret or API key")?;
            println!("{}", token);
            Ok(())
        }
        Commands::Prompt {
            lang,
            results,
            prior,
            query,
        } => {
            let provider = loaded
                .provider()?
                .context("No provider configured; set LLM_PROVIDER or LLM_URL")?;
            let context_count = provider.context_count;
            let tokenizer = loaded.tokenizer(Some(&provider));
            let gateway = Gateway::with_http_transport(Some(provider), tokenizer, &loaded.gateway)?;

            let grounding = match results {
                Some(path) => {
                    let raw = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    let results: Vec<SearchResult> = serde_json::from_str(&raw)
                        .with_context(|| format!("Failed to parse {}", path.display()))?;
                    build_grounding(&results, context_count)
                }
                None => Default::default(),
            };

            let request = SynthesisRequest {
                query: query.join(" "),
                language: lang,
                grounding_context: grounding.context,
                prior_answer: prior,
                ..Default::default()
            };
            let today = chrono::Local::now().date_naive();
            println!("{}", gateway.render_prompt(&request, today)?);
            for (i, url) in grounding.urls.iter().enumerate() {
                eprintln!("[{}] {}", i + 1, url);
            }
            Ok(())
        }
    }
}

/// Validate configuration
fn check(loaded: &Loaded) -> Result<()> {
    println!("Configuration:");
    match &loaded.config_path {
        Some(path) => println!("  File: {}", path.display()),
        None => println!("  File: (none)"),
    }
    println!("  Listen: {}:{}", loaded.gateway.host, loaded.gateway.port);
    println!(
        "  Timeouts: {}s idle, {}s stream",
        loaded.gateway.timeout_secs, loaded.gateway.stream_timeout_secs
    );

    if loaded.gateway.timeout_secs == 0 || loaded.gateway.stream_timeout_secs == 0 {
        anyhow::bail!("Timeouts must be greater than zero");
    }

    let provider = loaded.provider()?;
    match &provider {
        Some(config) => {
            println!("  Provider: {}", serde_json::to_string_pretty(config)?);
            println!(
                "  Credential: {}",
                if config.api_key().is_some() { "set" } else { "missing" }
            );
        }
        None => println!("  Provider: (none)"),
    }

    let tokenizer = loaded.tokenizer(provider.as_ref());
    let configured = provider.as_ref().is_some_and(|p| p.api_key().is_some())
        && tokenizer.is_configured();
    if configured {
        println!("\n✓ Gateway is configured");
    } else {
        println!("\n✗ Gateway is inert: /ai-stream will answer 400");
    }
    Ok(())
}
