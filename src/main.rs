use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use rmcp::ServiceExt;

use review_responder::api::api_router;
use review_responder::cache::CachedEmbedder;
use review_responder::composer::ResponseComposer;
use review_responder::config::{EmbedderKind, Settings, parse_sentiment_mode};
use review_responder::embedding::{Embed, HashEmbedder, OnnxEmbedder, OpenAiEmbedder};
use review_responder::generation::{Generate, OpenAiChat};
use review_responder::openai::OpenAiSettings;
use review_responder::responder::Responder;
use review_responder::sentiment::{SentimentClassifier, SentimentMode};
use review_responder::server::ReviewServer;
use review_responder::watch;

const GENERATION_INTERVAL: Duration = Duration::from_millis(1500);
const EMBEDDING_INTERVAL: Duration = Duration::from_millis(50);

fn next_value(args: &[String], i: &mut usize, flag: &str) -> Result<String> {
    *i += 1;
    args.get(*i)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("{} needs a value", flag))
}

fn parse_args(mut settings: Settings) -> Result<Settings> {
    let args: Vec<String> = std::env::args().collect();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--transport" => settings.transport = next_value(&args, &mut i, "--transport")?,
            "--port" => {
                let v = next_value(&args, &mut i, "--port")?;
                settings.port = v.parse().map_err(|_| {
                    anyhow::anyhow!(
                        "--port value '{}' is not a valid port number (expected 0-65535)",
                        v
                    )
                })?;
            }
            "--faq-path" => {
                settings.faq_path = Some(PathBuf::from(next_value(&args, &mut i, "--faq-path")?));
            }
            "--embedder" => settings.embedder = next_value(&args, &mut i, "--embedder")?.parse()?,
            "--model-dir" => settings.model_dir = next_value(&args, &mut i, "--model-dir")?,
            "--cache-path" => {
                settings.cache_path =
                    Some(PathBuf::from(next_value(&args, &mut i, "--cache-path")?));
            }
            "--top-k" => {
                let v = next_value(&args, &mut i, "--top-k")?;
                settings.top_k = v
                    .parse()
                    .map_err(|_| anyhow::anyhow!("--top-k value '{}' is not a number", v))?;
            }
            "--voice" => settings.voice = next_value(&args, &mut i, "--voice")?.parse()?,
            "--fallback" => settings.fallback = next_value(&args, &mut i, "--fallback")?.parse()?,
            "--sentiment" => {
                settings.sentiment = parse_sentiment_mode(&next_value(&args, &mut i, "--sentiment")?)?;
            }
            "--watch" => settings.watch = true,
            "--debug" => settings.debug = true,
            "--review" => settings.review = Some(next_value(&args, &mut i, "--review")?),
            "--rating" => {
                let v = next_value(&args, &mut i, "--rating")?;
                settings.rating = Some(
                    v.parse()
                        .map_err(|_| anyhow::anyhow!("--rating value '{}' is not a number", v))?,
                );
            }
            "--help" | "-h" => {
                eprintln!(
                    "review-responder\n\n\
                     Options:\n  \
                       --transport <stdio|http>        Transport type (default: stdio)\n  \
                       --port <PORT>                   HTTP port (default: {})\n  \
                       --faq-path <PATH>               FAQ dataset (.csv, .xlsx or .jsonl)\n  \
                       --embedder <openai|onnx|hash>   Embedding backend (default: openai with a key, else hash)\n  \
                       --model-dir <PATH>              ONNX embedding model directory\n  \
                       --cache-path <PATH>             Embedding cache file (default: beside the dataset)\n  \
                       --top-k <N>                     FAQ matches per review (default: 3)\n  \
                       --voice <VOICE>                 professional, friendly, supportive or enthusiastic\n  \
                       --fallback <propagate|template> Behaviour when generation fails\n  \
                       --sentiment <lexicon|model>     Sentiment source for unrated reviews\n  \
                       --watch                         Reload the dataset when it changes\n  \
                       --review <TEXT>                 Reply to one review, print JSON and exit\n  \
                       --rating <1-5>                  Star rating for --review\n  \
                       --debug                         Enable debug logging to file (review_debug.log next to executable)",
                    review_responder::config::DEFAULT_PORT
                );
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                std::process::exit(1);
            }
        }
        i += 1;
    }

    Ok(settings)
}

fn init_logging(debug: bool) -> Result<()> {
    if debug {
        let log_path = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|d| d.join("review_debug.log")))
            .unwrap_or_else(|| PathBuf::from("review_debug.log"));
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("review_responder=debug".parse()?)
                    .add_directive("rmcp=debug".parse()?)
                    .add_directive(tracing::Level::WARN.into()),
            )
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .init();
        tracing::info!("Debug logging to {}", log_path.display());
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive(tracing::Level::INFO.into()),
            )
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .init();
    }
    Ok(())
}

fn openai_settings(settings: &Settings, interval: Duration) -> Result<OpenAiSettings> {
    Ok(OpenAiSettings::new(settings.require_api_key()?)
        .with_base_url(settings.openai_base_url.clone())
        .with_min_interval(interval))
}

fn build_embedder(settings: &Settings) -> Result<Arc<dyn Embed>> {
    let inner: Arc<dyn Embed> = match settings.embedder {
        EmbedderKind::OpenAi => Arc::new(OpenAiEmbedder::new(
            openai_settings(settings, EMBEDDING_INTERVAL)?,
            settings.embedding_model.clone(),
        )?),
        EmbedderKind::Onnx => {
            tracing::info!("Loading embedding model from {}", settings.model_dir);
            Arc::new(OnnxEmbedder::load(
                &format!("{}/model_ort.onnx", settings.model_dir),
                &format!("{}/tokenizer.json", settings.model_dir),
            )?)
        }
        EmbedderKind::Hash => Arc::new(HashEmbedder::default()),
    };
    tracing::info!("Using embedding model {}", inner.model_id());

    Ok(match settings.resolved_cache_path() {
        Some(path) => Arc::new(CachedEmbedder::open(inner, path)),
        None => Arc::new(CachedEmbedder::in_memory(inner)),
    })
}

async fn build_responder(settings: &Settings) -> Result<Arc<Responder>> {
    let embedder = build_embedder(settings)?;
    let generator: Arc<dyn Generate> = Arc::new(OpenAiChat::new(
        openai_settings(settings, GENERATION_INTERVAL)?,
        settings.chat_model.clone(),
    )?);

    let classifier = match settings.sentiment {
        SentimentMode::Lexicon => SentimentClassifier::lexicon(),
        SentimentMode::Model => SentimentClassifier::with_model(generator.clone()),
    };
    let composer =
        ResponseComposer::new(generator, settings.brand_name.clone()).with_policy(settings.fallback);

    let mut responder = Responder::new(embedder, classifier, composer)
        .with_settings(settings.retrieval())
        .with_default_voice(settings.voice);
    if let Some(path) = &settings.faq_path {
        responder = responder.with_dataset_path(path);
    }

    if responder.dataset_path().is_some() {
        responder.reload().await?;
    } else {
        tracing::warn!("No FAQ dataset configured; replies will not cite FAQs");
    }
    Ok(Arc::new(responder))
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = parse_args(Settings::from_env()?)?;
    init_logging(settings.debug)?;

    let responder = build_responder(&settings).await?;

    if let Some(review) = &settings.review {
        let outcome = responder.respond(review, settings.rating, None).await?;
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    let _watcher = if settings.watch {
        Some(watch::spawn_reloader(responder.clone())?)
    } else {
        None
    };

    let server = ReviewServer::new(responder.clone());

    match settings.transport.as_str() {
        "stdio" => {
            tracing::info!("Starting stdio transport");
            let service = server.serve(rmcp::transport::stdio()).await?;
            match service.waiting().await {
                Ok(reason) => {
                    tracing::info!("Client disconnected: {:?}", reason);
                }
                Err(e) => {
                    tracing::warn!("Stdio transport closed: {}", e);
                }
            }
        }
        "http" => {
            use rmcp::transport::streamable_http_server::{
                StreamableHttpServerConfig, StreamableHttpService,
                session::local::LocalSessionManager,
            };

            let ct = tokio_util::sync::CancellationToken::new();

            let service = StreamableHttpService::new(
                move || Ok(server.clone()),
                LocalSessionManager::default().into(),
                StreamableHttpServerConfig {
                    cancellation_token: ct.child_token(),
                    ..Default::default()
                },
            );

            let router = axum::Router::new()
                .nest_service("/mcp", service)
                .merge(api_router(responder.clone()));

            let mut listener = None;
            for offset in 0..10u16 {
                let try_port = settings.port.saturating_add(offset);
                match tokio::net::TcpListener::bind(format!("127.0.0.1:{}", try_port)).await {
                    Ok(l) => {
                        tracing::info!("Starting HTTP transport on 127.0.0.1:{}", try_port);
                        listener = Some(l);
                        break;
                    }
                    Err(_) => {
                        tracing::warn!("HTTP port {} in use, trying next", try_port);
                    }
                }
            }
            let listener = listener.ok_or_else(|| {
                anyhow::anyhow!(
                    "Failed to bind HTTP on ports {}-{}",
                    settings.port,
                    settings.port.saturating_add(9)
                )
            })?;
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!("Failed to listen for Ctrl+C: {}", e);
                    }
                    ct.cancel();
                })
                .await?;
        }
        other => anyhow::bail!("Unknown transport: {}. Use 'stdio' or 'http'", other),
    }

    Ok(())
}
