use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mcache_engine::{
    ByteSpan, CacheConfig, DefaultUrlConvertor, HttpLoader, ResourceRegistry, UrlConvertor,
};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};
use url::Url;

use crate::cli::{CliArgs, Command};
use crate::error::AppError;
use crate::utils::progress::ReadProgress;
use crate::utils::{format_bytes, parse_headers, parse_size};

pub async fn run(args: CliArgs) -> Result<(), AppError> {
    let convertor = build_convertor(&args);

    match args.command {
        Command::ProxyUrl { ref url, ref server } => {
            let proxy = convertor.proxy_url(url, server).ok_or_else(|| {
                AppError::InvalidInput(format!("Cannot build a proxy URL for '{url}'"))
            })?;
            println!("{proxy}");
            Ok(())
        }
        Command::OriginUrl { ref proxy } => {
            let origin = convertor.origin_url(proxy).ok_or_else(|| {
                AppError::InvalidInput(format!("'{proxy}' does not carry an origin URL"))
            })?;
            println!("{origin}");
            Ok(())
        }
        Command::Inspect { ref url } => {
            let registry = build_registry(&args, convertor)?;
            inspect(&registry, url).await
        }
        Command::Read {
            ref url,
            ref offset,
            ref length,
            ref output,
            show_progress,
        } => {
            let span = ByteSpan::new(
                parse_size(offset)?,
                length.as_deref().map(parse_size).transpose()?,
            );
            let registry = build_registry(&args, convertor)?;
            let result = read(&registry, url, span, output.clone(), show_progress).await;
            registry.shutdown().await;
            result
        }
    }
}

fn build_convertor(args: &CliArgs) -> Arc<DefaultUrlConvertor> {
    let convertor = args
        .ignored_query_keys
        .iter()
        .fold(DefaultUrlConvertor::new(), |convertor, key| {
            convertor.ignore_query_key(key.clone())
        });
    Arc::new(convertor)
}

fn build_registry(
    args: &CliArgs,
    convertor: Arc<DefaultUrlConvertor>,
) -> Result<ResourceRegistry, AppError> {
    let mut builder = CacheConfig::builder()
        .with_timeout(Duration::from_secs(args.timeout))
        .with_connect_timeout(Duration::from_secs(args.connect_timeout))
        .with_read_timeout(Duration::from_secs(args.read_timeout))
        .with_headers(parse_headers(&args.headers));
    if let Some(dir) = &args.cache_dir {
        builder = builder.with_root_dir(dir);
    }
    let config = builder.build();

    info!(
        "HTTP timeout configuration: overall={}s, connect={}s, read={}s",
        args.timeout, args.connect_timeout, args.read_timeout
    );
    info!(cache_dir = %config.root_dir.display(), "Using cache directory");

    let loader = Arc::new(HttpLoader::new(&config)?);
    Ok(ResourceRegistry::with_parts(config, loader, convertor))
}

async fn inspect(registry: &ResourceRegistry, url: &Url) -> Result<(), AppError> {
    let identity = registry.identity_of(url)?;
    let index = registry.inspect(url).await?;

    println!("resource:      {identity}");
    println!("origin:        {url}");
    println!(
        "total length:  {}",
        index
            .total_length()
            .map_or_else(|| "unknown".to_string(), |len| format!("{len} ({})", format_bytes(len)))
    );
    println!("validator:     {}", index.validator().unwrap_or("-"));
    println!("content type:  {}", index.content_type().unwrap_or("-"));
    println!(
        "cached:        {} in {} range(s){}",
        format_bytes(index.cached_bytes()),
        index.ranges().len(),
        if index.is_complete() { ", complete" } else { "" }
    );
    for range in index.ranges() {
        println!("  [{}, {})", range.offset, range.end());
    }
    Ok(())
}

async fn read(
    registry: &ResourceRegistry,
    url: &Url,
    span: ByteSpan,
    output: Option<PathBuf>,
    show_progress: bool,
) -> Result<(), AppError> {
    let mut reader = registry.open_reader(url, span).await?;
    let prepared = reader.prepare().await?;
    info!(
        url = %url,
        offset = prepared.offset,
        length = ?prepared.length,
        content_length = ?prepared.content_length,
        content_type = ?prepared.content_type,
        "Reader prepared"
    );

    let planned = ByteSpan::new(prepared.offset, prepared.length);
    for part in reader.resource().plan(planned) {
        info!(
            offset = part.span.offset,
            length = ?part.span.length,
            source = if part.cached { "cache" } else { "network" },
            "Planned span"
        );
    }

    let mut sink: Box<dyn AsyncWrite + Unpin + Send> = match &output {
        Some(path) => Box::new(tokio::fs::File::create(path).await?),
        None => Box::new(tokio::io::stdout()),
    };

    let progress = if show_progress {
        ReadProgress::new(format!("Reading {url}"), prepared.length)
    } else {
        ReadProgress::disabled()
    };

    let started = Instant::now();
    let mut written = 0u64;
    let chunk_size = registry.config().read_chunk_size;
    loop {
        let chunk = match reader.read(chunk_size).await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                progress.abandon();
                warn!(error = %e, written, "Read failed");
                return Err(e.into());
            }
        };
        sink.write_all(&chunk).await?;
        written += chunk.len() as u64;
        progress.advance(chunk.len() as u64);
    }
    sink.flush().await?;

    progress.finish(format!("Read {}", format_bytes(written)));
    info!(
        bytes = written,
        size = %format_bytes(written),
        elapsed = ?started.elapsed(),
        output = ?output,
        "Read complete"
    );
    Ok(())
}
