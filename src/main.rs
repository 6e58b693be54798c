//! `regmirror` CLI: a thin operational front-end over the library, used for
//! local development and manual cache administration (`SPEC_FULL.md` §A).
//! It is not the embedded HTTP server — that remains an external
//! collaborator per `spec.md` §1.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Context, Result};
use regmirror::blob_store::BlobStore;
use regmirror::catalogue::sqlite::SqliteCatalogue;
use regmirror::catalogue::Catalogue;
use regmirror::config::load_mirrors_file;
use regmirror::dispatcher::Dispatcher;
use regmirror::eviction::EvictionEngine;
use regmirror::fetcher::ReqwestFetcher;
use regmirror::handler::{HandlerContext, HandlerRegistry};
use regmirror::mirror_index::MirrorIndex;
use regmirror::request::OwnedRequestContext;

#[derive(Parser)]
#[command(name = "regmirror", version, about = "Multi-ecosystem package registry caching reverse proxy")]
struct Cli {
    /// SQLite database file backing the catalogue.
    #[arg(long, global = true, default_value = "regmirror.db")]
    database: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a mirror-configuration TOML file, run catalogue migrations, print a summary.
    Init { config: PathBuf },
    /// List configured mirrors and their usage.
    Mirrors { config: PathBuf },
    /// Run one request through the dispatcher and print the result.
    Fetch {
        config: PathBuf,
        mirror_name: String,
        path: String,
    },
    /// Invoke the eviction engine for one configured mirror.
    Evict { config: PathBuf, mirror_name: String },
}

async fn build_catalogue(database: &PathBuf) -> Result<SqliteCatalogue> {
    let url = format!("sqlite://{}?mode=rwc", database.display());
    SqliteCatalogue::connect(&url)
        .await
        .wrap_err("connecting to catalogue database")
}

async fn seed_mirrors(catalogue: &SqliteCatalogue, config: &PathBuf) -> Result<Vec<regmirror::Mirror>> {
    let file = load_mirrors_file(config)
        .await
        .wrap_err_with(|| format!("loading {}", config.display()))?;
    let mut mirrors = Vec::new();
    for entry in file.mirrors {
        let mut mirror = entry.into_mirror();
        let id = catalogue
            .upsert_mirror(&mirror)
            .await
            .wrap_err_with(|| format!("registering mirror {}", mirror.name))?;
        mirror.id = id;
        mirrors.push(mirror);
    }
    Ok(mirrors)
}

fn find_mirror<'a>(mirrors: &'a [regmirror::Mirror], name: &str) -> Result<&'a regmirror::Mirror> {
    mirrors
        .iter()
        .find(|m| m.name == name)
        .ok_or_else(|| color_eyre::eyre::eyre!("no configured mirror named {name}"))
}

fn new_handler_context(catalogue: Arc<SqliteCatalogue>) -> Result<HandlerContext> {
    Ok(HandlerContext {
        catalogue: catalogue as Arc<dyn Catalogue>,
        blob_store: BlobStore::new(),
        fetcher: Arc::new(ReqwestFetcher::new()?),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    regmirror::logging::init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Command::Init { config } => {
            let catalogue = build_catalogue(&cli.database).await?;
            let mirrors = seed_mirrors(&catalogue, &config).await?;
            println!("initialised {} with {} mirror(s):", cli.database.display(), mirrors.len());
            for mirror in &mirrors {
                println!("  {} [{}] -> {}", mirror.name, mirror.ecosystem, mirror.upstream_url);
            }
        }
        Command::Mirrors { config } => {
            let catalogue = build_catalogue(&cli.database).await?;
            seed_mirrors(&catalogue, &config).await?;
            let mirrors = catalogue.list_mirrors().await.wrap_err("listing mirrors")?;
            for mirror in &mirrors {
                let used = catalogue.sum_size(mirror.id).await.unwrap_or(0);
                let ratio = if mirror.max_size > 0 {
                    used as f64 / mirror.max_size as f64
                } else {
                    0.0
                };
                let last_used = mirror
                    .last_used_time
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "{:<20} {:<8} used={used:>12} max={:>12} ratio={ratio:.2} requests={} hits={} last_used={last_used}",
                    mirror.name, mirror.ecosystem, mirror.max_size, mirror.request_count, mirror.hit_count
                );
            }
        }
        Command::Fetch {
            config,
            mirror_name,
            path,
        } => {
            let catalogue = Arc::new(build_catalogue(&cli.database).await?);
            let mirrors = seed_mirrors(&catalogue, &config).await?;
            find_mirror(&mirrors, &mirror_name)?;

            let mirror_index = Arc::new(MirrorIndex::new());
            for mirror in mirrors {
                mirror_index.set(mirror);
            }

            let registry = Arc::new(HandlerRegistry::with_defaults());
            let ctx = Arc::new(new_handler_context(catalogue)?);
            let dispatcher = Dispatcher::new(mirror_index, registry, ctx);

            let mut request_ctx = OwnedRequestContext::get(Default::default());
            dispatcher
                .dispatch(&mut request_ctx, &path)
                .await
                .map_err(|e| color_eyre::eyre::eyre!("{e}"))?;

            if let Some(response) = request_ctx.response {
                println!("status: {}", response.status);
                for (name, value) in response.headers.iter() {
                    println!("{name}: {}", value.to_str().unwrap_or(""));
                }
                println!("body: {} bytes", response.body.len());
            }
        }
        Command::Evict { config, mirror_name } => {
            let catalogue = Arc::new(build_catalogue(&cli.database).await?);
            let mirrors = seed_mirrors(&catalogue, &config).await?;
            let target = find_mirror(&mirrors, &mirror_name)?.id;

            let mirror_index = Arc::new(MirrorIndex::new());
            for mirror in mirrors {
                mirror_index.set(mirror);
            }

            let registry = Arc::new(HandlerRegistry::with_defaults());
            let ctx = Arc::new(new_handler_context(catalogue)?);
            let engine = EvictionEngine::new(mirror_index, registry, ctx);
            engine
                .run_one(target)
                .await
                .map_err(|e| color_eyre::eyre::eyre!("{e}"))?;
            println!("eviction complete for {mirror_name}");
        }
    }

    Ok(())
}
