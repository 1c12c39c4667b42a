use clap::Parser;
use folio::cli::{Cli, Commands};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "folio=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Init { path, name }) => {
            folio::cli::init::run(path, name).await?;
        }
        Some(Commands::Migrate { status }) => {
            folio::cli::migrate::run(&cli.config, status).await?;
        }
        Some(Commands::Serve { host, port }) => {
            folio::cli::serve::run(&cli.config, host, port).await?;
        }
        Some(Commands::Sitemap) => {
            folio::cli::sitemap::run(&cli.config).await?;
        }
        Some(Commands::Normalize { slug, all }) => {
            folio::cli::normalize::run(&cli.config, slug, all).await?;
        }
        None => {
            use clap::CommandFactory;
            Cli::command().print_help()?;
        }
    }

    Ok(())
}
