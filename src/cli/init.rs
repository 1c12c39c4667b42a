use anyhow::Result;
use std::path::PathBuf;

pub async fn run(path: PathBuf, name: Option<String>) -> Result<()> {
    let site_name = name.unwrap_or_else(|| "My Blog".to_string());

    let config_path = path.join("folio.toml");
    if config_path.exists() {
        anyhow::bail!("{} already exists", config_path.display());
    }

    std::fs::create_dir_all(&path)?;
    std::fs::create_dir_all(path.join("data"))?;
    std::fs::create_dir_all(path.join("data/media"))?;
    std::fs::create_dir_all(path.join("public"))?;

    let config = format!(
        r#"[site]
title = "{}"
description = "A minimal blog"
url = "http://localhost:3000"
production = false

[server]
host = "127.0.0.1"
port = 3000

[database]
path = "./data/folio.db"
pool_size = 10

[media]
storage_dir = "./data/media"
max_upload_size = "10MB"

[images]
max_dimension = 800

[jobs]
max_attempts = 3
retry_base_ms = 500
sitemap_interval_secs = 3600

[sitemap]
path = "./public/sitemap.xml"
"#,
        site_name.replace('"', "\\\"")
    );

    std::fs::write(&config_path, config)?;

    tracing::info!("Created new Folio site at {:?}", path);
    tracing::info!("Run 'folio migrate' to set up the database");
    tracing::info!("Run 'folio serve' to start the server");

    Ok(())
}
