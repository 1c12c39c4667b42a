use crate::Database;
use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitemapEntry {
    pub loc: String,
    pub lastmod: String,
}

pub fn article_url(base_url: &str, slug: &str) -> String {
    format!("{}/articles/{}", base_url.trim_end_matches('/'), slug)
}

/// One entry per article, read from a single snapshot.
pub fn entries(db: &Database, base_url: &str) -> Result<Vec<SitemapEntry>> {
    let mut conn = db.get()?;
    let tx = conn.transaction()?;

    let entries = {
        let mut stmt = tx.prepare("SELECT slug, updated_at FROM articles ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(SitemapEntry {
                    loc: article_url(base_url, &row.get::<_, String>(0)?),
                    lastmod: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    tx.commit()?;
    Ok(entries)
}

pub fn render(entries: &[SitemapEntry]) -> String {
    let mut urls = String::new();
    for entry in entries {
        urls.push_str(&format!(
            r#"  <url>
    <loc>{}</loc>
    <lastmod>{}</lastmod>
  </url>
"#,
            xml_escape(&entry.loc),
            xml_escape(&entry.lastmod)
        ));
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
{}</urlset>
"#,
        urls
    )
}

/// Regenerates the sitemap file at `path`. Readers never see a partial file.
pub fn refresh(db: &Database, base_url: &str, path: &Path) -> Result<usize> {
    let entries = entries(db, base_url)?;
    let xml = render(&entries);

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(xml.as_bytes())?;
    file.persist(path)
        .with_context(|| format!("could not write sitemap to {}", path.display()))?;

    tracing::info!("Sitemap refreshed with {} article(s)", entries.len());
    Ok(entries.len())
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
