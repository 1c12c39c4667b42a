#[cfg(test)]
mod tests {

    mod slug_tests {
        use crate::services::slug::{
            disambiguate, generate_slug, normalize_slug, validate_slug, MAX_SLUG_LENGTH,
        };
        use std::collections::HashSet;

        fn taken(slugs: &[&str]) -> HashSet<String> {
            slugs.iter().map(|s| s.to_string()).collect()
        }

        #[test]
        fn test_generate_slug_basic() {
            assert_eq!(generate_slug("Hello World"), "hello-world");
        }

        #[test]
        fn test_generate_slug_special_characters() {
            assert_eq!(generate_slug("Hello, World!"), "hello-world");
        }

        #[test]
        fn test_generate_slug_unicode() {
            assert_eq!(generate_slug("Café au lait"), "cafe-au-lait");
        }

        #[test]
        fn test_generate_slug_leading_trailing_spaces() {
            assert_eq!(generate_slug("  Hello   World  "), "hello-world");
        }

        #[test]
        fn test_generate_slug_falls_back_when_nothing_is_left() {
            assert_eq!(generate_slug("!!!"), "article");
            assert_eq!(generate_slug(""), "article");
        }

        #[test]
        fn test_generate_slug_is_truncated() {
            let slug = generate_slug(&"word ".repeat(100));
            assert!(slug.len() <= MAX_SLUG_LENGTH);
            assert!(!slug.ends_with('-'));
            assert!(validate_slug(&slug));
        }

        #[test]
        fn test_validate_slug() {
            assert!(validate_slug("hello-world"));
            assert!(validate_slug("post-2024"));
            assert!(!validate_slug(""));
            assert!(!validate_slug("Hello-World"));
            assert!(!validate_slug("hello_world"));
            assert!(!validate_slug(&"a".repeat(MAX_SLUG_LENGTH + 1)));
            assert!(validate_slug(&"a".repeat(MAX_SLUG_LENGTH)));
        }

        #[test]
        fn test_normalize_slug() {
            assert_eq!(normalize_slug("My Custom Slug"), Some("my-custom-slug".to_string()));
            assert_eq!(normalize_slug("already-fine"), Some("already-fine".to_string()));
            assert_eq!(normalize_slug("!!!"), None);
        }

        #[test]
        fn test_disambiguate_free_base() {
            assert_eq!(disambiguate("hello", &taken(&["other"])), "hello");
        }

        #[test]
        fn test_disambiguate_picks_smallest_free_suffix() {
            assert_eq!(disambiguate("hello", &taken(&["hello"])), "hello-1");
            assert_eq!(
                disambiguate("hello", &taken(&["hello", "hello-1", "hello-3"])),
                "hello-2"
            );
        }

        #[test]
        fn test_disambiguate_skips_reserved() {
            assert_eq!(disambiguate("new", &HashSet::new()), "new-1");
        }

        #[test]
        fn test_disambiguate_keeps_suffix_within_max_length() {
            let base = "a".repeat(MAX_SLUG_LENGTH);
            let slug = disambiguate(&base, &taken(&[base.as_str()]));
            assert_eq!(slug.len(), MAX_SLUG_LENGTH);
            assert!(slug.ends_with("-1"));
        }
    }

    mod markdown_tests {
        use crate::services::markdown::MarkdownRenderer;

        #[test]
        fn test_render_basic_markdown() {
            let html = MarkdownRenderer::new().render("# Hello World");
            assert!(html.contains("<h1>"));
            assert!(html.contains("Hello World"));
        }

        #[test]
        fn test_render_bold_italic() {
            let html = MarkdownRenderer::new().render("**bold** and *italic*");
            assert!(html.contains("<strong>bold</strong>"));
            assert!(html.contains("<em>italic</em>"));
        }

        #[test]
        fn test_render_table() {
            let html = MarkdownRenderer::new().render("| A | B |\n|---|---|\n| 1 | 2 |");
            assert!(html.contains("<table>"));
            assert!(html.contains("<td>"));
        }

        #[test]
        fn test_render_strikethrough() {
            let html = MarkdownRenderer::new().render("~~deleted~~");
            assert!(html.contains("<del>deleted</del>"));
        }

        #[test]
        fn test_render_strips_scripts() {
            let html = MarkdownRenderer::new().render("hi <script>alert(1)</script>");
            assert!(!html.contains("<script>"));
        }

        #[test]
        fn test_generate_excerpt_short_text() {
            let excerpt = MarkdownRenderer::new().generate_excerpt("Short text", 100);
            assert_eq!(excerpt, "Short text");
        }

        #[test]
        fn test_generate_excerpt_truncation() {
            let long_text = "This is a very long text that needs to be truncated because it exceeds the limit.";
            let excerpt = MarkdownRenderer::new().generate_excerpt(long_text, 30);
            assert!(excerpt.len() < long_text.len());
            assert!(excerpt.ends_with("..."));
        }

        #[test]
        fn test_generate_excerpt_ignores_headers() {
            let excerpt = MarkdownRenderer::new().generate_excerpt("# Header\nThis is content", 100);
            assert!(!excerpt.contains('#'));
            assert_eq!(excerpt, "This is content");
        }
    }

    mod image_tests {
        use crate::services::image::{
            bounded_dimensions, normalized_filename, sniff_image, transcode,
        };
        use std::io::Cursor;

        fn png(width: u32, height: u32) -> Vec<u8> {
            let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 40, 40]));
            let mut buf = Vec::new();
            image::DynamicImage::ImageRgb8(img)
                .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
                .unwrap();
            buf
        }

        #[test]
        fn test_bounded_dimensions_keeps_small_images() {
            assert_eq!(bounded_dimensions(640, 480, 800), (640, 480));
            assert_eq!(bounded_dimensions(800, 800, 800), (800, 800));
        }

        #[test]
        fn test_bounded_dimensions_landscape() {
            assert_eq!(bounded_dimensions(1600, 1200, 800), (800, 600));
            assert_eq!(bounded_dimensions(400, 200, 100), (100, 50));
        }

        #[test]
        fn test_bounded_dimensions_portrait() {
            assert_eq!(bounded_dimensions(1000, 2000, 800), (400, 800));
        }

        #[test]
        fn test_bounded_dimensions_never_zero() {
            assert_eq!(bounded_dimensions(10_000, 3, 100), (100, 1));
        }

        #[test]
        fn test_normalized_filename() {
            assert_eq!(normalized_filename("photo.final.JPG"), "photo.final.webp");
            assert_eq!(normalized_filename("cat.png"), "cat.webp");
            assert_eq!(normalized_filename("noext"), "noext.webp");
            assert_eq!(normalized_filename(""), "image.webp");
        }

        #[test]
        fn test_sniff_image() {
            assert_eq!(sniff_image(&png(2, 2)), Some(("image/png", "png")));
            assert_eq!(sniff_image(b"definitely not an image"), None);
            assert_eq!(sniff_image(b"%PDF-1.7 whatever"), None);
        }

        #[test]
        fn test_transcode_bounds_and_converts() {
            let out = transcode(&png(400, 200), 100).unwrap();
            assert_eq!((out.width, out.height), (100, 50));
            assert_eq!(sniff_image(&out.data).map(|(mime, _)| mime), Some("image/webp"));
        }

        #[test]
        fn test_transcode_rejects_garbage() {
            assert!(transcode(b"garbage bytes", 100).is_err());
        }
    }

    mod config_tests {
        use crate::config::parse_size;
        use crate::Config;

        const MINIMAL: &str = r#"
[site]
title = "Test"
url = "http://localhost:3000/"

[database]
path = "./data/test.db"

[media]
storage_dir = "./data/media"
"#;

        #[test]
        fn test_parse_size() {
            assert_eq!(parse_size("10MB").unwrap(), 10 * 1024 * 1024);
            assert_eq!(parse_size("512kb").unwrap(), 512 * 1024);
            assert_eq!(parse_size("1GB").unwrap(), 1024 * 1024 * 1024);
            assert_eq!(parse_size("42").unwrap(), 42);
            assert!(parse_size("lots").is_err());
        }

        #[test]
        fn test_parse_size_rejects_overflow() {
            assert!(parse_size(&format!("{}GB", usize::MAX)).is_err());
            assert!(parse_size("17179869184GB").is_err());
            assert_eq!(parse_size(&usize::MAX.to_string()).unwrap(), usize::MAX);
        }

        #[test]
        fn test_defaults_apply() {
            let config: Config = toml::from_str(MINIMAL).unwrap();
            config.validate().unwrap();
            assert_eq!(config.images.max_dimension, 800);
            assert_eq!(config.jobs.max_attempts, 3);
            assert_eq!(config.sitemap.path, "./public/sitemap.xml");
            assert!(!config.site.production);
            assert_eq!(config.media.max_upload_bytes().unwrap(), 10 * 1024 * 1024);
        }

        #[test]
        fn test_base_url_trims_trailing_slash() {
            let config: Config = toml::from_str(MINIMAL).unwrap();
            assert_eq!(config.base_url(), "http://localhost:3000");
        }

        #[test]
        fn test_validate_rejects_bad_values() {
            let mut config: Config = toml::from_str(MINIMAL).unwrap();
            config.site.url = "ftp://example.com".to_string();
            assert!(config.validate().is_err());

            let mut config: Config = toml::from_str(MINIMAL).unwrap();
            config.images.max_dimension = 0;
            assert!(config.validate().is_err());

            let mut config: Config = toml::from_str(MINIMAL).unwrap();
            config.jobs.max_attempts = 0;
            assert!(config.validate().is_err());
        }
    }

    mod change_detection_tests {
        use crate::models::{Article, ArticleField, ImageUpload, UpdateArticle};
        use crate::services::article::{changed_fields, should_regenerate_slug};

        fn article() -> Article {
            Article {
                id: 1,
                title: "Hello World".to_string(),
                content: "Body".to_string(),
                slug: "hello-world".to_string(),
                meta_description: None,
                image: None,
                created_at: "2024-01-01T00:00:00+00:00".to_string(),
                updated_at: "2024-01-01T00:00:00+00:00".to_string(),
            }
        }

        #[test]
        fn test_content_only_change() {
            let input = UpdateArticle {
                content: Some("New body".to_string()),
                ..Default::default()
            };
            let changed = changed_fields(&article(), &input);
            assert_eq!(changed, vec![ArticleField::Content]);
            assert!(!should_regenerate_slug(&changed));
        }

        #[test]
        fn test_title_change_regenerates_slug() {
            let input = UpdateArticle {
                title: Some("Goodbye".to_string()),
                ..Default::default()
            };
            let changed = changed_fields(&article(), &input);
            assert_eq!(changed, vec![ArticleField::Title]);
            assert!(should_regenerate_slug(&changed));
        }

        #[test]
        fn test_resubmitted_values_are_not_changes() {
            let input = UpdateArticle {
                title: Some("  Hello World ".to_string()),
                content: Some("Body".to_string()),
                slug: Some("Hello World".to_string()),
                meta_description: Some("   ".to_string()),
                image: None,
            };
            assert!(changed_fields(&article(), &input).is_empty());
        }

        #[test]
        fn test_image_is_always_a_change() {
            let input = UpdateArticle {
                image: Some(ImageUpload {
                    filename: "a.png".to_string(),
                    data: vec![1, 2, 3],
                }),
                ..Default::default()
            };
            let changed = changed_fields(&article(), &input);
            assert_eq!(changed, vec![ArticleField::Image]);
            assert!(!should_regenerate_slug(&changed));
        }

        #[test]
        fn test_field_names_round_trip() {
            for field in ArticleField::ALL {
                assert_eq!(ArticleField::from_name(field.name()), Some(field));
            }
            assert_eq!(ArticleField::from_name("admin"), None);
        }
    }

    mod error_tests {
        use crate::services::error::{ArticleError, FieldError};

        #[test]
        fn test_validation_message_lists_fields() {
            let err = ArticleError::Validation(vec![
                FieldError::new("title", "can't be blank"),
                FieldError::new("content", "can't be blank"),
            ]);
            assert_eq!(
                err.to_string(),
                "validation failed: title can't be blank, content can't be blank"
            );
            assert_eq!(err.field_errors().len(), 2);
        }

        #[test]
        fn test_non_validation_errors_have_no_field_errors() {
            let err = ArticleError::NotFound("x".to_string());
            assert!(err.field_errors().is_empty());
        }
    }

    mod blob_tests {
        use crate::services::blob::{checksum, key_stem, BlobStore};

        #[test]
        fn test_put_download_delete() {
            let dir = tempfile::tempdir().unwrap();
            let blobs = BlobStore::open(dir.path()).unwrap();

            let stored = blobs.put(b"hello", "txt").unwrap();
            assert!(stored.key.ends_with(".txt"));
            assert_eq!(stored.byte_size, 5);
            assert_eq!(stored.checksum, checksum(b"hello"));
            assert_eq!(blobs.download(&stored.key).unwrap(), b"hello");

            blobs.delete(&stored.key).unwrap();
            assert!(!blobs.exists(&stored.key));
            // Deleting again is not an error.
            blobs.delete(&stored.key).unwrap();
        }

        #[test]
        fn test_rejects_path_traversal() {
            let dir = tempfile::tempdir().unwrap();
            let blobs = BlobStore::open(dir.path()).unwrap();
            assert!(blobs.path("../secret").is_err());
            assert!(blobs.path("a/b.png").is_err());
            assert!(blobs.path("").is_err());
        }

        #[test]
        fn test_key_stem() {
            assert_eq!(key_stem("abc.webp"), "abc");
            assert_eq!(key_stem("abc"), "abc");
        }

        #[test]
        fn test_checksum_is_sha256_hex() {
            assert_eq!(
                checksum(b""),
                "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
            );
        }
    }

    mod jobs_tests {
        use crate::jobs::{Job, JobContext, JobQueue, JobRunner, RetryPolicy};
        use crate::models::{CreateArticle, ImageUpload};
        use crate::services::article;
        use crate::services::blob::BlobStore;
        use crate::Database;
        use std::io::Cursor;
        use std::time::Duration;

        fn png(width: u32, height: u32) -> Vec<u8> {
            let img = image::RgbImage::from_pixel(width, height, image::Rgb([10, 120, 200]));
            let mut buf = Vec::new();
            image::DynamicImage::ImageRgb8(img)
                .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
                .unwrap();
            buf
        }

        #[test]
        fn test_retry_delay_grows_with_jitter() {
            let policy = RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(100),
            };
            let first = policy.delay_for(1);
            assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(150));
            let third = policy.delay_for(3);
            assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(450));
        }

        #[test]
        fn test_retry_delay_saturates() {
            let policy = RetryPolicy {
                max_attempts: u32::MAX,
                base_delay: Duration::from_millis(u64::MAX),
            };
            assert!(policy.delay_for(10) >= Duration::from_millis(u64::MAX));
            assert!(policy.delay_for(u32::MAX) >= Duration::from_millis(u64::MAX));

            let small = RetryPolicy {
                max_attempts: u32::MAX,
                base_delay: Duration::from_millis(1),
            };
            assert!(small.delay_for(u32::MAX) >= Duration::from_millis(1 << 16));
        }

        #[tokio::test]
        async fn test_concurrent_normalizations_of_one_article() {
            let db = Database::open_memory(&format!("jobs_{}", rand::random::<u64>())).unwrap();
            db.migrate().unwrap();
            let dir = tempfile::tempdir().unwrap();
            let blobs = BlobStore::open(dir.path().join("blobs")).unwrap();

            let (queue, _rx) = JobQueue::channel();
            let created = article::create_article(
                &db,
                &blobs,
                &queue,
                CreateArticle {
                    title: "Twice".to_string(),
                    content: "Body".to_string(),
                    image: Some(ImageUpload {
                        filename: "twice.png".to_string(),
                        data: png(300, 120),
                    }),
                    ..Default::default()
                },
            )
            .unwrap();

            let runner = JobRunner::new(
                JobContext {
                    db: db.clone(),
                    blobs: blobs.clone(),
                    max_dimension: 60,
                    base_url: "http://blog.test".to_string(),
                    sitemap_path: dir.path().join("sitemap.xml"),
                },
                RetryPolicy {
                    max_attempts: 1,
                    base_delay: Duration::from_millis(1),
                },
            );

            let job = Job::NormalizeImage {
                article_id: created.id,
            };
            let (first, second) = tokio::join!(runner.run(job.clone()), runner.run(job));
            first.unwrap();
            second.unwrap();

            let image = article::get_attachment(&db, created.id).unwrap().unwrap();
            assert!(image.is_webp());
            assert_eq!((image.width, image.height), (Some(60), Some(24)));

            let webp_blobs: Vec<_> = std::fs::read_dir(blobs.root())
                .unwrap()
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_file())
                .map(|e| e.file_name().to_string_lossy().to_string())
                .collect();
            assert_eq!(webp_blobs, vec![image.blob_key.clone()]);
            assert!(webp_blobs[0].ends_with(".webp"));
            assert_eq!(runner.tracked_locks(), 0);
        }

        #[test]
        fn test_queue_delivers_in_order() {
            let (queue, mut rx) = JobQueue::channel();
            queue.enqueue(Job::NormalizeImage { article_id: 7 });
            queue.enqueue(Job::RefreshSitemap);
            assert_eq!(rx.try_recv().unwrap(), Job::NormalizeImage { article_id: 7 });
            assert_eq!(rx.try_recv().unwrap(), Job::RefreshSitemap);
        }

        #[test]
        fn test_job_display() {
            assert_eq!(Job::NormalizeImage { article_id: 3 }.to_string(), "normalize-image(3)");
            assert_eq!(Job::RefreshSitemap.to_string(), "refresh-sitemap");
        }
    }

    mod slug_retry_tests {
        use crate::services::article::insert_with_retries;
        use crate::services::error::ArticleError;
        use crate::Database;
        use rusqlite::Connection;

        const NOW: &str = "2024-01-01T00:00:00+00:00";

        fn insert(conn: &Connection, slug: &str) -> rusqlite::Result<i64> {
            conn.execute(
                "INSERT INTO articles (title, content, slug, created_at, updated_at) VALUES ('T', 'C', ?, ?, ?)",
                (slug, NOW, NOW),
            )?;
            Ok(conn.last_insert_rowid())
        }

        fn db_with_dup() -> Database {
            let db = Database::open_memory(&format!("slug_retry_{}", rand::random::<u64>())).unwrap();
            db.migrate().unwrap();
            insert(&db.get().unwrap(), "dup").unwrap();
            db
        }

        #[test]
        fn test_gives_up_after_bounded_attempts() {
            let db = db_with_dup();
            let mut calls = 0;
            let result = insert_with_retries(&db, "fresh", |conn, _slug| {
                calls += 1;
                Ok(insert(conn, "dup")?)
            });

            match result {
                Err(ArticleError::SlugConflict { base, attempts }) => {
                    assert_eq!(base, "fresh");
                    assert_eq!(attempts, 5);
                }
                other => panic!("expected SlugConflict, got {:?}", other),
            }
            assert_eq!(calls, 5);

            let count: i64 = db
                .get()
                .unwrap()
                .query_row("SELECT COUNT(*) FROM articles", [], |r| r.get(0))
                .unwrap();
            assert_eq!(count, 1);
        }

        #[test]
        fn test_retries_after_a_collision() {
            let db = db_with_dup();
            let mut calls = 0;
            let id = insert_with_retries(&db, "fresh", |conn, slug| {
                calls += 1;
                let slug = if calls == 1 { "dup" } else { slug };
                Ok(insert(conn, slug)?)
            })
            .unwrap();

            assert_eq!(calls, 2);
            let slug: String = db
                .get()
                .unwrap()
                .query_row("SELECT slug FROM articles WHERE id = ?", [id], |r| r.get(0))
                .unwrap();
            assert_eq!(slug, "fresh");
        }

        #[test]
        fn test_other_errors_are_not_retried() {
            let db = db_with_dup();
            let mut calls = 0;
            let result = insert_with_retries(&db, "fresh", |_conn, _slug| {
                calls += 1;
                Err(ArticleError::NotFound("gone".to_string()))
            });
            assert!(matches!(result, Err(ArticleError::NotFound(_))));
            assert_eq!(calls, 1);
        }
    }

    mod sitemap_tests {
        use crate::services::sitemap::{article_url, render, SitemapEntry};

        #[test]
        fn test_article_url() {
            assert_eq!(
                article_url("https://example.com/", "hello"),
                "https://example.com/articles/hello"
            );
        }

        #[test]
        fn test_render_escapes_and_lists_entries() {
            let xml = render(&[SitemapEntry {
                loc: "https://example.com/articles/a?x=1&y=2".to_string(),
                lastmod: "2024-01-01T00:00:00+00:00".to_string(),
            }]);
            assert!(xml.starts_with("<?xml"));
            assert!(xml.contains("<loc>https://example.com/articles/a?x=1&amp;y=2</loc>"));
            assert!(xml.contains("<lastmod>2024-01-01T00:00:00+00:00</lastmod>"));
            assert_eq!(xml.matches("<url>").count(), 1);
        }

        #[test]
        fn test_render_empty() {
            let xml = render(&[]);
            assert!(xml.contains("<urlset"));
            assert!(!xml.contains("<url>"));
        }
    }
}
