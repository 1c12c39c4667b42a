use slug::slugify;
use std::collections::HashSet;

pub const MAX_SLUG_LENGTH: usize = 200;

const FALLBACK_SLUG: &str = "article";

/// Slugs that would shadow a fixed route under `/articles/`.
pub const RESERVED_SLUGS: &[&str] = &["new"];

pub fn generate_slug(title: &str) -> String {
    let slug = slugify(title);
    if slug.is_empty() {
        return FALLBACK_SLUG.to_string();
    }
    truncate_slug(&slug, MAX_SLUG_LENGTH)
}

pub fn validate_slug(slug: &str) -> bool {
    if slug.is_empty() || slug.len() > MAX_SLUG_LENGTH {
        return false;
    }
    slug.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Normalizes a slug typed in by the author. `None` when nothing usable is
/// left.
pub fn normalize_slug(input: &str) -> Option<String> {
    let slug = truncate_slug(&slugify(input), MAX_SLUG_LENGTH);
    validate_slug(&slug).then_some(slug)
}

/// Returns `base` when free, otherwise the smallest `base-N` (N >= 1) that
/// is neither in `taken` nor reserved. The suffix always fits within
/// `MAX_SLUG_LENGTH`.
pub fn disambiguate(base: &str, taken: &HashSet<String>) -> String {
    let is_free = |s: &str| !taken.contains(s) && !RESERVED_SLUGS.contains(&s);

    if is_free(base) {
        return base.to_string();
    }

    let mut n: u64 = 1;
    loop {
        let suffix = format!("-{}", n);
        let stem = truncate_slug(base, MAX_SLUG_LENGTH - suffix.len());
        let candidate = format!("{}{}", stem, suffix);
        if is_free(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn truncate_slug(slug: &str, max: usize) -> String {
    if slug.len() <= max {
        return slug.to_string();
    }
    // Slugs are ASCII, byte slicing is safe.
    slug[..max].trim_end_matches('-').to_string()
}
