use super::ImageAttachment;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub slug: String,
    pub meta_description: Option<String>,
    pub image: Option<ImageAttachment>,
    pub created_at: String,
    pub updated_at: String,
}

/// The whitelisted fields an article can be written through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArticleField {
    Title,
    Content,
    Slug,
    MetaDescription,
    Image,
}

impl ArticleField {
    pub const ALL: [ArticleField; 5] = [
        Self::Title,
        Self::Content,
        Self::Slug,
        Self::MetaDescription,
        Self::Image,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Content => "content",
            Self::Slug => "slug",
            Self::MetaDescription => "meta_description",
            Self::Image => "image",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }
}

/// An uploaded image before it is stored.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub filename: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateArticle {
    pub title: String,
    pub content: String,
    pub slug: Option<String>,
    pub meta_description: Option<String>,
    pub image: Option<ImageUpload>,
}

/// Partial update; `None` leaves the stored value alone.
#[derive(Debug, Clone, Default)]
pub struct UpdateArticle {
    pub title: Option<String>,
    pub content: Option<String>,
    pub slug: Option<String>,
    pub meta_description: Option<String>,
    pub image: Option<ImageUpload>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArticleSummary {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub meta_description: Option<String>,
    pub has_image: bool,
    pub created_at: String,
    pub updated_at: String,
}
