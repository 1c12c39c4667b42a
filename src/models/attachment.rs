use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ImageAttachment {
    pub id: i64,
    pub article_id: i64,
    pub blob_key: String,
    pub filename: String,
    pub content_type: String,
    pub byte_size: i64,
    pub checksum: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub created_at: String,
}

impl ImageAttachment {
    pub fn is_webp(&self) -> bool {
        self.content_type == "image/webp"
    }
}
