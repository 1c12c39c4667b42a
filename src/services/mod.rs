pub mod article;
pub mod blob;
pub mod error;
pub mod image;
pub mod markdown;
pub mod normalize;
pub mod sitemap;
pub mod slug;
