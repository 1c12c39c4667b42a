mod article;
mod attachment;

pub use article::*;
pub use attachment::*;
