pub mod rss;
pub mod youtube;
