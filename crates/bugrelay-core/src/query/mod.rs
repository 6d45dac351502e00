pub mod cache;
pub mod guards;
pub mod listing;
pub mod relevance;
