// src/ingest/providers/mod.rs
pub mod linkedin_guest;
pub mod rss_board;

pub use linkedin_guest::LinkedInGuestAdapter;
pub use rss_board::RssBoardAdapter;
