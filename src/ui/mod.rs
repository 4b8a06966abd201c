pub mod embeds;
pub mod notice;
