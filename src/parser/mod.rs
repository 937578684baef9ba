pub mod extractor;
pub mod feeds;
pub mod schema;
pub mod trimmer;
pub mod urls;

pub use extractor::{extract, extract_with_report, ExtractionReport};
pub use feeds::detect_existing_feeds;
pub use schema::*;
pub use trimmer::{preview, trim_html, truncate_chars};
pub use urls::{normalize_url, resolve_url};
