pub mod fragile;
pub mod tester;
pub mod validator;

use scraper::Selector;

pub use fragile::{FragileClass, FragilePredicate, HashedClassPattern};
pub use tester::{SelectorProbe, SelectorTester, TestOutcome, NOT_FOUND};
pub use validator::{ConfigValidator, FlaggedSelector, ValidatedConfig};

/// Compile a CSS selector, turning the parser's borrowed error into an owned message.
pub fn parse_selector(css: &str) -> Result<Selector, String> {
    Selector::parse(css).map_err(|e| e.to_string())
}
