//! Pure leaf logic shared across the netwatch engine: risk scoring,
//! tag heuristics, and MAC normalization. No I/O lives here.

pub mod heuristics;
pub mod mac;
pub mod risk;

pub use heuristics::{suggest_tags, TagSuggestion};
pub use mac::normalize_mac;
pub use risk::score;

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
