//! Text cleanup on both sides of the translation model.

mod english;
mod korean;

pub use english::clean_english;
pub use korean::clean_korean;
