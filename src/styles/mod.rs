//! Stylesheets: generated index files and compilation to CSS

pub mod compile;
pub mod index;

pub use compile::{StyleBuilder, StylePlan};
pub use index::{generate_all, render_index, IndexOutcome};

pub const STYLE_EXTENSION: &str = "scss";
