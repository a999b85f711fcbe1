pub mod defs;

pub use defs::{Enricher, Enrichment, InputItem, LiveSourceSpec, Transport};
