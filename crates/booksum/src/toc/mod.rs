//! Chapter structure detection.

pub mod extractor;
pub mod heading;
pub mod numerals;

pub use extractor::{validate_vision, TocAttempt, TocChapter, TocError, TocExtractor, TocOutcome};
pub use heading::{HeadingKind, HeadingMatch};
