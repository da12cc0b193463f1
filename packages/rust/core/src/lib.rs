//! Pipeline orchestration for bidforge.
//!
//! Two entry points:
//! - [`pipeline::build_document`] — requirements → ranking → merge → render → PDF
//! - [`extractor::extract_required_documents`] — tender analysis into a
//!   submission checklist

pub mod extractor;
pub mod pipeline;
