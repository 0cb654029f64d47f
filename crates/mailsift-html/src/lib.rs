//! # mailsift-html
//!
//! Structured content extraction from HTML email bodies.
//!
//! ## Features
//!
//! - **Table rows**: Cell text of the first `<table>` in a document, one
//!   [`TableRow`] per `<tr>`
//! - **Previews**: Whitespace-compacted text snippets for list views
//! - **Tolerant parsing**: Malformed markup is repaired by an HTML5 tree
//!   builder, never rejected
//!
//! ## Quick Start
//!
//! ```
//! use mailsift_html::extract_rows;
//!
//! let body = "<table><tr><th> Item </th><th>Qty</th></tr><tr><td>Bolts</td><td>40</td></tr></table>";
//! let rows = extract_rows(body);
//!
//! assert_eq!(rows.len(), 2);
//! assert_eq!(rows[0].cells(), ["Item", "Qty"]);
//! assert_eq!(rows[1].cells(), ["Bolts", "40"]);
//! ```
//!
//! Extraction is pure: the same body always yields the same rows, so callers
//! re-run it on demand instead of storing the result.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod table;
mod text;

pub use table::{TableRow, extract_rows};
pub use text::html_to_preview;
