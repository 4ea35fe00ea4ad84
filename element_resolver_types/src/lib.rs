//! # Element Resolver Types
//!
//! Pure data types and helpers shared by `element_resolver`: locator
//! strategies, cache keys, element categories, identifier templates and the
//! text scoring used when ranking candidates. No I/O and no async.

#![warn(missing_docs)]

pub mod category;
pub mod pattern;
pub mod strategy;
pub mod text;

pub use category::{ElementCategory, Platform};
pub use pattern::{
    ElementSample, IdentifierTemplate, LearnedTemplate, PatternModel, Prediction, Transform,
    MIN_TEMPLATE_CONFIDENCE,
};
pub use strategy::{CacheKey, ElementRef, LocatorStrategy, UnknownStrategy, INDEX_MARKER, KEY_SEPARATOR};
pub use text::{
    edit_distance, fuzzy_score, glob_match, looks_like_identifier, xpath_literal, HubKind,
};

/// Attributes that carry an application-assigned stable identifier.
pub const IDENTIFIER_ATTRIBUTES: &[&str] = &["identifier", "accessibilityIdentifier", "resource-id"];

/// Attributes whose values tend to correlate with the stable identifier.
pub const CORRELATED_ATTRIBUTES: &[&str] = &["label", "text", "name", "description"];
