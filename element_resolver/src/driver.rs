//! Driver capability consumed by the resolver.
//!
//! The remote automation session is opaque; the resolver only needs these
//! request/response operations. None of them are cached by the driver.

use crate::error::DriverResult;
use async_trait::async_trait;
use element_resolver_types::{ElementCategory, ElementRef, LocatorStrategy, IDENTIFIER_ATTRIBUTES};

/// Read-only attribute access on located elements.
///
/// This is all the pattern learner and the cache indices need.
#[async_trait]
pub trait AttributeReader: Send + Sync {
    /// Read a named attribute. `Ok(None)` when the element has no such attribute.
    async fn read_attribute(&self, element: &ElementRef, name: &str)
        -> DriverResult<Option<String>>;

    /// Read the platform class / type name of the element.
    async fn read_class_name(&self, element: &ElementRef) -> DriverResult<String>;

    /// Read the element category through the class-name table.
    async fn read_category(&self, element: &ElementRef) -> DriverResult<ElementCategory> {
        Ok(ElementCategory::from_class_name(
            &self.read_class_name(element).await?,
        ))
    }
}

/// Full driver capability: lookups plus state reads.
#[async_trait]
pub trait Driver: AttributeReader {
    /// Find the first element matching the query.
    async fn find_one(&self, strategy: LocatorStrategy, selector: &str)
        -> DriverResult<ElementRef>;

    /// Find every element matching the query. An empty vector is not an error.
    async fn find_all(
        &self,
        strategy: LocatorStrategy,
        selector: &str,
    ) -> DriverResult<Vec<ElementRef>>;

    /// Whether the element is currently rendered on screen.
    async fn is_visible(&self, element: &ElementRef) -> DriverResult<bool>;

    /// Whether the element accepts interaction.
    async fn is_enabled(&self, element: &ElementRef) -> DriverResult<bool>;

    /// Visible text content of the element.
    async fn read_text(&self, element: &ElementRef) -> DriverResult<String>;
}

/// Best-effort read of the element's stable identifier.
///
/// Tries each recognized identifier attribute in order; read errors and
/// empty values are skipped.
pub async fn read_identifier<R>(reader: &R, element: &ElementRef) -> Option<String>
where
    R: AttributeReader + ?Sized,
{
    for name in IDENTIFIER_ATTRIBUTES {
        match reader.read_attribute(element, name).await {
            Ok(Some(value)) if !value.trim().is_empty() => return Some(value),
            Ok(_) => {}
            Err(e) => log::trace!("identifier read {name} failed on {element}: {e}"),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockDriver, MockElement};

    #[tokio::test]
    async fn test_read_identifier_skips_failures_and_blanks() {
        let driver = MockDriver::new();
        let element = driver.add(
            MockElement::new("XCUIElementTypeButton")
                .attr("identifier", "  ")
                .attr("resource-id", "com.app:id/login")
                .failing_attr("accessibilityIdentifier"),
        );

        assert_eq!(
            read_identifier(&driver, &element).await.as_deref(),
            Some("com.app:id/login")
        );
    }

    #[tokio::test]
    async fn test_read_category_maps_class_names() {
        let driver = MockDriver::new();
        let element = driver.add(MockElement::new("XCUIElementTypeSecureTextField"));
        assert_eq!(
            driver.read_category(&element).await,
            Ok(ElementCategory::SecureTextField)
        );
    }
}
