//! Identifier pattern learning and prediction.
//!
//! Applications often leave controls without a stable identifier. Elements
//! that do have one reveal how the app derives it (usually from the label),
//! and the learned templates let us predict identifiers for the rest.

use crate::driver::{read_identifier, AttributeReader};
use element_resolver_types::{
    ElementRef, ElementSample, PatternModel, Prediction, CORRELATED_ATTRIBUTES,
    MIN_TEMPLATE_CONFIDENCE,
};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Learns identifier templates per element category and applies them.
///
/// Each learning pass replaces the model wholesale. Nothing is persisted.
#[derive(Debug)]
pub struct PatternLearner {
    model: RwLock<PatternModel>,
    attributes: Vec<String>,
    min_confidence: f64,
}

impl Default for PatternLearner {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternLearner {
    /// Create a learner over the default correlated attributes.
    pub fn new() -> Self {
        Self {
            model: RwLock::new(PatternModel::new()),
            attributes: CORRELATED_ATTRIBUTES.iter().map(|s| s.to_string()).collect(),
            min_confidence: MIN_TEMPLATE_CONFIDENCE,
        }
    }

    /// Override the correlated attributes considered.
    pub fn with_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    /// Override the retention threshold.
    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence.clamp(0.0, 1.0);
        self
    }

    /// Read category, identifier and correlated attributes from elements.
    ///
    /// Elements without an identifier or whose category cannot be read are
    /// skipped; individual attribute failures just leave the attribute out.
    pub async fn sample<R>(&self, reader: &R, elements: &[ElementRef]) -> Vec<ElementSample>
    where
        R: AttributeReader + ?Sized,
    {
        let mut samples = Vec::with_capacity(elements.len());

        for element in elements {
            let Some(identifier) = read_identifier(reader, element).await else {
                continue;
            };
            let category = match reader.read_category(element).await {
                Ok(category) => category,
                Err(e) => {
                    log::debug!("skipping {element} in learning pass: {e}");
                    continue;
                }
            };
            let attributes = self.read_correlated(reader, element).await;

            samples.push(ElementSample {
                category,
                identifier,
                attributes,
            });
        }

        samples
    }

    async fn read_correlated<R>(&self, reader: &R, element: &ElementRef) -> BTreeMap<String, String>
    where
        R: AttributeReader + ?Sized,
    {
        let mut attributes = BTreeMap::new();
        for name in &self.attributes {
            match reader.read_attribute(element, name).await {
                Ok(Some(value)) if !value.trim().is_empty() => {
                    attributes.insert(name.clone(), value);
                }
                Ok(_) => {}
                Err(e) => log::trace!("attribute {name} unreadable on {element}: {e}"),
            }
        }
        attributes
    }

    /// Sample `elements` and rebuild the model. Returns the retained template count.
    pub async fn learn<R>(&self, reader: &R, elements: &[ElementRef]) -> usize
    where
        R: AttributeReader + ?Sized,
    {
        let samples = self.sample(reader, elements).await;
        self.learn_from_samples(&samples)
    }

    /// Rebuild the model from pre-read samples. Returns the retained template count.
    pub fn learn_from_samples(&self, samples: &[ElementSample]) -> usize {
        let attributes: Vec<&str> = self.attributes.iter().map(String::as_str).collect();
        let model = PatternModel::learn(samples, &attributes, self.min_confidence);
        let retained = model.len();

        log::debug!(
            "pattern learning: {} samples, {} templates retained",
            samples.len(),
            retained
        );

        *self.model.write() = model;
        retained
    }

    /// Predict an identifier for an element that lacks one.
    ///
    /// Elements that already carry an identifier, or whose category cannot
    /// be read, get [`Prediction::none`].
    pub async fn predict<R>(&self, reader: &R, element: &ElementRef) -> Prediction
    where
        R: AttributeReader + ?Sized,
    {
        if self.model.read().is_empty() {
            return Prediction::none();
        }
        if read_identifier(reader, element).await.is_some() {
            return Prediction::none();
        }

        let category = match reader.read_category(element).await {
            Ok(category) => category,
            Err(e) => {
                log::debug!("prediction skipped for {element}: {e}");
                return Prediction::none();
            }
        };
        let attributes = self.read_correlated(reader, element).await;

        self.model.read().predict(category, &attributes)
    }

    /// Identifiers the model would derive from free text, best first.
    pub fn candidate_identifiers(&self, text: &str) -> Vec<Prediction> {
        self.model.read().candidate_identifiers(text)
    }

    /// Snapshot of the current model.
    pub fn model(&self) -> PatternModel {
        self.model.read().clone()
    }

    /// Whether any template is retained.
    pub fn is_trained(&self) -> bool {
        !self.model.read().is_empty()
    }

    /// Drop the learned model.
    pub fn reset(&self) {
        *self.model.write() = PatternModel::new();
    }
}
