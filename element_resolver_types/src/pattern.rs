//! Identifier templates and the per-category pattern model.
//!
//! A template is a closed transformation over one source attribute plus a
//! literal prefix and suffix. Nothing here is evaluated dynamically, so every
//! prediction can be traced back to the rendered template string.

use crate::category::ElementCategory;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Minimum confidence for a learned template to be kept.
pub const MIN_TEMPLATE_CONFIDENCE: f64 = 0.5;

/// Transformation applied to the source attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    /// Value used as-is.
    Identity,
    /// Lowercased.
    Lowercase,
    /// Lowercased, whitespace runs replaced with `_`.
    SnakeCase,
    /// `Sign in now` → `signInNow`.
    CamelCase,
}

impl Transform {
    /// Apply the transformation.
    pub fn apply(&self, value: &str) -> String {
        let value = value.trim();
        match self {
            Self::Identity => value.to_string(),
            Self::Lowercase => value.to_lowercase(),
            Self::SnakeCase => value
                .split_whitespace()
                .map(str::to_lowercase)
                .collect::<Vec<_>>()
                .join("_"),
            Self::CamelCase => {
                let mut out = String::with_capacity(value.len());
                let words = value
                    .split(|c: char| c.is_whitespace() || c == '_' || c == '-')
                    .filter(|w| !w.is_empty());
                for (i, word) in words.enumerate() {
                    let lower = word.to_lowercase();
                    if i == 0 {
                        out.push_str(&lower);
                        continue;
                    }
                    let mut chars = lower.chars();
                    if let Some(first) = chars.next() {
                        out.extend(first.to_uppercase());
                        out.push_str(chars.as_str());
                    }
                }
                out
            }
        }
    }

    fn tag(&self) -> &'static str {
        match self {
            Self::Identity => "",
            Self::Lowercase => "|lower",
            Self::SnakeCase => "|snake",
            Self::CamelCase => "|camel",
        }
    }
}

/// `prefix + transform(source) + suffix`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentifierTemplate {
    /// Attribute the value is read from.
    pub source: String,
    /// Transformation applied to the attribute value.
    pub transform: Transform,
    /// Literal prefix.
    #[serde(default)]
    pub prefix: String,
    /// Literal suffix.
    #[serde(default)]
    pub suffix: String,
}

impl IdentifierTemplate {
    /// Build a template.
    pub fn new(
        source: impl Into<String>,
        transform: Transform,
        prefix: impl Into<String>,
        suffix: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            transform,
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    /// Render an identifier from an attribute value.
    pub fn render(&self, value: &str) -> Option<String> {
        let core = self.transform.apply(value);
        if core.is_empty() {
            return None;
        }
        Some(format!("{}{}{}", self.prefix, core, self.suffix))
    }

    /// Find the first template, in fixed order, that turns `value` into `identifier`.
    ///
    /// Order: direct copy, lowercase + suffix, prefix + lowercase,
    /// snake case + suffix, camel case + suffix.
    pub fn infer(source: &str, value: &str, identifier: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() || identifier.is_empty() {
            return None;
        }

        if value == identifier {
            return Some(Self::new(source, Transform::Identity, "", ""));
        }

        let lower = Transform::Lowercase.apply(value);
        if let Some(suffix) = identifier.strip_prefix(lower.as_str()) {
            return Some(Self::new(source, Transform::Lowercase, "", suffix));
        }
        if let Some(prefix) = identifier.strip_suffix(lower.as_str()) {
            return Some(Self::new(source, Transform::Lowercase, prefix, ""));
        }

        let snake = Transform::SnakeCase.apply(value);
        if !snake.is_empty() {
            if let Some(suffix) = identifier.strip_prefix(snake.as_str()) {
                return Some(Self::new(source, Transform::SnakeCase, "", suffix));
            }
        }

        let camel = Transform::CamelCase.apply(value);
        if !camel.is_empty() {
            if let Some(suffix) = identifier.strip_prefix(camel.as_str()) {
                return Some(Self::new(source, Transform::CamelCase, "", suffix));
            }
        }

        None
    }
}

impl fmt::Display for IdentifierTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{{{}{}}}{}",
            self.prefix,
            self.source,
            self.transform.tag(),
            self.suffix
        )
    }
}

/// A retained template and the share of examined elements it explained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedTemplate {
    /// The dominant template.
    pub template: IdentifierTemplate,
    /// Matches / examined, in `[0, 1]`.
    pub confidence: f64,
}

/// Attributes of one element whose identifier is known, used for learning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementSample {
    /// Element category.
    pub category: ElementCategory,
    /// Known stable identifier.
    pub identifier: String,
    /// Correlated attribute values by name.
    pub attributes: BTreeMap<String, String>,
}

/// Result of predicting an identifier for an element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Predicted identifier, if any template applied.
    pub identifier: Option<String>,
    /// Confidence of the template used, 0 when nothing applied.
    pub confidence: f64,
    /// Rendered template, for auditing.
    pub template: Option<String>,
}

impl Prediction {
    /// No prediction.
    pub fn none() -> Self {
        Self {
            identifier: None,
            confidence: 0.0,
            template: None,
        }
    }

    /// Whether an identifier was predicted.
    pub fn is_some(&self) -> bool {
        self.identifier.is_some()
    }
}

/// Per-category map of attribute name to its learned template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternModel {
    categories: BTreeMap<ElementCategory, BTreeMap<String, LearnedTemplate>>,
}

impl PatternModel {
    /// Empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a model from samples, considering only `attributes`.
    ///
    /// For each category and attribute, the most frequent matching template
    /// wins; ties go to the template seen first. Its confidence is the
    /// number of matches over the number of samples carrying the attribute.
    pub fn learn(samples: &[ElementSample], attributes: &[&str], min_confidence: f64) -> Self {
        let mut by_category: BTreeMap<ElementCategory, Vec<&ElementSample>> = BTreeMap::new();
        for sample in samples {
            by_category.entry(sample.category).or_default().push(sample);
        }

        let mut model = Self::new();

        for (category, group) in by_category {
            for attribute in attributes {
                let mut examined = 0usize;
                let mut counts: HashMap<IdentifierTemplate, (usize, usize)> = HashMap::new();

                for sample in &group {
                    let Some(value) = sample.attributes.get(*attribute) else {
                        continue;
                    };
                    if value.trim().is_empty() {
                        continue;
                    }
                    examined += 1;

                    if let Some(template) =
                        IdentifierTemplate::infer(attribute, value, &sample.identifier)
                    {
                        let first_seen = counts.len();
                        counts.entry(template).or_insert((0, first_seen)).0 += 1;
                    }
                }

                if examined == 0 {
                    continue;
                }

                let dominant = counts
                    .into_iter()
                    .max_by(|(_, (a, a_seen)), (_, (b, b_seen))| {
                        a.cmp(b).then_with(|| b_seen.cmp(a_seen))
                    });

                if let Some((template, (count, _))) = dominant {
                    let confidence = count as f64 / examined as f64;
                    if confidence >= min_confidence {
                        model.insert(
                            category,
                            attribute.to_string(),
                            LearnedTemplate {
                                template,
                                confidence,
                            },
                        );
                    }
                }
            }
        }

        model
    }

    /// Insert or replace a learned template.
    pub fn insert(
        &mut self,
        category: ElementCategory,
        attribute: impl Into<String>,
        learned: LearnedTemplate,
    ) {
        self.categories
            .entry(category)
            .or_default()
            .insert(attribute.into(), learned);
    }

    /// Retained templates for a category, keyed by attribute.
    pub fn templates_for(
        &self,
        category: ElementCategory,
    ) -> impl Iterator<Item = (&str, &LearnedTemplate)> {
        self.categories
            .get(&category)
            .into_iter()
            .flat_map(|attrs| attrs.iter().map(|(k, v)| (k.as_str(), v)))
    }

    /// Learned template for one category and attribute.
    pub fn get(&self, category: ElementCategory, attribute: &str) -> Option<&LearnedTemplate> {
        self.categories.get(&category)?.get(attribute)
    }

    /// Categories with at least one retained template.
    pub fn categories(&self) -> impl Iterator<Item = ElementCategory> + '_ {
        self.categories.keys().copied()
    }

    /// Total retained templates.
    pub fn len(&self) -> usize {
        self.categories.values().map(BTreeMap::len).sum()
    }

    /// Whether nothing was retained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Predict an identifier from an element's live attributes.
    ///
    /// Evaluates every retained template for `category` and keeps the one
    /// with the highest confidence.
    pub fn predict(
        &self,
        category: ElementCategory,
        attributes: &BTreeMap<String, String>,
    ) -> Prediction {
        let mut best = Prediction::none();

        for (attribute, learned) in self.templates_for(category) {
            let Some(value) = attributes.get(attribute) else {
                continue;
            };
            let Some(identifier) = learned.template.render(value) else {
                continue;
            };
            if learned.confidence > best.confidence {
                best = Prediction {
                    identifier: Some(identifier),
                    confidence: learned.confidence,
                    template: Some(learned.template.to_string()),
                };
            }
        }

        best
    }

    /// Every identifier the model would derive from `text`, treating it as
    /// the value of each template's source attribute. Highest confidence
    /// first, duplicates removed.
    pub fn candidate_identifiers(&self, text: &str) -> Vec<Prediction> {
        let mut out: Vec<Prediction> = Vec::new();

        for attrs in self.categories.values() {
            for learned in attrs.values() {
                let Some(identifier) = learned.template.render(text) else {
                    continue;
                };
                match out
                    .iter_mut()
                    .find(|p| p.identifier.as_deref() == Some(identifier.as_str()))
                {
                    Some(existing) if existing.confidence >= learned.confidence => {}
                    Some(existing) => {
                        existing.confidence = learned.confidence;
                        existing.template = Some(learned.template.to_string());
                    }
                    None => out.push(Prediction {
                        identifier: Some(identifier),
                        confidence: learned.confidence,
                        template: Some(learned.template.to_string()),
                    }),
                }
            }
        }

        out.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        out
    }
}
