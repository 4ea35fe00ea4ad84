//! Confidence ranking of candidate elements.
//!
//! Scores are additive and clamped to `[0, 1]`:
//!
//! | signal                                   | score        |
//! |------------------------------------------|--------------|
//! | has a stable identifier                  | +0.4         |
//! | identifier contains the text criteria    | +0.1         |
//! | visible                                  | +0.3         |
//! | enabled                                  | +0.1         |
//! | text equals criteria (case-insensitive)  | +0.3         |
//! | text contains / is contained by criteria | +0.2         |
//! | fuzzy mode instead of the two above      | +0.3 × fuzzy |
//!
//! Ranking never blocks resolution: a candidate whose reads fail scores 0,
//! and a batch that cannot be scored in time keeps its original order.

use crate::driver::Driver;
use crate::error::DriverResult;
use element_resolver_types::{fuzzy_score, ElementRef, IDENTIFIER_ATTRIBUTES};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const IDENTIFIER_WEIGHT: f64 = 0.4;
const IDENTIFIER_TEXT_WEIGHT: f64 = 0.1;
const VISIBLE_WEIGHT: f64 = 0.3;
const ENABLED_WEIGHT: f64 = 0.1;
const EXACT_TEXT_WEIGHT: f64 = 0.3;
const PARTIAL_TEXT_WEIGHT: f64 = 0.2;
const FUZZY_TEXT_WEIGHT: f64 = 0.3;

/// A candidate element with its confidence score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    /// The candidate element.
    pub element: ElementRef,
    /// Confidence in `[0, 1]`.
    pub score: f64,
}

/// Scores and orders candidate elements.
#[derive(Debug, Clone)]
pub struct Ranker {
    /// Budget for scoring a whole batch.
    batch_timeout: Duration,
}

impl Default for Ranker {
    fn default() -> Self {
        Self::new()
    }
}

impl Ranker {
    /// Default budget for scoring one batch.
    const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(5);

    /// Create a ranker with the default batch budget.
    pub fn new() -> Self {
        Self {
            batch_timeout: Self::DEFAULT_BATCH_TIMEOUT,
        }
    }

    /// Set the batch scoring budget.
    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }

    /// Score one candidate. Read failures score 0.
    pub async fn score<D>(
        &self,
        driver: &D,
        element: &ElementRef,
        criteria: Option<&str>,
        fuzzy: bool,
    ) -> f64
    where
        D: Driver + ?Sized,
    {
        let criteria = criteria.map(str::trim).filter(|c| !c.is_empty());
        match Self::try_score(driver, element, criteria, fuzzy).await {
            Ok(score) => score.clamp(0.0, 1.0),
            Err(e) => {
                log::debug!("scoring {element} failed, treating as 0: {e}");
                0.0
            }
        }
    }

    async fn try_score<D>(
        driver: &D,
        element: &ElementRef,
        criteria: Option<&str>,
        fuzzy: bool,
    ) -> DriverResult<f64>
    where
        D: Driver + ?Sized,
    {
        let criteria_lower = criteria.map(str::to_lowercase);
        let mut score = 0.0;

        let mut identifier = None;
        for name in IDENTIFIER_ATTRIBUTES {
            if let Some(value) = driver.read_attribute(element, name).await? {
                if !value.trim().is_empty() {
                    identifier = Some(value);
                    break;
                }
            }
        }
        if let Some(identifier) = identifier {
            score += IDENTIFIER_WEIGHT;
            if let Some(criteria) = criteria_lower.as_deref() {
                if identifier.to_lowercase().contains(criteria) {
                    score += IDENTIFIER_TEXT_WEIGHT;
                }
            }
        }

        if driver.is_visible(element).await? {
            score += VISIBLE_WEIGHT;
        }
        if driver.is_enabled(element).await? {
            score += ENABLED_WEIGHT;
        }

        if let (Some(criteria), Some(criteria_lower)) = (criteria, criteria_lower.as_deref()) {
            let mut text = driver.read_text(element).await?;
            if text.trim().is_empty() {
                text = driver
                    .read_attribute(element, "label")
                    .await?
                    .unwrap_or_default();
            }
            let text = text.trim();

            if fuzzy {
                score += FUZZY_TEXT_WEIGHT * fuzzy_score(text, criteria);
            } else if !text.is_empty() {
                let text_lower = text.to_lowercase();
                if text_lower == criteria_lower {
                    score += EXACT_TEXT_WEIGHT;
                } else if text_lower.contains(criteria_lower) || criteria_lower.contains(&text_lower)
                {
                    score += PARTIAL_TEXT_WEIGHT;
                }
            }
        }

        Ok(score)
    }

    /// Order candidates by descending score. Equal scores keep input order.
    ///
    /// If the batch cannot be scored within the budget the candidates come
    /// back in their original order with a score of 0.
    pub async fn rank<D>(
        &self,
        driver: &D,
        candidates: Vec<ElementRef>,
        criteria: Option<&str>,
        fuzzy: bool,
    ) -> Vec<RankedCandidate>
    where
        D: Driver + ?Sized,
    {
        let scoring = async {
            let mut ranked = Vec::with_capacity(candidates.len());
            for element in &candidates {
                let score = self.score(driver, element, criteria, fuzzy).await;
                ranked.push(RankedCandidate {
                    element: element.clone(),
                    score,
                });
            }
            ranked
        };

        match tokio::time::timeout(self.batch_timeout, scoring).await {
            Ok(mut ranked) => {
                ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
                ranked
            }
            Err(_) => {
                log::warn!(
                    "ranking {} candidates exceeded {:?}, keeping original order",
                    candidates.len(),
                    self.batch_timeout
                );
                candidates
                    .into_iter()
                    .map(|element| RankedCandidate {
                        element,
                        score: 0.0,
                    })
                    .collect()
            }
        }
    }

    /// The highest-ranked candidate, if any.
    pub async fn best_match<D>(
        &self,
        driver: &D,
        candidates: Vec<ElementRef>,
        criteria: Option<&str>,
        fuzzy: bool,
    ) -> Option<RankedCandidate>
    where
        D: Driver + ?Sized,
    {
        self.rank(driver, candidates, criteria, fuzzy)
            .await
            .into_iter()
            .next()
    }
}
