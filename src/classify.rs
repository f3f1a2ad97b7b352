// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teleflow contributors

//! Image category classification
//!
//! Maps the set of detected object classes for one image to a marketing
//! category. Total over any finite label set and independent of detection
//! order; the enrichment loader derives the category here rather than
//! trusting the collaborator CSV.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Derived category for one image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageCategory {
    /// A person together with at least one product class
    Promotional,
    /// Product classes only
    ProductDisplay,
    /// A person with no product class
    Lifestyle,
    /// Everything else, including zero detections
    Other,
}

impl ImageCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Promotional => "promotional",
            Self::ProductDisplay => "product_display",
            Self::Lifestyle => "lifestyle",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for ImageCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classifier configured with the person label and the product-class set
#[derive(Debug, Clone)]
pub struct ImageClassifier {
    person_class: String,
    product_classes: HashSet<String>,
}

impl ImageClassifier {
    pub fn new(person_class: impl Into<String>, product_classes: &[String]) -> Self {
        Self {
            person_class: person_class.into(),
            product_classes: product_classes.iter().cloned().collect(),
        }
    }

    /// Classify one image from its distinct detected classes.
    ///
    /// Duplicate labels and ordering do not affect the result.
    pub fn classify<'a, I>(&self, detected_classes: I) -> ImageCategory
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut has_person = false;
        let mut has_product = false;

        for class in detected_classes {
            if class == self.person_class {
                has_person = true;
            }
            if self.product_classes.contains(class) {
                has_product = true;
            }
        }

        match (has_person, has_product) {
            (true, true) => ImageCategory::Promotional,
            (false, true) => ImageCategory::ProductDisplay,
            (true, false) => ImageCategory::Lifestyle,
            (false, false) => ImageCategory::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> ImageClassifier {
        ImageClassifier::new(
            "person",
            &["bottle".to_string(), "cup".to_string(), "vase".to_string()],
        )
    }

    #[test]
    fn test_person_and_product_is_promotional() {
        let c = classifier();
        assert_eq!(c.classify(["person", "bottle"]), ImageCategory::Promotional);
    }

    #[test]
    fn test_product_only_is_product_display() {
        let c = classifier();
        assert_eq!(c.classify(["bottle"]), ImageCategory::ProductDisplay);
        assert_eq!(c.classify(["cup", "vase"]), ImageCategory::ProductDisplay);
    }

    #[test]
    fn test_person_only_is_lifestyle() {
        let c = classifier();
        assert_eq!(c.classify(["person"]), ImageCategory::Lifestyle);
    }

    #[test]
    fn test_empty_and_unknown_are_other() {
        let c = classifier();
        assert_eq!(c.classify([]), ImageCategory::Other);
        assert_eq!(c.classify(["dog"]), ImageCategory::Other);
        assert_eq!(c.classify(["dog", "chair"]), ImageCategory::Other);
    }

    #[test]
    fn test_order_independent() {
        let c = classifier();
        assert_eq!(
            c.classify(["bottle", "person"]),
            c.classify(["person", "bottle"])
        );
        assert_eq!(
            c.classify(["dog", "cup", "person"]),
            c.classify(["person", "dog", "cup"])
        );
    }

    #[test]
    fn test_duplicates_do_not_matter() {
        let c = classifier();
        assert_eq!(
            c.classify(["person", "person", "bottle", "bottle"]),
            ImageCategory::Promotional
        );
    }

    #[test]
    fn test_category_display() {
        assert_eq!(ImageCategory::ProductDisplay.to_string(), "product_display");
        assert_eq!(ImageCategory::Other.to_string(), "other");
    }
}
