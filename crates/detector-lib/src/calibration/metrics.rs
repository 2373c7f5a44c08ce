//! Binary classification metrics

use serde::{Deserialize, Serialize};

/// Counts for the leak (positive) class at one threshold
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
}

impl ConfusionMatrix {
    /// Classify each probability with `p >= threshold`, as the gate does, and
    /// tally against labels
    pub fn at_threshold(probabilities: &[f64], labels: &[u8], threshold: f64) -> Self {
        let predicted: Vec<u8> = probabilities
            .iter()
            .map(|&p| u8::from(p >= threshold))
            .collect();
        Self::from_predictions(&predicted, labels)
    }

    pub fn from_predictions(predicted: &[u8], labels: &[u8]) -> Self {
        let mut cm = Self::default();
        for (&pred, &actual) in predicted.iter().zip(labels) {
            match (pred == 1, actual == 1) {
                (true, true) => cm.true_positives += 1,
                (true, false) => cm.false_positives += 1,
                (false, false) => cm.true_negatives += 1,
                (false, true) => cm.false_negatives += 1,
            }
        }
        cm
    }

    pub fn total(&self) -> usize {
        self.true_positives + self.false_positives + self.true_negatives + self.false_negatives
    }

    pub fn precision(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }

    /// F1 of the leak class; 0 when precision and recall are both 0
    pub fn f1(&self) -> f64 {
        f1(self.precision(), self.recall())
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.true_positives + self.true_negatives, self.total())
    }

    /// Metrics of the normal class, obtained by swapping roles
    fn negative_class(&self) -> ClassMetrics {
        let precision = ratio(self.true_negatives, self.true_negatives + self.false_negatives);
        let recall = ratio(self.true_negatives, self.true_negatives + self.false_positives);
        ClassMetrics {
            precision,
            recall,
            f1: f1(precision, recall),
            support: self.true_negatives + self.false_positives,
        }
    }

    fn positive_class(&self) -> ClassMetrics {
        ClassMetrics {
            precision: self.precision(),
            recall: self.recall(),
            f1: self.f1(),
            support: self.true_positives + self.false_negatives,
        }
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

fn f1(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Per-class report for a labelled evaluation set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub threshold: f64,
    pub normal: ClassMetrics,
    pub leak: ClassMetrics,
    pub accuracy: f64,
    pub confusion: ConfusionMatrix,
}

impl ClassificationReport {
    pub fn new(probabilities: &[f64], labels: &[u8], threshold: f64) -> Self {
        let confusion = ConfusionMatrix::at_threshold(probabilities, labels, threshold);
        Self {
            threshold,
            normal: confusion.negative_class(),
            leak: confusion.positive_class(),
            accuracy: confusion.accuracy(),
            confusion,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confusion_counts() {
        let probs = [0.9, 0.8, 0.3, 0.1, 0.6];
        let labels = [1, 0, 1, 0, 1];
        let cm = ConfusionMatrix::at_threshold(&probs, &labels, 0.5);
        assert_eq!(cm.true_positives, 2);
        assert_eq!(cm.false_positives, 1);
        assert_eq!(cm.true_negatives, 1);
        assert_eq!(cm.false_negatives, 1);
        assert!((cm.precision() - 2.0 / 3.0).abs() < 1e-12);
        assert!((cm.recall() - 2.0 / 3.0).abs() < 1e-12);
        assert!((cm.f1() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let cm = ConfusionMatrix::at_threshold(&[0.5], &[1], 0.5);
        assert_eq!(cm.true_positives, 1);
    }

    #[test]
    fn test_zero_division_yields_zero() {
        let cm = ConfusionMatrix::at_threshold(&[0.1, 0.2], &[0, 0], 0.5);
        assert_eq!(cm.precision(), 0.0);
        assert_eq!(cm.recall(), 0.0);
        assert_eq!(cm.f1(), 0.0);
        assert_eq!(cm.accuracy(), 1.0);
    }

    #[test]
    fn test_report_supports() {
        let report = ClassificationReport::new(&[0.9, 0.2, 0.7, 0.4], &[1, 0, 0, 0], 0.5);
        assert_eq!(report.leak.support, 1);
        assert_eq!(report.normal.support, 3);
        assert_eq!(report.leak.recall, 1.0);
        assert!((report.normal.recall - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(report.accuracy, 0.75);
    }
}
