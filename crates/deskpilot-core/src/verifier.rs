//! Effect verification by screenshot comparison.
//!
//! After a click or scroll the screen is captured again and compared with
//! the capture taken before the step. An action that changed too few
//! pixels gets one corrective retry: a click is jittered by a few pixels,
//! a scroll is reversed.

use crate::action::AgentAction;
use crate::config::VerifierConfig;
use image::{DynamicImage, GenericImageView};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// What to try when an action had no visible effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Suggestion {
    None,
    /// Repeat the click slightly off target.
    RetryWithJitter,
    /// Scroll the other way.
    ScrollOpposite,
}

/// Result of one comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectCheck {
    pub changed: bool,
    pub ratio: f64,
    pub suggestion: Suggestion,
}

pub struct EffectVerifier {
    change_threshold: f64,
    pixel_threshold: u8,
    jitter_px: i32,
    max_retries: u32,
}

impl EffectVerifier {
    pub fn new(config: &VerifierConfig) -> Self {
        Self {
            change_threshold: config.change_threshold,
            pixel_threshold: config.pixel_threshold,
            jitter_px: config.jitter_px,
            max_retries: config.max_retries,
        }
    }

    /// Retries actually performed: never more than one.
    pub fn retry_budget(&self) -> u32 {
        self.max_retries.min(1)
    }

    /// Fraction of pixels whose grey level moved by more than the pixel
    /// threshold. Differently sized images count as fully changed.
    pub fn change_ratio(&self, before: &DynamicImage, after: &DynamicImage) -> f64 {
        if before.dimensions() != after.dimensions() {
            return 1.0;
        }
        let before = before.to_luma8();
        let after = after.to_luma8();
        let total = before.as_raw().len();
        if total == 0 {
            return 0.0;
        }

        let changed = before
            .as_raw()
            .iter()
            .zip(after.as_raw())
            .filter(|(a, b)| a.abs_diff(**b) > self.pixel_threshold)
            .count();
        changed as f64 / total as f64
    }

    pub fn check_effect(
        &self,
        before: &DynamicImage,
        after: &DynamicImage,
        action: &AgentAction,
    ) -> EffectCheck {
        let ratio = self.change_ratio(before, after);
        let changed = ratio > self.change_threshold;
        let suggestion = match action {
            _ if changed => Suggestion::None,
            AgentAction::Click { .. } => Suggestion::RetryWithJitter,
            AgentAction::Scroll { .. } => Suggestion::ScrollOpposite,
            _ => Suggestion::None,
        };
        debug!(ratio, changed, "Effect check for {}", action.kind());
        EffectCheck {
            changed,
            ratio,
            suggestion,
        }
    }

    /// The action to run for `suggestion`, if it applies to `action`.
    pub fn retry_action(&self, action: &AgentAction, suggestion: &Suggestion) -> Option<AgentAction> {
        match (suggestion, action) {
            (Suggestion::RetryWithJitter, AgentAction::Click { x, y, kind }) => {
                let offsets = [-self.jitter_px, 0, self.jitter_px];
                let mut rng = rand::thread_rng();
                let dx = offsets.choose(&mut rng).copied().unwrap_or(0);
                let dy = offsets.choose(&mut rng).copied().unwrap_or(0);
                Some(AgentAction::Click {
                    x: x.saturating_add(dx),
                    y: y.saturating_add(dy),
                    kind: *kind,
                })
            }
            (Suggestion::ScrollOpposite, AgentAction::Scroll { direction, amount }) => {
                Some(AgentAction::Scroll {
                    direction: direction.opposite(),
                    amount: *amount,
                })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ClickKind, ScrollDirection};
    use image::{GrayImage, Luma};

    fn grey(width: u32, height: u32, luma: u8) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(width, height, Luma([luma])))
    }

    fn click() -> AgentAction {
        AgentAction::Click {
            x: 100,
            y: 100,
            kind: ClickKind::Single,
        }
    }

    #[test]
    fn test_identical_images_are_unchanged() {
        let verifier = EffectVerifier::new(&VerifierConfig::default());
        let check = verifier.check_effect(&grey(64, 64, 40), &grey(64, 64, 40), &click());
        assert_eq!(check.ratio, 0.0);
        assert!(!check.changed);
        assert_eq!(check.suggestion, Suggestion::RetryWithJitter);
    }

    #[test]
    fn test_dimension_mismatch_counts_as_changed() {
        let verifier = EffectVerifier::new(&VerifierConfig::default());
        let check = verifier.check_effect(&grey(64, 64, 0), &grey(32, 64, 0), &click());
        assert_eq!(check.ratio, 1.0);
        assert!(check.changed);
        assert_eq!(check.suggestion, Suggestion::None);
    }

    #[test]
    fn test_small_deltas_are_ignored() {
        let verifier = EffectVerifier::new(&VerifierConfig::default());
        assert_eq!(verifier.change_ratio(&grey(10, 10, 100), &grey(10, 10, 115)), 0.0);
        assert_eq!(verifier.change_ratio(&grey(10, 10, 100), &grey(10, 10, 116)), 1.0);
    }

    #[test]
    fn test_threshold_is_strict() {
        let verifier = EffectVerifier::new(&VerifierConfig::default());
        let before = grey(10, 10, 0);
        let mut after = GrayImage::from_pixel(10, 10, Luma([0]));
        after.put_pixel(0, 0, Luma([255]));
        after.put_pixel(1, 0, Luma([255]));
        // 2% exactly is not above the threshold
        let check = verifier.check_effect(&before, &DynamicImage::ImageLuma8(after.clone()), &click());
        assert!((check.ratio - 0.02).abs() < 1e-12);
        assert!(!check.changed);

        after.put_pixel(2, 0, Luma([255]));
        assert!(verifier
            .check_effect(&before, &DynamicImage::ImageLuma8(after), &click())
            .changed);
    }

    #[test]
    fn test_retry_actions() {
        let verifier = EffectVerifier::new(&VerifierConfig::default());
        for _ in 0..20 {
            match verifier.retry_action(&click(), &Suggestion::RetryWithJitter) {
                Some(AgentAction::Click { x, y, .. }) => {
                    assert!([97, 100, 103].contains(&x));
                    assert!([97, 100, 103].contains(&y));
                }
                other => panic!("unexpected retry: {:?}", other),
            }
        }

        let scroll = AgentAction::Scroll {
            direction: ScrollDirection::Down,
            amount: Some(5),
        };
        let check = verifier.check_effect(&grey(4, 4, 0), &grey(4, 4, 0), &scroll);
        assert_eq!(check.suggestion, Suggestion::ScrollOpposite);
        assert_eq!(
            verifier.retry_action(&scroll, &check.suggestion),
            Some(AgentAction::Scroll {
                direction: ScrollDirection::Up,
                amount: Some(5)
            })
        );
        assert_eq!(verifier.retry_action(&AgentAction::Done, &Suggestion::None), None);
    }

    #[test]
    fn test_retry_budget_is_capped() {
        let mut config = VerifierConfig::default();
        assert_eq!(EffectVerifier::new(&config).retry_budget(), 1);
        config.max_retries = 0;
        assert_eq!(EffectVerifier::new(&config).retry_budget(), 0);
    }
}
