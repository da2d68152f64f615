// SPDX-License-Identifier: PMPL-1.0-or-later

//! Rule evaluation

use super::{DefeatureRule, RuleContainer, RuleMatch, RuleMode};
use crate::error::{RecoveryError, Result};
use crate::types::BitVector;
use tracing::debug;

impl RuleContainer {
    /// Reference vectors reported for `input`, or `None` when the container does not pass.
    pub fn evaluate(&self, input: &BitVector) -> Result<Option<Vec<BitVector>>> {
        match self.mode {
            RuleMode::ValidCombinations => {
                let mut covering = Vec::new();
                let mut uncovering = Vec::new();
                for value in &self.values {
                    if value.len() != input.len() {
                        return Err(RecoveryError::wrong_size(
                            format!(
                                "rule container [{}] reference [{}] against input [{}]",
                                self.name, value, input
                            ),
                            value.len(),
                            input.len(),
                        ));
                    }
                    if input.is_subset_of(value)? {
                        covering.push(value.clone());
                    } else {
                        uncovering.push(value.clone());
                    }
                }

                let reported = if self.fail_when { uncovering } else { covering };
                Ok((!reported.is_empty()).then_some(reported))
            }
        }
    }
}

impl DefeatureRule {
    /// Every catalog configuration still compatible with `fail_bits`.
    ///
    /// Matches are not exclusive: several containers, and several vectors in
    /// one container, may be reported together.
    pub fn passing_configurations(&self, fail_bits: &BitVector) -> Result<Vec<RuleMatch>> {
        let input = self.project(fail_bits)?;
        let mut matches = Vec::new();

        for container in &self.containers {
            if let Some(values) = container.evaluate(&input)? {
                matches.extend(values.into_iter().map(|bit_vector| RuleMatch {
                    name: container.name.clone(),
                    bit_vector,
                    size: container.size,
                    rule_type: container.rule_type,
                    mode: container.mode,
                }));
            }
        }

        match matches.first() {
            Some(first) => debug!(
                rule = %self.name,
                input = %input,
                passed = %first.name,
                size = first.size,
                bit_vector = %first.bit_vector,
                count = matches.len(),
                "rule passed"
            ),
            None => debug!(rule = %self.name, input = %input, "no passing configurations"),
        }

        Ok(matches)
    }
}

/// Outcome of an exact-match membership test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassOutcome {
    pub passed: bool,
    pub matched: Vec<String>,
    pub unmatched: Vec<String>,
}

/// Exact-match test of `bits` against labeled reference values.
///
/// With `fail_when` unset the test passes when some entry equals `bits`;
/// with it set the test passes when some entry differs.
pub fn is_pass(bits: &BitVector, ref_values: &[(String, BitVector)], fail_when: bool) -> Result<PassOutcome> {
    let mut matched = Vec::new();
    let mut unmatched = Vec::new();
    for (label, value) in ref_values {
        if value.len() != bits.len() {
            return Err(RecoveryError::wrong_size(
                format!("reference [{}]", label),
                value.len(),
                bits.len(),
            ));
        }
        if value == bits {
            matched.push(label.clone());
        } else {
            unmatched.push(label.clone());
        }
    }

    let passed = if fail_when {
        !unmatched.is_empty()
    } else {
        !matched.is_empty()
    };
    Ok(PassOutcome {
        passed,
        matched,
        unmatched,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleType;

    fn bits(s: &str) -> BitVector {
        BitVector::parse(s).expect("bits")
    }

    fn core_rule() -> DefeatureRule {
        let mut rule = DefeatureRule::new("Core", (0..8).collect());
        rule.add(
            RuleMode::ValidCombinations,
            "4C",
            4,
            RuleType::FullyFeatured,
            vec![bits("00001111")],
            false,
        );
        rule.add(
            RuleMode::ValidCombinations,
            "2C",
            2,
            RuleType::Recovery,
            vec![bits("00111111"), bits("11001111")],
            false,
        );
        rule
    }

    #[test]
    fn test_core_rule_matches() {
        let rule = core_rule();
        let all = rule.passing_configurations(&bits("00001111")).expect("run");
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].name, "4C");
        assert_eq!(all[0].rule_type, RuleType::FullyFeatured);

        let one = rule.passing_configurations(&bits("01001111")).expect("run");
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].name, "2C");
        assert_eq!(one[0].bit_vector.to_string(), "11001111");

        let none = rule.passing_configurations(&bits("01011111")).expect("run");
        assert!(none.is_empty());
    }

    #[test]
    fn test_adding_failures_only_removes_matches() {
        let rule = core_rule();
        let before = rule.passing_configurations(&bits("00001111")).expect("run");
        let after = rule.passing_configurations(&bits("10001111")).expect("run");
        assert!(after.len() <= before.len());
        assert!(after.iter().all(|m| before.contains(m)));
    }

    #[test]
    fn test_length_mismatch_is_error() {
        let mut rule = DefeatureRule::new("Short", vec![]);
        rule.add(
            RuleMode::ValidCombinations,
            "bad",
            1,
            RuleType::Recovery,
            vec![bits("0011")],
            false,
        );
        let err = rule.passing_configurations(&bits("001")).unwrap_err();
        assert!(matches!(err, RecoveryError::WrongSize { .. }));
        assert!(err.to_string().contains("bad"));
    }

    #[test]
    fn test_fail_when_reports_non_covering() {
        let mut rule = DefeatureRule::new("FailWhen", vec![]);
        rule.add(
            RuleMode::ValidCombinations,
            "fw",
            4,
            RuleType::FuseDown,
            vec![bits("0000"), bits("1111")],
            true,
        );
        let matches = rule.passing_configurations(&bits("1111")).expect("run");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].bit_vector.to_string(), "0000");
    }

    #[test]
    fn test_is_pass_exact_match() {
        let refs = vec![
            ("a".to_string(), bits("0011")),
            ("b".to_string(), bits("0111")),
        ];
        let hit = is_pass(&bits("0011"), &refs, false).expect("run");
        assert!(hit.passed);
        assert_eq!(hit.matched, vec!["a".to_string()]);
        assert_eq!(hit.unmatched, vec!["b".to_string()]);

        // subset of "b" but not equal to it
        let miss = is_pass(&bits("0001"), &refs, false).expect("run");
        assert!(!miss.passed);
        assert_eq!(miss.unmatched.len(), 2);

        let inverted = is_pass(&bits("0011"), &refs, true).expect("run");
        assert!(inverted.passed);

        assert!(is_pass(&bits("01"), &refs, false).is_err());
    }
}
