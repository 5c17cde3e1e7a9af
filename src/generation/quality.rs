//! Advisory quality scoring of a generated artifact
//!
//! Cheap static checks per component; the score is surfaced to the
//! caller and stored on the record but never blocks persistence.

use super::chunk::Artifact;
use serde::{Deserialize, Serialize};

const PENALTY: u8 = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitScore {
    pub component: String,
    pub score: u8,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityReport {
    /// Rounded mean of the unit scores
    pub score: u8,
    pub units: Vec<UnitScore>,
}

pub fn verify(artifact: &Artifact) -> QualityReport {
    let units: Vec<UnitScore> = artifact
        .iter()
        .map(|(component, text)| score_unit(component, text))
        .collect();

    let score = if units.is_empty() {
        0
    } else {
        let total: usize = units.iter().map(|u| usize::from(u.score)).sum();
        let mean = (total + units.len() / 2) / units.len();
        u8::try_from(mean).unwrap_or(100)
    };

    QualityReport { score, units }
}

fn score_unit(component: &str, text: &str) -> UnitScore {
    let mut issues = Vec::new();

    if text.trim().is_empty() {
        issues.push("empty output".to_string());
    } else {
        if !delimiters_balanced(text) {
            issues.push("unbalanced brackets".to_string());
        }
        if !text.contains("export") {
            issues.push("nothing is exported".to_string());
        }
        if text.contains("```") {
            issues.push("leftover markdown fence".to_string());
        }
        let lowered = text.to_lowercase();
        if lowered.contains("lorem ipsum") || lowered.contains("todo: implement") {
            issues.push("placeholder content".to_string());
        }
    }

    let penalty = u8::try_from(issues.len())
        .unwrap_or(u8::MAX)
        .saturating_mul(PENALTY);
    let score = if text.trim().is_empty() {
        0
    } else {
        100u8.saturating_sub(penalty)
    };

    UnitScore {
        component: component.to_string(),
        score,
        issues,
    }
}

/// Bracket balance outside of string literals and comments
fn delimiters_balanced(text: &str) -> bool {
    let mut stack = Vec::new();
    let mut chars = text.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            match c {
                '\\' => {
                    chars.next();
                }
                c if c == q => quote = None,
                _ => {}
            }
            continue;
        }
        match c {
            '"' | '\'' | '`' => quote = Some(c),
            '/' if chars.peek() == Some(&'/') => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        break;
                    }
                }
            }
            '(' | '[' | '{' => stack.push(c),
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                if stack.pop() != Some(expected) {
                    return false;
                }
            }
            _ => {}
        }
    }

    stack.is_empty() && quote.is_none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::chunk::{PAGE, TYPES};

    fn artifact(parts: &[(&str, &str)]) -> Artifact {
        parts
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_clean_artifact_scores_full() {
        let report = verify(&artifact(&[
            (PAGE, "export default function App() { return (<div>{\"a)\"}</div>); }"),
            (TYPES, "export interface A { id: string; } // trailing ) in comment"),
        ]));
        assert_eq!(report.score, 100);
        assert!(report.units.iter().all(|u| u.issues.is_empty()));
    }

    #[test]
    fn test_issues_reduce_score() {
        let report = verify(&artifact(&[
            (PAGE, "```tsx\nfunction App() { return 1;\n"),
            (TYPES, ""),
        ]));
        let page = &report.units.iter().find(|u| u.component == PAGE).unwrap();
        assert_eq!(page.issues.len(), 3);
        assert_eq!(page.score, 40);
        // (40 + 0) / 2
        assert_eq!(report.score, 20);
    }

    #[test]
    fn test_empty_artifact_scores_zero() {
        assert_eq!(verify(&Artifact::new()).score, 0);
    }

    #[test]
    fn test_fallback_output_is_clean() {
        let spec = crate::app_spec::AppSpec::minimal("Clean");
        let report = verify(&crate::generation::generate_fallback(&spec));
        assert_eq!(report.score, 100, "{report:?}");
    }
}
