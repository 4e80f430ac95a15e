//! Macro totals for a set of portions, compared against targets.

use serde::{Deserialize, Serialize};

use crate::models::{Macros, Nutrient};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    WithinTolerance,
    Over,
    Under,
}

impl Verdict {
    #[must_use]
    pub fn classify(total: f64, target: f64, tolerance: f64) -> Self {
        if (total - target).abs() <= tolerance {
            Self::WithinTolerance
        } else if total > target {
            Self::Over
        } else {
            Self::Under
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WithinTolerance => "within_tolerance",
            Self::Over => "over",
            Self::Under => "under",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroLine {
    pub nutrient: Nutrient,
    pub total: f64,
    pub target: f64,
    pub tolerance: f64,
    pub percent_of_target: f64,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroReport {
    pub totals: Macros,
    pub lines: Vec<MacroLine>,
}

impl MacroReport {
    #[must_use]
    pub fn line(&self, nutrient: Nutrient) -> Option<&MacroLine> {
        self.lines.iter().find(|l| l.nutrient == nutrient)
    }

    #[must_use]
    pub fn all_within(&self) -> bool {
        self.lines
            .iter()
            .all(|l| l.verdict == Verdict::WithinTolerance)
    }
}

/// Sum of `per_portion × count` over every entry.
#[must_use]
pub fn totals<'a>(portions: impl IntoIterator<Item = (&'a Macros, f64)>) -> Macros {
    portions
        .into_iter()
        .fold(Macros::default(), |acc, (m, count)| acc + m.scaled(count))
}

#[must_use]
pub fn compare(totals: Macros, targets: &Macros, tolerance: &Macros) -> MacroReport {
    let lines = Nutrient::ALL
        .iter()
        .map(|&nutrient| {
            let total = totals.get(nutrient);
            let target = targets.get(nutrient);
            let tol = tolerance.get(nutrient);
            MacroLine {
                nutrient,
                total,
                target,
                tolerance: tol,
                percent_of_target: if target > 0.0 {
                    total / target * 100.0
                } else {
                    0.0
                },
                verdict: Verdict::classify(total, target, tol),
            }
        })
        .collect();
    MacroReport { totals, lines }
}

#[must_use]
pub fn report<'a>(
    portions: impl IntoIterator<Item = (&'a Macros, f64)>,
    targets: &Macros,
    tolerance: &Macros,
) -> MacroReport {
    compare(totals(portions), targets, tolerance)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets() -> (Macros, Macros) {
        (
            Macros::new(145.0, 380.0, 100.0, 2900.0),
            Macros::new(14.5, 38.0, 10.0, 290.0),
        )
    }

    #[test]
    fn test_totals_scale_by_portion_count() {
        let chicken = Macros::new(40.0, 5.0, 10.0, 300.0);
        let lentils = Macros::new(18.0, 40.0, 2.0, 250.0);
        let total = totals([(&chicken, 2.0), (&lentils, 1.5)]);
        assert!((total.protein - 107.0).abs() < 0.01);
        assert!((total.carbs - 70.0).abs() < 0.01);
        assert!((total.fat - 23.0).abs() < 0.01);
        assert!((total.calories - 975.0).abs() < 0.01);
    }

    #[test]
    fn test_empty_input_is_under_everywhere() {
        let (t, tol) = targets();
        let report = report(std::iter::empty(), &t, &tol);
        assert_eq!(report.totals, Macros::default());
        assert!(report.lines.iter().all(|l| l.verdict == Verdict::Under));
        assert!(report.lines.iter().all(|l| l.percent_of_target.abs() < 0.01));
    }

    #[test]
    fn test_verdict_boundaries() {
        assert_eq!(Verdict::classify(110.0, 100.0, 10.0), Verdict::WithinTolerance);
        assert_eq!(Verdict::classify(90.0, 100.0, 10.0), Verdict::WithinTolerance);
        assert_eq!(Verdict::classify(110.5, 100.0, 10.0), Verdict::Over);
        assert_eq!(Verdict::classify(89.5, 100.0, 10.0), Verdict::Under);
        // Zero tolerance still accepts an exact hit.
        assert_eq!(Verdict::classify(100.0, 100.0, 0.0), Verdict::WithinTolerance);
    }

    #[test]
    fn test_report_lines() {
        let (t, tol) = targets();
        let day = Macros::new(150.0, 300.0, 120.0, 2900.0);
        let report = report([(&day, 1.0)], &t, &tol);

        let protein = report.line(Nutrient::Protein).unwrap();
        assert_eq!(protein.verdict, Verdict::WithinTolerance);
        assert!((protein.percent_of_target - 103.45).abs() < 0.01);

        assert_eq!(report.line(Nutrient::Carbs).unwrap().verdict, Verdict::Under);
        assert_eq!(report.line(Nutrient::Fat).unwrap().verdict, Verdict::Over);
        assert!(!report.all_within());
    }
}
