//! Health Scorer (spec component 7): a pure function from image metrics to a
//! weighted composite score and letter grade. No catalog or I/O access —
//! callers gather the inputs and pass them in.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default)]
pub struct SeverityCounts {
    pub critical: i64,
    pub high: i64,
    pub medium: i64,
    pub low: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Stable,
    Declining,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResult {
    pub overall: i32,
    pub grade: String,
    pub security: i32,
    pub freshness: i32,
    pub efficiency: i32,
    pub maintenance: i32,
    pub trend: Option<Trend>,
}

/// `100 * e^(-penalty/60)`, `penalty = 10*crit + 5*high + 1*med + 0.1*low`.
pub fn security_score(counts: SeverityCounts) -> i32 {
    let penalty = 10.0 * counts.critical as f64
        + 5.0 * counts.high as f64
        + 1.0 * counts.medium as f64
        + 0.1 * counts.low as f64;
    (100.0 * (-penalty / 60.0).exp()).round() as i32
}

/// Piecewise on `days_old = min(days_since_created, days_since_last_push)`.
pub fn freshness_score(days_since_created: i64, days_since_last_push: i64) -> i32 {
    let days_old = days_since_created.min(days_since_last_push);
    match days_old {
        d if d <= 7 => 100,
        d if d <= 30 => 90,
        d if d <= 90 => 70,
        d if d <= 180 => 50,
        d if d <= 365 => 30,
        _ => 10,
    }
}

/// Piecewise on `ratio = size / avg_size_in_repo`. `avg_size_in_repo == None`
/// (or zero) yields the neutral score of 75.
pub fn efficiency_score(size: u64, avg_size_in_repo: Option<f64>) -> i32 {
    let avg = match avg_size_in_repo {
        Some(avg) if avg > 0.0 => avg,
        _ => return 75,
    };
    let ratio = size as f64 / avg;
    if ratio < 0.5 {
        100
    } else if ratio < 0.75 {
        90
    } else if ratio < 1.0 {
        80
    } else if ratio < 1.25 {
        70
    } else if ratio < 1.5 {
        50
    } else if ratio < 2.0 {
        30
    } else {
        10
    }
}

fn pull_subscore(pull_count: u64) -> i32 {
    match pull_count {
        p if p >= 100 => 50,
        p if p >= 50 => 50,
        p if p >= 20 => 20,
        p if p >= 10 => 10,
        p if p >= 5 => 5,
        _ => 0,
    }
}

fn recency_subscore(days_since_last_push: i64) -> i32 {
    match days_since_last_push {
        d if d <= 7 => 50,
        d if d <= 30 => 30,
        d if d <= 90 => 20,
        d if d <= 180 => 10,
        _ => 0,
    }
}

/// `pull_subscore + recency_subscore`, each clamped to the 0..=50 range.
pub fn maintenance_score(pull_count: u64, days_since_last_push: i64) -> i32 {
    pull_subscore(pull_count) + recency_subscore(days_since_last_push)
}

pub fn grade_for(overall: i32) -> &'static str {
    match overall {
        o if o >= 95 => "A+",
        o if o >= 85 => "A",
        o if o >= 70 => "B",
        o if o >= 50 => "C",
        o if o >= 30 => "D",
        _ => "F",
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HealthInputs {
    pub vulnerabilities: SeverityCounts,
    pub days_since_created: i64,
    pub days_since_last_push: i64,
    pub size: u64,
    pub avg_size_in_repo: Option<f64>,
    pub pull_count: u64,
}

/// Computes the composite health score. `previous_overall`, if present, is
/// used to derive the trend (`improving`/`stable`/`declining`).
pub fn calculate(inputs: HealthInputs, previous_overall: Option<i32>) -> HealthResult {
    let security = security_score(inputs.vulnerabilities);
    let freshness = freshness_score(inputs.days_since_created, inputs.days_since_last_push);
    let efficiency = efficiency_score(inputs.size, inputs.avg_size_in_repo);
    let maintenance = maintenance_score(inputs.pull_count, inputs.days_since_last_push);

    let overall =
        (0.4 * security as f64 + 0.2 * (freshness + efficiency + maintenance) as f64).round() as i32;
    let overall = overall.clamp(0, 100);

    let trend = previous_overall.map(|prev| {
        if overall > prev {
            Trend::Improving
        } else if overall < prev {
            Trend::Declining
        } else {
            Trend::Stable
        }
    });

    HealthResult {
        overall,
        grade: grade_for(overall).to_string(),
        security,
        freshness,
        efficiency,
        maintenance,
        trend,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_score_no_vulnerabilities_is_perfect() {
        assert_eq!(security_score(SeverityCounts::default()), 100);
    }

    #[test]
    fn security_score_decreases_with_severity() {
        let low = security_score(SeverityCounts { critical: 0, high: 0, medium: 0, low: 5 });
        let crit = security_score(SeverityCounts { critical: 2, high: 0, medium: 0, low: 0 });
        assert!(crit < low);
    }

    #[test]
    fn freshness_buckets() {
        assert_eq!(freshness_score(3, 3), 100);
        assert_eq!(freshness_score(20, 20), 90);
        assert_eq!(freshness_score(400, 400), 10);
    }

    #[test]
    fn freshness_uses_minimum_of_both_ages() {
        assert_eq!(freshness_score(400, 3), 100);
    }

    #[test]
    fn efficiency_neutral_without_average() {
        assert_eq!(efficiency_score(1000, None), 75);
    }

    #[test]
    fn efficiency_buckets() {
        assert_eq!(efficiency_score(40, Some(100.0)), 100);
        assert_eq!(efficiency_score(250, Some(100.0)), 10);
    }

    #[test]
    fn grade_boundaries() {
        assert_eq!(grade_for(95), "A+");
        assert_eq!(grade_for(85), "A");
        assert_eq!(grade_for(70), "B");
        assert_eq!(grade_for(50), "C");
        assert_eq!(grade_for(30), "D");
        assert_eq!(grade_for(10), "F");
    }

    #[test]
    fn trend_is_derived_against_previous_score() {
        let result = calculate(
            HealthInputs {
                vulnerabilities: SeverityCounts::default(),
                days_since_created: 1,
                days_since_last_push: 1,
                size: 100,
                avg_size_in_repo: Some(100.0),
                pull_count: 10,
            },
            Some(50),
        );
        assert_eq!(result.trend, Some(Trend::Improving));
    }

    #[test]
    fn no_previous_score_yields_no_trend() {
        let result = calculate(
            HealthInputs {
                vulnerabilities: SeverityCounts::default(),
                days_since_created: 1,
                days_since_last_push: 1,
                size: 100,
                avg_size_in_repo: None,
                pull_count: 0,
            },
            None,
        );
        assert!(result.trend.is_none());
    }
}
