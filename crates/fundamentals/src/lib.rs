//! Fundamental quality score from the monthly-refresh metrics.
//!
//! Each available metric is graded into bands and the grades averaged;
//! missing metrics simply do not participate. A symbol with no metrics
//! at all gets no score, which downstream renormalizes out of conviction.

use engine_core::{FundamentalData, Holdings};

fn grade(value: f64, bands: [f64; 4]) -> f64 {
    match value {
        v if v >= bands[0] => 100.0,
        v if v >= bands[1] => 75.0,
        v if v >= bands[2] => 50.0,
        v if v >= bands[3] => 25.0,
        _ => 0.0,
    }
}

/// Lower-is-better grading (leverage).
fn grade_inverse(value: f64, bands: [f64; 4]) -> f64 {
    match value {
        v if v <= bands[0] => 100.0,
        v if v <= bands[1] => 75.0,
        v if v <= bands[2] => 50.0,
        v if v <= bands[3] => 25.0,
        _ => 0.0,
    }
}

/// Score 0–100 over the available metrics; None when nothing is available.
pub fn score_fundamentals(data: &FundamentalData, holdings: Option<&Holdings>) -> Option<f64> {
    let mut grades: Vec<f64> = Vec::new();

    if let Some(v) = data.eps_qoq_growth {
        grades.push(grade(v, [0.15, 0.08, 0.0, -0.10]));
    }
    if let Some(v) = data.revenue_yoy_growth {
        grades.push(grade(v, [0.20, 0.10, 0.0, -0.05]));
    }
    if let Some(v) = data.roce {
        grades.push(grade(v, [0.20, 0.15, 0.10, 0.05]));
    }
    if let Some(v) = data.roe {
        grades.push(grade(v, [0.18, 0.14, 0.10, 0.05]));
    }
    if let Some(v) = data.debt_to_equity {
        grades.push(grade_inverse(v, [0.30, 0.70, 1.20, 2.00]));
    }
    if let Some(v) = data.operating_margin {
        grades.push(grade(v, [0.20, 0.12, 0.08, 0.03]));
    }
    if let Some(v) = data.fcf_yield {
        grades.push(grade(v, [0.06, 0.04, 0.02, 0.0]));
    }
    if let Some(v) = data.cash_eps_ratio {
        grades.push(grade(v, [1.0, 0.8, 0.6, 0.4]));
    }

    if grades.is_empty() {
        return None;
    }

    let mut score = grades.iter().sum::<f64>() / grades.len() as f64;

    // Institutional-behavior adjustment when holdings data exists.
    if let Some(h) = holdings {
        if h.promoter_pledge_pct.map_or(false, |p| p > 25.0) {
            score -= 10.0;
        }
        if h.fii_net_change_30d_pct.map_or(false, |c| c > 0.5) {
            score += 5.0;
        }
        let institutional = h.fii_pct.unwrap_or(0.0) + h.dii_pct.unwrap_or(0.0);
        if institutional > 30.0 {
            score += 5.0;
        }
    }

    Some(score.clamp(0.0, 100.0))
}
