//! Dashboard aggregators
//!
//! Pure folds over metric, feedback and version rows already loaded from the
//! store. Nothing here touches I/O; the only clock input is the `now`
//! argument of the `_at` variants.

use crate::db::models::{Feedback, Metric, ModuleVersion};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Number of keywords returned by [`extract_keywords`]
pub const TOP_KEYWORDS: usize = 15;

const TREND_WINDOW_DAYS: i64 = 7;

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her", "was",
    "one", "our", "out", "has", "him", "his", "how", "its", "may", "new", "now", "old", "see",
    "two", "way", "who", "did", "get", "got", "let", "put", "say", "she", "too", "use", "this",
    "that", "with", "have", "from", "they", "will", "would", "there", "their", "what", "about",
    "which", "when", "make", "like", "time", "just", "know", "take", "into", "your", "some",
    "could", "them", "than", "then", "look", "only", "come", "over", "also", "back", "after",
    "work", "first", "well", "even", "want", "because", "these", "give", "most", "very", "were",
    "been", "being", "more", "much", "really", "here", "where", "should", "does",
];

/// Direction of downloads over the trailing week
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSummary {
    pub total_views: i64,
    pub total_downloads: i64,
    /// Downloads per hundred views
    pub conversion_rate: f64,
    pub avg_rating: f64,
    pub rating_count: usize,
    pub trend: Trend,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedVersion {
    pub version: ModuleVersion,
    pub downloads: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineBucket {
    /// `YYYY-MM-DD` in UTC
    pub date: String,
    pub views: i64,
    pub downloads: i64,
    pub conversion: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeywordCount {
    pub word: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionInsight {
    pub section: String,
    pub avg_rating: f64,
    pub count: usize,
}

/// Everything the product dashboard shows
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub summary: MetricsSummary,
    pub timeline: Vec<TimelineBucket>,
    pub keywords: Vec<KeywordCount>,
    pub sections: Vec<SectionInsight>,
    pub versions: Vec<RankedVersion>,
}

fn conversion(views: i64, downloads: i64) -> f64 {
    if views == 0 {
        0.0
    } else {
        downloads as f64 / views as f64 * 100.0
    }
}

pub fn aggregate_metrics(metrics: &[Metric], feedback: &[Feedback]) -> MetricsSummary {
    aggregate_metrics_at(metrics, feedback, Utc::now())
}

/// Totals, conversion, rating average and week-over-week download trend
pub fn aggregate_metrics_at(
    metrics: &[Metric],
    feedback: &[Feedback],
    now: DateTime<Utc>,
) -> MetricsSummary {
    let total_views: i64 = metrics.iter().map(|m| m.views).sum();
    let total_downloads: i64 = metrics.iter().map(|m| m.downloads).sum();

    let rating_count = feedback.len();
    let avg_rating = if rating_count == 0 {
        0.0
    } else {
        feedback.iter().map(|f| f64::from(f.rating)).sum::<f64>() / rating_count as f64
    };

    let window = Duration::days(TREND_WINDOW_DAYS);
    let week_start = now - window;
    let previous_start = week_start - window;
    let (mut recent, mut previous) = (0i64, 0i64);
    for metric in metrics {
        let at = metric.recorded_at.with_timezone(&Utc);
        if at > week_start && at <= now {
            recent += metric.downloads;
        } else if at > previous_start && at <= week_start {
            previous += metric.downloads;
        }
    }
    let trend = match recent.cmp(&previous) {
        std::cmp::Ordering::Greater => Trend::Up,
        std::cmp::Ordering::Less => Trend::Down,
        std::cmp::Ordering::Equal => Trend::Neutral,
    };

    MetricsSummary {
        total_views,
        total_downloads,
        conversion_rate: conversion(total_views, total_downloads),
        avg_rating,
        rating_count,
        trend,
    }
}

/// Versions ordered by the downloads their module collected since each
/// version went live. Ties keep input order.
pub fn rank_versions(versions: &[ModuleVersion], metrics: &[Metric]) -> Vec<RankedVersion> {
    let mut ranked: Vec<RankedVersion> = versions
        .iter()
        .map(|version| {
            let downloads = metrics
                .iter()
                .filter(|m| m.module_id == Some(version.module_id))
                .filter(|m| m.recorded_at >= version.created_at)
                .map(|m| m.downloads)
                .sum();
            RankedVersion {
                version: version.clone(),
                downloads,
            }
        })
        .collect();

    ranked.sort_by(|a, b| b.downloads.cmp(&a.downloads));
    ranked
}

/// Daily buckets in ascending date order
pub fn build_timeline(metrics: &[Metric]) -> Vec<TimelineBucket> {
    let mut days: BTreeMap<String, (i64, i64)> = BTreeMap::new();
    for metric in metrics {
        let date = metric
            .recorded_at
            .with_timezone(&Utc)
            .format("%Y-%m-%d")
            .to_string();
        let day = days.entry(date).or_default();
        day.0 += metric.views;
        day.1 += metric.downloads;
    }

    days.into_iter()
        .map(|(date, (views, downloads))| TimelineBucket {
            date,
            views,
            downloads,
            conversion: conversion(views, downloads),
        })
        .collect()
}

/// Most frequent meaningful words across feedback comments
pub fn extract_keywords(feedback: &[Feedback]) -> Vec<KeywordCount> {
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, usize> = HashMap::new();

    let words = feedback
        .iter()
        .filter_map(|f| f.comment.as_deref())
        .flat_map(|comment| {
            comment
                .to_lowercase()
                .chars()
                .filter(|c| c.is_alphabetic() || c.is_whitespace())
                .collect::<String>()
                .split_whitespace()
                .map(str::to_string)
                .collect::<Vec<_>>()
        });

    for word in words {
        if word.chars().count() <= 2 || STOP_WORDS.contains(&word.as_str()) {
            continue;
        }
        let count = counts.entry(word.clone()).or_insert(0);
        if *count == 0 {
            order.push(word);
        }
        *count += 1;
    }

    let mut keywords: Vec<KeywordCount> = order
        .into_iter()
        .map(|word| {
            let count = counts[&word];
            KeywordCount { word, count }
        })
        .collect();
    keywords.sort_by(|a, b| b.count.cmp(&a.count));
    keywords.truncate(TOP_KEYWORDS);
    keywords
}

/// Average rating per section, worst first
pub fn section_insights(feedback: &[Feedback]) -> Vec<SectionInsight> {
    let mut order: Vec<&str> = Vec::new();
    let mut totals: HashMap<&str, (i64, usize)> = HashMap::new();

    for f in feedback {
        let Some(section) = f.section.as_deref().map(str::trim).filter(|s| !s.is_empty()) else {
            continue;
        };
        let entry = totals.entry(section).or_insert_with(|| {
            order.push(section);
            (0, 0)
        });
        entry.0 += i64::from(f.rating);
        entry.1 += 1;
    }

    let mut insights: Vec<SectionInsight> = order
        .into_iter()
        .map(|section| {
            let (sum, count) = totals[section];
            SectionInsight {
                section: section.to_string(),
                avg_rating: sum as f64 / count as f64,
                count,
            }
        })
        .collect();
    insights.sort_by(|a, b| a.avg_rating.total_cmp(&b.avg_rating));
    insights
}

/// Compose every aggregate for one product
pub fn build_dashboard(
    metrics: &[Metric],
    feedback: &[Feedback],
    versions: &[ModuleVersion],
    now: DateTime<Utc>,
) -> Dashboard {
    Dashboard {
        summary: aggregate_metrics_at(metrics, feedback, now),
        timeline: build_timeline(metrics),
        keywords: extract_keywords(feedback),
        sections: section_insights(feedback),
        versions: rank_versions(versions, metrics),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn metric(at: DateTime<Utc>, views: i64, downloads: i64) -> Metric {
        Metric {
            id: Uuid::new_v4(),
            product_id: Uuid::nil(),
            module_id: None,
            version_id: None,
            views,
            downloads,
            recorded_at: at.into(),
        }
    }

    fn feedback(rating: i32, comment: Option<&str>, section: Option<&str>) -> Feedback {
        Feedback {
            id: Uuid::new_v4(),
            product_id: Uuid::nil(),
            module_id: None,
            rating,
            comment: comment.map(str::to_string),
            section: section.map(str::to_string),
            created_at: Utc::now().into(),
        }
    }

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_empty_aggregate() {
        let summary = aggregate_metrics(&[], &[]);
        assert_eq!(
            summary,
            MetricsSummary {
                total_views: 0,
                total_downloads: 0,
                conversion_rate: 0.0,
                avg_rating: 0.0,
                rating_count: 0,
                trend: Trend::Neutral,
            }
        );
    }

    #[test]
    fn test_conversion_rate() {
        let metrics = vec![metric(day(1), 60, 10), metric(day(2), 40, 15)];
        let summary = aggregate_metrics_at(&metrics, &[], day(20));
        assert_eq!(summary.total_views, 100);
        assert_eq!(summary.total_downloads, 25);
        assert_eq!(summary.conversion_rate, 25.0);
    }

    #[test]
    fn test_rating_average() {
        let fb = vec![feedback(5, None, None), feedback(2, None, None)];
        let summary = aggregate_metrics(&[], &fb);
        assert_eq!(summary.avg_rating, 3.5);
        assert_eq!(summary.rating_count, 2);
    }

    #[test]
    fn test_trend_compares_trailing_weeks() {
        let now = day(15);
        let up = vec![metric(day(3), 0, 1), metric(day(12), 0, 4)];
        assert_eq!(aggregate_metrics_at(&up, &[], now).trend, Trend::Up);

        let down = vec![metric(day(3), 0, 4), metric(day(12), 0, 1)];
        assert_eq!(aggregate_metrics_at(&down, &[], now).trend, Trend::Down);

        // older than two weeks does not count
        let stale = vec![metric(day(1), 0, 9)];
        assert_eq!(aggregate_metrics_at(&stale, &[], now).trend, Trend::Neutral);
    }

    #[test]
    fn test_timeline_buckets() {
        let metrics = vec![metric(day(2), 1, 1), metric(day(1), 1, 0)];
        let timeline = build_timeline(&metrics);
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[0].date, "2024-01-01");
        assert_eq!(timeline[0].conversion, 0.0);
        assert_eq!(timeline[1].date, "2024-01-02");
        assert_eq!(timeline[1].conversion, 100.0);
    }

    #[test]
    fn test_keywords() {
        let fb = vec![
            feedback(5, Some("This app is amazing"), None),
            feedback(4, Some("This app is AMAZING and fast!"), None),
        ];
        let keywords = extract_keywords(&fb);
        let words: Vec<&str> = keywords.iter().map(|k| k.word.as_str()).collect();
        assert_eq!(words, vec!["app", "amazing", "fast"]);
        assert_eq!(keywords[0].count, 2);
        assert_eq!(keywords[1].count, 2);
        assert_eq!(keywords[2].count, 1);
    }

    #[test]
    fn test_keywords_capped() {
        let comment = "word ".repeat(20);
        let distinct: Vec<String> = ('a'..='t').map(|c| format!("{c}{c}{c}")).collect();
        let fb = vec![
            feedback(3, Some(&comment), None),
            feedback(3, Some(&distinct.join(" ")), None),
        ];
        let keywords = extract_keywords(&fb);
        assert_eq!(keywords.len(), TOP_KEYWORDS);
        assert_eq!(keywords[0].word, "word");
        assert_eq!(keywords[0].count, 20);
        assert_eq!(keywords[1].word, "aaa");
    }

    #[test]
    fn test_section_insights_worst_first() {
        let fb = vec![
            feedback(5, None, Some("Intro")),
            feedback(1, None, Some("Pricing")),
            feedback(3, None, Some("Intro")),
            feedback(4, None, None),
        ];
        let insights = section_insights(&fb);
        assert_eq!(insights.len(), 2);
        assert_eq!(insights[0].section, "Pricing");
        assert_eq!(insights[1].avg_rating, 4.0);
        assert_eq!(insights[1].count, 2);
    }

    #[test]
    fn test_rank_versions_counts_downloads_after_release() {
        let module_id = Uuid::new_v4();
        let version = |n: i32, at: DateTime<Utc>| ModuleVersion {
            id: Uuid::new_v4(),
            module_id,
            version_number: n,
            content: format!("v{n}"),
            created_at: at.into(),
        };
        let v1 = version(1, day(1));
        let v2 = version(2, day(10));

        let on_module = |at, downloads| {
            let mut m = metric(at, 0, downloads);
            m.module_id = Some(module_id);
            m
        };
        let metrics = vec![
            on_module(day(5), 10),
            on_module(day(11), 3),
            metric(day(12), 0, 100),
        ];

        let ranked = rank_versions(&[v2.clone(), v1.clone()], &metrics);
        assert_eq!(ranked[0].version, v1);
        assert_eq!(ranked[0].downloads, 13);
        assert_eq!(ranked[1].downloads, 3);
    }
}
