// src/analytics/metrics.rs

/// A named SQL statement over `fact_sustainability_metric`. The single `?`
/// placeholder is bound to the metric name the query aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricQuery {
    pub name: &'static str,
    pub title: &'static str,
    pub metric_name: &'static str,
    pub sql: &'static str,
}

pub const MONTHLY_ENERGY_BY_REGION: MetricQuery = MetricQuery {
    name: "monthly_energy_by_region",
    title: "Total Energy Consumption by Region",
    metric_name: "energy_mwh",
    sql: "
SELECT
    region,
    CAST(date_trunc('month', metric_date) AS DATE) AS month_start,
    SUM(metric_value) AS total_energy_mwh
FROM fact_sustainability_metric
WHERE metric_name = ?
GROUP BY region, CAST(date_trunc('month', metric_date) AS DATE)
ORDER BY region, month_start
",
};

pub const AVERAGE_EMISSIONS_BY_REGION: MetricQuery = MetricQuery {
    name: "average_emissions_by_region",
    title: "Average Emissions by Region",
    metric_name: "emissions_tco2",
    sql: "
SELECT
    region,
    AVG(metric_value) AS avg_emissions_tco2
FROM fact_sustainability_metric
WHERE metric_name = ?
GROUP BY region
ORDER BY avg_emissions_tco2 DESC, region
",
};

/// LAG over the region's month-ordered rows: a missing month is not filled,
/// the delta is taken against whichever month precedes it in the data.
pub const ENERGY_TREND_MONTH_OVER_MONTH: MetricQuery = MetricQuery {
    name: "energy_trend_month_over_month",
    title: "Energy Trend (Month over Month)",
    metric_name: "energy_mwh",
    sql: "
WITH monthly_energy AS (
    SELECT
        region,
        CAST(date_trunc('month', metric_date) AS DATE) AS month_start,
        SUM(metric_value) AS energy_mwh
    FROM fact_sustainability_metric
    WHERE metric_name = ?
    GROUP BY region, CAST(date_trunc('month', metric_date) AS DATE)
)
SELECT
    region,
    month_start,
    energy_mwh,
    energy_mwh - LAG(energy_mwh) OVER (
        PARTITION BY region ORDER BY month_start
    ) AS month_over_month_change
FROM monthly_energy
ORDER BY region, month_start
",
};

/// Every query `analytics` runs, in print order.
pub const ALL_METRICS: &[MetricQuery] = &[
    MONTHLY_ENERGY_BY_REGION,
    AVERAGE_EMISSIONS_BY_REGION,
    ENERGY_TREND_MONTH_OVER_MONTH,
];
