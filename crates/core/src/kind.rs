//! Prediction types and the historical data sources that feed them.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// What a model predicts.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionType {
    Failure,
    Load,
    Behavior,
    Trend,
}

impl PredictionType {
    pub const ALL: [PredictionType; 4] = [
        PredictionType::Failure,
        PredictionType::Load,
        PredictionType::Behavior,
        PredictionType::Trend,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionType::Failure => "failure",
            PredictionType::Load => "load",
            PredictionType::Behavior => "behavior",
            PredictionType::Trend => "trend",
        }
    }

    /// Historical data source that feeds predictions of this type.
    pub fn data_source(&self) -> DataSourceKind {
        match self {
            PredictionType::Failure => DataSourceKind::SystemLogs,
            PredictionType::Load => DataSourceKind::PerformanceMetrics,
            PredictionType::Behavior => DataSourceKind::UserBehavior,
            PredictionType::Trend => DataSourceKind::BusinessMetrics,
        }
    }

    /// How far ahead (hours) a prediction of this type looks.
    pub fn time_horizon_hours(&self) -> u32 {
        match self {
            PredictionType::Failure => 24,
            PredictionType::Load => 6,
            PredictionType::Behavior => 72,
            PredictionType::Trend => 168,
        }
    }
}

impl core::fmt::Display for PredictionType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PredictionType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "failure" => Ok(PredictionType::Failure),
            "load" => Ok(PredictionType::Load),
            "behavior" => Ok(PredictionType::Behavior),
            "trend" => Ok(PredictionType::Trend),
            other => Err(DomainError::invalid_id(format!(
                "PredictionType: unknown `{other}`"
            ))),
        }
    }
}

/// Historical data sources consumed from collaborators.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSourceKind {
    SystemLogs,
    PerformanceMetrics,
    UserBehavior,
    BusinessMetrics,
}

impl DataSourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSourceKind::SystemLogs => "system_logs",
            DataSourceKind::PerformanceMetrics => "performance_metrics",
            DataSourceKind::UserBehavior => "user_behavior",
            DataSourceKind::BusinessMetrics => "business_metrics",
        }
    }
}

impl core::fmt::Display for DataSourceKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_type_parses_from_its_own_name() {
        for t in PredictionType::ALL {
            assert_eq!(t.as_str().parse::<PredictionType>().unwrap(), t);
        }
        assert!("weather".parse::<PredictionType>().is_err());
    }

    #[test]
    fn serde_uses_snake_case_tags() {
        let json = serde_json::to_string(&DataSourceKind::PerformanceMetrics).unwrap();
        assert_eq!(json, "\"performance_metrics\"");
    }
}
