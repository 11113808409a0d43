// src/fetch/query.rs

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which vote-type column the provider aggregates into each candidate cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultColumn {
    ElectionDay,
    Provisional,
    AbsenteeByMail,
    AdvanceInPerson,
    #[default]
    TotalVotes,
}

impl ResultColumn {
    pub const ALL: [ResultColumn; 5] = [
        ResultColumn::ElectionDay,
        ResultColumn::Provisional,
        ResultColumn::AbsenteeByMail,
        ResultColumn::AdvanceInPerson,
        ResultColumn::TotalVotes,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResultColumn::ElectionDay => "election_day",
            ResultColumn::Provisional => "provisional",
            ResultColumn::AbsenteeByMail => "absentee_by_mail",
            ResultColumn::AdvanceInPerson => "advance_in_person",
            ResultColumn::TotalVotes => "total_votes",
        }
    }
}

impl fmt::Display for ResultColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Demographic grouping key for distribution queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    #[serde(rename = "age_grp")]
    AgeGroup,
    #[serde(rename = "gender")]
    Gender,
    #[serde(rename = "race")]
    Race,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::AgeGroup, Axis::Gender, Axis::Race];

    pub fn as_str(self) -> &'static str {
        match self {
            Axis::AgeGroup => "age_grp",
            Axis::Gender => "gender",
            Axis::Race => "race",
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const DEFAULT_METRIC: &str = "voted";

/// `/get_results` parameters. Defaults select the 2016 presidential contest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsQuery {
    /// Contest number, sent as `sheet_number`.
    pub contest: u32,
    pub year: u16,
    pub month: u8,
    pub column: ResultColumn,
}

impl Default for ResultsQuery {
    fn default() -> Self {
        Self {
            contest: 2,
            year: 2016,
            month: 11,
            column: ResultColumn::TotalVotes,
        }
    }
}

impl ResultsQuery {
    pub fn params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("sheet_number", self.contest.to_string()),
            ("year", self.year.to_string()),
            ("month", self.month.to_string()),
            ("result_column", self.column.to_string()),
        ]
    }
}

/// `/get_turnout` parameters. Filters left as `None` are not sent at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnoutQuery {
    pub year: u16,
    pub month: u8,
    pub race: Option<String>,
    pub gender: Option<String>,
    pub age_grp: Option<String>,
}

impl Default for TurnoutQuery {
    fn default() -> Self {
        Self {
            year: 2016,
            month: 11,
            race: None,
            gender: None,
            age_grp: None,
        }
    }
}

impl TurnoutQuery {
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("year", self.year.to_string()),
            ("month", self.month.to_string()),
        ];
        let filters = [
            ("race", &self.race),
            ("gender", &self.gender),
            ("age_grp", &self.age_grp),
        ];
        for (key, value) in filters {
            if let Some(v) = value.as_deref().filter(|v| !v.is_empty()) {
                params.push((key, v.to_string()));
            }
        }
        params
    }
}

/// `/get_distribution` parameters for one county along one axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionQuery {
    pub county: String,
    pub year: u16,
    pub month: u8,
    pub axis: Axis,
    pub metric: String,
}

impl DistributionQuery {
    pub fn new(county: impl Into<String>, axis: Axis) -> Self {
        Self {
            county: county.into(),
            year: 2016,
            month: 11,
            axis,
            metric: DEFAULT_METRIC.to_string(),
        }
    }

    pub fn params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("county_name", self.county.clone()),
            ("year", self.year.to_string()),
            ("month", self.month.to_string()),
            ("axis", self.axis.to_string()),
            ("metric", self.metric.clone()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_defaults_match_the_presidential_contest() {
        let params = ResultsQuery::default().params();
        assert_eq!(
            params,
            vec![
                ("sheet_number", "2".to_string()),
                ("year", "2016".to_string()),
                ("month", "11".to_string()),
                ("result_column", "total_votes".to_string()),
            ]
        );
    }

    #[test]
    fn result_column_wire_names() {
        let names: Vec<_> = ResultColumn::ALL.iter().map(|c| c.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "election_day",
                "provisional",
                "absentee_by_mail",
                "advance_in_person",
                "total_votes"
            ]
        );
        let parsed: ResultColumn = serde_yaml::from_str("absentee_by_mail").unwrap();
        assert_eq!(parsed, ResultColumn::AbsenteeByMail);
    }

    #[test]
    fn turnout_omits_unset_filters() {
        let q = TurnoutQuery {
            gender: Some("F".into()),
            race: Some(String::new()),
            ..Default::default()
        };
        let keys: Vec<_> = q.params().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["year", "month", "gender"]);
    }

    #[test]
    fn distribution_defaults_to_voted() {
        let q = DistributionQuery::new("Fulton", Axis::AgeGroup);
        let params = q.params();
        assert!(params.contains(&("axis", "age_grp".to_string())));
        assert!(params.contains(&("metric", "voted".to_string())));
        assert!(params.contains(&("county_name", "Fulton".to_string())));
    }
}
