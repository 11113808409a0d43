// src/aggregate.rs
//
// Pure derivations over a results snapshot. Nothing here touches the network.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::warn;

use crate::error::{DashError, DashResult};
use crate::table::{CountyRow, FipsTable, PopulationTable, ResultsTable};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateVotes {
    pub candidate: String,
    pub votes: u64,
}

/// Statewide totals, one entry per candidate column in column order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatewideAggregate {
    pub totals: Vec<CandidateVotes>,
}

impl StatewideAggregate {
    pub fn get(&self, candidate: &str) -> Option<u64> {
        self.totals
            .iter()
            .find(|t| t.candidate == candidate)
            .map(|t| t.votes)
    }
}

pub fn compute_statewide(results: &ResultsTable) -> DashResult<StatewideAggregate> {
    let mut sums = vec![0u64; results.candidates().len()];
    for row in results.rows() {
        for (sum, votes) in sums.iter_mut().zip(&row.votes) {
            *sum = sum.checked_add(*votes).ok_or_else(|| {
                DashError::malformed("results table", "statewide total overflows u64")
            })?;
        }
    }
    let totals = results
        .candidates()
        .iter()
        .zip(sums)
        .map(|(candidate, votes)| CandidateVotes {
            candidate: candidate.clone(),
            votes,
        })
        .collect();
    Ok(StatewideAggregate { totals })
}

/// A results table with each county's FIPS code attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinedResults {
    fips: Vec<String>,
    results: ResultsTable,
}

impl JoinedResults {
    pub fn results(&self) -> &ResultsTable {
        &self.results
    }

    /// `(fips, row)` pairs in results order.
    pub fn rows(&self) -> impl Iterator<Item = (&str, &CountyRow)> {
        self.fips
            .iter()
            .map(String::as_str)
            .zip(self.results.rows())
    }

    pub fn fips_for(&self, county: &str) -> Option<&str> {
        self.rows()
            .find(|(_, row)| row.county == county)
            .map(|(fips, _)| fips)
    }

    /// Drops the FIPS column again.
    pub fn project_results(self) -> ResultsTable {
        self.results
    }

    pub fn pivot_county(
        &self,
        county: &str,
        candidates: Option<&[String]>,
    ) -> DashResult<CountyResult> {
        let mut pivot = pivot_county(&self.results, county, candidates)?;
        pivot.fips = self.fips_for(county).map(str::to_string);
        Ok(pivot)
    }
}

/// Joins FIPS codes onto `results` by county name.
///
/// Every county must appear in both tables; otherwise the join fails listing
/// the names found on only one side.
pub fn join_fips(results: ResultsTable, fips: &FipsTable) -> DashResult<JoinedResults> {
    let by_county: HashMap<&str, &str> = fips
        .rows()
        .iter()
        .map(|r| (r.county.as_str(), r.fips.as_str()))
        .collect();

    let missing_fips: Vec<String> = results
        .counties()
        .filter(|c| !by_county.contains_key(c))
        .map(str::to_string)
        .collect();
    let present: HashSet<&str> = results.counties().collect();
    let missing_results: Vec<String> = fips
        .rows()
        .iter()
        .filter(|r| !present.contains(r.county.as_str()))
        .map(|r| r.county.clone())
        .collect();

    if !missing_fips.is_empty() || !missing_results.is_empty() {
        warn!(?missing_fips, ?missing_results, "FIPS join mismatch");
        return Err(DashError::JoinMismatch {
            missing_fips,
            missing_results,
        });
    }

    let codes = results
        .counties()
        .map(|c| by_county[c].to_string())
        .collect();
    Ok(JoinedResults {
        fips: codes,
        results,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountyWinner {
    pub county: String,
    pub winner: String,
}

fn resolve_columns(results: &ResultsTable, columns: &[String]) -> DashResult<Vec<usize>> {
    if columns.is_empty() {
        return Err(DashError::config("no candidate columns to pick a winner from"));
    }
    columns
        .iter()
        .map(|c| {
            results
                .column_index(c)
                .ok_or_else(|| DashError::UnknownColumn { column: c.clone() })
        })
        .collect()
}

/// Index into `columns` of the first column holding the row maximum.
fn first_max(row: &CountyRow, columns: &[usize]) -> usize {
    let mut best = 0;
    for (i, &col) in columns.iter().enumerate().skip(1) {
        if row.votes[col] > row.votes[columns[best]] {
            best = i;
        }
    }
    best
}

/// Winner per county over `candidate_columns`; ties go to the column listed first.
pub fn compute_winner(
    results: &ResultsTable,
    candidate_columns: &[String],
) -> DashResult<Vec<CountyWinner>> {
    let columns = resolve_columns(results, candidate_columns)?;
    Ok(results
        .rows()
        .iter()
        .map(|row| CountyWinner {
            county: row.county.clone(),
            winner: candidate_columns[first_max(row, &columns)].clone(),
        })
        .collect())
}

/// One county's results transposed to (candidate, votes) rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountyResult {
    pub county: String,
    pub fips: Option<String>,
    pub votes: Vec<CandidateVotes>,
    pub winner: Option<String>,
}

impl CountyResult {
    pub fn total(&self) -> u64 {
        self.votes.iter().map(|v| v.votes).sum()
    }
}

/// Pivots `county` out of `results`.
///
/// The winner is picked over `candidates` the same way [`compute_winner`]
/// picks it; `None` means every column in table order.
pub fn pivot_county(
    results: &ResultsTable,
    county: &str,
    candidates: Option<&[String]>,
) -> DashResult<CountyResult> {
    let row = results
        .row(county)
        .ok_or_else(|| DashError::SelectionNotFound {
            county: county.to_string(),
        })?;
    let votes = results
        .candidates()
        .iter()
        .zip(&row.votes)
        .map(|(candidate, votes)| CandidateVotes {
            candidate: candidate.clone(),
            votes: *votes,
        })
        .collect::<Vec<_>>();
    let winner = match candidates {
        Some(names) => {
            let columns = resolve_columns(results, names)?;
            Some(names[first_max(row, &columns)].clone())
        }
        None => {
            let all: Vec<usize> = (0..votes.len()).collect();
            (!all.is_empty()).then(|| votes[first_max(row, &all)].candidate.clone())
        }
    };

    Ok(CountyResult {
        county: county.to_string(),
        fips: None,
        votes,
        winner,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ChoroplethValue {
    Label(String),
    Count(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChoroplethEntry {
    pub fips: String,
    pub value: ChoroplethValue,
}

/// Map-ready `(FIPS, value)` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChoroplethTable {
    pub legend: String,
    pub entries: Vec<ChoroplethEntry>,
}

impl ChoroplethTable {
    pub fn get(&self, fips: &str) -> Option<&ChoroplethValue> {
        self.entries
            .iter()
            .find(|e| e.fips == fips)
            .map(|e| &e.value)
    }
}

pub fn winner_choropleth(
    joined: &JoinedResults,
    candidates: &[String],
) -> DashResult<ChoroplethTable> {
    let winners = compute_winner(joined.results(), candidates)?;
    let entries = joined
        .rows()
        .zip(winners)
        .map(|((fips, _), w)| ChoroplethEntry {
            fips: fips.to_string(),
            value: ChoroplethValue::Label(w.winner),
        })
        .collect();
    Ok(ChoroplethTable {
        legend: "Majority Vote by County".to_string(),
        entries,
    })
}

pub fn population_choropleth(population: &PopulationTable) -> ChoroplethTable {
    ChoroplethTable {
        legend: "Total Population".to_string(),
        entries: population
            .rows
            .iter()
            .map(|r| ChoroplethEntry {
                fips: r.fips.clone(),
                value: ChoroplethValue::Count(r.population),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{FipsRow, PopulationRow};

    fn table(candidates: &[&str], rows: &[(&str, &[u64])]) -> ResultsTable {
        ResultsTable::new(
            candidates.iter().map(|c| c.to_string()).collect(),
            rows.iter()
                .map(|(county, votes)| CountyRow {
                    county: county.to_string(),
                    votes: votes.to_vec(),
                })
                .collect(),
        )
        .unwrap()
    }

    fn appling_fulton() -> ResultsTable {
        table(
            &["A", "B"],
            &[("Appling", &[100, 50]), ("Fulton", &[9000, 9500])],
        )
    }

    fn fips(rows: &[(&str, &str)]) -> FipsTable {
        FipsTable::new(
            rows.iter()
                .map(|(county, fips)| FipsRow {
                    county: county.to_string(),
                    fips: fips.to_string(),
                })
                .collect(),
        )
        .unwrap()
    }

    fn names(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn appling_fulton_scenario() {
        let results = appling_fulton();
        let statewide = compute_statewide(&results).unwrap();
        assert_eq!(statewide.get("A"), Some(9100));
        assert_eq!(statewide.get("B"), Some(9550));

        let winners = compute_winner(&results, &names(&["A", "B"])).unwrap();
        assert_eq!(
            winners,
            vec![
                CountyWinner {
                    county: "Appling".into(),
                    winner: "A".into()
                },
                CountyWinner {
                    county: "Fulton".into(),
                    winner: "B".into()
                },
            ]
        );
    }

    #[test]
    fn statewide_conserves_column_sums() {
        let results = table(
            &["X", "Y", "Z"],
            &[
                ("Bacon", &[1, 2, 3]),
                ("Baker", &[10, 0, 7]),
                ("Banks", &[0, 0, 0]),
                ("Bibb", &[123, 456, 789]),
            ],
        );
        let statewide = compute_statewide(&results).unwrap();
        for (i, candidate) in results.candidates().iter().enumerate() {
            let expected: u64 = results.rows().iter().map(|r| r.votes[i]).sum();
            assert_eq!(statewide.get(candidate), Some(expected));
        }
        let order: Vec<_> = statewide.totals.iter().map(|t| t.candidate.as_str()).collect();
        assert_eq!(order, vec!["X", "Y", "Z"]);
    }

    #[test]
    fn statewide_overflow_is_reported() {
        let results = table(&["A"], &[("Bacon", &[u64::MAX]), ("Baker", &[1])]);
        assert!(compute_statewide(&results).is_err());
    }

    #[test]
    fn ties_go_to_the_first_supplied_column() {
        let results = table(&["A", "B", "C"], &[("Bacon", &[5, 7, 7])]);
        for _ in 0..3 {
            let w = compute_winner(&results, &names(&["B", "C"])).unwrap();
            assert_eq!(w[0].winner, "B");
            let w = compute_winner(&results, &names(&["C", "B"])).unwrap();
            assert_eq!(w[0].winner, "C");
        }
    }

    #[test]
    fn winner_is_idempotent() {
        let results = appling_fulton();
        let cols = names(&["A", "B"]);
        let first = compute_winner(&results, &cols).unwrap();
        let second = compute_winner(&results, &cols).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn winner_over_a_subset_of_columns() {
        let results = table(&["A", "B", "C"], &[("Bacon", &[5, 1, 9])]);
        let w = compute_winner(&results, &names(&["A", "B"])).unwrap();
        assert_eq!(w[0].winner, "A");
    }

    #[test]
    fn winner_rejects_unknown_or_empty_columns() {
        let results = appling_fulton();
        assert_eq!(
            compute_winner(&results, &names(&["A", "Q"])).unwrap_err(),
            DashError::UnknownColumn { column: "Q".into() }
        );
        assert!(compute_winner(&results, &[]).is_err());
    }

    #[test]
    fn pivot_has_one_row_per_candidate() {
        let results = table(
            &["A", "B", "C"],
            &[("Bacon", &[1, 2, 3]), ("Fulton", &[40, 50, 60])],
        );
        let pivot = pivot_county(&results, "Fulton", None).unwrap();
        assert_eq!(pivot.votes.len(), results.candidates().len());
        assert_eq!(pivot.total(), results.row("Fulton").unwrap().total());
        assert_eq!(pivot.votes[1].candidate, "B");
        assert_eq!(pivot.winner.as_deref(), Some("C"));
    }

    #[test]
    fn pivot_winner_follows_the_candidate_list() {
        let results = appling_fulton();
        let only_a = names(&["A"]);
        let pivot = pivot_county(&results, "Fulton", Some(&only_a)).unwrap();
        assert_eq!(pivot.winner.as_deref(), Some("A"));
        assert_eq!(pivot.votes.len(), 2);

        let winners = compute_winner(&results, &only_a).unwrap();
        assert_eq!(winners[1].winner, pivot.winner.unwrap());

        let tied = table(&["A", "B"], &[("Bacon", &[7, 7])]);
        let b_first = names(&["B", "A"]);
        let pivot = pivot_county(&tied, "Bacon", Some(&b_first)).unwrap();
        assert_eq!(pivot.winner.as_deref(), Some("B"));

        assert_eq!(
            pivot_county(&results, "Fulton", Some(&names(&["Q"]))).unwrap_err(),
            DashError::UnknownColumn { column: "Q".into() }
        );
    }

    #[test]
    fn pivot_of_unknown_county_is_not_found() {
        let err = pivot_county(&appling_fulton(), "Atlantis", None).unwrap_err();
        assert_eq!(
            err,
            DashError::SelectionNotFound {
                county: "Atlantis".into()
            }
        );
    }

    #[test]
    fn join_is_keyed_not_positional() {
        // FIPS rows deliberately in a different order than results.
        let joined = join_fips(
            appling_fulton(),
            &fips(&[("Fulton", "13121"), ("Appling", "13001")]),
        )
        .unwrap();
        assert_eq!(joined.fips_for("Appling"), Some("13001"));
        assert_eq!(joined.fips_for("Fulton"), Some("13121"));
        let order: Vec<_> = joined.rows().map(|(f, _)| f).collect();
        assert_eq!(order, vec!["13001", "13121"]);
    }

    #[test]
    fn join_mismatch_names_both_sides() {
        let err = join_fips(
            appling_fulton(),
            &fips(&[("Appling", "13001"), ("FULTON", "13121")]),
        )
        .unwrap_err();
        assert_eq!(
            err,
            DashError::JoinMismatch {
                missing_fips: vec!["Fulton".into()],
                missing_results: vec!["FULTON".into()],
            }
        );
    }

    #[test]
    fn join_rejects_extra_reference_rows() {
        let err = join_fips(
            appling_fulton(),
            &fips(&[
                ("Appling", "13001"),
                ("Fulton", "13121"),
                ("Bacon", "13005"),
            ]),
        )
        .unwrap_err();
        assert!(matches!(err, DashError::JoinMismatch { ref missing_results, .. } if missing_results == &vec!["Bacon".to_string()]));
    }

    #[test]
    fn join_round_trips() {
        let original = appling_fulton();
        let reference = fips(&[("Appling", "13001"), ("Fulton", "13121")]);
        let projected = join_fips(original.clone(), &reference)
            .unwrap()
            .project_results();
        assert_eq!(projected, original);
        let rejoined = join_fips(projected, &reference).unwrap();
        assert_eq!(rejoined.results(), &original);
    }

    #[test]
    fn joined_pivot_carries_fips() {
        let joined = join_fips(
            appling_fulton(),
            &fips(&[("Appling", "13001"), ("Fulton", "13121")]),
        )
        .unwrap();
        let pivot = joined.pivot_county("Appling", None).unwrap();
        assert_eq!(pivot.fips.as_deref(), Some("13001"));
        assert_eq!(pivot.winner.as_deref(), Some("A"));
    }

    #[test]
    fn winner_choropleth_pairs_fips_with_winner() {
        let joined = join_fips(
            appling_fulton(),
            &fips(&[("Appling", "13001"), ("Fulton", "13121")]),
        )
        .unwrap();
        let map = winner_choropleth(&joined, &names(&["A", "B"])).unwrap();
        assert_eq!(map.get("13001"), Some(&ChoroplethValue::Label("A".into())));
        assert_eq!(map.get("13121"), Some(&ChoroplethValue::Label("B".into())));
    }

    #[test]
    fn population_choropleth_uses_counts() {
        let pop = PopulationTable {
            state: "Georgia".into(),
            rows: vec![PopulationRow {
                fips: "13001".into(),
                population: 18386,
            }],
        };
        let map = population_choropleth(&pop);
        assert_eq!(map.get("13001"), Some(&ChoroplethValue::Count(18386)));
        assert_eq!(
            serde_json::to_value(&map.entries[0]).unwrap(),
            serde_json::json!({"fips": "13001", "value": 18386})
        );
    }
}
