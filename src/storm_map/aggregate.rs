// storm_map - Heat map of recent storm reports served over HTTP
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::geocode::PostalLookup;
use crate::report::{GeoPoint, StormReport};
use std::collections::HashMap;

/// Number of reports per postal code, most common first.
///
/// Postal codes with the same count keep the order in which they were first seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZipFrequencyTable {
    entries: Vec<(String, usize)>,
}

impl ZipFrequencyTable {
    pub fn from_codes<'a, I>(codes: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut index: HashMap<&str, usize> = HashMap::new();
        let mut entries: Vec<(String, usize)> = Vec::new();

        for code in codes {
            match index.get(code) {
                Some(&i) => entries[i].1 += 1,
                None => {
                    index.insert(code, entries.len());
                    entries.push((code.to_owned(), 1));
                }
            }
        }

        // sort_by is stable, ties stay in first-seen order
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        ZipFrequencyTable { entries }
    }

    pub fn entries(&self) -> &[(String, usize)] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.entries.iter().map(|(code, count)| (code.as_str(), *count))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all counts, the number of reports that resolved to a postal code.
    pub fn total(&self) -> usize {
        self.entries.iter().map(|(_, count)| count).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregation {
    pub heat_points: Vec<GeoPoint>,
    pub zip_counts: ZipFrequencyTable,
}

/// Build heat map points and postal code counts for a set of reports.
///
/// `lookups` is matched to `reports` by position. Every report contributes a heat map point
/// whether or not its lookup found a postal code.
pub fn aggregate(reports: &[StormReport], lookups: &[PostalLookup]) -> Aggregation {
    let heat_points = reports.iter().map(|r| r.point).collect();
    let zip_counts = ZipFrequencyTable::from_codes(
        lookups
            .iter()
            .take(reports.len())
            .filter_map(|l| l.postal_code.as_deref())
            .filter(|c| !c.is_empty()),
    );

    Aggregation { heat_points, zip_counts }
}

#[cfg(test)]
mod test {
    use super::{aggregate, ZipFrequencyTable};
    use crate::geocode::PostalLookup;
    use crate::report::{GeoPoint, StormReport};

    fn report(lat: f64, lon: f64) -> StormReport {
        StormReport {
            report_type: "HAIL".to_owned(),
            state: "CO".to_owned(),
            point: GeoPoint::new(lat, lon),
            size: None,
            remark: None,
        }
    }

    #[test]
    fn test_from_codes_sorted_by_count() {
        let table = ZipFrequencyTable::from_codes(vec!["80202", "80301", "80202"]);
        assert_eq!(
            &[("80202".to_owned(), 2), ("80301".to_owned(), 1)],
            table.entries()
        );
    }

    #[test]
    fn test_from_codes_ties_first_seen() {
        let table = ZipFrequencyTable::from_codes(vec!["81001", "80903", "80202", "80903", "81001", "80202"]);
        let codes: Vec<&str> = table.iter().map(|(c, _)| c).collect();

        assert_eq!(vec!["81001", "80903", "80202"], codes);
        assert_eq!(6, table.total());
    }

    #[test]
    fn test_aggregate_failed_lookups() {
        let reports = vec![
            report(39.74, -104.99),
            report(39.75, -104.98),
            report(40.01, -105.27),
            report(38.83, -104.82),
        ];
        let lookups = vec![
            PostalLookup::found("80202"),
            PostalLookup::found("80202"),
            PostalLookup::found("80301"),
            PostalLookup::none(),
        ];

        let agg = aggregate(&reports, &lookups);

        assert_eq!(4, agg.heat_points.len());
        assert_eq!(GeoPoint::new(39.74, -104.99), agg.heat_points[0]);
        assert_eq!(GeoPoint::new(38.83, -104.82), agg.heat_points[3]);
        assert_eq!(
            &[("80202".to_owned(), 2), ("80301".to_owned(), 1)],
            agg.zip_counts.entries()
        );
        assert_eq!(3, agg.zip_counts.total());
    }

    #[test]
    fn test_aggregate_empty() {
        let agg = aggregate(&[], &[]);
        assert!(agg.heat_points.is_empty());
        assert!(agg.zip_counts.is_empty());
    }

    #[test]
    fn test_aggregate_empty_code_ignored() {
        let reports = vec![report(39.74, -104.99)];
        let lookups = vec![PostalLookup::found("")];

        let agg = aggregate(&reports, &lookups);
        assert_eq!(1, agg.heat_points.len());
        assert!(agg.zip_counts.is_empty());
    }
}
