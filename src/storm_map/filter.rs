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

use crate::report::StormReport;

/// Predicate selecting reports for a single region and, optionally, a single report type.
///
/// Codes are compared case-insensitively. When no report type is set, reports of every
/// type in the region match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportFilter {
    region: String,
    report_type: Option<String>,
}

impl ReportFilter {
    pub fn new<S: Into<String>>(region: S, report_type: Option<String>) -> Self {
        ReportFilter {
            region: region.into(),
            report_type,
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn report_type(&self) -> Option<&str> {
        self.report_type.as_deref()
    }

    pub fn matches(&self, report: &StormReport) -> bool {
        report.state.eq_ignore_ascii_case(&self.region)
            && self
                .report_type
                .as_ref()
                .map_or(true, |t| report.report_type.eq_ignore_ascii_case(t))
    }

    pub fn apply(&self, reports: Vec<StormReport>) -> Vec<StormReport> {
        reports.into_iter().filter(|r| self.matches(r)).collect()
    }
}
