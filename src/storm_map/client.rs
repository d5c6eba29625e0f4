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

use crate::report::{self, RawReport};
use chrono::{Duration, NaiveDate};
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Client, Response, StatusCode, Url};
use std::error;
use std::fmt;

const DATE_FORMAT: &str = "%Y%m%d";

#[derive(Debug)]
pub enum FetchError {
    Internal(reqwest::Error),
    InvalidUrl(String),
    Unexpected(StatusCode, Url),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal(e) => write!(f, "{}", e),
            Self::InvalidUrl(u) => write!(f, "invalid report API URL {}", u),
            Self::Unexpected(status, url) => write!(f, "unexpected status {} for {}", status, url),
        }
    }
}

impl error::Error for FetchError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Internal(e) => Some(e),
            _ => None,
        }
    }
}

/// Inclusive range of calendar days to request reports for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    /// Create a new range, or `None` if `end` is before `start`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        if end < start {
            None
        } else {
            Some(DateRange { start, end })
        }
    }

    /// Range covering the `days` days before `today`, through `today`, or `None` if the
    /// start would be before the earliest representable date.
    pub fn lookback(today: NaiveDate, days: u32) -> Option<Self> {
        let start = today.checked_sub_signed(Duration::days(i64::from(days)))?;
        Some(DateRange { start, end: today })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start.format(DATE_FORMAT), self.end.format(DATE_FORMAT))
    }
}

/// Client for fetching storm reports for a range of dates.
///
/// Each call makes exactly one request: failures are returned to the caller and never
/// retried here.
#[derive(Debug)]
pub struct ReportClient {
    client: Client,
    base_url: Url,
}

impl ReportClient {
    const USER_AGENT: &'static str = concat!("storm_map/", env!("CARGO_PKG_VERSION"));
    const JSON_RESPONSE: &'static str = "application/json";

    pub fn new(client: Client, base_url: &str) -> Result<Self, FetchError> {
        let base_url = Url::parse(base_url).map_err(|_| FetchError::InvalidUrl(base_url.to_owned()))?;
        Ok(ReportClient { client, base_url })
    }

    pub async fn reports(&self, range: &DateRange) -> Result<Vec<RawReport>, FetchError> {
        let request_url = self.reports_url(range);
        tracing::debug!(message = "making storm reports request", url = %request_url);

        let res = self.make_request(request_url).await?;
        let values = res
            .json::<Vec<serde_json::Value>>()
            .await
            .map_err(FetchError::Internal)?;

        Ok(report::parse_records(values))
    }

    async fn make_request(&self, url: Url) -> Result<Response, FetchError> {
        let res = self
            .client
            .get(url.clone())
            .header(USER_AGENT, Self::USER_AGENT)
            .header(ACCEPT, Self::JSON_RESPONSE)
            .send()
            .await
            .map_err(FetchError::Internal)?;

        let status = res.status();
        if status == StatusCode::OK {
            Ok(res)
        } else {
            Err(FetchError::Unexpected(status, url))
        }
    }

    fn reports_url(&self, range: &DateRange) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("start", &range.start.format(DATE_FORMAT).to_string())
            .append_pair("end", &range.end.format(DATE_FORMAT).to_string())
            .append_pair("combine", "true")
            .append_pair("json", "true");

        url
    }
}

#[cfg(test)]
mod test {
    use super::{DateRange, ReportClient};
    use chrono::NaiveDate;
    use reqwest::Client;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_date_range_rejects_reversed() {
        assert!(DateRange::new(date(2024, 6, 2), date(2024, 6, 1)).is_none());
        assert!(DateRange::new(date(2024, 6, 1), date(2024, 6, 1)).is_some());
    }

    #[test]
    fn test_date_range_lookback() {
        let range = DateRange::lookback(date(2024, 3, 3), 7).unwrap();
        assert_eq!(date(2024, 2, 25), range.start());
        assert_eq!(date(2024, 3, 3), range.end());
        assert_eq!("20240225-20240303", range.to_string());
    }

    #[test]
    fn test_date_range_lookback_overflow() {
        assert!(DateRange::lookback(date(2024, 6, 8), u32::MAX).is_none());
        assert!(DateRange::lookback(NaiveDate::MIN, 1).is_none());
        assert_eq!(Some(NaiveDate::MIN), DateRange::lookback(NaiveDate::MIN, 0).map(|r| r.start()));
    }

    #[test]
    fn test_reports_url() {
        let client = ReportClient::new(Client::new(), "https://reports.example.com/api/reports").unwrap();
        let url = client.reports_url(&DateRange::lookback(date(2024, 6, 15), 14).unwrap());

        assert_eq!(
            "https://reports.example.com/api/reports?start=20240601&end=20240615&combine=true&json=true",
            url.as_str()
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(ReportClient::new(Client::new(), "not a url").is_err());
    }
}
