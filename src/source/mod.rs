//! Remote bar retrieval
//!
//! Fetches a zip archive of CSV bar files over HTTP and parses it into the
//! shape the series cache expects. Providers that publish daily dumps (one
//! file per symbol, `date,open,high,low,close,volume` rows) can be consumed
//! through [ZippedCsvSource] without a dedicated adapter.

use std::io::{Cursor, Read, Write};

use crate::input::{Bar, FetchError, MarketDataSource};
use crate::types::{DateTime, Interval};

/// Parse `date,open,high,low,close,volume` CSV rows into bars. Kept separate
/// from the network path so the parsing can be exercised offline.
pub fn parse_bar_records<R: Read>(reader: R) -> Result<Vec<Bar>, FetchError> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut bars = Vec::new();
    for row in rdr.deserialize::<Bar>() {
        let bar = row.map_err(|err| FetchError::Transient(err.to_string()))?;
        bars.push(bar);
    }
    bars.sort_by_key(|b| b.date);
    Ok(bars)
}

/// Download a zip archive and parse every contained CSV file into one bar
/// series.
pub fn fetch_zipped_csv_bars(url: &str) -> Result<Vec<Bar>, FetchError> {
    let resp = reqwest::blocking::get(url).map_err(|err| FetchError::Transient(err.to_string()))?;
    let contents = resp
        .bytes()
        .map_err(|err| FetchError::Transient(err.to_string()))?;

    let mut c = Cursor::new(Vec::new());
    let _res = c.write(&contents);

    let mut zip =
        zip::ZipArchive::new(c).map_err(|err| FetchError::Transient(err.to_string()))?;
    let mut bars = Vec::new();
    for i in 0..zip.len() {
        if let Ok(zip_file) = zip.by_index(i) {
            bars.extend(parse_bar_records(zip_file)?);
        }
    }
    bars.sort_by_key(|b| b.date);
    Ok(bars)
}

/// Day-bar source over an HTTP provider publishing zipped CSV dumps. The URL
/// template substitutes `{symbol}` per request.
pub struct ZippedCsvSource {
    url_template: String,
}

impl ZippedCsvSource {
    pub fn new(url_template: impl Into<String>) -> Self {
        Self {
            url_template: url_template.into(),
        }
    }
}

impl MarketDataSource for ZippedCsvSource {
    fn fetch(
        &self,
        symbol: &str,
        interval: Interval,
        start: DateTime,
        end: DateTime,
    ) -> Result<Vec<Bar>, FetchError> {
        if interval == Interval::Minute {
            //Dump providers publish daily aggregates only
            return Err(FetchError::UnknownSymbol(symbol.to_string()));
        }
        let url = self.url_template.replace("{symbol}", symbol);
        let bars = fetch_zipped_csv_bars(&url)?;
        Ok(bars
            .into_iter()
            .filter(|b| b.date >= *start && b.date < *end)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::parse_bar_records;

    #[test]
    fn test_that_csv_rows_parse_in_timestamp_order() {
        let rows = "date,open,high,low,close,volume\n\
                    200,101.0,102.0,100.0,101.5,900\n\
                    100,100.0,101.0,99.0,100.5,1000\n";
        let bars = parse_bar_records(rows.as_bytes()).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date, 100);
        assert_eq!(bars[1].close, 101.5);
    }

    #[test]
    fn test_that_malformed_rows_are_a_transient_error() {
        let rows = "date,open,high,low,close,volume\nnot,a,real,row,at,all\n";
        assert!(parse_bar_records(rows.as_bytes()).is_err());
    }
}
