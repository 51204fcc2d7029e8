use anyhow::{Context, Result};
use regex::{Captures, Regex};

use crate::error::{DropError, DropResult};
use crate::model::{DropKind, ParsedIdentity};

const LOAD_SUFFIXES: [&str; 4] = [".csv.gz", ".parquet.gz", ".csv", ".parquet"];

/// Derives `{site, year, month, day}` from a drop basename. The grammar is
/// chosen by the caller's kind, never guessed from the name.
pub struct FilenameParser {
    adsb: Regex,
    drones: Regex,
}

impl FilenameParser {
    pub fn new() -> Result<Self> {
        let adsb = Regex::new(
            r"^(?P<site>.+?)(?P<variant>[0-9]*)_(?P<year>\d+)-(?P<month>\d+)-(?P<day>\d+)$",
        )
        .context("failed to compile ADS-B filename regex")?;
        let drones = Regex::new(r"^drones-(?P<year>\d{4})-(?P<month>\d{2})-(?P<day>\d{2})$")
            .context("failed to compile drone filename regex")?;
        Ok(Self { adsb, drones })
    }

    /// Strict form used for partition placement: only `.parquet` drops.
    pub fn parse(&self, kind: DropKind, basename: &str) -> DropResult<ParsedIdentity> {
        let stem = basename
            .strip_suffix(".parquet")
            .ok_or_else(|| mismatch(kind, basename))?;
        self.parse_stem(kind, stem, basename)
    }

    /// Load-pipeline form: accepts every suffix the conversion stage can
    /// normalize (`.csv`, `.parquet`, optionally gzipped).
    pub fn parse_drop(&self, kind: DropKind, basename: &str) -> DropResult<ParsedIdentity> {
        let stem = LOAD_SUFFIXES
            .iter()
            .find_map(|suffix| basename.strip_suffix(suffix))
            .ok_or_else(|| mismatch(kind, basename))?;
        self.parse_stem(kind, stem, basename)
    }

    fn parse_stem(&self, kind: DropKind, stem: &str, basename: &str) -> DropResult<ParsedIdentity> {
        let pattern = match kind {
            DropKind::Adsb => &self.adsb,
            DropKind::Drones => &self.drones,
        };
        let captures = pattern
            .captures(stem)
            .ok_or_else(|| mismatch(kind, basename))?;

        let (year, month, day) = parse_date(&captures, basename)?;

        let (site_token, variant) = match kind {
            DropKind::Adsb => {
                let site = named(&captures, "site");
                let variant = named(&captures, "variant");
                let token = format!("{site}{variant}");
                (Some(token), variant.parse::<u32>().ok())
            }
            DropKind::Drones => (None, None),
        };

        Ok(ParsedIdentity {
            site_token,
            variant,
            year,
            month,
            day,
        })
    }
}

fn named<'a>(captures: &Captures<'a>, name: &str) -> &'a str {
    captures.name(name).map(|m| m.as_str()).unwrap_or_default()
}

fn parse_date(captures: &Captures<'_>, basename: &str) -> DropResult<(i32, u32, u32)> {
    let raw_year = named(captures, "year");
    let raw_month = named(captures, "month");
    let raw_day = named(captures, "day");
    let invalid = || DropError::InvalidDate {
        name: basename.to_string(),
        year: raw_year.to_string(),
        month: raw_month.to_string(),
        day: raw_day.to_string(),
    };

    let year = raw_year.parse::<i32>().map_err(|_| invalid())?;
    let month = raw_month.parse::<u32>().map_err(|_| invalid())?;
    let day = raw_day.parse::<u32>().map_err(|_| invalid())?;

    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return Err(invalid());
    }

    Ok((year, month, day))
}

fn mismatch(kind: DropKind, basename: &str) -> DropError {
    DropError::PatternMismatch {
        kind: kind.as_str(),
        name: basename.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> FilenameParser {
        FilenameParser::new().expect("filename regexes compile")
    }

    #[test]
    fn adsb_name_round_trips_token_and_date() {
        let identity = parser()
            .parse(DropKind::Adsb, "Brussels_2024-02-14.parquet")
            .expect("valid ADS-B name");
        assert_eq!(identity.site_token.as_deref(), Some("Brussels"));
        assert_eq!(identity.variant, None);
        assert_eq!((identity.year, identity.month, identity.day), (2024, 2, 14));
    }

    #[test]
    fn adsb_variant_suffix_stays_in_the_token() {
        let identity = parser()
            .parse(DropKind::Adsb, "Vienna2_2023-11-30.parquet")
            .expect("valid ADS-B name");
        assert_eq!(identity.site_token.as_deref(), Some("Vienna2"));
        assert_eq!(identity.variant, Some(2));
    }

    #[test]
    fn adsb_underscore_variant_is_part_of_token() {
        let identity = parser()
            .parse(DropKind::Adsb, "Gatwick_1_2024-05-01.parquet")
            .expect("valid ADS-B name");
        assert_eq!(identity.site_token.as_deref(), Some("Gatwick_1"));
        assert_eq!(identity.variant, Some(1));
    }

    #[test]
    fn drone_name_has_no_site() {
        let identity = parser()
            .parse(DropKind::Drones, "drones-2024-03-05.parquet")
            .expect("valid drone name");
        assert_eq!(identity.site_token, None);
        assert_eq!((identity.year, identity.month, identity.day), (2024, 3, 5));
    }

    #[test]
    fn grammar_follows_the_requested_kind() {
        let parser = parser();
        assert!(matches!(
            parser.parse(DropKind::Adsb, "drones-2024-03-05.parquet"),
            Err(DropError::PatternMismatch { .. })
        ));
        assert!(matches!(
            parser.parse(DropKind::Drones, "Brussels_2024-02-14.parquet"),
            Err(DropError::PatternMismatch { .. })
        ));
    }

    #[test]
    fn malformed_names_never_partially_parse() {
        let parser = parser();
        for name in [
            "Brussels_2024-02-14.csv",
            "Brussels-2024-02-14.parquet",
            "_2024-02-14.parquet",
            "Brussels_2024-02.parquet",
            "Brussels_2024-02-14.parquet.bak",
            "drones-24-03-05.parquet",
            "",
        ] {
            assert!(
                matches!(
                    parser.parse(DropKind::Adsb, name),
                    Err(DropError::PatternMismatch { .. })
                ),
                "{name} should not parse"
            );
        }
        assert!(matches!(
            parser.parse(DropKind::Drones, "drones-24-03-05.parquet"),
            Err(DropError::PatternMismatch { .. })
        ));
    }

    #[test]
    fn out_of_range_month_or_day_is_invalid_date() {
        let parser = parser();
        assert!(matches!(
            parser.parse(DropKind::Adsb, "Brussels_2024-13-01.parquet"),
            Err(DropError::InvalidDate { .. })
        ));
        assert!(matches!(
            parser.parse(DropKind::Adsb, "Brussels_2024-00-01.parquet"),
            Err(DropError::InvalidDate { .. })
        ));
        assert!(matches!(
            parser.parse(DropKind::Drones, "drones-2024-02-32.parquet"),
            Err(DropError::InvalidDate { .. })
        ));
    }

    #[test]
    fn load_suffixes_share_the_grammar() {
        let parser = parser();
        for name in [
            "Brussels_2024-02-14.csv",
            "Brussels_2024-02-14.csv.gz",
            "Brussels_2024-02-14.parquet.gz",
            "Brussels_2024-02-14.parquet",
        ] {
            let identity = parser
                .parse_drop(DropKind::Adsb, name)
                .expect("load suffix accepted");
            assert_eq!(identity.site_token.as_deref(), Some("Brussels"));
        }
        assert!(parser.parse_drop(DropKind::Adsb, "Brussels_2024-02-14.json").is_err());
    }
}
