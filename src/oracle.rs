//! Rate-fix oracle: an external party that signs interest-rate
//! observations into transactions. See `spec.md` §4.9 and the
//! rate-file upload format in §6.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;

use crate::crypto::{sign, Party, PrivateKey, Signature};
use crate::error::OracleError;
use crate::model::{CommandData, WireTransaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tenor {
    Days(u32),
    Months(u32),
    Years(u32),
}

impl Tenor {
    pub fn parse(s: &str) -> Result<Self, ()> {
        if s.len() < 2 {
            return Err(());
        }
        let (num, unit) = s.split_at(s.len() - 1);
        let n: u32 = num.parse().map_err(|_| ())?;
        match unit {
            "D" => Ok(Tenor::Days(n)),
            "M" => Ok(Tenor::Months(n)),
            "Y" => Ok(Tenor::Years(n)),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Tenor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tenor::Days(n) => write!(f, "{n}D"),
            Tenor::Months(n) => write!(f, "{n}M"),
            Tenor::Years(n) => write!(f, "{n}Y"),
        }
    }
}

/// Holds an in-memory table of `(index, tenor) -> (date -> rate)` and
/// answers floor-lookup queries: the greatest recorded date at or
/// before the requested date.
pub struct RateOracle {
    key: PrivateKey,
    party: Party,
    table: BTreeMap<(String, Tenor), BTreeMap<NaiveDate, i64>>,
}

impl RateOracle {
    pub fn new(key: PrivateKey, party: Party) -> Self {
        Self {
            key,
            party,
            table: BTreeMap::new(),
        }
    }

    pub fn party(&self) -> &Party {
        &self.party
    }

    pub fn insert_fix(&mut self, index_name: String, tenor: Tenor, date: NaiveDate, rate_micros: i64) {
        self.table
            .entry((index_name, tenor))
            .or_default()
            .insert(date, rate_micros);
    }

    /// Loads every fix parsed from an uploaded rate file (`spec.md` §6).
    pub fn load_rate_file(&mut self, contents: &str) -> Result<usize, OracleError> {
        let fixes = parse_rate_file(contents)?;
        let count = fixes.len();
        for (index_name, tenor, date, rate_micros) in fixes {
            self.insert_fix(index_name, tenor, date, rate_micros);
        }
        Ok(count)
    }

    /// Floor-lookup: the greatest recorded date <= `date`.
    pub fn query(&self, index_name: &str, tenor: Tenor, date: NaiveDate) -> Option<(NaiveDate, i64)> {
        self.table
            .get(&(index_name.to_string(), tenor))?
            .range(..=date)
            .next_back()
            .map(|(d, r)| (*d, *r))
    }

    pub fn query_many(
        &self,
        requests: &[(String, Tenor, NaiveDate)],
    ) -> Vec<Option<(NaiveDate, i64)>> {
        requests
            .iter()
            .map(|(index_name, tenor, date)| self.query(index_name, *tenor, *date))
            .collect()
    }

    /// Signs `tx` iff every command marked with this oracle's key is a
    /// `Fix` command whose data matches a known fix. Does not verify
    /// anything else about the transaction.
    pub fn sign(&self, tx: &WireTransaction) -> Result<Signature, OracleError> {
        let my_key = self.key.public_key();
        for command in &tx.commands {
            if !command.signers.contains(&my_key) {
                continue;
            }
            let CommandData::Fix(fix) = &command.data else {
                return Err(OracleError::FixMismatch);
            };
            let tenor = Tenor::parse(&fix.tenor).map_err(|_| OracleError::FixMismatch)?;
            let date = NaiveDate::parse_from_str(&fix.date, "%Y-%m-%d")
                .map_err(|_| OracleError::FixMismatch)?;
            let known = self.query(&fix.index_name, tenor, date).ok_or_else(|| {
                OracleError::UnknownFix {
                    index: fix.index_name.clone(),
                    tenor: fix.tenor.clone(),
                    date,
                }
            })?;
            if known.1 != fix.rate_micros {
                return Err(OracleError::FixMismatch);
            }
        }

        let bytes = crate::codec::canonical_serialize(tx)?;
        Ok(sign(&self.key, &bytes))
    }
}

fn parse_decimal_micros(s: &str) -> Result<i64, String> {
    let (neg, s) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let (int_part, frac_part) = match s.split_once('.') {
        Some((i, f)) => (i, f),
        None => (s, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err("empty numeric value".into());
    }
    if frac_part.len() > 6 {
        return Err("at most 6 fractional digits are supported".into());
    }
    let int_val: i64 = if int_part.is_empty() {
        0
    } else {
        int_part.parse().map_err(|_| format!("bad integer part '{int_part}'"))?
    };
    let mut frac_digits = frac_part.to_string();
    while frac_digits.len() < 6 {
        frac_digits.push('0');
    }
    let frac_val: i64 = frac_digits
        .parse()
        .map_err(|_| format!("bad fractional part '{frac_part}'"))?;
    let magnitude = int_val * 1_000_000 + frac_val;
    Ok(if neg { -magnitude } else { magnitude })
}

/// Parses the rate-file upload format from `spec.md` §6: one fix per
/// line, `<index name with spaces> <DD-MonthName-YYYY> <tenor> = <rate>`,
/// blank lines and `#`-comments ignored.
pub fn parse_rate_file(contents: &str) -> Result<Vec<(String, Tenor, NaiveDate, i64)>, OracleError> {
    let mut fixes = Vec::new();
    for (i, raw_line) in contents.lines().enumerate() {
        let line_no = i + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (lhs, rhs) = line.split_once('=').ok_or_else(|| OracleError::MalformedFixLine {
            line: line_no,
            reason: "missing '='".into(),
        })?;
        let rate_micros = parse_decimal_micros(rhs.trim()).map_err(|reason| OracleError::MalformedFixLine {
            line: line_no,
            reason,
        })?;

        let tokens: Vec<&str> = lhs.trim().split_whitespace().collect();
        if tokens.len() < 3 {
            return Err(OracleError::MalformedFixLine {
                line: line_no,
                reason: "expected '<index name> <date> <tenor>'".into(),
            });
        }
        let tenor_str = tokens[tokens.len() - 1];
        let date_str = tokens[tokens.len() - 2];
        let index_name = tokens[..tokens.len() - 2].join(" ");

        let tenor = Tenor::parse(tenor_str).map_err(|_| OracleError::MalformedFixLine {
            line: line_no,
            reason: format!("unrecognised tenor '{tenor_str}'"),
        })?;
        let date = NaiveDate::parse_from_str(date_str, "%d-%B-%Y").map_err(|e| OracleError::MalformedFixLine {
            line: line_no,
            reason: e.to_string(),
        })?;

        fixes.push((index_name, tenor, date, rate_micros));
    }
    Ok(fixes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn oracle() -> RateOracle {
        let key = PrivateKey::generate(&mut OsRng);
        let party = Party {
            name: "Reference Rate Oracle".into(),
            owning_key: key.public_key(),
        };
        RateOracle::new(key, party)
    }

    #[test]
    fn parses_a_simple_rate_file() {
        let contents = "\
# a comment
LIBOR 16-March-2016 1M = 0.678

SONIA 01-January-2020 3M = -0.05
";
        let fixes = parse_rate_file(contents).unwrap();
        assert_eq!(fixes.len(), 2);
        assert_eq!(fixes[0].0, "LIBOR");
        assert_eq!(fixes[0].1, Tenor::Months(1));
        assert_eq!(fixes[0].3, 678_000);
        assert_eq!(fixes[1].3, -50_000);
    }

    #[test]
    fn malformed_line_reports_its_line_number() {
        let contents = "LIBOR 16-March-2016 1M = 0.678\nnot a fix line at all\n";
        let err = parse_rate_file(contents).unwrap_err();
        match err {
            OracleError::MalformedFixLine { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn query_uses_floor_lookup() {
        let mut oracle = oracle();
        oracle.insert_fix(
            "LIBOR".into(),
            Tenor::Months(1),
            NaiveDate::from_ymd_opt(2016, 3, 1).unwrap(),
            500_000,
        );
        oracle.insert_fix(
            "LIBOR".into(),
            Tenor::Months(1),
            NaiveDate::from_ymd_opt(2016, 3, 16).unwrap(),
            678_000,
        );

        let result = oracle
            .query("LIBOR", Tenor::Months(1), NaiveDate::from_ymd_opt(2016, 3, 20).unwrap())
            .unwrap();
        assert_eq!(result, (NaiveDate::from_ymd_opt(2016, 3, 16).unwrap(), 678_000));
    }

    #[test]
    fn sign_rejects_a_mismatched_fix() {
        let mut o = oracle();
        o.insert_fix(
            "LIBOR".into(),
            Tenor::Months(1),
            NaiveDate::from_ymd_opt(2016, 3, 16).unwrap(),
            678_000,
        );
        let my_key = o.key.public_key();
        let fix = crate::model::FixData {
            index_name: "LIBOR".into(),
            tenor: "1M".into(),
            date: "2016-03-16".into(),
            rate_micros: 999_000,
        };
        let tx = WireTransaction::new(
            vec![],
            vec![],
            vec![crate::model::Command::new(CommandData::Fix(fix), vec![my_key])],
            vec![],
        );
        assert!(matches!(o.sign(&tx), Err(OracleError::FixMismatch)));
    }

    #[test]
    fn sign_accepts_a_matching_fix() {
        let mut o = oracle();
        o.insert_fix(
            "LIBOR".into(),
            Tenor::Months(1),
            NaiveDate::from_ymd_opt(2016, 3, 16).unwrap(),
            678_000,
        );
        let my_key = o.key.public_key();
        let fix = crate::model::FixData {
            index_name: "LIBOR".into(),
            tenor: "1M".into(),
            date: "2016-03-16".into(),
            rate_micros: 678_000,
        };
        let tx = WireTransaction::new(
            vec![],
            vec![],
            vec![crate::model::Command::new(CommandData::Fix(fix), vec![my_key])],
            vec![],
        );
        o.sign(&tx).unwrap();
    }
}
