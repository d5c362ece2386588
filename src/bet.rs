use std::{fmt, str::FromStr};

use chrono::NaiveDate;

const FIELD_COUNT: usize = 6;
const BIRTHDATE_FORMAT: &str = "%Y-%m-%d";

/// A single wager placed through an agency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bet {
    pub agency: u32,
    pub first_name: String,
    pub last_name: String,
    pub document: String,
    pub birthdate: NaiveDate,
    // kept as text, the padding is part of the number
    pub number: String,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum BetParseErr {
    #[error("expected {} fields, found {0}", FIELD_COUNT)]
    FieldCount(usize),

    #[error("the {0} field is empty")]
    EmptyField(&'static str),

    #[error("invalid agency: {0}")]
    BadAgency(String),

    #[error("invalid document: {0}")]
    BadDocument(String),

    #[error("invalid birthdate: {0}")]
    BadBirthdate(String),

    #[error("invalid number: {0}")]
    BadNumber(String),
}

impl Bet {
    /// Whether the bet holds the given lottery number, ignoring zero padding
    pub fn has_number(&self, winning_number: u32) -> bool {
        self.number.parse::<u32>().ok() == Some(winning_number)
    }
}

impl FromStr for Bet {
    type Err = BetParseErr;

    // agency,first_name,last_name,document,birthdate,number
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields = s.trim().split(',').map(str::trim).collect::<Vec<_>>();
        let [agency, first_name, last_name, document, birthdate, number] = fields[..] else {
            return Err(BetParseErr::FieldCount(fields.len()));
        };

        let named = [
            ("agency", agency),
            ("first name", first_name),
            ("last name", last_name),
            ("document", document),
            ("birthdate", birthdate),
            ("number", number),
        ];
        if let Some((name, _)) = named.iter().find(|(_, value)| value.is_empty()) {
            return Err(BetParseErr::EmptyField(*name));
        }

        let agency = match agency.parse::<u32>() {
            Ok(agency) if agency > 0 => agency,
            _ => return Err(BetParseErr::BadAgency(agency.into())),
        };

        if !is_numeric(document) {
            return Err(BetParseErr::BadDocument(document.into()));
        }

        let birthdate = NaiveDate::parse_from_str(birthdate, BIRTHDATE_FORMAT)
            .map_err(|_| BetParseErr::BadBirthdate(birthdate.into()))?;

        if !is_numeric(number) {
            return Err(BetParseErr::BadNumber(number.into()));
        }

        Ok(Self {
            agency,
            first_name: first_name.into(),
            last_name: last_name.into(),
            document: document.into(),
            birthdate,
            number: number.into(),
        })
    }
}

impl fmt::Display for Bet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{},{}",
            self.agency,
            self.first_name,
            self.last_name,
            self.document,
            self.birthdate.format(BIRTHDATE_FORMAT),
            self.number
        )
    }
}

fn is_numeric(value: &str) -> bool {
    value.bytes().all(|byte| byte.is_ascii_digit())
}

/// The outcome of decoding a batch payload
#[derive(Debug, Default)]
pub struct Batch {
    pub bets: Vec<Bet>,
    // number of lines that failed to decode
    pub errors: usize,
}

impl Batch {
    pub fn is_valid(&self) -> bool {
        self.errors == 0
    }
}

/// Decodes every non blank line of a batch payload into a bet
///
/// malformed lines are counted and skipped, it is up to the caller
/// to decide what to do with a batch that contains any of them.
pub fn parse_batch(payload: &str) -> Batch {
    let mut batch = Batch::default();

    for line in payload.lines().filter(|line| !line.trim().is_empty()) {
        match line.parse::<Bet>() {
            Ok(bet) => batch.bets.push(bet),
            Err(reason) => {
                tracing::debug!("skipping malformed bet {:?}: {}", line, reason);
                batch.errors += 1;
            }
        }
    }

    batch
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{parse_batch, Bet, BetParseErr};

    #[test]
    fn parse_valid_bets() {
        let bet = "1,Ana,Diaz,30111222,1990-01-01,4521".parse::<Bet>().unwrap();
        assert_eq!(
            bet,
            Bet {
                agency: 1,
                first_name: "Ana".into(),
                last_name: "Diaz".into(),
                document: "30111222".into(),
                birthdate: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
                number: "4521".into(),
            }
        );

        // surrounding whitespace and padding survive a round trip through Display
        let bet = " 3, Juan Pablo ,Gomez,27444555,1985-06-30,0042\r"
            .parse::<Bet>()
            .unwrap();
        assert_eq!(bet.first_name, "Juan Pablo");
        assert_eq!(bet.number, "0042");
        assert_eq!(bet.to_string(), "3,Juan Pablo,Gomez,27444555,1985-06-30,0042");
    }

    #[test]
    fn parse_bad_bets() {
        let cases = [
            ("1,Ana,Diaz,bad", BetParseErr::FieldCount(4)),
            (
                "1,Ana,Diaz,30111222,1990-01-01,4521,extra",
                BetParseErr::FieldCount(7),
            ),
            (
                "1,,Diaz,30111222,1990-01-01,4521",
                BetParseErr::EmptyField("first name"),
            ),
            (
                "1,Ana,Diaz,30111222,1990-01-01, ",
                BetParseErr::EmptyField("number"),
            ),
            (
                "0,Ana,Diaz,30111222,1990-01-01,4521",
                BetParseErr::BadAgency("0".into()),
            ),
            (
                "x,Ana,Diaz,30111222,1990-01-01,4521",
                BetParseErr::BadAgency("x".into()),
            ),
            (
                "1,Ana,Diaz,30.111.222,1990-01-01,4521",
                BetParseErr::BadDocument("30.111.222".into()),
            ),
            (
                "1,Ana,Diaz,30111222,1990-02-30,4521",
                BetParseErr::BadBirthdate("1990-02-30".into()),
            ),
            (
                "1,Ana,Diaz,30111222,1990-01-01,45a1",
                BetParseErr::BadNumber("45a1".into()),
            ),
        ];

        for (raw, expected) in cases {
            assert_eq!(raw.parse::<Bet>(), Err(expected), "{}", raw);
        }
    }

    #[test]
    fn parse_valid_batch() {
        let payload = "1,Ana,Diaz,30111222,1990-01-01,4521\n\
                       1,Luis,Paz,27444555,1985-06-30,7574\n\
                       \n\
                       1,Eva,Sosa,33000111,2000-12-31,0001\n";

        let batch = parse_batch(payload);
        assert!(batch.is_valid());
        assert_eq!(batch.bets.len(), 3);
        assert!(batch.bets.iter().all(|bet| bet.agency == 1));
    }

    #[test]
    fn malformed_lines_are_counted_not_fatal() {
        let payload = "1,Ana,Diaz,bad\n\
                       2,Luis,Paz,27444555,1985-06-30,7574\r\n\
                       garbage\n\
                       2,Eva,Sosa,33000111,2000-12-31,0001";

        let batch = parse_batch(payload);
        assert!(!batch.is_valid());
        assert_eq!(batch.errors, 2);
        assert_eq!(batch.bets.len(), 2);
        assert_eq!(batch.bets[0].agency, 2);
    }

    #[test]
    fn empty_batch() {
        let batch = parse_batch("\n\n  \n");
        assert!(batch.is_valid());
        assert!(batch.bets.is_empty());
    }

    #[test]
    fn winning_number_ignores_padding() {
        let bet = "1,Ana,Diaz,30111222,1990-01-01,07574".parse::<Bet>().unwrap();
        assert!(bet.has_number(7574));
        assert!(!bet.has_number(4521));
    }
}
