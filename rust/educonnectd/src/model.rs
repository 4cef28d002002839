use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed enumerations stored as lowercase text columns.
pub trait Choice: Sized + Copy + 'static {
    const ALL: &'static [Self];

    fn as_str(self) -> &'static str;

    fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
    }

    /// Dropdown label: "very_good" -> "Very good".
    fn label(self) -> String {
        let spaced = self.as_str().replace('_', " ");
        let mut chars = spaced.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

pub fn options<C: Choice>() -> Vec<serde_json::Value> {
    C::ALL
        .iter()
        .map(|c| serde_json::json!({ "label": c.label(), "value": c.as_str() }))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Choice for Gender {
    const ALL: &'static [Self] = &[Self::Male, Self::Female, Self::Other];

    fn as_str(self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParentRelationship {
    Mother,
    Father,
    Guardian,
    Other,
}

impl Choice for ParentRelationship {
    const ALL: &'static [Self] = &[Self::Mother, Self::Father, Self::Guardian, Self::Other];

    fn as_str(self) -> &'static str {
        match self {
            Self::Mother => "mother",
            Self::Father => "father",
            Self::Guardian => "guardian",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Meeting,
    Holiday,
    Exam,
    Announcement,
    Other,
}

impl Choice for EventType {
    const ALL: &'static [Self] = &[
        Self::Meeting,
        Self::Holiday,
        Self::Exam,
        Self::Announcement,
        Self::Other,
    ];

    fn as_str(self) -> &'static str {
        match self {
            Self::Meeting => "meeting",
            Self::Holiday => "holiday",
            Self::Exam => "exam",
            Self::Announcement => "announcement",
            Self::Other => "other",
        }
    }
}

/// Audience of an event: a secondary level, or one class within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AffectedGroup(&'static str);

impl Choice for AffectedGroup {
    const ALL: &'static [Self] = &[
        Self("secondary 1"),
        Self("secondary 1-1"),
        Self("secondary 1-2"),
        Self("secondary 1-3"),
        Self("secondary 1-4"),
        Self("secondary 1-5"),
        Self("secondary 2"),
        Self("secondary 2-1"),
        Self("secondary 2-2"),
        Self("secondary 2-3"),
        Self("secondary 2-4"),
        Self("secondary 2-5"),
        Self("secondary 3"),
        Self("secondary 3-1"),
        Self("secondary 3-2"),
        Self("secondary 3-3"),
        Self("secondary 3-4"),
        Self("secondary 3-5"),
        Self("secondary 4"),
        Self("secondary 4-1"),
        Self("secondary 4-2"),
        Self("secondary 4-3"),
        Self("secondary 4-4"),
        Self("secondary 4-5"),
        Self("secondary 5"),
        Self("secondary 5-1"),
        Self("secondary 5-2"),
    ];

    fn as_str(self) -> &'static str {
        self.0
    }
}

impl Serialize for AffectedGroup {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0)
    }
}

impl<'de> Deserialize<'de> for AffectedGroup {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown affected group {raw:?}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conduct {
    Excellent,
    VeryGood,
    Good,
    Fair,
    Poor,
}

impl Choice for Conduct {
    const ALL: &'static [Self] = &[
        Self::Excellent,
        Self::VeryGood,
        Self::Good,
        Self::Fair,
        Self::Poor,
    ];

    fn as_str(self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::VeryGood => "very_good",
            Self::Good => "good",
            Self::Fair => "fair",
            Self::Poor => "poor",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectCategory {
    Languages,
    Mathematics,
    Sciences,
    Humanities,
    Arts,
    PhysicalEducation,
    #[default]
    Others,
}

impl Choice for SubjectCategory {
    const ALL: &'static [Self] = &[
        Self::Languages,
        Self::Mathematics,
        Self::Sciences,
        Self::Humanities,
        Self::Arts,
        Self::PhysicalEducation,
        Self::Others,
    ];

    fn as_str(self) -> &'static str {
        match self {
            Self::Languages => "languages",
            Self::Mathematics => "mathematics",
            Self::Sciences => "sciences",
            Self::Humanities => "humanities",
            Self::Arts => "arts",
            Self::PhysicalEducation => "physical_education",
            Self::Others => "others",
        }
    }
}

pub const TERM_MIN_YEAR: i32 = 2000;
pub const TERM_MAX_YEAR: i32 = 2099;
pub const TERMS_PER_YEAR: u8 = 4;

/// Academic term token, canonical form `AY2026 Term 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Term {
    pub year: i32,
    pub number: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid term {0:?}: expected \"AY<year> Term <1-4>\"")]
pub struct InvalidTerm(pub String);

impl Term {
    pub fn new(year: i32, number: u8) -> Option<Self> {
        if !(TERM_MIN_YEAR..=TERM_MAX_YEAR).contains(&year)
            || number == 0
            || number > TERMS_PER_YEAR
        {
            return None;
        }
        Some(Self { year, number })
    }

    /// Every term of the previous, current and following academic year.
    pub fn options_around(year: i32) -> Vec<Term> {
        (year - 1..=year + 1)
            .flat_map(|y| (1..=TERMS_PER_YEAR).filter_map(move |n| Term::new(y, n)))
            .collect()
    }
}

impl FromStr for Term {
    type Err = InvalidTerm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || InvalidTerm(s.to_string());
        let mut parts = s.split_whitespace();
        let (Some(ay), Some(word), Some(num), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(bad());
        };
        let year_digits = ay.strip_prefix("AY").ok_or_else(bad)?;
        if year_digits.len() != 4 || word != "Term" {
            return Err(bad());
        }
        let year: i32 = year_digits.parse().map_err(|_| bad())?;
        let number: u8 = num.parse().map_err(|_| bad())?;
        Term::new(year, number).ok_or_else(bad)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AY{} Term {}", self.year, self.number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_parses_canonical_form() {
        let t: Term = "AY2026 Term 1".parse().expect("term");
        assert_eq!(t, Term { year: 2026, number: 1 });
        assert_eq!(t.to_string(), "AY2026 Term 1");

        let padded: Term = "  AY2025   Term 4 ".parse().expect("term");
        assert_eq!(padded.to_string(), "AY2025 Term 4");
    }

    #[test]
    fn term_rejects_tokens_outside_closed_set() {
        for s in [
            "",
            "Term 1",
            "AY2026",
            "AY2026 Term 0",
            "AY2026 Term 5",
            "AY1999 Term 1",
            "AY26 Term 1",
            "ay2026 term 1",
            "AY2026 Semester 1",
            "AY2026 Term 1 extra",
        ] {
            assert!(s.parse::<Term>().is_err(), "{s:?} should be rejected");
        }
    }

    #[test]
    fn term_options_cover_three_years() {
        let opts = Term::options_around(2026);
        assert_eq!(opts.len(), 12);
        assert_eq!(opts[0].to_string(), "AY2025 Term 1");
        assert_eq!(opts[11].to_string(), "AY2027 Term 4");
    }

    #[test]
    fn choice_parse_and_label() {
        assert_eq!(Conduct::parse("Very_Good"), Some(Conduct::VeryGood));
        assert_eq!(Conduct::VeryGood.label(), "Very good");
        assert_eq!(SubjectCategory::parse("nope"), None);
        assert_eq!(SubjectCategory::default().as_str(), "others");
        assert_eq!(options::<Gender>().len(), 3);
    }

    #[test]
    fn affected_groups_are_a_closed_set() {
        assert_eq!(AffectedGroup::ALL.len(), 27);
        let g = AffectedGroup::parse(" Secondary 3-2 ").expect("known group");
        assert_eq!(g.as_str(), "secondary 3-2");
        assert_eq!(g.label(), "Secondary 3-2");
        assert_eq!(AffectedGroup::parse("secondary 6"), None);

        let json: AffectedGroup = serde_json::from_str("\"secondary 5-2\"").expect("deserialize");
        assert_eq!(serde_json::to_string(&json).expect("serialize"), "\"secondary 5-2\"");
        assert!(serde_json::from_str::<AffectedGroup>("\"primary 1\"").is_err());
    }
}
