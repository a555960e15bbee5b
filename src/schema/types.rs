//! Built-in simple types and facets.

use regex::Regex;

/// Whitespace processing applied before a value is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhiteSpace {
    Preserve,
    Replace,
    Collapse,
}

impl WhiteSpace {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "preserve" => Some(WhiteSpace::Preserve),
            "replace" => Some(WhiteSpace::Replace),
            "collapse" => Some(WhiteSpace::Collapse),
            _ => None,
        }
    }

    pub fn apply(self, value: &str) -> String {
        match self {
            WhiteSpace::Preserve => value.to_string(),
            WhiteSpace::Replace => value.replace(['\t', '\n', '\r'], " "),
            WhiteSpace::Collapse => value.split_whitespace().collect::<Vec<_>>().join(" "),
        }
    }
}

/// Identity role of a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    Id,
    IdRef,
    IdRefs,
}

/// The XML Schema built-in datatypes that schemas may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    AnySimpleType,
    String,
    NormalizedString,
    Token,
    Language,
    Name,
    NcName,
    NmToken,
    NmTokens,
    Id,
    IdRef,
    IdRefs,
    AnyUri,
    Boolean,
    Decimal,
    Integer,
    NonNegativeInteger,
    PositiveInteger,
    Int,
    Double,
    Date,
    DateTime,
    QName,
}

impl Builtin {
    pub fn from_name(local: &str) -> Option<Self> {
        let builtin = match local {
            "anySimpleType" => Builtin::AnySimpleType,
            "string" => Builtin::String,
            "normalizedString" => Builtin::NormalizedString,
            "token" => Builtin::Token,
            "language" => Builtin::Language,
            "Name" => Builtin::Name,
            "NCName" => Builtin::NcName,
            "NMTOKEN" => Builtin::NmToken,
            "NMTOKENS" => Builtin::NmTokens,
            "ID" => Builtin::Id,
            "IDREF" => Builtin::IdRef,
            "IDREFS" => Builtin::IdRefs,
            "anyURI" => Builtin::AnyUri,
            "boolean" => Builtin::Boolean,
            "decimal" => Builtin::Decimal,
            "integer" => Builtin::Integer,
            "nonNegativeInteger" => Builtin::NonNegativeInteger,
            "positiveInteger" => Builtin::PositiveInteger,
            "int" => Builtin::Int,
            "double" | "float" => Builtin::Double,
            "date" => Builtin::Date,
            "dateTime" => Builtin::DateTime,
            "QName" => Builtin::QName,
            _ => return None,
        };
        Some(builtin)
    }

    pub fn whitespace(self) -> WhiteSpace {
        match self {
            Builtin::AnySimpleType | Builtin::String => WhiteSpace::Preserve,
            Builtin::NormalizedString => WhiteSpace::Replace,
            _ => WhiteSpace::Collapse,
        }
    }

    pub fn identity(self) -> Option<Identity> {
        match self {
            Builtin::Id => Some(Identity::Id),
            Builtin::IdRef => Some(Identity::IdRef),
            Builtin::IdRefs => Some(Identity::IdRefs),
            _ => None,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            Builtin::Decimal
                | Builtin::Integer
                | Builtin::NonNegativeInteger
                | Builtin::PositiveInteger
                | Builtin::Int
                | Builtin::Double
        )
    }

    /// Whether length facets count list items rather than characters.
    pub fn is_list(self) -> bool {
        matches!(self, Builtin::NmTokens | Builtin::IdRefs)
    }

    /// Check an already whitespace-normalized value.
    pub fn check(self, value: &str) -> Result<(), String> {
        let ok = match self {
            Builtin::AnySimpleType | Builtin::String | Builtin::NormalizedString | Builtin::Token => true,
            Builtin::AnyUri => !value.contains(['<', '>', '"', '{', '}', '\\', '^', '`']),
            Builtin::Language => is_language(value),
            Builtin::Name => is_name(value),
            Builtin::NcName | Builtin::Id | Builtin::IdRef => is_ncname(value),
            Builtin::NmToken => is_nmtoken(value),
            Builtin::NmTokens => !value.is_empty() && value.split(' ').all(is_nmtoken),
            Builtin::IdRefs => !value.is_empty() && value.split(' ').all(is_ncname),
            Builtin::Boolean => matches!(value, "true" | "false" | "1" | "0"),
            Builtin::Decimal => is_decimal(value),
            Builtin::Integer => is_integer(value),
            Builtin::NonNegativeInteger => {
                is_integer(value) && !value.starts_with('-') || value == "-0"
            }
            Builtin::PositiveInteger => {
                is_integer(value) && !value.starts_with('-') && !value.trim_start_matches(['+', '0']).is_empty()
            }
            Builtin::Int => value.parse::<i32>().is_ok(),
            Builtin::Double => matches!(value, "INF" | "-INF" | "NaN") || value.parse::<f64>().is_ok(),
            Builtin::Date => is_date(value),
            Builtin::DateTime => is_date_time(value),
            Builtin::QName => match value.split_once(':') {
                Some((prefix, local)) => is_ncname(prefix) && is_ncname(local),
                None => is_ncname(value),
            },
        };
        if ok {
            Ok(())
        } else {
            Err(format!("'{value}' is not a valid {}", self.display_name()))
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Builtin::AnySimpleType => "anySimpleType",
            Builtin::String => "string",
            Builtin::NormalizedString => "normalizedString",
            Builtin::Token => "token",
            Builtin::Language => "language",
            Builtin::Name => "Name",
            Builtin::NcName => "NCName",
            Builtin::NmToken => "NMTOKEN",
            Builtin::NmTokens => "NMTOKENS",
            Builtin::Id => "ID",
            Builtin::IdRef => "IDREF",
            Builtin::IdRefs => "IDREFS",
            Builtin::AnyUri => "anyURI",
            Builtin::Boolean => "boolean",
            Builtin::Decimal => "decimal",
            Builtin::Integer => "integer",
            Builtin::NonNegativeInteger => "nonNegativeInteger",
            Builtin::PositiveInteger => "positiveInteger",
            Builtin::Int => "int",
            Builtin::Double => "double",
            Builtin::Date => "date",
            Builtin::DateTime => "dateTime",
            Builtin::QName => "QName",
        }
    }
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == ':'
}

fn is_name_char(c: char) -> bool {
    is_name_start(c) || c.is_numeric() || matches!(c, '-' | '.' | '\u{B7}')
}

fn is_name(value: &str) -> bool {
    let mut chars = value.chars();
    chars.next().is_some_and(is_name_start) && chars.all(is_name_char)
}

fn is_ncname(value: &str) -> bool {
    is_name(value) && !value.contains(':')
}

fn is_nmtoken(value: &str) -> bool {
    !value.is_empty() && value.chars().all(is_name_char)
}

fn is_language(value: &str) -> bool {
    let mut parts = value.split('-');
    let first_ok = parts
        .next()
        .is_some_and(|p| (1..=8).contains(&p.len()) && p.chars().all(|c| c.is_ascii_alphabetic()));
    first_ok && parts.all(|p| (1..=8).contains(&p.len()) && p.chars().all(|c| c.is_ascii_alphanumeric()))
}

fn is_integer(value: &str) -> bool {
    let digits = value.strip_prefix(['+', '-']).unwrap_or(value);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

fn is_decimal(value: &str) -> bool {
    let unsigned = value.strip_prefix(['+', '-']).unwrap_or(value);
    let (whole, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    (!whole.is_empty() || !fraction.is_empty())
        && whole.chars().all(|c| c.is_ascii_digit())
        && fraction.chars().all(|c| c.is_ascii_digit())
}

fn digits(value: &str, count: usize) -> Option<u32> {
    (value.len() == count && value.chars().all(|c| c.is_ascii_digit()))
        .then(|| value.parse().ok())
        .flatten()
}

fn strip_timezone(value: &str) -> Option<&str> {
    if let Some(rest) = value.strip_suffix('Z') {
        return Some(rest);
    }
    if value.len() > 6 {
        let (rest, zone) = value.split_at(value.len() - 6);
        let zb = zone.as_bytes();
        if (zb[0] == b'+' || zb[0] == b'-') && zb[3] == b':' {
            let hours = digits(&zone[1..3], 2)?;
            let minutes = digits(&zone[4..6], 2)?;
            return (hours <= 14 && minutes < 60).then_some(rest);
        }
    }
    Some(value)
}

fn is_plain_date(value: &str) -> bool {
    let value = value.strip_prefix('-').unwrap_or(value);
    let mut parts = value.splitn(3, '-');
    let (Some(year), Some(month), Some(day)) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    year.len() >= 4
        && year.chars().all(|c| c.is_ascii_digit())
        && digits(month, 2).is_some_and(|m| (1..=12).contains(&m))
        && digits(day, 2).is_some_and(|d| (1..=31).contains(&d))
}

fn is_date(value: &str) -> bool {
    strip_timezone(value).is_some_and(is_plain_date)
}

fn is_date_time(value: &str) -> bool {
    let Some(value) = strip_timezone(value) else {
        return false;
    };
    let Some((date, time)) = value.split_once('T') else {
        return false;
    };
    let (hms, fraction) = time.split_once('.').unwrap_or((time, "0"));
    let mut parts = hms.split(':');
    let (Some(h), Some(m), Some(s), None) = (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    is_plain_date(date)
        && digits(h, 2).is_some_and(|h| h <= 24)
        && digits(m, 2).is_some_and(|m| m < 60)
        && digits(s, 2).is_some_and(|s| s < 61)
        && !fraction.is_empty()
        && fraction.chars().all(|c| c.is_ascii_digit())
}

/// Constraining facets of a restricted simple type.
#[derive(Debug, Clone, Default)]
pub struct Facets {
    pub enumeration: Vec<String>,
    pub patterns: Vec<Regex>,
    pub length: Option<usize>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub min_inclusive: Option<f64>,
    pub max_inclusive: Option<f64>,
    pub min_exclusive: Option<f64>,
    pub max_exclusive: Option<f64>,
    pub white_space: Option<WhiteSpace>,
}

impl Facets {
    /// Check a normalized value; `length` is in characters or list items.
    pub fn check(&self, value: &str, length: usize) -> Result<(), String> {
        if !self.enumeration.is_empty() && !self.enumeration.iter().any(|e| e == value) {
            return Err(format!(
                "'{value}' is not one of the permitted values: {}",
                self.enumeration.join(", ")
            ));
        }
        if let Some(pattern) = self.patterns.iter().find(|p| !p.is_match(value)) {
            return Err(format!(
                "'{value}' does not match the pattern '{}'",
                display_pattern(pattern)
            ));
        }
        if let Some(expected) = self.length
            && length != expected
        {
            return Err(format!("'{value}' has length {length}, expected {expected}"));
        }
        if let Some(min) = self.min_length
            && length < min
        {
            return Err(format!("'{value}' is shorter than the minimum length {min}"));
        }
        if let Some(max) = self.max_length
            && length > max
        {
            return Err(format!("'{value}' is longer than the maximum length {max}"));
        }
        if self.has_bounds() {
            let number: f64 = value
                .parse()
                .map_err(|_| format!("'{value}' is not a number"))?;
            let in_range = self.min_inclusive.is_none_or(|b| number >= b)
                && self.max_inclusive.is_none_or(|b| number <= b)
                && self.min_exclusive.is_none_or(|b| number > b)
                && self.max_exclusive.is_none_or(|b| number < b);
            if !in_range {
                return Err(format!("'{value}' is out of range"));
            }
        }
        Ok(())
    }

    fn has_bounds(&self) -> bool {
        self.min_inclusive.is_some()
            || self.max_inclusive.is_some()
            || self.min_exclusive.is_some()
            || self.max_exclusive.is_some()
    }
}

fn display_pattern(pattern: &Regex) -> &str {
    let source = pattern.as_str();
    source
        .strip_prefix("^(?:")
        .and_then(|s| s.strip_suffix(")$"))
        .unwrap_or(source)
}

/// Translate an XML Schema regular expression into an anchored [`Regex`].
pub fn compile_pattern(pattern: &str) -> Result<Regex, String> {
    let mut translated = String::with_capacity(pattern.len() + 16);
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('i') => translated.push_str("[_:\\p{L}]"),
                Some('I') => translated.push_str("[^_:\\p{L}]"),
                Some('c') => translated.push_str("[-._:\\p{L}\\p{N}]"),
                Some('C') => translated.push_str("[^-._:\\p{L}\\p{N}]"),
                Some(other) => {
                    translated.push('\\');
                    translated.push(other);
                }
                None => return Err(format!("pattern '{pattern}' ends with a backslash")),
            }
        } else {
            translated.push(c);
        }
    }
    Regex::new(&format!("^(?:{translated})$")).map_err(|e| format!("invalid pattern '{pattern}': {e}"))
}
