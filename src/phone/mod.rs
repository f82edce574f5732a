use std::fmt;

/// Countries the booking client ships in, keyed by ISO 3166 alpha-2 code.
///
/// Each region carries its country calling code and a deliberately lenient
/// national-number rule (length range plus a leading-digit constraint). The
/// rules accept every real subscriber number for the region; they do not try
/// to reject unassigned ranges.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Region {
    Us,
    Ca,
    Gb,
    Au,
    Fr,
    De,
    Es,
    Br,
    In,
    Mx,
}

// Scan order for calling-code resolution: two-digit codes before the shared
// NANP "1". Code 1 resolves to `Us` unless the hint region already says `Ca`.
const CODE_SCAN_ORDER: [Region; 9] = [
    Region::Fr,
    Region::Es,
    Region::Gb,
    Region::De,
    Region::Mx,
    Region::Br,
    Region::Au,
    Region::In,
    Region::Us,
];

impl Region {
    pub const DEFAULT: Region = Region::Us;

    pub fn calling_code(self) -> u16 {
        match self {
            Region::Us | Region::Ca => 1,
            Region::Fr => 33,
            Region::Es => 34,
            Region::Gb => 44,
            Region::De => 49,
            Region::Mx => 52,
            Region::Br => 55,
            Region::Au => 61,
            Region::In => 91,
        }
    }

    pub fn iso_code(self) -> &'static str {
        match self {
            Region::Us => "US",
            Region::Ca => "CA",
            Region::Gb => "GB",
            Region::Au => "AU",
            Region::Fr => "FR",
            Region::De => "DE",
            Region::Es => "ES",
            Region::Br => "BR",
            Region::In => "IN",
            Region::Mx => "MX",
        }
    }

    pub fn from_iso(code: &str) -> Option<Region> {
        match code.to_ascii_uppercase().as_str() {
            "US" => Some(Region::Us),
            "CA" => Some(Region::Ca),
            "GB" => Some(Region::Gb),
            "AU" => Some(Region::Au),
            "FR" => Some(Region::Fr),
            "DE" => Some(Region::De),
            "ES" => Some(Region::Es),
            "BR" => Some(Region::Br),
            "IN" => Some(Region::In),
            "MX" => Some(Region::Mx),
            _ => None,
        }
    }

    fn national_number_valid(self, digits: &str) -> bool {
        let first = match digits.chars().next() {
            Some(first) => first,
            None => return false,
        };
        let len = digits.len();
        match self {
            // NANP: area code may not start with 0 or 1. No constraint on the
            // exchange, so classic 555 test numbers stay valid.
            Region::Us | Region::Ca => len == 10 && matches!(first, '2'..='9'),
            Region::Gb => (9..=10).contains(&len) && first != '0',
            Region::Au => len == 9 && first != '0',
            Region::Fr => len == 9 && first != '0',
            Region::De => (6..=11).contains(&len) && first != '0',
            Region::Es => len == 9 && matches!(first, '6'..='9'),
            Region::Br => (10..=11).contains(&len) && first != '0',
            Region::In => len == 10 && first != '0',
            Region::Mx => len == 10 && first != '0',
        }
    }
}

impl Default for Region {
    fn default() -> Self {
        Region::DEFAULT
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.iso_code())
    }
}

/// A phone number as the user entered it, plus its canonical form.
///
/// `normalize` never fails: an input that cannot be made canonical produces a
/// number with `normalized` absent and the raw text preserved for display and
/// error reporting. The canonical form is E.164 (`+{code}{national}`), the
/// only shape ever sent to the network or compared for equality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneNumber {
    raw: String,
    region: Region,
    normalized: Option<String>,
}

impl PhoneNumber {
    /// Normalizes free-form input against the given region.
    ///
    /// Formatting characters are dropped, `+`/`00` international prefixes are
    /// resolved against the known calling codes (a shared code keeps the
    /// hinted region), trunk digits are stripped, and the national number is
    /// checked against the region rule.
    pub fn normalize(raw: &str, region: Region) -> Self {
        let normalized = canonicalize(raw, region);
        Self {
            raw: raw.to_string(),
            region: normalized.as_ref().map(|(region, _)| *region).unwrap_or(region),
            normalized: normalized.map(|(_, number)| number),
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn is_valid(&self) -> bool {
        self.normalized.is_some()
    }

    /// Canonical `+{code}{national}` form, if the input was valid.
    pub fn e164(&self) -> Option<&str> {
        self.normalized.as_deref()
    }

    /// National significant number (digits after the calling code).
    pub fn national(&self) -> Option<&str> {
        let normalized = self.normalized.as_deref()?;
        let prefix_len = 1 + self.region.calling_code().to_string().len();
        normalized.get(prefix_len..)
    }

    /// International display form. Invalid numbers echo the raw input.
    pub fn format_international(&self) -> String {
        let national = match self.national() {
            Some(national) => national,
            None => return self.raw.clone(),
        };
        let code = self.region.calling_code();
        if code == 1 && national.len() == 10 {
            format!(
                "+1 ({}) {}-{}",
                &national[..3],
                &national[3..6],
                &national[6..]
            )
        } else {
            format!("+{} {}", code, group_digits(national))
        }
    }

    /// In-country display form (trunk prefix restored outside the NANP).
    /// Invalid numbers echo the raw input.
    pub fn format_national(&self) -> String {
        let national = match self.national() {
            Some(national) => national,
            None => return self.raw.clone(),
        };
        if self.region.calling_code() == 1 && national.len() == 10 {
            format!(
                "({}) {}-{}",
                &national[..3],
                &national[3..6],
                &national[6..]
            )
        } else {
            format!("0{}", group_digits(national))
        }
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.e164() {
            Some(e164) => f.write_str(e164),
            None => f.write_str(&self.raw),
        }
    }
}

fn canonicalize(raw: &str, hint: Region) -> Option<(Region, String)> {
    let trimmed = raw.trim();
    let (international, body) = match trimmed.strip_prefix('+') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };

    let mut digits = String::with_capacity(body.len());
    for ch in body.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
        } else if !matches!(ch, ' ' | '-' | '.' | '(' | ')' | '/') {
            return None;
        }
    }

    let (region, national) = if international {
        split_calling_code(&digits, hint)?
    } else if let Some(rest) = digits.strip_prefix("00") {
        split_calling_code(rest, hint)?
    } else {
        (hint, digits.as_str())
    };

    let national = strip_trunk_prefix(region, national);
    if !region.national_number_valid(national) {
        return None;
    }

    Some((region, format!("+{}{}", region.calling_code(), national)))
}

fn split_calling_code<'a>(digits: &'a str, hint: Region) -> Option<(Region, &'a str)> {
    let hint_code = hint.calling_code().to_string();
    if let Some(rest) = digits.strip_prefix(hint_code.as_str()) {
        return Some((hint, rest));
    }
    for region in CODE_SCAN_ORDER {
        let code = region.calling_code().to_string();
        if let Some(rest) = digits.strip_prefix(code.as_str()) {
            return Some((region, rest));
        }
    }
    None
}

// Users routinely keep the in-country dialing prefix ("07700...", "+44 0...",
// "1 (555)..."). Dropping it here keeps those inputs valid.
fn strip_trunk_prefix(region: Region, digits: &str) -> &str {
    if region.calling_code() == 1 {
        if digits.len() == 11 {
            if let Some(rest) = digits.strip_prefix('1') {
                return rest;
            }
        }
        digits
    } else {
        digits.strip_prefix('0').unwrap_or(digits)
    }
}

// Display grouping only: groups of three, a lone trailing digit folded into
// the previous group.
fn group_digits(digits: &str) -> String {
    let chars: Vec<char> = digits.chars().collect();
    let mut groups: Vec<String> = chars
        .chunks(3)
        .map(|chunk| chunk.iter().collect())
        .collect();
    if groups.len() > 1 {
        if let Some(last) = groups.pop() {
            if last.len() == 1 {
                if let Some(previous) = groups.last_mut() {
                    previous.push_str(&last);
                }
            } else {
                groups.push(last);
            }
        }
    }
    groups.join(" ")
}

/// Structured form-validation failure carrying the offending input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub value: String,
}

/// Returns `None` when the value normalizes to a valid number for the region.
pub fn validate_phone(value: &str, region: Region) -> Option<ValidationError> {
    if PhoneNumber::normalize(value, region).is_valid() {
        None
    } else {
        Some(ValidationError {
            value: value.to_string(),
        })
    }
}

/// Builds a reusable predicate for form frameworks that hold validators.
pub fn phone_validator(region: Region) -> impl Fn(&str) -> Option<ValidationError> {
    move |value| validate_phone(value, region)
}
