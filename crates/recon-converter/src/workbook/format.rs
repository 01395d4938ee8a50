//! Cell number formats
//!
//! A numeric cell whose style carries a date or time format is rendered as
//! formatted text, the way spreadsheet applications display it. Any other
//! format leaves the stored value untouched.
//!
//! Styles live in `xl/styles.xml`: `<cellXfs>` lists cell styles by index
//! (the `s` attribute of a cell), each pointing at a number format id.
//! Ids below 164 are built in; custom codes are declared under `<numFmts>`.

use chrono::{Datelike, NaiveDate, NaiveDateTime, TimeDelta, Timelike};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;
use std::sync::Arc;

use super::{attribute, xml_error, Result};

pub(super) const STYLES_PART: &str = "xl/styles.xml";

/// First serial past 9999-12-31
const MAX_SERIAL: f64 = 2_958_466.0;

const MS_PER_DAY: f64 = 86_400_000.0;

/// Codes of the built-in date and time formats
fn builtin_code(id: u32) -> Option<&'static str> {
    Some(match id {
        14 => "mm-dd-yy",
        15 => "d-mmm-yy",
        16 => "d-mmm",
        17 => "mmm-yy",
        18 => "h:mm AM/PM",
        19 => "h:mm:ss AM/PM",
        20 => "hh:mm",
        21 => "hh:mm:ss",
        22 => "m/d/yy hh:mm",
        45 => "mm:ss",
        46 => "[h]:mm:ss",
        47 => "mm:ss.0",
        _ => return None,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Meridiem {
    Full,
    Short,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Year(usize),
    /// An `m` run before it is known to be a month or a minute
    MonthOrMinute(usize),
    Month(usize),
    Minute(usize),
    Day(usize),
    Hour(usize),
    ElapsedHours,
    Second(usize),
    Fraction(usize),
    Meridiem(Meridiem),
}

impl Token {
    fn is_field(&self) -> bool {
        !matches!(self, Token::Literal(_) | Token::Meridiem(_) | Token::Fraction(_))
    }
}

/// A parsed date or time format code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateFormat {
    tokens: Vec<Token>,
    twelve_hour: bool,
}

impl DateFormat {
    /// Parse a format code; `None` when it does not display a date or time
    pub fn parse(code: &str) -> Option<Self> {
        let mut tokens = tokenize(first_section(code));
        if !tokens.iter().any(Token::is_field) {
            return None;
        }
        resolve_minutes(&mut tokens);
        let twelve_hour = tokens.iter().any(|t| matches!(t, Token::Meridiem(_)));
        Some(Self {
            tokens,
            twelve_hour,
        })
    }

    /// Render a serial date; `None` when the serial is out of range
    pub fn render(&self, serial: f64, date1904: bool) -> Option<String> {
        if !serial.is_finite() || serial < 0.0 || serial >= MAX_SERIAL {
            return None;
        }

        let epoch = if date1904 {
            NaiveDate::from_ymd_opt(1904, 1, 1)?
        } else if serial < 60.0 {
            // Serial 60 is the nonexistent 1900-02-29
            NaiveDate::from_ymd_opt(1899, 12, 31)?
        } else {
            NaiveDate::from_ymd_opt(1899, 12, 30)?
        };

        let mut millis = (serial * MS_PER_DAY).round() as i64;
        if !self.tokens.iter().any(|t| matches!(t, Token::Fraction(_))) {
            millis = (millis + 500) / 1000 * 1000;
        }
        let moment = epoch
            .and_hms_opt(0, 0, 0)?
            .checked_add_signed(TimeDelta::try_milliseconds(millis)?)?;

        let mut out = String::new();
        for token in &self.tokens {
            self.push_token(&mut out, token, &moment, millis);
        }
        Some(out)
    }

    fn push_token(&self, out: &mut String, token: &Token, moment: &NaiveDateTime, millis: i64) {
        let padded = |n: usize, value: u32| {
            if n >= 2 {
                format!("{:02}", value)
            } else {
                value.to_string()
            }
        };

        match token {
            Token::Literal(text) => out.push_str(text),
            Token::Year(n) if *n <= 2 => out.push_str(&format!("{:02}", moment.year() % 100)),
            Token::Year(_) => out.push_str(&format!("{:04}", moment.year())),
            Token::Month(n) => match n {
                1 | 2 => out.push_str(&padded(*n, moment.month())),
                3 => out.push_str(&moment.format("%b").to_string()),
                4 => out.push_str(&moment.format("%B").to_string()),
                _ => out.extend(moment.format("%B").to_string().chars().take(1)),
            },
            Token::MonthOrMinute(n) | Token::Minute(n) => {
                out.push_str(&padded(*n, moment.minute()))
            },
            Token::Day(n) => match n {
                1 | 2 => out.push_str(&padded(*n, moment.day())),
                3 => out.push_str(&moment.format("%a").to_string()),
                _ => out.push_str(&moment.format("%A").to_string()),
            },
            Token::Hour(n) => {
                let hour = if self.twelve_hour {
                    match moment.hour() % 12 {
                        0 => 12,
                        h => h,
                    }
                } else {
                    moment.hour()
                };
                out.push_str(&padded(*n, hour));
            },
            Token::ElapsedHours => out.push_str(&(millis / 3_600_000).to_string()),
            Token::Second(n) => out.push_str(&padded(*n, moment.second())),
            Token::Fraction(n) => {
                let digits = format!("{:03}", moment.nanosecond() / 1_000_000);
                out.push('.');
                out.extend(digits.chars().take(*n));
            },
            Token::Meridiem(style) => {
                let pm = moment.hour() >= 12;
                out.push_str(match (style, pm) {
                    (Meridiem::Full, false) => "AM",
                    (Meridiem::Full, true) => "PM",
                    (Meridiem::Short, false) => "A",
                    (Meridiem::Short, true) => "P",
                });
            },
        }
    }
}

/// The positive-number section of a format code
fn first_section(code: &str) -> &str {
    let mut quoted = false;
    let mut bracket = false;
    for (i, c) in code.char_indices() {
        match c {
            '"' if !bracket => quoted = !quoted,
            '[' if !quoted => bracket = true,
            ']' if !quoted => bracket = false,
            ';' if !quoted && !bracket => return &code[..i],
            _ => {},
        }
    }
    code
}

fn tokenize(code: &str) -> Vec<Token> {
    let chars: Vec<char> = code.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let rest: String = chars[i..].iter().take(5).collect::<String>().to_ascii_uppercase();

        if rest.starts_with("AM/PM") {
            tokens.push(Token::Meridiem(Meridiem::Full));
            i += 5;
            continue;
        }
        if rest.starts_with("A/P") {
            tokens.push(Token::Meridiem(Meridiem::Short));
            i += 3;
            continue;
        }

        match c {
            '"' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&q| q == '"')
                    .map_or(chars.len(), |p| i + 1 + p);
                tokens.push(Token::Literal(chars[i + 1..end].iter().collect()));
                i = end + 1;
            },
            '\\' => {
                if let Some(&next) = chars.get(i + 1) {
                    tokens.push(Token::Literal(next.to_string()));
                }
                i += 2;
            },
            '_' => {
                tokens.push(Token::Literal(" ".to_string()));
                i += 2;
            },
            '*' => i += 2,
            '[' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&b| b == ']')
                    .map_or(chars.len(), |p| i + 1 + p);
                let inner: String = chars[i + 1..end].iter().collect::<String>().to_ascii_lowercase();
                if !inner.is_empty() && inner.chars().all(|c| c == 'h') {
                    tokens.push(Token::ElapsedHours);
                }
                // Colours, conditions and locale tags are dropped
                i = end + 1;
            },
            '.' if matches!(last_field(&tokens), Some(Token::Second(_)))
                && chars.get(i + 1) == Some(&'0') =>
            {
                let run = run_length(&chars[i + 1..], |c| c == '0');
                tokens.push(Token::Fraction(run));
                i += 1 + run;
            },
            _ => {
                let lower = c.to_ascii_lowercase();
                let run = run_length(&chars[i..], |x| x.to_ascii_lowercase() == lower);
                let token = match lower {
                    'y' => Token::Year(run),
                    'm' => Token::MonthOrMinute(run),
                    'd' => Token::Day(run),
                    'h' => Token::Hour(run),
                    's' => Token::Second(run),
                    _ => {
                        tokens.push(Token::Literal(c.to_string()));
                        i += 1;
                        continue;
                    },
                };
                tokens.push(token);
                i += run;
            },
        }
    }

    tokens
}

fn run_length(chars: &[char], matches: impl Fn(char) -> bool) -> usize {
    chars.iter().take_while(|&&c| matches(c)).count()
}

fn last_field(tokens: &[Token]) -> Option<&Token> {
    tokens.iter().rev().find(|t| t.is_field())
}

/// An `m` run of one or two letters means minutes right after an hour or
/// right before a second; otherwise it is a month.
fn resolve_minutes(tokens: &mut [Token]) {
    for i in 0..tokens.len() {
        let Token::MonthOrMinute(n) = tokens[i] else {
            continue;
        };
        let after_hour = matches!(
            last_field(&tokens[..i]),
            Some(Token::Hour(_) | Token::ElapsedHours)
        );
        let before_second = matches!(
            tokens[i + 1..].iter().find(|t| t.is_field()),
            Some(Token::Second(_))
        );
        tokens[i] = if n <= 2 && (after_hour || before_second) {
            Token::Minute(n)
        } else {
            Token::Month(n)
        };
    }
}

/// Date formats by cell style index
#[derive(Debug, Clone, Default)]
pub(super) struct CellFormats {
    styles: Vec<Option<Arc<DateFormat>>>,
    date1904: bool,
}

impl CellFormats {
    /// Formats for a workbook without a styles part
    pub(super) fn plain(date1904: bool) -> Self {
        Self {
            styles: Vec::new(),
            date1904,
        }
    }

    pub(super) fn parse(xml: &[u8], date1904: bool) -> Result<Self> {
        let mut reader = Reader::from_reader(xml);
        let mut custom: HashMap<u32, String> = HashMap::new();
        let mut xf_formats: Vec<u32> = Vec::new();
        let mut in_cell_xfs = false;
        let mut buf = Vec::new();

        loop {
            match reader
                .read_event_into(&mut buf)
                .map_err(|e| xml_error(STYLES_PART, e))?
            {
                Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                    b"numFmt" => {
                        let id = attribute(&e, STYLES_PART, b"numFmtId")?;
                        let code = attribute(&e, STYLES_PART, b"formatCode")?;
                        if let (Some(id), Some(code)) = (id.and_then(|v| v.parse().ok()), code) {
                            custom.insert(id, code);
                        }
                    },
                    b"cellXfs" => in_cell_xfs = true,
                    b"xf" if in_cell_xfs => {
                        let id = attribute(&e, STYLES_PART, b"numFmtId")?
                            .and_then(|v| v.parse().ok())
                            .unwrap_or(0);
                        xf_formats.push(id);
                    },
                    _ => {},
                },
                Event::End(e) if e.local_name().as_ref() == b"cellXfs" => in_cell_xfs = false,
                Event::Eof => break,
                _ => {},
            }
            buf.clear();
        }

        let mut parsed: HashMap<u32, Option<Arc<DateFormat>>> = HashMap::new();
        let styles = xf_formats
            .into_iter()
            .map(|id| {
                parsed
                    .entry(id)
                    .or_insert_with(|| {
                        custom
                            .get(&id)
                            .map(String::as_str)
                            .or_else(|| builtin_code(id))
                            .and_then(DateFormat::parse)
                            .map(Arc::new)
                    })
                    .clone()
            })
            .collect();

        Ok(Self { styles, date1904 })
    }

    /// Formatted text for a numeric cell, when its style displays a date
    pub(super) fn render(&self, style: usize, raw: &str) -> Option<String> {
        let format = self.styles.get(style)?.as_ref()?;
        let serial: f64 = raw.trim().parse().ok()?;
        format.render(serial, self.date1904)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn render(code: &str, serial: f64) -> String {
        DateFormat::parse(code).unwrap().render(serial, false).unwrap()
    }

    #[test]
    fn test_builtin_short_date() {
        assert_eq!(render(builtin_code(14).unwrap(), 45323.0), "02-01-24");
    }

    #[test]
    fn test_custom_codes() {
        assert_eq!(render("dd/mm/yyyy", 45323.0), "01/02/2024");
        assert_eq!(render("yyyy-mm-dd hh:mm:ss", 45324.75), "2024-02-02 18:00:00");
        assert_eq!(render("d mmmm yyyy", 45323.0), "1 February 2024");
        assert_eq!(render("[$-421]dd mmm yyyy;@", 45323.0), "01 Feb 2024");
        assert_eq!(render("h:mm AM/PM", 45323.5), "12:00 PM");
        assert_eq!(render("dddd", 45323.0), "Thursday");
    }

    #[test]
    fn test_month_and_minute_disambiguation() {
        assert_eq!(render("m/d/yy h:mm", 45323.0 + 0.5 + 5.0 / 1440.0), "2/1/24 12:05");
        assert_eq!(render("mm:ss", 61.0 / 86400.0), "01:01");
    }

    #[test]
    fn test_elapsed_hours_and_fraction() {
        assert_eq!(render("[h]:mm:ss", 1.5), "36:00:00");
        assert_eq!(render("mm:ss.0", 1.25 / 86400.0), "00:01.2");
    }

    #[test]
    fn test_non_date_codes_are_ignored() {
        for code in ["General", "0.00", "#,##0", "\"day\" 0", "[Red]0.00", "@"] {
            assert!(DateFormat::parse(code).is_none(), "{} parsed as a date", code);
        }
    }

    #[test]
    fn test_early_serials_and_1904_system() {
        assert_eq!(render("yyyy-mm-dd", 1.0), "1900-01-01");
        assert_eq!(render("yyyy-mm-dd", 61.0), "1900-03-01");
        let format = DateFormat::parse("yyyy-mm-dd").unwrap();
        assert_eq!(format.render(43861.0, true).unwrap(), "2024-02-01");
        assert!(format.render(-1.0, false).is_none());
        assert!(format.render(3_000_000.0, false).is_none());
    }

    #[test]
    fn test_styles_map_cell_xfs_to_formats() {
        let xml = br#"<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
  <numFmts count="1"><numFmt numFmtId="164" formatCode="dd/mm/yyyy"/></numFmts>
  <cellStyleXfs count="1"><xf numFmtId="14"/></cellStyleXfs>
  <cellXfs count="4">
    <xf numFmtId="0"/>
    <xf numFmtId="14" applyNumberFormat="1"/>
    <xf numFmtId="164" applyNumberFormat="1"><alignment horizontal="left"/></xf>
    <xf numFmtId="4"/>
  </cellXfs>
</styleSheet>"#;
        let formats = CellFormats::parse(xml, false).unwrap();

        assert_eq!(formats.render(0, "45323"), None);
        assert_eq!(formats.render(1, "45323").as_deref(), Some("02-01-24"));
        assert_eq!(formats.render(2, "45323").as_deref(), Some("01/02/2024"));
        assert_eq!(formats.render(3, "45323"), None);
        assert_eq!(formats.render(9, "45323"), None);
        assert_eq!(formats.render(1, "not a number"), None);
    }
}
