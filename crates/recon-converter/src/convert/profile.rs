//! Per-partner conversion profiles
//!
//! A profile fixes which sheet is read, whether the header is checked,
//! whether a trailing summary row is dropped, and how the output file is named.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::workbook::SheetSelector;

/// Column layout Indodana ledgers must carry
pub const INDODANA_HEADER: &[&str] = &[
    "NO",
    "MERCHANT NAME",
    "TRANSACTION DATE",
    "TRANSIDMERCHANT",
    "CUSTOMER NAME",
    "AMOUNT",
    "FEE",
    "TAX",
    "MERCHANT SUPPORT",
    "PAY TO MERCHANT",
    "PAY OUT DATE",
    "TRANSACTION TYPE",
    "TENURE",
];

/// Sheet holding the Indodana ledger
pub const INDODANA_SHEET: &str = "Ledger";

const SOURCE_EXTENSION: &str = ".xlsx";
const OUTPUT_EXTENSION: &str = ".csv";

static DMY_DATE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"(\d{2})-(\d{2})-(\d{4})"));

/// Partner conversion profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelProfile {
    Ovo,
    Indodana,
}

impl ChannelProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelProfile::Ovo => "ovo",
            ChannelProfile::Indodana => "indodana",
        }
    }

    pub fn rules(&self) -> ConversionRules {
        match self {
            ChannelProfile::Ovo => ConversionRules {
                sheet: SheetSelector::Index(0),
                expected_header: None,
                drop_trailing_summary: true,
                rename: RenameRule::ReorderDate,
            },
            ChannelProfile::Indodana => ConversionRules {
                sheet: SheetSelector::Name(INDODANA_SHEET.to_string()),
                expected_header: Some(INDODANA_HEADER),
                drop_trailing_summary: false,
                rename: RenameRule::StripSuffix("_yokke-ptp"),
            },
        }
    }
}

impl std::fmt::Display for ChannelProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ChannelProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ovo" => Ok(ChannelProfile::Ovo),
            "indodana" => Ok(ChannelProfile::Indodana),
            _ => Err(format!("Invalid profile: {} (expected ovo or indodana)", s)),
        }
    }
}

/// Everything the converter needs to know about one profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRules {
    pub sheet: SheetSelector,
    /// Header layout to enforce; `None` skips the check
    pub expected_header: Option<&'static [&'static str]>,
    pub drop_trailing_summary: bool,
    pub rename: RenameRule,
}

/// Source name to output name transformation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameRule {
    /// Rewrite every `DD-MM-YYYY` as `YYYYMMDD`
    ReorderDate,
    /// Remove every occurrence of a fixed marker
    StripSuffix(&'static str),
}

impl RenameRule {
    /// Derive the destination file name from a source file name
    ///
    /// Every `.xlsx` occurrence is removed and `.csv` appended.
    pub fn output_name(&self, source_name: &str) -> String {
        let stem = match self {
            RenameRule::ReorderDate => reorder_dates(source_name),
            RenameRule::StripSuffix(marker) => source_name.replace(marker, ""),
        };
        format!("{}{}", stem.replace(SOURCE_EXTENSION, ""), OUTPUT_EXTENSION)
    }
}

/// Replace every `DD-MM-YYYY` substring with `YYYYMMDD`
pub fn reorder_dates(name: &str) -> String {
    match DMY_DATE.as_ref() {
        Ok(re) => re.replace_all(name, "${3}${2}${1}").into_owned(),
        Err(_) => name.to_string(),
    }
}
