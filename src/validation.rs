//! Per-record sequence validation and base normalization
//!
//! Every framed record passes through a [`SequenceValidator`] owned by its
//! framer. Validation errors abort the stream; warnings are informational,
//! deduplicated per stream by a [`WarningRegistry`] and logged once.

use crate::error::{Result, UploadError};
use crate::types::SequenceRecord;
use log::warn;
use std::collections::BTreeSet;

/// Strict nucleotide alphabet (either case)
pub const STRICT_BASES: &[u8] = b"ACGTNUXacgtnux";

/// IUPAC nucleotide alphabet including ambiguity codes (either case)
pub const IUPAC_BASES: &[u8] = b"ABCDGHIKMNRSTUVWXYabcdghikmnrstuvwxy";

/// Whitespace allowed inside sequence blocks (wrapped FASTA lines)
const SEQUENCE_WHITESPACE: &[u8] = b" \t\n\r\x0b\x0c";

/// A non-fatal finding about a stream
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ValidationWarning {
    /// Name of the stream the warning is about
    pub source: String,
    /// Human readable message
    pub message: String,
}

/// Distinct warnings already emitted for one stream
///
/// Grows monotonically; a message is logged the first time it is seen.
#[derive(Debug, Default)]
pub struct WarningRegistry {
    source: String,
    seen: BTreeSet<String>,
}

impl WarningRegistry {
    /// Create an empty registry for the named stream
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            seen: BTreeSet::new(),
        }
    }

    /// Record `message`, logging it if it has not been seen before
    ///
    /// Returns `true` when the message was new.
    pub fn warn_once(&mut self, message: String) -> bool {
        if self.seen.contains(&message) {
            return false;
        }
        warn!("{}", message);
        self.seen.insert(message);
        true
    }

    /// Number of distinct warnings
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether no warning was emitted
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Distinct warnings, sorted by message
    pub fn warnings(&self) -> Vec<ValidationWarning> {
        self.seen
            .iter()
            .map(|message| ValidationWarning {
                source: self.source.clone(),
                message: message.clone(),
            })
            .collect()
    }
}

/// Which nucleotide alphabet a validator accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Alphabet {
    /// `ACGTNUX` (plus whitespace)
    #[default]
    Strict,
    /// IUPAC ambiguity codes (plus whitespace)
    Iupac,
}

impl Alphabet {
    fn table(self) -> [bool; 256] {
        let mut table = [false; 256];
        let bases = match self {
            Alphabet::Strict => STRICT_BASES,
            Alphabet::Iupac => IUPAC_BASES,
        };
        for &b in bases.iter().chain(SEQUENCE_WHITESPACE) {
            table[b as usize] = true;
        }
        table
    }
}

/// Validates and normalizes records of a single stream
pub struct SequenceValidator {
    name: String,
    valid: [bool; 256],
    warnings: WarningRegistry,
}

impl SequenceValidator {
    /// Create a validator for the named stream
    pub fn new(name: impl Into<String>, alphabet: Alphabet) -> Self {
        let name = name.into();
        Self {
            warnings: WarningRegistry::new(name.clone()),
            name,
            valid: alphabet.table(),
        }
    }

    /// Validate `record` in place
    ///
    /// - tabs in the id become `|` (warned once)
    /// - any byte outside the alphabet is an error naming every offender
    /// - `U/u` become `T/t` and `X/x` become `N/n` (warned once)
    pub fn validate(&mut self, record: &mut SequenceRecord) -> Result<()> {
        if record.id.contains(&b'\t') {
            self.warnings.warn_once(format!(
                "{} can not have tabs in headers; autoreplacing",
                self.name
            ));
            for b in record.id.iter_mut().filter(|b| **b == b'\t') {
                *b = b'|';
            }
        }

        let mut present = [false; 256];
        for &b in &record.sequence {
            present[b as usize] = true;
        }

        let invalid: Vec<String> = (0..=255u8)
            .filter(|&b| present[b as usize] && !self.valid[b as usize])
            .map(describe_byte)
            .collect();
        if !invalid.is_empty() {
            return Err(UploadError::Validation(format!(
                "{} contains non-nucleic acid characters: {}",
                self.name,
                invalid.join(",")
            )));
        }

        let translated = b"UuXx".iter().any(|&b| present[b as usize]);
        if translated {
            self.warnings.warn_once(format!(
                "Translating other bases in {} (X->N,U->T)",
                self.name
            ));
            for b in record.sequence.iter_mut() {
                *b = match *b {
                    b'U' => b'T',
                    b'u' => b't',
                    b'X' => b'N',
                    b'x' => b'n',
                    other => other,
                };
            }
        }

        Ok(())
    }

    /// Warnings emitted so far
    pub fn warnings(&self) -> &WarningRegistry {
        &self.warnings
    }
}

fn describe_byte(b: u8) -> String {
    if b.is_ascii_graphic() {
        (b as char).to_string()
    } else {
        format!("\\x{:02x}", b)
    }
}
