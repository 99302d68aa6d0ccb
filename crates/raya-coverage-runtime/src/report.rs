//! Flush output
//!
//! The textual form is part of the runtime contract: a line with the method
//! index, then one `true`/`false` line per span in index order. Sections are
//! delimited by the index lines only.

use std::fmt;

/// Visitation data drained from one method's payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushedUnit {
    pub method_index: u32,
    pub hits: Vec<bool>,
}

impl FlushedUnit {
    pub fn hit_count(&self) -> usize {
        self.hits.iter().filter(|hit| **hit).count()
    }
}

/// Everything drained by one flush, in increasing method index order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub units: Vec<FlushedUnit>,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn unit(&self, method_index: u32) -> Option<&FlushedUnit> {
        self.units.iter().find(|u| u.method_index == method_index)
    }

    /// Parse the textual form back into a report
    ///
    /// Returns `None` if a boolean line appears before any index line or a
    /// line is neither an index nor a boolean.
    pub fn parse(text: &str) -> Option<Self> {
        let mut units: Vec<FlushedUnit> = Vec::new();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match line {
                "true" | "false" => units.last_mut()?.hits.push(line == "true"),
                _ => units.push(FlushedUnit {
                    method_index: line.parse().ok()?,
                    hits: Vec::new(),
                }),
            }
        }
        Some(Self { units })
    }
}

impl fmt::Display for FlushReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for unit in &self.units {
            writeln!(f, "{}", unit.method_index)?;
            for hit in &unit.hits {
                writeln!(f, "{}", hit)?;
            }
        }
        Ok(())
    }
}
