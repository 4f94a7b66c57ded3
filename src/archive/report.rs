//! Comparison reports

use std::fmt;

/// One way two archives differ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discrepancy {
    OnlyInLeft(String),
    OnlyInRight(String),
    ContentDiffers(String),
    /// A nested archive whose content differs
    Nested { path: String, report: ComparisonReport },
}

impl Discrepancy {
    pub fn path(&self) -> &str {
        match self {
            Discrepancy::OnlyInLeft(p) | Discrepancy::OnlyInRight(p) | Discrepancy::ContentDiffers(p) => p,
            Discrepancy::Nested { path, .. } => path,
        }
    }
}

/// Every discrepancy found between two archives. Empty means equal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComparisonReport {
    discrepancies: Vec<Discrepancy>,
}

impl ComparisonReport {
    pub(crate) fn push(&mut self, discrepancy: Discrepancy) {
        self.discrepancies.push(discrepancy);
    }

    pub fn is_equal(&self) -> bool {
        self.discrepancies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.discrepancies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.discrepancies.is_empty()
    }

    pub fn discrepancies(&self) -> &[Discrepancy] {
        &self.discrepancies
    }

    /// Flattened, human-readable lines; nested members are shown as
    /// `outer.tgz!inner/path`.
    pub fn lines(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_lines("", &mut out);
        out
    }

    fn collect_lines(&self, prefix: &str, out: &mut Vec<String>) {
        for d in &self.discrepancies {
            match d {
                Discrepancy::OnlyInLeft(p) => out.push(format!("- {}{}", prefix, p)),
                Discrepancy::OnlyInRight(p) => out.push(format!("+ {}{}", prefix, p)),
                Discrepancy::ContentDiffers(p) => out.push(format!("~ {}{}", prefix, p)),
                Discrepancy::Nested { path, report } => {
                    report.collect_lines(&format!("{}{}!", prefix, path), out);
                }
            }
        }
    }
}

impl fmt::Display for ComparisonReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_equal() {
            return write!(f, "archives are equal");
        }
        write!(f, "{}", self.lines().join("\n"))
    }
}
