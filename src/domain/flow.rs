use crate::error::{ProcessingError, Result};
use std::fmt;
use std::str::FromStr;

/// Prefix marking a step as a member of a parallel batch.
pub const PARALLEL_MARKER: &str = "parallel:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowGroup {
    Sequential(String),
    /// Contiguous parallel-marked steps, in source order.
    Parallel(Vec<String>),
}

/// A parsed flow specification such as `"fraudCheck,authorize,parallel:settle,parallel:notification"`.
///
/// Groups keep the order in which they appear in the source string. A run of contiguous
/// parallel-marked tokens collapses into one `FlowGroup::Parallel`; the marker never carries
/// over to the unmarked tokens that follow it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowSpecification {
    groups: Vec<FlowGroup>,
}

impl FlowSpecification {
    pub fn parse(source: &str) -> Result<Self> {
        if source.trim().is_empty() {
            return Err(ProcessingError::InvalidFlow(
                "Task flow cannot be null or empty".to_string(),
            ));
        }

        let mut groups: Vec<FlowGroup> = Vec::new();
        for token in source.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            match token.strip_prefix(PARALLEL_MARKER) {
                Some(name) => {
                    let name = name.trim();
                    if name.is_empty() {
                        return Err(ProcessingError::InvalidFlow(format!(
                            "Parallel marker without a step name in '{}'",
                            source
                        )));
                    }
                    if let Some(FlowGroup::Parallel(batch)) = groups.last_mut() {
                        batch.push(name.to_string());
                    } else {
                        groups.push(FlowGroup::Parallel(vec![name.to_string()]));
                    }
                }
                None => groups.push(FlowGroup::Sequential(token.to_string())),
            }
        }

        if groups.is_empty() {
            return Err(ProcessingError::InvalidFlow(format!(
                "Task flow '{}' names no steps",
                source
            )));
        }
        Ok(Self { groups })
    }

    pub fn groups(&self) -> &[FlowGroup] {
        &self.groups
    }

    pub fn has_parallel(&self) -> bool {
        self.groups
            .iter()
            .any(|group| matches!(group, FlowGroup::Parallel(_)))
    }

    pub fn step_count(&self) -> usize {
        self.groups
            .iter()
            .map(|group| match group {
                FlowGroup::Sequential(_) => 1,
                FlowGroup::Parallel(batch) => batch.len(),
            })
            .sum()
    }
}

impl FromStr for FlowSpecification {
    type Err = ProcessingError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for FlowSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for group in &self.groups {
            let names: Vec<String> = match group {
                FlowGroup::Sequential(name) => vec![name.clone()],
                FlowGroup::Parallel(batch) => batch
                    .iter()
                    .map(|name| format!("{}{}", PARALLEL_MARKER, name))
                    .collect(),
            };
            for name in names {
                if !first {
                    f.write_str(",")?;
                }
                f.write_str(&name)?;
                first = false;
            }
        }
        Ok(())
    }
}
