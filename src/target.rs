//! Target resolution: positional indices, `--range` and `--all` become one
//! ascending, deduplicated set of 1-based indices.
//!
//! Precedence: `--all` is exclusive and returns `1..=bound` no matter what
//! else was passed. Otherwise the range expression and positional indices are
//! unioned. Any invalid input rejects the whole request.

use std::collections::BTreeSet;

use crate::error::QuickVmError;

/// Raw user input, as received from the command line.
#[derive(Debug, Clone, Copy, Default)]
pub struct TargetSpec<'a> {
    pub indices: &'a [String],
    pub range: Option<&'a str>,
    pub all: bool,
}

impl TargetSpec<'_> {
    /// True when nothing at all was requested. Checked before the inventory
    /// is fetched so no shell command runs for an empty request.
    pub fn is_empty(&self) -> bool {
        !self.all && self.indices.is_empty() && self.range.is_none_or(str::is_empty)
    }
}

/// Ascending, deduplicated indices, each within `1..=bound`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSet {
    indices: Vec<usize>,
}

impl TargetSet {
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.indices.iter().copied()
    }
}

/// Sorts and deduplicates. Used for indices already taken from an inventory.
impl FromIterator<usize> for TargetSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let set: BTreeSet<usize> = iter.into_iter().collect();
        Self {
            indices: set.into_iter().collect(),
        }
    }
}

pub fn resolve(spec: &TargetSpec<'_>, bound: usize) -> Result<TargetSet, QuickVmError> {
    if spec.all {
        return Ok(TargetSet {
            indices: (1..=bound).collect(),
        });
    }

    let mut selected = BTreeSet::new();

    if let Some(expr) = spec.range.filter(|r| !r.is_empty()) {
        selected.extend(parse_range(expr, bound)?);
    }

    for raw in spec.indices {
        let index: i64 = raw.trim().parse().map_err(|_| QuickVmError::InvalidIndex {
            value: raw.clone(),
        })?;
        selected.insert(check_bounds(index, bound)?);
    }

    if selected.is_empty() {
        return Err(QuickVmError::NoTargetsSpecified);
    }

    Ok(TargetSet {
        indices: selected.into_iter().collect(),
    })
}

/// Parse `1-3,5,7-9`. Empty segments are skipped; an expression with no
/// indices at all is invalid.
pub fn parse_range(expr: &str, bound: usize) -> Result<BTreeSet<usize>, QuickVmError> {
    let mut indices = BTreeSet::new();

    for segment in expr.split(',').map(str::trim) {
        if segment.is_empty() {
            continue;
        }

        match segment.split_once('-') {
            Some((start, end)) => {
                if end.contains('-') {
                    return Err(syntax(segment, "expected start-end"));
                }
                let start = parse_endpoint(segment, start, "start")?;
                let end = parse_endpoint(segment, end, "end")?;
                if start > end {
                    return Err(syntax(
                        segment,
                        &format!("start index ({start}) must be <= end index ({end})"),
                    ));
                }
                let first = check_bounds(start, bound)?;
                let last = check_bounds(end, bound)?;
                indices.extend(first..=last);
            }
            None => {
                let index = parse_endpoint(segment, segment, "index")?;
                indices.insert(check_bounds(index, bound)?);
            }
        }
    }

    if indices.is_empty() {
        return Err(syntax(expr, "no indices found"));
    }

    Ok(indices)
}

fn parse_endpoint(segment: &str, raw: &str, what: &str) -> Result<i64, QuickVmError> {
    raw.trim()
        .parse()
        .map_err(|_| syntax(segment, &format!("invalid {what} '{}'", raw.trim())))
}

fn check_bounds(index: i64, bound: usize) -> Result<usize, QuickVmError> {
    match usize::try_from(index) {
        Ok(i) if (1..=bound).contains(&i) => Ok(i),
        _ => Err(QuickVmError::IndexOutOfBounds { index, bound }),
    }
}

fn syntax(segment: &str, reason: &str) -> QuickVmError {
    QuickVmError::InvalidRangeSyntax {
        segment: segment.to_string(),
        reason: reason.to_string(),
    }
}
