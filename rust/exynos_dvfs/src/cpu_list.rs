// SPDX-License-Identifier: GPL-2.0
use std::collections::HashSet;

use crate::error::DvfsError;
use crate::error::Result;

/// Upper bound on unit ids accepted in a list.
pub const MAX_UNITS: usize = 1024;

/// Parse a CPU/unit list such as `"0-3"` or `"4,6-7"`, keeping first-seen
/// order and dropping duplicates.
pub fn parse_cpu_list(optarg: &str) -> Result<Vec<usize>> {
    let mut cpus = Vec::new();
    let mut seen = HashSet::new();
    let bad = |msg: String| DvfsError::Config(format!("unit list {:?}: {}", optarg, msg));

    if optarg
        .chars()
        .any(|c| !c.is_ascii_digit() && c != '-' && c != ',' && !c.is_whitespace())
    {
        return Err(bad("invalid character".to_string()));
    }

    for token in optarg.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }

        let (start, end) = match token.split_once('-') {
            Some((s, e)) => (
                s.trim().parse::<usize>().map_err(|_| bad(format!("invalid range start in {}", token)))?,
                e.trim().parse::<usize>().map_err(|_| bad(format!("invalid range end in {}", token)))?,
            ),
            None => {
                let cpu = token.parse::<usize>().map_err(|_| bad(format!("invalid unit {}", token)))?;
                (cpu, cpu)
            }
        };
        if start > end {
            return Err(bad(format!("invalid range {}-{}", start, end)));
        }
        if end >= MAX_UNITS {
            return Err(bad(format!("unit {} exceeds {}", end, MAX_UNITS - 1)));
        }
        for i in start..=end {
            if seen.insert(i) {
                cpus.push(i);
            }
        }
    }

    if cpus.is_empty() {
        return Err(bad("no units".to_string()));
    }
    Ok(cpus)
}

/// Render units back into the compact range form.
pub fn format_cpu_list(units: &[usize]) -> String {
    let mut sorted = units.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    let mut parts = Vec::new();
    let mut iter = sorted.into_iter().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek() == Some(&(end + 1)) {
            end += 1;
            iter.next();
        }
        parts.push(if start == end {
            start.to_string()
        } else {
            format!("{}-{}", start, end)
        });
    }
    parts.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_cpu() {
        let v = parse_cpu_list("3").unwrap();
        assert_eq!(v, vec![3]);
    }

    #[test]
    fn parses_range_and_single() {
        let v = parse_cpu_list("4-6, 2,5").unwrap();
        assert_eq!(v, vec![4, 5, 6, 2]);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_cpu_list("0-2,a").is_err());
        assert!(parse_cpu_list("3-1").is_err());
        assert!(parse_cpu_list(" , ").is_err());
        assert!(parse_cpu_list("0-4096").is_err());
    }

    #[test]
    fn formats_ranges() {
        assert_eq!(format_cpu_list(&[7, 4, 5, 6, 0, 2]), "0,2,4-7");
        assert_eq!(format_cpu_list(&[1]), "1");
    }
}
