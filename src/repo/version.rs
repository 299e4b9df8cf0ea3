//! rpm version comparison.
//!
//! [`Rpmdevvercmp`] asks `rpmdev-vercmp` (exit 0 = equal, 11 = first newer,
//! 12 = second newer). [`NativeVercmp`] implements the same segment-wise
//! algorithm as rpm's `rpmvercmp` and is used when the tool is absent.

use anyhow::{bail, Result};
use std::cmp::Ordering;
use std::process::Command;

use crate::process;

pub trait VersionCompare {
    fn compare(&self, a: &str, b: &str) -> Result<Ordering>;
}

#[derive(Debug, Clone, Default)]
pub struct Rpmdevvercmp;

impl VersionCompare for Rpmdevvercmp {
    fn compare(&self, a: &str, b: &str) -> Result<Ordering> {
        let mut cmd = Command::new("rpmdev-vercmp");
        cmd.arg(a).arg(b);
        let out = process::output(&mut cmd)?;
        match out.status.code() {
            Some(0) => Ok(Ordering::Equal),
            Some(11) => Ok(Ordering::Greater),
            Some(12) => Ok(Ordering::Less),
            _ => bail!(
                "rpmdev-vercmp '{a}' '{b}' exited with {}: {}",
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            ),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NativeVercmp;

impl VersionCompare for NativeVercmp {
    fn compare(&self, a: &str, b: &str) -> Result<Ordering> {
        Ok(rpmvercmp(a, b))
    }
}

/// `rpmdev-vercmp` when installed, otherwise the native implementation.
pub fn default_comparator() -> Box<dyn VersionCompare> {
    if which::which("rpmdev-vercmp").is_ok() {
        Box::new(Rpmdevvercmp)
    } else {
        tracing::debug!("rpmdev-vercmp not found; using built-in version comparison");
        Box::new(NativeVercmp)
    }
}

/// Compare two version strings the way rpm does.
///
/// Strings are split into alternating numeric and alphabetic segments; other
/// characters only separate segments. Numeric segments compare as integers and
/// beat alphabetic ones. `~` sorts before anything (pre-releases) and `^`
/// sorts after the base version but before any further segment.
pub fn rpmvercmp(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let (mut one, mut two) = (a.as_bytes(), b.as_bytes());

    while !one.is_empty() || !two.is_empty() {
        one = skip_separators(one);
        two = skip_separators(two);

        let (h1, h2) = (one.first().copied(), two.first().copied());

        if h1 == Some(b'~') || h2 == Some(b'~') {
            if h1 != Some(b'~') {
                return Ordering::Greater;
            }
            if h2 != Some(b'~') {
                return Ordering::Less;
            }
            one = &one[1..];
            two = &two[1..];
            continue;
        }

        if h1 == Some(b'^') || h2 == Some(b'^') {
            if h1.is_none() {
                return Ordering::Less;
            }
            if h2.is_none() {
                return Ordering::Greater;
            }
            if h1 != Some(b'^') {
                return Ordering::Greater;
            }
            if h2 != Some(b'^') {
                return Ordering::Less;
            }
            one = &one[1..];
            two = &two[1..];
            continue;
        }

        if one.is_empty() || two.is_empty() {
            break;
        }

        let numeric = one[0].is_ascii_digit();
        let take = |s: &[u8]| -> usize {
            s.iter()
                .take_while(|c| {
                    if numeric {
                        c.is_ascii_digit()
                    } else {
                        c.is_ascii_alphabetic()
                    }
                })
                .count()
        };
        let (n1, n2) = (take(one), take(two));
        let (seg1, seg2) = (&one[..n1], &two[..n2]);
        one = &one[n1..];
        two = &two[n2..];

        // Segments of different kinds: numeric is newer.
        if seg2.is_empty() {
            return if numeric {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        let ord = if numeric {
            let s1 = strip_leading_zeros(seg1);
            let s2 = strip_leading_zeros(seg2);
            s1.len().cmp(&s2.len()).then_with(|| s1.cmp(s2))
        } else {
            seg1.cmp(seg2)
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }

    match (one.is_empty(), two.is_empty()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        _ => Ordering::Greater,
    }
}

fn skip_separators(s: &[u8]) -> &[u8] {
    let n = s
        .iter()
        .take_while(|c| !c.is_ascii_alphanumeric() && **c != b'~' && **c != b'^')
        .count();
    &s[n..]
}

fn strip_leading_zeros(s: &[u8]) -> &[u8] {
    let n = s.iter().take_while(|c| **c == b'0').count();
    &s[n..]
}
