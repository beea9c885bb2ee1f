//! Path globs for allow/deny lists.
//!
//! Patterns match normalized relative paths component by component, anchored
//! at the right end: `*.pem` matches `a/b/key.pem`, `memory/*.md` matches
//! `memory/x.md` and `old/memory/x.md`. `**` matches zero or more whole
//! components. A leading `/` anchors the pattern at the workspace root.

use glob::{MatchOptions, Pattern};

use crate::error::{RedactError, RedactResult};

const OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
enum Segment {
    AnyDepth,
    Name(Pattern),
}

#[derive(Debug, Clone)]
pub struct PathGlob {
    raw: String,
    anchored: bool,
    segments: Vec<Segment>,
}

impl PathGlob {
    pub fn new(raw: &str) -> RedactResult<Self> {
        let anchored = raw.starts_with('/');
        let body = raw.trim_start_matches('/');
        if body.is_empty() {
            return Err(RedactError::InvalidGlob {
                pattern: raw.into(),
                message: "empty pattern".into(),
            });
        }
        let segments = body
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| {
                if s == "**" {
                    Ok(Segment::AnyDepth)
                } else {
                    Pattern::new(s).map(Segment::Name).map_err(|e| RedactError::InvalidGlob {
                        pattern: raw.into(),
                        message: e.to_string(),
                    })
                }
            })
            .collect::<RedactResult<Vec<_>>>()?;
        Ok(Self {
            raw: raw.to_string(),
            anchored,
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, rel_path: &str) -> bool {
        let parts: Vec<&str> = rel_path.split('/').filter(|p| !p.is_empty()).collect();
        if self.anchored {
            return match_from(&self.segments, &parts);
        }
        (0..parts.len()).any(|start| match_from(&self.segments, &parts[start..]))
    }
}

fn match_from(segments: &[Segment], parts: &[&str]) -> bool {
    match segments.split_first() {
        None => parts.is_empty(),
        Some((Segment::AnyDepth, rest)) => {
            (0..=parts.len()).any(|skip| match_from(rest, &parts[skip..]))
        }
        Some((Segment::Name(p), rest)) => match parts.split_first() {
            Some((head, tail)) => p.matches_with(head, OPTIONS) && match_from(rest, tail),
            None => false,
        },
    }
}

/// Compile a list of raw globs.
pub fn compile_all<S: AsRef<str>>(raw: &[S]) -> RedactResult<Vec<PathGlob>> {
    raw.iter().map(|r| PathGlob::new(r.as_ref())).collect()
}
