//! Line-oriented configuration files
//!
//! ```text
//! # comment
//! NetMesgType=1
//! AlarmConfig
//!     DisplayName=Speeding
//!     Condition
//!         Type=302
//!         Arg=10.28
//!     End
//! End
//! ```
//!
//! A line holding a single word opens a section, `End` closes it and
//! every other line is `Keyword=Value`. Keywords may repeat.

use std::fmt::{Display, Write};
use std::str::FromStr;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub key: String,
    pub value: String,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Section {
    pub name: String,
    pub line: usize,
    pub params: Vec<Param>,
    pub sections: Vec<Section>,
}

impl Section {
    /// First value for `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.key == key)
            .map(|p| p.value.as_str())
    }

    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        match self.params.iter().find(|p| p.key == key) {
            Some(p) => p
                .value
                .parse()
                .map(Some)
                .map_err(|_| Error::parse(p.line, format!("bad value for {}: '{}'", key, p.value))),
            None => Ok(None),
        }
    }

    /// Boolean stored as 0 or 1
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        Ok(self.get_parsed::<u8>(key)?.map(|v| v != 0))
    }

    pub fn params<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a Param> + 'a {
        self.params.iter().filter(move |p| p.key == key)
    }

    pub fn children<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Section> + 'a {
        self.sections.iter().filter(move |s| s.name == name)
    }
}

/// Parse a whole file into an unnamed root section
pub fn parse(text: &str) -> Result<Section> {
    let mut stack = vec![Section::default()];

    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        if let Some((key, value)) = trimmed.split_once('=') {
            let key = key.trim();
            if key.is_empty() || key.contains(char::is_whitespace) {
                return Err(Error::parse(line, format!("bad keyword '{key}'")));
            }
            if let Some(section) = stack.last_mut() {
                section.params.push(Param {
                    key: key.to_string(),
                    value: value.trim().to_string(),
                    line,
                });
            }
        } else if trimmed == "End" {
            if stack.len() < 2 {
                return Err(Error::parse(line, "End without section"));
            }
            if let Some(done) = stack.pop() {
                if let Some(parent) = stack.last_mut() {
                    parent.sections.push(done);
                }
            }
        } else if trimmed.contains(char::is_whitespace) {
            return Err(Error::parse(line, format!("unexpected '{trimmed}'")));
        } else {
            stack.push(Section {
                name: trimmed.to_string(),
                line,
                ..Default::default()
            });
        }
    }

    if stack.len() > 1 {
        let open = stack.last().map(|s| s.line).unwrap_or_default();
        return Err(Error::parse(open, "section not closed"));
    }
    Ok(stack.pop().unwrap_or_default())
}

/// Builds a configuration file
#[derive(Debug, Default)]
pub struct ConfigWriter {
    out: String,
    depth: usize,
}

impl ConfigWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn indent(&mut self) {
        for _ in 0..self.depth {
            self.out.push_str("    ");
        }
    }

    pub fn comment(&mut self, text: &str) {
        self.indent();
        let _ = writeln!(self.out, "# {text}");
    }

    pub fn begin(&mut self, name: &str) {
        self.indent();
        let _ = writeln!(self.out, "{name}");
        self.depth += 1;
    }

    pub fn end(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        self.indent();
        self.out.push_str("End\n");
    }

    pub fn param(&mut self, key: &str, value: impl Display) {
        self.indent();
        // Values are single line
        let value = value.to_string().replace(['\r', '\n'], " ");
        let _ = writeln!(self.out, "{key}={value}");
    }

    pub fn finish(self) -> String {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_output_parses() {
        let mut w = ConfigWriter::new();
        w.comment("test");
        w.param("Top", 1);
        w.begin("AlarmConfig");
        w.param("DisplayName", "Fast = bad");
        w.begin("Condition");
        w.param("Type", 302);
        w.end();
        w.end();
        let text = w.finish();
        assert!(text.contains("    DisplayName=Fast = bad\n"));

        let root = parse(&text).unwrap();
        assert_eq!(root.get_parsed::<u32>("Top").unwrap(), Some(1));
        let config = root.children("AlarmConfig").next().unwrap();
        // Only the first '=' separates
        assert_eq!(config.get("DisplayName"), Some("Fast = bad"));
        let cond = config.children("Condition").next().unwrap();
        assert_eq!(cond.get("Type"), Some("302"));
        assert_eq!(cond.line, 5);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse("End\n"), Err(Error::Parse { line: 1, .. })));
        assert!(matches!(
            parse("Filter\nState=4\n"),
            Err(Error::Parse { line: 1, .. })
        ));
        assert!(matches!(parse("two words\n"), Err(Error::Parse { line: 1, .. })));

        let root = parse("X=abc\n").unwrap();
        assert!(matches!(
            root.get_parsed::<u32>("X"),
            Err(Error::Parse { line: 1, .. })
        ));
        assert_eq!(root.get_parsed::<u32>("Y").unwrap(), None);
    }
}
