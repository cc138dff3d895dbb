use std::collections::HashMap;
use std::fs::read_to_string;
use std::path::Path;

use crate::error::{Error, Result};

pub const UNKNOWN_LABEL: &str = "unknown";

/// Placeholder entry in TFLite label maps for unused class slots.
const UNUSED_SLOT: &str = "???";

type LabelMap = HashMap<i32, String>;

/// Read-only class index to display name mapping.
#[derive(Debug, Clone, Default)]
pub struct LabelIndex {
    labels: LabelMap,
}

impl LabelIndex {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = read_to_string(path)
            .map_err(|err| Error::Model(format!("cannot read label file {}: {err}", path.display())))?;
        let index = Self::parse(&text);
        tracing::info!(labels = index.len(), path = %path.display(), "loaded label index");
        Ok(index)
    }

    /// Parses either label file layout.
    ///
    /// When every non-empty line looks like `<id> <name>` the ids are taken
    /// literally. Otherwise the file is a positional TFLite label map: the first
    /// line is the background class and line `i` names class `i - 1`. `???`
    /// entries are left unmapped in both layouts.
    pub fn parse(text: &str) -> Self {
        let lines: Vec<&str> = text.lines().map(str::trim_end).collect();
        let labels = Self::parse_indexed(&lines).unwrap_or_else(|| Self::parse_positional(&lines));
        Self { labels }
    }

    fn parse_indexed(lines: &[&str]) -> Option<LabelMap> {
        let mut labels = LabelMap::new();
        let mut seen = 0;
        for line in lines.iter().map(|l| l.trim()).filter(|l| !l.is_empty()) {
            let (id, name) = line.split_once(char::is_whitespace)?;
            let id = id.parse::<i32>().ok()?;
            let name = name.trim();
            seen += 1;
            if name != UNUSED_SLOT {
                labels.insert(id, name.to_string());
            }
        }
        (seen > 0).then_some(labels)
    }

    fn parse_positional(lines: &[&str]) -> LabelMap {
        lines
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, name)| *name != &UNUSED_SLOT)
            .map(|(i, name)| (i as i32 - 1, name.to_string()))
            .collect()
    }

    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (i32, S)>,
        S: Into<String>,
    {
        Self {
            labels: pairs.into_iter().map(|(id, name)| (id, name.into())).collect(),
        }
    }

    /// Name for `class`, or `"unknown"` when the class has no mapping.
    pub fn lookup(&self, class: i32) -> &str {
        self.labels.get(&class).map(String::as_str).unwrap_or(UNKNOWN_LABEL)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
