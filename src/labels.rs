use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    Supported,
    Refuted,
    NotEnoughEvidence,
    ConflictingEvidence,
}

impl Label {
    pub const ALL: [Label; 4] = [
        Label::Supported,
        Label::Refuted,
        Label::NotEnoughEvidence,
        Label::ConflictingEvidence,
    ];

    /// Verdict name used in prompts and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Supported => "Supported",
            Label::Refuted => "Refuted",
            Label::NotEnoughEvidence => "Not Enough Evidence",
            Label::ConflictingEvidence => "Conflicting Evidence/Cherrypicking",
        }
    }

    /// Upper-case code the label predictor is asked to emit.
    pub fn code(&self) -> &'static str {
        match self {
            Label::Supported => "SUPPORTED",
            Label::Refuted => "REFUTED",
            Label::NotEnoughEvidence => "NOT_ENOUGH_EVIDENCE",
            Label::ConflictingEvidence => "CONFLICTING_EVIDENCE",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps free-form fact-checker ratings onto [`Label`].
///
/// Lookups are case-insensitive on trimmed input. Canonical names and
/// predictor codes always resolve, whatever the table holds.
#[derive(Debug, Clone)]
pub struct LabelTable {
    entries: HashMap<String, Label>,
}

impl LabelTable {
    pub fn new<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (Label, Vec<S>)>,
        S: AsRef<str>,
    {
        let mut entries = HashMap::new();
        for label in Label::ALL {
            entries.insert(label.as_str().to_lowercase(), label);
            entries.insert(label.code().to_lowercase(), label);
        }
        for (label, raws) in pairs {
            for raw in raws {
                entries.insert(raw.as_ref().trim().to_lowercase(), label);
            }
        }
        Self { entries }
    }

    /// Builds a table from a JSON object of `{label_name: [raw, ...]}`.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::validation("labels_map", "must be a JSON object"))?;

        let base = LabelTable::new(Vec::<(Label, Vec<String>)>::new());
        let mut pairs = Vec::with_capacity(obj.len());
        for (name, raws) in obj {
            let label = base
                .normalize(name)
                .ok_or_else(|| Error::validation("labels_map", format!("unknown label `{name}`")))?;
            let raws = raws
                .as_array()
                .ok_or_else(|| Error::validation("labels_map", format!("`{name}` must map to a list")))?
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| Error::validation("labels_map", format!("`{name}` holds a non-string")))
                })
                .collect::<Result<Vec<_>>>()?;
            pairs.push((label, raws));
        }
        Ok(LabelTable::new(pairs))
    }

    pub fn normalize(&self, raw: &str) -> Option<Label> {
        self.entries.get(&raw.trim().to_lowercase()).copied()
    }
}

impl Default for LabelTable {
    fn default() -> Self {
        LabelTable::new([
            (
                Label::Refuted,
                vec![
                    "خطأ", "خاطئ", "كاذب", "خبر كاذب", "غير صحيح", "مش حقيقي", "الادعاء خاطئ",
                    "زائف", "مزيف", "وليدة ذكاء إصطناعي", "fake", "اشاعة", "مفبرك", "مضلل",
                    "مضلّل", "misleading", "فيديو معدّل", "معدّل", "معدل",
                ],
            ),
            (Label::Supported, vec!["صحيح", "correct", "نص حقيقي"]),
            (Label::NotEnoughEvidence, vec!["محتوى ناقص", "سياق ناقص"]),
            (
                Label::ConflictingEvidence,
                vec![
                    "زائف جزئيًا", "زائف جزئي", "غير صحيح جزئياً", "غير صحيح جزئيا", "صحيح جزئيًا",
                    "صحيح جزئياً", "خاطئ جزئيا", "خطأ جزئياً", "نصف حقيقي",
                ],
            ),
        ])
    }
}

/// Normalises with the default table.
pub fn normalize(raw: &str) -> Option<Label> {
    LabelTable::default().normalize(raw)
}
