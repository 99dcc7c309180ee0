use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Peptide categories the prompt asks for. Not enforced on model output.
pub const KNOWN_CATEGORIES: [&str; 8] = [
    "muscle-growth",
    "recovery",
    "skin-health",
    "anti-aging",
    "performance",
    "metabolism",
    "fat-burning",
    "wellness",
];

/// Raw image bytes as captured or uploaded.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub data: Vec<u8>,
    pub mime_type: String,
}

impl ImagePayload {
    pub fn new(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            data,
            mime_type: mime_type.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// What gets sent to every provider for one analysis.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub base64_image: String,
    pub mime_type: String,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub title: String,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub main_issues: Vec<Finding>,
    pub already_achieved: Vec<Finding>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peptide {
    pub name: String,
    pub category: String,
    pub description: String,
    pub benefits: Vec<String>,
    pub usage: String,
}

impl Peptide {
    pub fn has_known_category(&self) -> bool {
        KNOWN_CATEGORIES.contains(&self.category.as_str())
    }
}

/// Normalized model output handed back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub analysis: Analysis,
    pub peptides: Vec<Peptide>,
    pub disclaimer: String,
}

impl AnalysisResult {
    /// Plain-text rendition stored in the history feed.
    pub fn to_display_text(&self) -> String {
        let mut out = String::new();

        if !self.analysis.main_issues.is_empty() {
            out.push_str("Main issues:\n");
            for finding in &self.analysis.main_issues {
                let _ = writeln!(out, "- {}: {}", finding.title, finding.detail);
            }
            out.push('\n');
        }

        if !self.analysis.already_achieved.is_empty() {
            out.push_str("Already achieved:\n");
            for finding in &self.analysis.already_achieved {
                let _ = writeln!(out, "- {}: {}", finding.title, finding.detail);
            }
            out.push('\n');
        }

        out.push_str("Recommended peptides:\n");
        for (i, peptide) in self.peptides.iter().enumerate() {
            let _ = writeln!(out, "{}. {} ({})", i + 1, peptide.name, peptide.category);
            if !peptide.description.is_empty() {
                let _ = writeln!(out, "   {}", peptide.description);
            }
            if !peptide.benefits.is_empty() {
                let _ = writeln!(out, "   Benefits: {}", peptide.benefits.join(", "));
            }
            let _ = writeln!(out, "   Usage: {}", peptide.usage);
        }

        out.push('\n');
        out.push_str(&self.disclaimer);
        out
    }
}

/// Response body of the analyze route.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub result: AnalysisResult,
    pub provider: String,
    pub failures: Vec<String>,
    pub summary: String,
    pub analyzed_at: DateTime<Utc>,
}
