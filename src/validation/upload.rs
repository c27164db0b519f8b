//! File upload checks

use serde::{Deserialize, Serialize};

use crate::config::UploadConfig;
use crate::events::RiskLevel;

/// Metadata of an uploaded file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUpload {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
}

impl FileUpload {
    pub fn new(name: impl Into<String>, size: u64, mime_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size,
            mime_type: mime_type.into(),
        }
    }
}

/// Reasons a file is rejected, with the risk of the worst one
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadFindings {
    pub errors: Vec<String>,
    pub risk: Option<RiskLevel>,
}

impl UploadFindings {
    fn reject(&mut self, message: String, risk: RiskLevel) {
        self.errors.push(message);
        self.risk = Some(self.risk.map_or(risk, |current| current.max(risk)));
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Check a file against the upload policy
pub fn inspect(file: &FileUpload, policy: &UploadConfig) -> UploadFindings {
    let mut findings = UploadFindings::default();
    let name = file.name.trim();

    if name.is_empty() {
        findings.reject("file name is empty".to_string(), RiskLevel::Medium);
    }

    if name.contains("..") || name.contains(['/', '\\']) || name.contains('\0') {
        findings.reject(
            format!("file name '{}' contains path components", name.escape_default()),
            RiskLevel::High,
        );
    }

    if file.size == 0 {
        findings.reject("file is empty".to_string(), RiskLevel::Medium);
    } else if file.size > policy.max_file_size_bytes {
        findings.reject(
            format!(
                "file is too large ({} > {} bytes)",
                file.size, policy.max_file_size_bytes
            ),
            RiskLevel::Medium,
        );
    }

    let mime = file
        .mime_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();
    if !policy.allowed_mime_types.iter().any(|m| m.eq_ignore_ascii_case(&mime)) {
        findings.reject(format!("file type '{}' is not allowed", mime), RiskLevel::Medium);
    }

    let lowered = name.to_lowercase();
    let mut segments = lowered.split('.');
    segments.next();
    let extensions: Vec<&str> = segments.map(str::trim).collect();

    // Every dotted segment counts, so `report.exe.txt` is caught
    if let Some(blocked) = extensions
        .iter()
        .find(|ext| policy.blocked_extensions.iter().any(|b| b == *ext))
    {
        findings.reject(format!("extension '.{}' is blocked", blocked), RiskLevel::High);
    }

    match extensions.last() {
        None => findings.reject("file has no extension".to_string(), RiskLevel::Medium),
        Some(ext) if !policy.allowed_extensions.iter().any(|a| a == ext) => {
            findings.reject(format!("extension '.{}' is not allowed", ext), RiskLevel::Medium)
        }
        Some(_) => {}
    }

    findings
}
