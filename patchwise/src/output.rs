use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::diagnostics::{Diagnostics, ErrorEntry, Warning};
use crate::patch::{PatchInfo, WorkspacePatches};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatchOutput {
    pub workspaces: BTreeMap<String, WorkspacePatches>,
    pub analysis_info: AnalysisInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisInfo {
    pub status: AnalysisStatus,
    pub analysis_start_time: DateTime<Utc>,
    pub analysis_end_time: DateTime<Utc>,
    /// Elapsed wall-clock seconds.
    pub analysis_delta_time: f64,
    pub public_errors: Vec<ErrorEntry>,
    pub private_errors: Vec<ErrorEntry>,
    pub warnings: Vec<Warning>,
}

impl AnalysisInfo {
    fn finish(
        status: AnalysisStatus,
        started_at: DateTime<Utc>,
        clock: Instant,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            status,
            analysis_start_time: started_at,
            analysis_end_time: Utc::now(),
            analysis_delta_time: clock.elapsed().as_secs_f64(),
            public_errors: diagnostics.public_errors,
            private_errors: diagnostics.private_errors,
            warnings: diagnostics.warnings,
        }
    }
}

impl PatchOutput {
    pub fn success(
        workspaces: BTreeMap<String, WorkspacePatches>,
        started_at: DateTime<Utc>,
        clock: Instant,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            workspaces,
            analysis_info: AnalysisInfo::finish(
                AnalysisStatus::Success,
                started_at,
                clock,
                diagnostics,
            ),
        }
    }

    /// A failed run never carries partial workspace results.
    pub fn failure(started_at: DateTime<Utc>, clock: Instant, diagnostics: Diagnostics) -> Self {
        Self {
            workspaces: BTreeMap::new(),
            analysis_info: AnalysisInfo::finish(
                AnalysisStatus::Failure,
                started_at,
                clock,
                diagnostics,
            ),
        }
    }

    pub fn is_success(&self) -> bool {
        self.analysis_info.status == AnalysisStatus::Success
    }
}

pub trait OutputFormatter {
    fn write_results(
        &self,
        output: &PatchOutput,
        writer: &mut dyn std::io::Write,
    ) -> std::io::Result<()>;
}

pub struct TextOutput;

fn write_section(
    writer: &mut dyn std::io::Write,
    label: &str,
    patches: &BTreeMap<String, PatchInfo>,
) -> std::io::Result<()> {
    if patches.is_empty() {
        return Ok(());
    }
    writeln!(writer, "  {label}:")?;
    for (key, info) in patches {
        match &info.recommended_version {
            Some(version) => writeln!(writer, "    {key}: {} -> {version}", info.classification)?,
            None => writeln!(writer, "    {key}: {}", info.classification)?,
        }
        writeln!(
            writer,
            "      patchable: {}, unpatchable: {}, introduced: {}",
            info.patchable.len(),
            info.unpatchable.len(),
            info.introduced.len()
        )?;
    }
    Ok(())
}

impl OutputFormatter for TextOutput {
    fn write_results(
        &self,
        output: &PatchOutput,
        writer: &mut dyn std::io::Write,
    ) -> std::io::Result<()> {
        let info = &output.analysis_info;
        let status = match info.status {
            AnalysisStatus::Success => "success",
            AnalysisStatus::Failure => "failure",
        };
        writeln!(writer, "status: {status} ({:.2}s)", info.analysis_delta_time)?;

        for (name, ws) in &output.workspaces {
            writeln!(writer, "{name}")?;
            if ws.patches.is_empty() && ws.dev_patches.is_empty() {
                writeln!(writer, "  nothing to patch")?;
                continue;
            }
            write_section(writer, "dependencies", &ws.patches)?;
            write_section(writer, "dev dependencies", &ws.dev_patches)?;
        }

        for err in &info.public_errors {
            writeln!(writer, "error: {}", err.description)?;
        }
        for warning in &info.warnings {
            match &warning.subject {
                Some(subject) => writeln!(writer, "warning: {subject}: {}", warning.description)?,
                None => writeln!(writer, "warning: {}", warning.description)?,
            }
        }
        Ok(())
    }
}

pub struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn write_results(
        &self,
        output: &PatchOutput,
        writer: &mut dyn std::io::Write,
    ) -> std::io::Result<()> {
        serde_json::to_writer_pretty(&mut *writer, output)?;
        writeln!(writer)?;
        Ok(())
    }
}

pub fn formatter(json: bool) -> Box<dyn OutputFormatter> {
    if json {
        Box::new(JsonOutput)
    } else {
        Box::new(TextOutput)
    }
}
