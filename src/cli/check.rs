use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use kinship::{Config, PersonGraph, client::GedcomFile, gedcom};
use rayon::prelude::*;
use serde::Serialize;
use tracing::instrument;
use walkdir::WalkDir;

use super::terminal::Colorize;

#[derive(Debug, Parser)]
#[command(about = "Parse GEDCOM files and report problems")]
pub struct Check {
    /// Files or directories to check
    #[arg(required = true, value_name = "PATH")]
    paths: Vec<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t)]
    output: OutputFormat,

    /// Only print files with problems
    #[arg(long, short)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Debug, Serialize)]
struct FileReport {
    path: PathBuf,
    people: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    cycles: Vec<Vec<String>>,
    /// Why the tree would be refused on save.
    #[serde(skip_serializing_if = "Option::is_none")]
    rejected: Option<String>,
    /// Why the file could not be read at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl FileReport {
    fn empty(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            people: 0,
            warnings: Vec::new(),
            cycles: Vec::new(),
            rejected: None,
            error: None,
        }
    }

    const fn failed(&self) -> bool {
        self.error.is_some()
    }

    fn has_problems(&self) -> bool {
        !self.warnings.is_empty() || !self.cycles.is_empty() || self.rejected.is_some()
    }
}

/// Process exit status for a set of reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Clean,
    Problems,
    Failed,
}

impl Verdict {
    fn of(reports: &[FileReport]) -> Self {
        if reports.iter().any(FileReport::failed) {
            Self::Failed
        } else if reports.iter().any(FileReport::has_problems) {
            Self::Problems
        } else {
            Self::Clean
        }
    }

    const fn exit_code(self) -> Option<i32> {
        match self {
            Self::Clean => None,
            Self::Failed => Some(1),
            Self::Problems => Some(2),
        }
    }
}

impl Check {
    #[instrument(level = "debug", skip(self, config))]
    pub fn run(self, config: &Config) -> anyhow::Result<()> {
        let reports = self.reports(config)?;

        match self.output {
            OutputFormat::Table => self.output_table(&reports),
            OutputFormat::Json => {
                serde_json::to_writer_pretty(std::io::stdout(), &reports)
                    .context("failed to render json output")?;
                println!();
            }
        }

        if let Some(code) = Verdict::of(&reports).exit_code() {
            std::process::exit(code);
        }

        Ok(())
    }

    fn reports(&self, config: &Config) -> anyhow::Result<Vec<FileReport>> {
        let files = collect_files(&self.paths)?;
        tracing::debug!("Checking {} files", files.len());

        Ok(files
            .par_iter()
            .map(|path| check_file(path, config))
            .collect())
    }

    fn output_table(&self, reports: &[FileReport]) {
        for report in reports {
            let path = report.path.display();

            if let Some(error) = &report.error {
                println!("{}", format!("✗ {path}: {error}").failure());
                continue;
            }

            if !report.has_problems() {
                if !self.quiet {
                    println!("{} {}", "✓".success(), format!("{path} ({} people)", report.people).dim());
                }
                continue;
            }

            println!("{}", format!("! {path} ({} people)", report.people).warning());
            for warning in &report.warnings {
                println!("    {warning}");
            }
            for cycle in &report.cycles {
                println!("    ancestry cycle: {}", cycle.join(" → "));
            }
            if let Some(reason) = &report.rejected {
                println!("    would not save: {reason}");
            }
        }

        if self.quiet {
            return;
        }

        let failed = reports.iter().filter(|r| r.failed()).count();
        let flagged = reports.iter().filter(|r| r.has_problems()).count();
        let summary = format!("\n{} files, {failed} unreadable, {flagged} with problems", reports.len());
        match Verdict::of(reports) {
            Verdict::Clean => println!("{}", summary.success()),
            Verdict::Problems => println!("{}", summary.warning()),
            Verdict::Failed => println!("{}", summary.failure()),
        }
    }
}

/// Expands directories into the GEDCOM files beneath them.
fn collect_files(paths: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for path in paths {
        if !path.exists() {
            anyhow::bail!("{} does not exist", path.display());
        }

        if path.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(path)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|entry| entry.file_type().is_file())
                .filter(|entry| {
                    entry
                        .path()
                        .extension()
                        .and_then(OsStr::to_str)
                        .is_some_and(|ext| ext.eq_ignore_ascii_case("ged"))
                })
                .map(walkdir::DirEntry::into_path)
                .collect();
            found.sort();
            files.extend(found);
        } else {
            files.push(path.clone());
        }
    }

    Ok(files)
}

fn check_file(path: &Path, config: &Config) -> FileReport {
    let mut report = FileReport::empty(path);

    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            report.error = Some(e.to_string());
            return report;
        }
    };

    let parsed = match gedcom::parse_with_locale(&text, &config.locale) {
        Ok(parsed) => parsed,
        Err(e) => {
            report.error = Some(e.to_string());
            return report;
        }
    };

    report.people = parsed.people.len();
    report.warnings = parsed.warnings.iter().map(ToString::to_string).collect();

    let graph = match PersonGraph::from_people(parsed.people) {
        Ok(graph) => graph,
        Err(e) => {
            report.rejected = Some(e.to_string());
            return report;
        }
    };

    report.cycles = graph
        .cycles()
        .into_iter()
        .map(|cycle| cycle.iter().map(|id| id.as_str().to_string()).collect())
        .collect();

    let built = gedcom::build(graph.people(), &config.locale, gedcom::default_labels)
        .and_then(|text| GedcomFile::new(String::new(), text, config.max_gedcom_bytes()));
    if let Err(e) = built {
        report.rejected = Some(e.to_string());
    }

    report
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    const CLEAN: &str = "0 HEAD\n1 CHAR UTF-8\n\
        0 @I1@ INDI\n1 NAME Ada /Byron/\n1 SEX F\n1 FAMS @F1@\n\
        0 @I2@ INDI\n1 NAME Byron /Lovelace/\n1 SEX M\n1 FAMC @F1@\n\
        0 @F1@ FAM\n1 WIFE @I1@\n1 CHIL @I2@\n0 TRLR\n";

    fn check(paths: Vec<PathBuf>) -> Check {
        Check {
            paths,
            output: OutputFormat::Table,
            quiet: true,
        }
    }

    #[test]
    fn clean_file_has_no_problems() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("family.ged");
        fs::write(&path, CLEAN).unwrap();

        let report = check_file(&path, &Config::default());

        assert_eq!(report.people, 2);
        assert!(!report.failed());
        assert!(!report.has_problems(), "{report:?}");
    }

    #[test]
    fn malformed_file_fails() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("broken.ged");
        fs::write(&path, "0 HEAD\nnot gedcom\n").unwrap();

        let report = check_file(&path, &Config::default());

        assert!(report.failed());
        assert_eq!(Verdict::of(&[report]), Verdict::Failed);
    }

    #[test]
    fn oversized_file_is_rejected() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("family.ged");
        fs::write(&path, CLEAN).unwrap();
        let mut config = Config::default();
        config.set_max_gedcom_bytes(16);

        let report = check_file(&path, &config);

        assert!(report.rejected.is_some());
        assert_eq!(Verdict::of(&[report]), Verdict::Problems);
    }

    #[test]
    fn directories_expand_to_gedcom_files() {
        let tmp = tempdir().unwrap();
        fs::create_dir(tmp.path().join("nested")).unwrap();
        fs::write(tmp.path().join("b.ged"), CLEAN).unwrap();
        fs::write(tmp.path().join("nested").join("a.GED"), CLEAN).unwrap();
        fs::write(tmp.path().join("notes.txt"), "not a tree").unwrap();

        let reports = check(vec![tmp.path().to_path_buf()])
            .reports(&Config::default())
            .unwrap();

        assert_eq!(reports.len(), 2);
        assert_eq!(Verdict::of(&reports), Verdict::Clean);
    }

    #[test]
    fn missing_path_is_an_error() {
        let tmp = tempdir().unwrap();
        let result = check(vec![tmp.path().join("absent.ged")]).reports(&Config::default());
        assert!(result.is_err());
    }

    #[test]
    fn failure_outranks_problems() {
        let mut failed = FileReport::empty(Path::new("a.ged"));
        failed.error = Some("unreadable".to_string());
        let mut flagged = FileReport::empty(Path::new("b.ged"));
        flagged.warnings.push("skipped".to_string());

        assert_eq!(Verdict::of(&[flagged, failed]).exit_code(), Some(1));
        assert_eq!(Verdict::of(&[]).exit_code(), None);
    }
}
