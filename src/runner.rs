//! Compatibility matrix
//!
//! For every dataset the runner checks three kinds of unit:
//!
//! - round trip: reference text → columnar → text, compared in order
//! - backward: each earlier release's stored artifact → text, compared in order
//! - cross producer: artifacts from other implementations on the same
//!   major.minor line → text, compared as multisets
//!
//! Units are independent and write to disjoint paths, so they run on a rayon
//! pool. A failing unit is recorded and never aborts the rest of the matrix.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::CompatConfig;
use crate::equivalence::{compare_ordered, compare_unordered, file_rows, ComparisonResult, ExternalSorter};
use crate::error::{CompatError, Result};
use crate::format::{ColumnarFormat, EncodeOptions};
use crate::locate::{ensure_absent, sibling_with_extension, ArtifactLayout, ArtifactLocator, ArtifactRef, ArtifactRole, DatasetRef, VersionDir};
use crate::report::{MatrixReport, MatrixUnit, Reporter, UnitKind, UnitOutcome, UnitReport};
use crate::schema::Schema;
use crate::transcode::{RecordTranscoder, TextRowWriter};
use crate::version::VersionId;

/// Schema file that describes `text`
pub fn schema_path_for(layout: &ArtifactLayout, text: &Path) -> PathBuf {
    sibling_with_extension(text, &layout.schema_extension)
}

/// Encode a text artifact into a new columnar artifact.
///
/// Any decode error aborts the conversion and removes the partial output.
pub fn convert_text_to_columnar(
    format: &dyn ColumnarFormat,
    transcoder: RecordTranscoder,
    text: &Path,
    schema: &Schema,
    output: &Path,
    options: &EncodeOptions,
) -> Result<u64> {
    ensure_absent(output)?;
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    let reader = BufReader::new(File::open(text)?);
    let mut rows = transcoder.records(reader, schema);

    let written = (|| -> Result<u64> {
        let mut out = BufWriter::new(File::create(output)?);
        let count = format.encode(schema, &mut rows, options, &mut out)?;
        out.flush()?;
        Ok(count)
    })();
    match written {
        Ok(count) => {
            info!(
                source = %text.display(),
                output = %output.display(),
                format = format.name(),
                rows = count,
                "wrote columnar artifact"
            );
            Ok(count)
        }
        Err(e) => {
            let _ = fs::remove_file(output);
            Err(e)
        }
    }
}

/// Decode a columnar artifact into a new text artifact, one row per line.
pub fn convert_columnar_to_text(
    format: &dyn ColumnarFormat,
    transcoder: RecordTranscoder,
    columnar: &Path,
    output: &Path,
) -> Result<u64> {
    let extension = columnar.extension().and_then(|e| e.to_str()).unwrap_or_default();
    if extension != format.extension() {
        return Err(CompatError::InvalidArtifactName {
            path: columnar.to_path_buf(),
            reason: format!("expected .{} extension for {} artifacts", format.extension(), format.name()),
        });
    }
    if !columnar.is_file() {
        return Err(CompatError::ArtifactNotFound {
            path: columnar.to_path_buf(),
        });
    }
    ensure_absent(output)?;
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }

    let written = (|| -> Result<u64> {
        let input = BufReader::new(File::open(columnar)?);
        let decoded = format.decode(Box::new(input))?;
        let mut writer = TextRowWriter::new(BufWriter::new(File::create(output)?), transcoder);
        for record in decoded.rows {
            writer.write(&record?, &decoded.schema)?;
        }
        let count = writer.rows_written();
        writer.finish()?;
        Ok(count)
    })();
    match written {
        Ok(count) => {
            info!(source = %columnar.display(), output = %output.display(), rows = count, "wrote text artifact");
            Ok(count)
        }
        Err(e) => {
            let _ = fs::remove_file(output);
            Err(e)
        }
    }
}

/// Reference rows re-encoded in canonical text form.
fn canonical_rows<'s>(
    transcoder: RecordTranscoder,
    text: &Path,
    schema: &'s Schema,
) -> Result<impl Iterator<Item = Result<String>> + 's> {
    let reader = BufReader::new(File::open(text)?);
    Ok(transcoder
        .records(reader, schema)
        .map(move |record| record.and_then(|r| transcoder.encode_row(&r, schema))))
}

/// An artifact from another implementation
#[derive(Debug, Clone)]
pub struct ExternalArtifact {
    pub producer: String,
    pub version: VersionId,
    pub artifact: ArtifactRef,
}

enum Job<'d> {
    RoundTrip {
        dataset: &'d DatasetRef,
        schema: &'d Schema,
        variant: String,
    },
    Backward {
        dataset: &'d DatasetRef,
        schema: &'d Schema,
        variant: String,
        prior: &'d VersionDir,
    },
    CrossProducer {
        dataset: &'d DatasetRef,
        schema: &'d Schema,
        external: ExternalArtifact,
    },
}

impl Job<'_> {
    fn unit(&self) -> MatrixUnit {
        match self {
            Job::RoundTrip { dataset, variant, .. } => MatrixUnit {
                dataset: dataset.name.clone(),
                kind: UnitKind::RoundTrip,
                variant: Some(variant.clone()),
            },
            Job::Backward {
                dataset, variant, prior, ..
            } => MatrixUnit {
                dataset: dataset.name.clone(),
                kind: UnitKind::Backward {
                    version: prior.version.clone(),
                },
                variant: Some(variant.clone()),
            },
            Job::CrossProducer { dataset, external, .. } => MatrixUnit {
                dataset: dataset.name.clone(),
                kind: UnitKind::CrossProducer {
                    producer: external.producer.clone(),
                    version: external.version.clone(),
                },
                variant: None,
            },
        }
    }
}

/// Drives the compatibility matrix for one release.
pub struct CompatibilityRunner<'a> {
    format: &'a dyn ColumnarFormat,
    reporter: &'a dyn Reporter,
    locator: ArtifactLocator,
    config: CompatConfig,
    current: VersionId,
}

impl<'a> CompatibilityRunner<'a> {
    pub fn new(format: &'a dyn ColumnarFormat, reporter: &'a dyn Reporter, config: CompatConfig) -> Result<Self> {
        let current = VersionId::parse(&config.runner.current_version)?;
        let locator = ArtifactLocator::new(config.artifact_layout());
        Ok(Self {
            format,
            reporter,
            locator,
            config,
            current,
        })
    }

    pub fn current_version(&self) -> &VersionId {
        &self.current
    }

    pub fn locator(&self) -> &ArtifactLocator {
        &self.locator
    }

    pub fn output_dir(&self) -> PathBuf {
        self.config.output_dir(&self.current)
    }

    fn text_output_dir(&self) -> PathBuf {
        self.output_dir().join("text")
    }

    fn transcoder(&self) -> RecordTranscoder {
        self.config.transcoder()
    }

    /// Encode the dataset's reference text into this release's artifact.
    pub fn convert_text_to_columnar(&self, dataset: &DatasetRef, schema: &Schema, variant: &str) -> Result<ArtifactRef> {
        let target = self.locator.prepare_output(
            &self.output_dir(),
            &dataset.name,
            Some(&self.current),
            Some(variant),
            ArtifactRole::GeneratedColumnar,
            self.config.conversion.replace_existing,
        )?;
        convert_text_to_columnar(
            self.format,
            self.transcoder(),
            &dataset.text_path,
            schema,
            &target.path,
            &self.config.encode_options(variant),
        )?;
        Ok(ArtifactRef { exists: true, ..target })
    }

    /// Decode `artifact` into `<output>/text/<dataset>.<tag>.<ext>`.
    pub fn convert_columnar_to_text(&self, artifact: &ArtifactRef, tag: &str) -> Result<ArtifactRef> {
        let target = self.locator.prepare_output(
            &self.text_output_dir(),
            &artifact.dataset,
            artifact.version.as_ref(),
            Some(tag),
            ArtifactRole::GeneratedText,
            self.config.conversion.replace_existing,
        )?;
        convert_columnar_to_text(self.format, self.transcoder(), &artifact.path, &target.path)?;
        Ok(ArtifactRef { exists: true, ..target })
    }

    /// Reference text → columnar → text, compared in order.
    pub fn run_round_trip(&self, dataset: &DatasetRef, schema: &Schema, variant: &str) -> Result<ComparisonResult> {
        let columnar = self.convert_text_to_columnar(dataset, schema, variant)?;
        let text = self.convert_columnar_to_text(&columnar, variant)?;
        compare_ordered(
            canonical_rows(self.transcoder(), &dataset.text_path, schema)?,
            file_rows(&text.path)?,
        )
    }

    fn backward_one(&self, dataset: &DatasetRef, schema: &Schema, variant: &str, prior: &VersionDir) -> Result<ComparisonResult> {
        let artifact = self.locator.resolve_artifact(
            &prior.path,
            &dataset.name,
            Some(prior),
            Some(variant),
            ArtifactRole::GeneratedColumnar,
            false,
        )?;
        if !artifact.exists {
            self.reporter.artifact_missing(&artifact);
            return Err(CompatError::ArtifactNotFound { path: artifact.path });
        }
        let tag = format!("{}-{}", variant, prior.version);
        let text = self.convert_columnar_to_text(&artifact, &tag)?;
        compare_ordered(
            canonical_rows(self.transcoder(), &dataset.text_path, schema)?,
            file_rows(&text.path)?,
        )
    }

    /// Decode each earlier release's artifact and compare it in order with
    /// the reference text.
    pub fn run_backward_compat(
        &self,
        dataset: &DatasetRef,
        schema: &Schema,
        variant: &str,
        prior: &[VersionDir],
    ) -> BTreeMap<VersionId, Result<ComparisonResult>> {
        prior
            .iter()
            .map(|dir| (dir.version.clone(), self.backward_one(dataset, schema, variant, dir)))
            .collect()
    }

    /// Decode an artifact written by another implementation and compare it
    /// with the reference text ignoring row order.
    pub fn run_cross_producer(&self, dataset: &DatasetRef, schema: &Schema, external: &ExternalArtifact) -> Result<ComparisonResult> {
        if !external.artifact.exists {
            self.reporter.artifact_missing(&external.artifact);
            return Err(CompatError::ArtifactNotFound {
                path: external.artifact.path.clone(),
            });
        }
        let tag = format!("{}-{}", external.producer, external.version);
        let text = self.convert_columnar_to_text(&external.artifact, &tag)?;
        let sorter = ExternalSorter::new(self.config.sort_config());
        compare_unordered(
            canonical_rows(self.transcoder(), &dataset.text_path, schema)?,
            file_rows(&text.path)?,
            &sorter,
        )
    }

    /// Artifacts under `<external>/<producer>/<version>/` on the current major.minor line.
    pub fn discover_external_artifacts(&self, dataset: &DatasetRef) -> Result<Vec<ExternalArtifact>> {
        let mut found = Vec::new();
        for producer in &self.config.runner.external_producers {
            let producer_dir = self.config.external_dir().join(producer);
            for dir in self.locator.discover_same_line_versions(&producer_dir, &self.current) {
                let artifact = self.locator.resolve_artifact(
                    &dir.path,
                    &dataset.name,
                    Some(&dir),
                    Some(producer),
                    ArtifactRole::GeneratedColumnar,
                    false,
                )?;
                found.push(ExternalArtifact {
                    producer: producer.clone(),
                    version: dir.version,
                    artifact,
                });
            }
        }
        Ok(found)
    }

    /// Earlier releases under the test-data root
    pub fn prior_versions(&self) -> Vec<VersionDir> {
        self.locator.discover_prior_versions(&self.config.root(), &self.current)
    }

    fn outcome(&self, result: Result<ComparisonResult>, optional: bool) -> UnitOutcome {
        match result {
            Ok(comparison) => UnitOutcome::from_comparison(comparison),
            Err(e) if optional && e.is_recoverable() => UnitOutcome::Skipped(e.to_string()),
            Err(e) => UnitOutcome::Error(e.to_string()),
        }
    }

    fn execute(&self, job: &Job<'_>) -> UnitReport {
        let unit = job.unit();
        self.reporter.unit_started(&unit);
        let outcome = match job {
            Job::RoundTrip {
                dataset,
                schema,
                variant,
            } => self.outcome(self.run_round_trip(dataset, schema, variant), false),
            Job::Backward {
                dataset,
                schema,
                variant,
                prior,
            } => self.outcome(
                self.backward_one(dataset, schema, variant, prior),
                !self.config.runner.require_prior_artifacts,
            ),
            Job::CrossProducer {
                dataset,
                schema,
                external,
            } => self.outcome(self.run_cross_producer(dataset, schema, external), true),
        };
        let report = UnitReport { unit, outcome };
        self.reporter.unit_finished(&report);
        report
    }

    /// Run every unit of the matrix and collect the outcomes.
    ///
    /// Only a missing dataset directory fails the whole run; every other
    /// error is recorded against its unit.
    pub fn run_matrix(&self) -> Result<MatrixReport> {
        let datasets = self.locator.resolve_datasets(&self.config.dataset_dir())?;
        let prior = self.prior_versions();
        info!(
            current = %self.current,
            datasets = datasets.len(),
            prior_releases = prior.len(),
            "running compatibility matrix"
        );

        let mut report = MatrixReport::new(self.current.clone());
        let mut loaded: Vec<(&DatasetRef, Schema)> = Vec::with_capacity(datasets.len());
        for dataset in &datasets {
            match Schema::from_file(&dataset.schema_path) {
                Ok(schema) => loaded.push((dataset, schema)),
                Err(e) => {
                    let unit = MatrixUnit {
                        dataset: dataset.name.clone(),
                        kind: UnitKind::RoundTrip,
                        variant: None,
                    };
                    let failed = UnitReport {
                        unit,
                        outcome: UnitOutcome::Error(e.to_string()),
                    };
                    self.reporter.unit_finished(&failed);
                    report.units.push(failed);
                }
            }
        }

        let mut jobs = Vec::new();
        for (dataset, schema) in loaded.iter().map(|(d, s)| (*d, s)) {
            for variant in &self.config.conversion.variants {
                jobs.push(Job::RoundTrip {
                    dataset,
                    schema,
                    variant: variant.clone(),
                });
                for dir in &prior {
                    jobs.push(Job::Backward {
                        dataset,
                        schema,
                        variant: variant.clone(),
                        prior: dir,
                    });
                }
            }
            match self.discover_external_artifacts(dataset) {
                Ok(externals) => {
                    for external in externals {
                        jobs.push(Job::CrossProducer {
                            dataset,
                            schema,
                            external,
                        });
                    }
                }
                Err(e) => report.units.push(UnitReport {
                    unit: MatrixUnit {
                        dataset: dataset.name.clone(),
                        kind: UnitKind::CrossProducer {
                            producer: self.config.runner.external_producers.join(","),
                            version: self.current.clone(),
                        },
                        variant: None,
                    },
                    outcome: UnitOutcome::Error(e.to_string()),
                }),
            }
        }
        debug!(units = jobs.len(), "matrix planned");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.runner.concurrency)
            .build()
            .map_err(|e| CompatError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        let results: Vec<UnitReport> = pool.install(|| jobs.par_iter().map(|job| self.execute(job)).collect());

        report.units.extend(results);
        report.units.sort_by(|a, b| a.unit.cmp(&b.unit));
        info!(
            passed = report.passed(),
            failed = report.failed(),
            skipped = report.skipped(),
            "matrix finished"
        );
        Ok(report)
    }
}
