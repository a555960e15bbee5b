//! Sequential orchestration of the processing stages.

use std::sync::Arc;

use log::{debug, info};

use crate::catalog::ResourceCatalog;
use crate::config::ProcessorConfig;
use crate::dispatch::OutputKind;
use crate::error::Result;
use crate::output::OutputValidator;
use crate::package::{PackageBuilder, PackageReport};
use crate::request::{ProcessingRequest, Task};
use crate::transform::{NativeEngine, TransformDriver, TransformEngine, TransformReport};
use crate::validation::ValidationOutcome;
use crate::validator::SchemaValidator;

/// What a completed run produced.
#[derive(Debug, Clone, Default)]
pub struct ProcessingReport {
    /// Findings of source validation, when it ran.
    pub source: Option<ValidationOutcome>,
    pub transform: Option<TransformReport>,
    /// Findings of output validation, when it ran.
    pub output: Option<ValidationOutcome>,
    pub package: Option<PackageReport>,
}

/// Runs requests through validation, transformation, output validation and
/// packaging, stopping at the first failure.
///
/// ```no_run
/// use structural::{ProcessingRequest, Processor, Task};
///
/// let request = ProcessingRequest::builder("/tmp/out", "/docs/manual.xml")
///     .task(Task::TransformToWeb)
///     .build()
///     .unwrap();
/// let report = Processor::new().process(&request).unwrap();
/// println!("{} pages", report.transform.unwrap().documents.len());
/// ```
#[derive(Debug, Clone)]
pub struct Processor {
    validator: SchemaValidator,
    driver: TransformDriver,
    output: OutputValidator,
    packager: PackageBuilder,
}

impl Default for Processor {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor {
    /// A processor over the bundled resources and engine.
    pub fn new() -> Self {
        Self::with_config(ProcessorConfig::default())
    }

    pub fn with_config(config: ProcessorConfig) -> Self {
        Self::with_engine(Arc::new(ResourceCatalog::builtin()), Arc::new(NativeEngine::new()), config)
    }

    /// A processor over an explicit catalog and transformation engine.
    pub fn with_engine(
        catalog: Arc<ResourceCatalog>,
        engine: Arc<dyn TransformEngine>,
        config: ProcessorConfig,
    ) -> Self {
        let driver = TransformDriver::new(Arc::clone(&catalog), engine).with_limits(config.limits);
        Self {
            validator: SchemaValidator::new(Arc::clone(&catalog)).with_limits(config.limits),
            output: OutputValidator::new(Arc::clone(&catalog)).with_limits(config.limits),
            packager: PackageBuilder::new(catalog, driver.clone(), config),
            driver,
        }
    }

    pub fn validator(&self) -> &SchemaValidator {
        &self.validator
    }

    pub fn driver(&self) -> &TransformDriver {
        &self.driver
    }

    pub fn output_validator(&self) -> &OutputValidator {
        &self.output
    }

    pub fn package_builder(&self) -> &PackageBuilder {
        &self.packager
    }

    /// Perform the request's task.
    pub fn process(&self, request: &ProcessingRequest) -> Result<ProcessingReport> {
        self.process_with_extras(request, &[])
    }

    /// Perform the request's task, adding `extras` to any package built.
    pub fn process_with_extras(&self, request: &ProcessingRequest, extras: &[String]) -> Result<ProcessingReport> {
        let mut report = ProcessingReport::default();
        debug!("task {:?} for {}", request.task(), request.source_file().display());

        match request.task() {
            Task::Validate => {
                report.source = Some(self.validator.validate(request)?);
            }
            Task::TransformToWeb => {
                report.source = Some(self.validator.validate(request)?);
                report.transform = Some(self.driver.execute(request, OutputKind::Web)?);
                report.output = Some(self.output.validate(request.output_directory())?);
            }
            Task::TransformToPackage => {
                report.source = Some(self.validator.validate(request)?);
                report.transform = Some(self.driver.execute(request, OutputKind::Package)?);
                report.output = Some(self.output.validate(request.output_directory())?);
                report.package = Some(self.packager.build(request, extras)?);
            }
            Task::ValidateGeneratedOutput => {
                report.output = Some(self.output.validate(request.output_directory())?);
            }
        }

        info!("{:?} finished for {}", request.task(), request.source_file().display());
        Ok(report)
    }
}
