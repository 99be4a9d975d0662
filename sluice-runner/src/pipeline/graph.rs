//! Executable stage graph of one run

use sluice_core::stage::{Processor, Source, Target};

/// A stage instance together with its unique name
pub struct NamedStage<S: ?Sized> {
    pub name: String,
    pub stage: Box<S>,
}

impl<S: ?Sized> NamedStage<S> {
    pub fn new(name: impl Into<String>, stage: Box<S>) -> Self {
        Self {
            name: name.into(),
            stage,
        }
    }
}

/// Linear graph: one source, processors in order, then targets which all
/// receive the last processor's output
pub struct ExecutableGraph {
    pub source: NamedStage<dyn Source>,
    pub processors: Vec<NamedStage<dyn Processor>>,
    pub targets: Vec<NamedStage<dyn Target>>,
}

impl ExecutableGraph {
    pub fn new(source: NamedStage<dyn Source>) -> Self {
        Self {
            source,
            processors: Vec::new(),
            targets: Vec::new(),
        }
    }

    pub fn with_processor(mut self, processor: NamedStage<dyn Processor>) -> Self {
        self.processors.push(processor);
        self
    }

    pub fn with_target(mut self, target: NamedStage<dyn Target>) -> Self {
        self.targets.push(target);
        self
    }

    /// Stage names in execution order
    pub fn stage_names(&self) -> Vec<&str> {
        std::iter::once(self.source.name.as_str())
            .chain(self.processors.iter().map(|p| p.name.as_str()))
            .chain(self.targets.iter().map(|t| t.name.as_str()))
            .collect()
    }

    /// Releases the targets' external resources
    pub fn destroy(&mut self) {
        for target in &mut self.targets {
            target.stage.destroy();
        }
    }
}
