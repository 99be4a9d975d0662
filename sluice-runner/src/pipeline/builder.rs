//! Stage graph builder
//!
//! Turns a [`PipelineConfiguration`] into an [`ExecutableGraph`]. The built-in
//! builder knows the stage types shipped with the runner:
//!
//! | type           | kind      |
//! |----------------|-----------|
//! | `dev_data`     | source    |
//! | `field_merger` | processor |
//! | `lua_script`   | processor |
//! | `trash`        | target    |
//! | `ipc`          | target    |

use serde::Deserialize;
use sluice_core::domain::pipeline::{PipelineConfiguration, StageConfiguration};
use sluice_core::stage::{Processor, Source, StageError, Target};
use sluice_lua::{ProcessingMode, ScriptProcessor};
use std::collections::HashSet;

use super::graph::{ExecutableGraph, NamedStage};
use crate::error::{Result, RunnerError};
use crate::stages::{DevDataSource, FieldMergerProcessor, IpcTarget, TrashTarget, parse_config};

/// Builds the graph a run executes
pub trait StageGraphBuilder: Send + Sync {
    /// # Errors
    /// `RunnerBuildFailure` if the definition does not describe a valid graph
    /// or a stage rejects its configuration
    fn build(&self, config: &PipelineConfiguration) -> Result<ExecutableGraph>;
}

enum BuiltStage {
    Source(Box<dyn Source>),
    Processor(Box<dyn Processor>),
    Target(Box<dyn Target>),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct LuaScriptConfig {
    script: String,
    #[serde(default)]
    mode: ProcessingMode,
}

/// Builder for the stage types shipped with the runner
#[derive(Debug, Default)]
pub struct ConfigGraphBuilder;

impl ConfigGraphBuilder {
    pub fn new() -> Self {
        Self
    }

    fn build_stage(stage: &StageConfiguration) -> std::result::Result<BuiltStage, StageError> {
        let built = match stage.stage_type.as_str() {
            "dev_data" => BuiltStage::Source(Box::new(DevDataSource::from_stage(stage)?)),
            "field_merger" => {
                BuiltStage::Processor(Box::new(FieldMergerProcessor::from_stage(stage)?))
            }
            "lua_script" => {
                let config: LuaScriptConfig = parse_config(stage)?;
                BuiltStage::Processor(Box::new(ScriptProcessor::new(
                    &stage.instance_name,
                    &config.script,
                    config.mode,
                )?))
            }
            "trash" => BuiltStage::Target(Box::new(TrashTarget)),
            "ipc" => BuiltStage::Target(Box::new(IpcTarget::from_stage(stage)?)),
            other => {
                return Err(StageError::config(
                    &stage.instance_name,
                    format!("unknown stage type '{}'", other),
                ));
            }
        };
        Ok(built)
    }
}

fn build_failure(message: impl Into<String>) -> RunnerError {
    RunnerError::RunnerBuildFailure(message.into())
}

impl StageGraphBuilder for ConfigGraphBuilder {
    fn build(&self, config: &PipelineConfiguration) -> Result<ExecutableGraph> {
        let mut names = HashSet::new();
        for stage in &config.stages {
            if !names.insert(stage.instance_name.as_str()) {
                return Err(build_failure(format!(
                    "duplicate stage name '{}'",
                    stage.instance_name
                )));
            }
        }

        let mut stages = config.stages.iter();
        let first = stages
            .next()
            .ok_or_else(|| build_failure("pipeline has no stages"))?;
        let source = match Self::build_stage(first).map_err(|e| build_failure(e.to_string()))? {
            BuiltStage::Source(source) => source,
            _ => {
                return Err(build_failure(format!(
                    "first stage '{}' is not a source",
                    first.instance_name
                )));
            }
        };

        let mut graph = ExecutableGraph::new(NamedStage::new(&first.instance_name, source));
        for stage in stages {
            let name = &stage.instance_name;
            graph = match Self::build_stage(stage).map_err(|e| build_failure(e.to_string()))? {
                BuiltStage::Source(_) => {
                    return Err(build_failure(format!("'{}' is a second source", name)));
                }
                BuiltStage::Processor(_) if !graph.targets.is_empty() => {
                    return Err(build_failure(format!(
                        "processor '{}' is listed after a target",
                        name
                    )));
                }
                BuiltStage::Processor(p) => graph.with_processor(NamedStage::new(name, p)),
                BuiltStage::Target(t) => graph.with_target(NamedStage::new(name, t)),
            };
        }

        if graph.targets.is_empty() {
            return Err(build_failure("pipeline has no target"));
        }
        Ok(graph)
    }
}
