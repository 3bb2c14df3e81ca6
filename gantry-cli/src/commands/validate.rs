use crate::commands::config_error;
use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use pipeline_engine::{ExecutionGraph, WorkflowParser};

/// Validate a workflow YAML file
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the workflow YAML file
    pub workflow: PathBuf,
}

pub fn execute(args: ValidateArgs) -> Result<()> {
    let workflow_path = &args.workflow;

    if !workflow_path.exists() {
        config_error(&format!("Workflow file not found: {}", workflow_path.display()));
    }

    output::status("Validating", &format!("{}", workflow_path.display()));

    // Step 1: Parse YAML syntax
    let workflow = match WorkflowParser::from_file(workflow_path) {
        Ok(workflow) => workflow,
        Err(e) => config_error(&format!("Parse error: {}", e)),
    };
    output::check("YAML syntax valid");

    // Step 2: needs, matrices and references
    if let Err(e) = WorkflowParser::validate(&workflow) {
        config_error(&e.message);
    }
    output::check("Semantic validation passed");

    // Step 3: show what a run would schedule
    let graph = match ExecutionGraph::from_workflow(&workflow) {
        Ok(graph) => graph,
        Err(e) => config_error(&e.message),
    };

    let steps_count: usize = graph.jobs.iter().map(|node| node.job.steps.len()).sum();
    output::check(&format!(
        "Structure: {} jobs, {} job instances, {} steps",
        graph.len(),
        graph.instance_count(),
        steps_count
    ));

    println!();
    for (level, jobs) in graph.parallel_levels().iter().enumerate() {
        println!("  Level {}", level + 1);
        for node in jobs {
            let mut notes = Vec::new();
            if node.instances.len() != 1 {
                notes.push(format!("{} instances", node.instances.len()));
            }
            if node.is_fan_in() {
                notes.push("fan-in".to_string());
            }
            if !node.dependencies.is_empty() {
                notes.push(format!("needs {}", node.dependencies.join(", ")));
            }
            if notes.is_empty() {
                println!("    {}", node.name);
            } else {
                println!("    {} ({})", node.name, notes.join("; "));
            }
        }
    }

    let order: Vec<&str> = graph
        .topological_order()
        .iter()
        .map(|node| node.name.as_str())
        .collect();
    println!();
    output::dim(&format!("  Order: {}", order.join(" -> ")));

    println!();
    output::success("Workflow is valid");

    Ok(())
}
