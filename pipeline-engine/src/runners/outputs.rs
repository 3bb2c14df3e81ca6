// Step Output Capture
// Parses the GITHUB_OUTPUT file and workflow commands printed to stdout

use indexmap::IndexMap;
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OutputFileError {
    #[error("failed to read output file: {0}")]
    Io(#[from] io::Error),

    #[error("invalid output file line {line}: '{content}'")]
    InvalidLine { line: usize, content: String },

    #[error("output '{name}' is missing its closing delimiter '{delimiter}'")]
    UnterminatedHeredoc { name: String, delimiter: String },
}

/// Outputs and masks extracted from a step's stdout
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StdoutCommands {
    pub outputs: IndexMap<String, String>,
    pub masks: Vec<String>,
    /// Stdout with command lines removed
    pub log: String,
}

/// Handle `::set-output name=N::V` and `::add-mask::V` lines
pub fn parse_stdout_commands(stdout: &str) -> StdoutCommands {
    let mut commands = StdoutCommands::default();
    let mut kept: Vec<&str> = Vec::new();

    for line in stdout.lines() {
        let trimmed = line.trim_start();
        if let Some(value) = trimmed.strip_prefix("::add-mask::") {
            if !value.is_empty() {
                commands.masks.push(value.to_string());
            }
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("::set-output ") {
            if let Some((props, value)) = rest.split_once("::") {
                if let Some(name) = props.trim().strip_prefix("name=") {
                    commands
                        .outputs
                        .insert(name.trim().to_string(), value.to_string());
                    continue;
                }
            }
        }
        kept.push(line);
    }

    commands.log = kept.join("\n");
    commands
}

/// Parse the contents of a step output file.
///
/// Supports `name=value` lines and `name<<DELIMITER` blocks terminated by a
/// line equal to the delimiter. Blank lines are ignored.
pub fn parse_output_file(content: &str) -> Result<IndexMap<String, String>, OutputFileError> {
    let mut outputs = IndexMap::new();
    let mut lines = content.lines().enumerate();

    while let Some((idx, line)) = lines.next() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        let heredoc = line.find("<<");
        let assign = line.find('=');
        match (heredoc, assign) {
            (Some(h), a) if a.map_or(true, |a| h < a) => {
                let name = line[..h].trim().to_string();
                let delimiter = line[h + 2..].trim().to_string();
                if name.is_empty() || delimiter.is_empty() {
                    return Err(OutputFileError::InvalidLine {
                        line: idx + 1,
                        content: line.to_string(),
                    });
                }

                let mut body: Vec<&str> = Vec::new();
                let mut closed = false;
                for (_, next) in lines.by_ref() {
                    let next = next.trim_end_matches('\r');
                    if next == delimiter {
                        closed = true;
                        break;
                    }
                    body.push(next);
                }
                if !closed {
                    return Err(OutputFileError::UnterminatedHeredoc { name, delimiter });
                }
                outputs.insert(name, body.join("\n"));
            }
            (_, Some(a)) => {
                let name = line[..a].trim();
                if name.is_empty() {
                    return Err(OutputFileError::InvalidLine {
                        line: idx + 1,
                        content: line.to_string(),
                    });
                }
                outputs.insert(name.to_string(), line[a + 1..].to_string());
            }
            _ => {
                return Err(OutputFileError::InvalidLine {
                    line: idx + 1,
                    content: line.to_string(),
                })
            }
        }
    }

    Ok(outputs)
}

/// Read a step output file; a file the step never wrote yields no outputs
pub fn read_output_file(path: &Path) -> Result<IndexMap<String, String>, OutputFileError> {
    match fs::read_to_string(path) {
        Ok(content) => parse_output_file(&content),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(IndexMap::new()),
        Err(e) => Err(e.into()),
    }
}
