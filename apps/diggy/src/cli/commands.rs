//! # CLI Command Implementations
//!
//! Each command has a `render_*` function producing its output as a string
//! and a `cmd_*` wrapper that loads the inputs and prints.

use diggy_core::{Declarations, DiggyError, Graph, TypeRegistry, Uid};
use serde_json::json;
use std::path::{Path, PathBuf};

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum size of a type declaration file (1 MB).
const MAX_DECLARATION_FILE_SIZE: u64 = 1024 * 1024;

/// Maximum size of a query result file (100 MB).
///
/// Hydration holds the whole result in memory.
const MAX_RESULT_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), DiggyError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| DiggyError::IoError(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(DiggyError::IoError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Resolve an input path to an existing regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, DiggyError> {
    let canonical = path.canonicalize().map_err(|e| {
        DiggyError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(DiggyError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Resolve an output path whose parent directory must already exist.
fn validate_output_path(path: &Path) -> Result<PathBuf, DiggyError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        DiggyError::IoError(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(DiggyError::IoError(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| DiggyError::IoError("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

fn to_pretty(value: &serde_json::Value) -> Result<String, DiggyError> {
    serde_json::to_string_pretty(value).map_err(|e| DiggyError::SerializationError(e.to_string()))
}

// =============================================================================
// INPUTS
// =============================================================================

/// Load and register the declared node types.
pub fn load_registry(types: &Path) -> Result<TypeRegistry, DiggyError> {
    let validated = validate_file_path(types)?;
    validate_file_size(&validated, MAX_DECLARATION_FILE_SIZE)?;

    let registry = Declarations::load(&validated)?.into_registry()?;
    tracing::debug!(path = %validated.display(), types = registry.len(), "declarations loaded");
    Ok(registry)
}

/// Read a query result file and hydrate it into a fresh graph.
pub fn load_result(registry: TypeRegistry, input: &Path) -> Result<Graph, DiggyError> {
    let validated = validate_file_path(input)?;
    validate_file_size(&validated, MAX_RESULT_FILE_SIZE)?;

    let text = std::fs::read_to_string(&validated)
        .map_err(|e| DiggyError::IoError(format!("Read file: {}", e)))?;
    let mut graph = Graph::new(registry);
    let blocks = graph.hydrate_str(&text)?;
    tracing::info!(
        blocks = blocks.len(),
        instances = graph.len(),
        "query result hydrated"
    );
    Ok(graph)
}

// =============================================================================
// GENERATE COMMAND
// =============================================================================

/// Schema text, followed by the unrecognized-kind report when there is one.
pub fn render_schema(graph: &Graph, json_mode: bool) -> Result<String, DiggyError> {
    let schema = graph.generate_schema()?;

    if json_mode {
        return to_pretty(&json!({
            "schema": schema.lines(),
            "unknown": schema.unknown(),
        }));
    }

    let mut out = schema.text();
    if !schema.unknown().is_empty() {
        out.push_str("\n\n# Unrecognized kinds (not in schema):\n");
        let report: Vec<String> = schema.unknown().iter().map(|u| format!("#   {}", u)).collect();
        out.push_str(&report.join("\n"));
    }
    Ok(out)
}

/// Print or write the schema.
pub fn cmd_generate(types: &Path, json_mode: bool, output: Option<&Path>) -> Result<(), DiggyError> {
    let graph = Graph::new(load_registry(types)?);
    let rendered = render_schema(&graph, json_mode)?;

    match output {
        Some(path) => {
            let validated = validate_output_path(path)?;
            std::fs::write(&validated, format!("{}\n", rendered))
                .map_err(|e| DiggyError::IoError(format!("Write file: {}", e)))?;
            tracing::info!(path = %validated.display(), "schema written");
        }
        None => println!("{}", rendered),
    }
    Ok(())
}

// =============================================================================
// TYPES COMMAND
// =============================================================================

/// One line per declared type with its fields.
pub fn render_types(registry: &TypeRegistry, json_mode: bool) -> Result<String, DiggyError> {
    if json_mode {
        let types: Vec<serde_json::Value> = registry
            .types()
            .map(|t| {
                let fields: Vec<serde_json::Value> = t
                    .fields()
                    .iter()
                    .map(|f| {
                        json!({
                            "name": f.name(),
                            "kind": f.kind().to_string(),
                            "list": f.is_list(),
                            "directives": f.directives().iter().map(ToString::to_string).collect::<Vec<_>>(),
                        })
                    })
                    .collect();
                json!({"name": t.name(), "fields": fields})
            })
            .collect();
        return to_pretty(&json!({ "types": types }));
    }

    let mut lines = vec![format!("Declared Types ({})", registry.len())];
    for node_type in registry.types() {
        lines.push(format!("  {}", node_type.name()));
        for field in node_type.fields() {
            let kind = if field.is_list() {
                format!("[{}]", field.kind())
            } else {
                field.kind().to_string()
            };
            let directives: Vec<String> = field.directives().iter().map(ToString::to_string).collect();
            let line = format!("    {}: {} {}", field.name(), kind, directives.join(" "));
            lines.push(line.trim_end().to_string());
        }
    }
    Ok(lines.join("\n"))
}

/// List the declared node types.
pub fn cmd_types(types: &Path, json_mode: bool) -> Result<(), DiggyError> {
    let registry = load_registry(types)?;
    println!("{}", render_types(&registry, json_mode)?);
    Ok(())
}

// =============================================================================
// HYDRATE COMMAND
// =============================================================================

/// Dump every hydrated instance.
pub fn render_dump(graph: &Graph, json_mode: bool, depth: usize) -> Result<String, DiggyError> {
    let dump = graph.to_json(depth);
    if json_mode {
        return serde_json::to_string(&dump)
            .map_err(|e| DiggyError::SerializationError(e.to_string()));
    }
    to_pretty(&dump)
}

/// Hydrate a query result file and print the instance dump.
pub fn cmd_hydrate(types: &Path, json_mode: bool, input: &Path, depth: usize) -> Result<(), DiggyError> {
    let graph = load_result(load_registry(types)?, input)?;
    println!("{}", render_dump(&graph, json_mode, depth)?);
    Ok(())
}

// =============================================================================
// MUTATE COMMAND
// =============================================================================

/// Stage every instance of the graph and render the mutation.
pub fn render_mutation(graph: &mut Graph, json_mode: bool) -> Result<String, DiggyError> {
    let uids: Vec<Uid> = graph.nodes().map(|n| n.uid().clone()).collect();
    for uid in &uids {
        graph.stage(uid)?;
    }
    let mutation = graph.generate_mutation()?;

    if json_mode {
        let set: Vec<&str> = mutation.lines().collect();
        return to_pretty(&json!({ "set": set }));
    }
    Ok(mutation)
}

/// Hydrate a query result file and print the mutation that stores it.
pub fn cmd_mutate(types: &Path, json_mode: bool, input: &Path) -> Result<(), DiggyError> {
    let mut graph = load_result(load_registry(types)?, input)?;
    println!("{}", render_mutation(&mut graph, json_mode)?);
    Ok(())
}
