use std::path::Path;

use vfr_core::ParserConfig;

/// Read and parse a parser config TOML file from `path`.
///
/// Returns a human-readable error string on failure.
pub fn read_parser_config(path: &Path) -> Result<ParserConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("could not read '{}': {}", path.display(), e))?;

    let config: ParserConfig = toml::from_str(&content)
        .map_err(|e| format!("could not parse '{}': {}", path.display(), e))?;
    config
        .validate()
        .map_err(|e| format!("invalid config '{}': {}", path.display(), e))?;
    Ok(config)
}
