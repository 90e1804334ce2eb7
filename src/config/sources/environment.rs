//! Environment source: CLUSTERFLOW__SECTION__KEY

use config::Environment;
use std::collections::HashMap;

pub const PREFIX: &str = "CLUSTERFLOW";
pub const SEPARATOR: &str = "__";

/// Environment overrides. `vars` replaces the process environment when given.
pub fn source(vars: Option<HashMap<String, String>>) -> Environment {
    Environment::with_prefix(PREFIX)
        .prefix_separator(SEPARATOR)
        .separator(SEPARATOR)
        .try_parsing(true)
        .source(vars)
}
