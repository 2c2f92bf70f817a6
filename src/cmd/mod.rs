pub mod schema;
pub mod simulate;

use crate::config::Config;
use crate::simulation::Scenario;
use anyhow::Context;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::sync::Arc;

/// Read a scenario (JSON) from a file, or stdin with "-"
pub fn read_scenario(path: &Path) -> anyhow::Result<Scenario> {
    let mut buffer = String::new();
    if path.as_os_str() == "-" {
        let stdin = io::stdin();
        BufReader::new(stdin.lock()).read_to_string(&mut buffer)?;
        if buffer.trim().is_empty() {
            anyhow::bail!("No input received. Provide a scenario file or pipe one to stdin.");
        }
    } else {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        BufReader::new(file).read_to_string(&mut buffer)?;
    }
    let scenario = Scenario::from_json(&buffer)
        .with_context(|| format!("parsing scenario {}", path.display()))?;
    Ok(scenario)
}

/// Built-in rule sets, or every rule file in `dir`
pub fn load_config(dir: Option<&Path>, default_country: &str) -> anyhow::Result<Arc<Config>> {
    let config = match dir {
        Some(dir) => Config::from_dir(dir, default_country)?,
        None => Config::builtin()?,
    };
    log::debug!(
        "tax rules loaded for {:?}, default {}",
        config.countries(),
        config.default_country()
    );
    Ok(Arc::new(config))
}
