use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Modules compiled into the binary. These shadow any same-named file on disk.
const BUNDLED: &[(&str, &str)] = &[("types.lua", include_str!("lua/types.lua"))];

/// Resolves script names to source text.
///
/// Lookup order: bundled modules first, then each search directory in
/// order. Resolved sources are cached for the lifetime of the resolver,
/// so a runtime sees a consistent view of every script it loads; a fresh
/// runtime (one per conversion job) picks up edits.
pub struct ScriptResolver {
    dirs: Vec<PathBuf>,
    cache: Mutex<HashMap<String, Arc<str>>>,
}

impl ScriptResolver {
    /// Creates a resolver searching `dirs` in order after the bundled set.
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self {
            dirs,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Looks up a script by name. The `.lua` suffix is optional.
    pub fn resolve(&self, name: &str) -> std::io::Result<Option<Arc<str>>> {
        let file_name = if name.ends_with(".lua") {
            name.to_string()
        } else {
            format!("{name}.lua")
        };

        if let Some(cached) = self.cache.lock().ok().and_then(|c| c.get(&file_name).cloned()) {
            return Ok(Some(cached));
        }

        let source = self.lookup(&file_name)?;
        if let (Some(source), Ok(mut cache)) = (&source, self.cache.lock()) {
            cache.insert(file_name, source.clone());
        }
        Ok(source)
    }

    fn lookup(&self, file_name: &str) -> std::io::Result<Option<Arc<str>>> {
        for (name, source) in BUNDLED {
            if *name == file_name {
                return Ok(Some(Arc::from(*source)));
            }
        }
        for dir in &self.dirs {
            let path = dir.join(file_name);
            if path.is_file() {
                let source = std::fs::read_to_string(&path)?;
                return Ok(Some(Arc::from(source.as_str())));
            }
        }
        Ok(None)
    }
}
