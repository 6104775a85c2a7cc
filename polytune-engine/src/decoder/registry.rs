//! Decoder registry
//!
//! Maps file extensions to decoder factories with per-decoder enable state,
//! priority ordering and optional enabled-extension subsets. Extension
//! resolution tries, in order: the trailing extension (`a.b.c` -> `c`), the
//! compound extension (`a.b.c` -> `b.c`), and the leading name segment
//! (`mod.songname` -> `mod`), which is how several tracker ecosystems name
//! their files.

use crate::decoder::Decoder;
use std::path::Path;
use tracing::{debug, warn};

type DecoderFactory = Box<dyn Fn() -> Box<dyn Decoder> + Send + Sync>;

struct DecoderEntry {
    name: String,
    supported_extensions: Vec<String>,
    /// Empty means all supported extensions are enabled.
    enabled_extensions: Vec<String>,
    factory: DecoderFactory,
    default_priority: i32,
    priority: i32,
    enabled: bool,
}

impl DecoderEntry {
    fn supports_extension(&self, extension: &str) -> bool {
        let pool = if self.enabled_extensions.is_empty() {
            &self.supported_extensions
        } else {
            &self.enabled_extensions
        };
        pool.iter().any(|e| e.eq_ignore_ascii_case(extension))
    }
}

/// Registry of decoder factories.
///
/// The engine consumes it through `create_for_path` and `create_by_name`;
/// the host owns registration and policy.
#[derive(Default)]
pub struct DecoderRegistry {
    decoders: Vec<DecoderEntry>,
}

fn extension_candidates(path: &Path) -> Vec<String> {
    let base_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned());

    let mut raw = Vec::new();
    let first_dot = base_name.find('.');
    let last_dot = base_name.rfind('.');

    if let Some(last) = last_dot {
        if last > 0 && last + 1 < base_name.len() {
            raw.push(base_name[last + 1..].to_string()); // trailing extension
        }
        if last > 0 {
            if let Some(second_last) = base_name[..last].rfind('.') {
                raw.push(base_name[second_last + 1..].to_string()); // compound extension
            }
        }
    }
    if let Some(first) = first_dot {
        if first > 0 {
            raw.push(base_name[..first].to_string()); // leading extension
        }
    }

    let mut candidates: Vec<String> = Vec::new();
    for candidate in raw {
        let lowered = candidate.to_ascii_lowercase();
        if !lowered.is_empty() && !candidates.contains(&lowered) {
            candidates.push(lowered);
        }
    }
    candidates
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a decoder factory. Lower priority values are tried first;
    /// equal priorities keep registration order.
    pub fn register<F>(&mut self, name: &str, extensions: &[&str], priority: i32, factory: F)
    where
        F: Fn() -> Box<dyn Decoder> + Send + Sync + 'static,
    {
        self.decoders.push(DecoderEntry {
            name: name.to_string(),
            supported_extensions: extensions.iter().map(|e| e.to_string()).collect(),
            enabled_extensions: Vec::new(),
            factory: Box::new(factory),
            default_priority: priority,
            priority,
            enabled: true,
        });
        self.sort_by_priority();
        debug!(name, priority, "registered decoder");
    }

    fn sort_by_priority(&mut self) {
        self.decoders.sort_by_key(|entry| entry.priority);
    }

    /// Create a decoder for a source path by extension resolution.
    pub fn create_for_path(&self, path: &Path) -> Option<Box<dyn Decoder>> {
        let candidates = extension_candidates(path);
        if candidates.is_empty() {
            warn!(path = %path.display(), "no extension candidates resolved for source");
            return None;
        }

        for extension in &candidates {
            for entry in &self.decoders {
                if entry.enabled && entry.supports_extension(extension) {
                    debug!(
                        decoder = %entry.name,
                        priority = entry.priority,
                        extension = %extension,
                        "matched decoder for source"
                    );
                    return Some((entry.factory)());
                }
            }
        }

        warn!(path = %path.display(), "no enabled decoder matched any extension candidate");
        None
    }

    /// Create a decoder instance by registered name (capability queries).
    pub fn create_by_name(&self, name: &str) -> Option<Box<dyn Decoder>> {
        self.decoders
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| (entry.factory)())
    }

    /// All extensions currently serviceable, deduplicated and sorted.
    pub fn supported_extensions(&self) -> Vec<String> {
        let mut all: Vec<String> = Vec::new();
        for entry in &self.decoders {
            if !entry.enabled {
                continue;
            }
            let pool = if entry.enabled_extensions.is_empty() {
                &entry.supported_extensions
            } else {
                &entry.enabled_extensions
            };
            all.extend(pool.iter().cloned());
        }
        all.sort();
        all.dedup();
        all
    }

    pub fn registered_names(&self) -> Vec<String> {
        self.decoders.iter().map(|entry| entry.name.clone()).collect()
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) {
        if let Some(entry) = self.decoders.iter_mut().find(|entry| entry.name == name) {
            entry.enabled = enabled;
            debug!(name, enabled, "decoder enable state changed");
        }
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.decoders
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.enabled)
            .unwrap_or(false)
    }

    pub fn set_priority(&mut self, name: &str, priority: i32) {
        if let Some(entry) = self.decoders.iter_mut().find(|entry| entry.name == name) {
            entry.priority = priority;
        }
        self.sort_by_priority();
    }

    pub fn priority(&self, name: &str) -> i32 {
        self.decoders
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.priority)
            .unwrap_or(0)
    }

    pub fn default_priority(&self, name: &str) -> i32 {
        self.decoders
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.default_priority)
            .unwrap_or(0)
    }

    /// Restrict a decoder to a subset of its supported extensions.
    /// An empty subset re-enables all supported extensions.
    pub fn set_enabled_extensions(&mut self, name: &str, extensions: &[&str]) {
        if let Some(entry) = self.decoders.iter_mut().find(|entry| entry.name == name) {
            entry.enabled_extensions = extensions.iter().map(|e| e.to_string()).collect();
        }
    }

    pub fn enabled_extensions(&self, name: &str) -> Vec<String> {
        self.decoders
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| {
                if entry.enabled_extensions.is_empty() {
                    entry.supported_extensions.clone()
                } else {
                    entry.enabled_extensions.clone()
                }
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::tone::ToneDecoder;

    fn registry_with(names: &[(&str, &[&str], i32)]) -> DecoderRegistry {
        let mut registry = DecoderRegistry::new();
        for (name, extensions, priority) in names {
            registry.register(name, extensions, *priority, || {
                Box::new(ToneDecoder::new(48_000, 30.0))
            });
        }
        registry
    }

    #[test]
    fn extension_candidates_trailing_compound_leading() {
        let candidates = extension_candidates(Path::new("/music/track.tape.gz"));
        assert_eq!(candidates, vec!["gz", "tape.gz", "track"]);
    }

    #[test]
    fn extension_candidates_leading_only() {
        let candidates = extension_candidates(Path::new("mod.catacombs"));
        assert_eq!(candidates, vec!["catacombs", "mod"]);
    }

    #[test]
    fn create_for_path_falls_back_to_leading_extension() {
        let registry = registry_with(&[("tracker", &["mod"], 10)]);
        // "catacombs" has no match; the leading "mod" segment does.
        assert!(registry.create_for_path(Path::new("mod.catacombs")).is_some());
        assert!(registry.create_for_path(Path::new("untitled.catacombs")).is_none());
    }

    #[test]
    fn priority_orders_within_one_extension() {
        let mut registry = registry_with(&[("low", &["xm"], 50), ("high", &["xm"], 10)]);
        assert_eq!(registry.registered_names(), vec!["high", "low"]);
        registry.set_priority("low", 1);
        assert_eq!(registry.registered_names(), vec!["low", "high"]);
    }

    #[test]
    fn disabled_decoder_is_skipped() {
        let mut registry = registry_with(&[("only", &["sid"], 10)]);
        registry.set_enabled("only", false);
        assert!(registry.create_for_path(Path::new("tune.sid")).is_none());
        registry.set_enabled("only", true);
        assert!(registry.create_for_path(Path::new("tune.sid")).is_some());
    }

    #[test]
    fn enabled_extension_subset_restricts_matching() {
        let mut registry = registry_with(&[("multi", &["it", "xm", "s3m"], 10)]);
        registry.set_enabled_extensions("multi", &["it"]);
        assert!(registry.create_for_path(Path::new("a.it")).is_some());
        assert!(registry.create_for_path(Path::new("a.xm")).is_none());
        assert_eq!(registry.enabled_extensions("multi"), vec!["it"]);
        registry.set_enabled_extensions("multi", &[]);
        assert!(registry.create_for_path(Path::new("a.xm")).is_some());
    }

    #[test]
    fn supported_extensions_deduplicates() {
        let registry = registry_with(&[("a", &["xm", "it"], 10), ("b", &["it", "mod"], 20)]);
        assert_eq!(registry.supported_extensions(), vec!["it", "mod", "xm"]);
    }
}
