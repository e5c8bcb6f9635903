//! Help file cache.
//!
//! Each service has a directory per language under the help root:
//! `help/<service>/<lang>/index`, an optional `index-admin` shown to
//! opers, and one file per command topic. Files load once into
//! immutable line blocks; rehash tears every cache down and reloads.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An immutable block of help lines.
pub type HelpBlock = Arc<[String]>;

/// The shared empty block, used both as the absent-file marker and as a
/// convenient end sentinel.
pub fn empty_block() -> HelpBlock {
    Arc::from(Vec::<String>::new().into_boxed_slice())
}

/// Per-language help for one service.
struct LangHelp {
    index: HelpBlock,
    index_admin: HelpBlock,
    topics: HashMap<String, HelpBlock>,
}

impl Default for LangHelp {
    fn default() -> Self {
        Self {
            index: empty_block(),
            index_admin: empty_block(),
            topics: HashMap::new(),
        }
    }
}

/// The loaded help cache for one service.
pub struct HelpCache {
    root: PathBuf,
    service: String,
    langs: HashMap<String, LangHelp>,
}

impl HelpCache {
    /// Build and load from `<root>/<service>/`.
    pub fn load(root: impl AsRef<Path>, service: &str) -> Self {
        let mut cache = Self {
            root: root.as_ref().to_path_buf(),
            service: service.to_string(),
            langs: HashMap::new(),
        };
        cache.reload();
        cache
    }

    /// Drop everything and reload from disk.
    pub fn reload(&mut self) {
        self.langs.clear();

        let service_dir = self.root.join(&self.service);
        let Ok(entries) = std::fs::read_dir(&service_dir) else {
            return;
        };

        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let Some(lang) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };

            let mut help = LangHelp::default();
            if let Ok(topics) = std::fs::read_dir(entry.path()) {
                for topic in topics.flatten() {
                    let Some(name) = topic.file_name().to_str().map(str::to_lowercase) else {
                        continue;
                    };
                    let Ok(raw) = std::fs::read_to_string(topic.path()) else {
                        continue;
                    };
                    let block: HelpBlock =
                        Arc::from(raw.lines().map(String::from).collect::<Vec<_>>().into_boxed_slice());
                    match name.as_str() {
                        "index" => help.index = block,
                        "index-admin" => help.index_admin = block,
                        _ => {
                            help.topics.insert(name, block);
                        }
                    }
                }
            }
            self.langs.insert(lang, help);
        }
    }

    fn lang_or_default<'a>(&'a self, lang: &str, default_lang: &str) -> Option<&'a LangHelp> {
        self.langs
            .get(lang)
            .or_else(|| self.langs.get(default_lang))
            .or_else(|| self.langs.get("en"))
    }

    /// The index block, oper variant when requested and present.
    pub fn index(&self, lang: &str, default_lang: &str, admin: bool) -> HelpBlock {
        match self.lang_or_default(lang, default_lang) {
            Some(help) => {
                if admin && !help.index_admin.is_empty() {
                    help.index_admin.clone()
                } else {
                    help.index.clone()
                }
            }
            None => empty_block(),
        }
    }

    /// A command topic block.
    pub fn topic(&self, lang: &str, default_lang: &str, topic: &str) -> HelpBlock {
        self.lang_or_default(lang, default_lang)
            .and_then(|help| help.topics.get(&topic.to_lowercase()).cloned())
            .unwrap_or_else(empty_block)
    }

    /// Append another service's help, for merging.
    pub fn absorb(&mut self, other: &HelpCache) {
        for (lang, other_help) in &other.langs {
            let help = self.langs.entry(lang.clone()).or_default();
            let mut index: Vec<String> = help.index.to_vec();
            index.extend(other_help.index.iter().cloned());
            help.index = Arc::from(index.into_boxed_slice());
            for (topic, block) in &other_help.topics {
                help.topics.entry(topic.clone()).or_insert_with(|| block.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn loads_index_and_topics() {
        let dir = tempfile::tempdir().unwrap();
        let en = dir.path().join("chanserv/en");
        fs::create_dir_all(&en).unwrap();
        fs::write(en.join("index"), "REGISTER - register a channel\n").unwrap();
        fs::write(en.join("index-admin"), "line1\nCDROP - drop any channel\n").unwrap();
        fs::write(en.join("register"), "Syntax: REGISTER #channel\n").unwrap();

        let cache = HelpCache::load(dir.path(), "chanserv");
        assert_eq!(cache.index("en", "en", false).len(), 1);
        assert_eq!(cache.index("en", "en", true).len(), 2);
        assert_eq!(cache.topic("en", "en", "REGISTER").len(), 1);
        assert!(cache.topic("en", "en", "missing").is_empty());
    }

    #[test]
    fn falls_back_to_default_language() {
        let dir = tempfile::tempdir().unwrap();
        let en = dir.path().join("svc/en");
        fs::create_dir_all(&en).unwrap();
        fs::write(en.join("index"), "HELP\n").unwrap();

        let cache = HelpCache::load(dir.path(), "svc");
        assert_eq!(cache.index("de", "en", false).len(), 1);
    }

    #[test]
    fn missing_directory_is_empty_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HelpCache::load(dir.path(), "ghost");
        assert!(cache.index("en", "en", false).is_empty());
    }
}
