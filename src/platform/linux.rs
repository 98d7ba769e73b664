// src/platform/linux.rs

//! Linux: prefix under `<root>/local`, ELF post-processing

use super::{Layout, Platform};
use crate::config::LinuxSettings;
use crate::postprocess::PostProcessor;
use crate::postprocess::linux::ElfPostProcessor;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct LinuxPlatform {
    max_glibc: String,
    max_glibcxx: String,
}

impl LinuxPlatform {
    pub fn new(settings: &LinuxSettings) -> Self {
        Self {
            max_glibc: settings.max_glibc.clone(),
            max_glibcxx: settings.max_glibcxx.clone(),
        }
    }
}

impl Platform for LinuxPlatform {
    fn name(&self) -> &'static str {
        "linux"
    }

    fn prefix_subpath(&self) -> &'static str {
        "local"
    }

    fn ledger_subpath(&self) -> &'static str {
        "local/kiln.db"
    }

    fn base_recipes(&self) -> Vec<String> {
        ["patchelf", "python27", "py_setuptools", "py_pip"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn build_vars(&self, layout: &Layout) -> BTreeMap<String, String> {
        let lib = layout.lib_dir();
        let include = layout.include_dir();
        let mut vars = BTreeMap::new();
        vars.insert(
            "PKG_CONFIG_PATH".to_string(),
            lib.join("pkgconfig").to_string_lossy().into_owned(),
        );
        vars.insert(
            "CPPFLAGS".to_string(),
            format!("-I{}", include.display()),
        );
        vars.insert(
            "LDFLAGS".to_string(),
            format!("-L{} -Wl,-rpath,{}", lib.display(), lib.display()),
        );
        vars.insert("LD_LIBRARY_PATH".to_string(), lib.to_string_lossy().into_owned());
        vars
    }

    fn shared_lib_ext(&self) -> &'static str {
        "so"
    }

    fn post_processor(&self) -> Box<dyn PostProcessor> {
        Box::new(ElfPostProcessor::new(&self.max_glibc, &self.max_glibcxx))
    }
}
