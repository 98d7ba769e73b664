// src/platform/macos.rs

//! macOS: framework-style prefix, universal binaries, Mach-O relinking
//!
//! After init the root doubles as an application bundle: the entries of the
//! framework's `Python.app/Contents` are linked into `<root>/Contents/` and
//! `<root>/python` points at the bundled interpreter.

use super::{Layout, Platform};
use crate::config::MacosSettings;
use crate::error::Result;
use crate::postprocess::PostProcessor;
use crate::postprocess::macos::MachOPostProcessor;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// App bundle contents inside the framework, relative to `<root>/Contents`
const APP_CONTENTS: &str = "Frameworks/Python.framework/Resources/Python.app/Contents";

#[derive(Debug, Clone)]
pub struct MacosPlatform {
    archs: Vec<String>,
    deployment_target: String,
    sdk: Option<PathBuf>,
    cc: Option<String>,
    cxx: Option<String>,
}

impl MacosPlatform {
    pub fn new(settings: &MacosSettings) -> Self {
        Self {
            archs: settings.target_archs.clone(),
            deployment_target: settings.deployment_target.clone(),
            sdk: settings.sdk.clone(),
            cc: settings.cc.clone(),
            cxx: settings.cxx.clone(),
        }
    }

    fn arch_flags(&self) -> String {
        self.archs
            .iter()
            .map(|a| format!("-arch {}", a))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Create `link -> target` unless something already sits at `link`
fn link_once(target: &Path, link: &Path) -> Result<bool> {
    if link.symlink_metadata().is_ok() {
        debug!("Keeping existing {}", link.display());
        return Ok(false);
    }
    symlink(target, link)?;
    debug!("LINKED {} -> {}", link.display(), target.display());
    Ok(true)
}

impl Platform for MacosPlatform {
    fn name(&self) -> &'static str {
        "macos"
    }

    fn prefix_subpath(&self) -> &'static str {
        "Contents/Frameworks/Python.framework/Versions/2.7"
    }

    fn ledger_subpath(&self) -> &'static str {
        "Contents/kiln.db"
    }

    fn base_recipes(&self) -> Vec<String> {
        ["python27", "py_setuptools", "py_pip"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn build_vars(&self, layout: &Layout) -> BTreeMap<String, String> {
        let lib = layout.lib_dir();
        let mut cflags = format!(
            "{} -mmacosx-version-min={} -I{}",
            self.arch_flags(),
            self.deployment_target,
            layout.include_dir().display()
        );
        let mut ldflags = format!(
            "{} -mmacosx-version-min={} -L{} -headerpad_max_install_names",
            self.arch_flags(),
            self.deployment_target,
            lib.display()
        );
        if let Some(sdk) = &self.sdk {
            cflags.push_str(&format!(" -isysroot {}", sdk.display()));
            ldflags.push_str(&format!(" -Wl,-syslibroot,{}", sdk.display()));
        }

        let mut vars = BTreeMap::new();
        vars.insert(
            "MACOSX_DEPLOYMENT_TARGET".to_string(),
            self.deployment_target.clone(),
        );
        vars.insert(
            "PKG_CONFIG_PATH".to_string(),
            lib.join("pkgconfig").to_string_lossy().into_owned(),
        );
        vars.insert("CFLAGS".to_string(), cflags.clone());
        vars.insert("CXXFLAGS".to_string(), cflags);
        vars.insert("LDFLAGS".to_string(), ldflags);
        if let Some(cc) = &self.cc {
            vars.insert("CC".to_string(), cc.clone());
        }
        if let Some(cxx) = &self.cxx {
            vars.insert("CXX".to_string(), cxx.clone());
        }
        vars
    }

    fn target_archs(&self) -> &[String] {
        &self.archs
    }

    fn shared_lib_ext(&self) -> &'static str {
        "dylib"
    }

    fn post_processor(&self) -> Box<dyn PostProcessor> {
        Box::new(MachOPostProcessor::new(self.archs.clone(), self.sdk.clone()))
    }

    fn post_init(&self, layout: &Layout) -> Result<Vec<PathBuf>> {
        let contents = layout.root.join("Contents");
        let app = Path::new(APP_CONTENTS);
        let entries = match fs::read_dir(contents.join(app)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("No Python.app in {}, skipping bundle links", contents.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        let mut names = entries
            .map(|entry| entry.map(|e| e.file_name()))
            .collect::<io::Result<Vec<_>>>()?;
        names.sort();

        let mut links = Vec::new();
        for name in names {
            let link = contents.join(&name);
            if link_once(&app.join(&name), &link)? {
                links.push(link);
            }
        }

        let python = layout.root.join("python");
        if link_once(Path::new("Contents/MacOS/Python"), &python)? {
            links.push(python);
        }
        Ok(links)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_vars_carry_archs_and_target() {
        let platform = MacosPlatform::new(&MacosSettings::default());
        let layout = Layout::new(Path::new("/env"), &platform, "/env/cache".into());
        let vars = platform.build_vars(&layout);

        assert_eq!(vars["MACOSX_DEPLOYMENT_TARGET"], "10.5");
        assert!(vars["CFLAGS"].starts_with("-arch i386 -arch x86_64"));
        assert!(vars["LDFLAGS"].contains("-headerpad_max_install_names"));
        assert!(!vars.contains_key("CC"));
    }

    #[test]
    fn test_post_init_links_app_bundle_into_root() {
        let dir = tempfile::tempdir().unwrap();
        let platform = MacosPlatform::new(&MacosSettings::default());
        let layout = Layout::new(dir.path(), &platform, dir.path().join("cache"));
        let app = dir.path().join("Contents").join(APP_CONTENTS);
        fs::create_dir_all(app.join("MacOS")).unwrap();
        fs::write(app.join("MacOS/Python"), "").unwrap();
        fs::write(app.join("Info.plist"), "<plist/>").unwrap();

        let links = platform.post_init(&layout).unwrap();
        assert_eq!(
            links,
            vec![
                dir.path().join("Contents/Info.plist"),
                dir.path().join("Contents/MacOS"),
                dir.path().join("python"),
            ]
        );
        assert_eq!(
            fs::read_link(dir.path().join("Contents/MacOS")).unwrap(),
            Path::new(APP_CONTENTS).join("MacOS")
        );
        assert!(dir.path().join("python").exists());

        // Running again leaves everything alone
        assert!(platform.post_init(&layout).unwrap().is_empty());
    }

    #[test]
    fn test_post_init_without_app_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let platform = MacosPlatform::new(&MacosSettings::default());
        let layout = Layout::new(dir.path(), &platform, dir.path().join("cache"));
        assert!(platform.post_init(&layout).unwrap().is_empty());
        assert!(!dir.path().join("python").exists());
    }
}
