// src/recipe/format.rs

//! Recipe catalogue file format
//!
//! A catalogue is a TOML file holding any number of `[[recipe]]` tables.
//! A recipe may `extends` another (usually an abstract template) and
//! inherits everything it does not set itself; list fields merge instead of
//! replacing. Platform sections add to the lists for one host only.
//!
//! ```toml
//! [[recipe]]
//! name = "lib_png"
//! version = "1.5.13"
//! depends = ["lib_zlib"]
//!
//! [recipe.source]
//! url = "http://download.sourceforge.net/libpng/libpng-1.5.13.tar.gz"
//! checksum = "md5:9c5a584d4eb5fe40d0f1bc2090112c65"
//!
//! [recipe.configure]
//! args = ["--disable-static"]
//!
//! [recipe.platform.macos]
//! nway = true
//! ```

use super::patch::Patch;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum_macros::{Display, EnumString};

/// A parsed catalogue file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Catalogue {
    #[serde(default, rename = "recipe")]
    pub recipes: Vec<RecipeDef>,
}

/// Generic build behaviour a recipe is driven by
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum BuildStyle {
    /// `./configure && make && make install`
    #[default]
    Autotools,
    /// Out-of-tree cmake build
    Cmake,
    /// `python setup.py install` with the environment's interpreter
    Python,
    /// cmake pointed at the environment's Python
    PythonCmake,
    /// make without a configure step
    Make,
    /// Files written straight from the recipe, nothing fetched
    Data,
    /// Upstream installer script run from the unpacked archive
    Prebuilt,
}

impl BuildStyle {
    pub fn needs_source(&self) -> bool {
        !matches!(self, BuildStyle::Data)
    }
}

/// One recipe entry as written in a catalogue
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecipeDef {
    pub name: String,

    #[serde(default)]
    pub version: Option<String>,

    /// Recipe this one inherits from
    #[serde(default)]
    pub extends: Option<String>,

    /// Templates exist only to be extended
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,

    #[serde(default)]
    pub style: Option<BuildStyle>,

    /// Runtime dependencies
    #[serde(default)]
    pub depends: Vec<String>,

    /// Needed only while building
    #[serde(default)]
    pub build_depends: Vec<String>,

    #[serde(default)]
    pub conflicts: Vec<String>,

    #[serde(default)]
    pub source: Option<SourceSection>,

    #[serde(default)]
    pub configure: ConfigureSection,

    #[serde(default)]
    pub make: MakeSection,

    /// Extra arguments for `setup.py install`
    #[serde(default)]
    pub setup_args: Vec<String>,

    #[serde(default)]
    pub installer: Option<InstallerSection>,

    #[serde(default)]
    pub patches: Vec<Patch>,

    /// Files written by data-style recipes
    #[serde(default)]
    pub files: Vec<DataFile>,

    /// Variables exported to every build step of this recipe
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// `%(key)s` substitutions
    #[serde(default)]
    pub variables: BTreeMap<String, String>,

    /// Run binary post-processing over installed files
    #[serde(default)]
    pub postprocess: Option<bool>,

    #[serde(default)]
    pub platform: BTreeMap<String, PlatformSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceSection {
    /// Archive URL; `%(version)s` is substituted
    pub url: String,

    /// `md5:...`, `sha256:...` or a bare digest
    #[serde(default)]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigureSection {
    /// Script to run, relative to the configure directory (default `./configure`)
    #[serde(default)]
    pub script: Option<String>,

    /// Subdirectory of the source tree to configure in
    #[serde(default)]
    pub dir: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    /// Variables set only while configuring
    #[serde(default)]
    pub vars: BTreeMap<String, String>,

    /// Pass `--prefix=<prefix>` (default true)
    #[serde(default)]
    pub prefix_arg: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MakeSection {
    /// `KEY=VALUE` assignments on every make command line
    #[serde(default)]
    pub vars: BTreeMap<String, String>,

    /// Subdirectory to run make in
    #[serde(default)]
    pub relpath: Option<String>,

    /// Build targets (default: make's own default)
    #[serde(default)]
    pub targets: Vec<String>,

    /// Install target (default `install`)
    #[serde(default)]
    pub install_target: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstallerSection {
    /// Script inside the unpacked archive
    pub script: String,

    #[serde(default)]
    pub args: Vec<String>,
}

/// A file a data recipe writes under the prefix
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataFile {
    /// Path relative to the prefix
    pub path: String,

    #[serde(default)]
    pub content: String,

    /// Unix permission bits (default 0o644)
    #[serde(default)]
    pub mode: Option<u32>,
}

/// Additions that apply on one platform only
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlatformSection {
    #[serde(default)]
    pub depends: Vec<String>,

    #[serde(default)]
    pub build_depends: Vec<String>,

    #[serde(default)]
    pub conflicts: Vec<String>,

    #[serde(default)]
    pub configure_args: Vec<String>,

    #[serde(default)]
    pub patches: Vec<Patch>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Build once per target architecture and merge into fat binaries
    #[serde(default)]
    pub nway: Option<bool>,
}

impl Catalogue {
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_parse_catalogue() {
        let catalogue = Catalogue::from_toml_str(
            r#"
            [[recipe]]
            name = "_cmake_recipe"
            abstract = true
            style = "cmake"
            build_depends = ["cmake"]

            [[recipe]]
            name = "lib_xslt"
            extends = "_cmake_recipe"
            depends = ["lib_xml2"]

            [recipe.source]
            url = "ftp://xmlsoft.org/libxslt/libxslt-1.1.26.tar.gz"
            checksum = "md5:e61d0364a30146aaa3001296f853b2b9"

            [recipe.platform.linux]
            configure_args = ["--without-crypto"]
            "#,
        )
        .unwrap();

        assert_eq!(catalogue.recipes.len(), 2);
        let template = &catalogue.recipes[0];
        assert!(template.is_abstract);
        assert_eq!(template.style, Some(BuildStyle::Cmake));

        let xslt = &catalogue.recipes[1];
        assert_eq!(xslt.extends.as_deref(), Some("_cmake_recipe"));
        assert_eq!(xslt.platform["linux"].configure_args, vec!["--without-crypto"]);
        assert!(xslt.style.is_none());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = Catalogue::from_toml_str(
            r#"
            [[recipe]]
            name = "x"
            dependz = ["y"]
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_style_names() {
        assert_eq!(BuildStyle::PythonCmake.to_string(), "python-cmake");
        assert_eq!(BuildStyle::from_str("prebuilt").unwrap(), BuildStyle::Prebuilt);
        assert!(!BuildStyle::Data.needs_source());
    }
}
