use thiserror::Error;
use unweave_bytecode::{BytecodeVersion, Features};

use super::VALID_PASS_NAMES;

/// Read-only description of the bytecode being structured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Compiler idioms present in the input.
    pub features: Features,
}

impl Settings {
    pub fn for_version(version: BytecodeVersion) -> Self {
        Self { features: version.features() }
    }

    pub fn has(&self, feature: Features) -> bool {
        self.features.contains(feature)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::for_version(BytecodeVersion::LATEST)
    }
}

/// Configuration for debug dumps and checks during the pipeline.
#[derive(Debug, Clone)]
pub struct DebugConfig {
    /// Restrict dumps to code entries matching this filter. See
    /// [`DebugConfig::should_dump`].
    pub function_filter: Option<String>,
    /// Stop the pipeline after the named pass and dump the structure tree.
    /// Must be one of [`VALID_PASS_NAMES`].
    pub dump_after: Option<String>,
    /// Check edge mutuality after every pass.
    pub verify_each_pass: bool,
}

#[derive(Debug, Error)]
#[error("unknown pass `{name}` (expected one of: {})", VALID_PASS_NAMES.join(", "))]
pub struct UnknownPass {
    pub name: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            function_filter: None,
            dump_after: None,
            verify_each_pass: cfg!(debug_assertions),
        }
    }
}

impl DebugConfig {
    /// No dumps, no per-pass checks.
    pub fn none() -> Self {
        Self { verify_each_pass: false, ..Self::default() }
    }

    /// Rejects a `dump_after` that names no pass of the standard pipeline.
    pub fn validate(&self) -> Result<(), UnknownPass> {
        match self.dump_after.as_deref() {
            Some(name) if !VALID_PASS_NAMES.contains(&name) => {
                Err(UnknownPass { name: name.to_string() })
            }
            _ => Ok(()),
        }
    }

    /// Whether dumps apply to the code entry `name`. Everything matches when
    /// no filter is set.
    ///
    /// Matching ignores case. A filter starting with `=` must equal the whole
    /// name or its stem (`gml_Script_foo` has stem `foo`), so `=step` skips
    /// `gml_Script_step_all`. Otherwise the filter is split on `.` and `::`
    /// and every part must appear in the name: `gun.step` selects
    /// `gml_Object_obj_gun_Step_0`.
    pub fn should_dump(&self, name: &str) -> bool {
        let Some(filter) = self.function_filter.as_deref() else {
            return true;
        };
        let name = name.to_lowercase();
        let filter = filter.to_lowercase();

        if let Some(exact) = filter.strip_prefix('=') {
            return name == exact || entry_stem(&name) == exact;
        }
        filter
            .split(['.', ':'])
            .filter(|p| !p.is_empty())
            .all(|p| name.contains(p))
    }
}

/// The entry name without its `gml_<Kind>_` prefix.
fn entry_stem(name: &str) -> &str {
    name.strip_prefix("gml_")
        .and_then(|rest| rest.split_once('_'))
        .map_or(name, |(_, stem)| stem)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_filter(filter: &str) -> DebugConfig {
        DebugConfig { function_filter: Some(filter.to_string()), ..DebugConfig::none() }
    }

    #[test]
    fn settings_follow_version() {
        let legacy = Settings::for_version(BytecodeVersion(14));
        assert!(!legacy.has(Features::SHORT_CIRCUIT));
        assert!(Settings::default().has(Features::NESTED_FUNCTIONS | Features::STATIC_INIT));
    }

    #[test]
    fn should_dump_no_filter() {
        let cfg = DebugConfig::none();
        assert!(cfg.should_dump("gml_Script_anything"));
    }

    #[test]
    fn should_dump_ignores_case() {
        let cfg = with_filter("STEP");
        assert!(cfg.should_dump("gml_Object_obj_gun_Step_0"));
        assert!(!cfg.should_dump("gml_Object_obj_gun_Draw_0"));
    }

    #[test]
    fn should_dump_split_parts() {
        let cfg = with_filter("gun.step");
        assert!(cfg.should_dump("gml_Object_obj_gun_Step_0"));
        assert!(!cfg.should_dump("gml_Object_obj_bullet_Step_0"));
        let cfg = with_filter("gun::draw");
        assert!(!cfg.should_dump("gml_Object_obj_gun_Step_0"));
    }

    #[test]
    fn should_dump_exact_stem() {
        let cfg = with_filter("=step");
        assert!(cfg.should_dump("gml_Script_step"));
        assert!(!cfg.should_dump("gml_Script_step_all"));
        assert!(with_filter("=gml_Script_step").should_dump("gml_Script_step"));
        assert!(with_filter("=step").should_dump("step"));
    }

    #[test]
    fn validate_checks_dump_pass() {
        let ok = DebugConfig { dump_after: Some("switch-insert".into()), ..DebugConfig::none() };
        assert!(ok.validate().is_ok());
        assert!(DebugConfig::none().validate().is_ok());

        let bad = DebugConfig { dump_after: Some("structurize".into()), ..DebugConfig::none() };
        let err = bad.validate().unwrap_err();
        assert_eq!(err.name, "structurize");
        assert!(err.to_string().contains("loops, branches"));
    }

    #[test]
    fn verification_default_tracks_build_profile() {
        assert_eq!(DebugConfig::default().verify_each_pass, cfg!(debug_assertions));
        assert!(!DebugConfig::none().verify_each_pass);
    }
}
