//! Implementation of `kiln debug-config`.
//!
//! Reports how a debugger would be launched for a sketch on a board: the
//! executable, the GDB toolchain, the debug server and any cortex-debug
//! extras, all taken from the `debug.*` build properties. Nothing is built.

use std::path::PathBuf;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::package::PackageIndex;
use crate::core::properties::PropertyMap;
use crate::errors::{BuildError, BuildResult};
use crate::ops::compile::{prepare_context, CompileOptions};
use crate::resolver::platform::PlatformResolver;
use crate::util::GlobalContext;

/// Options for the debug-config command.
#[derive(Debug, Clone, Default)]
pub struct DebugConfigOptions {
    pub sketch_path: PathBuf,
    pub fqbn: String,
    /// Programmer whose `debug.*` properties override the board's
    pub programmer: Option<String>,
    /// Directory holding the compiled sketch; defaults to the build path
    pub input_dir: Option<PathBuf>,
}

/// Debug server settings for OpenOCD.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OpenOcdConfig {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub scripts_dir: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub scripts: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DebugConfig {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub executable: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub toolchain: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub toolchain_path: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub toolchain_prefix: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub server: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub server_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_configuration: Option<OpenOcdConfig>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub svd_file: String,
    #[serde(
        rename = "cortex-debug_custom_configuration",
        skip_serializing_if = "Option::is_none"
    )]
    pub custom_configs: Option<Value>,
    pub programmer: String,
}

impl DebugConfig {
    /// Human-readable summary, one setting per line.
    pub fn to_text(&self) -> String {
        let mut lines = vec![
            format!("Executable to debug: {}", self.executable),
            format!("Toolchain type:      {}", self.toolchain),
            format!("Toolchain path:      {}", self.toolchain_path),
            format!("Toolchain prefix:    {}", self.toolchain_prefix),
        ];
        if !self.svd_file.is_empty() {
            lines.push(format!("SVD file path:       {}", self.svd_file));
        }
        lines.push(format!("Server type:         {}", self.server));
        lines.push(format!("Server path:         {}", self.server_path));
        if let Some(openocd) = &self.server_configuration {
            lines.push(format!("Configuration options for {}", self.server));
            if !openocd.path.is_empty() {
                lines.push(format!(" - Path              {}", openocd.path));
            }
            if !openocd.scripts_dir.is_empty() {
                lines.push(format!(" - Scripts Directory {}", openocd.scripts_dir));
            }
            for script in &openocd.scripts {
                lines.push(format!(" - Script            {}", script));
            }
        }
        if let Some(custom) = &self.custom_configs {
            lines.push("Custom configuration for cortex-debug IDE plugin:".to_string());
            lines.push(serde_json::to_string_pretty(custom).unwrap_or_default());
        }
        lines.join("\n")
    }
}

/// Resolve the debug configuration for a sketch and board.
pub fn debug_config(gctx: &GlobalContext, opts: &DebugConfigOptions) -> BuildResult<DebugConfig> {
    let mut ctx = prepare_context(
        gctx,
        &CompileOptions {
            sketch_path: opts.sketch_path.clone(),
            fqbn: opts.fqbn.clone(),
            build_path: opts.input_dir.clone(),
            ..Default::default()
        },
    )?;
    let index = PackageIndex::load(&ctx.hardware_dirs, &ctx.builtin_tools_dirs)?;
    let resolved = PlatformResolver::new(&index).resolve(&ctx.fqbn)?;
    ctx.set_platform(resolved)?;

    let mut props = ctx.build_properties.clone();
    if let Some(id) = &opts.programmer {
        let programmer = ctx.platform()?.programmer(id)?;
        for (key, value) in programmer.properties.sub_tree("debug").iter() {
            props.set(format!("debug.{}", key), value);
        }
    }

    from_properties(&props, opts.programmer.as_deref().unwrap_or_default(), &ctx.fqbn.to_string())
}

/// Build a [`DebugConfig`] from fully layered build properties.
pub fn from_properties(props: &PropertyMap, programmer: &str, fqbn: &str) -> BuildResult<DebugConfig> {
    let debug: PropertyMap = props
        .sub_tree("debug")
        .iter()
        .map(|(k, v)| (k.to_string(), props.expand(v)))
        .collect();

    let toolchain = debug.get_or_empty("toolchain").to_string();
    if toolchain.is_empty() {
        return Err(BuildError::DebugNotSupported {
            fqbn: fqbn.to_string(),
        });
    }

    let server = debug.get_or_empty("server").to_string();
    let server_configuration = (server == "openocd").then(|| OpenOcdConfig {
        path: debug.get_or_empty("server.openocd.path").to_string(),
        scripts_dir: debug.get_or_empty("server.openocd.scripts_dir").to_string(),
        scripts: openocd_scripts(&debug),
    });

    let custom = debug.sub_tree("cortex-debug.custom");
    let custom_configs = (!custom.is_empty()).then(|| to_json(&custom));

    tracing::debug!("debug toolchain {} with server {}", toolchain, server);
    Ok(DebugConfig {
        executable: debug.get_or_empty("executable").to_string(),
        toolchain_path: debug.get_or_empty("toolchain.path").to_string(),
        toolchain_prefix: debug.get_or_empty("toolchain.prefix").to_string(),
        toolchain,
        server_path: debug.get_or_empty(&format!("server.{}.path", server)).to_string(),
        server,
        server_configuration,
        svd_file: debug.get_or_empty("svd_file").to_string(),
        custom_configs,
        programmer: programmer.to_string(),
    })
}

/// A single legacy `script` wins over the indexed `scripts.N` list.
fn openocd_scripts(debug: &PropertyMap) -> Vec<String> {
    if let Some(script) = debug.get("server.openocd.script").filter(|s| !s.is_empty()) {
        return vec![script.to_string()];
    }
    let mut indexed: Vec<(usize, String)> = debug
        .sub_tree("server.openocd.scripts")
        .iter()
        .filter_map(|(k, v)| Some((k.parse::<usize>().ok()?, v.to_string())))
        .collect();
    indexed.sort_by_key(|(i, _)| *i);
    indexed.into_iter().map(|(_, v)| v).collect()
}

/// Convert dotted keys to nested JSON. Objects whose keys are all indices
/// become arrays.
fn to_json(props: &PropertyMap) -> Value {
    let mut root = Map::new();
    for (key, value) in props.iter() {
        insert_path(&mut root, key.split('.').collect::<Vec<_>>().as_slice(), value);
    }
    arrays_from_indices(Value::Object(root))
}

fn insert_path(node: &mut Map<String, Value>, path: &[&str], value: &str) {
    match path {
        [] => {}
        [leaf] => {
            node.insert(leaf.to_string(), Value::String(value.to_string()));
        }
        [head, rest @ ..] => {
            let child = node
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(map) = child {
                insert_path(map, rest, value);
            }
        }
    }
}

fn arrays_from_indices(value: Value) -> Value {
    let Value::Object(map) = value else {
        return value;
    };
    if !map.is_empty() && map.keys().all(|k| k.parse::<usize>().is_ok()) {
        let mut items: Vec<(usize, Value)> = map
            .into_iter()
            .filter_map(|(k, v)| Some((k.parse::<usize>().ok()?, arrays_from_indices(v))))
            .collect();
        items.sort_by_key(|(i, _)| *i);
        return Value::Array(items.into_iter().map(|(_, v)| v).collect());
    }
    Value::Object(
        map.into_iter()
            .map(|(k, v)| (k, arrays_from_indices(v)))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixtures::Fixture;
    use serde_json::json;

    fn context(fx: &Fixture) -> GlobalContext {
        let home = fx.root().join("home");
        std::fs::create_dir_all(&home).unwrap();
        std::fs::write(
            home.join("config.toml"),
            format!(
                "[directories]\nhardware = [\"{}\"]\n",
                fx.hardware_dir().display().to_string().replace('\\', "/")
            ),
        )
        .unwrap();
        GlobalContext::with_paths(fx.root().to_path_buf(), home)
    }

    fn options(fqbn: &str) -> DebugConfigOptions {
        DebugConfigOptions {
            sketch_path: PathBuf::from("Blink"),
            fqbn: fqbn.to_string(),
            input_dir: Some(PathBuf::from("out")),
            ..Default::default()
        }
    }

    #[test]
    fn test_debug_config_from_board() {
        let fx = Fixture::new();
        let platform = fx.install_avr();
        fx.add_sketch("Blink", "void setup() {}\n");
        let gctx = context(&fx);

        let config = debug_config(&gctx, &options("arduino:avr:dbg")).unwrap();
        let tools = fx.hardware_dir().join("arduino/tools/avr-gcc/7.3.0");

        assert_eq!(
            PathBuf::from(&config.executable),
            fx.root().join("out").join("Blink.ino.elf")
        );
        assert_eq!(config.toolchain, "gcc");
        assert_eq!(config.toolchain_prefix, "avr-");
        assert_eq!(config.toolchain_path, format!("{}/bin/", tools.display()));
        assert_eq!(config.server, "openocd");
        assert_eq!(config.server_path, format!("{}/bin/openocd", tools.display()));
        let openocd = config.server_configuration.as_ref().unwrap();
        assert_eq!(
            openocd.scripts,
            vec![format!("{}/openocd.cfg", platform.join("variants").join("standard").display())]
        );
        assert!(config.svd_file.ends_with("svd/atmega328p.svd"));
        assert_eq!(config.programmer, "");
        assert_eq!(
            config.custom_configs,
            Some(json!({
                "overrideRestartCommands": ["monitor reset halt"],
                "postAttachCommands": ["set remote hardware-watchpoint-limit 2", "monitor reset halt"],
                "showDevDebugOutput": "raw",
            }))
        );
    }

    #[test]
    fn test_programmer_overrides_board() {
        let fx = Fixture::new();
        fx.install_avr();
        fx.add_sketch("Blink", "void setup() {}\n");
        let gctx = context(&fx);

        let mut opts = options("arduino:avr:dbg");
        opts.programmer = Some("atmelice".to_string());
        let config = debug_config(&gctx, &opts).unwrap();

        let scripts = &config.server_configuration.as_ref().unwrap().scripts;
        assert_eq!(scripts.len(), 2);
        assert_eq!(scripts[0], "interface/cmsis-dap.cfg");
        assert_eq!(config.programmer, "atmelice");

        opts.programmer = Some("jtag3".to_string());
        assert!(matches!(
            debug_config(&gctx, &opts),
            Err(BuildError::ProgrammerNotFound { .. })
        ));
    }

    #[test]
    fn test_board_without_debug_support() {
        let fx = Fixture::new();
        fx.install_avr();
        fx.add_sketch("Blink", "void setup() {}\n");
        let gctx = context(&fx);

        let err = debug_config(&gctx, &options("arduino:avr:uno")).unwrap_err();
        assert!(matches!(err, BuildError::DebugNotSupported { ref fqbn } if fqbn == "arduino:avr:uno"));
    }

    #[test]
    fn test_legacy_single_script() {
        let props = PropertyMap::parse(
            "debug.toolchain=gcc\n\
             debug.server=openocd\n\
             debug.server.openocd.script=board.cfg\n\
             debug.server.openocd.scripts.0=ignored.cfg\n",
        );
        let config = from_properties(&props, "", "x:y:z").unwrap();
        assert_eq!(
            config.server_configuration.unwrap().scripts,
            vec!["board.cfg".to_string()]
        );
        assert!(config.custom_configs.is_none());
    }

    #[test]
    fn test_json_field_names() {
        let props = PropertyMap::parse(
            "debug.toolchain=gcc\n\
             debug.server=pyocd\n\
             debug.cortex-debug.custom.a.b=1\n",
        );
        let config = from_properties(&props, "", "x:y:z").unwrap();
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["toolchain"], "gcc");
        assert_eq!(value["cortex-debug_custom_configuration"], json!({"a": {"b": "1"}}));
        assert!(value.get("server_configuration").is_none());
        assert!(value.get("executable").is_none());
        assert_eq!(value["programmer"], "");
    }

    #[test]
    fn test_text_output() {
        let config = DebugConfig {
            executable: "/b/Blink.ino.elf".to_string(),
            toolchain: "gcc".to_string(),
            server: "openocd".to_string(),
            server_configuration: Some(OpenOcdConfig {
                scripts: vec!["a.cfg".to_string()],
                ..Default::default()
            }),
            ..Default::default()
        };
        let text = config.to_text();
        assert!(text.contains("Executable to debug: /b/Blink.ino.elf"));
        assert!(text.contains(" - Script            a.cfg"));
        assert!(!text.contains("SVD"));
    }
}
